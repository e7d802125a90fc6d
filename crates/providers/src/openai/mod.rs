pub mod client;

pub use client::OpenAiCompatClient;
