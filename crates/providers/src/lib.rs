pub mod config;
pub mod openai;
pub mod registry;

pub use config::{ProviderConfig, RelayConfig};
pub use openai::OpenAiCompatClient;
pub use registry::ProviderRegistry;
