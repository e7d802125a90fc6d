pub mod config;
pub mod gateway;
pub mod logging;
pub mod session;

pub use config::ServerConfig;
pub use session::{Inbound, Outbound, Relay, SessionState};
