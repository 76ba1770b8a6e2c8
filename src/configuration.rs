pub mod config;
pub mod types;

pub use config::ProviderConfig;
pub use types::RuntimeKind;
