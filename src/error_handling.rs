pub mod types;

pub use types::{ConfigError, ContainerError, DriverError, Phase, ProvisionError, WaitError};
