//! Disposable containers for integration tests.
//!
//! Build a [`GenericContainerRequest`], hand it to a [`ContainerManager`] and
//! get back a [`ContainerHandle`] to a started, ready container. Requests can
//! name a container and ask to reuse it across runs, register commands to run
//! once it is up, and attach a readiness strategy from [`wait`].

pub mod configuration;
pub mod container_management;
pub mod context;
pub mod error_handling;
pub mod runtime;
pub mod wait;

pub use configuration::{ProviderConfig, RuntimeKind};
pub use container_management::{
    ContainerHandle, ContainerManager, ContainerRequest, GenericContainerRequest,
};
pub use context::{Context, Interrupted};
pub use error_handling::{ContainerError, DriverError, ProvisionError, WaitError};
