//! Runtime Driver trait
//!
//! This module defines the `RuntimeDriver` trait, the boundary between the
//! container manager and a concrete container engine.
//!
//! Implementors are responsible for:
//! - Creating, starting, stopping and removing instances
//! - Looking instances up by name and by label
//! - Executing commands and copying files into running instances
//!
//! The engine, not the driver, enforces name uniqueness: a `create` whose name
//! is taken must fail with [`DriverError::NameConflict`].

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::container_management::types::{CreateSpec, ExecOptions, ExecResult, InstanceInfo};
use crate::context::Context;
use crate::error_handling::types::DriverError;

#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Short backend name used in logs, e.g. "docker".
    fn name(&self) -> &'static str;

    /// Host under which published ports are reachable.
    fn host(&self) -> String;

    /// Creates (but does not start) an instance and returns its id.
    async fn create(&self, ctx: &Context, spec: &CreateSpec) -> Result<String, DriverError>;

    async fn start(&self, ctx: &Context, id: &str) -> Result<(), DriverError>;

    /// Looks up an instance by exact name, in any state.
    async fn find_by_name(&self, ctx: &Context, name: &str)
        -> Result<Option<InstanceInfo>, DriverError>;

    async fn inspect(&self, ctx: &Context, id: &str) -> Result<InstanceInfo, DriverError>;

    async fn list_by_label(
        &self,
        ctx: &Context,
        key: &str,
        value: &str,
    ) -> Result<Vec<InstanceInfo>, DriverError>;

    async fn exec(
        &self,
        ctx: &Context,
        id: &str,
        argv: &[String],
        options: &ExecOptions,
    ) -> Result<ExecResult, DriverError>;

    /// Copies a local file to `remote` and sets its permission bits to `mode`.
    async fn copy_file(
        &self,
        ctx: &Context,
        id: &str,
        local: &Path,
        remote: &str,
        mode: u32,
    ) -> Result<(), DriverError>;

    /// Everything the instance has written to stdout and stderr so far.
    async fn logs(&self, ctx: &Context, id: &str) -> Result<Vec<u8>, DriverError>;

    async fn stop(&self, ctx: &Context, id: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Stops and removes the instance. Fails with `NotFound` if it is gone.
    async fn terminate(&self, ctx: &Context, id: &str) -> Result<(), DriverError>;
}
