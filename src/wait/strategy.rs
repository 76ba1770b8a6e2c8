use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::container_management::types::{ContainerState, ExecOptions, ExecResult, PortSpec};
use crate::context::Context;
use crate::error_handling::types::{DriverError, WaitError};

pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The view of a container a readiness strategy gets to probe.
#[async_trait]
pub trait WaitTarget: Send + Sync {
    /// Host under which published ports are reachable.
    fn host(&self) -> String;

    async fn mapped_port(&self, ctx: &Context, port: &PortSpec) -> Result<u16, DriverError>;

    async fn logs(&self, ctx: &Context) -> Result<Vec<u8>, DriverError>;

    async fn exec(
        &self,
        ctx: &Context,
        argv: &[String],
        options: &ExecOptions,
    ) -> Result<ExecResult, DriverError>;

    /// Current state as reported by the runtime (not the cached one).
    async fn state(&self, ctx: &Context) -> Result<ContainerState, DriverError>;
}

/// A readiness condition.
///
/// Implementations block until the condition holds, their own startup
/// timeout elapses (`WaitError::Timeout`) or `ctx` is interrupted
/// (`WaitError::Interrupted`).
#[async_trait]
pub trait WaitStrategy: Send + Sync + fmt::Debug {
    async fn wait_until_ready(&self, ctx: &Context, target: &dyn WaitTarget)
        -> Result<(), WaitError>;

    fn startup_timeout(&self) -> Duration;
}

/// Outcome of one probe attempt.
pub(crate) enum Probe {
    Ready,
    NotYet(String),
}

/// Delay between probe attempts: `initial`, doubled after every attempt,
/// never more than `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn fixed(interval: Duration) -> Self {
        Backoff {
            initial: interval,
            max: interval,
        }
    }

    pub(crate) fn exponential(initial: Duration, max: Duration) -> Self {
        Backoff {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay after the `attempt`-th failed probe (zero-based).
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// Shared polling loop: runs `probe` every `interval` until it reports ready,
/// the target stops running, or `timeout` elapses.
pub(crate) async fn poll_until<'a, F, Fut>(
    ctx: &'a Context,
    target: &'a dyn WaitTarget,
    timeout: Duration,
    interval: Duration,
    probe: F,
) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe, WaitError>>,
{
    poll_with_backoff(ctx, target, timeout, Backoff::fixed(interval), probe).await
}

/// [`poll_until`] with a growing delay between attempts.
pub(crate) async fn poll_with_backoff<'a, F, Fut>(
    ctx: &'a Context,
    target: &'a dyn WaitTarget,
    timeout: Duration,
    backoff: Backoff,
    mut probe: F,
) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe, WaitError>>,
{
    let poll = async {
        let mut attempt: u32 = 0;
        loop {
            match probe().await? {
                Probe::Ready => return Ok(()),
                Probe::NotYet(reason) => log::trace!("not ready yet: {}", reason),
            }
            let state = target.state(ctx).await?;
            if !state.is_running() {
                return Err(WaitError::ContainerExited(state));
            }
            ctx.sleep(backoff.delay(attempt)).await?;
            attempt = attempt.saturating_add(1);
        }
    };

    match tokio::time::timeout(timeout, ctx.run(poll)).await {
        Ok(Ok(result)) => result,
        Ok(Err(interrupted)) => Err(WaitError::Interrupted(interrupted)),
        Err(_) => Err(WaitError::Timeout(timeout)),
    }
}
