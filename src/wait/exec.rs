use async_trait::async_trait;
use std::time::Duration;

use super::strategy::{
    poll_until, Probe, WaitStrategy, WaitTarget, DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT,
};
use crate::container_management::types::ExecOptions;
use crate::context::Context;
use crate::error_handling::types::WaitError;

/// Waits until a command run inside the container exits with the expected code.
#[derive(Debug, Clone)]
pub struct ForExec {
    argv: Vec<String>,
    expected_exit_code: i32,
    startup_timeout: Duration,
    poll_interval: Duration,
}

impl ForExec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ForExec {
            argv: argv.into_iter().map(Into::into).collect(),
            expected_exit_code: 0,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.expected_exit_code = code;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

pub fn for_exec<I, S>(argv: I) -> ForExec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ForExec::new(argv)
}

#[async_trait]
impl WaitStrategy for ForExec {
    async fn wait_until_ready(
        &self,
        ctx: &Context,
        target: &dyn WaitTarget,
    ) -> Result<(), WaitError> {
        if self.argv.is_empty() {
            return Err(WaitError::InvalidCondition("exec probe needs a command".to_string()));
        }
        let options = ExecOptions::default();
        let (argv, options, expected) = (self.argv.as_slice(), &options, self.expected_exit_code);

        poll_until(ctx, target, self.startup_timeout, self.poll_interval, || async move {
            let result = target.exec(ctx, argv, options).await?;
            if result.exit_code == expected {
                Ok(Probe::Ready)
            } else {
                Ok(Probe::NotYet(format!("{:?} exited with {}", argv, result.exit_code)))
            }
        })
        .await
    }

    fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }
}
