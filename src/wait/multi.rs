use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::strategy::{WaitStrategy, WaitTarget, DEFAULT_STARTUP_TIMEOUT};
use crate::context::Context;
use crate::error_handling::types::WaitError;

/// Runs several strategies one after another under a single overall deadline.
#[derive(Debug, Clone)]
pub struct ForAll {
    strategies: Vec<Arc<dyn WaitStrategy>>,
    startup_timeout: Duration,
}

impl ForAll {
    pub fn new() -> Self {
        ForAll {
            strategies: Vec::new(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    pub fn and<W>(mut self, strategy: W) -> Self
    where
        W: WaitStrategy + 'static,
    {
        self.strategies.push(Arc::new(strategy));
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

impl Default for ForAll {
    fn default() -> Self {
        Self::new()
    }
}

pub fn for_all() -> ForAll {
    ForAll::new()
}

#[async_trait]
impl WaitStrategy for ForAll {
    async fn wait_until_ready(
        &self,
        ctx: &Context,
        target: &dyn WaitTarget,
    ) -> Result<(), WaitError> {
        let all = async {
            for strategy in &self.strategies {
                strategy.wait_until_ready(ctx, target).await?;
            }
            Ok(())
        };
        match tokio::time::timeout(self.startup_timeout, all).await {
            Ok(result) => result,
            Err(_) => Err(WaitError::Timeout(self.startup_timeout)),
        }
    }

    fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }
}
