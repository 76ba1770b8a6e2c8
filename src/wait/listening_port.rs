use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use tokio::net::TcpStream;

use super::strategy::{
    poll_with_backoff, Backoff, Probe, WaitStrategy, WaitTarget, DEFAULT_POLL_INTERVAL,
    DEFAULT_STARTUP_TIMEOUT,
};
use crate::container_management::types::{PortSpec, Protocol};
use crate::context::Context;
use crate::error_handling::types::WaitError;

/// Longest pause between two connection attempts unless overridden.
pub const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Waits until a published TCP port accepts connections from the host.
///
/// The pause between attempts starts at `poll_interval` and doubles after
/// each refused connection, up to `max_poll_interval`.
#[derive(Debug, Clone)]
pub struct ForListeningPort {
    port: String,
    startup_timeout: Duration,
    poll_interval: Duration,
    max_poll_interval: Duration,
}

impl ForListeningPort {
    /// `port` uses the request syntax: `"80"` or `"80/tcp"`.
    pub fn new(port: impl Into<String>) -> Self {
        ForListeningPort {
            port: port.into(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_interval: DEFAULT_MAX_POLL_INTERVAL,
        }
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_poll_interval(mut self, interval: Duration) -> Self {
        self.max_poll_interval = interval;
        self
    }

    fn backoff(&self) -> Backoff {
        Backoff::exponential(self.poll_interval, self.max_poll_interval)
    }
}

pub fn for_listening_port(port: impl Into<String>) -> ForListeningPort {
    ForListeningPort::new(port)
}

#[async_trait]
impl WaitStrategy for ForListeningPort {
    async fn wait_until_ready(
        &self,
        ctx: &Context,
        target: &dyn WaitTarget,
    ) -> Result<(), WaitError> {
        let port: PortSpec = self.port.parse().map_err(WaitError::InvalidCondition)?;
        if port.protocol != Protocol::TCP {
            return Err(WaitError::InvalidCondition(format!(
                "cannot probe {} for connections, only tcp ports",
                port
            )));
        }
        let host = target.host();
        let port = &port;
        let host = host.as_str();

        let mut attempts: u32 = 0;

        poll_with_backoff(ctx, target, self.startup_timeout, self.backoff(), || {
            attempts += 1;
            let attempt = attempts;
            async move {
                let mapped = target.mapped_port(ctx, port).await?;
                let addr = format!("{}:{}", host, mapped);
                match TcpStream::connect(&addr).await {
                    Ok(_) => {
                        debug!("Port {} reachable at {} after {} attempts", port, addr, attempt);
                        Ok(Probe::Ready)
                    }
                    Err(e) => Ok(Probe::NotYet(format!(
                        "connection attempt {} to {} failed: {}",
                        attempt, addr, e
                    ))),
                }
            }
        })
        .await
    }

    fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_back_off_up_to_the_cap() {
        let wait = for_listening_port("5432")
            .with_poll_interval(Duration::from_millis(50))
            .with_max_poll_interval(Duration::from_millis(300));
        let delays: Vec<_> = (0..6).map(|n| wait.backoff().delay(n)).collect();
        assert_eq!(
            delays,
            [50, 100, 200, 300, 300, 300].map(Duration::from_millis)
        );
    }

    #[test]
    fn cap_below_interval_keeps_interval() {
        let wait = for_listening_port("5432")
            .with_poll_interval(Duration::from_millis(500))
            .with_max_poll_interval(Duration::from_millis(100));
        assert_eq!(wait.backoff().delay(0), Duration::from_millis(500));
        assert_eq!(wait.backoff().delay(40), Duration::from_millis(500));
    }
}
