use async_trait::async_trait;
use log::debug;
use std::time::Duration;

use super::strategy::{
    poll_until, Probe, WaitStrategy, WaitTarget, DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT,
};
use crate::container_management::types::PortSpec;
use crate::context::Context;
use crate::error_handling::types::WaitError;

/// Upper bound for a single request; a hung server counts as not ready yet.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Waits until `GET <path>` on a published port answers with the expected status.
///
/// Redirects are followed, so the status compared is the final one.
#[derive(Debug, Clone)]
pub struct ForHttp {
    path: String,
    port: String,
    expected_status: u16,
    tls: bool,
    allow_insecure: bool,
    startup_timeout: Duration,
    poll_interval: Duration,
    request_timeout: Duration,
}

impl ForHttp {
    pub fn new(path: impl Into<String>, port: impl Into<String>) -> Self {
        ForHttp {
            path: path.into(),
            port: port.into(),
            expected_status: 200,
            tls: false,
            allow_insecure: false,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    /// Uses `https` instead of `http`.
    pub fn with_tls(mut self) -> Self {
        self.tls = true;
        self
    }

    /// Accepts any server certificate. Only meaningful with [`with_tls`](Self::with_tls).
    pub fn with_allow_insecure(mut self) -> Self {
        self.allow_insecure = true;
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

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn url(&self, host: &str, port: u16) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        if host.contains(':') {
            format!("{}://[{}]:{}{}", scheme, host, port, self.path)
        } else {
            format!("{}://{}:{}{}", scheme, host, port, self.path)
        }
    }
}

pub fn for_http(path: impl Into<String>, port: impl Into<String>) -> ForHttp {
    ForHttp::new(path, port)
}

#[async_trait]
impl WaitStrategy for ForHttp {
    async fn wait_until_ready(
        &self,
        ctx: &Context,
        target: &dyn WaitTarget,
    ) -> Result<(), WaitError> {
        let port: PortSpec = self.port.parse().map_err(WaitError::InvalidCondition)?;
        if !self.path.starts_with('/') {
            return Err(WaitError::InvalidCondition(format!(
                "http path must start with '/': {}",
                self.path
            )));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("testpod/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(self.allow_insecure)
            .build()
            .map_err(|e| WaitError::InvalidCondition(format!("http client: {}", e)))?;

        let host = target.host();
        let (client, host, port) = (&client, host.as_str(), &port);

        poll_until(ctx, target, self.startup_timeout, self.poll_interval, || async move {
            let mapped = target.mapped_port(ctx, port).await?;
            let url = self.url(host, mapped);
            let response = client
                .get(&url)
                .timeout(self.request_timeout)
                .send()
                .await;
            match response {
                Ok(response) if response.status().as_u16() == self.expected_status => {
                    debug!("GET {} answered {}", url, response.status());
                    Ok(Probe::Ready)
                }
                Ok(response) => Ok(Probe::NotYet(format!(
                    "GET {} answered {}",
                    url,
                    response.status()
                ))),
                Err(e) => Ok(Probe::NotYet(format!("GET {} failed: {}", url, e))),
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
    fn urls_carry_scheme_and_port() {
        let wait = for_http("/health", "8080");
        assert_eq!(wait.url("127.0.0.1", 49153), "http://127.0.0.1:49153/health");
        assert_eq!(wait.url("::1", 49153), "http://[::1]:49153/health");
        assert_eq!(
            wait.with_tls().url("localhost", 443),
            "https://localhost:443/health"
        );
    }
}
