use async_trait::async_trait;
use log::debug;
use regex::Regex;
use std::time::Duration;

use super::strategy::{
    poll_until, Probe, WaitStrategy, WaitTarget, DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT,
};
use crate::context::Context;
use crate::error_handling::types::WaitError;

#[derive(Debug, Clone)]
enum LogPattern {
    Literal(String),
    Regex(String),
}

/// Waits until the container log contains a line (or regex match) a given
/// number of times.
#[derive(Debug, Clone)]
pub struct ForLog {
    pattern: LogPattern,
    occurrences: usize,
    startup_timeout: Duration,
    poll_interval: Duration,
}

impl ForLog {
    pub fn new(text: impl Into<String>) -> Self {
        ForLog {
            pattern: LogPattern::Literal(text.into()),
            occurrences: 1,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Treat the pattern as a regular expression. Invalid expressions are
    /// reported when the wait starts.
    pub fn as_regex(mut self) -> Self {
        if let LogPattern::Literal(s) = self.pattern {
            self.pattern = LogPattern::Regex(s);
        }
        self
    }

    pub fn with_occurrence(mut self, occurrences: usize) -> Self {
        self.occurrences = occurrences.max(1);
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

pub fn for_log(text: impl Into<String>) -> ForLog {
    ForLog::new(text)
}

enum Matcher {
    Literal(String),
    Regex(Regex),
}

impl Matcher {
    fn count(&self, haystack: &str) -> usize {
        match self {
            Matcher::Literal(s) if s.is_empty() => 0,
            Matcher::Literal(s) => haystack.matches(s.as_str()).count(),
            Matcher::Regex(re) => re.find_iter(haystack).count(),
        }
    }
}

#[async_trait]
impl WaitStrategy for ForLog {
    async fn wait_until_ready(
        &self,
        ctx: &Context,
        target: &dyn WaitTarget,
    ) -> Result<(), WaitError> {
        let matcher = match &self.pattern {
            LogPattern::Literal(s) if s.is_empty() => {
                return Err(WaitError::InvalidCondition(
                    "log pattern must not be empty".to_string(),
                ))
            }
            LogPattern::Literal(s) => Matcher::Literal(s.clone()),
            LogPattern::Regex(s) => Matcher::Regex(
                Regex::new(s).map_err(|e| WaitError::InvalidCondition(e.to_string()))?,
            ),
        };
        let (matcher, wanted) = (&matcher, self.occurrences);

        poll_until(ctx, target, self.startup_timeout, self.poll_interval, || async move {
            let logs = target.logs(ctx).await?;
            let seen = matcher.count(&String::from_utf8_lossy(&logs));
            if seen >= wanted {
                debug!("Log pattern seen {} times", seen);
                Ok(Probe::Ready)
            } else {
                Ok(Probe::NotYet(format!("log pattern seen {}/{} times", seen, wanted)))
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
    fn literal_and_regex_counting() {
        let logs = "booting\nready to accept connections\nready to accept connections\n";
        assert_eq!(Matcher::Literal("ready".into()).count(logs), 2);
        let re = Regex::new(r"(?m)^ready to accept connections$").unwrap();
        assert_eq!(Matcher::Regex(re).count(logs), 2);
        assert_eq!(Matcher::Literal(String::new()).count(logs), 0);
    }
}
