#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::container_management::types::{
        ContainerState, ExecOptions, ExecOutput, ExecResult, PortSpec,
    };
    use crate::context::{Context, Interrupted};
    use crate::error_handling::types::{DriverError, WaitError};
    use crate::wait::strategy::{poll_with_backoff, Backoff, Probe};
    use crate::wait::*;

    /// Scripted target: fixed port map, appendable logs, queued exec exit codes.
    struct FakeTarget {
        ports: HashMap<PortSpec, u16>,
        logs: Mutex<Vec<u8>>,
        state: Mutex<ContainerState>,
        exit_codes: Mutex<VecDeque<i32>>,
        execs: Mutex<usize>,
    }

    impl FakeTarget {
        fn new() -> Self {
            FakeTarget {
                ports: HashMap::new(),
                logs: Mutex::new(Vec::new()),
                state: Mutex::new(ContainerState::Running),
                exit_codes: Mutex::new(VecDeque::new()),
                execs: Mutex::new(0),
            }
        }

        fn with_port(mut self, container: u16, host: u16) -> Self {
            self.ports.insert(PortSpec::tcp(container), host);
            self
        }

        fn append_log(&self, line: &str) {
            self.logs.lock().unwrap().extend_from_slice(line.as_bytes());
        }
    }

    #[async_trait]
    impl WaitTarget for FakeTarget {
        fn host(&self) -> String {
            "127.0.0.1".to_string()
        }

        async fn mapped_port(&self, _ctx: &Context, port: &PortSpec) -> Result<u16, DriverError> {
            self.ports
                .get(port)
                .copied()
                .ok_or_else(|| DriverError::NotFound(port.to_string()))
        }

        async fn logs(&self, _ctx: &Context) -> Result<Vec<u8>, DriverError> {
            Ok(self.logs.lock().unwrap().clone())
        }

        async fn exec(
            &self,
            _ctx: &Context,
            _argv: &[String],
            _options: &ExecOptions,
        ) -> Result<ExecResult, DriverError> {
            *self.execs.lock().unwrap() += 1;
            let code = self.exit_codes.lock().unwrap().pop_front().unwrap_or(0);
            Ok(ExecResult {
                exit_code: code,
                output: ExecOutput::Combined(Vec::new()),
            })
        }

        async fn state(&self, _ctx: &Context) -> Result<ContainerState, DriverError> {
            Ok(*self.state.lock().unwrap())
        }
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn listening_port_ready_when_accepting() {
        let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let host_port = listener.local_addr().unwrap().port();
        let target = FakeTarget::new().with_port(6379, host_port);

        let strategy = for_listening_port("6379/tcp").with_startup_timeout(Duration::from_secs(5));
        let res = strategy
            .wait_until_ready(&Context::background(), &target)
            .await;
        assert!(res.is_ok(), "{:?}", res);
    }

    #[tokio::test]
    async fn listening_port_times_out_without_listener() {
        let target = FakeTarget::new().with_port(6379, free_port().await);
        let strategy = for_listening_port("6379")
            .with_startup_timeout(Duration::from_millis(300))
            .with_poll_interval(Duration::from_millis(20));

        let err = strategy
            .wait_until_ready(&Context::background(), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Timeout(d) if d == Duration::from_millis(300)));
    }

    #[tokio::test]
    async fn listening_port_rejects_udp() {
        let target = FakeTarget::new();
        let err = for_listening_port("53/udp")
            .wait_until_ready(&Context::background(), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::InvalidCondition(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn log_waits_for_requested_occurrences() {
        let target = std::sync::Arc::new(FakeTarget::new());
        target.append_log("database system is ready to accept connections\n");

        let writer = std::sync::Arc::clone(&target);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            writer.append_log("database system is ready to accept connections\n");
        });

        let strategy = for_log("ready to accept connections")
            .with_occurrence(2)
            .with_startup_timeout(Duration::from_secs(10));
        let res = strategy
            .wait_until_ready(&Context::background(), target.as_ref())
            .await;
        assert!(res.is_ok(), "{:?}", res);
    }

    #[tokio::test(start_paused = true)]
    async fn log_regex_timeout_and_invalid_pattern() {
        let target = FakeTarget::new();
        target.append_log("starting\n");

        let err = for_log(r"listening on port \d+")
            .as_regex()
            .with_startup_timeout(Duration::from_secs(1))
            .wait_until_ready(&Context::background(), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Timeout(_)));

        let err = for_log("(unclosed")
            .as_regex()
            .wait_until_ready(&Context::background(), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::InvalidCondition(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_container_fails_fast() {
        let target = FakeTarget::new();
        *target.state.lock().unwrap() = ContainerState::Stopped;

        let err = for_log("never")
            .with_startup_timeout(Duration::from_secs(60))
            .wait_until_ready(&Context::background(), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::ContainerExited(ContainerState::Stopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn exec_retries_until_expected_code() {
        let target = FakeTarget::new();
        target.exit_codes.lock().unwrap().extend([1, 1, 0]);

        for_exec(["pg_isready"])
            .wait_until_ready(&Context::background(), &target)
            .await
            .unwrap();
        assert_eq!(*target.execs.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn http_waits_for_expected_status() {
        let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let host_port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut served = 0;
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response: &[u8] = if served == 0 {
                    b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n"
                } else {
                    b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK"
                };
                served += 1;
                let _ = socket.write_all(response).await;
            }
        });

        let target = FakeTarget::new().with_port(8080, host_port);
        let res = for_http("/health", "8080")
            .with_poll_interval(Duration::from_millis(10))
            .with_startup_timeout(Duration::from_secs(5))
            .wait_until_ready(&Context::background(), &target)
            .await;
        assert!(res.is_ok(), "{:?}", res);
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let target = FakeTarget::new();
        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = for_log("never")
            .with_startup_timeout(Duration::from_secs(30))
            .wait_until_ready(&ctx, &target)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Interrupted(Interrupted::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn for_all_runs_every_strategy() {
        let target = FakeTarget::new();
        target.append_log("ready\n");
        target.exit_codes.lock().unwrap().extend([2, 0]);

        let strategy = for_all()
            .and(for_log("ready"))
            .and(for_exec(["true"]))
            .with_startup_timeout(Duration::from_secs(5));
        strategy
            .wait_until_ready(&Context::background(), &target)
            .await
            .unwrap();
        assert_eq!(*target.execs.lock().unwrap(), 2);

        let never = for_all()
            .and(for_log("never"))
            .with_startup_timeout(Duration::from_secs(2));
        let err = never
            .wait_until_ready(&Context::background(), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Timeout(d) if d == Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn http_follows_redirects() {
        let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let host_port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let response: &[u8] = if request.starts_with("GET /ready ") {
                    b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n"
                } else {
                    b"HTTP/1.1 302 Found\r\nLocation: /ready\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                };
                let _ = socket.write_all(response).await;
            }
        });

        let target = FakeTarget::new().with_port(8080, host_port);
        let res = for_http("/", "8080")
            .with_status(204)
            .with_startup_timeout(Duration::from_secs(5))
            .wait_until_ready(&Context::background(), &target)
            .await;
        assert!(res.is_ok(), "{:?}", res);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_widens_gaps_between_attempts() {
        let target = FakeTarget::new();
        let start = tokio::time::Instant::now();
        let attempts = Mutex::new(Vec::new());

        let err = poll_with_backoff(
            &Context::background(),
            &target,
            Duration::from_millis(1600),
            Backoff::exponential(Duration::from_millis(100), Duration::from_millis(400)),
            || {
                attempts.lock().unwrap().push(start.elapsed());
                async { Ok(Probe::NotYet("connection refused".to_string())) }
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WaitError::Timeout(_)));
        assert_eq!(
            *attempts.lock().unwrap(),
            [0, 100, 300, 700, 1100, 1500].map(Duration::from_millis)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_interval_keeps_gaps_even() {
        let target = FakeTarget::new();
        let start = tokio::time::Instant::now();
        let attempts = Mutex::new(Vec::new());

        let _ = poll_with_backoff(
            &Context::background(),
            &target,
            Duration::from_millis(350),
            Backoff::fixed(Duration::from_millis(100)),
            || {
                attempts.lock().unwrap().push(start.elapsed());
                async { Ok(Probe::NotYet("not yet".to_string())) }
            },
        )
        .await;

        assert_eq!(
            *attempts.lock().unwrap(),
            [0, 100, 200, 300].map(Duration::from_millis)
        );
    }
}
