#[cfg(test)]
mod integration_tests {
    use crate::configuration::ProviderConfig;
    use crate::container_management::request::*;
    use crate::container_management::types::ExecOptions;
    use crate::container_management::ContainerManager;
    use crate::context::Context;
    use crate::error_handling::types::{ContainerError, DriverError};
    use crate::runtime::DockerCli;
    use crate::wait::for_listening_port;
    use serial_test::serial;
    use std::time::Duration;

    const REUSABLE_NAME: &str = "testpod-reusable-nginx";

    fn is_docker_available() -> bool {
        DockerCli::new(&ProviderConfig::default()).is_available()
    }

    fn manager() -> ContainerManager {
        ContainerManager::docker(ProviderConfig::default())
            .expect("Failed to create container manager")
    }

    fn nginx(reuse: bool) -> GenericContainerRequest {
        customize(
            GenericContainerRequest::new(ContainerRequest::new("nginx:alpine")),
            [
                with_name(REUSABLE_NAME),
                with_exposed_ports(["80/tcp"]),
                with_wait_strategy(
                    for_listening_port("80/tcp").with_startup_timeout(Duration::from_secs(60)),
                ),
                with_reuse(reuse),
            ],
        )
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a docker daemon"]
    async fn test_reusable_named_container() {
        let _ = env_logger::builder().is_test(true).try_init();
        if !is_docker_available() {
            return;
        }
        let ctx = Context::background().with_timeout(Duration::from_secs(180));
        let manager = manager();

        let mut first = manager
            .provision(&ctx, nginx(false))
            .await
            .expect("Failed to provision nginx");
        assert!(first.is_running());
        let endpoint = first.endpoint(&ctx, "80").await.expect("no endpoint");
        println!("nginx listening on {}", endpoint);

        let err = manager
            .provision(&ctx, nginx(false))
            .await
            .expect_err("duplicate name must be refused");
        assert!(matches!(err.error(), ContainerError::NameInUse { .. }));

        let second = manager
            .provision(&ctx, nginx(true))
            .await
            .expect("Failed to reuse nginx");
        assert!(second.is_reused());
        assert_eq!(second.container_id(), first.container_id());

        first.terminate(&ctx).await.expect("terminate failed");
        first.terminate(&ctx).await.expect("second terminate failed");
        assert!(!first.is_running());
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a docker daemon"]
    async fn test_startup_command_and_copy() {
        let _ = env_logger::builder().is_test(true).try_init();
        if !is_docker_available() {
            return;
        }
        let ctx = Context::background().with_timeout(Duration::from_secs(120));
        let manager = manager();

        let req = customize(
            GenericContainerRequest::new(ContainerRequest::new("alpine")),
            [
                with_entrypoint(["tail", "-f", "/dev/null"]),
                with_startup_command(RawCommand::new(["touch", "/tmp/marker"])),
            ],
        );
        let mut container = manager.provision(&ctx, req).await.expect("provision failed");

        let res = container
            .exec(&ctx, &["ls", "/tmp/marker"], ExecOptions::multiplexed())
            .await
            .expect("exec failed");
        assert_eq!(res.exit_code, 0);
        assert_eq!(res.output.to_string_lossy(), "/tmp/marker\n");

        container
            .copy_to_container(&ctx, b"hello from the host", "/tmp/greeting", 0o644)
            .await
            .expect("copy failed");
        let res = container
            .exec(&ctx, &["cat", "/tmp/greeting"], ExecOptions::demultiplexed())
            .await
            .expect("exec failed");
        assert_eq!(res.output.stdout(), Some(&b"hello from the host"[..]));

        assert_eq!(manager.cleanup_session(&ctx).await.expect("cleanup failed"), 1);
        container.terminate(&ctx).await.expect("terminate after cleanup");
    }

    #[tokio::test]
    async fn test_missing_runtime_is_reported() {
        let config = ProviderConfig {
            binary: Some("testpod-missing-binary".to_string()),
            ..ProviderConfig::default()
        };
        match ContainerManager::docker(config) {
            Ok(_) => panic!("Manager should have failed without a runtime"),
            Err(ContainerError::Runtime {
                source: DriverError::RuntimeNotAvailable(binary),
                ..
            }) => assert_eq!(binary, "testpod-missing-binary"),
            Err(e) => panic!("Unexpected error type: {:?}", e),
        }
    }
}
