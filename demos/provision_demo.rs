//! Provisions an alpine container through the Docker CLI, runs a command in
//! it, copies a file in and tears it down.
//!
//! Run with `cargo run --example provision_demo [config.toml]`.

use log::{error, info};
use std::path::Path;
use std::time::Duration;

use testpod::container_management::request::{
    customize, with_entrypoint, with_startup_command, RawCommand,
};
use testpod::container_management::ExecOptions;
use testpod::{Context, ContainerManager, ContainerRequest, GenericContainerRequest, ProviderConfig};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => ProviderConfig::from_file(Path::new(&path))?,
        None => ProviderConfig::default(),
    }
    .apply_env()?;

    let manager = ContainerManager::docker(config)?;
    let ctx = Context::background().with_timeout(Duration::from_secs(120));

    let request = customize(
        GenericContainerRequest::new(ContainerRequest::new("alpine")),
        [
            with_entrypoint(["tail", "-f", "/dev/null"]),
            with_startup_command(RawCommand::new(["touch", "/tmp/marker"])),
        ],
    );

    let mut container = match manager.provision(&ctx, request).await {
        Ok(container) => container,
        Err(mut e) => {
            // A failed provision can still leave a started container behind.
            if let Some(leaked) = e.container_mut() {
                if let Err(cleanup) = leaked.terminate(&Context::background()).await {
                    error!("Failed to remove {}: {}", leaked.container_id(), cleanup);
                }
            }
            return Err(Box::new(e));
        }
    };
    info!("Provisioned {} ({})", container.container_id(), container.image());

    let res = container
        .exec(&ctx, &["ls", "/tmp/marker"], ExecOptions::multiplexed())
        .await?;
    info!("ls exited with {}: {}", res.exit_code, res.output.to_string_lossy().trim());

    container
        .copy_to_container(&ctx, b"hello from testpod\n", "/tmp/hello.txt", 0o644)
        .await?;
    let res = container
        .exec(&ctx, &["cat", "/tmp/hello.txt"], ExecOptions::demultiplexed())
        .await?;
    info!("cat printed: {}", res.output.to_string_lossy().trim());

    container.terminate(&ctx).await?;
    info!("Stats: {:?}", manager.get_container_stats());
    Ok(())
}
