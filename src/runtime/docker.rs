use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::driver::RuntimeDriver;
use crate::configuration::ProviderConfig;
use crate::container_management::types::{
    ContainerState, CreateSpec, ExecOptions, ExecOutput, ExecResult, Framing, InstanceInfo,
    PortBinding, PortSpec,
};
use crate::context::Context;
use crate::error_handling::types::DriverError;

/// Drives a Docker-compatible engine through its command line (`docker` or `podman`).
///
/// Design notes:
/// - Every call spawns one CLI process with `kill_on_drop`, so an interrupted
///   context also kills the in-flight CLI call.
/// - Exposed ports are published on random host ports (`-p <port>/<proto>`);
///   the mapping is read back from `inspect`.
/// - Engine errors are classified from stderr: name conflicts and missing
///   containers get their own variants, everything else is `CommandFailed`.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    host: String,
}

impl DockerCli {
    pub fn new(config: &ProviderConfig) -> Self {
        let driver = DockerCli {
            binary: config.binary().to_string(),
            host: config.resolved_host(),
        };
        debug!(
            "Configured {} CLI driver with binary {} and host {}",
            config.runtime, driver.binary, driver.host
        );
        driver
    }

    /// Checks whether the CLI is installed and can reach its engine.
    pub fn is_available(&self) -> bool {
        let available = std::process::Command::new(&self.binary)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);

        debug!("{} availability check: {}", self.binary, available);
        available
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }

    async fn output(&self, ctx: &Context, args: &[String]) -> Result<Output, DriverError> {
        debug!("Running `{}`", self.describe(args));
        let output = ctx.run(self.command(args).output()).await?;
        Ok(output?)
    }

    /// Runs the CLI and returns trimmed stdout, classifying failures.
    async fn run(&self, ctx: &Context, args: &[String]) -> Result<String, DriverError> {
        let output = self.output(ctx, args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(
                self.describe(args),
                output.status.code(),
                stderr,
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn inspect_many(&self, ctx: &Context, ids: &[&str]) -> Result<Vec<InstanceInfo>, DriverError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = strings(["inspect", "--type", "container"]);
        args.extend(ids.iter().map(|s| s.to_string()));
        let raw = self.run(ctx, &args).await?;
        parse_inspect(&raw)
    }
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn classify_failure(command: String, status: Option<i32>, stderr: String) -> DriverError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("is already in use") {
        let name = extract_quoted(&stderr).unwrap_or_default();
        return DriverError::NameConflict(name.trim_start_matches('/').to_string());
    }
    if lower.contains("no such container") || lower.contains("no such object") {
        let id = stderr
            .rsplit(':')
            .next()
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        return DriverError::NotFound(id);
    }
    DriverError::CommandFailed {
        command,
        status,
        stderr,
    }
}

fn extract_quoted(s: &str) -> Option<String> {
    let start = s.find('"')? + 1;
    let len = s[start..].find('"')?;
    Some(s[start..start + len].to_string())
}

/// Arguments for `create`, in CLI order.
fn create_args(spec: &CreateSpec) -> Vec<String> {
    let mut args = strings(["create"]);
    if let Some(name) = &spec.name {
        args.push("--name".to_string());
        args.push(name.clone());
    }
    if let Some(first) = spec.entrypoint.first() {
        args.push("--entrypoint".to_string());
        args.push(first.clone());
    }
    for port in &spec.exposed_ports {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push(spec.image.clone());
    // `--entrypoint` takes a single executable; its arguments precede the command.
    args.extend(spec.entrypoint.iter().skip(1).cloned());
    args.extend(spec.cmd.iter().cloned());
    args
}

fn exec_args(id: &str, argv: &[String], options: &ExecOptions) -> Vec<String> {
    let mut args = strings(["exec"]);
    for (key, value) in &options.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    if let Some(dir) = &options.working_dir {
        args.push("-w".to_string());
        args.push(dir.clone());
    }
    if let Some(user) = &options.user {
        args.push("-u".to_string());
        args.push(user.clone());
    }
    args.push(id.to_string());
    args.extend(argv.iter().cloned());
    args
}

/// `docker exec` exits with 125 when the CLI or daemon failed before the
/// command ran. Other daemon errors (e.g. a missing container) exit non-zero
/// with the daemon's message on the CLI's stderr. Anything else is the exit
/// status of the command inside the container.
fn is_cli_failure(exit_code: i32, stderr: &[u8]) -> bool {
    if exit_code == 0 {
        return false;
    }
    exit_code == 125
        || String::from_utf8_lossy(stderr)
            .trim_start()
            .starts_with("Error response from daemon:")
}

/// Output of one `exec`, kept both interleaved and per stream.
#[derive(Debug, Default)]
struct Captured {
    combined: Vec<u8>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Captured {
    fn into_output(self, framing: Framing) -> ExecOutput {
        match framing {
            Framing::Combined => ExecOutput::Combined(self.combined),
            Framing::Demultiplexed => ExecOutput::Demultiplexed {
                stdout: self.stdout,
                stderr: self.stderr,
            },
        }
    }
}

/// Reads both pipes to the end concurrently. `combined` holds the chunks in
/// the order they arrived.
async fn collect_output<O, E>(mut stdout: O, mut stderr: E) -> std::io::Result<Captured>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut captured = Captured::default();
    let (mut out_done, mut err_done) = (false, false);
    let mut out_buf = [0u8; 4096];
    let mut err_buf = [0u8; 4096];

    while !(out_done && err_done) {
        tokio::select! {
            read = stdout.read(&mut out_buf), if !out_done => {
                let n = read?;
                if n == 0 {
                    out_done = true;
                } else {
                    captured.stdout.extend_from_slice(&out_buf[..n]);
                    captured.combined.extend_from_slice(&out_buf[..n]);
                }
            }
            read = stderr.read(&mut err_buf), if !err_done => {
                let n = read?;
                if n == 0 {
                    err_done = true;
                } else {
                    captured.stderr.extend_from_slice(&err_buf[..n]);
                    captured.combined.extend_from_slice(&err_buf[..n]);
                }
            }
        }
    }

    Ok(captured)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    #[serde(default)]
    name: String,
    config: InspectConfig,
    state: InspectState,
    #[serde(default)]
    network_settings: Option<InspectNetwork>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    image: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    #[serde(default)]
    exit_code: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    #[serde(default)]
    ports: Option<HashMap<String, Option<Vec<InspectHostBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostBinding {
    #[serde(default)]
    host_port: String,
}

fn parse_inspect(raw: &str) -> Result<Vec<InstanceInfo>, DriverError> {
    let entries: Vec<InspectEntry> =
        serde_json::from_str(raw).map_err(|e| DriverError::Parse(e.to_string()))?;

    let mut infos = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut ports = Vec::new();
        let raw_ports = entry.network_settings.and_then(|n| n.ports).unwrap_or_default();
        for (key, bindings) in raw_ports {
            let container: PortSpec = match key.parse() {
                Ok(p) => p,
                Err(e) => {
                    warn!("Ignoring unparsable port key {}: {}", key, e);
                    continue;
                }
            };
            let host_port = bindings
                .unwrap_or_default()
                .iter()
                .find_map(|b| b.host_port.parse::<u16>().ok());
            if let Some(host_port) = host_port {
                ports.push(PortBinding {
                    container,
                    host_port,
                });
            }
        }
        ports.sort_by_key(|b| (b.container.port, b.container.protocol.to_string()));

        infos.push(InstanceInfo {
            id: entry.id,
            name: entry.name.trim_start_matches('/').to_string(),
            image: entry.config.image,
            state: ContainerState::from_status(&entry.state.status),
            exit_code: entry.state.exit_code,
            ports,
            labels: entry.config.labels.unwrap_or_default(),
        });
    }
    Ok(infos)
}

#[async_trait]
impl RuntimeDriver for DockerCli {
    fn name(&self) -> &'static str {
        "docker-cli"
    }

    fn host(&self) -> String {
        self.host.clone()
    }

    async fn create(&self, ctx: &Context, spec: &CreateSpec) -> Result<String, DriverError> {
        let args = create_args(spec);
        let id = self.run(ctx, &args).await.map_err(|e| match (e, &spec.name) {
            (DriverError::NameConflict(_), Some(name)) => DriverError::NameConflict(name.clone()),
            (e, _) => e,
        })?;
        // `create` may print pull progress before the id
        let id = id.lines().last().unwrap_or_default().trim().to_string();
        if id.is_empty() {
            return Err(DriverError::Parse("create returned no container id".to_string()));
        }
        info!("Created container {} from image {}", id, spec.image);
        Ok(id)
    }

    async fn start(&self, ctx: &Context, id: &str) -> Result<(), DriverError> {
        self.run(ctx, &strings(["start", id])).await?;
        Ok(())
    }

    async fn find_by_name(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<Option<InstanceInfo>, DriverError> {
        let filter = format!("name=^/?{}$", regex::escape(name));
        let ids = self
            .run(ctx, &strings(["ps", "-a", "-q", "--no-trunc", "--filter", filter.as_str()]))
            .await?;
        let ids: Vec<&str> = ids.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let found = self
            .inspect_many(ctx, &ids)
            .await?
            .into_iter()
            .find(|info| info.name == name);
        debug!(
            "Container lookup for name {}: {}",
            name,
            if found.is_some() { "found" } else { "not found" }
        );
        Ok(found)
    }

    async fn inspect(&self, ctx: &Context, id: &str) -> Result<InstanceInfo, DriverError> {
        self.inspect_many(ctx, &[id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::NotFound(id.to_string()))
    }

    async fn list_by_label(
        &self,
        ctx: &Context,
        key: &str,
        value: &str,
    ) -> Result<Vec<InstanceInfo>, DriverError> {
        let filter = format!("label={}={}", key, value);
        let ids = self
            .run(ctx, &strings(["ps", "-a", "-q", "--no-trunc", "--filter", filter.as_str()]))
            .await?;
        let ids: Vec<&str> = ids.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        self.inspect_many(ctx, &ids).await
    }

    async fn exec(
        &self,
        ctx: &Context,
        id: &str,
        argv: &[String],
        options: &ExecOptions,
    ) -> Result<ExecResult, DriverError> {
        let args = exec_args(id, argv, options);
        debug!("Running `{}`", self.describe(&args));

        let mut child = self.command(&args).spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::Parse("exec stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DriverError::Parse("exec stderr not captured".to_string()))?;

        let (captured, status) = ctx
            .run(async {
                let captured = collect_output(stdout, stderr).await?;
                let status = child.wait().await?;
                Ok::<_, std::io::Error>((captured, status))
            })
            .await??;

        let exit_code = status.code().unwrap_or(-1);
        if is_cli_failure(exit_code, &captured.stderr) {
            return Err(classify_failure(
                self.describe(&args),
                status.code(),
                String::from_utf8_lossy(&captured.stderr).trim().to_string(),
            ));
        }
        Ok(ExecResult {
            exit_code,
            output: captured.into_output(options.framing),
        })
    }

    async fn copy_file(
        &self,
        ctx: &Context,
        id: &str,
        local: &Path,
        remote: &str,
        mode: u32,
    ) -> Result<(), DriverError> {
        let meta = tokio::fs::metadata(local).await?;
        if !meta.is_file() {
            return Err(DriverError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", local.display()),
            )));
        }

        let args = vec![
            "cp".to_string(),
            local.display().to_string(),
            format!("{}:{}", id, remote),
        ];
        self.run(ctx, &args).await?;

        let chmod = vec!["chmod".to_string(), format!("{:o}", mode), remote.to_string()];
        let result = self.exec(ctx, id, &chmod, &ExecOptions::default()).await?;
        if !result.success() {
            return Err(DriverError::CommandFailed {
                command: format!("chmod {:o} {}", mode, remote),
                status: Some(result.exit_code),
                stderr: result.output.to_string_lossy(),
            });
        }
        debug!("Copied {} to {}:{} with mode {:o}", local.display(), id, remote, mode);
        Ok(())
    }

    async fn logs(&self, ctx: &Context, id: &str) -> Result<Vec<u8>, DriverError> {
        let args = strings(["logs", id]);
        let output = self.output(ctx, &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(self.describe(&args), output.status.code(), stderr));
        }
        let mut all = output.stdout;
        all.extend_from_slice(&output.stderr);
        Ok(all)
    }

    async fn stop(&self, ctx: &Context, id: &str, timeout: Duration) -> Result<(), DriverError> {
        let secs = timeout.as_secs().to_string();
        self.run(ctx, &strings(["stop", "-t", secs.as_str(), id])).await?;
        Ok(())
    }

    async fn terminate(&self, ctx: &Context, id: &str) -> Result<(), DriverError> {
        self.run(ctx, &strings(["rm", "-f", "-v", id])).await?;
        info!("Removed container {}", id);
        Ok(())
    }
}
