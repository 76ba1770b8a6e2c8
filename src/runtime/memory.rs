//! In-memory runtime used by the test suite and for dry runs.
//!
//! Instances live in a map guarded by a mutex, so name uniqueness is enforced
//! atomically the way a real engine does. `exec` understands a handful of
//! shell utilities against a simulated filesystem; anything else exits 127.

use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::driver::RuntimeDriver;
use crate::container_management::types::{
    ContainerState, CreateSpec, ExecOptions, ExecOutput, ExecResult, Framing, InstanceInfo,
    PortBinding,
};
use crate::context::Context;
use crate::error_handling::types::DriverError;

const FIRST_HOST_PORT: u16 = 32768;

#[derive(Debug)]
struct MemoryInstance {
    info: InstanceInfo,
    files: BTreeMap<String, (Vec<u8>, u32)>,
    logs: Vec<u8>,
    execs: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    instances: HashMap<String, MemoryInstance>,
    names: HashMap<String, String>,
    next_port: u16,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, VecDeque<DriverError>>,
}

#[derive(Debug)]
pub struct MemoryRuntime {
    state: Mutex<MemoryState>,
    find_latency: Option<Duration>,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    pub fn new() -> Self {
        MemoryRuntime {
            state: Mutex::new(MemoryState {
                next_port: FIRST_HOST_PORT,
                ..Default::default()
            }),
            find_latency: None,
        }
    }

    /// Delays every `find_by_name` answer, widening the window between the
    /// existence check and the create.
    pub fn with_find_latency(mut self, latency: Duration) -> Self {
        self.find_latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes the next call to `op` (e.g. `"create"`) fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: DriverError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Names of the driver operations invoked so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// Instances currently present, in any state.
    pub fn instance_count(&self) -> usize {
        self.lock().instances.len()
    }

    pub fn instance(&self, id: &str) -> Option<InstanceInfo> {
        self.lock().instances.get(id).map(|i| i.info.clone())
    }

    /// Every argv executed in the instance, in order.
    pub fn exec_history(&self, id: &str) -> Vec<Vec<String>> {
        self.lock()
            .instances
            .get(id)
            .map(|i| i.execs.clone())
            .unwrap_or_default()
    }

    /// Content and mode of a file in the simulated filesystem.
    pub fn file(&self, id: &str, path: &str) -> Option<(Vec<u8>, u32)> {
        self.lock()
            .instances
            .get(id)
            .and_then(|i| i.files.get(path).cloned())
    }

    pub fn append_log(&self, id: &str, line: &str) {
        if let Some(instance) = self.lock().instances.get_mut(id) {
            instance.logs.extend_from_slice(line.as_bytes());
        }
    }

    /// Simulates an instance stopped from outside (crash, `docker stop`).
    pub fn stop_externally(&self, id: &str) {
        if let Some(instance) = self.lock().instances.get_mut(id) {
            instance.info.state = ContainerState::Stopped;
        }
    }

    /// Seeds a running named instance created by someone else, bypassing the
    /// call journal.
    pub fn insert_running(&self, name: &str, image: &str) -> String {
        let mut state = self.lock();
        let id = Uuid::new_v4().simple().to_string();
        let info = InstanceInfo {
            id: id.clone(),
            name: name.to_string(),
            image: image.to_string(),
            state: ContainerState::Running,
            exit_code: None,
            ports: Vec::new(),
            labels: BTreeMap::new(),
        };
        state.names.insert(name.to_string(), id.clone());
        state.instances.insert(
            id.clone(),
            MemoryInstance {
                info,
                files: BTreeMap::new(),
                logs: Vec::new(),
                execs: Vec::new(),
            },
        );
        id
    }

    /// Journals the call and pops an injected failure, if any.
    fn enter(&self, op: &'static str) -> Result<MutexGuard<'_, MemoryState>, DriverError> {
        let mut state = self.lock();
        state.calls.push(op);
        if let Some(err) = state.failures.get_mut(op).and_then(VecDeque::pop_front) {
            debug!("Injected failure for {}: {}", op, err);
            return Err(err);
        }
        Ok(state)
    }
}

fn instance_mut<'a>(
    state: &'a mut MemoryState,
    id: &str,
) -> Result<&'a mut MemoryInstance, DriverError> {
    state
        .instances
        .get_mut(id)
        .ok_or_else(|| DriverError::NotFound(id.to_string()))
}

fn not_running(id: &str) -> DriverError {
    DriverError::CommandFailed {
        command: "exec".to_string(),
        status: Some(1),
        stderr: format!("container {} is not running", id),
    }
}

fn resolve(path: &str, working_dir: Option<&str>) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }
    let base = working_dir.unwrap_or("/").trim_end_matches('/');
    format!("{}/{}", base, path)
}

/// Runs one simulated command: returns (exit code, stdout, stderr).
fn simulate(
    instance: &mut MemoryInstance,
    argv: &[String],
    options: &ExecOptions,
) -> (i32, Vec<u8>, Vec<u8>) {
    let program = argv[0].rsplit('/').next().unwrap_or_default();
    let args = &argv[1..];
    let cwd = options.working_dir.as_deref();

    match program {
        "true" => (0, Vec::new(), Vec::new()),
        "false" => (1, Vec::new(), Vec::new()),
        "echo" => (0, format!("{}\n", args.join(" ")).into_bytes(), Vec::new()),
        "touch" => {
            for path in args {
                instance
                    .files
                    .entry(resolve(path, cwd))
                    .or_insert_with(|| (Vec::new(), 0o644));
            }
            (0, Vec::new(), Vec::new())
        }
        "ls" | "cat" => {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let mut code = 0;
            for path in args {
                match instance.files.get(&resolve(path, cwd)) {
                    Some((content, _)) if program == "cat" => out.extend_from_slice(content),
                    Some(_) => out.extend_from_slice(format!("{}\n", path).as_bytes()),
                    None => {
                        code = 1;
                        err.extend_from_slice(
                            format!("{}: {}: No such file or directory\n", program, path)
                                .as_bytes(),
                        );
                    }
                }
            }
            (code, out, err)
        }
        "chmod" if args.len() == 2 => match u32::from_str_radix(&args[0], 8) {
            Ok(mode) => match instance.files.get_mut(&resolve(&args[1], cwd)) {
                Some(file) => {
                    file.1 = mode;
                    (0, Vec::new(), Vec::new())
                }
                None => (1, Vec::new(), b"chmod: No such file or directory\n".to_vec()),
            },
            Err(_) => (1, Vec::new(), b"chmod: invalid mode\n".to_vec()),
        },
        "sh" | "ash" | "bash" => match args.first().map(String::as_str) {
            Some("-c") => {
                let script = args.get(1).map(String::as_str).unwrap_or_default().trim();
                let code = script
                    .strip_prefix("exit ")
                    .and_then(|n| n.trim().parse().ok())
                    .unwrap_or(0);
                (code, Vec::new(), Vec::new())
            }
            Some(script) if instance.files.contains_key(&resolve(script, cwd)) => {
                (0, Vec::new(), Vec::new())
            }
            Some(script) => (
                127,
                Vec::new(),
                format!("{}: can't open '{}'\n", program, script).into_bytes(),
            ),
            None => (0, Vec::new(), Vec::new()),
        },
        _ => (
            127,
            Vec::new(),
            format!("exec: \"{}\": executable file not found in $PATH\n", argv[0]).into_bytes(),
        ),
    }
}

#[async_trait]
impl RuntimeDriver for MemoryRuntime {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn host(&self) -> String {
        "127.0.0.1".to_string()
    }

    async fn create(&self, ctx: &Context, spec: &CreateSpec) -> Result<String, DriverError> {
        ctx.check()?;
        let mut state = self.enter("create")?;

        if let Some(name) = &spec.name {
            if state.names.contains_key(name) {
                return Err(DriverError::NameConflict(name.clone()));
            }
        }

        let id = Uuid::new_v4().simple().to_string();
        let name = spec.name.clone().unwrap_or_default();
        if !name.is_empty() {
            state.names.insert(name.clone(), id.clone());
        }
        // Host ports are assigned at start.
        let ports = spec
            .exposed_ports
            .iter()
            .map(|p| PortBinding {
                container: *p,
                host_port: 0,
            })
            .collect();
        state.instances.insert(
            id.clone(),
            MemoryInstance {
                info: InstanceInfo {
                    id: id.clone(),
                    name,
                    image: spec.image.clone(),
                    state: ContainerState::Created,
                    exit_code: None,
                    ports,
                    labels: spec.labels.clone(),
                },
                files: BTreeMap::new(),
                logs: Vec::new(),
                execs: Vec::new(),
            },
        );
        debug!("memory: created {} from {}", id, spec.image);
        Ok(id)
    }

    async fn start(&self, ctx: &Context, id: &str) -> Result<(), DriverError> {
        ctx.check()?;
        let mut guard = self.enter("start")?;
        let MemoryState {
            instances,
            next_port,
            ..
        } = &mut *guard;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| DriverError::NotFound(id.to_string()))?;
        for binding in instance.info.ports.iter_mut().filter(|b| b.host_port == 0) {
            binding.host_port = *next_port;
            *next_port = next_port.checked_add(1).unwrap_or(FIRST_HOST_PORT);
        }
        instance.info.state = ContainerState::Running;
        instance.info.exit_code = None;
        instance.logs.extend_from_slice(b"container started\n");
        Ok(())
    }

    async fn find_by_name(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<Option<InstanceInfo>, DriverError> {
        ctx.check()?;
        let found = {
            let state = self.enter("find_by_name")?;
            state
                .names
                .get(name)
                .and_then(|id| state.instances.get(id))
                .map(|i| i.info.clone())
        };
        if let Some(latency) = self.find_latency {
            ctx.sleep(latency).await?;
        }
        Ok(found)
    }

    async fn inspect(&self, ctx: &Context, id: &str) -> Result<InstanceInfo, DriverError> {
        ctx.check()?;
        let mut state = self.enter("inspect")?;
        Ok(instance_mut(&mut state, id)?.info.clone())
    }

    async fn list_by_label(
        &self,
        ctx: &Context,
        key: &str,
        value: &str,
    ) -> Result<Vec<InstanceInfo>, DriverError> {
        ctx.check()?;
        let state = self.enter("list_by_label")?;
        let mut found: Vec<InstanceInfo> = state
            .instances
            .values()
            .filter(|i| i.info.labels.get(key).map(String::as_str) == Some(value))
            .map(|i| i.info.clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn exec(
        &self,
        ctx: &Context,
        id: &str,
        argv: &[String],
        options: &ExecOptions,
    ) -> Result<ExecResult, DriverError> {
        ctx.check()?;
        let mut state = self.enter("exec")?;
        let instance = instance_mut(&mut state, id)?;
        if !instance.info.state.is_running() {
            return Err(not_running(id));
        }
        if argv.is_empty() {
            return Err(DriverError::CommandFailed {
                command: "exec".to_string(),
                status: Some(1),
                stderr: "no command specified".to_string(),
            });
        }
        instance.execs.push(argv.to_vec());
        let (exit_code, stdout, stderr) = simulate(instance, argv, options);
        let output = match options.framing {
            Framing::Combined => {
                let mut all = stdout;
                all.extend_from_slice(&stderr);
                ExecOutput::Combined(all)
            }
            Framing::Demultiplexed => ExecOutput::Demultiplexed { stdout, stderr },
        };
        Ok(ExecResult { exit_code, output })
    }

    async fn copy_file(
        &self,
        ctx: &Context,
        id: &str,
        local: &Path,
        remote: &str,
        mode: u32,
    ) -> Result<(), DriverError> {
        ctx.check()?;
        let content = tokio::fs::read(local).await?;
        let mut state = self.enter("copy_file")?;
        let instance = instance_mut(&mut state, id)?;
        if !instance.info.state.is_running() {
            return Err(not_running(id));
        }
        instance
            .files
            .insert(resolve(remote, None), (content, mode));
        Ok(())
    }

    async fn logs(&self, ctx: &Context, id: &str) -> Result<Vec<u8>, DriverError> {
        ctx.check()?;
        let mut state = self.enter("logs")?;
        Ok(instance_mut(&mut state, id)?.logs.clone())
    }

    async fn stop(&self, ctx: &Context, id: &str, _timeout: Duration) -> Result<(), DriverError> {
        ctx.check()?;
        let mut state = self.enter("stop")?;
        let instance = instance_mut(&mut state, id)?;
        instance.info.state = ContainerState::Stopped;
        instance.info.exit_code = Some(137);
        Ok(())
    }

    async fn terminate(&self, ctx: &Context, id: &str) -> Result<(), DriverError> {
        ctx.check()?;
        let mut state = self.enter("terminate")?;
        let instance = state
            .instances
            .remove(id)
            .ok_or_else(|| DriverError::NotFound(id.to_string()))?;
        if !instance.info.name.is_empty() {
            state.names.remove(&instance.info.name);
        }
        debug!("memory: removed {}", id);
        Ok(())
    }
}
