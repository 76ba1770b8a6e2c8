use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::configuration::ProviderConfig;
use crate::container_management::container_handle::ContainerHandle;
use crate::container_management::request::GenericContainerRequest;
use crate::container_management::types::{ContainerState, ContainerStats, InstanceInfo};
use crate::context::Context;
use crate::error_handling::types::{ContainerError, DriverError, Phase, ProvisionError};
use crate::runtime::{DockerCli, RuntimeDriver};

/// Label put on every container this crate creates.
pub const MANAGED_LABEL: &str = "testpod.managed";
/// Label carrying the id of the manager session that created a container.
pub const SESSION_LABEL: &str = "testpod.session";

/// Provisions containers from [`GenericContainerRequest`]s.
///
/// The manager holds no registry of the containers it hands out: each
/// [`ContainerHandle`] owns its instance reference and the caller decides
/// when to terminate it. Concurrent `provision` calls share nothing but the
/// runtime's name namespace; two calls racing on a new name are resolved by
/// the runtime, and the loser gets a name-conflict error.
///
/// A failed provision may leave a started container behind (readiness
/// timeout, failing startup command). The [`ProvisionError`] then carries its
/// handle so it can be inspected and terminated. Containers are also labelled
/// with this manager's session id, so [`cleanup_session`](Self::cleanup_session)
/// can sweep up anything that was leaked.
pub struct ContainerManager {
    driver: Arc<dyn RuntimeDriver>,
    config: ProviderConfig,
    session_id: Uuid,
    stats: Mutex<ContainerStats>,
}

impl ContainerManager {
    /// Creates a manager on top of an existing driver.
    pub fn new(driver: Arc<dyn RuntimeDriver>, config: ProviderConfig) -> Self {
        let session_id = Uuid::new_v4();
        info!(
            "Initializing ContainerManager with runtime {} (session {})",
            driver.name(),
            session_id
        );
        ContainerManager {
            driver,
            config,
            session_id,
            stats: Mutex::new(ContainerStats::default()),
        }
    }

    /// Creates a manager driving the `docker` (or `podman`) CLI.
    ///
    /// Fails if the configuration is invalid or the CLI does not answer.
    pub fn docker(config: ProviderConfig) -> Result<Self, ContainerError> {
        config
            .validate()
            .map_err(|e| ContainerError::InvalidRequest(e.to_string()))?;

        let driver = DockerCli::new(&config);
        if !driver.is_available() {
            error!("{} runtime is not available on this system", config.binary());
            return Err(ContainerError::runtime(
                Phase::Create,
                DriverError::RuntimeNotAvailable(config.binary().to_string()),
            ));
        }

        Ok(Self::new(Arc::new(driver), config))
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Labels applied to every container created by this manager.
    pub fn session_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (SESSION_LABEL.to_string(), self.session_id.to_string()),
        ])
    }

    fn stats(&self) -> MutexGuard<'_, ContainerStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_failure(&self, err: &ContainerError) {
        self.stats().failed_count += 1;
        warn!("Provision failed: {}", err);
    }

    fn fail(&self, err: ContainerError, container: Option<ContainerHandle>) -> ProvisionError {
        self.record_failure(&err);
        ProvisionError::new(err, container)
    }

    /// Creates (or reuses) a container, starts it, waits for readiness and
    /// runs its startup commands.
    ///
    /// Resolution order:
    /// 1. `reuse` without a name fails before any runtime call.
    /// 2. A named request looks the name up. An existing container is attached
    ///    to when `reuse` is set and refused otherwise.
    /// 3. Otherwise the container is created and, if `started`, started.
    /// 4. The readiness strategy runs; on timeout the container stays running.
    /// 5. Startup commands run in order on fresh containers only; the first
    ///    non-zero exit fails the provision.
    ///
    /// A reused container that is not running is started again when
    /// `started` is set. Startup commands are never re-run on reuse.
    pub async fn provision(
        &self,
        ctx: &Context,
        request: GenericContainerRequest,
    ) -> Result<ContainerHandle, ProvisionError> {
        let mut validated = request
            .validate(&self.config.labels)
            .map_err(|e| self.fail(e, None))?;
        // Session labels always win so that cleanup_session can find them.
        validated.spec.labels.extend(self.session_labels());

        let started = request.started;
        let reuse = request.request.reuse;
        let waiting_for = request.request.waiting_for.clone();
        let spec = validated.spec;

        info!(
            "Provisioning container from {} (name: {}, reuse: {}, started: {})",
            spec.image,
            spec.name.as_deref().unwrap_or("<none>"),
            reuse,
            started
        );

        if let Some(name) = spec.name.as_deref() {
            let existing = self
                .driver
                .find_by_name(ctx, name)
                .await
                .map_err(|e| self.fail(ContainerError::runtime(Phase::FindByName, e), None))?;

            if let Some(info) = existing {
                if !reuse {
                    let err = ContainerError::NameInUse {
                        name: name.to_string(),
                        id: info.id,
                    };
                    return Err(self.fail(err, None));
                }
                debug!("Found container {} named {}; reusing it", info.id, name);
                let handle = ContainerHandle::new(
                    Arc::clone(&self.driver),
                    info,
                    true,
                    waiting_for,
                    self.config.stop_timeout(),
                );
                return self.attach(ctx, handle, started).await;
            }
            debug!("No container named {}; creating one", name);
        }

        let id = self
            .driver
            .create(ctx, &spec)
            .await
            .map_err(|e| self.fail(ContainerError::runtime(Phase::Create, e), None))?;
        self.stats().total_created += 1;
        info!("Created container {} from {}", id, spec.image);

        let info = InstanceInfo {
            id,
            name: spec.name.clone().unwrap_or_default(),
            image: spec.image.clone(),
            state: ContainerState::Created,
            exit_code: None,
            ports: Vec::new(),
            labels: spec.labels.clone(),
        };
        let mut handle = ContainerHandle::new(
            Arc::clone(&self.driver),
            info,
            false,
            waiting_for,
            self.config.stop_timeout(),
        );

        if !started {
            debug!("Container {} left in created state", handle.container_id());
            return Ok(handle);
        }

        if let Err(e) = handle.start(ctx).await {
            return Err(self.fail(e, Some(handle)));
        }

        for (argv, options) in validated.startup_commands {
            debug!(
                "Running startup command in {}: {:?}",
                handle.container_id(),
                argv
            );
            let outcome = handle.exec(ctx, argv.as_slice(), options).await;
            match outcome {
                Ok(result) if result.success() => {}
                Ok(result) => {
                    let err = ContainerError::StartupCommandFailed {
                        argv,
                        exit_code: result.exit_code,
                        output: result.output.to_string_lossy(),
                    };
                    return Err(self.fail(err, Some(handle)));
                }
                Err(e) => return Err(self.fail(e, Some(handle))),
            }
        }

        info!(
            "Container {} ready ({})",
            handle.container_id(),
            handle.image()
        );
        Ok(handle)
    }

    async fn attach(
        &self,
        ctx: &Context,
        mut handle: ContainerHandle,
        started: bool,
    ) -> Result<ContainerHandle, ProvisionError> {
        if !started {
            self.stats().total_reused += 1;
            return Ok(handle);
        }

        let outcome = if handle.is_running() {
            handle.wait_until_ready(ctx).await
        } else {
            info!(
                "Reused container {} is {}; starting it",
                handle.container_id(),
                handle.state()
            );
            handle.start(ctx).await
        };

        match outcome {
            Ok(()) => {
                self.stats().total_reused += 1;
                info!("Attached to container {}", handle.container_id());
                Ok(handle)
            }
            Err(e) => Err(self.fail(e, Some(handle))),
        }
    }

    /// Returns a snapshot of the manager's counters.
    pub fn get_container_stats(&self) -> ContainerStats {
        let stats = self.stats().clone();
        debug!(
            "Retrieved container stats: created={}, reused={}, failed={}",
            stats.total_created, stats.total_reused, stats.failed_count
        );
        stats
    }

    /// Removes every container labelled with this manager's session.
    ///
    /// Continues past individual failures, counting them in the stats, and
    /// returns how many containers were removed. Never called implicitly.
    pub async fn cleanup_session(&self, ctx: &Context) -> Result<usize, ContainerError> {
        let session = self.session_id.to_string();
        let containers = self
            .driver
            .list_by_label(ctx, SESSION_LABEL, &session)
            .await
            .map_err(|e| ContainerError::runtime(Phase::List, e))?;
        info!(
            "Starting cleanup of {} containers for session {}",
            containers.len(),
            session
        );

        let mut removed = 0;
        for container in containers {
            match self.driver.terminate(ctx, &container.id).await {
                Ok(()) => {
                    debug!("Removed container {}", container.id);
                    removed += 1;
                }
                Err(DriverError::NotFound(_)) => {
                    debug!("Container {} already gone", container.id)
                }
                Err(DriverError::Interrupted(i)) => return Err(i.into()),
                Err(e) => {
                    error!("Failed to remove container {}: {}", container.id, e);
                    self.stats().failed_count += 1;
                }
            }
        }

        info!(
            "Completed cleanup of session {} ({} removed)",
            session, removed
        );
        Ok(removed)
    }
}

impl Drop for ContainerManager {
    fn drop(&mut self) {
        let stats = self.stats().clone();
        if stats.total_created > 0 {
            debug!(
                "ContainerManager for session {} dropped after creating {} containers; \
                 they are not removed automatically",
                self.session_id, stats.total_created
            );
        }
    }
}
