//! Per-service control overrides.
//!
//! A service registered with [`ServiceHooks`] is controlled directly instead of through
//! the init system: the hooks spawn, signal and probe its process themselves.
//! [`ProcessHooks`] is the implementation used for the DNS daemon.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, info, warn};

use crate::{
    constants::{DEFAULT_MOSDNS_DATA_DIR, STATUS_PROBE_TIMEOUT},
    context::OpContext,
    error::{HookError, LaunchError},
    launcher::{spawn_detached, terminate},
    plugin::PluginEndpoint,
    probe::{is_process_alive, is_reachable},
    service::{ServiceSpec, Status},
    store::StateStore,
};

/// Start, stop and restart overrides, plus an optional status override.
///
/// Every call receives the caller's context and the service's static spec.
pub trait ServiceHooks: Send + Sync {
    fn start(&self, ctx: &OpContext, spec: &ServiceSpec) -> Result<(), HookError>;

    fn stop(&self, ctx: &OpContext, spec: &ServiceSpec) -> Result<(), HookError>;

    fn restart(&self, ctx: &OpContext, spec: &ServiceSpec) -> Result<(), HookError>;

    /// `None` when the hooks do not determine status; the supervisor then keeps reporting
    /// its last cached snapshot.
    fn status(&self, _ctx: &OpContext, _spec: &ServiceSpec) -> Option<Result<Status, HookError>> {
        None
    }
}

/// Hooks for a daemon that herobox spawns itself and tracks by persisted PID.
///
/// The daemon is launched as `<binary> start -c <config path> -d <data dir>`. Its status
/// is the liveness of the persisted PID, falling back to a TCP probe of its plugin API
/// endpoint when the PID is stale or was never recorded.
pub struct ProcessHooks {
    store: Arc<dyn StateStore>,
    data_dir: Option<PathBuf>,
    endpoint: PluginEndpoint,
}

impl ProcessHooks {
    pub fn new(
        store: Arc<dyn StateStore>,
        data_dir: Option<PathBuf>,
        endpoint: PluginEndpoint,
    ) -> Self {
        Self {
            store,
            data_dir,
            endpoint,
        }
    }

    fn spawn(&self, ctx: &OpContext, spec: &ServiceSpec) -> Result<(), HookError> {
        ctx.check()?;
        let binary = spec
            .first_existing_binary()
            .ok_or_else(|| HookError::NoBinaryFound(spec.name.clone()))?;

        let config_path = self.store.config_path();
        let data_dir = resolve_data_dir(self.data_dir.as_deref(), &config_path);
        let data_dir = data_dir.to_string_lossy();

        let pid = spawn_detached(
            binary,
            &["start", "-c", config_path.as_str(), "-d", &*data_dir],
        )?;
        info!("Spawned '{}' with PID {pid}", spec.name);
        self.record_pid(spec, pid);
        Ok(())
    }

    fn record_pid(&self, spec: &ServiceSpec, pid: i32) {
        if let Err(err) = self.store.set_process_id(&spec.name, pid) {
            warn!("Failed to persist PID {pid} for '{}': {err}", spec.name);
        }
    }
}

impl ServiceHooks for ProcessHooks {
    fn start(&self, ctx: &OpContext, spec: &ServiceSpec) -> Result<(), HookError> {
        self.spawn(ctx, spec)
    }

    fn stop(&self, _ctx: &OpContext, spec: &ServiceSpec) -> Result<(), HookError> {
        let pid = self.store.process_id(&spec.name);
        if pid <= 0 {
            return Err(HookError::NoProcessRecorded(spec.name.clone()));
        }

        let outcome = terminate(pid);
        // SIGTERM was sent or the target is already gone; either way the PID is stale.
        self.record_pid(spec, 0);

        match outcome {
            Ok(()) => Ok(()),
            Err(LaunchError::NotFound(_)) => {
                debug!("PID {pid} of '{}' had already exited", spec.name);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn restart(&self, ctx: &OpContext, spec: &ServiceSpec) -> Result<(), HookError> {
        let pid = self.store.process_id(&spec.name);
        if pid > 0
            && let Err(err) = terminate(pid)
        {
            debug!("Ignoring failure to stop previous '{}' PID {pid}: {err}", spec.name);
        }
        self.spawn(ctx, spec)
    }

    fn status(&self, ctx: &OpContext, spec: &ServiceSpec) -> Option<Result<Status, HookError>> {
        let pid = self.store.process_id(&spec.name);
        if pid > 0 {
            if is_process_alive(pid) {
                return Some(Ok(Status::Running));
            }
            debug!("Recorded PID {pid} of '{}' is gone; clearing it", spec.name);
            self.record_pid(spec, 0);
        }

        let probe_ctx = ctx.child(STATUS_PROBE_TIMEOUT);
        let (host, port) = (self.endpoint.host(), self.endpoint.port());
        if is_reachable(&probe_ctx, &host, port) {
            Some(Ok(Status::Running))
        } else {
            Some(Ok(Status::Stopped))
        }
    }
}

/// Data directory handed to the daemon: the explicit override, else the directory of the
/// configuration file, else [`DEFAULT_MOSDNS_DATA_DIR`].
pub fn resolve_data_dir(explicit: Option<&Path>, config_path: &str) -> PathBuf {
    if let Some(dir) = explicit.filter(|dir| !dir.as_os_str().is_empty()) {
        return dir.to_path_buf();
    }
    Path::new(config_path)
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MOSDNS_DATA_DIR))
}
