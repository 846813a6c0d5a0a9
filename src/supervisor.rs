use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::{
    constants::{INIT_COMMAND_TIMEOUT, INIT_SYSTEM_PROGRAM},
    context::OpContext,
    error::{LaunchError, SupervisorError},
    launcher::run_foreground,
    service::{Action, Control, ServiceSpec, Snapshot, Status},
};

/// How services without hooks are controlled. Decided once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Verbs are issued through the init system's control executable.
    InitSystem,
    /// No init system: transitions are recorded without touching any process.
    DryRun,
}

/// Registry of supervised services and their most recent snapshots.
///
/// The service registry is immutable after construction. The snapshot cache is guarded by a
/// lock that is never held across a spawn, an init-system command or a probe.
///
/// Operations on the same service are not serialized: two overlapping `start`/`stop`
/// calls may interleave their external effects, and whichever records last wins the
/// cache. Callers needing per-service exclusion must provide it themselves.
#[derive(Debug)]
pub struct Supervisor {
    specs: HashMap<String, ServiceSpec>,
    order: Vec<String>,
    states: RwLock<HashMap<String, Snapshot>>,
    mode: Mode,
    init_program: PathBuf,
}

impl Supervisor {
    /// Builds a supervisor, selecting dry-run when `force_dry_run` is set or the init
    /// system's control executable is not on `PATH`.
    pub fn new(specs: Vec<ServiceSpec>, force_dry_run: bool) -> Self {
        match which::which(INIT_SYSTEM_PROGRAM) {
            Ok(program) if !force_dry_run => {
                info!("Using {} for service control", program.display());
                Self::build(specs, Mode::InitSystem, program)
            }
            Ok(_) => {
                info!("Dry-run mode forced; no service process will be touched");
                Self::dry_run(specs)
            }
            Err(err) => {
                warn!("{INIT_SYSTEM_PROGRAM} not available ({err}); running in dry-run mode");
                Self::dry_run(specs)
            }
        }
    }

    /// A supervisor that only simulates init-system control.
    pub fn dry_run(specs: Vec<ServiceSpec>) -> Self {
        Self::build(specs, Mode::DryRun, PathBuf::from(INIT_SYSTEM_PROGRAM))
    }

    /// A supervisor issuing init-system verbs through `program`.
    pub fn with_init_program(specs: Vec<ServiceSpec>, program: impl Into<PathBuf>) -> Self {
        Self::build(specs, Mode::InitSystem, program.into())
    }

    fn build(specs: Vec<ServiceSpec>, mode: Mode, init_program: PathBuf) -> Self {
        let mut registry = HashMap::with_capacity(specs.len());
        let mut order = Vec::with_capacity(specs.len());
        for spec in specs {
            let key = spec.key();
            if registry.contains_key(&key) {
                warn!("Service '{}' registered twice; keeping the last definition", spec.name);
            } else {
                order.push(key.clone());
            }
            registry.insert(key, spec);
        }

        Self {
            specs: registry,
            order,
            states: RwLock::new(HashMap::new()),
            mode,
            init_program,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Looks up a registered service, ignoring case.
    pub fn spec(&self, name: &str) -> Option<&ServiceSpec> {
        self.specs.get(&name.to_lowercase())
    }

    /// Registered services in registration order.
    pub fn specs(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.order.iter().filter_map(|key| self.specs.get(key))
    }

    pub fn start(&self, ctx: &OpContext, name: &str) -> Result<Snapshot, SupervisorError> {
        self.perform(ctx, name, Action::Start)
    }

    pub fn stop(&self, ctx: &OpContext, name: &str) -> Result<Snapshot, SupervisorError> {
        self.perform(ctx, name, Action::Stop)
    }

    pub fn restart(&self, ctx: &OpContext, name: &str) -> Result<Snapshot, SupervisorError> {
        self.perform(ctx, name, Action::Restart)
    }

    /// Runs `action` on `name` and returns the snapshot it recorded.
    ///
    /// Hooks take precedence, then the init system, then dry-run simulation. A failure
    /// leaves the cache untouched unless the binary check already recorded `missing`.
    pub fn perform(
        &self,
        ctx: &OpContext,
        name: &str,
        action: Action,
    ) -> Result<Snapshot, SupervisorError> {
        let spec = self.resolve(name)?;
        self.ensure_installed(spec, action.verb())?;
        ctx.check()?;

        match (&spec.control, self.mode) {
            (Control::Hooks(hooks), _) => {
                let outcome = match action {
                    Action::Start => hooks.start(ctx, spec),
                    Action::Stop => hooks.stop(ctx, spec),
                    Action::Restart => hooks.restart(ctx, spec),
                };
                if let Err(source) = outcome {
                    error!("Hook {action} of '{}' failed: {source}", spec.name);
                    return Err(SupervisorError::Hook {
                        service: spec.name.clone(),
                        action,
                        source,
                    });
                }
                info!("'{}' {action} completed", spec.name);
            }
            (Control::InitSystem, Mode::InitSystem) => {
                self.run_init_verb(ctx, spec, action.verb())
                    .map_err(|source| self.command_error(spec, action.verb(), source))?;
                info!("'{}' {action} via {} completed", spec.name, spec.unit);
            }
            (Control::InitSystem, Mode::DryRun) => {
                info!("'{}' {action} (dry-run)", spec.name);
            }
        }

        Ok(self.record_state(spec, action.resulting_status()))
    }

    /// Determines and records the current status of `name`.
    ///
    /// Hook-controlled services without a status hook report their cached snapshot, as do
    /// init-system services in dry-run mode.
    pub fn status(&self, ctx: &OpContext, name: &str) -> Result<Snapshot, SupervisorError> {
        let spec = self.resolve(name)?;
        self.ensure_installed(spec, "status")?;
        ctx.check()?;

        match (&spec.control, self.mode) {
            (Control::Hooks(hooks), _) => match hooks.status(ctx, spec) {
                Some(Ok(status)) => Ok(self.record_state(spec, status)),
                Some(Err(source)) => {
                    error!("Status hook of '{}' failed: {source}", spec.name);
                    Err(SupervisorError::StatusHook {
                        service: spec.name.clone(),
                        source,
                    })
                }
                None => Ok(self.cached(spec)),
            },
            (Control::InitSystem, Mode::InitSystem) => {
                match self.run_init_verb(ctx, spec, "is-active") {
                    Ok(()) => Ok(self.record_state(spec, Status::Running)),
                    Err(LaunchError::Exit { code, .. }) => {
                        debug!("'{}' is not active (exit {code:?})", spec.unit);
                        Ok(self.record_state(spec, Status::Stopped))
                    }
                    Err(source) => Err(self.command_error(spec, "is-active", source)),
                }
            }
            (Control::InitSystem, Mode::DryRun) => Ok(self.cached(spec)),
        }
    }

    /// Status of every registered service, in registration order.
    ///
    /// A `missing` service contributes its snapshot; any other failure aborts the listing.
    pub fn list(&self, ctx: &OpContext) -> Result<Vec<Snapshot>, SupervisorError> {
        let mut snapshots = Vec::with_capacity(self.order.len());
        for spec in self.specs() {
            match self.status(ctx, &spec.name) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(SupervisorError::NotInstalled { snapshot, .. }) => snapshots.push(snapshot),
                Err(err) => return Err(err),
            }
        }
        Ok(snapshots)
    }

    fn resolve(&self, name: &str) -> Result<&ServiceSpec, SupervisorError> {
        self.spec(name)
            .ok_or_else(|| SupervisorError::UnregisteredService(name.to_string()))
    }

    fn ensure_installed(&self, spec: &ServiceSpec, verb: &str) -> Result<(), SupervisorError> {
        if spec.is_installed() {
            return Ok(());
        }
        let snapshot = self.record_state(spec, Status::Missing);
        error!("Cannot {verb} '{}': no binary installed", spec.name);
        Err(SupervisorError::NotInstalled {
            service: spec.name.clone(),
            snapshot,
        })
    }

    fn run_init_verb(
        &self,
        ctx: &OpContext,
        spec: &ServiceSpec,
        verb: &str,
    ) -> Result<(), LaunchError> {
        let bounded = ctx.child(INIT_COMMAND_TIMEOUT);
        run_foreground(&bounded, &self.init_program, &[verb, spec.unit.as_str()])
    }

    fn command_error(&self, spec: &ServiceSpec, verb: &str, source: LaunchError) -> SupervisorError {
        error!(
            "{} {verb} {} for '{}' failed: {source}",
            self.init_program.display(),
            spec.unit,
            spec.name
        );
        SupervisorError::Command {
            service: spec.name.clone(),
            verb: verb.to_string(),
            unit: spec.unit.clone(),
            source,
        }
    }

    /// Replaces the cached snapshot. `last_updated` never moves backwards.
    fn record_state(&self, spec: &ServiceSpec, status: Status) -> Snapshot {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let key = spec.key();
        let mut now = Utc::now();
        if let Some(previous) = states.get(&key).and_then(|snapshot| snapshot.last_updated)
            && previous > now
        {
            now = previous;
        }

        let snapshot = Snapshot {
            name: spec.name.clone(),
            unit: spec.unit.clone(),
            status,
            last_updated: Some(now),
            version: None,
        };
        states.insert(key, snapshot.clone());
        snapshot
    }

    fn cached(&self, spec: &ServiceSpec) -> Snapshot {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        states
            .get(&spec.key())
            .cloned()
            .unwrap_or_else(|| Snapshot::unobserved(spec))
    }
}
