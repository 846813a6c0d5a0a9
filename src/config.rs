//! Runtime configuration and service registration.
//!
//! Every knob is a CLI flag with an environment fallback. The resulting [`Settings`] are
//! read once at startup and never change afterwards.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Args, builder::BoolishValueParser};
use tracing::{debug, info, warn};

use crate::{
    constants::{
        DEFAULT_LISTEN_ADDR, DEFAULT_MIHOMO_BIN, DEFAULT_MIHOMO_UNIT, DEFAULT_MOSDNS_BIN,
        DEFAULT_MOSDNS_CONFIG, DEFAULT_MOSDNS_UNIT, DEFAULT_SING_BOX_BIN,
        DEFAULT_SING_BOX_UNIT, DEFAULT_STATE_FILE, DRY_RUN_ENV, LISTEN_ADDR_SETTING, MIHOMO,
        MOSDNS, SING_BOX,
    },
    error::StoreError,
    hooks::ProcessHooks,
    plugin::{EndpointOverrides, PluginEndpoint},
    service::ServiceSpec,
    store::{FileStore, StateStore, seed_config_path},
    supervisor::Supervisor,
    version::VersionTracker,
};

/// Startup configuration shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Address the HTTP API listens on. A bare `:port` binds all interfaces.
    #[arg(long = "addr", env = "HEROBOX_ADDR", default_value = DEFAULT_LISTEN_ADDR, global = true)]
    pub listen_addr: String,

    /// Persistent state document.
    #[arg(long, env = "HEROBOX_CONFIG_FILE", default_value = DEFAULT_STATE_FILE, global = true)]
    pub state_file: PathBuf,

    /// DNS daemon configuration file, recorded when the state has none yet.
    #[arg(long, env = "MOSDNS_CONFIG_PATH", default_value = DEFAULT_MOSDNS_CONFIG, global = true)]
    pub mosdns_config: String,

    /// Simulate service control instead of calling the init system.
    #[arg(long, env = DRY_RUN_ENV, value_parser = BoolishValueParser::new(), global = true)]
    pub dry_run: bool,

    /// Preferred DNS daemon binary, tried before the default location.
    #[arg(long, env = "MOSDNS_BIN", global = true)]
    pub mosdns_bin: Option<PathBuf>,

    #[arg(long, env = "MOSDNS_UNIT", default_value = DEFAULT_MOSDNS_UNIT, global = true)]
    pub mosdns_unit: String,

    /// Data directory passed to the DNS daemon. Defaults to the config file's directory.
    #[arg(long, env = "MOSDNS_DATA_DIR", global = true)]
    pub mosdns_data_dir: Option<PathBuf>,

    #[arg(long, env = "SING_BOX_BIN", global = true)]
    pub sing_box_bin: Option<PathBuf>,

    #[arg(long, env = "SING_BOX_UNIT", default_value = DEFAULT_SING_BOX_UNIT, global = true)]
    pub sing_box_unit: String,

    #[arg(long, env = "MIHOMO_BIN", global = true)]
    pub mihomo_bin: Option<PathBuf>,

    #[arg(long, env = "MIHOMO_UNIT", default_value = DEFAULT_MIHOMO_UNIT, global = true)]
    pub mihomo_unit: String,

    /// Base URL of the DNS daemon's plugin API.
    #[arg(long, env = "MOSDNS_PLUGIN_BASE", global = true)]
    pub plugin_base: Option<String>,

    /// Host probed for DNS daemon liveness.
    #[arg(long, env = "MOSDNS_STATUS_HOST", global = true)]
    pub plugin_host: Option<String>,

    #[arg(long, env = "MOSDNS_PLUGIN_PORT", global = true)]
    pub plugin_port: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            mosdns_config: DEFAULT_MOSDNS_CONFIG.to_string(),
            dry_run: false,
            mosdns_bin: None,
            mosdns_unit: DEFAULT_MOSDNS_UNIT.to_string(),
            mosdns_data_dir: None,
            sing_box_bin: None,
            sing_box_unit: DEFAULT_SING_BOX_UNIT.to_string(),
            mihomo_bin: None,
            mihomo_unit: DEFAULT_MIHOMO_UNIT.to_string(),
            plugin_base: None,
            plugin_host: None,
            plugin_port: None,
        }
    }
}

impl Settings {
    /// Listen address with a bare `:port` expanded to all interfaces.
    pub fn listen_addr(&self) -> String {
        normalize_addr(&self.listen_addr)
    }

    pub fn mosdns_binaries(&self) -> Vec<PathBuf> {
        binary_candidates(self.mosdns_bin.as_deref(), DEFAULT_MOSDNS_BIN)
    }

    pub fn sing_box_binaries(&self) -> Vec<PathBuf> {
        binary_candidates(self.sing_box_bin.as_deref(), DEFAULT_SING_BOX_BIN)
    }

    pub fn mihomo_binaries(&self) -> Vec<PathBuf> {
        binary_candidates(self.mihomo_bin.as_deref(), DEFAULT_MIHOMO_BIN)
    }

    pub fn endpoint_overrides(&self) -> EndpointOverrides {
        EndpointOverrides {
            base: self.plugin_base.clone(),
            host: self.plugin_host.clone(),
            port: self.plugin_port.clone(),
        }
    }
}

/// Expands `:8080` to `0.0.0.0:8080`; other values are trimmed and kept.
pub fn normalize_addr(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_LISTEN_ADDR.to_string()
    } else if trimmed.starts_with(':') {
        format!("0.0.0.0{trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// The preferred path, if any, followed by the default, without empties or duplicates.
pub fn binary_candidates(preferred: Option<&Path>, fallback: &str) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::with_capacity(2);
    for path in preferred.into_iter().chain([Path::new(fallback)]) {
        if path.as_os_str().is_empty() || candidates.iter().any(|known| known == path) {
            continue;
        }
        candidates.push(path.to_path_buf());
    }
    candidates
}

/// The three managed services: the DNS daemon under process hooks, the proxies under
/// init-system control.
pub fn register_services(settings: &Settings, store: Arc<dyn StateStore>) -> Vec<ServiceSpec> {
    let endpoint = PluginEndpoint::new(settings.endpoint_overrides(), Arc::clone(&store));
    let hooks = ProcessHooks::new(store, settings.mosdns_data_dir.clone(), endpoint);

    vec![
        ServiceSpec::new(MOSDNS, &settings.mosdns_unit, settings.mosdns_binaries())
            .with_hooks(Arc::new(hooks)),
        ServiceSpec::new(SING_BOX, &settings.sing_box_unit, settings.sing_box_binaries()),
        ServiceSpec::new(MIHOMO, &settings.mihomo_unit, settings.mihomo_binaries()),
    ]
}

/// Everything a subcommand needs, wired from one [`Settings`].
pub struct Runtime {
    pub store: Arc<dyn StateStore>,
    pub supervisor: Arc<Supervisor>,
    pub versions: Arc<VersionTracker>,
    pub endpoint: PluginEndpoint,
}

impl Runtime {
    /// Opens the state store, seeds the DNS daemon config path and registers services.
    pub fn bootstrap(settings: &Settings) -> Result<Self, StoreError> {
        let store: Arc<dyn StateStore> = Arc::new(FileStore::open(&settings.state_file)?);
        Ok(Self::with_store(settings, store))
    }

    pub fn with_store(settings: &Settings, store: Arc<dyn StateStore>) -> Self {
        if let Err(err) = seed_config_path(store.as_ref(), &settings.mosdns_config) {
            warn!("Failed to record DNS daemon config path: {err}");
        }

        let specs = register_services(settings, Arc::clone(&store));
        debug!("Registered {} services", specs.len());
        let supervisor = Arc::new(Supervisor::new(specs, settings.dry_run));
        let versions = Arc::new(VersionTracker::new(
            MOSDNS,
            settings.mosdns_binaries(),
            Arc::clone(&store),
        ));
        let endpoint = PluginEndpoint::new(settings.endpoint_overrides(), Arc::clone(&store));

        Self {
            store,
            supervisor,
            versions,
            endpoint,
        }
    }

    /// Records the listen address and detects the DNS daemon version if none is known.
    /// Neither step can fail startup.
    pub fn prepare_serve(&self, listen_addr: &str) {
        let update = [(LISTEN_ADDR_SETTING.to_string(), listen_addr.to_string())];
        if let Err(err) = self.store.update_settings(update.into_iter().collect()) {
            warn!("Failed to record listen address: {err}");
        }
        if !self.versions.has_version() {
            info!("Detecting {MOSDNS} version");
            self.versions.refresh();
        }
    }
}
