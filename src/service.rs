//! Service descriptions, statuses and snapshots.
use std::{fmt, path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::hooks::ServiceHooks;

/// Observed state of a supervised service.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Status {
    Running,
    Stopped,
    /// No check has run yet.
    #[default]
    Unknown,
    /// None of the candidate binaries exists on disk.
    Missing,
}

/// Mutating operations a caller may request on a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
    Restart,
}

impl Action {
    /// Init-system verb issued for this action.
    pub fn verb(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
        }
    }

    /// Status recorded once the action succeeds.
    pub fn resulting_status(self) -> Status {
        match self {
            Action::Start | Action::Restart => Status::Running,
            Action::Stop => Status::Stopped,
        }
    }
}

/// How a service is controlled, fixed at registration time.
#[derive(Clone, Default)]
pub enum Control {
    /// `start|stop|restart|is-active <unit>` through the init system, or dry-run when the
    /// init system is unavailable.
    #[default]
    InitSystem,
    /// Directly spawned; the hooks own the lifecycle.
    Hooks(Arc<dyn ServiceHooks>),
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::InitSystem => f.write_str("InitSystem"),
            Control::Hooks(_) => f.write_str("Hooks(..)"),
        }
    }
}

/// Static description of a supervised service. Immutable once registered.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Unique identifier, compared case-insensitively.
    pub name: String,
    /// Init-system unit, only used under [`Control::InitSystem`].
    pub unit: String,
    /// Ordered candidate executable paths.
    pub binary_paths: Vec<PathBuf>,
    pub control: Control,
}

impl ServiceSpec {
    /// An init-system controlled service.
    pub fn new(name: impl Into<String>, unit: impl Into<String>, binary_paths: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            binary_paths,
            control: Control::InitSystem,
        }
    }

    /// Replaces init-system control with `hooks`.
    pub fn with_hooks(mut self, hooks: Arc<dyn ServiceHooks>) -> Self {
        self.control = Control::Hooks(hooks);
        self
    }

    pub fn hooks(&self) -> Option<&Arc<dyn ServiceHooks>> {
        match &self.control {
            Control::Hooks(hooks) => Some(hooks),
            Control::InitSystem => None,
        }
    }

    /// Registry key for this service.
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Whether any candidate binary exists. A service without candidates counts as
    /// installed, so only configured paths can make it `missing`.
    pub fn is_installed(&self) -> bool {
        self.binary_paths.is_empty() || self.binary_paths.iter().any(|path| path.exists())
    }

    /// First candidate that is a regular file.
    pub fn first_existing_binary(&self) -> Option<&PathBuf> {
        self.binary_paths.iter().find(|path| path.is_file())
    }
}

/// Point-in-time observation of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub name: String,
    pub unit: String,
    pub status: Status,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Snapshot {
    /// A snapshot for a service that has never been observed.
    pub fn unobserved(spec: &ServiceSpec) -> Self {
        Self {
            name: spec.name.clone(),
            unit: spec.unit.clone(),
            status: Status::Unknown,
            last_updated: None,
            version: None,
        }
    }
}
