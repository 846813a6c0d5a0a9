//! Error handling for herobox.
use thiserror::Error;

use crate::service::{Action, Snapshot};

/// Errors surfaced by [`crate::supervisor::Supervisor`] operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The requested name is not a registered service.
    #[error("service '{0}' is not registered")]
    UnregisteredService(String),

    /// None of the service's candidate binaries exists on disk.
    #[error("service '{service}' is not installed")]
    NotInstalled {
        /// The service whose binary is missing.
        service: String,
        /// The `missing` snapshot recorded by the failed call.
        snapshot: Snapshot,
    },

    /// A hook refused or failed the requested operation.
    #[error("{action} hook for '{service}' failed: {source}")]
    Hook {
        /// The service whose hook failed.
        service: String,
        /// The operation the hook was asked to perform.
        action: Action,
        /// The underlying hook failure.
        #[source]
        source: HookError,
    },

    /// The status hook failed to determine a status.
    #[error("status hook for '{service}' failed: {source}")]
    StatusHook {
        /// The service whose status hook failed.
        service: String,
        /// The underlying hook failure.
        #[source]
        source: HookError,
    },

    /// An init-system verb could not be executed or exited unsuccessfully.
    #[error("{verb} of unit '{unit}' for '{service}' failed: {source}")]
    Command {
        /// The service being controlled.
        service: String,
        /// The init-system verb, e.g. `restart`.
        verb: String,
        /// The unit the verb targeted.
        unit: String,
        /// The underlying command failure.
        #[source]
        source: LaunchError,
    },

    /// The caller's context expired or was cancelled before work started.
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl SupervisorError {
    /// Returns the `missing` snapshot carried by [`SupervisorError::NotInstalled`].
    pub fn missing_snapshot(&self) -> Option<&Snapshot> {
        match self {
            SupervisorError::NotInstalled { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }

    /// Whether the error came from a deadline or cancellation anywhere in the call.
    pub fn is_timeout(&self) -> bool {
        match self {
            SupervisorError::Context(_) => true,
            SupervisorError::Command { source, .. } => {
                matches!(source, LaunchError::Context(_))
            }
            SupervisorError::Hook { source, .. }
            | SupervisorError::StatusHook { source, .. } => matches!(
                source,
                HookError::Context(_) | HookError::Launch(LaunchError::Context(_))
            ),
            _ => false,
        }
    }
}

/// Deadline and cancellation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's deadline elapsed.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

/// Errors raised while spawning, signalling or running processes.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The binary could not be executed.
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        /// The program that failed to launch.
        program: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A non-positive PID was supplied as a signal target.
    #[error("invalid PID {0}")]
    InvalidTarget(i32),

    /// No process with the PID exists.
    #[error("process {0} not found")]
    NotFound(i32),

    /// The process exists but may not be signalled by us.
    #[error("permission denied signalling process {0}")]
    PermissionDenied(i32),

    /// Any other signalling failure.
    #[error("failed to signal process {pid}: {errno}")]
    Signal {
        /// The target PID.
        pid: i32,
        /// The errno reported by the kernel.
        errno: nix::errno::Errno,
    },

    /// A foreground command exited unsuccessfully.
    #[error("'{program}' exited with status {code:?}")]
    Exit {
        /// The program that exited.
        program: String,
        /// The exit code, absent if terminated by a signal.
        code: Option<i32>,
    },

    /// I/O failure while supervising a foreground command.
    #[error("I/O error while running '{program}': {source}")]
    Io {
        /// The program being supervised.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The command was aborted because its context expired or was cancelled.
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Errors returned by hook implementations.
#[derive(Debug, Error)]
pub enum HookError {
    /// No candidate binary exists on disk.
    #[error("no usable binary found for '{0}'")]
    NoBinaryFound(String),

    /// `stop` was requested but no live process is recorded for the service.
    #[error("no process recorded for '{0}'")]
    NoProcessRecorded(String),

    /// Spawning or signalling failed.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// The hook gave up because its context expired or was cancelled.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Free-form failure reported by a custom hook.
    #[error("{0}")]
    Failed(String),
}

/// Errors raised by the persistent state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the state document failed.
    #[error("failed to access state file: {0}")]
    Io(#[from] std::io::Error),

    /// The state document is not valid YAML.
    #[error("failed to parse state file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The in-memory document lock was poisoned.
    #[error("state store lock poisoned")]
    Poisoned,
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

/// Errors raised while detecting a binary's version.
#[derive(Debug, Error)]
pub enum VersionError {
    /// No candidate paths were configured.
    #[error("no binary paths configured")]
    NoBinaryPaths,

    /// None of the candidate paths exists.
    #[error("no usable binary found among {0} candidate path(s)")]
    NoBinaryFound(usize),

    /// The version command failed.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// The version command printed nothing usable.
    #[error("'{arg}' produced no version output")]
    EmptyOutput {
        /// The argument that was tried, `version` or `--version`.
        arg: String,
    },
}

/// Errors raised by the plugin API reverse proxy.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The request never produced a response.
    #[error("plugin request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The plugin API answered with an error status.
    #[error("{message}")]
    Upstream {
        /// HTTP status code returned upstream.
        status: u16,
        /// Trimmed upstream body, or the status line when the body is empty.
        message: String,
    },

    /// The list or switch tag is not one the plugin API exposes.
    #[error("unknown plugin tag '{0}'")]
    UnknownTag(String),
}
