//! Herobox is a small control-plane backend for locally installed network daemons: a
//! DNS-filtering daemon and one or two proxy daemons. It starts, stops, restarts and
//! reports the status of those services, whether they are managed by the init system or
//! spawned directly, and exposes that control surface over HTTP.

/// HTTP API.
pub mod api;

/// CLI interface.
pub mod cli;

/// Runtime configuration and service registration.
pub mod config;

/// Timeouts, defaults and well-known names.
pub mod constants;

/// Deadlines and cancellation for blocking operations.
pub mod context;

/// Error handling.
pub mod error;

/// Per-service control overrides for directly spawned daemons.
pub mod hooks;

/// Process spawning, signalling and foreground command execution.
pub mod launcher;

/// In-memory log ring buffer.
pub mod logs;

/// Reverse proxy for the DNS daemon's plugin API.
pub mod plugin;

/// Liveness probes.
pub mod probe;

/// Service descriptions, statuses and snapshots.
pub mod service;

/// Persistent state store.
pub mod store;

/// Service supervisor.
pub mod supervisor;

/// Binary version detection and snapshot enrichment.
pub mod version;
