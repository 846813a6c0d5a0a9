//! Constants and configuration values for herobox.
//!
//! This module centralizes the timeouts, default paths and well-known names used by the
//! supervisor, its hooks and the HTTP layer.

use std::time::Duration;

// ============================================================================
// Init System
// ============================================================================

/// Control executable whose presence selects init-system mode.
pub const INIT_SYSTEM_PROGRAM: &str = "systemctl";

/// Upper bound for any single init-system verb (`start`, `stop`, `restart`, `is-active`).
pub const INIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// Environment flag that forces dry-run mode when set to `true`.
pub const DRY_RUN_ENV: &str = "HEROBOX_DRY_RUN";

// ============================================================================
// Process Management Timing
// ============================================================================

/// Interval between `try_wait` polls while a foreground command runs.
pub const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Deadline for the TCP fallback probe of a directly spawned daemon, also applied to
/// reachability probes handed an unbounded context.
pub const STATUS_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Deadline for a single `version` / `--version` invocation.
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// HTTP Request Budgets
// ============================================================================

/// Budget for read-only service queries (`GET /api/services[/{name}]`).
pub const SERVICE_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for mutating service actions (`POST /api/services/{name}/{action}`).
pub const SERVICE_ACTION_TIMEOUT: Duration = Duration::from_secs(15);

/// Request timeout for calls into the DNS daemon's plugin API.
pub const PLUGIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Grace period for in-flight requests once shutdown is requested. Requests still running
/// afterwards are abandoned.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Logging
// ============================================================================

/// Capacity of the ring buffer installed by the binary.
pub const LOG_BUFFER_CAPACITY: usize = 500;

/// Capacity used when a non-positive capacity is requested.
pub const LOG_BUFFER_FALLBACK_CAPACITY: usize = 200;

// ============================================================================
// Managed Services
// ============================================================================

/// Name of the DNS-filtering daemon, the one entity with process hooks and a version.
pub const MOSDNS: &str = "mosdns";

/// Name of the sing-box proxy daemon.
pub const SING_BOX: &str = "sing-box";

/// Name of the mihomo proxy daemon.
pub const MIHOMO: &str = "mihomo";

/// Default install locations of the managed binaries.
pub const DEFAULT_MOSDNS_BIN: &str = "/usr/local/bin/mosdns";
pub const DEFAULT_SING_BOX_BIN: &str = "/usr/local/bin/sing-box";
pub const DEFAULT_MIHOMO_BIN: &str = "/usr/local/bin/mihomo";

/// Default init-system units of the managed services.
pub const DEFAULT_MOSDNS_UNIT: &str = "mosdns.service";
pub const DEFAULT_SING_BOX_UNIT: &str = "sing-box.service";
pub const DEFAULT_MIHOMO_UNIT: &str = "mihomo.service";

/// Default listen address of the HTTP API.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default location of the persistent state document.
pub const DEFAULT_STATE_FILE: &str = "herobox.yaml";

/// Default configuration file handed to the DNS daemon.
pub const DEFAULT_MOSDNS_CONFIG: &str = "/etc/herobox/mosdns/config.yaml";

/// Data directory used when none can be derived from the configuration path.
pub const DEFAULT_MOSDNS_DATA_DIR: &str = "/etc/herobox/mosdns";

/// Default host of the DNS daemon's plugin API.
pub const DEFAULT_PLUGIN_HOST: &str = "127.0.0.1";

/// Default port of the DNS daemon's plugin API.
pub const DEFAULT_PLUGIN_PORT: u16 = 9099;

/// Settings key recording the address the API listens on.
pub const LISTEN_ADDR_SETTING: &str = "heroboxPort";
