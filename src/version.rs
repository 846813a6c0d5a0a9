//! Binary version detection and snapshot enrichment.
//!
//! Only the DNS daemon reports a version. Enrichment happens after the supervisor
//! returns its snapshots and never fails the call it decorates.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, warn};

use crate::{
    constants::VERSION_PROBE_TIMEOUT,
    context::OpContext,
    error::VersionError,
    launcher::run_capture,
    service::{Snapshot, Status},
    store::StateStore,
};

/// Extracts a version token from `raw` command output.
///
/// Scans the first line from its last token backwards and returns the first token
/// containing a digit, with surrounding colons trimmed. Falls back to the whole line.
pub fn normalize_version(raw: &str) -> String {
    let trimmed = raw.trim();
    let line = trimmed.lines().next().map(str::trim).unwrap_or_default();

    line.split_whitespace()
        .rev()
        .map(|token| token.trim_matches(':'))
        .find(|token| !token.is_empty() && token.chars().any(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .unwrap_or_else(|| {
            if line.is_empty() {
                trimmed.to_string()
            } else {
                line.to_string()
            }
        })
}

/// Runs the first existing binary with `version`, then `--version`, each bounded by
/// [`VERSION_PROBE_TIMEOUT`].
pub fn detect_version(binary_paths: &[PathBuf]) -> Result<String, VersionError> {
    if binary_paths.is_empty() {
        return Err(VersionError::NoBinaryPaths);
    }
    let binary = binary_paths
        .iter()
        .find(|path| path.is_file())
        .ok_or(VersionError::NoBinaryFound(binary_paths.len()))?;

    match probe(binary, "version") {
        Ok(version) => Ok(version),
        Err(err) => {
            debug!("`{} version` failed: {err}; trying --version", binary.display());
            probe(binary, "--version")
        }
    }
}

fn probe(binary: &Path, arg: &str) -> Result<String, VersionError> {
    let ctx = OpContext::with_timeout(VERSION_PROBE_TIMEOUT);
    let output = run_capture(&ctx, binary, &[arg])?;
    let version = normalize_version(&output);
    if version.is_empty() {
        return Err(VersionError::EmptyOutput {
            arg: arg.to_string(),
        });
    }
    Ok(version)
}

/// Persists status and version for one service and copies the cached version onto its
/// snapshots.
pub struct VersionTracker {
    service: String,
    binary_paths: Vec<PathBuf>,
    store: Arc<dyn StateStore>,
}

impl VersionTracker {
    pub fn new(
        service: impl Into<String>,
        binary_paths: Vec<PathBuf>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            service: service.into(),
            binary_paths,
            store,
        }
    }

    fn tracks(&self, snapshot: &Snapshot) -> bool {
        snapshot.name.eq_ignore_ascii_case(&self.service)
    }

    /// Persists the tracked service's status and, unless it is missing, re-detects its
    /// version.
    pub fn record(&self, snapshots: &[Snapshot]) {
        for snapshot in snapshots.iter().filter(|snapshot| self.tracks(snapshot)) {
            if let Err(err) = self.store.set_status(&self.service, snapshot.status.as_ref()) {
                warn!("Failed to persist status of '{}': {err}", self.service);
            }
            if snapshot.status != Status::Missing {
                self.refresh();
            }
        }
    }

    /// Detects the version and persists it when non-empty. Failures are only logged.
    pub fn refresh(&self) {
        if self.binary_paths.is_empty() {
            return;
        }
        match detect_version(&self.binary_paths) {
            Ok(version) if !version.is_empty() => {
                if let Err(err) = self.store.set_version(&self.service, &version) {
                    warn!("Failed to persist version of '{}': {err}", self.service);
                }
            }
            Ok(_) => {}
            Err(err) => warn!("Failed to detect version of '{}': {err}", self.service),
        }
    }

    /// Overwrites the snapshot's version with the cached one.
    pub fn apply(&self, snapshot: &mut Snapshot) {
        if !self.tracks(snapshot) {
            return;
        }
        let version = self.store.version(&self.service);
        snapshot.version = (!version.is_empty()).then_some(version);
    }

    /// [`record`](Self::record) followed by [`apply`](Self::apply) on every snapshot.
    pub fn enrich(&self, snapshots: &mut [Snapshot]) {
        self.record(snapshots);
        for snapshot in snapshots.iter_mut() {
            self.apply(snapshot);
        }
    }

    /// Whether a version has been recorded yet.
    pub fn has_version(&self) -> bool {
        !self.store.version(&self.service).is_empty()
    }
}
