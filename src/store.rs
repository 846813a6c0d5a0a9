//! Persistent state store.
//!
//! Holds what must survive a herobox restart: the last known PID, status and version of
//! each service, the DNS daemon's configuration path and free-form UI settings. A PID of
//! `0` means "no process" and an empty status means "never observed".
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

/// Durable per-service bookkeeping and settings.
///
/// Getters read the in-memory copy and never fail. Setters persist before returning;
/// callers treat their errors as non-fatal bookkeeping failures.
pub trait StateStore: Send + Sync {
    fn process_id(&self, service: &str) -> i32;
    fn set_process_id(&self, service: &str, pid: i32) -> Result<(), StoreError>;

    fn status(&self, service: &str) -> String;
    fn set_status(&self, service: &str, status: &str) -> Result<(), StoreError>;

    fn version(&self, service: &str) -> String;
    fn set_version(&self, service: &str, version: &str) -> Result<(), StoreError>;

    fn config_path(&self) -> String;
    /// Ignores empty paths.
    fn set_config_path(&self, path: &str) -> Result<(), StoreError>;

    fn settings(&self) -> BTreeMap<String, String>;
    /// Merges `updates` into the settings. An empty value deletes its key.
    fn update_settings(&self, updates: BTreeMap<String, String>) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    config_path: String,
    #[serde(default)]
    settings: BTreeMap<String, String>,
    #[serde(default)]
    services: BTreeMap<String, ServiceRecord>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ServiceRecord {
    #[serde(default)]
    status: String,
    #[serde(default)]
    pid: i32,
    #[serde(default)]
    version: String,
}

/// YAML-backed [`StateStore`]. Every mutation rewrites the whole document.
#[derive(Debug)]
pub struct FileStore {
    path: Option<PathBuf>,
    doc: Mutex<Document>,
}

impl FileStore {
    /// Loads the document at `path`; a missing or empty file yields defaults.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                Document::default()
            } else {
                serde_yaml::from_str(&contents)?
            }
        } else {
            Document::default()
        };
        debug!("Loaded state store from {}", path.display());

        Ok(Self {
            path: Some(path),
            doc: Mutex::new(doc),
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: Mutex::new(Document::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(&self) -> MutexGuard<'_, Document> {
        // Mutations only ever replace whole fields, so a poisoned document is still usable.
        self.doc.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate(&self, apply: impl FnOnce(&mut Document)) -> Result<(), StoreError> {
        let mut doc = self.doc.lock()?;
        let mut next = doc.clone();
        apply(&mut next);
        if next == *doc {
            return Ok(());
        }
        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        *doc = next;
        Ok(())
    }

    fn record(&self, service: &str) -> ServiceRecord {
        self.read()
            .services
            .get(&service.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    fn update_record(
        &self,
        service: &str,
        apply: impl FnOnce(&mut ServiceRecord),
    ) -> Result<(), StoreError> {
        let key = service.to_lowercase();
        self.mutate(|doc| apply(doc.services.entry(key).or_default()))
    }
}

fn persist(path: &Path, doc: &Document) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let contents = serde_yaml::to_string(doc)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl StateStore for FileStore {
    fn process_id(&self, service: &str) -> i32 {
        self.record(service).pid
    }

    fn set_process_id(&self, service: &str, pid: i32) -> Result<(), StoreError> {
        self.update_record(service, |record| record.pid = pid)
    }

    fn status(&self, service: &str) -> String {
        self.record(service).status
    }

    fn set_status(&self, service: &str, status: &str) -> Result<(), StoreError> {
        self.update_record(service, |record| record.status = status.to_string())
    }

    fn version(&self, service: &str) -> String {
        self.record(service).version
    }

    fn set_version(&self, service: &str, version: &str) -> Result<(), StoreError> {
        self.update_record(service, |record| record.version = version.to_string())
    }

    fn config_path(&self) -> String {
        self.read().config_path.clone()
    }

    fn set_config_path(&self, path: &str) -> Result<(), StoreError> {
        let path = path.trim();
        if path.is_empty() {
            return Ok(());
        }
        self.mutate(|doc| doc.config_path = path.to_string())
    }

    fn settings(&self) -> BTreeMap<String, String> {
        self.read().settings.clone()
    }

    fn update_settings(&self, updates: BTreeMap<String, String>) -> Result<(), StoreError> {
        self.mutate(|doc| {
            for (key, value) in updates {
                if value.is_empty() {
                    doc.settings.remove(&key);
                } else {
                    doc.settings.insert(key, value);
                }
            }
        })
    }
}

/// Records `default_path` as the configuration path unless one is already stored.
pub fn seed_config_path(store: &dyn StateStore, default_path: &str) -> Result<(), StoreError> {
    if store.config_path().is_empty() {
        store.set_config_path(default_path)?;
    }
    Ok(())
}
