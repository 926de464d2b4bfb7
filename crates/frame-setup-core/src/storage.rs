//! Durable key/value store for provisioning state.
//!
//! The whole mapping lives in one pretty-printed JSON document. Every mutation
//! rewrites the full document through a temp file and a rename, so a crash
//! mid-write leaves the previous version intact.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default location of the persisted document, relative to the working directory.
pub const DEFAULT_STORE_PATH: &str = "./config.json";

/// The persisted document: string keys to arbitrary JSON values.
pub type Document = Map<String, Value>;

/// Errors raised while loading or persisting the document.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file exists but could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The document could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The file is not valid JSON.
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The file is valid JSON but not an object.
    #[error("{} does not contain a JSON object", path.display())]
    NotAnObject {
        /// File path.
        path: PathBuf,
    },

    /// The in-memory document could not be serialized.
    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSON-file backed key/value store.
///
/// All access goes through one mutex, held across the file write so that
/// concurrent setters persist in the order they updated the map.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<Document>,
}

impl ConfigStore {
    /// Create an empty store backed by `path`. Nothing is read until
    /// [`load_or_init`](Self::load_or_init).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: Mutex::new(Document::new()),
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document from disk.
    ///
    /// A missing file is not an error: the store starts empty. Returns the
    /// number of keys loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or is not a JSON
    /// object. The in-memory document is left empty in that case.
    pub fn load_or_init(&self) -> Result<usize, StoreError> {
        let mut data = self.lock();
        data.clear();

        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No existing config file found, starting fresh");
                return Ok(0);
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let value: Value = serde_json::from_slice(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let Value::Object(map) = value else {
            return Err(StoreError::NotAnObject {
                path: self.path.clone(),
            });
        };

        *data = map;
        info!(path = %self.path.display(), keys = data.len(), "Loaded existing configuration");
        Ok(data.len())
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Look up a string value. Non-string values read as absent.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.lock().get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Copy of the whole document.
    #[must_use]
    pub fn snapshot(&self) -> Document {
        self.lock().clone()
    }

    /// Set one key and persist the document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written. The in-memory
    /// document is unchanged on failure.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), StoreError> {
        self.set_many([(key.into(), value.into())])
    }

    /// Set several keys and persist the document once.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written. The in-memory
    /// document is unchanged on failure.
    pub fn set_many<I>(&self, entries: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut data = self.lock();
        let mut next = data.clone();
        next.extend(entries);
        self.persist(&next)?;
        *data = next;
        Ok(())
    }

    fn persist(&self, doc: &Document) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(doc)?;
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let tmp = temp_path(&self.path);
        if let Err(e) = write_and_rename(&tmp, &self.path, content.as_bytes()) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp file");
                }
            }
            return Err(write_err(e));
        }

        debug!(path = %self.path.display(), keys = doc.len(), "Configuration saved");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_and_rename(tmp: &Path, path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = File::create(tmp)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp, path)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));

        assert_eq!(store.load_or_init().unwrap(), 0);
        assert!(store.snapshot().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_set_persists_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::new(&path);

        store.set("frame_id", "aB3dE7x").unwrap();

        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["frame_id"], "aB3dE7x");
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_round_trip_across_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let values = [
            json!("text"),
            json!(42),
            json!(-1.5),
            json!(true),
            json!(null),
            json!({"nested": {"list": [1, "two", false]}}),
        ];

        {
            let store = ConfigStore::new(&path);
            for (i, value) in values.iter().enumerate() {
                store.set(format!("k{i}"), value.clone()).unwrap();
            }
        }

        let reopened = ConfigStore::new(&path);
        assert_eq!(reopened.load_or_init().unwrap(), values.len());
        for (i, value) in values.iter().enumerate() {
            assert_eq!(reopened.get(&format!("k{i}")).as_ref(), Some(value));
        }
    }

    #[test]
    fn test_set_many_merges_and_keeps_other_keys() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        store.set("frame_id", "keepme").unwrap();

        store
            .set_many([
                ("frame_name".to_string(), json!("Kitchen")),
                ("setup_complete".to_string(), json!(true)),
            ])
            .unwrap();

        assert_eq!(store.get_str("frame_id").as_deref(), Some("keepme"));
        assert_eq!(store.get("setup_complete"), Some(json!(true)));
        assert_eq!(store.snapshot().len(), 3);
    }

    #[test]
    fn test_malformed_file_reports_error_and_leaves_store_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let store = ConfigStore::new(&path);
        let err = store.load_or_init().unwrap_err();

        assert!(matches!(err, StoreError::Parse { .. }));
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_non_object_document_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        let store = ConfigStore::new(&path);
        assert!(matches!(
            store.load_or_init(),
            Err(StoreError::NotAnObject { .. })
        ));
    }

    #[test]
    fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempdir().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = dir.path().join("config.json");
        fs::create_dir(&path).unwrap();

        let store = ConfigStore::new(&path);
        let err = store.set("frame_name", "Kitchen").unwrap_err();

        assert!(matches!(err, StoreError::Write { .. }));
        assert_eq!(store.get("frame_name"), None);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_non_utf8_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, [0xff, 0xfe, 0x7b, 0x00]).unwrap();

        let store = ConfigStore::new(&path);
        let err = store.load_or_init().unwrap_err();

        assert!(matches!(err, StoreError::Parse { .. }));
        assert!(matches!(
            crate::SetupError::from(err),
            crate::SetupError::StorageLoadFailed(_)
        ));
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_unknown_keys_survive_rewrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"frame_id":"abc","vendor_extra":{"x":1}}"#).unwrap();

        let store = ConfigStore::new(&path);
        store.load_or_init().unwrap();
        store.set("setup_complete", true).unwrap();

        let reopened = ConfigStore::new(&path);
        reopened.load_or_init().unwrap();
        assert_eq!(reopened.get("vendor_extra"), Some(json!({"x": 1})));
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("config.json");
        let store = ConfigStore::new(&path);

        store.set("k", 1).unwrap();
        assert!(path.exists());
    }
}
