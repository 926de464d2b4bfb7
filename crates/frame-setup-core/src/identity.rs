//! Device identity token.
//!
//! The frame id is a short random alphanumeric token generated the first time
//! the service starts and stored in the [`ConfigStore`] under [`FRAME_ID_KEY`].
//! It suffixes the advertised BLE name and is never overwritten afterwards.

use chrono::{SecondsFormat, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use tracing::{info, warn};

use crate::storage::{ConfigStore, StoreError};

/// Store key holding the identity token.
pub const FRAME_ID_KEY: &str = "frame_id";

/// Store key holding the identity creation time.
pub const CREATED_AT_KEY: &str = "created_at";

/// Length of a generated frame id.
pub const FRAME_ID_LEN: usize = 7;

/// Generate a fresh random token of `len` characters from `[A-Za-z0-9]`.
#[must_use]
pub fn generate_frame_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Where the identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Read back from the persisted document.
    Loaded,
    /// Generated during this start and persisted.
    Generated,
}

/// The device identity for this process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    frame_id: String,
    source: IdentitySource,
}

impl Identity {
    /// Load the identity from `store`, generating and persisting one if absent.
    ///
    /// A stored value that is not a non-empty string is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns an error only if a newly generated identity cannot be written.
    pub fn load_or_generate(store: &ConfigStore) -> Result<Self, StoreError> {
        match store.get(FRAME_ID_KEY) {
            Some(Value::String(id)) if !id.is_empty() => {
                info!(frame_id = %id, "Using existing frame id");
                return Ok(Self {
                    frame_id: id,
                    source: IdentitySource::Loaded,
                });
            }
            Some(other) => warn!(value = %other, "Ignoring malformed stored frame id"),
            None => {}
        }

        let frame_id = generate_frame_id(FRAME_ID_LEN);
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        store.set_many([
            (FRAME_ID_KEY.to_string(), Value::from(frame_id.as_str())),
            (CREATED_AT_KEY.to_string(), Value::from(created_at)),
        ])?;
        info!(frame_id = %frame_id, "Generated frame id");

        Ok(Self {
            frame_id,
            source: IdentitySource::Generated,
        })
    }

    /// The identity token.
    #[must_use]
    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    /// Whether the token was loaded or generated.
    #[must_use]
    pub const fn source(&self) -> IdentitySource {
        self.source
    }

    /// BLE local name: `prefix` followed by the token.
    #[must_use]
    pub fn advertised_name(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.frame_id)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_generated_token_shape() {
        let id = generate_frame_id(FRAME_ID_LEN);
        assert_eq!(id.len(), FRAME_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_first_start_generates_and_persists() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        store.load_or_init().unwrap();

        let identity = Identity::load_or_generate(&store).unwrap();

        assert_eq!(identity.source(), IdentitySource::Generated);
        assert_eq!(store.get_str(FRAME_ID_KEY).as_deref(), Some(identity.frame_id()));
        let created_at = store.get_str(CREATED_AT_KEY).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&created_at).is_ok());
    }

    #[test]
    fn test_identity_stable_across_restarts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let first = {
            let store = ConfigStore::new(&path);
            store.load_or_init().unwrap();
            Identity::load_or_generate(&store).unwrap()
        };
        let second = {
            let store = ConfigStore::new(&path);
            store.load_or_init().unwrap();
            Identity::load_or_generate(&store).unwrap()
        };

        assert_eq!(second.source(), IdentitySource::Loaded);
        assert_eq!(first.frame_id(), second.frame_id());
    }

    #[test]
    fn test_malformed_stored_id_is_replaced() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        store.set(FRAME_ID_KEY, 12345).unwrap();

        let identity = Identity::load_or_generate(&store).unwrap();

        assert_eq!(identity.source(), IdentitySource::Generated);
        assert_eq!(identity.frame_id().len(), FRAME_ID_LEN);
    }

    #[test]
    fn test_advertised_name() {
        let identity = Identity {
            frame_id: "aB3dE7x".into(),
            source: IdentitySource::Loaded,
        };
        assert_eq!(identity.advertised_name("DominoFrame-"), "DominoFrame-aB3dE7x");
    }
}
