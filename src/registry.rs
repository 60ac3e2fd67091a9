//! Participant registry: AS identifier to ed25519 verification key.
//!
//! The registry is shared process-wide. Reads copy values out from under the
//! lock and writes replace the whole map, so no caller ever holds a reference
//! into the protected structure.

use crate::sign::{decode_public_key_base64, encode_public_key_base64};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Reserved identifier meaning "no upstream AS".
pub const SENTINEL_AS: &str = "0";

/// Position of the AS identifier inside a positional registry row.
pub const ASN_FIELD: usize = 2;

/// Errors raised while building or persisting the registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Underlying filesystem failure.
    #[error("registry I/O error: {0}")]
    Io(String),
    /// JSON or key decoding failure.
    #[error("registry decode error: {0}")]
    Decode(String),
    /// A positional row was too short to carry an identifier and a key.
    #[error("registry row {row} has {len} fields")]
    ShortRow {
        /// Index of the offending row.
        row: usize,
        /// Number of fields present.
        len: usize,
    },
    /// The same identifier was registered twice.
    #[error("duplicate participant {0}")]
    Duplicate(String),
    /// Attempted to register the sentinel identifier.
    #[error("identifier \"0\" is reserved")]
    Sentinel,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    participants: BTreeMap<String, String>,
}

/// Lock-guarded map from AS identifier to public key.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    inner: Mutex<BTreeMap<String, VerifyingKey>>,
}

impl ParticipantRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from positional rows.
    ///
    /// The identifier is read from field [`ASN_FIELD`] and the base64 public
    /// key from the last field of each row.
    pub fn from_rows<R, S>(rows: R) -> Result<Self, RegistryError>
    where
        R: IntoIterator<Item = Vec<S>>,
        S: AsRef<str>,
    {
        let mut map = BTreeMap::new();
        for (idx, row) in rows.into_iter().enumerate() {
            if row.len() <= ASN_FIELD {
                return Err(RegistryError::ShortRow {
                    row: idx,
                    len: row.len(),
                });
            }
            let asn = row[ASN_FIELD].as_ref();
            let key_field = row[row.len() - 1].as_ref();
            let key = decode_public_key_base64(key_field)
                .map_err(|err| RegistryError::Decode(err.to_string()))?;
            insert_unique(&mut map, asn, key)?;
        }
        Ok(Self {
            inner: Mutex::new(map),
        })
    }

    /// Load from JSON; missing file -> empty registry.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).map_err(|err| RegistryError::Io(err.to_string()))?;
        let file: RegistryFile =
            serde_json::from_slice(&bytes).map_err(|err| RegistryError::Decode(err.to_string()))?;
        let mut map = BTreeMap::new();
        for (asn, key_b64) in file.participants {
            let key = decode_public_key_base64(&key_b64)
                .map_err(|err| RegistryError::Decode(format!("{asn}: {err}")))?;
            insert_unique(&mut map, &asn, key)?;
        }
        Ok(Self {
            inner: Mutex::new(map),
        })
    }

    /// Persist to JSON.
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let participants = self
            .snapshot()
            .iter()
            .map(|(asn, key)| (asn.clone(), encode_public_key_base64(key)))
            .collect();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| RegistryError::Io(err.to_string()))?;
        }
        let data = serde_json::to_vec_pretty(&RegistryFile { participants })
            .map_err(|err| RegistryError::Decode(err.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(|err| RegistryError::Io(err.to_string()))?;
        fs::rename(&tmp, path).map_err(|err| RegistryError::Io(err.to_string()))
    }

    fn guard(&self) -> MutexGuard<'_, BTreeMap<String, VerifyingKey>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new participant.
    pub fn register(&self, asn: &str, key: VerifyingKey) -> Result<(), RegistryError> {
        let mut guard = self.guard();
        let mut next = guard.clone();
        insert_unique(&mut next, asn, key)?;
        *guard = next;
        Ok(())
    }

    /// Returns a copy of the public key registered for `asn`.
    pub fn public_key(&self, asn: &str) -> Option<VerifyingKey> {
        self.guard().get(asn).copied()
    }

    /// Returns true if `asn` is a registered participant.
    pub fn contains(&self, asn: &str) -> bool {
        self.guard().contains_key(asn)
    }

    /// Copies the registered identifiers out of the lock.
    pub fn identifiers(&self) -> BTreeSet<String> {
        self.guard().keys().cloned().collect()
    }

    /// Copies the whole map out of the lock.
    pub fn snapshot(&self) -> BTreeMap<String, VerifyingKey> {
        self.guard().clone()
    }

    /// Replaces the whole map.
    pub fn replace(&self, next: BTreeMap<String, VerifyingKey>) {
        *self.guard() = next;
    }

    /// Number of registered participants.
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Returns true when no participants are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn insert_unique(
    map: &mut BTreeMap<String, VerifyingKey>,
    asn: &str,
    key: VerifyingKey,
) -> Result<(), RegistryError> {
    if asn == SENTINEL_AS {
        return Err(RegistryError::Sentinel);
    }
    if map.contains_key(asn) {
        return Err(RegistryError::Duplicate(asn.to_string()));
    }
    map.insert(asn.to_string(), key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::signing_key_from_seed;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn key(seed: &str) -> VerifyingKey {
        signing_key_from_seed(seed).verifying_key()
    }

    fn row(asn: &str) -> Vec<String> {
        vec![
            "127.0.0.1".to_string(),
            "5000".to_string(),
            asn.to_string(),
            encode_public_key_base64(&key(asn)),
        ]
    }

    #[test]
    fn rows_are_read_by_position() {
        let registry = ParticipantRegistry::from_rows(vec![row("13335"), row("133741")]).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.public_key("13335"), Some(key("13335")));
        assert!(registry.contains("133741"));
        assert!(!registry.contains("127.0.0.1"));
    }

    #[test]
    fn rows_reject_duplicates_sentinel_and_short() {
        assert_eq!(
            ParticipantRegistry::from_rows(vec![row("1"), row("1")]).unwrap_err(),
            RegistryError::Duplicate("1".into())
        );
        assert_eq!(
            ParticipantRegistry::from_rows(vec![row(SENTINEL_AS)]).unwrap_err(),
            RegistryError::Sentinel
        );
        assert_eq!(
            ParticipantRegistry::from_rows(vec![vec!["a", "b"]]).unwrap_err(),
            RegistryError::ShortRow { row: 0, len: 2 }
        );
    }

    #[test]
    fn register_does_not_overwrite() {
        let registry = ParticipantRegistry::new();
        registry.register("700", key("700")).unwrap();
        assert!(registry.register("700", key("other")).is_err());
        assert_eq!(registry.public_key("700"), Some(key("700")));
    }

    #[test]
    fn save_and_load_round_trip_through_disk() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("route_ledger_registry_{nanos}.json"));
        let registry = ParticipantRegistry::new();
        registry.register("900", key("900")).unwrap();
        registry.save(&path).unwrap();
        let loaded = ParticipantRegistry::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.identifiers(), registry.identifiers());
        assert!(ParticipantRegistry::load(&path).unwrap().is_empty());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn load_rejects_malformed_key() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("route_ledger_bad_registry_{nanos}.json"));
        std::fs::write(&path, r#"{"participants":{"700":"not-a-key"}}"#).unwrap();
        let err = ParticipantRegistry::load(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        match err {
            RegistryError::Decode(message) => assert!(message.starts_with("700:")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
