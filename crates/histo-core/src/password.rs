//! Serial-number-bound password store.
//!
//! Each entry stores `HMAC-SHA256(seed, name || password)` in hex. The store
//! records the instrument serial number it was written for; a store copied
//! to another instrument never validates. Every check fails safe to
//! `false`.

use std::path::Path;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// One stored password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordEntry {
    /// User level name
    pub name: String,
    /// Hex encoded keyed digest
    pub hash: String,
}

/// On-disk password store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordStore {
    /// Serial number of the instrument the store belongs to
    pub serial_number: String,
    /// Stored passwords
    pub entries: Vec<PasswordEntry>,
}

/// Verifies and updates passwords.
#[derive(Debug)]
pub struct PasswordManager {
    seed: Vec<u8>,
    serial_number: String,
    store: Option<PasswordStore>,
}

impl PasswordManager {
    /// Create a manager with an empty store bound to `serial_number`.
    pub fn new(seed: impl Into<Vec<u8>>, serial_number: impl Into<String>) -> Self {
        let serial_number = serial_number.into();
        Self {
            seed: seed.into(),
            store: Some(PasswordStore {
                serial_number: serial_number.clone(),
                entries: Vec::new(),
            }),
            serial_number,
        }
    }

    /// Compute the stored digest for `name` and `password`.
    pub fn compute_hash(&self, name: &str, password: &str) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(&self.seed).ok()?;
        mac.update(name.as_bytes());
        mac.update(password.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load a store from a JSON file.
    ///
    /// On any failure the manager is left without a store, so every check
    /// returns `false` until a valid store is loaded.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.store = None;
        let text = std::fs::read_to_string(path.as_ref())?;
        let store: PasswordStore = serde_json::from_str(&text)?;
        if store.serial_number != self.serial_number {
            return Err(Error::Config(format!(
                "password store belongs to serial number {}",
                store.serial_number
            )));
        }
        self.store = Some(store);
        Ok(())
    }

    /// Write the store to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no password store loaded".into()))?;
        std::fs::write(path, serde_json::to_string_pretty(store)?)?;
        Ok(())
    }

    /// Set or replace the password for `name`.
    pub fn set_password(&mut self, name: &str, password: &str) -> Result<()> {
        let hash = self
            .compute_hash(name, password)
            .ok_or_else(|| Error::Config("invalid password seed".into()))?;
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no password store loaded".into()))?;
        match store.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.hash = hash,
            None => store.entries.push(PasswordEntry {
                name: name.to_string(),
                hash,
            }),
        }
        Ok(())
    }

    /// Check a password.
    pub fn check_password(&self, name: &str, password: &str) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        if store.serial_number != self.serial_number {
            return false;
        }
        let Some(entry) = store.entries.iter().find(|e| e.name == name) else {
            return false;
        };
        let Ok(expected) = hex::decode(&entry.hash) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.seed) else {
            return false;
        };
        mac.update(name.as_bytes());
        mac.update(password.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    /// Whether a store is loaded.
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_check() {
        let mut pm = PasswordManager::new(b"seed".to_vec(), "SN-0001");
        pm.set_password("Service", "secret").unwrap();
        assert!(pm.check_password("Service", "secret"));
        assert!(!pm.check_password("Service", "wrong"));
        assert!(!pm.check_password("Supervisor", "secret"));
    }

    #[test]
    fn test_hash_depends_on_name() {
        let pm = PasswordManager::new(b"seed".to_vec(), "SN-0001");
        assert_ne!(pm.compute_hash("a", "bc"), pm.compute_hash("ab", "x"));
        assert_eq!(pm.compute_hash("a", "b"), pm.compute_hash("a", "b"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwords.json");

        let mut pm = PasswordManager::new(b"seed".to_vec(), "SN-0001");
        pm.set_password("Service", "secret").unwrap();
        pm.save(&path).unwrap();

        let mut loaded = PasswordManager::new(b"seed".to_vec(), "SN-0001");
        loaded.load(&path).unwrap();
        assert!(loaded.check_password("Service", "secret"));
    }

    #[test]
    fn test_wrong_serial_fails_safe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwords.json");

        let mut pm = PasswordManager::new(b"seed".to_vec(), "SN-0001");
        pm.set_password("Service", "secret").unwrap();
        pm.save(&path).unwrap();

        let mut other = PasswordManager::new(b"seed".to_vec(), "SN-0002");
        assert!(other.load(&path).is_err());
        assert!(!other.has_store());
        assert!(!other.check_password("Service", "secret"));
    }

    #[test]
    fn test_malformed_store_fails_safe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwords.json");
        std::fs::write(&path, "<password name=").unwrap();

        let mut pm = PasswordManager::new(b"seed".to_vec(), "SN-0001");
        assert!(pm.load(&path).is_err());
        assert!(!pm.check_password("Service", "secret"));
    }
}
