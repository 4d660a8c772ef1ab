// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the relay's data directory.

use std::path::{Path, PathBuf};

/// Default base directory for all persistent relay state.
pub const DATA_ROOT: &str = "/data";

/// Storage path utilities for the data directory.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Embedded plan database file.
    pub fn plan_db(&self) -> PathBuf {
        self.root.join("relay.redb")
    }

    // ========== Key Paths ==========

    /// Directory containing all ephemeral key material.
    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    /// Directory for one plan's ephemeral keys.
    pub fn plan_keys_dir(&self, plan_id: &str) -> PathBuf {
        self.keys_dir().join(plan_id)
    }

    /// Path to an ephemeral account's private key.
    pub fn key_file(&self, plan_id: &str, address: &str) -> PathBuf {
        self.plan_keys_dir(plan_id).join(format!("{address}.pem"))
    }

    // ========== Audit Log Paths ==========

    /// Directory containing audit logs.
    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    /// Daily audit events file (JSONL), e.g. `audit/2026-01-28/events.jsonl`.
    pub fn audit_events_file(&self, date: &str) -> PathBuf {
        self.audit_dir().join(date).join("events.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_use_data_root() {
        let paths = StoragePaths::default();
        assert_eq!(paths.root(), Path::new("/data"));
        assert_eq!(paths.plan_db(), PathBuf::from("/data/relay.redb"));
    }

    #[test]
    fn key_paths_are_scoped_by_plan_and_address() {
        let paths = StoragePaths::new("/tmp/relay");
        assert_eq!(paths.keys_dir(), PathBuf::from("/tmp/relay/keys"));
        assert_eq!(
            paths.key_file("plan-1", "0xabc"),
            PathBuf::from("/tmp/relay/keys/plan-1/0xabc.pem")
        );
    }

    #[test]
    fn audit_paths_are_correct() {
        let paths = StoragePaths::default();
        assert_eq!(paths.audit_dir(), PathBuf::from("/data/audit"));
        assert_eq!(
            paths.audit_events_file("2026-01-28"),
            PathBuf::from("/data/audit/2026-01-28/events.jsonl")
        );
    }
}
