use crate::executor::Operation;
use crate::safety::SafetyTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub package_id: String,
    pub display_name: String,
    pub is_system_app: bool,
    /// False when the package is still known to the package manager but
    /// removed for the active user. Such packages can be restored.
    pub is_installed_for_user: bool,
    pub is_disabled: bool,
    pub safety_tier: SafetyTier,
}

impl AppRecord {
    pub fn with_disabled(&self, disabled: bool) -> Self {
        Self {
            is_disabled: disabled,
            ..self.clone()
        }
    }

    pub fn with_installed(&self, installed: bool) -> Self {
        Self {
            is_installed_for_user: installed,
            ..self.clone()
        }
    }

    /// State after `op` succeeded. Restore leaves the disabled flag alone.
    pub fn apply(&self, op: Operation) -> Self {
        match op {
            Operation::Disable => self.with_disabled(true),
            Operation::Enable => self.with_disabled(false),
            Operation::Uninstall => self.with_installed(false),
            Operation::Restore => self.with_installed(true),
        }
    }
}

/// Immutable, display-name ordered view of the device's packages.
#[derive(Debug, Clone)]
pub struct Snapshot {
    records: Arc<[AppRecord]>,
    loaded_at: DateTime<Utc>,
}

impl Snapshot {
    /// Sorts by display name (case-insensitive), then package id. Later
    /// duplicates of a package id are dropped.
    pub fn from_records(records: Vec<AppRecord>) -> Self {
        let mut seen = HashSet::new();
        let mut records: Vec<AppRecord> = records
            .into_iter()
            .filter(|r| seen.insert(r.package_id.clone()))
            .collect();
        records.sort_by_cached_key(|r| (r.display_name.to_lowercase(), r.package_id.clone()));
        Self {
            records: records.into(),
            loaded_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::from_records(Vec::new())
    }

    pub fn records(&self) -> &[AppRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, package_id: &str) -> Option<&AppRecord> {
        self.records.iter().find(|r| r.package_id == package_id)
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Copy with the record for `package_id` replaced by `mutator(old)`.
    /// Without a match the same snapshot is returned. Order is kept as is.
    pub fn patch<F>(&self, package_id: &str, mutator: F) -> Snapshot
    where
        F: FnOnce(&AppRecord) -> AppRecord,
    {
        let Some(idx) = self.records.iter().position(|r| r.package_id == package_id) else {
            return self.clone();
        };
        let mut records = self.records.to_vec();
        let replacement = mutator(&records[idx]);
        debug_assert_eq!(replacement.package_id, package_id);
        records[idx] = replacement;
        Self {
            records: records.into(),
            loaded_at: self.loaded_at,
        }
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}
