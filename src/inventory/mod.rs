//! Package inventory: loading, filtering and patching snapshots.

mod filter;
mod provider;
mod record;

pub use filter::{filter, FilterCriteria};
pub use provider::{AdbPackageProvider, PackageEntry, PackageInventoryProvider};
pub use record::{AppRecord, Snapshot};

use crate::executor::Operation;
use crate::safety::SafetyClassifier;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct AppInventory {
    provider: Arc<dyn PackageInventoryProvider>,
    classifier: Arc<SafetyClassifier>,
    current: ArcSwap<Snapshot>,
}

impl AppInventory {
    pub fn new(
        provider: Arc<dyn PackageInventoryProvider>,
        classifier: Arc<SafetyClassifier>,
    ) -> Self {
        Self {
            provider,
            classifier,
            current: ArcSwap::from_pointee(Snapshot::empty()),
        }
    }

    /// Enumerates every package, including ones uninstalled for the user.
    /// Enumeration failures yield an empty snapshot; callers should offer a
    /// retry rather than report "no packages".
    pub async fn load_snapshot(&self) -> Snapshot {
        let entries = match self.provider.list_packages(true).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("package enumeration failed: {}", e);
                return Snapshot::empty();
            }
        };
        let records = entries
            .into_iter()
            .map(|entry| AppRecord {
                safety_tier: self.classifier.classify(&entry.package_id),
                display_name: entry
                    .display_name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| entry.package_id.clone()),
                is_system_app: entry.is_system,
                is_installed_for_user: entry.is_installed,
                is_disabled: entry.is_installed && !entry.is_enabled,
                package_id: entry.package_id,
            })
            .collect();
        Snapshot::from_records(records)
    }

    /// Loads a fresh snapshot and makes it current.
    pub async fn reload(&self) -> Arc<Snapshot> {
        let snapshot = Arc::new(self.load_snapshot().await);
        info!("inventory loaded: {} packages", snapshot.len());
        self.current.store(Arc::clone(&snapshot));
        snapshot
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Reflects a confirmed operation in the current snapshot without
    /// re-enumerating.
    pub fn apply(&self, package_id: &str, op: Operation) -> Arc<Snapshot> {
        self.current
            .rcu(|snap| snap.patch(package_id, |r| r.apply(op)));
        self.current.load_full()
    }
}
