//! Package safety lookup backed by a swappable table.
//!
//! The active table is only ever replaced as a whole. A remote refresh that
//! fails at any stage leaves the previous table in place.

use super::SafetyTier;
use arc_swap::ArcSwap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub type SafetyTable = HashMap<String, SafetyTier>;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("safety list request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("safety list is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("safety list must be a JSON object of package -> tier")]
    NotAnObject,
}

const DEFAULT_TABLE: &[(&str, SafetyTier)] = &[
    ("com.android.systemui", SafetyTier::Risky),
    ("com.android.settings", SafetyTier::Risky),
    ("com.android.phone", SafetyTier::Risky),
    ("com.android.providers.settings", SafetyTier::Risky),
    ("com.android.providers.media", SafetyTier::Risky),
    ("com.android.packageinstaller", SafetyTier::Risky),
    ("com.google.android.gms", SafetyTier::Caution),
    ("com.google.android.gsf", SafetyTier::Caution),
    ("com.android.vending", SafetyTier::Caution),
    ("com.google.android.youtube", SafetyTier::Safe),
    ("com.google.android.apps.photos", SafetyTier::Safe),
    ("com.facebook.katana", SafetyTier::Safe),
    ("com.netflix.mediaclient", SafetyTier::Safe),
];

pub struct SafetyClassifier {
    table: ArcSwap<SafetyTable>,
    http: reqwest::Client,
    fetch_timeout: Duration,
}

impl SafetyClassifier {
    pub fn new(fetch_timeout: Duration) -> Self {
        Self {
            table: ArcSwap::from_pointee(Self::default_table()),
            http: reqwest::Client::new(),
            fetch_timeout,
        }
    }

    pub fn default_table() -> SafetyTable {
        DEFAULT_TABLE
            .iter()
            .map(|(pkg, tier)| (pkg.to_string(), *tier))
            .collect()
    }

    /// Never blocks; unknown packages are `Caution`.
    pub fn classify(&self, package_id: &str) -> SafetyTier {
        self.table
            .load()
            .get(package_id)
            .copied()
            .unwrap_or(SafetyTier::Caution)
    }

    /// The active table. Holding the returned `Arc` pins that version even if
    /// a newer one is swapped in meanwhile.
    pub fn table(&self) -> Arc<SafetyTable> {
        self.table.load_full()
    }

    pub fn reset_to_default(&self) {
        self.table.store(Arc::new(Self::default_table()));
        debug!("safety table reset to built-in defaults");
    }

    /// Fetches `url` and swaps in the parsed table when it has at least one
    /// entry. Returns the number of entries parsed.
    pub async fn update_from_remote(&self, url: &str) -> Result<usize, FetchError> {
        let result = self.fetch(url).await;
        match &result {
            Ok(count) => info!("safety list from {} applied ({} entries)", url, count),
            Err(e) => warn!("keeping current safety list: {}", e),
        }
        result
    }

    /// Same parse-and-swap path as the remote refresh, for a body already in
    /// hand (for example a local file).
    pub fn update_from_json(&self, body: &str) -> Result<usize, FetchError> {
        let parsed = parse_table(body)?;
        Ok(self.install(parsed))
    }

    async fn fetch(&self, url: &str) -> Result<usize, FetchError> {
        let body = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.fetch_timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        self.update_from_json(&body)
    }

    fn install(&self, parsed: SafetyTable) -> usize {
        let count = parsed.len();
        if count > 0 {
            self.table.store(Arc::new(parsed));
        }
        count
    }
}

fn parse_table(body: &str) -> Result<SafetyTable, FetchError> {
    let value: Value = serde_json::from_str(body)?;
    let Value::Object(entries) = value else {
        return Err(FetchError::NotAnObject);
    };
    Ok(entries
        .into_iter()
        .map(|(pkg, tier)| {
            let tier = match tier {
                Value::String(s) => SafetyTier::parse_lenient(&s),
                _ => SafetyTier::Caution,
            };
            (pkg, tier)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> SafetyClassifier {
        SafetyClassifier::new(Duration::from_secs(1))
    }

    #[test]
    fn defaults_and_fallback() {
        let c = classifier();
        assert_eq!(c.classify("com.android.systemui"), SafetyTier::Risky);
        assert_eq!(c.classify("com.netflix.mediaclient"), SafetyTier::Safe);
        assert_eq!(c.classify("unknown.package.id"), SafetyTier::Caution);
    }

    #[test]
    fn lenient_values_in_body() {
        let c = classifier();
        let n = c
            .update_from_json(r#"{"com.x":"risky","com.y":"bogus","com.z":3}"#)
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(c.classify("com.x"), SafetyTier::Risky);
        assert_eq!(c.classify("com.y"), SafetyTier::Caution);
        assert_eq!(c.classify("com.z"), SafetyTier::Caution);
        // whole-table replacement: seed entries are gone
        assert_eq!(c.classify("com.netflix.mediaclient"), SafetyTier::Caution);
        assert_eq!(c.classify("unknown.package.id"), SafetyTier::Caution);
    }

    #[test]
    fn malformed_or_empty_body_keeps_table() {
        let c = classifier();
        assert!(matches!(c.update_from_json("{not json"), Err(FetchError::Json(_))));
        assert!(matches!(c.update_from_json("[1,2]"), Err(FetchError::NotAnObject)));
        assert_eq!(c.update_from_json("{}").unwrap(), 0);
        assert_eq!(c.classify("com.android.settings"), SafetyTier::Risky);
        assert_eq!(c.table().len(), DEFAULT_TABLE.len());
    }

    #[test]
    fn reset_restores_seed() {
        let c = classifier();
        c.update_from_json(r#"{"com.android.settings":"safe"}"#).unwrap();
        assert_eq!(c.classify("com.android.settings"), SafetyTier::Safe);
        c.reset_to_default();
        assert_eq!(c.classify("com.android.settings"), SafetyTier::Risky);
    }

    #[test]
    fn readers_never_see_a_mixed_table() {
        let c = Arc::new(classifier());
        let all_safe = r#"{"a":"safe","b":"safe","c":"safe"}"#;
        let all_risky = r#"{"a":"risky","b":"risky","c":"risky"}"#;
        c.update_from_json(all_safe).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&c);
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let t = c.table();
                        let a = t.get("a").copied();
                        assert_eq!(t.get("b").copied(), a);
                        assert_eq!(t.get("c").copied(), a);
                    }
                })
            })
            .collect();
        for i in 0..500 {
            let body = if i % 2 == 0 { all_risky } else { all_safe };
            c.update_from_json(body).unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
    }
}
