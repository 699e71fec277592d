use super::{AppRecord, Snapshot};

/// Search text plus toggles. `system_only` and `user_only` can never both
/// be set; turning one on turns the other off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    search_text: String,
    system_only: bool,
    user_only: bool,
    disabled_only: bool,
    uninstalled_only: bool,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search_text = text.into();
        self
    }

    pub fn set_search(&mut self, text: impl Into<String>) {
        self.search_text = text.into();
    }

    pub fn toggle_system_only(&mut self, enabled: bool) {
        self.system_only = enabled;
        if enabled {
            self.user_only = false;
        }
    }

    pub fn toggle_user_only(&mut self, enabled: bool) {
        self.user_only = enabled;
        if enabled {
            self.system_only = false;
        }
    }

    pub fn toggle_disabled_only(&mut self, enabled: bool) {
        self.disabled_only = enabled;
    }

    pub fn toggle_uninstalled_only(&mut self, enabled: bool) {
        self.uninstalled_only = enabled;
    }

    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    pub fn system_only(&self) -> bool {
        self.system_only
    }

    pub fn user_only(&self) -> bool {
        self.user_only
    }

    pub fn disabled_only(&self) -> bool {
        self.disabled_only
    }

    pub fn uninstalled_only(&self) -> bool {
        self.uninstalled_only
    }

    pub fn matches(&self, app: &AppRecord) -> bool {
        let query = self.search_text.trim().to_lowercase();
        let matches_query = query.is_empty()
            || app.display_name.to_lowercase().contains(&query)
            || app.package_id.to_lowercase().contains(&query);

        matches_query
            && (!self.system_only || app.is_system_app)
            && (!self.user_only || !app.is_system_app)
            && (!self.disabled_only || app.is_disabled)
            && (!self.uninstalled_only || !app.is_installed_for_user)
    }
}

/// Records of `snapshot` that pass `criteria`, in snapshot order.
pub fn filter<'a>(snapshot: &'a Snapshot, criteria: &FilterCriteria) -> Vec<&'a AppRecord> {
    snapshot.iter().filter(|a| criteria.matches(a)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::SafetyTier;

    fn app(id: &str, name: &str, system: bool, disabled: bool, installed: bool) -> AppRecord {
        AppRecord {
            package_id: id.to_string(),
            display_name: name.to_string(),
            is_system_app: system,
            is_installed_for_user: installed,
            is_disabled: disabled,
            safety_tier: SafetyTier::Caution,
        }
    }

    fn fixture() -> Snapshot {
        Snapshot::from_records(vec![
            app("com.android.chrome", "Chrome", true, false, true),
            app("com.facebook.katana", "Facebook", false, false, true),
            app("com.samsung.bixby", "Bixby", true, true, true),
            app("com.google.android.youtube", "YouTube", true, false, false),
            app("org.example.notes", "Notes", false, true, true),
        ])
    }

    fn ids(v: &[&AppRecord]) -> Vec<String> {
        v.iter().map(|r| r.package_id.clone()).collect()
    }

    #[test]
    fn blank_search_keeps_everything_in_order() {
        let snap = fixture();
        let out = filter(&snap, &FilterCriteria::new().with_search("   "));
        assert_eq!(out.len(), snap.len());
        assert_eq!(
            ids(&out),
            snap.iter().map(|r| r.package_id.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn search_hits_label_or_package_case_insensitive() {
        let snap = fixture();
        let by_label = filter(&snap, &FilterCriteria::new().with_search("youtube"));
        assert_eq!(ids(&by_label), ["com.google.android.youtube"]);
        let by_pkg = filter(&snap, &FilterCriteria::new().with_search("ANDROID"));
        assert_eq!(
            ids(&by_pkg),
            ["com.android.chrome", "com.google.android.youtube"]
        );
    }

    #[test]
    fn toggles_combine() {
        let snap = fixture();
        let mut c = FilterCriteria::new();
        c.toggle_system_only(true);
        c.toggle_disabled_only(true);
        assert_eq!(ids(&filter(&snap, &c)), ["com.samsung.bixby"]);

        let mut c = FilterCriteria::new();
        c.toggle_user_only(true);
        assert_eq!(
            ids(&filter(&snap, &c)),
            ["com.facebook.katana", "org.example.notes"]
        );

        let mut c = FilterCriteria::new();
        c.toggle_uninstalled_only(true);
        assert_eq!(ids(&filter(&snap, &c)), ["com.google.android.youtube"]);
    }

    #[test]
    fn system_and_user_are_exclusive() {
        let mut c = FilterCriteria::new();
        let steps: [(bool, bool); 6] = [
            (true, true),
            (true, false),
            (false, true),
            (true, true),
            (false, false),
            (true, true),
        ];
        for (sys, user) in steps {
            c.toggle_system_only(sys);
            assert!(!(c.system_only() && c.user_only()));
            c.toggle_user_only(user);
            assert!(!(c.system_only() && c.user_only()));
        }
        c.toggle_user_only(true);
        c.toggle_system_only(true);
        assert!(c.system_only());
        assert!(!c.user_only());
    }

    #[test]
    fn filtering_is_pure() {
        let snap = fixture();
        let before = snap.clone();
        let mut c = FilterCriteria::new().with_search("o");
        c.toggle_system_only(true);
        let first = ids(&filter(&snap, &c));
        let second = ids(&filter(&snap, &c));
        assert_eq!(first, second);
        assert_eq!(snap, before);
    }
}
