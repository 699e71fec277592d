use crate::adb::AdbClient;
use crate::core::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// One package as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub package_id: String,
    pub display_name: Option<String>,
    pub is_system: bool,
    pub is_enabled: bool,
    pub is_installed: bool,
}

#[async_trait]
pub trait PackageInventoryProvider: Send + Sync {
    /// With `include_uninstalled`, packages removed for the active user but
    /// still known to the package manager are listed too.
    async fn list_packages(&self, include_uninstalled: bool) -> Result<Vec<PackageEntry>>;
}

/// Reads the package database with `pm list packages` over adb.
pub struct AdbPackageProvider {
    client: AdbClient,
    serial: String,
    user_id: u32,
}

impl AdbPackageProvider {
    pub fn new(client: AdbClient, serial: impl Into<String>, user_id: u32) -> Self {
        Self {
            client,
            serial: serial.into(),
            user_id,
        }
    }

    async fn pm_list(&self, flags: &[&str]) -> Result<BTreeSet<String>> {
        let user = self.user_id.to_string();
        let mut cmd = vec!["pm", "list", "packages"];
        cmd.extend_from_slice(flags);
        cmd.extend_from_slice(&["--user", &user]);
        let output = self.client.shell(&self.serial, &cmd).await?;
        Ok(parse_package_lines(&output))
    }
}

#[async_trait]
impl PackageInventoryProvider for AdbPackageProvider {
    async fn list_packages(&self, include_uninstalled: bool) -> Result<Vec<PackageEntry>> {
        let installed = self.pm_list(&[]).await?;
        let known = if include_uninstalled {
            self.pm_list(&["-u"]).await?
        } else {
            installed.clone()
        };
        let system: HashSet<String> = self.pm_list(&["-s", "-u"]).await?.into_iter().collect();
        let disabled: HashSet<String> = self.pm_list(&["-d"]).await?.into_iter().collect();
        debug!(
            "pm reported {} known, {} installed, {} system, {} disabled",
            known.len(),
            installed.len(),
            system.len(),
            disabled.len()
        );
        Ok(known
            .into_iter()
            .map(|pkg| PackageEntry {
                is_system: system.contains(&pkg),
                is_enabled: !disabled.contains(&pkg),
                is_installed: installed.contains(&pkg),
                display_name: None,
                package_id: pkg,
            })
            .collect())
    }
}

fn parse_package_lines(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .map(|pkg| pkg.trim().to_string())
        .filter(|pkg| !pkg.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pm_output() {
        let out = "package:com.android.chrome\r\npackage:com.samsung.bixby\n\nWARNING: linker\npackage:\n";
        let pkgs: Vec<_> = parse_package_lines(out).into_iter().collect();
        assert_eq!(pkgs, ["com.android.chrome", "com.samsung.bixby"]);
    }
}
