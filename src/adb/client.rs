use crate::core::{AdbError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

const ADB_BINARY: &str = if cfg!(windows) { "adb.exe" } else { "adb" };

#[derive(Debug, Clone)]
pub struct AdbClient {
    adb_path: PathBuf,
    command_timeout: Duration,
}

impl AdbClient {
    pub fn new(explicit: Option<&Path>, command_timeout: Duration) -> Result<Self> {
        let adb_path = Self::resolve_adb(explicit)?;
        debug!("using adb at {}", adb_path.display());
        Ok(Self {
            adb_path,
            command_timeout,
        })
    }

    fn resolve_adb(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(p) = explicit {
            if p.exists() {
                return Ok(p.to_path_buf());
            }
            return Err(AdbError::AdbNotFound);
        }
        if let Ok(current_exe) = std::env::current_exe() {
            if let Some(parent) = current_exe.parent() {
                let bundled = parent.join("platform-tools").join(ADB_BINARY);
                if bundled.exists() {
                    return Ok(bundled);
                }
                let vendor_bundled = parent.join("vendor").join("platform-tools").join(ADB_BINARY);
                if vendor_bundled.exists() {
                    return Ok(vendor_bundled);
                }
            }
        }
        which::which("adb").map_err(|_| AdbError::AdbNotFound)
    }

    pub async fn ensure_present(&self) -> Result<()> {
        let output = timeout(
            Duration::from_secs(10),
            Command::new(&self.adb_path).arg("version").output(),
        )
        .await
        .map_err(|_| AdbError::Timeout(10))??;
        if output.status.success() {
            Ok(())
        } else {
            Err(AdbError::CommandFailed("adb version failed".to_string()))
        }
    }

    pub async fn start_server(&self) -> Result<()> {
        timeout(
            Duration::from_secs(10),
            Command::new(&self.adb_path).arg("start-server").output(),
        )
        .await
        .map_err(|_| AdbError::Timeout(10))??;
        Ok(())
    }

    pub async fn execute(&self, args: &[&str]) -> Result<(String, String)> {
        let output = self.run(args).await?;
        let stdout = String::from_utf8(output.stdout)?;
        let stderr = String::from_utf8(output.stderr)?;
        if !output.status.success() {
            return Err(AdbError::CommandFailed(stderr));
        }
        Ok((stdout, stderr))
    }

    pub async fn shell(&self, serial: &str, cmd: &[&str]) -> Result<String> {
        let mut args = vec!["-s", serial, "shell"];
        args.extend_from_slice(cmd);
        let (stdout, stderr) = self.execute(&args).await?;
        if !stderr.is_empty() && stderr.to_lowercase().contains("error") {
            return Err(AdbError::CommandFailed(stderr));
        }
        Ok(stdout)
    }

    /// Command for a non-PTY shell on the device that reads command lines
    /// from stdin.
    pub fn shell_session(&self, serial: &str) -> Command {
        let mut cmd = Command::new(&self.adb_path);
        cmd.args(["-s", serial, "shell"]);
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        let secs = self.command_timeout.as_secs();
        timeout(
            self.command_timeout,
            Command::new(&self.adb_path)
                .args(args)
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| AdbError::Timeout(secs))?
        .map_err(AdbError::from)
    }
}
