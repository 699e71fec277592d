//! The privileged side: package-manager operations run inside a shell that
//! holds the `shell` uid on the device.

mod session;
mod shell;

pub use session::{CommandOutput, ShellSession};
pub use shell::ShellExecutor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Uninstall,
    Disable,
    Enable,
    Restore,
}

impl Operation {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Uninstall => "uninstall",
            Self::Disable => "disable",
            Self::Enable => "enable",
            Self::Restore => "restore",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Uninstall => "Uninstalled",
            Self::Disable => "Disabled",
            Self::Enable => "Enabled",
            Self::Restore => "Restored",
        }
    }

    /// Package-manager command line. `package_id` must already be validated.
    pub fn shell_command(&self, package_id: &str, user_id: u32) -> String {
        match self {
            Self::Uninstall => format!("pm uninstall --user {} {}", user_id, package_id),
            Self::Disable => format!("pm disable-user --user {} {}", user_id, package_id),
            Self::Enable => format!("pm enable --user {} {}", user_id, package_id),
            Self::Restore => format!(
                "cmd package install-existing --user {} {}",
                user_id, package_id
            ),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// A request to change one package. Consumed by a single dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationIntent {
    pub operation: Operation,
    pub package_id: String,
}

impl MutationIntent {
    pub fn new(operation: Operation, package_id: impl Into<String>) -> Self {
        Self {
            operation,
            package_id: package_id.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("invalid package name: {0:?}")]
    InvalidPackage(String),
    #[error("privileged executor was destroyed")]
    Destroyed,
    /// The shell went away mid-command; the outcome is unknown.
    #[error("privileged shell is gone")]
    SessionClosed,
    /// The shell was gone before the command was written; nothing ran.
    #[error("privileged shell closed before the command was sent")]
    NotSent,
    #[error("`{command}` failed (exit {status}): {output}")]
    Failed {
        command: String,
        status: i32,
        output: String,
    },
    #[error("privileged command timed out after {0}s")]
    Timeout(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The four operations the privileged process accepts, plus teardown.
/// Each call is one command invocation; nothing is queued or retried here.
#[async_trait]
pub trait PrivilegedExecutor: Send + Sync {
    async fn uninstall(&self, package_id: &str) -> Result<(), ExecError>;
    async fn disable(&self, package_id: &str) -> Result<(), ExecError>;
    async fn enable(&self, package_id: &str) -> Result<(), ExecError>;
    async fn restore(&self, package_id: &str) -> Result<(), ExecError>;
    /// Ends the privileged process. Safe to call more than once.
    async fn destroy(&self);

    async fn perform(&self, intent: &MutationIntent) -> Result<(), ExecError> {
        let pkg = intent.package_id.as_str();
        match intent.operation {
            Operation::Uninstall => self.uninstall(pkg).await,
            Operation::Disable => self.disable(pkg).await,
            Operation::Enable => self.enable(pkg).await,
            Operation::Restore => self.restore(pkg).await,
        }
    }
}

/// Android package names: dot-separated segments, each starting with a
/// letter and made of ASCII letters, digits and underscores.
pub fn validate_package_id(package_id: &str) -> Result<(), ExecError> {
    let valid = !package_id.is_empty()
        && package_id.len() <= 255
        && package_id.split('.').all(|seg| {
            let mut chars = seg.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(ExecError::InvalidPackage(package_id.to_string()))
    }
}
