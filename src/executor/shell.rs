use super::{validate_package_id, ExecError, Operation, PrivilegedExecutor, ShellSession};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Executes package-manager commands on a privileged shell session.
pub struct ShellExecutor {
    session: ShellSession,
    user_id: u32,
    destroyed: AtomicBool,
}

impl ShellExecutor {
    pub fn new(session: ShellSession, user_id: u32) -> Self {
        Self {
            session,
            user_id,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Output of `id` on the session, used to confirm the shell answers.
    pub async fn identity(&self) -> Result<String, ExecError> {
        let out = self.session.run("id").await?;
        if out.status != 0 {
            return Err(ExecError::Failed {
                command: "id".to_string(),
                status: out.status,
                output: out.output,
            });
        }
        Ok(out.output)
    }

    pub fn is_alive(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst) && self.session.is_alive()
    }

    async fn invoke(&self, op: Operation, package_id: &str) -> Result<(), ExecError> {
        validate_package_id(package_id)?;
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ExecError::Destroyed);
        }
        let command = op.shell_command(package_id, self.user_id);
        debug!("privileged: {}", command);
        let out = self.session.run(&command).await?;
        if out.status != 0 || reports_failure(&out.output) {
            warn!("{} {} failed: {}", op, package_id, out.output);
            return Err(ExecError::Failed {
                command,
                status: out.status,
                output: out.output,
            });
        }
        info!("{} {}", op.past_tense(), package_id);
        Ok(())
    }
}

/// Older `pm` builds exit 0 and print the failure instead.
fn reports_failure(output: &str) -> bool {
    output.lines().any(|line| {
        let line = line.trim();
        line.starts_with("Failure")
            || line.starts_with("Error")
            || line.starts_with("Exception")
            || line.contains("SecurityException")
    })
}

#[async_trait]
impl PrivilegedExecutor for ShellExecutor {
    async fn uninstall(&self, package_id: &str) -> Result<(), ExecError> {
        self.invoke(Operation::Uninstall, package_id).await
    }

    async fn disable(&self, package_id: &str) -> Result<(), ExecError> {
        self.invoke(Operation::Disable, package_id).await
    }

    async fn enable(&self, package_id: &str) -> Result<(), ExecError> {
        self.invoke(Operation::Enable, package_id).await
    }

    async fn restore(&self, package_id: &str) -> Result<(), ExecError> {
        self.invoke(Operation::Restore, package_id).await
    }

    async fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            debug!("destroying privileged shell");
            self.session.terminate(false);
        }
    }
}
