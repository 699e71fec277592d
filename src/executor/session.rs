use super::ExecError;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

const STATUS_MARKER: &str = "__debloater_rc__:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    /// Combined stdout and stderr.
    pub output: String,
}

struct SessionIo {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// A long-lived shell process fed one command line at a time. Each command
/// is followed by an echo of its exit status so replies can be framed.
pub struct ShellSession {
    io: Mutex<SessionIo>,
    /// `true` asks the watcher to report the exit like an unexpected death.
    kill_tx: StdMutex<Option<oneshot::Sender<bool>>>,
    alive: Arc<AtomicBool>,
    timeout: Duration,
}

impl ShellSession {
    /// Starts `cmd` with piped stdio. `on_exit` runs once if the process
    /// ends for any reason other than `terminate(false)` or drop.
    pub fn spawn<F>(mut cmd: Command, timeout: Duration, on_exit: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("shell stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("shell stdout unavailable"))?;

        let alive = Arc::new(AtomicBool::new(true));
        let (kill_tx, kill_rx) = oneshot::channel::<bool>();
        let watcher_alive = Arc::clone(&alive);
        tokio::spawn(async move {
            let requested = tokio::select! {
                status = child.wait() => {
                    debug!("privileged shell exited: {:?}", status);
                    None
                }
                notify = kill_rx => Some(notify.unwrap_or(false)),
            };
            let report = match requested {
                Some(notify) => {
                    let _ = child.kill().await;
                    notify
                }
                None => true,
            };
            watcher_alive.store(false, Ordering::SeqCst);
            if report {
                on_exit();
            }
        });

        Ok(Self {
            io: Mutex::new(SessionIo {
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            kill_tx: StdMutex::new(Some(kill_tx)),
            alive,
            timeout,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Kills the process. With `report_exit` the exit callback still fires.
    pub fn terminate(&self, report_exit: bool) {
        let tx = match self.kill_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = tx {
            let _ = tx.send(report_exit);
        }
    }

    /// Runs one command line and waits for its exit status.
    /// Fails with `NotSent` when the shell was already gone, including when
    /// an earlier command timed out while this one waited for its turn.
    pub async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        if !self.is_alive() {
            return Err(ExecError::NotSent);
        }
        let mut guard = self.io.lock().await;
        if !self.is_alive() {
            return Err(ExecError::NotSent);
        }
        let io = &mut *guard;
        let line = format!("{{ {}; }} 2>&1; echo \"{}$?\"\n", command, STATUS_MARKER);
        io.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|_| ExecError::SessionClosed)?;
        io.stdin.flush().await.map_err(|_| ExecError::SessionClosed)?;

        match timeout(self.timeout, read_reply(&mut io.stdout)).await {
            Ok(reply) => reply,
            Err(_) => {
                // Output framing is lost once a reply is abandoned.
                warn!("`{}` timed out; recycling privileged shell", command);
                // Commands queued on the lock must see the shell as gone.
                self.alive.store(false, Ordering::SeqCst);
                self.terminate(true);
                Err(ExecError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}

async fn read_reply(
    stdout: &mut Lines<BufReader<ChildStdout>>,
) -> Result<CommandOutput, ExecError> {
    let mut output = String::new();
    loop {
        let line = match stdout.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => return Err(ExecError::SessionClosed),
        };
        let line = line.trim_end_matches('\r');
        if let Some(idx) = line.find(STATUS_MARKER) {
            output.push_str(&line[..idx]);
            let status = line[idx + STATUS_MARKER.len()..]
                .trim()
                .parse()
                .unwrap_or(-1);
            return Ok(CommandOutput {
                status,
                output: output.trim_end().to_string(),
            });
        }
        output.push_str(line);
        output.push('\n');
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.terminate(false);
    }
}
