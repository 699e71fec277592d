#![allow(dead_code)]

use async_trait::async_trait;
use debloater::connection::{Broker, BrokerEvent, ConnectionState, EventSink, PermissionStatus};
use debloater::executor::{validate_package_id, ExecError, Operation, PrivilegedExecutor};
use debloater::inventory::{PackageEntry, PackageInventoryProvider};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// In-memory package manager state behind the privileged interface.
#[derive(Default)]
pub struct FakeExecutor {
    pub disabled: Mutex<HashSet<String>>,
    pub removed: Mutex<HashSet<String>>,
    pub calls: Mutex<Vec<(Operation, String)>>,
    /// Package whose commands fail with this output.
    pub failing: Mutex<Option<(String, String)>>,
    /// Commands report the session as closed.
    pub dead: AtomicBool,
    /// Commands are refused before reaching the shell.
    pub not_sent: AtomicBool,
    pub destroyed: AtomicBool,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_for(&self, package_id: &str, output: &str) {
        *self.failing.lock().unwrap() = Some((package_id.to_string(), output.to_string()));
    }

    pub fn is_disabled(&self, package_id: &str) -> bool {
        self.disabled.lock().unwrap().contains(package_id)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn run(&self, op: Operation, package_id: &str) -> Result<(), ExecError> {
        validate_package_id(package_id)?;
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ExecError::Destroyed);
        }
        if self.not_sent.load(Ordering::SeqCst) {
            return Err(ExecError::NotSent);
        }
        if self.dead.load(Ordering::SeqCst) {
            return Err(ExecError::SessionClosed);
        }
        self.calls
            .lock()
            .unwrap()
            .push((op, package_id.to_string()));
        if let Some((pkg, output)) = self.failing.lock().unwrap().clone() {
            if pkg == package_id {
                return Err(ExecError::Failed {
                    command: op.shell_command(package_id, 0),
                    status: 1,
                    output,
                });
            }
        }
        match op {
            Operation::Disable => {
                self.disabled.lock().unwrap().insert(package_id.to_string());
            }
            Operation::Enable => {
                self.disabled.lock().unwrap().remove(package_id);
            }
            Operation::Uninstall => {
                self.removed.lock().unwrap().insert(package_id.to_string());
            }
            Operation::Restore => {
                self.removed.lock().unwrap().remove(package_id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PrivilegedExecutor for FakeExecutor {
    async fn uninstall(&self, package_id: &str) -> Result<(), ExecError> {
        self.run(Operation::Uninstall, package_id)
    }

    async fn disable(&self, package_id: &str) -> Result<(), ExecError> {
        self.run(Operation::Disable, package_id)
    }

    async fn enable(&self, package_id: &str) -> Result<(), ExecError> {
        self.run(Operation::Enable, package_id)
    }

    async fn restore(&self, package_id: &str) -> Result<(), ExecError> {
        self.run(Operation::Restore, package_id)
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

/// How the fake broker answers a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Grant,
    Deny,
    /// Hold the request until the test calls [`FakeBroker::answer`].
    Hold,
}

/// Broker whose answers are scripted by the test. Every bind hands out a
/// fresh [`FakeExecutor`].
pub struct FakeBroker {
    pub available: AtomicBool,
    pub permission: Mutex<PermissionStatus>,
    pub prompt: Mutex<PromptAnswer>,
    pub bind_fails: AtomicBool,
    pub pings: AtomicUsize,
    pub permission_requests: AtomicUsize,
    pub binds: AtomicUsize,
    pub unbinds: AtomicUsize,
    pub listeners_removed: AtomicBool,
    pub executors: Mutex<Vec<Arc<FakeExecutor>>>,
    listener: Mutex<Option<EventSink>>,
    pending_prompt: Mutex<Option<EventSink>>,
}

impl FakeBroker {
    pub fn new(permission: PermissionStatus, prompt: PromptAnswer) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(true),
            permission: Mutex::new(permission),
            prompt: Mutex::new(prompt),
            bind_fails: AtomicBool::new(false),
            pings: AtomicUsize::new(0),
            permission_requests: AtomicUsize::new(0),
            binds: AtomicUsize::new(0),
            unbinds: AtomicUsize::new(0),
            listeners_removed: AtomicBool::new(false),
            executors: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            pending_prompt: Mutex::new(None),
        })
    }

    pub fn granted() -> Arc<Self> {
        Self::new(PermissionStatus::Granted, PromptAnswer::Grant)
    }

    /// Injects a broker callback through the listener registration.
    pub fn emit(&self, event: BrokerEvent) -> bool {
        match self.listener.lock().unwrap().as_ref() {
            Some(sink) => sink.send(event),
            None => false,
        }
    }

    /// Answers a held permission prompt.
    pub fn answer(&self, grant: bool) {
        if let Some(sink) = self.pending_prompt.lock().unwrap().take() {
            if grant {
                *self.permission.lock().unwrap() = PermissionStatus::Granted;
                sink.send(BrokerEvent::PermissionGranted);
            } else {
                sink.send(BrokerEvent::PermissionDenied);
            }
        }
    }

    pub fn latest_executor(&self) -> Option<Arc<FakeExecutor>> {
        self.executors.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn ping(&self) -> bool {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.available.load(Ordering::SeqCst)
    }

    async fn check_permission(&self) -> PermissionStatus {
        *self.permission.lock().unwrap()
    }

    fn request_permission(&self, sink: EventSink) {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        let answer = *self.prompt.lock().unwrap();
        match answer {
            PromptAnswer::Grant => {
                *self.permission.lock().unwrap() = PermissionStatus::Granted;
                sink.send(BrokerEvent::PermissionGranted);
            }
            PromptAnswer::Deny => {
                sink.send(BrokerEvent::PermissionDenied);
            }
            PromptAnswer::Hold => {
                *self.pending_prompt.lock().unwrap() = Some(sink);
            }
        }
    }

    fn bind(&self, sink: EventSink) {
        self.binds.fetch_add(1, Ordering::SeqCst);
        if self.bind_fails.load(Ordering::SeqCst) {
            sink.send(BrokerEvent::BindFailed("service refused".to_string()));
            return;
        }
        let executor = FakeExecutor::new();
        self.executors.lock().unwrap().push(Arc::clone(&executor));
        sink.send(BrokerEvent::ServiceConnected(executor));
    }

    async fn unbind(&self) {
        self.unbinds.fetch_add(1, Ordering::SeqCst);
    }

    fn register_listeners(&self, sink: EventSink) {
        *self.listener.lock().unwrap() = Some(sink);
    }

    fn remove_listeners(&self) {
        self.listeners_removed.store(true, Ordering::SeqCst);
        self.listener.lock().unwrap().take();
    }
}

/// Waits for the watched state to reach `want`.
pub async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}", want))
        .expect("connection actor stopped");
}

/// Package list served by [`FakeProvider`].
pub struct FakeProvider {
    pub entries: Mutex<Result<Vec<PackageEntry>, String>>,
}

impl FakeProvider {
    pub fn new(entries: Vec<PackageEntry>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Ok(entries)),
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Err(reason.to_string())),
        })
    }
}

#[async_trait]
impl PackageInventoryProvider for FakeProvider {
    async fn list_packages(
        &self,
        _include_uninstalled: bool,
    ) -> debloater::core::Result<Vec<PackageEntry>> {
        self.entries
            .lock()
            .unwrap()
            .clone()
            .map_err(debloater::core::AdbError::CommandFailed)
    }
}

pub fn entry(package_id: &str, name: Option<&str>, system: bool) -> PackageEntry {
    PackageEntry {
        package_id: package_id.to_string(),
        display_name: name.map(str::to_string),
        is_system: system,
        is_enabled: true,
        is_installed: true,
    }
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

pub async fn next_notice(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<debloater::connection::Notice>,
) -> debloater::connection::Notice {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no notice in time")
        .expect("notice channel closed")
}

/// A `ShellExecutor` over a local `sh` where `pm` and `cmd` are shell
/// functions recording package state as marker files under `state`.
/// `com.missing` fails with a non-zero status; `com.quiet` prints a failure
/// but exits 0 like old `pm` builds.
#[cfg(unix)]
pub async fn stub_executor(state: &std::path::Path) -> debloater::executor::ShellExecutor {
    use debloater::executor::{ShellExecutor, ShellSession};
    let dir = state.display();
    let pm = format!(
        "pm() {{ case \"$1\" in \
         disable-user) touch \"{dir}/$4.disabled\"; echo \"Package $4 new state: disabled-user\";; \
         enable) rm -f \"{dir}/$4.disabled\"; echo \"Package $4 new state: enabled\";; \
         uninstall) if [ \"$4\" = com.missing ]; then echo \"Failure [not installed for $3]\"; return 1; fi; \
         if [ \"$4\" = com.quiet ]; then echo \"Failure [DELETE_FAILED_INTERNAL_ERROR]\"; return 0; fi; \
         touch \"{dir}/$4.removed\"; echo Success;; \
         *) return 2;; esac; }}"
    );
    let cmd = format!(
        "cmd() {{ if [ \"$1 $2\" = \"package install-existing\" ]; then \
         rm -f \"{dir}/$5.removed\"; echo \"Package $5 installed for user: $4\"; \
         else return 1; fi; }}"
    );
    let session = ShellSession::spawn(
        tokio::process::Command::new("sh"),
        Duration::from_secs(5),
        || {},
    )
    .expect("spawn sh");
    let defined = session
        .run(&format!("{pm}; {cmd}"))
        .await
        .expect("define stubs");
    assert_eq!(defined.status, 0, "{}", defined.output);
    ShellExecutor::new(session, 0)
}
