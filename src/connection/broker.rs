use super::{BrokerEvent, EventSink};
use crate::adb::{AdbClient, DeviceManager, DeviceState};
use crate::core::Config;
use crate::executor::{PrivilegedExecutor, ShellExecutor, ShellSession};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    NotGranted,
    /// The broker cannot answer right now.
    Unavailable,
}

/// Permission-mediated access to the privileged executor. Methods that
/// start asynchronous work return immediately and report through the sink.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn ping(&self) -> bool;
    async fn check_permission(&self) -> PermissionStatus;
    /// Delivers `PermissionGranted` or `PermissionDenied` later.
    fn request_permission(&self, sink: EventSink);
    /// Delivers `ServiceConnected` or `BindFailed` later, and `BinderDead`
    /// if the bound process dies afterwards.
    fn bind(&self, sink: EventSink);
    /// Ends whatever `bind` started. Safe to call when nothing is bound.
    async fn unbind(&self);
    /// Starts delivering `BinderAvailable` / `BinderDead` on broker outages.
    fn register_listeners(&self, sink: EventSink);
    fn remove_listeners(&self);
}

/// adb as the broker: USB-debugging authorization is the permission and an
/// `adb shell` session (uid `shell`) is the privileged process.
pub struct AdbBroker {
    client: AdbClient,
    devices: DeviceManager,
    serial: String,
    user_id: u32,
    poll_interval: Duration,
    permission_timeout: Duration,
    command_timeout: Duration,
    bound: Arc<Mutex<Option<Arc<ShellExecutor>>>>,
    bind_task: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl AdbBroker {
    pub fn new(client: AdbClient, serial: impl Into<String>, config: &Config) -> Self {
        Self {
            devices: DeviceManager::new(client.clone()),
            client,
            serial: serial.into(),
            user_id: config.user_id,
            poll_interval: config.poll_interval(),
            permission_timeout: config.permission_timeout(),
            command_timeout: config.command_timeout(),
            bound: Arc::new(Mutex::new(None)),
            bind_task: Mutex::new(None),
            watcher: Mutex::new(None),
        }
    }

    async fn state(&self) -> Option<DeviceState> {
        match self.devices.device_state(&self.serial).await {
            Ok(state) => state,
            Err(e) => {
                debug!("adb devices failed: {}", e);
                None
            }
        }
    }

    fn replace_task(slot: &Mutex<Option<JoinHandle<()>>>, task: Option<JoinHandle<()>>) {
        let previous = match slot.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, task),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), task),
        };
        if let Some(handle) = previous {
            handle.abort();
        }
    }

    fn take_bound(bound: &Mutex<Option<Arc<ShellExecutor>>>) -> Option<Arc<ShellExecutor>> {
        match bound.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl Broker for AdbBroker {
    async fn ping(&self) -> bool {
        matches!(
            self.state().await,
            Some(DeviceState::Device | DeviceState::Unauthorized)
        )
    }

    async fn check_permission(&self) -> PermissionStatus {
        match self.state().await {
            Some(DeviceState::Device) => PermissionStatus::Granted,
            Some(DeviceState::Unauthorized) => PermissionStatus::NotGranted,
            _ => PermissionStatus::Unavailable,
        }
    }

    fn request_permission(&self, sink: EventSink) {
        let devices = self.devices.clone();
        let serial = self.serial.clone();
        let poll = self.poll_interval;
        let deadline = Instant::now() + self.permission_timeout;
        info!("waiting for USB debugging authorization on {}", serial);
        tokio::spawn(async move {
            loop {
                match devices.device_state(&serial).await {
                    Ok(Some(DeviceState::Device)) => {
                        sink.send(BrokerEvent::PermissionGranted);
                        return;
                    }
                    Ok(Some(DeviceState::Unauthorized | DeviceState::Offline)) => {}
                    Ok(_) => {
                        debug!("{} went away during authorization", serial);
                        sink.send(BrokerEvent::PermissionDenied);
                        return;
                    }
                    Err(e) => {
                        warn!("authorization check failed: {}", e);
                        sink.send(BrokerEvent::PermissionDenied);
                        return;
                    }
                }
                if Instant::now() >= deadline {
                    sink.send(BrokerEvent::PermissionDenied);
                    return;
                }
                sleep(poll).await;
            }
        });
    }

    fn bind(&self, sink: EventSink) {
        let cmd = self.client.shell_session(&self.serial);
        let timeout = self.command_timeout;
        let user_id = self.user_id;
        let bound = Arc::clone(&self.bound);
        let task = tokio::spawn(async move {
            let death = sink.clone();
            let session = match ShellSession::spawn(cmd, timeout, move || {
                death.send(BrokerEvent::BinderDead);
            }) {
                Ok(session) => session,
                Err(e) => {
                    sink.send(BrokerEvent::BindFailed(e.to_string()));
                    return;
                }
            };
            let executor = Arc::new(ShellExecutor::new(session, user_id));
            match executor.identity().await {
                Ok(id) => {
                    info!("privileged shell up ({})", id.trim());
                    let previous = match bound.lock() {
                        Ok(mut guard) => guard.replace(Arc::clone(&executor)),
                        Err(poisoned) => poisoned.into_inner().replace(Arc::clone(&executor)),
                    };
                    if let Some(previous) = previous {
                        previous.destroy().await;
                    }
                    sink.send(BrokerEvent::ServiceConnected(executor));
                }
                Err(e) => {
                    executor.destroy().await;
                    sink.send(BrokerEvent::BindFailed(e.to_string()));
                }
            }
        });
        Self::replace_task(&self.bind_task, Some(task));
    }

    async fn unbind(&self) {
        Self::replace_task(&self.bind_task, None);
        if let Some(executor) = Self::take_bound(&self.bound) {
            executor.destroy().await;
        }
    }

    fn register_listeners(&self, sink: EventSink) {
        let devices = self.devices.clone();
        let serial = self.serial.clone();
        let poll = self.poll_interval;
        let task = tokio::spawn(async move {
            let mut online = None;
            loop {
                let now_online = matches!(
                    devices.device_state(&serial).await,
                    Ok(Some(DeviceState::Device))
                );
                match (online, now_online) {
                    (Some(false), true) => {
                        debug!("{} is back", serial);
                        if !sink.send(BrokerEvent::BinderAvailable) {
                            return;
                        }
                    }
                    (Some(true), false) => {
                        debug!("{} dropped off", serial);
                        if !sink.send(BrokerEvent::BinderDead) {
                            return;
                        }
                    }
                    _ => {}
                }
                online = Some(now_online);
                sleep(poll).await;
            }
        });
        Self::replace_task(&self.watcher, Some(task));
    }

    fn remove_listeners(&self) {
        Self::replace_task(&self.watcher, None);
    }
}
