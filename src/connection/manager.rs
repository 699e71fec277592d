use super::{
    Applied, Broker, BrokerEvent, ConnectionState, DispatchError, EventSink, Inbound, Notice,
    PermissionStatus,
};
use crate::executor::{ExecError, MutationIntent, PrivilegedExecutor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Handle to the connection actor. Cheap to clone; all clones talk to the
/// same actor.
#[derive(Clone)]
pub struct ConnectionManager {
    tx: mpsc::UnboundedSender<Inbound>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Registers broker listeners and starts the actor. Notices meant for
    /// the user arrive on the returned receiver.
    pub fn init(broker: Arc<dyn Broker>) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Unbound);
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx.clone());
        broker.register_listeners(sink.clone());

        let actor = Actor {
            broker,
            sink,
            state: ConnectionState::Unbound,
            state_tx,
            notices: notice_tx,
            executor: None,
            permission_granted: false,
            binding: false,
            waiters: Vec::new(),
        };
        tokio::spawn(actor.run(rx));
        (Self { tx, state_rx }, notice_rx)
    }

    /// Starts acquiring the binding: permission prompt if needed, then bind.
    /// Returns immediately; watch [`Self::subscribe`] for the result.
    pub fn bind(&self) {
        if self.tx.send(Inbound::Bind { outcome: None }).is_err() {
            warn!("bind requested after cleanup; init the manager again");
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Joins the bind attempt in progress, or starts one, and waits for it
    /// to end. `false` as soon as the attempt is refused, fails or finds the
    /// broker unreachable, and after `timeout`.
    pub async fn wait_until_bound(&self, timeout: Duration) -> bool {
        let (outcome, rx) = oneshot::channel();
        if self
            .tx
            .send(Inbound::Bind {
                outcome: Some(outcome),
            })
            .is_err()
        {
            return false;
        }
        matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(true)))
    }

    /// Dispatches one command to the privileged executor.
    pub async fn execute(&self, intent: MutationIntent) -> Result<Applied, DispatchError> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Inbound::Execute { intent, reply }).is_err() {
            return Err(DispatchError::NotConnected);
        }
        rx.await.unwrap_or(Err(DispatchError::NotConnected))
    }

    /// Unbinds and drops listener registrations from any state. The manager
    /// is unusable afterwards; call [`Self::init`] for a new one.
    pub async fn cleanup(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Inbound::Cleanup { done }).is_ok() {
            let _ = rx.await;
        }
    }
}

struct Actor {
    broker: Arc<dyn Broker>,
    sink: EventSink,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    notices: mpsc::UnboundedSender<Notice>,
    executor: Option<Arc<dyn PrivilegedExecutor>>,
    /// Survives rebinds so a dead connection comes back without a prompt.
    permission_granted: bool,
    /// A `bind` was issued and has not reported back yet.
    binding: bool,
    /// Callers waiting for the current attempt to end.
    waiters: Vec<oneshot::Sender<bool>>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                Inbound::Bind { outcome } => {
                    self.waiters.extend(outcome);
                    self.connect().await;
                    if self.state == ConnectionState::Bound {
                        self.settle(true);
                    }
                }
                Inbound::Broker(event) => self.on_broker_event(event).await,
                Inbound::Execute { intent, reply } => self.dispatch(intent, reply).await,
                Inbound::Cleanup { done } => {
                    self.teardown().await;
                    let _ = done.send(());
                    break;
                }
            }
        }
        debug!("connection actor stopped");
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!("connection {:?} -> {:?}", self.state, next);
            self.state = next;
            self.state_tx.send_replace(next);
        }
    }

    fn notify(&self, notice: Notice) {
        info!("{}", notice);
        let _ = self.notices.send(notice);
    }

    /// Ends the current attempt for everyone waiting on it.
    fn settle(&mut self, bound: bool) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(bound);
        }
    }

    /// Shared path for explicit binds, reconnects after a failed dispatch and
    /// recovery from a dead binder.
    async fn connect(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Bound | ConnectionState::PermissionRequested
        ) || self.binding
        {
            return;
        }
        if !self.broker.ping().await {
            self.notify(Notice::BrokerUnavailable);
            self.settle(false);
            return;
        }
        if self.permission_granted {
            self.request_bind();
            return;
        }
        match self.broker.check_permission().await {
            PermissionStatus::Granted => {
                self.permission_granted = true;
                self.request_bind();
            }
            PermissionStatus::NotGranted => {
                self.set_state(ConnectionState::PermissionRequested);
                self.notify(Notice::PermissionRequested);
                self.broker.request_permission(self.sink.clone());
            }
            PermissionStatus::Unavailable => {
                self.set_state(ConnectionState::Unbound);
                self.notify(Notice::BrokerUnavailable);
                self.settle(false);
            }
        }
    }

    fn request_bind(&mut self) {
        self.binding = true;
        self.broker.bind(self.sink.clone());
    }

    async fn on_broker_event(&mut self, event: BrokerEvent) {
        debug!("broker event {:?} in {:?}", event, self.state);
        match event {
            BrokerEvent::PermissionGranted => {
                if self.state == ConnectionState::PermissionRequested {
                    self.permission_granted = true;
                    self.notify(Notice::PermissionGranted);
                    self.request_bind();
                }
            }
            BrokerEvent::PermissionDenied => {
                if self.state == ConnectionState::PermissionRequested {
                    self.set_state(ConnectionState::Unbound);
                    self.notify(Notice::PermissionDenied);
                    self.settle(false);
                }
            }
            BrokerEvent::ServiceConnected(executor) => {
                if !self.binding {
                    debug!("discarding unrequested service connection");
                    executor.destroy().await;
                    return;
                }
                self.binding = false;
                self.permission_granted = true;
                self.executor = Some(executor);
                self.set_state(ConnectionState::Bound);
                self.notify(Notice::Connected);
                self.settle(true);
            }
            BrokerEvent::BindFailed(reason) => {
                if !self.binding {
                    return;
                }
                self.binding = false;
                self.permission_granted = false;
                self.executor = None;
                self.set_state(ConnectionState::Unbound);
                self.notify(Notice::BindFailed(reason));
                self.settle(false);
            }
            BrokerEvent::ServiceDisconnected => {
                if self.state == ConnectionState::Bound {
                    self.executor = None;
                    self.set_state(ConnectionState::Unbound);
                    self.notify(Notice::Disconnected);
                }
            }
            BrokerEvent::BinderDead => {
                if self.state != ConnectionState::Bound {
                    return;
                }
                self.executor = None;
                self.set_state(ConnectionState::Dead);
                self.notify(Notice::ConnectionLost);
                self.connect().await;
            }
            BrokerEvent::BinderAvailable => {
                if self.state == ConnectionState::Dead {
                    self.connect().await;
                }
            }
        }
    }

    async fn dispatch(
        &mut self,
        intent: MutationIntent,
        reply: oneshot::Sender<Result<Applied, DispatchError>>,
    ) {
        let executor = match &self.executor {
            Some(executor) if self.state == ConnectionState::Bound => Some(Arc::clone(executor)),
            _ => None,
        };
        let Some(executor) = executor else {
            let _ = reply.send(Err(DispatchError::NotConnected));
            debug!(
                "{} {} rejected in {:?}; reconnecting",
                intent.operation, intent.package_id, self.state
            );
            self.connect().await;
            return;
        };
        // Runs off the actor so slow commands do not hold up state changes
        // or commands for other packages.
        tokio::spawn(async move {
            let result = match executor.perform(&intent).await {
                Ok(()) => Ok(Applied {
                    operation: intent.operation,
                    package_id: intent.package_id,
                }),
                Err(ExecError::NotSent | ExecError::Destroyed) => {
                    Err(DispatchError::NotConnected)
                }
                Err(ExecError::SessionClosed | ExecError::Timeout(_)) => {
                    Err(DispatchError::Interrupted {
                        operation: intent.operation,
                        package_id: intent.package_id,
                    })
                }
                Err(e) => Err(DispatchError::ExecutionFailed {
                    operation: intent.operation,
                    package_id: intent.package_id,
                    reason: e.to_string(),
                }),
            };
            let _ = reply.send(result);
        });
    }

    async fn teardown(&mut self) {
        self.broker.remove_listeners();
        self.broker.unbind().await;
        if let Some(executor) = self.executor.take() {
            executor.destroy().await;
        }
        self.binding = false;
        self.set_state(ConnectionState::Unbound);
        self.settle(false);
        info!("connection manager cleaned up");
    }
}
