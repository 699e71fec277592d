//! Lifecycle of the binding to the privileged executor.
//!
//! A single actor task owns [`ConnectionState`]. Broker callbacks, explicit
//! bind requests, command dispatch and teardown all arrive on one channel,
//! so state transitions are totally ordered.

mod broker;
mod manager;

pub use broker::{AdbBroker, Broker, PermissionStatus};
pub use manager::ConnectionManager;

use crate::executor::{MutationIntent, Operation, PrivilegedExecutor};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Unbound,
    PermissionRequested,
    Bound,
    Dead,
}

/// Callbacks a [`Broker`] delivers through an [`EventSink`].
pub enum BrokerEvent {
    PermissionGranted,
    PermissionDenied,
    ServiceConnected(Arc<dyn PrivilegedExecutor>),
    BindFailed(String),
    ServiceDisconnected,
    /// The privileged process went away on its own.
    BinderDead,
    /// The broker is reachable again after an outage.
    BinderAvailable,
}

impl fmt::Debug for BrokerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionGranted => f.write_str("PermissionGranted"),
            Self::PermissionDenied => f.write_str("PermissionDenied"),
            Self::ServiceConnected(_) => f.write_str("ServiceConnected"),
            Self::BindFailed(reason) => f.debug_tuple("BindFailed").field(reason).finish(),
            Self::ServiceDisconnected => f.write_str("ServiceDisconnected"),
            Self::BinderDead => f.write_str("BinderDead"),
            Self::BinderAvailable => f.write_str("BinderAvailable"),
        }
    }
}

pub(crate) enum Inbound {
    Broker(BrokerEvent),
    /// `outcome` resolves when the attempt this bind joins ends.
    Bind {
        outcome: Option<oneshot::Sender<bool>>,
    },
    Execute {
        intent: MutationIntent,
        reply: oneshot::Sender<Result<Applied, DispatchError>>,
    },
    Cleanup {
        done: oneshot::Sender<()>,
    },
}

/// Handle a broker uses to report asynchronous results to the manager.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the manager has been cleaned up.
    pub fn send(&self, event: BrokerEvent) -> bool {
        self.tx.send(Inbound::Broker(event)).is_ok()
    }
}

/// A command the executor confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Applied {
    pub operation: Operation,
    pub package_id: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No live binding, or the command never reached the privileged
    /// process. A reconnect has been started; retry shortly.
    #[error("privileged service not connected")]
    NotConnected,
    #[error("failed to {operation} {package_id}: {reason}")]
    ExecutionFailed {
        operation: Operation,
        package_id: String,
        reason: String,
    },
    /// The privileged process died while the command was in flight. Whether
    /// it took effect is unknown; re-read the inventory.
    #[error("connection lost during {operation} of {package_id}; outcome unknown")]
    Interrupted {
        operation: Operation,
        package_id: String,
    },
}

/// Short user-facing messages about the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    BrokerUnavailable,
    PermissionRequested,
    PermissionGranted,
    PermissionDenied,
    Connected,
    Disconnected,
    ConnectionLost,
    BindFailed(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokerUnavailable => {
                f.write_str("Device not reachable over adb. Connect it and enable USB debugging.")
            }
            Self::PermissionRequested => {
                f.write_str("Accept the USB debugging prompt on the device to continue.")
            }
            Self::PermissionGranted => f.write_str("USB debugging authorized"),
            Self::PermissionDenied => f.write_str("USB debugging authorization was not granted"),
            Self::Connected => f.write_str("Privileged shell connected"),
            Self::Disconnected => f.write_str("Privileged shell disconnected"),
            Self::ConnectionLost => f.write_str("Privileged shell died; reconnecting"),
            Self::BindFailed(reason) => write!(f, "Could not start privileged shell: {}", reason),
        }
    }
}
