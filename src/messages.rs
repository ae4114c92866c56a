//! Message types for the manager actor.
//!
//! This module defines the events consumed from the message bus, the command
//! protocol between [`ManagerHandle`](crate::manager::ManagerHandle) and the
//! manager task, and the notification payload delivered to subscribers.
//!
//! # Architecture
//!
//! Commands are sent via an mpsc channel and processed sequentially by the
//! manager task; responses are returned via oneshot channels embedded in each
//! command variant. Because the mailbox is drained one command at a time and
//! identification work is awaited inline, the channel doubles as the
//! process-wide mutual-exclusion queue for identification attempts.
//!
//! # Helper Methods
//!
//! Each request/response variant has a helper that creates the command and
//! returns the oneshot receiver:
//!
//! ```rust
//! use device_registry::messages::ManagerCommand;
//!
//! let (cmd, rx) = ManagerCommand::dump_state();
//! // cmd_tx.send(cmd).await?;
//! // let (devices, subscribers, procedures) = rx.await?;
//! ```

use crate::bus::IdentProcedure;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Identifier of a process reachable through the message bus (a bus server,
/// an ident-procedure owner, or a subscriber target).
pub type ServiceId = u64;

/// A client's logical connection scope. Subscriptions and ident procedures
/// are owned by a session and torn down with it.
pub type SessionId = u64;

/// Key of one physical channel: which bus server owns it and its address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    /// Name of the bus server that owns the channel
    pub bus: String,
    /// Channel address on that bus
    pub channel: String,
}

impl DeviceKey {
    /// Create a key from a bus-server name and channel address.
    pub fn new(bus: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            bus: bus.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.bus, self.channel)
    }
}

/// Payload of a device status change, delivered point-to-point to each
/// subscriber and once as a system-wide broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceChange {
    /// Resolved device name
    pub device: String,
    /// Bus server owning the channel
    pub bus: String,
    /// Channel address
    pub channel: String,
    /// True on connect, false on disconnect
    pub connected: bool,
}

/// Low-level lifecycle events consumed from the message bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A bus server saw a device appear on one of its channels.
    DeviceConnect {
        /// Bus server name
        bus: String,
        /// Channel address
        channel: String,
    },
    /// A bus server saw a device disappear.
    DeviceDisconnect {
        /// Bus server name
        bus: String,
        /// Channel address
        channel: String,
    },
    /// A service process finished connecting to the message bus.
    ServiceConnect {
        /// Service identifier
        id: ServiceId,
        /// Service name
        name: String,
    },
    /// A service process dropped off the message bus. When the named service
    /// is a bus server, every device it owned is disconnected.
    ServiceDisconnect {
        /// Service identifier
        id: ServiceId,
        /// Service name
        name: String,
    },
}

/// Commands processed by the manager task.
///
/// Request/response variants embed a `oneshot::Sender`; use the helper
/// constructors to obtain the matching receiver.
pub enum ManagerCommand {
    /// A lifecycle event from the message bus. No response.
    Event(BusEvent),

    /// Register a session's interest in one or more device names.
    ///
    /// The response is an immediate snapshot of every currently resolved
    /// record matching a requested name (`connected` always true), so a late
    /// subscriber does not miss devices that resolved before it subscribed.
    RegisterInterest {
        /// Device names the session wants to hear about
        devices: Vec<String>,
        /// Addressable target for point-to-point delivery
        target: ServiceId,
        /// Owning session
        session: SessionId,
        /// Message identifier the subscriber wants used for delivery
        message_id: u32,
        /// Response channel for the snapshot
        respond: oneshot::Sender<Vec<DeviceChange>>,
    },

    /// Register a fallback identification procedure.
    ///
    /// The handler is resolved once at registration time. Registration
    /// triggers a backfill pass re-trying the new procedure against every
    /// record currently resolved as unknown; the acknowledgement is sent
    /// after the backfill completes.
    RegisterIdentProcedure {
        /// Procedure name, for diagnostics
        name: String,
        /// Owning service
        owner: ServiceId,
        /// Owning session
        session: SessionId,
        /// The callable to invoke during arbitration
        handler: Arc<dyn IdentProcedure>,
        /// Acknowledgement channel
        respond: oneshot::Sender<()>,
    },

    /// Human-readable dump of the devices, subscribers, and procedures
    /// tables, for operational debugging.
    DumpState {
        /// Response channel for the three rendered tables
        respond: oneshot::Sender<(String, String, String)>,
    },

    /// Tear down a session: remove all of its subscriptions and ident
    /// procedures atomically. No notification is delivered to the session
    /// once teardown has been processed.
    EndSession {
        /// Session to tear down
        session: SessionId,
        /// Acknowledgement channel
        respond: oneshot::Sender<()>,
    },

    /// On-demand full rescan of all reachable bus servers.
    Refresh {
        /// Acknowledgement channel, sent after the rescan completes
        respond: oneshot::Sender<()>,
    },

    /// Drain and stop the manager task.
    Shutdown {
        /// Acknowledgement channel
        respond: oneshot::Sender<()>,
    },
}

impl ManagerCommand {
    /// Create a `RegisterInterest` command and its response receiver.
    pub fn register_interest(
        devices: Vec<String>,
        target: ServiceId,
        session: SessionId,
        message_id: u32,
    ) -> (Self, oneshot::Receiver<Vec<DeviceChange>>) {
        let (respond, rx) = oneshot::channel();
        (
            Self::RegisterInterest {
                devices,
                target,
                session,
                message_id,
                respond,
            },
            rx,
        )
    }

    /// Create a `RegisterIdentProcedure` command and its response receiver.
    pub fn register_ident_procedure(
        name: String,
        owner: ServiceId,
        session: SessionId,
        handler: Arc<dyn IdentProcedure>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (respond, rx) = oneshot::channel();
        (
            Self::RegisterIdentProcedure {
                name,
                owner,
                session,
                handler,
                respond,
            },
            rx,
        )
    }

    /// Create a `DumpState` command and its response receiver.
    pub fn dump_state() -> (Self, oneshot::Receiver<(String, String, String)>) {
        let (respond, rx) = oneshot::channel();
        (Self::DumpState { respond }, rx)
    }

    /// Create an `EndSession` command and its response receiver.
    pub fn end_session(session: SessionId) -> (Self, oneshot::Receiver<()>) {
        let (respond, rx) = oneshot::channel();
        (Self::EndSession { session, respond }, rx)
    }

    /// Create a `Refresh` command and its response receiver.
    pub fn refresh() -> (Self, oneshot::Receiver<()>) {
        let (respond, rx) = oneshot::channel();
        (Self::Refresh { respond }, rx)
    }

    /// Create a `Shutdown` command and its response receiver.
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (respond, rx) = oneshot::channel();
        (Self::Shutdown { respond }, rx)
    }
}
