//! Interface boundary to the external collaborators.
//!
//! The registry performs no hardware I/O and no message-bus transport of its
//! own; both live behind the trait objects defined here. A deployment wires
//! real transport adapters into the manager, tests and the demo binary wire
//! in the [`mock`](crate::mock) implementations.
//!
//! - [`BusServer`]: one bus server owning raw transport for a group of
//!   channels; the registry only ever sends short clear/query exchanges
//!   through it.
//! - [`BusDirectory`]: lookup and enumeration of currently reachable bus
//!   servers, used by full rescans and by per-channel identification.
//! - [`Messenger`]: outbound delivery, both point-to-point subscriber
//!   notifications and the system-wide device-connection-changed broadcast.
//! - [`IdentProcedure`]: an externally supplied fallback identification
//!   capability, resolved to a callable once at registration time.

use crate::error::BusError;
use crate::messages::{DeviceChange, ServiceId, SessionId};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A bus server owning the physical transport for a group of channels.
#[async_trait]
pub trait BusServer: Send + Sync {
    /// Name under which this bus server announces itself on the message bus.
    fn name(&self) -> &str;

    /// List the channel addresses currently attached to this bus.
    async fn list_channels(&self) -> Result<Vec<String>, BusError>;

    /// Send a clear/reset command followed by a query to one channel and
    /// return the response. An empty `clear` string means no reset is issued.
    /// The timeout covers the whole exchange.
    async fn query(
        &self,
        channel: &str,
        clear: &str,
        query: &str,
        timeout: Duration,
    ) -> Result<String, BusError>;
}

/// Resolution of bus-server names to live handles.
#[async_trait]
pub trait BusDirectory: Send + Sync {
    /// Every bus server currently reachable, for full rescans.
    async fn bus_servers(&self) -> Vec<Arc<dyn BusServer>>;

    /// Resolve one bus server by name, if it is currently reachable.
    async fn lookup(&self, name: &str) -> Option<Arc<dyn BusServer>>;
}

/// Outbound delivery of device status changes.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver a change to one subscriber at its requested message id.
    async fn notify(
        &self,
        target: ServiceId,
        session: SessionId,
        message_id: u32,
        change: &DeviceChange,
    ) -> Result<(), BusError>;

    /// Emit the system-wide device-connection-changed signal.
    async fn broadcast(&self, change: &DeviceChange) -> Result<(), BusError>;
}

/// An externally supplied fallback identification capability.
///
/// Invoked by the arbiter when the standard dialects fail. `raw` is `Some`
/// when the device answered the standard queries with something (possibly
/// empty or malformed) and `None` when the query phase failed outright; some
/// procedures can only make sense of a device that responded at all, and the
/// distinction lets an implementation support either call shape.
#[async_trait]
pub trait IdentProcedure: Send + Sync {
    /// Attempt to identify the device at (bus, channel).
    ///
    /// `Ok(None)` is a clean non-match; an `Err` is logged by the arbiter and
    /// treated the same way.
    async fn identify(
        &self,
        bus: &str,
        channel: &str,
        raw: Option<&str>,
    ) -> Result<Option<String>, BusError>;
}
