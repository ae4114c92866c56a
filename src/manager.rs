//! Manager actor: owns all registry state and serializes identification.
//!
//! The [`DeviceManager`] is the single owner of the device table, the
//! subscriber lists, and the ident-procedure registry. It runs in a
//! dedicated Tokio task and processes [`ManagerCommand`] messages received
//! via an mpsc channel, responding through oneshot channels.
//!
//! ## Actor Responsibilities
//!
//! - **Event handling**: consumes connect/disconnect and service lifecycle
//!   events, driving the per-channel state machine in
//!   [`registry`](crate::registry)
//! - **Identification**: runs the [`Negotiator`] dialect chain and the
//!   [`IdentArbiter`] fallback chain inline, so the command mailbox doubles
//!   as the process-wide mutual-exclusion queue for identification work.
//!   Externally supplied procedures may have hardware side effects and must
//!   never interleave
//! - **Notification**: forwards resolutions to the
//!   [`SubscriptionHub`](crate::hub::SubscriptionHub)
//! - **Rescan**: one full bus scan at startup before serving events, again
//!   on a periodic timer, and on demand via [`ManagerHandle::refresh`]
//!
//! ## Message Flow
//!
//! ```text
//! bus events ──┐
//! client calls ┼──> mpsc mailbox ──> manager task ──> bus servers (queries)
//! rescan timer ┘        (sequential, no locks)   └──> messenger (notify)
//! ```
//!
//! A consequence of serializing identification is that discovery throughput
//! is bounded by the slowest single attempt (worst case the legacy dialect's
//! settle delay). Discovery is not latency-critical.

use crate::arbiter::IdentArbiter;
use crate::bus::{BusDirectory, IdentProcedure, Messenger};
use crate::config::Settings;
use crate::error::{RegistryError, RegistryResult};
use crate::hub::{Subscription, SubscriptionHub};
use crate::ident::{Negotiator, Resolution};
use crate::messages::{
    BusEvent, DeviceChange, DeviceKey, ManagerCommand, ServiceId, SessionId,
};
use crate::registry::DeviceTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cloneable client-side handle to the manager task.
///
/// All methods enqueue a command and await its response; the manager
/// processes commands strictly in order.
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::Sender<ManagerCommand>,
}

impl ManagerHandle {
    /// Inject a lifecycle event from the message bus.
    pub async fn send_event(&self, event: BusEvent) -> RegistryResult<()> {
        self.commands
            .send(ManagerCommand::Event(event))
            .await
            .map_err(|_| RegistryError::MailboxClosed)
    }

    /// Register interest in one or more device names.
    ///
    /// Returns an immediate snapshot of every currently resolved record
    /// matching a requested name, so a late subscriber does not miss devices
    /// that resolved before it subscribed.
    pub async fn register_interest(
        &self,
        devices: Vec<String>,
        target: ServiceId,
        session: SessionId,
        message_id: u32,
    ) -> RegistryResult<Vec<DeviceChange>> {
        let (cmd, rx) = ManagerCommand::register_interest(devices, target, session, message_id);
        self.send(cmd, rx).await
    }

    /// Register a fallback identification procedure for the calling session.
    ///
    /// Resolves when the registration and its backfill pass have completed.
    pub async fn register_ident_procedure(
        &self,
        name: impl Into<String>,
        owner: ServiceId,
        session: SessionId,
        handler: Arc<dyn IdentProcedure>,
    ) -> RegistryResult<()> {
        let (cmd, rx) = ManagerCommand::register_ident_procedure(name.into(), owner, session, handler);
        self.send(cmd, rx).await
    }

    /// Human-readable dump of the devices, subscribers, and procedures
    /// tables.
    pub async fn dump_state(&self) -> RegistryResult<(String, String, String)> {
        let (cmd, rx) = ManagerCommand::dump_state();
        self.send(cmd, rx).await
    }

    /// Tear down a session, removing its subscriptions and procedures.
    pub async fn end_session(&self, session: SessionId) -> RegistryResult<()> {
        let (cmd, rx) = ManagerCommand::end_session(session);
        self.send(cmd, rx).await
    }

    /// Run a full rescan of all reachable bus servers now.
    pub async fn refresh(&self) -> RegistryResult<()> {
        let (cmd, rx) = ManagerCommand::refresh();
        self.send(cmd, rx).await
    }

    /// Stop the manager task after draining the current command.
    pub async fn shutdown(&self) -> RegistryResult<()> {
        let (cmd, rx) = ManagerCommand::shutdown();
        self.send(cmd, rx).await
    }

    async fn send<T>(&self, cmd: ManagerCommand, rx: oneshot::Receiver<T>) -> RegistryResult<T> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| RegistryError::MailboxClosed)?;
        rx.await.map_err(|_| RegistryError::ResponseDropped)
    }
}

/// The actor owning all registry state.
pub struct DeviceManager {
    table: DeviceTable,
    hub: SubscriptionHub,
    arbiter: IdentArbiter,
    negotiator: Negotiator,
    directory: Arc<dyn BusDirectory>,
    messenger: Arc<dyn Messenger>,
    commands: mpsc::Receiver<ManagerCommand>,
    rescan_interval: Duration,
}

impl DeviceManager {
    /// Spawn the manager task.
    ///
    /// The task performs one full rescan of the directory's bus servers
    /// before serving commands, then loops until [`ManagerHandle::shutdown`]
    /// is called or every handle is dropped.
    pub fn spawn(
        settings: &Settings,
        directory: Arc<dyn BusDirectory>,
        messenger: Arc<dyn Messenger>,
    ) -> (ManagerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(settings.manager.mailbox_capacity);
        let manager = Self {
            table: DeviceTable::new(),
            hub: SubscriptionHub::new(),
            arbiter: IdentArbiter::new(),
            negotiator: Negotiator::new(&settings.identification),
            directory,
            messenger,
            commands: rx,
            rescan_interval: settings.manager.rescan_interval,
        };
        let task = tokio::spawn(manager.run());
        (ManagerHandle { commands: tx }, task)
    }

    async fn run(mut self) {
        // Bootstrap: learn about everything already attached before serving
        // further events.
        self.refresh_device_lists().await;

        let mut rescan = tokio::time::interval_at(
            tokio::time::Instant::now() + self.rescan_interval,
            self.rescan_interval,
        );
        rescan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(ManagerCommand::Shutdown { respond }) => {
                            info!("manager shutting down");
                            let _ = respond.send(());
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            debug!("all manager handles dropped, stopping");
                            break;
                        }
                    }
                }
                _ = rescan.tick() => {
                    debug!("periodic rescan");
                    self.refresh_device_lists().await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::Event(event) => self.handle_event(event).await,
            ManagerCommand::RegisterInterest {
                devices,
                target,
                session,
                message_id,
                respond,
            } => {
                let snapshot = self.register_interest(devices, target, session, message_id);
                let _ = respond.send(snapshot);
            }
            ManagerCommand::RegisterIdentProcedure {
                name,
                owner,
                session,
                handler,
                respond,
            } => {
                self.arbiter.register(name, owner, session, handler);
                // Earlier resolution failures may be due solely to this
                // procedure's absence; give it a pass over the unknowns.
                self.backfill(owner).await;
                let _ = respond.send(());
            }
            ManagerCommand::DumpState { respond } => {
                let _ = respond.send((
                    self.table.dump(),
                    self.hub.dump(),
                    self.arbiter.dump(),
                ));
            }
            ManagerCommand::EndSession { session, respond } => {
                let subscriptions = self.hub.end_session(session);
                let procedures = self.arbiter.remove_session(session);
                info!(session, subscriptions, procedures, "session ended");
                let _ = respond.send(());
            }
            ManagerCommand::Refresh { respond } => {
                self.refresh_device_lists().await;
                let _ = respond.send(());
            }
            ManagerCommand::Shutdown { respond } => {
                // The run loop intercepts shutdown before dispatching here.
                let _ = respond.send(());
            }
        }
    }

    async fn handle_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::DeviceConnect { bus, channel } => {
                self.device_connect(bus, channel).await;
            }
            BusEvent::DeviceDisconnect { bus, channel } => {
                self.device_disconnect(DeviceKey::new(bus, channel)).await;
            }
            BusEvent::ServiceConnect { id, name } => {
                debug!(id, name = %name, "service connected");
                if self.arbiter.owned_by(id) {
                    // The service registered an ident procedure before it was
                    // fully reachable; its procedure may now succeed where
                    // earlier attempts could not even be made.
                    self.backfill(id).await;
                }
            }
            BusEvent::ServiceDisconnect { id, name } => {
                debug!(id, name = %name, "service disconnected");
                for key in self.table.keys_on_bus(&name) {
                    self.device_disconnect(key).await;
                }
            }
        }
    }

    /// Handle a connect event: idempotent against duplicates, identification
    /// inline, notification when the resolved name has subscribers.
    async fn device_connect(&mut self, bus: String, channel: String) {
        let key = DeviceKey::new(bus, channel);
        if !self.table.begin_connect(key.clone()) {
            debug!(%key, "duplicate connect ignored");
            return;
        }
        info!(%key, "device connected");

        let resolution = self.identify_device(&key).await;
        let name = resolution.name.clone();
        self.table.resolve(&key, resolution);

        match name {
            Some(name) => {
                info!(%key, device = %name, "device resolved");
                self.notify_if_subscribed(&name, &key, true).await;
            }
            None => info!(%key, "device could not be identified"),
        }
    }

    /// Handle a disconnect event: remove the record and tell subscribers of
    /// the previously resolved name.
    async fn device_disconnect(&mut self, key: DeviceKey) {
        let Some(record) = self.table.remove(&key) else {
            debug!(%key, "disconnect for unknown device ignored");
            return;
        };
        info!(%key, device = record.name().unwrap_or("<unidentified>"), "device disconnected");
        if let Some(name) = record.name() {
            let name = name.to_string();
            self.notify_if_subscribed(&name, &key, false).await;
        }
    }

    /// Negotiator first, arbiter fallback. The whole chain runs inside the
    /// actor task, so attempts for different devices never interleave.
    async fn identify_device(&mut self, key: &DeviceKey) -> Resolution {
        let Some(bus_server) = self.directory.lookup(&key.bus).await else {
            warn!(%key, "bus server unreachable, cannot identify");
            return Resolution::default();
        };
        let mut resolution = self.negotiator.identify(bus_server.as_ref(), &key.channel).await;
        if resolution.name.is_none() && !self.arbiter.is_empty() {
            resolution.name = self
                .arbiter
                .identify(&key.bus, &key.channel, resolution.raw.as_deref())
                .await;
        }
        resolution
    }

    /// Re-try the procedures owned by `owner` against every record currently
    /// resolved as unknown.
    async fn backfill(&mut self, owner: ServiceId) {
        for key in self.table.unresolved() {
            let raw = self
                .table
                .record(&key)
                .and_then(|r| r.raw().map(str::to_string));
            let Some(name) = self
                .arbiter
                .identify_owned_by(owner, &key.bus, &key.channel, raw.as_deref())
                .await
            else {
                continue;
            };
            if self.table.assign_name(&key, name.clone()) {
                info!(%key, device = %name, "backfill resolved device");
                self.notify_if_subscribed(&name, &key, true).await;
            }
        }
    }

    fn register_interest(
        &mut self,
        devices: Vec<String>,
        target: ServiceId,
        session: SessionId,
        message_id: u32,
    ) -> Vec<DeviceChange> {
        let mut found = Vec::new();
        for device in devices {
            for key in self.table.matching(&device) {
                found.push(DeviceChange {
                    device: device.clone(),
                    bus: key.bus,
                    channel: key.channel,
                    connected: true,
                });
            }
            self.hub.register(Subscription {
                device,
                target,
                session,
                message_id,
            });
        }
        found
    }

    async fn notify_if_subscribed(&self, name: &str, key: &DeviceKey, connected: bool) {
        if !self.hub.has_subscribers(name) {
            return;
        }
        let change = DeviceChange {
            device: name.to_string(),
            bus: key.bus.clone(),
            channel: key.channel.clone(),
            connected,
        };
        self.hub.notify(self.messenger.as_ref(), &change).await;
    }

    /// Ask every reachable bus server for its attached channels and replay
    /// them as connect events. Used at startup, periodically, and on demand.
    async fn refresh_device_lists(&mut self) {
        let servers = self.directory.bus_servers().await;
        if servers.is_empty() {
            debug!("no bus servers reachable");
            return;
        }
        let scans = servers.iter().map(|server| {
            let name = server.name().to_string();
            let server = Arc::clone(server);
            async move { (name, server.list_channels().await) }
        });
        let results = futures::future::join_all(scans).await;
        for (name, channels) in results {
            match channels {
                Ok(channels) => {
                    debug!(bus = %name, count = channels.len(), "scanned bus server");
                    for channel in channels {
                        self.device_connect(name.clone(), channel).await;
                    }
                }
                Err(err) => warn!(bus = %name, error = %err, "failed to list channels"),
            }
        }
    }
}
