//! Mock collaborators for tests and the demo binary.
//!
//! Real deployments wire transport adapters into the manager; everything
//! here simulates those collaborators in-process so the full discovery path
//! can be exercised without hardware or a running message bus.
//!
//! - [`MockDevice`] / [`MockBusServer`]: scripted query→response tables per
//!   channel, with silent and faulty behaviors for the failure paths.
//! - [`MockDirectory`]: a mutable set of bus servers.
//! - [`RecordingMessenger`]: captures notifications and broadcasts for
//!   assertions.
//! - [`ScriptedProcedure`]: canned ident-procedure answers that log their
//!   invocation order.

use crate::bus::{BusDirectory, BusServer, IdentProcedure, Messenger};
use crate::error::BusError;
use crate::messages::{DeviceChange, ServiceId, SessionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Scripted behavior of one simulated instrument.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    responses: HashMap<String, String>,
    faulty: bool,
}

impl MockDevice {
    /// A device that times out on every query until responses are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a response for one query command.
    pub fn with_response(mut self, query: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.insert(query.into(), response.into());
        self
    }

    /// A device that never answers anything (every query times out).
    pub fn silent() -> Self {
        Self::default()
    }

    /// A device whose transport is broken: every query fails hard instead
    /// of timing out.
    pub fn faulty() -> Self {
        Self {
            responses: HashMap::new(),
            faulty: true,
        }
    }

    fn answer(&self, query: &str) -> Result<String, BusError> {
        if self.faulty {
            return Err(BusError::Transport("simulated transport fault".into()));
        }
        match self.responses.get(query) {
            Some(response) => Ok(response.clone()),
            None => Err(BusError::Timeout),
        }
    }
}

/// A simulated bus server with attachable channels and a query log.
pub struct MockBusServer {
    name: String,
    devices: Mutex<HashMap<String, MockDevice>>,
    query_log: Mutex<Vec<(String, String)>>,
}

impl MockBusServer {
    /// Create a bus server with no channels attached.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            devices: Mutex::new(HashMap::new()),
            query_log: Mutex::new(Vec::new()),
        }
    }

    /// Attach (or replace) a device at `channel`.
    pub async fn attach(&self, channel: impl Into<String>, device: MockDevice) {
        self.devices.lock().await.insert(channel.into(), device);
    }

    /// Detach the device at `channel`.
    pub async fn detach(&self, channel: &str) {
        self.devices.lock().await.remove(channel);
    }

    /// Every (channel, query) pair sent so far, in order.
    pub async fn query_log(&self) -> Vec<(String, String)> {
        self.query_log.lock().await.clone()
    }
}

#[async_trait]
impl BusServer for MockBusServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_channels(&self) -> Result<Vec<String>, BusError> {
        let mut channels: Vec<String> = self.devices.lock().await.keys().cloned().collect();
        channels.sort();
        Ok(channels)
    }

    async fn query(
        &self,
        channel: &str,
        _clear: &str,
        query: &str,
        _timeout: Duration,
    ) -> Result<String, BusError> {
        self.query_log
            .lock()
            .await
            .push((channel.to_string(), query.to_string()));
        let devices = self.devices.lock().await;
        match devices.get(channel) {
            Some(device) => device.answer(query),
            None => Err(BusError::DeviceNotPresent),
        }
    }
}

/// A mutable directory of simulated bus servers.
#[derive(Default)]
pub struct MockDirectory {
    servers: Mutex<HashMap<String, Arc<dyn BusServer>>>,
}

impl MockDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a bus server reachable.
    pub async fn add(&self, server: Arc<dyn BusServer>) {
        self.servers
            .lock()
            .await
            .insert(server.name().to_string(), server);
    }

    /// Make a bus server unreachable.
    pub async fn remove(&self, name: &str) {
        self.servers.lock().await.remove(name);
    }
}

#[async_trait]
impl BusDirectory for MockDirectory {
    async fn bus_servers(&self) -> Vec<Arc<dyn BusServer>> {
        let servers = self.servers.lock().await;
        let mut list: Vec<Arc<dyn BusServer>> = servers.values().cloned().collect();
        list.sort_by(|a, b| a.name().cmp(b.name()));
        list
    }

    async fn lookup(&self, name: &str) -> Option<Arc<dyn BusServer>> {
        self.servers.lock().await.get(name).cloned()
    }
}

/// Captures every delivery for later assertions.
#[derive(Default)]
pub struct RecordingMessenger {
    notifications: Mutex<Vec<(ServiceId, SessionId, u32, DeviceChange)>>,
    broadcasts: Mutex<Vec<DeviceChange>>,
}

impl RecordingMessenger {
    /// Create a messenger with empty capture buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every point-to-point notification delivered so far, in order.
    pub async fn notifications(&self) -> Vec<(ServiceId, SessionId, u32, DeviceChange)> {
        self.notifications.lock().await.clone()
    }

    /// Every broadcast emitted so far, in order.
    pub async fn broadcasts(&self) -> Vec<DeviceChange> {
        self.broadcasts.lock().await.clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn notify(
        &self,
        target: ServiceId,
        session: SessionId,
        message_id: u32,
        change: &DeviceChange,
    ) -> Result<(), BusError> {
        self.notifications
            .lock()
            .await
            .push((target, session, message_id, change.clone()));
        Ok(())
    }

    async fn broadcast(&self, change: &DeviceChange) -> Result<(), BusError> {
        self.broadcasts.lock().await.push(change.clone());
        Ok(())
    }
}

/// A canned ident procedure that records its invocation order in a shared
/// log and optionally inspects the raw response it was handed.
pub struct ScriptedProcedure {
    label: String,
    answer: Option<String>,
    fail: bool,
    calls: Arc<std::sync::Mutex<Vec<String>>>,
}

impl ScriptedProcedure {
    /// A procedure that answers with `answer` (or a clean non-match) and
    /// appends `label` to `calls` on every invocation.
    pub fn answering(
        label: impl Into<String>,
        answer: Option<&str>,
        calls: &Arc<std::sync::Mutex<Vec<String>>>,
    ) -> Arc<dyn IdentProcedure> {
        Arc::new(Self {
            label: label.into(),
            answer: answer.map(str::to_string),
            fail: false,
            calls: Arc::clone(calls),
        })
    }

    /// A procedure that errors on every invocation.
    pub fn failing(
        label: impl Into<String>,
        calls: &Arc<std::sync::Mutex<Vec<String>>>,
    ) -> Arc<dyn IdentProcedure> {
        Arc::new(Self {
            label: label.into(),
            answer: None,
            fail: true,
            calls: Arc::clone(calls),
        })
    }
}

#[async_trait]
impl IdentProcedure for ScriptedProcedure {
    async fn identify(
        &self,
        _bus: &str,
        _channel: &str,
        _raw: Option<&str>,
    ) -> Result<Option<String>, BusError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(self.label.clone());
        }
        if self.fail {
            return Err(BusError::Remote("simulated procedure failure".into()));
        }
        Ok(self.answer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_device_answers_only_known_queries() {
        let bus = MockBusServer::new("gpib0");
        bus.attach("7", MockDevice::new().with_response("*IDN?", "A,B,C,D"))
            .await;

        let ok = bus
            .query("7", "*CLS", "*IDN?", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ok, "A,B,C,D");

        let timeout = bus.query("7", "", "ID?", Duration::from_secs(1)).await;
        assert!(matches!(timeout, Err(BusError::Timeout)));

        let absent = bus.query("9", "", "ID?", Duration::from_secs(1)).await;
        assert!(matches!(absent, Err(BusError::DeviceNotPresent)));

        assert_eq!(bus.query_log().await.len(), 3);
    }

    #[tokio::test]
    async fn directory_add_and_remove() {
        let directory = MockDirectory::new();
        directory.add(Arc::new(MockBusServer::new("gpib0"))).await;
        directory.add(Arc::new(MockBusServer::new("gpib1"))).await;

        assert_eq!(directory.bus_servers().await.len(), 2);
        assert!(directory.lookup("gpib0").await.is_some());

        directory.remove("gpib0").await;
        assert!(directory.lookup("gpib0").await.is_none());
        assert_eq!(directory.bus_servers().await.len(), 1);
    }

    #[tokio::test]
    async fn detached_channel_disappears_from_listing() {
        let bus = MockBusServer::new("gpib0");
        bus.attach("7", MockDevice::silent()).await;
        bus.attach("8", MockDevice::silent()).await;
        assert_eq!(bus.list_channels().await.unwrap(), vec!["7", "8"]);

        bus.detach("7").await;
        assert_eq!(bus.list_channels().await.unwrap(), vec!["8"]);
    }
}
