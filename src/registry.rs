//! Registry core: the authoritative table of currently connected devices.
//!
//! One record per (bus, channel) key, moving through a small state machine:
//!
//! ```text
//! ABSENT ──connect──> PENDING ──identification──> RESOLVED
//!    ^                                               │
//!    └──────────────── disconnect ───────────────────┘
//! ```
//!
//! Duplicate connects (a full bus rescan replays everything it sees) and
//! late disconnects are no-ops, which makes event handling idempotent over
//! an unreliable discovery stream. A resolved name is immutable for the
//! lifetime of its connect cycle; reconnecting always re-identifies.

use crate::ident::Resolution;
use crate::messages::DeviceKey;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;

/// Lifecycle state of one connected channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    /// Connect seen, identification not finished yet.
    Pending,
    /// Identification finished. `Resolution::name` is `None` for devices
    /// nothing could identify; those remain candidates for backfill.
    Resolved(Resolution),
}

/// One connected channel and what is known about it.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Current lifecycle state
    pub state: DeviceState,
    /// When the connect event was first seen
    pub connected_at: DateTime<Utc>,
}

impl DeviceRecord {
    fn resolution(&self) -> Option<&Resolution> {
        match &self.state {
            DeviceState::Resolved(resolution) => Some(resolution),
            DeviceState::Pending => None,
        }
    }

    /// Resolved device name, when identification produced one.
    pub fn name(&self) -> Option<&str> {
        self.resolution().and_then(|r| r.name.as_deref())
    }

    /// Raw identification response, when one was captured.
    pub fn raw(&self) -> Option<&str> {
        self.resolution().and_then(|r| r.raw.as_deref())
    }
}

/// The authoritative map of currently known devices.
#[derive(Default)]
pub struct DeviceTable {
    records: HashMap<DeviceKey, DeviceRecord>,
}

impl DeviceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known devices.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether a record exists for `key` (pending or resolved).
    pub fn contains(&self, key: &DeviceKey) -> bool {
        self.records.contains_key(key)
    }

    /// Start a connect cycle for `key`.
    ///
    /// Returns false without touching the table when a record already
    /// exists, making duplicate connect events idempotent.
    pub fn begin_connect(&mut self, key: DeviceKey) -> bool {
        if self.records.contains_key(&key) {
            return false;
        }
        self.records.insert(
            key,
            DeviceRecord {
                state: DeviceState::Pending,
                connected_at: Utc::now(),
            },
        );
        true
    }

    /// Finish a connect cycle with the identification outcome.
    ///
    /// Only a pending record can be resolved; returns false otherwise.
    pub fn resolve(&mut self, key: &DeviceKey, resolution: Resolution) -> bool {
        match self.records.get_mut(key) {
            Some(record) if record.state == DeviceState::Pending => {
                record.state = DeviceState::Resolved(resolution);
                true
            }
            _ => false,
        }
    }

    /// Assign a name to a record previously resolved as unknown (backfill).
    ///
    /// A record that already carries a name keeps it: the resolved name is
    /// immutable for the lifetime of the connect cycle. Returns true when
    /// the name was assigned.
    pub fn assign_name(&mut self, key: &DeviceKey, name: impl Into<String>) -> bool {
        match self.records.get_mut(key) {
            Some(DeviceRecord {
                state: DeviceState::Resolved(resolution),
                ..
            }) if resolution.name.is_none() => {
                resolution.name = Some(name.into());
                true
            }
            _ => false,
        }
    }

    /// Remove the record for `key`, if any (disconnect).
    pub fn remove(&mut self, key: &DeviceKey) -> Option<DeviceRecord> {
        self.records.remove(key)
    }

    /// Look up one record.
    pub fn record(&self, key: &DeviceKey) -> Option<&DeviceRecord> {
        self.records.get(key)
    }

    /// Keys of every record resolved as unknown, the backfill targets.
    pub fn unresolved(&self) -> Vec<DeviceKey> {
        let mut keys: Vec<DeviceKey> = self
            .records
            .iter()
            .filter(|(_, record)| {
                matches!(
                    &record.state,
                    DeviceState::Resolved(resolution) if resolution.name.is_none()
                )
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort_by(|a, b| (&a.bus, &a.channel).cmp(&(&b.bus, &b.channel)));
        keys
    }

    /// Keys of every resolved record carrying exactly `name`.
    pub fn matching(&self, name: &str) -> Vec<DeviceKey> {
        let mut keys: Vec<DeviceKey> = self
            .records
            .iter()
            .filter(|(_, record)| record.name() == Some(name))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort_by(|a, b| (&a.bus, &a.channel).cmp(&(&b.bus, &b.channel)));
        keys
    }

    /// Keys of every record owned by the named bus server.
    pub fn keys_on_bus(&self, bus: &str) -> Vec<DeviceKey> {
        self.records
            .keys()
            .filter(|key| key.bus == bus)
            .cloned()
            .collect()
    }

    /// Render the device table for diagnostics.
    pub fn dump(&self) -> String {
        if self.records.is_empty() {
            return "no known devices\n".to_string();
        }
        let mut entries: Vec<(&DeviceKey, &DeviceRecord)> = self.records.iter().collect();
        entries.sort_by(|a, b| (&a.0.bus, &a.0.channel).cmp(&(&b.0.bus, &b.0.channel)));
        let mut out = String::new();
        for (key, record) in entries {
            let state = match &record.state {
                DeviceState::Pending => "pending".to_string(),
                DeviceState::Resolved(resolution) => match &resolution.name {
                    Some(name) => name.clone(),
                    None => "<unidentified>".to_string(),
                },
            };
            let _ = writeln!(
                out,
                "{}: {} (since {})",
                key,
                state,
                record.connected_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        out
    }
}
