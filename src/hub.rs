//! Subscription hub: who wants to hear about which device.
//!
//! Subscriptions are name-addressed, not instance-addressed: a session
//! subscribes to "ACME MODEL7" and keeps that subscription across any number
//! of connect/disconnect cycles of the underlying hardware. Interest is only
//! removed by session teardown.
//!
//! Delivery fans out point-to-point to every subscription for the changed
//! name and additionally emits one system-wide broadcast for consumers that
//! want all device changes rather than a specific name.

use crate::bus::Messenger;
use crate::messages::{DeviceChange, ServiceId, SessionId};
use std::collections::HashMap;
use std::fmt::Write as _;
use tracing::{debug, warn};

/// One client session's interest in one device name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Device name the session wants to hear about
    pub device: String,
    /// Addressable target for point-to-point delivery
    pub target: ServiceId,
    /// Owning session
    pub session: SessionId,
    /// Message identifier the subscriber wants used for delivery
    pub message_id: u32,
}

/// Per-name subscriber lists.
#[derive(Default)]
pub struct SubscriptionHub {
    subscribers: HashMap<String, Vec<Subscription>>,
}

impl SubscriptionHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription to its device's list.
    pub fn register(&mut self, subscription: Subscription) {
        debug!(
            device = %subscription.device,
            subscriber = subscription.target,
            session = subscription.session,
            "registered interest"
        );
        self.subscribers
            .entry(subscription.device.clone())
            .or_default()
            .push(subscription);
    }

    /// Whether anyone is interested in `device`.
    pub fn has_subscribers(&self, device: &str) -> bool {
        self.subscribers.contains_key(device)
    }

    /// Number of device names with at least one subscriber.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether no interest is registered at all.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Remove every subscription owned by `session`, dropping name lists
    /// that become empty so the map does not grow unbounded with churn.
    /// Returns how many subscriptions were removed.
    pub fn end_session(&mut self, session: SessionId) -> usize {
        let mut removed = 0;
        self.subscribers.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| s.session != session);
            removed += before - subs.len();
            !subs.is_empty()
        });
        removed
    }

    /// Deliver `change` to every subscription for its device name, then emit
    /// the system-wide broadcast. Individual delivery failures are logged and
    /// do not stop the fan-out.
    pub async fn notify(&self, messenger: &dyn Messenger, change: &DeviceChange) {
        let Some(subs) = self.subscribers.get(&change.device) else {
            return;
        };
        for sub in subs {
            debug!(
                device = %change.device,
                subscriber = sub.target,
                message_id = sub.message_id,
                connected = change.connected,
                "notifying subscriber"
            );
            if let Err(err) = messenger
                .notify(sub.target, sub.session, sub.message_id, change)
                .await
            {
                warn!(
                    device = %change.device,
                    subscriber = sub.target,
                    error = %err,
                    "failed to deliver notification"
                );
            }
        }
        if let Err(err) = messenger.broadcast(change).await {
            warn!(device = %change.device, error = %err, "failed to broadcast change");
        }
    }

    /// Render the subscriber map for diagnostics.
    pub fn dump(&self) -> String {
        if self.subscribers.is_empty() {
            return "no subscribers\n".to_string();
        }
        let mut names: Vec<&String> = self.subscribers.keys().collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            let subs = &self.subscribers[name];
            let rendered: Vec<String> = subs
                .iter()
                .map(|s| format!("target {} session {} msg {}", s.target, s.session, s.message_id))
                .collect();
            let _ = writeln!(out, "{}: [{}]", name, rendered.join(", "));
        }
        out
    }
}
