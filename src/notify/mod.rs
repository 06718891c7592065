//! # Change Notification Channel
//!
//! Low-latency broadcast of configuration value changes to live CLI/SDK
//! subscribers, keyed by environment. Delivery is at-most-once and
//! best-effort: a publish failure is logged and never propagates to the
//! triggering write, which has already committed by the time publish runs.
//! Within one environment the engine publishes in the same order it
//! appended versions; no ordering is guaranteed across environments.

use crate::domain::EnvironmentId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// One value-change notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub environment_id: EnvironmentId,
    /// Configuration item name
    pub name: String,
    /// Plaintext when `is_plaintext`, otherwise the at-rest ciphertext
    pub value: String,
    pub is_plaintext: bool,
}

/// Broadcast channel for change notifications
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeNotification>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a notification. Fire-and-forget: having no live subscribers
    /// is normal and send errors are only logged.
    pub fn publish(&self, notification: ChangeNotification) {
        match self.tx.send(notification) {
            Ok(receivers) => {
                debug!(receivers, "Published change notification");
            }
            Err(_) => {
                debug!("No live subscribers for change notification");
            }
        }
    }

    /// Subscribe to the raw stream. Callers filter by environment id.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.tx.subscribe()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}
