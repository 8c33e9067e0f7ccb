//! Characteristic subscription registry.
//!
//! Tracks which characteristics are subscribed on the live connection
//! and routes notification payloads to their decoders. Entries exist
//! only while the connection is ready; teardown clears the registry
//! unconditionally so nothing leaks past a disconnect.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::uuids::short_uuid;
use crate::data::decoder::NotificationDecoder;
use crate::data::keys::KeyState;
use crate::error::{Error, Result};
use crate::session::LinkState;

struct Subscription {
    decoder: Arc<dyn NotificationDecoder>,
}

/// Registry of active characteristic subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<Uuid, Subscription>,
    /// Notifications that arrived with nowhere to go. Kept visible so
    /// a dropped notification is distinguishable from "no new data".
    dropped: u64,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a characteristic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] unless the connection is in the
    /// ready state, and [`Error::AlreadySubscribed`] if an entry for
    /// the characteristic already exists. Both are contract
    /// violations; callers must not retry them.
    pub fn subscribe(
        &mut self,
        state: LinkState,
        characteristic: Uuid,
        decoder: Arc<dyn NotificationDecoder>,
    ) -> Result<()> {
        if !state.is_ready() {
            return Err(Error::NotReady { state });
        }

        if self.entries.contains_key(&characteristic) {
            return Err(Error::AlreadySubscribed { characteristic });
        }

        debug!("Registered subscription for {}", short_uuid(&characteristic));
        self.entries.insert(characteristic, Subscription { decoder });
        Ok(())
    }

    /// Check whether a characteristic is subscribed.
    pub fn is_subscribed(&self, characteristic: &Uuid) -> bool {
        self.entries.contains_key(characteristic)
    }

    /// Remove a single subscription, e.g. after a failed BLE-level
    /// subscribe. Returns whether an entry was removed.
    pub fn remove(&mut self, characteristic: &Uuid) -> bool {
        self.entries.remove(characteristic).is_some()
    }

    /// Route a notification payload to its decoder.
    ///
    /// Returns `None` for a characteristic with no subscription; the
    /// notification is counted as dropped, never silently discarded.
    pub fn dispatch(&mut self, characteristic: &Uuid, payload: &[u8]) -> Option<Result<KeyState>> {
        match self.entries.get(characteristic) {
            Some(subscription) => Some(subscription.decoder.decode(payload)),
            None => {
                self.note_dropped(characteristic, "no subscription");
                None
            }
        }
    }

    /// Record a notification that could not be delivered.
    pub fn note_dropped(&mut self, characteristic: &Uuid, reason: &str) {
        self.dropped += 1;
        warn!(
            "Dropped notification from {} ({}), {} dropped total",
            short_uuid(characteristic),
            reason,
            self.dropped
        );
    }

    /// Number of notifications dropped since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the registry holds no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every subscription. Called unconditionally on connection
    /// teardown. Returns how many entries were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }
}
