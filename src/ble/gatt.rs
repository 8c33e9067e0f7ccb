//! GATT link seam.
//!
//! [`GattLink`] is the per-peripheral boundary between the state
//! machine and the radio stack: connect, disconnect, discovery, and
//! notification subscriptions. The production implementation wraps a
//! btleplug peripheral; tests substitute a mock so the state machine
//! runs without radio hardware.

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _};
use btleplug::platform::Peripheral;
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::uuids::short_uuid;
use crate::dispatcher::{Event, EventSender};
use crate::error::{Error, Result};

/// Per-peripheral GATT operations used by the session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait GattLink: Send + Sync + 'static {
    /// Stable identifier of the peripheral, used to correlate radio
    /// disconnect events with the live connection.
    fn address(&self) -> String;

    /// Establish the radio-level connection and begin delivering
    /// notifications into the dispatcher queue.
    async fn open(&self) -> Result<()>;

    /// Tear the radio-level connection down.
    async fn close(&self) -> Result<()>;

    /// Discover one service and return its characteristics.
    async fn discover(&self, service: Uuid) -> Result<Vec<Characteristic>>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, characteristic: &Characteristic) -> Result<()>;

    /// Disable notifications on a characteristic.
    async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<()>;
}

/// btleplug-backed [`GattLink`].
pub(crate) struct BtleLink {
    peripheral: Peripheral,
    events: EventSender,
    pump: RwLock<Option<JoinHandle<()>>>,
}

impl BtleLink {
    pub(crate) fn new(peripheral: Peripheral, events: EventSender) -> Self {
        Self {
            peripheral,
            events,
            pump: RwLock::new(None),
        }
    }

    /// Forward the peripheral's notification stream into the
    /// dispatcher queue. The stream ends when the connection drops.
    async fn start_notification_pump(&self) -> Result<()> {
        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)?;

        let events = self.events.clone();
        let address = self.address();

        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification from {}: {} bytes",
                    short_uuid(&notification.uuid),
                    notification.value.len()
                );

                let _ = events.send(Event::Notification {
                    characteristic: notification.uuid,
                    payload: Bytes::from(notification.value),
                });
            }

            debug!("Notification stream for {} ended", address);
        });

        *self.pump.write() = Some(handle);

        Ok(())
    }

    fn stop_notification_pump(&self) {
        if let Some(handle) = self.pump.write().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl GattLink for BtleLink {
    fn address(&self) -> String {
        self.peripheral.id().to_string()
    }

    async fn open(&self) -> Result<()> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            debug!("Peripheral {} already connected at radio level", self.address());
        } else {
            self.peripheral.connect().await.map_err(Error::Bluetooth)?;
        }

        self.start_notification_pump().await
    }

    async fn close(&self) -> Result<()> {
        self.stop_notification_pump();
        self.peripheral.disconnect().await.map_err(Error::Bluetooth)
    }

    async fn discover(&self, service: Uuid) -> Result<Vec<Characteristic>> {
        // btleplug only offers full enumeration; narrow the result to
        // the requested service.
        self.peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)?;

        let mut characteristics = Vec::new();
        for discovered in self.peripheral.services() {
            if discovered.uuid == service {
                characteristics.extend(discovered.characteristics.into_iter());
            }
        }

        if characteristics.is_empty() {
            return Err(Error::DiscoveryFailed {
                context: format!("service {} not found on peripheral", short_uuid(&service)),
            });
        }

        debug!(
            "Discovered {} characteristics in service {}",
            characteristics.len(),
            short_uuid(&service)
        );

        Ok(characteristics)
    }

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<()> {
        self.peripheral
            .subscribe(characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Subscribed to {}", short_uuid(&characteristic.uuid));

        Ok(())
    }

    async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<()> {
        self.peripheral
            .unsubscribe(characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Unsubscribed from {}", short_uuid(&characteristic.uuid));

        Ok(())
    }
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        self.stop_notification_pump();
    }
}
