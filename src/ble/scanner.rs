//! BLE scanning functionality.
//!
//! Acquires the platform adapter, controls radio-level scanning, and
//! pumps central events (power state, discoveries, peer disconnects)
//! into the dispatcher queue.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::advertising::Advertisement;
use crate::ble::gatt::BtleLink;
use crate::dispatcher::{Event, EventSender};
use crate::error::{Error, Result};

/// Radio scan control used by the session.
#[async_trait]
pub(crate) trait Radio: Send + Sync + 'static {
    /// Begin radio-level scanning. Idempotent.
    async fn start_scan(&self) -> Result<()>;

    /// Stop radio-level scanning. Idempotent.
    async fn stop_scan(&self) -> Result<()>;

    /// Check if currently scanning.
    fn is_scanning(&self) -> bool;
}

/// btleplug-backed scanner and central event pump.
pub(crate) struct BleScanner {
    adapter: Adapter,
    scan_filter: ScanFilter,
    is_scanning: RwLock<bool>,
    pump: RwLock<Option<JoinHandle<()>>>,
}

impl BleScanner {
    /// Acquire the first available Bluetooth adapter and start pumping
    /// central events into the dispatcher queue.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub(crate) async fn new(events: EventSender, services: Vec<Uuid>) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        let scanner = Self {
            adapter,
            scan_filter: ScanFilter { services },
            is_scanning: RwLock::new(false),
            pump: RwLock::new(None),
        };

        scanner.spawn_pump(events).await?;

        Ok(scanner)
    }

    /// Translate central events for the dispatcher. Runs for the
    /// client's lifetime, not only while scanning — peer disconnects
    /// must reach the dispatcher after scanning has stopped.
    async fn spawn_pump(&self, events: EventSender) -> Result<()> {
        let mut central_events = self.adapter.events().await.map_err(Error::Bluetooth)?;
        let adapter = self.adapter.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                Self::handle_central_event(event, &adapter, &events).await;
            }

            debug!("Central event pump ended");
        });

        *self.pump.write() = Some(handle);

        Ok(())
    }

    async fn handle_central_event(event: CentralEvent, adapter: &Adapter, events: &EventSender) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                trace!("Device seen: {:?}", id);
                Self::process_peripheral(adapter, id, events).await;
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                let _ = events.send(Event::PeerDisconnected {
                    address: id.to_string(),
                });
            }
            CentralEvent::StateUpdate(state) => {
                debug!("Adapter state: {:?}", state);
                match state {
                    CentralState::PoweredOn => {
                        let _ = events.send(Event::AdapterPowered(true));
                    }
                    CentralState::PoweredOff => {
                        let _ = events.send(Event::AdapterPowered(false));
                    }
                    _ => {}
                }
            }
            CentralEvent::ManufacturerDataAdvertisement { .. } => {}
            CentralEvent::ServiceDataAdvertisement { .. } => {}
            CentralEvent::ServicesAdvertisement { .. } => {}
        }
    }

    /// Snapshot a discovered peripheral's advertisement and hand it to
    /// the dispatcher together with a GATT link for it.
    async fn process_peripheral(adapter: &Adapter, id: PeripheralId, events: &EventSender) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        let advertisement = Advertisement::from(&properties);
        let link = Arc::new(BtleLink::new(peripheral, events.clone()));

        let _ = events.send(Event::Discovered {
            link,
            advertisement,
        });
    }
}

#[async_trait]
impl Radio for BleScanner {
    async fn start_scan(&self) -> Result<()> {
        if *self.is_scanning.read() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        self.adapter
            .start_scan(self.scan_filter.clone())
            .await
            .map_err(Error::Bluetooth)?;

        *self.is_scanning.write() = true;

        info!("Radio scan started");

        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        if !*self.is_scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        *self.is_scanning.write() = false;

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)?;

        info!("Radio scan stopped");

        Ok(())
    }

    fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.write().take() {
            handle.abort();
        }
    }
}
