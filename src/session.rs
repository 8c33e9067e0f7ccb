//! Connection session state machine.
//!
//! Owns the lifecycle of one peripheral connection: scan, match,
//! connect, discover, subscribe, and teardown. All state lives in a
//! [`Session`] instance and is only ever mutated on the dispatcher
//! task, so transitions are serialized with the events that cause
//! them.

use std::collections::HashMap;
use std::sync::Arc;

use btleplug::api::Characteristic;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::advertising::Advertisement;
use crate::ble::filter::TargetFilter;
use crate::ble::gatt::GattLink;
use crate::ble::scanner::Radio;
use crate::ble::uuids::short_uuid;
use crate::config::ClientConfig;
use crate::data::decoder::{KeyStateDecoder, NotificationDecoder};
use crate::data::keys::KeyState;
use crate::dispatcher::{Event, EventSender};
use crate::error::{Error, Result};
use crate::registry::SubscriptionRegistry;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    /// Not scanning and not connected.
    #[default]
    Idle,
    /// Scanning for a matching peripheral.
    Scanning,
    /// Radio-level connect in progress.
    Connecting,
    /// Connected, discovering the configured service.
    DiscoveringServices,
    /// Connected with subscriptions active.
    Ready,
    /// The connection dropped. Terminal unless auto-reconnect is
    /// configured, in which case scanning resumes after the backoff.
    Disconnected,
}

impl LinkState {
    /// Check if the connection is ready for subscriptions.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if the session is doing anything (scanning or holding a
    /// connection in any stage).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Scanning | Self::Connecting | Self::DiscoveringServices | Self::Ready
        )
    }

    /// Check if a peripheral link exists in this state.
    pub fn has_link(&self) -> bool {
        matches!(self, Self::Connecting | Self::DiscoveringServices | Self::Ready)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::DiscoveringServices => write!(f, "DiscoveringServices"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Event published to observers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A connection reached the ready state.
    Connected {
        /// Identifier of the connected peripheral.
        peripheral: String,
    },
    /// The connection was torn down, locally or by the peer.
    Disconnected {
        /// Identifier of the peripheral that was connected.
        peripheral: String,
    },
    /// Notifications are flowing for a characteristic.
    Subscribed {
        /// The subscribed characteristic.
        characteristic: Uuid,
    },
    /// A notification decoded into a key state.
    Keys {
        /// The characteristic that produced the notification.
        characteristic: Uuid,
        /// The decoded key state.
        keys: KeyState,
    },
    /// An error was surfaced. Transient faults may be followed by a
    /// reconnect; structural ones are terminal.
    Fault(Arc<Error>),
}

/// State mirrored out of the dispatcher task for synchronous access.
pub(crate) struct SharedState {
    pub(crate) state: RwLock<LinkState>,
    pub(crate) last_keys: RwLock<Option<KeyState>>,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(LinkState::Idle),
            last_keys: RwLock::new(None),
        }
    }
}

/// The connection manager. Lives on the dispatcher task.
pub(crate) struct Session {
    config: Arc<ClientConfig>,
    filter: TargetFilter,
    radio: Arc<dyn Radio>,
    events: EventSender,
    observers: broadcast::Sender<ClientEvent>,
    shared: Arc<SharedState>,
    state: LinkState,
    /// The single live link. At most one exists at any time.
    link: Option<Arc<dyn GattLink>>,
    /// Characteristic handles granted by discovery, kept for
    /// unsubscribe on graceful teardown.
    granted: Vec<Characteristic>,
    registry: SubscriptionRegistry,
    decoders: HashMap<Uuid, Arc<dyn NotificationDecoder>>,
    /// Stamp for in-flight completions; a mismatch means the attempt
    /// was superseded and its result must be ignored.
    generation: u64,
}

impl Session {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        radio: Arc<dyn Radio>,
        events: EventSender,
        observers: broadcast::Sender<ClientEvent>,
        shared: Arc<SharedState>,
    ) -> Self {
        let filter = TargetFilter::from_config(&config);

        let decoders = config
            .characteristics
            .iter()
            .map(|uuid| {
                (
                    *uuid,
                    Arc::new(KeyStateDecoder) as Arc<dyn NotificationDecoder>,
                )
            })
            .collect();

        Self {
            config,
            filter,
            radio,
            events,
            observers,
            shared,
            state: LinkState::Idle,
            link: None,
            granted: Vec::new(),
            registry: SubscriptionRegistry::new(),
            decoders,
            generation: 0,
        }
    }

    /// Process one queue entry. The dispatcher loop is the only caller
    /// in production; tests drive this directly.
    pub(crate) async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Start { ack } => {
                let _ = ack.send(self.start().await);
            }
            Event::Stop { ack } => {
                let _ = ack.send(self.stop().await);
            }
            Event::AdapterPowered(powered) => self.on_adapter_powered(powered).await,
            Event::Discovered {
                link,
                advertisement,
            } => self.on_discovered(link, advertisement).await,
            Event::ConnectFinished { generation, result } => {
                self.on_connect_finished(generation, result).await
            }
            Event::DiscoveryFinished { generation, result } => {
                self.on_discovery_finished(generation, result).await
            }
            Event::SubscribeFinished {
                generation,
                characteristic,
                result,
            } => self.on_subscribe_finished(generation, characteristic, result),
            Event::Notification {
                characteristic,
                payload,
            } => self.on_notification(characteristic, payload),
            Event::PeerDisconnected { address } => self.on_peer_disconnected(address).await,
            Event::ReconnectDue { generation } => self.on_reconnect_due(generation).await,
            Event::SetDecoder {
                characteristic,
                decoder,
            } => {
                debug!("Decoder installed for {}", short_uuid(&characteristic));
                self.decoders.insert(characteristic, decoder);
            }
            Event::Shutdown => {}
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        if let Err(e) = self.stop().await {
            debug!("Error during shutdown: {}", e);
        }
    }

    async fn start(&mut self) -> Result<()> {
        match self.state {
            LinkState::Idle | LinkState::Disconnected => {
                if !self.filter.has_target() {
                    warn!(
                        "No target name configured; discoveries will be reported but never connected"
                    );
                }

                self.radio.start_scan().await?;
                self.set_state(LinkState::Scanning);
                Ok(())
            }
            _ => {
                debug!("Start requested while {}, ignoring", self.state);
                Ok(())
            }
        }
    }

    /// Cancel scanning or the live connection. Idempotent: stopping an
    /// idle session is a no-op, not an error.
    async fn stop(&mut self) -> Result<()> {
        // Invalidate in-flight completions and pending timers.
        self.generation += 1;

        match self.state {
            LinkState::Idle => Ok(()),
            LinkState::Disconnected => {
                self.set_state(LinkState::Idle);
                Ok(())
            }
            LinkState::Scanning => {
                let result = self.radio.stop_scan().await;
                self.set_state(LinkState::Idle);
                result
            }
            LinkState::Connecting | LinkState::DiscoveringServices | LinkState::Ready => {
                if let Some(peripheral) = self.teardown_link() {
                    self.emit(ClientEvent::Disconnected { peripheral });
                }
                self.set_state(LinkState::Idle);
                Ok(())
            }
        }
    }

    async fn on_adapter_powered(&mut self, powered: bool) {
        if powered {
            info!("Bluetooth is on");
            if self.state == LinkState::Scanning && !self.radio.is_scanning() {
                // Resume after a power cycle.
                if let Err(e) = self.radio.start_scan().await {
                    self.emit_fault(e);
                }
            }
        } else {
            warn!("Bluetooth is off");
            if self.state == LinkState::Scanning {
                let _ = self.radio.stop_scan().await;
                info!("Scan suspended until the adapter powers back on");
            }
        }
    }

    async fn on_discovered(&mut self, link: Arc<dyn GattLink>, advertisement: Advertisement) {
        if self.state != LinkState::Scanning {
            trace!(
                "Ignoring discovery of '{}' while {}",
                advertisement.display_name(),
                self.state
            );
            return;
        }

        if !self.filter.matches(&advertisement) {
            debug!(
                "Skipping '{}' {} (rssi {:?})",
                advertisement.display_name(),
                link.address(),
                advertisement.rssi
            );
            return;
        }

        info!(
            "Connecting to '{}' {}",
            advertisement.display_name(),
            link.address()
        );

        if let Err(e) = self.radio.stop_scan().await {
            warn!("Failed to stop scan before connecting: {}", e);
        }

        self.generation += 1;
        let generation = self.generation;
        self.link = Some(link.clone());
        self.set_state(LinkState::Connecting);

        let events = self.events.clone();
        tokio::spawn(async move {
            let result = link.open().await;
            let _ = events.send(Event::ConnectFinished { generation, result });
        });
    }

    async fn on_connect_finished(&mut self, generation: u64, result: Result<()>) {
        if generation != self.generation || self.state != LinkState::Connecting {
            debug!("Ignoring stale connect result");
            return;
        }

        match result {
            Ok(()) => {
                let Some(link) = self.link.clone() else {
                    self.emit_fault(Error::Internal("connect finished without a link".to_string()));
                    return;
                };

                info!("Connected to {}, discovering services", link.address());
                self.set_state(LinkState::DiscoveringServices);

                let service = self.config.service;
                let events = self.events.clone();
                tokio::spawn(async move {
                    let result = link.discover(service).await;
                    let _ = events.send(Event::DiscoveryFinished { generation, result });
                });
            }
            Err(e) => {
                self.emit_fault(Error::ConnectFailed {
                    reason: e.to_string(),
                });
                self.teardown_link();

                if self.config.auto_reconnect {
                    info!("Retrying scan after failed connect");
                    match self.radio.start_scan().await {
                        Ok(()) => self.set_state(LinkState::Scanning),
                        Err(e) => {
                            self.emit_fault(e);
                            self.set_state(LinkState::Idle);
                        }
                    }
                } else {
                    self.set_state(LinkState::Idle);
                }
            }
        }
    }

    async fn on_discovery_finished(
        &mut self,
        generation: u64,
        result: Result<Vec<Characteristic>>,
    ) {
        if generation != self.generation || self.state != LinkState::DiscoveringServices {
            debug!("Ignoring stale discovery result");
            return;
        }

        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => {
                let fault = match e {
                    Error::DiscoveryFailed { .. } => e,
                    other => Error::DiscoveryFailed {
                        context: other.to_string(),
                    },
                };
                self.fail_discovery(fault);
                return;
            }
        };

        let mut granted = Vec::new();
        for wanted in &self.config.characteristics {
            match characteristics.iter().find(|c| c.uuid == *wanted) {
                Some(found) => granted.push(found.clone()),
                None => {
                    self.fail_discovery(Error::DiscoveryFailed {
                        context: format!(
                            "characteristic {} absent from service {}",
                            short_uuid(wanted),
                            short_uuid(&self.config.service)
                        ),
                    });
                    return;
                }
            }
        }

        let Some(link) = self.link.clone() else {
            self.emit_fault(Error::Internal(
                "discovery finished without a link".to_string(),
            ));
            return;
        };

        self.set_state(LinkState::Ready);
        self.emit(ClientEvent::Connected {
            peripheral: link.address(),
        });

        // Hand the discovered handles to the registry, then enable
        // notifications at the radio level.
        for characteristic in &granted {
            let decoder = self
                .decoders
                .get(&characteristic.uuid)
                .cloned()
                .unwrap_or_else(|| Arc::new(KeyStateDecoder));

            if let Err(e) = self
                .registry
                .subscribe(self.state, characteristic.uuid, decoder)
            {
                self.emit_fault(e);
                continue;
            }

            let link = link.clone();
            let events = self.events.clone();
            let characteristic = characteristic.clone();
            tokio::spawn(async move {
                let result = link.subscribe(&characteristic).await;
                let _ = events.send(Event::SubscribeFinished {
                    generation,
                    characteristic: characteristic.uuid,
                    result,
                });
            });
        }

        self.granted = granted;
    }

    /// Structural failure: surfaced, never retried. Terminal even with
    /// auto-reconnect, since the configured identifiers will not
    /// change on their own.
    fn fail_discovery(&mut self, fault: Error) {
        self.emit_fault(fault);

        if let Some(peripheral) = self.teardown_link() {
            self.emit(ClientEvent::Disconnected { peripheral });
        }

        self.generation += 1;
        self.set_state(LinkState::Disconnected);
    }

    fn on_subscribe_finished(&mut self, generation: u64, characteristic: Uuid, result: Result<()>) {
        if generation != self.generation || self.state != LinkState::Ready {
            debug!("Ignoring stale subscribe result");
            return;
        }

        match result {
            Ok(()) => {
                info!("Subscribed to {} notifications", short_uuid(&characteristic));
                self.emit(ClientEvent::Subscribed { characteristic });
            }
            Err(e) => {
                self.registry.remove(&characteristic);
                self.granted.retain(|c| c.uuid != characteristic);
                self.emit_fault(Error::SubscribeFailed {
                    characteristic,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn on_notification(&mut self, characteristic: Uuid, payload: Bytes) {
        if self.state != LinkState::Ready {
            self.registry
                .note_dropped(&characteristic, "connection not ready");
            return;
        }

        match self.registry.dispatch(&characteristic, &payload) {
            Some(Ok(keys)) => {
                debug!("{}: {}", short_uuid(&characteristic), keys);
                *self.shared.last_keys.write() = Some(keys);
                self.emit(ClientEvent::Keys {
                    characteristic,
                    keys,
                });
            }
            Some(Err(e)) => self.emit_fault(e),
            None => {}
        }
    }

    async fn on_peer_disconnected(&mut self, address: String) {
        let ours = self
            .link
            .as_ref()
            .map(|link| link.address() == address)
            .unwrap_or(false);

        if !ours || !self.state.has_link() {
            trace!("Disconnect from unrelated peripheral {}", address);
            return;
        }

        warn!("Peripheral {} disconnected", address);

        let cleared = self.registry.clear();
        if cleared > 0 {
            debug!("Cleared {} subscriptions for {}", cleared, address);
        }
        self.granted.clear();
        self.link = None;
        self.generation += 1;

        self.emit_fault(Error::UnexpectedDisconnect {
            peripheral: address.clone(),
        });
        self.emit(ClientEvent::Disconnected {
            peripheral: address,
        });
        self.set_state(LinkState::Disconnected);

        if self.config.auto_reconnect {
            let generation = self.generation;
            let backoff = self.config.reconnect_backoff;
            let events = self.events.clone();

            info!("Reconnect scan in {:?}", backoff);
            tokio::spawn(async move {
                tokio::time::sleep(backoff).await;
                let _ = events.send(Event::ReconnectDue { generation });
            });
        }
    }

    async fn on_reconnect_due(&mut self, generation: u64) {
        if generation != self.generation || self.state != LinkState::Disconnected {
            debug!("Ignoring stale reconnect timer");
            return;
        }

        match self.radio.start_scan().await {
            Ok(()) => {
                info!("Rescanning after disconnect");
                self.set_state(LinkState::Scanning);
            }
            Err(e) => {
                self.emit_fault(e);

                // Keep trying; the adapter may come back.
                let backoff = self.config.reconnect_backoff;
                let events = self.events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(backoff).await;
                    let _ = events.send(Event::ReconnectDue { generation });
                });
            }
        }
    }

    /// Drop the live link, clearing all subscriptions first. The
    /// radio-level unsubscribe and disconnect run off the dispatcher
    /// task. Returns the peripheral address if a link existed.
    fn teardown_link(&mut self) -> Option<String> {
        let link = self.link.take()?;
        let address = link.address();

        let cleared = self.registry.clear();
        if cleared > 0 {
            debug!("Cleared {} subscriptions for {}", cleared, address);
        }

        let granted = std::mem::take(&mut self.granted);
        tokio::spawn(async move {
            for characteristic in &granted {
                let _ = link.unsubscribe(characteristic).await;
            }
            if let Err(e) = link.close().await {
                debug!("Error closing link: {}", e);
            }
        });

        Some(address)
    }

    fn set_state(&mut self, new_state: LinkState) {
        if self.state != new_state {
            debug!("Link state changed: {} -> {}", self.state, new_state);
            self.state = new_state;
            *self.shared.state.write() = new_state;
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.observers.send(event);
    }

    fn emit_fault(&self, error: Error) {
        warn!("{}", error);
        let _ = self.observers.send(ClientEvent::Fault(Arc::new(error)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::MockGattLink;
    use crate::ble::scanner::testing::StubRadio;
    use crate::ble::uuids::{KEY_STATE_CHARACTERISTIC_UUID, SIMPLE_KEY_SERVICE_UUID};
    use crate::data::keys::KeyFlag;
    use btleplug::api::CharPropFlags;
    use std::collections::BTreeSet;
    use tokio::sync::{mpsc, oneshot};

    struct Harness {
        session: Session,
        queue: mpsc::UnboundedReceiver<Event>,
        observer: broadcast::Receiver<ClientEvent>,
        shared: Arc<SharedState>,
        radio: Arc<StubRadio>,
    }

    fn harness(config: ClientConfig) -> Harness {
        let (events, queue) = mpsc::unbounded_channel();
        let (observers, observer) = broadcast::channel(64);
        let shared = Arc::new(SharedState::new());
        let radio = Arc::new(StubRadio::default());

        let session = Session::new(
            Arc::new(config),
            radio.clone(),
            events,
            observers,
            shared.clone(),
        );

        Harness {
            session,
            queue,
            observer,
            shared,
            radio,
        }
    }

    fn key_state_characteristic() -> Characteristic {
        Characteristic {
            uuid: KEY_STATE_CHARACTERISTIC_UUID,
            service_uuid: SIMPLE_KEY_SERVICE_UUID,
            properties: CharPropFlags::NOTIFY,
            descriptors: BTreeSet::new(),
        }
    }

    fn working_link(address: &str) -> Arc<MockGattLink> {
        let characteristics = vec![key_state_characteristic()];

        let mut link = MockGattLink::new();
        link.expect_address().return_const(address.to_string());
        link.expect_open().returning(|| Ok(()));
        link.expect_discover()
            .returning(move |_| Ok(characteristics.clone()));
        link.expect_subscribe().returning(|_| Ok(()));
        link.expect_unsubscribe().returning(|_| Ok(()));
        link.expect_close().returning(|| Ok(()));
        Arc::new(link)
    }

    fn sensor_tag_advertisement() -> Advertisement {
        Advertisement {
            local_name: Some("SensorTag".to_string()),
            services: vec![SIMPLE_KEY_SERVICE_UUID],
            rssi: Some(-55),
        }
    }

    async fn start(h: &mut Harness) {
        let (ack, ack_rx) = oneshot::channel();
        h.session.handle_event(Event::Start { ack }).await;
        ack_rx.await.unwrap().unwrap();
    }

    async fn stop(h: &mut Harness) -> Result<()> {
        let (ack, ack_rx) = oneshot::channel();
        h.session.handle_event(Event::Stop { ack }).await;
        ack_rx.await.unwrap()
    }

    /// Pull the next queued event (typically a spawned completion) and
    /// feed it back through the session, as the dispatcher loop would.
    async fn step(h: &mut Harness) {
        let event = h.queue.recv().await.expect("queue closed");
        h.session.handle_event(event).await;
    }

    async fn drive_to_ready(h: &mut Harness, link: Arc<MockGattLink>) {
        start(h).await;
        h.session
            .handle_event(Event::Discovered {
                link,
                advertisement: sensor_tag_advertisement(),
            })
            .await;
        step(h).await; // ConnectFinished
        step(h).await; // DiscoveryFinished
        step(h).await; // SubscribeFinished
        assert_eq!(h.session.state, LinkState::Ready);
    }

    fn drain(observer: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = observer.try_recv() {
            events.push(event);
        }
        events
    }

    async fn notify(h: &mut Harness, byte: u8) {
        h.session
            .handle_event(Event::Notification {
                characteristic: KEY_STATE_CHARACTERISTIC_UUID,
                payload: Bytes::copy_from_slice(&[byte]),
            })
            .await;
    }

    fn last_keys_event(events: &[ClientEvent]) -> Option<KeyState> {
        events.iter().rev().find_map(|event| match event {
            ClientEvent::Keys { keys, .. } => Some(*keys),
            _ => None,
        })
    }

    #[tokio::test]
    async fn full_session_delivers_decoded_keys() {
        let mut h = harness(ClientConfig::for_device("SensorTag"));

        drive_to_ready(&mut h, working_link("aa:bb:cc")).await;

        let events = drain(&mut h.observer);
        assert!(events
            .iter()
            .any(|e| matches!(e, ClientEvent::Connected { peripheral } if peripheral == "aa:bb:cc")));
        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::Subscribed { characteristic } if *characteristic == KEY_STATE_CHARACTERISTIC_UUID
        )));

        notify(&mut h, 0x01).await;
        let events = drain(&mut h.observer);
        let keys = last_keys_event(&events).unwrap();
        assert!(keys.contains(KeyFlag::LeftButton));
        assert_eq!(keys.len(), 1);
        assert_eq!(*h.shared.last_keys.read(), Some(keys));
    }

    #[tokio::test]
    async fn notification_bytes_decode_per_bit_table() {
        let mut h = harness(ClientConfig::for_device("SensorTag"));
        drive_to_ready(&mut h, working_link("aa:bb:cc")).await;
        drain(&mut h.observer);

        notify(&mut h, 0x03).await;
        let keys = last_keys_event(&drain(&mut h.observer)).unwrap();
        assert!(keys.contains(KeyFlag::LeftButton));
        assert!(keys.contains(KeyFlag::RightButton));
        assert_eq!(keys.len(), 2);

        notify(&mut h, 0x04).await;
        let keys = last_keys_event(&drain(&mut h.observer)).unwrap();
        assert!(keys.contains(KeyFlag::ReedSwitch));
        assert_eq!(keys.len(), 1);

        // Zero decodes to the empty set and is still an event -
        // distinct from receiving nothing at all.
        notify(&mut h, 0x00).await;
        let keys = last_keys_event(&drain(&mut h.observer)).unwrap();
        assert!(keys.is_empty());
        assert_eq!(*h.shared.last_keys.read(), Some(KeyState::EMPTY));
    }

    #[tokio::test]
    async fn no_target_name_never_connects() {
        let mut h = harness(ClientConfig::default());

        start(&mut h).await;
        h.session
            .handle_event(Event::Discovered {
                link: working_link("aa:bb:cc"),
                advertisement: sensor_tag_advertisement(),
            })
            .await;

        assert_eq!(h.session.state, LinkState::Scanning);
        assert!(h.session.link.is_none());
    }

    #[tokio::test]
    async fn second_discovery_while_connected_is_ignored() {
        let mut h = harness(ClientConfig::for_device("SensorTag"));
        drive_to_ready(&mut h, working_link("aa:bb:cc")).await;

        h.session
            .handle_event(Event::Discovered {
                link: working_link("dd:ee:ff"),
                advertisement: sensor_tag_advertisement(),
            })
            .await;

        assert_eq!(h.session.state, LinkState::Ready);
        assert_eq!(h.session.link.as_ref().unwrap().address(), "aa:bb:cc");
        // No connect attempt was spawned for the second peripheral.
        assert!(h.queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn connect_failure_is_surfaced_and_gives_up_without_reconnect() {
        let mut h = harness(ClientConfig::for_device("SensorTag"));

        let mut link = MockGattLink::new();
        link.expect_address().return_const("aa:bb:cc".to_string());
        link.expect_open()
            .returning(|| Err(Error::Bluetooth(btleplug::Error::NotConnected)));
        link.expect_unsubscribe().returning(|_| Ok(()));
        link.expect_close().returning(|| Ok(()));

        start(&mut h).await;
        h.session
            .handle_event(Event::Discovered {
                link: Arc::new(link),
                advertisement: sensor_tag_advertisement(),
            })
            .await;
        step(&mut h).await; // ConnectFinished(Err)

        assert_eq!(h.session.state, LinkState::Idle);
        let events = drain(&mut h.observer);
        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::Fault(err) if matches!(**err, Error::ConnectFailed { .. })
        )));
    }

    #[tokio::test]
    async fn connect_failure_retries_scan_when_reconnect_configured() {
        let mut config = ClientConfig::for_device("SensorTag");
        config.auto_reconnect = true;
        let mut h = harness(config);

        let mut link = MockGattLink::new();
        link.expect_address().return_const("aa:bb:cc".to_string());
        link.expect_open()
            .returning(|| Err(Error::Bluetooth(btleplug::Error::NotConnected)));
        link.expect_unsubscribe().returning(|_| Ok(()));
        link.expect_close().returning(|| Ok(()));

        start(&mut h).await;
        h.session
            .handle_event(Event::Discovered {
                link: Arc::new(link),
                advertisement: sensor_tag_advertisement(),
            })
            .await;
        step(&mut h).await; // ConnectFinished(Err)

        assert_eq!(h.session.state, LinkState::Scanning);
        assert!(h.radio.is_scanning());
    }

    #[tokio::test]
    async fn missing_characteristic_fails_discovery_terminally() {
        let mut config = ClientConfig::for_device("SensorTag");
        config.auto_reconnect = true; // must NOT rescue a structural failure
        let mut h = harness(config);

        // Service exists but only carries an unrelated characteristic.
        let stray = Characteristic {
            uuid: SIMPLE_KEY_SERVICE_UUID,
            service_uuid: SIMPLE_KEY_SERVICE_UUID,
            properties: CharPropFlags::READ,
            descriptors: BTreeSet::new(),
        };

        let mut link = MockGattLink::new();
        link.expect_address().return_const("aa:bb:cc".to_string());
        link.expect_open().returning(|| Ok(()));
        link.expect_discover().returning(move |_| Ok(vec![stray.clone()]));
        link.expect_unsubscribe().returning(|_| Ok(()));
        link.expect_close().returning(|| Ok(()));

        start(&mut h).await;
        h.session
            .handle_event(Event::Discovered {
                link: Arc::new(link),
                advertisement: sensor_tag_advertisement(),
            })
            .await;
        step(&mut h).await; // ConnectFinished
        step(&mut h).await; // DiscoveryFinished

        assert_eq!(h.session.state, LinkState::Disconnected);
        let events = drain(&mut h.observer);
        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::Fault(err) if matches!(**err, Error::DiscoveryFailed { .. })
        )));

        // Structural failure schedules no reconnect timer.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(h.queue.try_recv().is_err());
        assert_eq!(h.session.state, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn peer_disconnect_clears_subscriptions_and_is_terminal_by_default() {
        let mut h = harness(ClientConfig::for_device("SensorTag"));
        drive_to_ready(&mut h, working_link("aa:bb:cc")).await;
        assert_eq!(h.session.registry.len(), 1);
        drain(&mut h.observer);

        h.session
            .handle_event(Event::PeerDisconnected {
                address: "aa:bb:cc".to_string(),
            })
            .await;

        assert_eq!(h.session.state, LinkState::Disconnected);
        assert!(h.session.registry.is_empty());
        assert!(h.session.link.is_none());

        let events = drain(&mut h.observer);
        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::Fault(err) if matches!(**err, Error::UnexpectedDisconnect { .. })
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, ClientEvent::Disconnected { .. })));

        // Terminal: no reconnect timer, and later discoveries are not
        // consumed.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(h.queue.try_recv().is_err());

        h.session
            .handle_event(Event::Discovered {
                link: working_link("dd:ee:ff"),
                advertisement: sensor_tag_advertisement(),
            })
            .await;
        assert_eq!(h.session.state, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn peer_disconnect_reschedules_scan_when_reconnect_configured() {
        let mut config = ClientConfig::for_device("SensorTag");
        config.auto_reconnect = true;
        config.reconnect_backoff = std::time::Duration::from_millis(10);
        let mut h = harness(config);

        drive_to_ready(&mut h, working_link("aa:bb:cc")).await;

        h.session
            .handle_event(Event::PeerDisconnected {
                address: "aa:bb:cc".to_string(),
            })
            .await;
        assert_eq!(h.session.state, LinkState::Disconnected);

        // The backoff timer re-enters the queue and resumes scanning.
        step(&mut h).await; // ReconnectDue
        assert_eq!(h.session.state, LinkState::Scanning);
        assert!(h.radio.is_scanning());
    }

    #[tokio::test]
    async fn unrelated_peer_disconnect_is_ignored() {
        let mut h = harness(ClientConfig::for_device("SensorTag"));
        drive_to_ready(&mut h, working_link("aa:bb:cc")).await;

        h.session
            .handle_event(Event::PeerDisconnected {
                address: "11:22:33".to_string(),
            })
            .await;

        assert_eq!(h.session.state, LinkState::Ready);
        assert_eq!(h.session.registry.len(), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_cancels_inflight_connect() {
        let mut h = harness(ClientConfig::for_device("SensorTag"));

        // Stopping an idle session is a no-op.
        stop(&mut h).await.unwrap();
        assert_eq!(h.session.state, LinkState::Idle);

        start(&mut h).await;
        h.session
            .handle_event(Event::Discovered {
                link: working_link("aa:bb:cc"),
                advertisement: sensor_tag_advertisement(),
            })
            .await;
        assert_eq!(h.session.state, LinkState::Connecting);

        stop(&mut h).await.unwrap();
        assert_eq!(h.session.state, LinkState::Idle);

        // The in-flight connect completion is stale and changes
        // nothing.
        step(&mut h).await;
        assert_eq!(h.session.state, LinkState::Idle);

        // Stopping again is still fine.
        stop(&mut h).await.unwrap();
    }

    #[tokio::test]
    async fn notification_outside_ready_is_counted_dropped() {
        let mut h = harness(ClientConfig::for_device("SensorTag"));
        start(&mut h).await;

        notify(&mut h, 0x01).await;

        assert_eq!(h.session.registry.dropped_count(), 1);
        assert!(h.shared.last_keys.read().is_none());
        assert!(last_keys_event(&drain(&mut h.observer)).is_none());
    }

    #[tokio::test]
    async fn empty_notification_payload_is_a_fault() {
        let mut h = harness(ClientConfig::for_device("SensorTag"));
        drive_to_ready(&mut h, working_link("aa:bb:cc")).await;
        drain(&mut h.observer);

        h.session
            .handle_event(Event::Notification {
                characteristic: KEY_STATE_CHARACTERISTIC_UUID,
                payload: Bytes::new(),
            })
            .await;

        let events = drain(&mut h.observer);
        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::Fault(err) if matches!(**err, Error::InvalidData { .. })
        )));
        assert!(h.shared.last_keys.read().is_none());
    }

    #[tokio::test]
    async fn custom_decoder_takes_effect_on_next_session() {
        struct ReedOnly;
        impl NotificationDecoder for ReedOnly {
            fn decode(&self, _payload: &[u8]) -> Result<KeyState> {
                Ok(KeyState::from_byte(0x04))
            }
        }

        let mut h = harness(ClientConfig::for_device("SensorTag"));
        h.session
            .handle_event(Event::SetDecoder {
                characteristic: KEY_STATE_CHARACTERISTIC_UUID,
                decoder: Arc::new(ReedOnly),
            })
            .await;

        drive_to_ready(&mut h, working_link("aa:bb:cc")).await;
        drain(&mut h.observer);

        notify(&mut h, 0x01).await;
        let keys = last_keys_event(&drain(&mut h.observer)).unwrap();
        assert!(keys.contains(KeyFlag::ReedSwitch));
        assert!(!keys.contains(KeyFlag::LeftButton));
    }
}
