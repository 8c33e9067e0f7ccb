//! Client facade for Simple Key peripherals.
//!
//! Wires the scanner, the event dispatcher, and the session together
//! and exposes the public surface: start/stop, observer subscriptions,
//! and synchronous state accessors.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::ble::scanner::{BleScanner, Radio};
use crate::config::ClientConfig;
use crate::data::decoder::NotificationDecoder;
use crate::data::keys::KeyState;
use crate::dispatcher::{self, Event, EventSender};
use crate::error::{Error, Result};
use crate::session::{ClientEvent, LinkState, Session, SharedState};

/// Callback handle for unregistering callbacks.
///
/// Dropping the handle unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Client for one Simple Key peripheral.
///
/// Scans for the configured target, connects, subscribes to its key
/// state notifications, and publishes decoded [`KeyState`] values to
/// observers.
pub struct KeyClient {
    config: Arc<ClientConfig>,
    events: EventSender,
    observers: broadcast::Sender<ClientEvent>,
    shared: Arc<SharedState>,
    dispatcher: RwLock<Option<JoinHandle<()>>>,
    callback_counter: AtomicU64,
}

impl KeyClient {
    /// Create a new client using the first available Bluetooth
    /// adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let (events, queue) = mpsc::unbounded_channel();
        let scanner = BleScanner::new(events.clone(), config.target_services.clone()).await?;
        Ok(Self::assemble(Arc::new(scanner), config, events, queue))
    }

    /// Assemble a client over an already-built radio. Used by tests to
    /// run without hardware.
    #[cfg(test)]
    pub(crate) fn with_radio(radio: Arc<dyn Radio>, config: ClientConfig) -> Self {
        let (events, queue) = mpsc::unbounded_channel();
        Self::assemble(radio, config, events, queue)
    }

    fn assemble(
        radio: Arc<dyn Radio>,
        config: ClientConfig,
        events: EventSender,
        queue: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        let config = Arc::new(config);
        let (observers, _) = broadcast::channel(64);
        let shared = Arc::new(SharedState::new());

        let session = Session::new(
            config.clone(),
            radio,
            events.clone(),
            observers.clone(),
            shared.clone(),
        );

        let handle = tokio::spawn(dispatcher::run(session, queue));

        Self {
            config,
            events,
            observers,
            shared,
            dispatcher: RwLock::new(Some(handle)),
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Begin scanning for the configured target. Idempotent.
    pub async fn start(&self) -> Result<()> {
        self.command(|ack| Event::Start { ack }).await
    }

    /// Cancel scanning or the live connection. Idempotent: stopping an
    /// idle client is a no-op.
    pub async fn stop(&self) -> Result<()> {
        self.command(|ack| Event::Stop { ack }).await
    }

    async fn command(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<()>>) -> Event,
    ) -> Result<()> {
        let (ack, ack_rx) = oneshot::channel();

        self.events
            .send(make(ack))
            .map_err(|_| Error::Internal("event dispatcher is not running".to_string()))?;

        ack_rx
            .await
            .map_err(|_| Error::Internal("event dispatcher dropped the request".to_string()))?
    }

    /// Get the current connection state.
    pub fn state(&self) -> LinkState {
        *self.shared.state.read()
    }

    /// Check whether the client is scanning or connected.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// The most recently decoded key state, or `None` if no
    /// notification has been decoded yet. An all-released notification
    /// yields `Some(KeyState::EMPTY)`, not `None`.
    pub fn last_keys(&self) -> Option<KeyState> {
        *self.shared.last_keys.read()
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Subscribe to client events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.observers.subscribe()
    }

    /// Install a decoder for a characteristic. Takes effect when the
    /// characteristic is next subscribed.
    pub fn set_decoder(&self, characteristic: Uuid, decoder: Arc<dyn NotificationDecoder>) {
        let _ = self.events.send(Event::SetDecoder {
            characteristic,
            decoder,
        });
    }

    /// Register a callback for every client event.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(ClientEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.observers.subscribe();

        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                callback(event);
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Register a callback for decoded key states.
    pub fn on_keys<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(Uuid, KeyState) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.observers.subscribe();

        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let ClientEvent::Keys {
                    characteristic,
                    keys,
                } = event
                {
                    callback(characteristic, keys);
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Clean shutdown: disconnect, stop scanning, and end the
    /// dispatcher task.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down client");

        let _ = self.stop().await;
        let _ = self.events.send(Event::Shutdown);

        let handle = self.dispatcher.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        Ok(())
    }
}

impl Drop for KeyClient {
    fn drop(&mut self) {
        let _ = self.events.send(Event::Shutdown);
    }
}
