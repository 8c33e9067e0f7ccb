//! Event dispatcher.
//!
//! Everything that can happen — radio power changes, discoveries,
//! connect/discover/subscribe completions, notifications, timers, and
//! client commands — is funneled into one queue and consumed by one
//! task, so all session state is mutated from a single logical thread
//! in strict arrival order. Long-running radio actions never run on
//! the dispatcher task itself; they are spawned, and their results
//! re-enter the queue as completion events.

use std::sync::Arc;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::advertising::Advertisement;
use crate::ble::gatt::GattLink;
use crate::data::decoder::NotificationDecoder;
use crate::error::Result;
use crate::session::Session;
use btleplug::api::Characteristic;

/// Sender half of the dispatcher queue.
pub(crate) type EventSender = mpsc::UnboundedSender<Event>;

/// One entry in the dispatcher queue.
///
/// Completion events carry the generation of the connection attempt
/// they belong to; the session ignores completions from superseded
/// attempts.
pub(crate) enum Event {
    /// The adapter reported a power state change.
    AdapterPowered(bool),
    /// A peripheral was discovered or re-advertised during a scan.
    Discovered {
        link: Arc<dyn GattLink>,
        advertisement: Advertisement,
    },
    /// The radio stack reported a peer disconnect.
    PeerDisconnected { address: String },
    /// A spawned connect attempt finished.
    ConnectFinished {
        generation: u64,
        result: Result<()>,
    },
    /// A spawned service discovery finished.
    DiscoveryFinished {
        generation: u64,
        result: Result<Vec<Characteristic>>,
    },
    /// A spawned BLE-level subscribe finished.
    SubscribeFinished {
        generation: u64,
        characteristic: Uuid,
        result: Result<()>,
    },
    /// A notification arrived on the live connection.
    Notification {
        characteristic: Uuid,
        payload: Bytes,
    },
    /// The reconnect backoff elapsed.
    ReconnectDue { generation: u64 },
    /// Client command: begin scanning.
    Start { ack: oneshot::Sender<Result<()>> },
    /// Client command: cancel scanning or the live connection.
    Stop { ack: oneshot::Sender<Result<()>> },
    /// Client command: install a decoder for a characteristic.
    SetDecoder {
        characteristic: Uuid,
        decoder: Arc<dyn NotificationDecoder>,
    },
    /// Terminate the dispatcher loop.
    Shutdown,
}

impl Event {
    /// Short name for logging.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::AdapterPowered(_) => "AdapterPowered",
            Self::Discovered { .. } => "Discovered",
            Self::PeerDisconnected { .. } => "PeerDisconnected",
            Self::ConnectFinished { .. } => "ConnectFinished",
            Self::DiscoveryFinished { .. } => "DiscoveryFinished",
            Self::SubscribeFinished { .. } => "SubscribeFinished",
            Self::Notification { .. } => "Notification",
            Self::ReconnectDue { .. } => "ReconnectDue",
            Self::Start { .. } => "Start",
            Self::Stop { .. } => "Stop",
            Self::SetDecoder { .. } => "SetDecoder",
            Self::Shutdown => "Shutdown",
        }
    }
}

/// Consume the queue until shutdown.
pub(crate) async fn run(mut session: Session, mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        trace!("Dispatching {}", event.kind());

        if matches!(event, Event::Shutdown) {
            session.shutdown().await;
            break;
        }

        session.handle_event(event).await;
    }

    debug!("Event dispatcher ended");
}
