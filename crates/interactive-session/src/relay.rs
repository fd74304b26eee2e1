//! Mirrors submissions and banners between participants of one logical session.
//!
//! Every participant holds a [`CollaborationRelay`] joined to the same room.
//! Published events reach every participant, including the publisher; each
//! event carries the publisher's session id so handlers can drop their own
//! echoes.

use interactive_protocol::{Cell, CellId, InboundMessage, SysInfoReason};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const ROOM_CAPACITY: usize = 64;

/// Events exchanged between participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    RemoteAddCode {
        code: String,
        file: String,
        line: u32,
        id: CellId,
        originator: String,
        debug: bool,
    },
    SysInfoAdded {
        reason: SysInfoReason,
        cell: Cell,
        originator: String,
    },
}

impl RelayEvent {
    pub fn originator(&self) -> &str {
        match self {
            RelayEvent::RemoteAddCode { originator, .. }
            | RelayEvent::SysInfoAdded { originator, .. } => originator,
        }
    }

    /// The inbound message a receiving participant dispatches for this event.
    pub fn into_inbound(self) -> InboundMessage {
        match self {
            RelayEvent::RemoteAddCode {
                code,
                file,
                line,
                id,
                originator,
                debug,
            } => InboundMessage::RemoteAddCode {
                code,
                file,
                line,
                id,
                originator,
                debug,
            },
            RelayEvent::SysInfoAdded {
                reason,
                cell,
                originator,
            } => InboundMessage::SysInfoAdded {
                reason,
                cell,
                originator,
            },
        }
    }
}

/// Shared channel all participants of one logical session join.
pub type Room = broadcast::Sender<RelayEvent>;

#[derive(Debug, Clone)]
pub struct CollaborationRelay {
    session_id: String,
    tx: Room,
}

impl CollaborationRelay {
    pub fn new_room() -> Room {
        let (tx, _rx) = broadcast::channel(ROOM_CAPACITY);
        tx
    }

    pub fn join(session_id: impl Into<String>, room: &Room) -> Self {
        Self {
            session_id: session_id.into(),
            tx: room.clone(),
        }
    }

    /// A relay in a room of its own.
    pub fn detached(session_id: impl Into<String>) -> Self {
        Self::join(session_id, &Self::new_room())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Fire-and-forget; an empty room is not an error.
    pub fn publish(&self, event: RelayEvent) {
        match self.tx.send(event) {
            Ok(receivers) => debug!("[relay] Published to {} receivers", receivers),
            Err(_) => debug!("[relay] No receivers, event dropped"),
        }
    }

    pub fn publish_code(&self, code: &str, file: &str, line: u32, id: &CellId, debug: bool) {
        self.publish(RelayEvent::RemoteAddCode {
            code: code.to_string(),
            file: file.to_string(),
            line,
            id: id.clone(),
            originator: self.session_id.clone(),
            debug,
        });
    }

    pub fn publish_sys_info(&self, reason: SysInfoReason, cell: &Cell) {
        self.publish(RelayEvent::SysInfoAdded {
            reason,
            cell: cell.clone(),
            originator: self.session_id.clone(),
        });
    }

    /// Whether an event with this originator came from this participant.
    pub fn is_echo(&self, originator: &str) -> bool {
        originator == self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    /// Forward room events into `inbound` until either side closes.
    pub fn spawn_listener(&self, inbound: mpsc::Sender<InboundMessage>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if inbound.send(event.into_inbound()).await.is_err() {
                            debug!("[relay] Inbound channel closed for {}", session_id);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("[relay] {} lagged, skipped {} events", session_id, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!("[relay] Listener for {} stopped", session_id);
        })
    }
}
