//! Live fan-out: one actor per room, spawned on first attach, gone when
//! the last connection leaves. Rooms have no persisted state of their
//! own; everything durable lives in the message log.

pub mod room;
pub mod signal;
mod ws;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::AppState;
use crate::error::{ChatError, ChatResult};
use crate::messages::log::Message;
use crate::relay::room::{ConnId, Peer, RoomCmd};
use crate::relay::signal::ServerFrame;

pub fn router() -> Router<AppState> {
    Router::new().route("/{kind}/{room_id}/ws", get(ws::room_ws))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Group,
    Event,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Group => "group",
            RoomKind::Event => "event",
        }
    }
}

/// Runtime identity of a fan-out scope. Not a stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId {
    pub kind: RoomKind,
    pub id: String,
}

impl RoomId {
    pub fn group(id: impl Into<String>) -> Self {
        Self {
            kind: RoomKind::Group,
            id: id.into(),
        }
    }

    pub fn event(id: impl Into<String>) -> Self {
        Self {
            kind: RoomKind::Event,
            id: id.into(),
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.as_str(), self.id)
    }
}

/// Seam between the ingress gateway and whatever does live delivery, so
/// the transport can be swapped (or failed) without touching the send or
/// catch-up paths.
pub trait LiveFanout: Send + Sync {
    fn publish(
        &self,
        room: &RoomId,
        message: &Message,
    ) -> impl Future<Output = ChatResult<()>> + Send;
}

/// Registry of live room actors. Actors are spawned lazily on attach and
/// exit once empty; stale mailboxes are reaped on the next lookup.
#[derive(Clone, Default)]
pub struct Rooms {
    inner: Arc<Mutex<HashMap<RoomId, mpsc::UnboundedSender<RoomCmd>>>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seat an authenticated peer in `room`, spawning the actor if the
    /// room is not currently live.
    pub async fn attach(
        &self,
        room: RoomId,
        peer: Peer,
        outbox: mpsc::UnboundedSender<ServerFrame>,
    ) -> ChatResult<AttachedRoom> {
        let (reply, seated) = oneshot::channel();

        let mut tx = {
            let mut rooms = self.inner.lock().await;
            match rooms.get(&room) {
                Some(tx) if !tx.is_closed() => tx.clone(),
                _ => {
                    let tx = room::spawn(room.clone());
                    rooms.insert(room.clone(), tx.clone());
                    tx
                }
            }
        };

        // The actor can drain and exit between the lookup and the send;
        // a concurrently spawned live actor (or a fresh one) picks the
        // join up.
        if let Err(unsent) = tx.send(RoomCmd::Join { peer, outbox, reply }) {
            let failed = tx;
            tx = self.replace_stale(&room, &failed).await;
            tx.send(unsent.0)
                .map_err(|_| ChatError::RelayUnavailable(format!("room {room} mailbox closed")))?;
        }
        let conn = seated
            .await
            .map_err(|_| ChatError::RelayUnavailable(format!("room {room} dropped a join")))?;

        Ok(AttachedRoom { tx, conn })
    }

    /// How many rooms currently have a live actor.
    pub async fn live_count(&self) -> usize {
        let mut rooms = self.inner.lock().await;
        rooms.retain(|_, tx| !tx.is_closed());
        rooms.len()
    }

    /// Drop the registry entry for `room` only if it is still the sender
    /// that just failed. A concurrent attach may have replaced it with a
    /// live actor in the meantime; that entry must survive.
    async fn reap_stale(&self, room: &RoomId, failed: &mpsc::UnboundedSender<RoomCmd>) {
        let mut rooms = self.inner.lock().await;
        if rooms.get(room).is_some_and(|tx| tx.same_channel(failed)) {
            rooms.remove(room);
        }
    }

    /// After a failed send on `failed`: reuse the live actor a concurrent
    /// attach registered, or spawn a fresh one. Never clobbers a live
    /// entry that isn't the failed sender.
    async fn replace_stale(
        &self,
        room: &RoomId,
        failed: &mpsc::UnboundedSender<RoomCmd>,
    ) -> mpsc::UnboundedSender<RoomCmd> {
        let mut rooms = self.inner.lock().await;
        match rooms.get(room) {
            Some(tx) if !tx.same_channel(failed) && !tx.is_closed() => tx.clone(),
            _ => {
                let tx = room::spawn(room.clone());
                rooms.insert(room.clone(), tx.clone());
                tx
            }
        }
    }
}

impl LiveFanout for Rooms {
    /// Best-effort: a room with no live actor simply has nobody
    /// listening, which is success with nothing to do.
    async fn publish(&self, room: &RoomId, message: &Message) -> ChatResult<()> {
        let tx = { self.inner.lock().await.get(room).cloned() };
        let Some(tx) = tx else {
            return Ok(());
        };

        if tx
            .send(RoomCmd::Broadcast {
                message: message.clone(),
            })
            .is_err()
        {
            // The actor drained and exited since the lookup.
            self.reap_stale(room, &tx).await;
        }
        Ok(())
    }
}

/// A seated connection's handle into its room actor. Commands are
/// fire-and-forget; once the actor is gone the connection is on its way
/// out anyway.
pub struct AttachedRoom {
    tx: mpsc::UnboundedSender<RoomCmd>,
    conn: ConnId,
}

impl AttachedRoom {
    pub fn typing(&self, is_typing: bool) {
        let _ = self.tx.send(RoomCmd::Typing {
            from: self.conn,
            is_typing,
        });
    }

    pub fn chat(&self, message: Message) {
        let _ = self.tx.send(RoomCmd::Broadcast { message });
    }

    pub fn leave(&self) {
        let _ = self.tx.send(RoomCmd::Leave { conn: self.conn });
    }
}
