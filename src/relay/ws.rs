//! Websocket transport for the room relay.
//!
//! Connection lifecycle: Connecting (handshake received) → Authenticated
//! (oracle vouched for the device, inside a bounded timeout) → Active
//! (seated in the room actor) → Closed. There is no reconnect-in-place;
//! a dropped client opens a fresh connection and runs catch-up first.

use axum::debug_handler;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, close_code};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::AppState;
use crate::membership::MembershipOracle;
use crate::messages::log::Message;
use crate::relay::room::Peer;
use crate::relay::signal::{ClientFrame, ServerFrame};
use crate::relay::{RoomId, RoomKind};

#[derive(Debug, Deserialize)]
pub(crate) struct WsParams {
    device_id: String,
    /// Claimed display identity. Never trusted: the oracle's answer is
    /// what other peers see; a mismatching claim is only logged.
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    color: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    Path((kind, room_id)): Path<(RoomKind, String)>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let room = RoomId { kind, id: room_id };
    ws.on_upgrade(move |socket| serve_connection(state, room, params, socket))
}

async fn serve_connection(state: AppState, room: RoomId, params: WsParams, mut socket: WebSocket) {
    let peer = match authenticate(&state.oracle, state.config.auth_timeout, &room, params).await {
        Ok(peer) => peer,
        Err(reason) => {
            // Closed during Connecting; no room state was touched.
            close_policy(&mut socket, reason).await;
            return;
        }
    };

    let (outbox, mut inbox) = mpsc::unbounded_channel::<ServerFrame>();
    // Kept for frames addressed to this connection only.
    let direct = outbox.clone();

    let seat = match state.rooms.attach(room.clone(), peer, outbox).await {
        Ok(seat) => seat,
        Err(e) => {
            warn!(room = %room, error = %e, "could not seat connection");
            close_policy(&mut socket, "room unavailable").await;
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = inbox.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            incoming = stream.next() => {
                let payload = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(WsMessage::Binary(bytes))) => bytes.to_vec(),
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    // Pings are answered by axum itself.
                    Some(Ok(_)) => continue,
                };

                match serde_json::from_slice::<ClientFrame>(&payload) {
                    Ok(ClientFrame::Typing { is_typing }) => seat.typing(is_typing),
                    Ok(ClientFrame::Chat { message }) => match vet_chat(&room, &message) {
                        Ok(()) => seat.chat(message),
                        Err(reason) => {
                            let _ = direct.send(ServerFrame::Error {
                                message: reason.to_owned(),
                            });
                        }
                    },
                    // Malformed frames bounce an error back to this
                    // connection only; they never close it.
                    Err(e) => {
                        let _ = direct.send(ServerFrame::Error {
                            message: format!("unrecognized frame: {e}"),
                        });
                    }
                }
            }
        }
    }

    seat.leave();
    writer.abort();
}

/// Connecting → Authenticated. Verifies the handshake against the
/// membership oracle under a bounded timeout; a slow or failed oracle
/// refuses the connection rather than leaving it half-open.
async fn authenticate<O: MembershipOracle>(
    oracle: &O,
    deadline: std::time::Duration,
    room: &RoomId,
    params: WsParams,
) -> Result<Peer, &'static str> {
    let verdict =
        tokio::time::timeout(deadline, oracle.member_of(room, &params.device_id)).await;

    let profile = match verdict {
        Ok(Ok(Some(profile))) => profile,
        Ok(Ok(None)) => {
            debug!(room = %room, device_id = %params.device_id, "relay join refused: not a member");
            return Err("not a member of this room");
        }
        Ok(Err(e)) => {
            warn!(room = %room, error = %e, "membership oracle failed during handshake");
            return Err("authorization unavailable");
        }
        Err(_) => {
            warn!(room = %room, "membership oracle timed out during handshake");
            return Err("authorization timed out");
        }
    };

    if params.username.as_deref().is_some_and(|u| u != profile.username)
        || params.color.as_deref().is_some_and(|c| c != profile.user_color)
    {
        debug!(room = %room, device_id = %params.device_id, "claimed identity differs from oracle; using the oracle's");
    }

    Ok(Peer {
        device_id: params.device_id,
        username: profile.username,
        user_color: profile.user_color,
    })
}

/// A chat frame is relayed only in the group room its message belongs
/// to. Event rooms carry no chat: nothing durable backs them, and the
/// relay never fans out what the gateway has not persisted.
fn vet_chat(room: &RoomId, message: &Message) -> Result<(), &'static str> {
    match room.kind {
        RoomKind::Group if message.group_id == room.id => Ok(()),
        RoomKind::Group => Err("message addressed to a different room"),
        RoomKind::Event => Err("event rooms do not carry chat messages"),
    }
}

async fn close_policy(socket: &mut WebSocket, reason: &'static str) {
    let _ = socket
        .send(WsMessage::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
}
