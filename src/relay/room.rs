//! The per-room actor.
//!
//! One task per live room owns that room's connection set outright; every
//! join, leave and broadcast goes through its mailbox, so mutations are
//! serialized without locks and broadcast order within a room is the
//! order the actor processed the commands. Different rooms share nothing.
//!
//! The actor only ever sees authenticated connections: the websocket
//! layer runs the membership check before sending `Join`.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use crate::messages::log::Message;
use crate::relay::RoomId;
use crate::relay::signal::ServerFrame;

pub type ConnId = Uuid;

/// Identity of an attached peer, as vouched for by the membership oracle.
#[derive(Debug, Clone)]
pub struct Peer {
    pub device_id: String,
    pub username: String,
    pub user_color: String,
}

pub enum RoomCmd {
    Join {
        peer: Peer,
        outbox: mpsc::UnboundedSender<ServerFrame>,
        reply: oneshot::Sender<ConnId>,
    },
    Leave {
        conn: ConnId,
    },
    /// Fan a persisted message out to everyone, sender echo included.
    Broadcast {
        message: Message,
    },
    /// Ephemeral; everyone but the sender.
    Typing {
        from: ConnId,
        is_typing: bool,
    },
}

struct Connection {
    peer: Peer,
    outbox: mpsc::UnboundedSender<ServerFrame>,
}

/// Spawn the actor task for `room` and hand back its mailbox.
pub fn spawn(room: RoomId) -> mpsc::UnboundedSender<RoomCmd> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(room, rx));
    tx
}

async fn run(room: RoomId, mut mailbox: mpsc::UnboundedReceiver<RoomCmd>) {
    let mut conns: HashMap<ConnId, Connection> = HashMap::new();
    // Don't exit before the join that caused the spawn has arrived.
    let mut seated_anyone = false;

    while let Some(cmd) = mailbox.recv().await {
        match cmd {
            RoomCmd::Join { peer, outbox, reply } => {
                let conn = Uuid::now_v7();
                let joined = ServerFrame::UserJoined {
                    device_id: peer.device_id.clone(),
                    username: peer.username.clone(),
                    user_color: peer.user_color.clone(),
                };
                // Not echoed to the joining connection.
                fan_out(&conns, &joined, None);

                debug!(room = %room, device_id = %peer.device_id, "peer joined");
                conns.insert(conn, Connection { peer, outbox });
                seated_anyone = true;
                let _ = reply.send(conn);
            }
            RoomCmd::Leave { conn } => {
                if let Some(gone) = conns.remove(&conn) {
                    announce_left(&conns, &room, &gone.peer);
                }
            }
            RoomCmd::Broadcast { message } => {
                let frame = ServerFrame::Message { message };
                fan_out(&conns, &frame, None);
            }
            RoomCmd::Typing { from, is_typing } => {
                let Some(sender) = conns.get(&from) else {
                    continue;
                };
                let frame = ServerFrame::Typing {
                    device_id: sender.peer.device_id.clone(),
                    is_typing,
                };
                fan_out(&conns, &frame, Some(from));
            }
        }

        // Reap peers whose outbox died without a clean Leave.
        let dead: Vec<ConnId> = conns
            .iter()
            .filter(|(_, c)| c.outbox.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for conn in dead {
            if let Some(gone) = conns.remove(&conn) {
                announce_left(&conns, &room, &gone.peer);
            }
        }

        if seated_anyone && conns.is_empty() {
            break;
        }
    }

    debug!(room = %room, "room drained, actor exiting");
}

fn announce_left(conns: &HashMap<ConnId, Connection>, room: &RoomId, peer: &Peer) {
    debug!(room = %room, device_id = %peer.device_id, "peer left");
    let frame = ServerFrame::UserLeft {
        device_id: peer.device_id.clone(),
        username: peer.username.clone(),
        user_color: peer.user_color.clone(),
    };
    fan_out(conns, &frame, None);
}

fn fan_out(conns: &HashMap<ConnId, Connection>, frame: &ServerFrame, skip: Option<ConnId>) {
    for (id, conn) in conns.iter() {
        if skip == Some(*id) {
            continue;
        }
        // A closed outbox is reaped by the caller's sweep.
        let _ = conn.outbox.send(frame.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RoomId;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn peer(device: &str) -> Peer {
        Peer {
            device_id: device.to_owned(),
            username: device.to_owned(),
            user_color: "#abcdef".to_owned(),
        }
    }

    fn message(body: &str) -> Message {
        Message {
            id: "m1".into(),
            group_id: "g1".into(),
            device_id: "dev-a".into(),
            username: "alice".into(),
            user_color: "#abcdef".into(),
            body: body.into(),
            created_at: 1,
        }
    }

    async fn join(
        room: &mpsc::UnboundedSender<RoomCmd>,
        device: &str,
    ) -> (ConnId, UnboundedReceiver<ServerFrame>) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let (reply, conn) = oneshot::channel();
        room.send(RoomCmd::Join {
            peer: peer(device),
            outbox,
            reply,
        })
        .unwrap();
        (conn.await.unwrap(), inbox)
    }

    #[tokio::test]
    async fn join_is_announced_to_others_but_not_echoed() {
        let room = spawn(RoomId::group("g1"));
        let (_a, mut a_inbox) = join(&room, "dev-a").await;
        let (_b, mut b_inbox) = join(&room, "dev-b").await;

        // a sees b arrive, b sees nothing.
        let frame = a_inbox.recv().await.unwrap();
        assert!(matches!(frame, ServerFrame::UserJoined { device_id, .. } if device_id == "dev-b"));
        assert!(b_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_including_sender() {
        let room = spawn(RoomId::group("g1"));
        let (_a, mut a_inbox) = join(&room, "dev-a").await;
        let (_b, mut b_inbox) = join(&room, "dev-b").await;
        a_inbox.recv().await.unwrap(); // b's join

        room.send(RoomCmd::Broadcast {
            message: message("hi"),
        })
        .unwrap();

        for inbox in [&mut a_inbox, &mut b_inbox] {
            let frame = inbox.recv().await.unwrap();
            assert!(matches!(frame, ServerFrame::Message { message } if message.body == "hi"));
        }
    }

    #[tokio::test]
    async fn typing_skips_its_sender() {
        let room = spawn(RoomId::group("g1"));
        let (a, mut a_inbox) = join(&room, "dev-a").await;
        let (_b, mut b_inbox) = join(&room, "dev-b").await;
        a_inbox.recv().await.unwrap(); // b's join

        room.send(RoomCmd::Typing {
            from: a,
            is_typing: true,
        })
        .unwrap();

        let frame = b_inbox.recv().await.unwrap();
        assert_eq!(
            frame,
            ServerFrame::Typing {
                device_id: "dev-a".into(),
                is_typing: true
            }
        );
        assert!(a_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_is_announced_and_empty_room_exits() {
        let room = spawn(RoomId::group("g1"));
        let (a, mut a_inbox) = join(&room, "dev-a").await;
        let (b, mut b_inbox) = join(&room, "dev-b").await;
        a_inbox.recv().await.unwrap(); // b's join

        room.send(RoomCmd::Leave { conn: b }).unwrap();
        let frame = a_inbox.recv().await.unwrap();
        assert!(matches!(frame, ServerFrame::UserLeft { device_id, .. } if device_id == "dev-b"));
        assert!(b_inbox.try_recv().is_err());

        // Last one out turns off the lights: the mailbox closes.
        room.send(RoomCmd::Leave { conn: a }).unwrap();
        room.closed().await;
        assert!(room.is_closed());
    }

    #[tokio::test]
    async fn dead_outboxes_are_reaped_as_leaves() {
        let room = spawn(RoomId::group("g1"));
        let (_a, a_inbox) = join(&room, "dev-a").await;
        let (_b, mut b_inbox) = join(&room, "dev-b").await;
        drop(a_inbox); // a's transport died without a clean Leave

        room.send(RoomCmd::Broadcast {
            message: message("anyone there?"),
        })
        .unwrap();

        // b still gets the broadcast, then sees a reaped as a leave.
        let first = b_inbox.recv().await.unwrap();
        assert!(matches!(first, ServerFrame::Message { .. }));
        let second = b_inbox.recv().await.unwrap();
        assert!(matches!(second, ServerFrame::UserLeft { device_id, .. } if device_id == "dev-a"));
    }
}
