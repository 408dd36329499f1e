//! End-to-end delivery flows: send → durable log → live fan-out, and the
//! catch-up path reconciling whatever the relay dropped.

use patter::db;
use patter::error::ChatError;
use patter::membership::{MemberProfile, SqliteOracle, grant_membership};
use patter::messages::log::{MessageLog, PAGE_CAP};
use patter::messages::{gateway, history};
use patter::notify::TracingNotifier;
use patter::relay::room::Peer;
use patter::relay::signal::ServerFrame;
use patter::relay::{LiveFanout, RoomId, Rooms};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::mpsc;

struct World {
    pool: SqlitePool,
    oracle: SqliteOracle,
    log: MessageLog,
    rooms: Rooms,
}

async fn world() -> World {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_schema(&pool).await.unwrap();

    World {
        oracle: SqliteOracle::new(pool.clone()),
        log: MessageLog::new(pool.clone()),
        rooms: Rooms::new(),
        pool,
    }
}

async fn enroll(world: &World, group: &str, device: &str, name: &str) {
    grant_membership(
        &world.pool,
        &RoomId::group(group),
        device,
        &MemberProfile {
            username: name.into(),
            user_color: "#336699".into(),
        },
    )
    .await
    .unwrap();
}

async fn send(world: &World, group: &str, device: &str, body: &str) -> patter::messages::log::Message {
    gateway::send(
        &world.oracle,
        &world.log,
        &world.rooms,
        &TracingNotifier,
        group,
        device,
        body,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn alice_and_bob_catch_up_in_order() {
    let w = world().await;
    enroll(&w, "g1", "dev-alice", "alice").await;
    enroll(&w, "g1", "dev-bob", "bob").await;

    let hi = send(&w, "g1", "dev-alice", "hi").await;
    let hello = send(&w, "g1", "dev-bob", "hello").await;
    assert!(hello.created_at > hi.created_at);

    // Unanchored: both, chronological.
    let page = history::fetch_history(&w.oracle, &w.log, "g1", "dev-bob", None, None)
        .await
        .unwrap();
    let bodies: Vec<_> = page.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, ["hi", "hello"]);

    // Anchored past "hi": only "hello".
    let page = history::fetch_history(&w.oracle, &w.log, "g1", "dev-bob", Some(&hi.id), None)
        .await
        .unwrap();
    let bodies: Vec<_> = page.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, ["hello"]);

    // Idempotent with no intervening sends.
    let again = history::fetch_history(&w.oracle, &w.log, "g1", "dev-bob", Some(&hi.id), None)
        .await
        .unwrap();
    assert_eq!(again.messages, page.messages);
}

#[tokio::test]
async fn unauthorized_send_leaves_history_untouched() {
    let w = world().await;
    enroll(&w, "g1", "dev-alice", "alice").await;
    send(&w, "g1", "dev-alice", "only me").await;

    let err = gateway::send(
        &w.oracle,
        &w.log,
        &w.rooms,
        &TracingNotifier,
        "g1",
        "dev-eve",
        "let me in",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ChatError::Authorization));

    let page = history::fetch_history(&w.oracle, &w.log, "g1", "dev-alice", None, None)
        .await
        .unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].body, "only me");
}

#[tokio::test]
async fn oversized_limit_is_capped_with_has_more() {
    let w = world().await;
    enroll(&w, "g1", "dev-alice", "alice").await;
    for i in 0..(PAGE_CAP + 3) {
        send(&w, "g1", "dev-alice", &format!("msg {i}")).await;
    }

    let page = history::fetch_history(&w.oracle, &w.log, "g1", "dev-alice", None, Some(1000))
        .await
        .unwrap();
    assert_eq!(page.messages.len(), PAGE_CAP);
    assert!(page.has_more);
}

#[tokio::test]
async fn relay_failure_is_invisible_to_the_sender_and_heals_on_catch_up() {
    struct DownedRelay;

    impl LiveFanout for DownedRelay {
        async fn publish(
            &self,
            _room: &RoomId,
            _message: &patter::messages::log::Message,
        ) -> patter::error::ChatResult<()> {
            Err(ChatError::RelayUnavailable("simulated outage".into()))
        }
    }

    let w = world().await;
    enroll(&w, "g1", "dev-alice", "alice").await;

    let msg = gateway::send(
        &w.oracle,
        &w.log,
        &DownedRelay,
        &TracingNotifier,
        "g1",
        "dev-alice",
        "still here",
    )
    .await
    .unwrap();

    let page = history::fetch_history(&w.oracle, &w.log, "g1", "dev-alice", None, None)
        .await
        .unwrap();
    assert_eq!(page.messages, vec![msg]);
}

#[tokio::test]
async fn connected_peers_see_sends_live() {
    let w = world().await;
    enroll(&w, "g1", "dev-alice", "alice").await;
    enroll(&w, "g1", "dev-bob", "bob").await;

    // Bob is attached to the room when alice sends.
    let (outbox, mut inbox) = mpsc::unbounded_channel();
    let _seat = w
        .rooms
        .attach(
            RoomId::group("g1"),
            Peer {
                device_id: "dev-bob".into(),
                username: "bob".into(),
                user_color: "#336699".into(),
            },
            outbox,
        )
        .await
        .unwrap();

    let sent = send(&w, "g1", "dev-alice", "live one").await;

    let frame = inbox.recv().await.unwrap();
    match frame {
        ServerFrame::Message { message } => assert_eq!(message, sent),
        other => panic!("expected a message frame, got {other:?}"),
    }
}
