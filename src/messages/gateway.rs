//! The ingress gateway: the only write path into the message log.
//!
//! A send is authorized, persisted, then offered to the live relay. The
//! append is the commit point: a relay failure after it is logged and
//! swallowed, never rolled back and never surfaced to the sender, because
//! the message is already part of history and peers recover it through
//! catch-up.

use time::OffsetDateTime;
use tracing::warn;

use crate::error::{ChatError, ChatResult};
use crate::membership::MembershipOracle;
use crate::messages::log::{Message, MessageLog, NewMessage};
use crate::notify::Notifier;
use crate::relay::{LiveFanout, RoomId};

/// Source of message ids, injectable so the collision path is reachable
/// from tests.
pub trait IdSource: Send + Sync {
    fn next_id(&self) -> String;
}

/// Monotonic-ish timestamp prefix plus a random suffix. The shape makes
/// ids roughly sortable but ordering never relies on them.
#[derive(Debug, Clone, Default)]
pub struct ClockIds;

impl IdSource for ClockIds {
    fn next_id(&self) -> String {
        let now_us = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000;
        format!("{:x}-{:016x}", now_us, rand::random::<u64>())
    }
}

pub async fn send<O, F, N>(
    oracle: &O,
    log: &MessageLog,
    fanout: &F,
    notifier: &N,
    group_id: &str,
    device_id: &str,
    body: &str,
) -> ChatResult<Message>
where
    O: MembershipOracle,
    F: LiveFanout,
    N: Notifier,
{
    send_with_ids(oracle, log, fanout, notifier, &ClockIds, group_id, device_id, body).await
}

pub async fn send_with_ids<O, F, N, I>(
    oracle: &O,
    log: &MessageLog,
    fanout: &F,
    notifier: &N,
    ids: &I,
    group_id: &str,
    device_id: &str,
    body: &str,
) -> ChatResult<Message>
where
    O: MembershipOracle,
    F: LiveFanout,
    N: Notifier,
    I: IdSource,
{
    if group_id.is_empty() {
        return Err(ChatError::Validation("group_id is required".to_owned()));
    }
    if device_id.is_empty() {
        return Err(ChatError::Validation("device_id is required".to_owned()));
    }
    if body.trim().is_empty() {
        return Err(ChatError::Validation("message body is empty".to_owned()));
    }

    let room = RoomId::group(group_id);
    let Some(profile) = oracle.member_of(&room, device_id).await? else {
        return Err(ChatError::Authorization);
    };

    let record = NewMessage {
        id: ids.next_id(),
        group_id: group_id.to_owned(),
        device_id: device_id.to_owned(),
        // Captured now, on purpose: history keeps the identity the
        // author had at send time.
        username: profile.username,
        user_color: profile.user_color,
        body: body.to_owned(),
    };

    // Commit point. An id collision is vanishingly rare but not
    // impossible, so regenerate once before giving up.
    let message = match log.append(record.clone()).await {
        Err(e) if is_unique_violation(&e) => {
            warn!(group_id, "message id collision, regenerating");
            log.append(NewMessage {
                id: ids.next_id(),
                ..record
            })
            .await?
        }
        other => other?,
    };

    // Best-effort from here on.
    if let Err(e) = fanout.publish(&room, &message).await {
        warn!(group_id, message_id = %message.id, error = %e, "live fan-out failed; message remains recoverable via catch-up");
    }
    notifier.message_stored(&message).await;

    Ok(message)
}

fn is_unique_violation(err: &ChatError) -> bool {
    match err {
        ChatError::Persistence(sqlx::Error::Database(db)) => db.is_unique_violation(),
        _ => false,
    }
}
