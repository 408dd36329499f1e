//! Catch-up reader: the reconciliation backstop for dropped live
//! broadcasts. Live delivery is at-most-once; this read path is
//! at-least-once, and its result is authoritative.

use crate::error::{ChatError, ChatResult};
use crate::membership::MembershipOracle;
use crate::messages::log::{MessageLog, Page};
use crate::relay::RoomId;

/// Default page size when the caller doesn't ask for one.
pub const DEFAULT_PAGE: usize = 50;

/// Without `last_seen`: the most recent page, oldest-first. With it: all
/// messages strictly newer, oldest-first. A `last_seen` that doesn't
/// resolve fails with `NotFound` so the caller knows to fall back to an
/// unanchored fetch.
pub async fn fetch_history<O>(
    oracle: &O,
    log: &MessageLog,
    group_id: &str,
    device_id: &str,
    last_seen: Option<&str>,
    limit: Option<usize>,
) -> ChatResult<Page>
where
    O: MembershipOracle,
{
    let room = RoomId::group(group_id);
    if oracle.member_of(&room, device_id).await?.is_none() {
        return Err(ChatError::Authorization);
    }

    let limit = limit.unwrap_or(DEFAULT_PAGE);
    match last_seen {
        Some(anchor) => log.query_delta(group_id, anchor, limit).await,
        None => log.query_initial(group_id, limit).await,
    }
}
