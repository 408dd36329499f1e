//! The message log: durable, append-only, per-group ordered store.
//!
//! This is the source of truth for message existence and order. The live
//! relay's broadcast order is advisory; anything a client reads back from
//! here is authoritative. Records are never mutated or deleted.
//!
//! Ordering key is `(created_at, id)` — `created_at` primary, `id` as a
//! stable tie-break so the order is total even when two appends land on
//! the same microsecond.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::error::{ChatError, ChatResult};

/// Server-side page cap; applied regardless of the caller's limit.
pub const PAGE_CAP: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    pub group_id: String,
    pub device_id: String,
    /// Display identity captured at send time. Deliberately denormalized:
    /// history keeps the name the author had when they wrote, even if
    /// they rename later.
    pub username: String,
    pub user_color: String,
    pub body: String,
    /// Unix microseconds, assigned by the log at persistence time.
    pub created_at: i64,
}

/// A page of messages in chronological order, plus whether the page was
/// truncated by the limit/cap.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

/// What the gateway hands to [`MessageLog::append`]; `created_at` is not
/// the caller's to choose.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: String,
    pub group_id: String,
    pub device_id: String,
    pub username: String,
    pub user_color: String,
    pub body: String,
}

pub struct MessageLog {
    pool: SqlitePool,
    /// Last `created_at` handed out. Appends take
    /// `max(now, last + 1)`, so timestamps are strictly increasing within
    /// one process even when the clock stalls or steps backwards.
    last_assigned: AtomicI64,
}

impl MessageLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            last_assigned: AtomicI64::new(0),
        }
    }

    fn next_timestamp(&self) -> i64 {
        let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000) as i64;
        self.last_assigned
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            // the closure never returns None
            .map(|last| now.max(last + 1))
            .unwrap_or(now)
    }

    /// Durably append one record. This is the commit point of a send:
    /// once it returns `Ok`, the message is part of history.
    ///
    /// A duplicate `(group_id, id)` surfaces as `Persistence`; the caller
    /// decides whether to regenerate the id and retry.
    pub async fn append(&self, record: NewMessage) -> ChatResult<Message> {
        let created_at = self.next_timestamp();

        sqlx::query(
            "INSERT INTO messages (id, group_id, device_id, username, user_color, body, created_at)
             VALUES (?,?,?,?,?,?,?)",
        )
        .bind(&record.id)
        .bind(&record.group_id)
        .bind(&record.device_id)
        .bind(&record.username)
        .bind(&record.user_color)
        .bind(&record.body)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(Message {
            id: record.id,
            group_id: record.group_id,
            device_id: record.device_id,
            username: record.username,
            user_color: record.user_color,
            body: record.body,
            created_at,
        })
    }

    /// Most recent `min(limit, PAGE_CAP)` messages of a group, returned
    /// oldest-first. `has_more` is true when older messages exist beyond
    /// the page.
    pub async fn query_initial(&self, group_id: &str, limit: usize) -> ChatResult<Page> {
        let n = limit.min(PAGE_CAP);

        // Fetch one extra row to learn whether the page was truncated.
        let mut rows: Vec<Message> = sqlx::query_as(
            "SELECT id, group_id, device_id, username, user_color, body, created_at
             FROM messages WHERE group_id=?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(group_id)
        .bind((n + 1) as i64)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() > n;
        rows.truncate(n);
        rows.reverse();

        Ok(Page {
            messages: rows,
            has_more,
        })
    }

    /// Messages strictly after `after_id` in the `(created_at, id)` total
    /// order, oldest-first, capped. A nonexistent anchor fails with
    /// `NotFound` so a client holding a stale id knows to fall back to
    /// [`query_initial`](Self::query_initial).
    pub async fn query_delta(
        &self,
        group_id: &str,
        after_id: &str,
        limit: usize,
    ) -> ChatResult<Page> {
        let n = limit.min(PAGE_CAP);

        let anchor: Option<(i64,)> =
            sqlx::query_as("SELECT created_at FROM messages WHERE group_id=? AND id=?")
                .bind(group_id)
                .bind(after_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((anchor_ts,)) = anchor else {
            return Err(ChatError::NotFound(format!(
                "message {after_id} in group {group_id}"
            )));
        };

        let mut rows: Vec<Message> = sqlx::query_as(
            "SELECT id, group_id, device_id, username, user_color, body, created_at
             FROM messages WHERE group_id=?
               AND (created_at > ? OR (created_at = ? AND id > ?))
             ORDER BY created_at ASC, id ASC
             LIMIT ?",
        )
        .bind(group_id)
        .bind(anchor_ts)
        .bind(anchor_ts)
        .bind(after_id)
        .bind((n + 1) as i64)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() > n;
        rows.truncate(n);

        Ok(Page {
            messages: rows,
            has_more,
        })
    }
}
