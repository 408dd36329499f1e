//! Membership oracle client glue.
//!
//! The oracle answers one question: is this device a member of this room,
//! and under which display identity. It is owned by the surrounding
//! application; this crate only consults it. Answers are never cached
//! across requests, so a device that leaves a group stops authorizing on
//! its very next call.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::ChatResult;
use crate::relay::RoomId;

/// Display identity of a member, captured per lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub username: String,
    pub user_color: String,
}

pub trait MembershipOracle: Send + Sync {
    /// `Ok(None)` means "not a member"; errors mean the oracle itself
    /// could not answer.
    fn member_of(
        &self,
        room: &RoomId,
        device_id: &str,
    ) -> impl Future<Output = ChatResult<Option<MemberProfile>>> + Send;
}

/// Oracle backed by the application's `memberships` table.
#[derive(Clone)]
pub struct SqliteOracle {
    pool: SqlitePool,
}

impl SqliteOracle {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl MembershipOracle for SqliteOracle {
    async fn member_of(
        &self,
        room: &RoomId,
        device_id: &str,
    ) -> ChatResult<Option<MemberProfile>> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT username, user_color FROM memberships
             WHERE room_kind=? AND room_id=? AND device_id=?",
        )
        .bind(room.kind.as_str())
        .bind(&room.id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(username, user_color)| MemberProfile {
            username,
            user_color,
        }))
    }
}

/// Insert a membership row. Test and bootstrap helper; the real table is
/// maintained by the surrounding application's group CRUD.
pub async fn grant_membership(
    pool: &SqlitePool,
    room: &RoomId,
    device_id: &str,
    profile: &MemberProfile,
) -> ChatResult<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO memberships (room_kind, room_id, device_id, username, user_color)
         VALUES (?,?,?,?,?)",
    )
    .bind(room.kind.as_str())
    .bind(&room.id)
    .bind(device_id)
    .bind(&profile.username)
    .bind(&profile.user_color)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::relay::RoomId;

    #[tokio::test]
    async fn unknown_device_is_not_a_member() {
        let pool = db::memory_pool().await;
        let oracle = SqliteOracle::new(pool);
        let room = RoomId::group("g1");

        assert_eq!(oracle.member_of(&room, "ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn membership_reflects_the_table_immediately() {
        let pool = db::memory_pool().await;
        let oracle = SqliteOracle::new(pool.clone());
        let room = RoomId::group("g1");
        let alice = MemberProfile {
            username: "alice".into(),
            user_color: "#aa3355".into(),
        };

        grant_membership(&pool, &room, "dev-a", &alice).await.unwrap();
        assert_eq!(
            oracle.member_of(&room, "dev-a").await.unwrap(),
            Some(alice)
        );

        // Membership in one room says nothing about another.
        let other = RoomId::group("g2");
        assert_eq!(oracle.member_of(&other, "dev-a").await.unwrap(), None);
    }
}
