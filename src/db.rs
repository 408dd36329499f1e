//! SQLite pool bootstrap and schema.
//!
//! `messages` is the append-only log: no UPDATE or DELETE is ever issued
//! against it by this crate. `memberships` stands in for the external
//! membership service; the surrounding application owns its contents.

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::ChatResult;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS messages (
        id          TEXT    NOT NULL,
        group_id    TEXT    NOT NULL,
        device_id   TEXT    NOT NULL,
        username    TEXT    NOT NULL,
        user_color  TEXT    NOT NULL,
        body        TEXT    NOT NULL,
        created_at  INTEGER NOT NULL,
        PRIMARY KEY (group_id, id)
    )",
    // Serves both "most recent N" and "strictly after (created_at, id)".
    "CREATE INDEX IF NOT EXISTS idx_messages_order
        ON messages (group_id, created_at, id)",
    "CREATE TABLE IF NOT EXISTS memberships (
        room_kind   TEXT NOT NULL,
        room_id     TEXT NOT NULL,
        device_id   TEXT NOT NULL,
        username    TEXT NOT NULL,
        user_color  TEXT NOT NULL,
        PRIMARY KEY (room_kind, room_id, device_id)
    )",
];

pub async fn connect(database_url: &str) -> ChatResult<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(database_url)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> ChatResult<()> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();
    pool
}
