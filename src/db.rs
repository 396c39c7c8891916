use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::CoreResult;

/// Rooms never get re-created: trade rooms are one-per-(board, buyer),
/// mate rooms one-per-board. Leaving flips `departed` on the settings
/// row instead of deleting anything, so history survives.
///
/// `messages` is append-only; rowid is the tie-breaker when two rows
/// share the same `sent_at` millisecond.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rooms (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    board_id TEXT,
    title TEXT NOT NULL DEFAULT '',
    region TEXT NOT NULL DEFAULT '',
    last_message TEXT NOT NULL DEFAULT '',
    last_message_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS room_members (
    room_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    UNIQUE(room_id, user_id)
);
CREATE TABLE IF NOT EXISTS room_settings (
    room_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    alarm INTEGER NOT NULL DEFAULT 1,
    pinned INTEGER NOT NULL DEFAULT 0,
    departed INTEGER NOT NULL DEFAULT 0,
    UNIQUE(room_id, user_id)
);
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    room_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    detail TEXT NOT NULL,
    sent_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS schedules (
    id TEXT PRIMARY KEY,
    room_id TEXT NOT NULL,
    author TEXT NOT NULL,
    promised_at INTEGER NOT NULL,
    lead_minutes INTEGER,
    alarm_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS blocks (
    blocker TEXT NOT NULL,
    blocked TEXT NOT NULL,
    UNIQUE(blocker, blocked)
);
CREATE INDEX IF NOT EXISTS idx_messages_room ON messages (room_id, sent_at);
CREATE INDEX IF NOT EXISTS idx_schedules_room ON schedules (room_id);
";

pub async fn connect(database_url: &str) -> CoreResult<SqlitePool> {
    // An in-memory sqlite database exists per connection, so the pool
    // must not grow past one for `:memory:` urls.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 16 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

pub async fn ensure_schema(pool: &SqlitePool) -> CoreResult<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
