use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::CoreResult;
use crate::auth::UserId;

/// Per-(room, member) presentation flags. One row per pair, created at
/// join time and never deleted: leaving flips `departed` so the member's
/// own list hides the room while the counterpart keeps history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoomSetting {
    pub alarm: bool,
    pub pinned: bool,
    pub departed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Alarm,
    Pinned,
}

pub async fn ensure_setting(pool: &SqlitePool, room_id: Uuid, user_id: &str) -> CoreResult<()> {
    sqlx::query("INSERT OR IGNORE INTO room_settings (room_id, user_id) VALUES (?, ?)")
        .bind(room_id.to_string())
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_setting(pool: &SqlitePool, room_id: Uuid, user_id: &str) -> CoreResult<RoomSetting> {
    let (alarm, pinned, departed): (bool, bool, bool) =
        sqlx::query_as("SELECT alarm, pinned, departed FROM room_settings WHERE room_id=? AND user_id=?")
            .bind(room_id.to_string())
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .ok_or(crate::CoreError::NotFound("room setting"))?;
    Ok(RoomSetting { alarm, pinned, departed })
}

/// Flips the flag and returns the new value.
pub async fn toggle_flag(
    pool: &SqlitePool,
    room_id: Uuid,
    user_id: &str,
    flag: Flag,
) -> CoreResult<bool> {
    let setting = get_setting(pool, room_id, user_id).await?;
    let (column, next) = match flag {
        Flag::Alarm => ("alarm", !setting.alarm),
        Flag::Pinned => ("pinned", !setting.pinned),
    };
    sqlx::query(&format!(
        "UPDATE room_settings SET {column}=? WHERE room_id=? AND user_id=?"
    ))
    .bind(next)
    .bind(room_id.to_string())
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(next)
}

pub async fn mark_departed(pool: &SqlitePool, room_id: Uuid, user_id: &str) -> CoreResult<()> {
    sqlx::query("UPDATE room_settings SET departed=1 WHERE room_id=? AND user_id=?")
        .bind(room_id.to_string())
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// How the viewer relates to a counterpart, block-wise. Blocks are
/// directional and never touch room or membership rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    None,
    ByMe,
}

pub async fn block(pool: &SqlitePool, blocker: &str, blocked: &str) -> CoreResult<()> {
    sqlx::query("INSERT OR IGNORE INTO blocks (blocker, blocked) VALUES (?, ?)")
        .bind(blocker)
        .bind(blocked)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn unblock(pool: &SqlitePool, blocker: &str, blocked: &str) -> CoreResult<()> {
    sqlx::query("DELETE FROM blocks WHERE blocker=? AND blocked=?")
        .bind(blocker)
        .bind(blocked)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn block_status(
    pool: &SqlitePool,
    viewer: &str,
    counterpart: &str,
) -> CoreResult<BlockStatus> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM blocks WHERE blocker=? AND blocked=?")
        .bind(viewer)
        .bind(counterpart)
        .fetch_optional(pool)
        .await?;
    Ok(if row.is_some() { BlockStatus::ByMe } else { BlockStatus::None })
}

/// Everyone the viewer has blocked; used for read-time redaction.
pub async fn blocked_by(pool: &SqlitePool, viewer: &str) -> CoreResult<Vec<UserId>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT blocked FROM blocks WHERE blocker=?")
        .bind(viewer)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(u,)| u).collect())
}
