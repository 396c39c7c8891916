pub mod settings;
pub mod store;
pub mod timeline;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::auth::UserId;
use crate::collab::Neighborhood;
use crate::{CoreError, CoreResult};
use settings::BlockStatus;
use store::{MessageDetail, from_millis, to_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Trade,
    Mate,
}

impl RoomKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomKind::Trade => "trade",
            RoomKind::Mate => "mate",
        }
    }

    fn parse(raw: &str) -> CoreResult<RoomKind> {
        match raw {
            "trade" => Ok(RoomKind::Trade),
            "mate" => Ok(RoomKind::Mate),
            other => Err(CoreError::Validation(format!("unknown room kind {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub kind: RoomKind,
    pub board_id: Option<String>,
    pub title: String,
    pub region: String,
    pub last_message: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

type RoomRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    Option<i64>,
    i64,
);

fn room_from_row(row: RoomRow) -> CoreResult<Room> {
    let (id, kind, board_id, title, region, last_message, last_message_at, created_at) = row;
    Ok(Room {
        id: Uuid::parse_str(&id).map_err(|e| CoreError::Validation(e.to_string()))?,
        kind: RoomKind::parse(&kind)?,
        board_id,
        title,
        region,
        last_message,
        last_message_at: last_message_at.map(from_millis),
        created_at: from_millis(created_at),
    })
}

const ROOM_COLUMNS: &str =
    "id, kind, board_id, title, region, last_message, last_message_at, created_at";

pub async fn get_room(pool: &SqlitePool, room_id: Uuid) -> CoreResult<Room> {
    let row: Option<RoomRow> =
        sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id=?"))
            .bind(room_id.to_string())
            .fetch_optional(pool)
            .await?;
    room_from_row(row.ok_or(CoreError::NotFound("room"))?)
}

pub async fn members(pool: &SqlitePool, room_id: Uuid) -> CoreResult<Vec<UserId>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT user_id FROM room_members WHERE room_id=? ORDER BY rowid")
            .bind(room_id.to_string())
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(u,)| u).collect())
}

pub async fn is_member(pool: &SqlitePool, room_id: Uuid, user_id: &str) -> CoreResult<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM room_members WHERE room_id=? AND user_id=?")
            .bind(room_id.to_string())
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

async fn find_room_for_board(
    pool: &SqlitePool,
    board_id: &str,
    member: Option<&str>,
) -> CoreResult<Option<Room>> {
    let row: Option<RoomRow> = match member {
        Some(member) => {
            sqlx::query_as(&format!(
                "SELECT {ROOM_COLUMNS} FROM rooms r WHERE r.board_id=? \
                 AND EXISTS (SELECT 1 FROM room_members m WHERE m.room_id = r.id AND m.user_id=?)"
            ))
            .bind(board_id)
            .bind(member)
            .fetch_optional(pool)
            .await?
        }
        None => {
            sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE board_id=?"))
                .bind(board_id)
                .fetch_optional(pool)
                .await?
        }
    };
    row.map(room_from_row).transpose()
}

async fn insert_room(
    pool: &SqlitePool,
    kind: RoomKind,
    board_id: &str,
    title: &str,
    region: &str,
    members: &[UserId],
) -> CoreResult<Room> {
    let room = Room {
        id: Uuid::now_v7(),
        kind,
        board_id: Some(board_id.to_owned()),
        title: title.to_owned(),
        region: region.to_owned(),
        last_message: String::new(),
        last_message_at: None,
        created_at: Utc::now(),
    };
    sqlx::query(
        "INSERT INTO rooms (id, kind, board_id, title, region, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(room.id.to_string())
    .bind(kind.as_str())
    .bind(board_id)
    .bind(title)
    .bind(region)
    .bind(to_millis(room.created_at))
    .execute(pool)
    .await?;

    for member in members {
        sqlx::query("INSERT OR IGNORE INTO room_members (room_id, user_id) VALUES (?, ?)")
            .bind(room.id.to_string())
            .bind(member)
            .execute(pool)
            .await?;
        settings::ensure_setting(pool, room.id, member).await?;
    }
    Ok(room)
}

/// One trade room per (board, buyer); a second call returns the room
/// already created. The seller comes from the board collaborator and the
/// region label from the buyer's most recent address.
pub async fn create_trade_room(
    pool: &SqlitePool,
    hood: &Arc<dyn Neighborhood>,
    buyer: &str,
    board_id: &str,
) -> CoreResult<Room> {
    if let Some(existing) = find_room_for_board(pool, board_id, Some(buyer)).await? {
        return Ok(existing);
    }
    let seller = hood.resolve_board_seller(board_id).await?;
    let info = hood.trade_info(board_id).await?;
    let region = hood.recent_address(buyer).await?;
    let members = vec![buyer.to_owned(), seller];
    let room = insert_room(pool, RoomKind::Trade, board_id, &info.title, &region, &members).await?;
    tracing::info!(room_id = %room.id, board_id, "trade room created");
    Ok(room)
}

/// One mate room per board, seeded with the currently approved
/// applicants. Later approvals arrive through `join_mate_room`.
pub async fn create_mate_room(
    pool: &SqlitePool,
    hood: &Arc<dyn Neighborhood>,
    board_id: &str,
) -> CoreResult<Room> {
    if let Some(existing) = find_room_for_board(pool, board_id, None).await? {
        return Ok(existing);
    }
    let members = hood.resolve_approved_applicants(board_id).await?;
    let info = hood.trade_info(board_id).await?;
    let region = match members.first() {
        Some(author) => hood.recent_address(author).await?,
        None => String::new(),
    };
    let room = insert_room(pool, RoomKind::Mate, board_id, &info.title, &region, &members).await?;
    tracing::info!(room_id = %room.id, board_id, "mate room created");
    Ok(room)
}

/// Invoked by the mate-board approval workflow. Silently idempotent for
/// an existing member (duplicate joins are a caller-side advisory
/// check); otherwise appends the member, bootstraps their settings row
/// and records a `join` action message.
pub async fn join_mate_room(
    pool: &SqlitePool,
    hood: &Arc<dyn Neighborhood>,
    room_id: Uuid,
    user_id: &str,
) -> CoreResult<Option<store::Message>> {
    get_room(pool, room_id).await?;
    if is_member(pool, room_id, user_id).await? {
        return Ok(None);
    }
    sqlx::query("INSERT INTO room_members (room_id, user_id) VALUES (?, ?)")
        .bind(room_id.to_string())
        .bind(user_id)
        .execute(pool)
        .await?;
    settings::ensure_setting(pool, room_id, user_id).await?;
    let profile = hood.display_profile(user_id).await?;
    let message = store::append_message(
        pool,
        room_id,
        MessageDetail::Join {
            member: user_id.to_owned(),
            nickname: profile.name,
        },
    )
    .await?;
    Ok(Some(message))
}

/// Leaving only flips the member's `departed` flag: the member row, the
/// counterpart's view and the message history all stay. Mate rooms get
/// an `exit` action message so remaining members see who left.
pub async fn leave_room(
    pool: &SqlitePool,
    hood: &Arc<dyn Neighborhood>,
    room_id: Uuid,
    user_id: &str,
) -> CoreResult<Option<store::Message>> {
    let room = get_room(pool, room_id).await?;
    settings::mark_departed(pool, room_id, user_id).await?;
    if room.kind != RoomKind::Mate {
        return Ok(None);
    }
    let profile = hood.display_profile(user_id).await?;
    let message = store::append_message(
        pool,
        room_id,
        MessageDetail::Exit {
            member: user_id.to_owned(),
            nickname: profile.name,
        },
    )
    .await?;
    Ok(Some(message))
}

/// One row of a member's room list, annotated for cheap rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomListEntry {
    pub room_id: Uuid,
    pub kind: RoomKind,
    pub title: String,
    pub avatar: Option<String>,
    pub region: String,
    pub last_message: String,
    pub last_message_at: Option<i64>,
    pub last_activity_label: String,
    pub alarm: bool,
    pub pinned: bool,
    pub block_status: BlockStatus,
}

fn relative_age(from: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - from).num_seconds().max(0);
    if elapsed < 60 {
        "방금 전".to_owned()
    } else if elapsed < 3600 {
        format!("{}분 전", elapsed / 60)
    } else if elapsed < 86400 {
        format!("{}시간 전", elapsed / 3600)
    } else {
        format!("{}일 전", elapsed / 86400)
    }
}

/// All rooms the viewer belongs to and has not left. Trade rooms are
/// titled with the counterpart's live display profile; mate rooms keep
/// their static metadata. Pinned rooms sort first, the rest by most
/// recent activity.
pub async fn room_list(
    pool: &SqlitePool,
    hood: &Arc<dyn Neighborhood>,
    viewer: &str,
) -> CoreResult<Vec<RoomListEntry>> {
    let rows: Vec<(String, String, String, String, String, Option<i64>, i64, bool, bool)> =
        sqlx::query_as(
            "SELECT r.id, r.kind, r.title, r.region, r.last_message, r.last_message_at, \
                    r.created_at, s.alarm, s.pinned \
             FROM rooms r JOIN room_settings s ON s.room_id = r.id \
             WHERE s.user_id=? AND s.departed=0",
        )
        .bind(viewer)
        .fetch_all(pool)
        .await?;

    let now = Utc::now();
    let mut entries = Vec::with_capacity(rows.len());
    for (id, kind, title, region, last_message, last_message_at, created_at, alarm, pinned) in rows
    {
        let room_id = Uuid::parse_str(&id).map_err(|e| CoreError::Validation(e.to_string()))?;
        let kind = RoomKind::parse(&kind)?;

        let (title, avatar, block_status) = match kind {
            RoomKind::Trade => match counterpart(pool, room_id, viewer).await? {
                Some(other) => {
                    let profile = hood.display_profile(&other).await?;
                    let status = settings::block_status(pool, viewer, &other).await?;
                    (profile.name, profile.avatar, status)
                }
                None => (title, None, BlockStatus::None),
            },
            RoomKind::Mate => (title, None, BlockStatus::None),
        };

        let activity = last_message_at.map(from_millis).unwrap_or(from_millis(created_at));
        entries.push(RoomListEntry {
            room_id,
            kind,
            title,
            avatar,
            region,
            last_message,
            last_message_at,
            last_activity_label: relative_age(activity, now),
            alarm,
            pinned,
            block_status,
        });
    }

    entries.sort_by(|a, b| {
        b.pinned.cmp(&a.pinned).then(
            b.last_message_at
                .unwrap_or(i64::MIN)
                .cmp(&a.last_message_at.unwrap_or(i64::MIN)),
        )
    });
    Ok(entries)
}

/// The other member of a trade room, if any.
pub async fn counterpart(
    pool: &SqlitePool,
    room_id: Uuid,
    viewer: &str,
) -> CoreResult<Option<UserId>> {
    let all = members(pool, room_id).await?;
    Ok(all.into_iter().find(|m| m != viewer))
}
