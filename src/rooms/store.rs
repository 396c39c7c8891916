use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::auth::UserId;
use crate::{CoreError, CoreResult};

/// Room summary text shown while a schedule exists, fixed regardless of
/// the promised time.
pub const SCHEDULE_CREATED_SUMMARY: &str = "산책 약속이 잡혔어요";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Message,
    Action,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Message => "message",
            MessageKind::Action => "action",
        }
    }
}

/// One case per sub-kind, each carrying only its own fields; persisted
/// as a JSON column next to the coarse `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sub_kind", rename_all = "snake_case")]
pub enum MessageDetail {
    Trade { sender: UserId, content: String },
    Mate { sender: UserId, content: String },
    Join { member: UserId, nickname: String },
    Exit { member: UserId, nickname: String },
    ScheduleCancel { canceled_by: String },
}

impl MessageDetail {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageDetail::Trade { .. } | MessageDetail::Mate { .. } => MessageKind::Message,
            _ => MessageKind::Action,
        }
    }

    pub fn sub_kind(&self) -> &'static str {
        match self {
            MessageDetail::Trade { .. } => "trade",
            MessageDetail::Mate { .. } => "mate",
            MessageDetail::Join { .. } => "join",
            MessageDetail::Exit { .. } => "exit",
            MessageDetail::ScheduleCancel { .. } => "schedule_cancel",
        }
    }

    pub fn sender(&self) -> Option<&str> {
        match self {
            MessageDetail::Trade { sender, .. } | MessageDetail::Mate { sender, .. } => {
                Some(sender)
            }
            _ => None,
        }
    }

    /// The human-readable text: timeline body and room-list summary both
    /// render this.
    pub fn display_text(&self) -> String {
        match self {
            MessageDetail::Trade { content, .. } | MessageDetail::Mate { content, .. } => {
                content.clone()
            }
            MessageDetail::Join { nickname, .. } => format!("{nickname}님이 입장했어요"),
            MessageDetail::Exit { nickname, .. } => format!("{nickname}님이 나갔어요"),
            MessageDetail::ScheduleCancel { canceled_by } => {
                format!("{canceled_by}님이 약속을 취소했어요")
            }
        }
    }
}

/// Immutable once written; `seq` is the insertion-order tie-breaker for
/// rows sharing a `sent_at` millisecond.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub detail: MessageDetail,
    pub sent_at: DateTime<Utc>,
    pub seq: i64,
}

pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Persists the message, then refreshes the room's denormalized
/// summary. The two writes are one logical unit but durability of the
/// message wins: a failed summary update is logged and swallowed, it
/// only means the room list shows stale text until the next append.
pub async fn append_message(
    pool: &SqlitePool,
    room_id: Uuid,
    detail: MessageDetail,
) -> CoreResult<Message> {
    let id = Uuid::now_v7();
    let sent_at = Utc::now();
    let result = sqlx::query(
        "INSERT INTO messages (id, room_id, kind, detail, sent_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(room_id.to_string())
    .bind(detail.kind().as_str())
    .bind(serde_json::to_string(&detail).map_err(|e| CoreError::Validation(e.to_string()))?)
    .bind(to_millis(sent_at))
    .execute(pool)
    .await?;

    if let Err(err) = update_summary(pool, room_id, &detail.display_text(), Some(sent_at)).await {
        tracing::warn!(%room_id, error = %err, "room summary update failed after message append");
    }

    Ok(Message {
        id,
        room_id,
        detail,
        sent_at,
        seq: result.last_insert_rowid(),
    })
}

async fn update_summary(
    pool: &SqlitePool,
    room_id: Uuid,
    text: &str,
    at: Option<DateTime<Utc>>,
) -> CoreResult<()> {
    sqlx::query("UPDATE rooms SET last_message=?, last_message_at=? WHERE id=?")
        .bind(text)
        .bind(at.map(to_millis))
        .bind(room_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn fetch_messages(pool: &SqlitePool, room_id: Uuid) -> CoreResult<Vec<Message>> {
    let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
        "SELECT id, detail, sent_at, rowid FROM messages WHERE room_id=? ORDER BY sent_at, rowid",
    )
    .bind(room_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut messages = Vec::with_capacity(rows.len());
    for (id, detail, sent_at, seq) in rows {
        messages.push(Message {
            id: Uuid::parse_str(&id).map_err(|e| CoreError::Validation(e.to_string()))?,
            room_id,
            detail: serde_json::from_str(&detail)
                .map_err(|e| CoreError::Validation(e.to_string()))?,
            sent_at: from_millis(sent_at),
            seq,
        });
    }
    Ok(messages)
}

/// A proposed real-world meeting tied to a room. Mutable, unlike
/// messages; nothing here is denormalized into the message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub room_id: Uuid,
    pub author: UserId,
    pub promised_at: DateTime<Utc>,
    pub lead_minutes: Option<i64>,
    pub alarm_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn alarm_at(promised_at: DateTime<Utc>, lead_minutes: Option<i64>) -> Option<DateTime<Utc>> {
    lead_minutes.map(|m| promised_at - Duration::minutes(m))
}

pub async fn create_schedule(
    pool: &SqlitePool,
    room_id: Uuid,
    author: &str,
    promised_at: DateTime<Utc>,
    lead_minutes: Option<i64>,
) -> CoreResult<Schedule> {
    let schedule = Schedule {
        id: Uuid::now_v7(),
        room_id,
        author: author.to_owned(),
        promised_at,
        lead_minutes,
        alarm_at: alarm_at(promised_at, lead_minutes),
        created_at: Utc::now(),
    };
    sqlx::query(
        "INSERT INTO schedules (id, room_id, author, promised_at, lead_minutes, alarm_at, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(schedule.id.to_string())
    .bind(room_id.to_string())
    .bind(&schedule.author)
    .bind(to_millis(promised_at))
    .bind(lead_minutes)
    .bind(schedule.alarm_at.map(to_millis))
    .bind(to_millis(schedule.created_at))
    .execute(pool)
    .await?;

    if let Err(err) = update_summary(pool, room_id, SCHEDULE_CREATED_SUMMARY, Some(Utc::now())).await {
        tracing::warn!(%room_id, error = %err, "room summary update failed after schedule create");
    }
    Ok(schedule)
}

pub async fn get_schedule(pool: &SqlitePool, id: Uuid) -> CoreResult<Schedule> {
    let row: Option<(String, String, i64, Option<i64>, Option<i64>, i64)> = sqlx::query_as(
        "SELECT room_id, author, promised_at, lead_minutes, alarm_at, created_at \
         FROM schedules WHERE id=?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;
    let (room_id, author, promised_at, lead_minutes, alarm_at, created_at) =
        row.ok_or(CoreError::NotFound("schedule"))?;
    Ok(Schedule {
        id,
        room_id: Uuid::parse_str(&room_id).map_err(|e| CoreError::Validation(e.to_string()))?,
        author,
        promised_at: from_millis(promised_at),
        lead_minutes,
        alarm_at: alarm_at.map(from_millis),
        created_at: from_millis(created_at),
    })
}

/// Recomputes the alarm-fire time; dropping the lead time disables the
/// alarm. No message is appended for schedule edits.
pub async fn update_schedule(
    pool: &SqlitePool,
    id: Uuid,
    promised_at: DateTime<Utc>,
    lead_minutes: Option<i64>,
) -> CoreResult<Schedule> {
    let mut schedule = get_schedule(pool, id).await?;
    schedule.promised_at = promised_at;
    schedule.lead_minutes = lead_minutes;
    schedule.alarm_at = alarm_at(promised_at, lead_minutes);
    sqlx::query("UPDATE schedules SET promised_at=?, lead_minutes=?, alarm_at=? WHERE id=?")
        .bind(to_millis(promised_at))
        .bind(lead_minutes)
        .bind(schedule.alarm_at.map(to_millis))
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(schedule)
}

/// Removes the schedule, records one cancellation action message in the
/// deleter's display name, and returns the owning room so the caller can
/// broadcast.
pub async fn delete_schedule(
    pool: &SqlitePool,
    id: Uuid,
    deleted_by_name: &str,
) -> CoreResult<Uuid> {
    let schedule = get_schedule(pool, id).await?;
    sqlx::query("DELETE FROM schedules WHERE id=?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    append_message(
        pool,
        schedule.room_id,
        MessageDetail::ScheduleCancel {
            canceled_by: deleted_by_name.to_owned(),
        },
    )
    .await?;
    Ok(schedule.room_id)
}

pub async fn fetch_schedules(pool: &SqlitePool, room_id: Uuid) -> CoreResult<Vec<Schedule>> {
    let rows: Vec<(String, String, i64, Option<i64>, Option<i64>, i64)> = sqlx::query_as(
        "SELECT id, author, promised_at, lead_minutes, alarm_at, created_at \
         FROM schedules WHERE room_id=? ORDER BY promised_at",
    )
    .bind(room_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut schedules = Vec::with_capacity(rows.len());
    for (id, author, promised_at, lead_minutes, alarm_at, created_at) in rows {
        schedules.push(Schedule {
            id: Uuid::parse_str(&id).map_err(|e| CoreError::Validation(e.to_string()))?,
            room_id,
            author,
            promised_at: from_millis(promised_at),
            lead_minutes,
            alarm_at: alarm_at.map(from_millis),
            created_at: from_millis(created_at),
        });
    }
    Ok(schedules)
}
