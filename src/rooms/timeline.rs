//! Read-time merge of the message log and the schedule table into the
//! member-facing chat view. Pure: fetch, project, sort, bucket, format;
//! no writes happen here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::settings;
use super::store::{self, MessageKind};
use super::{Room, RoomKind};
use crate::CoreResult;
use crate::auth::UserId;
use crate::collab::Neighborhood;

/// All display times are rendered in the service's home time zone.
const KST_SECONDS: i32 = 9 * 3600;

fn kst(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    match FixedOffset::east_opt(KST_SECONDS) {
        Some(offset) => offset.from_utc_datetime(&at.naive_utc()),
        None => unreachable!("fixed offset is in range"),
    }
}

pub fn date_label(at: DateTime<Utc>) -> String {
    let local = kst(at);
    format!("{}년 {}월 {}일", local.year(), local.month(), local.day())
}

pub fn minute_label(at: DateTime<Utc>) -> String {
    let local = kst(at);
    let hour = local.hour();
    let (meridiem, hour12) = if hour < 12 {
        ("오전", if hour == 0 { 12 } else { hour })
    } else {
        ("오후", if hour == 12 { 12 } else { hour - 12 })
    };
    format!("{meridiem} {hour12}:{:02}", local.minute())
}

/// Schedule entries always carry this full form, e.g. "8월 29일 (토) 오후 3:05".
pub fn full_label(at: DateTime<Utc>) -> String {
    const WEEKDAYS: [&str; 7] = ["일", "월", "화", "수", "목", "금", "토"];
    let local = kst(at);
    let weekday = WEEKDAYS[local.weekday().num_days_from_sunday() as usize];
    format!(
        "{}월 {}일 ({weekday}) {}",
        local.month(),
        local.day(),
        minute_label(at)
    )
}

/// A merged, not-yet-personalized timeline entry. Schedules are projected
/// into this shape at read time with their promised time as the sort and
/// display timestamp; they are never written into the message log.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub kind: MessageKind,
    pub sub_kind: &'static str,
    pub content: String,
    pub sender: Option<UserId>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    seq: i64,
    from_schedule: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: Uuid,
    pub kind: MessageKind,
    pub sub_kind: String,
    pub content: String,
    pub sender: Option<UserId>,
    pub is_me: bool,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    /// Absent when suppressed by the following entry's identical
    /// minute-formatted timestamp.
    pub time_label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateBucket {
    pub date: String,
    pub entries: Vec<TimelineEntry>,
}

/// Fetches and merges once per broadcast; personalization happens in
/// [`render_for`] so the fetch is shared across viewers.
pub async fn collect_entries(
    pool: &SqlitePool,
    hood: &Arc<dyn Neighborhood>,
    room: &Room,
) -> CoreResult<Vec<Entry>> {
    let messages = store::fetch_messages(pool, room.id).await?;
    let schedules = store::fetch_schedules(pool, room.id).await?;

    let mut entries = Vec::with_capacity(messages.len() + schedules.len());
    for message in messages {
        entries.push(Entry {
            id: message.id,
            at: message.sent_at,
            kind: message.detail.kind(),
            sub_kind: message.detail.sub_kind(),
            content: message.detail.display_text(),
            sender: message.detail.sender().map(str::to_owned),
            display_name: None,
            avatar: None,
            seq: message.seq,
            from_schedule: false,
        });
    }
    for schedule in schedules {
        entries.push(Entry {
            id: schedule.id,
            at: schedule.promised_at,
            kind: MessageKind::Message,
            sub_kind: "schedule",
            content: store::SCHEDULE_CREATED_SUMMARY.to_owned(),
            sender: Some(schedule.author),
            display_name: None,
            avatar: None,
            seq: 0,
            from_schedule: true,
        });
    }

    // True-insertion-order messages sort ahead of read-time schedule
    // projections at the same instant.
    entries.sort_by_key(|e| (store::to_millis(e.at), e.from_schedule, e.seq));

    if room.kind == RoomKind::Mate {
        let mut profiles: HashMap<UserId, crate::collab::DisplayProfile> = HashMap::new();
        for entry in &mut entries {
            let Some(sender) = entry.sender.clone() else { continue };
            let profile = match profiles.get(&sender) {
                Some(profile) => profile.clone(),
                None => {
                    let fetched = hood.display_profile(&sender).await?;
                    profiles.insert(sender, fetched.clone());
                    fetched
                }
            };
            entry.display_name = Some(profile.name);
            entry.avatar = profile.avatar;
        }
    }
    Ok(entries)
}

/// Per-viewer rendering: blocked senders are redacted, `is_me` tagged,
/// entries bucketed by calendar date, and a non-schedule entry's time
/// hidden when the entry immediately after it shares the same
/// minute-formatted timestamp.
pub fn render_for(entries: &[Entry], viewer: &str, blocked: &HashSet<UserId>) -> Vec<DateBucket> {
    let visible: Vec<&Entry> = entries
        .iter()
        .filter(|e| e.sender.as_deref().is_none_or(|s| !blocked.contains(s)))
        .collect();

    let mut buckets: Vec<DateBucket> = Vec::new();
    let mut keys: Vec<(String, bool)> = Vec::new(); // (minute label, is schedule)

    for entry in visible {
        let is_me = entry.sender.as_deref() == Some(viewer);
        let date = date_label(entry.at);
        let rendered = TimelineEntry {
            id: entry.id,
            kind: entry.kind,
            sub_kind: entry.sub_kind.to_owned(),
            content: entry.content.clone(),
            sender: entry.sender.clone(),
            is_me,
            display_name: if is_me { None } else { entry.display_name.clone() },
            avatar: if is_me { None } else { entry.avatar.clone() },
            time_label: Some(if entry.from_schedule {
                full_label(entry.at)
            } else {
                minute_label(entry.at)
            }),
        };
        match buckets.last_mut() {
            Some(bucket) if bucket.date == date => bucket.entries.push(rendered),
            _ => buckets.push(DateBucket {
                date,
                entries: vec![rendered],
            }),
        }
        keys.push((minute_label(entry.at), entry.from_schedule));
    }

    let mut offset = 0;
    for bucket in &mut buckets {
        let len = bucket.entries.len();
        for i in 0..len.saturating_sub(1) {
            let (ref key, is_schedule) = keys[offset + i];
            if !is_schedule && *key == keys[offset + i + 1].0 {
                bucket.entries[i].time_label = None;
            }
        }
        offset += len;
    }
    buckets
}

/// Convenience for a single viewer: collect, look up the viewer's block
/// list, render.
pub async fn room_timeline(
    pool: &SqlitePool,
    hood: &Arc<dyn Neighborhood>,
    room: &Room,
    viewer: &str,
) -> CoreResult<Vec<DateBucket>> {
    let entries = collect_entries(pool, hood, room).await?;
    let blocked: HashSet<UserId> = settings::blocked_by(pool, viewer).await?.into_iter().collect();
    Ok(render_for(&entries, viewer, &blocked))
}
