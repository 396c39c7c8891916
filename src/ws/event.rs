use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::UserId;
use crate::collab::TradeInfo;
use crate::rooms::RoomListEntry;
use crate::rooms::timeline::DateBucket;

/// Inbound event envelope. Every event carries the caller's bearer
/// credential: it is re-validated per event, not per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom {
        room_id: Uuid,
        credential: String,
    },
    RoomList {
        credential: String,
    },
    ChatList {
        room_id: Uuid,
        credential: String,
    },
    Message {
        room_id: Uuid,
        content: String,
        credential: String,
    },
    Leave {
        room_id: Uuid,
        credential: String,
    },
    Alarm {
        room_id: Uuid,
        credential: String,
    },
    Blocked {
        counterpart_id: UserId,
        credential: String,
    },
    Schedule {
        room_id: Uuid,
        promised_at: i64,
        lead_minutes: Option<i64>,
        credential: String,
    },
    PatchSchedule {
        schedule_id: Uuid,
        promised_at: i64,
        lead_minutes: Option<i64>,
        credential: String,
    },
    DeleteSchedule {
        schedule_id: Uuid,
        credential: String,
    },
    PatchUsedItemStatus {
        room_id: Uuid,
        board_id: String,
        status: String,
        credential: String,
    },
}

impl ClientEvent {
    pub fn credential(&self) -> &str {
        match self {
            ClientEvent::JoinRoom { credential, .. }
            | ClientEvent::RoomList { credential }
            | ClientEvent::ChatList { credential, .. }
            | ClientEvent::Message { credential, .. }
            | ClientEvent::Leave { credential, .. }
            | ClientEvent::Alarm { credential, .. }
            | ClientEvent::Blocked { credential, .. }
            | ClientEvent::Schedule { credential, .. }
            | ClientEvent::PatchSchedule { credential, .. }
            | ClientEvent::DeleteSchedule { credential, .. }
            | ClientEvent::PatchUsedItemStatus { credential, .. } => credential,
        }
    }
}

/// Outbound pushes. `Error` echoes the failed event's name and payload
/// on the originating connection only, with `classification` telling the
/// client whether a credential refresh makes a retry worthwhile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    RoomList {
        rooms: Vec<RoomListEntry>,
    },
    ChatList {
        room_id: Uuid,
        timeline: Vec<DateBucket>,
    },
    Alarm {
        room_id: Uuid,
        alarm: bool,
    },
    TradeInfo {
        room_id: Uuid,
        info: TradeInfo,
    },
    Error {
        source_event: String,
        payload: Value,
        classification: String,
        message: String,
    },
}
