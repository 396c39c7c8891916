//! The websocket gateway: one socket task per connection, one dispatch
//! per inbound event. Authentication runs before any store mutation, so
//! a rejected event leaves no partial state behind.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use uuid::Uuid;

use crate::rooms::store::MessageDetail;
use crate::rooms::{self, settings, store, timeline, RoomKind};
use crate::ws::event::{ClientEvent, ServerEvent};
use crate::ws::{self, ConnectionHandle};
use crate::{AppState, CoreError, CoreResult};

pub async fn chat_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(async move |socket| handle_socket(state, socket).await)
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let conn_id = Uuid::now_v7();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    tracing::info!(%conn_id, "connection opened");

    while let Some(Ok(frame)) = stream.next().await {
        let WsMessage::Text(text) = frame else {
            continue;
        };
        let raw: Value = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(err) => {
                let _ = tx.send(error_event(
                    Value::String(text.to_string()),
                    &CoreError::Validation(err.to_string()),
                ));
                continue;
            }
        };
        if let Err(err) = dispatch(&state, conn_id, &tx, raw.clone()).await {
            tracing::debug!(%conn_id, error = %err, "event rejected");
            let _ = tx.send(error_event(raw, &err));
        }
    }

    state.registry.remove_connection(conn_id).await;
    send_task.abort();
    tracing::info!(%conn_id, "connection closed");
}

/// Failures are reported on the originating connection only, echoing
/// the event name and payload as received; nothing is broadcast.
fn error_event(payload: Value, err: &CoreError) -> ServerEvent {
    let source_event = payload
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_owned();
    ServerEvent::Error {
        source_event,
        payload,
        classification: err.classification().to_owned(),
        message: err.to_string(),
    }
}

async fn require_member(state: &AppState, room_id: Uuid, user_id: &str) -> CoreResult<()> {
    if rooms::is_member(&state.db_pool, room_id, user_id).await? {
        Ok(())
    } else {
        Err(CoreError::Validation("not a room member".to_owned()))
    }
}

/// One inbound event: authenticate, mutate, then fan out. Interleaving
/// with other events on the same room happens only at store calls and
/// outbound pushes; observed message order per room is the order the
/// durable writes commit.
pub async fn dispatch(
    state: &AppState,
    conn_id: Uuid,
    tx: &UnboundedSender<ServerEvent>,
    raw: Value,
) -> CoreResult<()> {
    let event: ClientEvent =
        serde_json::from_value(raw).map_err(|e| CoreError::Validation(e.to_string()))?;
    let user_id = state.auth.authenticate(event.credential()).await?;
    let handle = ConnectionHandle {
        conn_id,
        user_id: user_id.clone(),
        tx: tx.clone(),
    };
    state.registry.attach_user(&handle).await;

    match event {
        ClientEvent::JoinRoom { room_id, .. } => {
            rooms::get_room(&state.db_pool, room_id).await?;
            state.registry.attach_room(room_id, &handle).await;
        }

        ClientEvent::RoomList { .. } => {
            let list = rooms::room_list(&state.db_pool, &state.hood, &user_id).await?;
            let _ = tx.send(ServerEvent::RoomList { rooms: list });
        }

        ClientEvent::ChatList { room_id, .. } => {
            let room = rooms::get_room(&state.db_pool, room_id).await?;
            require_member(state, room_id, &user_id).await?;
            state.registry.attach_room(room_id, &handle).await;
            let view = timeline::room_timeline(&state.db_pool, &state.hood, &room, &user_id).await?;
            let _ = tx.send(ServerEvent::ChatList {
                room_id,
                timeline: view,
            });
            if room.kind == RoomKind::Trade {
                if let Some(board_id) = &room.board_id {
                    let info = state.hood.trade_info(board_id).await?;
                    let _ = tx.send(ServerEvent::TradeInfo { room_id, info });
                }
            }
        }

        ClientEvent::Message {
            room_id, content, ..
        } => {
            let room = rooms::get_room(&state.db_pool, room_id).await?;
            require_member(state, room_id, &user_id).await?;
            let detail = match room.kind {
                RoomKind::Trade => MessageDetail::Trade {
                    sender: user_id.clone(),
                    content,
                },
                RoomKind::Mate => MessageDetail::Mate {
                    sender: user_id.clone(),
                    content,
                },
            };
            store::append_message(&state.db_pool, room_id, detail).await?;
            let members = rooms::members(&state.db_pool, room_id).await?;
            ws::broadcast_room_timeline(&state.db_pool, &state.hood, &state.registry, room_id)
                .await?;
            ws::broadcast_room_list(&state.db_pool, &state.hood, &state.registry, &members)
                .await?;
        }

        ClientEvent::Leave { room_id, .. } => {
            let exit_message =
                rooms::leave_room(&state.db_pool, &state.hood, room_id, &user_id).await?;
            state.registry.detach_room(room_id, conn_id).await;
            let members = rooms::members(&state.db_pool, room_id).await?;
            ws::broadcast_room_list(&state.db_pool, &state.hood, &state.registry, &members)
                .await?;
            if exit_message.is_some() {
                ws::broadcast_room_timeline(&state.db_pool, &state.hood, &state.registry, room_id)
                    .await?;
            }
        }

        ClientEvent::Alarm { room_id, .. } => {
            let alarm =
                settings::toggle_flag(&state.db_pool, room_id, &user_id, settings::Flag::Alarm)
                    .await?;
            let _ = tx.send(ServerEvent::Alarm { room_id, alarm });
            ws::broadcast_room_list(
                &state.db_pool,
                &state.hood,
                &state.registry,
                &[user_id.clone()],
            )
            .await?;
        }

        ClientEvent::Blocked { counterpart_id, .. } => {
            settings::block(&state.db_pool, &user_id, &counterpart_id).await?;
            ws::broadcast_room_list(
                &state.db_pool,
                &state.hood,
                &state.registry,
                &[user_id.clone()],
            )
            .await?;
        }

        ClientEvent::Schedule {
            room_id,
            promised_at,
            lead_minutes,
            ..
        } => {
            rooms::get_room(&state.db_pool, room_id).await?;
            store::create_schedule(
                &state.db_pool,
                room_id,
                &user_id,
                store::from_millis(promised_at),
                lead_minutes,
            )
            .await?;
            let members = rooms::members(&state.db_pool, room_id).await?;
            ws::broadcast_room_timeline(&state.db_pool, &state.hood, &state.registry, room_id)
                .await?;
            ws::broadcast_room_list(&state.db_pool, &state.hood, &state.registry, &members)
                .await?;
        }

        ClientEvent::PatchSchedule {
            schedule_id,
            promised_at,
            lead_minutes,
            ..
        } => {
            let schedule = store::update_schedule(
                &state.db_pool,
                schedule_id,
                store::from_millis(promised_at),
                lead_minutes,
            )
            .await?;
            ws::broadcast_room_timeline(
                &state.db_pool,
                &state.hood,
                &state.registry,
                schedule.room_id,
            )
            .await?;
        }

        ClientEvent::DeleteSchedule { schedule_id, .. } => {
            let profile = state.hood.display_profile(&user_id).await?;
            let room_id =
                store::delete_schedule(&state.db_pool, schedule_id, &profile.name).await?;
            let members = rooms::members(&state.db_pool, room_id).await?;
            ws::broadcast_room_timeline(&state.db_pool, &state.hood, &state.registry, room_id)
                .await?;
            ws::broadcast_room_list(&state.db_pool, &state.hood, &state.registry, &members)
                .await?;
        }

        ClientEvent::PatchUsedItemStatus {
            room_id,
            board_id,
            status,
            ..
        } => {
            rooms::get_room(&state.db_pool, room_id).await?;
            let info = state.hood.update_board_status(&board_id, &status).await?;
            for conn in state.registry.room_connections(room_id).await {
                let _ = conn.tx.send(ServerEvent::TradeInfo {
                    room_id,
                    info: info.clone(),
                });
            }
        }
    }
    Ok(())
}
