//! Connection registry and broadcast router. The registry is the only
//! place live connections are tracked: identities and room ids only,
//! never cached business data. It is per-process state; horizontal
//! scaling would put a shared pub/sub layer in front of it.

pub mod event;
pub mod handler;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{RwLock, mpsc::UnboundedSender};
use uuid::Uuid;

use crate::CoreResult;
use crate::auth::UserId;
use crate::collab::Neighborhood;
use crate::rooms::{self, settings, timeline};
use event::ServerEvent;

/// A live transport session: one authenticated identity, attached to
/// zero or more rooms. A member may hold several at once (multiple
/// devices), and all of them receive pushes.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    pub user_id: UserId,
    pub tx: UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct RegistryInner {
    rooms: HashMap<Uuid, Vec<ConnectionHandle>>,
    users: HashMap<UserId, Vec<ConnectionHandle>>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records which identity a connection currently authenticates as.
    /// Re-authentication under a different identity moves the handle.
    pub async fn attach_user(&self, handle: &ConnectionHandle) {
        let mut inner = self.inner.write().await;
        for (user, handles) in inner.users.iter_mut() {
            if user != &handle.user_id {
                handles.retain(|h| h.conn_id != handle.conn_id);
            }
        }
        let handles = inner.users.entry(handle.user_id.clone()).or_default();
        if !handles.iter().any(|h| h.conn_id == handle.conn_id) {
            handles.push(handle.clone());
        }
    }

    pub async fn attach_room(&self, room_id: Uuid, handle: &ConnectionHandle) {
        let mut inner = self.inner.write().await;
        let handles = inner.rooms.entry(room_id).or_default();
        handles.retain(|h| h.conn_id != handle.conn_id);
        handles.push(handle.clone());
    }

    pub async fn detach_room(&self, room_id: Uuid, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(handles) = inner.rooms.get_mut(&room_id) {
            handles.retain(|h| h.conn_id != conn_id);
        }
    }

    /// Drops a closed connection from every map.
    pub async fn remove_connection(&self, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        for handles in inner.rooms.values_mut() {
            handles.retain(|h| h.conn_id != conn_id);
        }
        for handles in inner.users.values_mut() {
            handles.retain(|h| h.conn_id != conn_id);
        }
    }

    pub async fn room_connections(&self, room_id: Uuid) -> Vec<ConnectionHandle> {
        self.inner
            .read()
            .await
            .rooms
            .get(&room_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn user_connections(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.inner
            .read()
            .await
            .users
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Recomputes the merged timeline once, then pushes a per-viewer copy
/// (`is_me` tagging, block redactions) to every connection attached to
/// the room. Callers invoke this only after the triggering mutation's
/// durable write returned, so every recipient sees that write.
pub async fn broadcast_room_timeline(
    pool: &SqlitePool,
    hood: &Arc<dyn Neighborhood>,
    registry: &ConnectionRegistry,
    room_id: Uuid,
) -> CoreResult<()> {
    let room = rooms::get_room(pool, room_id).await?;
    let entries = timeline::collect_entries(pool, hood, &room).await?;
    for conn in registry.room_connections(room_id).await {
        let blocked: HashSet<UserId> = settings::blocked_by(pool, &conn.user_id)
            .await?
            .into_iter()
            .collect();
        let view = timeline::render_for(&entries, &conn.user_id, &blocked);
        // A failed send just means the connection is gone; it gets
        // pruned when the socket task exits.
        let _ = conn.tx.send(ServerEvent::ChatList {
            room_id,
            timeline: view,
        });
    }
    Ok(())
}

/// Recomputes each member's room list and pushes it to all of that
/// member's live connections.
pub async fn broadcast_room_list(
    pool: &SqlitePool,
    hood: &Arc<dyn Neighborhood>,
    registry: &ConnectionRegistry,
    members: &[UserId],
) -> CoreResult<()> {
    for member in members {
        let conns = registry.user_connections(member).await;
        if conns.is_empty() {
            continue;
        }
        let list = rooms::room_list(pool, hood, member).await?;
        for conn in conns {
            let _ = conn.tx.send(ServerEvent::RoomList { rooms: list.clone() });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle(conn_id: Uuid, user: &str) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ConnectionHandle {
                conn_id,
                user_id: user.to_owned(),
                tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn a_user_may_hold_multiple_connections() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = handle(Uuid::now_v7(), "u1");
        let (b, _rx_b) = handle(Uuid::now_v7(), "u1");
        registry.attach_user(&a).await;
        registry.attach_user(&b).await;
        assert_eq!(registry.user_connections("u1").await.len(), 2);
    }

    #[tokio::test]
    async fn closed_connections_disappear_everywhere() {
        let registry = ConnectionRegistry::new();
        let room = Uuid::now_v7();
        let (a, _rx) = handle(Uuid::now_v7(), "u1");
        registry.attach_user(&a).await;
        registry.attach_room(room, &a).await;
        registry.remove_connection(a.conn_id).await;
        assert!(registry.user_connections("u1").await.is_empty());
        assert!(registry.room_connections(room).await.is_empty());
    }

    #[tokio::test]
    async fn reauthentication_moves_the_handle() {
        let registry = ConnectionRegistry::new();
        let conn_id = Uuid::now_v7();
        let (a, _rx) = handle(conn_id, "u1");
        registry.attach_user(&a).await;
        let (b, _rx2) = handle(conn_id, "u2");
        registry.attach_user(&b).await;
        assert!(registry.user_connections("u1").await.is_empty());
        assert_eq!(registry.user_connections("u2").await.len(), 1);
    }
}
