use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use uuid::Uuid;
use woori::auth::TokenAuthenticator;
use woori::collab::InMemoryNeighborhood;
use woori::rooms::settings::BlockStatus;
use woori::rooms::store::{self, MessageDetail, MessageKind};
use woori::rooms::{self, settings, timeline};
use woori::ws::event::ServerEvent;
use woori::ws::handler::dispatch;
use woori::{AppState, db, ws};

struct World {
    state: AppState,
    auth: Arc<TokenAuthenticator>,
}

async fn setup() -> World {
    let db_pool = db::connect("sqlite::memory:").await.expect("schema");
    let auth = Arc::new(TokenAuthenticator::new(Duration::minutes(30)));
    let hood = Arc::new(InMemoryNeighborhood::new());
    hood.add_profile("u1", "민수", Some("u1.png")).await;
    hood.add_profile("u2", "영희", Some("u2.png")).await;
    hood.add_address("u1", "행복동").await;
    hood.add_trade_board("b1", "유모차", 15000, "u2").await;
    hood.add_mate_board("m1", "저녁 산책 메이트", "u1", &["u2"]).await;
    let state = AppState {
        db_pool,
        registry: ws::ConnectionRegistry::new(),
        auth: auth.clone(),
        hood,
    };
    World { state, auth }
}

struct Client {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
    rx: UnboundedReceiver<ServerEvent>,
    credential: String,
}

impl Client {
    async fn connect(world: &World, user: &str) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        Client {
            conn_id: Uuid::now_v7(),
            tx,
            rx,
            credential: world.auth.issue(user).await,
        }
    }

    async fn send(&self, world: &World, mut payload: serde_json::Value) -> woori::CoreResult<()> {
        payload["credential"] = json!(self.credential);
        dispatch(&world.state, self.conn_id, &self.tx, payload).await
    }

    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

fn flatten(timeline: &[timeline::DateBucket]) -> Vec<&timeline::TimelineEntry> {
    timeline.iter().flat_map(|b| b.entries.iter()).collect()
}

#[tokio::test]
async fn trade_message_updates_summary_and_counterpart_view() {
    let world = setup().await;
    let room = rooms::create_trade_room(&world.state.db_pool, &world.state.hood, "u1", "b1")
        .await
        .unwrap();
    let t0 = Utc::now();

    let u1 = Client::connect(&world, "u1").await;
    u1.send(&world, json!({"event": "message", "room_id": room.id, "content": "안녕"}))
        .await
        .unwrap();

    let list = rooms::room_list(&world.state.db_pool, &world.state.hood, "u2")
        .await
        .unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].last_message, "안녕");
    // Counterpart annotation comes from u1's live profile.
    assert_eq!(list[0].title, "민수");
    let at = store::from_millis(list[0].last_message_at.unwrap());
    assert!((at - t0).num_seconds().abs() < 5);

    let view = timeline::room_timeline(&world.state.db_pool, &world.state.hood, &room, "u2")
        .await
        .unwrap();
    let entries = flatten(&view);
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].is_me);
    assert_eq!(entries[0].content, "안녕");
}

#[tokio::test]
async fn timeline_is_sorted_and_contains_every_event() {
    let world = setup().await;
    let room = rooms::create_trade_room(&world.state.db_pool, &world.state.hood, "u1", "b1")
        .await
        .unwrap();

    for i in 0..5 {
        store::append_message(
            &world.state.db_pool,
            room.id,
            MessageDetail::Trade {
                sender: if i % 2 == 0 { "u1" } else { "u2" }.to_owned(),
                content: format!("msg {i}"),
            },
        )
        .await
        .unwrap();
    }
    store::create_schedule(
        &world.state.db_pool,
        room.id,
        "u1",
        Utc::now() + Duration::hours(2),
        None,
    )
    .await
    .unwrap();

    let view = timeline::room_timeline(&world.state.db_pool, &world.state.hood, &room, "u1")
        .await
        .unwrap();
    let entries = flatten(&view);
    assert_eq!(entries.len(), 6);
    // Message entries keep append order; the schedule projection sorts
    // at its promised time, two hours out.
    let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(
        &contents[..5],
        &["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]
    );
    assert_eq!(entries[5].sub_kind, "schedule");
}

#[tokio::test]
async fn leaving_hides_the_room_for_the_leaver_only() {
    let world = setup().await;
    let room = rooms::create_trade_room(&world.state.db_pool, &world.state.hood, "u1", "b1")
        .await
        .unwrap();
    store::append_message(
        &world.state.db_pool,
        room.id,
        MessageDetail::Trade {
            sender: "u1".to_owned(),
            content: "잘 쓰던 거예요".to_owned(),
        },
    )
    .await
    .unwrap();

    let u1 = Client::connect(&world, "u1").await;
    u1.send(&world, json!({"event": "leave", "room_id": room.id}))
        .await
        .unwrap();

    let mine = rooms::room_list(&world.state.db_pool, &world.state.hood, "u1")
        .await
        .unwrap();
    assert!(mine.is_empty());
    let theirs = rooms::room_list(&world.state.db_pool, &world.state.hood, "u2")
        .await
        .unwrap();
    assert_eq!(theirs.len(), 1);
    // Nothing was deleted: membership and history survive.
    assert!(rooms::is_member(&world.state.db_pool, room.id, "u1").await.unwrap());
    let messages = store::fetch_messages(&world.state.db_pool, room.id).await.unwrap();
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn deleting_a_schedule_emits_exactly_one_cancellation_action() {
    let world = setup().await;
    let room = rooms::create_trade_room(&world.state.db_pool, &world.state.hood, "u1", "b1")
        .await
        .unwrap();
    let schedule = store::create_schedule(
        &world.state.db_pool,
        room.id,
        "u1",
        Utc::now() + Duration::hours(1),
        Some(10),
    )
    .await
    .unwrap();

    let u1 = Client::connect(&world, "u1").await;
    u1.send(&world, json!({"event": "delete-schedule", "schedule_id": schedule.id}))
        .await
        .unwrap();

    let messages = store::fetch_messages(&world.state.db_pool, room.id).await.unwrap();
    let cancels: Vec<_> = messages
        .iter()
        .filter(|m| matches!(m.detail, MessageDetail::ScheduleCancel { .. }))
        .collect();
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0].detail.kind(), MessageKind::Action);
    assert_eq!(cancels[0].detail.sub_kind(), "schedule_cancel");
    assert_eq!(cancels[0].detail.display_text(), "민수님이 약속을 취소했어요");

    // The schedule projection is gone and the cancellation renders.
    let view = timeline::room_timeline(&world.state.db_pool, &world.state.hood, &room, "u2")
        .await
        .unwrap();
    let entries = flatten(&view);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].sub_kind, "schedule_cancel");

    let updated = rooms::get_room(&world.state.db_pool, room.id).await.unwrap();
    assert_eq!(updated.last_message, "민수님이 약속을 취소했어요");
}

#[tokio::test]
async fn pinned_rooms_sort_before_recent_activity() {
    let world = setup().await;
    let trade = rooms::create_trade_room(&world.state.db_pool, &world.state.hood, "u1", "b1")
        .await
        .unwrap();
    let mate = rooms::create_mate_room(&world.state.db_pool, &world.state.hood, "m1")
        .await
        .unwrap();

    settings::toggle_flag(&world.state.db_pool, mate.id, "u1", settings::Flag::Pinned)
        .await
        .unwrap();
    // The unpinned trade room gets the most recent activity.
    store::append_message(
        &world.state.db_pool,
        trade.id,
        MessageDetail::Trade {
            sender: "u2".to_owned(),
            content: "아직 있나요?".to_owned(),
        },
    )
    .await
    .unwrap();

    let list = rooms::room_list(&world.state.db_pool, &world.state.hood, "u1")
        .await
        .unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].room_id, mate.id);
    assert!(list[0].pinned);
}

#[tokio::test]
async fn blocking_is_directional() {
    let world = setup().await;
    settings::block(&world.state.db_pool, "u1", "u2").await.unwrap();

    let from_u1 = settings::block_status(&world.state.db_pool, "u1", "u2").await.unwrap();
    assert_eq!(from_u1, BlockStatus::ByMe);
    let from_u2 = settings::block_status(&world.state.db_pool, "u2", "u1").await.unwrap();
    assert_eq!(from_u2, BlockStatus::None);
}

#[tokio::test]
async fn schedule_alarm_time_recomputes_on_update() {
    let world = setup().await;
    let room = rooms::create_trade_room(&world.state.db_pool, &world.state.hood, "u1", "b1")
        .await
        .unwrap();
    let t1 = Utc::now() + Duration::hours(3);
    let schedule =
        store::create_schedule(&world.state.db_pool, room.id, "u1", t1, Some(30))
            .await
            .unwrap();
    assert_eq!(schedule.alarm_at, Some(t1 - Duration::minutes(30)));

    let t2 = t1 + Duration::days(1);
    let updated = store::update_schedule(&world.state.db_pool, schedule.id, t2, None)
        .await
        .unwrap();
    assert_eq!(updated.promised_at, t2);
    assert_eq!(updated.alarm_at, None);

    // Two coexisting schedules are legal; conflicts are advisory only.
    store::create_schedule(&world.state.db_pool, room.id, "u2", t2, None)
        .await
        .unwrap();
    let all = store::fetch_schedules(&world.state.db_pool, room.id).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn expired_credential_rejects_the_event_without_side_effects() {
    let world = setup().await;
    let room = rooms::create_trade_room(&world.state.db_pool, &world.state.hood, "u1", "b1")
        .await
        .unwrap();

    // u2 is attached and would see any broadcast.
    let mut u2 = Client::connect(&world, "u2").await;
    u2.send(&world, json!({"event": "chat-list", "room_id": room.id}))
        .await
        .unwrap();
    u2.drain();

    let mut u1 = Client::connect(&world, "u1").await;
    u1.credential = world
        .auth
        .issue_expiring_at("u1", Utc::now() - Duration::seconds(1))
        .await;
    let err = u1
        .send(&world, json!({"event": "message", "room_id": room.id, "content": "안녕"}))
        .await
        .unwrap_err();
    assert_eq!(err.classification(), "expired");

    let messages = store::fetch_messages(&world.state.db_pool, room.id).await.unwrap();
    assert!(messages.is_empty());
    assert!(u2.drain().is_empty());

    // An outright unknown credential classifies differently.
    u1.credential = "garbage".to_owned();
    let err = u1
        .send(&world, json!({"event": "room-list"}))
        .await
        .unwrap_err();
    assert_eq!(err.classification(), "invalid");
}

#[tokio::test]
async fn broadcasts_reach_every_connection_of_every_member() {
    let world = setup().await;
    let room = rooms::create_trade_room(&world.state.db_pool, &world.state.hood, "u1", "b1")
        .await
        .unwrap();

    // u2 on two devices, both attached to the room.
    let mut phone = Client::connect(&world, "u2").await;
    let mut tablet = Client::connect(&world, "u2").await;
    for client in [&phone, &tablet] {
        client
            .send(&world, json!({"event": "chat-list", "room_id": room.id}))
            .await
            .unwrap();
    }
    phone.drain();
    tablet.drain();

    let u1 = Client::connect(&world, "u1").await;
    u1.send(&world, json!({"event": "message", "room_id": room.id, "content": "팔렸나요?"}))
        .await
        .unwrap();

    for client in [&mut phone, &mut tablet] {
        let events = client.drain();
        let timeline_push = events.iter().find_map(|e| match e {
            ServerEvent::ChatList { timeline, .. } => Some(timeline),
            _ => None,
        });
        let entries = flatten(timeline_push.expect("timeline push"));
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].is_me);
        assert!(events.iter().any(|e| matches!(e, ServerEvent::RoomList { .. })));
    }
}

#[tokio::test]
async fn mate_join_is_idempotent_and_records_one_join_action() {
    let world = setup().await;
    let room = rooms::create_mate_room(&world.state.db_pool, &world.state.hood, "m1")
        .await
        .unwrap();
    let members = rooms::members(&world.state.db_pool, room.id).await.unwrap();
    assert_eq!(members, vec!["u1".to_owned(), "u2".to_owned()]);

    let joined = rooms::join_mate_room(&world.state.db_pool, &world.state.hood, room.id, "u3")
        .await
        .unwrap();
    assert!(joined.is_some());
    let again = rooms::join_mate_room(&world.state.db_pool, &world.state.hood, room.id, "u3")
        .await
        .unwrap();
    assert!(again.is_none());

    let messages = store::fetch_messages(&world.state.db_pool, room.id).await.unwrap();
    let joins: Vec<_> = messages
        .iter()
        .filter(|m| matches!(m.detail, MessageDetail::Join { .. }))
        .collect();
    assert_eq!(joins.len(), 1);

    // Mate timelines enrich other members' entries with live profiles.
    let view = timeline::room_timeline(&world.state.db_pool, &world.state.hood, &room, "u1")
        .await
        .unwrap();
    let entries = flatten(&view);
    assert_eq!(entries[0].sub_kind, "join");
}

#[tokio::test]
async fn patch_used_item_status_pushes_trade_info_to_the_room() {
    let world = setup().await;
    let room = rooms::create_trade_room(&world.state.db_pool, &world.state.hood, "u1", "b1")
        .await
        .unwrap();

    let mut u2 = Client::connect(&world, "u2").await;
    u2.send(&world, json!({"event": "chat-list", "room_id": room.id}))
        .await
        .unwrap();
    u2.drain();

    let u1 = Client::connect(&world, "u1").await;
    u1.send(
        &world,
        json!({
            "event": "patch-used-item-status",
            "room_id": room.id,
            "board_id": "b1",
            "status": "판매완료",
        }),
    )
    .await
    .unwrap();

    let events = u2.drain();
    let info = events
        .iter()
        .find_map(|e| match e {
            ServerEvent::TradeInfo { info, .. } => Some(info),
            _ => None,
        })
        .expect("trade info push");
    assert_eq!(info.status, "판매완료");
}

#[tokio::test]
async fn alarm_event_toggles_and_reports_the_new_value() {
    let world = setup().await;
    let room = rooms::create_trade_room(&world.state.db_pool, &world.state.hood, "u1", "b1")
        .await
        .unwrap();

    let mut u1 = Client::connect(&world, "u1").await;
    u1.send(&world, json!({"event": "alarm", "room_id": room.id}))
        .await
        .unwrap();
    let events = u1.drain();
    let alarm = events
        .iter()
        .find_map(|e| match e {
            ServerEvent::Alarm { alarm, .. } => Some(*alarm),
            _ => None,
        })
        .expect("alarm push");
    // Defaults to on, so the first toggle turns it off.
    assert!(!alarm);
}
