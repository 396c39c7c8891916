use std::collections::HashMap;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::auth::UserId;
use crate::{CoreError, CoreResult};

/// How a user is shown to others, fetched at read time so profile edits
/// propagate immediately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayProfile {
    pub name: String,
    pub avatar: Option<String>,
}

/// Board metadata pushed to trade rooms as the `trade-info` view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeInfo {
    pub board_id: String,
    pub title: String,
    pub price: Option<i64>,
    pub status: String,
    pub seller: UserId,
}

/// The boards, profiles and address services the chat core consumes.
/// They are black boxes here; the chat core never owns their data.
#[async_trait]
pub trait Neighborhood: Send + Sync {
    async fn resolve_board_seller(&self, board_id: &str) -> CoreResult<UserId>;
    async fn resolve_approved_applicants(&self, board_id: &str) -> CoreResult<Vec<UserId>>;
    async fn display_profile(&self, user_id: &str) -> CoreResult<DisplayProfile>;
    async fn recent_address(&self, user_id: &str) -> CoreResult<String>;
    async fn trade_info(&self, board_id: &str) -> CoreResult<TradeInfo>;
    async fn update_board_status(&self, board_id: &str, status: &str) -> CoreResult<TradeInfo>;
}

#[derive(Debug, Clone)]
struct Board {
    title: String,
    price: Option<i64>,
    status: String,
    author: UserId,
    applicants: Vec<UserId>,
}

#[derive(Default)]
struct HoodInner {
    boards: HashMap<String, Board>,
    profiles: HashMap<UserId, DisplayProfile>,
    addresses: HashMap<UserId, String>,
}

/// In-process stand-in for the collaborator services, used by the
/// default binary wiring and the test suite.
#[derive(Default)]
pub struct InMemoryNeighborhood {
    inner: RwLock<HoodInner>,
}

impl InMemoryNeighborhood {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_profile(&self, user_id: &str, name: &str, avatar: Option<&str>) {
        self.inner.write().await.profiles.insert(
            user_id.to_owned(),
            DisplayProfile {
                name: name.to_owned(),
                avatar: avatar.map(str::to_owned),
            },
        );
    }

    pub async fn add_address(&self, user_id: &str, region: &str) {
        self.inner
            .write()
            .await
            .addresses
            .insert(user_id.to_owned(), region.to_owned());
    }

    pub async fn add_trade_board(&self, board_id: &str, title: &str, price: i64, seller: &str) {
        self.inner.write().await.boards.insert(
            board_id.to_owned(),
            Board {
                title: title.to_owned(),
                price: Some(price),
                status: "판매중".to_owned(),
                author: seller.to_owned(),
                applicants: Vec::new(),
            },
        );
    }

    pub async fn add_mate_board(&self, board_id: &str, title: &str, author: &str, approved: &[&str]) {
        self.inner.write().await.boards.insert(
            board_id.to_owned(),
            Board {
                title: title.to_owned(),
                price: None,
                status: "모집중".to_owned(),
                author: author.to_owned(),
                applicants: approved.iter().map(|u| (*u).to_owned()).collect(),
            },
        );
    }
}

const MAX_NICKNAME_ATTEMPTS: usize = 16;

/// Picks an adjective/noun nickname, retrying a bounded number of times
/// when `taken` already contains the pick. Falls back to a numbered
/// variant once attempts run out, so this never loops unbounded.
fn generate_nickname(taken: &HashMap<UserId, DisplayProfile>) -> String {
    let adjectives = [
        "날랜", "게으른", "신비한", "명랑한", "용감한", "조용한", "재치있는", "씩씩한",
        "영리한", "다정한", "자유로운", "차분한", "대담한", "수줍은", "당당한", "행복한",
    ];
    let nouns = [
        "여우", "곰", "독수리", "늑대", "호랑이", "사자", "부엉이", "토끼",
        "매", "판다", "고양이", "강아지", "거북이", "돌고래", "고래", "코끼리",
    ];

    let mut rng = rand::rng();
    for _ in 0..MAX_NICKNAME_ATTEMPTS {
        let candidate = format!(
            "{} {}",
            adjectives.choose(&mut rng).unwrap_or(&adjectives[0]),
            nouns.choose(&mut rng).unwrap_or(&nouns[0]),
        );
        if !taken.values().any(|p| p.name == candidate) {
            return candidate;
        }
    }
    format!("이웃{}", taken.len() + 1)
}

#[async_trait]
impl Neighborhood for InMemoryNeighborhood {
    async fn resolve_board_seller(&self, board_id: &str) -> CoreResult<UserId> {
        let inner = self.inner.read().await;
        let board = inner.boards.get(board_id).ok_or(CoreError::NotFound("board"))?;
        Ok(board.author.clone())
    }

    async fn resolve_approved_applicants(&self, board_id: &str) -> CoreResult<Vec<UserId>> {
        let inner = self.inner.read().await;
        let board = inner.boards.get(board_id).ok_or(CoreError::NotFound("board"))?;
        let mut members = vec![board.author.clone()];
        members.extend(board.applicants.iter().cloned());
        Ok(members)
    }

    async fn display_profile(&self, user_id: &str) -> CoreResult<DisplayProfile> {
        if let Some(profile) = self.inner.read().await.profiles.get(user_id) {
            return Ok(profile.clone());
        }
        // First sighting of this user: assign a generated nickname.
        let mut inner = self.inner.write().await;
        let profile = DisplayProfile {
            name: generate_nickname(&inner.profiles),
            avatar: None,
        };
        inner.profiles.insert(user_id.to_owned(), profile.clone());
        Ok(profile)
    }

    async fn recent_address(&self, user_id: &str) -> CoreResult<String> {
        let inner = self.inner.read().await;
        Ok(inner
            .addresses
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| "동네".to_owned()))
    }

    async fn trade_info(&self, board_id: &str) -> CoreResult<TradeInfo> {
        let inner = self.inner.read().await;
        let board = inner.boards.get(board_id).ok_or(CoreError::NotFound("board"))?;
        Ok(TradeInfo {
            board_id: board_id.to_owned(),
            title: board.title.clone(),
            price: board.price,
            status: board.status.clone(),
            seller: board.author.clone(),
        })
    }

    async fn update_board_status(&self, board_id: &str, status: &str) -> CoreResult<TradeInfo> {
        let mut inner = self.inner.write().await;
        let board = inner
            .boards
            .get_mut(board_id)
            .ok_or(CoreError::NotFound("board"))?;
        board.status = status.to_owned();
        let board = board.clone();
        Ok(TradeInfo {
            board_id: board_id.to_owned(),
            title: board.title,
            price: board.price,
            status: board.status,
            seller: board.author,
        })
    }
}
