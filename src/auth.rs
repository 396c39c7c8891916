use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Stable user identity as issued by the external identity service.
pub type UserId = String;

/// Credentials are short-lived, so every inbound event is validated
/// individually; an attached connection that outlives its credential is
/// not torn down, its later events just fail one by one. `Expired` is
/// retryable after the client refreshes, `Invalid` is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Expired,
    Invalid,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthFailure::Expired => write!(f, "credential expired"),
            AuthFailure::Invalid => write!(f, "credential invalid"),
        }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolves an opaque bearer credential to an identity. Stateless
    /// per call: no session is created or touched.
    async fn authenticate(&self, credential: &str) -> Result<UserId, AuthFailure>;
}

/// Stands in for the external token service's validation endpoint: a
/// registry of issued bearer tokens with an expiry instant each.
/// Issuance mechanics (signing, refresh) stay outside the core; `issue`
/// exists so collaborators and tests can mint credentials.
pub struct TokenAuthenticator {
    ttl: Duration,
    tokens: RwLock<HashMap<String, (UserId, DateTime<Utc>)>>,
}

impl TokenAuthenticator {
    pub fn new(ttl: Duration) -> Self {
        TokenAuthenticator {
            ttl,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub async fn issue(&self, user_id: &str) -> String {
        self.issue_expiring_at(user_id, Utc::now() + self.ttl).await
    }

    pub async fn issue_expiring_at(&self, user_id: &str, expires_at: DateTime<Utc>) -> String {
        let credential = Uuid::now_v7().simple().to_string();
        self.tokens
            .write()
            .await
            .insert(credential.clone(), (user_id.to_owned(), expires_at));
        credential
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<UserId, AuthFailure> {
        let tokens = self.tokens.read().await;
        let Some((user_id, expires_at)) = tokens.get(credential) else {
            return Err(AuthFailure::Invalid);
        };
        if *expires_at <= Utc::now() {
            return Err(AuthFailure::Expired);
        }
        Ok(user_id.clone())
    }
}
