//! Typed access to the per-browser session.
//!
//! Handlers never touch raw session keys; they go through [`SessionContext`],
//! which stores the logged-in account id, one-shot flash messages, the
//! search history shown on the home page, and the CSRF token embedded in
//! every form.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use uuid::Uuid;

pub const ACCOUNT_ID_KEY: &str = "account_id";
const SEARCH_HISTORY_KEY: &str = "search_history";
const FLASHES_KEY: &str = "_flashes";
const CSRF_TOKEN_KEY: &str = "csrf_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashCategory {
    Info,
    Success,
    Danger,
}

impl FlashCategory {
    pub fn css_class(&self) -> &'static str {
        match self {
            FlashCategory::Info => "flash-info",
            FlashCategory::Success => "flash-success",
            FlashCategory::Danger => "flash-danger",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub category: FlashCategory,
    pub message: String,
}

/// Append `query` unless it is already present. Returns whether it was added.
pub fn push_unique(history: &mut Vec<String>, query: &str) -> bool {
    if history.iter().any(|q| q == query) {
        return false;
    }
    history.push(query.to_string());
    true
}

#[derive(Clone)]
pub struct SessionContext(Session);

impl SessionContext {
    pub fn new(session: Session) -> Self {
        Self(session)
    }

    /// Mark the session as belonging to `account_id`. The session id is
    /// rotated first so a pre-login id cannot be reused.
    pub async fn persist_account(&self, account_id: i64) -> anyhow::Result<()> {
        self.0.cycle_id().await?;
        self.0.insert(ACCOUNT_ID_KEY, account_id).await?;
        Ok(())
    }

    pub async fn account_id(&self) -> anyhow::Result<Option<i64>> {
        Ok(self.0.get::<i64>(ACCOUNT_ID_KEY).await?)
    }

    /// Drop the login but keep history and pending flashes.
    pub async fn forget_account(&self) -> anyhow::Result<()> {
        self.0.remove::<i64>(ACCOUNT_ID_KEY).await?;
        Ok(())
    }

    pub async fn flash(
        &self,
        category: FlashCategory,
        message: impl Into<String>,
    ) -> anyhow::Result<()> {
        let mut flashes: Vec<Flash> = self.0.get(FLASHES_KEY).await?.unwrap_or_default();
        flashes.push(Flash {
            category,
            message: message.into(),
        });
        self.0.insert(FLASHES_KEY, flashes).await?;
        Ok(())
    }

    /// Pending flashes, removed from the session.
    pub async fn take_flashes(&self) -> anyhow::Result<Vec<Flash>> {
        Ok(self
            .0
            .remove::<Vec<Flash>>(FLASHES_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn search_history(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.0.get(SEARCH_HISTORY_KEY).await?.unwrap_or_default())
    }

    /// Add `query` to the history if new and return the full history.
    pub async fn record_search(&self, query: &str) -> anyhow::Result<Vec<String>> {
        let mut history = self.search_history().await?;
        if push_unique(&mut history, query) {
            self.0.insert(SEARCH_HISTORY_KEY, &history).await?;
        }
        Ok(history)
    }

    /// The session's CSRF token, created on first use.
    pub async fn csrf_token(&self) -> anyhow::Result<String> {
        if let Some(token) = self.0.get::<String>(CSRF_TOKEN_KEY).await? {
            return Ok(token);
        }
        let token = Uuid::new_v4().simple().to_string();
        self.0.insert(CSRF_TOKEN_KEY, &token).await?;
        Ok(token)
    }

    pub async fn verify_csrf(&self, submitted: &str) -> anyhow::Result<bool> {
        if submitted.is_empty() {
            return Ok(false);
        }
        let expected = self.0.get::<String>(CSRF_TOKEN_KEY).await?;
        Ok(expected.as_deref() == Some(submitted))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        Ok(Self::new(session))
    }
}
