use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
};
use tracing::warn;

use crate::db::Account;
use crate::routes::{AppError, AppState};
use crate::session::{FlashCategory, SessionContext};

pub const LOGIN_REQUIRED_MESSAGE: &str = "Please log in to access this page.";

#[derive(Debug, Clone)]
pub struct AuthService {
    cost: u32,
}

impl AuthService {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Hash a password using bcrypt
    pub fn hash_password(&self, password: &str) -> anyhow::Result<String> {
        Ok(bcrypt::hash(password, self.cost)?)
    }

    /// Verify a password against a stored hash. A malformed hash counts as
    /// a mismatch.
    pub fn verify_password(&self, password: &str, hash: &str) -> bool {
        match bcrypt::verify(password, hash) {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Unreadable password hash: {}", e);
                false
            }
        }
    }
}

/// Only same-site absolute paths are accepted as post-login targets. Control
/// characters and spaces are refused since browsers drop tabs and newlines
/// from URLs, which could turn `/\t/host` into `//host`.
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && path.bytes().all(|b| b.is_ascii_graphic()) =>
        {
            path
        }
        _ => "/",
    }
}

pub fn login_redirect_target(original: &str) -> String {
    match serde_urlencoded::to_string(&[("next", original)]) {
        Ok(query) => format!("/login?{}", query),
        Err(_) => "/login".to_string(),
    }
}

async fn load_account(
    session: &SessionContext,
    state: &AppState,
) -> anyhow::Result<Option<Account>> {
    let Some(account_id) = session.account_id().await? else {
        return Ok(None);
    };

    let account = state.db.get_account(account_id).await?;
    if account.is_none() {
        warn!("Session refers to missing account {}", account_id);
        session.forget_account().await?;
    }
    Ok(account)
}

/// The logged-in account. Anonymous requests are redirected to the login
/// page with the original path in `next`.
pub struct CurrentUser(pub Account);

/// The logged-in account, if any.
pub struct MaybeUser(pub Option<Account>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = SessionContext::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        let account = load_account(&session, state)
            .await
            .map_err(|e| AppError::from(e).into_response())?;

        match account {
            Some(account) => Ok(CurrentUser(account)),
            None => {
                session
                    .flash(FlashCategory::Info, LOGIN_REQUIRED_MESSAGE)
                    .await
                    .map_err(|e| AppError::from(e).into_response())?;
                let original = parts
                    .uri
                    .path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or("/");
                Err(Redirect::to(&login_redirect_target(original)).into_response())
            }
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = SessionContext::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        let account = load_account(&session, state)
            .await
            .map_err(|e| AppError::from(e).into_response())?;

        Ok(MaybeUser(account))
    }
}
