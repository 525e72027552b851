use std::sync::Arc;
use std::time::Duration;

use askama::Template;
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tower_sessions::{
    cookie::{Key, SameSite},
    Expiry, MemoryStore, SessionManagerLayer,
};
use tracing::{error, info, warn};

use crate::auth::{safe_next, AuthService, CurrentUser, MaybeUser};
use crate::config::Config;
use crate::db::{Account, Bookmark, Database};
use crate::forms::{BookmarkForm, CityForm, FormError, LoginForm, RegisterForm, SettingsForm};
use crate::news::{Article, NewsClient, NewsPage, Pagination};
use crate::notify::Notifier;
use crate::session::{Flash, FlashCategory, SessionContext};
use crate::speech::SpeechClient;
use crate::uploads::{UploadError, UploadStore};
use crate::weather::{Weather, WeatherClient};

/// Query used by the home page and audio endpoint when none is given
pub const DEFAULT_QUERY: &str = "latest";
/// Query behind the dashboard's news column
pub const DASHBOARD_QUERY: &str = "Latest";

pub const DUPLICATE_ACCOUNT_MESSAGE: &str = "Username or email already exists";
pub const CSRF_FAILURE_MESSAGE: &str = "The CSRF token is missing or invalid.";

pub struct AppState {
    pub db: Arc<Database>,
    pub news: NewsClient,
    pub weather: WeatherClient,
    pub notifier: Notifier,
    pub speech: SpeechClient,
    pub auth: AuthService,
    pub uploads: UploadStore,
    pub default_city: String,
    pub csrf_enabled: bool,
}

impl AppState {
    pub fn from_config(config: &Config, db: Arc<Database>) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.http_timeout_secs);

        Ok(Self {
            db,
            news: NewsClient::new(&config.news, timeout)?,
            weather: WeatherClient::new(&config.weather, timeout)?,
            notifier: Notifier::new(config.telegram.clone(), timeout)?,
            speech: SpeechClient::new(&config.speech, timeout)?,
            auth: AuthService::new(config.security.bcrypt_cost),
            uploads: UploadStore::new(config.uploads.dir.clone()),
            default_city: config.weather.default_city.clone(),
            csrf_enabled: config.security.csrf_enabled,
        })
    }

    async fn check_csrf(&self, session: &SessionContext, submitted: &str) -> anyhow::Result<bool> {
        if !self.csrf_enabled {
            return Ok(true);
        }
        session.verify_csrf(submitted).await
    }
}

/// Assemble the full application: routes, static files, sessions and tracing.
pub fn app(state: Arc<AppState>, config: &Config) -> anyhow::Result<Router> {
    let key = Key::try_from(config.security.secret_key.as_bytes())
        .map_err(|e| anyhow::anyhow!("unusable secret key: {:?}", e))?;

    // MemoryStore ignores expired records on load but never evicts them
    let idle = time::Duration::minutes(config.security.session_idle_minutes);
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_expiry(Expiry::OnInactivity(idle))
        .with_secure(config.security.secure_cookie)
        .with_same_site(SameSite::Lax)
        .with_signed(key);

    let uploads_dir = state.uploads.dir().to_path_buf();

    let router = Router::new()
        .route("/", get(index))
        .route("/register", get(register_form).post(register))
        .route("/login", get(login_form).post(login))
        .route("/logout", get(logout))
        .route("/dashboard", get(dashboard).post(dashboard_city))
        .route("/check_weather", post(check_weather))
        .route("/search", get(search))
        .route("/audio/:index", get(audio))
        .route("/bookmark", post(bookmark))
        .route("/bookmarks", get(bookmarks))
        .route("/settings", get(settings_form).post(update_settings))
        .route("/health", get(health))
        .nest_service("/static", ServeDir::new(&config.server.static_dir))
        .nest_service("/uploads", ServeDir::new(uploads_dir))
        .layer(DefaultBodyLimit::max(config.uploads.max_bytes))
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(router)
}

/// Per-page data shared by every template through `base.html`.
pub struct PageContext {
    pub user: Option<Account>,
    pub flashes: Vec<Flash>,
    pub csrf_token: String,
}

impl PageContext {
    async fn build(session: &SessionContext, user: Option<Account>) -> anyhow::Result<Self> {
        Ok(Self {
            user,
            flashes: session.take_flashes().await?,
            csrf_token: session.csrf_token().await?,
        })
    }
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub ctx: PageContext,
    pub query: String,
    pub articles: Vec<Article>,
    pub pagination: Pagination,
    pub search_history: Vec<String>,
    pub weather: Option<Weather>,
    pub bookmarks: Vec<Bookmark>,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardTemplate {
    pub ctx: PageContext,
    pub city: String,
    pub weather: Option<Weather>,
    pub query: String,
    pub page: u64,
    pub articles: Vec<Article>,
    pub pagination: Option<Pagination>,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate {
    pub ctx: PageContext,
    pub username: String,
    pub email: String,
    pub errors: Vec<String>,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub ctx: PageContext,
    pub username: String,
    pub next: String,
    pub errors: Vec<String>,
}

#[derive(Template)]
#[template(path = "settings.html")]
pub struct SettingsTemplate {
    pub ctx: PageContext,
    pub account: Account,
    pub username: String,
    pub email: String,
    pub errors: Vec<String>,
}

#[derive(Template)]
#[template(path = "bookmarks.html")]
pub struct BookmarksTemplate {
    pub ctx: PageContext,
    pub bookmarks: Vec<Bookmark>,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

// Custom error type
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("Request failed: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error: {}", self.0),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

fn csrf_failure() -> Response {
    (StatusCode::BAD_REQUEST, CSRF_FAILURE_MESSAGE).into_response()
}

fn invalid_article() -> Response {
    (StatusCode::NOT_FOUND, "Invalid article ID").into_response()
}

fn messages(errors: &[FormError]) -> Vec<String> {
    errors.iter().map(ToString::to_string).collect()
}

async fn flash_redirect(
    session: &SessionContext,
    category: FlashCategory,
    message: &str,
    to: &str,
) -> Result<Response, AppError> {
    session.flash(category, message).await?;
    Ok(Redirect::to(to).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct NewsQuery {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub page: Option<u64>,
}

impl NewsQuery {
    /// Blank or missing queries fall back to [`DEFAULT_QUERY`]; pages start at 1.
    pub fn resolve(&self) -> (String, u64) {
        let query = self
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(DEFAULT_QUERY)
            .to_string();
        (query, self.page())
    }

    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub next: Option<String>,
}

// Route handlers
pub async fn index(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    MaybeUser(user): MaybeUser,
    Query(params): Query<NewsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (query, page) = params.resolve();

    let (news, weather) = tokio::join!(
        state.news.search(&query, page),
        state.weather.current(&state.default_city)
    );
    let news = news?;

    let search_history = session.record_search(&query).await?;
    let bookmarks = match &user {
        Some(account) => state.db.bookmarks_for_account(account.id).await?,
        None => Vec::new(),
    };

    Ok(HtmlTemplate(IndexTemplate {
        ctx: PageContext::build(&session, user).await?,
        pagination: Pagination::new(page, news.total_results),
        query,
        articles: news.articles,
        search_history,
        weather,
        bookmarks,
    }))
}

pub async fn register_form(
    session: SessionContext,
    MaybeUser(user): MaybeUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(HtmlTemplate(RegisterTemplate {
        ctx: PageContext::build(&session, user).await?,
        username: String::new(),
        email: String::new(),
        errors: Vec::new(),
    }))
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    Form(form): Form<RegisterForm>,
) -> Result<Response, AppError> {
    if !state.check_csrf(&session, &form.csrf_token).await? {
        return Ok(csrf_failure());
    }

    let username = form.username.trim();
    let email = form.email.trim();

    let errors = form.validate();
    if !errors.is_empty() {
        return Ok(HtmlTemplate(RegisterTemplate {
            ctx: PageContext::build(&session, None).await?,
            username: username.to_string(),
            email: email.to_string(),
            errors: messages(&errors),
        })
        .into_response());
    }

    if state.db.account_exists(username, email).await? {
        info!("Registration refused for '{}': already exists", username);
        return flash_redirect(
            &session,
            FlashCategory::Danger,
            DUPLICATE_ACCOUNT_MESSAGE,
            "/register",
        )
        .await;
    }

    let password_hash = state.auth.hash_password(&form.password)?;
    let Some(account) = state
        .db
        .create_account(username, email, &password_hash)
        .await?
    else {
        return flash_redirect(
            &session,
            FlashCategory::Danger,
            DUPLICATE_ACCOUNT_MESSAGE,
            "/register",
        )
        .await;
    };

    info!("Registered account {} ({})", account.username, account.id);
    session
        .flash(FlashCategory::Success, "Registration successful!")
        .await?;
    state
        .notifier
        .send(&format!("New user registered: {}", account.username))
        .await;

    Ok(Redirect::to("/login").into_response())
}

pub async fn login_form(
    session: SessionContext,
    MaybeUser(user): MaybeUser,
    Query(params): Query<LoginQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(HtmlTemplate(LoginTemplate {
        ctx: PageContext::build(&session, user).await?,
        username: String::new(),
        next: params.next.unwrap_or_default(),
        errors: Vec::new(),
    }))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    if !state.check_csrf(&session, &form.csrf_token).await? {
        return Ok(csrf_failure());
    }

    let username = form.username.trim();
    let errors = form.validate();

    if errors.is_empty() {
        if let Some(account) = state.db.find_account_by_username(username).await? {
            if state
                .auth
                .verify_password(&form.password, &account.password_hash)
            {
                session.persist_account(account.id).await?;
                info!("Account {} logged in", account.id);
                session
                    .flash(FlashCategory::Success, "Logged in successfully!")
                    .await?;
                return Ok(Redirect::to(safe_next(form.next.as_deref())).into_response());
            }
        }

        warn!("Failed login for '{}'", username);
        session
            .flash(FlashCategory::Danger, "Invalid username or password")
            .await?;
    }

    Ok(HtmlTemplate(LoginTemplate {
        ctx: PageContext::build(&session, None).await?,
        username: username.to_string(),
        next: form.next.clone().unwrap_or_default(),
        errors: messages(&errors),
    })
    .into_response())
}

pub async fn logout(
    CurrentUser(account): CurrentUser,
    session: SessionContext,
) -> Result<impl IntoResponse, AppError> {
    session.forget_account().await?;
    info!("Account {} logged out", account.id);
    session
        .flash(FlashCategory::Info, "You have been logged out.")
        .await?;
    Ok(Redirect::to("/login"))
}

async fn render_dashboard(
    state: &AppState,
    session: &SessionContext,
    account: Account,
    city: String,
) -> Result<HtmlTemplate<DashboardTemplate>, AppError> {
    let (weather, news) = tokio::join!(
        state.weather.current(&city),
        state.news.search(DASHBOARD_QUERY, 1)
    );
    let news = news?;

    Ok(HtmlTemplate(DashboardTemplate {
        ctx: PageContext::build(session, Some(account)).await?,
        city,
        weather,
        query: DASHBOARD_QUERY.to_string(),
        page: 1,
        articles: news.articles,
        pagination: None,
    }))
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    CurrentUser(account): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let city = state.default_city.clone();
    render_dashboard(&state, &session, account, city).await
}

pub async fn dashboard_city(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    CurrentUser(account): CurrentUser,
    Form(form): Form<CityForm>,
) -> Result<Response, AppError> {
    if !state.check_csrf(&session, &form.csrf_token).await? {
        return Ok(csrf_failure());
    }

    let city = match form.city.trim() {
        "" => state.default_city.clone(),
        city => city.to_string(),
    };
    Ok(render_dashboard(&state, &session, account, city)
        .await?
        .into_response())
}

pub async fn check_weather(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    MaybeUser(user): MaybeUser,
    Form(form): Form<CityForm>,
) -> Result<Response, AppError> {
    if !state.check_csrf(&session, &form.csrf_token).await? {
        return Ok(csrf_failure());
    }

    let city = form.city.trim().to_string();
    match state.weather.current(&city).await {
        Some(weather) => Ok(HtmlTemplate(DashboardTemplate {
            ctx: PageContext::build(&session, user).await?,
            city,
            weather: Some(weather),
            query: String::new(),
            page: 1,
            articles: Vec::new(),
            pagination: None,
        })
        .into_response()),
        None => {
            flash_redirect(
                &session,
                FlashCategory::Danger,
                "Weather unavailable. Please try again.",
                "/dashboard",
            )
            .await
        }
    }
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    MaybeUser(user): MaybeUser,
    Query(params): Query<NewsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let query = params.query.as_deref().unwrap_or("").trim().to_string();
    let page = params.page();

    let news = if query.is_empty() {
        NewsPage::default()
    } else {
        state.news.search(&query, page).await?
    };

    Ok(HtmlTemplate(DashboardTemplate {
        ctx: PageContext::build(&session, user).await?,
        city: state.default_city.clone(),
        weather: None,
        pagination: Some(Pagination::new(page, news.total_results)),
        query,
        page,
        articles: news.articles,
    }))
}

/// Read an article description aloud. The index refers to the article list
/// identified by `query` and `page`, the same list the link was rendered from.
pub async fn audio(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
    Query(params): Query<NewsQuery>,
) -> Result<Response, AppError> {
    let Ok(index) = index.parse::<usize>() else {
        warn!("Audio requested for unparseable article index '{}'", index);
        return Ok(invalid_article());
    };

    let (query, page) = params.resolve();
    let news = state.news.search(&query, page).await?;

    let Some(article) = news.articles.get(index) else {
        warn!(
            "Audio requested for article {} but '{}' page {} has {}",
            index,
            query,
            page,
            news.articles.len()
        );
        return Ok(invalid_article());
    };

    let audio = state.speech.synthesize(article.speech_text()).await?;
    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response())
}

pub async fn bookmark(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    CurrentUser(account): CurrentUser,
    Form(form): Form<BookmarkForm>,
) -> Result<Response, AppError> {
    if !state.check_csrf(&session, &form.csrf_token).await? {
        return Ok(csrf_failure());
    }

    if let Some(error) = form.validate().first() {
        return flash_redirect(&session, FlashCategory::Danger, &error.to_string(), "/").await;
    }

    let bookmark = state
        .db
        .add_bookmark(account.id, form.title.trim(), form.url.trim())
        .await?;
    info!("Account {} bookmarked {}", account.id, bookmark.url);

    flash_redirect(
        &session,
        FlashCategory::Success,
        "Article bookmarked successfully!",
        "/",
    )
    .await
}

pub async fn bookmarks(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    CurrentUser(account): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let bookmarks = state.db.bookmarks_for_account(account.id).await?;
    Ok(HtmlTemplate(BookmarksTemplate {
        ctx: PageContext::build(&session, Some(account)).await?,
        bookmarks,
    }))
}

pub async fn settings_form(
    session: SessionContext,
    CurrentUser(account): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(HtmlTemplate(SettingsTemplate {
        ctx: PageContext::build(&session, Some(account.clone())).await?,
        username: account.username.clone(),
        email: account.email.clone(),
        account,
        errors: Vec::new(),
    }))
}

struct ImageUpload {
    filename: String,
    bytes: Bytes,
}

async fn read_settings_form(
    multipart: &mut Multipart,
) -> Result<(SettingsForm, Option<ImageUpload>), MultipartError> {
    let mut form = SettingsForm::default();
    let mut upload = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "username" => form.username = field.text().await?,
            "email" => form.email = field.text().await?,
            "csrf_token" => form.csrf_token = field.text().await?,
            "profile_pic" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                // Browsers send an empty part when no file was chosen
                if !filename.is_empty() {
                    upload = Some(ImageUpload { filename, bytes });
                }
            }
            _ => {}
        }
    }

    Ok((form, upload))
}

pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    session: SessionContext,
    CurrentUser(account): CurrentUser,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let (form, upload) = match read_settings_form(&mut multipart).await {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Rejected settings upload: {}", e);
            return Ok(e.into_response());
        }
    };

    if !state.check_csrf(&session, &form.csrf_token).await? {
        return Ok(csrf_failure());
    }

    let errors = form.validate();
    if !errors.is_empty() {
        return Ok(HtmlTemplate(SettingsTemplate {
            ctx: PageContext::build(&session, Some(account.clone())).await?,
            username: form.username.trim().to_string(),
            email: form.email.trim().to_string(),
            account,
            errors: messages(&errors),
        })
        .into_response());
    }

    let username = form.username.trim();
    let email = form.email.trim();

    if state.db.username_taken_by_other(username, account.id).await? {
        return flash_redirect(
            &session,
            FlashCategory::Danger,
            "Username already taken",
            "/settings",
        )
        .await;
    }
    if state.db.email_taken_by_other(email, account.id).await? {
        return flash_redirect(
            &session,
            FlashCategory::Danger,
            "Email already taken",
            "/settings",
        )
        .await;
    }

    let profile_image = match upload {
        Some(upload) => {
            match state
                .uploads
                .save_profile_image(account.id, &upload.filename, &upload.bytes)
                .await
            {
                Ok(name) => Some(name),
                Err(UploadError::Io(e)) => return Err(e.into()),
                Err(e) => {
                    warn!("Rejected profile image '{}': {}", upload.filename, e);
                    return flash_redirect(
                        &session,
                        FlashCategory::Danger,
                        "Invalid image file",
                        "/settings",
                    )
                    .await;
                }
            }
        }
        None => None,
    };

    state
        .db
        .update_account(account.id, username, email, profile_image.as_deref())
        .await?;
    info!("Account {} updated settings", account.id);

    flash_redirect(
        &session,
        FlashCategory::Success,
        "Settings updated successfully",
        "/settings",
    )
    .await
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
