use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cookie signing needs at least this many bytes of key material.
pub const MIN_SECRET_KEY_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not configured (set it in the config file or via {env})")]
    MissingSecret {
        name: &'static str,
        env: &'static str,
    },
    #[error("security.secret_key must be at least 64 bytes, got {0}")]
    SecretKeyTooShort(usize),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    /// Alerts are skipped when this section is absent
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    /// Timeout for outbound HTTP calls, in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_true")]
    pub csrf_enabled: bool,
    #[serde(default)]
    pub secure_cookie: bool,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    /// Sessions idle for longer than this are discarded
    #[serde(default = "default_session_idle_minutes")]
    pub session_idle_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewsConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_news_base_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeatherConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,
    #[serde(default = "default_city")]
    pub default_city: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_telegram_base_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpeechConfig {
    #[serde(default = "default_speech_base_url")]
    pub base_url: String,
    #[serde(default = "default_lang")]
    pub lang: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_upload_dir")]
    pub dir: PathBuf,
    /// Request body limit for the settings form, in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_bytes: usize,
}

fn default_http_timeout() -> u64 {
    30
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_database_url() -> String {
    "sqlite:newsdesk.db?mode=rwc".to_string()
}

fn default_true() -> bool {
    true
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_session_idle_minutes() -> i64 {
    24 * 60
}

fn default_news_base_url() -> String {
    "https://newsapi.org".to_string()
}

fn default_weather_base_url() -> String {
    "https://api.openweathermap.org".to_string()
}

fn default_city() -> String {
    "London".to_string()
}

fn default_telegram_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_speech_base_url() -> String {
    "https://translate.google.com".to_string()
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: default_static_dir(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            csrf_enabled: true,
            secure_cookie: false,
            bcrypt_cost: default_bcrypt_cost(),
            session_idle_minutes: default_session_idle_minutes(),
        }
    }
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_news_base_url(),
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_weather_base_url(),
            default_city: default_city(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: default_speech_base_url(),
            lang: default_lang(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            max_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            security: SecurityConfig::default(),
            news: NewsConfig::default(),
            weather: WeatherConfig::default(),
            telegram: None,
            speech: SpeechConfig::default(),
            uploads: UploadConfig::default(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Overlay secrets and deployment settings from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(key) = lookup("NEWSDESK_SECRET_KEY") {
            self.security.secret_key = key;
        }
        if let Some(key) = lookup("NEWS_API_KEY") {
            self.news.api_key = key;
        }
        if let Some(key) = lookup("WEATHER_API_KEY") {
            self.weather.api_key = key;
        }

        let token = lookup("TELEGRAM_BOT_TOKEN");
        let chat_id = lookup("TELEGRAM_CHAT_ID");
        match (&mut self.telegram, token, chat_id) {
            (Some(telegram), token, chat_id) => {
                if let Some(token) = token {
                    telegram.bot_token = token;
                }
                if let Some(chat_id) = chat_id {
                    telegram.chat_id = chat_id;
                }
            }
            (None, Some(bot_token), Some(chat_id)) => {
                self.telegram = Some(TelegramConfig {
                    bot_token,
                    chat_id,
                    base_url: default_telegram_base_url(),
                });
            }
            _ => {}
        }
    }

    /// Reject configurations that would start without required secrets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.secret_key.is_empty() {
            return Err(ConfigError::MissingSecret {
                name: "security.secret_key",
                env: "NEWSDESK_SECRET_KEY",
            });
        }
        if self.security.secret_key.len() < MIN_SECRET_KEY_LEN {
            return Err(ConfigError::SecretKeyTooShort(
                self.security.secret_key.len(),
            ));
        }
        if self.news.api_key.is_empty() {
            return Err(ConfigError::MissingSecret {
                name: "news.api_key",
                env: "NEWS_API_KEY",
            });
        }
        if self.weather.api_key.is_empty() {
            return Err(ConfigError::MissingSecret {
                name: "weather.api_key",
                env: "WEATHER_API_KEY",
            });
        }
        Ok(())
    }
}
