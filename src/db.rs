use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

/// Avatar shown for accounts that never uploaded a profile image
pub const DEFAULT_AVATAR: &str = "/static/default-avatar.svg";

#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub profile_image: Option<String>,
    pub created_at: String,
}

impl Account {
    pub fn profile_image_url(&self) -> String {
        match &self.profile_image {
            Some(name) => format!("/uploads/{}", name),
            None => DEFAULT_AVATAR.to_string(),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Bookmark {
    pub id: i64,
    pub account_id: i64,
    pub title: String,
    pub url: String,
    pub created_at: String,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                profile_image TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bookmarks (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_bookmarks_account
            ON bookmarks(account_id, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a new account. Returns `None` when the username or email is
    /// already registered.
    pub async fn create_account(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<Option<Account>> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (username, email, password_hash, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(&now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(account) => Ok(Some(account)),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_account(&self, account_id: i64) -> anyhow::Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    pub async fn find_account_by_username(
        &self,
        username: &str,
    ) -> anyhow::Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    /// True when either the username or the email belongs to some account.
    pub async fn account_exists(&self, username: &str, email: &str) -> anyhow::Result<bool> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE username = ? OR email = ?")
                .bind(username)
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0 > 0)
    }

    pub async fn username_taken_by_other(
        &self,
        username: &str,
        account_id: i64,
    ) -> anyhow::Result<bool> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE username = ? AND id != ?")
                .bind(username)
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0 > 0)
    }

    pub async fn email_taken_by_other(&self, email: &str, account_id: i64) -> anyhow::Result<bool> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE email = ? AND id != ?")
                .bind(email)
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0 > 0)
    }

    pub async fn count_accounts(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Update username and email; the profile image is only replaced when
    /// a new one is given.
    pub async fn update_account(
        &self,
        account_id: i64,
        username: &str,
        email: &str,
        profile_image: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET username = ?, email = ?, profile_image = COALESCE(?, profile_image)
            WHERE id = ?
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(profile_image)
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_bookmark(
        &self,
        account_id: i64,
        title: &str,
        url: &str,
    ) -> anyhow::Result<Bookmark> {
        let now = Utc::now().to_rfc3339();
        let bookmark = sqlx::query_as::<_, Bookmark>(
            r#"
            INSERT INTO bookmarks (account_id, title, url, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(title)
        .bind(url)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        Ok(bookmark)
    }

    pub async fn bookmarks_for_account(&self, account_id: i64) -> anyhow::Result<Vec<Bookmark>> {
        let bookmarks = sqlx::query_as::<_, Bookmark>(
            "SELECT * FROM bookmarks WHERE account_id = ? ORDER BY id",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(bookmarks)
    }
}
