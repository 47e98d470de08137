use std::env;
use std::path::Path;
use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Error, SqlitePool,
};

pub mod models;

/// Default on-disk database location, relative to the SkillMeat home dir.
pub const DEFAULT_DB_FILENAME: &str = "cache.db";

#[derive(Clone)]
pub struct DBService {
    pub pool: SqlitePool,
}

impl DBService {
    /// Create a new DBService backed by SQLite.
    /// Uses the SKILLMEAT_DB_URL environment variable, falling back to an
    /// on-disk database in the current directory.
    pub async fn new() -> Result<DBService, Error> {
        let database_url = env::var("SKILLMEAT_DB_URL")
            .unwrap_or_else(|_| format!("sqlite://{DEFAULT_DB_FILENAME}"));
        Self::new_with_url(&database_url).await
    }

    pub async fn new_with_url(database_url: &str) -> Result<DBService, Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(DBService { pool })
    }

    /// Open the database file at `path`, creating it if missing.
    pub async fn new_at_path(path: &Path) -> Result<DBService, Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(DBService { pool })
    }

    /// In-memory database, one connection so every query sees the same state.
    /// Used by tests and by cache-rebuild dry runs.
    pub async fn new_in_memory() -> Result<DBService, Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(DBService { pool })
    }
}
