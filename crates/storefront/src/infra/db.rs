use crate::config::{DBSettings, SqliteConfigSerde};
use log::{debug, info};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sqlx::{
    error::DatabaseError,
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, Sqlite, SqlitePool,
};
use std::{
    future::Future,
    hash::{DefaultHasher, Hash, Hasher},
    str::FromStr,
    sync::Arc,
    time::Duration as StdDuration,
};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqliteMode {
    ReadWriteCreate, // rwc - create if missing
    ReadWrite,       // rw  - must exist
    Memory,          // shared in-memory database, used by tests
}

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub mode: SqliteMode,
    pub busy_timeout_ms: u32,
    pub journal_mode: String,
    pub synchronous: String,
    pub cache_size: i32,
    pub foreign_keys: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        SqliteConfigSerde::default().into()
    }
}

impl SqliteConfig {
    pub fn testing() -> Self {
        Self {
            mode: SqliteMode::Memory,
            journal_mode: "MEMORY".to_string(),
            synchronous: "OFF".to_string(),
            ..Default::default()
        }
    }

    pub fn build_connect_options(&self, database_path: &str) -> SqliteConnectOptions {
        let options = match self.mode {
            SqliteMode::Memory => {
                // Same path -> same named in-memory db, so both pools share tables
                let mut hasher = DefaultHasher::new();
                database_path.hash(&mut hasher);
                let memory_uri =
                    format!("file:memdb_{}?mode=memory&cache=shared", hasher.finish());
                SqliteConnectOptions::new()
                    .filename(&memory_uri)
                    .shared_cache(true)
            }
            SqliteMode::ReadWrite => SqliteConnectOptions::new()
                .filename(database_path)
                .read_only(false),
            SqliteMode::ReadWriteCreate => SqliteConnectOptions::new()
                .filename(database_path)
                .read_only(false)
                .create_if_missing(true),
        };

        options
            .busy_timeout(StdDuration::from_millis(self.busy_timeout_ms as u64))
            .pragma("journal_mode", self.journal_mode.clone())
            .pragma("synchronous", self.synchronous.clone())
            .pragma("cache_size", self.cache_size.to_string())
            .foreign_keys(self.foreign_keys)
    }
}

impl From<SqliteConfigSerde> for SqliteConfig {
    fn from(config: SqliteConfigSerde) -> Self {
        Self {
            mode: match config.mode.as_str() {
                "ReadWrite" => SqliteMode::ReadWrite,
                "Memory" => SqliteMode::Memory,
                _ => SqliteMode::ReadWriteCreate,
            },
            busy_timeout_ms: config.busy_timeout_ms,
            journal_mode: config.journal_mode.to_uppercase(),
            synchronous: config.synchronous.to_uppercase(),
            cache_size: config.cache_size,
            foreign_keys: config.foreign_keys,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub read_max_connections: u32,
    pub read_min_connections: u32,
    pub write_max_connections: u32,
    pub write_min_connections: u32,
    pub idle_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
    pub sqlite_config: SqliteConfig,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        DBSettings::default().into()
    }
}

impl DatabasePoolConfig {
    pub fn testing() -> Self {
        Self {
            read_max_connections: 2,
            write_max_connections: 1,
            acquire_timeout_secs: 5,
            sqlite_config: SqliteConfig::testing(),
            ..Default::default()
        }
    }
}

impl From<DBSettings> for DatabasePoolConfig {
    fn from(config: DBSettings) -> Self {
        Self {
            read_max_connections: config.read_max_connections,
            read_min_connections: config.read_min_connections,
            write_max_connections: config.write_max_connections,
            write_min_connections: config.write_min_connections,
            idle_timeout_secs: config.idle_timeout_secs,
            acquire_timeout_secs: config.acquire_timeout_secs,
            sqlite_config: config.sqlite_config.into(),
        }
    }
}

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Error, Debug)]
pub enum DatabaseWriteError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("timed out after {0:?} waiting for the write lock")]
    LockTimeout(StdDuration),
}

#[derive(Clone, Debug)]
pub struct DBConnection {
    pub database_name: String,
    pub database_path: String,
    read_pool: SqlitePool,
    write_pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    write_lock_timeout: StdDuration,
}

impl DBConnection {
    pub async fn new(
        path: &str,
        db_name: &str,
        database_pool_config: DatabasePoolConfig,
    ) -> Result<Self, sqlx::Error> {
        let database_path = format!("{}/{}.db", path, db_name);

        if database_pool_config.sqlite_config.mode != SqliteMode::Memory {
            let database_url = format!("sqlite:{}", database_path);
            if !Sqlite::database_exists(&database_url).await? {
                info!("Creating database at {}", database_path);
                Sqlite::create_database(&database_url).await?;
            }
        }

        let (read_pool, write_pool) =
            Self::create_pools(&database_path, &database_pool_config).await?;

        MIGRATOR
            .run(&write_pool)
            .await
            .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;

        Ok(Self {
            database_name: db_name.to_string(),
            database_path,
            read_pool,
            write_pool,
            write_lock: Arc::new(Mutex::new(())),
            write_lock_timeout: StdDuration::from_secs(database_pool_config.acquire_timeout_secs),
        })
    }

    /// Wrap pools someone else already migrated, e.g. the one `#[sqlx::test]` hands out
    pub fn from_pools(read_pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self {
            database_name: String::from("test"),
            database_path: String::from(":memory:"),
            read_pool,
            write_pool,
            write_lock: Arc::new(Mutex::new(())),
            write_lock_timeout: StdDuration::from_secs(5),
        }
    }

    async fn create_pools(
        database_path: &str,
        database_pool_config: &DatabasePoolConfig,
    ) -> Result<(SqlitePool, SqlitePool), sqlx::Error> {
        let write_config = match database_pool_config.sqlite_config.mode {
            SqliteMode::Memory => database_pool_config.sqlite_config.clone(),
            _ => SqliteConfig {
                mode: SqliteMode::ReadWrite,
                ..database_pool_config.sqlite_config.clone()
            },
        };
        let read_config = SqliteConfig {
            cache_size: write_config.cache_size * 2,
            ..write_config.clone()
        };

        let write_connection = write_config.build_connect_options(database_path);
        debug!("Write connection: {:?}", write_connection);

        let write_pool = SqlitePoolOptions::new()
            .max_connections(database_pool_config.write_max_connections)
            .min_connections(database_pool_config.write_min_connections)
            .acquire_timeout(StdDuration::from_secs(
                database_pool_config.acquire_timeout_secs,
            ))
            .idle_timeout(StdDuration::from_secs(
                database_pool_config.idle_timeout_secs,
            ))
            .connect_with(write_connection)
            .await?;

        // Readers share the connection options but run with query_only
        let read_connection = read_config
            .build_connect_options(database_path)
            .pragma("query_only", "true");
        debug!("Read connection: {:?}", read_connection);

        let read_pool = SqlitePoolOptions::new()
            .max_connections(database_pool_config.read_max_connections)
            .min_connections(database_pool_config.read_min_connections)
            .acquire_timeout(StdDuration::from_secs(
                database_pool_config.acquire_timeout_secs,
            ))
            .idle_timeout(StdDuration::from_secs(
                database_pool_config.idle_timeout_secs,
            ))
            .connect_with(read_connection)
            .await?;

        Ok((read_pool, write_pool))
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        let _: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.read_pool)
            .await?;
        let _: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.write_pool)
            .await?;

        Ok(())
    }

    pub async fn close(self) {
        self.read_pool.close().await;
        self.write_pool.close().await;
    }

    pub fn read(&self) -> &SqlitePool {
        &self.read_pool
    }

    pub fn write(&self) -> &SqlitePool {
        &self.write_pool
    }

    /// Run `op` against the write pool while holding the process wide write
    /// lock. SQLite allows one writer at a time, so queueing here turns
    /// `SQLITE_BUSY` churn into a bounded wait.
    pub async fn execute_write<F, Fut, T>(&self, op: F) -> Result<T, DatabaseWriteError>
    where
        F: FnOnce(SqlitePool) -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let _guard = tokio::time::timeout(self.write_lock_timeout, self.write_lock.lock())
            .await
            .map_err(|_| DatabaseWriteError::LockTimeout(self.write_lock_timeout))?;

        let result = op(self.write_pool.clone()).await?;
        Ok(result)
    }
}

/// True when `err` is a unique constraint failure on `column` (e.g. `participations.ticket_code`)
pub fn is_unique_violation_on(err: &sqlx::Error, column: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => unique_violation_on(db_err.as_ref(), column),
        _ => false,
    }
}

fn unique_violation_on(db_err: &dyn DatabaseError, column: &str) -> bool {
    db_err.is_unique_violation() && db_err.message().contains(column)
}

pub fn format_datetime(value: OffsetDateTime) -> Result<String, sqlx::Error> {
    value
        .format(&Rfc3339)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

pub fn format_optional_datetime(
    value: Option<OffsetDateTime>,
) -> Result<Option<String>, sqlx::Error> {
    value.map(format_datetime).transpose()
}

fn decode_error<E>(column: &str, source: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

pub fn parse_required_datetime(
    row: &SqliteRow,
    column: &str,
) -> Result<OffsetDateTime, sqlx::Error> {
    let date_str: String = row.try_get(column)?;
    OffsetDateTime::parse(&date_str, &Rfc3339).map_err(|e| decode_error(column, e))
}

pub fn parse_optional_datetime(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<OffsetDateTime>, sqlx::Error> {
    row.try_get::<Option<String>, _>(column)?
        .map(|s| OffsetDateTime::parse(&s, &Rfc3339))
        .transpose()
        .map_err(|e| decode_error(column, e))
}

pub fn parse_required_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, sqlx::Error> {
    let value: String = row.try_get(column)?;
    Uuid::parse_str(&value).map_err(|e| decode_error(column, e))
}

pub fn parse_optional_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>, sqlx::Error> {
    row.try_get::<Option<String>, _>(column)?
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| decode_error(column, e))
}

pub fn parse_required_decimal(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let value: String = row.try_get(column)?;
    Decimal::from_str(&value).map_err(|e| decode_error(column, e))
}

pub fn parse_optional_decimal(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<Decimal>, sqlx::Error> {
    row.try_get::<Option<String>, _>(column)?
        .map(|s| Decimal::from_str(&s))
        .transpose()
        .map_err(|e| decode_error(column, e))
}

/// Columns holding one of the core enums as its snake_case label
pub fn parse_required_label<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value: String = row.try_get(column)?;
    value.parse::<T>().map_err(|e| decode_error(column, e))
}

pub fn parse_required_json<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: DeserializeOwned,
{
    let value: String = row.try_get(column)?;
    serde_json::from_str(&value).map_err(|e| decode_error(column, e))
}

pub fn parse_optional_json<T>(row: &SqliteRow, column: &str) -> Result<Option<T>, sqlx::Error>
where
    T: DeserializeOwned,
{
    row.try_get::<Option<String>, _>(column)?
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| decode_error(column, e))
}
