use std::path::Path;

use diesel::sqlite::SqliteConnection;
use diesel::{Connection, ConnectionError, ConnectionResult};
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, ManagerConfig};
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::AsyncConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{ParcelExchangeError, Result};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
const BUSY_TIMEOUT_MS: u32 = 5_000;

pub type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
pub type SqlitePool = Pool<SqliteAsyncConn>;
pub type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

/// Migrates the database at `sqlite_path` and opens a pool on it.
pub async fn connect(sqlite_path: &str) -> Result<SqlitePool> {
    run_migrations(sqlite_path).await?;

    let mut config = ManagerConfig::default();
    config.custom_setup = Box::new(establish);
    let manager =
        AsyncDieselConnectionManager::<SqliteAsyncConn>::new_with_config(sqlite_path, config);
    Pool::builder()
        .build(manager)
        .await
        .map_err(|e| ParcelExchangeError::Storage(e.to_string()))
}

fn establish(url: &str) -> BoxFuture<'_, ConnectionResult<SqliteAsyncConn>> {
    let url = url.to_string();
    async move {
        let mut conn = SqliteAsyncConn::establish(&url).await?;
        diesel_async::RunQueryDsl::execute(
            diesel::sql_query(format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}")),
            &mut conn,
        )
        .await
        .map_err(ConnectionError::CouldntSetupConfiguration)?;
        Ok(conn)
    }
    .boxed()
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ParcelExchangeError::Runtime(e.to_string()))?;
    }
    Ok(())
}

/// Blocking connection with the schema brought up to date.
pub fn open_migrated(database_url: &str) -> Result<SqliteConnection> {
    ensure_parent_dir(database_url)?;
    let mut conn = SqliteConnection::establish(database_url)
        .map_err(|e| ParcelExchangeError::Storage(e.to_string()))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| ParcelExchangeError::Storage(e.to_string()))?;
    Ok(conn)
}

async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || open_migrated(&database_url).map(drop))
        .await
        .map_err(|e| ParcelExchangeError::Runtime(e.to_string()))??;
    Ok(())
}
