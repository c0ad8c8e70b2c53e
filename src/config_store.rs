//! The daemon's config lives in the `app_config` table of its own database,
//! as a single JSON row.

use std::time::{SystemTime, UNIX_EPOCH};

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::config::Config;
use crate::db;
use crate::error::{ParcelExchangeError, Result};
use crate::providers::sqlite::schema::app_config;

const CONFIG_ROW: i32 = 1;

#[derive(Insertable)]
#[diesel(table_name = app_config)]
struct ConfigRow<'a> {
    id: i32,
    config_json: &'a str,
    updated_at: i64,
}

fn stored_json(conn: &mut SqliteConnection) -> Result<Option<String>> {
    app_config::table
        .filter(app_config::id.eq(CONFIG_ROW))
        .select(app_config::config_json)
        .first::<String>(conn)
        .optional()
        .map_err(|e| ParcelExchangeError::Storage(e.to_string()))
}

fn parse(raw: &str) -> Result<Config> {
    serde_json::from_str(raw).map_err(|e| ParcelExchangeError::Config(e.to_string()))
}

fn write(conn: &mut SqliteConnection, config: &Config) -> Result<()> {
    let config_json =
        serde_json::to_string(config).map_err(|e| ParcelExchangeError::Config(e.to_string()))?;
    let updated_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ParcelExchangeError::Runtime(e.to_string()))?
        .as_secs() as i64;
    diesel::replace_into(app_config::table)
        .values(&ConfigRow {
            id: CONFIG_ROW,
            config_json: &config_json,
            updated_at,
        })
        .execute(conn)
        .map_err(|e| ParcelExchangeError::Storage(e.to_string()))?;
    Ok(())
}

/// Fails with `Config` when nothing has been stored yet.
pub fn load_config(db_path: &str) -> Result<Config> {
    let mut conn = db::open_migrated(db_path)?;
    match stored_json(&mut conn)? {
        Some(raw) => parse(&raw),
        None => Err(ParcelExchangeError::Config(format!(
            "no config stored in {db_path}"
        ))),
    }
}

pub fn save_config(db_path: &str, config: &Config) -> Result<()> {
    let mut conn = db::open_migrated(db_path)?;
    write(&mut conn, config)
}

/// Returns the stored config, seeding the defaults only when no row exists.
/// A stored config that no longer parses is an error and is left untouched.
pub fn load_or_init(db_path: &str) -> Result<Config> {
    let mut conn = db::open_migrated(db_path)?;
    if let Some(raw) = stored_json(&mut conn)? {
        return parse(&raw);
    }
    let config = Config::defaults_for(db_path);
    write(&mut conn, &config)?;
    tracing::info!(db = %db_path, "seeded default config");
    Ok(config)
}
