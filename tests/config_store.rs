use std::io::Write;

use tempfile::{NamedTempFile, TempDir};

use parcel_exchange::config::{Config, MatchingConfig};
use parcel_exchange::config_store;

#[test]
fn first_load_seeds_defaults_then_reads_back() {
    let db = NamedTempFile::new().unwrap();
    let path = db.path().to_str().unwrap();

    assert!(Config::from_store(path).is_err());

    let seeded = config_store::load_or_init(path).unwrap();
    assert_eq!(seeded.sqlite_path(), path);
    assert_eq!(seeded.server.as_ref().unwrap().port, Some(8080));

    let mut changed = seeded.clone();
    changed.matching = Some(MatchingConfig {
        date_window_days: Some(3),
        default_limit: Some(5),
        default_min_score: Some(40),
    });
    config_store::save_config(path, &changed).unwrap();

    let loaded = config_store::load_or_init(path).unwrap();
    assert_eq!(loaded.date_window_days(), 3);
    assert_eq!(loaded.default_match_limit(), 5);
    assert_eq!(loaded.default_min_score(), 40);
    assert_eq!(Config::from_store(path).unwrap().date_window_days(), 3);
}

#[test]
fn creates_missing_parent_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/deeper/exchange.db");
    let path = path.to_str().unwrap();

    config_store::load_or_init(path).unwrap();
    assert!(std::path::Path::new(path).exists());
}

#[test]
fn reads_json_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"server": {{"host": "0.0.0.0", "port": 9000}}, "realtime": {{"idle_timeout_seconds": 90}}}}"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.server.as_ref().unwrap().host.as_deref(), Some("0.0.0.0"));
    assert_eq!(config.idle_timeout().as_secs(), 90);
    assert_eq!(config.heartbeat_interval().as_secs(), 25);

    assert!(Config::from_file("/definitely/not/here.json").is_err());
}

#[test]
fn unreadable_stored_config_is_reported_not_replaced() {
    use diesel::prelude::*;
    use diesel::sqlite::SqliteConnection;

    #[derive(QueryableByName)]
    struct Stored {
        #[diesel(sql_type = diesel::sql_types::Text)]
        config_json: String,
    }

    let db = NamedTempFile::new().unwrap();
    let path = db.path().to_str().unwrap();
    config_store::load_or_init(path).unwrap();

    let broken = r#"{"server":{"host":"0.0.0.0","port":"9000"}}"#;
    let mut conn = SqliteConnection::establish(path).unwrap();
    diesel::sql_query("UPDATE app_config SET config_json = ? WHERE id = 1")
        .bind::<diesel::sql_types::Text, _>(broken)
        .execute(&mut conn)
        .unwrap();

    assert!(config_store::load_or_init(path).is_err());
    assert!(Config::from_store(path).is_err());

    let stored: Stored = diesel::sql_query("SELECT config_json FROM app_config WHERE id = 1")
        .get_result(&mut conn)
        .unwrap();
    assert_eq!(stored.config_json, broken);
}
