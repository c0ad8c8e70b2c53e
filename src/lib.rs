pub mod auth;
pub mod config;
pub mod config_store;
pub mod daemon;
pub mod db;
pub mod domains;
pub mod error;
pub mod interfaces;
pub mod matching;
pub mod providers;
pub mod services;

pub use crate::config::Config;
pub use crate::error::{ParcelExchangeError, Result};
pub use crate::interfaces::providers::MarketplaceStore;
pub use crate::providers::memory::InMemoryStore;
pub use crate::providers::sqlite::SqliteStore;
pub use crate::services::relay::{Relay, RelayStats};
