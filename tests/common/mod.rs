//! Common test utilities - live MySQL server discovery
//!
//! These tests need a running server. Point `TRUSS_TEST_URI` at one, e.g.
//! `TRUSS_TEST_URI=mysql://root@127.0.0.1:3306/ cargo test`; without it
//! every test returns early.

#![allow(dead_code)]

use sqlx::mysql::MySqlPool;
use truss::Config;

/// Configuration for the live server, or `None` when none is configured
pub fn live_config() -> Option<Config> {
    let config = Config::load().expect("Failed to load configuration");
    if config.test_uri.is_none() {
        eprintln!("TRUSS_TEST_URI not set, skipping live MySQL test");
        return None;
    }
    Some(config)
}

/// Return early from a test when no live server is configured
macro_rules! require_mysql {
    () => {
        match common::live_config() {
            Some(config) => config,
            None => return,
        }
    };
}

/// Whether `table` exists in the current database
pub async fn table_exists(pool: &MySqlPool, table: &str) -> bool {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = DATABASE() AND table_name = ?",
    )
    .bind(table)
    .fetch_one(pool)
    .await
    .expect("Failed to query information_schema");
    count > 0
}
