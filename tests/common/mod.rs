// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use tempfile::TempDir;
use uuid::Uuid;
use wagerbook::Repository;
use wagerbook::application::{LedgerService, UpdateRequest};
use wagerbook::domain::{DEFAULT_USER_ID, UserId};
use wagerbook::storage::RecordOutcome;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let service = LedgerService::init(&db_path(&temp_dir), DEFAULT_USER_ID, 5).await?;
    Ok((service, temp_dir))
}

/// Helper to create a repository on a temporary database, with the default
/// user already present
pub async fn test_repository() -> Result<(Repository, TempDir)> {
    let temp_dir = TempDir::new()?;
    let url = format!("sqlite:{}", db_path(&temp_dir));
    let repo = Repository::init(&url, 5, DEFAULT_USER_ID).await?;
    Ok((repo, temp_dir))
}

pub fn db_path(temp_dir: &TempDir) -> String {
    temp_dir
        .path()
        .join("test.db")
        .to_str()
        .unwrap()
        .to_string()
}

/// Record a game result with a fresh operation id
pub async fn record(service: &LedgerService, state: &str, amount: f64) -> Result<RecordOutcome> {
    Ok(service
        .record(UpdateRequest::new(state, amount, Uuid::new_v4()))
        .await?)
}

/// Record a game result with a fixed, readable operation id
pub async fn record_numbered(
    service: &LedgerService,
    n: u128,
    state: &str,
    amount: f64,
) -> Result<RecordOutcome> {
    Ok(service
        .record(UpdateRequest::new(state, amount, Uuid::from_u128(n)))
        .await?)
}

pub fn other_user() -> UserId {
    Uuid::from_u128(0xfeed)
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}
