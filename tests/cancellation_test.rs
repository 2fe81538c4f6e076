mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{assert_close, record_numbered, test_repository, test_service};
use uuid::Uuid;
use wagerbook::application::{AppError, LedgerService};
use wagerbook::domain::{
    BalancePolicy, CancellationPlan, CancellationSelector, DEFAULT_USER_ID, FlooredBalance,
    Operation, Outcome,
};

async fn reference_ledger(service: &LedgerService) -> Result<()> {
    record_numbered(service, 1, "win", 20.15).await?;
    record_numbered(service, 2, "win", 30.15).await?;
    record_numbered(service, 3, "lost", 10.03).await?;
    record_numbered(service, 4, "win", 6.03).await?;
    Ok(())
}

fn cancelled_ids(operations: &[Operation]) -> Vec<Uuid> {
    operations
        .iter()
        .filter(|op| op.is_cancelled())
        .map(|op| op.id)
        .collect()
}

#[tokio::test]
async fn test_cancels_odd_positions_and_recomputes_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    reference_ledger(&service).await?;
    assert_close(service.balance().await?.balance, 46.30);

    let outcome = service.cancel_recent(4).await?;

    assert_eq!(outcome.cancelled, vec![Uuid::from_u128(2), Uuid::from_u128(4)]);
    assert_close(outcome.balance, 10.12);
    assert_close(service.balance().await?.balance, 10.12);

    let operations = service.operations(None).await?;
    assert_eq!(
        cancelled_ids(&operations),
        vec![Uuid::from_u128(2), Uuid::from_u128(4)]
    );
    Ok(())
}

#[tokio::test]
async fn test_second_pass_without_new_operations_changes_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;
    reference_ledger(&service).await?;

    service.cancel_recent(4).await?;
    let first = service.operations(None).await?;

    let outcome = service.cancel_recent(4).await?;
    assert!(outcome.is_empty());
    assert_close(outcome.balance, 10.12);

    let second = service.operations(None).await?;
    assert_eq!(first, second, "cancellation state must not change");
    assert_close(service.balance().await?.balance, 10.12);
    Ok(())
}

#[tokio::test]
async fn test_window_is_the_most_recent_operations() -> Result<()> {
    let (service, _temp) = test_service().await?;
    for n in 1..=6 {
        record_numbered(&service, n, "win", n as f64).await?;
    }
    assert_close(service.balance().await?.balance, 21.0);

    // Window is operations 3..=6; positions 1 and 3 are operations 4 and 6.
    let outcome = service.cancel_recent(4).await?;
    assert_eq!(outcome.cancelled, vec![Uuid::from_u128(4), Uuid::from_u128(6)]);

    // Base is the balance before operation 4 (6.0), then operation 5 replays.
    assert_close(outcome.balance, 11.0);
    assert_close(service.balance().await?.balance, 11.0);

    let operations = service.operations(None).await?;
    assert_eq!(
        cancelled_ids(&operations),
        vec![Uuid::from_u128(4), Uuid::from_u128(6)]
    );
    Ok(())
}

#[tokio::test]
async fn test_cancelled_operations_resurfacing_are_not_recancelled() -> Result<()> {
    let (service, _temp) = test_service().await?;
    reference_ledger(&service).await?;
    service.cancel_recent(4).await?;
    let after_first = service.operations(None).await?;

    record_numbered(&service, 5, "win", 1.0).await?;
    assert_close(service.balance().await?.balance, 11.12);

    // Window 2..=5: operations 3 and 5 sit at odd positions and are selected;
    // operations 2 and 4 are already cancelled and are left alone.
    let outcome = service.cancel_recent(4).await?;
    assert_eq!(outcome.cancelled, vec![Uuid::from_u128(3), Uuid::from_u128(5)]);

    // Only operation 1 is still active. Operation 2, cancelled by the first
    // pass, must not come back through the snapshot taken before operation 3.
    assert_close(outcome.balance, 20.15);
    assert_close(service.balance().await?.balance, 20.15);

    let operations = service.operations(None).await?;
    for earlier in after_first.iter().filter(|op| op.is_cancelled()) {
        let now = operations.iter().find(|op| op.id == earlier.id).unwrap();
        assert_eq!(now.cancelled_at, earlier.cancelled_at);
    }
    Ok(())
}

fn active_total(operations: &[Operation]) -> f64 {
    operations
        .iter()
        .filter(|op| op.is_active())
        .map(|op| op.amount)
        .sum()
}

#[tokio::test]
async fn test_earlier_cancellations_outside_the_window_stay_cancelled() -> Result<()> {
    let (service, _temp) = test_service().await?;
    for n in 1..=6 {
        record_numbered(&service, n, "win", n as f64).await?;
    }

    let first = service.cancel_recent(6).await?;
    assert_eq!(
        first.cancelled,
        vec![Uuid::from_u128(2), Uuid::from_u128(4), Uuid::from_u128(6)]
    );
    assert_close(first.balance, 9.0);

    for n in 7..=9 {
        record_numbered(&service, n, "win", n as f64).await?;
    }

    // Window 4..=9. Operation 2 is outside it, yet the snapshot before
    // operation 5 was taken while 2 was still active.
    let second = service.cancel_recent(6).await?;
    assert_eq!(
        second.cancelled,
        vec![Uuid::from_u128(5), Uuid::from_u128(7), Uuid::from_u128(9)]
    );
    assert_close(second.balance, 12.0);
    assert_close(second.balance, active_total(&service.operations(None).await?));
    Ok(())
}

#[tokio::test]
async fn test_balance_tracks_active_wins_across_passes() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let mut n = 0;

    for (batch, limit) in [(3, 4), (2, 4), (5, 6), (1, 2), (4, 8), (3, 3)] {
        for _ in 0..batch {
            n += 1;
            record_numbered(&service, n, "win", n as f64 * 1.5).await?;
        }
        service.cancel_recent(limit).await?;

        let operations = service.operations(None).await?;
        assert_close(service.balance().await?.balance, active_total(&operations));
    }
    Ok(())
}

#[tokio::test]
async fn test_small_windows_select_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let outcome = service.cancel_recent(4).await?;
    assert!(outcome.is_empty());
    assert_eq!(outcome.balance, 0.0);

    reference_ledger(&service).await?;
    for limit in [0, 1] {
        let outcome = service.cancel_recent(limit).await?;
        assert!(outcome.is_empty(), "limit {} should not cancel", limit);
        assert_close(outcome.balance, 46.30);
    }

    assert!(cancelled_ids(&service.operations(None).await?).is_empty());
    assert_close(service.balance().await?.balance, 46.30);
    Ok(())
}

#[tokio::test]
async fn test_cancellation_is_per_user() -> Result<()> {
    let (service, temp) = test_service().await?;
    reference_ledger(&service).await?;

    let other =
        LedgerService::init(&common::db_path(&temp), common::other_user(), 2).await?;
    record_numbered(&other, 10, "win", 5.0).await?;
    record_numbered(&other, 11, "win", 7.0).await?;

    let outcome = other.cancel_recent(4).await?;
    assert_eq!(outcome.cancelled, vec![Uuid::from_u128(11)]);
    assert_close(other.balance().await?.balance, 5.0);

    assert!(cancelled_ids(&service.operations(None).await?).is_empty());
    assert_close(service.balance().await?.balance, 46.30);
    Ok(())
}

/// Cancels whatever ids it was built with, regardless of the window.
struct FixedSelector {
    ids: Vec<Uuid>,
    balance: f64,
}

impl CancellationSelector for FixedSelector {
    fn select(&self, _window: &[Operation]) -> Option<CancellationPlan> {
        Some(CancellationPlan {
            ids: self.ids.clone(),
            balance: self.balance,
        })
    }
}

#[tokio::test]
async fn test_store_applies_selector_plan() -> Result<()> {
    let (repo, _temp) = test_repository().await?;
    let repo = repo.strategies(
        Arc::new(FlooredBalance),
        Arc::new(FixedSelector {
            ids: vec![Uuid::from_u128(1)],
            balance: 0.5,
        }),
    );
    let service = LedgerService::new(repo, DEFAULT_USER_ID);
    record_numbered(&service, 1, "win", 11.66).await?;

    let outcome = service.cancel_recent(1).await?;

    assert_eq!(outcome.cancelled, vec![Uuid::from_u128(1)]);
    assert_eq!(service.balance().await?.balance, 0.5);
    Ok(())
}

#[tokio::test]
async fn test_failed_cancellation_rolls_back() -> Result<()> {
    let (repo, _temp) = test_repository().await?;
    let repo = repo.strategies(
        Arc::new(FlooredBalance),
        Arc::new(FixedSelector {
            ids: vec![Uuid::from_u128(1), Uuid::from_u128(999)],
            balance: 0.5,
        }),
    );
    let service = LedgerService::new(repo, DEFAULT_USER_ID);
    record_numbered(&service, 1, "win", 11.66).await?;

    let err = service.cancel_recent(4).await.unwrap_err();
    assert!(matches!(err, AppError::StoreUnavailable(_)), "got {:?}", err);

    // Operation 1 was updated before the failure and must be restored
    assert!(cancelled_ids(&service.operations(None).await?).is_empty());
    assert_close(service.balance().await?.balance, 11.66);
    Ok(())
}

struct Doubling;

impl BalancePolicy for Doubling {
    fn apply(&self, balance: f64, amount: f64, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Win => balance + 2.0 * amount,
            Outcome::Loss => balance,
        }
    }
}

#[tokio::test]
async fn test_store_uses_injected_policy() -> Result<()> {
    let (repo, _temp) = test_repository().await?;
    let repo = repo.balance_policy(Arc::new(Doubling));
    let service = LedgerService::new(repo, DEFAULT_USER_ID);

    record_numbered(&service, 1, "win", 5.0).await?;
    record_numbered(&service, 2, "lost", 3.0).await?;
    record_numbered(&service, 3, "win", 1.0).await?;
    assert_close(service.balance().await?.balance, 12.0);

    let outcome = service.cancel_recent(3).await?;
    assert_eq!(outcome.cancelled, vec![Uuid::from_u128(2)]);
    // base 10.0 (before operation 2), then operation 3 doubles to +2.0
    assert_close(outcome.balance, 12.0);
    Ok(())
}
