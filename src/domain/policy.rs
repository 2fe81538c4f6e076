use std::sync::Arc;

use super::Outcome;

/// Maps a balance and one operation to the balance after that operation.
///
/// Implementations must be pure: the ledger calls them inside open
/// transactions and while replaying history during cancellation.
pub trait BalancePolicy: Send + Sync {
    fn apply(&self, balance: f64, amount: f64, outcome: Outcome) -> f64;
}

impl<P: BalancePolicy + ?Sized> BalancePolicy for Arc<P> {
    fn apply(&self, balance: f64, amount: f64, outcome: Outcome) -> f64 {
        (**self).apply(balance, amount, outcome)
    }
}

/// Wins add, losses subtract, and the balance never drops below zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlooredBalance;

impl BalancePolicy for FlooredBalance {
    fn apply(&self, balance: f64, amount: f64, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Win => balance + amount,
            Outcome::Loss => (balance - amount).max(0.0),
        }
    }
}
