use std::collections::HashSet;

use super::{BalancePolicy, FlooredBalance, Operation, OperationId};

/// What a cancellation pass should do: which operations to mark cancelled
/// and the balance the owner ends up with afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CancellationPlan {
    /// Selected ids, in window order
    pub ids: Vec<OperationId>,
    pub balance: f64,
}

/// Chooses operations to reverse from a window of recent history.
///
/// The window is ordered oldest to newest. Returning `None` means nothing is
/// cancelled and the owner's balance must be left as it is.
pub trait CancellationSelector: Send + Sync {
    fn select(&self, window: &[Operation]) -> Option<CancellationPlan>;
}

/// Reverses every other operation in the window: the active ones at odd
/// zero-based positions.
///
/// The resulting balance starts from the `balance_before` of the first
/// selected operation and replays the surviving operations after it through
/// the balance policy. Operations that were cancelled by an earlier pass are
/// neither selected again nor replayed. Snapshots in the window must already
/// account for earlier cancellations; see [`restate_snapshots`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AlternatingSelector<P = FlooredBalance> {
    policy: P,
}

impl<P: BalancePolicy> AlternatingSelector<P> {
    pub fn new(policy: P) -> Self {
        Self { policy }
    }
}

impl<P: BalancePolicy> CancellationSelector for AlternatingSelector<P> {
    fn select(&self, window: &[Operation]) -> Option<CancellationPlan> {
        let ids: Vec<OperationId> = window
            .iter()
            .enumerate()
            .filter(|(position, op)| position % 2 == 1 && op.is_active())
            .map(|(_, op)| op.id)
            .collect();

        let first = window.iter().position(|op| ids.first() == Some(&op.id))?;
        let selected: HashSet<OperationId> = ids.iter().copied().collect();

        let balance = window[first..]
            .iter()
            .filter(|op| op.is_active() && !selected.contains(&op.id))
            .fold(window[first].balance_before, |balance, op| {
                self.policy.apply(balance, op.amount, op.outcome)
            });

        Some(CancellationPlan { ids, balance })
    }
}

/// Rewrite each window operation's `balance_before` to the balance the owner
/// would have had with every currently cancelled operation removed.
///
/// A recorded snapshot still includes operations that were cancelled after it
/// was taken. `lead_in` holds the operations between the newest trustworthy
/// snapshot and the window, oldest first; its first entry (or the window's
/// first entry when it is empty) must carry that trustworthy snapshot.
pub fn restate_snapshots<P: BalancePolicy + ?Sized>(
    policy: &P,
    lead_in: &[Operation],
    window: &mut [Operation],
) {
    let Some(anchor) = lead_in.first().or(window.first()) else {
        return;
    };

    let mut balance = lead_in
        .iter()
        .filter(|op| op.is_active())
        .fold(anchor.balance_before, |balance, op| {
            policy.apply(balance, op.amount, op.outcome)
        });

    for op in window.iter_mut() {
        op.balance_before = balance;
        if op.is_active() {
            balance = policy.apply(balance, op.amount, op.outcome);
        }
    }
}
