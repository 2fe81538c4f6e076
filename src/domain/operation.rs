use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserId;

pub type OperationId = Uuid;

/// Result of a game round as reported by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "win")]
    Win,
    #[serde(rename = "lost")]
    Loss,
}

impl Outcome {
    /// Persisted representation, shared with the wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Win => "win",
            Outcome::Loss => "lost",
        }
    }

    /// Parse the exact wire names, `win` and `lost`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "win" => Some(Outcome::Win),
            "lost" => Some(Outcome::Loss),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A ledger entry. Once written, the only permitted change is the one-way
/// transition from active to cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    /// Owner of the balance this operation moved
    pub user_id: UserId,
    /// Always non-negative; direction comes from `outcome`
    pub amount: f64,
    pub outcome: Outcome,
    /// Owner's balance immediately before this operation was applied
    pub balance_before: f64,
    /// Strictly increasing insertion stamp (microseconds)
    pub created_at: i64,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Operation {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    pub fn is_active(&self) -> bool {
        !self.is_cancelled()
    }
}
