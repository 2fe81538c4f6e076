use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::domain::{Operation, OperationId, Outcome, User, UserId};
use crate::storage::{CancellationOutcome, RecordOutcome, Repository};

use super::AppError;

/// Application service for the ledger of one configured user.
/// This is the interface shared by the HTTP API, the CLI and maintenance.
pub struct LedgerService {
    repo: Repository,
    user_id: UserId,
}

/// A request to record the result of a game round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Game state as reported by the caller: exactly "win" or "lost"
    pub state: String,
    pub amount: f64,
    #[serde(rename = "transactionId")]
    pub operation_id: OperationId,
}

impl UpdateRequest {
    pub fn new(state: impl Into<String>, amount: f64, operation_id: OperationId) -> Self {
        Self {
            state: state.into(),
            amount,
            operation_id,
        }
    }

    fn validate(&self) -> Result<Outcome, AppError> {
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(AppError::InvalidArgument(format!(
                "amount must be a finite non-negative number, got {}",
                self.amount
            )));
        }

        Outcome::from_str(&self.state)
            .ok_or_else(|| AppError::InvalidArgument(format!("unknown game state: {}", self.state)))
    }
}

impl LedgerService {
    /// Create a service acting on behalf of `user_id`.
    pub fn new(repo: Repository, user_id: UserId) -> Self {
        Self { repo, user_id }
    }

    /// Open (creating if needed) the database at the given path and make sure
    /// the configured user exists.
    pub async fn init(
        database_path: &str,
        user_id: UserId,
        max_connections: u32,
    ) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::init(&db_url, max_connections, user_id).await?;
        Ok(Self::new(repo, user_id))
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Record a game result and update the balance accordingly.
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn record(&self, request: UpdateRequest) -> Result<RecordOutcome, AppError> {
        let outcome = request.validate()?;
        let recorded = self
            .repo
            .record_operation(self.user_id, request.operation_id, request.amount, outcome)
            .await?;

        debug!(balance = recorded.balance, "balance updated");
        Ok(recorded)
    }

    /// Cancel a selection of the `limit` most recent operations.
    pub async fn cancel_recent(&self, limit: u32) -> Result<CancellationOutcome, AppError> {
        Ok(self.repo.cancel_recent(self.user_id, limit).await?)
    }

    /// Current state of the configured user.
    pub async fn balance(&self) -> Result<User, AppError> {
        self.repo
            .get_user(self.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", self.user_id)))
    }

    /// The `limit` most recent operations (all when `None`), oldest first.
    pub async fn operations(&self, limit: Option<u32>) -> Result<Vec<Operation>, AppError> {
        Ok(self.repo.list_operations(self.user_id, limit).await?)
    }
}

/// Anything the maintenance loop can ask to run a cancellation pass.
pub trait Canceller: Send + Sync + 'static {
    fn cancel(
        &self,
        limit: u32,
    ) -> impl Future<Output = Result<CancellationOutcome, AppError>> + Send;
}

impl Canceller for LedgerService {
    fn cancel(
        &self,
        limit: u32,
    ) -> impl Future<Output = Result<CancellationOutcome, AppError>> + Send {
        self.cancel_recent(limit)
    }
}
