use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    AlternatingSelector, BalancePolicy, CancellationSelector, FlooredBalance, Operation,
    OperationId, Outcome, User, UserId, restate_snapshots,
};

use super::{MIGRATION_001_INITIAL, StoreError};

const OPERATION_COLUMNS: &str =
    "id, user_id, amount, prev_balance, game_state, created_at, deleted_at";

/// An operation as written, together with the owner's new balance.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub operation: Operation,
    pub balance: f64,
}

/// Result of a cancellation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CancellationOutcome {
    /// Operations marked cancelled by this pass, oldest first
    pub cancelled: Vec<OperationId>,
    /// Owner's balance after the pass
    pub balance: f64,
}

impl CancellationOutcome {
    pub fn is_empty(&self) -> bool {
        self.cancelled.is_empty()
    }
}

/// Repository for users and their operations.
///
/// `record_operation` and `cancel_recent` each run in a single transaction.
/// Both start by writing the owner's row, which takes SQLite's write lock
/// before anything is read, so concurrent callers serialize on the database
/// rather than on an in-process lock.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    policy: Arc<dyn BalancePolicy>,
    selector: Arc<dyn CancellationSelector>,
}

impl Repository {
    /// Create a repository using the default balance policy and selector.
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_policy(pool, Arc::new(FlooredBalance))
    }

    /// Record with `policy` and cancel with an [`AlternatingSelector`] that
    /// replays through the same policy.
    pub fn with_policy(pool: SqlitePool, policy: Arc<dyn BalancePolicy>) -> Self {
        let selector = Arc::new(AlternatingSelector::new(Arc::clone(&policy)));
        Self::with_strategies(pool, policy, selector)
    }

    /// Use an explicit selector. It must recompute balances with the same
    /// rule as `policy`, or cancellation and recording will disagree.
    pub fn with_strategies(
        pool: SqlitePool,
        policy: Arc<dyn BalancePolicy>,
        selector: Arc<dyn CancellationSelector>,
    ) -> Self {
        Self {
            pool,
            policy,
            selector,
        }
    }

    /// Connect to a SQLite database, creating the file if it doesn't exist.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        debug!(database_url, max_connections, "connected to ledger database");
        Ok(Self::new(pool))
    }

    /// Replace the balance policy, keeping the default selector in step.
    pub fn balance_policy(self, policy: Arc<dyn BalancePolicy>) -> Self {
        Self::with_policy(self.pool, policy)
    }

    /// Replace the balance policy and cancellation selector.
    pub fn strategies(
        self,
        policy: Arc<dyn BalancePolicy>,
        selector: Arc<dyn CancellationSelector>,
    ) -> Self {
        Self::with_strategies(self.pool, policy, selector)
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Connect, migrate, and make sure `user_id` exists.
    pub async fn init(
        database_url: &str,
        max_connections: u32,
        user_id: UserId,
    ) -> Result<Self, StoreError> {
        let repo = Self::connect(database_url, max_connections).await?;
        repo.migrate().await?;
        repo.ensure_user(user_id).await?;
        Ok(repo)
    }

    // ========================
    // Users
    // ========================

    /// Insert a user with a zero balance. Fails with `Conflict` if it exists.
    pub async fn create_user(&self, user_id: UserId) -> Result<User, StoreError> {
        sqlx::query("INSERT INTO users (id, balance) VALUES (?, 0)")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::from_insert(err, format!("user {}", user_id)))?;
        Ok(User::new(user_id))
    }

    /// Insert a user with a zero balance unless it already exists.
    pub async fn ensure_user(&self, user_id: UserId) -> Result<(), StoreError> {
        let result = sqlx::query("INSERT OR IGNORE INTO users (id, balance) VALUES (?, 0)")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            info!(%user_id, "created ledger user");
        }
        Ok(())
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, balance FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(User {
                id: parse_uuid(&row, "id")?,
                balance: row.get("balance"),
            })
        })
        .transpose()
    }

    // ========================
    // Operations
    // ========================

    /// Apply one operation to the owner's balance and append it to the ledger.
    pub async fn record_operation(
        &self,
        user_id: UserId,
        operation_id: OperationId,
        amount: f64,
        outcome: Outcome,
    ) -> Result<RecordOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = self
            .record_in(&mut tx, user_id, operation_id, amount, outcome)
            .await;

        match result {
            Ok(recorded) => {
                tx.commit().await?;
                debug!(
                    %user_id,
                    %operation_id,
                    %outcome,
                    amount,
                    balance_before = recorded.operation.balance_before,
                    balance = recorded.balance,
                    "recorded operation"
                );
                Ok(recorded)
            }
            Err(err) => Err(abort(tx, err).await),
        }
    }

    async fn record_in(
        &self,
        conn: &mut SqliteConnection,
        user_id: UserId,
        operation_id: OperationId,
        amount: f64,
        outcome: Outcome,
    ) -> Result<RecordOutcome, StoreError> {
        let balance_before = lock_balance(conn, user_id).await?;
        let created_at = next_stamp(conn).await?;

        sqlx::query(
            r#"
            INSERT INTO operations (id, user_id, amount, prev_balance, game_state, created_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(operation_id.to_string())
        .bind(user_id.to_string())
        .bind(amount)
        .bind(balance_before)
        .bind(outcome.as_str())
        .bind(created_at)
        .execute(&mut *conn)
        .await
        .map_err(|err| StoreError::from_insert(err, format!("operation {}", operation_id)))?;

        let balance = self.policy.apply(balance_before, amount, outcome);
        set_balance(conn, user_id, balance).await?;

        Ok(RecordOutcome {
            operation: Operation {
                id: operation_id,
                user_id,
                amount,
                outcome,
                balance_before,
                created_at,
                cancelled_at: None,
            },
            balance,
        })
    }

    /// Cancel a selection of the owner's `limit` most recent operations and
    /// set the balance the selector recomputed for them.
    pub async fn cancel_recent(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<CancellationOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = self.cancel_in(&mut tx, user_id, limit).await;

        match result {
            Ok(outcome) => {
                tx.commit().await?;
                if outcome.is_empty() {
                    debug!(%user_id, limit, "no operations to cancel");
                } else {
                    info!(
                        %user_id,
                        cancelled = outcome.cancelled.len(),
                        balance = outcome.balance,
                        "cancelled recent operations"
                    );
                }
                Ok(outcome)
            }
            Err(err) => Err(abort(tx, err).await),
        }
    }

    async fn cancel_in(
        &self,
        conn: &mut SqliteConnection,
        user_id: UserId,
        limit: u32,
    ) -> Result<CancellationOutcome, StoreError> {
        let balance = lock_balance(conn, user_id).await?;
        let mut window = recent_operations(conn, user_id, limit).await?;
        if let Some(start) = window.first().map(|op| op.created_at) {
            let lead_in = lead_in_operations(conn, user_id, start).await?;
            restate_snapshots(self.policy.as_ref(), &lead_in, &mut window);
        }

        let Some(plan) = self.selector.select(&window) else {
            return Ok(CancellationOutcome {
                cancelled: Vec::new(),
                balance,
            });
        };

        let cancelled_at = next_stamp(conn).await?;
        for id in &plan.ids {
            let result = sqlx::query(
                "UPDATE operations SET deleted_at = ? WHERE id = ? AND user_id = ? AND deleted_at IS NULL",
            )
            .bind(cancelled_at)
            .bind(id.to_string())
            .bind(user_id.to_string())
            .execute(&mut *conn)
            .await?;

            // The window was read under the write lock, so every selected row
            // must still be active.
            if result.rows_affected() != 1 {
                return Err(StoreError::Corrupt(format!(
                    "operation {} is not an active operation of user {}",
                    id, user_id
                )));
            }
        }

        set_balance(conn, user_id, plan.balance).await?;

        Ok(CancellationOutcome {
            cancelled: plan.ids,
            balance: plan.balance,
        })
    }

    /// The owner's `limit` most recent operations, oldest first. `None`
    /// returns the whole history.
    pub async fn list_operations(
        &self,
        user_id: UserId,
        limit: Option<u32>,
    ) -> Result<Vec<Operation>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        match limit {
            Some(limit) => recent_operations(&mut conn, user_id, limit).await,
            None => {
                let rows = sqlx::query(&format!(
                    "SELECT {} FROM operations WHERE user_id = ? ORDER BY created_at",
                    OPERATION_COLUMNS
                ))
                .bind(user_id.to_string())
                .fetch_all(&mut *conn)
                .await?;

                rows.iter().map(row_to_operation).collect()
            }
        }
    }

    pub async fn get_operation(&self, id: OperationId) -> Result<Option<Operation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM operations WHERE id = ?",
            OPERATION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_operation).transpose()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Roll back explicitly before handing the error to the caller.
async fn abort(tx: Transaction<'_, Sqlite>, err: StoreError) -> StoreError {
    if let Err(rollback) = tx.rollback().await {
        warn!(error = %rollback, "transaction rollback failed");
    }
    err
}

/// Read the owner's balance through a no-op write so the transaction holds
/// the database write lock from its first statement.
async fn lock_balance(conn: &mut SqliteConnection, user_id: UserId) -> Result<f64, StoreError> {
    let row = sqlx::query("UPDATE users SET balance = balance WHERE id = ? RETURNING balance")
        .bind(user_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|row| row.get("balance"))
        .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))
}

async fn set_balance(
    conn: &mut SqliteConnection,
    user_id: UserId,
    balance: f64,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE users SET balance = ? WHERE id = ?")
        .bind(balance)
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Microsecond clock shared by `created_at` and `deleted_at`, bumped past the
/// newest stamp of either kind. Insertion order and `created_at` order always
/// agree, and a cancellation is stamped after every operation it could affect.
async fn next_stamp(conn: &mut SqliteConnection) -> Result<i64, StoreError> {
    let last: i64 = sqlx::query_scalar(
        r#"
        SELECT MAX(
            (SELECT COALESCE(MAX(created_at), 0) FROM operations),
            (SELECT COALESCE(MAX(deleted_at), 0) FROM operations)
        )
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    let now = Utc::now().timestamp_micros();
    Ok(if last >= now { last + 1 } else { now })
}

/// Operations from the newest trustworthy snapshot up to (not including)
/// `before`, oldest first.
///
/// A snapshot is trustworthy when no older operation of the owner was
/// cancelled after it was taken. The owner's first operation always
/// qualifies, so the search ends at or before the window start.
async fn lead_in_operations(
    conn: &mut SqliteConnection,
    user_id: UserId,
    before: i64,
) -> Result<Vec<Operation>, StoreError> {
    let anchor: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT a.created_at FROM operations a
        WHERE a.user_id = ?
          AND a.created_at <= ?
          AND NOT EXISTS (
              SELECT 1 FROM operations o
              WHERE o.user_id = a.user_id
                AND o.created_at < a.created_at
                AND o.deleted_at > a.created_at
          )
        ORDER BY a.created_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id.to_string())
    .bind(before)
    .fetch_optional(&mut *conn)
    .await?;

    let anchor = anchor.ok_or_else(|| {
        StoreError::Corrupt(format!("no consistent balance snapshot for user {}", user_id))
    })?;

    let rows = sqlx::query(&format!(
        "SELECT {} FROM operations WHERE user_id = ? AND created_at >= ? AND created_at < ? ORDER BY created_at",
        OPERATION_COLUMNS
    ))
    .bind(user_id.to_string())
    .bind(anchor)
    .bind(before)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_operation).collect()
}

async fn recent_operations(
    conn: &mut SqliteConnection,
    user_id: UserId,
    limit: u32,
) -> Result<Vec<Operation>, StoreError> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {columns} FROM (
            SELECT {columns} FROM operations
            WHERE user_id = ?
            ORDER BY created_at DESC
            LIMIT ?
        )
        ORDER BY created_at ASC
        "#,
        columns = OPERATION_COLUMNS
    ))
    .bind(user_id.to_string())
    .bind(i64::from(limit))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_operation).collect()
}

fn row_to_operation(row: &SqliteRow) -> Result<Operation, StoreError> {
    let game_state: String = row.get("game_state");
    let deleted_at: Option<i64> = row.get("deleted_at");

    Ok(Operation {
        id: parse_uuid(row, "id")?,
        user_id: parse_uuid(row, "user_id")?,
        amount: row.get("amount"),
        outcome: Outcome::from_str(&game_state)
            .ok_or_else(|| StoreError::Corrupt(format!("invalid game state: {}", game_state)))?,
        balance_before: row.get("prev_balance"),
        created_at: row.get("created_at"),
        cancelled_at: deleted_at
            .map(|micros| {
                DateTime::<Utc>::from_timestamp_micros(micros)
                    .ok_or_else(|| StoreError::Corrupt(format!("invalid deleted_at: {}", micros)))
            })
            .transpose()?,
    })
}

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, StoreError> {
    let raw: String = row.get(column);
    Uuid::parse_str(&raw).map_err(|_| StoreError::Corrupt(format!("invalid {}: {}", column, raw)))
}
