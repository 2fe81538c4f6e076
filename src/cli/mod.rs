use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{self, ServerConfig};
use crate::application::{LedgerService, Maintenance, MaintenanceConfig, UpdateRequest};
use crate::domain::{DEFAULT_USER_ID, Operation};

/// Wagerbook - wager ledger with retroactive cancellation
#[derive(Parser)]
#[command(name = "wagerbook")]
#[command(about = "Keeps a player's balance from game results and periodically cancels recent operations")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "WAGERBOOK_DATABASE", default_value = "wagerbook.db")]
    pub database: String,

    /// Identity of the ledger user
    #[arg(long, env = "WAGERBOOK_USER_ID", default_value_t = DEFAULT_USER_ID)]
    pub user_id: Uuid,

    /// Maximum number of pooled database connections
    #[arg(long, env = "WAGERBOOK_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "WAGERBOOK_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "WAGERBOOK_LOG_JSON", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and the ledger user
    Init,

    /// Run the HTTP API and the periodic cancellation
    Serve {
        /// Listen address
        #[arg(short, long, env = "WAGERBOOK_LISTEN", default_value = "127.0.0.1:8090")]
        listen: SocketAddr,

        /// Seconds between cancellation passes
        #[arg(long, env = "WAGERBOOK_CANCEL_INTERVAL_SECS", default_value_t = 60)]
        cancel_interval_secs: u64,

        /// Number of recent operations each pass looks at
        #[arg(long, env = "WAGERBOOK_CANCEL_LIMIT", default_value_t = 4)]
        cancel_limit: u32,

        /// Request timeout in seconds
        #[arg(long, env = "WAGERBOOK_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
        request_timeout_secs: u64,
    },

    /// Record a game result
    Record {
        /// Game state: win or lost
        state: String,

        /// Amount won or lost
        amount: f64,

        /// Operation ID (generated when omitted)
        #[arg(long)]
        id: Option<Uuid>,
    },

    /// Run one cancellation pass now
    Cancel {
        /// Number of recent operations to look at
        #[arg(short, long, default_value_t = 4)]
        limit: u32,
    },

    /// Show the current balance
    Balance,

    /// List recent operations
    Operations {
        /// Maximum number of operations to show
        #[arg(short, long)]
        limit: Option<u32>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let service = LedgerService::init(&self.database, self.user_id, self.max_connections)
            .await
            .with_context(|| format!("Failed to open database {}", self.database))?;

        match self.command {
            Commands::Init => {
                println!("Database initialized: {}", self.database);
                println!("User: {}", service.user_id());
            }

            Commands::Serve {
                listen,
                cancel_interval_secs,
                cancel_limit,
                request_timeout_secs,
            } => {
                let server = ServerConfig {
                    listen_addr: listen,
                    request_timeout: Duration::from_secs(request_timeout_secs),
                };
                let maintenance = MaintenanceConfig {
                    interval: Duration::from_secs(cancel_interval_secs.max(1)),
                    limit: cancel_limit,
                };
                return run_server(service, server, maintenance).await;
            }

            Commands::Record { state, amount, id } => {
                let request = UpdateRequest::new(state, amount, id.unwrap_or_else(Uuid::new_v4));
                let recorded = service.record(request).await?;
                println!(
                    "Recorded {} {:.2} ({})",
                    recorded.operation.outcome, recorded.operation.amount, recorded.operation.id
                );
                println!(
                    "Balance: {:.2} -> {:.2}",
                    recorded.operation.balance_before, recorded.balance
                );
            }

            Commands::Cancel { limit } => {
                let outcome = service.cancel_recent(limit).await?;
                if outcome.is_empty() {
                    println!("No operations to cancel.");
                } else {
                    println!("Cancelled {} operation(s):", outcome.cancelled.len());
                    for id in &outcome.cancelled {
                        println!("  {}", id);
                    }
                }
                println!("Balance: {:.2}", outcome.balance);
            }

            Commands::Balance => {
                let user = service.balance().await?;
                println!("{}: {:.2}", user.id, user.balance);
            }

            Commands::Operations { limit, json } => {
                let operations = service.operations(limit).await?;
                print_operations(&operations, json)?;
            }
        }

        service.repository().close().await;
        Ok(())
    }
}

async fn run_server(
    service: LedgerService,
    server: ServerConfig,
    maintenance: MaintenanceConfig,
) -> Result<()> {
    let service = Arc::new(service);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let maintenance = Maintenance::new(maintenance, Arc::clone(&service)).spawn(shutdown_rx);

    let served = api::serve(&server, Arc::clone(&service), shutdown_signal()).await;

    let _ = shutdown_tx.send(true);
    maintenance.await.context("Maintenance task failed")?;
    service.repository().close().await;
    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn print_operations(operations: &[Operation], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(operations)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("No operations found.");
        return Ok(());
    }

    println!(
        "{:<36} {:<6} {:>12} {:>12} STATUS",
        "ID", "STATE", "AMOUNT", "BEFORE"
    );
    println!("{}", "-".repeat(80));

    for op in operations {
        let status = match op.cancelled_at {
            Some(at) => format!("cancelled {}", at.format("%Y-%m-%d %H:%M:%S")),
            None => "active".to_string(),
        };
        println!(
            "{:<36} {:<6} {:>12.2} {:>12.2} {}",
            op.id,
            op.outcome.as_str(),
            op.amount,
            op.balance_before,
            status
        );
    }
    Ok(())
}
