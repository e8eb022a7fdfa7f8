//! Deposit Relayer - fee-gated deposits reconciled with the game backend
//!
//! Submits deposit transactions for every configured wallet once the network
//! fee is acceptable, reports each accepted hash to the backend, and renews
//! the backend session when reconciliation keeps failing. Also drives the
//! backend's grow and draw reward actions for the stored accounts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::utils::{format_ether, parse_ether};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

mod auth;
mod backend;
mod chain;
mod config;
mod coordination;
mod error;
mod metrics;
mod rewards;
mod tx;
mod wallet;

use auth::{CredentialStore, SecureTokenRefresher, SessionStore, TokenRefresher};
use backend::{BackendApi, BackendSyncClient, GraphqlBackend, SyncOutcome};
use chain::ChainProvider;
use config::Settings;
use coordination::WalletBatchOrchestrator;
use metrics::MetricsServer;
use rewards::{DrawRunner, GrowRunner};
use tx::{FeeGate, TransactionSubmitter};

#[derive(Debug, Parser)]
#[command(name = "deposit-relayer", version, about)]
struct Cli {
    /// Configuration file (defaults to config/default.toml)
    #[arg(long, global = true, env = "RELAYER_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "RELAYER_LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit deposits for every wallet and sync them with the backend
    Deposit {
        /// Transactions per wallet
        #[arg(long)]
        count: Option<u32>,
        /// Deposit amount in ETH
        #[arg(long)]
        amount: Option<String>,
    },
    /// Spend grow actions for every stored account, in rounds
    Grow,
    /// Spend garden reward draws for the configured account
    Draw,
    /// Show the backend display name of every stored account
    Whoami,
}

/// Backend collaborators shared by every command
struct Backend {
    store: Arc<CredentialStore>,
    api: Arc<dyn BackendApi>,
    refresher: Arc<dyn TokenRefresher>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.json_logs);

    info!("Starting Deposit Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load(cli.config.as_deref())?;
    info!(
        "Loaded configuration for chain {} ({})",
        settings.chain.name, settings.chain.chain_id
    );

    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let backend = connect_backend(&settings)?;

    let result = match cli.command {
        Command::Deposit { count, amount } => {
            run_deposit(&settings, &backend, count, amount).await
        }
        Command::Grow => run_grow(&settings, &backend).await,
        Command::Draw => run_draw(&settings, &backend).await,
        Command::Whoami => run_whoami(&backend).await,
    };

    if let Some(h) = metrics_handle {
        h.abort();
    }

    result
}

fn connect_backend(settings: &Settings) -> Result<Backend> {
    let store = Arc::new(
        CredentialStore::load(&settings.credentials.path)
            .context("Failed to load account credentials")?,
    );
    let api: Arc<dyn BackendApi> = Arc::new(GraphqlBackend::new(&settings.backend)?);
    let refresher: Arc<dyn TokenRefresher> = Arc::new(SecureTokenRefresher::new(
        settings.refresh_endpoint(),
        Duration::from_secs(settings.backend.request_timeout_secs),
    )?);

    Ok(Backend {
        store,
        api,
        refresher,
    })
}

async fn run_deposit(
    settings: &Settings,
    backend: &Backend,
    count: Option<u32>,
    amount: Option<String>,
) -> Result<()> {
    let relayer = &settings.relayer;
    let chain_id = settings.chain.chain_id;

    let count = count.unwrap_or(relayer.tx_per_wallet);
    if count == 0 {
        anyhow::bail!("Invalid number of transactions");
    }
    let amount = match amount {
        Some(eth) => parse_ether(&eth).with_context(|| format!("Invalid amount: {}", eth))?,
        None => relayer.deposit_amount_wei()?,
    };

    let wallets = wallet::load_wallets(&settings.wallet, chain_id)?;
    let mut session = backend
        .store
        .session(settings.credentials.account.as_deref())?;

    let provider = Arc::new(ChainProvider::new(
        settings.chain.clone(),
        relayer.confirmations,
    )?);
    provider.verify_chain().await?;

    let fee_gate = FeeGate::new(relayer.fee_threshold_wei()?, relayer.fee_poll_interval());
    info!("Fee ceiling: {} ETH", format_ether(fee_gate.threshold_wei()));
    let submitter = TransactionSubmitter::new(provider, fee_gate);

    let store: Arc<dyn SessionStore> = backend.store.clone();
    let sync_client = BackendSyncClient::new(
        backend.api.clone(),
        backend.refresher.clone(),
        store,
        relayer.sync_max_attempts,
        relayer.sync_retry_delay(),
    );

    let orchestrator = WalletBatchOrchestrator::new(
        submitter,
        sync_client,
        settings.chain.contract()?,
        relayer.submit_retry_delay(),
    );

    info!(
        "Depositing {} wei x {} for {} wallet(s)",
        amount,
        count,
        wallets.len()
    );
    let reports = orchestrator.run(&wallets, &mut session, count, amount).await;

    let synced = reports
        .iter()
        .filter(|r| r.record.sync == Some(SyncOutcome::Synced))
        .count();
    info!(
        "{} transaction(s) accepted, {} synced with backend",
        reports.len(),
        synced
    );
    if synced < reports.len() {
        warn!("{} transaction(s) were not synced", reports.len() - synced);
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

async fn run_grow(settings: &Settings, backend: &Backend) -> Result<()> {
    let mut sessions = backend.store.sessions()?;
    let store: Arc<dyn SessionStore> = backend.store.clone();

    let runner = GrowRunner::new(
        backend.api.clone(),
        backend.refresher.clone(),
        store,
        settings.rewards.grow_with_all,
        Duration::from_secs(settings.rewards.grow_round_interval_secs),
    );

    tokio::select! {
        _ = runner.run_forever(&mut sessions) => {},
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping grow rounds");
        }
    }

    Ok(())
}

async fn run_draw(settings: &Settings, backend: &Backend) -> Result<()> {
    let session = backend
        .store
        .session(settings.credentials.account.as_deref())?;

    let runner = DrawRunner::new(backend.api.clone(), settings.rewards.draw_batch_limit);
    let summary = runner.run(&session).await?;

    info!(
        "Drew {} card(s) in {} batch(es)",
        summary.cards, summary.batches
    );
    Ok(())
}

async fn run_whoami(backend: &Backend) -> Result<()> {
    for session in backend.store.sessions()? {
        match backend.api.current_user_name(&session).await {
            Ok(name) => {
                backend.store.remember_user_name(session.key(), &name)?;
                println!("{}: {}", session.key(), name);
            }
            Err(e) => {
                let known = backend.store.user_name(session.key());
                warn!("{}: could not fetch user: {}", session.key(), e);
                println!(
                    "{}: {} (unverified)",
                    session.key(),
                    known.as_deref().unwrap_or("unknown")
                );
            }
        }
    }
    Ok(())
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,deposit_relayer=debug,hyper=warn,reqwest=warn")
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
