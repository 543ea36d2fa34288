use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

use avalytics_indexer::indexer::rpc::connect;
use avalytics_indexer::indexer::shutdown::shutdown_channel;
use avalytics_indexer::indexer::{Indexer, RunSummary};
use avalytics_indexer::metrics::Metrics;
use avalytics_indexer::models::errors::RunFailure;
use avalytics_indexer::storage::{LedgerStats, LedgerStore, SqliteStore};
use avalytics_indexer::utils::load_config;

#[derive(Debug, Parser)]
#[command(name = "avalytics-indexer", version, about = "Avalanche C-Chain block and transaction indexer")]
struct Cli {
    /// YAML config file; missing keys use defaults
    #[arg(long, global = true, default_value = "config.yml")]
    config: PathBuf,

    /// RPC URL, bypassing local/public endpoint selection
    #[arg(long, global = true, env = "AVALYTICS_RPC_URL")]
    rpc_url: Option<String>,

    /// SQLite database path
    #[arg(long, global = true, env = "AVALYTICS_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index the most recent blocks
    Latest {
        #[arg(short = 'n', long, default_value_t = 1000)]
        blocks: u64,
    },
    /// Index an inclusive block range
    Range {
        #[arg(short, long)]
        start: u64,
        #[arg(short, long)]
        end: u64,
    },
    /// Continue from the last checkpoint
    Resume {
        /// Stop at this block instead of the current head
        #[arg(long)]
        to: Option<u64>,
    },
    /// Follow the chain head until interrupted
    Sync {
        /// Seconds between polls once caught up
        #[arg(short, long)]
        interval: Option<u64>,
        /// Continue towards the persisted sync target before polling the head
        #[arg(long)]
        resume: bool,
    },
    /// Print ledger statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load config
    let mut config = match load_config(&cli.config) {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {}", e);
            return Err(anyhow!(e));
        }
    };
    if let Some(url) = cli.rpc_url {
        config.rpc.url = Some(url);
    }
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    if let Command::Sync {
        interval: Some(interval),
        ..
    } = &cli.command
    {
        config.sync.poll_interval_secs = *interval;
    }
    config.validate()?;

    let store = SqliteStore::open(&config.database.path)
        .await
        .with_context(|| format!("failed to open {}", config.database.path.display()))?;

    if let Command::Stats = cli.command {
        let stats = store.stats().await?;
        print_stats(&stats);
        return Ok(());
    }

    // Initialize optional metrics
    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new(config.chain_name.clone())?);
        metrics
            .start_metrics_server(&config.metrics.address, config.metrics.port)
            .await?;
        Some(metrics)
    } else {
        info!("Metrics are disabled");
        None
    };

    let rpc = connect(&config, metrics.clone()).await?;

    // In-flight batches finish; the next batch or cycle does not start
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        if let Ok(()) = signal::ctrl_c().await {
            info!("Received Ctrl+C signal, initiating shutdown...");
            trigger.trigger();
        }
    });

    let mut indexer = Indexer::new(rpc, store, config.indexer.clone()).with_shutdown(shutdown);
    if let Some(metrics) = metrics {
        indexer = indexer.with_metrics(metrics);
    }

    let result = match cli.command {
        Command::Latest { blocks } => indexer.index_latest(blocks).await,
        Command::Range { start, end } => indexer.index_range(start, end).await,
        Command::Resume { to } => indexer.resume(to).await,
        Command::Sync { resume, .. } => {
            indexer
                .scheduler(Duration::from_secs(config.sync.poll_interval_secs))
                .resuming(resume)
                .run()
                .await
        }
        // Handled before connecting
        Command::Stats => return Ok(()),
    };

    indexer.store().close().await;

    match result {
        Ok(summary) => {
            print_summary(&summary);
            Ok(())
        }
        Err(RunFailure { summary, source }) => {
            print_summary(&summary);
            Err(anyhow::Error::new(source).context(format!(
                "indexing failed; last good checkpoint: {}",
                checkpoint_label(summary.checkpoint)
            )))
        }
    }
}

fn checkpoint_label(checkpoint: Option<u64>) -> String {
    checkpoint.map_or_else(|| "none".to_string(), |block| block.to_string())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("  Blocks indexed:       {}", summary.blocks_indexed);
    println!("  Transactions written: {}", summary.transactions_written);
    if summary.skipped_blocks > 0 {
        println!("  Skipped blocks:       {}", summary.skipped_blocks);
    }
    if let Some(rate) = summary.blocks_per_second() {
        println!("  Blocks per second:    {rate:.1}");
    }
    println!("  Checkpoint:           {}", checkpoint_label(summary.checkpoint));
    if summary.interrupted {
        println!("  Stopped early on shutdown request");
    }
    println!();
}

fn print_stats(stats: &LedgerStats) {
    let range = match (stats.lowest_block, stats.highest_block) {
        (Some(low), Some(high)) => format!("{low} - {high}"),
        _ => "N/A".to_string(),
    };
    let average = stats
        .average_transactions_per_block()
        .map_or_else(|| "N/A".to_string(), |avg| format!("{avg:.2}"));

    println!();
    println!("  Blocks:          {}", stats.blocks);
    println!("  Transactions:    {}", stats.transactions);
    println!("  Tx per block:    {average}");
    println!("  Event logs:      {}", stats.logs);
    println!("  Wallets:         {}", stats.wallets);
    println!("  Skipped blocks:  {}", stats.skipped_blocks);
    println!("  Block range:     {range}");
    println!(
        "  Checkpoint:      {}",
        checkpoint_label(stats.checkpoint.map(|c| c.last_block))
    );
    if let Some(target) = stats.sync_target {
        println!("  Sync target:     {target}");
    }
    println!();
}
