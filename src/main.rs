mod chain;
mod config;
mod error;
mod goals;
mod indexer;
mod ledger;
mod models;
mod pagination;
mod report;
mod timestamps;

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;

use crate::chain::EthersChain;
use crate::indexer::{FetchPolicy, RangeSettings};

/// Network retry budget per RPC call.
const RPC_RETRIES: usize = 4;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// EVM RPC HTTP URL. If not provided, read from RPC_URL env.
    #[arg(short, long)]
    rpc: Option<String>,

    /// Directory the goal CSV reports are written into
    #[arg(short, long, default_value = "reports")]
    out_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay transfer events into timestamped ownership snapshots
    Replay {
        /// First block of the scan
        #[arg(long, default_value_t = 0)]
        from_block: u64,

        /// Last block of the scan (default: current head)
        #[arg(long)]
        to_block: Option<u64>,

        /// Blocks per eth_getLogs window
        #[arg(long, default_value_t = 2_000)]
        window_size: u64,

        /// Fixed pause between windows, in milliseconds
        #[arg(long, default_value_t = 250)]
        delay_ms: u64,

        /// Whether a failed window aborts the run or is skipped
        #[arg(long, value_enum, default_value = "strict")]
        policy: FetchPolicy,
    },
    /// Sweep current balances instead of replaying history (no timestamps)
    Sweep {
        /// First block of the candidate-wallet scan
        #[arg(long, default_value_t = 0)]
        from_block: u64,

        /// Last block of the candidate-wallet scan (default: current head)
        #[arg(long)]
        to_block: Option<u64>,

        /// Blocks per eth_getLogs window during the candidate scan
        #[arg(long, default_value_t = 2_000)]
        window_size: u64,

        /// Fixed pause between windows and between balance batches, in ms
        #[arg(long, default_value_t = 250)]
        delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    let rpc_url = cli
        .rpc
        .or_else(|| env::var("RPC_URL").ok())
        .context("Provide RPC HTTP URL via --rpc or RPC_URL env var")?;
    let chain = EthersChain::connect(&rpc_url, RPC_RETRIES)?;

    let catalogue = config::catalogue()?;
    let goal_table = config::goals();

    let (snapshots, with_timestamps) = match &cli.command {
        Commands::Replay {
            from_block,
            to_block,
            window_size,
            delay_ms,
            policy,
        } => {
            let range = RangeSettings {
                from_block: *from_block,
                to_block: resolve_to_block(&chain, *to_block).await?,
                window_size: *window_size,
                delay_ms: *delay_ms,
            };
            println!(
                "Replaying transfer events in blocks {}-{} ({} collections)...",
                range.from_block,
                range.to_block,
                catalogue.len()
            );
            let snapshots = indexer::run_replay(&chain, &catalogue, range, *policy).await?;
            (snapshots, true)
        }

        Commands::Sweep {
            from_block,
            to_block,
            window_size,
            delay_ms,
        } => {
            let range = RangeSettings {
                from_block: *from_block,
                to_block: resolve_to_block(&chain, *to_block).await?,
                window_size: *window_size,
                delay_ms: *delay_ms,
            };
            println!(
                "Scanning blocks {}-{} for candidate wallets...",
                range.from_block, range.to_block
            );
            let universe = indexer::candidate_wallets(&chain, &catalogue, range).await?;
            println!("Sweeping balances for {} candidate wallets...", universe.len());
            let snapshots = indexer::run_sweep(&chain, &catalogue, &universe, *delay_ms).await?;
            (snapshots, false)
        }
    };

    let results = goals::classify(&snapshots, &goal_table, &catalogue)?;
    let written = report::write_reports(&cli.out_dir, &results, with_timestamps)?;

    for (result, path) in results.iter().zip(&written) {
        println!(
            "Goal {} ({}): {} qualifying wallets -> {}",
            result.goal_seq,
            result.goal_id,
            result.rows.len(),
            path.display()
        );
    }

    Ok(())
}

async fn resolve_to_block(chain: &EthersChain, requested: Option<u64>) -> Result<u64> {
    match requested {
        Some(block) => Ok(block),
        None => chain
            .latest_block()
            .await
            .context("failed to resolve the current head block"),
    }
}
