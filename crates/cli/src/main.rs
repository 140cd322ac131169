mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use spotlink_brokers_binance::{BinanceClient, Credentials, Network};
use spotlink_core::ExchangeGateway;
use spotlink_engine::{
    resolve_top_pairs, BalanceDeltaMode, LatencySampler, RankingMode, Supervisor,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "spotlink")]
#[command(about = "Binance spot account and market monitor: live balances, top-pair trade streams, REST latency")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Path to a TOML config file
    #[arg(short, long, env = "SPOTLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Network for balances, session token and latency probes (testnet, mainnet)
    #[arg(long, env = "SPOTLINK_ACCOUNT_NETWORK")]
    account_network: Option<Network>,

    /// Network for pair ranking and trade streams (testnet, mainnet)
    #[arg(long, env = "SPOTLINK_MARKET_NETWORK")]
    market_network: Option<Network>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(clap::Args)]
struct RankingArgs {
    /// Number of pairs to select
    #[arg(long)]
    top_n: Option<usize>,

    /// Currency volumes are converted into (e.g. "USDT")
    #[arg(long)]
    reference: Option<String>,

    /// Ranking method (quote-volume, relative)
    #[arg(long)]
    ranking: Option<RankingMode>,
}

#[derive(Subcommand)]
enum Commands {
    /// Track balances, stream top-pair trades and sample latency until Ctrl-C
    Run {
        /// How balanceUpdate deltas are applied (ignore, add, subtract)
        #[arg(long)]
        delta_mode: Option<BalanceDeltaMode>,

        #[command(flatten)]
        rank: RankingArgs,
    },

    /// Print the current non-zero balances once
    Balances,

    /// Print the pairs with the highest 24h volume
    TopPairs {
        #[command(flatten)]
        rank: RankingArgs,
    },

    /// Probe REST latency
    Ping {
        /// Number of probes
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_format);

    exit_code(execute(cli).await)
}

/// Log a fatal error once and map it to a non-zero exit status.
fn exit_code(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match format {
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_current_span(true)
            .init(),
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    if let Some(network) = cli.account_network {
        config.account_network = network;
    }
    if let Some(network) = cli.market_network {
        config.market_network = network;
    }

    match cli.command {
        Commands::Run { delta_mode, rank } => {
            if let Some(mode) = delta_mode {
                config.delta_mode = mode;
            }
            apply_ranking_args(&mut config, rank);
            run(config).await
        }
        Commands::Balances => print_balances(&config).await,
        Commands::TopPairs { rank } => {
            apply_ranking_args(&mut config, rank);
            print_top_pairs(&config).await
        }
        Commands::Ping { count } => ping(&config, count).await,
    }
}

fn apply_ranking_args(config: &mut AppConfig, args: RankingArgs) {
    if let Some(n) = args.top_n {
        config.ranking.top_n = n;
    }
    if let Some(reference) = args.reference {
        config.ranking.reference_currency = reference.to_uppercase();
    }
    if let Some(ranking) = args.ranking {
        config.ranking.ranking = ranking;
    }
}

fn account_client(config: &AppConfig) -> Result<BinanceClient> {
    let credentials = Credentials::from_env(config.account_network).with_context(|| {
        format!("Missing credentials for the {} account", config.account_network)
    })?;
    Ok(BinanceClient::new(config.account_endpoints(), Some(credentials))?)
}

fn market_client(config: &AppConfig) -> Result<BinanceClient> {
    Ok(BinanceClient::public(config.market_endpoints())?)
}

async fn run(config: AppConfig) -> Result<()> {
    tracing::info!(
        account = %config.account_network,
        market = %config.market_network,
        delta_mode = %config.delta_mode,
        ranking = %config.ranking.ranking,
        top_n = config.ranking.top_n,
        "Starting spotlink"
    );

    let supervisor = Supervisor::new(
        config.supervisor_config(),
        Arc::new(account_client(&config)?),
        Arc::new(market_client(&config)?),
    );
    supervisor.run(ctrl_c()).await?;
    Ok(())
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
}

async fn print_balances(config: &AppConfig) -> Result<()> {
    let client = account_client(config)?;
    let balances = client.fetch_account_snapshot().await?;

    println!("Non-zero spot balances ({}):", config.account_network);
    if balances.is_empty() {
        println!("  (none)");
    }
    for entry in balances.iter() {
        println!("  {:<10} free {:>24}  locked {:>24}", entry.asset, entry.free, entry.locked);
    }
    Ok(())
}

async fn print_top_pairs(config: &AppConfig) -> Result<()> {
    let client = market_client(config)?;
    let pairs = resolve_top_pairs(&client, &config.ranking).await?;

    println!(
        "Top {} pairs by 24h volume ({}, {}):",
        config.ranking.top_n, config.ranking.ranking, config.market_network
    );
    for (i, pair) in pairs.iter().enumerate() {
        match config.ranking.ranking {
            RankingMode::QuoteVolume => println!(
                "  {:>2}. {:<14} {:>28} {}",
                i + 1,
                pair.symbol,
                pair.quote_volume_in_reference.round_dp(2),
                config.ranking.reference_currency
            ),
            RankingMode::Relative => println!("  {:>2}. {:<14} {:>28}", i + 1, pair.symbol, pair.volume),
        }
    }
    Ok(())
}

async fn ping(config: &AppConfig, count: u32) -> Result<()> {
    // Probes go to the account side's REST endpoint, as in `run`.
    let client = BinanceClient::public(config.account_endpoints())?;
    let mut sampler = LatencySampler::new(Arc::new(client), &config.latency);

    for _ in 0..count.max(1) {
        sampler.sample_once().await?;
    }
    let stats = sampler.stats();
    if let (Some(mean), Some(min), Some(max)) = (stats.mean_ns(), stats.min_ns, stats.max_ns) {
        println!(
            "{} probes to {}: mean {} ns, min {} ns, max {} ns",
            stats.count, config.account_network, mean, min, max
        );
    }
    Ok(())
}
