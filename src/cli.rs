//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_audit_adapter::CsvAuditAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::momentum_predictor::{MomentumConfig, MomentumPredictor};
use crate::adapters::paper_broker::{PaperBroker, PaperBrokerConfig};
use crate::adapters::tracing_audit_adapter::TracingAuditAdapter;
use crate::domain::config_validation::{
    load_engine_config, parse_or, require_non_negative, require_period, require_positive,
};
use crate::domain::engine::{DecisionEngine, EngineConfig, FeedEvent, RunSummary};
use crate::domain::error::EngineError;
use crate::domain::ohlcv::{Bar, Timeframe};
use crate::domain::portfolio::PortfolioState;
use crate::ports::audit_port::AuditPort;
use crate::ports::config_port::ConfigPort;

const FEED_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "tradepilot", about = "Signal and risk decision engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a CSV bar file through the engine against a paper broker
    Replay {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        bars: PathBuf,
        /// Directory for cycles.csv and trades.csv
        #[arg(short, long)]
        audit: Option<PathBuf>,
        /// Instrument for rows without an instrument column
        #[arg(long)]
        instrument: Option<String>,
        /// Timeframe for rows without a timeframe column
        #[arg(long)]
        timeframe: Option<String>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Replay {
            config,
            bars,
            audit,
            instrument,
            timeframe,
        } => run_replay(
            &config,
            &bars,
            audit.as_deref(),
            instrument.as_deref(),
            timeframe.as_deref(),
        ),
        Command::Validate { config } => run_validate(&config),
    }
}

fn fail(err: EngineError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(fail)
}

/// `RUST_LOG` wins over `[logging] level`. `[logging] format = json` switches
/// to JSON lines. Logs go to stderr so stdout stays the report.
pub fn init_logging(config: &dyn ConfigPort) {
    let level = config
        .get_string("logging", "level")
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json = config
        .get_string("logging", "format")
        .is_some_and(|f| f.trim().eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // A subscriber may already be installed when called more than once in-process.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

pub fn load_momentum_config(config: &dyn ConfigPort) -> Result<MomentumConfig, EngineError> {
    let d = MomentumConfig::default();
    let lookback: usize = parse_or(config, "prediction", "lookback", d.lookback)?;
    let sensitivity: f64 = parse_or(config, "prediction", "sensitivity", d.sensitivity)?;
    Ok(MomentumConfig {
        lookback: require_period("prediction", "lookback", lookback)?,
        sensitivity: require_positive("prediction", "sensitivity", sensitivity)?,
    })
}

/// Paper account settings. Volume limits come from the `[instrument.*]`
/// sections already loaded into the risk config.
pub fn load_paper_config(
    config: &dyn ConfigPort,
    engine: &EngineConfig,
) -> Result<PaperBrokerConfig, EngineError> {
    let d = PaperBrokerConfig::default();
    let balance: f64 = parse_or(config, "paper", "balance", d.balance)?;
    let spread: f64 = parse_or(config, "paper", "spread", d.spread)?;
    Ok(PaperBrokerConfig {
        balance: require_positive("paper", "balance", balance)?,
        spread: require_non_negative("paper", "spread", spread)?,
        limits: engine
            .risk
            .instruments
            .iter()
            .map(|(name, spec)| (name.clone(), spec.limits.clone()))
            .collect(),
    })
}

fn resolve_timeframe(
    cli_value: Option<&str>,
    engine: &EngineConfig,
) -> Result<Timeframe, EngineError> {
    match cli_value {
        Some(raw) => raw.parse().map_err(|e: String| EngineError::ConfigInvalid {
            section: "cli".to_string(),
            key: "timeframe".to_string(),
            reason: e,
        }),
        None => Ok(engine.timeframe),
    }
}

fn resolve_instrument(cli_value: Option<&str>, engine: &EngineConfig) -> String {
    cli_value
        .map(|s| s.to_uppercase())
        .or_else(|| engine.risk.allowed.iter().next().cloned())
        .unwrap_or_default()
}

fn run_replay(
    config_path: &Path,
    bars_path: &Path,
    audit_dir: Option<&Path>,
    instrument: Option<&str>,
    timeframe: Option<&str>,
) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    init_logging(&adapter);

    let engine_config = match load_engine_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    let momentum = match load_momentum_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    let paper = match load_paper_config(&adapter, &engine_config) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    let timeframe = match resolve_timeframe(timeframe, &engine_config) {
        Ok(t) => t,
        Err(e) => return fail(e),
    };
    let instrument = resolve_instrument(instrument, &engine_config);

    let bars = match CsvAdapter::new(instrument, timeframe).read_file(bars_path) {
        Ok(b) => b,
        Err(e) => return fail(e),
    };
    info!(path = %bars_path.display(), bars = bars.len(), "bar file loaded");

    let audit: Arc<dyn AuditPort> = match audit_dir {
        Some(dir) => match CsvAuditAdapter::create(dir) {
            Ok(a) => Arc::new(a),
            Err(e) => return fail(e),
        },
        None => Arc::new(TracingAuditAdapter),
    };
    let broker = Arc::new(PaperBroker::new(paper));
    let predictor = Arc::new(MomentumPredictor::new(momentum));
    let engine = DecisionEngine::new(engine_config, broker.clone(), predictor, audit);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return fail(EngineError::Io(e)),
    };

    let result = runtime.block_on(replay(&engine, bars));
    match result {
        Ok(summary) => {
            let ledger = runtime.block_on(engine.ledger_snapshot());
            let state = ledger.mark_to_market(&broker.marks());
            print_summary(&summary, &state, broker.balance());
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

async fn replay(engine: &DecisionEngine, bars: Vec<Bar>) -> Result<RunSummary, EngineError> {
    let (feed_tx, feed_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        for bar in bars {
            if feed_tx.send(FeedEvent::Bar(bar)).await.is_err() {
                break;
            }
        }
    });
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current cycle");
            let _ = shutdown_tx.send(true);
        }
    });

    engine.run(feed_rx, shutdown_rx).await
}

fn print_summary(summary: &RunSummary, state: &PortfolioState, balance: f64) {
    println!("Replay complete");
    println!("  cycles:          {}", summary.cycles);
    println!("  skipped:         {}", summary.skipped);
    println!("  opened:          {}", summary.opened);
    println!("  closed:          {}", summary.closed);
    println!("  rejected:        {}", summary.rejected);
    println!("  still open:      {}", state.active_count());
    println!("  allocated risk:  {:.2}", state.allocated_risk);
    println!("  realized P/L:    {:.2}", state.realized_pnl);
    println!("  unrealized P/L:  {:.2}", state.unrealized_pnl);
    println!("  paper equity:    {:.2}", state.equity(balance));
    for (instrument, volume) in &state.exposure {
        println!("  exposure {:<8} {:+.2}", instrument, volume);
    }
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let engine = match load_engine_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    if let Err(e) = load_momentum_config(&adapter) {
        return fail(e);
    }
    if let Err(e) = load_paper_config(&adapter, &engine) {
        return fail(e);
    }

    let allowed: Vec<&str> = engine.risk.allowed.iter().map(String::as_str).collect();
    eprintln!("  instruments:     {}", allowed.join(", "));
    eprintln!("  timeframe:       {}", engine.timeframe);
    eprintln!("  window:          {} bars", engine.window_capacity);
    eprintln!("  conflict policy: {:?}", engine.signal.conflict_policy);
    eprintln!(
        "  risk:            {:.2}% per trade, {:.2}% aggregate, {} positions max",
        engine.risk.risk_per_trade * 100.0,
        engine.risk.max_aggregate_risk * 100.0,
        engine.risk.max_positions
    );
    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}
