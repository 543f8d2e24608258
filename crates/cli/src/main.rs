//! bid-replay CLI - chronological auction replay with budget tracking

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use replay_core::{AuctionTime, BidderId, Config};
use replay_engine::{log_summary, replay, BudgetLedger, LossAnalyzer};
use replay_ingestion::{write_replay_outputs, PartnerSource, RecordSource};
use tracing::info;

#[derive(Parser)]
#[command(name = "bid-replay")]
#[command(about = "Replay historical auctions under recalculated bids and depleting budgets")]
struct Cli {
    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay all auctions and write the enriched records and final budgets
    Replay {
        /// Raw auction data CSV
        #[arg(long, value_name = "CSV")]
        raw_data: PathBuf,

        /// Partner info CSV with target CPA and budget
        #[arg(long, value_name = "CSV")]
        partner_info: PathBuf,

        /// Enriched records output
        #[arg(long, default_value = "final_analysis_rerun.csv")]
        output_analysis: PathBuf,

        /// Final budgets output
        #[arg(long, default_value = "final_budgets_rerun.csv")]
        output_budgets: PathBuf,

        /// Timestamp column name, overrides the config file
        #[arg(long)]
        timestamp_col: Option<String>,

        /// JSON config file with column names and output settings
        #[arg(long, env = "BID_REPLAY_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Report the auctions a bidder lost and by how much
    Losses {
        /// Raw auction data CSV
        #[arg(long, value_name = "CSV")]
        raw_data: PathBuf,

        /// Bidder to analyze
        #[arg(long)]
        target: i64,

        /// Only auctions at or after this timestamp
        #[arg(long)]
        since: Option<String>,

        /// Loss report output
        #[arg(long, default_value = "loss_analysis.csv")]
        output: PathBuf,

        /// JSON config file with column names
        #[arg(long, env = "BID_REPLAY_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cli.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Replay {
            raw_data,
            partner_info,
            output_analysis,
            output_budgets,
            timestamp_col,
            config,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(col) = timestamp_col {
                config.columns.timestamp = col;
            }
            config.validate().context("invalid configuration")?;
            run_replay(&config, &raw_data, &partner_info, &output_analysis, &output_budgets)
        }
        Commands::Losses {
            raw_data,
            target,
            since,
            output,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            config.validate().context("invalid configuration")?;
            run_losses(&config, &raw_data, BidderId(target), since.as_deref(), &output)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

// ============================================================================
// Orchestration: Replay
// ============================================================================

fn run_replay(
    config: &Config,
    raw_data: &Path,
    partner_info: &Path,
    output_analysis: &Path,
    output_budgets: &Path,
) -> anyhow::Result<()> {
    let loaded = RecordSource::load(raw_data, config)
        .with_context(|| format!("failed to load auction data from {}", raw_data.display()))?;
    let partners = PartnerSource::load(partner_info, config)
        .with_context(|| format!("failed to load partner info from {}", partner_info.display()))?;

    let ledger = BudgetLedger::from_partners(&partners);
    info!(accounts = ledger.len(), "Initialized budgets");

    let output = replay(&loaded.records, &partners, ledger);
    log_summary(&output, loaded.dropped_no_payload);

    let snapshot = output.ledger.snapshot();
    let written = write_replay_outputs(
        output_analysis,
        output_budgets,
        &loaded.table,
        &output.outcomes,
        &snapshot,
        config,
    )
    .with_context(|| {
        format!(
            "failed to write {} and {}",
            output_analysis.display(),
            output_budgets.display()
        )
    })?;
    info!(path = %output_analysis.display(), rows = written.analysis_rows, "Wrote analysis");
    info!(path = %output_budgets.display(), rows = written.ledger_rows, "Wrote final budgets");

    info!(top = config.output.top_n_budgets, "Partners by remaining budget");
    for entry in output.ledger.top(config.output.top_n_budgets) {
        let spend = output.ledger.spend(entry.partner_id);
        info!(
            partner_id = %entry.partner_id,
            remaining = entry.remaining_budget,
            wins = spend.wins,
            spent = spend.spent,
            "Remaining budget"
        );
    }

    Ok(())
}

// ============================================================================
// Orchestration: Loss analysis
// ============================================================================

fn run_losses(
    config: &Config,
    raw_data: &Path,
    target: BidderId,
    since: Option<&str>,
    output: &Path,
) -> anyhow::Result<()> {
    let mut analyzer = LossAnalyzer::new(target);
    if let Some(text) = since {
        match AuctionTime::parse(text) {
            AuctionTime::Parsed(ts) => analyzer = analyzer.since(ts),
            AuctionTime::Unparsed(_) => bail!("could not parse --since timestamp '{text}'"),
        }
    }

    let loaded = RecordSource::load_all(raw_data, config)
        .with_context(|| format!("failed to load auction data from {}", raw_data.display()))?;
    let report = analyzer.analyze(&loaded.records);

    let written = report
        .write_csv(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(
        path = %output.display(),
        rows = written,
        mean_loss = report.mean_loss(),
        "Wrote loss analysis"
    );

    Ok(())
}
