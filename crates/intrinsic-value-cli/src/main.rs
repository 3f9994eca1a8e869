mod commands;
mod input;
mod logging;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::analysis::{MonteCarloArgs, ScenarioArgs, SensitivityArgs, StressArgs};
use commands::valuation::{DcfArgs, ValueArgs, WaccArgs};
use commands::InputArgs;

/// Risk-adjusted intrinsic value estimates from company fundamentals
#[derive(Parser)]
#[command(
    name = "ivx",
    version,
    about = "Risk-adjusted intrinsic value estimates",
    long_about = "Estimates the intrinsic value per share of a company from a JSON map of \
                  fundamentals. Blends a multi-stage DCF with P/E, EV/EBITDA and P/B \
                  cross-checks, and reports sensitivity, Monte Carlo ranges, scenarios \
                  and a risk score alongside."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Valuation config file (.json, .yaml or .yml); defaults apply when absent
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log filter directive (overrides RUST_LOG), e.g. "debug" or "intrinsic_value_core=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Full valuation: DCF, comparables, risk and blended fair value
    Value(ValueArgs),
    /// Classify the company archetype
    Classify(InputArgs),
    /// Risk-adjusted WACC for the company
    Wacc(WaccArgs),
    /// Comprehensive DCF (with sensitivity and confidence intervals)
    Dcf(DcfArgs),
    /// P/E, EV/EBITDA and P/B cross-checks
    Comps(InputArgs),
    /// Risk score across financial, business, market and liquidity categories
    Risk(InputArgs),
    /// One-way sensitivity table or WACC x terminal-growth grid
    Sensitivity(SensitivityArgs),
    /// Monte Carlo confidence intervals for value per share
    MonteCarlo(MonteCarloArgs),
    /// Probability-weighted worst/base/best scenarios
    Scenarios(ScenarioArgs),
    /// Interest-rate stress test
    Stress(StressArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_level.as_deref()) {
        eprintln!("{}: {}", "warning".yellow().bold(), e);
    }

    let result = input::file::read_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Value(args) => commands::valuation::run_value(args, &config),
        Commands::Classify(args) => commands::valuation::run_classify(args, &config),
        Commands::Wacc(args) => commands::valuation::run_wacc(args, &config),
        Commands::Dcf(args) => commands::valuation::run_dcf(args, &config),
        Commands::Comps(args) => commands::valuation::run_comps(args, &config),
        Commands::Risk(args) => commands::risk::run_risk(args, &config),
        Commands::Sensitivity(args) => commands::analysis::run_sensitivity(args, &config),
        Commands::MonteCarlo(args) => commands::analysis::run_monte_carlo(args, &config),
        Commands::Scenarios(args) => commands::analysis::run_scenarios(args, &config),
        Commands::Stress(args) => commands::analysis::run_stress(args, &config),
        Commands::Version => Ok(serde_json::json!({
            "name": "ivx",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Risk-adjusted intrinsic value estimates",
        })),
    });

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
        }
        Err(e) => {
            tracing::debug!(error = %e, "command failed");
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
