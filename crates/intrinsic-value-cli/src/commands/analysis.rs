use clap::Args;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Instant;

use intrinsic_value_core::monte_carlo::simulation;
use intrinsic_value_core::scenarios::scenario::{
    self, standard_scenarios, ScenarioDefinition, DEFAULT_RATE_SHOCKS_BP,
};
use intrinsic_value_core::scenarios::sensitivity::{
    evaluate_sensitivity_grid, perform_sensitivity_analysis, SensitivityGridInput, SensitivityVariable,
};
use intrinsic_value_core::valuation::dcf::DcfContext;
use intrinsic_value_core::{with_metadata, ValuationConfig};

use super::{Company, InputArgs};
use crate::input;

/// Arguments for sensitivity analysis
#[derive(Args)]
pub struct SensitivityArgs {
    #[command(flatten)]
    pub source: InputArgs,

    /// Base discount rate (computed from the company profile when omitted)
    #[arg(long)]
    pub wacc: Option<Decimal>,

    /// Evaluate a WACC x terminal-growth grid instead of the one-way table
    #[arg(long)]
    pub grid: bool,

    /// Grid step for WACC
    #[arg(long, default_value = "0.01")]
    pub wacc_step: Decimal,

    /// Grid step for terminal growth
    #[arg(long, default_value = "0.005")]
    pub growth_step: Decimal,

    /// Steps either side of the base value on each grid axis
    #[arg(long, default_value = "2")]
    pub steps: u32,
}

/// Arguments for Monte Carlo simulation
#[derive(Args)]
pub struct MonteCarloArgs {
    #[command(flatten)]
    pub source: InputArgs,

    /// Base discount rate (computed from the company profile when omitted)
    #[arg(long)]
    pub wacc: Option<Decimal>,

    /// Number of trials (capped by the configured performance limit)
    #[arg(long)]
    pub simulations: Option<u32>,

    /// Random seed for reproducible draws
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Arguments for scenario analysis
#[derive(Args)]
pub struct ScenarioArgs {
    #[command(flatten)]
    pub source: InputArgs,

    /// JSON file with a list of scenario definitions (worst/base/best when omitted)
    #[arg(long)]
    pub definitions: Option<String>,
}

/// Arguments for the interest-rate stress test
#[derive(Args)]
pub struct StressArgs {
    #[command(flatten)]
    pub source: InputArgs,

    /// Rate shocks in basis points, comma separated
    #[arg(long, value_delimiter = ',')]
    pub shocks_bp: Vec<u32>,
}

pub fn run_sensitivity(args: SensitivityArgs, config: &ValuationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let company = Company::load(&args.source, config)?;
    let wacc = company.discount_rate(args.wacc, config);
    let ctx = DcfContext::new();

    if args.grid {
        let grid = SensitivityGridInput {
            wacc: SensitivityVariable::around("wacc", wacc, args.wacc_step, args.steps),
            terminal_growth: SensitivityVariable::around(
                "terminal_growth",
                company.inputs.terminal_growth_rate,
                args.growth_step,
                args.steps,
            ),
        };
        let output = evaluate_sensitivity_grid(&ctx, &company.inputs, &grid, config)?;
        return Ok(serde_json::to_value(output)?);
    }

    let start = Instant::now();
    let years = config.dcf.projection_years;
    let table = perform_sensitivity_analysis(&ctx, &company.inputs, wacc, years, config)?;
    let warnings = table
        .fallbacks
        .iter()
        .map(|label| format!("{label}: calculation failed, base value reported"))
        .collect();
    let output = with_metadata(
        "One-way DCF sensitivity on WACC and revenue growth",
        &json!({
            "wacc": wacc.to_string(),
            "variation": config.sensitivity.variation.to_string(),
            "projection_years": years,
        }),
        warnings,
        start.elapsed().as_micros() as u64,
        table,
    );
    Ok(serde_json::to_value(output)?)
}

pub fn run_monte_carlo(args: MonteCarloArgs, config: &ValuationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let company = Company::load(&args.source, config)?;
    let wacc = company.discount_rate(args.wacc, config);

    let mut config = config.clone();
    if let Some(n) = args.simulations {
        config.monte_carlo.simulations = n;
    }
    if args.seed.is_some() {
        config.monte_carlo.seed = args.seed;
    }

    let output = simulation::run_monte_carlo(&company.inputs, wacc, &config)?;
    Ok(serde_json::to_value(output)?)
}

pub fn run_scenarios(args: ScenarioArgs, config: &ValuationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let company = Company::load(&args.source, config)?;
    let definitions: Vec<ScenarioDefinition> = match args.definitions {
        Some(ref path) => input::file::read_json(path)?,
        None => standard_scenarios(),
    };

    let ctx = DcfContext::new();
    let output = scenario::run_scenarios(&ctx, &company.inputs, &company.wacc_input(), &definitions, config)?;
    Ok(serde_json::to_value(output)?)
}

pub fn run_stress(args: StressArgs, config: &ValuationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let company = Company::load(&args.source, config)?;
    let shocks: &[u32] = if args.shocks_bp.is_empty() {
        &DEFAULT_RATE_SHOCKS_BP
    } else {
        &args.shocks_bp
    };

    let ctx = DcfContext::new();
    let output = scenario::stress_test_interest_rates(&ctx, &company.inputs, &company.wacc_input(), shocks, config)?;
    Ok(serde_json::to_value(output)?)
}
