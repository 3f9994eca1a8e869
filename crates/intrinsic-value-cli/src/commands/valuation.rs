use clap::Args;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Instant;

use intrinsic_value_core::valuation::comps::{current_multiples, recommended_methods, run_comparables, PeerMultiples};
use intrinsic_value_core::valuation::dcf::{calculate_comprehensive_dcf, calculate_core_dcf, DcfContext};
use intrinsic_value_core::valuation::engine::{value_company, ValuationOptions};
use intrinsic_value_core::valuation::wacc::calculate_wacc;
use intrinsic_value_core::{with_metadata, ValuationConfig};

use super::{read_fundamentals, Company, InputArgs};

/// Arguments for the full valuation
#[derive(Args)]
pub struct ValueArgs {
    #[command(flatten)]
    pub source: InputArgs,

    /// Market price per share (overrides `current_price` in the fundamentals)
    #[arg(long)]
    pub price: Option<Decimal>,

    /// Skip the worst/base/best scenario set
    #[arg(long)]
    pub no_scenarios: bool,

    /// Skip the interest-rate stress test
    #[arg(long)]
    pub no_stress: bool,

    /// Peer P/E to value the company at
    #[arg(long)]
    pub peer_pe: Option<Decimal>,

    /// Peer EV/EBITDA to value the company at
    #[arg(long)]
    pub peer_ev_ebitda: Option<Decimal>,
}

/// Arguments for WACC calculation
#[derive(Args)]
#[command(allow_hyphen_values = true)]
pub struct WaccArgs {
    #[command(flatten)]
    pub source: InputArgs,

    /// Levered beta (overrides the fundamentals)
    #[arg(long)]
    pub beta: Option<Decimal>,

    /// Pre-tax cost of debt (defaults to risk-free rate plus credit spread)
    #[arg(long)]
    pub cost_of_debt: Option<Decimal>,

    /// Country risk premium (overrides the config)
    #[arg(long)]
    pub country_risk: Option<Decimal>,

    /// Liquidity premium added to the cost of equity
    #[arg(long)]
    pub liquidity_premium: Option<Decimal>,
}

/// Arguments for DCF valuation
#[derive(Args)]
pub struct DcfArgs {
    #[command(flatten)]
    pub source: InputArgs,

    /// Discount rate (computed from the company profile when omitted)
    #[arg(long)]
    pub wacc: Option<Decimal>,

    /// Core DCF only: no sensitivity table, no confidence intervals, no fallback
    #[arg(long)]
    pub core: bool,

    /// Projection years for the core DCF (config value when omitted)
    #[arg(long)]
    pub years: Option<u32>,
}

pub fn run_value(args: ValueArgs, config: &ValuationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let fundamentals = read_fundamentals(&args.source)?;
    let options = ValuationOptions {
        include_scenarios: !args.no_scenarios,
        include_stress_test: !args.no_stress,
        current_price: args.price,
        peer_multiples: Some(PeerMultiples {
            pe: args.peer_pe,
            ev_ebitda: args.peer_ev_ebitda,
        }),
    };
    let output = value_company(&fundamentals, &options, config)?;
    Ok(serde_json::to_value(output)?)
}

pub fn run_classify(args: InputArgs, config: &ValuationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let company = Company::load(&args, config)?;
    let company_type = company.profile.company_type;

    let output = with_metadata(
        "Rule-based company classification (sector keywords and ratio ranges)",
        &company.snapshot,
        company.inputs.warnings().to_vec(),
        start.elapsed().as_micros() as u64,
        json!({
            "company_type": company_type,
            "confidence": company.classification.confidence,
            "scores": company.classification.scores,
            "recommended_methods": recommended_methods(company_type),
            "profile": company.profile,
        }),
    );
    Ok(serde_json::to_value(output)?)
}

pub fn run_wacc(args: WaccArgs, config: &ValuationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let company = Company::load(&args.source, config)?;
    let mut input = company.wacc_input();
    if let Some(beta) = args.beta {
        input.beta = beta;
    }
    if args.cost_of_debt.is_some() {
        input.cost_of_debt = args.cost_of_debt;
    }
    if args.country_risk.is_some() {
        input.country_risk_premium = args.country_risk;
    }
    if let Some(premium) = args.liquidity_premium {
        input.liquidity_premium = premium;
    }

    let output = calculate_wacc(&input, config);
    Ok(serde_json::to_value(output)?)
}

pub fn run_dcf(args: DcfArgs, config: &ValuationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let company = Company::load(&args.source, config)?;
    let wacc = company.discount_rate(args.wacc, config);
    let ctx = DcfContext::new();

    if args.core {
        let start = Instant::now();
        let years = args.years.unwrap_or(config.dcf.projection_years);
        let result = calculate_core_dcf(&ctx, &company.inputs, wacc, years, &config.dcf)?;
        let output = with_metadata(
            "Multi-stage FCFF DCF with Gordon growth terminal value",
            &json!({
                "wacc": wacc.to_string(),
                "projection_years": years,
                "terminal_growth_rate": company.inputs.terminal_growth_rate.to_string(),
            }),
            company.inputs.warnings().to_vec(),
            start.elapsed().as_micros() as u64,
            result,
        );
        return Ok(serde_json::to_value(output)?);
    }

    let mut rng = match config.monte_carlo.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let output = calculate_comprehensive_dcf(&ctx, &company.inputs, wacc, config, &mut rng)?;
    Ok(serde_json::to_value(output)?)
}

pub fn run_comps(args: InputArgs, config: &ValuationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let company = Company::load(&args, config)?;
    let mut output = serde_json::to_value(run_comparables(&company.inputs, &config.comparables))?;

    if let Some(price) = company.snapshot.current_price {
        output["result"]["current_multiples"] =
            serde_json::to_value(current_multiples(&company.inputs, price))?;
    }
    output["result"]["recommended_methods"] =
        serde_json::to_value(recommended_methods(company.profile.company_type))?;
    Ok(output)
}
