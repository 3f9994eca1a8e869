use intrinsic_value_core::fundamentals::Fundamentals;
use intrinsic_value_core::monte_carlo::simulation::run_monte_carlo;
use intrinsic_value_core::scenarios::scenario::{
    run_scenarios, standard_scenarios, stress_test_interest_rates, ScenarioDefinition, DEFAULT_RATE_SHOCKS_BP,
};
use intrinsic_value_core::scenarios::sensitivity::{default_grid, evaluate_sensitivity_grid, perform_sensitivity_analysis};
use intrinsic_value_core::valuation::dcf::{calculate_core_dcf, DcfContext};
use intrinsic_value_core::valuation::inputs::ValuationInputs;
use intrinsic_value_core::valuation::wacc::WaccInput;
use intrinsic_value_core::{CompanyType, IntrinsicValueError, ValuationConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn inputs(config: &ValuationConfig) -> ValuationInputs {
    let f = Fundamentals::new()
        .with("revenue", "800M")
        .with("ebitda", "160M")
        .with("net_income", "72M")
        .with("free_cash_flow", "80M")
        .with("book_value", "480M")
        .with("shares_outstanding", "40M")
        .with("revenue_growth_rate", 0.06)
        .with("terminal_growth_rate", 0.02)
        .with("beta", 1.0)
        .with("debt_to_equity", 0.25);
    ValuationInputs::from_fundamentals(&f, config).unwrap()
}

fn wacc_input(inputs: &ValuationInputs) -> WaccInput {
    WaccInput {
        beta: inputs.beta,
        market_cap: dec!(8_000_000_000),
        debt_to_equity: inputs.debt_to_equity,
        tax_rate: inputs.tax_rate,
        company_type: CompanyType::Mature,
        cost_of_debt: None,
        liquidity_premium: Decimal::ZERO,
        country_risk_premium: None,
        total_debt: None,
    }
}

// ===========================================================================
// Sensitivity
// ===========================================================================

#[test]
fn test_sensitivity_moves_in_expected_directions() {
    let config = ValuationConfig::default();
    let inputs = inputs(&config);
    let ctx = DcfContext::new();
    let t = perform_sensitivity_analysis(&ctx, &inputs, dec!(0.09), 10, &config).unwrap();

    assert_eq!(t.variation, dec!(0.15));
    assert!(t.wacc.low > t.base_value);
    assert!(t.wacc.high < t.base_value);
    assert!(t.growth_rate.high > t.base_value);
    assert!(t.growth_rate.low < t.base_value);
    assert!(t.fallbacks.is_empty());
}

#[test]
fn test_grid_leaves_undefined_cells_empty() {
    let config = ValuationConfig::default();
    let inputs = inputs(&config);
    let ctx = DcfContext::new();
    // WACC 1%..5%, terminal growth 1%..3%
    let out = evaluate_sensitivity_grid(&ctx, &inputs, &default_grid(dec!(0.03), dec!(0.02)), &config).unwrap();
    let grid = &out.result;

    assert_eq!(grid.wacc_values.len(), 5);
    assert_eq!(grid.terminal_growth_values.len(), 5);
    assert!(grid.matrix[0].iter().all(|cell| cell.is_none()));
    assert!(grid.matrix[4][0].is_some());
    assert!(grid.base_case_value.is_some());
    assert!(!out.warnings.is_empty());

    // value falls as WACC rises along a column
    let col: Vec<Decimal> = grid.matrix.iter().filter_map(|row| row[0]).collect();
    assert!(col.windows(2).all(|w| w[0] > w[1]));
}

// ===========================================================================
// Scenarios and stress
// ===========================================================================

#[test]
fn test_standard_scenarios_bracket_base() {
    let config = ValuationConfig::default();
    let inputs = inputs(&config);
    let ctx = DcfContext::new();
    let out = run_scenarios(&ctx, &inputs, &wacc_input(&inputs), &standard_scenarios(), &config).unwrap();
    let r = &out.result;

    let value = |name: &str| r.results.iter().find(|s| s.name == name).map(|s| s.value_per_share).unwrap();
    assert!(value("worst") < value("base"));
    assert!(value("best") > value("base"));
    assert_eq!(value("base"), r.base_value);
    assert!(r.probability_weighted_value > value("worst"));
    assert!(r.probability_weighted_value < value("best"));
    assert!(r.results.iter().all(|s| s.error.is_none()));
}

#[test]
fn test_scenario_probabilities_must_sum_to_one() {
    let config = ValuationConfig::default();
    let inputs = inputs(&config);
    let ctx = DcfContext::new();
    let mut set = standard_scenarios();
    set.push(ScenarioDefinition {
        name: "extra".into(),
        probability: dec!(0.1),
        growth_multiplier: Decimal::ONE,
        terminal_growth_multiplier: Decimal::ONE,
        beta_multiplier: Decimal::ONE,
    });
    let err = run_scenarios(&ctx, &inputs, &wacc_input(&inputs), &set, &config).unwrap_err();
    assert!(!err.is_fatal());
}

#[test]
fn test_rate_shocks_lower_value() {
    let config = ValuationConfig::default();
    let inputs = inputs(&config);
    let ctx = DcfContext::new();
    let out =
        stress_test_interest_rates(&ctx, &inputs, &wacc_input(&inputs), &DEFAULT_RATE_SHOCKS_BP, &config).unwrap();
    let r = &out.result;

    assert_eq!(r.shocks.len(), 3);
    assert_eq!(r.shocks[0].shock, dec!(0.005));
    assert!(r.shocks.windows(2).all(|w| w[0].wacc < w[1].wacc));
    let base = r.base_value.unwrap();
    let values: Vec<Decimal> = r.shocks.iter().filter_map(|s| s.value_per_share).collect();
    assert_eq!(values.len(), 3);
    assert!(values[0] < base);
    assert!(values.windows(2).all(|w| w[0] > w[1]));
}

// ===========================================================================
// Monte Carlo
// ===========================================================================

#[test]
fn test_seeded_monte_carlo_is_reproducible_and_ordered() {
    let mut config = ValuationConfig::default();
    config.monte_carlo.seed = Some(2024);
    let inputs = inputs(&config);

    let a = run_monte_carlo(&inputs, dec!(0.09), &config).unwrap().result;
    let b = run_monte_carlo(&inputs, dec!(0.09), &config).unwrap().result;
    assert_eq!(a.p10, b.p10);
    assert_eq!(a.p90, b.p90);
    assert!(!a.heuristic);
    assert!(a.p10 <= a.p25 && a.p25 <= a.p50 && a.p50 <= a.p75 && a.p75 <= a.p90);

    let ctx = DcfContext::new();
    let base = calculate_core_dcf(&ctx, &inputs, dec!(0.09), 10, &config.dcf).unwrap();
    assert!(a.p10 < base.value_per_share);
    assert!(a.p90 > base.value_per_share);
}

#[test]
fn test_analysis_layers_reject_reentry() {
    let config = ValuationConfig::default();
    let inputs = inputs(&config);
    let ctx = DcfContext::new();
    let _outer = ctx.enter().unwrap();

    let err = perform_sensitivity_analysis(&ctx, &inputs, dec!(0.09), 10, &config).unwrap_err();
    assert!(matches!(err, IntrinsicValueError::ReentrantCall { .. }));
    let err = run_scenarios(&ctx, &inputs, &wacc_input(&inputs), &standard_scenarios(), &config).unwrap_err();
    assert!(err.is_fatal());
}
