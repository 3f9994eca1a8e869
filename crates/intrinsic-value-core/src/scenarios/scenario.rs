use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::ValuationConfig;
use crate::error::IntrinsicValueError;
use crate::types::*;
use crate::valuation::dcf::{calculate_core_dcf, DcfContext};
use crate::valuation::inputs::ValuationInputs;
use crate::valuation::wacc::{calculate_wacc, WaccInput};
use crate::IntrinsicValueResult;

/// Rate shocks applied by the interest-rate stress test, in basis points.
pub const DEFAULT_RATE_SHOCKS_BP: [u32; 3] = [50, 100, 200];

/// Multipliers applied to the base case to form one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub name: String,
    pub probability: Rate,
    pub growth_multiplier: Decimal,
    pub terminal_growth_multiplier: Decimal,
    pub beta_multiplier: Decimal,
}

impl ScenarioDefinition {
    fn new(name: &str, probability: Rate, growth: Decimal, terminal: Decimal, beta: Decimal) -> Self {
        Self {
            name: name.to_string(),
            probability,
            growth_multiplier: growth,
            terminal_growth_multiplier: terminal,
            beta_multiplier: beta,
        }
    }
}

/// Worst / base / best set weighted 25% / 50% / 25%.
pub fn standard_scenarios() -> Vec<ScenarioDefinition> {
    vec![
        ScenarioDefinition::new("worst", dec!(0.25), dec!(0.70), dec!(0.80), dec!(1.30)),
        ScenarioDefinition::new("base", dec!(0.50), Decimal::ONE, Decimal::ONE, Decimal::ONE),
        ScenarioDefinition::new("best", dec!(0.25), dec!(1.25), dec!(1.15), dec!(0.85)),
    ]
}

/// Result for a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub probability: Rate,
    pub wacc: Rate,
    pub value_per_share: Money,
    pub deviation_from_base: Money,
    pub deviation_pct: Rate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Output of scenario analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutput {
    pub results: Vec<ScenarioResult>,
    pub base_value: Money,
    pub probability_weighted_value: Money,
}

/// One interest-rate shock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateShockResult {
    pub label: String,
    pub shock: Rate,
    pub risk_free_rate: Rate,
    pub cost_of_debt: Rate,
    pub wacc: Rate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_per_share: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<Rate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressTestOutput {
    pub base_wacc: Rate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_value: Option<Money>,
    pub shocks: Vec<RateShockResult>,
}

// ---------------------------------------------------------------------------
// Scenario analysis
// ---------------------------------------------------------------------------

/// Price each scenario with its own WACC (re-derived from the scenario beta)
/// and combine them into a probability-weighted value.
///
/// Probabilities must sum to 1.0. A scenario that cannot be priced reports
/// the base value with `error` set. The base case itself must price.
pub fn run_scenarios(
    ctx: &DcfContext,
    inputs: &ValuationInputs,
    wacc_input: &WaccInput,
    scenarios: &[ScenarioDefinition],
    config: &ValuationConfig,
) -> IntrinsicValueResult<ComputationOutput<ScenarioOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();
    let years = config.dcf.projection_years;

    validate_scenarios(scenarios)?;

    let base_wacc = calculate_wacc(wacc_input, config).result.wacc;
    let base_value = calculate_core_dcf(ctx, inputs, base_wacc, years, &config.dcf)?.value_per_share;

    let mut results = Vec::with_capacity(scenarios.len());
    let mut probability_weighted_value = Decimal::ZERO;

    for scenario in scenarios {
        let scenario_wacc_input = WaccInput {
            beta: wacc_input.beta * scenario.beta_multiplier,
            ..wacc_input.clone()
        };
        let wacc = calculate_wacc(&scenario_wacc_input, config).result.wacc;

        let priced = inputs
            .with_overrides(|d| {
                d.revenue_growth_rate *= scenario.growth_multiplier;
                d.terminal_growth_rate *= scenario.terminal_growth_multiplier;
                d.beta *= scenario.beta_multiplier;
            })
            .and_then(|scenario_inputs| calculate_core_dcf(ctx, &scenario_inputs, wacc, years, &config.dcf));

        let (value, error) = match priced {
            Ok(r) => (r.value_per_share, None),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(scenario = %scenario.name, error = %e, "scenario failed, using base value");
                warnings.push(format!("Scenario '{}' failed ({e}); base value used", scenario.name));
                (base_value, Some(e.to_string()))
            }
        };

        let deviation = value - base_value;
        let deviation_pct = if base_value.is_zero() {
            Decimal::ZERO
        } else {
            deviation / base_value
        };
        probability_weighted_value += scenario.probability * value;

        results.push(ScenarioResult {
            name: scenario.name.clone(),
            probability: scenario.probability,
            wacc,
            value_per_share: value,
            deviation_from_base: deviation,
            deviation_pct,
            error,
        });
    }

    let output = ScenarioOutput {
        results,
        base_value,
        probability_weighted_value,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Bear/Base/Bull Scenario Analysis",
        &serde_json::json!({
            "num_scenarios": scenarios.len(),
            "base_wacc": base_wacc.to_string(),
            "base_case_value": base_value.to_string(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

fn validate_scenarios(scenarios: &[ScenarioDefinition]) -> IntrinsicValueResult<()> {
    if scenarios.is_empty() {
        return Err(IntrinsicValueError::InvalidInput {
            field: "scenarios".into(),
            reason: "At least one scenario required".into(),
        });
    }
    for s in scenarios {
        if s.probability < Decimal::ZERO || s.probability > Decimal::ONE {
            return Err(IntrinsicValueError::InvalidInput {
                field: format!("scenario:{} probability", s.name),
                reason: "Probability must be between 0 and 1".into(),
            });
        }
    }
    let total: Decimal = scenarios.iter().map(|s| s.probability).sum();
    if (total - Decimal::ONE).abs() > dec!(0.001) {
        return Err(IntrinsicValueError::InvalidInput {
            field: "probabilities".into(),
            reason: format!("Probabilities must sum to 1.0 (got {total})"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Interest-rate stress
// ---------------------------------------------------------------------------

/// Shift the risk-free rate and the cost of debt by each shock, recompute
/// WACC and re-price the base case.
pub fn stress_test_interest_rates(
    ctx: &DcfContext,
    inputs: &ValuationInputs,
    wacc_input: &WaccInput,
    shocks_bp: &[u32],
    config: &ValuationConfig,
) -> IntrinsicValueResult<ComputationOutput<StressTestOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let base_wacc = calculate_wacc(wacc_input, config).result.wacc;
    let base_value = price(ctx, inputs, base_wacc, config, "base", &mut warnings)?;
    let base_kd = wacc_input
        .cost_of_debt
        .unwrap_or(config.market.risk_free_rate + config.market.credit_spread);

    let mut shocks = Vec::with_capacity(shocks_bp.len());
    for bp in shocks_bp {
        let shock = Decimal::from(*bp) / dec!(10_000);
        let label = format!("+{bp}bp");

        let mut stressed_config = config.clone();
        stressed_config.market.risk_free_rate += shock;
        let stressed_input = WaccInput {
            cost_of_debt: Some(base_kd + shock),
            ..wacc_input.clone()
        };
        let wacc = calculate_wacc(&stressed_input, &stressed_config).result.wacc;
        let value = price(ctx, inputs, wacc, config, &label, &mut warnings)?;
        let change_pct = match (value, base_value) {
            (Some(v), Some(b)) if !b.is_zero() => Some((v - b) / b),
            _ => None,
        };

        tracing::debug!(%shock, %wacc, "rate shock applied");
        shocks.push(RateShockResult {
            label,
            shock,
            risk_free_rate: stressed_config.market.risk_free_rate,
            cost_of_debt: base_kd + shock,
            wacc,
            value_per_share: value,
            change_pct,
        });
    }

    let output = StressTestOutput {
        base_wacc,
        base_value,
        shocks,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Interest-rate stress test (risk-free rate and cost of debt shocks)",
        &serde_json::json!({ "shocks_bp": shocks_bp }),
        warnings,
        elapsed,
        output,
    ))
}

fn price(
    ctx: &DcfContext,
    inputs: &ValuationInputs,
    wacc: Rate,
    config: &ValuationConfig,
    label: &str,
    warnings: &mut Vec<String>,
) -> IntrinsicValueResult<Option<Money>> {
    match calculate_core_dcf(ctx, inputs, wacc, config.dcf.projection_years, &config.dcf) {
        Ok(r) => Ok(Some(r.value_per_share)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warnings.push(format!("{label}: valuation undefined ({e})"));
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
