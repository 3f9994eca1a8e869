use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::ValuationConfig;
use crate::error::IntrinsicValueError;
use crate::types::{with_metadata, CompanyType, ComputationOutput, Money, Rate};
use crate::IntrinsicValueResult;

use super::classifier::CompanyProfile;
use super::inputs::ValuationInputs;

/// Input parameters for the risk-adjusted discount rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaccInput {
    /// Levered beta of equity
    pub beta: Decimal,
    /// Equity market value, drives the size premium
    pub market_cap: Money,
    pub debt_to_equity: Decimal,
    /// Marginal corporate tax rate
    pub tax_rate: Rate,
    pub company_type: CompanyType,
    /// Pre-tax cost of debt; defaults to risk-free rate plus the credit spread
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_of_debt: Option<Rate>,
    /// Caller-supplied liquidity premium
    #[serde(default)]
    pub liquidity_premium: Rate,
    /// Overrides the configured country risk premium
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_risk_premium: Option<Rate>,
    /// Book debt, only used for the tax-shield diagnostic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_debt: Option<Money>,
}

impl WaccInput {
    pub fn from_profile(inputs: &ValuationInputs, profile: &CompanyProfile) -> Self {
        Self {
            beta: inputs.beta,
            market_cap: profile.market_cap,
            debt_to_equity: inputs.debt_to_equity,
            tax_rate: inputs.tax_rate,
            company_type: profile.company_type,
            cost_of_debt: None,
            liquidity_premium: Decimal::ZERO,
            country_risk_premium: None,
            total_debt: Some(inputs.total_debt),
        }
    }
}

/// Company-specific additions to the CAPM cost of equity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskAdjustments {
    pub size_premium: Rate,
    pub distress_premium: Rate,
    pub business_risk_premium: Rate,
    pub liquidity_premium: Rate,
    pub total: Rate,
}

/// Output of the WACC calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaccOutput {
    /// Discount rate after clamping (or the fallback rate)
    pub wacc: Rate,
    /// Rate before clamping to the configured corridor
    pub unclamped_wacc: Rate,
    /// Rf + beta * market premium
    pub capm_cost_of_equity: Rate,
    /// CAPM plus risk adjustments plus country premium
    pub cost_of_equity: Rate,
    pub risk_adjustments: RiskAdjustments,
    pub country_risk_premium: Rate,
    pub cost_of_debt_pretax: Rate,
    pub after_tax_cost_of_debt: Rate,
    pub debt_weight: Rate,
    pub equity_weight: Rate,
    /// debt_weight * Kd * t, already embedded in the WACC figure
    pub tax_shield_rate: Rate,
    /// total_debt * t as a standalone line item. Diagnostic only; adding it
    /// to a value discounted at this WACC would count the shield twice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_shield_value: Option<Money>,
    pub clamped: bool,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Calculate the risk-adjusted WACC.
///
/// Ke = Rf + Beta * MRP + size + distress + business + liquidity + country
/// Kd_at = Kd * (1 - t)
/// WACC = We * Ke + Wd * Kd_at, with Wd = D/E / (1 + D/E)
///
/// Never fails: the result is clamped into `[wacc.floor, wacc.cap]`, and any
/// internal failure yields the configured fallback rate.
pub fn calculate_wacc(input: &WaccInput, config: &ValuationConfig) -> ComputationOutput<WaccOutput> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let output = match compute_wacc(input, config, &mut warnings) {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(error = %e, fallback = %config.wacc.fallback, "WACC calculation failed, using fallback");
            warnings.push(format!(
                "WACC calculation failed ({e}); using conservative fallback of {}",
                config.wacc.fallback
            ));
            fallback_output(config.wacc.fallback, e.to_string())
        }
    };

    let elapsed = start.elapsed().as_micros() as u64;
    with_metadata(
        "Risk-adjusted WACC (CAPM + size, distress, business-type, liquidity and country premia)",
        input,
        warnings,
        elapsed,
        output,
    )
}

/// Size premium from equity market value.
pub fn size_premium(market_cap: Money) -> Rate {
    if market_cap < dec!(1_000_000_000) {
        dec!(0.02)
    } else if market_cap < dec!(5_000_000_000) {
        dec!(0.01)
    } else {
        Decimal::ZERO
    }
}

/// Financial-distress premium from leverage.
pub fn distress_premium(debt_to_equity: Decimal) -> Rate {
    if debt_to_equity > dec!(2.0) {
        dec!(0.015)
    } else if debt_to_equity > dec!(1.0) {
        dec!(0.005)
    } else {
        Decimal::ZERO
    }
}

/// Business-risk premium table keyed by archetype.
pub fn business_risk_premium(company_type: CompanyType) -> Rate {
    match company_type {
        CompanyType::Startup => dec!(0.03),
        CompanyType::Growth => dec!(0.015),
        CompanyType::Cyclical => dec!(0.01),
        CompanyType::Mature => Decimal::ZERO,
        CompanyType::Bank => dec!(0.005),
        CompanyType::Reit => dec!(0.005),
        CompanyType::Utility => dec!(-0.01),
    }
}

/// (debt_weight, equity_weight) from a debt-to-equity ratio.
pub fn capital_weights(debt_to_equity: Decimal) -> (Rate, Rate) {
    if debt_to_equity <= Decimal::ZERO {
        return (Decimal::ZERO, Decimal::ONE);
    }
    let debt_weight = debt_to_equity / (Decimal::ONE + debt_to_equity);
    (debt_weight, Decimal::ONE - debt_weight)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn compute_wacc(
    input: &WaccInput,
    config: &ValuationConfig,
    warnings: &mut Vec<String>,
) -> IntrinsicValueResult<WaccOutput> {
    validate_wacc_input(input)?;
    let market = &config.market;

    let adjustments = {
        let size = size_premium(input.market_cap);
        let distress = distress_premium(input.debt_to_equity);
        let business = business_risk_premium(input.company_type);
        RiskAdjustments {
            size_premium: size,
            distress_premium: distress,
            business_risk_premium: business,
            liquidity_premium: input.liquidity_premium,
            total: size + distress + business + input.liquidity_premium,
        }
    };
    let country = input
        .country_risk_premium
        .unwrap_or(market.country_risk_premium);

    let capm_cost_of_equity = market.risk_free_rate + input.beta * market.market_premium;
    let cost_of_equity = capm_cost_of_equity + adjustments.total + country;

    let cost_of_debt_pretax = input
        .cost_of_debt
        .unwrap_or(market.risk_free_rate + market.credit_spread);
    let after_tax_cost_of_debt = cost_of_debt_pretax * (Decimal::ONE - input.tax_rate);

    let (debt_weight, equity_weight) = capital_weights(input.debt_to_equity);
    let unclamped_wacc = equity_weight * cost_of_equity + debt_weight * after_tax_cost_of_debt;

    let wacc = unclamped_wacc.max(config.wacc.floor).min(config.wacc.cap);
    let clamped = wacc != unclamped_wacc;
    if clamped {
        tracing::warn!(%unclamped_wacc, %wacc, "WACC clamped to configured corridor");
        warnings.push(format!(
            "WACC of {} clamped to {} (allowed range [{}, {}])",
            unclamped_wacc.round_dp(4),
            wacc,
            config.wacc.floor,
            config.wacc.cap
        ));
    }

    tracing::debug!(
        %capm_cost_of_equity,
        %cost_of_equity,
        %after_tax_cost_of_debt,
        %debt_weight,
        %wacc,
        "WACC components"
    );

    Ok(WaccOutput {
        wacc,
        unclamped_wacc,
        capm_cost_of_equity,
        cost_of_equity,
        risk_adjustments: adjustments,
        country_risk_premium: country,
        cost_of_debt_pretax,
        after_tax_cost_of_debt,
        debt_weight,
        equity_weight,
        tax_shield_rate: debt_weight * cost_of_debt_pretax * input.tax_rate,
        tax_shield_value: input.total_debt.map(|d| d * input.tax_rate),
        clamped,
        fallback_used: false,
        error: None,
    })
}

fn validate_wacc_input(input: &WaccInput) -> IntrinsicValueResult<()> {
    if input.beta < Decimal::ZERO {
        return Err(IntrinsicValueError::InvalidInput {
            field: "beta".into(),
            reason: "Beta cannot be negative".into(),
        });
    }
    if input.debt_to_equity < Decimal::ZERO {
        return Err(IntrinsicValueError::InvalidInput {
            field: "debt_to_equity".into(),
            reason: "Debt-to-equity cannot be negative".into(),
        });
    }
    if input.tax_rate < Decimal::ZERO || input.tax_rate > Decimal::ONE {
        return Err(IntrinsicValueError::InvalidInput {
            field: "tax_rate".into(),
            reason: "Tax rate must be between 0 and 1".into(),
        });
    }
    if input.market_cap < Decimal::ZERO {
        return Err(IntrinsicValueError::InvalidInput {
            field: "market_cap".into(),
            reason: "Market capitalisation cannot be negative".into(),
        });
    }
    if let Some(kd) = input.cost_of_debt {
        if kd < Decimal::ZERO {
            return Err(IntrinsicValueError::InvalidInput {
                field: "cost_of_debt".into(),
                reason: "Cost of debt cannot be negative".into(),
            });
        }
    }
    Ok(())
}

fn fallback_output(rate: Rate, error: String) -> WaccOutput {
    WaccOutput {
        wacc: rate,
        unclamped_wacc: rate,
        capm_cost_of_equity: Decimal::ZERO,
        cost_of_equity: Decimal::ZERO,
        risk_adjustments: RiskAdjustments::default(),
        country_risk_premium: Decimal::ZERO,
        cost_of_debt_pretax: Decimal::ZERO,
        after_tax_cost_of_debt: Decimal::ZERO,
        debt_weight: Decimal::ZERO,
        equity_weight: Decimal::ONE,
        tax_shield_rate: Decimal::ZERO,
        tax_shield_value: None,
        clamped: false,
        fallback_used: true,
        error: Some(error),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> WaccInput {
        WaccInput {
            beta: dec!(1.2),
            market_cap: dec!(20_000_000_000),
            debt_to_equity: dec!(0.5),
            tax_rate: dec!(0.25),
            company_type: CompanyType::Mature,
            cost_of_debt: Some(dec!(0.06)),
            liquidity_premium: Decimal::ZERO,
            country_risk_premium: None,
            total_debt: Some(dec!(4_000_000_000)),
        }
    }

    #[test]
    fn test_basic_wacc() {
        let config = ValuationConfig::default();
        let out = calculate_wacc(&sample_input(), &config).result;
        // Ke = 0.04 + 1.2 * 0.06 = 0.112
        assert_eq!(out.cost_of_equity, dec!(0.112));
        // Kd_at = 0.06 * 0.75 = 0.045
        assert_eq!(out.after_tax_cost_of_debt, dec!(0.045));
        // Wd = 0.5 / 1.5
        let expected = dec!(0.112) * (Decimal::ONE - out.debt_weight) + dec!(0.045) * out.debt_weight;
        assert!((out.wacc - expected).abs() < dec!(0.0000001));
        assert!((out.wacc - dec!(0.089667)).abs() < dec!(0.00001));
        assert!(!out.clamped);
        assert!(!out.fallback_used);
    }

    #[test]
    fn test_zero_debt_means_all_equity() {
        let input = WaccInput {
            debt_to_equity: Decimal::ZERO,
            ..sample_input()
        };
        let out = calculate_wacc(&input, &ValuationConfig::default()).result;
        assert_eq!(out.debt_weight, Decimal::ZERO);
        assert_eq!(out.equity_weight, Decimal::ONE);
        assert_eq!(out.wacc, out.cost_of_equity);
    }

    #[test]
    fn test_premia_stack() {
        let input = WaccInput {
            market_cap: dec!(500_000_000),
            debt_to_equity: dec!(2.5),
            company_type: CompanyType::Startup,
            liquidity_premium: dec!(0.01),
            ..sample_input()
        };
        let out = calculate_wacc(&input, &ValuationConfig::default()).result;
        let adj = &out.risk_adjustments;
        assert_eq!(adj.size_premium, dec!(0.02));
        assert_eq!(adj.distress_premium, dec!(0.015));
        assert_eq!(adj.business_risk_premium, dec!(0.03));
        assert_eq!(adj.total, dec!(0.075));
    }

    #[test]
    fn test_utility_discount() {
        assert_eq!(business_risk_premium(CompanyType::Utility), dec!(-0.01));
        assert_eq!(size_premium(dec!(3_000_000_000)), dec!(0.01));
        assert_eq!(distress_premium(dec!(1.5)), dec!(0.005));
    }

    #[test]
    fn test_clamped_to_cap() {
        let input = WaccInput {
            beta: dec!(4),
            market_cap: dec!(100_000_000),
            company_type: CompanyType::Startup,
            debt_to_equity: Decimal::ZERO,
            ..sample_input()
        };
        let output = calculate_wacc(&input, &ValuationConfig::default());
        assert_eq!(output.result.wacc, dec!(0.25));
        assert!(output.result.clamped);
        assert!(output.warnings.iter().any(|w| w.contains("clamped")));
    }

    #[test]
    fn test_clamped_to_floor() {
        let input = WaccInput {
            beta: Decimal::ZERO,
            company_type: CompanyType::Utility,
            debt_to_equity: dec!(2.5),
            cost_of_debt: Some(Decimal::ZERO),
            ..sample_input()
        };
        let out = calculate_wacc(&input, &ValuationConfig::default()).result;
        assert_eq!(out.wacc, dec!(0.02));
        assert!(out.clamped);
    }

    #[test]
    fn test_invalid_input_falls_back() {
        let input = WaccInput {
            tax_rate: dec!(1.5),
            ..sample_input()
        };
        let output = calculate_wacc(&input, &ValuationConfig::default());
        assert_eq!(output.result.wacc, dec!(0.12));
        assert!(output.result.fallback_used);
        assert!(output.result.error.is_some());
    }

    #[test]
    fn test_tax_shield_diagnostics() {
        let out = calculate_wacc(&sample_input(), &ValuationConfig::default()).result;
        assert_eq!(out.tax_shield_value, Some(dec!(1_000_000_000)));
        let expected_rate = out.debt_weight * dec!(0.06) * dec!(0.25);
        assert_eq!(out.tax_shield_rate, expected_rate);
    }

    #[test]
    fn test_default_cost_of_debt() {
        let input = WaccInput {
            cost_of_debt: None,
            ..sample_input()
        };
        let out = calculate_wacc(&input, &ValuationConfig::default()).result;
        assert_eq!(out.cost_of_debt_pretax, dec!(0.06));
    }
}
