//! Tunable valuation parameters.
//!
//! A single [`ValuationConfig`] is built once (defaults, or deserialised from a
//! partial JSON/YAML document) and passed by reference into every calculation.
//! Nothing in the crate mutates it after construction.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::IntrinsicValueError;
use crate::types::{CompanyType, Multiple, Rate, ValuationMethod};
use crate::IntrinsicValueResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationConfig {
    pub market: MarketConfig,
    pub dcf: DcfConfig,
    pub wacc: WaccConfig,
    pub sensitivity: SensitivityConfig,
    pub monte_carlo: MonteCarloConfig,
    pub method_weights: MethodWeightTable,
    pub comparables: ComparableConfig,
    pub risk: RiskConfig,
}

/// Market-wide assumptions feeding CAPM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub risk_free_rate: Rate,
    pub market_premium: Rate,
    pub default_tax_rate: Rate,
    /// Spread over the risk-free rate used when no cost of debt is supplied
    pub credit_spread: Rate,
    pub country_risk_premium: Rate,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: dec!(0.04),
            market_premium: dec!(0.06),
            default_tax_rate: dec!(0.25),
            credit_spread: dec!(0.02),
            country_risk_premium: Decimal::ZERO,
        }
    }
}

/// Longest explicit forecast a config may request.
pub const MAX_PROJECTION_YEARS: u32 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DcfConfig {
    pub projection_years: u32,
    pub high_growth_years_cap: u32,
    /// Annual decay applied to the base growth rate during the high-growth stage
    pub fade_factor: Decimal,
    pub terminal_growth_cap: Rate,
    /// FCF multiple used by the fallback valuation
    pub fallback_fcf_multiple: Multiple,
}

impl Default for DcfConfig {
    fn default() -> Self {
        Self {
            projection_years: 10,
            high_growth_years_cap: 5,
            fade_factor: dec!(0.85),
            terminal_growth_cap: dec!(0.05),
            fallback_fcf_multiple: dec!(15),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaccConfig {
    pub floor: Rate,
    pub cap: Rate,
    /// Conservative rate returned when the calculation itself fails
    pub fallback: Rate,
}

impl Default for WaccConfig {
    fn default() -> Self {
        Self {
            floor: dec!(0.02),
            cap: dec!(0.25),
            fallback: dec!(0.12),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityConfig {
    /// Relative perturbation applied to WACC and growth (0.15 = ±15%)
    pub variation: Rate,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            variation: dec!(0.15),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    pub simulations: u32,
    /// Upper bound on trials regardless of `simulations`
    pub performance_limit: u32,
    pub wacc_std_dev: f64,
    pub growth_std_dev: f64,
    pub min_successful_trials: usize,
    pub seed: Option<u64>,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            simulations: 100,
            performance_limit: 100,
            wacc_std_dev: 0.015,
            growth_std_dev: 0.02,
            min_successful_trials: 10,
            seed: None,
        }
    }
}

impl MonteCarloConfig {
    pub fn trial_count(&self) -> u32 {
        self.simulations.min(self.performance_limit)
    }
}

/// Blend weights for the four valuation methods.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MethodWeights {
    pub dcf: Decimal,
    pub pe: Decimal,
    pub ev_ebitda: Decimal,
    pub pb: Decimal,
}

impl MethodWeights {
    pub const fn new(dcf: Decimal, pe: Decimal, ev_ebitda: Decimal, pb: Decimal) -> Self {
        Self {
            dcf,
            pe,
            ev_ebitda,
            pb,
        }
    }

    pub fn weight(&self, method: ValuationMethod) -> Decimal {
        match method {
            ValuationMethod::Dcf => self.dcf,
            ValuationMethod::Pe => self.pe,
            ValuationMethod::EvEbitda => self.ev_ebitda,
            ValuationMethod::Pb => self.pb,
        }
    }

    pub fn total(&self) -> Decimal {
        self.dcf + self.pe + self.ev_ebitda + self.pb
    }
}

/// Per-type method weights with a `default` entry for unmapped types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodWeightTable {
    pub by_type: BTreeMap<CompanyType, MethodWeights>,
    pub default: MethodWeights,
}

impl MethodWeightTable {
    pub fn for_type(&self, company_type: CompanyType) -> &MethodWeights {
        self.by_type.get(&company_type).unwrap_or(&self.default)
    }
}

impl Default for MethodWeightTable {
    fn default() -> Self {
        let by_type = BTreeMap::from([
            (
                CompanyType::Mature,
                MethodWeights::new(dec!(0.5), dec!(0.2), dec!(0.2), dec!(0.1)),
            ),
            (
                CompanyType::Growth,
                MethodWeights::new(dec!(0.6), dec!(0.2), dec!(0.2), dec!(0.0)),
            ),
            (
                CompanyType::Startup,
                MethodWeights::new(dec!(0.4), dec!(0.3), dec!(0.3), dec!(0.0)),
            ),
            (
                CompanyType::Bank,
                MethodWeights::new(dec!(0.0), dec!(0.4), dec!(0.0), dec!(0.6)),
            ),
            (
                CompanyType::Reit,
                MethodWeights::new(dec!(0.2), dec!(0.2), dec!(0.2), dec!(0.4)),
            ),
            (
                CompanyType::Utility,
                MethodWeights::new(dec!(0.4), dec!(0.2), dec!(0.2), dec!(0.2)),
            ),
            (
                CompanyType::Cyclical,
                MethodWeights::new(dec!(0.3), dec!(0.3), dec!(0.3), dec!(0.1)),
            ),
        ]);
        Self {
            by_type,
            default: MethodWeights::new(dec!(0.5), dec!(0.2), dec!(0.2), dec!(0.1)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparableConfig {
    pub pe_default: Multiple,
    pub ev_ebitda_default: Multiple,
    pub pb_default: Multiple,
    pub growth_threshold: Rate,
    pub pe_growth_premium_factor: Decimal,
    pub ev_ebitda_growth_premium_factor: Decimal,
    pub roe_premium_threshold: Rate,
}

impl Default for ComparableConfig {
    fn default() -> Self {
        Self {
            pe_default: dec!(15),
            ev_ebitda_default: dec!(10),
            pb_default: dec!(2),
            growth_threshold: dec!(0.05),
            pe_growth_premium_factor: dec!(2),
            ev_ebitda_growth_premium_factor: dec!(1.5),
            roe_premium_threshold: dec!(0.15),
        }
    }
}

/// Lower bounds (exclusive of the next level) of the overall risk score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub low: Decimal,
    pub medium: Decimal,
    pub high: Decimal,
    pub very_high: Decimal,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: dec!(20),
            medium: dec!(35),
            high: dec!(55),
            very_high: dec!(75),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskCategoryWeights {
    pub financial: Decimal,
    pub business: Decimal,
    pub market: Decimal,
    pub liquidity: Decimal,
}

impl Default for RiskCategoryWeights {
    fn default() -> Self {
        Self {
            financial: dec!(0.4),
            business: dec!(0.3),
            market: dec!(0.2),
            liquidity: dec!(0.1),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub thresholds: RiskThresholds,
    pub category_weights: RiskCategoryWeights,
}

impl ValuationConfig {
    /// Parse a (possibly partial) JSON document; unspecified fields keep
    /// their defaults. The result is validated before it is returned.
    pub fn from_json_str(raw: &str) -> IntrinsicValueResult<Self> {
        let config: ValuationConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> IntrinsicValueResult<()> {
        let dcf = &self.dcf;
        if dcf.fade_factor <= Decimal::ZERO || dcf.fade_factor >= Decimal::ONE {
            return Err(invalid("dcf.fade_factor", "Fade factor must lie strictly between 0 and 1"));
        }
        if dcf.projection_years == 0 || dcf.projection_years > MAX_PROJECTION_YEARS {
            return Err(invalid(
                "dcf.projection_years",
                &format!("Projection years must lie within [1, {MAX_PROJECTION_YEARS}]"),
            ));
        }
        if dcf.terminal_growth_cap < Decimal::ZERO || dcf.terminal_growth_cap >= Decimal::ONE {
            return Err(invalid("dcf.terminal_growth_cap", "Cap must lie within [0, 1)"));
        }
        if self.wacc.floor <= Decimal::ZERO || self.wacc.floor >= self.wacc.cap {
            return Err(invalid("wacc.floor", "Floor must be positive and below the cap"));
        }
        if self.wacc.fallback < self.wacc.floor || self.wacc.fallback > self.wacc.cap {
            return Err(invalid("wacc.fallback", "Fallback must lie within [floor, cap]"));
        }
        if self.sensitivity.variation <= Decimal::ZERO || self.sensitivity.variation >= Decimal::ONE {
            return Err(invalid("sensitivity.variation", "Variation must lie strictly between 0 and 1"));
        }
        if self.monte_carlo.wacc_std_dev < 0.0 || self.monte_carlo.growth_std_dev < 0.0 {
            return Err(invalid("monte_carlo", "Standard deviations cannot be negative"));
        }

        let tables = std::iter::once(("default".to_string(), &self.method_weights.default)).chain(
            self.method_weights
                .by_type
                .iter()
                .map(|(t, w)| (t.to_string(), w)),
        );
        for (name, weights) in tables {
            let parts = [weights.dcf, weights.pe, weights.ev_ebitda, weights.pb];
            if parts.iter().any(|w| *w < Decimal::ZERO) {
                return Err(invalid(
                    &format!("method_weights.{name}"),
                    "Weights cannot be negative",
                ));
            }
        }

        let t = &self.risk.thresholds;
        if !(t.low < t.medium && t.medium < t.high && t.high < t.very_high) {
            return Err(invalid("risk.thresholds", "Thresholds must be strictly increasing"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> IntrinsicValueError {
    IntrinsicValueError::InvalidConfig {
        field: field.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        ValuationConfig::default().validate().unwrap();
    }

    #[test]
    fn test_mature_weights() {
        let config = ValuationConfig::default();
        let w = config.method_weights.for_type(CompanyType::Mature);
        assert_eq!(w.dcf, dec!(0.5));
        assert_eq!(w.pe, dec!(0.2));
        assert_eq!(w.ev_ebitda, dec!(0.2));
        assert_eq!(w.pb, dec!(0.1));
        assert_eq!(w.total(), Decimal::ONE);
    }

    #[test]
    fn test_unmapped_type_falls_back_to_default() {
        let mut config = ValuationConfig::default();
        config.method_weights.by_type.remove(&CompanyType::Reit);
        let w = config.method_weights.for_type(CompanyType::Reit);
        assert_eq!(*w, config.method_weights.default);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            ValuationConfig::from_json_str(r#"{"dcf": {"fade_factor": "0.9"}, "monte_carlo": {"seed": 7}}"#)
                .unwrap();
        assert_eq!(config.dcf.fade_factor, dec!(0.9));
        assert_eq!(config.dcf.projection_years, 10);
        assert_eq!(config.monte_carlo.seed, Some(7));
        assert_eq!(config.market.risk_free_rate, dec!(0.04));
    }

    #[test]
    fn test_fade_factor_out_of_range_rejected() {
        let result = ValuationConfig::from_json_str(r#"{"dcf": {"fade_factor": "1.2"}}"#);
        match result {
            Err(IntrinsicValueError::InvalidConfig { field, .. }) => {
                assert_eq!(field, "dcf.fade_factor")
            }
            other => panic!("Expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_projection_horizon_is_bounded() {
        let result = ValuationConfig::from_json_str(r#"{"dcf": {"projection_years": 400}}"#);
        match result {
            Err(IntrinsicValueError::InvalidConfig { field, .. }) => {
                assert_eq!(field, "dcf.projection_years")
            }
            other => panic!("Expected InvalidConfig, got {other:?}"),
        }
        let longest = format!(r#"{{"dcf": {{"projection_years": {MAX_PROJECTION_YEARS}}}}}"#);
        assert!(ValuationConfig::from_json_str(&longest).is_ok());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = ValuationConfig::default();
        config
            .method_weights
            .by_type
            .insert(CompanyType::Bank, MethodWeights::new(dec!(-0.1), dec!(0.5), dec!(0), dec!(0.6)));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trial_count_is_capped() {
        let mc = MonteCarloConfig {
            simulations: 5_000,
            ..MonteCarloConfig::default()
        };
        assert_eq!(mc.trial_count(), 100);
    }
}
