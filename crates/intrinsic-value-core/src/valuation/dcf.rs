use std::cell::Cell;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::config::{DcfConfig, ValuationConfig};
use crate::error::IntrinsicValueError;
use crate::time_value::{discount_factor, gordon_terminal_value, present_value};
use crate::types::{Money, Rate};
use crate::IntrinsicValueResult;

use super::inputs::{CashFlowSource, ValuationInputs};

#[cfg(feature = "monte_carlo")]
use crate::monte_carlo::simulation::{heuristic_intervals, simulate_confidence_intervals, ConfidenceIntervals};
#[cfg(feature = "monte_carlo")]
use crate::scenarios::sensitivity::{perform_sensitivity_analysis, SensitivityTable};
#[cfg(feature = "monte_carlo")]
use crate::types::{with_metadata, ComputationOutput};
#[cfg(feature = "monte_carlo")]
use rand::Rng;
#[cfg(feature = "monte_carlo")]
use std::time::Instant;

// ---------------------------------------------------------------------------
// Reentrancy context
// ---------------------------------------------------------------------------

/// In-progress marker for the core DCF calculation.
///
/// One context belongs to one valuation request. It is `!Sync`, so it cannot
/// be shared between threads; each worker creates its own. Calling
/// [`calculate_core_dcf`] while the same context is already running fails
/// with [`IntrinsicValueError::ReentrantCall`].
#[derive(Debug, Default)]
pub struct DcfContext {
    depth: Cell<u32>,
}

impl DcfContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.depth.get() > 0
    }

    /// Mark the context as running until the returned guard is dropped.
    pub fn enter(&self) -> IntrinsicValueResult<DcfGuard<'_>> {
        let depth = self.depth.get();
        if depth > 0 {
            tracing::error!(depth, "core DCF re-entered while already running");
            return Err(IntrinsicValueError::ReentrantCall { depth });
        }
        self.depth.set(depth + 1);
        Ok(DcfGuard { ctx: self })
    }
}

/// Returns the context to idle on drop, including on early error returns.
#[derive(Debug)]
pub struct DcfGuard<'a> {
    ctx: &'a DcfContext,
}

impl Drop for DcfGuard<'_> {
    fn drop(&mut self) {
        self.ctx.depth.set(self.ctx.depth.get().saturating_sub(1));
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthStage {
    HighGrowth,
    Terminal,
}

/// Projection for a single explicit year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedYear {
    pub year: u32,
    pub stage: GrowthStage,
    pub growth_rate: Rate,
    pub fcf: Money,
    pub discount_factor: Rate,
    pub pv_fcf: Money,
}

/// Every figure produced by the core calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreDcfResult {
    pub value_per_share: Money,
    pub enterprise_value: Money,
    pub equity_value: Money,
    pub net_debt: Money,
    pub terminal_value: Money,
    pub pv_terminal: Money,
    pub pv_explicit_period: Money,
    /// PV(terminal) / enterprise value
    pub terminal_value_percentage: Rate,
    pub projected_fcf: Vec<ProjectedYear>,
    pub initial_fcf: Money,
    pub fcf_source: CashFlowSource,
    pub wacc: Rate,
    pub terminal_growth_rate: Rate,
    pub projection_years: u32,
}

// ---------------------------------------------------------------------------
// Core calculation
// ---------------------------------------------------------------------------

/// Multi-stage growth DCF; the single source of present-value math.
///
/// High-growth stage: `min(high_growth_years_cap, projection_years)` years at
/// `revenue_growth_rate * fade_factor^y` (y from 0). Remaining years grow at
/// the terminal rate. Terminal value is Gordon growth on the final year's
/// FCF, discounted by `(1 + wacc)^projection_years`.
///
/// Fails with `InvalidAssumption` iff `wacc <= terminal_growth_rate`, with
/// `Computation` when a projected amount leaves Decimal range, and with
/// `ReentrantCall` if `ctx` is already running.
pub fn calculate_core_dcf(
    ctx: &DcfContext,
    inputs: &ValuationInputs,
    wacc: Rate,
    projection_years: u32,
    config: &DcfConfig,
) -> IntrinsicValueResult<CoreDcfResult> {
    let _guard = ctx.enter()?;

    let terminal_growth = inputs.terminal_growth_rate;
    if wacc <= terminal_growth {
        return Err(IntrinsicValueError::InvalidAssumption(format!(
            "WACC ({wacc}) must exceed terminal growth ({terminal_growth})"
        )));
    }
    if projection_years == 0 {
        return Err(IntrinsicValueError::InvalidInput {
            field: "projection_years".into(),
            reason: "At least one projection year is required".into(),
        });
    }

    let basis = inputs.repaired_free_cash_flow();
    if basis.is_estimated() {
        tracing::warn!(
            reported = %inputs.free_cash_flow,
            estimate = %basis.amount,
            source = ?basis.source,
            "non-positive free cash flow replaced by estimate"
        );
    }

    let schedule = growth_schedule(inputs.revenue_growth_rate, terminal_growth, projection_years, config);
    let mut projected_fcf = Vec::with_capacity(schedule.len());
    let mut current_fcf = basis.amount;
    let mut pv_explicit_period = Decimal::ZERO;

    for (idx, (stage, growth_rate)) in schedule.into_iter().enumerate() {
        let year = idx as u32 + 1;
        current_fcf = current_fcf
            .checked_mul(Decimal::ONE + growth_rate)
            .ok_or_else(|| projection_overflow("projected FCF", year))?;
        let df = discount_factor(wacc, year)?;
        let pv_fcf = current_fcf
            .checked_mul(df)
            .ok_or_else(|| projection_overflow("discounted FCF", year))?;
        pv_explicit_period = pv_explicit_period
            .checked_add(pv_fcf)
            .ok_or_else(|| projection_overflow("explicit-period value", year))?;
        projected_fcf.push(ProjectedYear {
            year,
            stage,
            growth_rate,
            fcf: current_fcf,
            discount_factor: df,
            pv_fcf,
        });
    }

    let terminal_value = gordon_terminal_value(current_fcf, terminal_growth, wacc)?;
    let pv_terminal = present_value(terminal_value, wacc, projection_years)?;

    let enterprise_value = pv_explicit_period
        .checked_add(pv_terminal)
        .ok_or_else(|| projection_overflow("enterprise value", projection_years))?;
    let net_debt = inputs.net_debt();
    let equity_value = (enterprise_value - net_debt).max(Decimal::ZERO);
    let value_per_share = equity_value / inputs.shares_outstanding;
    let terminal_value_percentage = if enterprise_value > Decimal::ZERO {
        pv_terminal / enterprise_value
    } else {
        Decimal::ZERO
    };

    tracing::debug!(%wacc, %enterprise_value, %value_per_share, "core DCF complete");

    Ok(CoreDcfResult {
        value_per_share,
        enterprise_value,
        equity_value,
        net_debt,
        terminal_value,
        pv_terminal,
        pv_explicit_period,
        terminal_value_percentage,
        projected_fcf,
        initial_fcf: basis.amount,
        fcf_source: basis.source,
        wacc,
        terminal_growth_rate: terminal_growth,
        projection_years,
    })
}

fn projection_overflow(what: &str, year: u32) -> IntrinsicValueError {
    IntrinsicValueError::Computation(format!("{what} overflow in year {year}"))
}

/// Per-year growth rates for the explicit forecast.
pub fn growth_schedule(
    base_growth: Rate,
    terminal_growth: Rate,
    projection_years: u32,
    config: &DcfConfig,
) -> Vec<(GrowthStage, Rate)> {
    let high_growth_years = config.high_growth_years_cap.min(projection_years);
    let mut schedule = Vec::with_capacity(projection_years as usize);
    let mut fade = Decimal::ONE;
    for _ in 0..high_growth_years {
        schedule.push((GrowthStage::HighGrowth, base_growth * fade));
        fade *= config.fade_factor;
    }
    for _ in high_growth_years..projection_years {
        schedule.push((GrowthStage::Terminal, terminal_growth));
    }
    schedule
}

// ---------------------------------------------------------------------------
// Comprehensive calculation
// ---------------------------------------------------------------------------

/// Base DCF merged with sensitivity and Monte Carlo output.
#[cfg(feature = "monte_carlo")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComprehensiveDcfResult {
    #[serde(flatten)]
    pub valuation: CoreDcfResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<SensitivityTable>,
    pub confidence_intervals: ConfidenceIntervals,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Core DCF, sensitivity table and Monte Carlo intervals in one payload.
///
/// Any failure along the way (undefined terminal value, a broken assumption)
/// produces the FCF-multiple fallback with `error` set instead of an `Err`.
/// The only error returned is `ReentrantCall`.
#[cfg(feature = "monte_carlo")]
pub fn calculate_comprehensive_dcf<R: Rng + ?Sized>(
    ctx: &DcfContext,
    inputs: &ValuationInputs,
    wacc: Rate,
    config: &ValuationConfig,
    rng: &mut R,
) -> IntrinsicValueResult<ComputationOutput<ComprehensiveDcfResult>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = inputs.warnings().to_vec();
    let projection_years = config.dcf.projection_years;

    let result = match run_comprehensive(ctx, inputs, wacc, config, rng, &mut warnings) {
        Ok(result) => result,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "DCF calculation failed, using fallback valuation");
            warnings.push(format!("DCF calculation failed ({e}); fallback FCF-multiple valuation used"));
            fallback_result(inputs, wacc, config, e.to_string())
        }
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Multi-stage FCF DCF with sensitivity and Monte Carlo analysis",
        &serde_json::json!({
            "wacc": wacc.to_string(),
            "terminal_growth": inputs.terminal_growth_rate.to_string(),
            "projection_years": projection_years,
            "initial_fcf": result.valuation.initial_fcf.to_string(),
            "fade_factor": config.dcf.fade_factor.to_string(),
            "high_growth_years_cap": config.dcf.high_growth_years_cap,
        }),
        warnings,
        elapsed,
        result,
    ))
}

#[cfg(feature = "monte_carlo")]
fn run_comprehensive<R: Rng + ?Sized>(
    ctx: &DcfContext,
    inputs: &ValuationInputs,
    wacc: Rate,
    config: &ValuationConfig,
    rng: &mut R,
    warnings: &mut Vec<String>,
) -> IntrinsicValueResult<ComprehensiveDcfResult> {
    let years = config.dcf.projection_years;
    let valuation = calculate_core_dcf(ctx, inputs, wacc, years, &config.dcf)?;
    if valuation.fcf_source != CashFlowSource::Reported {
        warnings.push(format!(
            "Free cash flow {} is non-positive; projected from estimate {} ({:?})",
            inputs.free_cash_flow, valuation.initial_fcf, valuation.fcf_source
        ));
    }

    let sensitivity = perform_sensitivity_analysis(ctx, inputs, wacc, years, config)?;
    let confidence_intervals = simulate_confidence_intervals(ctx, inputs, wacc, years, config, rng)?;
    if confidence_intervals.heuristic {
        warnings.push(format!(
            "Only {} of {} Monte Carlo trials succeeded; heuristic intervals reported",
            confidence_intervals.successful_trials, confidence_intervals.requested_trials
        ));
    }

    Ok(ComprehensiveDcfResult {
        valuation,
        sensitivity: Some(sensitivity),
        confidence_intervals,
        fallback_used: false,
        error: None,
    })
}

#[cfg(feature = "monte_carlo")]
fn fallback_result(
    inputs: &ValuationInputs,
    wacc: Rate,
    config: &ValuationConfig,
    error: String,
) -> ComprehensiveDcfResult {
    let basis = inputs.repaired_free_cash_flow();
    let fcf = basis.amount;
    let value = fcf * config.dcf.fallback_fcf_multiple;
    let valuation = CoreDcfResult {
        value_per_share: value / inputs.shares_outstanding,
        enterprise_value: value,
        equity_value: value,
        net_debt: inputs.net_debt(),
        terminal_value: fcf * dec!(12),
        pv_terminal: fcf * dec!(10),
        pv_explicit_period: fcf * dec!(5),
        terminal_value_percentage: dec!(0.67),
        projected_fcf: Vec::new(),
        initial_fcf: fcf,
        fcf_source: basis.source,
        wacc,
        terminal_growth_rate: inputs.terminal_growth_rate,
        projection_years: config.dcf.projection_years,
    };
    ComprehensiveDcfResult {
        valuation,
        sensitivity: None,
        confidence_intervals: heuristic_intervals(inputs, config, 0, 0),
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
    use crate::valuation::inputs::tests::sample_data;
    use rust_decimal::MathematicalOps;

    fn five_year_config() -> DcfConfig {
        DcfConfig::default()
    }

    fn inputs() -> ValuationInputs {
        ValuationInputs::new(sample_data()).unwrap()
    }

    #[test]
    fn test_reference_example() {
        // 5 years, growth 0.05 fading 0.85, tg 0.02, wacc 0.10, 50 shares
        let ctx = DcfContext::new();
        let r = calculate_core_dcf(&ctx, &inputs(), dec!(0.10), 5, &five_year_config()).unwrap();

        let mut fcf = dec!(100);
        let mut pv = Decimal::ZERO;
        let mut growth = dec!(0.05);
        for year in 1..=5u32 {
            fcf *= Decimal::ONE + growth;
            pv += fcf / dec!(1.1).powi(year as i64);
            growth *= dec!(0.85);
        }
        let tv = fcf * dec!(1.02) / dec!(0.08);
        let expected = (pv + tv / dec!(1.1).powi(5)) / dec!(50);

        assert!((r.value_per_share - expected).abs() < dec!(0.0001));
        assert!((r.value_per_share - dec!(27.5015)).abs() < dec!(0.001));
        assert_eq!(r.projected_fcf.len(), 5);
        assert!(r.projected_fcf.iter().all(|y| y.stage == GrowthStage::HighGrowth));
    }

    #[test]
    fn test_wacc_at_terminal_growth_is_invalid_assumption() {
        let ctx = DcfContext::new();
        let err = calculate_core_dcf(&ctx, &inputs(), dec!(0.02), 5, &five_year_config()).unwrap_err();
        assert!(matches!(err, IntrinsicValueError::InvalidAssumption(_)));
        assert!(!ctx.is_running());
    }

    #[test]
    fn test_wacc_above_terminal_growth_succeeds() {
        let ctx = DcfContext::new();
        assert!(calculate_core_dcf(&ctx, &inputs(), dec!(0.0201), 5, &five_year_config()).is_ok());
    }

    #[test]
    fn test_reentry_is_rejected() {
        let ctx = DcfContext::new();
        let _outer = ctx.enter().unwrap();
        let err = calculate_core_dcf(&ctx, &inputs(), dec!(0.10), 5, &five_year_config()).unwrap_err();
        assert!(matches!(err, IntrinsicValueError::ReentrantCall { depth: 1 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_sequential_calls_are_allowed() {
        let ctx = DcfContext::new();
        for _ in 0..200 {
            calculate_core_dcf(&ctx, &inputs(), dec!(0.10), 5, &five_year_config()).unwrap();
        }
        assert!(!ctx.is_running());
    }

    #[test]
    fn test_growth_schedule_stages() {
        let config = DcfConfig::default();
        let schedule = growth_schedule(dec!(0.20), dec!(0.03), 8, &config);
        assert_eq!(schedule.len(), 8);
        assert_eq!(schedule[0], (GrowthStage::HighGrowth, dec!(0.20)));
        assert_eq!(schedule[1], (GrowthStage::HighGrowth, dec!(0.170)));
        assert_eq!(schedule[5], (GrowthStage::Terminal, dec!(0.03)));
        assert_eq!(schedule[7], (GrowthStage::Terminal, dec!(0.03)));
    }

    #[test]
    fn test_short_horizon_is_all_high_growth() {
        let schedule = growth_schedule(dec!(0.10), dec!(0.02), 3, &DcfConfig::default());
        assert_eq!(schedule.len(), 3);
        assert!(schedule.iter().all(|(s, _)| *s == GrowthStage::HighGrowth));
    }

    #[test]
    fn test_net_debt_reduces_equity() {
        let mut data = sample_data();
        data.total_debt = dec!(500);
        data.cash_and_equivalents = dec!(100);
        let levered = ValuationInputs::new(data).unwrap();
        let ctx = DcfContext::new();
        let base = calculate_core_dcf(&ctx, &inputs(), dec!(0.10), 5, &five_year_config()).unwrap();
        let r = calculate_core_dcf(&ctx, &levered, dec!(0.10), 5, &five_year_config()).unwrap();
        assert_eq!(r.net_debt, dec!(400));
        assert_eq!(r.equity_value, base.enterprise_value - dec!(400));
    }

    #[test]
    fn test_equity_floored_at_zero() {
        let mut data = sample_data();
        data.total_debt = dec!(1_000_000);
        let ctx = DcfContext::new();
        let r = calculate_core_dcf(&ctx, &ValuationInputs::new(data).unwrap(), dec!(0.10), 5, &five_year_config())
            .unwrap();
        assert_eq!(r.equity_value, Decimal::ZERO);
        assert_eq!(r.value_per_share, Decimal::ZERO);
    }

    #[test]
    fn test_negative_fcf_is_repaired() {
        let mut data = sample_data();
        data.free_cash_flow = dec!(-50);
        let ctx = DcfContext::new();
        let r = calculate_core_dcf(&ctx, &ValuationInputs::new(data).unwrap(), dec!(0.10), 5, &five_year_config())
            .unwrap();
        assert_eq!(r.initial_fcf, dec!(110));
        assert_eq!(r.fcf_source, CashFlowSource::EbitdaAfterTaxLessCapex);
        assert!(r.value_per_share > Decimal::ZERO);
    }

    #[test]
    fn test_terminal_value_percentage() {
        let ctx = DcfContext::new();
        let r = calculate_core_dcf(&ctx, &inputs(), dec!(0.10), 5, &five_year_config()).unwrap();
        let pct = r.pv_terminal / r.enterprise_value;
        assert_eq!(r.terminal_value_percentage, pct);
        assert!(pct > dec!(0.5) && pct < Decimal::ONE);
    }

    #[test]
    fn test_long_horizon_out_of_range_is_computation_error() {
        let ctx = DcfContext::new();
        let err = calculate_core_dcf(&ctx, &inputs(), dec!(0.25), 400, &five_year_config()).unwrap_err();
        assert!(matches!(err, IntrinsicValueError::Computation(_)));
        // the guard is released on the error path
        assert!(calculate_core_dcf(&ctx, &inputs(), dec!(0.10), 5, &five_year_config()).is_ok());
    }

    #[test]
    fn test_runaway_growth_is_computation_error() {
        let ctx = DcfContext::new();
        let inputs = inputs().with_revenue_growth(Decimal::ONE).unwrap();
        let config = DcfConfig {
            high_growth_years_cap: 200,
            fade_factor: dec!(0.9999),
            ..DcfConfig::default()
        };
        let err = calculate_core_dcf(&ctx, &inputs, dec!(0.10), 200, &config).unwrap_err();
        assert!(matches!(err, IntrinsicValueError::Computation(_)));
    }

    #[cfg(feature = "monte_carlo")]
    mod comprehensive {
        use super::*;
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        #[test]
        fn test_comprehensive_has_sensitivity_and_intervals() {
            let ctx = DcfContext::new();
            let config = ValuationConfig::default();
            let mut rng = StdRng::seed_from_u64(42);
            let out = calculate_comprehensive_dcf(&ctx, &inputs(), dec!(0.10), &config, &mut rng).unwrap();
            let r = &out.result;
            assert!(!r.fallback_used);
            assert!(r.sensitivity.is_some());
            assert!(!r.confidence_intervals.heuristic);
            assert_eq!(r.valuation.projected_fcf.len(), 10);
        }

        #[test]
        fn test_comprehensive_falls_back_on_invalid_assumption() {
            let ctx = DcfContext::new();
            let config = ValuationConfig::default();
            let mut rng = StdRng::seed_from_u64(1);
            let out = calculate_comprehensive_dcf(&ctx, &inputs(), dec!(0.01), &config, &mut rng).unwrap();
            let r = &out.result;
            assert!(r.fallback_used);
            assert!(r.error.is_some());
            // 100 * 15 / 50
            assert_eq!(r.valuation.value_per_share, dec!(30));
            assert_eq!(r.confidence_intervals.p50, dec!(30));
            assert_eq!(r.confidence_intervals.p10, dec!(21));
            assert_eq!(r.confidence_intervals.p90, dec!(39));
        }

        #[test]
        fn test_comprehensive_falls_back_when_horizon_overflows() {
            let ctx = DcfContext::new();
            let mut config = ValuationConfig::default();
            config.dcf.projection_years = 400;
            let mut rng = StdRng::seed_from_u64(7);
            let out = calculate_comprehensive_dcf(&ctx, &inputs(), dec!(0.25), &config, &mut rng).unwrap();
            let r = &out.result;
            assert!(r.fallback_used);
            assert!(r.error.as_deref().is_some_and(|e| e.contains("overflow")));
            assert_eq!(r.valuation.value_per_share, dec!(30));
        }

        #[test]
        fn test_comprehensive_propagates_reentry() {
            let ctx = DcfContext::new();
            let _held = ctx.enter().unwrap();
            let mut rng = StdRng::seed_from_u64(1);
            let result = calculate_comprehensive_dcf(&ctx, &inputs(), dec!(0.10), &ValuationConfig::default(), &mut rng);
            assert!(matches!(result, Err(IntrinsicValueError::ReentrantCall { .. })));
        }
    }
}
