use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::time::Instant;

use crate::config::ValuationConfig;
use crate::error::IntrinsicValueError;
use crate::types::{with_metadata, ComputationOutput, Money, Rate};
use crate::valuation::dcf::{calculate_core_dcf, DcfContext};
use crate::valuation::inputs::ValuationInputs;
use crate::IntrinsicValueResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Distribution of simulated value per share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceIntervals {
    pub p10: Money,
    pub p25: Money,
    pub p50: Money,
    pub p75: Money,
    pub p90: Money,
    pub mean: Money,
    /// Population standard deviation
    pub std: Money,
    pub successful_trials: usize,
    pub requested_trials: u32,
    /// True when too few trials succeeded and the FCF-multiple heuristic
    /// was reported instead of sample statistics
    pub heuristic: bool,
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// Draw from Normal(0, std_dev); a zero deviation yields exactly zero.
fn draw_delta<R: Rng + ?Sized>(rng: &mut R, std_dev: f64, field: &str) -> IntrinsicValueResult<f64> {
    if std_dev == 0.0 {
        return Ok(0.0);
    }
    let n = Normal::new(0.0, std_dev).map_err(|e| IntrinsicValueError::InvalidInput {
        field: field.into(),
        reason: format!("Invalid Normal parameters: {e}"),
    })?;
    Ok(rng.sample(n))
}

fn to_decimal(x: f64) -> Option<Decimal> {
    Decimal::from_f64(x).map(|d| d.round_dp(12))
}

// ---------------------------------------------------------------------------
// Statistics helpers
// ---------------------------------------------------------------------------

/// Compute the percentile value from a **sorted** slice using linear interpolation.
fn percentile_sorted(sorted: &[Decimal], p: Decimal) -> Decimal {
    match sorted.len() {
        0 => Decimal::ZERO,
        1 => sorted[0],
        n => {
            let rank = p / dec!(100) * Decimal::from(n - 1);
            let lower = rank.floor();
            let frac = rank - lower;
            let lo = lower.to_usize().unwrap_or(0).min(n - 1);
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

fn summarise(values: &mut [Decimal], requested_trials: u32) -> ConfidenceIntervals {
    values.sort();
    let n = Decimal::from(values.len());
    let mean = values.iter().copied().sum::<Decimal>() / n;
    let variance = values
        .iter()
        .map(|v| (*v - mean) * (*v - mean))
        .sum::<Decimal>()
        / n;

    ConfidenceIntervals {
        p10: percentile_sorted(values, dec!(10)),
        p25: percentile_sorted(values, dec!(25)),
        p50: percentile_sorted(values, dec!(50)),
        p75: percentile_sorted(values, dec!(75)),
        p90: percentile_sorted(values, dec!(90)),
        mean,
        std: variance.sqrt().unwrap_or(Decimal::ZERO),
        successful_trials: values.len(),
        requested_trials,
        heuristic: false,
    }
}

/// FCF-multiple distribution used when the simulation cannot support
/// statistics: centre (FCF / shares) x multiple, std 20%, p10/p90 at -/+30%.
pub fn heuristic_intervals(
    inputs: &ValuationInputs,
    config: &ValuationConfig,
    successful_trials: usize,
    requested_trials: u32,
) -> ConfidenceIntervals {
    let fcf = inputs.repaired_free_cash_flow().amount;
    let base = fcf / inputs.shares_outstanding * config.dcf.fallback_fcf_multiple;
    ConfidenceIntervals {
        p10: base * dec!(0.70),
        p25: base * dec!(0.85),
        p50: base,
        p75: base * dec!(1.15),
        p90: base * dec!(1.30),
        mean: base,
        std: base * dec!(0.20),
        successful_trials,
        requested_trials,
        heuristic: true,
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Perturb WACC and revenue growth with normal noise and re-price each trial
/// through the core DCF.
///
/// Trials that fail are skipped. Fewer than `min_successful_trials`
/// successes yields [`heuristic_intervals`]. A reentrant call aborts.
pub fn simulate_confidence_intervals<R: Rng + ?Sized>(
    ctx: &DcfContext,
    inputs: &ValuationInputs,
    wacc: Rate,
    projection_years: u32,
    config: &ValuationConfig,
    rng: &mut R,
) -> IntrinsicValueResult<ConfidenceIntervals> {
    let mc = &config.monte_carlo;
    let n = mc.trial_count();
    let mut values: Vec<Decimal> = Vec::with_capacity(n as usize);
    let mut skipped: u32 = 0;

    for _ in 0..n {
        let wacc_delta = draw_delta(rng, mc.wacc_std_dev, "monte_carlo.wacc_std_dev")?;
        let growth_delta = draw_delta(rng, mc.growth_std_dev, "monte_carlo.growth_std_dev")?;
        let (Some(wacc_delta), Some(growth_delta)) = (to_decimal(wacc_delta), to_decimal(growth_delta)) else {
            skipped += 1;
            continue;
        };

        let trial_wacc = (wacc + wacc_delta).max(config.wacc.floor);
        let trial_growth = (inputs.revenue_growth_rate + growth_delta).max(Decimal::ZERO);
        let outcome = inputs
            .with_revenue_growth(trial_growth)
            .and_then(|trial| calculate_core_dcf(ctx, &trial, trial_wacc, projection_years, &config.dcf));

        match outcome {
            Ok(r) => values.push(r.value_per_share),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!(error = %e, %trial_wacc, %trial_growth, "Monte Carlo trial skipped");
                skipped += 1;
            }
        }
    }

    if values.len() < mc.min_successful_trials {
        tracing::warn!(
            successful = values.len(),
            skipped,
            "too few Monte Carlo trials succeeded, reporting heuristic intervals"
        );
        return Ok(heuristic_intervals(inputs, config, values.len(), n));
    }
    if skipped > 0 {
        tracing::info!(skipped, "Monte Carlo trials skipped");
    }
    Ok(summarise(&mut values, n))
}

/// Stand-alone simulation seeded from `config.monte_carlo.seed` (entropy
/// when absent).
pub fn run_monte_carlo(
    inputs: &ValuationInputs,
    wacc: Rate,
    config: &ValuationConfig,
) -> IntrinsicValueResult<ComputationOutput<ConfidenceIntervals>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let mut rng = match config.monte_carlo.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let ctx = DcfContext::new();
    let intervals = simulate_confidence_intervals(
        &ctx,
        inputs,
        wacc,
        config.dcf.projection_years,
        config,
        &mut rng,
    )?;
    if intervals.heuristic {
        warnings.push(format!(
            "Only {} of {} trials succeeded; heuristic intervals reported",
            intervals.successful_trials, intervals.requested_trials
        ));
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Monte Carlo DCF (normal WACC and growth perturbations)",
        &serde_json::json!({
            "wacc": wacc.to_string(),
            "trials": config.monte_carlo.trial_count(),
            "wacc_std_dev": config.monte_carlo.wacc_std_dev,
            "growth_std_dev": config.monte_carlo.growth_std_dev,
            "seed": config.monte_carlo.seed,
        }),
        warnings,
        elapsed,
        intervals,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
