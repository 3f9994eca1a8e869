//! End-to-end valuation: classification, discount rate, comprehensive DCF,
//! comparable cross-checks, risk scoring and the type-weighted blend of the
//! method values into one fair value.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::{MethodWeights, ValuationConfig};
use crate::fundamentals::{Fundamentals, MarketSnapshot};
use crate::risk::assessment::{assess_risk, RiskAssessment};
use crate::scenarios::scenario::{
    run_scenarios, standard_scenarios, stress_test_interest_rates, ScenarioOutput, StressTestOutput,
    DEFAULT_RATE_SHOCKS_BP,
};
use crate::types::{with_metadata, ComputationOutput, Money, Rate, ValuationMethod};
use crate::valuation::classifier::{build_profile, Classification, CompanyProfile};
use crate::valuation::comps::{
    comparable_summary, current_multiples, peer_multiple_valuation, recommended_methods, ComparableSummary,
    CurrentMultiples, PeerMultipleValuation, PeerMultiples, RecommendedMethods,
};
use crate::valuation::dcf::{calculate_comprehensive_dcf, ComprehensiveDcfResult, DcfContext};
use crate::valuation::inputs::ValuationInputs;
use crate::valuation::wacc::{calculate_wacc, WaccInput, WaccOutput};
use crate::IntrinsicValueResult;

const BLEND_ORDER: [ValuationMethod; 4] = [
    ValuationMethod::Dcf,
    ValuationMethod::Pe,
    ValuationMethod::EvEbitda,
    ValuationMethod::Pb,
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Optional stages and overrides for a valuation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationOptions {
    pub include_scenarios: bool,
    pub include_stress_test: bool,
    /// Overrides the snapshot price when set
    pub current_price: Option<Money>,
    /// Peer P/E and EV/EBITDA to value the company at, reported alongside
    /// the blend
    pub peer_multiples: Option<PeerMultiples>,
}

impl Default for ValuationOptions {
    fn default() -> Self {
        Self {
            include_scenarios: true,
            include_stress_test: true,
            current_price: None,
            peer_multiples: None,
        }
    }
}

/// One method's value as offered to the blend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodEstimate {
    pub method: ValuationMethod,
    pub fair_value: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodContribution {
    pub method: ValuationMethod,
    pub fair_value: Money,
    /// Configured weight
    pub weight: Decimal,
    /// Weight after dropping skipped methods
    pub normalized_weight: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedMethod {
    pub method: ValuationMethod,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendedValue {
    /// `None` when no method with a positive weight succeeded
    pub weighted_fair_value: Option<Money>,
    pub contributions: Vec<MethodContribution>,
    pub skipped: Vec<SkippedMethod>,
}

/// Final payload of a valuation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationReport {
    pub ticker: String,
    pub valued_at: DateTime<Utc>,
    pub profile: CompanyProfile,
    pub classification: Classification,
    pub recommended_methods: RecommendedMethods,
    pub wacc: WaccOutput,
    pub dcf: ComprehensiveDcfResult,
    pub comparables: ComparableSummary,
    pub risk: RiskAssessment,
    pub blend: BlendedValue,
    /// Blended value, or the DCF value when nothing could be blended
    pub weighted_fair_value: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Money>,
    /// (fair - price) / fair
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_of_safety: Option<Rate>,
    /// (fair - price) / price
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upside: Option<Rate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_multiples: Option<CurrentMultiples>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_multiples: Option<PeerMultipleValuation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenarios: Option<ScenarioOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interest_rate_stress: Option<StressTestOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Value a company from its fundamentals map.
///
/// Input validation failures are returned as `Validation`. Past that point
/// the only error is `ReentrantCall`; every other failure degrades the
/// report. Monte Carlo draws are seeded from `config.monte_carlo.seed`
/// (entropy when absent).
pub fn value_company(
    fundamentals: &Fundamentals,
    options: &ValuationOptions,
    config: &ValuationConfig,
) -> IntrinsicValueResult<ComputationOutput<ValuationReport>> {
    let inputs = ValuationInputs::from_fundamentals(fundamentals, config)?;
    let snapshot = MarketSnapshot::from_fundamentals(fundamentals);
    let mut rng = match config.monte_carlo.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let ctx = DcfContext::new();
    run_valuation(&ctx, &inputs, &snapshot, options, config, &mut rng)
}

/// Full pipeline over validated inputs with an injected random source.
pub fn run_valuation<R: Rng + ?Sized>(
    ctx: &DcfContext,
    inputs: &ValuationInputs,
    snapshot: &MarketSnapshot,
    options: &ValuationOptions,
    config: &ValuationConfig,
    rng: &mut R,
) -> IntrinsicValueResult<ComputationOutput<ValuationReport>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let (profile, classification) = build_profile(inputs, snapshot);
    tracing::info!(
        ticker = %profile.ticker,
        company_type = %profile.company_type,
        confidence = %classification.confidence,
        "company classified"
    );

    let wacc_input = WaccInput::from_profile(inputs, &profile);
    let wacc_out = calculate_wacc(&wacc_input, config);
    warnings.extend(wacc_out.warnings);
    let wacc = wacc_out.result;

    let dcf_out = calculate_comprehensive_dcf(ctx, inputs, wacc.wacc, config, rng)?;
    warnings.extend(dcf_out.warnings);
    let dcf = dcf_out.result;

    let comparables = comparable_summary(inputs, &config.comparables);
    for r in [&comparables.pe, &comparables.ev_ebitda, &comparables.pb] {
        if let Some(e) = &r.error {
            warnings.push(format!("{}: {e}", r.method));
        }
    }

    let peer_multiples = options
        .peer_multiples
        .as_ref()
        .filter(|peers| !peers.is_empty())
        .map(|peers| peer_multiple_valuation(inputs, peers));

    let risk = assess_risk(inputs, &profile, &config.risk);

    let estimates = method_estimates(&dcf, &comparables);
    let blend = blend_fair_value(config.method_weights.for_type(profile.company_type), &estimates);
    let weighted_fair_value = match blend.weighted_fair_value {
        Some(v) => v,
        None => {
            tracing::warn!("no weighted method succeeded, reporting DCF value");
            warnings.push("No weighted valuation method succeeded; DCF value reported".into());
            dcf.valuation.value_per_share
        }
    };

    let current_price = options
        .current_price
        .or(snapshot.current_price)
        .filter(|p| *p > Decimal::ZERO);
    let (margin_of_safety, upside) = match current_price {
        Some(price) => price_gaps(weighted_fair_value, price),
        None => (None, None),
    };

    let scenarios = if options.include_scenarios {
        match run_scenarios(ctx, inputs, &wacc_input, &standard_scenarios(), config) {
            Ok(out) => {
                warnings.extend(out.warnings);
                Some(out.result)
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "scenario analysis skipped");
                warnings.push(format!("Scenario analysis skipped: {e}"));
                None
            }
        }
    } else {
        None
    };

    let interest_rate_stress = if options.include_stress_test {
        match stress_test_interest_rates(ctx, inputs, &wacc_input, &DEFAULT_RATE_SHOCKS_BP, config) {
            Ok(out) => {
                warnings.extend(out.warnings);
                Some(out.result)
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "interest-rate stress test skipped");
                warnings.push(format!("Interest-rate stress test skipped: {e}"));
                None
            }
        }
    } else {
        None
    };

    let report = ValuationReport {
        ticker: profile.ticker.clone(),
        valued_at: Utc::now(),
        recommended_methods: recommended_methods(profile.company_type),
        current_multiples: current_price.map(|p| current_multiples(inputs, p)),
        peer_multiples,
        error: dcf.error.clone(),
        profile,
        classification,
        wacc,
        dcf,
        comparables,
        risk,
        blend,
        weighted_fair_value,
        current_price,
        margin_of_safety,
        upside,
        scenarios,
        interest_rate_stress,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Type-weighted blend of DCF and comparable multiples with risk assessment",
        &serde_json::json!({
            "company_type": report.profile.company_type,
            "wacc": report.wacc.wacc.to_string(),
            "method_weights": config.method_weights.for_type(report.profile.company_type),
            "monte_carlo_trials": config.monte_carlo.trial_count(),
        }),
        warnings,
        elapsed,
        report,
    ))
}

/// Weighted average of the method values, skipping errored and zero-weight
/// methods and renormalising the remaining weights.
pub fn blend_fair_value(weights: &MethodWeights, estimates: &[MethodEstimate]) -> BlendedValue {
    let mut included: Vec<(&MethodEstimate, Decimal)> = Vec::new();
    let mut skipped = Vec::new();

    for est in estimates {
        let weight = weights.weight(est.method);
        if let Some(e) = &est.error {
            skipped.push(SkippedMethod {
                method: est.method,
                reason: e.clone(),
            });
        } else if weight <= Decimal::ZERO {
            skipped.push(SkippedMethod {
                method: est.method,
                reason: "zero weight for company type".into(),
            });
        } else {
            included.push((est, weight));
        }
    }

    let total: Decimal = included.iter().map(|(_, w)| *w).sum();
    if total <= Decimal::ZERO {
        return BlendedValue {
            weighted_fair_value: None,
            contributions: Vec::new(),
            skipped,
        };
    }

    let contributions: Vec<MethodContribution> = included
        .iter()
        .map(|(est, w)| MethodContribution {
            method: est.method,
            fair_value: est.fair_value,
            weight: *w,
            normalized_weight: *w / total,
        })
        .collect();
    let weighted = included.iter().map(|(est, w)| est.fair_value * *w).sum::<Decimal>() / total;

    BlendedValue {
        weighted_fair_value: Some(weighted),
        contributions,
        skipped,
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn method_estimates(dcf: &ComprehensiveDcfResult, comps: &ComparableSummary) -> Vec<MethodEstimate> {
    BLEND_ORDER
        .iter()
        .filter_map(|m| match m {
            ValuationMethod::Dcf => Some(MethodEstimate {
                method: *m,
                fair_value: dcf.valuation.value_per_share,
                error: dcf.error.clone(),
            }),
            other => comps.get(*other).map(|r| MethodEstimate {
                method: r.method,
                fair_value: r.fair_value,
                error: r.error.clone(),
            }),
        })
        .collect()
}

/// Margin of safety against fair value and upside against price.
fn price_gaps(fair_value: Money, price: Money) -> (Option<Rate>, Option<Rate>) {
    let gap = fair_value - price;
    let margin = (fair_value > Decimal::ZERO).then(|| gap / fair_value);
    (margin, Some(gap / price))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
