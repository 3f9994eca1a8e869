use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::ComparableConfig;
use crate::types::{with_metadata, CompanyType, ComputationOutput, Money, Multiple, Rate, ValuationMethod};
use crate::valuation::inputs::ValuationInputs;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Outcome of one multiple-based cross-check.
///
/// A failed method reports `fair_value = 0` and carries `error`; it never
/// aborts the surrounding valuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparableResult {
    pub method: ValuationMethod,
    /// Implied value per share
    pub fair_value: Money,
    /// Multiple actually applied after growth / ROE premia
    pub target_multiple: Multiple,
    /// Per-share (EPS, BVPS) or absolute (EBITDA) base the multiple is applied to
    pub metric: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enterprise_value: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roe: Option<Rate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComparableResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failed(method: ValuationMethod, reason: String) -> Self {
        tracing::warn!(%method, %reason, "comparable valuation failed");
        Self {
            method,
            fair_value: Decimal::ZERO,
            target_multiple: Decimal::ZERO,
            metric: Decimal::ZERO,
            enterprise_value: None,
            roe: None,
            error: Some(reason),
        }
    }
}

/// The three cross-checks side by side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparableSummary {
    pub pe: ComparableResult,
    pub ev_ebitda: ComparableResult,
    pub pb: ComparableResult,
}

impl ComparableSummary {
    pub fn get(&self, method: ValuationMethod) -> Option<&ComparableResult> {
        match method {
            ValuationMethod::Pe => Some(&self.pe),
            ValuationMethod::EvEbitda => Some(&self.ev_ebitda),
            ValuationMethod::Pb => Some(&self.pb),
            ValuationMethod::Dcf => None,
        }
    }
}

/// Multiples implied by the current share price. A multiple whose
/// denominator is not positive is omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentMultiples {
    pub pe_ratio: Option<Multiple>,
    pub ev_ebitda: Option<Multiple>,
    pub price_to_sales: Option<Multiple>,
    pub price_to_book: Option<Multiple>,
}

/// Caller-supplied peer multiples. Absent or non-positive entries are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerMultiples {
    #[serde(default, alias = "pe_ratio", skip_serializing_if = "Option::is_none")]
    pub pe: Option<Multiple>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ev_ebitda: Option<Multiple>,
}

impl PeerMultiples {
    pub fn is_empty(&self) -> bool {
        self.pe.is_none() && self.ev_ebitda.is_none()
    }
}

/// Value per share implied by the peer multiples. A value is present only
/// when its multiple was given and the company's metric is positive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerMultipleValuation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pe_value: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ev_ebitda_value: Option<Money>,
}

/// Analytical approaches referenced by [`RecommendedMethods`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisApproach {
    Dcf,
    DcfNormalized,
    PeRatio,
    EvToEbitda,
    EvToSales,
    PriceToSales,
    PriceToBook,
    PriceToBookNormalized,
    PriceToTangibleBook,
    DividendDiscount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedMethods {
    pub primary: Vec<AnalysisApproach>,
    pub secondary: Vec<AnalysisApproach>,
    pub avoid: Vec<AnalysisApproach>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// P/E cross-check: EPS x industry P/E, with a growth premium above the
/// configured revenue-growth threshold.
pub fn pe_valuation(inputs: &ValuationInputs, config: &ComparableConfig) -> ComparableResult {
    let method = ValuationMethod::Pe;
    let mut target = inputs.industry_pe;
    if target <= Decimal::ZERO {
        return ComparableResult::failed(method, format!("Industry P/E must be positive, got {target}"));
    }
    if inputs.net_income <= Decimal::ZERO {
        return ComparableResult::failed(
            method,
            format!("Net income must be positive for P/E valuation, got {}", inputs.net_income),
        );
    }
    target *= growth_premium(inputs.revenue_growth_rate, config.growth_threshold, config.pe_growth_premium_factor);

    let eps = inputs.net_income / inputs.shares_outstanding;
    ComparableResult {
        method,
        fair_value: (eps * target).max(Decimal::ZERO),
        target_multiple: target,
        metric: eps,
        enterprise_value: None,
        roe: None,
        error: None,
    }
}

/// EV/EBITDA cross-check: EBITDA x industry multiple (growth-adjusted on
/// EBITDA growth), less net debt, per share. Equity is floored at zero.
pub fn ev_ebitda_valuation(inputs: &ValuationInputs, config: &ComparableConfig) -> ComparableResult {
    let method = ValuationMethod::EvEbitda;
    let mut target = inputs.industry_ev_ebitda;
    if target <= Decimal::ZERO {
        return ComparableResult::failed(method, format!("Industry EV/EBITDA must be positive, got {target}"));
    }
    if inputs.ebitda <= Decimal::ZERO {
        return ComparableResult::failed(
            method,
            format!("EBITDA must be positive for EV/EBITDA valuation, got {}", inputs.ebitda),
        );
    }
    target *= growth_premium(
        inputs.ebitda_growth_rate,
        config.growth_threshold,
        config.ev_ebitda_growth_premium_factor,
    );

    let enterprise_value = inputs.ebitda * target;
    // Net cash adds to equity here, unlike the DCF bridge.
    let net_debt = inputs.total_debt - inputs.cash_and_equivalents;
    let equity_value = (enterprise_value - net_debt).max(Decimal::ZERO);

    ComparableResult {
        method,
        fair_value: equity_value / inputs.shares_outstanding,
        target_multiple: target,
        metric: inputs.ebitda,
        enterprise_value: Some(enterprise_value),
        roe: None,
        error: None,
    }
}

/// Price-to-book cross-check. ROE above the threshold lifts the multiple
/// one-for-one: `pb x (1 + (roe - threshold))`.
pub fn pb_valuation(inputs: &ValuationInputs, config: &ComparableConfig) -> ComparableResult {
    let method = ValuationMethod::Pb;
    if config.pb_default <= Decimal::ZERO {
        return ComparableResult::failed(
            method,
            format!("Industry P/B must be positive, got {}", config.pb_default),
        );
    }
    if inputs.book_value <= Decimal::ZERO {
        return ComparableResult::failed(
            method,
            format!("Book value must be positive for P/B valuation, got {}", inputs.book_value),
        );
    }

    let bvps = inputs.book_value / inputs.shares_outstanding;
    let roe = inputs.net_income / inputs.book_value.max(Decimal::ONE);
    let target = if roe > config.roe_premium_threshold {
        config.pb_default * (Decimal::ONE + (roe - config.roe_premium_threshold))
    } else {
        config.pb_default
    };

    ComparableResult {
        method,
        fair_value: (bvps * target).max(Decimal::ZERO),
        target_multiple: target,
        metric: bvps,
        enterprise_value: None,
        roe: Some(roe),
        error: None,
    }
}

/// Run all three cross-checks.
pub fn comparable_summary(inputs: &ValuationInputs, config: &ComparableConfig) -> ComparableSummary {
    ComparableSummary {
        pe: pe_valuation(inputs, config),
        ev_ebitda: ev_ebitda_valuation(inputs, config),
        pb: pb_valuation(inputs, config),
    }
}

/// Cross-checks wrapped in the standard output envelope.
pub fn run_comparables(
    inputs: &ValuationInputs,
    config: &ComparableConfig,
) -> ComputationOutput<ComparableSummary> {
    let start = Instant::now();
    let summary = comparable_summary(inputs, config);
    let warnings: Vec<String> = [&summary.pe, &summary.ev_ebitda, &summary.pb]
        .iter()
        .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {e}", r.method)))
        .collect();

    let elapsed = start.elapsed().as_micros() as u64;
    with_metadata(
        "Comparable multiples (P/E, EV/EBITDA, P/B)",
        &serde_json::json!({
            "industry_pe": inputs.industry_pe.to_string(),
            "industry_ev_ebitda": inputs.industry_ev_ebitda.to_string(),
            "industry_pb": config.pb_default.to_string(),
            "growth_threshold": config.growth_threshold.to_string(),
        }),
        warnings,
        elapsed,
        summary,
    )
}

/// Multiples implied by `price`. EV uses market cap plus debt less cash.
pub fn current_multiples(inputs: &ValuationInputs, price: Money) -> CurrentMultiples {
    if price <= Decimal::ZERO {
        return CurrentMultiples::default();
    }
    let market_cap = price * inputs.shares_outstanding;
    let enterprise_value = market_cap + inputs.total_debt - inputs.cash_and_equivalents;

    CurrentMultiples {
        pe_ratio: positive(inputs.net_income).map(|ni| market_cap / ni),
        ev_ebitda: positive(inputs.ebitda).map(|e| enterprise_value / e),
        price_to_sales: positive(inputs.revenue).map(|r| market_cap / r),
        price_to_book: positive(inputs.book_value).map(|b| market_cap / b),
    }
}

/// Apply peer multiples without growth premia.
///
/// P/E: peer multiple x EPS. EV/EBITDA: peer multiple x EBITDA, with the
/// debt share of capital `D/E / (1 + D/E)` removed before dividing by the
/// share count. Negative D/E is treated as zero.
pub fn peer_multiple_valuation(inputs: &ValuationInputs, peers: &PeerMultiples) -> PeerMultipleValuation {
    let pe_value = peers
        .pe
        .and_then(positive)
        .zip(positive(inputs.net_income))
        .map(|(pe, ni)| pe * (ni / inputs.shares_outstanding));

    let ev_ebitda_value = peers
        .ev_ebitda
        .and_then(positive)
        .zip(positive(inputs.ebitda))
        .map(|(multiple, ebitda)| {
            let enterprise_value = multiple * ebitda;
            let leverage = inputs.debt_to_equity.max(Decimal::ZERO);
            let equity_value = enterprise_value / (Decimal::ONE + leverage);
            equity_value / inputs.shares_outstanding
        });

    PeerMultipleValuation {
        pe_value,
        ev_ebitda_value,
    }
}

/// Preferred analytical approaches for a company archetype. Types without
/// a dedicated entry use the mature profile.
pub fn recommended_methods(company_type: CompanyType) -> RecommendedMethods {
    use AnalysisApproach::*;
    let (primary, secondary, avoid) = match company_type {
        CompanyType::Startup => (vec![Dcf, PriceToSales], vec![EvToSales], vec![PeRatio, DividendDiscount]),
        CompanyType::Cyclical => (
            vec![EvToEbitda, PriceToBookNormalized],
            vec![DcfNormalized],
            vec![PeRatio],
        ),
        CompanyType::Bank => (
            vec![PriceToBook, PriceToTangibleBook],
            vec![DividendDiscount],
            vec![EvToEbitda],
        ),
        CompanyType::Mature | CompanyType::Growth | CompanyType::Reit | CompanyType::Utility => (
            vec![Dcf, PeRatio, DividendDiscount],
            vec![EvToEbitda, PriceToBook],
            vec![],
        ),
    };
    RecommendedMethods {
        primary,
        secondary,
        avoid,
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn growth_premium(growth: Rate, threshold: Rate, factor: Decimal) -> Decimal {
    if growth > threshold {
        Decimal::ONE + (growth - threshold) * factor
    } else {
        Decimal::ONE
    }
}

fn positive(x: Decimal) -> Option<Decimal> {
    (x > Decimal::ZERO).then_some(x)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use crate::valuation::inputs::tests::sample_data;
    use crate::valuation::inputs::FinancialData;

    fn inputs_with(f: impl FnOnce(&mut FinancialData)) -> ValuationInputs {
        let mut data = sample_data();
        f(&mut data);
        ValuationInputs::new(data).unwrap()
    }

    #[test]
    fn test_pe_without_growth_premium() {
        let inputs = inputs_with(|_| {});
        let r = pe_valuation(&inputs, &ComparableConfig::default());
        assert!(r.is_ok());
        assert_eq!(r.target_multiple, dec!(15));
        // EPS 1.8 x 15
        assert_eq!(r.fair_value, dec!(27));
    }

    #[test]
    fn test_pe_growth_premium() {
        let inputs = inputs_with(|d| d.revenue_growth_rate = dec!(0.10));
        let r = pe_valuation(&inputs, &ComparableConfig::default());
        assert_eq!(r.target_multiple, dec!(16.5));
        assert_eq!(r.fair_value, dec!(29.7));
    }

    #[test]
    fn test_pe_negative_earnings_fails_gracefully() {
        let inputs = inputs_with(|d| d.net_income = dec!(-10));
        let r = pe_valuation(&inputs, &ComparableConfig::default());
        assert_eq!(r.fair_value, Decimal::ZERO);
        assert!(r.error.unwrap().contains("Net income"));
    }

    #[test]
    fn test_ev_ebitda_bridge() {
        let inputs = inputs_with(|d| {
            d.total_debt = dec!(300);
            d.cash_and_equivalents = dec!(100);
        });
        let r = ev_ebitda_valuation(&inputs, &ComparableConfig::default());
        assert_eq!(r.enterprise_value, Some(dec!(2000)));
        // (2000 - 200) / 50
        assert_eq!(r.fair_value, dec!(36));
    }

    #[test]
    fn test_ev_ebitda_net_cash_adds_value() {
        let inputs = inputs_with(|d| d.cash_and_equivalents = dec!(500));
        let r = ev_ebitda_valuation(&inputs, &ComparableConfig::default());
        assert_eq!(r.fair_value, dec!(50));
    }

    #[test]
    fn test_ev_ebitda_growth_premium_and_equity_floor() {
        let inputs = inputs_with(|d| {
            d.ebitda_growth_rate = dec!(0.15);
            d.total_debt = dec!(10000);
        });
        let r = ev_ebitda_valuation(&inputs, &ComparableConfig::default());
        assert_eq!(r.target_multiple, dec!(11.5));
        assert_eq!(r.fair_value, Decimal::ZERO);
        assert!(r.is_ok());
    }

    #[test]
    fn test_ev_ebitda_requires_positive_ebitda() {
        let inputs = inputs_with(|d| d.ebitda = dec!(-5));
        let r = ev_ebitda_valuation(&inputs, &ComparableConfig::default());
        assert!(!r.is_ok());
        assert_eq!(r.fair_value, Decimal::ZERO);
    }

    #[test]
    fn test_pb_roe_premium() {
        let plain = pb_valuation(&inputs_with(|_| {}), &ComparableConfig::default());
        // ROE exactly 0.15: no premium, 12 x 2
        assert_eq!(plain.roe, Some(dec!(0.15)));
        assert_eq!(plain.fair_value, dec!(24));

        let rich = pb_valuation(&inputs_with(|d| d.net_income = dec!(150)), &ComparableConfig::default());
        // ROE 0.25 -> 2 x 1.10
        assert_eq!(rich.target_multiple, dec!(2.2));
        assert_eq!(rich.fair_value, dec!(26.4));
    }

    #[test]
    fn test_pb_requires_positive_book() {
        let r = pb_valuation(&inputs_with(|d| d.book_value = Decimal::ZERO), &ComparableConfig::default());
        assert!(r.error.is_some());
    }

    #[test]
    fn test_run_comparables_collects_failures_as_warnings() {
        let inputs = inputs_with(|d| d.net_income = dec!(-1));
        let out = run_comparables(&inputs, &ComparableConfig::default());
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].starts_with("P/E Comparable"));
        assert!(out.result.ev_ebitda.is_ok());
    }

    #[test]
    fn test_current_multiples() {
        let inputs = inputs_with(|d| d.net_income = Decimal::ZERO);
        let m = current_multiples(&inputs, dec!(20));
        assert_eq!(m.pe_ratio, None);
        assert_eq!(m.ev_ebitda, Some(dec!(5)));
        assert_eq!(m.price_to_sales, Some(dec!(1)));
        assert_eq!(m.price_to_book, Some(dec!(1000) / dec!(600)));
    }

    #[test]
    fn test_peer_multiples_applied_directly() {
        // growth above the premium threshold must not lift peer values
        let inputs = inputs_with(|d| {
            d.revenue_growth_rate = dec!(0.20);
            d.ebitda_growth_rate = dec!(0.20);
        });
        let peers = PeerMultiples {
            pe: Some(dec!(20)),
            ev_ebitda: Some(dec!(13)),
        };
        let v = peer_multiple_valuation(&inputs, &peers);
        // EPS 1.8 x 20
        assert_eq!(v.pe_value, Some(dec!(36)));
        // 200 x 13 = 2600, D/E 0.3 -> equity 2000, / 50
        assert_eq!(v.ev_ebitda_value, Some(dec!(40)));
    }

    #[test]
    fn test_peer_multiples_skip_unusable_entries() {
        let inputs = inputs_with(|d| d.net_income = dec!(-5));
        let peers = PeerMultiples {
            pe: Some(dec!(18)),
            ev_ebitda: Some(Decimal::ZERO),
        };
        assert_eq!(peer_multiple_valuation(&inputs, &peers), PeerMultipleValuation::default());
        assert_eq!(
            peer_multiple_valuation(&inputs_with(|_| {}), &PeerMultiples::default()),
            PeerMultipleValuation::default()
        );
    }

    #[test]
    fn test_peer_multiples_accept_pe_ratio_key() {
        let peers: PeerMultiples = serde_json::from_str(r#"{"pe_ratio": "12.5"}"#).unwrap();
        assert_eq!(peers.pe, Some(dec!(12.5)));
        assert!(peers.ev_ebitda.is_none());
        assert!(!peers.is_empty());
    }

    #[test]
    fn test_recommended_methods() {
        let bank = recommended_methods(CompanyType::Bank);
        assert!(bank.avoid.contains(&AnalysisApproach::EvToEbitda));
        assert_eq!(recommended_methods(CompanyType::Utility), recommended_methods(CompanyType::Mature));
    }
}
