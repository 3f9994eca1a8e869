use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::fundamentals::MarketSnapshot;
use crate::types::{CompanyType, Money, Multiple, Rate};

use super::inputs::ValuationInputs;

const CONFIDENCE_CAP: Decimal = dec!(0.95);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Metrics the classification rules look at. `None` means "not reported";
/// the classifier substitutes a neutral default instead of failing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub pe_ratio: Option<Multiple>,
    pub market_cap: Option<Money>,
    pub dividend_yield: Option<Rate>,
    pub beta: Option<Decimal>,
    pub debt_to_equity: Option<Decimal>,
    pub revenue_growth: Option<Rate>,
    pub profit_margin: Option<Rate>,
    pub operating_margin: Option<Rate>,
}

impl ClassificationMetrics {
    /// Combine validated financials with market context. Market-reported
    /// figures win; otherwise ratios are derived from the financials.
    pub fn from_inputs(inputs: &ValuationInputs, snapshot: &MarketSnapshot) -> Self {
        let derived_margin = if inputs.revenue > Decimal::ZERO {
            Some(inputs.net_income / inputs.revenue)
        } else {
            None
        };
        Self {
            pe_ratio: snapshot.pe_ratio,
            market_cap: snapshot.market_cap,
            dividend_yield: snapshot.dividend_yield,
            beta: Some(inputs.beta),
            debt_to_equity: Some(inputs.debt_to_equity),
            revenue_growth: snapshot.revenue_growth_5y.or(Some(inputs.revenue_growth_rate)),
            profit_margin: snapshot.profit_margin.or(derived_margin),
            operating_margin: Some(inputs.operating_margin),
        }
    }
}

/// Metric a rule can test. Some metrics are never supplied by the
/// fundamentals feed; rules on them count toward the total but cannot match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    PeRatio,
    MarketCap,
    DividendYield,
    Beta,
    DebtToEquity,
    RevenueGrowth,
    ProfitMargin,
    InterestIncomeRatio,
    LoanToDeposit,
    OperatingMarginVolatility,
}

/// Inclusive range check; `max == None` is unbounded.
#[derive(Debug, Clone, Copy)]
pub struct RangeRule {
    pub metric: Metric,
    pub min: Decimal,
    pub max: Option<Decimal>,
}

const fn between(metric: Metric, min: Decimal, max: Decimal) -> RangeRule {
    RangeRule {
        metric,
        min,
        max: Some(max),
    }
}

const fn at_least(metric: Metric, min: Decimal) -> RangeRule {
    RangeRule {
        metric,
        min,
        max: None,
    }
}

/// Rule set for one archetype.
#[derive(Debug, Clone, Copy)]
pub struct TypeRules {
    pub company_type: CompanyType,
    pub sector_keywords: &'static [&'static str],
    pub ranges: &'static [RangeRule],
}

/// Evaluated in this order; ties are resolved to `Mature` regardless.
pub const CLASSIFICATION_RULES: [TypeRules; 7] = [
    TypeRules {
        company_type: CompanyType::Bank,
        sector_keywords: &["financial", "bank", "insurance"],
        ranges: &[
            at_least(Metric::InterestIncomeRatio, dec!(0.5)),
            between(Metric::LoanToDeposit, dec!(0.3), dec!(2.0)),
        ],
    },
    TypeRules {
        company_type: CompanyType::Reit,
        sector_keywords: &["reit", "real estate"],
        ranges: &[
            between(Metric::DividendYield, dec!(0.03), dec!(0.12)),
            between(Metric::DebtToEquity, dec!(0.5), dec!(3.0)),
        ],
    },
    TypeRules {
        company_type: CompanyType::Utility,
        sector_keywords: &["utilities", "electric", "gas", "water"],
        ranges: &[
            between(Metric::DividendYield, dec!(0.025), dec!(0.08)),
            between(Metric::Beta, dec!(0.3), dec!(0.8)),
            between(Metric::DebtToEquity, dec!(0.4), dec!(1.5)),
        ],
    },
    TypeRules {
        company_type: CompanyType::Startup,
        sector_keywords: &[],
        ranges: &[
            at_least(Metric::PeRatio, dec!(30)),
            at_least(Metric::RevenueGrowth, dec!(0.20)),
            between(Metric::DividendYield, dec!(0), dec!(0.02)),
            between(Metric::MarketCap, dec!(0), dec!(10_000_000_000)),
        ],
    },
    TypeRules {
        company_type: CompanyType::Growth,
        sector_keywords: &[],
        ranges: &[
            between(Metric::PeRatio, dec!(20), dec!(50)),
            between(Metric::RevenueGrowth, dec!(0.10), dec!(0.30)),
            between(Metric::ProfitMargin, dec!(0.05), dec!(0.25)),
            between(Metric::DividendYield, dec!(0), dec!(0.03)),
        ],
    },
    TypeRules {
        company_type: CompanyType::Mature,
        sector_keywords: &[],
        ranges: &[
            between(Metric::PeRatio, dec!(8), dec!(25)),
            between(Metric::RevenueGrowth, dec!(0), dec!(0.15)),
            between(Metric::DividendYield, dec!(0.02), dec!(0.08)),
            at_least(Metric::MarketCap, dec!(1_000_000_000)),
        ],
    },
    TypeRules {
        company_type: CompanyType::Cyclical,
        sector_keywords: &["materials", "energy", "industrials", "mining"],
        ranges: &[
            between(Metric::Beta, dec!(1.2), dec!(2.5)),
            between(Metric::DebtToEquity, dec!(0.3), dec!(2.0)),
            at_least(Metric::OperatingMarginVolatility, dec!(0.05)),
        ],
    },
];

/// Score of one archetype against the metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeScore {
    pub company_type: CompanyType,
    pub matches: u32,
    pub total_checks: u32,
    pub confidence: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub company_type: CompanyType,
    /// matches / checks of the winning type, capped at 0.95
    pub confidence: Decimal,
    pub scores: Vec<TypeScore>,
}

/// Read-only company context shared by the discount-rate and risk stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub ticker: String,
    pub company_type: CompanyType,
    pub sector: String,
    pub industry: String,
    pub market_cap: Money,
    pub revenue_growth_5y: Rate,
    pub profit_margin: Rate,
    pub debt_to_equity: Decimal,
    pub dividend_yield: Rate,
    pub beta: Decimal,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Rule-based archetype inference. Always succeeds.
pub fn classify_company(metrics: &ClassificationMetrics, sector: &str) -> Classification {
    let sector_lower = sector.to_lowercase();
    let scores: Vec<TypeScore> = CLASSIFICATION_RULES
        .iter()
        .map(|rules| score_type(rules, metrics, &sector_lower))
        .collect();

    let best = scores
        .iter()
        .map(|s| s.confidence)
        .max()
        .unwrap_or(Decimal::ZERO);
    let leaders: Vec<&TypeScore> = scores.iter().filter(|s| s.confidence == best).collect();

    let company_type = match leaders.as_slice() {
        [only] if best > Decimal::ZERO => only.company_type,
        _ => CompanyType::Mature,
    };
    tracing::debug!(%company_type, confidence = %best, sector, "company classified");

    Classification {
        company_type,
        confidence: best.min(CONFIDENCE_CAP),
        scores,
    }
}

/// Classify and assemble the profile consumed by WACC and risk scoring.
pub fn build_profile(inputs: &ValuationInputs, snapshot: &MarketSnapshot) -> (CompanyProfile, Classification) {
    let metrics = ClassificationMetrics::from_inputs(inputs, snapshot);
    let classification = classify_company(&metrics, &snapshot.sector);
    let profile = CompanyProfile {
        ticker: snapshot.ticker.clone(),
        company_type: classification.company_type,
        sector: snapshot.sector.clone(),
        industry: snapshot.industry.clone(),
        market_cap: metric_or_default(&metrics, Metric::MarketCap).unwrap_or_default(),
        revenue_growth_5y: metric_or_default(&metrics, Metric::RevenueGrowth).unwrap_or_default(),
        profit_margin: metric_or_default(&metrics, Metric::ProfitMargin).unwrap_or_default(),
        debt_to_equity: inputs.debt_to_equity,
        dividend_yield: metric_or_default(&metrics, Metric::DividendYield).unwrap_or_default(),
        beta: inputs.beta,
    };
    (profile, classification)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn score_type(rules: &TypeRules, metrics: &ClassificationMetrics, sector_lower: &str) -> TypeScore {
    let mut matches = 0u32;
    let mut total_checks = 0u32;

    if !rules.sector_keywords.is_empty() {
        total_checks += 1;
        if rules.sector_keywords.iter().any(|k| sector_lower.contains(k)) {
            matches += 1;
        }
    }

    for rule in rules.ranges {
        total_checks += 1;
        let in_range = metric_or_default(metrics, rule.metric)
            .map(|v| v >= rule.min && rule.max.map_or(true, |max| v <= max))
            .unwrap_or(false);
        if in_range {
            matches += 1;
        }
    }

    let confidence = Decimal::from(matches) / Decimal::from(total_checks.max(1));
    TypeScore {
        company_type: rules.company_type,
        matches,
        total_checks,
        confidence,
    }
}

/// Reported value or neutral default; `None` for metrics the feed never has.
fn metric_or_default(metrics: &ClassificationMetrics, metric: Metric) -> Option<Decimal> {
    match metric {
        Metric::PeRatio => Some(metrics.pe_ratio.unwrap_or(dec!(15))),
        Metric::MarketCap => Some(metrics.market_cap.unwrap_or(dec!(1_000_000_000))),
        Metric::DividendYield => Some(metrics.dividend_yield.unwrap_or(Decimal::ZERO)),
        Metric::Beta => Some(metrics.beta.unwrap_or(Decimal::ONE)),
        Metric::DebtToEquity => Some(metrics.debt_to_equity.unwrap_or(dec!(0.5))),
        Metric::RevenueGrowth => Some(metrics.revenue_growth.unwrap_or(dec!(0.05))),
        Metric::ProfitMargin => Some(metrics.profit_margin.unwrap_or(dec!(0.05))),
        Metric::InterestIncomeRatio | Metric::LoanToDeposit | Metric::OperatingMarginVolatility => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_defaults_classify_as_mature() {
        let result = classify_company(&ClassificationMetrics::default(), "");
        assert_eq!(result.company_type, CompanyType::Mature);
        assert_eq!(result.confidence, dec!(0.75));
    }

    #[test]
    fn test_high_growth_small_cap_is_startup() {
        let metrics = ClassificationMetrics {
            pe_ratio: Some(dec!(80)),
            market_cap: Some(dec!(800_000_000)),
            dividend_yield: Some(Decimal::ZERO),
            revenue_growth: Some(dec!(0.45)),
            ..Default::default()
        };
        let result = classify_company(&metrics, "Technology");
        assert_eq!(result.company_type, CompanyType::Startup);
        assert_eq!(result.confidence, dec!(0.95));
    }

    #[test]
    fn test_utility_sector_and_ratios() {
        let metrics = ClassificationMetrics {
            dividend_yield: Some(dec!(0.04)),
            beta: Some(dec!(0.5)),
            debt_to_equity: Some(dec!(1.1)),
            pe_ratio: Some(dec!(30)),
            ..Default::default()
        };
        let result = classify_company(&metrics, "Utilities - Regulated Electric");
        assert_eq!(result.company_type, CompanyType::Utility);
    }

    #[test]
    fn test_unavailable_metrics_count_as_checks() {
        let result = classify_company(&ClassificationMetrics::default(), "Banks");
        let bank = result
            .scores
            .iter()
            .find(|s| s.company_type == CompanyType::Bank)
            .unwrap();
        assert_eq!(bank.total_checks, 3);
        assert_eq!(bank.matches, 1);
    }

    #[test]
    fn test_tie_resolves_to_mature() {
        let metrics = ClassificationMetrics {
            pe_ratio: Some(dec!(35)),
            market_cap: Some(dec!(5_000_000_000)),
            dividend_yield: Some(Decimal::ZERO),
            revenue_growth: Some(dec!(0.25)),
            profit_margin: Some(dec!(0.01)),
            ..Default::default()
        };
        let result = classify_company(&metrics, "");
        let conf = |t: CompanyType| {
            result
                .scores
                .iter()
                .find(|s| s.company_type == t)
                .map(|s| s.confidence)
                .unwrap()
        };
        assert_eq!(conf(CompanyType::Startup), Decimal::ONE);
        assert_eq!(conf(CompanyType::Growth), dec!(0.75));
        assert_eq!(result.company_type, CompanyType::Startup);

        // Above $10B the startup check drops to 0.75, level with growth.
        let tied = ClassificationMetrics {
            pe_ratio: Some(dec!(35)),
            market_cap: Some(dec!(12_000_000_000)),
            ..metrics
        };
        let result = classify_company(&tied, "");
        assert_eq!(result.company_type, CompanyType::Mature);
    }
}
