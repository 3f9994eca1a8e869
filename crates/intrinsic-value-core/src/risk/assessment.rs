//! Multi-factor risk scoring.
//!
//! Four categories are scored independently on a 0-100 scale (higher is
//! riskier): financial, business, market and liquidity. The overall score is
//! their weighted sum and is bucketed into a [`RiskLevel`]. All arithmetic
//! uses `rust_decimal::Decimal`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::{RiskConfig, RiskThresholds};
use crate::types::{with_metadata, CompanyType, ComputationOutput};
use crate::valuation::classifier::CompanyProfile;
use crate::valuation::inputs::ValuationInputs;

const MAX_SCORE: Decimal = dec!(100);
const MAX_KEY_FACTORS: usize = 5;

/// Sector keywords carrying an extra market-risk charge.
pub const HIGH_VOLATILITY_SECTORS: [&str; 4] = ["technology", "biotech", "mining", "oil"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn from_score(score: Decimal, thresholds: &RiskThresholds) -> Self {
        if score < thresholds.low {
            RiskLevel::VeryLow
        } else if score < thresholds.medium {
            RiskLevel::Low
        } else if score < thresholds.high {
            RiskLevel::Medium
        } else if score < thresholds.very_high {
            RiskLevel::High
        } else {
            RiskLevel::VeryHigh
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::VeryLow => "very low",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::VeryHigh => "very high",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Financial,
    Business,
    Market,
    Liquidity,
}

/// One rule that contributed points to a category score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskTrigger {
    pub category: RiskCategory,
    pub description: String,
    pub points: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskBreakdown {
    pub financial_risk: Decimal,
    pub business_risk: Decimal,
    pub market_risk: Decimal,
    pub liquidity_risk: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_risk_score: Decimal,
    pub risk_level: RiskLevel,
    pub risk_breakdown: RiskBreakdown,
    /// At most five, most material first
    pub key_risk_factors: Vec<String>,
    pub risk_mitigation_suggestions: Vec<String>,
    pub triggers: Vec<RiskTrigger>,
}

// ---------------------------------------------------------------------------
// Scoring tables
// ---------------------------------------------------------------------------

/// Starting business-risk score per company archetype.
pub fn business_base_score(company_type: CompanyType) -> Decimal {
    match company_type {
        CompanyType::Startup => dec!(60),
        CompanyType::Growth => dec!(40),
        CompanyType::Cyclical => dec!(50),
        CompanyType::Mature => dec!(20),
        CompanyType::Utility => dec!(15),
        CompanyType::Bank => dec!(35),
        CompanyType::Reit => dec!(25),
    }
}

fn trigger(
    triggers: &mut Vec<RiskTrigger>,
    category: RiskCategory,
    description: String,
    points: Decimal,
) -> Decimal {
    triggers.push(RiskTrigger {
        category,
        description,
        points,
    });
    points
}

// ---------------------------------------------------------------------------
// Category scores
// ---------------------------------------------------------------------------

/// Leverage, coverage, margin and cash-generation checks.
pub fn financial_risk(inputs: &ValuationInputs, triggers: &mut Vec<RiskTrigger>) -> Decimal {
    let cat = RiskCategory::Financial;
    let mut score = Decimal::ZERO;

    let de = inputs.debt_to_equity;
    if de > dec!(2.0) {
        score += trigger(triggers, cat, format!("Debt-to-equity {de} above 2.0"), dec!(25));
    } else if de > dec!(1.0) {
        score += trigger(triggers, cat, format!("Debt-to-equity {de} above 1.0"), dec!(15));
    } else if de > dec!(0.5) {
        score += trigger(triggers, cat, format!("Debt-to-equity {de} above 0.5"), dec!(5));
    }

    let ic = inputs.interest_coverage;
    if ic < dec!(2.0) {
        score += trigger(triggers, cat, format!("Interest coverage {ic} below 2.0"), dec!(25));
    } else if ic < dec!(5.0) {
        score += trigger(triggers, cat, format!("Interest coverage {ic} below 5.0"), dec!(10));
    }

    let margin = inputs.operating_margin;
    if margin < Decimal::ZERO {
        score += trigger(triggers, cat, format!("Negative operating margin {margin}"), dec!(20));
    } else if margin < dec!(0.05) {
        score += trigger(triggers, cat, format!("Thin operating margin {margin}"), dec!(10));
    }

    let fcf = inputs.free_cash_flow;
    if fcf <= Decimal::ZERO {
        score += trigger(triggers, cat, format!("Free cash flow {fcf} is not positive"), dec!(20));
    } else if fcf < inputs.capex {
        score += trigger(triggers, cat, format!("Free cash flow {fcf} below capex {}", inputs.capex), dec!(10));
    }

    score.min(MAX_SCORE)
}

/// Archetype base score adjusted for beta.
pub fn business_risk(profile: &CompanyProfile, triggers: &mut Vec<RiskTrigger>) -> Decimal {
    let cat = RiskCategory::Business;
    let mut score = trigger(
        triggers,
        cat,
        format!("Base score for {} company", profile.company_type),
        business_base_score(profile.company_type),
    );

    let beta = profile.beta;
    if beta > dec!(1.5) {
        score += trigger(triggers, cat, format!("Beta {beta} above 1.5"), dec!(15));
    } else if beta > dec!(1.2) {
        score += trigger(triggers, cat, format!("Beta {beta} above 1.2"), dec!(10));
    } else if beta < dec!(0.8) {
        score += trigger(triggers, cat, format!("Beta {beta} below 0.8"), dec!(-5));
    }

    score.min(MAX_SCORE)
}

/// Size and sector exposure on top of a base of 30.
pub fn market_risk(profile: &CompanyProfile, triggers: &mut Vec<RiskTrigger>) -> Decimal {
    let cat = RiskCategory::Market;
    let mut score = dec!(30);

    let cap = profile.market_cap;
    if cap < dec!(1_000_000_000) {
        score += trigger(triggers, cat, "Market cap below $1B".into(), dec!(20));
    } else if cap < dec!(10_000_000_000) {
        score += trigger(triggers, cat, "Market cap below $10B".into(), dec!(10));
    }

    let sector = profile.sector.to_lowercase();
    if let Some(hit) = HIGH_VOLATILITY_SECTORS.iter().find(|s| sector.contains(*s)) {
        score += trigger(triggers, cat, format!("High-volatility sector ({hit})"), dec!(15));
    }

    score.min(MAX_SCORE)
}

/// Cash cover relative to debt (or 10% of revenue when larger) and working
/// capital sign.
pub fn liquidity_risk(inputs: &ValuationInputs, triggers: &mut Vec<RiskTrigger>) -> Decimal {
    let cat = RiskCategory::Liquidity;
    let mut score = Decimal::ZERO;

    let denominator = inputs.total_debt.max(inputs.revenue * dec!(0.1));
    if denominator > Decimal::ZERO {
        let cash_ratio = inputs.cash_and_equivalents / denominator;
        if cash_ratio < dec!(0.1) {
            score += trigger(triggers, cat, format!("Cash ratio {} below 0.1", cash_ratio.round_dp(3)), dec!(30));
        } else if cash_ratio < dec!(0.3) {
            score += trigger(triggers, cat, format!("Cash ratio {} below 0.3", cash_ratio.round_dp(3)), dec!(15));
        }
    }

    if inputs.working_capital < Decimal::ZERO {
        score += trigger(triggers, cat, "Negative working capital".into(), dec!(25));
    }

    score.min(MAX_SCORE)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Score all four categories and derive level, key factors and mitigations.
pub fn assess_risk(inputs: &ValuationInputs, profile: &CompanyProfile, config: &RiskConfig) -> RiskAssessment {
    let mut triggers = Vec::new();
    let breakdown = RiskBreakdown {
        financial_risk: financial_risk(inputs, &mut triggers),
        business_risk: business_risk(profile, &mut triggers),
        market_risk: market_risk(profile, &mut triggers),
        liquidity_risk: liquidity_risk(inputs, &mut triggers),
    };

    let w = &config.category_weights;
    let overall = breakdown.financial_risk * w.financial
        + breakdown.business_risk * w.business
        + breakdown.market_risk * w.market
        + breakdown.liquidity_risk * w.liquidity;
    let risk_level = RiskLevel::from_score(overall, &config.thresholds);

    tracing::debug!(
        overall = %overall,
        level = %risk_level,
        financial = %breakdown.financial_risk,
        business = %breakdown.business_risk,
        market = %breakdown.market_risk,
        liquidity = %breakdown.liquidity_risk,
        "risk assessed"
    );

    RiskAssessment {
        overall_risk_score: overall,
        risk_level,
        key_risk_factors: key_risk_factors(&breakdown, inputs, profile),
        risk_mitigation_suggestions: mitigations(&breakdown),
        risk_breakdown: breakdown,
        triggers,
    }
}

/// [`assess_risk`] wrapped in the standard output envelope.
pub fn run_risk_assessment(
    inputs: &ValuationInputs,
    profile: &CompanyProfile,
    config: &RiskConfig,
) -> ComputationOutput<RiskAssessment> {
    let start = Instant::now();
    let assessment = assess_risk(inputs, profile, config);
    let mut warnings = Vec::new();
    if assessment.risk_level >= RiskLevel::High {
        warnings.push(format!(
            "Overall risk is {} (score {})",
            assessment.risk_level,
            assessment.overall_risk_score.round_dp(1)
        ));
    }

    let elapsed = start.elapsed().as_micros() as u64;
    with_metadata(
        "Weighted four-factor risk score (financial, business, market, liquidity)",
        config,
        warnings,
        elapsed,
        assessment,
    )
}

// ---------------------------------------------------------------------------
// Narrative
// ---------------------------------------------------------------------------

fn key_risk_factors(b: &RiskBreakdown, inputs: &ValuationInputs, profile: &CompanyProfile) -> Vec<String> {
    let mut factors = Vec::new();

    if b.financial_risk > dec!(50) {
        if inputs.debt_to_equity > dec!(1.5) {
            factors.push("High debt levels relative to equity".to_string());
        }
        if inputs.interest_coverage < dec!(3.0) {
            factors.push("Low interest coverage ratio".to_string());
        }
        if inputs.free_cash_flow <= Decimal::ZERO {
            factors.push("Negative or zero free cash flow".to_string());
        }
    }
    if b.business_risk > dec!(60) {
        factors.push(format!("High business risk due to {} nature", profile.company_type));
        if profile.beta > dec!(1.5) {
            factors.push("High stock price volatility".to_string());
        }
    }
    if b.market_risk > dec!(50) && profile.market_cap < dec!(1_000_000_000) {
        factors.push("Small company size increases volatility".to_string());
    }

    factors.truncate(MAX_KEY_FACTORS);
    factors
}

fn mitigations(b: &RiskBreakdown) -> Vec<String> {
    let mut out = Vec::new();
    if b.financial_risk > dec!(40) {
        out.push("Monitor debt levels and cash flow trends closely".to_string());
        out.push("Consider position sizing based on financial strength".to_string());
    }
    if b.business_risk > dec!(50) {
        out.push("Diversify across different business models".to_string());
        out.push("Monitor competitive positioning regularly".to_string());
    }
    if b.market_risk > dec!(60) {
        out.push("Consider hedging strategies for market exposure".to_string());
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::inputs::tests::sample_data;
    use crate::valuation::inputs::FinancialData;

    fn inputs_with(f: impl FnOnce(&mut FinancialData)) -> ValuationInputs {
        let mut data = sample_data();
        f(&mut data);
        ValuationInputs::new(data).unwrap()
    }

    fn profile(company_type: CompanyType, beta: Decimal, market_cap: Decimal, sector: &str) -> CompanyProfile {
        CompanyProfile {
            ticker: "TEST".into(),
            company_type,
            sector: sector.into(),
            industry: String::new(),
            market_cap,
            revenue_growth_5y: dec!(0.05),
            profit_margin: dec!(0.09),
            debt_to_equity: dec!(0.3),
            dividend_yield: dec!(0.02),
            beta,
        }
    }

    #[test]
    fn test_financial_risk_all_conditions_trigger() {
        let inputs = inputs_with(|d| {
            d.debt_to_equity = dec!(3.0);
            d.interest_coverage = dec!(1.5);
            d.operating_margin = dec!(-0.02);
            d.free_cash_flow = dec!(-10);
        });
        let mut t = Vec::new();
        let score = financial_risk(&inputs, &mut t);
        assert_eq!(t.len(), 4);
        // 25 + 25 + 20 + 20
        assert_eq!(score, dec!(90));
        assert_eq!(t.iter().map(|x| x.points).sum::<Decimal>(), score);
    }

    #[test]
    fn test_financial_risk_clean_company() {
        let mut t = Vec::new();
        assert_eq!(financial_risk(&inputs_with(|_| {}), &mut t), Decimal::ZERO);
        assert!(t.is_empty());
    }

    #[test]
    fn test_fcf_below_capex() {
        let inputs = inputs_with(|d| d.free_cash_flow = dec!(30));
        let mut t = Vec::new();
        assert_eq!(financial_risk(&inputs, &mut t), dec!(10));
    }

    #[test]
    fn test_business_risk_table_and_beta() {
        let mut t = Vec::new();
        assert_eq!(business_risk(&profile(CompanyType::Startup, dec!(1.6), dec!(500_000_000), ""), &mut t), dec!(75));
        assert_eq!(business_risk(&profile(CompanyType::Utility, dec!(0.6), dec!(500_000_000), ""), &mut t), dec!(10));
        assert_eq!(business_risk(&profile(CompanyType::Bank, dec!(1.3), dec!(500_000_000), ""), &mut t), dec!(45));
    }

    #[test]
    fn test_market_risk_size_and_sector() {
        let mut t = Vec::new();
        let small_tech = profile(CompanyType::Growth, dec!(1), dec!(500_000_000), "Information Technology");
        assert_eq!(market_risk(&small_tech, &mut t), dec!(65));
        let mid = profile(CompanyType::Mature, dec!(1), dec!(5_000_000_000), "Consumer Staples");
        assert_eq!(market_risk(&mid, &mut t), dec!(40));
        let large = profile(CompanyType::Mature, dec!(1), dec!(50_000_000_000), "Consumer Staples");
        assert_eq!(market_risk(&large, &mut t), dec!(30));
    }

    #[test]
    fn test_liquidity_risk() {
        let mut t = Vec::new();
        // no cash, revenue-based denominator 100
        assert_eq!(liquidity_risk(&inputs_with(|_| {}), &mut t), dec!(30));
        let ok = inputs_with(|d| d.cash_and_equivalents = dec!(20));
        assert_eq!(liquidity_risk(&ok, &mut t), dec!(15));
        let strained = inputs_with(|d| {
            d.cash_and_equivalents = dec!(50);
            d.working_capital = dec!(-10);
        });
        assert_eq!(liquidity_risk(&strained, &mut t), dec!(25));
    }

    #[test]
    fn test_level_buckets() {
        let th = RiskThresholds::default();
        assert_eq!(RiskLevel::from_score(dec!(19.9), &th), RiskLevel::VeryLow);
        assert_eq!(RiskLevel::from_score(dec!(20), &th), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(dec!(54.99), &th), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(dec!(55), &th), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(dec!(75), &th), RiskLevel::VeryHigh);
    }

    #[test]
    fn test_overall_weighting() {
        let inputs = inputs_with(|d| d.cash_and_equivalents = dec!(50));
        let p = profile(CompanyType::Mature, dec!(1), dec!(50_000_000_000), "Consumer Staples");
        let a = assess_risk(&inputs, &p, &RiskConfig::default());
        // 0*0.4 + 20*0.3 + 30*0.2 + 0*0.1
        assert_eq!(a.overall_risk_score, dec!(12));
        assert_eq!(a.risk_level, RiskLevel::VeryLow);
        assert!(a.key_risk_factors.is_empty());
        assert!(a.risk_mitigation_suggestions.is_empty());
    }

    #[test]
    fn test_distressed_startup_narrative() {
        let inputs = inputs_with(|d| {
            d.debt_to_equity = dec!(2.5);
            d.interest_coverage = dec!(1.0);
            d.free_cash_flow = dec!(-5);
        });
        let p = profile(CompanyType::Startup, dec!(1.8), dec!(200_000_000), "Biotech");
        let a = assess_risk(&inputs, &p, &RiskConfig::default());
        assert_eq!(a.key_risk_factors.len(), 5);
        assert_eq!(a.key_risk_factors[0], "High debt levels relative to equity");
        assert!(a.risk_level >= RiskLevel::High);
        assert_eq!(a.risk_mitigation_suggestions.len(), 5);
    }
}
