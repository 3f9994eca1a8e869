use std::ops::Deref;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::config::ValuationConfig;
use crate::error::IntrinsicValueError;
use crate::fundamentals::Fundamentals;
use crate::types::{Money, Multiple, Rate};
use crate::IntrinsicValueResult;

const REVENUE_GROWTH_BOUNDS: (Rate, Rate) = (dec!(-0.50), dec!(1.00));
const EBITDA_GROWTH_BOUNDS: (Rate, Rate) = (dec!(-0.75), dec!(1.50));
/// Upper bound on terminal growth when no config is supplied.
pub const DEFAULT_TERMINAL_GROWTH_CAP: Rate = dec!(0.05);

/// Raw financial record, before validation and normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialData {
    // Core financials
    pub revenue: Money,
    pub ebitda: Money,
    pub net_income: Money,
    pub free_cash_flow: Money,
    pub book_value: Money,
    pub dividend_per_share: Money,
    pub shares_outstanding: Decimal,
    // Growth and profitability
    pub revenue_growth_rate: Rate,
    pub ebitda_growth_rate: Rate,
    pub terminal_growth_rate: Rate,
    pub operating_margin: Rate,
    pub tax_rate: Rate,
    // Balance sheet
    pub total_debt: Money,
    pub cash_and_equivalents: Money,
    pub working_capital: Money,
    pub capex: Money,
    // Risk metrics
    pub beta: Decimal,
    pub debt_to_equity: Decimal,
    pub interest_coverage: Decimal,
    // Industry benchmarks
    #[serde(default = "default_industry_pe")]
    pub industry_pe: Multiple,
    #[serde(default = "default_industry_ev_ebitda")]
    pub industry_ev_ebitda: Multiple,
    #[serde(default = "default_industry_growth_rate")]
    pub industry_growth_rate: Rate,
}

fn default_industry_pe() -> Multiple {
    dec!(15)
}

fn default_industry_ev_ebitda() -> Multiple {
    dec!(10)
}

fn default_industry_growth_rate() -> Rate {
    dec!(0.05)
}

impl FinancialData {
    /// Build a record from a fundamentals map. Missing optional fields take
    /// neutral defaults; missing revenue or share count become zero and are
    /// rejected later by [`ValuationInputs::new`].
    pub fn from_fundamentals(f: &Fundamentals, config: &ValuationConfig) -> Self {
        Self {
            revenue: f.decimal_or("revenue", Decimal::ZERO),
            ebitda: f.decimal_or("ebitda", Decimal::ZERO),
            net_income: f.decimal_or("net_income", Decimal::ZERO),
            free_cash_flow: f.decimal_or("free_cash_flow", Decimal::ZERO),
            book_value: f.decimal_or("book_value", Decimal::ZERO),
            dividend_per_share: f.decimal_or("dividend_per_share", Decimal::ZERO),
            shares_outstanding: f.decimal_or("shares_outstanding", Decimal::ZERO),
            revenue_growth_rate: f.decimal_or("revenue_growth_rate", dec!(0.05)),
            ebitda_growth_rate: f.decimal_or("ebitda_growth_rate", dec!(0.05)),
            terminal_growth_rate: f.decimal_or("terminal_growth_rate", dec!(0.025)),
            operating_margin: f.decimal_or("operating_margin", dec!(0.08)),
            tax_rate: f.decimal_or("tax_rate", config.market.default_tax_rate),
            total_debt: f.decimal_or("total_debt", Decimal::ZERO),
            cash_and_equivalents: f.decimal_or("cash_and_equivalents", Decimal::ZERO),
            working_capital: f.decimal_or("working_capital", Decimal::ZERO),
            capex: f.decimal_or("capex", Decimal::ZERO),
            beta: f.decimal_or("beta", Decimal::ONE),
            debt_to_equity: f.decimal_or("debt_to_equity", dec!(0.5)),
            interest_coverage: f.decimal_or("interest_coverage", dec!(8)),
            industry_pe: f.decimal_or("industry_pe", config.comparables.pe_default),
            industry_ev_ebitda: f.decimal_or("industry_ev_ebitda", config.comparables.ev_ebitda_default),
            industry_growth_rate: f.decimal_or("industry_growth_rate", default_industry_growth_rate()),
        }
    }
}

/// Validated, bounds-normalised valuation inputs.
///
/// The only way to obtain one is through [`ValuationInputs::new`] (or
/// `TryFrom<FinancialData>`), so every instance satisfies
/// `shares_outstanding > 0`, `revenue > 0` and the growth-rate bounds.
/// Fields are read through `Deref`; there is no mutable access.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuationInputs {
    data: FinancialData,
    warnings: Vec<String>,
    terminal_growth_cap: Rate,
}

impl ValuationInputs {
    /// Validate with the default terminal-growth range [0, 5%].
    pub fn new(data: FinancialData) -> IntrinsicValueResult<Self> {
        Self::with_terminal_growth_cap(data, DEFAULT_TERMINAL_GROWTH_CAP)
    }

    /// Validate, clamping terminal growth into `[0, terminal_growth_cap]`.
    pub fn with_terminal_growth_cap(mut data: FinancialData, terminal_growth_cap: Rate) -> IntrinsicValueResult<Self> {
        let mut violations = Vec::new();
        if data.shares_outstanding <= Decimal::ZERO {
            violations.push("Shares outstanding must be positive".to_string());
        }
        if data.revenue <= Decimal::ZERO {
            violations.push("Revenue must be positive".to_string());
        }
        if !violations.is_empty() {
            return Err(IntrinsicValueError::Validation { violations });
        }

        let mut warnings = Vec::new();
        if data.ebitda > data.revenue {
            let msg = format!("EBITDA ({}) exceeds revenue ({})", data.ebitda, data.revenue);
            tracing::warn!(ebitda = %data.ebitda, revenue = %data.revenue, "{msg}");
            warnings.push(msg);
        }
        if data.net_income.abs() > data.revenue * dec!(2) {
            let msg = format!(
                "Net income ({}) seems extreme relative to revenue ({})",
                data.net_income, data.revenue
            );
            tracing::warn!(net_income = %data.net_income, revenue = %data.revenue, "{msg}");
            warnings.push(msg);
        }

        let clamped = [
            clamp_rate("revenue_growth_rate", &mut data.revenue_growth_rate, REVENUE_GROWTH_BOUNDS),
            clamp_rate("ebitda_growth_rate", &mut data.ebitda_growth_rate, EBITDA_GROWTH_BOUNDS),
            clamp_rate(
                "terminal_growth_rate",
                &mut data.terminal_growth_rate,
                (Decimal::ZERO, terminal_growth_cap),
            ),
        ];
        for msg in clamped.into_iter().flatten() {
            tracing::info!("{msg}");
            warnings.push(msg);
        }

        Ok(Self {
            data,
            warnings,
            terminal_growth_cap,
        })
    }

    /// Terminal growth is capped at `config.dcf.terminal_growth_cap`.
    pub fn from_fundamentals(f: &Fundamentals, config: &ValuationConfig) -> IntrinsicValueResult<Self> {
        Self::with_terminal_growth_cap(
            FinancialData::from_fundamentals(f, config),
            config.dcf.terminal_growth_cap,
        )
    }

    /// Derive an independent, re-validated copy with some fields overridden.
    pub fn with_overrides<F>(&self, apply: F) -> IntrinsicValueResult<Self>
    where
        F: FnOnce(&mut FinancialData),
    {
        let mut data = self.data.clone();
        apply(&mut data);
        Self::with_terminal_growth_cap(data, self.terminal_growth_cap)
    }

    /// Whether `rate` survives terminal-growth normalisation unchanged.
    pub fn accepts_terminal_growth(&self, rate: Rate) -> bool {
        rate >= Decimal::ZERO && rate <= self.terminal_growth_cap
    }

    pub fn terminal_growth_cap(&self) -> Rate {
        self.terminal_growth_cap
    }

    pub fn with_revenue_growth(&self, growth: Rate) -> IntrinsicValueResult<Self> {
        self.with_overrides(|d| d.revenue_growth_rate = growth)
    }

    pub fn financials(&self) -> &FinancialData {
        &self.data
    }

    /// Data-quality notes raised during validation and normalisation.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Debt net of cash, floored at zero.
    pub fn net_debt(&self) -> Money {
        (self.data.total_debt - self.data.cash_and_equivalents).max(Decimal::ZERO)
    }

    /// Free cash flow to project from.
    ///
    /// Non-positive FCF is replaced by the first usable estimate of:
    /// EBITDA × (1 − tax) − capex, 70% of net income, 3% of revenue.
    pub fn repaired_free_cash_flow(&self) -> CashFlowBasis {
        let d = &self.data;
        if d.free_cash_flow > Decimal::ZERO {
            return CashFlowBasis {
                amount: d.free_cash_flow,
                source: CashFlowSource::Reported,
            };
        }
        if d.ebitda > Decimal::ZERO {
            let estimate = d.ebitda * (Decimal::ONE - d.tax_rate) - d.capex;
            if estimate > Decimal::ZERO {
                return CashFlowBasis {
                    amount: estimate,
                    source: CashFlowSource::EbitdaAfterTaxLessCapex,
                };
            }
        }
        if d.net_income > Decimal::ZERO {
            return CashFlowBasis {
                amount: d.net_income * dec!(0.7),
                source: CashFlowSource::NetIncomeShare,
            };
        }
        CashFlowBasis {
            amount: d.revenue * dec!(0.03),
            source: CashFlowSource::RevenueShare,
        }
    }
}

impl Deref for ValuationInputs {
    type Target = FinancialData;

    fn deref(&self) -> &FinancialData {
        &self.data
    }
}

impl TryFrom<FinancialData> for ValuationInputs {
    type Error = IntrinsicValueError;

    fn try_from(data: FinancialData) -> Result<Self, Self::Error> {
        Self::new(data)
    }
}

/// Where the projected free cash flow came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashFlowSource {
    Reported,
    EbitdaAfterTaxLessCapex,
    NetIncomeShare,
    RevenueShare,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CashFlowBasis {
    pub amount: Money,
    pub source: CashFlowSource,
}

impl CashFlowBasis {
    pub fn is_estimated(&self) -> bool {
        self.source != CashFlowSource::Reported
    }
}

fn clamp_rate(name: &str, value: &mut Rate, (lo, hi): (Rate, Rate)) -> Option<String> {
    let original = *value;
    let bounded = original.max(lo).min(hi);
    if bounded == original {
        return None;
    }
    *value = bounded;
    Some(format!("{name} normalised from {original} to {bounded} (bounds [{lo}, {hi}])"))
}
