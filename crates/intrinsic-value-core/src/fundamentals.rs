//! Fundamentals map supplied by the data-acquisition layer.
//!
//! Values arrive as loosely typed JSON: numbers, numeric strings with
//! currency symbols or magnitude suffixes, or placeholders such as `"N/A"`.
//! Everything is normalised to `Decimal` here so downstream modules only see
//! clean numbers.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Money, Multiple, Rate};

const MISSING_MARKERS: [&str; 6] = ["", "N/A", "NONE", "-", "--", "NULL"];

/// Named fundamental fields keyed by snake_case standard names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fundamentals(BTreeMap<String, Value>);

impl Fundamentals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Numeric field, or `None` when absent or unparseable.
    pub fn decimal(&self, key: &str) -> Option<Decimal> {
        self.0.get(key).and_then(parse_decimal)
    }

    pub fn decimal_or(&self, key: &str, default: Decimal) -> Decimal {
        self.decimal(key).unwrap_or(default)
    }

    /// Non-empty text field.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, Value>> for Fundamentals {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Fundamentals {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Lenient numeric conversion.
///
/// Accepts JSON numbers and strings like `"1,234.5"`, `"$2.5B"`, `"12%"`.
/// Placeholders (`N/A`, `None`, `-`, `--`, `null`, empty) and non-finite
/// numbers yield `None`, as do suffixed values that overflow once scaled.
/// A `%` sign is stripped without rescaling.
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(Decimal::from(i));
            }
            let f = n.as_f64()?;
            if !f.is_finite() {
                return None;
            }
            Decimal::from_str(&n.to_string())
                .ok()
                .or_else(|| Decimal::from_f64(f))
        }
        Value::String(s) => parse_numeric_text(s),
        _ => None,
    }
}

fn parse_numeric_text(raw: &str) -> Option<Decimal> {
    let upper = raw.trim().to_uppercase();
    if MISSING_MARKERS.contains(&upper.as_str()) {
        return None;
    }
    let mut cleaned: String = upper
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '%'))
        .collect();

    let multiplier = match cleaned.chars().last() {
        Some('K') => Some(dec!(1_000)),
        Some('M') => Some(dec!(1_000_000)),
        Some('B') => Some(dec!(1_000_000_000)),
        Some('T') => Some(dec!(1_000_000_000_000)),
        _ => None,
    };
    if multiplier.is_some() {
        cleaned.pop();
    }

    let parsed = Decimal::from_str(cleaned.trim())
        .or_else(|_| Decimal::from_scientific(cleaned.trim()))
        .ok()?;
    // Scaled values beyond Decimal range count as unparseable.
    parsed.checked_mul(multiplier.unwrap_or(Decimal::ONE))
}

/// Non-financial context for a valuation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ticker: String,
    pub sector: String,
    pub industry: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pe_ratio: Option<Multiple>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dividend_yield: Option<Rate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_margin: Option<Rate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue_growth_5y: Option<Rate>,
}

impl MarketSnapshot {
    pub fn from_fundamentals(f: &Fundamentals) -> Self {
        Self {
            ticker: f.text("ticker").unwrap_or_else(|| "UNKNOWN".to_string()),
            sector: f.text("sector").unwrap_or_default(),
            industry: f.text("industry").unwrap_or_default(),
            current_price: f.decimal("current_price").filter(|p| *p > Decimal::ZERO),
            market_cap: f.decimal("market_cap").filter(|m| *m > Decimal::ZERO),
            pe_ratio: f.decimal("pe_ratio"),
            dividend_yield: f.decimal("dividend_yield"),
            profit_margin: f.decimal("profit_margin"),
            revenue_growth_5y: f.decimal("revenue_growth_5y"),
        }
    }
}
