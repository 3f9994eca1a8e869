use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// All monetary values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Rates expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = Decimal;

/// Multiples (e.g., 8.5x EV/EBITDA)
pub type Multiple = Decimal;

/// Company archetype driving discount-rate premia, risk base scores and
/// method weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyType {
    Startup,
    Growth,
    Mature,
    Cyclical,
    Bank,
    Reit,
    Utility,
}

impl CompanyType {
    pub const ALL: [CompanyType; 7] = [
        CompanyType::Startup,
        CompanyType::Growth,
        CompanyType::Mature,
        CompanyType::Cyclical,
        CompanyType::Bank,
        CompanyType::Reit,
        CompanyType::Utility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompanyType::Startup => "startup",
            CompanyType::Growth => "growth",
            CompanyType::Mature => "mature",
            CompanyType::Cyclical => "cyclical",
            CompanyType::Bank => "bank",
            CompanyType::Reit => "reit",
            CompanyType::Utility => "utility",
        }
    }
}

impl std::fmt::Display for CompanyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Valuation methods blended into the weighted fair value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationMethod {
    Dcf,
    Pe,
    EvEbitda,
    Pb,
}

impl std::fmt::Display for ValuationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValuationMethod::Dcf => write!(f, "DCF"),
            ValuationMethod::Pe => write!(f, "P/E Comparable"),
            ValuationMethod::EvEbitda => write!(f, "EV/EBITDA Comparable"),
            ValuationMethod::Pb => write!(f, "Price-to-Book"),
        }
    }
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_type_serde_names() {
        let json = serde_json::to_string(&CompanyType::Reit).unwrap();
        assert_eq!(json, "\"reit\"");
        let back: CompanyType = serde_json::from_str("\"utility\"").unwrap();
        assert_eq!(back, CompanyType::Utility);
    }

    #[test]
    fn test_display_matches_serde_name() {
        for t in CompanyType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{t}\""));
        }
    }
}
