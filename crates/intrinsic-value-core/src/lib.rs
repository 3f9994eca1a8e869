pub mod config;
pub mod error;
pub mod fundamentals;
pub mod time_value;
pub mod types;

#[cfg(feature = "valuation")]
pub mod valuation;

#[cfg(feature = "scenarios")]
pub mod scenarios;

#[cfg(feature = "monte_carlo")]
pub mod monte_carlo;

#[cfg(feature = "risk")]
pub mod risk;

pub use config::ValuationConfig;
pub use error::IntrinsicValueError;
pub use types::*;

/// Standard result type for all intrinsic-value computations
pub type IntrinsicValueResult<T> = Result<T, IntrinsicValueError>;
