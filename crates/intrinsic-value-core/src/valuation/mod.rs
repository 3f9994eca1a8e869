pub mod classifier;
pub mod comps;
pub mod dcf;
#[cfg(all(feature = "monte_carlo", feature = "risk"))]
pub mod engine;
pub mod inputs;
pub mod wacc;
