pub mod analysis;
pub mod risk;
pub mod valuation;

use clap::Args;

use intrinsic_value_core::fundamentals::{Fundamentals, MarketSnapshot};
use intrinsic_value_core::valuation::classifier::{build_profile, Classification, CompanyProfile};
use intrinsic_value_core::valuation::inputs::ValuationInputs;
use intrinsic_value_core::valuation::wacc::{calculate_wacc, WaccInput};
use intrinsic_value_core::{Rate, ValuationConfig};

use crate::input;

/// Where the fundamentals come from
#[derive(Args)]
pub struct InputArgs {
    /// Path to a JSON map of fundamentals (piped stdin is read when omitted)
    #[arg(long)]
    pub input: Option<String>,
}

/// Validated inputs plus the classification every command builds on.
pub struct Company {
    pub inputs: ValuationInputs,
    pub snapshot: MarketSnapshot,
    pub profile: CompanyProfile,
    pub classification: Classification,
}

impl Company {
    pub fn load(args: &InputArgs, config: &ValuationConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let fundamentals = read_fundamentals(args)?;
        let inputs = ValuationInputs::from_fundamentals(&fundamentals, config)?;
        let snapshot = MarketSnapshot::from_fundamentals(&fundamentals);
        let (profile, classification) = build_profile(&inputs, &snapshot);
        tracing::debug!(
            ticker = %profile.ticker,
            company_type = %profile.company_type,
            "fundamentals loaded"
        );
        Ok(Self {
            inputs,
            snapshot,
            profile,
            classification,
        })
    }

    pub fn wacc_input(&self) -> WaccInput {
        WaccInput::from_profile(&self.inputs, &self.profile)
    }

    /// Explicit rate if given, else the risk-adjusted WACC.
    pub fn discount_rate(&self, explicit: Option<Rate>, config: &ValuationConfig) -> Rate {
        explicit.unwrap_or_else(|| calculate_wacc(&self.wacc_input(), config).result.wacc)
    }
}

pub fn read_fundamentals(args: &InputArgs) -> Result<Fundamentals, Box<dyn std::error::Error>> {
    if let Some(ref path) = args.input {
        input::file::read_json(path)
    } else if let Some(data) = input::stdin::read_stdin()? {
        Ok(serde_json::from_value(data)?)
    } else {
        Err("Fundamentals are required: pass --input <file> or pipe JSON on stdin".into())
    }
}
