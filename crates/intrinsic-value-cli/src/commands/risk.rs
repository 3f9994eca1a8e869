use serde_json::Value;

use intrinsic_value_core::risk::assessment::run_risk_assessment;
use intrinsic_value_core::ValuationConfig;

use super::{Company, InputArgs};

pub fn run_risk(args: InputArgs, config: &ValuationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let company = Company::load(&args, config)?;
    let mut output = run_risk_assessment(&company.inputs, &company.profile, &config.risk);
    let mut warnings = company.inputs.warnings().to_vec();
    warnings.append(&mut output.warnings);
    output.warnings = warnings;
    Ok(serde_json::to_value(output)?)
}
