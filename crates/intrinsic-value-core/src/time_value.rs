use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;

use crate::error::IntrinsicValueError;
use crate::types::{Money, Rate};
use crate::IntrinsicValueResult;

/// End-of-period discount factor 1 / (1 + rate)^period.
pub fn discount_factor(rate: Rate, period: u32) -> IntrinsicValueResult<Rate> {
    if rate <= Decimal::NEGATIVE_ONE {
        return Err(IntrinsicValueError::InvalidInput {
            field: "rate".into(),
            reason: "Discount rate must be greater than -100%".into(),
        });
    }
    let compound = (Decimal::ONE + rate)
        .checked_powi(period as i64)
        .ok_or_else(|| overflow("discount factor", period))?;
    if compound.is_zero() {
        return Err(IntrinsicValueError::Computation(format!(
            "discount factor underflow at period {period}"
        )));
    }
    Decimal::ONE
        .checked_div(compound)
        .ok_or_else(|| overflow("discount factor", period))
}

/// Present value of a single amount received at the end of `period`.
pub fn present_value(amount: Money, rate: Rate, period: u32) -> IntrinsicValueResult<Money> {
    amount
        .checked_mul(discount_factor(rate, period)?)
        .ok_or_else(|| overflow("present value", period))
}

/// Gordon growth perpetuity: final_cf * (1 + g) / (r - g).
///
/// Undefined when the discount rate does not exceed the growth rate.
pub fn gordon_terminal_value(
    final_cash_flow: Money,
    growth: Rate,
    discount_rate: Rate,
) -> IntrinsicValueResult<Money> {
    let spread = discount_rate - growth;
    if spread <= Decimal::ZERO {
        return Err(IntrinsicValueError::InvalidAssumption(format!(
            "WACC ({discount_rate}) must exceed terminal growth ({growth}) for the Gordon growth model"
        )));
    }
    final_cash_flow
        .checked_mul(Decimal::ONE + growth)
        .and_then(|numerator| numerator.checked_div(spread))
        .ok_or_else(|| {
            IntrinsicValueError::Computation(format!(
                "terminal value overflow for final cash flow {final_cash_flow}"
            ))
        })
}

fn overflow(what: &str, period: u32) -> IntrinsicValueError {
    IntrinsicValueError::Computation(format!("{what} overflow at period {period}"))
}
