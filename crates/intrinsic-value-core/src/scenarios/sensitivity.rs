use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::ValuationConfig;
use crate::error::IntrinsicValueError;
use crate::types::*;
use crate::valuation::dcf::{calculate_core_dcf, DcfContext};
use crate::valuation::inputs::ValuationInputs;
use crate::IntrinsicValueResult;

/// Value per share at the low and high end of one perturbed assumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityPair {
    pub low_input: Rate,
    pub high_input: Rate,
    pub low: Money,
    pub high: Money,
}

/// One-at-a-time sensitivity keyed by {wacc, growth_rate} x {low, high}.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityTable {
    pub wacc: SensitivityPair,
    pub growth_rate: SensitivityPair,
    pub base_value: Money,
    pub variation: Rate,
    /// Scenarios that failed and report the base value instead
    pub fallbacks: Vec<String>,
}

/// A swept variable for the two-way grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityVariable {
    pub name: String,
    pub min: Decimal,
    pub max: Decimal,
    pub step: Decimal,
}

impl SensitivityVariable {
    /// Symmetric sweep of `steps` increments either side of `center`.
    pub fn around(name: &str, center: Decimal, step: Decimal, steps: u32) -> Self {
        let span = step * Decimal::from(steps);
        Self {
            name: name.to_string(),
            min: center - span,
            max: center + span,
            step,
        }
    }
}

/// Input for the WACC x terminal-growth grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityGridInput {
    pub wacc: SensitivityVariable,
    pub terminal_growth: SensitivityVariable,
}

/// Output of the two-way grid. Rows follow WACC, columns terminal growth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityGrid {
    pub wacc_values: Vec<Rate>,
    pub terminal_growth_values: Vec<Rate>,
    /// Value per share; `None` where the Gordon model is undefined
    pub matrix: Vec<Vec<Option<Money>>>,
    pub base_case_value: Option<Money>,
    pub base_case_position: (usize, usize),
}

// ---------------------------------------------------------------------------
// One-at-a-time sensitivity
// ---------------------------------------------------------------------------

/// Re-price the base case at WACC x (1 -/+ v) and revenue growth x (1 -/+ v).
///
/// A scenario whose calculation fails reports the base value. Only a
/// reentrant call propagates; the base calculation itself must succeed.
pub fn perform_sensitivity_analysis(
    ctx: &DcfContext,
    inputs: &ValuationInputs,
    wacc: Rate,
    projection_years: u32,
    config: &ValuationConfig,
) -> IntrinsicValueResult<SensitivityTable> {
    let v = config.sensitivity.variation;
    let base_value = calculate_core_dcf(ctx, inputs, wacc, projection_years, &config.dcf)?.value_per_share;
    let mut fallbacks = Vec::new();

    let low_wacc = wacc * (Decimal::ONE - v);
    let high_wacc = wacc * (Decimal::ONE + v);
    let mut price_at_wacc = |label: &str, rate: Rate| -> IntrinsicValueResult<Money> {
        let outcome = calculate_core_dcf(ctx, inputs, rate, projection_years, &config.dcf)
            .map(|r| r.value_per_share);
        recover(outcome, label, base_value, &mut fallbacks)
    };
    let wacc_pair = SensitivityPair {
        low_input: low_wacc,
        high_input: high_wacc,
        low: price_at_wacc("low_wacc", low_wacc)?,
        high: price_at_wacc("high_wacc", high_wacc)?,
    };

    let low_growth = inputs.revenue_growth_rate * (Decimal::ONE - v);
    let high_growth = inputs.revenue_growth_rate * (Decimal::ONE + v);
    let mut price_at_growth = |label: &str, growth: Rate| -> IntrinsicValueResult<Money> {
        let outcome = inputs
            .with_revenue_growth(growth)
            .and_then(|scenario| calculate_core_dcf(ctx, &scenario, wacc, projection_years, &config.dcf))
            .map(|r| r.value_per_share);
        recover(outcome, label, base_value, &mut fallbacks)
    };
    let growth_pair = SensitivityPair {
        low_input: low_growth,
        high_input: high_growth,
        low: price_at_growth("low_growth", low_growth)?,
        high: price_at_growth("high_growth", high_growth)?,
    };

    Ok(SensitivityTable {
        wacc: wacc_pair,
        growth_rate: growth_pair,
        base_value,
        variation: v,
        fallbacks,
    })
}

fn recover(
    outcome: IntrinsicValueResult<Money>,
    label: &str,
    base_value: Money,
    fallbacks: &mut Vec<String>,
) -> IntrinsicValueResult<Money> {
    match outcome {
        Ok(value) => Ok(value),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!(scenario = label, error = %e, "sensitivity scenario failed, using base value");
            fallbacks.push(format!("{label}: {e}"));
            Ok(base_value)
        }
    }
}

// ---------------------------------------------------------------------------
// Two-way grid
// ---------------------------------------------------------------------------

/// Generate the sweep values for a sensitivity variable from min to max with step.
fn generate_sweep_values(var: &SensitivityVariable) -> IntrinsicValueResult<Vec<Decimal>> {
    if var.step <= Decimal::ZERO {
        return Err(IntrinsicValueError::InvalidInput {
            field: format!("variable:{}", var.name),
            reason: "Step must be positive".into(),
        });
    }
    if var.min > var.max {
        return Err(IntrinsicValueError::InvalidInput {
            field: format!("variable:{}", var.name),
            reason: "Min must be <= max".into(),
        });
    }

    let mut values = Vec::new();
    let mut current = var.min;
    while current <= var.max {
        values.push(current);
        current += var.step;
    }
    if let Some(&last) = values.last() {
        if last < var.max {
            values.push(var.max);
        }
    }
    Ok(values)
}

fn closest_index(values: &[Decimal], target: Decimal) -> usize {
    values
        .iter()
        .enumerate()
        .min_by_key(|(_, v)| (**v - target).abs())
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Default grid: WACC +/- 2% and terminal growth +/- 1% in half-point steps,
/// centred on the base case.
pub fn default_grid(wacc: Rate, terminal_growth: Rate) -> SensitivityGridInput {
    SensitivityGridInput {
        wacc: SensitivityVariable::around("wacc", wacc, dec!(0.01), 2),
        terminal_growth: SensitivityVariable::around("terminal_growth", terminal_growth, dec!(0.005), 2),
    }
}

/// Evaluate value per share across a WACC x terminal-growth grid.
///
/// Cells where WACC does not exceed terminal growth (or where the overridden
/// inputs fail validation) are left empty with a warning. Terminal growth
/// values outside `[0, inputs.terminal_growth_cap()]` are never clamped:
/// their whole column is left empty so no two columns repeat a value.
pub fn evaluate_sensitivity_grid(
    ctx: &DcfContext,
    inputs: &ValuationInputs,
    grid: &SensitivityGridInput,
    config: &ValuationConfig,
) -> IntrinsicValueResult<ComputationOutput<SensitivityGrid>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();
    let years = config.dcf.projection_years;

    let wacc_values = generate_sweep_values(&grid.wacc)?;
    let tg_values = generate_sweep_values(&grid.terminal_growth)?;

    for tg in tg_values.iter().filter(|tg| !inputs.accepts_terminal_growth(**tg)) {
        warnings.push(format!(
            "Terminal growth {tg} outside [0, {}]; column left empty",
            inputs.terminal_growth_cap()
        ));
    }

    let mut matrix = Vec::with_capacity(wacc_values.len());
    for wacc in &wacc_values {
        let mut row = Vec::with_capacity(tg_values.len());
        for tg in &tg_values {
            if !inputs.accepts_terminal_growth(*tg) {
                row.push(None);
                continue;
            }
            let outcome = inputs
                .with_overrides(|d| d.terminal_growth_rate = *tg)
                .and_then(|scenario| calculate_core_dcf(ctx, &scenario, *wacc, years, &config.dcf));
            match outcome {
                Ok(r) => row.push(Some(r.value_per_share)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warnings.push(format!("Evaluation failed at (wacc {wacc}, tg {tg}): {e}"));
                    row.push(None);
                }
            }
        }
        matrix.push(row);
    }

    let mid_wacc = (grid.wacc.min + grid.wacc.max) / dec!(2);
    let mid_tg = (grid.terminal_growth.min + grid.terminal_growth.max) / dec!(2);
    let base_row = closest_index(&wacc_values, mid_wacc);
    let base_col = closest_index(&tg_values, mid_tg);
    let base_case_value = matrix
        .get(base_row)
        .and_then(|row| row.get(base_col))
        .copied()
        .flatten();

    let output = SensitivityGrid {
        wacc_values,
        terminal_growth_values: tg_values,
        matrix,
        base_case_value,
        base_case_position: (base_row, base_col),
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "2-Way Sensitivity: WACC x Terminal Growth",
        grid,
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::inputs::tests::sample_data;

    fn inputs() -> ValuationInputs {
        ValuationInputs::new(sample_data()).unwrap()
    }

    #[test]
    fn test_table_moves_in_expected_directions() {
        let ctx = DcfContext::new();
        let table =
            perform_sensitivity_analysis(&ctx, &inputs(), dec!(0.10), 5, &ValuationConfig::default()).unwrap();
        assert!(table.wacc.low > table.base_value);
        assert!(table.wacc.high < table.base_value);
        assert!(table.growth_rate.low < table.base_value);
        assert!(table.growth_rate.high > table.base_value);
        assert_eq!(table.wacc.low_input, dec!(0.085));
        assert_eq!(table.wacc.high_input, dec!(0.115));
        assert!(table.fallbacks.is_empty());
    }

    #[test]
    fn test_failed_scenario_uses_base_value() {
        // 0.0225 * 0.85 < 0.02 terminal growth: the low-WACC case is undefined
        let ctx = DcfContext::new();
        let table =
            perform_sensitivity_analysis(&ctx, &inputs(), dec!(0.0225), 5, &ValuationConfig::default()).unwrap();
        assert_eq!(table.wacc.low, table.base_value);
        assert_eq!(table.fallbacks.len(), 1);
        assert!(table.fallbacks[0].starts_with("low_wacc"));
    }

    #[test]
    fn test_reentry_propagates() {
        let ctx = DcfContext::new();
        let _held = ctx.enter().unwrap();
        let result = perform_sensitivity_analysis(&ctx, &inputs(), dec!(0.10), 5, &ValuationConfig::default());
        assert!(matches!(result, Err(IntrinsicValueError::ReentrantCall { .. })));
    }

    #[test]
    fn test_sweep_includes_max() {
        let var = SensitivityVariable {
            name: "x".into(),
            min: dec!(0.08),
            max: dec!(0.105),
            step: dec!(0.01),
        };
        let values = generate_sweep_values(&var).unwrap();
        assert_eq!(values, vec![dec!(0.08), dec!(0.09), dec!(0.10), dec!(0.105)]);
    }

    #[test]
    fn test_grid_base_cell_matches_core() {
        let ctx = DcfContext::new();
        let config = ValuationConfig::default();
        let grid = default_grid(dec!(0.10), dec!(0.02));
        let out = evaluate_sensitivity_grid(&ctx, &inputs(), &grid, &config).unwrap().result;
        assert_eq!(out.wacc_values.len(), 5);
        assert_eq!(out.terminal_growth_values.len(), 5);
        assert_eq!(out.base_case_position, (2, 2));

        let core = calculate_core_dcf(&ctx, &inputs(), dec!(0.10), config.dcf.projection_years, &config.dcf).unwrap();
        assert_eq!(out.base_case_value, Some(core.value_per_share));
    }

    #[test]
    fn test_grid_columns_beyond_growth_cap_are_empty() {
        let ctx = DcfContext::new();
        let at_cap = inputs().with_overrides(|d| d.terminal_growth_rate = dec!(0.05)).unwrap();
        let grid = default_grid(dec!(0.10), dec!(0.05));
        let output = evaluate_sensitivity_grid(&ctx, &at_cap, &grid, &ValuationConfig::default()).unwrap();
        let out = &output.result;
        assert_eq!(out.terminal_growth_values[3], dec!(0.055));

        for row in &out.matrix {
            assert!(row[3].is_none() && row[4].is_none());
            let kept: Vec<Decimal> = row[..3].iter().map(|c| c.unwrap()).collect();
            // value rises with terminal growth, so no column repeats another
            assert!(kept[0] < kept[1] && kept[1] < kept[2]);
        }
        assert_eq!(output.warnings.iter().filter(|w| w.contains("outside")).count(), 2);
    }

    #[test]
    fn test_grid_leaves_undefined_cells_empty() {
        let ctx = DcfContext::new();
        let grid = SensitivityGridInput {
            wacc: SensitivityVariable::around("wacc", dec!(0.03), dec!(0.01), 1),
            terminal_growth: SensitivityVariable::around("terminal_growth", dec!(0.03), dec!(0.01), 1),
        };
        let output = evaluate_sensitivity_grid(&ctx, &inputs(), &grid, &ValuationConfig::default()).unwrap();
        // wacc 0.02 vs tg 0.02 / 0.03 / 0.04
        assert!(output.result.matrix[0].iter().all(|c| c.is_none()));
        assert!(output.result.matrix[2][0].is_some());
        assert!(!output.warnings.is_empty());
    }
}
