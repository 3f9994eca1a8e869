use serde_json::Value;

/// Headline figure per command, in priority order.
const PRIORITY_KEYS: [&str; 10] = [
    "weighted_fair_value",
    "value_per_share",
    "probability_weighted_value",
    "base_value",
    "base_case_value",
    "p50",
    "wacc",
    "overall_risk_score",
    "company_type",
    "version",
];

/// Print just the key answer value from the output, falling back to the
/// first field of the result.
pub fn print_minimal(value: &Value) {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    if let Value::Object(map) = result_obj {
        for key in PRIORITY_KEYS {
            if let Some(val) = map.get(key).filter(|v| !v.is_null()) {
                println!("{}", format_minimal(val));
                return;
            }
        }

        // comparables: one line per method
        let methods: Vec<String> = ["pe", "ev_ebitda", "pb"]
            .iter()
            .filter_map(|k| map.get(*k)?.get("fair_value").map(|v| format!("{k}: {}", format_minimal(v))))
            .collect();
        if !methods.is_empty() {
            println!("{}", methods.join("\n"));
            return;
        }

        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, format_minimal(val));
            return;
        }
    }

    println!("{}", format_minimal(result_obj));
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
