use serde_json::Value;
use std::io;

use super::{flatten_fields, scalar_text};

/// Write output as CSV to stdout.
///
/// Array-shaped results (scenario lists, rate shocks, sensitivity rows)
/// become one row per element; everything else is a field/value listing.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    let body = value.get("result").unwrap_or(value);
    match tabular_rows(body) {
        Some(rows) => write_rows(&mut wtr, rows),
        None => {
            let _ = wtr.write_record(["field", "value"]);
            let mut fields = Vec::new();
            flatten_fields("", body, &mut fields);
            for (field, text) in fields {
                let _ = wtr.write_record([field, text]);
            }
        }
    }

    let _ = wtr.flush();
}

/// The first list of objects found at the top of the result, if any.
fn tabular_rows(body: &Value) -> Option<&[Value]> {
    let is_rows = |v: &Value| matches!(v, Value::Array(a) if a.first().is_some_and(Value::is_object));
    if is_rows(body) {
        return body.as_array().map(Vec::as_slice);
    }
    ["results", "shocks"]
        .iter()
        .filter_map(|k| body.get(*k))
        .find(|v| is_rows(v))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
}

fn write_rows(wtr: &mut csv::Writer<io::StdoutLock<'_>>, rows: &[Value]) {
    let Some(Value::Object(first)) = rows.first() else {
        return;
    };
    let headers: Vec<&str> = first.keys().map(|k| k.as_str()).collect();
    let _ = wtr.write_record(&headers);

    for item in rows {
        let row: Vec<String> = headers
            .iter()
            .map(|h| item.get(*h).map(scalar_text).unwrap_or_default())
            .collect();
        let _ = wtr.write_record(&row);
    }
}
