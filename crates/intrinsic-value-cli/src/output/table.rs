use serde_json::Value;
use tabled::{builder::Builder, Table};

use super::flatten_fields;

/// Format output as a two-column table. Nested report sections are
/// flattened into dotted field names.
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) if map.contains_key("result") => {
            print_fields(&map["result"]);

            if let Some(Value::Array(warnings)) = map.get("warnings") {
                if !warnings.is_empty() {
                    println!("\nWarnings:");
                    for w in warnings.iter().filter_map(Value::as_str) {
                        println!("  - {}", w);
                    }
                }
            }

            if let Some(Value::String(meth)) = map.get("methodology") {
                println!("\nMethodology: {}", meth);
            }
        }
        Value::Object(_) => print_fields(value),
        _ => println!("{}", value),
    }
}

fn print_fields(value: &Value) {
    let mut rows = Vec::new();
    flatten_fields("", value, &mut rows);
    if rows.is_empty() {
        println!("(empty)");
        return;
    }

    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (field, text) in rows {
        builder.push_record([field, text]);
    }
    println!("{}", Table::from(builder));
}
