use intrinsic_value_core::ValuationConfig;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

/// Read a JSON file and deserialise into a typed struct.
pub fn read_json<T: DeserializeOwned>(path: &str) -> Result<T, Box<dyn std::error::Error>> {
    let canonical = resolve_path(path)?;
    let contents = read_contents(&canonical)?;
    let value: T = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse '{}': {}", canonical.display(), e))?;
    Ok(value)
}

/// Load the valuation config. JSON or YAML is chosen by extension; missing
/// sections keep their defaults. No path means defaults throughout.
pub fn read_config(path: Option<&str>) -> Result<ValuationConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(ValuationConfig::default());
    };
    let canonical = resolve_path(path)?;
    let contents = read_contents(&canonical)?;

    let is_yaml = matches!(
        canonical.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let config = if is_yaml {
        let config: ValuationConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse '{}': {}", canonical.display(), e))?;
        config.validate()?;
        config
    } else {
        ValuationConfig::from_json_str(&contents)?
    };
    tracing::debug!(path = %canonical.display(), "valuation config loaded");
    Ok(config)
}

fn read_contents(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    Ok(contents)
}

/// Resolve the path against the working directory and require a regular file.
fn resolve_path(path: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let p = Path::new(path);
    let canonical = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()?.join(p)
    };

    if !canonical.exists() {
        return Err(format!("File not found: {}", canonical.display()).into());
    }

    if !canonical.is_file() {
        return Err(format!("Not a file: {}", canonical.display()).into());
    }

    Ok(canonical)
}
