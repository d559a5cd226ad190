//! Layered JSON loading for rule and threshold files.
//!
//! A base file (`<stem>.json`) is deep-merged with an environment overlay
//! (`<stem>.<environment>.json`) from the same directory. Overlay values win,
//! objects merge key by key, everything else (arrays included) is replaced.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Load a JSON file and return its contents as a Value.
/// Returns None if file doesn't exist.
pub fn load_json_file(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(Some(value))
}

/// Deep merge two JSON values.
/// Source values override target values, with object merging at each level.
pub fn merge_json(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(&key) {
                    Some(target_value) => {
                        merge_json(target_value, source_value);
                    }
                    None => {
                        target_map.insert(key, source_value);
                    }
                }
            }
        }
        (target, source) => {
            *target = source;
        }
    }
}

/// Load `<stem>.json` merged with `<stem>.<environment>.json`.
///
/// Returns `None` when neither file exists. Meta keys starting with `$`
/// (e.g. `$schema`) are dropped from the merged document.
pub fn load_layered(dir: &Path, stem: &str, environment: &str) -> Result<Option<Value>> {
    let base = load_json_file(&dir.join(format!("{stem}.json")))?;
    let overlay = load_json_file(&dir.join(format!("{stem}.{environment}.json")))?;

    tracing::debug!(
        dir = %dir.display(),
        stem,
        environment,
        base = base.is_some(),
        overlay = overlay.is_some(),
        "Loading layered config"
    );

    let merged = match (base, overlay) {
        (None, None) => return Ok(None),
        (Some(base), None) => base,
        (None, Some(overlay)) => overlay,
        (Some(mut base), Some(overlay)) => {
            merge_json(&mut base, overlay);
            base
        }
    };

    Ok(Some(strip_meta_keys(merged)))
}

fn strip_meta_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !key.starts_with('$'))
                .collect(),
        ),
        other => other,
    }
}
