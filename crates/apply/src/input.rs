//! Reading rendered documents from files.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ksync_core::{collect_documents, ResourceDocument};
use serde_json::Value as Json;

fn max_input_bytes() -> usize {
    std::env::var("KSYNC_MAX_INPUT_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(8_000_000)
}

/// Parse rendered output: JSON when the text is a JSON value, multi-document YAML otherwise.
pub fn parse_documents(text: &str) -> Result<Vec<ResourceDocument>> {
    if text.len() > max_input_bytes() {
        return Err(anyhow!("input too large (>{} bytes)", max_input_bytes()));
    }
    let value = match serde_json::from_str::<Json>(text) {
        Ok(v) => v,
        Err(_) => Json::Array(ksync_native::parse_yaml(text)?),
    };
    Ok(collect_documents(value)?)
}

pub fn read_documents(path: &Path) -> Result<Vec<ResourceDocument>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_documents(&text).with_context(|| format!("error reading {}", path.display()))
}

/// Read every path in order and concatenate their documents.
pub fn read_all<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<ResourceDocument>> {
    let mut out = Vec::new();
    for p in paths {
        out.extend(read_documents(p.as_ref())?);
    }
    Ok(out)
}
