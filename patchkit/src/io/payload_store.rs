//! Payload load/save helpers with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

use crate::core::ops::Payload;

pub const PAYLOAD_SCHEMA: &str = include_str!("../../../schemas/payload/v1.schema.json");

/// Load and validate a payload from disk (schema + invariants).
pub fn load_payload(path: &Path) -> Result<Payload> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read payload {}", path.display()))?;
    parse_payload(&contents).with_context(|| format!("load payload {}", path.display()))
}

/// Validate raw JSON against the v1 schema, then deserialize and check the
/// semantic invariants the schema cannot express.
pub fn parse_payload(contents: &str) -> Result<Payload> {
    let value: Value = serde_json::from_str(contents).context("parse payload json")?;
    validate_schema(&value)?;
    let payload: Payload = serde_json::from_value(value).context("deserialize payload")?;
    payload.validate().context("payload invariants failed")?;
    Ok(payload)
}

/// Write payload to disk as pretty JSON.
pub fn write_payload(path: &Path, payload: &Payload) -> Result<()> {
    payload.validate().context("refusing to write invalid payload")?;
    let mut buf = serde_json::to_string_pretty(payload).context("serialize payload")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

/// All schema violations for `value`, empty when valid.
pub fn schema_errors(value: &Value) -> Result<Vec<String>> {
    let schema: Value = serde_json::from_str(PAYLOAD_SCHEMA).context("parse payload schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    Ok(compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect())
}

fn validate_schema(value: &Value) -> Result<()> {
    let messages = schema_errors(value)?;
    if messages.is_empty() {
        return Ok(());
    }
    Err(anyhow!(
        "payload schema validation failed: {}",
        messages.join("; ")
    ))
}
