//! Engine configuration merging.
//!
//! Applies case-specific overrides to the default engine configuration and
//! derives the apply options for the first pass.

use anyhow::Result;
use patchkit::apply::ApplyOptions;
use patchkit::io::config::EngineConfig;

use crate::case::CaseConfig;

/// Apply case configuration overrides to the base engine config.
pub fn apply_case_config(mut base: EngineConfig, overrides: &CaseConfig) -> Result<EngineConfig> {
    if let Some(timeout_ms) = overrides.mask_timeout_ms {
        base.mask.timeout_ms = timeout_ms;
    }
    if let Some(debounce_ms) = overrides.mutation_debounce_ms {
        base.spa.mutation_debounce_ms = debounce_ms;
    }
    base.validate()?;
    Ok(base)
}

pub fn apply_options(overrides: &CaseConfig) -> ApplyOptions {
    ApplyOptions {
        spa: overrides.spa,
        skip_mask: overrides.skip_mask,
        mask_timeout_ms: None,
    }
}
