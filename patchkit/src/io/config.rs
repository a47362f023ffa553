//! Engine configuration stored as TOML (conventionally `patchkit.toml`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::dropzone::DropZoneConfig;
use crate::core::selector::SelectorConfig;
use crate::runtime::mask::{DEFAULT_MASK_TIMEOUT_MS, MAX_MASK_TIMEOUT_MS};
use crate::runtime::spa::SpaConfig;

/// Engine configuration (TOML).
///
/// Every section is optional; missing fields take the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub mask: MaskConfig,
    pub spa: SpaConfig,
    pub drop_zone: DropZoneConfig,
    pub selector: SelectorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MaskConfig {
    /// Upper bound on how long content stays hidden, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_MASK_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mask.timeout_ms == 0 {
            return Err(anyhow!("mask.timeout_ms must be > 0"));
        }
        if self.mask.timeout_ms > MAX_MASK_TIMEOUT_MS {
            return Err(anyhow!(
                "mask.timeout_ms must be <= {MAX_MASK_TIMEOUT_MS} (got {})",
                self.mask.timeout_ms
            ));
        }
        if self.spa.mutation_debounce_ms == 0 {
            return Err(anyhow!("spa.mutation_debounce_ms must be > 0"));
        }
        if !(self.drop_zone.proximity_px.is_finite() && self.drop_zone.proximity_px >= 0.0) {
            return Err(anyhow!("drop_zone.proximity_px must be a non-negative number"));
        }
        if !(self.drop_zone.strip_px.is_finite() && self.drop_zone.strip_px > 0.0) {
            return Err(anyhow!("drop_zone.strip_px must be > 0"));
        }
        if self.selector.max_ancestor_depth == 0 {
            return Err(anyhow!("selector.max_ancestor_depth must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.mask.timeout_ms, 800);
        assert_eq!(cfg.spa.mutation_debounce_ms, 100);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("patchkit.toml");
        let mut cfg = EngineConfig::default();
        cfg.spa.navigation_delay_ms = 25;
        cfg.drop_zone.proximity_px = 40.0;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("patchkit.toml");
        fs::write(&path, "[mask]\ntimeout_ms = 1200\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.mask.timeout_ms, 1200);
        assert_eq!(cfg.spa, SpaConfig::default());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("patchkit.toml");
        fs::write(&path, "[mask]\ntimeout_ms = 9000\n").expect("write");
        let err = load_config(&path).expect_err("too long");
        assert!(format!("{err:#}").contains("mask.timeout_ms"));

        let mut cfg = EngineConfig::default();
        cfg.spa.mutation_debounce_ms = 0;
        assert!(cfg.validate().is_err());
        assert!(write_config(&temp.path().join("bad.toml"), &cfg).is_err());
    }
}
