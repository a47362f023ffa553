//! Case file parsing and validation.
//!
//! Cases are TOML files naming an HTML fixture, a payload, an optional
//! script of client-side navigation steps and the DOM checks to run
//! afterwards. Fixture paths are relative to the case file.
//! See `eval/cases/` for examples.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use patchkit::core::css::parse_selector;

/// A parsed case file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    pub description: String,
    /// HTML fixture, relative to the case file.
    pub html: PathBuf,
    /// Payload JSON, relative to the case file.
    pub payload: PathBuf,
    /// Initial page URL.
    #[serde(default = "default_url")]
    pub url: String,
}

fn default_url() -> String {
    "https://eval.test/".to_string()
}

/// Engine overrides for the case.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CaseConfig {
    /// Keep the payload applied across the scripted navigation.
    #[serde(default)]
    pub spa: bool,
    #[serde(default)]
    pub skip_mask: bool,
    pub mask_timeout_ms: Option<u64>,
    pub mutation_debounce_ms: Option<u64>,
    /// Page advertises the Navigation API.
    #[serde(default)]
    pub navigation_api: bool,
}

/// Scripted page activity after the first application.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    PushState { url: String },
    ReplaceState { url: String },
    Back,
    /// Replace the body's children, like a framework route render.
    Rerender { html: String },
    /// Move the virtual clock forward.
    Advance { ms: u64 },
}

/// Verification run against the final document.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Check {
    Exists { selector: String },
    Missing { selector: String },
    Text { selector: String, equals: String },
    Attribute {
        selector: String,
        name: String,
        /// Absent means the attribute must be absent.
        equals: Option<String>,
    },
    HasClass { selector: String, class: String },
    Count { selector: String, equals: usize },
    /// Every operation of the first application succeeded.
    AllApplied,
    /// Reapplying the payload to the final document changes nothing.
    Idempotent,
    /// No anti-flicker mask is left in the document.
    Unmasked,
}

impl CaseFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        let case: CaseFile =
            toml::from_str(&contents).with_context(|| format!("parse case {}", path.display()))?;
        case.validate()
            .with_context(|| format!("validate case {}", path.display()))?;
        Ok(case)
    }

    #[cfg(test)]
    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    /// Fixture paths resolved against the directory holding the case file.
    pub fn resolve(&self, case_path: &Path) -> (PathBuf, PathBuf) {
        let base = case_path.parent().unwrap_or_else(|| Path::new("."));
        (base.join(&self.case.html), base.join(&self.case.payload))
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.description.trim().is_empty() {
            bail!("case.description must be non-empty");
        }
        if self.case.html.as_os_str().is_empty() {
            bail!("case.html must be non-empty");
        }
        if self.case.payload.as_os_str().is_empty() {
            bail!("case.payload must be non-empty");
        }
        if let Some(timeout) = self.config.mask_timeout_ms
            && timeout == 0
        {
            bail!("config.mask_timeout_ms must be > 0");
        }
        if let Some(debounce) = self.config.mutation_debounce_ms
            && debounce == 0
        {
            bail!("config.mutation_debounce_ms must be > 0");
        }
        if !self.steps.is_empty() && !self.config.spa {
            bail!("steps require config.spa = true");
        }
        if self.checks.is_empty() {
            bail!("checks must be a non-empty array");
        }
        for (index, step) in self.steps.iter().enumerate() {
            step.validate()
                .with_context(|| format!("steps[{}] invalid", index))?;
        }
        for (index, check) in self.checks.iter().enumerate() {
            check
                .validate()
                .with_context(|| format!("checks[{}] invalid", index))?;
        }
        Ok(())
    }
}

impl Step {
    fn validate(&self) -> Result<()> {
        match self {
            Step::PushState { url } | Step::ReplaceState { url } => {
                if url.trim().is_empty() {
                    bail!("url must be non-empty");
                }
            }
            Step::Advance { ms } => {
                if *ms == 0 {
                    bail!("advance.ms must be > 0");
                }
            }
            Step::Back | Step::Rerender { .. } => {}
        }
        Ok(())
    }
}

impl Check {
    pub fn selector(&self) -> Option<&str> {
        match self {
            Check::Exists { selector }
            | Check::Missing { selector }
            | Check::Text { selector, .. }
            | Check::Attribute { selector, .. }
            | Check::HasClass { selector, .. }
            | Check::Count { selector, .. } => Some(selector),
            Check::AllApplied | Check::Idempotent | Check::Unmasked => None,
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(selector) = self.selector() {
            parse_selector(selector).map_err(|err| anyhow!("selector {selector:?}: {err}"))?;
        }
        match self {
            Check::Attribute { name, .. } if name.trim().is_empty() => {
                bail!("attribute.name must be non-empty");
            }
            Check::HasClass { class, .. } if class.trim().is_empty() => {
                bail!("has_class.class must be non-empty");
            }
            _ => {}
        }
        Ok(())
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}
