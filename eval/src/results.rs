//! Result capture and persistence.
//!
//! Writes the patched document, apply report, mask timeline and run
//! metadata to the results directory for later analysis.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use patchkit::core::html::serialize_document;

use crate::harness::ScenarioRun;
use crate::outcome::Outcome;

/// Input for capturing results from a completed run.
pub struct CaptureInput<'a> {
    pub case_id: &'a str,
    pub case_path: &'a Path,
    pub payload_path: &'a Path,
    pub eval_run_id: &'a str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub run: &'a ScenarioRun,
    pub repo_root: &'a Path,
}

/// Metadata for an eval run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvalMeta {
    pub case_id: String,
    pub eval_run_id: String,
    /// SHA-256 of the case file for reproducibility tracking.
    pub case_hash: String,
    pub payload_hash: String,
    /// Git SHA of the repo at time of run.
    pub git_sha: Option<String>,
    pub outcome: Option<Outcome>,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    /// Digests of the serialized document before and after the run.
    pub dom_before: String,
    pub dom_after: String,
    pub ops_applied: usize,
    pub ops_failed: usize,
    pub reapply_count: u64,
    /// Non-fatal errors encountered during capture.
    pub errors: Vec<String>,
}

#[instrument(skip_all, fields(case_id = %input.case_id, eval_run_id = %input.eval_run_id))]
pub fn capture_results(base_dir: &Path, input: &CaptureInput<'_>) -> Result<PathBuf> {
    let results_dir = results_dir(base_dir, input.case_id, input.eval_run_id);
    fs::create_dir_all(&results_dir)
        .with_context(|| format!("create results dir {}", results_dir.display()))?;

    let mut errors = Vec::new();
    let case_hash = hash_or_record(input.case_path, "case hash", &mut errors);
    let payload_hash = hash_or_record(input.payload_path, "payload hash", &mut errors);
    let git_sha = match git_rev_parse(input.repo_root) {
        Ok(sha) => Some(sha),
        Err(err) => {
            errors.push(format!("git sha: {err}"));
            None
        }
    };

    let run = input.run;
    write_text(
        &results_dir.join("patched.html"),
        &serialize_document(run.page.document()),
    )?;
    write_json(&results_dir.join("apply_report.json"), &run.report)?;
    write_json(&results_dir.join("mask_events.json"), run.page.mask_events())?;
    if let Some(reapply) = &run.last_reapply {
        write_json(&results_dir.join("last_reapply.json"), reapply)?;
    }

    if !errors.is_empty() {
        warn!(errors = ?errors, "artifact capture had errors");
    }

    let (ops_applied, ops_failed) = run.report.result.as_ref().map_or((0, 0), |result| {
        let applied = result.applied_count();
        (applied, result.outcomes.len() - applied)
    });
    let duration = input.finished_at - input.started_at;
    let meta = EvalMeta {
        case_id: input.case_id.to_string(),
        eval_run_id: input.eval_run_id.to_string(),
        case_hash,
        payload_hash,
        git_sha,
        outcome: None,
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: duration.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0,
        dom_before: run.digest_before.clone(),
        dom_after: run.digest_after.clone(),
        ops_applied,
        ops_failed,
        reapply_count: run.reapply_count,
        errors,
    };

    write_meta(&results_dir.join("meta.json"), &meta)?;
    debug!(results_dir = %results_dir.display(), "results captured");
    Ok(results_dir)
}

pub fn update_outcome(results_dir: &Path, outcome: Outcome) -> Result<()> {
    let meta_path = results_dir.join("meta.json");
    let mut meta: EvalMeta = serde_json::from_str(
        &fs::read_to_string(&meta_path).with_context(|| format!("read {}", meta_path.display()))?,
    )
    .context("parse meta")?;
    meta.outcome = Some(outcome);
    write_meta(&meta_path, &meta)?;
    Ok(())
}

pub fn results_dir(base_dir: &Path, case_id: &str, eval_run_id: &str) -> PathBuf {
    base_dir.join(case_id).join(eval_run_id)
}

fn write_meta(path: &Path, meta: &EvalMeta) -> Result<()> {
    write_json(path, meta).context("write meta")
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value).context("serialize json")?;
    write_text(path, &format!("{contents}\n"))
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn hash_or_record(path: &Path, label: &str, errors: &mut Vec<String>) -> String {
    match file_sha256(path) {
        Ok(hash) => hash,
        Err(err) => {
            errors.push(format!("{label}: {err}"));
            String::new()
        }
    }
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    Ok(hex::encode(hasher.finalize()))
}

fn git_rev_parse(repo_root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output()
        .context("git rev-parse")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git rev-parse failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
