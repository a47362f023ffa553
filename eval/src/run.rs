//! Case execution orchestration.
//!
//! Coordinates fixture loading, the scenario run, checks and result capture.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::case::CaseFile;
use crate::harness::{load_fixtures, run_scenario};
use crate::judge::{run_checks, write_judgment};
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{CaptureInput, capture_results, update_outcome};

#[derive(Debug)]
pub struct RunOutcome {
    /// Unique identifier for this eval run.
    pub eval_run_id: String,
    pub results_dir: PathBuf,
    pub outcome: Outcome,
}

/// Eval run ids sort chronologically; `run_num` keeps repeated runs within
/// one millisecond apart.
pub fn eval_run_id(run_num: u32) -> String {
    format!("eval-{}-{run_num:03}", Utc::now().format("%Y%m%d_%H%M%S%3f"))
}

/// Run a case end-to-end: fixtures, scenario, checks, result capture.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_case(
    repo_root: &Path,
    case_path: &Path,
    case: &CaseFile,
    run_num: u32,
) -> Result<RunOutcome> {
    info!("case run started");

    let (html, payload) = load_fixtures(case, case_path).context("load fixtures")?;
    let (_, payload_path) = case.resolve(case_path);

    let started_at = Utc::now();
    let eval_run_id = eval_run_id(run_num);
    debug!(eval_run_id, "running scenario");
    let run = run_scenario(case, &html, &payload).context("run scenario")?;
    let finished_at = Utc::now();
    info!(
        success = run.report.success,
        reapplies = run.reapply_count,
        duration_ms = (finished_at - started_at).num_milliseconds(),
        "scenario finished"
    );

    debug!("capturing results");
    let capture_input = CaptureInput {
        case_id: &case.case.id,
        case_path,
        payload_path: &payload_path,
        eval_run_id: &eval_run_id,
        started_at,
        finished_at,
        run: &run,
        repo_root,
    };
    let results_dir = capture_results(&repo_root.join("eval").join("results"), &capture_input)
        .context("capture results")?;

    debug!("running checks");
    let judgment = run_checks(&case.checks, &run);
    write_judgment(&results_dir.join("checks.json"), &judgment).context("write checks")?;

    let outcome = classify_outcome(&run.report, &judgment);
    update_outcome(&results_dir, outcome).context("update outcome")?;

    info!(outcome = ?outcome, results_dir = %results_dir.display(), "case run complete");

    Ok(RunOutcome {
        eval_run_id,
        results_dir,
        outcome,
    })
}
