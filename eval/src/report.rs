use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::judge::Judgment;
use crate::outcome::Outcome;
use crate::results::EvalMeta;

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub runs: usize,
    pub success: usize,
    pub fail: usize,
    pub rejected: usize,
    /// Runs whose outcome was never recorded.
    pub unfinished: usize,
    pub avg_duration_secs: Option<f64>,
    pub total_reapplies: u64,
    /// Distinct final-document digests; more than one means runs diverged.
    pub final_digests: BTreeSet<String>,
    pub check_pass_rates: BTreeMap<String, (usize, usize)>,
}

impl ReportSummary {
    pub fn is_deterministic(&self) -> bool {
        self.final_digests.len() <= 1
    }
}

pub fn load_run_dirs(case_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !case_results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(case_results_dir)
        .with_context(|| format!("read {}", case_results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn aggregate(case_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();

    for run_dir in load_run_dirs(case_results_dir)? {
        let meta_path = run_dir.join("meta.json");
        let checks_path = run_dir.join("checks.json");

        let meta: EvalMeta = match fs::read_to_string(&meta_path)
            .with_context(|| format!("read {}", meta_path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse meta"))
        {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: meta.json invalid ({err})",
                    run_dir.display()
                ));
                continue;
            }
        };

        let judgment: Judgment = match fs::read_to_string(&checks_path)
            .with_context(|| format!("read {}", checks_path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse checks"))
        {
            Ok(checks) => checks,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: checks.json invalid ({err})",
                    run_dir.display()
                ));
                continue;
            }
        };

        summary.runs += 1;
        match meta.outcome {
            Some(Outcome::Success) => summary.success += 1,
            Some(Outcome::Fail) => summary.fail += 1,
            Some(Outcome::Rejected) => summary.rejected += 1,
            None => summary.unfinished += 1,
        }

        summary.avg_duration_secs = Some(match summary.avg_duration_secs {
            None => meta.duration_secs,
            Some(avg) => {
                let total = avg * (summary.runs as f64 - 1.0) + meta.duration_secs;
                total / summary.runs as f64
            }
        });
        summary.total_reapplies += meta.reapply_count;
        summary.final_digests.insert(meta.dom_after);

        update_check_pass_rates(&mut summary.check_pass_rates, &judgment);
    }

    Ok((summary, warnings))
}

fn update_check_pass_rates(stats: &mut BTreeMap<String, (usize, usize)>, judgment: &Judgment) {
    for check in &judgment.checks {
        let entry = stats.entry(check.label.clone()).or_insert((0, 0));
        if check.passed {
            entry.0 += 1;
        }
        entry.1 += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::CheckOutcome;
    use tempfile::tempdir;

    fn write_meta(path: &Path, outcome: Option<Outcome>, duration: f64, digest: &str) {
        let meta = EvalMeta {
            case_id: "case".to_string(),
            eval_run_id: "run".to_string(),
            case_hash: "hash".to_string(),
            payload_hash: "hash".to_string(),
            git_sha: None,
            outcome,
            start_time: "now".to_string(),
            end_time: "later".to_string(),
            duration_secs: duration,
            dom_before: "before".to_string(),
            dom_after: digest.to_string(),
            ops_applied: 2,
            ops_failed: 0,
            reapply_count: 1,
            errors: Vec::new(),
        };
        let contents = serde_json::to_string_pretty(&meta).expect("meta json");
        fs::write(path, format!("{contents}\n")).expect("write meta");
    }

    fn write_checks(path: &Path, passed: bool) {
        let judgment = Judgment {
            checks: vec![CheckOutcome {
                label: "idempotent".to_string(),
                passed,
                observed: None,
            }],
        };
        let contents = serde_json::to_string_pretty(&judgment).expect("checks json");
        fs::write(path, format!("{contents}\n")).expect("write checks");
    }

    #[test]
    fn aggregates_runs() {
        let temp = tempdir().expect("tempdir");
        let run1 = temp.path().join("run1");
        let run2 = temp.path().join("run2");
        fs::create_dir_all(&run1).expect("run1");
        fs::create_dir_all(&run2).expect("run2");

        write_meta(&run1.join("meta.json"), Some(Outcome::Success), 0.5, "aaa");
        write_checks(&run1.join("checks.json"), true);

        write_meta(&run2.join("meta.json"), Some(Outcome::Fail), 1.5, "aaa");
        write_checks(&run2.join("checks.json"), false);

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert!(warnings.is_empty());
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.fail, 1);
        assert_eq!(summary.avg_duration_secs, Some(1.0));
        assert_eq!(summary.total_reapplies, 2);
        assert!(summary.is_deterministic());
        assert_eq!(summary.check_pass_rates.get("idempotent"), Some(&(1, 2)));
    }

    #[test]
    fn divergent_digests_and_broken_runs_are_reported() {
        let temp = tempdir().expect("tempdir");
        for (name, digest) in [("a", "one"), ("b", "two")] {
            let dir = temp.path().join(name);
            fs::create_dir_all(&dir).expect("dir");
            write_meta(&dir.join("meta.json"), None, 1.0, digest);
            write_checks(&dir.join("checks.json"), true);
        }
        let broken = temp.path().join("c");
        fs::create_dir_all(&broken).expect("dir");
        fs::write(broken.join("meta.json"), "{").expect("write");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.unfinished, 2);
        assert!(!summary.is_deterministic());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("meta.json invalid"));
    }
}
