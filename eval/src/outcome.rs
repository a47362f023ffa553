use serde::{Deserialize, Serialize};

use patchkit::apply::ApplyReport;

use crate::judge::Judgment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fail,
    /// The engine refused the payload before touching the document.
    Rejected,
}

pub fn classify_outcome(report: &ApplyReport, judgment: &Judgment) -> Outcome {
    if report.result.is_none() {
        return Outcome::Rejected;
    }
    if judgment.all_passed() {
        Outcome::Success
    } else {
        Outcome::Fail
    }
}
