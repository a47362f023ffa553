//! Result types shared by the patch engine and its callers.

use serde::Serialize;

use super::error::PatchError;
use super::ops::OperationKind;

/// Informational notes attached to an applied operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// The sanitizer removed markup from an `insertHTML` payload.
    SanitizationStripped { items: Vec<String> },
    /// The selector matched several elements; only the first was mutated.
    MultipleMatches { count: usize },
    /// The inserted markup is already present next to the target.
    AlreadyInserted,
}

/// Successful application of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Applied {
    /// False when the document already was in the requested state.
    pub changed: bool,
    pub notices: Vec<Notice>,
}

impl Applied {
    pub fn changed(changed: bool) -> Self {
        Self {
            changed,
            notices: Vec::new(),
        }
    }

    pub fn with_notice(mut self, notice: Notice) -> Self {
        self.notices.push(notice);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    Applied { changed: bool },
    Failed { error: PatchError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub index: usize,
    pub op: OperationKind,
    pub selector: String,
    #[serde(flatten)]
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
}

impl OperationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self.status, OperationStatus::Applied { .. })
    }

    pub fn error(&self) -> Option<&PatchError> {
        match &self.status {
            OperationStatus::Failed { error } => Some(error),
            OperationStatus::Applied { .. } => None,
        }
    }
}

/// Per-operation outcomes of one pass plus the aggregate flag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ApplyResult {
    pub success: bool,
    pub outcomes: Vec<OperationOutcome>,
}

impl ApplyResult {
    pub fn from_outcomes(outcomes: Vec<OperationOutcome>) -> Self {
        Self {
            success: outcomes.iter().all(OperationOutcome::is_applied),
            outcomes,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &PatchError> {
        self.outcomes.iter().filter_map(OperationOutcome::error)
    }

    pub fn applied_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_applied()).count()
    }

    /// Number of operations that actually mutated the document.
    pub fn changed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, OperationStatus::Applied { changed: true }))
            .count()
    }
}
