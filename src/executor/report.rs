use serde::{Deserialize, Serialize};

/// Where a reported problem came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Resolution,
    Placement,
    Environment,
    Movement,
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildWarning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    pub class: ErrorClass,
    pub message: String,
}

/// Outcome of one executor run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub build_id: String,
    pub plan_hash: String,
    /// Includes skipped and unverified placements
    pub placed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub unverified: u64,
    pub bulk_ops_issued: u64,
    pub bulk_ops_failed: u64,
    pub moves: u64,
    pub move_timeouts: u64,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub resumed_from_step: usize,
    pub cancelled: bool,
    pub warnings: Vec<BuildWarning>,
    pub elapsed_ms: u64,
}

impl BuildReport {
    pub fn warn(&mut self, step: Option<usize>, class: ErrorClass, message: impl Into<String>) {
        self.warnings.push(BuildWarning {
            step,
            class,
            message: message.into(),
        });
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.steps_completed == self.total_steps
    }

    pub fn warnings_of(&self, class: ErrorClass) -> impl Iterator<Item = &BuildWarning> {
        self.warnings.iter().filter(move |w| w.class == class)
    }
}
