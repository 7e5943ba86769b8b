//! Per-attempt workflow state for the agentic tier

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{Classify, ErrorCategory, StrataError};

/// Named steps of a stateful workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Plan,
    Research,
    ChartPlanning,
    ChartExecution,
    Report,
    Persist,
}

impl WorkflowStep {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStep::Plan => "plan",
            WorkflowStep::Research => "research",
            WorkflowStep::ChartPlanning => "chart_planning",
            WorkflowStep::ChartExecution => "chart_execution",
            WorkflowStep::Report => "report",
            WorkflowStep::Persist => "persist",
        }
    }
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A classified failure, kept for the response and for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub message: String,
    /// Step that was running when the failure happened
    pub step: String,
    /// Zero-based attempt index
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(err: &StrataError, step: &str, attempt: u32) -> Self {
        Self {
            category: err.category(),
            message: err.to_string(),
            step: step.to_string(),
            attempt,
            timestamp: Utc::now(),
        }
    }
}

/// Progress of one workflow attempt.
///
/// A fresh state is created for every attempt, so nothing from a failed
/// attempt leaks into the next one.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    steps: Vec<WorkflowStep>,
    current: Option<usize>,
    attempt: u32,
    iteration: u32,
    status: WorkflowStatus,
    errors: Vec<ErrorRecord>,
    started_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(steps: Vec<WorkflowStep>, attempt: u32) -> Self {
        Self {
            steps,
            current: None,
            attempt,
            iteration: 0,
            status: WorkflowStatus::Pending,
            errors: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Step list of the deep-research workflow
    pub fn research(attempt: u32) -> Self {
        Self::new(
            vec![
                WorkflowStep::Plan,
                WorkflowStep::Research,
                WorkflowStep::ChartPlanning,
                WorkflowStep::ChartExecution,
                WorkflowStep::Report,
                WorkflowStep::Persist,
            ],
            attempt,
        )
    }

    /// Move the step pointer forward to `step`.
    ///
    /// Returns false, leaving the pointer alone, for unknown steps or steps
    /// that would move it backwards.
    pub fn enter(&mut self, step: WorkflowStep) -> bool {
        let Some(index) = self.steps.iter().position(|s| *s == step) else {
            tracing::warn!(step = %step, "[WORKFLOW] Step not part of this workflow");
            return false;
        };
        if matches!(self.current, Some(current) if index < current) {
            tracing::warn!(step = %step, "[WORKFLOW] Refusing to move step pointer backwards");
            return false;
        }
        self.current = Some(index);
        self.status = WorkflowStatus::Running;
        tracing::debug!(step = %step, attempt = self.attempt, "[WORKFLOW] Entered step");
        true
    }

    pub fn current_step(&self) -> Option<WorkflowStep> {
        self.current.map(|i| self.steps[i])
    }

    /// Start the next research iteration and return its 1-based number
    pub fn next_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record a failure against the current step and mark the attempt failed.
    pub fn fail(&mut self, err: &StrataError) -> ErrorRecord {
        let step = self
            .current_step()
            .map(WorkflowStep::as_str)
            .unwrap_or("start");
        let record = ErrorRecord::new(err, step, self.attempt);
        self.errors.push(record.clone());
        self.status = WorkflowStatus::Failed;
        record
    }

    pub fn complete(&mut self) {
        self.status = WorkflowStatus::Completed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_pointer_only_moves_forward() {
        let mut state = WorkflowState::research(0);
        assert_eq!(state.current_step(), None);
        assert_eq!(state.status(), WorkflowStatus::Pending);

        assert!(state.enter(WorkflowStep::Plan));
        assert!(state.enter(WorkflowStep::Research));
        assert!(!state.enter(WorkflowStep::Plan));
        assert_eq!(state.current_step(), Some(WorkflowStep::Research));
        assert_eq!(state.status(), WorkflowStatus::Running);

        let mut short = WorkflowState::new(vec![WorkflowStep::Plan], 0);
        assert!(!short.enter(WorkflowStep::Persist));
    }

    #[test]
    fn test_failure_is_recorded_against_current_step() {
        let mut state = WorkflowState::research(2);
        state.enter(WorkflowStep::Plan);
        state.enter(WorkflowStep::Research);
        assert_eq!(state.next_iteration(), 1);

        let record = state.fail(&StrataError::NoProviders);
        assert_eq!(record.step, "research");
        assert_eq!(record.attempt, 2);
        assert_eq!(record.category, ErrorCategory::Business);
        assert_eq!(state.status(), WorkflowStatus::Failed);
        assert_eq!(state.errors().len(), 1);
    }

    #[test]
    fn test_failure_before_any_step() {
        let mut state = WorkflowState::research(0);
        let record = state.fail(&StrataError::NoProviders);
        assert_eq!(record.step, "start");
    }
}
