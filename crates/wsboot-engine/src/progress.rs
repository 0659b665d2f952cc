//! Ordered startup steps with per-step logs and error flags.
//!
//! The tracker knows nothing about rendering: `label_for` tells the
//! presentation layer whether a step is current/past (in-progress label) or
//! still upcoming (pending label).

use serde::Serialize;

pub const RUNTIME_STEP: usize = 0;
pub const AGENT_STEP: usize = 1;
pub const STARTED_STEP: usize = 2;

#[derive(Clone, Copy, Debug)]
pub struct StepDefinition {
    pub label: &'static str,
    pub in_progress_label: &'static str,
}

pub const STARTUP_STEPS: [StepDefinition; 3] = [
    StepDefinition {
        label: "Starting workspace runtime",
        in_progress_label: "Retrieving the stack's image and launching it",
    },
    StepDefinition {
        label: "Starting workspace agent",
        in_progress_label: "Agents provide RESTful services like intellisense and SSH",
    },
    StepDefinition {
        label: "Workspace started",
        in_progress_label: "Opening",
    },
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProgressStep {
    pub label: String,
    pub in_progress_label: String,
    /// Newline-joined log lines.
    pub logs: String,
    pub has_error: bool,
}

impl ProgressStep {
    fn from_definition(def: &StepDefinition) -> Self {
        Self {
            label: def.label.to_owned(),
            in_progress_label: def.in_progress_label.to_owned(),
            logs: String::new(),
            has_error: false,
        }
    }

    pub fn log_lines(&self) -> impl Iterator<Item = &str> {
        self.logs.lines()
    }
}

#[derive(Clone, Debug)]
pub struct ProgressStepTracker {
    steps: Vec<ProgressStep>,
    current: usize,
}

impl Default for ProgressStepTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressStepTracker {
    /// Tracker over the three startup steps.
    pub fn new() -> Self {
        Self::with_steps(&STARTUP_STEPS)
    }

    pub fn with_steps(definitions: &[StepDefinition]) -> Self {
        Self {
            steps: definitions.iter().map(ProgressStep::from_definition).collect(),
            current: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn steps(&self) -> &[ProgressStep] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&ProgressStep> {
        self.steps.get(index)
    }

    /// Move forward to `to`. Never regresses; returns whether the index changed.
    pub fn advance(&mut self, to: usize) -> bool {
        if to <= self.current || to >= self.steps.len() {
            return false;
        }
        self.current = to;
        true
    }

    pub fn append_log(&mut self, step: usize, line: &str) -> bool {
        let Some(entry) = self.steps.get_mut(step) else {
            return false;
        };
        if !entry.logs.is_empty() {
            entry.logs.push('\n');
        }
        entry.logs.push_str(line);
        true
    }

    /// Replace a step's logs.
    pub fn set_log(&mut self, step: usize, text: &str) -> bool {
        let Some(entry) = self.steps.get_mut(step) else {
            return false;
        };
        entry.logs = text.to_owned();
        true
    }

    pub fn mark_error(&mut self, step: usize) -> bool {
        let Some(entry) = self.steps.get_mut(step) else {
            return false;
        };
        entry.has_error = true;
        true
    }

    pub fn reset(&mut self) {
        for step in &mut self.steps {
            step.logs.clear();
            step.has_error = false;
        }
        self.current = 0;
    }

    pub fn label_for(&self, step: usize) -> Option<&str> {
        let entry = self.steps.get(step)?;
        if self.current >= step {
            Some(&entry.in_progress_label)
        } else {
            Some(&entry.label)
        }
    }

    pub fn has_errors(&self) -> bool {
        self.steps.iter().any(|s| s.has_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_step_zero() {
        let tracker = ProgressStepTracker::new();
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.current_index(), 0);
        assert!(!tracker.has_errors());
    }

    #[test]
    fn advance_is_monotonic() {
        let mut tracker = ProgressStepTracker::new();
        assert!(tracker.advance(1));
        assert!(!tracker.advance(0));
        assert_eq!(tracker.current_index(), 1);
        assert!(!tracker.advance(1));
        assert!(tracker.advance(2));
        assert_eq!(tracker.current_index(), 2);
    }

    #[test]
    fn advance_past_end_is_ignored() {
        let mut tracker = ProgressStepTracker::new();
        assert!(!tracker.advance(3));
        assert_eq!(tracker.current_index(), 0);
    }

    #[test]
    fn logs_are_newline_joined() {
        let mut tracker = ProgressStepTracker::new();
        tracker.append_log(AGENT_STEP, "first");
        tracker.append_log(AGENT_STEP, "second");
        let step = tracker.step(AGENT_STEP).unwrap();
        assert_eq!(step.logs, "first\nsecond");
        assert_eq!(step.log_lines().collect::<Vec<_>>(), vec!["first", "second"]);
        assert!(tracker.step(RUNTIME_STEP).unwrap().logs.is_empty());
    }

    #[test]
    fn set_log_replaces() {
        let mut tracker = ProgressStepTracker::new();
        tracker.append_log(RUNTIME_STEP, "pulling");
        tracker.set_log(RUNTIME_STEP, "Unable to start this workspace.");
        assert_eq!(
            tracker.step(RUNTIME_STEP).unwrap().logs,
            "Unable to start this workspace."
        );
    }

    #[test]
    fn out_of_range_mutations_are_rejected() {
        let mut tracker = ProgressStepTracker::new();
        assert!(!tracker.append_log(7, "x"));
        assert!(!tracker.mark_error(7));
        assert!(!tracker.set_log(7, "x"));
        assert_eq!(tracker.label_for(7), None);
    }

    #[test]
    fn reset_clears_logs_errors_and_index() {
        let mut tracker = ProgressStepTracker::new();
        tracker.advance(STARTED_STEP);
        tracker.append_log(AGENT_STEP, "log");
        tracker.mark_error(AGENT_STEP);
        tracker.reset();
        assert_eq!(tracker.current_index(), 0);
        assert!(!tracker.has_errors());
        assert!(tracker.steps().iter().all(|s| s.logs.is_empty()));
    }

    #[test]
    fn label_switches_once_step_is_reached() {
        let mut tracker = ProgressStepTracker::new();
        assert_eq!(
            tracker.label_for(RUNTIME_STEP),
            Some("Retrieving the stack's image and launching it")
        );
        assert_eq!(tracker.label_for(AGENT_STEP), Some("Starting workspace agent"));
        assert_eq!(tracker.label_for(STARTED_STEP), Some("Workspace started"));

        tracker.advance(AGENT_STEP);
        assert_eq!(
            tracker.label_for(AGENT_STEP),
            Some("Agents provide RESTful services like intellisense and SSH")
        );
        assert_eq!(tracker.label_for(STARTED_STEP), Some("Workspace started"));
    }
}
