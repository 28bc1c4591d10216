//! Ordered multi-step gestures composed from individual matches.
//!
//! A [`SequenceTracker`] watches the match stream and advances through its
//! steps when the expected shape arrives.  State machine:
//!
//! ```text
//! WaitingForFirst --step 0 matched--> InProgress(1) --...--> completed
//!        ^                                  |
//!        +------ timeout / mismatch --------+
//! ```

use tracing::{debug, info, warn};

use crate::detector::{GestureMatch, ShapeHandle, TargetId};
use crate::sexp::{escape_string, fmt_bool};

// ── Definition ─────────────────────────────────────────────

/// One expected shape in a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceStep {
    pub label: String,
    /// `None` marks a misconfigured step (e.g. an unknown shape name); a
    /// sequence reaching it resets instead of advancing.
    pub shape: Option<ShapeHandle>,
}

impl SequenceStep {
    pub fn new(label: impl Into<String>, shape: ShapeHandle) -> Self {
        Self {
            label: label.into(),
            shape: Some(shape),
        }
    }
}

/// An ordered list of steps plus timing rules.
#[derive(Debug, Clone)]
pub struct SequenceDefinition {
    pub id: String,
    pub steps: Vec<SequenceStep>,
    /// Only matches from the target that started the sequence may advance it.
    pub require_same_target: bool,
    /// Longest allowed pause between consecutive steps (seconds).
    pub max_step_gap_s: Option<f64>,
    /// A step-0 match arriving mid-sequence starts over instead of resetting.
    pub restart_on_first_match: bool,
}

impl SequenceDefinition {
    pub fn new(id: impl Into<String>, steps: Vec<SequenceStep>) -> Self {
        Self {
            id: id.into(),
            steps,
            require_same_target: true,
            max_step_gap_s: Some(2.0),
            restart_on_first_match: true,
        }
    }

    /// Generate s-expression for config output.
    pub fn config_sexp(&self, shape_name: impl Fn(ShapeHandle) -> Option<String>) -> String {
        let steps: Vec<String> = self
            .steps
            .iter()
            .map(|step| {
                let shape = step
                    .shape
                    .and_then(&shape_name)
                    .map(|name| format!("\"{}\"", escape_string(&name)))
                    .unwrap_or_else(|| "nil".to_string());
                format!("(:label \"{}\" :shape {})", escape_string(&step.label), shape)
            })
            .collect();
        let gap = self
            .max_step_gap_s
            .map(|g| g.to_string())
            .unwrap_or_else(|| "nil".to_string());
        format!(
            "(:id \"{}\" :require-same-target {} :max-step-gap {} :restart-on-first-match {} :steps ({}))",
            escape_string(&self.id),
            fmt_bool(self.require_same_target),
            gap,
            fmt_bool(self.restart_on_first_match),
            steps.join(" ")
        )
    }
}

// ── State ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencePhase {
    WaitingForFirst,
    /// `index` is the step expected next.
    InProgress { index: usize },
}

/// Emitted once when the last step of a sequence is matched.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceCompletion {
    pub sequence_id: String,
    /// Target that started the sequence.
    pub target: TargetId,
    /// One match per step, in step order.
    pub matches: Vec<GestureMatch>,
}

/// Runtime progress through one [`SequenceDefinition`].
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    definition: SequenceDefinition,
    phase: SequencePhase,
    active_target: Option<TargetId>,
    last_step_s: f64,
    matches: Vec<GestureMatch>,
}

impl SequenceTracker {
    pub fn new(definition: SequenceDefinition) -> Self {
        Self {
            definition,
            phase: SequencePhase::WaitingForFirst,
            active_target: None,
            last_step_s: 0.0,
            matches: Vec::new(),
        }
    }

    pub fn definition(&self) -> &SequenceDefinition {
        &self.definition
    }

    pub fn phase(&self) -> SequencePhase {
        self.phase
    }

    pub fn active_target(&self) -> Option<TargetId> {
        self.active_target
    }

    /// Steps matched so far and total step count.
    pub fn progress(&self) -> (usize, usize) {
        let done = match self.phase {
            SequencePhase::WaitingForFirst => 0,
            SequencePhase::InProgress { index } => index,
        };
        (done, self.definition.steps.len())
    }

    /// Return to `WaitingForFirst`, dropping accumulated matches.
    pub fn reset(&mut self) {
        self.phase = SequencePhase::WaitingForFirst;
        self.active_target = None;
        self.last_step_s = 0.0;
        self.matches.clear();
    }

    /// Feed one match.  Returns the completion if this match finished the
    /// sequence.
    pub fn on_match(&mut self, m: &GestureMatch) -> Option<SequenceCompletion> {
        let index = match self.phase {
            SequencePhase::WaitingForFirst => return self.try_start(m),
            SequencePhase::InProgress { index } => index,
        };

        if self.definition.require_same_target && self.active_target != Some(m.target) {
            return None;
        }

        if let Some(gap) = self.definition.max_step_gap_s {
            if m.timestamp_s - self.last_step_s > gap {
                debug!(
                    "Sequence {:?} timed out at step {} ({:.2}s gap)",
                    self.definition.id,
                    index,
                    m.timestamp_s - self.last_step_s
                );
                self.reset();
                return self.try_start(m);
            }
        }

        let Some(expected) = self.definition.steps.get(index).and_then(|s| s.shape) else {
            warn!(
                "Sequence {:?} step {} has no shape; resetting",
                self.definition.id, index
            );
            self.reset();
            return None;
        };

        if m.shape == expected {
            return self.accept(m, index + 1);
        }

        let restarts = self.definition.restart_on_first_match
            && self.definition.steps.first().and_then(|s| s.shape) == Some(m.shape);
        self.reset();
        if restarts {
            debug!("Sequence {:?} restarted by {}", self.definition.id, m.shape_id);
            self.try_start(m)
        } else {
            None
        }
    }

    /// Reset an in-progress sequence whose step gap has elapsed by `now_s`.
    /// Returns true if it was reset.
    pub fn expire(&mut self, now_s: f64) -> bool {
        let Some(gap) = self.definition.max_step_gap_s else {
            return false;
        };
        if self.phase == SequencePhase::WaitingForFirst || now_s - self.last_step_s <= gap {
            return false;
        }
        debug!("Sequence {:?} expired", self.definition.id);
        self.reset();
        true
    }

    fn try_start(&mut self, m: &GestureMatch) -> Option<SequenceCompletion> {
        let first = self.definition.steps.first()?;
        let Some(shape) = first.shape else {
            warn!("Sequence {:?} first step has no shape", self.definition.id);
            self.reset();
            return None;
        };
        if m.shape != shape {
            return None;
        }
        self.active_target = Some(m.target);
        self.accept(m, 1)
    }

    fn accept(&mut self, m: &GestureMatch, next_index: usize) -> Option<SequenceCompletion> {
        self.matches.push(m.clone());
        self.last_step_s = m.timestamp_s;

        if next_index < self.definition.steps.len() {
            self.phase = SequencePhase::InProgress { index: next_index };
            debug!(
                "Sequence {:?} advanced to step {}/{}",
                self.definition.id,
                next_index,
                self.definition.steps.len()
            );
            return None;
        }

        let target = self.active_target.unwrap_or(m.target);
        let matches = std::mem::take(&mut self.matches);
        self.reset();
        info!(
            "Sequence {:?} completed by target {}",
            self.definition.id, target
        );
        Some(SequenceCompletion {
            sequence_id: self.definition.id.clone(),
            target,
            matches,
        })
    }

    /// Generate s-expression for status output.
    pub fn status_sexp(&self) -> String {
        let (done, total) = self.progress();
        let target = self
            .active_target
            .map(|t| t.to_string())
            .unwrap_or_else(|| "nil".to_string());
        format!(
            "(:id \"{}\" :step {} :of {} :target {})",
            escape_string(&self.definition.id),
            done,
            total,
            target
        )
    }
}

// ── Tests ──────────────────────────────────────────────────
