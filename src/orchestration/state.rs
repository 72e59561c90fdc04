//! Orchestration state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// State of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationState {
    /// Waiting for an inbound message.
    Idle,
    /// Assembling the negotiation context.
    Loading,
    /// Classifying the thread.
    Analyzing,
    /// Generating candidate replies.
    Drafting,
    /// Scoring and ranking candidates.
    Scoring,
    /// Candidates ready for the approval gate.
    Ready,
    /// A stage failed; the fallback engine takes over.
    Failed,
}

impl OrchestrationState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: OrchestrationState) -> bool {
        use OrchestrationState::*;

        if target == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, target),
            (Idle, Loading)
                | (Loading, Analyzing)
                | (Analyzing, Drafting)
                | (Drafting, Scoring)
                | (Scoring, Ready)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Analyzing => "analyzing",
            Self::Drafting => "drafting",
            Self::Scoring => "scoring",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: OrchestrationState,
    pub to: OrchestrationState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Tracks the current state of a run and every transition it made.
#[derive(Debug, Clone)]
pub struct RunState {
    state: OrchestrationState,
    transitions: Vec<StateTransition>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            state: OrchestrationState::Idle,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> OrchestrationState {
        self.state
    }

    /// Transition to a new state, refusing illegal moves.
    pub fn transition_to(
        &mut self,
        next: OrchestrationState,
        reason: Option<String>,
    ) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(from = %self.state, to = %next, "Orchestration transition");
        self.transitions.push(StateTransition {
            from: self.state,
            to: next,
            timestamp: Utc::now(),
            reason,
        });
        self.state = next;
        Ok(())
    }

    /// Move to `Failed` from any non-terminal state.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), PipelineError> {
        self.transition_to(OrchestrationState::Failed, Some(reason.into()))
    }

    /// Ordered states visited, starting with `Idle`.
    pub fn phases(&self) -> Vec<OrchestrationState> {
        std::iter::once(OrchestrationState::Idle)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }
}
