//! Orchestration output: aggregated candidates plus run metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::negotiation::model::{CandidateReply, PatternType, ThreadAnalysis};
use crate::orchestration::specialist::SpecialistRole;
use crate::orchestration::state::OrchestrationState;

/// How the selected reply was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingType {
    OrchestratedResponse,
    FallbackResponse,
}

impl ProcessingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrchestratedResponse => "orchestrated_response",
            Self::FallbackResponse => "fallback_response",
        }
    }
}

/// One entry in the diagnostic trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub stage: String,
    pub summary: String,
}

/// Versioned, ordered record of what each stage concluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticTrace {
    pub version: u32,
    pub entries: Vec<TraceEntry>,
}

impl DiagnosticTrace {
    pub const VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, stage: impl Into<String>, summary: impl Into<String>) {
        self.entries.push(TraceEntry {
            stage: stage.into(),
            summary: summary.into(),
        });
    }

    /// Summary for the first entry with the given stage name.
    pub fn summary_for(&self, stage: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.stage == stage)
            .map(|e| e.summary.as_str())
    }
}

impl Default for DiagnosticTrace {
    fn default() -> Self {
        Self::new()
    }
}

/// A phase that was skipped because its specialist is absent or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityGap {
    pub role: SpecialistRole,
    pub reason: String,
}

/// Immutable outcome of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub thread_id: String,
    /// Ranked, best first. Templated candidates for fallback responses.
    pub candidates: Vec<CandidateReply>,
    /// Reply content offered to the approval gate. Never empty.
    pub selected: String,
    pub analysis: ThreadAnalysis,
    pub processing_type: ProcessingType,
    pub active_specialists: Vec<SpecialistRole>,
    pub phases: Vec<OrchestrationState>,
    pub capability_gaps: Vec<CapabilityGap>,
    pub trace: DiagnosticTrace,
    pub produced_at: DateTime<Utc>,
}

impl OrchestrationResult {
    pub fn is_fallback(&self) -> bool {
        self.processing_type == ProcessingType::FallbackResponse
    }

    /// Posture of the selected reply, when it came from a candidate.
    pub fn selected_pattern(&self) -> Option<&PatternType> {
        self.candidates
            .iter()
            .find(|c| c.content == self.selected)
            .map(|c| &c.pattern_type)
    }
}
