//! Specialist roster: typed pipeline stages keyed by role.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, PipelineError, PolicyViolation};
use crate::llm::ReasoningClient;
use crate::negotiation::context::NegotiationContext;
use crate::negotiation::model::{CandidateReply, ThreadAnalysis};
use crate::negotiation::{GeneratorConfig, PatternScorer, ReplyStrategyGenerator, ThreadAnalyzer};

/// Pipeline role a specialist fills. Ordered by pipeline position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistRole {
    Analyst,
    Drafter,
    Scorer,
}

impl SpecialistRole {
    pub fn all() -> [SpecialistRole; 3] {
        [Self::Analyst, Self::Drafter, Self::Scorer]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyst => "analyst",
            Self::Drafter => "drafter",
            Self::Scorer => "scorer",
        }
    }
}

impl std::fmt::Display for SpecialistRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SpecialistRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "analyst" => Ok(Self::Analyst),
            "drafter" => Ok(Self::Drafter),
            "scorer" => Ok(Self::Scorer),
            other => Err(format!("Unknown specialist role: {other}")),
        }
    }
}

/// What a stage sees.
pub struct StageInput<'a> {
    pub ctx: &'a NegotiationContext,
    /// Analysis so far (default before the analyst runs).
    pub analysis: &'a ThreadAnalysis,
    /// Candidates so far (empty before the drafter runs).
    pub candidates: Vec<CandidateReply>,
}

/// What a stage produced.
#[derive(Debug)]
pub enum StageOutput {
    Analysis(ThreadAnalysis),
    Candidates {
        candidates: Vec<CandidateReply>,
        violations: Vec<PolicyViolation>,
    },
    Ranked(Vec<CandidateReply>),
}

/// A pipeline stage.
#[async_trait]
pub trait Specialist: Send + Sync {
    fn role(&self) -> SpecialistRole;

    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput, Error>;
}

// ── Built-in specialists ────────────────────────────────────────────

pub struct AnalystSpecialist {
    analyzer: ThreadAnalyzer,
}

impl AnalystSpecialist {
    pub fn new(analyzer: ThreadAnalyzer) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl Specialist for AnalystSpecialist {
    fn role(&self) -> SpecialistRole {
        SpecialistRole::Analyst
    }

    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput, Error> {
        Ok(StageOutput::Analysis(
            self.analyzer.analyze(&input.ctx.thread).await,
        ))
    }
}

pub struct DrafterSpecialist {
    generator: ReplyStrategyGenerator,
}

impl DrafterSpecialist {
    pub fn new(generator: ReplyStrategyGenerator) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Specialist for DrafterSpecialist {
    fn role(&self) -> SpecialistRole {
        SpecialistRole::Drafter
    }

    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput, Error> {
        let generation = self.generator.generate(input.ctx, input.analysis).await?;
        Ok(StageOutput::Candidates {
            candidates: generation.candidates,
            violations: generation.violations,
        })
    }
}

pub struct ScorerSpecialist {
    scorer: PatternScorer,
}

impl ScorerSpecialist {
    pub fn new(scorer: PatternScorer) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl Specialist for ScorerSpecialist {
    fn role(&self) -> SpecialistRole {
        SpecialistRole::Scorer
    }

    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput, Error> {
        if input.candidates.is_empty() {
            return Err(PipelineError::NoCandidates.into());
        }
        Ok(StageOutput::Ranked(self.scorer.rank(
            input.candidates,
            &input.ctx.settings,
            input.analysis,
        )))
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// At most one specialist per role. Absence is explicit.
#[derive(Default, Clone)]
pub struct SpecialistRegistry {
    specialists: BTreeMap<SpecialistRole, Arc<dyn Specialist>>,
}

impl SpecialistRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the built-in specialists for the listed roles.
    pub fn from_roster(
        roster: &[SpecialistRole],
        llm: ReasoningClient,
        generator: GeneratorConfig,
    ) -> Self {
        let mut registry = Self::new();
        for role in roster {
            let specialist: Arc<dyn Specialist> = match role {
                SpecialistRole::Analyst => Arc::new(AnalystSpecialist::new(
                    ThreadAnalyzer::new(llm.clone())
                        .with_sampling(generator.temperature, generator.max_tokens),
                )),
                SpecialistRole::Drafter => Arc::new(DrafterSpecialist::new(
                    ReplyStrategyGenerator::new(llm.clone(), generator.clone()),
                )),
                SpecialistRole::Scorer => Arc::new(ScorerSpecialist::new(PatternScorer::new())),
            };
            registry.register(specialist);
        }
        registry
    }

    /// Register a specialist, replacing any existing one for its role.
    pub fn register(&mut self, specialist: Arc<dyn Specialist>) -> Option<Arc<dyn Specialist>> {
        self.specialists.insert(specialist.role(), specialist)
    }

    pub fn remove(&mut self, role: SpecialistRole) -> Option<Arc<dyn Specialist>> {
        self.specialists.remove(&role)
    }

    pub fn get(&self, role: SpecialistRole) -> Option<&Arc<dyn Specialist>> {
        self.specialists.get(&role)
    }

    /// Active roles in pipeline order.
    pub fn roles(&self) -> Vec<SpecialistRole> {
        self.specialists.keys().copied().collect()
    }

    /// Roles with no specialist registered.
    pub fn missing(&self) -> Vec<SpecialistRole> {
        SpecialistRole::all()
            .into_iter()
            .filter(|r| !self.specialists.contains_key(r))
            .collect()
    }
}
