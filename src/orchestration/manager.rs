//! Orchestration manager: drives one inbound message through the
//! specialist pipeline and falls back to templates when a stage fails.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{Error, PipelineError};
use crate::negotiation::context::{ContextLoader, NegotiationContext};
use crate::negotiation::model::{CandidateReply, CompanySettings, Message, PatternType, ThreadAnalysis};
use crate::negotiation::strategy::ordered_roster;
use crate::negotiation::FallbackTemplateEngine;
use crate::orchestration::result::{
    CapabilityGap, DiagnosticTrace, OrchestrationResult, ProcessingType,
};
use crate::orchestration::specialist::{SpecialistRegistry, SpecialistRole, StageInput, StageOutput};
use crate::orchestration::state::{OrchestrationState, RunState};

/// An inbound message plus everything needed to load its context.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub thread_id: String,
    pub message: Message,
    /// `None` uses the owner's stored settings.
    pub settings: Option<CompanySettings>,
    /// Owner of the company settings.
    pub user_id: Option<String>,
    /// Seeds the thread when it has not been seen before.
    pub history: Vec<Message>,
    pub custom_instructions: Option<String>,
}

/// Result of `run`: the loaded context and what the pipeline produced.
#[derive(Debug, Clone)]
pub struct Orchestrated {
    pub context: NegotiationContext,
    pub result: OrchestrationResult,
}

pub struct OrchestrationManager {
    loader: ContextLoader,
    registry: SpecialistRegistry,
    fallback: FallbackTemplateEngine,
    postures: Vec<PatternType>,
    max_candidates: usize,
}

impl OrchestrationManager {
    pub fn new(
        loader: ContextLoader,
        registry: SpecialistRegistry,
        postures: Vec<PatternType>,
        max_candidates: usize,
    ) -> Self {
        Self {
            loader,
            registry,
            fallback: FallbackTemplateEngine::new(),
            postures,
            max_candidates,
        }
    }

    /// Roles currently registered.
    pub fn roster(&self) -> Vec<SpecialistRole> {
        self.registry.roles()
    }

    pub fn registry(&self) -> &SpecialistRegistry {
        &self.registry
    }

    /// Load the context for an inbound message and run the pipeline.
    ///
    /// Only invalid input is an error. Any stage failure, including a store
    /// failure while loading, ends in a fallback response.
    pub async fn run(&self, request: InboundRequest) -> Result<Orchestrated, Error> {
        let InboundRequest {
            thread_id,
            message,
            settings,
            user_id,
            history,
            custom_instructions,
        } = request;

        let mut run = RunState::new();
        let mut trace = DiagnosticTrace::new();
        run.transition_to(OrchestrationState::Loading, None)?;

        let loaded = self
            .loader
            .load(
                &thread_id,
                message.clone(),
                settings.clone(),
                user_id.as_deref(),
                history.clone(),
                custom_instructions.clone(),
            )
            .await;

        match loaded {
            Ok(context) => {
                trace.record(
                    "loading",
                    format!(
                        "{} messages, counterparty {}",
                        context.thread.messages().len(),
                        if context.counterparty.is_some() { "known" } else { "unknown" }
                    ),
                );
                let result = self.drive(&context, run, trace).await;
                Ok(Orchestrated { context, result })
            }
            Err(Error::Validation(e)) => Err(e.into()),
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "Context load failed, using fallback");
                let mut messages = history;
                messages.push(message);
                let context = ContextLoader::from_messages(
                    &thread_id,
                    messages,
                    settings.unwrap_or_default(),
                    custom_instructions,
                )?;
                trace.record("loading", format!("failed: {e}"));
                fail(&mut run, &e);
                let analysis = baseline_analysis(&context);
                let result = self
                    .fallback_result(&context, run, trace, Vec::new(), analysis)
                    .await;
                Ok(Orchestrated { context, result })
            }
        }
    }

    /// Run the pipeline over an already assembled context.
    pub async fn orchestrate(&self, context: &NegotiationContext) -> OrchestrationResult {
        let mut run = RunState::new();
        let mut trace = DiagnosticTrace::new();
        if let Err(e) = run.transition_to(OrchestrationState::Loading, None) {
            debug!(error = %e, "Unexpected transition failure");
        }
        trace.record(
            "loading",
            format!("{} messages supplied", context.thread.messages().len()),
        );
        self.drive(context, run, trace).await
    }

    async fn drive(
        &self,
        ctx: &NegotiationContext,
        mut run: RunState,
        mut trace: DiagnosticTrace,
    ) -> OrchestrationResult {
        let mut gaps = Vec::new();
        let mut analysis = baseline_analysis(ctx);

        match self
            .pipeline(ctx, &mut run, &mut trace, &mut gaps, &mut analysis)
            .await
        {
            Ok(candidates) => {
                let selected = candidates
                    .first()
                    .map(|c| c.content.clone())
                    .unwrap_or_else(|| self.fallback.render(ctx));
                info!(
                    thread_id = %ctx.thread.id,
                    candidates = candidates.len(),
                    gaps = gaps.len(),
                    "Orchestration complete"
                );
                OrchestrationResult {
                    thread_id: ctx.thread.id.clone(),
                    candidates,
                    selected,
                    analysis,
                    processing_type: ProcessingType::OrchestratedResponse,
                    active_specialists: self.registry.roles(),
                    phases: run.phases(),
                    capability_gaps: gaps,
                    trace,
                    produced_at: Utc::now(),
                }
            }
            Err(e) => {
                warn!(thread_id = %ctx.thread.id, error = %e, "Orchestration failed, using fallback");
                fail(&mut run, &e);
                self.fallback_result(ctx, run, trace, gaps, analysis).await
            }
        }
    }

    async fn pipeline(
        &self,
        ctx: &NegotiationContext,
        run: &mut RunState,
        trace: &mut DiagnosticTrace,
        gaps: &mut Vec<CapabilityGap>,
        analysis: &mut ThreadAnalysis,
    ) -> Result<Vec<CandidateReply>, Error> {
        // Analyzing
        run.transition_to(OrchestrationState::Analyzing, None)?;
        match self.registry.get(SpecialistRole::Analyst) {
            Some(analyst) => {
                let baseline = analysis.clone();
                let input = StageInput {
                    ctx,
                    analysis: &baseline,
                    candidates: Vec::new(),
                };
                match analyst.run(input).await {
                    Ok(StageOutput::Analysis(a)) => *analysis = a,
                    Ok(other) => gaps.push(gap(SpecialistRole::Analyst, unexpected(&other))),
                    Err(e) => gaps.push(gap(SpecialistRole::Analyst, e.to_string())),
                }
            }
            None => gaps.push(gap(SpecialistRole::Analyst, "no analyst registered")),
        }
        trace.record(
            "analyzing",
            format!(
                "stage={} tone={:?} urgency={:?} topics=[{}] source={:?}",
                analysis.relationship_stage,
                analysis.emotional_tone,
                analysis.urgency_level,
                analysis.main_topics.join(", "),
                analysis.source,
            ),
        );

        // Drafting
        run.transition_to(OrchestrationState::Drafting, None)?;
        let Some(drafter) = self.registry.get(SpecialistRole::Drafter) else {
            gaps.push(gap(SpecialistRole::Drafter, "no drafter registered"));
            return Err(PipelineError::Stage {
                stage: "drafting".into(),
                reason: "no drafter registered".into(),
            }
            .into());
        };
        let input = StageInput {
            ctx,
            analysis,
            candidates: Vec::new(),
        };
        let candidates = match drafter.run(input).await {
            Ok(StageOutput::Candidates {
                candidates,
                violations,
            }) => {
                for violation in &violations {
                    trace.record("policy", violation.to_string());
                }
                candidates
            }
            Ok(other) => {
                return Err(PipelineError::Stage {
                    stage: "drafting".into(),
                    reason: unexpected(&other),
                }
                .into());
            }
            Err(e) => {
                gaps.push(gap(SpecialistRole::Drafter, e.to_string()));
                return Err(e);
            }
        };
        if candidates.is_empty() {
            return Err(PipelineError::NoCandidates.into());
        }
        trace.record(
            "drafting",
            format!(
                "{} candidates: {}",
                candidates.len(),
                candidates
                    .iter()
                    .map(|c| c.pattern_type.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        );

        // Scoring
        run.transition_to(OrchestrationState::Scoring, None)?;
        let ranked = self.rank(ctx, analysis, candidates, gaps).await;
        trace.record("scoring", score_summary(&ranked));

        run.transition_to(OrchestrationState::Ready, None)?;
        trace.record("ready", format!("selected {}", ranked[0].pattern_type));
        Ok(ranked)
    }

    /// Rank with the scorer when one is registered; otherwise keep the
    /// drafter's order and scores.
    async fn rank(
        &self,
        ctx: &NegotiationContext,
        analysis: &ThreadAnalysis,
        candidates: Vec<CandidateReply>,
        gaps: &mut Vec<CapabilityGap>,
    ) -> Vec<CandidateReply> {
        let Some(scorer) = self.registry.get(SpecialistRole::Scorer) else {
            gaps.push(gap(SpecialistRole::Scorer, "no scorer registered"));
            return candidates;
        };
        let input = StageInput {
            ctx,
            analysis,
            candidates: candidates.clone(),
        };
        match scorer.run(input).await {
            Ok(StageOutput::Ranked(ranked)) if !ranked.is_empty() => ranked,
            Ok(other) => {
                gaps.push(gap(SpecialistRole::Scorer, unexpected(&other)));
                candidates
            }
            Err(e) => {
                gaps.push(gap(SpecialistRole::Scorer, e.to_string()));
                candidates
            }
        }
    }

    async fn fallback_result(
        &self,
        ctx: &NegotiationContext,
        run: RunState,
        mut trace: DiagnosticTrace,
        mut gaps: Vec<CapabilityGap>,
        analysis: ThreadAnalysis,
    ) -> OrchestrationResult {
        let selected = self.fallback.render(ctx);
        let postures = ordered_roster(&self.postures, &ctx.settings, self.max_candidates);
        let templated = self.fallback.candidates(ctx, &postures);
        let candidates = if templated.is_empty() {
            templated
        } else {
            self.rank(ctx, &analysis, templated, &mut gaps).await
        };
        trace.record(
            "fallback",
            format!("template reply, {} templated candidates", candidates.len()),
        );

        OrchestrationResult {
            thread_id: ctx.thread.id.clone(),
            candidates,
            selected,
            analysis,
            processing_type: ProcessingType::FallbackResponse,
            active_specialists: self.registry.roles(),
            phases: run.phases(),
            capability_gaps: gaps,
            trace,
            produced_at: Utc::now(),
        }
    }
}

/// Default analysis carrying the stored stage.
fn baseline_analysis(ctx: &NegotiationContext) -> ThreadAnalysis {
    ThreadAnalysis {
        relationship_stage: ctx.thread.stage(),
        ..Default::default()
    }
}

fn fail(run: &mut RunState, error: &Error) {
    if let Err(e) = run.fail(error.to_string()) {
        debug!(error = %e, "Run already terminal");
    }
}

fn gap(role: SpecialistRole, reason: impl Into<String>) -> CapabilityGap {
    let reason = reason.into();
    warn!(role = %role, reason = %reason, "Capability gap");
    CapabilityGap { role, reason }
}

fn unexpected(output: &StageOutput) -> String {
    let kind = match output {
        StageOutput::Analysis(_) => "analysis",
        StageOutput::Candidates { .. } => "candidates",
        StageOutput::Ranked(_) => "ranking",
    };
    format!("unexpected {kind} output")
}

fn score_summary(ranked: &[CandidateReply]) -> String {
    ranked
        .iter()
        .map(|c| format!("{}={:.2}", c.pattern_type, c.recommendation_score()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::llm::{
        CompletionRequest, CompletionResponse, LlmProvider, ReasoningClient,
    };
    use crate::error::LlmError;
    use crate::negotiation::model::{RelationshipStage, ToneFamily};
    use crate::negotiation::GeneratorConfig;
    use crate::store::memory::{MemoryStore, StaticDirectory};
    use crate::store::traits::NegotiationStore;
    use OrchestrationState::*;

    const ANALYSIS: &str = r#"{"relationship_stage":"initial_contact","emotional_tone":"positive","urgency_level":"normal","main_topics":["pricing"]}"#;
    const CANDIDATES: &str = r#"[
        {"pattern_type":"friendly_enthusiastic","content":"料金は20,000円〜100,000円の範囲でご相談できます！","reasoning":"warm","tone":"friendly"},
        {"pattern_type":"cautious_professional","content":"料金につきましては詳細を確認のうえご連絡いたします。","reasoning":"careful","tone":"professional"},
        {"pattern_type":"business_focused","content":"料金体系をご提示します。","reasoning":"direct","tone":"business"}
    ]"#;

    /// Answers analysis prompts and drafting prompts differently.
    struct ScriptedProvider;

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let system = &request.messages[0].content;
            let content = if system.contains("JSON array") { CANDIDATES } else { ANALYSIS };
            Ok(CompletionResponse {
                content: content.to_string(),
            })
        }
    }

    fn settings() -> CompanySettings {
        CompanySettings {
            company_name: "InfuMatch株式会社".into(),
            contact_person: "田中美咲".into(),
            negotiation_tone: ToneFamily::Friendly,
            ..Default::default()
        }
    }

    fn manager(llm: ReasoningClient, roster: &[SpecialistRole]) -> (OrchestrationManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let loader = ContextLoader::new(store.clone(), Arc::new(StaticDirectory::new(Vec::new())));
        let config = GeneratorConfig::default();
        let registry = SpecialistRegistry::from_roster(roster, llm, config.clone());
        (
            OrchestrationManager::new(loader, registry, config.roster, config.max_candidates),
            store,
        )
    }

    fn scripted() -> ReasoningClient {
        ReasoningClient::new(
            Some(Arc::new(ScriptedProvider)),
            std::time::Duration::from_secs(5),
            0,
        )
    }

    fn request(body: &str) -> InboundRequest {
        InboundRequest {
            thread_id: "t-1".into(),
            message: Message::inbound("t-1", "creator@example.com", body),
            settings: Some(settings()),
            user_id: None,
            history: Vec::new(),
            custom_instructions: None,
        }
    }

    #[tokio::test]
    async fn full_roster_reaches_ready() {
        let (manager, store) = manager(scripted(), &SpecialistRole::all());
        let out = manager
            .run(request("料金についてもう少し詳しく教えていただけますか？"))
            .await
            .unwrap();
        let result = out.result;

        assert_eq!(result.processing_type, ProcessingType::OrchestratedResponse);
        assert_eq!(result.phases, vec![Idle, Loading, Analyzing, Drafting, Scoring, Ready]);
        assert_eq!(result.candidates.len(), 3);
        assert!(result.capability_gaps.is_empty());
        assert_eq!(result.selected, result.candidates[0].content);
        assert_eq!(result.analysis.relationship_stage, RelationshipStage::InitialContact);
        assert!(result.trace.summary_for("scoring").is_some());
        assert!(store.get_thread("t-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn disabled_backend_falls_back() {
        let (manager, _) = manager(ReasoningClient::disabled(), &SpecialistRole::all());
        let result = manager.run(request("料金は？")).await.unwrap().result;

        assert!(result.is_fallback());
        assert_eq!(result.phases.last(), Some(&Failed));
        assert!(result.selected.contains("InfuMatch株式会社"));
        assert!(result.selected.contains("田中美咲"));
        assert_eq!(result.candidates.len(), 3);
        assert_eq!(
            result.selected_pattern(),
            Some(&PatternType::CautiousProfessional)
        );
        assert!(result.capability_gaps.iter().any(|g| g.role == SpecialistRole::Drafter));
    }

    #[tokio::test]
    async fn missing_analyst_is_a_gap_not_a_failure() {
        let (manager, _) = manager(scripted(), &[SpecialistRole::Drafter, SpecialistRole::Scorer]);
        let result = manager.run(request("料金は？")).await.unwrap().result;

        assert_eq!(result.processing_type, ProcessingType::OrchestratedResponse);
        assert_eq!(result.capability_gaps.len(), 1);
        assert_eq!(result.capability_gaps[0].role, SpecialistRole::Analyst);
        assert_eq!(result.analysis.relationship_stage, RelationshipStage::InitialContact);
    }

    #[tokio::test]
    async fn missing_scorer_keeps_draft_order() {
        let (manager, _) = manager(scripted(), &[SpecialistRole::Analyst, SpecialistRole::Drafter]);
        let result = manager.run(request("料金は？")).await.unwrap().result;

        assert_eq!(result.phases.last(), Some(&Ready));
        assert_eq!(result.capability_gaps[0].role, SpecialistRole::Scorer);
        assert_eq!(result.candidates[0].pattern_type, PatternType::FriendlyEnthusiastic);
        assert!(result.candidates.iter().all(|c| c.recommendation_score() == 0.5));
    }

    #[tokio::test]
    async fn missing_drafter_falls_back() {
        let (manager, _) = manager(scripted(), &[SpecialistRole::Analyst, SpecialistRole::Scorer]);
        let result = manager.run(request("料金は？")).await.unwrap().result;

        assert!(result.is_fallback());
        assert_eq!(result.phases, vec![Idle, Loading, Analyzing, Drafting, Failed]);
    }

    #[tokio::test]
    async fn every_draft_naming_an_avoided_topic_falls_back() {
        let (manager, _) = manager(scripted(), &SpecialistRole::all());
        let mut req = request("料金は？");
        if let Some(s) = req.settings.as_mut() {
            s.avoid_topics = vec!["料金".into()];
        }
        let result = manager.run(req).await.unwrap().result;

        assert!(result.is_fallback());
        assert_eq!(result.phases.last(), Some(&Failed));
        let drafter_gap = result
            .capability_gaps
            .iter()
            .find(|g| g.role == SpecialistRole::Drafter)
            .unwrap();
        assert!(drafter_gap.reason.contains("avoid-topic"));
        assert!(!result.selected.contains("料金"));
        assert!(!result.candidates.is_empty());
        assert!(result.candidates.iter().all(|c| !c.content.contains("料金")));
    }

    #[tokio::test]
    async fn fallback_reply_never_names_an_avoided_topic() {
        let (manager, _) = manager(ReasoningClient::disabled(), &SpecialistRole::all());
        let mut req = request("料金について教えてください");
        if let Some(s) = req.settings.as_mut() {
            s.avoid_topics = vec!["確認".into()];
        }
        let result = manager.run(req).await.unwrap().result;

        assert!(result.is_fallback());
        assert!(!result.selected.is_empty());
        assert!(!result.selected.contains("確認"));
        assert!(result.candidates.iter().all(|c| !c.content.contains("確認")));
        assert_eq!(
            result.selected_pattern(),
            Some(&PatternType::CautiousProfessional)
        );
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (manager, _) = manager(scripted(), &SpecialistRole::all());
        let err = manager.run(request("  ")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
