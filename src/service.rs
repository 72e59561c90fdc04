//! Negotiation service: wires the pipeline, the gate, and the store
//! together behind the operations the HTTP layer exposes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::approval::{ApprovalDecision, ApprovalGate, ApprovalPolicy, Disposition, GateRuling, SweepReport};
use crate::config::{OrchestrationConfig, Readiness};
use crate::error::{DatabaseError, Error};
use crate::llm::{LlmProvider, ReasoningClient};
use crate::negotiation::context::ContextLoader;
use crate::negotiation::model::{CompanySettings, Message};
use crate::orchestration::{
    InboundRequest, Orchestrated, OrchestrationManager, OrchestrationResult, OrchestrationState,
    SpecialistRegistry, SpecialistRole, ThreadSerializer,
};
use crate::store::traits::{CounterpartyDirectory, NegotiationStore};

/// Thread id used for stateless reply-pattern requests that carry none.
const AD_HOC_THREAD: &str = "ad-hoc";

/// What happened to one inbound message.
#[derive(Debug, Clone, Serialize)]
pub struct InboundOutcome {
    pub result: OrchestrationResult,
    pub ruling: GateRuling,
}

/// Result of archiving a thread.
#[derive(Debug, Clone, Serialize)]
pub struct ArchivedThread {
    pub thread_id: String,
    /// Pending reply rejected by the archive, if there was one.
    pub withdrawn: Option<ApprovalDecision>,
}

/// Readiness plus the active roster.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub readiness: Readiness,
    pub specialists: Vec<SpecialistRole>,
    /// Roles with no specialist; their stage is skipped or falls back.
    pub missing_specialists: Vec<SpecialistRole>,
    pub model: Option<String>,
    pub policy: ApprovalPolicy,
    pub pending_replies: usize,
}

pub struct NegotiationService {
    manager: OrchestrationManager,
    gate: ApprovalGate,
    store: Arc<dyn NegotiationStore>,
    serializer: ThreadSerializer,
    readiness: Readiness,
    model: Option<String>,
}

impl NegotiationService {
    pub fn new(
        config: &OrchestrationConfig,
        policy: ApprovalPolicy,
        provider: Option<Arc<dyn LlmProvider>>,
        readiness: Readiness,
        store: Arc<dyn NegotiationStore>,
        directory: Arc<dyn CounterpartyDirectory>,
    ) -> Self {
        let readiness = match (&provider, readiness) {
            (None, Readiness::Ready) => Readiness::Degraded {
                reason: "no reasoning backend configured".to_string(),
            },
            (_, readiness) => readiness,
        };
        let model = provider.as_ref().map(|p| p.model_name().to_string());
        let llm = ReasoningClient::new(provider, config.request_timeout, config.max_retries);
        let registry =
            SpecialistRegistry::from_roster(&config.specialists, llm, config.generator.clone());

        let loader = ContextLoader::new(Arc::clone(&store), directory);
        let manager = OrchestrationManager::new(
            loader,
            registry,
            config.generator.roster.clone(),
            config.generator.max_candidates,
        );

        Self {
            manager,
            gate: ApprovalGate::new(policy, Arc::clone(&store)),
            store,
            serializer: ThreadSerializer::new(),
            readiness,
            model,
        }
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Draft and rank replies for a supplied conversation. Nothing is stored.
    pub async fn reply_patterns(
        &self,
        messages: Vec<Message>,
        settings: CompanySettings,
        custom_instructions: Option<String>,
    ) -> Result<OrchestrationResult, Error> {
        let thread_id = messages
            .iter()
            .map(|m| m.thread_id.trim())
            .find(|id| !id.is_empty())
            .unwrap_or(AD_HOC_THREAD)
            .to_string();
        let context =
            ContextLoader::from_messages(&thread_id, messages, settings, custom_instructions)?;
        Ok(self.manager.orchestrate(&context).await)
    }

    /// Process an inbound message end to end: orchestrate, audit, and gate.
    ///
    /// Messages on the same thread are handled one at a time, in arrival order.
    pub async fn handle_inbound(&self, request: InboundRequest) -> Result<InboundOutcome, Error> {
        let thread_key = request.thread_id.trim().to_string();
        let _turn = self.serializer.acquire(&thread_key).await;

        let Orchestrated {
            mut context,
            result,
        } = self.manager.run(request).await?;

        if let Err(e) = self.store.record_orchestration(&result).await {
            warn!(thread_id = %result.thread_id, error = %e, "Failed to record orchestration audit");
        }

        let ruling = self.gate.decide(&result, &context).await?;

        // The loader only persisted the thread when loading succeeded.
        if result.phases.contains(&OrchestrationState::Analyzing) {
            let mut changed = context.thread.advance_stage(result.analysis.relationship_stage);
            if ruling.decision.disposition == Disposition::AutoSent {
                let sent = Message::outbound(context.thread.id.clone(), &ruling.decision.reply_content);
                context.thread.append(sent);
                changed = true;
            }
            if changed && let Err(e) = self.store.save_thread(&context.thread).await {
                warn!(thread_id = %context.thread.id, error = %e, "Failed to update thread");
            }
        }

        info!(
            thread_id = %result.thread_id,
            processing_type = result.processing_type.as_str(),
            disposition = %ruling.decision.disposition,
            "Inbound message handled"
        );
        Ok(InboundOutcome { result, ruling })
    }

    /// Approve the thread's pending reply and record it on the thread.
    pub async fn approve(&self, thread_id: &str) -> Result<ApprovalDecision, Error> {
        let decision = self.gate.approve(thread_id).await?;
        self.record_sent(&decision).await;
        Ok(decision)
    }

    pub async fn reject(
        &self,
        thread_id: &str,
        reason: Option<&str>,
    ) -> Result<ApprovalDecision, Error> {
        self.gate.reject(thread_id, reason).await
    }

    /// Open decisions awaiting review, oldest deadline first.
    pub async fn pending(&self) -> Result<Vec<ApprovalDecision>, Error> {
        let mut open = self.store.list_open_decisions().await?;
        open.sort_by_key(|d| d.deadline);
        Ok(open)
    }

    pub async fn status(&self) -> Result<ServiceStatus, Error> {
        Ok(ServiceStatus {
            readiness: self.readiness.clone(),
            specialists: self.manager.roster(),
            missing_specialists: self.manager.registry().missing(),
            model: self.model.clone(),
            policy: self.gate.policy().clone(),
            pending_replies: self.store.list_open_decisions().await?.len(),
        })
    }

    /// Archive a thread. It stays stored and its pending reply, if any, is
    /// rejected.
    pub async fn archive_thread(&self, thread_id: &str) -> Result<ArchivedThread, Error> {
        let thread_id = thread_id.trim();
        let _turn = self.serializer.acquire(thread_id).await;

        let Some(mut thread) = self.store.get_thread(thread_id).await? else {
            return Err(DatabaseError::NotFound {
                entity: "thread".to_string(),
                id: thread_id.to_string(),
            }
            .into());
        };

        let withdrawn = match self.store.get_open_decision(thread_id).await? {
            Some(_) => Some(self.gate.reject(thread_id, Some("thread archived")).await?),
            None => None,
        };
        thread.archive();
        self.store.save_thread(&thread).await?;

        info!(thread_id, withdrawn = withdrawn.is_some(), "Thread archived");
        Ok(ArchivedThread {
            thread_id: thread.id,
            withdrawn,
        })
    }

    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, Error> {
        self.gate.sweep_expired(now).await
    }

    async fn record_sent(&self, decision: &ApprovalDecision) {
        let mut thread = match self.store.get_thread(&decision.thread_id).await {
            Ok(Some(thread)) => thread,
            Ok(None) => {
                debug!(thread_id = %decision.thread_id, "Approved reply for unknown thread");
                return;
            }
            Err(e) => {
                warn!(thread_id = %decision.thread_id, error = %e, "Failed to load thread");
                return;
            }
        };
        thread.append(Message::outbound(&decision.thread_id, &decision.reply_content));
        if let Err(e) = self.store.save_thread(&thread).await {
            warn!(thread_id = %thread.id, error = %e, "Failed to record approved reply");
        }
    }
}

/// Spawn the periodic expiry sweep (every 60s).
pub fn spawn_expiry_task(service: Arc<NegotiationService>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Err(e) = service.sweep_expired(Utc::now()).await {
                error!(error = %e, "Expiry sweep failed");
            }
        }
    })
}
