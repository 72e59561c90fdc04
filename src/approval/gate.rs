//! Approval gate: turns an orchestration result into an `ApprovalDecision`
//! and owns the reviewer and timeout transitions.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::approval::model::{ApprovalDecision, ClosedBy, Disposition};
use crate::approval::policy::{ApprovalPolicy, GateFacts, GateOutcome, TimeoutAction, Verdict};
use crate::error::{ApprovalError, Error};
use crate::negotiation::context::NegotiationContext;
use crate::orchestration::result::OrchestrationResult;
use crate::store::traits::NegotiationStore;

/// The gate's decision together with the evaluation that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct GateRuling {
    pub decision: ApprovalDecision,
    pub outcome: GateOutcome,
    /// Previously open decision closed by this one, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded: Option<ApprovalDecision>,
}

/// What an expiry sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub extended: usize,
}

pub struct ApprovalGate {
    policy: ApprovalPolicy,
    store: Arc<dyn NegotiationStore>,
    /// Held from reading today's auto-send count until the decision is
    /// recorded, so concurrent runs can't both take the last slot.
    send_lock: Mutex<()>,
}

impl ApprovalGate {
    pub fn new(policy: ApprovalPolicy, store: Arc<dyn NegotiationStore>) -> Self {
        Self {
            policy,
            store,
            send_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    /// Evaluate policy for a finished run and record the decision.
    pub async fn decide(
        &self,
        result: &OrchestrationResult,
        ctx: &NegotiationContext,
    ) -> Result<GateRuling, Error> {
        let _guard = self.send_lock.lock().await;

        let now = Utc::now();
        let auto_sent_today = self.store.count_auto_sent_since(start_of_day(now)).await?;

        let facts = GateFacts {
            counterparty: ctx.counterparty.as_ref(),
            inbound_body: &ctx.inbound.body,
            auto_sent_today,
            is_fallback: result.is_fallback(),
        };
        let outcome = self.policy.evaluate(&facts);

        let pattern = result.selected_pattern().cloned();
        let decision = match outcome.verdict {
            Verdict::AutoSend => {
                let mut d = ApprovalDecision::auto_sent(
                    &result.thread_id,
                    &result.selected,
                    pattern,
                    self.policy.clone(),
                );
                d.reason = Some(outcome.reason.clone());
                d
            }
            Verdict::Review => ApprovalDecision::pending(
                &result.thread_id,
                &result.selected,
                pattern,
                self.policy.clone(),
                outcome.reason.clone(),
            ),
        };

        let superseded = self.store.record_decision(&decision).await?;

        info!(
            thread_id = %decision.thread_id,
            disposition = %decision.disposition,
            failed_check = ?outcome.failed_check,
            auto_sent_today,
            "Approval gate decided"
        );

        Ok(GateRuling {
            decision,
            outcome,
            superseded,
        })
    }

    /// Approve the thread's pending reply.
    pub async fn approve(&self, thread_id: &str) -> Result<ApprovalDecision, Error> {
        self.close_open(thread_id, Disposition::Approved, None).await
    }

    /// Reject the thread's pending reply.
    pub async fn reject(
        &self,
        thread_id: &str,
        reason: Option<&str>,
    ) -> Result<ApprovalDecision, Error> {
        self.close_open(thread_id, Disposition::Rejected, reason).await
    }

    async fn close_open(
        &self,
        thread_id: &str,
        to: Disposition,
        reason: Option<&str>,
    ) -> Result<ApprovalDecision, Error> {
        let open = match self.store.get_open_decision(thread_id).await? {
            Some(open) => open,
            None => {
                let latest = self.store.list_decisions(thread_id).await?.pop();
                return Err(match latest {
                    Some(closed) => ApprovalError::NotPending {
                        id: closed.id,
                        current: closed.disposition.to_string(),
                    },
                    None => ApprovalError::NotFound {
                        thread_id: thread_id.to_string(),
                    },
                }
                .into());
            }
        };

        let closed = self
            .store
            .transition_pending(open.id, to, ClosedBy::Reviewer, reason, Utc::now())
            .await?
            .ok_or_else(|| ApprovalError::NotPending {
                id: open.id,
                current: "closed".to_string(),
            })?;

        info!(thread_id, decision_id = %closed.id, disposition = %closed.disposition, "Reviewer closed decision");
        Ok(closed)
    }

    /// Apply the timeout action to every overdue pending decision.
    ///
    /// Uses the policy snapshot stored on each decision. Never sends.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, Error> {
        let mut report = SweepReport::default();

        for decision in self.store.overdue_decisions(now).await? {
            match decision.policy.timeout_action {
                TimeoutAction::ExpireToRejected => {
                    let closed = self
                        .store
                        .transition_pending(
                            decision.id,
                            Disposition::Rejected,
                            ClosedBy::Timeout,
                            Some("approval window elapsed"),
                            now,
                        )
                        .await?;
                    if closed.is_some() {
                        report.expired += 1;
                    }
                }
                TimeoutAction::Extend => {
                    let window = Duration::hours(i64::from(decision.policy.approval_timeout_hours));
                    if self.store.extend_deadline(decision.id, now + window).await? {
                        report.extended += 1;
                    }
                }
            }
        }

        if report.expired > 0 || report.extended > 0 {
            info!(expired = report.expired, extended = report.extended, "Expiry sweep");
        }
        Ok(report)
    }
}

/// Midnight UTC of the given instant's day.
fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    match now.date_naive().and_hms_opt(0, 0, 0) {
        Some(midnight) => midnight.and_utc(),
        None => {
            warn!("Could not compute start of day; counting from now");
            now
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::policy::{AutoReplyConditions, ReplyMode};
    use crate::negotiation::context::ContextLoader;
    use crate::negotiation::model::{
        CandidateReply, CompanySettings, CounterpartyProfile, Message, PatternType, ThreadAnalysis,
    };
    use crate::orchestration::result::{DiagnosticTrace, ProcessingType};
    use crate::store::memory::MemoryStore;

    fn auto_policy(max_daily: u32) -> ApprovalPolicy {
        ApprovalPolicy {
            default_mode: ReplyMode::Auto,
            auto_reply_conditions: AutoReplyConditions {
                max_daily_auto_replies: max_daily,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn context(thread_id: &str, known: bool) -> NegotiationContext {
        let mut ctx = ContextLoader::from_messages(
            thread_id,
            vec![Message::inbound(thread_id, "creator@example.com", "よろしくお願いします")],
            CompanySettings::default(),
            None,
        )
        .unwrap();
        if known {
            ctx.counterparty = Some(CounterpartyProfile {
                address: "creator@example.com".into(),
                display_name: None,
                engagement_rate: 0.05,
                follower_count: None,
            });
        }
        ctx
    }

    fn result(thread_id: &str, processing_type: ProcessingType) -> OrchestrationResult {
        let candidate = CandidateReply::new(PatternType::FriendlyEnthusiastic, "ありがとうございます", "", "friendly")
            .with_score(0.8);
        OrchestrationResult {
            thread_id: thread_id.into(),
            selected: candidate.content.clone(),
            candidates: vec![candidate],
            analysis: ThreadAnalysis::default(),
            processing_type,
            active_specialists: Vec::new(),
            phases: Vec::new(),
            capability_gaps: Vec::new(),
            trace: DiagnosticTrace::new(),
            produced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn auto_mode_sends_best_candidate() {
        let store = Arc::new(MemoryStore::new());
        let gate = ApprovalGate::new(auto_policy(10), store);
        let ruling = gate
            .decide(&result("t-1", ProcessingType::OrchestratedResponse), &context("t-1", true))
            .await
            .unwrap();
        assert_eq!(ruling.decision.disposition, Disposition::AutoSent);
        assert_eq!(ruling.decision.pattern_type, Some(PatternType::FriendlyEnthusiastic));
    }

    #[tokio::test]
    async fn unknown_counterparty_goes_to_review() {
        let store = Arc::new(MemoryStore::new());
        let gate = ApprovalGate::new(auto_policy(10), store);
        let ruling = gate
            .decide(&result("t-1", ProcessingType::OrchestratedResponse), &context("t-1", false))
            .await
            .unwrap();
        assert_eq!(ruling.decision.disposition, Disposition::PendingApproval);
        assert!(ruling.decision.deadline.is_some());
    }

    #[tokio::test]
    async fn daily_limit_counts_prior_auto_sends() {
        let store = Arc::new(MemoryStore::new());
        let gate = ApprovalGate::new(auto_policy(1), store);
        let first = gate
            .decide(&result("t-1", ProcessingType::OrchestratedResponse), &context("t-1", true))
            .await
            .unwrap();
        let second = gate
            .decide(&result("t-2", ProcessingType::OrchestratedResponse), &context("t-2", true))
            .await
            .unwrap();
        assert_eq!(first.decision.disposition, Disposition::AutoSent);
        assert_eq!(second.decision.disposition, Disposition::PendingApproval);
    }

    #[tokio::test]
    async fn fallback_is_held_for_review() {
        let store = Arc::new(MemoryStore::new());
        let gate = ApprovalGate::new(auto_policy(10), store);
        let ruling = gate
            .decide(&result("t-1", ProcessingType::FallbackResponse), &context("t-1", true))
            .await
            .unwrap();
        assert_eq!(ruling.decision.disposition, Disposition::PendingApproval);
    }

    #[tokio::test]
    async fn approve_twice_is_not_pending() {
        let store = Arc::new(MemoryStore::new());
        let gate = ApprovalGate::new(ApprovalPolicy::default(), store);
        gate.decide(&result("t-1", ProcessingType::OrchestratedResponse), &context("t-1", true))
            .await
            .unwrap();

        let approved = gate.approve("t-1").await.unwrap();
        assert_eq!(approved.disposition, Disposition::Approved);

        let err = gate.approve("t-1").await.unwrap_err();
        assert!(matches!(err, Error::Approval(ApprovalError::NotPending { .. })));

        let err = gate.reject("missing", None).await.unwrap_err();
        assert!(matches!(err, Error::Approval(ApprovalError::NotFound { .. })));
    }

    #[tokio::test]
    async fn sweep_expires_or_extends() {
        let store = Arc::new(MemoryStore::new());
        let gate = ApprovalGate::new(ApprovalPolicy::default(), store.clone());
        gate.decide(&result("t-1", ProcessingType::OrchestratedResponse), &context("t-1", true))
            .await
            .unwrap();

        let extending = ApprovalGate::new(
            ApprovalPolicy {
                timeout_action: TimeoutAction::Extend,
                ..Default::default()
            },
            store.clone(),
        );
        extending
            .decide(&result("t-2", ProcessingType::OrchestratedResponse), &context("t-2", true))
            .await
            .unwrap();

        let later = Utc::now() + Duration::hours(25);
        let report = gate.sweep_expired(later).await.unwrap();
        assert_eq!(report, SweepReport { expired: 1, extended: 1 });

        let expired = store.list_decisions("t-1").await.unwrap().pop().unwrap();
        assert_eq!(expired.disposition, Disposition::Rejected);
        assert_eq!(expired.closed_by, Some(ClosedBy::Timeout));
        assert!(store.get_open_decision("t-2").await.unwrap().is_some());
    }

    #[test]
    fn start_of_day_is_midnight() {
        let now = Utc::now();
        let midnight = start_of_day(now);
        assert!(midnight <= now);
        assert_eq!(midnight.date_naive(), now.date_naive());
        assert_eq!(midnight.time(), chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    }
}
