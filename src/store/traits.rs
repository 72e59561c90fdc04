//! Store traits: the thread/company data store and the identity lookup.
//!
//! Both are external collaborators; the service only depends on these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::approval::model::{ApprovalDecision, ClosedBy, Disposition};
use crate::error::DatabaseError;
use crate::negotiation::model::{CompanySettings, CounterpartyProfile, Thread};
use crate::orchestration::result::OrchestrationResult;

/// Backend-agnostic store covering threads, settings, decisions, and audit.
#[async_trait]
pub trait NegotiationStore: Send + Sync {
    // ── Threads ─────────────────────────────────────────────────────

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, DatabaseError>;

    /// Insert or replace a thread.
    async fn save_thread(&self, thread: &Thread) -> Result<(), DatabaseError>;

    // ── Company settings ────────────────────────────────────────────

    async fn get_company_settings(
        &self,
        user_id: &str,
    ) -> Result<Option<CompanySettings>, DatabaseError>;

    async fn save_company_settings(
        &self,
        user_id: &str,
        settings: &CompanySettings,
    ) -> Result<(), DatabaseError>;

    // ── Approval decisions ──────────────────────────────────────────

    /// Record a new decision.
    ///
    /// If the thread already has an open decision, it is closed as
    /// superseded in the same atomic step and returned, whatever the new
    /// decision's disposition. A thread never has more than one live reply.
    async fn record_decision(
        &self,
        decision: &ApprovalDecision,
    ) -> Result<Option<ApprovalDecision>, DatabaseError>;

    /// The thread's open (pending) decision, if any.
    async fn get_open_decision(
        &self,
        thread_id: &str,
    ) -> Result<Option<ApprovalDecision>, DatabaseError>;

    /// All decisions for a thread, oldest first.
    async fn list_decisions(&self, thread_id: &str) -> Result<Vec<ApprovalDecision>, DatabaseError>;

    /// All open decisions across threads.
    async fn list_open_decisions(&self) -> Result<Vec<ApprovalDecision>, DatabaseError>;

    /// Atomically close a pending decision.
    ///
    /// Returns `None` when the decision is missing or no longer pending, so
    /// two racing approvals cannot both succeed.
    async fn transition_pending(
        &self,
        id: Uuid,
        to: Disposition,
        closed_by: ClosedBy,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<ApprovalDecision>, DatabaseError>;

    /// Move a pending decision's deadline. Returns false if it is not pending.
    async fn extend_deadline(
        &self,
        id: Uuid,
        deadline: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Pending decisions whose deadline is at or before `now`.
    async fn overdue_decisions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalDecision>, DatabaseError>;

    /// Number of auto-sent decisions at or after `since`.
    async fn count_auto_sent_since(&self, since: DateTime<Utc>) -> Result<u32, DatabaseError>;

    // ── Audit ───────────────────────────────────────────────────────

    /// Persist an orchestration result for audit.
    async fn record_orchestration(&self, result: &OrchestrationResult) -> Result<(), DatabaseError>;
}

/// Counterparty identity lookup: sender address → known profile.
#[async_trait]
pub trait CounterpartyDirectory: Send + Sync {
    async fn lookup(&self, address: &str) -> Result<Option<CounterpartyProfile>, DatabaseError>;
}
