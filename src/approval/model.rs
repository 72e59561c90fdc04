//! Approval decision model: dispositions and the pending → closed transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::policy::ApprovalPolicy;
use crate::error::ApprovalError;
use crate::negotiation::model::PatternType;

/// Outcome classification for a processed inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Policy allowed sending without review.
    AutoSent,
    /// Waiting for a reviewer (the only open disposition).
    PendingApproval,
    /// Reviewer approved the reply.
    Approved,
    /// Reviewer rejected, timed out, or superseded.
    Rejected,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoSent => "auto_sent",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::PendingApproval)
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Disposition {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto_sent" => Ok(Self::AutoSent),
            "pending_approval" => Ok(Self::PendingApproval),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Unknown disposition: {}", s)),
        }
    }
}

/// What closed a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosedBy {
    /// The gate itself (auto-send).
    Policy,
    Reviewer,
    /// Approval window elapsed with `expire_to_rejected`.
    Timeout,
    /// A newer decision on the same thread replaced it.
    Superseded,
}

impl ClosedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Policy => "policy",
            Self::Reviewer => "reviewer",
            Self::Timeout => "timeout",
            Self::Superseded => "superseded",
        }
    }
}

impl std::str::FromStr for ClosedBy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "policy" => Ok(Self::Policy),
            "reviewer" => Ok(Self::Reviewer),
            "timeout" => Ok(Self::Timeout),
            "superseded" => Ok(Self::Superseded),
            _ => Err(format!("Unknown closer: {}", s)),
        }
    }
}

/// The gate's ruling on one orchestration result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub id: Uuid,
    pub thread_id: String,
    pub disposition: Disposition,
    /// Reply that was (or would be) sent.
    pub reply_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_type: Option<PatternType>,
    pub decided_at: DateTime<Utc>,
    /// Review deadline; only set while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_by: Option<ClosedBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Policy in force when the gate ruled.
    pub policy: ApprovalPolicy,
}

impl ApprovalDecision {
    /// A reply the gate sent without review.
    pub fn auto_sent(
        thread_id: impl Into<String>,
        reply_content: impl Into<String>,
        pattern_type: Option<PatternType>,
        policy: ApprovalPolicy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id: thread_id.into(),
            disposition: Disposition::AutoSent,
            reply_content: reply_content.into(),
            pattern_type,
            decided_at: Utc::now(),
            deadline: None,
            closed_by: Some(ClosedBy::Policy),
            reason: None,
            policy,
        }
    }

    /// A reply queued for human review.
    pub fn pending(
        thread_id: impl Into<String>,
        reply_content: impl Into<String>,
        pattern_type: Option<PatternType>,
        policy: ApprovalPolicy,
        reason: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let deadline = now + chrono::Duration::hours(i64::from(policy.approval_timeout_hours));
        Self {
            id: Uuid::new_v4(),
            thread_id: thread_id.into(),
            disposition: Disposition::PendingApproval,
            reply_content: reply_content.into(),
            pattern_type,
            decided_at: now,
            deadline: Some(deadline),
            closed_by: None,
            reason: Some(reason.into()),
            policy,
        }
    }

    pub fn is_open(&self) -> bool {
        self.disposition.is_open()
    }

    /// Pending and past its deadline.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.deadline.is_some_and(|d| d <= now)
    }

    /// Close a pending decision. Fails if it is no longer pending.
    pub fn close(
        &self,
        to: Disposition,
        closed_by: ClosedBy,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Self, ApprovalError> {
        if !self.is_open() || to.is_open() || to == Disposition::AutoSent {
            return Err(ApprovalError::NotPending {
                id: self.id,
                current: self.disposition.to_string(),
            });
        }
        let mut closed = self.clone();
        closed.disposition = to;
        closed.closed_by = Some(closed_by);
        closed.decided_at = at;
        closed.deadline = None;
        if reason.is_some() {
            closed.reason = reason;
        }
        Ok(closed)
    }
}
