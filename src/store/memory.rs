//! In-memory store and directory, used by tests and when no database is configured.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::approval::model::{ApprovalDecision, ClosedBy, Disposition};
use crate::error::{ConfigError, DatabaseError};
use crate::negotiation::model::{CompanySettings, CounterpartyProfile, Thread};
use crate::orchestration::result::OrchestrationResult;
use crate::store::traits::{CounterpartyDirectory, NegotiationStore};

/// Most recent orchestration results kept in memory.
const AUDIT_CAPACITY: usize = 1000;

/// In-memory `NegotiationStore`.
///
/// Decisions live under one write lock, so supersede-and-open and
/// pending → closed transitions are atomic.
#[derive(Default)]
pub struct MemoryStore {
    threads: RwLock<HashMap<String, Thread>>,
    settings: RwLock<HashMap<String, CompanySettings>>,
    decisions: RwLock<Vec<ApprovalDecision>>,
    /// Bounded; the oldest results drop first.
    audit: RwLock<VecDeque<OrchestrationResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded orchestration results (for inspection in tests).
    pub async fn audit_log(&self) -> Vec<OrchestrationResult> {
        self.audit.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl NegotiationStore for MemoryStore {
    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, DatabaseError> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn save_thread(&self, thread: &Thread) -> Result<(), DatabaseError> {
        self.threads
            .write()
            .await
            .insert(thread.id.clone(), thread.clone());
        Ok(())
    }

    async fn get_company_settings(
        &self,
        user_id: &str,
    ) -> Result<Option<CompanySettings>, DatabaseError> {
        Ok(self.settings.read().await.get(user_id).cloned())
    }

    async fn save_company_settings(
        &self,
        user_id: &str,
        settings: &CompanySettings,
    ) -> Result<(), DatabaseError> {
        self.settings
            .write()
            .await
            .insert(user_id.to_string(), settings.clone());
        Ok(())
    }

    async fn record_decision(
        &self,
        decision: &ApprovalDecision,
    ) -> Result<Option<ApprovalDecision>, DatabaseError> {
        let mut decisions = self.decisions.write().await;

        let mut superseded = None;
        if let Some(open) = decisions
                .iter_mut()
                .find(|d| d.thread_id == decision.thread_id && d.is_open())
        {
            let closed = open
                .close(
                    Disposition::Rejected,
                    ClosedBy::Superseded,
                    Some("superseded by a newer inbound message".to_string()),
                    decision.decided_at,
                )
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            *open = closed.clone();
            debug!(decision_id = %closed.id, thread_id = %closed.thread_id, "Superseded open decision");
            superseded = Some(closed);
        }

        decisions.push(decision.clone());
        Ok(superseded)
    }

    async fn get_open_decision(
        &self,
        thread_id: &str,
    ) -> Result<Option<ApprovalDecision>, DatabaseError> {
        Ok(self
            .decisions
            .read()
            .await
            .iter()
            .find(|d| d.thread_id == thread_id && d.is_open())
            .cloned())
    }

    async fn list_decisions(&self, thread_id: &str) -> Result<Vec<ApprovalDecision>, DatabaseError> {
        Ok(self
            .decisions
            .read()
            .await
            .iter()
            .filter(|d| d.thread_id == thread_id)
            .cloned()
            .collect())
    }

    async fn list_open_decisions(&self) -> Result<Vec<ApprovalDecision>, DatabaseError> {
        Ok(self
            .decisions
            .read()
            .await
            .iter()
            .filter(|d| d.is_open())
            .cloned()
            .collect())
    }

    async fn transition_pending(
        &self,
        id: Uuid,
        to: Disposition,
        closed_by: ClosedBy,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<ApprovalDecision>, DatabaseError> {
        let mut decisions = self.decisions.write().await;
        let Some(decision) = decisions.iter_mut().find(|d| d.id == id) else {
            return Ok(None);
        };
        match decision.close(to, closed_by, reason.map(str::to_string), at) {
            Ok(closed) => {
                *decision = closed.clone();
                Ok(Some(closed))
            }
            Err(_) => Ok(None),
        }
    }

    async fn extend_deadline(
        &self,
        id: Uuid,
        deadline: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let mut decisions = self.decisions.write().await;
        match decisions.iter_mut().find(|d| d.id == id && d.is_open()) {
            Some(decision) => {
                decision.deadline = Some(deadline);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn overdue_decisions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalDecision>, DatabaseError> {
        Ok(self
            .decisions
            .read()
            .await
            .iter()
            .filter(|d| d.is_overdue(now))
            .cloned()
            .collect())
    }

    async fn count_auto_sent_since(&self, since: DateTime<Utc>) -> Result<u32, DatabaseError> {
        let count = self
            .decisions
            .read()
            .await
            .iter()
            .filter(|d| d.disposition == Disposition::AutoSent && d.decided_at >= since)
            .count();
        Ok(count as u32)
    }

    async fn record_orchestration(&self, result: &OrchestrationResult) -> Result<(), DatabaseError> {
        let mut audit = self.audit.write().await;
        if audit.len() >= AUDIT_CAPACITY {
            audit.pop_front();
        }
        audit.push_back(result.clone());
        Ok(())
    }
}

/// Static, case-insensitive counterparty directory.
#[derive(Default)]
pub struct StaticDirectory {
    profiles: HashMap<String, CounterpartyProfile>,
}

impl StaticDirectory {
    pub fn new(profiles: Vec<CounterpartyProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.address.to_lowercase(), p))
                .collect(),
        }
    }

    /// Load profiles from a JSON array of `CounterpartyProfile`.
    pub async fn from_json_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let profiles: Vec<CounterpartyProfile> =
            serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
                key: path.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(Self::new(profiles))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl CounterpartyDirectory for StaticDirectory {
    async fn lookup(&self, address: &str) -> Result<Option<CounterpartyProfile>, DatabaseError> {
        Ok(self.profiles.get(&address.trim().to_lowercase()).cloned())
    }
}
