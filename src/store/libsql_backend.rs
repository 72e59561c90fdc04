//! libSQL backend: async `NegotiationStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::approval::model::{ApprovalDecision, ClosedBy, Disposition};
use crate::error::DatabaseError;
use crate::negotiation::model::{CompanySettings, PatternType, Thread};
use crate::orchestration::result::OrchestrationResult;
use crate::store::migrations;
use crate::store::traits::NegotiationStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// Multi-statement decision writes are serialized through `write_lock` so
/// their transactions never interleave on the shared connection.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_decisions(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<ApprovalDecision>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut decisions = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_decision(&row) {
                Ok(decision) => decisions.push(decision),
                Err(e) => warn!("Skipping decision row: {e}"),
            }
        }
        Ok(decisions)
    }

    async fn get_decision(&self, id: Uuid) -> Result<Option<ApprovalDecision>, DatabaseError> {
        Ok(self
            .query_decisions(
                &format!("SELECT {DECISION_COLUMNS} FROM approval_decisions WHERE id = ?1"),
                params![id.to_string()],
                "get_decision",
            )
            .await?
            .into_iter()
            .next())
    }
}

// ── Helper functions ────────────────────────────────────────────────

const DECISION_COLUMNS: &str = "id, thread_id, disposition, reply_content, pattern_type, decided_at, deadline, closed_by, reason, policy";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to an ApprovalDecision. Column order matches DECISION_COLUMNS.
fn row_to_decision(row: &libsql::Row) -> Result<ApprovalDecision, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("decision row: {e}"));

    let id_str: String = row.get(0).map_err(get_err)?;
    let thread_id: String = row.get(1).map_err(get_err)?;
    let disposition_str: String = row.get(2).map_err(get_err)?;
    let reply_content: String = row.get(3).map_err(get_err)?;
    let pattern_type: Option<String> = row.get(4).ok();
    let decided_str: String = row.get(5).map_err(get_err)?;
    let deadline: Option<String> = row.get(6).ok();
    let closed_by: Option<String> = row.get(7).ok();
    let reason: Option<String> = row.get(8).ok();
    let policy_json: String = row.get(9).map_err(get_err)?;

    Ok(ApprovalDecision {
        id: Uuid::parse_str(&id_str).map_err(|e| DatabaseError::Serialization(e.to_string()))?,
        thread_id,
        disposition: disposition_str
            .parse::<Disposition>()
            .map_err(DatabaseError::Serialization)?,
        reply_content,
        pattern_type: pattern_type.map(PatternType::from),
        decided_at: parse_datetime(&decided_str),
        deadline: deadline.as_deref().map(parse_datetime),
        closed_by: closed_by.and_then(|s| s.parse::<ClosedBy>().ok()),
        reason,
        policy: serde_json::from_str(&policy_json)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
    })
}

async fn insert_decision(conn: &Connection, d: &ApprovalDecision) -> Result<(), DatabaseError> {
    let policy_json =
        serde_json::to_string(&d.policy).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    conn.execute(
        &format!(
            "INSERT INTO approval_decisions ({DECISION_COLUMNS}, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            d.id.to_string(),
            d.thread_id.clone(),
            d.disposition.as_str(),
            d.reply_content.clone(),
            opt_text(d.pattern_type.as_ref().map(|p| p.as_str().to_string())),
            d.decided_at.to_rfc3339(),
            opt_text(d.deadline.map(|t| t.to_rfc3339())),
            opt_text(d.closed_by.map(|c| c.as_str().to_string())),
            opt_text(d.reason.clone()),
            policy_json,
            Utc::now().to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert_decision: {e}")))?;
    Ok(())
}

// ── NegotiationStore implementation ─────────────────────────────────

#[async_trait]
impl NegotiationStore for LibSqlBackend {
    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT body FROM threads WHERE id = ?1", params![thread_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_thread: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let body: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_thread row: {e}")))?;
                let thread = serde_json::from_str(&body)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
                Ok(Some(thread))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_thread: {e}"))),
        }
    }

    async fn save_thread(&self, thread: &Thread) -> Result<(), DatabaseError> {
        let body =
            serde_json::to_string(thread).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "INSERT INTO threads (id, body, relationship_stage, archived, last_activity_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    body = excluded.body,
                    relationship_stage = excluded.relationship_stage,
                    archived = excluded.archived,
                    last_activity_at = excluded.last_activity_at,
                    updated_at = excluded.updated_at",
                params![
                    thread.id.clone(),
                    body,
                    thread.stage().to_string(),
                    i64::from(thread.archived),
                    thread.last_activity_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_thread: {e}")))?;

        debug!(thread_id = %thread.id, messages = thread.messages().len(), "Thread saved");
        Ok(())
    }

    async fn get_company_settings(
        &self,
        user_id: &str,
    ) -> Result<Option<CompanySettings>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT settings FROM company_settings WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_company_settings: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let json: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_company_settings row: {e}")))?;
                serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_company_settings: {e}"))),
        }
    }

    async fn save_company_settings(
        &self,
        user_id: &str,
        settings: &CompanySettings,
    ) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(settings)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "INSERT INTO company_settings (user_id, settings, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET settings = excluded.settings, updated_at = excluded.updated_at",
                params![user_id, json, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_company_settings: {e}")))?;
        Ok(())
    }

    async fn record_decision(
        &self,
        decision: &ApprovalDecision,
    ) -> Result<Option<ApprovalDecision>, DatabaseError> {
        let _guard = self.write_lock.lock().await;

        let superseded = self.get_open_decision(&decision.thread_id).await?;

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("record_decision begin: {e}")))?;

        if let Some(ref old) = superseded {
            tx.execute(
                "UPDATE approval_decisions
                 SET disposition = 'rejected', closed_by = 'superseded', deadline = NULL,
                     reason = ?1, decided_at = ?2
                 WHERE id = ?3 AND disposition = 'pending_approval'",
                params![
                    "superseded by a newer inbound message",
                    decision.decided_at.to_rfc3339(),
                    old.id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_decision supersede: {e}")))?;
        }

        insert_decision(&tx, decision).await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("record_decision commit: {e}")))?;

        debug!(
            decision_id = %decision.id,
            thread_id = %decision.thread_id,
            disposition = %decision.disposition,
            "Decision recorded"
        );

        match superseded {
            Some(old) => self.get_decision(old.id).await,
            None => Ok(None),
        }
    }

    async fn get_open_decision(
        &self,
        thread_id: &str,
    ) -> Result<Option<ApprovalDecision>, DatabaseError> {
        Ok(self
            .query_decisions(
                &format!(
                    "SELECT {DECISION_COLUMNS} FROM approval_decisions WHERE thread_id = ?1 AND disposition = 'pending_approval'"
                ),
                params![thread_id],
                "get_open_decision",
            )
            .await?
            .into_iter()
            .next())
    }

    async fn list_decisions(&self, thread_id: &str) -> Result<Vec<ApprovalDecision>, DatabaseError> {
        self.query_decisions(
            &format!(
                "SELECT {DECISION_COLUMNS} FROM approval_decisions WHERE thread_id = ?1 ORDER BY created_at ASC"
            ),
            params![thread_id],
            "list_decisions",
        )
        .await
    }

    async fn list_open_decisions(&self) -> Result<Vec<ApprovalDecision>, DatabaseError> {
        self.query_decisions(
            &format!(
                "SELECT {DECISION_COLUMNS} FROM approval_decisions WHERE disposition = 'pending_approval' ORDER BY created_at ASC"
            ),
            (),
            "list_open_decisions",
        )
        .await
    }

    async fn transition_pending(
        &self,
        id: Uuid,
        to: Disposition,
        closed_by: ClosedBy,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<ApprovalDecision>, DatabaseError> {
        if to.is_open() || to == Disposition::AutoSent {
            return Ok(None);
        }

        let _guard = self.write_lock.lock().await;
        let affected = self
            .conn()
            .execute(
                "UPDATE approval_decisions
                 SET disposition = ?1, closed_by = ?2, reason = COALESCE(?3, reason),
                     decided_at = ?4, deadline = NULL
                 WHERE id = ?5 AND disposition = 'pending_approval'",
                params![
                    to.as_str(),
                    closed_by.as_str(),
                    opt_text(reason.map(str::to_string)),
                    at.to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("transition_pending: {e}")))?;

        if affected == 0 {
            return Ok(None);
        }
        debug!(decision_id = %id, disposition = %to, "Decision closed");
        self.get_decision(id).await
    }

    async fn extend_deadline(
        &self,
        id: Uuid,
        deadline: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE approval_decisions SET deadline = ?1 WHERE id = ?2 AND disposition = 'pending_approval'",
                params![deadline.to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("extend_deadline: {e}")))?;
        Ok(affected > 0)
    }

    async fn overdue_decisions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalDecision>, DatabaseError> {
        let open = self.list_open_decisions().await?;
        Ok(open.into_iter().filter(|d| d.is_overdue(now)).collect())
    }

    async fn count_auto_sent_since(&self, since: DateTime<Utc>) -> Result<u32, DatabaseError> {
        let sent = self
            .query_decisions(
                &format!(
                    "SELECT {DECISION_COLUMNS} FROM approval_decisions WHERE disposition = 'auto_sent'"
                ),
                (),
                "count_auto_sent_since",
            )
            .await?;
        Ok(sent.iter().filter(|d| d.decided_at >= since).count() as u32)
    }

    async fn record_orchestration(&self, result: &OrchestrationResult) -> Result<(), DatabaseError> {
        let json =
            serde_json::to_string(result).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "INSERT INTO orchestration_audit (thread_id, processing_type, result, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    result.thread_id.clone(),
                    result.processing_type.as_str(),
                    json,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_orchestration: {e}")))?;
        Ok(())
    }
}
