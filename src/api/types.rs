//! Request and response bodies for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::ApprovalDecision;
use crate::approval::policy::GateOutcome;
use crate::negotiation::model::{CandidateReply, CompanySettings, Message, SenderRole, ThreadAnalysis};
use crate::orchestration::{
    CapabilityGap, DiagnosticTrace, OrchestrationResult, OrchestrationState, ProcessingType,
    SpecialistRole,
};

// ── Requests ────────────────────────────────────────────────────────

/// A message as clients send it. Field names and shapes vary by caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageDto {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "threadId")]
    pub thread_id: Option<String>,
    #[serde(default, alias = "senderRole", alias = "role", alias = "direction")]
    pub sender_role: Option<String>,
    #[serde(default, alias = "from", alias = "sender_address")]
    pub sender: Option<String>,
    #[serde(default, alias = "content", alias = "text", alias = "message")]
    pub body: String,
    #[serde(default, alias = "sentAt", alias = "date", alias = "timestamp")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl MessageDto {
    pub fn into_message(self, thread_id: &str) -> Message {
        let sender_role = match self.sender_role.as_deref().map(|r| r.trim().to_lowercase()) {
            Some(r) if matches!(r.as_str(), "platform" | "company" | "outbound" | "sent" | "self") => {
                SenderRole::Platform
            }
            _ => SenderRole::Counterparty,
        };
        let thread_id = self
            .thread_id
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| thread_id.to_string());
        Message {
            id: self
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            thread_id,
            sender_role,
            sender: self.sender.unwrap_or_default(),
            body: self.body,
            sent_at: self.sent_at.unwrap_or_else(Utc::now),
        }
    }
}

/// `new_message` may be a bare string or a full message object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NewMessage {
    Text(String),
    Full(MessageDto),
}

impl Default for NewMessage {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplyPatternsRequest {
    #[serde(default, alias = "threadMessages")]
    pub thread_messages: Vec<MessageDto>,
    #[serde(default, alias = "companySettings")]
    pub company_settings: CompanySettings,
    #[serde(default, alias = "customInstructions")]
    pub custom_instructions: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrchestratedRequest {
    #[serde(default, alias = "threadId")]
    pub thread_id: String,
    #[serde(default, alias = "newMessage")]
    pub new_message: NewMessage,
    /// Sender address when `new_message` is a bare string.
    #[serde(default)]
    pub sender: Option<String>,
    /// Omitted settings fall back to the ones last saved for `user_id`.
    #[serde(default, alias = "companySettings")]
    pub company_settings: Option<CompanySettings>,
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
    #[serde(default, alias = "conversationHistory")]
    pub conversation_history: Vec<MessageDto>,
    #[serde(default, alias = "customInstructions")]
    pub custom_instructions: Option<String>,
}

impl OrchestratedRequest {
    pub fn inbound_message(&self) -> Message {
        match self.new_message.clone() {
            NewMessage::Text(body) => MessageDto {
                sender: self.sender.clone(),
                body,
                ..Default::default()
            }
            .into_message(&self.thread_id),
            NewMessage::Full(dto) => dto.into_message(&self.thread_id),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// ── Responses ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ReplyPatternsResponse {
    pub success: bool,
    pub reply_patterns: Vec<CandidateReply>,
    pub thread_analysis: ThreadAnalysis,
    pub processing_type: ProcessingType,
}

impl From<OrchestrationResult> for ReplyPatternsResponse {
    fn from(result: OrchestrationResult) -> Self {
        Self {
            success: true,
            reply_patterns: result.candidates,
            thread_analysis: result.analysis,
            processing_type: result.processing_type,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrchestrationDetails {
    pub active_specialists: Vec<SpecialistRole>,
    pub phases: Vec<OrchestrationState>,
    pub capability_gaps: Vec<CapabilityGap>,
    pub thread_analysis: ThreadAnalysis,
    pub candidates: Vec<CandidateReply>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMetadata {
    pub processing_type: ProcessingType,
    pub orchestration_details: OrchestrationDetails,
    /// Diagnostic trace of each stage's conclusions.
    pub ai_thinking: DiagnosticTrace,
}

#[derive(Debug, Serialize)]
pub struct OrchestratedResponse {
    pub success: bool,
    pub content: String,
    pub metadata: ResponseMetadata,
    pub decision: ApprovalDecision,
    pub gate: GateOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded: Option<ApprovalDecision>,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub success: bool,
    pub decision: ApprovalDecision,
}

#[derive(Debug, Serialize)]
pub struct ArchiveResponse {
    pub success: bool,
    pub thread_id: String,
    pub withdrawn: Option<ApprovalDecision>,
}

#[derive(Debug, Serialize)]
pub struct PendingRepliesResponse {
    pub success: bool,
    pub pending: Vec<ApprovalDecision>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}
