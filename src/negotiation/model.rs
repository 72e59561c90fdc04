//! Negotiation data model: threads, messages, company settings, candidates.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Thread & messages ───────────────────────────────────────────────

/// Where a negotiation thread currently stands.
///
/// Ordered: a thread only ever moves forward through these stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStage {
    #[default]
    InitialContact,
    Negotiating,
    Finalizing,
    Closed,
}

impl fmt::Display for RelationshipStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InitialContact => "initial_contact",
            Self::Negotiating => "negotiating",
            Self::Finalizing => "finalizing",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RelationshipStage {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial_contact" => Ok(Self::InitialContact),
            "negotiating" => Ok(Self::Negotiating),
            "finalizing" => Ok(Self::Finalizing),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Unknown relationship stage: {}", s)),
        }
    }
}

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    /// Written by (or on behalf of) the company using the platform.
    Platform,
    /// Written by the influencer on the other side.
    Counterparty,
}

/// A single message in a thread. Never mutated after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub sender_role: SenderRole,
    /// Sender address (email or platform handle).
    #[serde(default)]
    pub sender: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    /// Build an inbound counterparty message with a generated id.
    pub fn inbound(thread_id: impl Into<String>, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            sender_role: SenderRole::Counterparty,
            sender: sender.into(),
            body: body.into(),
            sent_at: Utc::now(),
        }
    }

    /// Build an outbound platform message with a generated id.
    pub fn outbound(thread_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            sender_role: SenderRole::Platform,
            sender: String::new(),
            body: body.into(),
            sent_at: Utc::now(),
        }
    }

    pub fn is_from_counterparty(&self) -> bool {
        self.sender_role == SenderRole::Counterparty
    }
}

/// An ongoing negotiation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    messages: Vec<Message>,
    pub participants: Vec<String>,
    pub subject: Option<String>,
    relationship_stage: RelationshipStage,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub archived: bool,
}

impl Thread {
    /// Open a new thread (on the first inbound message).
    pub fn open(id: impl Into<String>, subject: Option<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            participants: Vec::new(),
            subject,
            relationship_stage: RelationshipStage::InitialContact,
            last_activity_at: Utc::now(),
            archived: false,
        }
    }

    /// Build a thread from an existing history, preserving its order.
    pub fn with_history(id: impl Into<String>, history: Vec<Message>) -> Self {
        let mut thread = Self::open(id, None);
        for message in history {
            thread.append(message);
        }
        thread
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn stage(&self) -> RelationshipStage {
        self.relationship_stage
    }

    /// Append a message. Messages are only ever added, never edited.
    pub fn append(&mut self, message: Message) {
        if !message.sender.is_empty() && !self.participants.contains(&message.sender) {
            self.participants.push(message.sender.clone());
        }
        if message.sent_at > self.last_activity_at || self.messages.is_empty() {
            self.last_activity_at = message.sent_at;
        }
        self.messages.push(message);
    }

    /// Move the stage forward. Returns false (and changes nothing) on a regression.
    pub fn advance_stage(&mut self, stage: RelationshipStage) -> bool {
        if stage > self.relationship_stage {
            self.relationship_stage = stage;
            true
        } else {
            false
        }
    }

    pub fn archive(&mut self) {
        self.archived = true;
    }

    /// Most recent counterparty message, if any.
    pub fn latest_inbound(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_from_counterparty())
    }

    pub fn counterparty_turns(&self) -> usize {
        self.messages.iter().filter(|m| m.is_from_counterparty()).count()
    }
}

// ── Company settings ────────────────────────────────────────────────

/// Broad tone family used for preferences and candidate labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ToneFamily {
    #[default]
    Friendly,
    Professional,
    Business,
}

impl ToneFamily {
    /// Lenient parse of free-form tone labels.
    pub fn parse(label: &str) -> Self {
        let lower = label.trim().to_lowercase();
        if lower.contains("business") || lower.contains("direct") || lower.contains("concise") {
            Self::Business
        } else if lower.contains("professional")
            || lower.contains("formal")
            || lower.contains("polite")
            || lower.contains("cautious")
            || lower.contains("丁寧")
        {
            Self::Professional
        } else {
            Self::Friendly
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Friendly => "friendly",
            Self::Professional => "professional",
            Self::Business => "business",
        }
    }
}

impl From<String> for ToneFamily {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<ToneFamily> for String {
    fn from(t: ToneFamily) -> Self {
        t.as_str().to_string()
    }
}

/// How much room the company has to move on price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetFlexibility {
    /// Budget is fixed: replies must state it.
    Fixed,
    #[default]
    Negotiable,
    Flexible,
}

/// Budget range in yen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl BudgetRange {
    /// Every textual form a bound may take in a reply ("20000", "20,000").
    pub fn figure_variants(&self) -> Vec<String> {
        [&self.min, &self.max]
            .iter()
            .flat_map(|d| {
                let plain = d.trunc().normalize().to_string();
                let grouped = format_yen(d);
                if plain == grouped {
                    vec![plain]
                } else {
                    vec![plain, grouped]
                }
            })
            .collect()
    }

    /// Human-readable range, e.g. "20,000円〜100,000円".
    pub fn display(&self) -> String {
        format!("{}円〜{}円", format_yen(&self.min), format_yen(&self.max))
    }
}

/// Format a yen amount with thousands separators (integer part only).
pub fn format_yen(amount: &Decimal) -> String {
    let digits = amount.trunc().abs().normalize().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if amount.is_sign_negative() && !amount.is_zero() {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// Company-side negotiation settings. Read-only to this service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanySettings {
    #[serde(default, alias = "companyName")]
    pub company_name: String,
    #[serde(default, alias = "contactPerson")]
    pub contact_person: String,
    #[serde(default, alias = "negotiationTone")]
    pub negotiation_tone: ToneFamily,
    #[serde(default, alias = "budgetRange")]
    pub budget_range: Option<BudgetRange>,
    #[serde(default, alias = "budgetFlexibility")]
    pub budget_flexibility: BudgetFlexibility,
    #[serde(default, alias = "keyPriorities")]
    pub key_priorities: Vec<String>,
    #[serde(default, alias = "avoidTopics")]
    pub avoid_topics: Vec<String>,
    #[serde(default, alias = "communicationPreferences")]
    pub communication_preferences: Vec<String>,
}

impl CompanySettings {
    /// First avoid-topic found in `text` (case-insensitive), if any.
    pub fn avoided_topic_in(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.avoid_topics
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .find(|t| lower.contains(&t.to_lowercase()))
    }

    /// Sign-off naming company and contact verbatim.
    pub fn signature(&self) -> String {
        match (self.company_name.is_empty(), self.contact_person.is_empty()) {
            (false, false) => format!("{} {}", self.company_name, self.contact_person),
            (false, true) => self.company_name.clone(),
            (true, false) => self.contact_person.clone(),
            (true, true) => String::new(),
        }
    }

    /// Append the signature unless the content already names both company
    /// and contact.
    pub fn sign_off(&self, content: &str) -> String {
        let signature = self.signature();
        let names_company = self.company_name.is_empty() || content.contains(&self.company_name);
        let names_contact = self.contact_person.is_empty() || content.contains(&self.contact_person);
        if signature.is_empty() || (names_company && names_contact) {
            return content.to_string();
        }
        format!("{}\n\n{}", content.trim_end(), signature)
    }
}

// ── Counterparty ────────────────────────────────────────────────────

/// Known influencer profile, as returned by the identity lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyProfile {
    pub address: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Engagement rate as a fraction (0.035 = 3.5%).
    #[serde(default)]
    pub engagement_rate: f64,
    #[serde(default)]
    pub follower_count: Option<u64>,
}

// ── Thread analysis ─────────────────────────────────────────────────

/// Emotional tone detected in the counterparty's messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalTone {
    Positive,
    #[default]
    Neutral,
    Concerned,
    Negative,
}

/// How quickly a reply is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Low,
    #[default]
    Normal,
    High,
}

/// Which path produced an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    /// Reasoning backend classified the thread.
    Reasoning,
    /// Rule-based fallback (degraded mode).
    Heuristic,
    /// Nothing to analyze, or no analyst available.
    #[default]
    Default,
}

/// Classification of a thread's conversational state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThreadAnalysis {
    pub relationship_stage: RelationshipStage,
    pub emotional_tone: EmotionalTone,
    pub urgency_level: UrgencyLevel,
    pub main_topics: Vec<String>,
    pub source: AnalysisSource,
}

impl ThreadAnalysis {
    pub fn has_topic(&self, topic: &str) -> bool {
        self.main_topics.iter().any(|t| t == topic)
    }
}

// ── Candidate replies ───────────────────────────────────────────────

/// Negotiation posture of a candidate reply. Open-ended: unknown labels are kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PatternType {
    FriendlyEnthusiastic,
    CautiousProfessional,
    BusinessFocused,
    Other(String),
}

impl PatternType {
    /// Default posture roster, in generation order.
    pub fn defaults() -> Vec<PatternType> {
        vec![
            Self::FriendlyEnthusiastic,
            Self::CautiousProfessional,
            Self::BusinessFocused,
        ]
    }

    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "friendly_enthusiastic" => Self::FriendlyEnthusiastic,
            "cautious_professional" => Self::CautiousProfessional,
            "business_focused" => Self::BusinessFocused,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::FriendlyEnthusiastic => "friendly_enthusiastic",
            Self::CautiousProfessional => "cautious_professional",
            Self::BusinessFocused => "business_focused",
            Self::Other(label) => label,
        }
    }

    /// Display name shown to reviewers.
    pub fn display_name(&self) -> String {
        match self {
            Self::FriendlyEnthusiastic => "友好的・積極型".to_string(),
            Self::CautiousProfessional => "慎重・丁寧型".to_string(),
            Self::BusinessFocused => "ビジネス重視型".to_string(),
            Self::Other(label) => label.clone(),
        }
    }

    pub fn default_tone(&self) -> ToneFamily {
        match self {
            Self::FriendlyEnthusiastic => ToneFamily::Friendly,
            Self::CautiousProfessional => ToneFamily::Professional,
            Self::BusinessFocused => ToneFamily::Business,
            Self::Other(label) => ToneFamily::parse(label),
        }
    }
}

impl From<String> for PatternType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<PatternType> for String {
    fn from(p: PatternType) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One generated draft reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReply {
    pub pattern_type: PatternType,
    pub pattern_name: String,
    pub content: String,
    pub reasoning: String,
    pub tone: String,
    #[serde(deserialize_with = "deserialize_score")]
    recommendation_score: f64,
}

impl CandidateReply {
    pub fn new(
        pattern_type: PatternType,
        content: impl Into<String>,
        reasoning: impl Into<String>,
        tone: impl Into<String>,
    ) -> Self {
        Self {
            pattern_name: pattern_type.display_name(),
            pattern_type,
            content: content.into(),
            reasoning: reasoning.into(),
            tone: tone.into(),
            recommendation_score: 0.5,
        }
    }

    /// Score clamped to [0, 1]. NaN collapses to 0.
    pub fn with_score(mut self, score: f64) -> Self {
        self.recommendation_score = clamp_score(score);
        self
    }

    pub fn recommendation_score(&self) -> f64 {
        self.recommendation_score
    }

    /// Tone family of this candidate (explicit label first, posture second).
    pub fn tone_family(&self) -> ToneFamily {
        if self.tone.trim().is_empty() {
            self.pattern_type.default_tone()
        } else {
            ToneFamily::parse(&self.tone)
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) }
}

fn deserialize_score<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    f64::deserialize(deserializer).map(clamp_score)
}
