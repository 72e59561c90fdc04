//! Thread analyzer: classifies relationship stage, emotional tone, urgency,
//! and topics.
//!
//! The reasoning backend is authoritative when it answers with parseable
//! JSON. Otherwise a rule-based heuristic runs and the analysis is tagged
//! `heuristic` so callers can tell degraded output apart.

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, ReasoningClient};
use crate::negotiation::json::extract_json_object;
use crate::negotiation::model::{
    AnalysisSource, EmotionalTone, RelationshipStage, SenderRole, Thread, ThreadAnalysis,
    UrgencyLevel,
};

/// Topic labels the analyzer recognizes, in catalogue order.
pub const TOPICS: &[&str] = &[
    "pricing",
    "schedule",
    "deliverables",
    "contract",
    "product",
    "performance",
];

/// Regex catalogue for the heuristic path.
struct KeywordCatalogue {
    topics: Vec<(&'static str, Regex)>,
    positive: Regex,
    concerned: Regex,
    negative: Regex,
    urgent: Regex,
    relaxed: Regex,
    finalizing: Regex,
    closing: Regex,
}

impl KeywordCatalogue {
    fn new() -> Self {
        let re = |pattern: &str| Regex::new(pattern).expect("keyword pattern must compile");
        Self {
            topics: vec![
                (
                    "pricing",
                    re(r"(?i)料金|価格|予算|費用|報酬|単価|金額|見積|\d+円|\b(price|pricing|rate|fee|budget|cost)s?\b"),
                ),
                (
                    "schedule",
                    re(r"(?i)スケジュール|日程|納期|締め?切り?|期限|いつ頃|\b(schedule|deadline|timeline|due date)\b"),
                ),
                (
                    "deliverables",
                    re(r"(?i)投稿|動画|ストーリーズ?|リール|成果物|本数|\b(deliverables?|posts?|videos?|stor(y|ies)|reels?)\b"),
                ),
                (
                    "contract",
                    re(r"(?i)契約|規約|利用権|二次利用|\b(contract|agreement|terms|rights|nda)\b"),
                ),
                (
                    "product",
                    re(r"(?i)商品|製品|サンプル|ブランド|\b(products?|samples?|brand)\b"),
                ),
                (
                    "performance",
                    re(r"(?i)フォロワー|エンゲージメント|再生数|インプレッション|実績|\b(followers?|engagement|views|impressions?|reach|analytics)\b"),
                ),
            ],
            positive: re(
                r"(?i)ありがとう|嬉しい|楽しみ|ぜひ|喜んで|素晴らしい|光栄|\b(thanks?|thank you|great|excited|love|happy|glad)\b",
            ),
            concerned: re(
                r"(?i)心配|不安|懸念|難しい|困って|厳しい|\b(concern(ed)?|worried|unsure|hesitant|tight)\b",
            ),
            negative: re(
                r"(?i)残念|お断り|不満|無理です|できません|辞退|\b(disappointed|decline|unfortunately|not interested|cancel)\b",
            ),
            urgent: re(r"(?i)至急|急ぎ|早急|今日中|明日まで|すぐに|\b(urgent|asap|immediately|today)\b"),
            relaxed: re(r"(?i)急ぎません|いつでも|ゆっくり|\b(no rush|whenever)\b"),
            finalizing: re(
                r"(?i)合意|承諾|お受けします|進めましょう|契約書|\b(agreed?|accept(ed)?|deal|let'?s proceed)\b",
            ),
            closing: re(r"(?i)契約締結|締結しました|投稿しました|完了しました|\b(signed|completed|all done)\b"),
        }
    }
}

/// Raw backend answer; every field optional so partial answers still parse.
#[derive(Debug, Default, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    relationship_stage: Option<String>,
    #[serde(default)]
    emotional_tone: Option<String>,
    #[serde(default)]
    urgency_level: Option<String>,
    #[serde(default)]
    main_topics: Vec<String>,
}

pub struct ThreadAnalyzer {
    llm: ReasoningClient,
    catalogue: KeywordCatalogue,
    temperature: f32,
    max_tokens: u32,
}

impl ThreadAnalyzer {
    pub fn new(llm: ReasoningClient) -> Self {
        Self {
            llm,
            catalogue: KeywordCatalogue::new(),
            temperature: 0.0,
            max_tokens: 512,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Classify the thread. Never fails: backend errors degrade to the heuristic.
    pub async fn analyze(&self, thread: &Thread) -> ThreadAnalysis {
        if thread.messages().is_empty() {
            return ThreadAnalysis::default();
        }

        if !self.llm.is_available() {
            return self.heuristic(thread);
        }

        match self.analyze_with_backend(thread).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(thread_id = %thread.id, error = %e, "Backend analysis failed, using heuristic");
                self.heuristic(thread)
            }
        }
    }

    /// Backend path only. Malformed output is an `InvalidResponse`.
    pub async fn analyze_with_backend(&self, thread: &Thread) -> Result<ThreadAnalysis, LlmError> {
        let system_prompt = format!(
            "You analyze negotiation threads between a company and an influencer.\n\n\
             Classify the conversation and respond with a JSON object:\n\
             - \"relationship_stage\": one of initial_contact, negotiating, finalizing, closed\n\
             - \"emotional_tone\": one of positive, neutral, concerned, negative\n\
             - \"urgency_level\": one of low, normal, high\n\
             - \"main_topics\": array drawn from {topics}\n\n\
             ONLY output the JSON object. No other text.",
            topics = TOPICS.join(", ")
        );

        let request = CompletionRequest::new(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(render_transcript(thread)),
        ])
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let response = self.llm.complete(request).await?;
        let json = extract_json_object(&response.content);
        let raw: RawAnalysis =
            serde_json::from_str(&json).map_err(|e| LlmError::InvalidResponse {
                provider: self.llm.model_name().unwrap_or("unknown").to_string(),
                reason: format!("analysis is not valid JSON: {e}"),
            })?;

        let parsed_stage = raw
            .relationship_stage
            .as_deref()
            .and_then(|s| s.trim().parse::<RelationshipStage>().ok())
            .unwrap_or_default();

        let mut topics: Vec<String> = Vec::new();
        for topic in raw.main_topics {
            let topic = topic.trim().to_lowercase();
            if TOPICS.contains(&topic.as_str()) && !topics.contains(&topic) {
                topics.push(topic);
            }
        }

        let analysis = ThreadAnalysis {
            relationship_stage: parsed_stage.max(thread.stage()),
            emotional_tone: parse_tone(raw.emotional_tone.as_deref()),
            urgency_level: parse_urgency(raw.urgency_level.as_deref()),
            main_topics: topics,
            source: AnalysisSource::Reasoning,
        };
        debug!(thread_id = %thread.id, stage = %analysis.relationship_stage, "Backend analysis");
        Ok(analysis)
    }

    /// Rule-based classification over the counterparty's messages.
    pub fn heuristic(&self, thread: &Thread) -> ThreadAnalysis {
        if thread.messages().is_empty() {
            return ThreadAnalysis::default();
        }

        let inbound: Vec<&str> = thread
            .messages()
            .iter()
            .filter(|m| m.sender_role == SenderRole::Counterparty)
            .map(|m| m.body.as_str())
            .collect();
        let corpus = inbound.join("\n");
        let latest = thread.latest_inbound().map(|m| m.body.as_str()).unwrap_or("");
        let cat = &self.catalogue;

        // Topics ordered by hit count, catalogue order breaking ties.
        let mut hits: Vec<(&str, usize)> = cat
            .topics
            .iter()
            .map(|(name, re)| (*name, re.find_iter(&corpus).count()))
            .filter(|(_, n)| *n > 0)
            .collect();
        hits.sort_by(|a, b| b.1.cmp(&a.1));
        let main_topics = hits.into_iter().map(|(t, _)| t.to_string()).collect();

        let positive = cat.positive.find_iter(latest).count();
        let concerned = cat.concerned.find_iter(latest).count();
        let negative = cat.negative.find_iter(latest).count();
        let emotional_tone = if negative > 0 && negative >= positive {
            EmotionalTone::Negative
        } else if concerned > positive {
            EmotionalTone::Concerned
        } else if positive > 0 {
            EmotionalTone::Positive
        } else {
            EmotionalTone::Neutral
        };

        let urgency_level = if cat.urgent.is_match(latest) {
            UrgencyLevel::High
        } else if cat.relaxed.is_match(latest) {
            UrgencyLevel::Low
        } else {
            UrgencyLevel::Normal
        };

        let derived = if cat.closing.is_match(latest) {
            RelationshipStage::Closed
        } else if cat.finalizing.is_match(latest) {
            RelationshipStage::Finalizing
        } else if thread.counterparty_turns() >= 2 {
            RelationshipStage::Negotiating
        } else {
            RelationshipStage::InitialContact
        };

        ThreadAnalysis {
            relationship_stage: derived.max(thread.stage()),
            emotional_tone,
            urgency_level,
            main_topics,
            source: AnalysisSource::Heuristic,
        }
    }
}

fn render_transcript(thread: &Thread) -> String {
    let mut out = String::new();
    if let Some(subject) = &thread.subject {
        out.push_str(&format!("Subject: {subject}\n"));
    }
    out.push_str(&format!("Current stage: {}\n\n", thread.stage()));
    for m in thread.messages() {
        let who = match m.sender_role {
            SenderRole::Counterparty => "Influencer",
            SenderRole::Platform => "Company",
        };
        out.push_str(&format!("[{who}] {}\n", m.body.trim()));
    }
    out
}

fn parse_tone(label: Option<&str>) -> EmotionalTone {
    match label.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("positive") => EmotionalTone::Positive,
        Some("concerned") => EmotionalTone::Concerned,
        Some("negative") => EmotionalTone::Negative,
        _ => EmotionalTone::Neutral,
    }
}

fn parse_urgency(label: Option<&str>) -> UrgencyLevel {
    match label.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("low") => UrgencyLevel::Low,
        Some("high") => UrgencyLevel::High,
        _ => UrgencyLevel::Normal,
    }
}
