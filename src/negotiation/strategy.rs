//! Reply strategy generator: asks the reasoning backend for one draft per
//! negotiation posture and enforces the hard constraints on what comes back.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, LlmError, PipelineError, PolicyViolation};
use crate::llm::{ChatMessage, CompletionRequest, ReasoningClient};
use crate::negotiation::context::NegotiationContext;
use crate::negotiation::json::extract_json_array;
use crate::negotiation::model::{
    BudgetFlexibility, CandidateReply, CompanySettings, PatternType, SenderRole, ThreadAnalysis,
};

/// Configuration for candidate generation.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Postures to draft, in default order.
    pub roster: Vec<PatternType>,
    /// Maximum number of candidates returned.
    pub max_candidates: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            roster: PatternType::defaults(),
            max_candidates: 3,
            temperature: 0.0,
            max_tokens: 2048,
        }
    }
}

/// Candidates that survived the constraints, plus what was dropped.
#[derive(Debug)]
pub struct Generation {
    pub candidates: Vec<CandidateReply>,
    pub violations: Vec<PolicyViolation>,
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(default, alias = "pattern")]
    pattern_type: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    tone: String,
    #[serde(default)]
    recommendation_score: Option<f64>,
}

pub struct ReplyStrategyGenerator {
    llm: ReasoningClient,
    config: GeneratorConfig,
}

impl ReplyStrategyGenerator {
    pub fn new(llm: ReasoningClient, config: GeneratorConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Roster ordered for these settings: the posture matching the preferred
    /// tone goes first, the rest keep their configured order.
    pub fn roster_for(&self, settings: &CompanySettings) -> Vec<PatternType> {
        ordered_roster(&self.config.roster, settings, self.config.max_candidates)
    }

    /// Draft candidates for the context.
    pub async fn generate(
        &self,
        ctx: &NegotiationContext,
        analysis: &ThreadAnalysis,
    ) -> Result<Generation, Error> {
        if !self.llm.is_available() {
            return Err(LlmError::Unavailable.into());
        }

        let roster = self.roster_for(&ctx.settings);
        let request = CompletionRequest::new(vec![
            ChatMessage::system(self.system_prompt(&roster)),
            ChatMessage::user(user_prompt(ctx, analysis)),
        ])
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        let response = self.llm.complete(request).await?;
        let json = extract_json_array(&response.content);
        let raw: Vec<RawCandidate> =
            serde_json::from_str(&json).map_err(|e| LlmError::InvalidResponse {
                provider: self.llm.model_name().unwrap_or("unknown").to_string(),
                reason: format!("candidates are not a valid JSON array: {e}"),
            })?;

        let generation = self.finalize(raw, &roster, &ctx.settings)?;
        info!(
            thread_id = %ctx.thread.id,
            candidates = generation.candidates.len(),
            dropped = generation.violations.len(),
            "Generated candidate replies"
        );
        Ok(generation)
    }

    /// Map raw entries onto the roster, sign, filter, and truncate.
    fn finalize(
        &self,
        raw: Vec<RawCandidate>,
        roster: &[PatternType],
        settings: &CompanySettings,
    ) -> Result<Generation, Error> {
        let mut seen: Vec<PatternType> = Vec::new();
        let mut mapped: Vec<(usize, CandidateReply)> = Vec::new();

        for (i, entry) in raw.into_iter().enumerate() {
            if entry.content.trim().is_empty() {
                continue;
            }
            // Unlabeled entries take the next unused roster slot.
            let pattern = if entry.pattern_type.trim().is_empty() {
                match roster.iter().find(|p| !seen.contains(p)) {
                    Some(p) => p.clone(),
                    None => continue,
                }
            } else {
                PatternType::parse(&entry.pattern_type)
            };
            if seen.contains(&pattern) {
                debug!(pattern = %pattern, "Dropping duplicate posture");
                continue;
            }
            seen.push(pattern.clone());

            let rank = roster
                .iter()
                .position(|p| *p == pattern)
                .unwrap_or(roster.len() + i);
            let tone = if entry.tone.trim().is_empty() {
                pattern.default_tone().as_str().to_string()
            } else {
                entry.tone
            };
            let mut candidate = CandidateReply::new(
                pattern,
                settings.sign_off(&entry.content),
                entry.reasoning,
                tone,
            );
            if let Some(score) = entry.recommendation_score {
                candidate = candidate.with_score(score);
            }
            mapped.push((rank, candidate));
        }

        mapped.sort_by_key(|(rank, _)| *rank);

        let mut violations = Vec::new();
        let mut candidates = Vec::new();
        for (_, candidate) in mapped {
            if let Some(topic) = settings.avoided_topic_in(&candidate.content) {
                warn!(pattern = %candidate.pattern_type, topic, "Dropping candidate that mentions an avoided topic");
                violations.push(PolicyViolation::AvoidedTopic {
                    pattern: candidate.pattern_type.to_string(),
                    topic: topic.to_string(),
                });
                continue;
            }
            candidates.push(candidate);
        }
        candidates.truncate(self.config.max_candidates.max(1));

        if candidates.is_empty() {
            if !violations.is_empty() {
                return Err(PolicyViolation::AllCandidatesDropped {
                    dropped: violations.len(),
                }
                .into());
            }
            return Err(PipelineError::NoCandidates.into());
        }

        Ok(Generation {
            candidates,
            violations,
        })
    }

    fn system_prompt(&self, roster: &[PatternType]) -> String {
        let postures = roster
            .iter()
            .map(|p| format!("- \"{}\" ({})", p.as_str(), p.display_name()))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You draft replies for a company negotiating a collaboration with an influencer.\n\
             Write one reply per posture below, in Japanese business email style:\n\
             {postures}\n\n\
             Rules:\n\
             - Each reply must clearly differ in posture and tone\n\
             - Use the company name, contact person and budget figures exactly as given\n\
             - Never mention any topic listed under \"Avoid\"\n\
             - Keep each reply under 400 characters\n\n\
             Respond with a JSON array of objects, each with:\n\
             - \"pattern_type\": the posture label\n\
             - \"content\": the reply text\n\
             - \"reasoning\": one sentence on why this approach fits\n\
             - \"tone\": friendly, professional or business\n\n\
             ONLY output the JSON array. No other text."
        )
    }
}

/// Preferred-tone posture first, then configured order, capped at `max`.
pub(crate) fn ordered_roster(
    roster: &[PatternType],
    settings: &CompanySettings,
    max: usize,
) -> Vec<PatternType> {
    let preferred = settings.negotiation_tone;
    let (first, rest): (Vec<&PatternType>, Vec<&PatternType>) =
        roster.iter().partition(|p| p.default_tone() == preferred);
    let mut seen = HashSet::new();
    let mut ordered: Vec<PatternType> = first
        .into_iter()
        .chain(rest)
        .filter(|p| seen.insert(*p))
        .cloned()
        .collect();
    ordered.truncate(max.max(1));
    ordered
}

fn user_prompt(ctx: &NegotiationContext, analysis: &ThreadAnalysis) -> String {
    let s = &ctx.settings;
    let mut out = String::new();

    out.push_str("## Company\n");
    out.push_str(&format!("Company name: {}\n", s.company_name));
    out.push_str(&format!("Contact person: {}\n", s.contact_person));
    out.push_str(&format!("Preferred tone: {}\n", s.negotiation_tone.as_str()));
    if let Some(budget) = &s.budget_range {
        let flexibility = match s.budget_flexibility {
            BudgetFlexibility::Fixed => "fixed",
            BudgetFlexibility::Negotiable => "negotiable",
            BudgetFlexibility::Flexible => "flexible",
        };
        out.push_str(&format!("Budget: {} ({flexibility})\n", budget.display()));
    }
    if !s.key_priorities.is_empty() {
        out.push_str(&format!("Priorities: {}\n", s.key_priorities.join(", ")));
    }
    if !s.avoid_topics.is_empty() {
        out.push_str(&format!("Avoid: {}\n", s.avoid_topics.join(", ")));
    }
    if !s.communication_preferences.is_empty() {
        out.push_str(&format!(
            "Communication preferences: {}\n",
            s.communication_preferences.join(", ")
        ));
    }

    out.push_str("\n## Thread analysis\n");
    out.push_str(&format!(
        "Stage: {}, tone: {:?}, urgency: {:?}, topics: {}\n",
        analysis.relationship_stage,
        analysis.emotional_tone,
        analysis.urgency_level,
        if analysis.main_topics.is_empty() {
            "none".to_string()
        } else {
            analysis.main_topics.join(", ")
        }
    ));

    if let Some(instructions) = ctx.instructions() {
        out.push_str(&format!("\n## Additional instructions\n{instructions}\n"));
    }

    out.push_str("\n## Conversation\n");
    for m in ctx.thread.messages() {
        let who = match m.sender_role {
            SenderRole::Counterparty => "Influencer",
            SenderRole::Platform => "Company",
        };
        out.push_str(&format!("[{who}] {}\n", m.body.trim()));
    }
    out
}
