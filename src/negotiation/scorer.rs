//! Pattern scorer: deterministic recommendation scores and ranking.
//!
//! score = 0.40·tone + 0.25·budget + 0.25·priorities + 0.10·brevity,
//! clamped to [0, 1]. A candidate naming an avoided topic scores 0.

use tracing::debug;

use crate::negotiation::model::{
    BudgetFlexibility, CandidateReply, CompanySettings, ThreadAnalysis, ToneFamily,
};

const TONE_WEIGHT: f64 = 0.40;
const BUDGET_WEIGHT: f64 = 0.25;
const PRIORITY_WEIGHT: f64 = 0.25;
const BREVITY_WEIGHT: f64 = 0.10;

/// Full brevity credit up to this many characters.
const BREVITY_FULL: usize = 400;
/// No brevity credit from this many characters on.
const BREVITY_ZERO: usize = 1200;

/// Per-component breakdown of a recommendation score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub tone: f64,
    pub budget: f64,
    pub priorities: f64,
    pub brevity: f64,
    pub avoided_topic: bool,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        if self.avoided_topic {
            return 0.0;
        }
        let raw = TONE_WEIGHT * self.tone
            + BUDGET_WEIGHT * self.budget
            + PRIORITY_WEIGHT * self.priorities
            + BREVITY_WEIGHT * self.brevity;
        raw.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PatternScorer;

impl PatternScorer {
    pub fn new() -> Self {
        Self
    }

    /// Component scores for one candidate.
    pub fn breakdown(
        &self,
        candidate: &CandidateReply,
        settings: &CompanySettings,
        analysis: &ThreadAnalysis,
    ) -> ScoreBreakdown {
        ScoreBreakdown {
            tone: tone_alignment(settings.negotiation_tone, candidate.tone_family()),
            budget: budget_component(&candidate.content, settings, analysis),
            priorities: priority_match(&candidate.content, &settings.key_priorities),
            brevity: brevity(&candidate.content),
            avoided_topic: settings.avoided_topic_in(&candidate.content).is_some(),
        }
    }

    /// Recommendation score in [0, 1].
    pub fn score(
        &self,
        candidate: &CandidateReply,
        settings: &CompanySettings,
        analysis: &ThreadAnalysis,
    ) -> f64 {
        self.breakdown(candidate, settings, analysis).total()
    }

    /// Score every candidate and sort best first. Ties keep generation order.
    pub fn rank(
        &self,
        candidates: Vec<CandidateReply>,
        settings: &CompanySettings,
        analysis: &ThreadAnalysis,
    ) -> Vec<CandidateReply> {
        let mut scored: Vec<CandidateReply> = candidates
            .into_iter()
            .map(|c| {
                let parts = self.breakdown(&c, settings, analysis);
                let score = parts.total();
                debug!(
                    pattern = %c.pattern_type,
                    score,
                    tone = parts.tone,
                    budget = parts.budget,
                    priorities = parts.priorities,
                    brevity = parts.brevity,
                    avoided_topic = parts.avoided_topic,
                    "Scored candidate"
                );
                c.with_score(score)
            })
            .collect();
        scored.sort_by(|a, b| b.recommendation_score().total_cmp(&a.recommendation_score()));
        scored
    }
}

/// Symmetric tone table: exact 1.0, adjacent 0.6, distant 0.3.
fn tone_alignment(preferred: ToneFamily, candidate: ToneFamily) -> f64 {
    use ToneFamily::*;
    match (preferred, candidate) {
        (a, b) if a == b => 1.0,
        (Friendly, Professional) | (Professional, Friendly) => 0.6,
        (Professional, Business) | (Business, Professional) => 0.6,
        _ => 0.3,
    }
}

/// Disclosure is demanded when pricing is on the table or the budget is fixed.
fn budget_component(content: &str, settings: &CompanySettings, analysis: &ThreadAnalysis) -> f64 {
    let Some(budget) = &settings.budget_range else {
        return 1.0;
    };
    let demanded =
        analysis.has_topic("pricing") || settings.budget_flexibility == BudgetFlexibility::Fixed;
    if !demanded {
        return 1.0;
    }
    if budget.figure_variants().iter().any(|f| content.contains(f.as_str())) {
        1.0
    } else {
        0.0
    }
}

fn priority_match(content: &str, priorities: &[String]) -> f64 {
    let priorities: Vec<&str> = priorities
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if priorities.is_empty() {
        return 1.0;
    }
    let lower = content.to_lowercase();
    let hits = priorities
        .iter()
        .filter(|p| lower.contains(&p.to_lowercase()))
        .count();
    hits as f64 / priorities.len() as f64
}

fn brevity(content: &str) -> f64 {
    let len = content.chars().count();
    if len <= BREVITY_FULL {
        1.0
    } else if len >= BREVITY_ZERO {
        0.0
    } else {
        1.0 - (len - BREVITY_FULL) as f64 / (BREVITY_ZERO - BREVITY_FULL) as f64
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::negotiation::model::{BudgetRange, PatternType};

    fn settings() -> CompanySettings {
        CompanySettings {
            company_name: "InfuMatch株式会社".into(),
            contact_person: "田中美咲".into(),
            negotiation_tone: ToneFamily::Friendly,
            budget_range: Some(BudgetRange {
                min: dec!(20000),
                max: dec!(100000),
            }),
            key_priorities: vec!["ブランド認知".into(), "長期".into()],
            avoid_topics: vec!["競合".into()],
            ..Default::default()
        }
    }

    fn pricing() -> ThreadAnalysis {
        ThreadAnalysis {
            main_topics: vec!["pricing".into()],
            ..Default::default()
        }
    }

    fn candidate(pattern: PatternType, content: &str) -> CandidateReply {
        let tone = pattern.default_tone().as_str().to_string();
        CandidateReply::new(pattern, content, "", tone)
    }

    #[test]
    fn tone_table_is_symmetric() {
        for a in [ToneFamily::Friendly, ToneFamily::Professional, ToneFamily::Business] {
            for b in [ToneFamily::Friendly, ToneFamily::Professional, ToneFamily::Business] {
                assert_eq!(tone_alignment(a, b), tone_alignment(b, a));
            }
        }
        assert_eq!(tone_alignment(ToneFamily::Friendly, ToneFamily::Business), 0.3);
    }

    #[test]
    fn budget_disclosure_when_pricing_discussed() {
        let scorer = PatternScorer::new();
        let s = settings();
        let with = candidate(PatternType::FriendlyEnthusiastic, "予算は20,000円〜100,000円です");
        let without = candidate(PatternType::FriendlyEnthusiastic, "ご相談させてください");
        assert_eq!(scorer.breakdown(&with, &s, &pricing()).budget, 1.0);
        assert_eq!(scorer.breakdown(&without, &s, &pricing()).budget, 0.0);
        assert_eq!(scorer.breakdown(&without, &s, &ThreadAnalysis::default()).budget, 1.0);
    }

    #[test]
    fn fixed_budget_always_demands_disclosure() {
        let scorer = PatternScorer::new();
        let mut s = settings();
        s.budget_flexibility = BudgetFlexibility::Fixed;
        let c = candidate(PatternType::BusinessFocused, "ご相談させてください");
        assert_eq!(scorer.breakdown(&c, &s, &ThreadAnalysis::default()).budget, 0.0);
    }

    #[test]
    fn avoided_topic_floors_to_zero() {
        let scorer = PatternScorer::new();
        let c = candidate(PatternType::FriendlyEnthusiastic, "競合他社よりも");
        assert_eq!(scorer.score(&c, &settings(), &pricing()), 0.0);
    }

    #[test]
    fn brevity_decays_linearly() {
        assert_eq!(brevity(&"a".repeat(400)), 1.0);
        assert!((brevity(&"a".repeat(800)) - 0.5).abs() < 1e-9);
        assert_eq!(brevity(&"a".repeat(1500)), 0.0);
    }

    #[test]
    fn priority_fraction() {
        let p = vec!["ブランド認知".to_string(), "長期".to_string()];
        assert_eq!(priority_match("ブランド認知を重視", &p), 0.5);
        assert_eq!(priority_match("anything", &[]), 1.0);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let scorer = PatternScorer::new();
        let s = settings();
        let long = "長い".repeat(2000);
        for content in ["", "短い", long.as_str(), "ブランド認知と長期 20,000"] {
            for p in PatternType::defaults() {
                let score = scorer.score(&candidate(p, content), &s, &pricing());
                assert!((0.0..=1.0).contains(&score));
            }
        }
    }

    #[test]
    fn ranking_is_stable_and_descending() {
        let scorer = PatternScorer::new();
        let s = settings();
        let ranked = scorer.rank(
            vec![
                candidate(PatternType::BusinessFocused, "A"),
                candidate(PatternType::FriendlyEnthusiastic, "B"),
                candidate(PatternType::Other("friendly_alt".into()), "C"),
            ],
            &s,
            &ThreadAnalysis::default(),
        );
        assert_eq!(ranked[0].content, "B");
        assert_eq!(ranked[1].content, "C");
        assert_eq!(ranked[2].content, "A");
        assert!(ranked[0].recommendation_score() >= ranked[1].recommendation_score());
    }
}
