//! Auto-reply policy and its fixed-order evaluation.
//!
//! Evaluation is pure: the gate gathers the facts (counterparty, today's
//! auto-send count) and this module rules on them.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::negotiation::model::CounterpartyProfile;

/// Whether the gate may ever send on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    #[default]
    ManualApproval,
    Auto,
}

/// What happens when a pending decision outlives its approval window.
///
/// Never an implicit send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    #[default]
    ExpireToRejected,
    /// Push the deadline out by another approval window.
    Extend,
}

/// Conditions that must all hold for an auto-send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoReplyConditions {
    #[serde(default = "default_true")]
    pub only_known_influencers: bool,
    /// Minimum engagement rate as a fraction.
    #[serde(default)]
    pub minimum_engagement_rate: f64,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default = "default_max_daily")]
    pub max_daily_auto_replies: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_daily() -> u32 {
    10
}

impl Default for AutoReplyConditions {
    fn default() -> Self {
        Self {
            only_known_influencers: true,
            minimum_engagement_rate: 0.0,
            exclude_keywords: Vec::new(),
            max_daily_auto_replies: default_max_daily(),
        }
    }
}

/// Full approval policy; a snapshot is stored with every decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    #[serde(default)]
    pub auto_reply_conditions: AutoReplyConditions,
    #[serde(default)]
    pub default_mode: ReplyMode,
    #[serde(default = "default_timeout_hours")]
    pub approval_timeout_hours: u32,
    #[serde(default)]
    pub timeout_action: TimeoutAction,
    /// Allow template fallback replies to be auto-sent.
    #[serde(default)]
    pub auto_send_fallback: bool,
}

fn default_timeout_hours() -> u32 {
    24
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            auto_reply_conditions: AutoReplyConditions::default(),
            default_mode: ReplyMode::ManualApproval,
            approval_timeout_hours: default_timeout_hours(),
            timeout_action: TimeoutAction::ExpireToRejected,
            auto_send_fallback: false,
        }
    }
}

impl ApprovalPolicy {
    /// Build policy from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build policy from an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut policy = Self::default();

        if let Some(mode) = var("NEGOTIATION_DEFAULT_MODE") {
            policy.default_mode = match mode.trim() {
                "auto" => ReplyMode::Auto,
                "manual" | "manual_approval" => ReplyMode::ManualApproval,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "NEGOTIATION_DEFAULT_MODE".into(),
                        message: format!("expected auto|manual_approval, got '{other}'"),
                    });
                }
            };
        }

        if let Some(v) = var("NEGOTIATION_ONLY_KNOWN") {
            policy.auto_reply_conditions.only_known_influencers =
                parse_var("NEGOTIATION_ONLY_KNOWN", &v)?;
        }
        if let Some(v) = var("NEGOTIATION_MIN_ENGAGEMENT") {
            let rate: f64 = parse_var("NEGOTIATION_MIN_ENGAGEMENT", &v)?;
            if !rate.is_finite() || rate < 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: "NEGOTIATION_MIN_ENGAGEMENT".into(),
                    message: format!("expected a non-negative rate, got '{}'", v.trim()),
                });
            }
            policy.auto_reply_conditions.minimum_engagement_rate = rate;
        }
        if let Some(v) = var("NEGOTIATION_EXCLUDE_KEYWORDS") {
            policy.auto_reply_conditions.exclude_keywords = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = var("NEGOTIATION_MAX_DAILY_AUTO") {
            policy.auto_reply_conditions.max_daily_auto_replies =
                parse_var("NEGOTIATION_MAX_DAILY_AUTO", &v)?;
        }
        if let Some(v) = var("NEGOTIATION_APPROVAL_TIMEOUT_HOURS") {
            policy.approval_timeout_hours = parse_var("NEGOTIATION_APPROVAL_TIMEOUT_HOURS", &v)?;
        }
        if let Some(v) = var("NEGOTIATION_TIMEOUT_ACTION") {
            policy.timeout_action = match v.trim() {
                "expire_to_rejected" | "expire" => TimeoutAction::ExpireToRejected,
                "extend" => TimeoutAction::Extend,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "NEGOTIATION_TIMEOUT_ACTION".into(),
                        message: format!("expected expire_to_rejected|extend, got '{other}'"),
                    });
                }
            };
        }
        if let Some(v) = var("NEGOTIATION_AUTO_SEND_FALLBACK") {
            policy.auto_send_fallback = parse_var("NEGOTIATION_AUTO_SEND_FALLBACK", &v)?;
        }

        Ok(policy)
    }

    /// Rule on the gathered facts. Checks run in a fixed order and stop at
    /// the first failure.
    pub fn evaluate(&self, facts: &GateFacts<'_>) -> GateOutcome {
        let conditions = &self.auto_reply_conditions;

        if conditions.only_known_influencers && facts.counterparty.is_none() {
            return GateOutcome::review(GateCheck::KnownInfluencer, "counterparty is not a known influencer");
        }

        let engagement = facts.counterparty.map(|c| c.engagement_rate).unwrap_or(0.0);
        if engagement < conditions.minimum_engagement_rate {
            return GateOutcome::review(
                GateCheck::EngagementRate,
                format!(
                    "engagement {:.4} below minimum {:.4}",
                    engagement, conditions.minimum_engagement_rate
                ),
            );
        }

        let body = facts.inbound_body.to_lowercase();
        if let Some(keyword) = conditions
            .exclude_keywords
            .iter()
            .find(|k| !k.trim().is_empty() && body.contains(&k.trim().to_lowercase()))
        {
            return GateOutcome::review(
                GateCheck::ExcludedKeyword,
                format!("message contains excluded keyword '{keyword}'"),
            );
        }

        if facts.auto_sent_today >= conditions.max_daily_auto_replies {
            return GateOutcome::review(
                GateCheck::DailyLimit,
                format!(
                    "daily auto-reply limit reached ({}/{})",
                    facts.auto_sent_today, conditions.max_daily_auto_replies
                ),
            );
        }

        if self.default_mode == ReplyMode::ManualApproval {
            return GateOutcome::review(GateCheck::ManualMode, "manual approval mode");
        }

        if facts.is_fallback && !self.auto_send_fallback {
            return GateOutcome::review(
                GateCheck::FallbackResponse,
                "template fallback replies require review",
            );
        }

        GateOutcome {
            verdict: Verdict::AutoSend,
            failed_check: None,
            reason: "all auto-reply conditions passed".to_string(),
        }
    }
}

pub(crate) fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Facts the gate rules on.
#[derive(Debug, Clone)]
pub struct GateFacts<'a> {
    pub counterparty: Option<&'a CounterpartyProfile>,
    pub inbound_body: &'a str,
    pub auto_sent_today: u32,
    pub is_fallback: bool,
}

/// A single gate check, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCheck {
    KnownInfluencer,
    EngagementRate,
    ExcludedKeyword,
    DailyLimit,
    ManualMode,
    FallbackResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    AutoSend,
    Review,
}

/// Result of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub verdict: Verdict,
    pub failed_check: Option<GateCheck>,
    pub reason: String,
}

impl GateOutcome {
    fn review(check: GateCheck, reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Review,
            failed_check: Some(check),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(rate: f64) -> CounterpartyProfile {
        CounterpartyProfile {
            address: "creator@example.com".into(),
            display_name: Some("Creator".into()),
            engagement_rate: rate,
            follower_count: Some(50_000),
        }
    }

    fn auto_policy() -> ApprovalPolicy {
        ApprovalPolicy {
            default_mode: ReplyMode::Auto,
            auto_reply_conditions: AutoReplyConditions {
                only_known_influencers: true,
                minimum_engagement_rate: 0.02,
                exclude_keywords: vec!["契約解除".into()],
                max_daily_auto_replies: 5,
            },
            ..Default::default()
        }
    }

    fn facts<'a>(profile: Option<&'a CounterpartyProfile>, body: &'a str, today: u32) -> GateFacts<'a> {
        GateFacts {
            counterparty: profile,
            inbound_body: body,
            auto_sent_today: today,
            is_fallback: false,
        }
    }

    #[test]
    fn all_checks_pass_in_auto_mode() {
        let p = known(0.05);
        let outcome = auto_policy().evaluate(&facts(Some(&p), "ありがとうございます", 0));
        assert_eq!(outcome.verdict, Verdict::AutoSend);
        assert!(outcome.failed_check.is_none());
    }

    #[test]
    fn unknown_counterparty_short_circuits_first() {
        // Also contains an excluded keyword, but the identity check runs first.
        let outcome = auto_policy().evaluate(&facts(None, "契約解除したい", 99));
        assert_eq!(outcome.failed_check, Some(GateCheck::KnownInfluencer));
    }

    #[test]
    fn engagement_below_minimum() {
        let p = known(0.01);
        let outcome = auto_policy().evaluate(&facts(Some(&p), "hi", 0));
        assert_eq!(outcome.failed_check, Some(GateCheck::EngagementRate));
    }

    #[test]
    fn unknown_counterparty_counts_as_zero_engagement() {
        let mut policy = auto_policy();
        policy.auto_reply_conditions.only_known_influencers = false;
        let outcome = policy.evaluate(&facts(None, "hi", 0));
        assert_eq!(outcome.failed_check, Some(GateCheck::EngagementRate));
    }

    #[test]
    fn excluded_keyword_is_case_insensitive() {
        let mut policy = auto_policy();
        policy.auto_reply_conditions.exclude_keywords = vec!["Lawyer".into()];
        let p = known(0.05);
        let outcome = policy.evaluate(&facts(Some(&p), "my LAWYER will call", 0));
        assert_eq!(outcome.failed_check, Some(GateCheck::ExcludedKeyword));
    }

    #[test]
    fn daily_limit_reached() {
        let p = known(0.05);
        let outcome = auto_policy().evaluate(&facts(Some(&p), "hi", 5));
        assert_eq!(outcome.failed_check, Some(GateCheck::DailyLimit));
    }

    #[test]
    fn manual_mode_always_reviews() {
        let mut policy = auto_policy();
        policy.default_mode = ReplyMode::ManualApproval;
        let p = known(0.05);
        let outcome = policy.evaluate(&facts(Some(&p), "hi", 0));
        assert_eq!(outcome.verdict, Verdict::Review);
        assert_eq!(outcome.failed_check, Some(GateCheck::ManualMode));
    }

    #[test]
    fn fallback_requires_review_unless_allowed() {
        let p = known(0.05);
        let mut f = facts(Some(&p), "hi", 0);
        f.is_fallback = true;
        let mut policy = auto_policy();
        assert_eq!(policy.evaluate(&f).failed_check, Some(GateCheck::FallbackResponse));
        policy.auto_send_fallback = true;
        assert_eq!(policy.evaluate(&f).verdict, Verdict::AutoSend);
    }

    #[test]
    fn tightening_any_condition_never_yields_auto_send() {
        let p_low = known(0.03);
        let cases: Vec<(Option<&CounterpartyProfile>, &str, u32)> = vec![
            (Some(&p_low), "hi", 0),
            (Some(&p_low), "hi", 4),
            (None, "hi", 0),
            (Some(&p_low), "契約解除", 0),
            (Some(&p_low), "hi", 5),
        ];

        let base = auto_policy();
        let tightened: Vec<ApprovalPolicy> = {
            let mut v = Vec::new();
            let mut p = base.clone();
            p.auto_reply_conditions.minimum_engagement_rate = 0.04;
            v.push(p);
            let mut p = base.clone();
            p.auto_reply_conditions.exclude_keywords.push("hi".into());
            v.push(p);
            let mut p = base.clone();
            p.auto_reply_conditions.max_daily_auto_replies = 1;
            v.push(p);
            let mut p = base.clone();
            p.default_mode = ReplyMode::ManualApproval;
            v.push(p);
            v
        };

        for (profile, body, today) in cases {
            let f = facts(profile, body, today);
            let before = base.evaluate(&f).verdict;
            for policy in &tightened {
                let after = policy.evaluate(&f).verdict;
                if before == Verdict::Review {
                    assert_eq!(after, Verdict::Review);
                }
            }
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    #[test]
    fn policy_from_vars() {
        let policy = ApprovalPolicy::from_vars(vars(&[
            ("NEGOTIATION_DEFAULT_MODE", "auto"),
            ("NEGOTIATION_ONLY_KNOWN", "false"),
            ("NEGOTIATION_MIN_ENGAGEMENT", "0.03"),
            ("NEGOTIATION_EXCLUDE_KEYWORDS", "契約解除, lawyer ,"),
            ("NEGOTIATION_MAX_DAILY_AUTO", "4"),
            ("NEGOTIATION_APPROVAL_TIMEOUT_HOURS", "48"),
            ("NEGOTIATION_TIMEOUT_ACTION", "extend"),
            ("NEGOTIATION_AUTO_SEND_FALLBACK", "true"),
        ]))
        .unwrap();
        assert_eq!(policy.default_mode, ReplyMode::Auto);
        let conditions = &policy.auto_reply_conditions;
        assert!(!conditions.only_known_influencers);
        assert_eq!(conditions.minimum_engagement_rate, 0.03);
        assert_eq!(conditions.exclude_keywords, vec!["契約解除", "lawyer"]);
        assert_eq!(conditions.max_daily_auto_replies, 4);
        assert_eq!(policy.approval_timeout_hours, 48);
        assert_eq!(policy.timeout_action, TimeoutAction::Extend);
        assert!(policy.auto_send_fallback);

        assert_eq!(ApprovalPolicy::from_vars(vars(&[])).unwrap(), ApprovalPolicy::default());
    }

    #[test]
    fn non_finite_or_negative_engagement_is_rejected() {
        for bad in ["NaN", "inf", "-0.1"] {
            let result = ApprovalPolicy::from_vars(vars(&[("NEGOTIATION_MIN_ENGAGEMENT", bad)]));
            assert!(result.is_err(), "{bad}");
        }
        assert!(ApprovalPolicy::from_vars(vars(&[("NEGOTIATION_DEFAULT_MODE", "sometimes")])).is_err());
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: ApprovalPolicy = serde_json::from_value(serde_json::json!({
            "default_mode": "auto",
            "auto_reply_conditions": {"minimum_engagement_rate": 0.03}
        }))
        .unwrap();
        assert_eq!(policy.default_mode, ReplyMode::Auto);
        assert!(policy.auto_reply_conditions.only_known_influencers);
        assert_eq!(policy.auto_reply_conditions.max_daily_auto_replies, 10);
        assert_eq!(policy.approval_timeout_hours, 24);
        assert_eq!(policy.timeout_action, TimeoutAction::ExpireToRejected);
    }
}
