//! Service configuration, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::Serialize;

use crate::approval::ApprovalPolicy;
use crate::approval::policy::parse_var;
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::negotiation::GeneratorConfig;
use crate::negotiation::model::PatternType;
use crate::orchestration::SpecialistRole;

/// Whether the reasoning backend is usable. Handed to handlers via state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    /// Running on heuristics and templates only.
    Degraded { reason: String },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Orchestration tuning.
#[derive(Debug, Clone)]
pub struct OrchestrationConfig {
    /// Specialists to register.
    pub specialists: Vec<SpecialistRole>,
    /// Posture roster, candidate cap, sampling.
    pub generator: GeneratorConfig,
    /// Per-call timeout for reasoning requests.
    pub request_timeout: Duration,
    /// Retries on transient backend errors (at most 1).
    pub max_retries: u32,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            specialists: SpecialistRole::all().to_vec(),
            generator: GeneratorConfig::default(),
            request_timeout: Duration::from_secs(20),
            max_retries: 1,
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// `None` when no backend credential is configured.
    pub llm: Option<LlmConfig>,
    pub readiness: Readiness,
    pub port: u16,
    /// Unset means an in-memory store.
    pub db_path: Option<PathBuf>,
    /// Directory for the daily rolling log file.
    pub log_dir: Option<PathBuf>,
    /// JSON file of known counterparty profiles.
    pub directory_path: Option<PathBuf>,
    pub orchestration: OrchestrationConfig,
    pub approval: ApprovalPolicy,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend: LlmBackend = match var("NEGOTIATION_LLM_BACKEND") {
            Some(v) => v.parse()?,
            None => LlmBackend::Anthropic,
        };

        let model = var("NEGOTIATION_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| backend.default_model().to_string());

        let (llm, readiness) = match var(backend.api_key_var()).filter(|k| !k.trim().is_empty()) {
            Some(key) => (
                Some(LlmConfig {
                    backend,
                    api_key: SecretString::from(key),
                    model,
                }),
                Readiness::Ready,
            ),
            None => (
                None,
                Readiness::Degraded {
                    reason: ConfigError::MissingEnvVar(backend.api_key_var().to_string()).to_string(),
                },
            ),
        };

        let port = match var("NEGOTIATION_PORT") {
            Some(v) => parse_var("NEGOTIATION_PORT", &v)?,
            None => 8080,
        };

        let mut orchestration = OrchestrationConfig::default();
        if let Some(v) = var("NEGOTIATION_SPECIALISTS") {
            orchestration.specialists = parse_list(&v)
                .map(|s| {
                    s.parse::<SpecialistRole>().map_err(|message| ConfigError::InvalidValue {
                        key: "NEGOTIATION_SPECIALISTS".into(),
                        message,
                    })
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(v) = var("NEGOTIATION_PATTERNS") {
            let roster: Vec<PatternType> = parse_list(&v).map(PatternType::parse).collect();
            if roster.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "NEGOTIATION_PATTERNS".into(),
                    message: "at least one posture is required".into(),
                });
            }
            orchestration.generator.roster = roster;
        }
        if let Some(v) = var("NEGOTIATION_MAX_CANDIDATES") {
            let max: usize = parse_var("NEGOTIATION_MAX_CANDIDATES", &v)?;
            if max == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "NEGOTIATION_MAX_CANDIDATES".into(),
                    message: "must be at least 1".into(),
                });
            }
            orchestration.generator.max_candidates = max;
        }
        if let Some(v) = var("NEGOTIATION_REQUEST_TIMEOUT_SECS") {
            orchestration.request_timeout =
                Duration::from_secs(parse_var("NEGOTIATION_REQUEST_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = var("NEGOTIATION_MAX_RETRIES") {
            let retries: u32 = parse_var("NEGOTIATION_MAX_RETRIES", &v)?;
            orchestration.max_retries = retries.min(1);
        }

        Ok(Self {
            llm,
            readiness,
            port,
            db_path: var("NEGOTIATION_DB_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            log_dir: var("NEGOTIATION_LOG_DIR")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            directory_path: var("NEGOTIATION_DIRECTORY_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            orchestration,
            approval: ApprovalPolicy::from_vars(&var)?,
        })
    }
}

fn parse_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_credentials_are_degraded() {
        let config = ServiceConfig::from_vars(vars(&[])).unwrap();
        assert!(config.llm.is_none());
        assert!(matches!(config.readiness, Readiness::Degraded { .. }));
        assert_eq!(config.port, 8080);
        assert!(config.db_path.is_none());
        assert_eq!(config.orchestration.generator.max_candidates, 3);
        assert_eq!(config.orchestration.request_timeout, Duration::from_secs(20));
        assert_eq!(config.orchestration.specialists.len(), 3);
    }

    #[test]
    fn credential_for_selected_backend() {
        let config = ServiceConfig::from_vars(vars(&[
            ("NEGOTIATION_LLM_BACKEND", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("ANTHROPIC_API_KEY", "unused"),
        ]))
        .unwrap();
        let llm = config.llm.unwrap();
        assert_eq!(llm.backend, LlmBackend::OpenAi);
        assert_eq!(llm.model, "gpt-4o");
        assert_eq!(llm.api_key.expose_secret(), "sk-test");
        assert!(config.readiness.is_ready());
    }

    #[test]
    fn roster_and_limits() {
        let config = ServiceConfig::from_vars(vars(&[
            ("NEGOTIATION_SPECIALISTS", "analyst, drafter"),
            ("NEGOTIATION_PATTERNS", "business_focused,friendly_enthusiastic"),
            ("NEGOTIATION_MAX_CANDIDATES", "2"),
            ("NEGOTIATION_MAX_RETRIES", "5"),
        ]))
        .unwrap();
        let o = config.orchestration;
        assert_eq!(o.specialists, vec![SpecialistRole::Analyst, SpecialistRole::Drafter]);
        assert_eq!(o.generator.roster[0], PatternType::BusinessFocused);
        assert_eq!(o.generator.max_candidates, 2);
        assert_eq!(o.max_retries, 1);
    }

    #[test]
    fn approval_policy_comes_from_the_same_source() {
        let config = ServiceConfig::from_vars(vars(&[
            ("NEGOTIATION_DEFAULT_MODE", "auto"),
            ("NEGOTIATION_MAX_DAILY_AUTO", "3"),
        ]))
        .unwrap();
        assert_eq!(config.approval.default_mode, crate::approval::ReplyMode::Auto);
        assert_eq!(config.approval.auto_reply_conditions.max_daily_auto_replies, 3);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(ServiceConfig::from_vars(vars(&[("NEGOTIATION_PORT", "http")])).is_err());
        assert!(ServiceConfig::from_vars(vars(&[("NEGOTIATION_LLM_BACKEND", "bard")])).is_err());
        assert!(ServiceConfig::from_vars(vars(&[("NEGOTIATION_SPECIALISTS", "critic")])).is_err());
        assert!(ServiceConfig::from_vars(vars(&[("NEGOTIATION_MAX_CANDIDATES", "0")])).is_err());
        assert!(ServiceConfig::from_vars(vars(&[("NEGOTIATION_MIN_ENGAGEMENT", "NaN")])).is_err());
    }
}
