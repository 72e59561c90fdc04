//! Thread context loader: assembles thread history, company settings, and
//! counterparty metadata into a normalized `NegotiationContext`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, ValidationError};
use crate::negotiation::model::{CompanySettings, CounterpartyProfile, Message, SenderRole, Thread};
use crate::store::traits::{CounterpartyDirectory, NegotiationStore};

/// Everything a pipeline run needs about one inbound message.
#[derive(Debug, Clone)]
pub struct NegotiationContext {
    /// Thread including the inbound message.
    pub thread: Thread,
    pub inbound: Message,
    pub settings: CompanySettings,
    /// `None` when the sender is not a known influencer.
    pub counterparty: Option<CounterpartyProfile>,
    pub custom_instructions: Option<String>,
}

impl NegotiationContext {
    /// First 60 characters of the inbound body (character-safe).
    pub fn message_excerpt(&self) -> String {
        self.inbound.body.trim().chars().take(60).collect()
    }

    /// Non-empty custom instructions, if any.
    pub fn instructions(&self) -> Option<&str> {
        self.custom_instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Loads and persists the thread for each inbound message.
pub struct ContextLoader {
    store: Arc<dyn NegotiationStore>,
    directory: Arc<dyn CounterpartyDirectory>,
}

/// Owner key for company settings when a request names no user.
pub const DEFAULT_SETTINGS_OWNER: &str = "default";

impl ContextLoader {
    pub fn new(store: Arc<dyn NegotiationStore>, directory: Arc<dyn CounterpartyDirectory>) -> Self {
        Self { store, directory }
    }

    /// Load (or open) the thread, append the inbound message, and resolve
    /// the company settings and counterparty.
    ///
    /// `history` seeds a thread seen for the first time; an existing stored
    /// thread is authoritative and `history` is ignored. Supplied `settings`
    /// are saved for `owner`; when omitted, the owner's stored settings apply.
    pub async fn load(
        &self,
        thread_id: &str,
        mut inbound: Message,
        settings: Option<CompanySettings>,
        owner: Option<&str>,
        history: Vec<Message>,
        custom_instructions: Option<String>,
    ) -> Result<NegotiationContext, Error> {
        let thread_id = thread_id.trim();
        if thread_id.is_empty() {
            return Err(ValidationError::MissingField("thread_id".into()).into());
        }
        if inbound.body.trim().is_empty() {
            return Err(ValidationError::MissingField("new_message".into()).into());
        }
        inbound.thread_id = thread_id.to_string();

        let mut thread = match self.store.get_thread(thread_id).await? {
            Some(thread) => thread,
            None => {
                let seeded = history
                    .into_iter()
                    .map(|mut m| {
                        m.thread_id = thread_id.to_string();
                        m
                    })
                    .collect();
                debug!(thread_id, "Opening new thread");
                Thread::with_history(thread_id, seeded)
            }
        };
        if thread.messages().iter().any(|m| m.id == inbound.id) {
            return Err(ValidationError::InvalidValue {
                field: "new_message".into(),
                reason: format!("message {} already recorded on thread", inbound.id),
            }
            .into());
        }
        thread.append(inbound.clone());
        self.store.save_thread(&thread).await?;

        let settings = self.resolve_settings(owner, settings).await?;
        let counterparty = self.resolve_counterparty(&inbound).await;

        Ok(NegotiationContext {
            thread,
            inbound,
            settings,
            counterparty,
            custom_instructions,
        })
    }

    /// Build a context from a bare message list without touching the store.
    ///
    /// The inbound message is the latest counterparty message (or the last
    /// message when none is marked as counterparty).
    pub fn from_messages(
        thread_id: &str,
        messages: Vec<Message>,
        settings: CompanySettings,
        custom_instructions: Option<String>,
    ) -> Result<NegotiationContext, ValidationError> {
        let messages: Vec<Message> = messages
            .into_iter()
            .filter(|m| !m.body.trim().is_empty())
            .collect();
        if messages.is_empty() {
            return Err(ValidationError::MissingField("thread_messages".into()));
        }

        let thread = Thread::with_history(thread_id, messages);
        let inbound = thread
            .latest_inbound()
            .or_else(|| thread.messages().last())
            .cloned()
            .ok_or_else(|| ValidationError::MissingField("thread_messages".into()))?;

        Ok(NegotiationContext {
            thread,
            inbound,
            settings,
            counterparty: None,
            custom_instructions,
        })
    }

    /// Request settings win and are remembered; otherwise the owner's stored
    /// settings, else defaults.
    pub async fn resolve_settings(
        &self,
        owner: Option<&str>,
        supplied: Option<CompanySettings>,
    ) -> Result<CompanySettings, Error> {
        let owner = owner
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .unwrap_or(DEFAULT_SETTINGS_OWNER);
        match supplied {
            Some(settings) => {
                self.store.save_company_settings(owner, &settings).await?;
                Ok(settings)
            }
            None => match self.store.get_company_settings(owner).await? {
                Some(stored) => Ok(stored),
                None => {
                    debug!(owner, "No company settings stored, using defaults");
                    Ok(CompanySettings::default())
                }
            },
        }
    }

    async fn resolve_counterparty(&self, inbound: &Message) -> Option<CounterpartyProfile> {
        if inbound.sender_role != SenderRole::Counterparty || inbound.sender.trim().is_empty() {
            return None;
        }
        match self.directory.lookup(&inbound.sender).await {
            Ok(profile) => profile,
            Err(e) => {
                // Unknown is the safe answer: the gate will route to review.
                warn!(sender = %inbound.sender, error = %e, "Counterparty lookup failed");
                None
            }
        }
    }
}
