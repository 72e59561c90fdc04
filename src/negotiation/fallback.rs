//! Fallback template engine: deterministic replies with no backend calls.

use tracing::debug;

use crate::negotiation::context::NegotiationContext;
use crate::negotiation::model::{CandidateReply, CompanySettings, PatternType};

const DEFAULT_COMPANY: &str = "弊社";
const DEFAULT_CONTACT: &str = "担当者";

/// Last-resort replies when every posture template is unusable.
const ACKNOWLEDGEMENTS: [&str; 3] = [
    "ご連絡ありがとうございます。",
    "Thank you for your message.",
    "🙏",
];

/// Template inputs.
#[derive(Debug, Clone, Copy)]
pub struct TemplateFields<'a> {
    pub company_name: &'a str,
    pub contact_person: &'a str,
    pub message_excerpt: &'a str,
    pub custom_instructions: Option<&'a str>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackTemplateEngine;

impl FallbackTemplateEngine {
    pub fn new() -> Self {
        Self
    }

    /// The acknowledgement reply for this context. Always non-empty and
    /// never names an avoided topic.
    ///
    /// Prefers the cautious template, then the other postures, then a bare
    /// acknowledgement.
    pub fn render(&self, ctx: &NegotiationContext) -> String {
        let excerpt = ctx.message_excerpt();
        let fields = self.safe_fields(&ctx.settings, &excerpt, ctx.instructions());
        let postures = [
            PatternType::CautiousProfessional,
            PatternType::FriendlyEnthusiastic,
            PatternType::BusinessFocused,
        ];
        postures
            .iter()
            .find_map(|pattern| self.render_clean(pattern, &fields, &ctx.settings))
            .or_else(|| {
                ACKNOWLEDGEMENTS
                    .iter()
                    .find(|ack| ctx.settings.avoided_topic_in(ack).is_none())
                    .map(|ack| ack.to_string())
            })
            .unwrap_or_else(|| ACKNOWLEDGEMENTS[ACKNOWLEDGEMENTS.len() - 1].to_string())
    }

    /// One templated candidate per posture, for callers that need a full set.
    /// Postures with nothing left after avoided topics are removed are skipped.
    pub fn candidates(&self, ctx: &NegotiationContext, roster: &[PatternType]) -> Vec<CandidateReply> {
        let excerpt = ctx.message_excerpt();
        let fields = self.safe_fields(&ctx.settings, &excerpt, ctx.instructions());
        roster
            .iter()
            .filter_map(|pattern| {
                let Some(content) = self.render_clean(pattern, &fields, &ctx.settings) else {
                    debug!(pattern = %pattern, "No usable template for posture");
                    return None;
                };
                Some(CandidateReply::new(
                    pattern.clone(),
                    content,
                    "template reply (reasoning backend unavailable)",
                    pattern.default_tone().as_str(),
                ))
            })
            .collect()
    }

    /// Render the template for a posture.
    pub fn render_posture(&self, pattern: &PatternType, fields: &TemplateFields<'_>) -> String {
        self.posture_lines(pattern, fields).join("\n")
    }

    /// Render a posture with every line that names an avoided topic left out.
    /// `None` when only blank lines would remain.
    fn render_clean(
        &self,
        pattern: &PatternType,
        fields: &TemplateFields<'_>,
        settings: &CompanySettings,
    ) -> Option<String> {
        let lines: Vec<String> = self
            .posture_lines(pattern, fields)
            .into_iter()
            .filter(|line| settings.avoided_topic_in(line).is_none())
            .collect();
        let reply = lines.join("\n").trim().to_string();
        if reply.is_empty() || settings.avoided_topic_in(&reply).is_some() {
            return None;
        }
        Some(reply)
    }

    fn posture_lines(&self, pattern: &PatternType, fields: &TemplateFields<'_>) -> Vec<String> {
        let company = non_empty(fields.company_name, DEFAULT_COMPANY);
        let contact = non_empty(fields.contact_person, DEFAULT_CONTACT);

        let (opening, body, closing) = match pattern {
            PatternType::FriendlyEnthusiastic => (
                "ご連絡ありがとうございます！",
                "いただいた内容をチームで確認し、できるだけ早くお返事いたします。ぜひ一緒に素敵な企画にできれば嬉しいです。",
                "引き続きよろしくお願いします！",
            ),
            PatternType::BusinessFocused => (
                "ご連絡ありがとうございます。",
                "条件面を含めて社内で確認し、具体的なご提案をお送りいたします。",
                "よろしくお願いいたします。",
            ),
            _ => (
                "お世話になっております。",
                "内容を確認のうえ、改めて詳細をご連絡いたします。",
                "引き続きよろしくお願いいたします。",
            ),
        };

        let mut lines = vec![
            opening.to_string(),
            format!("{company}の{contact}です。"),
        ];
        let excerpt = fields.message_excerpt.trim();
        if !excerpt.is_empty() {
            lines.push(format!("「{excerpt}」についてのご連絡、確かに拝見しました。"));
        }
        lines.push(body.to_string());
        if let Some(instructions) = fields.custom_instructions.map(str::trim).filter(|s| !s.is_empty()) {
            lines.push(instructions.to_string());
        }
        lines.push(String::new());
        lines.push(closing.to_string());
        lines.push(format!("{company} {contact}"));
        lines
    }

    /// Template fields with anything naming an avoided topic blanked out.
    fn safe_fields<'a>(
        &self,
        settings: &'a CompanySettings,
        excerpt: &'a str,
        instructions: Option<&'a str>,
    ) -> TemplateFields<'a> {
        TemplateFields {
            company_name: &settings.company_name,
            contact_person: &settings.contact_person,
            message_excerpt: if settings.avoided_topic_in(excerpt).is_some() {
                ""
            } else {
                excerpt
            },
            custom_instructions: instructions.filter(|i| settings.avoided_topic_in(i).is_none()),
        }
    }
}

fn non_empty<'a>(value: &'a str, default: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() { default } else { trimmed }
}
