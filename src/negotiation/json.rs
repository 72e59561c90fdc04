//! Lenient JSON extraction from reasoning-backend output.
//!
//! Backends wrap JSON in markdown fences or surround it with prose; these
//! helpers cut out the payload before handing it to serde.

use tracing::warn;

/// Extract a JSON object from text that might contain markdown or extra text.
pub(crate) fn extract_json_object(text: &str) -> String {
    extract_delimited(text, '{', '}')
}

/// Extract a JSON array from text that might contain markdown or extra text.
pub(crate) fn extract_json_array(text: &str) -> String {
    extract_delimited(text, '[', ']')
}

fn extract_delimited(text: &str, open: char, close: char) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with(open) {
        return trimmed.to_string();
    }

    // Wrapped in markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with(open) {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    warn!(len = trimmed.len(), "Could not locate JSON payload in backend response");
    trimmed.to_string()
}
