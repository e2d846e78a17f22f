//! Recovery of structured payloads from model text.
//!
//! Models are asked for bare JSON but routinely wrap it in code fences or
//! prose. Parsing tries the text as-is, then with fences stripped, then
//! falls back to extracting the first balanced object.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use fabula_core::gateway::{EvaluationDraft, GatewayError, InstallmentDraft, PremiseSeed};
use fabula_core::model::StyleProfile;

/// Pull a JSON object out of model output.
pub fn recover_json(text: &str) -> Result<Value, GatewayError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Ok(value);
        }
    }
    if let Some(inner) = strip_code_fence(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner) {
            if value.is_object() {
                return Ok(value);
            }
        }
    }
    if let Some(candidate) = balanced_object(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            if value.is_object() {
                return Ok(value);
            }
        }
    }
    Err(GatewayError::Malformed(format!(
        "no JSON object in response: {}",
        truncate(trimmed, 120)
    )))
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    // Tolerate a language tag on the opening fence.
    let rest = match rest.split_once('\n') {
        Some((first, body)) if first.trim().chars().all(|c| c.is_ascii_alphanumeric()) => body,
        _ => rest,
    };
    let end = rest.rfind("```")?;
    Some(rest[..end].trim())
}

/// The first balanced `{...}` span, tracking strings and escapes.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ----------------------------------------------------------------------
// Typed payloads
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PremisePayload {
    title: String,
    premise: String,
    #[serde(default)]
    themes: Vec<String>,
    #[serde(default)]
    style_authors: Vec<String>,
    #[serde(default)]
    perspective: String,
    #[serde(default)]
    tone: String,
    #[serde(default)]
    genre_tags: Vec<String>,
    #[serde(default)]
    tom_variant: String,
}

pub fn premise_seed(text: &str) -> Result<PremiseSeed, GatewayError> {
    let value = recover_json(text)?;
    let payload: PremisePayload = serde_json::from_value(value)
        .map_err(|e| GatewayError::Malformed(format!("bad premise payload: {e}")))?;
    Ok(PremiseSeed {
        title: payload.title,
        premise: payload.premise,
        themes: payload.themes,
        style: StyleProfile {
            style_authors: payload.style_authors,
            perspective: payload.perspective,
            tone: payload.tone,
            genre_tags: payload.genre_tags,
            tom_variant: payload.tom_variant,
        },
    })
}

#[derive(Debug, Deserialize)]
struct InstallmentPayload {
    body: String,
    #[serde(default)]
    intensity: BTreeMap<String, f64>,
}

/// Parse an installment response. Tokens, latency, and model name are
/// filled in by the caller, which has the transport details.
pub fn installment_draft(text: &str) -> Result<InstallmentDraft, GatewayError> {
    let value = recover_json(text)?;
    let payload: InstallmentPayload = serde_json::from_value(value)
        .map_err(|e| GatewayError::Malformed(format!("bad installment payload: {e}")))?;
    if payload.body.trim().is_empty() {
        return Err(GatewayError::Malformed("empty installment body".to_string()));
    }
    Ok(InstallmentDraft {
        body: payload.body,
        intensity: payload
            .intensity
            .into_iter()
            .map(|(k, v)| (k, v.clamp(0.0, 1.0)))
            .collect(),
        tokens_used: None,
        latency_ms: None,
        model: None,
    })
}

#[derive(Debug, Deserialize)]
struct EvaluationPayload {
    coherence: f64,
    novelty: f64,
    engagement: f64,
    pacing: f64,
    #[serde(default = "default_true")]
    should_continue: bool,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    issues: Vec<String>,
}

fn default_true() -> bool {
    true
}

pub fn evaluation_draft(text: &str) -> Result<EvaluationDraft, GatewayError> {
    let value = recover_json(text)?;
    let payload: EvaluationPayload = serde_json::from_value(value)
        .map_err(|e| GatewayError::Malformed(format!("bad evaluation payload: {e}")))?;
    Ok(EvaluationDraft {
        coherence: payload.coherence,
        novelty: payload.novelty,
        engagement: payload.engagement,
        pacing: payload.pacing,
        should_continue: payload.should_continue,
        reasoning: payload.reasoning,
        issues: payload.issues,
    })
}
