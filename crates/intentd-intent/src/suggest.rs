//! Pluggable suggestion strategy for inconclusive free-text requests.
//!
//! The chat bridge consults an [`IntentSuggester`] only when keyword
//! matching cannot pick a single intent.  The core carries no model or
//! network coupling: [`PromptSuggester`] adapts any synchronous
//! `Fn(&str) -> Result<String, String>` model call.

use serde_json::{Value, json};

use crate::catalog::IntentCatalog;
use crate::intent::{ArgValue, Args};

/// Catalog entries included in a routing prompt.
pub const PROMPT_ENTRY_LIMIT: usize = 20;

/// A suggested intent and its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub intent: String,
    pub args: Args,
}

/// Suggests an intent for free-form text, given the full catalog.
pub trait IntentSuggester: Send + Sync {
    fn suggest(&self, catalog: &IntentCatalog, text: &str) -> Option<Suggestion>;
}

impl<F> IntentSuggester for F
where
    F: Fn(&IntentCatalog, &str) -> Option<Suggestion> + Send + Sync,
{
    fn suggest(&self, catalog: &IntentCatalog, text: &str) -> Option<Suggestion> {
        self(catalog, text)
    }
}

// ---------------------------------------------------------------------------
// Prompt-based suggester
// ---------------------------------------------------------------------------

/// Routes text through a language-model call.
pub struct PromptSuggester<M> {
    model: M,
}

impl<M> PromptSuggester<M>
where
    M: Fn(&str) -> Result<String, String> + Send + Sync,
{
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

impl<M> IntentSuggester for PromptSuggester<M>
where
    M: Fn(&str) -> Result<String, String> + Send + Sync,
{
    fn suggest(&self, catalog: &IntentCatalog, text: &str) -> Option<Suggestion> {
        if text.trim().is_empty() {
            return None;
        }
        let prompt = build_prompt(catalog, text);
        match (self.model)(&prompt) {
            Ok(reply) => parse_reply(&reply),
            Err(e) => {
                tracing::warn!(error = %e, "suggestion model call failed");
                None
            }
        }
    }
}

/// Build the routing prompt for `text`.
pub fn build_prompt(catalog: &IntentCatalog, text: &str) -> String {
    let snippets: Vec<Value> = catalog
        .entries()
        .iter()
        .take(PROMPT_ENTRY_LIMIT)
        .map(|def| {
            json!({
                "intent": def.intent,
                "description": def.description,
                "args": def.args,
                "synonyms": def.synonyms,
            })
        })
        .collect();
    let manifest = serde_json::to_string_pretty(&snippets).unwrap_or_else(|_| "[]".into());

    format!(
        "You are a routing assistant. Given an utterance, choose the most appropriate intent\n\
         and return a JSON object with keys 'intent' and optional 'args'.\n\
         If no intent matches, respond with an empty JSON object {{}}.\n\n\
         Utterance: {text}\n\n\
         Intent catalog: {manifest}\n"
    )
}

/// Parse a model reply of the form `{"intent": ..., "args": {...}}`.
///
/// Markdown code fences are stripped.  An empty object, invalid JSON or a
/// missing intent yields `None`.  Non-scalar argument values are dropped.
pub fn parse_reply(reply: &str) -> Option<Suggestion> {
    let cleaned = reply.trim();
    let cleaned = cleaned.strip_prefix("```json").unwrap_or(cleaned);
    let cleaned = cleaned.strip_prefix("```").unwrap_or(cleaned);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned);
    let cleaned = cleaned.trim();

    let parsed: Value = match serde_json::from_str(cleaned) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "suggestion reply is not JSON");
            return None;
        }
    };

    let intent = parsed.get("intent")?.as_str()?.trim().to_lowercase();
    if intent.is_empty() {
        return None;
    }
    let args = parsed
        .get("args")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| ArgValue::from_json(v).map(|v| (k.to_lowercase(), v)))
                .collect()
        })
        .unwrap_or_default();

    Some(Suggestion { intent, args })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
