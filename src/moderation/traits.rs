// Moderation types and the generative backend trait.
//
// GenerativeBackend is the swap point for the remote model. GeminiClient is
// the production implementation; tests plug in doubles that fail on demand.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Category label attached to verdicts for provider-side safety refusals.
pub const SAFETY_VIOLATION: &str = "SAFETY_VIOLATION";

/// The structured outcome of a moderation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationVerdict {
    pub is_abusive: bool,
    /// The input with offending content masked.
    pub filtered_text: String,
    /// Confidence from 0.0 to 1.0, when the producer reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub categories: BTreeSet<String>,
    pub reason: String,
}

impl ModerationVerdict {
    /// A verdict that lets the text through untouched.
    pub fn clean(text: &str) -> Self {
        Self {
            is_abusive: false,
            filtered_text: text.to_string(),
            confidence: None,
            categories: BTreeSet::new(),
            reason: String::new(),
        }
    }
}

/// What the remote model produced for a moderation prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// The first text part of the first candidate.
    Reply(String),
    /// The provider refused to answer because of its safety settings.
    SafetyBlocked,
}

/// Why the remote path could not produce a verdict. Both variants are
/// recovered by the fallback classifier and never reach callers of
/// `ModerationGateway::moderate`.
#[derive(Debug, thiserror::Error)]
pub enum ModerationFailure {
    #[error("moderation request failed: {0:#}")]
    Network(anyhow::Error),
    #[error("malformed moderation reply: {0}")]
    MalformedResponse(String),
}

/// A remote generative-language model that can answer a moderation prompt.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Send the prompt and return the model's reply or its safety refusal.
    async fn generate(&self, prompt: &str) -> Result<GenerationOutcome>;
}
