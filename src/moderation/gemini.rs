// Google generative-language API backend.
//
// Sends the moderation prompt to `models/{model}:generateContent` with
// near-deterministic sampling and the strictest block level on every harm
// category. A SAFETY finish (or a prompt blocked for SAFETY) is reported as
// GenerationOutcome::SafetyBlocked rather than an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rate_limiter::RateLimiter;
use super::traits::{GenerationOutcome, GenerativeBackend};

/// Default API host.
pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com";

/// Default model name.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-pro";

/// Harm categories sent with every request, all at BLOCK_LOW_AND_ABOVE.
pub const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

const BLOCK_LOW_AND_ABOVE: &str = "BLOCK_LOW_AND_ABOVE";
const SAFETY: &str = "SAFETY";

/// Client for the `generateContent` endpoint.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    rate_limiter: Option<RateLimiter>,
}

impl GeminiClient {
    pub fn new(base_url: &str, model: &str, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent("exitfunnel/0.1 (chat-moderation)")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            rate_limiter: None,
        })
    }

    /// Space requests out with the given limiter.
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<GenerationOutcome> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&GenerateRequest::moderation(prompt))
            .send()
            .await
            .context("Failed to call generateContent")?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|e| e.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
            anyhow::bail!("generateContent returned {}: {}", status, message);
        }

        let body: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse generateContent response")?;

        outcome_from_response(body)
    }
}

/// Interpret a decoded response.
pub fn outcome_from_response(body: GenerateResponse) -> Result<GenerationOutcome> {
    let prompt_blocked = body
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
        == Some(SAFETY);

    let first = body.candidates.into_iter().next();
    let finished_for_safety =
        first.as_ref().and_then(|c| c.finish_reason.as_deref()) == Some(SAFETY);

    if prompt_blocked || finished_for_safety {
        debug!("generateContent refused the prompt for safety");
        return Ok(GenerationOutcome::SafetyBlocked);
    }

    let text = first
        .and_then(|c| c.content)
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text)
        .filter(|text| !text.is_empty())
        .context("No reply text in generateContent response")?;

    Ok(GenerationOutcome::Reply(text))
}

// --- generateContent request/response types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

impl GenerateRequest {
    /// Request body for a moderation prompt.
    pub fn moderation(prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 300,
                top_p: 0.1,
                top_k: 1,
            },
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: category.to_string(),
                    threshold: BLOCK_LOW_AND_ABOVE.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
    top_p: f64,
    top_k: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}
