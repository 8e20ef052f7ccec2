use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::moderation::gemini::{DEFAULT_GEMINI_API_URL, DEFAULT_GEMINI_MODEL};
use crate::registration::api::DEFAULT_FUNNEL_API_URL;
use crate::registration::lead::DEFAULT_PHONE_DIGITS;
use crate::registration::reminder::DEFAULT_REMINDER_INTERVAL;

/// Value shipped in the sample env file. Treated the same as no key.
const PLACEHOLDER_API_KEY: &str = "YOUR_GEMINI_API_KEY_HERE";

/// Central configuration loaded from environment variables.
///
/// Secrets come from env vars only. The .env file is loaded at startup via
/// dotenvy.
pub struct Config {
    /// Key for the generative-language API. None means moderation runs on
    /// the local pattern classifier only.
    pub gemini_api_key: Option<String>,
    pub gemini_api_url: String,
    pub gemini_model: String,
    /// Upper bound on moderation requests per second, if throttling is wanted.
    pub moderation_max_qps: Option<f64>,
    /// Base URL of the lead/registration backend.
    pub funnel_api_url: String,
    /// JSON file standing in for browser-local storage.
    pub store_path: PathBuf,
    pub reminder_interval: Duration,
    pub phone_digits: usize,
}

impl Config {
    /// Load configuration from environment variables. Everything has a
    /// default; a missing API key only disables remote moderation.
    pub fn load() -> Result<Self> {
        let gemini_api_key = env::var("GEMINI_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && k != PLACEHOLDER_API_KEY);

        let moderation_max_qps = match env::var("MODERATION_MAX_QPS") {
            Ok(raw) => {
                let qps: f64 = raw
                    .parse()
                    .with_context(|| format!("MODERATION_MAX_QPS is not a number: {raw}"))?;
                if !(qps.is_finite() && qps > 0.0) {
                    anyhow::bail!("MODERATION_MAX_QPS must be greater than zero, got {raw}");
                }
                Some(qps)
            }
            Err(_) => None,
        };

        let reminder_interval = match env::var("FUNNEL_REMINDER_SECS") {
            Ok(raw) => {
                let secs: u64 = raw
                    .parse()
                    .with_context(|| format!("FUNNEL_REMINDER_SECS is not a whole number: {raw}"))?;
                if secs == 0 {
                    anyhow::bail!("FUNNEL_REMINDER_SECS must be at least 1");
                }
                Duration::from_secs(secs)
            }
            Err(_) => DEFAULT_REMINDER_INTERVAL,
        };

        let phone_digits = match env::var("FUNNEL_PHONE_DIGITS") {
            Ok(raw) => parse_phone_digits(&raw)?,
            Err(_) => DEFAULT_PHONE_DIGITS,
        };

        let store_path = env::var("FUNNEL_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_store_path());

        Ok(Self {
            gemini_api_key,
            gemini_api_url: env::var("GEMINI_API_URL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_API_URL.to_string()),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string()),
            moderation_max_qps,
            funnel_api_url: env::var("FUNNEL_API_URL")
                .unwrap_or_else(|_| DEFAULT_FUNNEL_API_URL.to_string()),
            store_path,
            reminder_interval,
            phone_digits,
        })
    }

    /// Check that a generative-language API key is configured.
    /// Call this before anything that must not silently fall back.
    pub fn require_gemini(&self) -> Result<&str> {
        self.gemini_api_key.as_deref().with_context(|| {
            "GEMINI_API_KEY not set. Add it to your .env file.\n\
             Without it, moderation uses the local pattern classifier only."
                .to_string()
        })
    }
}

fn parse_phone_digits(raw: &str) -> Result<usize> {
    let digits: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("FUNNEL_PHONE_DIGITS is not a whole number: {raw}"))?;
    if digits == 0 {
        anyhow::bail!("FUNNEL_PHONE_DIGITS must be at least 1");
    }
    Ok(digits)
}

/// Where the local store lives when FUNNEL_STORE_PATH is unset.
pub fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("exitfunnel")
        .join("local_storage.json")
}
