// ModerationGateway: remote verdict first, local classifier on any failure.
//
// `moderate` has no error channel. The remote path returns
// Result<ModerationVerdict, ModerationFailure>; every Err is logged and
// replaced by the PatternClassifier verdict for the original text.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::censor::censor_words;
use super::patterns::PatternClassifier;
use super::traits::{
    GenerationOutcome, GenerativeBackend, ModerationFailure, ModerationVerdict, SAFETY_VIOLATION,
};
use crate::output::truncate_chars;

/// Moderates chat text through a generative backend with a local fallback.
pub struct ModerationGateway {
    backend: Option<Arc<dyn GenerativeBackend>>,
    classifier: PatternClassifier,
}

impl ModerationGateway {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            backend: Some(backend),
            classifier: PatternClassifier::default(),
        }
    }

    /// A gateway with no remote backend. Every call uses the classifier.
    pub fn local_only() -> Self {
        Self {
            backend: None,
            classifier: PatternClassifier::default(),
        }
    }

    /// Replace the fallback classifier.
    pub fn with_classifier(mut self, classifier: PatternClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Moderate a text. Always resolves to a verdict.
    pub async fn moderate(&self, text: &str) -> ModerationVerdict {
        let Some(backend) = &self.backend else {
            return self.fallback(text);
        };

        match self.moderate_remote(backend.as_ref(), text).await {
            Ok(verdict) => verdict,
            Err(failure) => {
                warn!(
                    error = %failure,
                    text_preview = %truncate_chars(text, 50),
                    "Remote moderation failed, using pattern fallback"
                );
                self.fallback(text)
            }
        }
    }

    /// The verdict the local classifier gives for `text`.
    pub fn fallback(&self, text: &str) -> ModerationVerdict {
        self.classifier.classify(text).into_verdict()
    }

    async fn moderate_remote(
        &self,
        backend: &dyn GenerativeBackend,
        text: &str,
    ) -> Result<ModerationVerdict, ModerationFailure> {
        let outcome = backend
            .generate(&build_prompt(text))
            .await
            .map_err(ModerationFailure::Network)?;

        match outcome {
            GenerationOutcome::SafetyBlocked => Ok(safety_verdict(text)),
            GenerationOutcome::Reply(reply) => {
                let verdict = parse_verdict(&reply, text)?;
                debug!(
                    is_abusive = verdict.is_abusive,
                    categories = ?verdict.categories,
                    "Remote moderation verdict"
                );
                Ok(verdict)
            }
        }
    }
}

/// The instruction prompt sent to the model for `text`.
pub fn build_prompt(text: &str) -> String {
    format!(
        "You moderate messages in a business chat. Decide whether the message below \
         contains hate speech, harassment or threats, profanity, spam or heavy repetition, \
         personal insults, sexual content, or violent or dangerous content. \
         Flag even mild profanity.\n\
         \n\
         Message: \"{text}\"\n\
         \n\
         Reply with a single JSON object and nothing else, shaped exactly like this:\n\
         {{\n  \
           \"isAbusive\": true or false,\n  \
           \"confidence\": a number from 0 to 1,\n  \
           \"categories\": [\"CATEGORY\", ...],\n  \
           \"filteredText\": \"the message with offending words replaced by asterisks\",\n  \
           \"reason\": \"short explanation when abusive\"\n\
         }}"
    )
}

/// The verdict for a text the provider refused to process.
pub fn safety_verdict(text: &str) -> ModerationVerdict {
    ModerationVerdict {
        is_abusive: true,
        filtered_text: censor_words(text),
        confidence: None,
        categories: BTreeSet::from([SAFETY_VIOLATION.to_string()]),
        reason: "Content blocked by safety filters".to_string(),
    }
}

/// Parse the model reply into a verdict, filling missing fields with safe
/// defaults.
pub fn parse_verdict(reply: &str, original: &str) -> Result<ModerationVerdict, ModerationFailure> {
    let object = extract_json_object(reply).ok_or_else(|| {
        ModerationFailure::MalformedResponse(format!(
            "no JSON object in reply: {}",
            truncate_chars(reply, 80)
        ))
    })?;

    let filtered_text = match object.get("filteredText") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => original.to_string(),
    };

    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .filter(|c| c.is_finite())
        .map_or(0.0, |c| c.clamp(0.0, 1.0));

    let categories = match object.get("categories") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => BTreeSet::new(),
    };

    let reason = object
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(ModerationVerdict {
        is_abusive: object.get("isAbusive").is_some_and(truthy),
        filtered_text,
        confidence: Some(confidence),
        categories,
        reason,
    })
}

/// The first well-formed JSON object embedded in `text`, ignoring any prose
/// before or after it.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    text.match_indices('{').find_map(|(start, _)| {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(map))) => Some(map),
            _ => None,
        }
    })
}

/// Loose truthiness for `isAbusive`: models sometimes answer with strings or
/// numbers instead of booleans.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
