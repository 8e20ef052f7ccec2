// Content moderation for the chat feature.
//
// The GenerativeBackend trait hides the remote model. ModerationGateway asks
// it for a verdict and falls back to the local PatternClassifier whenever the
// remote path fails, so callers always get a verdict back.

pub mod censor;
pub mod gateway;
pub mod gemini;
pub mod patterns;
pub mod rate_limiter;
pub mod traits;
