// exitfunnel: lead capture and chat moderation for an exit-planning service.
//
// This is the library root. `moderation` screens chat messages with a remote
// model and a local fallback; `registration` runs the lead-to-verified-account
// onboarding flow.

pub mod config;
pub mod moderation;
pub mod output;
pub mod registration;
