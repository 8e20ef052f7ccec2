// Lead capture and onboarding.
//
// A lead is validated, saved to the backend and registered with a temporary
// password, then mirrored into the local store while the password/OTP steps
// are pending. The reminder re-opens the password prompt until the user
// verifies or skips.

pub mod api;
pub mod error;
pub mod flow;
pub mod lead;
pub mod reminder;
pub mod store;
