// Lead record and client-side field checks.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use super::error::FlowError;

/// Phone length used when no country-specific length is configured.
pub const DEFAULT_PHONE_DIGITS: usize = 10;

/// Minimum password length accepted by the password prompt.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Number of characters in an emailed one-time code.
pub const OTP_LEN: usize = 6;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static DOMAIN_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.[a-zA-Z]{2,}$").unwrap());

/// Contact details captured by the lead form.
///
/// Serialized in camelCase because that is the shape kept in the local store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRecord {
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub website: String,
    pub phone: String,
    #[serde(default)]
    pub privacy: bool,
}

impl LeadRecord {
    /// Check the form before anything is sent. Errors carry the inline
    /// message shown to the user.
    pub fn validate(&self, phone_digits: usize) -> Result<(), FlowError> {
        if self.full_name.trim().is_empty() || self.email.is_empty() || self.phone.is_empty() {
            return Err(FlowError::validation("Please fill in all required fields"));
        }
        if !self.privacy {
            return Err(FlowError::validation("Please accept the privacy policy"));
        }
        if !EMAIL.is_match(&self.email) {
            return Err(FlowError::validation("Please enter a valid email address"));
        }
        if website_error(&self.website).is_some() {
            return Err(FlowError::validation("Please enter a valid website URL"));
        }
        if phone_error(&self.phone, phone_digits).is_some() {
            return Err(FlowError::validation("Please enter a valid phone number"));
        }
        Ok(())
    }
}

/// Field-level message for the website input, if the value is not empty and
/// lacks a domain extension.
pub fn website_error(website: &str) -> Option<String> {
    if website.is_empty() || DOMAIN_SUFFIX.is_match(website) {
        None
    } else {
        Some(
            "Website should include a valid domain extension (e.g., .com, .org, .net, etc.)"
                .to_string(),
        )
    }
}

/// Field-level message for the phone input.
pub fn phone_error(phone: &str, digits: usize) -> Option<String> {
    let valid = phone.chars().all(|c| c.is_ascii_digit()) && phone.chars().count() == digits;
    if phone.is_empty() || valid {
        None
    } else {
        Some(format!("Phone number should be exactly {digits} digits"))
    }
}

/// Strip everything but digits and cut to the expected length, the way the
/// phone input does while typing.
pub fn normalize_phone(raw: &str, digits: usize) -> String {
    raw.chars().filter(char::is_ascii_digit).take(digits).collect()
}

/// Checks shared by "verify now" and "verify later".
pub fn validate_passwords(password: &str, confirm: &str) -> Result<(), FlowError> {
    if password.is_empty() || confirm.is_empty() {
        return Err(FlowError::validation("Both password fields are required"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(FlowError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password != confirm {
        return Err(FlowError::validation("Passwords do not match"));
    }
    Ok(())
}

pub fn validate_otp(otp: &str) -> Result<(), FlowError> {
    if otp.chars().count() != OTP_LEN {
        return Err(FlowError::validation(format!(
            "Please enter a valid {OTP_LEN}-digit OTP"
        )));
    }
    Ok(())
}
