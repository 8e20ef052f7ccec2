// REST client for the lead/registration backend.
//
// Every endpoint takes and returns JSON. Failures carry a `message`; some
// also carry `user_exists` / `is_verified`, which map to fixed user-facing
// messages. Nothing here retries: the user resubmits.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::FlowError;
use super::lead::LeadRecord;

/// Default backend base URL.
pub const DEFAULT_FUNNEL_API_URL: &str = "https://intern-project-final-1.onrender.com";

/// Bearer tokens issued by `register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access: String,
    pub refresh: String,
}

/// The common reply shape of every backend endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiReply {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub tokens: Option<AuthTokens>,
    #[serde(default)]
    pub user_exists: Option<bool>,
    #[serde(default)]
    pub is_verified: Option<bool>,
}

/// The backend operations the registration flow depends on.
#[async_trait]
pub trait RegistrationApi: Send + Sync {
    /// Store the lead's contact details.
    async fn save_lead(&self, lead: &LeadRecord) -> Result<ApiReply, FlowError>;

    /// Create an account for the lead with the given password.
    async fn register(&self, lead: &LeadRecord, password: &str) -> Result<ApiReply, FlowError>;

    /// Email a one-time code to the address.
    async fn send_otp(&self, email: &str) -> Result<ApiReply, FlowError>;

    /// Check a one-time code for the address.
    async fn verify_otp(&self, email: &str, otp: &str) -> Result<ApiReply, FlowError>;

    /// Replace the account password. Needs the access token from `register`.
    async fn reset_password(
        &self,
        email: &str,
        new_password: &str,
        access_token: Option<&str>,
    ) -> Result<ApiReply, FlowError>;
}

/// reqwest-backed implementation of [`RegistrationApi`].
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent("exitfunnel/0.1 (lead-capture)")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// POST a JSON body and decode the reply. Returns the reply on 2xx;
    /// otherwise `on_error` picks the rejection message.
    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        bearer: Option<&str>,
        on_error: fn(&ApiReply) -> Option<&'static str>,
        default_error: &'static str,
    ) -> Result<ApiReply, FlowError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(path = path, "Backend POST");

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {path} failed"))
            .map_err(FlowError::NetworkFailure)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read {path} response"))
            .map_err(FlowError::NetworkFailure)?;

        let reply: ApiReply = match serde_json::from_str(&text) {
            Ok(reply) => reply,
            Err(e) if status.is_success() => {
                debug!(path = path, error = %e, "Backend reply was not JSON");
                ApiReply::default()
            }
            Err(e) => {
                return Err(FlowError::NetworkFailure(anyhow::anyhow!(
                    "{path} returned {status} with a non-JSON body: {e}"
                )))
            }
        };

        if status.is_success() {
            return Ok(reply);
        }

        let message = on_error(&reply)
            .map(str::to_string)
            .or_else(|| reply.message.clone().filter(|m| !m.is_empty()))
            .unwrap_or_else(|| default_error.to_string());
        warn!(path = path, status = %status, message = %message, "Backend rejected request");
        Err(FlowError::RemoteRejection(message))
    }
}

fn no_special_case(_: &ApiReply) -> Option<&'static str> {
    None
}

fn register_error(reply: &ApiReply) -> Option<&'static str> {
    (reply.user_exists == Some(true))
        .then_some("User with this email already exists. Please try logging in.")
}

fn send_otp_error(reply: &ApiReply) -> Option<&'static str> {
    if reply.is_verified == Some(true) {
        Some("Email already verified. Please login.")
    } else if reply.user_exists != Some(true) {
        Some("Please register first.")
    } else {
        None
    }
}

#[derive(Serialize)]
struct SaveLeadBody<'a> {
    email: &'a str,
    full_name: &'a str,
    phone_number: &'a str,
    website_name: &'a str,
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    email: &'a str,
    password: &'a str,
    full_name: &'a str,
    phone_number: &'a str,
    website_name: &'a str,
    no_linkedin: bool,
}

#[derive(Serialize)]
struct EmailBody<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct VerifyOtpBody<'a> {
    email: &'a str,
    otp: &'a str,
}

#[derive(Serialize)]
struct ResetPasswordBody<'a> {
    email: &'a str,
    new_password: &'a str,
}

#[async_trait]
impl RegistrationApi for BackendClient {
    async fn save_lead(&self, lead: &LeadRecord) -> Result<ApiReply, FlowError> {
        let body = SaveLeadBody {
            email: &lead.email,
            full_name: &lead.full_name,
            phone_number: &lead.phone,
            website_name: &lead.website,
        };
        self.post(
            "/save-coi-form/",
            &body,
            None,
            no_special_case,
            "Failed to save form data",
        )
        .await
    }

    async fn register(&self, lead: &LeadRecord, password: &str) -> Result<ApiReply, FlowError> {
        let body = RegisterBody {
            email: &lead.email,
            password,
            full_name: &lead.full_name,
            phone_number: &lead.phone,
            website_name: &lead.website,
            no_linkedin: true,
        };
        self.post(
            "/register/",
            &body,
            None,
            register_error,
            "Registration failed",
        )
        .await
    }

    async fn send_otp(&self, email: &str) -> Result<ApiReply, FlowError> {
        self.post(
            "/send_email_otp/",
            &EmailBody { email },
            None,
            send_otp_error,
            "Failed to send OTP",
        )
        .await
    }

    async fn verify_otp(&self, email: &str, otp: &str) -> Result<ApiReply, FlowError> {
        self.post(
            "/verify_email_otp/",
            &VerifyOtpBody { email, otp },
            None,
            no_special_case,
            "OTP verification failed",
        )
        .await
    }

    async fn reset_password(
        &self,
        email: &str,
        new_password: &str,
        access_token: Option<&str>,
    ) -> Result<ApiReply, FlowError> {
        self.post(
            "/reset-password/",
            &ResetPasswordBody {
                email,
                new_password,
            },
            access_token,
            no_special_case,
            "Failed to update password",
        )
        .await
    }
}
