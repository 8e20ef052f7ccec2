// Onboarding state machine.
//
//   Idle --submit_lead--> AwaitingPassword --verify_now--> AwaitingOtp --submit_otp--> Verified
//                                |                              |
//                          verify_later / skip            close_otp_prompt / skip
//                                v                              v
//                             Skipped                        Skipped
//
// While AwaitingPassword, the reminder re-opens the password prompt every
// interval. Verified and Skipped cancel the reminder before clearing the
// pending lead from the local store.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{info, warn};

use super::api::RegistrationApi;
use super::error::FlowError;
use super::lead::{
    normalize_phone, validate_otp, validate_passwords, LeadRecord, DEFAULT_PHONE_DIGITS,
};
use super::reminder::{ReminderTimer, DEFAULT_REMINDER_INTERVAL};
use super::store::{
    clear_pending_lead, load_pending_lead, save_pending_lead, save_tokens, LocalStore, StoredLead,
    ACCESS_TOKEN_KEY,
};

/// Store key recording which step a pending lead is on.
pub const STAGE_KEY: &str = "onboardingStage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStage {
    Idle,
    AwaitingPassword,
    AwaitingOtp,
    Verified,
    Skipped,
}

impl FlowStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Skipped)
    }
}

/// Which modal prompts are currently showing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Prompts {
    pub password_open: bool,
    pub otp_open: bool,
}

/// Prompt state shared with the reminder task. `reminding` is cleared under
/// the same lock that terminal transitions use to close the prompts, so a
/// tick racing a cancel cannot re-open them.
#[derive(Debug, Default)]
struct ModalState {
    prompts: Prompts,
    reminding: bool,
}

/// Tunables for the flow.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Exact number of digits a phone number must have.
    pub phone_digits: usize,
    pub reminder_interval: Duration,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            phone_digits: DEFAULT_PHONE_DIGITS,
            reminder_interval: DEFAULT_REMINDER_INTERVAL,
        }
    }
}

/// Whether the store still holds a lead that has not set its password.
/// Another session may have moved the lead on to the OTP step or finished
/// onboarding since this one started.
pub fn password_step_pending(store: &dyn LocalStore) -> Result<bool, FlowError> {
    match load_pending_lead(store).map_err(FlowError::Storage)? {
        StoredLead::Present(_) => Ok(stored_stage(store)? != Some(FlowStage::AwaitingOtp)),
        StoredLead::Missing | StoredLead::Corrupt(_) => Ok(false),
    }
}

fn stored_stage(store: &dyn LocalStore) -> Result<Option<FlowStage>, FlowError> {
    Ok(store
        .get(STAGE_KEY)
        .map_err(FlowError::Storage)?
        .and_then(|s| serde_json::from_str::<FlowStage>(&s).ok()))
}

/// Onboarding state for one lead.
///
/// Entering the password step spawns the reminder task, so `resume` and
/// `submit_lead` must run inside a tokio runtime.
pub struct RegistrationFlow {
    api: Arc<dyn RegistrationApi>,
    store: Arc<dyn LocalStore>,
    settings: FlowSettings,
    stage: FlowStage,
    lead: Option<LeadRecord>,
    modal: Arc<Mutex<ModalState>>,
    reminders: Arc<watch::Sender<u64>>,
    reminder: ReminderTimer,
    error: Option<String>,
    notice: Option<String>,
}

impl RegistrationFlow {
    pub fn new(
        api: Arc<dyn RegistrationApi>,
        store: Arc<dyn LocalStore>,
        settings: FlowSettings,
    ) -> Self {
        let (reminders, _) = watch::channel(0);
        let reminder = ReminderTimer::new(settings.reminder_interval);
        Self {
            api,
            store,
            settings,
            stage: FlowStage::Idle,
            lead: None,
            modal: Arc::new(Mutex::new(ModalState::default())),
            reminders: Arc::new(reminders),
            reminder,
            error: None,
            notice: None,
        }
    }

    // --- Accessors ---

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    pub fn stage(&self) -> FlowStage {
        self.stage
    }

    pub fn lead(&self) -> Option<&LeadRecord> {
        self.lead.as_ref()
    }

    pub fn prompts(&self) -> Prompts {
        self.modal.lock().map(|m| m.prompts).unwrap_or_default()
    }

    /// The inline error from the last failed step, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The last success message, if any.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn reminder_active(&self) -> bool {
        self.reminder.is_active()
    }

    /// Subscribe to the number of reminders shown so far.
    pub fn reminders(&self) -> watch::Receiver<u64> {
        self.reminders.subscribe()
    }

    pub fn reminders_shown(&self) -> u64 {
        *self.reminders.borrow()
    }

    // --- Operations ---

    /// Pick up a lead left pending by an earlier session. Returns whether one
    /// was found. A record that no longer decodes is discarded. Resuming at
    /// the password step outside a tokio runtime is an `InvalidState` error.
    pub fn resume(&mut self) -> Result<bool, FlowError> {
        let result = self.resume_inner();
        self.record(result)
    }

    fn resume_inner(&mut self) -> Result<bool, FlowError> {
        let lead = match load_pending_lead(self.store.as_ref()).map_err(FlowError::Storage)? {
            StoredLead::Missing => return Ok(false),
            StoredLead::Corrupt(e) => {
                warn!(error = %e, "Discarding unreadable pending lead");
                clear_pending_lead(self.store.as_ref()).map_err(FlowError::Storage)?;
                self.store.remove(STAGE_KEY).map_err(FlowError::Storage)?;
                return Ok(false);
            }
            StoredLead::Present(lead) => lead,
        };

        let stage = stored_stage(self.store.as_ref())?;
        if stage != Some(FlowStage::AwaitingOtp) && tokio::runtime::Handle::try_current().is_err() {
            return Err(FlowError::InvalidState(
                "Resuming a pending lead needs a tokio runtime for the reminder",
            ));
        }

        info!(email = %lead.email, "Resuming pending onboarding");
        self.lead = Some(lead);

        if stage == Some(FlowStage::AwaitingOtp) {
            self.stage = FlowStage::AwaitingOtp;
            self.set_prompts(false, true);
        } else {
            self.enter_awaiting_password();
        }
        Ok(true)
    }

    /// Validate and submit the lead form, register the lead with a
    /// temporary password and open the password prompt.
    pub async fn submit_lead(&mut self, lead: LeadRecord) -> Result<(), FlowError> {
        self.begin();
        let result = self.submit_lead_inner(lead).await;
        self.record(result)
    }

    async fn submit_lead_inner(&mut self, mut lead: LeadRecord) -> Result<(), FlowError> {
        if matches!(
            self.stage,
            FlowStage::AwaitingPassword | FlowStage::AwaitingOtp
        ) {
            return Err(FlowError::InvalidState(
                "Finish or skip the pending verification first",
            ));
        }

        lead.phone = normalize_phone(&lead.phone, self.settings.phone_digits);
        lead.validate(self.settings.phone_digits)?;

        self.api.save_lead(&lead).await?;

        let temp_password = format!("temp_password_{}", chrono::Utc::now().timestamp_millis());
        let reply = self.api.register(&lead, &temp_password).await?;
        if let Some(tokens) = &reply.tokens {
            save_tokens(self.store.as_ref(), tokens).map_err(FlowError::Storage)?;
        }

        save_pending_lead(self.store.as_ref(), &lead).map_err(FlowError::Storage)?;
        info!(email = %lead.email, "Lead captured, awaiting password");

        self.lead = Some(lead);
        self.enter_awaiting_password();
        Ok(())
    }

    /// Hide the password prompt. The reminder keeps running.
    pub fn close_password_prompt(&mut self) {
        self.error = None;
        if let Ok(mut modal) = self.modal.lock() {
            modal.prompts.password_open = false;
        }
    }

    /// Set the real password, then email a one-time code.
    pub async fn verify_now(&mut self, password: &str, confirm: &str) -> Result<(), FlowError> {
        self.begin();
        let result = self.verify_now_inner(password, confirm).await;
        self.record(result)
    }

    async fn verify_now_inner(&mut self, password: &str, confirm: &str) -> Result<(), FlowError> {
        let email = self.pending_email(FlowStage::AwaitingPassword)?;
        validate_passwords(password, confirm)?;

        let token = self.store.get(ACCESS_TOKEN_KEY).map_err(FlowError::Storage)?;
        self.api
            .reset_password(&email, password, token.as_deref())
            .await?;
        self.api.send_otp(&email).await?;

        self.stop_reminder();
        self.stage = FlowStage::AwaitingOtp;
        self.persist_stage()?;
        self.set_prompts(false, true);
        info!(email = %email, "Password set, OTP sent");
        Ok(())
    }

    /// Register with the chosen password and postpone email verification.
    pub async fn verify_later(&mut self, password: &str, confirm: &str) -> Result<(), FlowError> {
        self.begin();
        let result = self.verify_later_inner(password, confirm).await;
        self.record(result)
    }

    async fn verify_later_inner(&mut self, password: &str, confirm: &str) -> Result<(), FlowError> {
        self.pending_email(FlowStage::AwaitingPassword)?;
        validate_passwords(password, confirm)?;

        let Some(lead) = self.lead.clone() else {
            return Err(FlowError::InvalidState("No pending lead"));
        };
        let reply = self.api.register(&lead, password).await?;
        if let Some(tokens) = &reply.tokens {
            save_tokens(self.store.as_ref(), tokens).map_err(FlowError::Storage)?;
        }

        self.finish(
            FlowStage::Skipped,
            "Registration successful! You can verify your email later.",
        )
    }

    /// Check the emailed code and complete onboarding.
    pub async fn submit_otp(&mut self, otp: &str) -> Result<(), FlowError> {
        self.begin();
        let result = self.submit_otp_inner(otp).await;
        self.record(result)
    }

    async fn submit_otp_inner(&mut self, otp: &str) -> Result<(), FlowError> {
        let email = self.pending_email(FlowStage::AwaitingOtp)?;
        validate_otp(otp)?;

        self.api.verify_otp(&email, otp).await?;
        self.finish(
            FlowStage::Verified,
            "Email verified successfully! Welcome aboard!",
        )
    }

    /// Email a fresh one-time code.
    pub async fn resend_otp(&mut self) -> Result<(), FlowError> {
        self.begin();
        let result = self.resend_otp_inner().await;
        self.record(result)
    }

    async fn resend_otp_inner(&mut self) -> Result<(), FlowError> {
        let email = self.pending_email(FlowStage::AwaitingOtp)?;
        self.api.send_otp(&email).await?;
        self.notice = Some("OTP resent successfully!".to_string());
        Ok(())
    }

    /// Dismiss the OTP prompt without verifying.
    pub fn close_otp_prompt(&mut self) -> Result<(), FlowError> {
        self.begin();
        let result = self
            .pending_email(FlowStage::AwaitingOtp)
            .and_then(|_| self.finish_silently(FlowStage::Skipped));
        self.record(result)
    }

    /// Abandon onboarding from whichever prompt is pending.
    pub fn skip(&mut self) -> Result<(), FlowError> {
        self.begin();
        let result = match self.stage {
            FlowStage::AwaitingPassword | FlowStage::AwaitingOtp => {
                self.finish_silently(FlowStage::Skipped)
            }
            _ => Err(FlowError::InvalidState("Nothing to skip")),
        };
        self.record(result)
    }

    /// Tear down: stop the reminder. Stored state is left for the next
    /// session to resume.
    pub fn shutdown(&mut self) {
        self.stop_reminder();
    }

    // --- Internals ---

    fn begin(&mut self) {
        self.error = None;
        self.notice = None;
    }

    fn record<T>(&mut self, result: Result<T, FlowError>) -> Result<T, FlowError> {
        if let Err(e) = &result {
            self.error = Some(e.to_string());
        }
        result
    }

    fn pending_email(&self, expected: FlowStage) -> Result<String, FlowError> {
        if self.stage != expected {
            return Err(FlowError::InvalidState(match expected {
                FlowStage::AwaitingOtp => "No OTP verification is pending",
                _ => "No password setup is pending",
            }));
        }
        self.lead
            .as_ref()
            .map(|lead| lead.email.clone())
            .ok_or(FlowError::InvalidState("No pending lead"))
    }

    fn set_prompts(&self, password_open: bool, otp_open: bool) {
        if let Ok(mut modal) = self.modal.lock() {
            modal.prompts = Prompts {
                password_open,
                otp_open,
            };
        }
    }

    fn stop_reminder(&mut self) {
        if let Ok(mut modal) = self.modal.lock() {
            modal.reminding = false;
        }
        self.reminder.cancel();
    }

    fn persist_stage(&self) -> Result<(), FlowError> {
        let json = serde_json::to_string(&self.stage)
            .map_err(|e| FlowError::Storage(anyhow::Error::from(e)))?;
        self.store.set(STAGE_KEY, &json).map_err(FlowError::Storage)
    }

    fn enter_awaiting_password(&mut self) {
        self.stage = FlowStage::AwaitingPassword;
        if let Ok(mut modal) = self.modal.lock() {
            modal.prompts = Prompts {
                password_open: true,
                otp_open: false,
            };
            modal.reminding = true;
        }

        let shared = Arc::clone(&self.modal);
        let reminders = Arc::clone(&self.reminders);
        self.reminder.start(move || {
            let Ok(mut modal) = shared.lock() else {
                return;
            };
            if !modal.reminding {
                return;
            }
            modal.prompts.password_open = true;
            reminders.send_modify(|shown| *shown += 1);
            info!("Reminding lead to finish setting a password");
        });
    }

    fn finish(&mut self, stage: FlowStage, notice: &str) -> Result<(), FlowError> {
        self.finish_silently(stage)?;
        self.notice = Some(notice.to_string());
        Ok(())
    }

    fn finish_silently(&mut self, stage: FlowStage) -> Result<(), FlowError> {
        self.stop_reminder();
        self.set_prompts(false, false);
        self.stage = stage;
        self.lead = None;
        clear_pending_lead(self.store.as_ref()).map_err(FlowError::Storage)?;
        self.store.remove(STAGE_KEY).map_err(FlowError::Storage)?;
        info!(stage = ?stage, "Onboarding finished");
        Ok(())
    }
}
