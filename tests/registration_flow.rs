// State-machine tests for RegistrationFlow.
//
// A recording fake stands in for the backend and MemoryStore for local
// storage. Reminder timing runs on tokio's paused clock, so sleeping 31
// seconds is instant and deterministic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Duration;

use exitfunnel::registration::api::{ApiReply, AuthTokens, RegistrationApi};
use exitfunnel::registration::error::FlowError;
use exitfunnel::registration::flow::{
    password_step_pending, FlowSettings, FlowStage, RegistrationFlow, STAGE_KEY,
};
use exitfunnel::registration::lead::LeadRecord;
use exitfunnel::registration::store::{
    save_pending_lead, LocalStore, MemoryStore, ACCESS_TOKEN_KEY, PENDING_LEAD_KEY,
};

// ============================================================
// Fake backend
// ============================================================

#[derive(Default)]
struct FakeApi {
    calls: Mutex<Vec<String>>,
    rejections: Mutex<HashMap<&'static str, String>>,
}

impl FakeApi {
    fn reject(&self, op: &'static str, message: &str) {
        self.rejections
            .lock()
            .unwrap()
            .insert(op, message.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn call(&self, op: &'static str, detail: String) -> Result<ApiReply, FlowError> {
        self.calls.lock().unwrap().push(format!("{op} {detail}"));
        if let Some(message) = self.rejections.lock().unwrap().get(op) {
            return Err(FlowError::RemoteRejection(message.clone()));
        }
        Ok(ApiReply::default())
    }
}

#[async_trait]
impl RegistrationApi for FakeApi {
    async fn save_lead(&self, lead: &LeadRecord) -> Result<ApiReply, FlowError> {
        self.call("save_lead", lead.email.clone())
    }

    async fn register(&self, lead: &LeadRecord, password: &str) -> Result<ApiReply, FlowError> {
        let mut reply = self.call("register", format!("{} {}", lead.email, password))?;
        reply.tokens = Some(AuthTokens {
            access: "access-1".to_string(),
            refresh: "refresh-1".to_string(),
        });
        Ok(reply)
    }

    async fn send_otp(&self, email: &str) -> Result<ApiReply, FlowError> {
        self.call("send_otp", email.to_string())
    }

    async fn verify_otp(&self, email: &str, otp: &str) -> Result<ApiReply, FlowError> {
        self.call("verify_otp", format!("{email} {otp}"))
    }

    async fn reset_password(
        &self,
        email: &str,
        new_password: &str,
        access_token: Option<&str>,
    ) -> Result<ApiReply, FlowError> {
        self.call(
            "reset_password",
            format!("{email} {new_password} {}", access_token.unwrap_or("-")),
        )
    }
}

// ============================================================
// Helpers
// ============================================================

struct Harness {
    api: Arc<FakeApi>,
    store: Arc<MemoryStore>,
    flow: RegistrationFlow,
}

fn harness() -> Harness {
    let api = Arc::new(FakeApi::default());
    let store = Arc::new(MemoryStore::default());
    let flow = RegistrationFlow::new(api.clone(), store.clone(), FlowSettings::default());
    Harness { api, store, flow }
}

fn lead() -> LeadRecord {
    LeadRecord {
        full_name: "Marcus Hale".to_string(),
        email: "marcus@halefabrication.com".to_string(),
        website: "halefabrication.com".to_string(),
        phone: "(312) 555-0147".to_string(),
        privacy: true,
    }
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

async fn submitted() -> Harness {
    let mut h = harness();
    h.flow.submit_lead(lead()).await.unwrap();
    h
}

async fn awaiting_otp() -> Harness {
    let mut h = submitted().await;
    h.flow.verify_now("newpass1", "newpass1").await.unwrap();
    h
}

// ============================================================
// Lead submission
// ============================================================

#[tokio::test(start_paused = true)]
async fn submit_lead_registers_and_opens_password_prompt() {
    let h = submitted().await;

    assert_eq!(h.flow.stage(), FlowStage::AwaitingPassword);
    assert!(h.flow.prompts().password_open);
    assert!(h.flow.reminder_active());

    let calls = h.api.calls();
    assert_eq!(calls[0], "save_lead marcus@halefabrication.com");
    assert!(calls[1].starts_with("register marcus@halefabrication.com temp_password_"));

    // Phone was normalized before it was stored.
    let stored: LeadRecord =
        serde_json::from_str(&h.store.get(PENDING_LEAD_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(stored.phone, "3125550147");
    assert_eq!(
        h.store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(),
        Some("access-1")
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_lead_makes_no_calls() {
    let mut h = harness();
    let bad = LeadRecord {
        email: "not-an-email".to_string(),
        ..lead()
    };

    let err = h.flow.submit_lead(bad).await.unwrap_err();
    assert!(matches!(err, FlowError::ValidationFailure(_)));
    assert_eq!(h.flow.error(), Some("Please enter a valid email address"));
    assert_eq!(h.flow.stage(), FlowStage::Idle);
    assert!(h.api.calls().is_empty());
    assert!(h.store.get(PENDING_LEAD_KEY).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn rejected_save_keeps_flow_idle() {
    let mut h = harness();
    h.api.reject("save_lead", "Email is blocked");

    let err = h.flow.submit_lead(lead()).await.unwrap_err();
    assert!(matches!(err, FlowError::RemoteRejection(_)));
    assert_eq!(h.flow.error(), Some("Email is blocked"));
    assert_eq!(h.flow.stage(), FlowStage::Idle);
    assert!(!h.flow.reminder_active());
    assert_eq!(h.api.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_submit_while_pending_is_refused() {
    let mut h = submitted().await;
    let err = h.flow.submit_lead(lead()).await.unwrap_err();
    assert!(matches!(err, FlowError::InvalidState(_)));
    assert_eq!(h.api.calls().len(), 2);
}

// ============================================================
// Reminder
// ============================================================

#[tokio::test(start_paused = true)]
async fn reminder_reopens_closed_password_prompt() {
    let mut h = submitted().await;
    h.flow.close_password_prompt();
    assert!(!h.flow.prompts().password_open);

    advance(29).await;
    assert!(!h.flow.prompts().password_open);
    assert_eq!(h.flow.reminders_shown(), 0);

    advance(2).await;
    assert!(h.flow.prompts().password_open);
    assert_eq!(h.flow.reminders_shown(), 1);

    h.flow.close_password_prompt();
    advance(30).await;
    assert!(h.flow.prompts().password_open);
    assert_eq!(h.flow.reminders_shown(), 2);
}

#[tokio::test(start_paused = true)]
async fn no_reminder_after_verification() {
    let mut h = awaiting_otp().await;
    h.flow.submit_otp("482913").await.unwrap();
    assert_eq!(h.flow.stage(), FlowStage::Verified);

    advance(120).await;
    assert_eq!(h.flow.reminders_shown(), 0);
    assert!(!h.flow.prompts().password_open);
    assert!(!h.flow.reminder_active());
}

#[tokio::test(start_paused = true)]
async fn no_reminder_after_shutdown() {
    let mut h = submitted().await;
    h.flow.shutdown();
    advance(90).await;
    assert_eq!(h.flow.reminders_shown(), 0);
    // Shutdown is teardown, not a skip: the lead stays stored for next time.
    assert!(h.store.get(PENDING_LEAD_KEY).unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn reminder_count_is_observable() {
    let h = submitted().await;
    let mut rx = h.flow.reminders();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), 1);
}

// ============================================================
// Verify now / OTP
// ============================================================

#[tokio::test(start_paused = true)]
async fn verify_now_resets_password_and_sends_otp() {
    let h = awaiting_otp().await;

    assert_eq!(h.flow.stage(), FlowStage::AwaitingOtp);
    assert!(!h.flow.prompts().password_open);
    assert!(h.flow.prompts().otp_open);
    assert!(!h.flow.reminder_active());

    let calls = h.api.calls();
    assert_eq!(
        calls[2],
        "reset_password marcus@halefabrication.com newpass1 access-1"
    );
    assert_eq!(calls[3], "send_otp marcus@halefabrication.com");
    assert_eq!(
        h.store.get(STAGE_KEY).unwrap().as_deref(),
        Some("\"awaiting_otp\"")
    );
}

#[tokio::test(start_paused = true)]
async fn verify_now_validates_passwords_first() {
    let mut h = submitted().await;
    let err = h.flow.verify_now("newpass1", "newpass2").await.unwrap_err();
    assert_eq!(err.to_string(), "Passwords do not match");
    assert_eq!(h.flow.stage(), FlowStage::AwaitingPassword);
    assert!(h.flow.reminder_active());
    assert_eq!(h.api.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_reset_keeps_reminding() {
    let mut h = submitted().await;
    h.api.reject("reset_password", "Token expired");

    let err = h.flow.verify_now("newpass1", "newpass1").await.unwrap_err();
    assert_eq!(err.to_string(), "Token expired");
    assert_eq!(h.flow.stage(), FlowStage::AwaitingPassword);

    h.flow.close_password_prompt();
    advance(31).await;
    assert!(h.flow.prompts().password_open);
}

#[tokio::test(start_paused = true)]
async fn otp_verification_clears_pending_lead() {
    let mut h = awaiting_otp().await;
    h.flow.submit_otp("482913").await.unwrap();

    assert_eq!(h.flow.stage(), FlowStage::Verified);
    assert_eq!(
        h.flow.notice(),
        Some("Email verified successfully! Welcome aboard!")
    );
    assert!(h.flow.lead().is_none());
    assert!(h.store.get(PENDING_LEAD_KEY).unwrap().is_none());
    assert!(h.store.get(STAGE_KEY).unwrap().is_none());
    assert!(!h.flow.prompts().otp_open);
}

#[tokio::test(start_paused = true)]
async fn short_otp_is_rejected_locally() {
    let mut h = awaiting_otp().await;
    let before = h.api.calls().len();
    let err = h.flow.submit_otp("123").await.unwrap_err();
    assert!(matches!(err, FlowError::ValidationFailure(_)));
    assert_eq!(h.api.calls().len(), before);
}

#[tokio::test(start_paused = true)]
async fn wrong_otp_keeps_state() {
    let mut h = awaiting_otp().await;
    h.api.reject("verify_otp", "Invalid or expired OTP");

    let err = h.flow.submit_otp("000000").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid or expired OTP");
    assert_eq!(h.flow.error(), Some("Invalid or expired OTP"));
    assert_eq!(h.flow.stage(), FlowStage::AwaitingOtp);
    assert!(h.store.get(PENDING_LEAD_KEY).unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn resend_otp_sets_notice() {
    let mut h = awaiting_otp().await;
    h.flow.resend_otp().await.unwrap();
    assert_eq!(h.flow.notice(), Some("OTP resent successfully!"));
    assert_eq!(
        h.api.calls().last().map(String::as_str),
        Some("send_otp marcus@halefabrication.com")
    );
}

#[tokio::test(start_paused = true)]
async fn closing_otp_prompt_skips() {
    let mut h = awaiting_otp().await;
    h.flow.close_otp_prompt().unwrap();
    assert_eq!(h.flow.stage(), FlowStage::Skipped);
    assert!(h.store.get(PENDING_LEAD_KEY).unwrap().is_none());
}

// ============================================================
// Verify later / skip
// ============================================================

#[tokio::test(start_paused = true)]
async fn verify_later_registers_and_clears() {
    let mut h = submitted().await;
    h.flow.verify_later("chosenpw", "chosenpw").await.unwrap();

    assert_eq!(h.flow.stage(), FlowStage::Skipped);
    assert_eq!(
        h.flow.notice(),
        Some("Registration successful! You can verify your email later.")
    );
    assert_eq!(
        h.api.calls().last().map(String::as_str),
        Some("register marcus@halefabrication.com chosenpw")
    );
    assert!(h.store.get(PENDING_LEAD_KEY).unwrap().is_none());

    advance(120).await;
    assert_eq!(h.flow.reminders_shown(), 0);
}

#[tokio::test(start_paused = true)]
async fn skip_from_password_prompt() {
    let mut h = submitted().await;
    h.flow.skip().unwrap();
    assert_eq!(h.flow.stage(), FlowStage::Skipped);
    assert!(!h.flow.reminder_active());
    assert!(h.store.get(PENDING_LEAD_KEY).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn skip_with_nothing_pending_is_an_error() {
    let mut h = harness();
    assert!(matches!(h.flow.skip(), Err(FlowError::InvalidState(_))));
}

// ============================================================
// Resume
// ============================================================

#[tokio::test(start_paused = true)]
async fn resume_restores_pending_lead_and_reminder() {
    let h = harness();
    save_pending_lead(h.store.as_ref(), &lead()).unwrap();

    let mut flow = RegistrationFlow::new(h.api.clone(), h.store.clone(), FlowSettings::default());
    assert!(flow.resume().unwrap());
    assert_eq!(flow.stage(), FlowStage::AwaitingPassword);
    assert_eq!(flow.lead().map(|l| l.email.as_str()), Some("marcus@halefabrication.com"));
    assert!(flow.prompts().password_open);

    flow.close_password_prompt();
    advance(31).await;
    assert!(flow.prompts().password_open);
}

#[tokio::test(start_paused = true)]
async fn resume_at_otp_step_has_no_reminder() {
    let h = harness();
    save_pending_lead(h.store.as_ref(), &lead()).unwrap();
    h.store.set(STAGE_KEY, "\"awaiting_otp\"").unwrap();

    let mut flow = RegistrationFlow::new(h.api.clone(), h.store.clone(), FlowSettings::default());
    assert!(flow.resume().unwrap());
    assert_eq!(flow.stage(), FlowStage::AwaitingOtp);
    assert!(flow.prompts().otp_open);
    assert!(!flow.reminder_active());
}

#[tokio::test(start_paused = true)]
async fn resume_discards_corrupt_record() {
    let mut h = harness();
    h.store.set(PENDING_LEAD_KEY, "{\"fullName\": 42").unwrap();

    assert!(!h.flow.resume().unwrap());
    assert_eq!(h.flow.stage(), FlowStage::Idle);
    assert!(h.store.get(PENDING_LEAD_KEY).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn resume_with_empty_store_is_idle() {
    let mut h = harness();
    assert!(!h.flow.resume().unwrap());
    assert!(!h.flow.reminder_active());
}

#[test]
fn resume_outside_runtime_is_an_error() {
    let api = Arc::new(FakeApi::default());
    let store = Arc::new(MemoryStore::default());
    save_pending_lead(store.as_ref(), &lead()).unwrap();

    let mut flow = RegistrationFlow::new(api, store.clone(), FlowSettings::default());
    let err = flow.resume().unwrap_err();
    assert!(matches!(err, FlowError::InvalidState(_)));
    assert_eq!(flow.stage(), FlowStage::Idle);
    // The stored lead is left alone for a later attempt.
    assert!(store.get(PENDING_LEAD_KEY).unwrap().is_some());
}

#[test]
fn resume_at_otp_step_needs_no_runtime() {
    let api = Arc::new(FakeApi::default());
    let store = Arc::new(MemoryStore::default());
    save_pending_lead(store.as_ref(), &lead()).unwrap();
    store.set(STAGE_KEY, "\"awaiting_otp\"").unwrap();

    let mut flow = RegistrationFlow::new(api, store, FlowSettings::default());
    assert!(flow.resume().unwrap());
    assert_eq!(flow.stage(), FlowStage::AwaitingOtp);
}

// ============================================================
// Cross-session state
// ============================================================

#[tokio::test(start_paused = true)]
async fn password_step_ends_when_another_session_sends_otp() {
    let h = submitted().await;
    assert!(password_step_pending(h.store.as_ref()).unwrap());

    let mut other = RegistrationFlow::new(h.api.clone(), h.store.clone(), FlowSettings::default());
    assert!(other.resume().unwrap());
    other.verify_now("newpass1", "newpass1").await.unwrap();

    // The lead is still stored, but it is waiting on the code now.
    assert!(h.store.get(PENDING_LEAD_KEY).unwrap().is_some());
    assert!(!password_step_pending(h.store.as_ref()).unwrap());

    other.submit_otp("482913").await.unwrap();
    assert!(!password_step_pending(h.store.as_ref()).unwrap());
}

#[tokio::test(start_paused = true)]
async fn password_step_not_pending_without_lead() {
    let h = harness();
    assert!(!password_step_pending(h.store.as_ref()).unwrap());
    h.store.set(PENDING_LEAD_KEY, "{broken").unwrap();
    assert!(!password_step_pending(h.store.as_ref()).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn skip_racing_a_tick_leaves_prompts_closed() {
    let settings = FlowSettings {
        reminder_interval: Duration::from_millis(1),
        ..FlowSettings::default()
    };
    for _ in 0..50 {
        let api = Arc::new(FakeApi::default());
        let store = Arc::new(MemoryStore::default());
        let mut flow = RegistrationFlow::new(api, store, settings.clone());
        flow.submit_lead(lead()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3)).await;

        flow.skip().unwrap();
        let shown = flow.reminders_shown();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(!flow.prompts().password_open);
        assert_eq!(flow.reminders_shown(), shown);
    }
}
