// Recurring reminder timer.
//
// One spawned task ticks every `interval` (the first tick comes one full
// interval after start) and runs the callback. Starting again replaces the
// running task; cancel() and Drop abort it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::debug;

/// Default gap between reminders.
pub const DEFAULT_REMINDER_INTERVAL: Duration = Duration::from_secs(30);

type Callback = Arc<dyn Fn() + Send + Sync>;

/// A cancellable repeating timer with at most one active task.
pub struct ReminderTimer {
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl ReminderTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking, replacing any task already running. Must be called
    /// from inside a tokio runtime.
    pub fn start(&mut self, on_tick: impl Fn() + Send + Sync + 'static) {
        self.cancel();

        let period = self.interval;
        let on_tick: Callback = Arc::new(on_tick);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                on_tick();
            }
        }));
        debug!(interval_secs = period.as_secs(), "Reminder started");
    }

    /// Stop ticking. No new tick starts after this returns, but on a
    /// multi-thread runtime a callback already running may still finish.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Reminder cancelled");
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for ReminderTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
