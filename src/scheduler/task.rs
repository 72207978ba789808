//! Cooperative periodic task

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Lifecycle of a periodic task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum TaskState {
    /// Created, never started
    Idle = 0,
    /// Ticks run at every wake-up
    Running = 1,
    /// Loop keeps sleeping, ticks are skipped until restarted
    Stopped = 2,
    /// Loop has exited and will not tick again
    Terminated = 3,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Idle,
            1 => TaskState::Running,
            2 => TaskState::Stopped,
            _ => TaskState::Terminated,
        }
    }
}

/// What a tick asks of its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// The target is gone or closed; stop rescheduling
    Terminate,
}

type Tick = Arc<dyn Fn() -> TickOutcome + Send + Sync>;

/// A named task that sleeps for its interval, then runs a blocking tick
/// if it is in the [`TaskState::Running`] state.
///
/// `stop` is cooperative: it takes effect at the next wake-up, but waits
/// for a tick that is already executing so that callers observe a quiet task
/// once it returns.
pub struct PeriodicTask {
    name: String,
    interval: Duration,
    state: Arc<AtomicU8>,
    tick: Tick,
    tick_guard: Arc<Mutex<()>>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn new<F>(name: impl Into<String>, interval: Duration, tick: F) -> Self
    where
        F: Fn() -> TickOutcome + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            interval,
            state: Arc::new(AtomicU8::new(TaskState::Idle as u8)),
            tick: Arc::new(tick),
            tick_guard: Arc::new(Mutex::new(())),
            handle: parking_lot::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    /// Start ticking, spawning the loop on first use. No-op once terminated.
    pub fn start(&self) {
        let previous = self.state.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
            (TaskState::from_u8(s) != TaskState::Terminated).then_some(TaskState::Running as u8)
        });
        if previous.is_err() {
            return;
        }

        let mut handle = self.handle.lock();
        if handle.is_none() {
            *handle = Some(tokio::spawn(run_loop(
                self.name.clone(),
                self.interval,
                self.state.clone(),
                self.tick.clone(),
                self.tick_guard.clone(),
            )));
            debug!(task = %self.name, interval_ms = self.interval.as_millis() as u64, "Periodic task started");
        }
    }

    /// Skip ticks until the next `start`; waits out an in-flight tick
    pub async fn stop(&self) {
        let _ = self.state.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
            (TaskState::from_u8(s) == TaskState::Running).then_some(TaskState::Stopped as u8)
        });
        let _guard = self.tick_guard.lock().await;
        debug!(task = %self.name, "Periodic task stopped");
    }

    /// End the loop permanently
    pub fn terminate(&self) {
        self.state
            .store(TaskState::Terminated as u8, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn run_loop(
    name: String,
    interval: Duration,
    state: Arc<AtomicU8>,
    tick: Tick,
    tick_guard: Arc<Mutex<()>>,
) {
    loop {
        tokio::time::sleep(interval).await;

        let _guard = tick_guard.lock().await;
        match TaskState::from_u8(state.load(Ordering::SeqCst)) {
            TaskState::Running => {}
            TaskState::Terminated => break,
            TaskState::Idle | TaskState::Stopped => continue,
        }

        let tick = tick.clone();
        match tokio::task::spawn_blocking(move || tick()).await {
            Ok(TickOutcome::Continue) => {}
            Ok(TickOutcome::Terminate) => {
                debug!(task = %name, "Periodic task terminated by its tick");
                state.store(TaskState::Terminated as u8, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                error!(task = %name, error = %e, "Periodic task tick panicked, terminating");
                state.store(TaskState::Terminated as u8, Ordering::SeqCst);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(interval_ms: u64) -> (PeriodicTask, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let task = PeriodicTask::new("test", Duration::from_millis(interval_ms), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TickOutcome::Continue
        });
        (task, ticks)
    }

    #[tokio::test]
    async fn test_idle_task_never_ticks() {
        let (task, ticks) = counting_task(10);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(task.state(), TaskState::Idle);
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_and_restart() {
        let (task, ticks) = counting_task(10);
        task.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(ticks.load(Ordering::SeqCst) > 0);

        task.stop().await;
        assert_eq!(task.state(), TaskState::Stopped);
        let frozen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), frozen);

        task.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(ticks.load(Ordering::SeqCst) > frozen);
        task.terminate();
    }

    #[tokio::test]
    async fn test_terminate_outcome_ends_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let task = PeriodicTask::new("closing", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TickOutcome::Terminate
        });
        task.start();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(task.state(), TaskState::Terminated);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        task.start();
        assert_eq!(task.state(), TaskState::Terminated);
    }
}
