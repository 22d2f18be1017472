//! Timer-driven passes with edit-triggered rescheduling.
//!
//! A single driver thread owns the timer. [`Scheduler::set_update_timeout`]
//! arms it to run a pass immediately and then `interval` after each pass
//! finishes. Every local edit on an armed scheduler pulls the next firing
//! forward to "now", so a burst of edits costs one pass instead of one per
//! edit. Rescheduling never interrupts a pass that is already running;
//! edits that land during a pass are picked up by an immediate follow-up.
//!
//! At most one pass runs at a time: every pass, timer-driven or
//! [`Scheduler::run_now`], goes through an `Idle → Running` check-and-set.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::item::CheckItem;
use crate::remote::SyncError;
use crate::syncer::{PassReport, Syncer};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Whether a pass is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Running,
}

#[derive(Debug, Default)]
struct Timer {
    interval: Option<Duration>,
    next_due: Option<Instant>,
    generation: u64,
    shutdown: bool,
}

struct Shared {
    syncer: Arc<Syncer>,
    timer: Mutex<Timer>,
    wake: Condvar,
    state: Mutex<PassState>,
    in_flight: Mutex<Option<CancelToken>>,
}

impl Shared {
    /// Check-and-set `Idle → Running`. Returns the cancel token of the new
    /// pass, or `None` if a pass is already running.
    fn try_begin(&self) -> Option<CancelToken> {
        {
            let mut state = locked(&self.state);
            if *state == PassState::Running {
                return None;
            }
            *state = PassState::Running;
        }
        let cancel = CancelToken::new();
        *locked(&self.in_flight) = Some(cancel.clone());
        Some(cancel)
    }

    fn run_begun(&self, cancel: &CancelToken) -> PassReport {
        let _idle = IdleOnDrop(self);
        self.syncer.run_once_with(cancel)
    }

    /// Run one pass unless another is already running.
    fn run_guarded(&self) -> PassReport {
        match self.try_begin() {
            Some(cancel) => self.run_begun(&cancel),
            None => {
                debug!("pass already running; skipping");
                PassReport::Skipped
            }
        }
    }

    fn reschedule(&self) {
        let mut timer = locked(&self.timer);
        timer.generation += 1;
        if timer.interval.is_some() {
            timer.next_due = Some(Instant::now());
            self.wake.notify_all();
        }
    }

    fn drive(&self) {
        loop {
            let (generation, begun) = {
                let mut timer = locked(&self.timer);
                loop {
                    if timer.shutdown {
                        debug!("scheduler driver stopping");
                        return;
                    }
                    match timer.next_due {
                        None => {
                            timer = self.wake.wait(timer).unwrap_or_else(PoisonError::into_inner);
                        }
                        Some(due) => {
                            let now = Instant::now();
                            if now >= due {
                                break;
                            }
                            timer = self
                                .wake
                                .wait_timeout(timer, due - now)
                                .unwrap_or_else(PoisonError::into_inner)
                                .0;
                        }
                    }
                }
                timer.next_due = None;
                // Claimed while the timer is held so `deactivate` either
                // beats this firing or sees the pass as running.
                (timer.generation, self.try_begin())
            };

            match begun {
                Some(cancel) => {
                    let report = self.run_begun(&cancel);
                    debug!(?report, "scheduled pass finished");
                }
                None => debug!("pass already running; skipping scheduled firing"),
            }

            let mut timer = locked(&self.timer);
            if timer.generation == generation {
                if let Some(interval) = timer.interval {
                    timer.next_due = Some(Instant::now() + interval);
                }
            }
        }
    }
}

/// Resets the pass state even if the pass panics.
struct IdleOnDrop<'a>(&'a Shared);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *locked(&self.0.in_flight) = None;
        *locked(&self.0.state) = PassState::Idle;
    }
}

/// The engine surface: local edits plus automatic synchronization.
pub struct Scheduler {
    shared: Arc<Shared>,
    driver: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("syncer", &self.shared.syncer)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Start the driver thread. The scheduler stays inert until
    /// [`set_update_timeout`](Self::set_update_timeout) arms it.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver thread cannot be spawned.
    pub fn new(syncer: Arc<Syncer>) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            syncer,
            timer: Mutex::new(Timer::default()),
            wake: Condvar::new(),
            state: Mutex::new(PassState::Idle),
            in_flight: Mutex::new(None),
        });
        let driver_shared = Arc::clone(&shared);
        let driver = thread::Builder::new()
            .name("olist-scheduler".to_owned())
            .spawn(move || driver_shared.drive())?;
        Ok(Self {
            shared,
            driver: Some(driver),
        })
    }

    #[must_use]
    pub fn syncer(&self) -> &Arc<Syncer> {
        &self.shared.syncer
    }

    #[must_use]
    pub fn state(&self) -> PassState {
        *locked(&self.shared.state)
    }

    /// Whether a repeating timer is armed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        locked(&self.shared.timer).interval.is_some()
    }

    /// Run a pass now and then every `interval` after each pass finishes.
    pub fn set_update_timeout(&self, interval: Duration) {
        info!(?interval, "arming update timer");
        locked(&self.shared.timer).interval = Some(interval);
        self.shared.reschedule();
    }

    /// Cancel the timer. A pass that is already running finishes normally;
    /// no further passes run until the timer is armed again.
    pub fn disarm(&self) {
        let mut timer = locked(&self.shared.timer);
        timer.interval = None;
        timer.next_due = None;
        timer.generation += 1;
        debug!("update timer disarmed");
    }

    /// Cancel the timer and any lock wait of a running pass. No further
    /// passes run until the timer is armed again.
    pub fn deactivate(&self) {
        self.disarm();
        if let Some(cancel) = locked(&self.shared.in_flight).as_ref() {
            cancel.cancel();
        }
        info!("scheduler deactivated");
    }

    /// Run a pass on the calling thread, unless one is already running.
    pub fn run_now(&self) -> PassReport {
        self.shared.run_guarded()
    }

    pub fn add(&self, item: &CheckItem) -> bool {
        let changed = self.shared.syncer.add(item);
        if changed {
            self.shared.reschedule();
        }
        changed
    }

    pub fn remove(&self, item: &CheckItem) -> bool {
        let changed = self.shared.syncer.remove(item);
        if changed {
            self.shared.reschedule();
        }
        changed
    }

    pub fn toggle(&self, item: &CheckItem) -> bool {
        let changed = self.shared.syncer.toggle(item);
        if changed {
            self.shared.reschedule();
        }
        changed
    }

    #[must_use]
    pub fn get_local(&self) -> Vec<CheckItem> {
        self.shared.syncer.get_local()
    }

    pub fn register_change_listener<F>(&self, listener: F)
    where
        F: Fn(&[CheckItem]) + Send + Sync + 'static,
    {
        self.shared.syncer.register_change_listener(listener);
    }

    pub fn register_error_handler<F>(&self, handler: F)
    where
        F: Fn(&SyncError) + Send + Sync + 'static,
    {
        self.shared.syncer.register_error_handler(handler);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        {
            let mut timer = locked(&self.shared.timer);
            timer.shutdown = true;
            timer.next_due = None;
            self.shared.wake.notify_all();
        }
        if let Some(cancel) = locked(&self.shared.in_flight).as_ref() {
            cancel.cancel();
        }
        if let Some(driver) = self.driver.take() {
            if driver.join().is_err() {
                warn!("scheduler driver panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::lock::LockConfig;
    use crate::remote::RemoteStore;
    use crate::store::{BlobStore, MemoryBlobStore};
    use std::sync::mpsc;

    fn scheduler() -> (Arc<RemoteStore>, Scheduler) {
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let remote = Arc::new(RemoteStore::with_client_id(blobs, "me", LockConfig::default()));
        let syncer = Arc::new(Syncer::new(Arc::new(remote.list("groceries"))));
        (remote, Scheduler::new(syncer).expect("spawn driver"))
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn inert_until_armed() {
        let (remote, scheduler) = scheduler();
        assert!(!scheduler.is_active());
        scheduler.add(&CheckItem::unchecked("milk"));
        thread::sleep(Duration::from_millis(50));
        assert!(remote.download("groceries").expect("download").is_empty());
        assert_eq!(scheduler.syncer().pending().len(), 1);
    }

    #[test]
    fn arming_runs_a_pass_immediately() {
        let (remote, scheduler) = scheduler();
        scheduler.add(&CheckItem::unchecked("milk"));
        scheduler.set_update_timeout(Duration::from_secs(3600));
        assert!(wait_for(|| {
            remote.download("groceries").expect("download") == vec!["[_] milk".to_string()]
        }));
    }

    #[test]
    fn edit_on_armed_scheduler_triggers_prompt_pass() {
        let (remote, scheduler) = scheduler();
        scheduler.set_update_timeout(Duration::from_secs(3600));
        assert!(wait_for(|| scheduler.state() == PassState::Idle));
        thread::sleep(Duration::from_millis(20));

        scheduler.add(&CheckItem::unchecked("eggs"));
        assert!(wait_for(|| {
            remote.download("groceries").expect("download") == vec!["[_] eggs".to_string()]
        }));
    }

    #[test]
    fn periodic_passes_pick_up_external_changes() {
        let (remote, scheduler) = scheduler();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        scheduler.register_change_listener(move |view| {
            let _ = locked(&tx).send(view.to_vec());
        });
        scheduler.set_update_timeout(Duration::from_millis(10));

        remote
            .upload("groceries", &["[✔] bread".to_string()])
            .expect("external upload");
        let view = rx.recv_timeout(Duration::from_secs(5)).expect("change seen");
        assert_eq!(view, vec![CheckItem::new("bread", true)]);
    }

    #[test]
    fn deactivate_stops_further_passes() {
        let (remote, scheduler) = scheduler();
        scheduler.set_update_timeout(Duration::from_millis(10));
        scheduler.deactivate();
        assert!(!scheduler.is_active());
        assert!(wait_for(|| scheduler.state() == PassState::Idle));

        scheduler.add(&CheckItem::unchecked("milk"));
        thread::sleep(Duration::from_millis(60));
        assert!(remote.download("groceries").expect("download").is_empty());
    }

    fn contended() -> (Arc<RemoteStore>, Arc<RemoteStore>, Scheduler) {
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let config = LockConfig {
            retry_interval: Duration::from_millis(5),
            ..LockConfig::default()
        };
        let remote = Arc::new(RemoteStore::with_client_id(Arc::clone(&blobs), "me", config));
        let other = Arc::new(RemoteStore::with_client_id(blobs, "other", config));
        let syncer = Arc::new(Syncer::new(Arc::new(remote.list("groceries"))));
        (remote, other, Scheduler::new(syncer).expect("spawn driver"))
    }

    fn error_codes(scheduler: &Scheduler) -> mpsc::Receiver<ErrorCode> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        scheduler.register_error_handler(move |err| {
            let _ = locked(&tx).send(err.code());
        });
        rx
    }

    #[test]
    fn disarm_lets_a_waiting_pass_finish() {
        let (remote, other, scheduler) = contended();
        let errors = error_codes(&scheduler);
        let held = other
            .lock()
            .lock("groceries", &CancelToken::new())
            .expect("other client acquires");

        scheduler.add(&CheckItem::unchecked("milk"));
        scheduler.set_update_timeout(Duration::from_secs(3600));
        assert!(wait_for(|| scheduler.state() == PassState::Running));

        scheduler.disarm();
        assert!(!scheduler.is_active());
        thread::sleep(Duration::from_millis(30));
        held.release();

        assert!(wait_for(|| {
            remote.download("groceries").expect("download") == vec!["[_] milk".to_string()]
        }));
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn deactivate_interrupts_a_waiting_pass() {
        let (remote, other, scheduler) = contended();
        let errors = error_codes(&scheduler);
        let _held = other
            .lock()
            .lock("groceries", &CancelToken::new())
            .expect("other client acquires");

        scheduler.add(&CheckItem::unchecked("milk"));
        scheduler.set_update_timeout(Duration::from_secs(3600));
        assert!(wait_for(|| scheduler.state() == PassState::Running));

        scheduler.deactivate();
        assert_eq!(
            errors.recv_timeout(Duration::from_secs(5)),
            Ok(ErrorCode::LockInterrupted)
        );
        assert!(remote.download("groceries").expect("download").is_empty());
        assert_eq!(scheduler.syncer().pending().len(), 1);
    }

    #[test]
    fn run_now_reports_completion() {
        let (_, scheduler) = scheduler();
        scheduler.add(&CheckItem::unchecked("milk"));
        assert_eq!(
            scheduler.run_now(),
            PassReport::Completed {
                committed: 1,
                changed: false
            }
        );
    }
}
