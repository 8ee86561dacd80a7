/// Interval scheduling of tracking cycles.
///
/// One worker thread per location. Each worker runs a cycle immediately,
/// then once per interval. Ticks that fall due while a cycle is still
/// running are skipped, not queued, so cycles for one location never
/// overlap. Locations are independent of each other.
///
/// `shutdown` cancels every location (in-flight fetches finish, but their
/// results are discarded) and joins the workers.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::poller::CancelToken;
use crate::tracker::{LocationTracker, ViewHandle};

enum Command {
    RunNow,
    Stop,
}

struct Worker {
    location_key: String,
    tracker: Arc<Mutex<LocationTracker>>,
    view: ViewHandle,
    cancel: CancelToken,
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

pub struct Scheduler {
    workers: Vec<Worker>,
}

impl Scheduler {
    /// Starts one worker per tracker.
    pub fn start(trackers: Vec<LocationTracker>, interval: Duration) -> io::Result<Self> {
        let mut workers = Vec::with_capacity(trackers.len());
        for tracker in trackers {
            let location_key = tracker.location_key().to_string();
            let view = tracker.view_handle();
            let cancel = tracker.cancel_token();
            let tracker = Arc::new(Mutex::new(tracker));
            let (commands, inbox) = mpsc::channel();

            let worker_tracker = Arc::clone(&tracker);
            let worker_key = location_key.clone();
            let thread = thread::Builder::new()
                .name(format!("polmon-{}", location_key))
                .spawn(move || run_worker(&worker_key, &worker_tracker, &inbox, interval))?;

            tracing::info!(
                location = %location_key,
                interval_secs = interval.as_secs(),
                "scheduled location"
            );
            workers.push(Worker {
                location_key,
                tracker,
                view,
                cancel,
                commands,
                thread: Some(thread),
            });
        }
        Ok(Self { workers })
    }

    pub fn location_keys(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(|w| w.location_key.as_str())
    }

    pub fn views(&self) -> Vec<ViewHandle> {
        self.workers.iter().map(|w| w.view.clone()).collect()
    }

    pub fn view(&self, location_key: &str) -> Option<ViewHandle> {
        self.worker(location_key).map(|w| w.view.clone())
    }

    /// Asks a location's worker to run a cycle now. Returns false for an
    /// unknown location or a stopped worker.
    pub fn trigger(&self, location_key: &str) -> bool {
        self.worker(location_key)
            .is_some_and(|w| w.commands.send(Command::RunNow).is_ok())
    }

    /// Host purge of an id. Waits for a running cycle to finish.
    pub fn forget(&self, location_key: &str, id: &str) -> bool {
        self.worker(location_key).is_some_and(|w| {
            let mut tracker = w.tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            tracker.forget(id)
        })
    }

    /// Cancels all locations and joins their workers.
    pub fn shutdown(mut self) {
        for worker in &self.workers {
            worker.cancel.cancel();
            // A worker that already exited has dropped its receiver.
            let _ = worker.commands.send(Command::Stop);
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    tracing::warn!(location = %worker.location_key, "worker panicked");
                }
            }
        }
        tracing::info!(locations = self.workers.len(), "scheduler stopped");
    }

    fn worker(&self, location_key: &str) -> Option<&Worker> {
        self.workers.iter().find(|w| w.location_key == location_key)
    }
}

fn run_worker(
    location_key: &str,
    tracker: &Mutex<LocationTracker>,
    inbox: &mpsc::Receiver<Command>,
    interval: Duration,
) {
    let mut next_tick = Instant::now();
    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match inbox.recv_timeout(wait) {
            Ok(Command::RunNow) => run_tick(location_key, tracker),
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                run_tick(location_key, tracker);
                next_tick += interval;
                let now = Instant::now();
                let mut skipped = 0u32;
                while next_tick <= now {
                    next_tick += interval;
                    skipped += 1;
                }
                if skipped > 0 {
                    tracing::warn!(
                        location = %location_key,
                        skipped,
                        "cycle overran its interval, skipping ticks"
                    );
                }
            }
        }
    }
    tracing::debug!(location = %location_key, "worker exiting");
}

fn run_tick(location_key: &str, tracker: &Mutex<LocationTracker>) {
    let mut guard = match tracker.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::WouldBlock) => {
            tracing::debug!(location = %location_key, "tracker busy, skipping tick");
            return;
        }
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
    };
    if guard.cancel_token().is_cancelled() {
        return;
    }
    guard.run_cycle(Utc::now());
}
