//! Wall-clock gate and countdown.
//!
//! The open-date check reads time through [`Clock`] so the gate can be
//! driven deterministically in tests. [`Countdown`] re-evaluates the gate on
//! a fixed tick and publishes the remaining time; dropping it cancels the
//! timer task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Text shown once the open date has been reached.
pub const READY_TEXT: &str = "Ready to open!";

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|guard| *guard).unwrap_or_else(|e| *e.into_inner())
    }
}

/// Time left until `open_date`, zero once it has passed.
pub fn remaining(open_date: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (open_date - now).to_std().unwrap_or(Duration::ZERO)
}

/// Human-readable remaining time: the two largest non-zero units.
pub fn format_remaining(left: Duration) -> String {
    let secs = left.as_secs();
    if secs == 0 {
        return READY_TEXT.to_string();
    }

    let units = [
        (secs / 86_400, "day"),
        ((secs % 86_400) / 3_600, "hour"),
        ((secs % 3_600) / 60, "minute"),
        (secs % 60, "second"),
    ];
    units
        .iter()
        .filter(|(n, _)| *n > 0)
        .take(2)
        .map(|(n, unit)| format!("{n} {unit}{}", if *n == 1 { "" } else { "s" }))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A running countdown to an open date.
///
/// The timer task stops on its own once the date is reached, and is aborted
/// when the countdown is dropped.
#[derive(Debug)]
pub struct Countdown {
    rx: watch::Receiver<Duration>,
    handle: JoinHandle<()>,
}

impl Countdown {
    /// Start ticking every `tick`. Must be called inside a tokio runtime.
    pub fn start(open_date: DateTime<Utc>, clock: Arc<dyn Clock>, tick: Duration) -> Self {
        let (tx, rx) = watch::channel(remaining(open_date, clock.now()));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                let left = remaining(open_date, clock.now());
                if tx.send(left).is_err() || left.is_zero() {
                    break;
                }
            }
        });
        Self { rx, handle }
    }

    /// The most recently published remaining time.
    pub fn remaining(&self) -> Duration {
        *self.rx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Display text for the current remaining time.
    pub fn text(&self) -> String {
        format_remaining(self.remaining())
    }

    /// Wait for the next published value. Returns `false` once the
    /// countdown has finished and nothing more will be published.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
