//! Process-wide sampling cadence signal.
//!
//! A `Ticker` is a monotonically increasing counter advanced on a fixed
//! period by a timer thread. Collectors never read its absolute value,
//! only whether it changed since their last observation, so wraparound
//! is harmless and relaxed atomics are sufficient.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often the timer thread re-checks its cancellation flag while
/// waiting for the next deadline.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Error type for timer installation failures.
#[derive(Debug)]
pub enum TickerError {
    /// The configured interval is zero.
    BadInterval,
    /// A timer is already armed; it must be cancelled before a new one
    /// is installed.
    AlreadyArmed,
    /// The timer thread could not be spawned.
    Spawn(std::io::Error),
}

impl std::fmt::Display for TickerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickerError::BadInterval => write!(f, "ticker interval must be greater than zero"),
            TickerError::AlreadyArmed => {
                write!(f, "a periodic timer is already armed for this ticker")
            }
            TickerError::Spawn(e) => write!(f, "could not start periodic timer: {}", e),
        }
    }
}

impl std::error::Error for TickerError {}

/// Wait-free cadence counter shared between the timer and all
/// collectors.
#[derive(Debug, Default)]
pub struct Ticker {
    tick: AtomicU64,
    armed: AtomicBool,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the tick by one. Called only by the timer; a single
    /// relaxed increment, never blocks, never allocates.
    pub fn advance(&self) {
        self.tick.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current tick value. Callable from any thread.
    pub fn current(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Installs a recurring timer that advances this ticker every
    /// `interval`.
    ///
    /// Only one timer may be armed at a time; cancel the previous
    /// handle before installing a new interval. Installation failure
    /// leaves the ticker unarmed so the metrics subsystem can stay
    /// disabled without affecting the host process.
    pub fn start_timer(self: &Arc<Self>, interval: Duration) -> Result<TimerHandle, TickerError> {
        if interval.is_zero() {
            return Err(TickerError::BadInterval);
        }
        if self.armed.swap(true, Ordering::SeqCst) {
            return Err(TickerError::AlreadyArmed);
        }

        let ticker = Arc::clone(self);
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = Arc::clone(&cancel);

        let thread = thread::Builder::new()
            .name("pulsemon-ticker".to_string())
            .spawn(move || {
                let mut deadline = Instant::now() + interval;
                while !cancel_flag.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    if now >= deadline {
                        ticker.advance();
                        // Schedule from the previous deadline so ticks
                        // do not drift under scheduling jitter.
                        deadline += interval;
                        if deadline <= now {
                            deadline = now + interval;
                        }
                        continue;
                    }
                    thread::sleep((deadline - now).min(CANCEL_POLL));
                }
            })
            .map_err(|e| {
                self.armed.store(false, Ordering::SeqCst);
                TickerError::Spawn(e)
            })?;

        Ok(TimerHandle {
            ticker: Arc::clone(self),
            cancel,
            thread: Some(thread),
        })
    }
}

/// Handle to an armed timer. Cancelling (or dropping) stops the timer
/// thread and disarms the ticker so a new interval can be installed.
#[derive(Debug)]
pub struct TimerHandle {
    ticker: Arc<Ticker>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn cancel(mut self) {
        self.cancel_inner();
    }

    fn cancel_inner(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.cancel.store(true, Ordering::SeqCst);
            let _ = thread.join();
            self.ticker.armed.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_increments_current() {
        let ticker = Ticker::new();
        assert_eq!(ticker.current(), 0);
        ticker.advance();
        ticker.advance();
        assert_eq!(ticker.current(), 2);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let ticker = Arc::new(Ticker::new());
        let err = ticker.start_timer(Duration::ZERO).unwrap_err();
        assert!(matches!(err, TickerError::BadInterval));
        // A rejected install must not leave the ticker armed.
        let handle = ticker.start_timer(Duration::from_secs(60)).unwrap();
        handle.cancel();
    }

    #[test]
    fn double_install_is_rejected_until_cancel() {
        let ticker = Arc::new(Ticker::new());
        let handle = ticker.start_timer(Duration::from_secs(60)).unwrap();

        let err = ticker.start_timer(Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, TickerError::AlreadyArmed));

        handle.cancel();
        let handle = ticker.start_timer(Duration::from_secs(60)).unwrap();
        handle.cancel();
    }

    #[test]
    fn timer_advances_ticker() {
        let ticker = Arc::new(Ticker::new());
        let handle = ticker.start_timer(Duration::from_millis(10)).unwrap();

        // Generous deadline: we only need to observe a change.
        let deadline = Instant::now() + Duration::from_secs(5);
        while ticker.current() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.cancel();
        assert!(ticker.current() > 0);
    }
}
