use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Shared flag checked between harvest rounds and between items.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Token that trips itself once `limit` has elapsed. `None` never trips.
    pub fn with_deadline(limit: Option<Duration>) -> Self {
        let token = Self::new();
        if let Some(limit) = limit {
            let watcher = token.clone();
            let started = Instant::now();
            thread::spawn(move || {
                while started.elapsed() < limit {
                    if watcher.is_cancelled() {
                        return;
                    }
                    thread::sleep(Duration::from_millis(200).min(limit));
                }
                watcher.cancel();
            });
        }
        token
    }

    /// Sleeps up to `duration`, waking early when cancelled.
    /// Returns `false` if the token was cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(250)));
        }
    }
}
