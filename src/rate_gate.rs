//! Concurrency and rate-limit gating for outgoing API calls.
//!
//! Two independent constraints are combined here: a fixed concurrency
//! ceiling (`Semaphore`) and a shared cooldown deadline that every
//! caller waits out before taking a permit. The cooldown is set once by
//! whichever task first observes a rate-limit signal from the backend;
//! everyone else just waits for it to pass. The concurrency permit is
//! acquired *after* the cooldown clears, not before, so a rate-limited
//! burst doesn't also starve the pool of slots while it sleeps.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::warn;

/// The fixed cooldown applied whenever the backend reports it is rate
/// limiting us. The backend's signal is a boolean header, not a
/// retry-after duration, so this is a constant rather than parsed.
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(1);

struct Inner {
    semaphore: Arc<Semaphore>,
    deadline: Mutex<Option<Instant>>,
}

/// Gates concurrent access to the backend: bounds how many requests are
/// in flight and enforces a shared cooldown after a rate-limit signal.
#[derive(Clone)]
pub struct RateGate {
    inner: Arc<Inner>,
}

/// An acquired concurrency slot. Dropping it releases the slot back to
/// the gate.
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl RateGate {
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(max_concurrency)),
                deadline: Mutex::new(None),
            }),
        }
    }

    /// Waits out any active cooldown, then acquires a concurrency slot.
    /// The cooldown check happens before the semaphore is touched, so a
    /// rate-limited caller never holds a slot hostage while sleeping.
    pub async fn acquire(&self) -> Permit {
        loop {
            let wait = {
                let deadline = self.inner.deadline.lock().await;
                deadline.and_then(|d| d.checked_duration_since(Instant::now()))
            };
            match wait {
                Some(remaining) => tokio::time::sleep(remaining).await,
                None => break,
            }
        }
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate gate semaphore never closed");
        Permit { _permit: permit }
    }

    /// Records a rate-limit signal. Every waiter (current and future,
    /// until the cooldown passes) is held for [`RATE_LIMIT_COOLDOWN`]
    /// from now. Overlapping signals don't stack: the later deadline
    /// simply wins if it is later than one already in effect.
    pub async fn report_rate_limited(&self) {
        let new_deadline = Instant::now() + RATE_LIMIT_COOLDOWN;
        let mut deadline = self.inner.deadline.lock().await;
        if deadline.is_none_or(|d| new_deadline > d) {
            warn!("rate limited by backend, pausing new requests");
            *deadline = Some(new_deadline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_bounds_concurrency() {
        let gate = RateGate::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let gate = gate.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn report_rate_limited_delays_subsequent_acquires() {
        let gate = RateGate::new(4);
        gate.report_rate_limited().await;
        let start = Instant::now();
        let _permit = gate.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
