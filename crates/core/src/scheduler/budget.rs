//! Global dispatch budget.
//!
//! Every network operation (trigger, poll, artifact fetch) holds a
//! [`DispatchPermit`] while it runs. The budget combines a concurrency cap
//! (semaphore) with an optional requests-per-minute cap (token bucket).

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Duration, Instant};

/// Token bucket: tokens refill at a constant rate and each request spends one.
pub struct TokenBucket {
    /// Max tokens (= requests per minute).
    capacity: f32,
    /// Current available tokens.
    tokens: f32,
    /// Tokens added per second.
    refill_rate: f32,
    /// Last refill time.
    last_refill: Instant,
}

impl TokenBucket {
    /// The bucket starts full, allowing a burst up to the capacity.
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute as f32;
        Self {
            capacity,
            tokens: capacity,
            refill_rate: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Spend a token, or return how long to wait until one is available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let tokens_needed = 1.0 - self.tokens;
            let wait_secs = tokens_needed / self.refill_rate;
            Err(Duration::from_secs_f32(wait_secs))
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f32();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Proof of a reserved dispatch slot. The slot is released on drop.
#[derive(Debug)]
pub struct DispatchPermit {
    _permit: OwnedSemaphorePermit,
}

/// The single arbitration point for all outbound operations.
pub struct DispatchBudget {
    semaphore: Arc<Semaphore>,
    rate: Option<Mutex<TokenBucket>>,
    max_concurrent: usize,
}

impl DispatchBudget {
    /// `max_per_minute == 0` disables the rate cap.
    pub fn new(max_concurrent: usize, max_per_minute: u32) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            rate: (max_per_minute > 0).then(|| Mutex::new(TokenBucket::new(max_per_minute))),
            max_concurrent,
        }
    }

    /// Wait for a free slot (and a rate token, when capped).
    ///
    /// Returns `None` once the budget has been closed.
    pub async fn acquire(&self) -> Option<DispatchPermit> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;

        if let Some(rate) = &self.rate {
            loop {
                let wait = rate.lock().await.try_acquire();
                match wait {
                    Ok(()) => break,
                    Err(delay) => tokio::time::sleep(delay).await,
                }
            }
        }

        Some(DispatchPermit { _permit: permit })
    }

    /// Operations currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Refuse all further acquisitions. Waiting acquirers get `None`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}
