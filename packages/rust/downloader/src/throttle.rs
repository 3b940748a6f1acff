//! Minimum spacing between request starts, shared by all workers.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait for this caller's slot. Slots are handed out in call order.
    pub async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }
        let start = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let start = next.map_or(now, |slot| slot.max(now));
            *next = Some(start + self.interval);
            start
        };
        tokio::time::sleep_until(start).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn spaces_concurrent_callers() {
        let throttle = Arc::new(Throttle::new(Duration::from_millis(30)));
        let begin = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let throttle = throttle.clone();
                tokio::spawn(async move {
                    throttle.wait().await;
                    Instant::now()
                })
            })
            .collect();

        let mut starts = Vec::new();
        for h in handles {
            starts.push(h.await.unwrap() - begin);
        }
        starts.sort();
        assert!(starts[1] >= Duration::from_millis(30));
        assert!(starts[2] >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn zero_interval_never_waits() {
        let throttle = Throttle::new(Duration::ZERO);
        let begin = Instant::now();
        for _ in 0..10 {
            throttle.wait().await;
        }
        assert!(begin.elapsed() < Duration::from_millis(50));
    }
}
