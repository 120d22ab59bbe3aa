//! Sticky stop flag that a running adapter loop can await.

use tokio::sync::watch;

/// Once triggered it stays triggered; `triggered()` resolves immediately from then on.
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Returns true for the call that actually flipped the flag.
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`StopSignal::trigger`] has been called.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so wait_for cannot observe a closed channel.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_before_wait_resolves_immediately() {
        let s = StopSignal::new();
        assert!(s.trigger());
        assert!(!s.trigger());
        assert!(s.is_triggered());
        tokio::time::timeout(Duration::from_millis(100), s.triggered())
            .await
            .expect("resolved");
    }

    #[tokio::test]
    async fn waiter_wakes_on_trigger() {
        let s = std::sync::Arc::new(StopSignal::new());
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.triggered().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        s.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("woke")
            .expect("join");
    }
}
