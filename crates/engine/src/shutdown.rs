use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Create a linked trigger/token pair. Cloning the token is cheap; every
/// clone observes the same trigger.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Owned by the orchestration layer. Firing it stops every symbol loop
/// holding a linked [`Shutdown`] at its next suspension point.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Cancellation token passed through every timed wait of a symbol loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` unless shutdown fires first.
    /// Returns `true` when the full duration elapsed.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        self.sleep_until(Instant::now() + duration).await
    }

    /// Sleep until `deadline` unless shutdown fires first.
    /// Returns `true` when the deadline was reached.
    pub async fn sleep_until(&mut self, deadline: Instant) -> bool {
        loop {
            if self.is_triggered() {
                return false;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return !self.is_triggered(),
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        // Trigger dropped: nothing can cancel us any more.
                        tokio::time::sleep_until(deadline).await;
                        return true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_trigger() {
        let (_trigger, mut token) = channel();
        assert!(token.sleep(Duration::from_secs(60)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_interrupts_sleep() {
        let (trigger, mut token) = channel();
        let sleeper = tokio::spawn(async move { token.sleep(Duration::from_secs(3600)).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.trigger();

        assert!(!sleeper.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trigger_never_cancels() {
        let (trigger, mut token) = channel();
        drop(trigger);
        assert!(token.sleep(Duration::from_secs(5)).await);
        assert!(!token.is_triggered());
    }

    #[tokio::test]
    async fn tokens_minted_after_trigger_see_it() {
        let (trigger, _token) = channel();
        trigger.trigger();
        let mut late = trigger.token();
        assert!(late.is_triggered());
        assert!(!late.sleep(Duration::from_secs(1)).await);
    }
}
