use std::sync::Arc;

use tokio::sync::Notify;

/// Coalescing wake-up for a background worker.
///
/// Any number of [`notify`](Self::notify) calls made while nobody is waiting
/// collapse into one pending wake-up. Cloning shares the same slot.
#[derive(Debug, Clone, Default)]
pub struct ChangeSignal {
    inner: Arc<Notify>,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change. Never blocks.
    pub fn notify(&self) {
        self.inner.notify_one();
    }

    /// Wait until a change is pending, consuming it.
    pub async fn changed(&self) {
        self.inner.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use tokio::time::timeout;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn pending_notification_is_consumed_once() {
        let signal = ChangeSignal::new();
        for _ in 0..5 {
            signal.notify();
        }
        assert!(timeout(SHORT, signal.changed()).await.is_ok());
        assert!(timeout(SHORT, signal.changed()).await.is_err());
    }

    #[tokio::test]
    async fn wakes_a_waiter() {
        let signal = ChangeSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.changed().await })
        };
        tokio::task::yield_now().await;
        signal.notify();
        assert!(timeout(Duration::from_secs(1), waiter).await.is_ok());
    }

    #[tokio::test]
    async fn nothing_pending_by_default() {
        let signal = ChangeSignal::new();
        assert!(timeout(SHORT, signal.changed()).await.is_err());
    }
}
