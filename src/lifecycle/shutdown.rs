//! Shutdown coordination for the proxy.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// Long-running tasks subscribe once at startup; triggering fans the
/// signal out to all of them. Triggering twice is the caller's cue to
/// stop being graceful.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: AtomicBool::new(false),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal. Returns true if this was the first
    /// trigger; a repeat means an impatient operator.
    pub fn trigger(&self) -> bool {
        let first = !self.triggered.swap(true, Ordering::SeqCst);
        let _ = self.tx.send(());
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Tasks still holding a live receiver.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_observe_trigger() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();

        assert!(shutdown.trigger());
        rx.recv().await.unwrap();
    }

    #[test]
    fn second_trigger_reports_repeat() {
        let shutdown = Shutdown::new();
        assert!(shutdown.trigger());
        assert!(!shutdown.trigger());
        assert!(shutdown.is_triggered());
    }
}
