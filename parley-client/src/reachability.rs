//! Reachability signal.
//!
//! The host application feeds connectivity changes into a [`Reachability`];
//! the coordinator subscribes and reacts to every transition.

use std::sync::Arc;

use tokio::sync::watch;

/// Publishes whether the remote side is reachable.
#[derive(Debug, Clone)]
pub struct Reachability {
    tx: Arc<watch::Sender<bool>>,
}

impl Reachability {
    /// Create a signal with an initial value.
    pub fn new(reachable: bool) -> Self {
        let (tx, _) = watch::channel(reachable);
        Self { tx: Arc::new(tx) }
    }

    /// Publish a new value. Repeating the current value is not a transition.
    pub fn set(&self, reachable: bool) {
        self.tx.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
    }

    /// Current value.
    pub fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver for the coordinator.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Reachability {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_transitions_only() {
        let reachability = Reachability::new(true);
        let mut rx = reachability.subscribe();

        reachability.set(true);
        assert!(!rx.has_changed().unwrap());

        reachability.set(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
        assert!(!reachability.is_reachable());
    }
}
