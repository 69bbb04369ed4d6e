// Lossless fan-out for low-rate event streams such as connection state.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

/// Delivers every published value, in order, to every live subscriber.
///
/// Each subscriber owns an unbounded queue, so publishing never blocks and
/// nothing is dropped. Only use this for streams whose rate is bounded by the
/// producer (state transitions, not data ticks).
#[derive(Debug)]
pub struct Broadcaster<T> {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<T>>>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Broadcaster {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T> Default for Broadcaster<T> {
    fn default() -> Self {
        Broadcaster {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Broadcaster<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. It sees values published after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Send `value` to every subscriber, pruning ones whose receiver is gone.
    pub fn publish(&self, value: T) {
        self.lock().retain(|tx| tx.send(value.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subs = self.lock();
        subs.retain(|tx| !tx.is_closed());
        subs.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<T>>> {
        // The vector stays consistent even if a holder panicked.
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
