//! Outward event fan-out
//!
//! Both the relay engine and the hazard classifier publish immutable
//! event records. Consumers either drain the internal queue (the pattern
//! the CLI uses per tick) or hold an mpsc receiver obtained from
//! [`EventBus::subscribe`]. Subscribers are read-only; a dropped receiver
//! is detected on the next publish and pruned.

use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};
use tracing::warn;

/// Drain queue plus subscriber channels for one event stream.
#[derive(Debug)]
pub struct EventBus<T: Clone> {
    queue: VecDeque<T>,
    subscribers: Vec<Sender<T>>,
    /// Bound on the drain queue; oldest events fall off first
    capacity: usize,
    /// Undrained events evicted by overflow; never silent
    dropped: u64,
}

impl<T: Clone> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            subscribers: Vec::new(),
            capacity,
            dropped: 0,
        }
    }

    /// Publish one event to the queue and every live subscriber.
    ///
    /// A full queue evicts its oldest undrained event; the eviction is
    /// counted and logged so a stalled consumer is visible.
    pub fn publish(&mut self, event: T) {
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
            warn!(
                dropped = self.dropped,
                capacity = self.capacity,
                "event queue full, evicting oldest undrained event"
            );
        }
        self.queue.push_back(event);
    }

    /// Take every queued event.
    pub fn drain(&mut self) -> Vec<T> {
        self.queue.drain(..).collect()
    }

    /// Register a new read-only consumer.
    pub fn subscribe(&mut self) -> Receiver<T> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Lifetime count of events evicted by queue overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(256)
    }
}
