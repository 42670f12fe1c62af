use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded};
use tracing::debug;

use crate::error::QueueError;

/// Mirrors the shape of the ruleset ingress queue: a bounded MPMC channel
/// that a producer (the TCP read path) pushes into and a worker pool drains.
///
/// Unlike the teacher's shared-memory ring (`flux_communication::queue::Queue`),
/// this queue never crosses a process boundary, so it is backed by an
/// in-memory `crossbeam_channel` instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum QueueType {
    /// Single producer draining path (one TCP server feeds one ruleset).
    Spmc,
    /// Multiple producers (several listeners bound to the same ruleset).
    Mpmc,
}

/// What happens to queued-but-undelivered messages when the queue is shut
/// down. Mirrors spec.md §4.8: a ruleset's queue is drained or abandoned
/// "per its shutdown policy".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Hand back every element still queued so the caller can account for it.
    Drain,
    /// Drop whatever remains; callers that chose this don't need the backlog.
    Abandon,
}

/// Bounded ingress queue for one ruleset.
///
/// Exposes a "light-delayable" signal (`is_congested`) consulted by the TCP
/// session's flow-control gate (spec.md §4.3): once the queue fills past
/// `resume_below`, sessions stop reading until it drains back under that
/// mark.
pub struct Queue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    queue_type: QueueType,
    capacity: usize,
    resume_below: usize,
    len: AtomicUsize,
}

impl<T> Queue<T> {
    /// Creates a bounded queue. `resume_below` is clamped to `capacity`.
    pub fn new(capacity: usize, queue_type: QueueType) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            queue_type,
            capacity,
            resume_below: capacity.saturating_mul(3) / 4,
            len: AtomicUsize::new(0),
        }
    }

    pub fn with_resume_threshold(mut self, resume_below: usize) -> Self {
        self.resume_below = resume_below.min(self.capacity);
        self
    }

    pub const fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the queue has filled past its resume threshold. Flow
    /// control gates reads on this; without flow control the queue just
    /// drops per `try_enqueue`'s own policy.
    pub fn is_congested(&self) -> bool {
        self.len() >= self.resume_below
    }

    /// Non-blocking enqueue. Returns `Err(QueueError::Full)` rather than
    /// blocking the I/O reactor thread.
    pub fn try_enqueue(&self, item: T) -> Result<(), QueueError> {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.len.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(QueueError::Full),
            Err(TrySendError::Disconnected(_)) => Err(QueueError::Closed),
        }
    }

    /// Non-blocking dequeue, used by worker threads.
    pub fn try_dequeue(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => {
                self.len.fetch_sub(1, Ordering::Relaxed);
                Some(item)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking dequeue with a timeout, used by worker threads that would
    /// otherwise spin.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => {
                self.len.fetch_sub(1, Ordering::Relaxed);
                Some(item)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drains everything currently queued, for shutdown accounting or batch
    /// assembly.
    pub fn drain_into(&self, out: &mut Vec<T>) {
        while let Some(item) = self.try_dequeue() {
            out.push(item);
        }
    }

    /// Applies the queue's shutdown policy, returning whatever was drained
    /// (empty if `Abandon`). Takes `&self`, not `self`, since callers share
    /// the queue behind an `Arc` with both the ruleset that owns it and any
    /// worker threads still converging on empty.
    pub fn shutdown(&self, policy: ShutdownPolicy) -> Vec<T> {
        match policy {
            ShutdownPolicy::Drain => {
                let mut out = Vec::with_capacity(self.len());
                self.drain_into(&mut out);
                debug!(drained = out.len(), "queue shutdown: drained");
                out
            }
            ShutdownPolicy::Abandon => {
                let abandoned = self.len();
                if abandoned > 0 {
                    debug!(abandoned, "queue shutdown: abandoned");
                }
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_dequeue_preserves_order() {
        let q = Queue::new(4, QueueType::Mpmc);
        q.try_enqueue(1).unwrap();
        q.try_enqueue(2).unwrap();
        q.try_enqueue(3).unwrap();
        assert_eq!(q.try_dequeue(), Some(1));
        assert_eq!(q.try_dequeue(), Some(2));
        assert_eq!(q.try_dequeue(), Some(3));
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn full_queue_rejects() {
        let q: Queue<u8> = Queue::new(2, QueueType::Spmc);
        q.try_enqueue(1).unwrap();
        q.try_enqueue(2).unwrap();
        assert_eq!(q.try_enqueue(3), Err(QueueError::Full));
    }

    #[test]
    fn congestion_signal_tracks_resume_threshold() {
        let q: Queue<u8> = Queue::new(4, QueueType::Mpmc).with_resume_threshold(2);
        assert!(!q.is_congested());
        q.try_enqueue(1).unwrap();
        q.try_enqueue(2).unwrap();
        assert!(q.is_congested());
        q.try_dequeue();
        q.try_dequeue();
        assert!(!q.is_congested());
    }

    #[test]
    fn drain_on_shutdown_returns_backlog() {
        let q = Queue::new(4, QueueType::Mpmc);
        q.try_enqueue("a").unwrap();
        q.try_enqueue("b").unwrap();
        let drained = q.shutdown(ShutdownPolicy::Drain);
        assert_eq!(drained, vec!["a", "b"]);
    }

    #[test]
    fn abandon_on_shutdown_drops_backlog() {
        let q = Queue::new(4, QueueType::Mpmc);
        q.try_enqueue("a").unwrap();
        let drained = q.shutdown(ShutdownPolicy::Abandon);
        assert!(drained.is_empty());
    }
}
