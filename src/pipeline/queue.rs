//! Bounded accumulating queue.
//!
//! Hands feed items from the producing thread to one sink's writer thread.
//! Capacity is the sink's throttle size: once that many items are buffered,
//! [`QueueProducer::enqueue`] blocks until the writer takes one, so the feed
//! can never run arbitrarily far ahead of the database.
//!
//! Built on a bounded `tokio::sync::mpsc` channel used from plain threads
//! (`blocking_send` / `blocking_recv`). Neither side may be driven from
//! inside an async task; run them on dedicated or `spawn_blocking` threads.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Error type for queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue consumer stopped before the queue was drained")]
    ConsumerGone,

    #[error("queue producer has already been joined")]
    Joined,
}

/// Largest capacity a queue will allocate; larger throttle sizes are clamped.
pub const MAX_CAPACITY: usize = 1 << 20;

struct Slot<T> {
    item: T,
    boundary: bool,
}

/// Create a queue holding at most `throttle_size` unconsumed items, capped at
/// [`MAX_CAPACITY`].
pub fn accumulating_queue<T>(throttle_size: NonZeroUsize) -> (QueueProducer<T>, QueueConsumer<T>) {
    let (sender, receiver) = mpsc::channel(throttle_size.get().min(MAX_CAPACITY));
    let (drained_tx, drained_rx) = oneshot::channel();
    let pending_boundaries = Arc::new(AtomicUsize::new(0));

    (
        QueueProducer {
            sender: Some(sender),
            drained: Some(drained_rx),
            pending_boundaries: Arc::clone(&pending_boundaries),
            enqueued: 0,
        },
        QueueConsumer {
            receiver,
            drained: Some(drained_tx),
            pending_boundaries,
        },
    )
}

/// Producer half, owned by the thread reading the feed.
pub struct QueueProducer<T> {
    sender: Option<mpsc::Sender<Slot<T>>>,
    drained: Option<oneshot::Receiver<()>>,
    pending_boundaries: Arc<AtomicUsize>,
    enqueued: u64,
}

impl<T> QueueProducer<T> {
    /// Append `item`, blocking while the queue is at capacity.
    ///
    /// `is_boundary` marks items that end a batch. Boundary items are queued
    /// exactly like any other item: never skipped, never reordered.
    ///
    /// # Errors
    ///
    /// [`QueueError::ConsumerGone`] if the consumer stopped (the item is
    /// dropped), [`QueueError::Joined`] after [`join`](Self::join).
    pub fn enqueue(&mut self, item: T, is_boundary: impl Fn(&T) -> bool) -> Result<(), QueueError> {
        let sender = self.sender.as_ref().ok_or(QueueError::Joined)?;
        let boundary = is_boundary(&item);
        if boundary {
            self.pending_boundaries.fetch_add(1, Ordering::SeqCst);
        }

        if sender.blocking_send(Slot { item, boundary }).is_err() {
            if boundary {
                self.pending_boundaries.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(QueueError::ConsumerGone);
        }
        self.enqueued += 1;
        Ok(())
    }

    /// Close the producer side and wait until the consumer has seen the end
    /// of the sequence. Calling it again returns immediately.
    ///
    /// # Errors
    ///
    /// [`QueueError::ConsumerGone`] if the consumer was dropped before
    /// draining the queue (for example because its thread failed).
    pub fn join(&mut self) -> Result<(), QueueError> {
        self.sender = None;
        match self.drained.take() {
            Some(drained) => drained.blocking_recv().map_err(|_| QueueError::ConsumerGone),
            None => Ok(()),
        }
    }

    /// Boundary items enqueued but not yet taken by the consumer.
    pub fn pending_boundaries(&self) -> usize {
        self.pending_boundaries.load(Ordering::SeqCst)
    }

    /// Items currently buffered; never exceeds [`capacity`](Self::capacity).
    pub fn buffered(&self) -> usize {
        self.sender
            .as_ref()
            .map_or(0, |s| s.max_capacity() - s.capacity())
    }

    /// Configured capacity, or 0 once joined.
    pub fn capacity(&self) -> usize {
        self.sender.as_ref().map_or(0, mpsc::Sender::max_capacity)
    }

    /// Total items accepted so far.
    pub fn enqueued(&self) -> u64 {
        self.enqueued
    }
}

/// Consumer half, owned by the sink's writer thread.
///
/// Iteration yields items in FIFO order, blocks while the queue is empty and
/// ends only once the producer has been joined or dropped.
pub struct QueueConsumer<T> {
    receiver: mpsc::Receiver<Slot<T>>,
    drained: Option<oneshot::Sender<()>>,
    pending_boundaries: Arc<AtomicUsize>,
}

impl<T> Iterator for QueueConsumer<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.receiver.blocking_recv() {
            Some(slot) => {
                if slot.boundary {
                    self.pending_boundaries.fetch_sub(1, Ordering::SeqCst);
                }
                Some(slot.item)
            }
            None => {
                if let Some(drained) = self.drained.take() {
                    let _ = drained.send(());
                }
                None
            }
        }
    }
}
