//! Bounded, sentinel-terminated channel between blocking workers and async tasks.
//!
//! A [`bridge`] pairs a [`BridgeSender`] and a [`BridgeReceiver`] over a
//! bounded `crossbeam-channel`. Both ends offer a blocking operation for use
//! on worker threads and an `_async` operation for use on the runtime. An
//! async pop parks on a [`Notify`] that every delivery (and every dropped
//! sender) signals, so an idle consumer holds no blocking-pool thread. An
//! async push only hops onto the blocking pool when the queue is full.
//!
//! End of stream is signalled in-band with a single sentinel. The sentinel is
//! sent at most once no matter how many clones of the sender call
//! [`BridgeSender::close`], and a receiver treats a disconnected channel the
//! same as a received sentinel, so a producer that dies without closing still
//! terminates its consumer.

use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

enum Slot<T> {
    Item(T),
    Sentinel,
}

/// Outcome of a single pop.
#[derive(Debug, PartialEq, Eq)]
pub enum Popped<T> {
    /// The next item in FIFO order.
    Item(T),
    /// Nothing arrived within the timeout; the stream is still open.
    TimedOut,
    /// The sentinel was received or every sender is gone.
    Closed,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue has already been closed")]
    Closed,
    #[error("queue consumer has gone away")]
    Disconnected,
    #[error("queue stayed full for {0:?}")]
    Full(Duration),
}

/// Creates a bridging queue holding at most `capacity` items.
///
/// Producers wait at most `push_timeout` for space before failing with
/// [`QueueError::Full`].
pub fn bridge<T>(capacity: usize, push_timeout: Duration) -> (BridgeSender<T>, BridgeReceiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let ready = Arc::new(Notify::new());
    let sender = BridgeSender {
        tx,
        closed: Arc::new(AtomicBool::new(false)),
        push_timeout,
        ready: Wakeup(Arc::clone(&ready)),
    };
    let receiver = BridgeReceiver {
        rx,
        finished: Arc::new(AtomicBool::new(false)),
        ready,
    };
    (sender, receiver)
}

/// Wakes the consumer. Also fires on drop, after the owning sender's channel
/// handle is gone, so a waiting consumer sees the disconnect.
struct Wakeup(Arc<Notify>);

impl Wakeup {
    fn wake(&self) {
        self.0.notify_one();
    }
}

impl Drop for Wakeup {
    fn drop(&mut self) {
        self.wake();
    }
}

/// Producer half of a bridging queue.
pub struct BridgeSender<T> {
    tx: Sender<Slot<T>>,
    closed: Arc<AtomicBool>,
    push_timeout: Duration,
    // Declared after `tx` so it drops after it.
    ready: Wakeup,
}

impl<T> Clone for BridgeSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closed: Arc::clone(&self.closed),
            push_timeout: self.push_timeout,
            ready: Wakeup(Arc::clone(&self.ready.0)),
        }
    }
}

impl<T> BridgeSender<T> {
    /// Returns `true` once any clone of this sender has sent the sentinel.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Enqueues `item`, blocking the calling thread for at most the push timeout.
    pub fn push(&self, item: T) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        send_blocking(&self.tx, Slot::Item(item), self.push_timeout)?;
        self.ready.wake();
        Ok(())
    }

    /// Sends the sentinel. Returns `true` if this call sent it, `false` if the
    /// queue was already closed or the consumer is gone.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        match send_blocking(&self.tx, Slot::Sentinel, self.push_timeout) {
            Ok(()) => {
                self.ready.wake();
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "sentinel not delivered");
                false
            }
        }
    }
}

impl<T: Send + 'static> BridgeSender<T> {
    /// Enqueues `item` without blocking the async runtime.
    pub async fn push_async(&self, item: T) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.send_async(Slot::Item(item)).await
    }

    /// Async counterpart of [`close`](Self::close).
    pub async fn close_async(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        match self.send_async(Slot::Sentinel).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "sentinel not delivered");
                false
            }
        }
    }

    async fn send_async(&self, slot: Slot<T>) -> Result<(), QueueError> {
        match self.tx.try_send(slot) {
            Ok(()) => {}
            Err(TrySendError::Disconnected(_)) => return Err(QueueError::Disconnected),
            Err(TrySendError::Full(slot)) => {
                let tx = self.tx.clone();
                let timeout = self.push_timeout;
                tokio::task::spawn_blocking(move || send_blocking(&tx, slot, timeout))
                    .await
                    .unwrap_or(Err(QueueError::Disconnected))?;
            }
        }
        self.ready.wake();
        Ok(())
    }
}

fn send_blocking<T>(tx: &Sender<Slot<T>>, slot: Slot<T>, timeout: Duration) -> Result<(), QueueError> {
    tx.send_timeout(slot, timeout).map_err(|e| match e {
        SendTimeoutError::Timeout(_) => QueueError::Full(timeout),
        SendTimeoutError::Disconnected(_) => QueueError::Disconnected,
    })
}

/// Consumer half of a bridging queue.
///
/// Once the sentinel has been seen every later pop returns [`Popped::Closed`],
/// so a consumer never observes two distinct terminal events.
pub struct BridgeReceiver<T> {
    rx: Receiver<Slot<T>>,
    finished: Arc<AtomicBool>,
    ready: Arc<Notify>,
}

impl<T> BridgeReceiver<T> {
    /// Blocks the calling thread for up to `timeout` waiting for the next item.
    pub fn pop(&self, timeout: Duration) -> Popped<T> {
        if self.finished.load(Ordering::SeqCst) {
            return Popped::Closed;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(slot) => self.accept(slot),
            Err(RecvTimeoutError::Timeout) => Popped::TimedOut,
            Err(RecvTimeoutError::Disconnected) => self.finish(),
        }
    }

    /// Returns `true` once the sentinel (or a disconnect) has been observed.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn accept(&self, slot: Slot<T>) -> Popped<T> {
        match slot {
            Slot::Item(item) => Popped::Item(item),
            Slot::Sentinel => self.finish(),
        }
    }

    fn finish(&self) -> Popped<T> {
        self.finished.store(true, Ordering::SeqCst);
        Popped::Closed
    }

    /// Waits up to `timeout` for the next item without blocking the async runtime.
    ///
    /// Cancel safe: an item is only taken off the channel when it is returned.
    pub async fn pop_async(&self, timeout: Duration) -> Popped<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_finished() {
                return Popped::Closed;
            }
            match self.rx.try_recv() {
                Ok(slot) => return self.accept(slot),
                Err(TryRecvError::Disconnected) => return self.finish(),
                Err(TryRecvError::Empty) => {}
            }
            // A wakeup that raced the check above left a permit behind, so
            // this returns at once and the loop looks again.
            if tokio::time::timeout_at(deadline, self.ready.notified())
                .await
                .is_err()
            {
                return Popped::TimedOut;
            }
        }
    }
}
