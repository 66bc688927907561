// src/detection/queue.rs
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::detection::IngestError;

#[derive(Debug, Default)]
struct QueueStats {
    closed: AtomicBool,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

/// Producer side of a bounded queue. Cheap to clone and safe to share between threads.
///
/// `push` never blocks: a full or closed queue drops the new item and counts it.
#[derive(Debug)]
pub struct QueueProducer<T> {
    tx: Sender<T>,
    stats: Arc<QueueStats>,
}

impl<T> Clone for QueueProducer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

/// Single consumer side, owned by a worker thread.
#[derive(Debug)]
pub struct QueueConsumer<T> {
    rx: Receiver<T>,
    stats: Arc<QueueStats>,
}

/// Outcome of one timed wait on the consumer side.
#[derive(Debug, PartialEq)]
pub enum Poll<T> {
    Item(T),
    Empty,
    Closed,
}

pub fn bounded<T>(capacity: usize) -> (QueueProducer<T>, QueueConsumer<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let stats = Arc::new(QueueStats::default());
    (
        QueueProducer {
            tx,
            stats: Arc::clone(&stats),
        },
        QueueConsumer { rx, stats },
    )
}

impl<T> QueueProducer<T> {
    pub fn push(&self, item: T) -> Result<(), IngestError> {
        if self.stats.closed.load(Ordering::Acquire) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(IngestError::NotRunning);
        }
        match self.tx.try_send(item) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(IngestError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(IngestError::NotRunning)
            }
        }
    }

    /// Marks the queue closed; every later `push` from any clone is dropped.
    pub fn close(&self) {
        self.stats.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.stats.closed.load(Ordering::Acquire)
    }

    pub fn accepted(&self) -> u64 {
        self.stats.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }
}

impl<T> QueueConsumer<T> {
    pub fn pop_timeout(&self, timeout: Duration) -> Poll<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Poll::Item(item),
            Err(RecvTimeoutError::Timeout) => {
                if self.stats.closed.load(Ordering::Acquire) && self.rx.is_empty() {
                    Poll::Closed
                } else {
                    Poll::Empty
                }
            }
            Err(RecvTimeoutError::Disconnected) => Poll::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn full_queue_drops_new_items() {
        let (producer, consumer) = bounded::<u32>(2);
        assert!(producer.push(1).is_ok());
        assert!(producer.push(2).is_ok());
        assert_eq!(producer.push(3), Err(IngestError::QueueFull));
        assert_eq!(producer.dropped(), 1);
        assert_eq!(producer.accepted(), 2);
        assert_eq!(consumer.pop_timeout(Duration::from_millis(10)), Poll::Item(1));
        assert_eq!(consumer.pop_timeout(Duration::from_millis(10)), Poll::Item(2));
        assert_eq!(consumer.pop_timeout(Duration::from_millis(10)), Poll::Empty);
    }

    #[test]
    fn closed_queue_rejects_every_clone() {
        let (producer, consumer) = bounded::<u32>(4);
        let other = producer.clone();
        producer.close();
        assert_eq!(other.push(7), Err(IngestError::NotRunning));
        assert!(other.is_closed());
        assert_eq!(consumer.pop_timeout(Duration::from_millis(5)), Poll::Closed);
    }

    #[test]
    fn many_producers_one_consumer() {
        let (producer, consumer) = bounded::<usize>(1000);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let p = producer.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        p.push(t * 100 + i).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut seen = 0;
        while let Poll::Item(_) = consumer.pop_timeout(Duration::from_millis(5)) {
            seen += 1;
        }
        assert_eq!(seen, 400);
    }
}
