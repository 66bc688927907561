// src/detection/worker.rs
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use log::{debug, error, warn};

use crate::detection::queue::{Poll, QueueConsumer, QueueProducer};
use crate::detection::DetectionError;

/// How long `stop` waits for a worker before detaching it.
pub const STOP_TIMEOUT: Duration = Duration::from_millis(500);

/// Per-item logic run by a [`Worker`]. Owned exclusively by the worker thread.
pub trait QueueHandler<T>: Send + 'static {
    fn handle(&mut self, item: T) -> Result<(), DetectionError>;

    /// Called with every error or panic raised by `handle`. The worker keeps running afterwards.
    fn fault(&mut self, error: DetectionError);
}

/// Single-consumer thread draining one bounded queue.
pub struct Worker<T> {
    stage: &'static str,
    producer: QueueProducer<T>,
    cancel: Arc<AtomicBool>,
    exited: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Worker<T> {
    pub fn spawn<H>(
        stage: &'static str,
        producer: QueueProducer<T>,
        consumer: QueueConsumer<T>,
        poll: Duration,
        mut handler: H,
    ) -> Result<Self, DetectionError>
    where
        H: QueueHandler<T>,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let (exited_tx, exited) = crossbeam_channel::bounded(1);
        let flag = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name(format!("{stage}-worker"))
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    let item = match consumer.pop_timeout(poll) {
                        Poll::Item(item) => item,
                        Poll::Empty => continue,
                        Poll::Closed => break,
                    };
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(item)));
                    let fault = match outcome {
                        Ok(Ok(())) => None,
                        Ok(Err(err)) => Some(err),
                        Err(payload) => Some(DetectionError::WorkerPanicked(panic_message(&payload))),
                    };
                    if let Some(err) = fault {
                        error!("{stage} evaluation failed: {err}");
                        handler.fault(err);
                    }
                }
                debug!("{stage} worker exiting");
                exited_tx.send(()).ok();
            })?;
        Ok(Self {
            stage,
            producer,
            cancel,
            exited,
            handle: Some(handle),
        })
    }

    pub fn producer(&self) -> &QueueProducer<T> {
        &self.producer
    }

    /// Cancels the worker, closes its queue and waits up to `timeout`.
    ///
    /// Items still queued are abandoned. A worker that misses the deadline is detached.
    pub fn stop(mut self, timeout: Duration) -> Result<(), DetectionError> {
        self.cancel.store(true, Ordering::Release);
        self.producer.close();
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if self.exited.recv_timeout(timeout).is_err() {
            warn!(
                "{} worker still busy after {} ms, detaching",
                self.stage,
                timeout.as_millis()
            );
            return Err(DetectionError::StopTimeout {
                stage: self.stage,
                waited_ms: timeout.as_millis() as u64,
            });
        }
        handle
            .join()
            .map_err(|payload| DetectionError::WorkerPanicked(panic_message(&payload)))
    }
}

impl<T> Drop for Worker<T> {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        self.producer.close();
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::queue::bounded;
    use crossbeam_channel::Sender;

    struct Echo {
        out: Sender<Result<u32, String>>,
    }

    impl QueueHandler<u32> for Echo {
        fn handle(&mut self, item: u32) -> Result<(), DetectionError> {
            if item == 13 {
                panic!("unlucky");
            }
            if item == 7 {
                return Err(DetectionError::NonFiniteSample { channel: 7 });
            }
            self.out.send(Ok(item)).ok();
            Ok(())
        }

        fn fault(&mut self, error: DetectionError) {
            self.out.send(Err(error.to_string())).ok();
        }
    }

    #[test]
    fn faults_are_reported_and_worker_survives() {
        let (producer, consumer) = bounded(16);
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = Worker::spawn(
            "test",
            producer.clone(),
            consumer,
            Duration::from_millis(5),
            Echo { out: tx },
        )
        .unwrap();
        for item in [1, 13, 7, 2] {
            producer.push(item).unwrap();
        }
        let got: Vec<_> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got[0], Ok(1));
        assert!(got[1].as_ref().unwrap_err().contains("unlucky"));
        assert!(got[2].as_ref().unwrap_err().contains("channel 7"));
        assert_eq!(got[3], Ok(2));
        worker.stop(STOP_TIMEOUT).unwrap();
        assert!(producer.is_closed());
    }
}
