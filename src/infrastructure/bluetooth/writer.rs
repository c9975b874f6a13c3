//! Write serialization
//!
//! GATT writes on one characteristic must not overlap. Every accepted send
//! becomes a [`WriteJob`] on a FIFO channel drained by a single local task,
//! so at most one write is in flight and writes reach the adapter in
//! submission order. A failed write fails only its own job.

use std::rc::Weak;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::spawn_local;
use tracing::{debug, trace};

use crate::domain::models::SendResult;
use crate::error::TransportError;
use crate::utils::task::AbortOnDrop;

pub type SendCallback = Box<dyn FnOnce(SendResult)>;

/// Performs one write at execution time, re-validating the link first.
#[async_trait(?Send)]
pub trait WriteSink {
    async fn write_frame(&self, data: &[u8]) -> SendResult;
}

struct WriteJob {
    data: Vec<u8>,
    callback: SendCallback,
    done: oneshot::Sender<()>,
}

pub struct WriteQueue {
    jobs: mpsc::UnboundedSender<WriteJob>,
    _worker: AbortOnDrop<()>,
}

impl WriteQueue {
    /// Spawn the drain task. Must be called from within a `LocalSet`.
    pub fn start(sink: Weak<dyn WriteSink>) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let worker = spawn_local(drain(sink, rx));
        Self {
            jobs,
            _worker: worker.into(),
        }
    }

    /// Queue `data`. The returned receiver resolves after `callback` ran.
    pub fn submit(&self, data: Vec<u8>, callback: SendCallback) -> oneshot::Receiver<()> {
        let (done, rx) = oneshot::channel();
        let job = WriteJob {
            data,
            callback,
            done,
        };
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(job) {
            // worker gone, which only happens while the transport is dropped
            (job.callback)(SendResult::failed(TransportError::LinkDown));
            let _ = job.done.send(());
        }
        rx
    }
}

async fn drain(sink: Weak<dyn WriteSink>, mut rx: mpsc::UnboundedReceiver<WriteJob>) {
    while let Some(job) = rx.recv().await {
        let result = match sink.upgrade() {
            Some(sink) => sink.write_frame(&job.data).await,
            None => SendResult::failed(TransportError::LinkDown),
        };
        trace!("write of {} bytes finished: {:?}", job.data.len(), result.error);
        (job.callback)(result);
        let _ = job.done.send(());
    }
    debug!("write queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::utils::task::block_on_locally;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        in_flight: Cell<usize>,
        max_in_flight: Cell<usize>,
        seen: RefCell<Vec<Vec<u8>>>,
    }

    #[async_trait(?Send)]
    impl WriteSink for RecordingSink {
        async fn write_frame(&self, data: &[u8]) -> SendResult {
            self.in_flight.set(self.in_flight.get() + 1);
            self.max_in_flight
                .set(self.max_in_flight.get().max(self.in_flight.get()));
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.set(self.in_flight.get() - 1);
            self.seen.borrow_mut().push(data.to_vec());

            if data == b"bad" {
                SendResult::failed(TransportError::WriteFailed(AdapterError::Failed(
                    "rejected".to_string(),
                )))
            } else {
                SendResult::sent(data.len())
            }
        }
    }

    #[test]
    fn test_jobs_run_one_at_a_time_in_order() {
        block_on_locally(async {
            let sink = Rc::new(RecordingSink::default());
            let weak: Weak<dyn WriteSink> = Rc::downgrade(&sink) as Weak<dyn WriteSink>;
            let queue = WriteQueue::start(weak);

            let results = Rc::new(RefCell::new(Vec::new()));
            let mut pending = Vec::new();
            for frame in [&b"one"[..], b"bad", b"three"] {
                let results = results.clone();
                pending.push(queue.submit(
                    frame.to_vec(),
                    Box::new(move |r| results.borrow_mut().push(r)),
                ));
            }
            for rx in pending {
                rx.await.unwrap();
            }

            assert_eq!(sink.max_in_flight.get(), 1);
            assert_eq!(
                *sink.seen.borrow(),
                vec![b"one".to_vec(), b"bad".to_vec(), b"three".to_vec()]
            );
            let results = results.borrow();
            assert_eq!(results[0], SendResult::sent(3));
            assert!(!results[1].is_ok());
            assert_eq!(results[2], SendResult::sent(5));
        });
    }

    #[test]
    fn test_dropped_sink_fails_jobs() {
        block_on_locally(async {
            let sink = Rc::new(RecordingSink::default());
            let weak: Weak<dyn WriteSink> = Rc::downgrade(&sink) as Weak<dyn WriteSink>;
            let queue = WriteQueue::start(weak);
            drop(sink);

            let result = Rc::new(RefCell::new(None));
            let slot = result.clone();
            queue
                .submit(vec![1], Box::new(move |r| *slot.borrow_mut() = Some(r)))
                .await
                .unwrap();

            assert_eq!(
                result.borrow().clone(),
                Some(SendResult::failed(TransportError::LinkDown))
            );
        });
    }
}
