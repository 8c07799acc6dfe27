//! Parallel executor
//!
//! Ops for one mailbox always go to the same worker, so per-mailbox order
//! is preserved while different mailboxes replay concurrently. Ops that
//! span all mailboxes run on the calling thread once every worker queue
//! has drained, so later mailbox ops that depend on them cannot overtake.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{RedoError, Result};
use crate::op::{RedoableOp, MAILBOX_ID_ALL};
use crate::store::MailboxStore;

use super::OpExecutor;

enum Job {
    Op(RedoableOp),
    /// Acknowledge once everything queued before this has run
    Drain(Sender<()>),
}

/// Dispatches ops to worker threads by `mailbox_id mod threads`
pub struct ParallelExecutor {
    store: Arc<dyn MailboxStore>,
    senders: Vec<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    stop_on_error: bool,
    /// First failure seen by any worker (only recorded when stopping on error)
    first_failure: Arc<Mutex<Option<String>>>,
    failures: Arc<AtomicU64>,
}

impl ParallelExecutor {
    pub fn new(
        store: Arc<dyn MailboxStore>,
        threads: usize,
        queue_capacity: usize,
        stop_on_error: bool,
    ) -> Result<Self> {
        let threads = threads.max(1);
        let first_failure = Arc::new(Mutex::new(None));
        let failures = Arc::new(AtomicU64::new(0));

        let mut senders = Vec::with_capacity(threads);
        let mut workers = Vec::with_capacity(threads);

        for id in 0..threads {
            let (tx, rx) = bounded(queue_capacity.max(1));
            let store = Arc::clone(&store);
            let first_failure = Arc::clone(&first_failure);
            let failures = Arc::clone(&failures);

            let handle = thread::Builder::new()
                .name(format!("redo-player-{}", id))
                .spawn(move || {
                    Self::worker_loop(rx, store, stop_on_error, first_failure, failures)
                })?;

            senders.push(tx);
            workers.push(handle);
        }

        tracing::debug!("Started {} redo player threads", threads);

        Ok(Self {
            store,
            senders,
            workers,
            stop_on_error,
            first_failure,
            failures,
        })
    }

    fn worker_loop(
        rx: Receiver<Job>,
        store: Arc<dyn MailboxStore>,
        stop_on_error: bool,
        first_failure: Arc<Mutex<Option<String>>>,
        failures: Arc<AtomicU64>,
    ) {
        for job in rx {
            match job {
                Job::Op(op) => {
                    if stop_on_error && first_failure.lock().is_some() {
                        continue;
                    }
                    if let Err(e) = store.redo(&op) {
                        failures.fetch_add(1, Ordering::SeqCst);
                        if stop_on_error {
                            let mut slot = first_failure.lock();
                            if slot.is_none() {
                                *slot = Some(format!("error executing redo op [{}]: {}", op, e));
                            }
                        } else {
                            tracing::warn!(
                                "Ignoring error during redo log replay of [{}]: {}",
                                op,
                                e
                            );
                        }
                    }
                }
                Job::Drain(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    }

    fn check_failure(&self) -> Result<()> {
        if !self.stop_on_error {
            return Ok(());
        }
        match self.first_failure.lock().as_ref() {
            Some(msg) => Err(RedoError::Replay(msg.clone())),
            None => Ok(()),
        }
    }

    /// Block until every worker has run everything queued so far
    fn drain(&self) -> Result<()> {
        let mut acks = Vec::with_capacity(self.senders.len());
        for tx in &self.senders {
            let (ack_tx, ack_rx) = bounded(1);
            tx.send(Job::Drain(ack_tx))
                .map_err(|_| RedoError::Replay("redo player thread exited".to_string()))?;
            acks.push(ack_rx);
        }
        for ack in acks {
            ack.recv()
                .map_err(|_| RedoError::Replay("redo player thread exited".to_string()))?;
        }
        Ok(())
    }

    fn worker_for(&self, mailbox_id: i32) -> &Sender<Job> {
        let idx = (mailbox_id as i64).rem_euclid(self.senders.len() as i64) as usize;
        &self.senders[idx]
    }
}

impl OpExecutor for ParallelExecutor {
    fn execute(&mut self, op: RedoableOp) -> Result<()> {
        self.check_failure()?;

        if self.senders.is_empty() {
            return Err(RedoError::InvalidState(
                "parallel executor already finished".to_string(),
            ));
        }

        if op.mailbox_id() == MAILBOX_ID_ALL {
            self.drain()?;
            self.check_failure()?;
            return self.store.redo(&op);
        }

        self.worker_for(op.mailbox_id())
            .send(Job::Op(op))
            .map_err(|_| RedoError::Replay("redo player thread exited".to_string()))
    }

    fn finish(&mut self) -> Result<()> {
        // Closing the channels ends each worker's loop
        self.senders.clear();
        for handle in self.workers.drain(..) {
            handle
                .join()
                .map_err(|_| RedoError::Replay("redo player thread panicked".to_string()))?;
        }
        self.check_failure()
    }

    fn async_failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }
}
