//! Worker pool
//!
//! A fixed set of identical workers consuming the shared bounded queue.
//! Each worker runs the pipeline synchronously over one transaction,
//! encodes the result and hands the datagram back to the listener that
//! owns the receiving socket. Workers never share transaction state and
//! a failing or panicking handler never takes a worker down.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use hexane_core::stats::ServerStats;
use hexane_core::types::{Disposition, DropReason};

use hexane_engine::pipeline::PipelineHandle;
use hexane_engine::transaction::TransactionState;
use hexane_wire::Message;

use crate::listener::{Outbound, WorkItem};

/// The running worker pool
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers over a shared queue receiver
    pub fn spawn(
        count: usize,
        queue_rx: mpsc::Receiver<WorkItem>,
        requeue: mpsc::Sender<WorkItem>,
        pipeline: Arc<PipelineHandle>,
        stats: Arc<ServerStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let queue = Arc::new(Mutex::new(queue_rx));
        let handles = (0..count)
            .map(|index| {
                let queue = queue.clone();
                let requeue = requeue.clone();
                let pipeline = pipeline.clone();
                let stats = stats.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(worker_loop(
                    index, queue, requeue, pipeline, stats, shutdown,
                ))
            })
            .collect();
        info!(workers = count, "Worker pool started");
        Self { handles }
    }

    /// Wait for every worker to finish draining
    pub async fn join(&mut self) {
        for handle in &mut self.handles {
            let _ = handle.await;
        }
    }

    /// Force-terminate the pool
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn worker_loop(
    index: usize,
    queue: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    requeue: mpsc::Sender<WorkItem>,
    pipeline: Arc<PipelineHandle>,
    stats: Arc<ServerStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker = index, "Worker started");
    loop {
        if *shutdown.borrow() {
            // Drain mode: finish what is queued, then stop
            let item = queue.lock().await.try_recv().ok();
            match item {
                Some(item) => process(item, &requeue, &pipeline, &stats),
                None => break,
            }
            continue;
        }

        let item = {
            let mut rx = queue.lock().await;
            tokio::select! {
                item = rx.recv() => item,
                _ = shutdown.changed() => continue,
            }
        };
        match item {
            Some(item) => process(item, &requeue, &pipeline, &stats),
            None => break,
        }
    }
    debug!(worker = index, "Worker stopped");
}

fn process(
    mut item: WorkItem,
    requeue: &mpsc::Sender<WorkItem>,
    pipeline: &PipelineHandle,
    stats: &ServerStats,
) {
    let bundle = &mut item.bundle;

    // A transaction that sat in the queue past its deadline is not run
    if bundle.deadline_exceeded() && !bundle.is_dropped() {
        bundle.drop_with(DropReason::Timeout);
        stats.record_dropped(DropReason::Timeout);
        bundle.advance(TransactionState::Dropped);
        return;
    }

    let active = pipeline.load();
    let started = Instant::now();
    let run = std::panic::catch_unwind(AssertUnwindSafe(|| active.execute(bundle)));
    stats.latency.record(started.elapsed());

    if run.is_err() {
        error!(id = %bundle.id, "Handler panicked; dropping transaction");
        stats.record_handler_error();
        if !bundle.is_dropped() {
            bundle.drop_with(DropReason::HandlerError);
            stats.record_dropped(DropReason::HandlerError);
        }
        bundle.advance(TransactionState::Dropped);
        return;
    }

    match bundle.disposition() {
        Disposition::Emit => {
            let outbound_message = bundle
                .outbound()
                .cloned()
                .unwrap_or_else(|| Message::Client(bundle.response().clone()));
            match outbound_message.encode() {
                Ok(payload) => {
                    let destination = bundle.recv.source;
                    bundle.advance(TransactionState::Emitted);
                    if item
                        .outbound
                        .try_send(Outbound {
                            payload,
                            destination,
                        })
                        .is_err()
                    {
                        stats.record_send_error();
                    }
                }
                Err(err) => {
                    // Encode failure at this point is fatal for the transaction
                    error!(id = %bundle.id, error = %err, "Response failed to encode");
                    stats.record_encode_error();
                    bundle.drop_with(DropReason::EncodeError);
                    stats.record_dropped(DropReason::EncodeError);
                    bundle.advance(TransactionState::Dropped);
                }
            }
        }
        Disposition::Drop => {
            // Reason counters ran inside the pipeline's accounting handler
            bundle.advance(TransactionState::Dropped);
        }
        Disposition::Defer => {
            if item.deferred {
                debug!(id = %item.bundle.id, "Transaction deferred twice; dropping");
                item.bundle.drop_with(DropReason::Policy);
                stats.record_dropped(DropReason::Policy);
            } else {
                stats.record_deferred();
                item.deferred = true;
                if requeue.try_send(item).is_err() {
                    stats.record_queue_full();
                }
            }
        }
    }
}
