//! Bounded worker pool feeding the job dispatcher.
//!
//! Jobs enter a bounded `mpsc` queue. A supervisor task takes them off the
//! queue, waits for a concurrency permit and runs each on its own task in a
//! `JoinSet`. Jobs for different triggers run fully in parallel; jobs for the
//! same trigger are serialized further down by the per-key cursor lock.
//!
//! Shutdown cancels intake, then drains the queue and waits for every
//! in-flight job, so each accepted envelope still gets its report.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use piecework_types::error::DispatchError;
use piecework_types::job::JobEnvelope;

use super::dispatcher::JobDispatcher;
use crate::engine::IsolationStrategy;
use crate::repository::CursorStore;

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    /// Maximum jobs executing at once.
    pub concurrency: usize,
    /// Maximum jobs waiting for a permit.
    pub queue_capacity: usize,
}

impl PoolSettings {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            concurrency,
            queue_capacity: concurrency * 16,
        }
    }
}

pub struct WorkerPool {
    sender: mpsc::Sender<JobEnvelope>,
    queued: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn the supervisor. Must be called inside a tokio runtime.
    pub fn start<S, C>(dispatcher: Arc<JobDispatcher<S, C>>, settings: PoolSettings) -> Self
    where
        S: IsolationStrategy + 'static,
        C: CursorStore + 'static,
    {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let queued = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let supervisor = tokio::spawn(supervise(
            dispatcher,
            receiver,
            Arc::new(Semaphore::new(settings.concurrency.max(1))),
            Arc::clone(&queued),
            Arc::clone(&in_flight),
            shutdown.clone(),
        ));
        tracing::info!(
            concurrency = settings.concurrency,
            queue_capacity = settings.queue_capacity,
            "worker pool started"
        );

        Self {
            sender,
            queued,
            in_flight,
            shutdown,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }

    /// Enqueue a job without waiting. Fails when the queue is full or closed.
    pub fn submit(&self, envelope: JobEnvelope) -> Result<(), DispatchError> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::QueueClosed);
        }
        // Count before sending so the supervisor never decrements below zero.
        self.queued.fetch_add(1, Ordering::SeqCst);
        match self.sender.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => DispatchError::QueueClosed,
                })
            }
        }
    }

    /// Jobs accepted but not yet started.
    pub fn queue_depth(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs and wait for queued and running ones to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.supervisor.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker pool supervisor failed");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

async fn supervise<S, C>(
    dispatcher: Arc<JobDispatcher<S, C>>,
    mut receiver: mpsc::Receiver<JobEnvelope>,
    permits: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) where
    S: IsolationStrategy + 'static,
    C: CursorStore + 'static,
{
    let mut running: JoinSet<()> = JoinSet::new();

    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = receiver.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        if !start_job(&dispatcher, envelope, &permits, &queued, &in_flight, &mut running).await {
            break;
        }
        while let Some(joined) = running.try_join_next() {
            log_join(joined);
        }
    }

    // Drain: everything already accepted still runs and reports.
    receiver.close();
    while let Some(envelope) = receiver.recv().await {
        if !start_job(&dispatcher, envelope, &permits, &queued, &in_flight, &mut running).await {
            break;
        }
    }
    while let Some(joined) = running.join_next().await {
        log_join(joined);
    }
}

async fn start_job<S, C>(
    dispatcher: &Arc<JobDispatcher<S, C>>,
    envelope: JobEnvelope,
    permits: &Arc<Semaphore>,
    queued: &Arc<AtomicUsize>,
    in_flight: &Arc<AtomicUsize>,
    running: &mut JoinSet<()>,
) -> bool
where
    S: IsolationStrategy + 'static,
    C: CursorStore + 'static,
{
    let Ok(permit) = Arc::clone(permits).acquire_owned().await else {
        tracing::error!(request_id = %envelope.request_id, "worker pool semaphore closed");
        return false;
    };
    queued.fetch_sub(1, Ordering::SeqCst);
    in_flight.fetch_add(1, Ordering::SeqCst);

    let dispatcher = Arc::clone(dispatcher);
    let in_flight = Arc::clone(in_flight);
    running.spawn(async move {
        let _permit = permit;
        // Inner task so a panic still produces the job's one report.
        let inner = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            let envelope = envelope.clone();
            async move {
                dispatcher.dispatch(envelope).await;
            }
        });
        if let Err(e) = inner.await {
            tracing::error!(request_id = %envelope.request_id, error = %e, "job task panicked");
            dispatcher
                .report_host_failure(&envelope, format!("job task failed: {e}"))
                .await;
        }
        in_flight.fetch_sub(1, Ordering::SeqCst);
    });
    true
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "worker pool task failed");
    }
}
