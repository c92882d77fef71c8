//! Priority event pipeline: bounded queue, worker pool, retries, dead
//! letters.
//!
//! Submission is non-blocking and fails with `QueueFull` under saturation;
//! back-pressure is the caller's signal, events are never silently dropped.
//! Workers pop the highest priority first and FIFO within a priority class
//! (by submission sequence). One registered handler per event kind runs on
//! the worker under a timeout; failures retry with backoff and land in the
//! dead-letter store afterwards, payload retained for manual replay.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::CoreError;
use crate::events::{EventKind, EventPayload, EventPriority, PipelineEvent};

/// Handles one event kind. Runs on a worker task; must be cancel-safe.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &PipelineEvent) -> Result<(), CoreError>;
}

/// An event that exhausted its retries (or had no handler).
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: PipelineEvent,
    pub error: String,
    pub attempts: u32,
}

/// Queue entry ordering: priority first, then FIFO by sequence.
struct QueuedEvent(PipelineEvent);

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.seq == other.0.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then the lower sequence number.
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

struct PipelineShared {
    queue: Mutex<BinaryHeap<QueuedEvent>>,
    notify: Notify,
    seq: AtomicU64,
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
    config: PipelineConfig,
    dead_letters: Mutex<Vec<DeadLetter>>,
    dead_letter_count: AtomicU64,
    timeout_count: AtomicU64,
    processed_count: AtomicU64,
}

/// Builder: register handlers, then start.
pub struct EventPipelineBuilder {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
    config: PipelineConfig,
}

impl EventPipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            config,
        }
    }

    /// Register the single handler for `kind` (last registration wins).
    pub fn handler(mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Spawn the worker pool and return the running pipeline.
    pub fn start(self) -> EventPipeline {
        let shared = Arc::new(PipelineShared {
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            handlers: self.handlers,
            config: self.config,
            dead_letters: Mutex::new(Vec::new()),
            dead_letter_count: AtomicU64::new(0),
            timeout_count: AtomicU64::new(0),
            processed_count: AtomicU64::new(0),
        });
        let cancel = CancellationToken::new();

        let mut workers = Vec::with_capacity(shared.config.workers.max(1));
        for worker_id in 0..shared.config.workers.max(1) {
            let shared = Arc::clone(&shared);
            let cancel = cancel.clone();
            workers.push(tokio::spawn(worker_loop(worker_id, shared, cancel)));
        }
        info!(workers = workers.len(), "event pipeline started");

        EventPipeline {
            shared,
            cancel,
            workers: Mutex::new(workers),
        }
    }
}

pub struct EventPipeline {
    shared: Arc<PipelineShared>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventPipeline {
    /// Non-blocking submission; assigns the monotonic sequence number.
    /// Fails with `QueueFull` at capacity.
    pub fn submit(
        &self,
        priority: EventPriority,
        payload: EventPayload,
    ) -> Result<u64, CoreError> {
        let mut queue = self
            .shared
            .queue
            .lock()
            .map_err(|_| CoreError::Internal("pipeline queue poisoned".into()))?;
        if queue.len() >= self.shared.config.queue_size {
            return Err(CoreError::QueueFull);
        }
        let seq = self.shared.seq.fetch_add(1, AtomicOrdering::SeqCst);
        queue.push(QueuedEvent(PipelineEvent {
            priority,
            seq,
            payload,
        }));
        drop(queue);
        self.shared.notify.notify_one();
        Ok(seq)
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn processed_count(&self) -> u64 {
        self.shared.processed_count.load(AtomicOrdering::SeqCst)
    }

    pub fn dead_letter_count(&self) -> u64 {
        self.shared.dead_letter_count.load(AtomicOrdering::SeqCst)
    }

    pub fn timeout_count(&self) -> u64 {
        self.shared.timeout_count.load(AtomicOrdering::SeqCst)
    }

    /// Snapshot of dead-lettered events for manual replay.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared
            .dead_letters
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Signal workers, drain the queue to quiescence and join the pool.
    /// In-flight handlers finish or hit their timeout.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.shared.notify.notify_waiters();
        let workers = {
            let mut guard = match self.workers.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            std::mem::take(&mut *guard)
        };
        for worker in workers {
            let _ = worker.await;
        }
        info!(
            processed = self.processed_count(),
            dead_lettered = self.dead_letter_count(),
            "event pipeline stopped"
        );
    }
}

fn pop(shared: &PipelineShared) -> Option<PipelineEvent> {
    shared
        .queue
        .lock()
        .ok()
        .and_then(|mut queue| queue.pop())
        .map(|q| q.0)
}

async fn worker_loop(worker_id: usize, shared: Arc<PipelineShared>, cancel: CancellationToken) {
    loop {
        match pop(&shared) {
            Some(event) => process(worker_id, &shared, event).await,
            None => {
                if cancel.is_cancelled() {
                    break;
                }
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }
    }
    debug!(worker_id, "pipeline worker drained and stopped");
}

/// Dispatch one event with timeout, retries and dead-lettering.
async fn process(worker_id: usize, shared: &PipelineShared, event: PipelineEvent) {
    let kind = event.payload.kind();
    let Some(handler) = shared.handlers.get(&kind) else {
        warn!(?kind, seq = event.seq, "no handler registered, dead-lettering");
        dead_letter(shared, event, "no handler registered", 0);
        return;
    };

    let timeout = Duration::from_secs(shared.config.handler_timeout_s);
    let max_attempts = shared.config.max_retries.max(1);
    let mut last_error = String::new();

    for attempt in 0..max_attempts {
        match tokio::time::timeout(timeout, handler.handle(&event)).await {
            Ok(Ok(())) => {
                shared.processed_count.fetch_add(1, AtomicOrdering::SeqCst);
                return;
            }
            Ok(Err(err)) => {
                last_error = err.to_string();
                warn!(
                    worker_id,
                    ?kind,
                    seq = event.seq,
                    attempt = attempt + 1,
                    error = %last_error,
                    "handler failed"
                );
            }
            Err(_) => {
                shared.timeout_count.fetch_add(1, AtomicOrdering::SeqCst);
                last_error = format!("handler timed out after {}s", timeout.as_secs());
                warn!(worker_id, ?kind, seq = event.seq, attempt = attempt + 1, "handler timeout");
            }
        }
        if attempt + 1 < max_attempts {
            // Short backoff; handlers are expected to fail fast.
            tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
        }
    }

    error!(?kind, seq = event.seq, error = %last_error, "retries exhausted, dead-lettering");
    dead_letter(shared, event, &last_error, max_attempts);
}

fn dead_letter(shared: &PipelineShared, event: PipelineEvent, error: &str, attempts: u32) {
    shared.dead_letter_count.fetch_add(1, AtomicOrdering::SeqCst);
    if let Ok(mut letters) = shared.dead_letters.lock() {
        letters.push(DeadLetter {
            event,
            error: error.to_string(),
            attempts,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    fn gps(agent: &str) -> EventPayload {
        EventPayload::Gps {
            agent_id: agent.into(),
            position: crate::geo::Coordinate::new(41.3, 69.2).unwrap(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn heap_orders_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        let event = |priority, seq| {
            QueuedEvent(PipelineEvent {
                priority,
                seq,
                payload: gps("a1"),
            })
        };
        heap.push(event(EventPriority::Normal, 0));
        heap.push(event(EventPriority::High, 1));
        heap.push(event(EventPriority::Normal, 2));
        heap.push(event(EventPriority::Critical, 3));

        let order: Vec<(EventPriority, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|q| (q.0.priority, q.0.seq))
            .collect();
        assert_eq!(
            order,
            vec![
                (EventPriority::Critical, 3),
                (EventPriority::High, 1),
                (EventPriority::Normal, 0),
                (EventPriority::Normal, 2),
            ]
        );
    }

    struct CountingHandler {
        calls: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &PipelineEvent) -> Result<(), CoreError> {
            let call = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if call < self.fail_times {
                return Err(CoreError::Internal("scripted failure".into()));
            }
            Ok(())
        }
    }

    fn test_config(workers: usize, queue_size: usize) -> PipelineConfig {
        PipelineConfig {
            queue_size,
            workers,
            handler_timeout_s: 1,
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn queue_full_rejects_submission() {
        // Zero workers would hang stop(); use one and a tiny queue.
        let blocker = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail_times: 0,
        });
        let pipeline = EventPipelineBuilder::new(test_config(1, 2))
            .handler(EventKind::Gps, blocker)
            .start();
        // Stop the worker pool from draining by not yielding before asserts.
        let mut results = Vec::new();
        for _ in 0..4 {
            results.push(pipeline.submit(EventPriority::Normal, gps("a1")));
        }
        assert!(results.iter().any(|r| matches!(r, Err(CoreError::QueueFull))));
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn events_process_and_count() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail_times: 0,
        });
        let pipeline = EventPipelineBuilder::new(test_config(2, 100))
            .handler(EventKind::Gps, handler.clone())
            .start();
        for _ in 0..5 {
            pipeline.submit(EventPriority::Normal, gps("a1")).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        pipeline.stop().await;
        assert_eq!(pipeline.processed_count(), 5);
        assert_eq!(pipeline.dead_letter_count(), 0);
    }

    #[tokio::test]
    async fn failing_handler_retries_then_dead_letters() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail_times: 99,
        });
        let pipeline = EventPipelineBuilder::new(test_config(1, 10))
            .handler(EventKind::Gps, handler.clone())
            .start();
        pipeline.submit(EventPriority::High, gps("a1")).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        pipeline.stop().await;

        assert_eq!(handler.calls.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(pipeline.dead_letter_count(), 1);
        let letters = pipeline.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 3);
        assert_eq!(letters[0].event.payload.kind(), EventKind::Gps);
    }

    #[tokio::test]
    async fn unregistered_kind_dead_letters_immediately() {
        let pipeline = EventPipelineBuilder::new(test_config(1, 10)).start();
        pipeline
            .submit(
                EventPriority::Normal,
                EventPayload::Traffic {
                    region: "almaty".into(),
                    multiplier: 2.0,
                },
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        pipeline.stop().await;
        assert_eq!(pipeline.dead_letter_count(), 1);
    }

    #[tokio::test]
    async fn stop_drains_queued_events() {
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail_times: 0,
        });
        let pipeline = EventPipelineBuilder::new(test_config(2, 100))
            .handler(EventKind::Gps, handler.clone())
            .start();
        for _ in 0..20 {
            pipeline.submit(EventPriority::Normal, gps("a1")).unwrap();
        }
        pipeline.stop().await;
        assert_eq!(pipeline.queued(), 0);
        assert_eq!(pipeline.processed_count(), 20);
    }
}
