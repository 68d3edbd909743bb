//! Rate-limited, single-worker scan queue.
//!
//! Tasks are drained in FIFO order by exactly one worker, so no two scans
//! ever execute concurrently and the reconciliation sequence needs no
//! additional locking. A governor rate limiter spaces executions evenly so
//! that no 60 second sliding window ever sees more than the configured call
//! budget.

use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::error::Result;

/// A unit of queued work: ephemeral, in-memory, lost on restart.
/// Re-submission is idempotent, so that loss is acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanTask {
    pub kind: TaskKind,
    pub uuid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Full guild fetch-and-reconcile for a player
    Guild,
    /// Secondary level-metric refresh for a member
    Level,
}

impl ScanTask {
    pub fn guild(uuid: impl Into<String>) -> Self {
        Self {
            kind: TaskKind::Guild,
            uuid: uuid.into(),
        }
    }

    pub fn level(uuid: impl Into<String>) -> Self {
        Self {
            kind: TaskKind::Level,
            uuid: uuid.into(),
        }
    }
}

/// Executes one task inside the queue worker.
#[async_trait]
pub trait TaskRunner: Send + Sync + 'static {
    async fn run(&self, task: &ScanTask) -> Result<()>;
}

/// Handle to the queue; cheap to clone, submit is fire-and-forget.
#[derive(Clone)]
pub struct ScanQueue {
    tx: mpsc::UnboundedSender<ScanTask>,
    pending: Arc<Mutex<HashSet<ScanTask>>>,
}

impl ScanQueue {
    /// Spawn the worker draining the FIFO at no more than
    /// `calls_per_window` executions per rolling 60 second window.
    pub fn start(runner: Arc<dyn TaskRunner>, calls_per_window: u32) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ScanTask>();
        let pending: Arc<Mutex<HashSet<ScanTask>>> = Arc::new(Mutex::new(HashSet::new()));

        // One execution per window/K with no burst allowance: any sliding
        // 60 second window then holds at most K executions. A burst-capacity
        // quota would admit up to 2K-1 inside one window.
        let period = Duration::from_secs(60) / calls_per_window.max(1);
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_minute(NonZeroU32::MIN));
        let limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock> =
            RateLimiter::direct(quota);

        let worker_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                limiter.until_ready().await;

                debug!("Executing {:?} task for {}", task.kind, task.uuid);
                if let Err(err) = runner.run(&task).await {
                    // One failing scan never blocks the pipeline; the next
                    // qualifying request for this player retries naturally.
                    warn!("{:?} task for {} failed: {}", task.kind, task.uuid, err);
                }

                lock(&worker_pending).remove(&task);
            }
        });

        Self { tx, pending }
    }

    /// Enqueue a task. Returns false when an identical task is already
    /// pending or executing (the submission is coalesced) or the worker
    /// has shut down.
    pub fn submit(&self, task: ScanTask) -> bool {
        {
            let mut pending = lock(&self.pending);
            if !pending.insert(task.clone()) {
                debug!("Coalesced duplicate {:?} task for {}", task.kind, task.uuid);
                return false;
            }
        }

        if self.tx.send(task.clone()).is_err() {
            lock(&self.pending).remove(&task);
            return false;
        }
        true
    }

    /// Tasks currently pending or executing.
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use std::time::Instant;
    use tokio::sync::Semaphore;

    /// Records executed tasks and their start instants; optionally blocks
    /// until a permit is released or fails specific uuids.
    struct RecordingRunner {
        executed: Mutex<Vec<ScanTask>>,
        stamps: Mutex<Vec<Instant>>,
        gate: Option<Arc<Semaphore>>,
        fail: HashSet<String>,
    }

    impl RecordingRunner {
        fn new() -> Self {
            Self {
                executed: Mutex::new(Vec::new()),
                stamps: Mutex::new(Vec::new()),
                gate: None,
                fail: HashSet::new(),
            }
        }

        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new()
            }
        }

        fn failing(uuid: &str) -> Self {
            let mut fail = HashSet::new();
            fail.insert(uuid.to_string());
            Self {
                fail,
                ..Self::new()
            }
        }

        fn executed(&self) -> Vec<ScanTask> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskRunner for RecordingRunner {
        async fn run(&self, task: &ScanTask) -> Result<()> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.stamps.lock().unwrap().push(Instant::now());
            self.executed.lock().unwrap().push(task.clone());
            if self.fail.contains(&task.uuid) {
                return Err(ApiError::Network("boom".to_string()).into());
            }
            Ok(())
        }
    }

    async fn drain(queue: &ScanQueue) {
        for _ in 0..500 {
            if queue.pending_len() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue did not drain in time");
    }

    #[tokio::test]
    async fn test_tasks_execute_in_fifo_order() {
        let runner = Arc::new(RecordingRunner::new());
        let queue = ScanQueue::start(runner.clone(), 600);

        queue.submit(ScanTask::guild("p1"));
        queue.submit(ScanTask::guild("p2"));
        queue.submit(ScanTask::level("p1"));
        drain(&queue).await;

        let executed = runner.executed();
        assert_eq!(executed.len(), 3);
        assert_eq!(executed[0], ScanTask::guild("p1"));
        assert_eq!(executed[1], ScanTask::guild("p2"));
        assert_eq!(executed[2], ScanTask::level("p1"));
    }

    #[tokio::test]
    async fn test_duplicate_submissions_coalesce() {
        let gate = Arc::new(Semaphore::new(0));
        let runner = Arc::new(RecordingRunner::gated(Arc::clone(&gate)));
        let queue = ScanQueue::start(runner.clone(), 600);

        assert!(queue.submit(ScanTask::guild("p1")));
        // Same key while the first is pending or executing: no-op.
        assert!(!queue.submit(ScanTask::guild("p1")));
        // Different kind for the same player is a different key.
        assert!(queue.submit(ScanTask::level("p1")));

        gate.add_permits(2);
        drain(&queue).await;

        assert_eq!(runner.executed().len(), 2);

        // Once the first completed, the key is free again.
        assert!(queue.submit(ScanTask::guild("p1")));
        gate.add_permits(1);
        drain(&queue).await;
    }

    #[tokio::test]
    async fn test_failed_task_does_not_halt_worker() {
        let runner = Arc::new(RecordingRunner::failing("bad"));
        let queue = ScanQueue::start(runner.clone(), 600);

        queue.submit(ScanTask::guild("bad"));
        queue.submit(ScanTask::guild("good"));
        drain(&queue).await;

        let executed = runner.executed();
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[1].uuid, "good");
    }

    #[tokio::test]
    async fn test_rate_cap_disallows_bursts() {
        let runner = Arc::new(RecordingRunner::new());
        // Cap 2 means one execution every 30 seconds; a burst of five must
        // not get more than the first one through.
        let queue = ScanQueue::start(runner.clone(), 2);

        for i in 0..5 {
            queue.submit(ScanTask::guild(format!("p{}", i)));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(runner.executed().len(), 1);
        assert_eq!(queue.pending_len(), 4);
    }

    #[tokio::test]
    async fn test_rate_cap_spaces_executions_across_window() {
        let runner = Arc::new(RecordingRunner::new());
        // Cap 60 spaces executions one second apart, so any 60 second
        // sliding window holds at most 60 of them.
        let queue = ScanQueue::start(runner.clone(), 60);

        for i in 0..3 {
            queue.submit(ScanTask::guild(format!("p{}", i)));
        }
        drain(&queue).await;

        let stamps = runner.stamps.lock().unwrap().clone();
        assert_eq!(stamps.len(), 3);
        for pair in stamps.windows(2) {
            assert!(
                pair[1] - pair[0] >= Duration::from_millis(800),
                "executions closer than the per-window spacing allows"
            );
        }
    }
}
