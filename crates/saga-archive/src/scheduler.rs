use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::archiver::ArchiveRunner;
use crate::SharedStream;

/// Per-session archive scheduling.
///
/// Rule: at most one run in flight per session. A request that arrives while
/// a run is active sets a pending flag; the active run loops once more when
/// it finishes. Callers never wait: scheduling is a synchronous flag-or-spawn
/// and the run itself is a detached task that owns its stream reference.
pub struct ArchiveScheduler {
    runner: Arc<dyn ArchiveRunner>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    pending: DashMap<String, Arc<AtomicBool>>,
}

impl ArchiveScheduler {
    pub fn new(runner: Arc<dyn ArchiveRunner>) -> Self {
        Self {
            runner,
            locks: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Request an archive run for `session`. Returns immediately.
    pub fn schedule(&self, user: &str, session: &str, stream: SharedStream) {
        let lock = self
            .locks
            .entry(session.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let pending = self
            .pending
            .entry(session.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone();

        let guard = match lock.try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                // A run is in flight; it will loop once more on completion.
                pending.store(true, Ordering::SeqCst);
                debug!(session = %session, "archive run in flight, coalescing");
                return;
            }
        };

        let runner = Arc::clone(&self.runner);
        let user = user.to_string();
        let session = session.to_string();
        tokio::spawn(async move {
            let _guard = guard;
            loop {
                pending.store(false, Ordering::SeqCst);
                if let Err(e) = runner.run(&stream, &user, &session).await {
                    warn!(error = %e, session = %session, "archive run failed");
                }
                if !pending.load(Ordering::SeqCst) {
                    break;
                }
            }
        });
    }

    /// Whether no archive run is currently active for `session`.
    pub fn is_idle(&self, session: &str) -> bool {
        match self.locks.get(session) {
            Some(lock) => lock.try_lock().is_ok(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use saga_stream::MessageStream;

    use crate::archiver::ArchiveOutcome;
    use crate::error::Result;

    struct CountingRunner {
        runs: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl ArchiveRunner for CountingRunner {
        async fn run(
            &self,
            _stream: &SharedStream,
            _user: &str,
            _session: &str,
        ) -> Result<Option<ArchiveOutcome>> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(None)
        }
    }

    fn shared_stream() -> SharedStream {
        Arc::new(Mutex::new(MessageStream::new("sess_1", 100)))
    }

    async fn wait_idle(scheduler: &ArchiveScheduler, session: &str) {
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if scheduler.is_idle(session) {
                return;
            }
        }
        panic!("scheduler never went idle");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn burst_collapses_to_at_most_two_runs() {
        let runner = Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
            delay: Duration::from_millis(30),
        });
        let scheduler = ArchiveScheduler::new(runner.clone());
        let stream = shared_stream();

        for _ in 0..5 {
            scheduler.schedule("u", "sess_1", stream.clone());
        }
        wait_idle(&scheduler, "sess_1").await;

        let runs = runner.runs.load(Ordering::SeqCst);
        assert!((1..=2).contains(&runs), "expected 1..=2 runs, got {runs}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pending_request_triggers_a_follow_up_run() {
        let runner = Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
            delay: Duration::from_millis(30),
        });
        let scheduler = ArchiveScheduler::new(runner.clone());
        let stream = shared_stream();

        scheduler.schedule("u", "sess_1", stream.clone());
        // Arrives while the first run is sleeping.
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.schedule("u", "sess_1", stream.clone());
        wait_idle(&scheduler, "sess_1").await;

        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sessions_schedule_independently() {
        let runner = Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
            delay: Duration::from_millis(10),
        });
        let scheduler = ArchiveScheduler::new(runner.clone());

        scheduler.schedule("u", "sess_a", shared_stream());
        scheduler.schedule("u", "sess_b", shared_stream());
        wait_idle(&scheduler, "sess_a").await;
        wait_idle(&scheduler, "sess_b").await;

        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn schedule_never_blocks_the_caller() {
        let runner = Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let scheduler = ArchiveScheduler::new(runner.clone());
        let stream = shared_stream();

        let started = std::time::Instant::now();
        scheduler.schedule("u", "sess_1", stream.clone());
        scheduler.schedule("u", "sess_1", stream);
        // Two schedules return well before the 200ms run completes.
        assert!(started.elapsed() < Duration::from_millis(100));
        wait_idle(&scheduler, "sess_1").await;
    }
}
