use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, info};

/// Execution events emitted by the engine.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted { subjects: usize, threads: usize },
    SubjectFinished {
        subject: String,
        diagnostics: usize,
        dropped: bool,
    },
    RunFinished {
        elapsed: Duration,
        metrics: ExecutionMetricsSnapshot,
    },
}

/// Observer hook for execution events.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Logs execution events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingExecutionObserver;

impl ExecutionObserver for TracingExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunStarted { subjects, threads } => {
                info!(subjects, threads, "mapping run started");
            }
            ExecutionEvent::SubjectFinished {
                subject,
                diagnostics,
                dropped,
            } => {
                debug!(subject = %subject, diagnostics, dropped, "subject mapped");
            }
            ExecutionEvent::RunFinished { metrics, .. } => {
                info!(%metrics, "mapping run finished");
            }
        }
    }
}

/// Real-time metrics for a mapping run.
///
/// The engine updates these counters while subjects are evaluated; callers can snapshot them at
/// any time.
pub struct ExecutionMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    subjects_processed: AtomicU64,
    subjects_dropped: AtomicU64,
    diagnostics: AtomicU64,

    active_subjects: AtomicUsize,
    max_active_subjects: AtomicUsize,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            subjects_processed: AtomicU64::new(0),
            subjects_dropped: AtomicU64::new(0),
            diagnostics: AtomicU64::new(0),
            active_subjects: AtomicUsize::new(0),
            max_active_subjects: AtomicUsize::new(0),
        }
    }

    pub fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);

        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.subjects_processed.store(0, Ordering::SeqCst);
        self.subjects_dropped.store(0, Ordering::SeqCst);
        self.diagnostics.store(0, Ordering::SeqCst);
        self.active_subjects.store(0, Ordering::SeqCst);
        self.max_active_subjects.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub fn on_subject_start(&self) {
        let now = self.active_subjects.fetch_add(1, Ordering::SeqCst) + 1;
        update_max_usize(&self.max_active_subjects, now);
    }

    pub fn on_subject_end(&self, diagnostics: usize, dropped: bool) {
        let _ = self.subjects_processed.fetch_add(1, Ordering::SeqCst);
        let _ = self.diagnostics.fetch_add(diagnostics as u64, Ordering::SeqCst);
        if dropped {
            let _ = self.subjects_dropped.fetch_add(1, Ordering::SeqCst);
        }
        let _ = self.active_subjects.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        let elapsed = if elapsed_ns > 0 {
            Some(Duration::from_nanos(elapsed_ns))
        } else {
            None
        };

        ExecutionMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed,
            subjects_processed: self.subjects_processed.load(Ordering::SeqCst),
            subjects_dropped: self.subjects_dropped.load(Ordering::SeqCst),
            diagnostics: self.diagnostics.load(Ordering::SeqCst),
            max_active_subjects: self.max_active_subjects.load(Ordering::SeqCst),
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn update_max_usize(dst: &AtomicUsize, now: usize) {
    loop {
        let cur = dst.load(Ordering::SeqCst);
        if now <= cur {
            break;
        }
        if dst
            .compare_exchange(cur, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            break;
        }
    }
}

/// Immutable snapshot of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub subjects_processed: u64,
    pub subjects_dropped: u64,
    pub diagnostics: u64,
    pub max_active_subjects: usize,
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, subjects={}, dropped={}, diagnostics={}, max_active_subjects={}, elapsed={:?}",
            self.run_id,
            self.subjects_processed,
            self.subjects_dropped,
            self.diagnostics,
            self.max_active_subjects,
            self.elapsed
        )
    }
}
