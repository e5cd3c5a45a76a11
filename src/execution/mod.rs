//! Execution engine for mapping many subjects with configurable parallelism.
//!
//! This module sits "above" [`crate::evaluate`] and provides:
//!
//! - sequential or thread-pool evaluation of subjects, output always in subject order
//! - real-time metrics + observer hooks for monitoring

mod observer;

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{EtlError, EtlResult};
use crate::evaluate::{Evaluator, SubjectOutcome};

pub use observer::{
    ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver, TracingExecutionObserver,
};

/// Configuration for the [`ExecutionEngine`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Number of worker threads.
    ///
    /// If `None`, subjects are evaluated one at a time on the calling thread.
    pub num_threads: Option<usize>,
}

impl ExecutionOptions {
    pub fn sequential() -> Self {
        Self { num_threads: None }
    }

    pub fn threads(n: usize) -> Self {
        Self { num_threads: Some(n) }
    }
}

/// Runs an [`Evaluator`] over a list of subjects.
pub struct ExecutionEngine {
    pool: Option<ThreadPool>,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl ExecutionEngine {
    /// Create a new engine with the given options.
    pub fn new(opts: ExecutionOptions) -> EtlResult<Self> {
        let pool = match opts.num_threads {
            None => None,
            Some(0) => return Err(EtlError::config("num_threads must be > 0 when set")),
            Some(n) => Some(
                ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("clinical-etl-{i}"))
                    .build()
                    .map_err(|e| EtlError::config(format!("failed to build thread pool: {e}")))?,
            ),
        };

        Ok(Self {
            pool,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for execution events (metrics/logging).
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn threads(&self) -> usize {
        self.pool.as_ref().map_or(1, ThreadPool::current_num_threads)
    }

    /// Evaluate `subjects` and return their outcomes in the same order.
    ///
    /// The first fatal error stops the run.
    pub fn run(&self, evaluator: &Evaluator<'_>, subjects: &[String]) -> EtlResult<Vec<SubjectOutcome>> {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(ExecutionEvent::RunStarted {
            subjects: subjects.len(),
            threads: self.threads(),
        });

        let outcomes = match &self.pool {
            Some(pool) => pool.install(|| {
                subjects
                    .par_iter()
                    .map(|s| self.evaluate_one(evaluator, s))
                    .collect::<EtlResult<Vec<_>>>()
            }),
            None => subjects
                .iter()
                .map(|s| self.evaluate_one(evaluator, s))
                .collect::<EtlResult<Vec<_>>>(),
        }?;

        self.metrics.end_run(start.elapsed());
        self.emit(ExecutionEvent::RunFinished {
            elapsed: start.elapsed(),
            metrics: self.metrics.snapshot(),
        });
        Ok(outcomes)
    }

    fn evaluate_one(&self, evaluator: &Evaluator<'_>, subject: &str) -> EtlResult<SubjectOutcome> {
        self.metrics.on_subject_start();
        let outcome = evaluator.evaluate(subject);
        let (diagnostics, dropped) = match &outcome {
            Ok(o) => (o.diagnostics.len(), o.packet.is_none()),
            Err(_) => (0, true),
        };
        self.metrics.on_subject_end(diagnostics, dropped);
        self.emit(ExecutionEvent::SubjectFinished {
            subject: subject.to_string(),
            diagnostics,
            dropped,
        });
        outcome
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutionEngine, ExecutionOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::consolidate::consolidate;
    use crate::error::EtlError;
    use crate::evaluate::Evaluator;
    use crate::execution::{ExecutionEvent, ExecutionObserver};
    use crate::functions::FunctionRegistry;
    use crate::template::{compile, Template};
    use crate::types::{IndexedData, Sheet};

    fn data_of_n(n: usize) -> IndexedData {
        let ids: Vec<String> = (0..n).map(|i| format!("S{i:03}")).collect();
        let sites: Vec<String> = (0..n).map(|i| format!("site-{i}")).collect();
        let rows: Vec<[&str; 2]> = ids
            .iter()
            .zip(&sites)
            .map(|(id, site)| [id.as_str(), site.as_str()])
            .collect();
        let rows: Vec<&[&str]> = rows.iter().map(|r| r.as_slice()).collect();
        consolidate(&[Sheet::from_strs("Donor", &["id", "site"], &rows)], "id").unwrap()
    }

    #[derive(Default)]
    struct CountingObserver {
        finished: AtomicUsize,
        runs: AtomicUsize,
    }

    impl ExecutionObserver for CountingObserver {
        fn on_event(&self, event: &ExecutionEvent) {
            match event {
                ExecutionEvent::SubjectFinished { .. } => {
                    let _ = self.finished.fetch_add(1, Ordering::SeqCst);
                }
                ExecutionEvent::RunFinished { .. } => {
                    let _ = self.runs.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn parallel_run_matches_sequential_order() {
        let data = data_of_n(200);
        let template = Template::parse("site, {single_val(site)}").unwrap();
        let scaffold = compile(&template, &FunctionRegistry::with_builtins()).unwrap();
        let evaluator = Evaluator::new(&scaffold, &data);

        let sequential = ExecutionEngine::new(ExecutionOptions::sequential())
            .unwrap()
            .run(&evaluator, &data.subjects)
            .unwrap();
        let parallel = ExecutionEngine::new(ExecutionOptions::threads(4))
            .unwrap()
            .run(&evaluator, &data.subjects)
            .unwrap();

        assert_eq!(sequential, parallel);
        assert_eq!(parallel[17].subject, "S017");
        assert_eq!(parallel[17].packet.as_ref().unwrap()["site"], "site-17");
    }

    #[test]
    fn metrics_and_events_are_reported() {
        let data = data_of_n(30);
        let template = Template::parse("site, {date(site)}").unwrap();
        let scaffold = compile(&template, &FunctionRegistry::with_builtins()).unwrap();
        let evaluator = Evaluator::new(&scaffold, &data);

        let observer = Arc::new(CountingObserver::default());
        let obs_trait: Arc<dyn ExecutionObserver> = observer.clone();
        let engine = ExecutionEngine::new(ExecutionOptions::threads(2))
            .unwrap()
            .with_observer(obs_trait);
        let metrics = engine.metrics();

        let outcomes = engine.run(&evaluator, &data.subjects).unwrap();
        assert_eq!(outcomes.len(), 30);

        let snap = metrics.snapshot();
        assert_eq!(snap.run_id, 1);
        assert_eq!(snap.subjects_processed, 30);
        assert_eq!(snap.subjects_dropped, 0);
        assert_eq!(snap.diagnostics, 30);
        assert!(snap.max_active_subjects >= 1);
        assert!(snap.elapsed.is_some());
        assert_eq!(observer.finished.load(Ordering::SeqCst), 30);
        assert_eq!(observer.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_threads_is_a_config_error() {
        assert!(matches!(
            ExecutionEngine::new(ExecutionOptions::threads(0)),
            Err(EtlError::Config { .. })
        ));
    }
}
