//! Processor report
//!
//! Accumulates the runs and node runs touched by one orchestration operation,
//! plus the errors met along the way. A report is shared by reference between
//! concurrent branches; every mutation goes through the internal lock, so
//! branches never lose each other's updates.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use weld_core::domain::run::{WorkflowNodeRun, WorkflowRun};

use crate::error::Error;

#[derive(Debug, Default)]
struct Inner {
    runs: BTreeMap<i64, WorkflowRun>,
    node_runs: BTreeMap<i64, WorkflowNodeRun>,
    errors: Vec<Arc<Error>>,
}

/// Thread-safe accumulator of affected runs, node runs and errors
///
/// Runs and node runs are keyed by ID, so adding the same item twice keeps the
/// latest copy. Errors keep arrival order.
#[derive(Debug, Default)]
pub struct ProcessorReport {
    inner: Mutex<Inner>,
}

impl ProcessorReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_run(&self, run: &WorkflowRun) {
        self.inner.lock().runs.insert(run.id, run.clone());
    }

    pub fn add_node_run(&self, node_run: &WorkflowNodeRun) {
        self.inner
            .lock()
            .node_runs
            .insert(node_run.id, node_run.clone());
    }

    /// Records an error and returns the shared handle stored in the report
    pub fn add_error(&self, err: Error) -> Arc<Error> {
        let err = Arc::new(err);
        self.inner.lock().errors.push(Arc::clone(&err));
        err
    }

    /// Folds `other` into this report
    ///
    /// `other` is snapshotted before this report is locked, so merging a report
    /// into itself is harmless.
    pub fn merge(&self, other: &ProcessorReport) {
        let (runs, node_runs, errors) = {
            let other = other.inner.lock();
            (
                other.runs.values().cloned().collect::<Vec<_>>(),
                other.node_runs.values().cloned().collect::<Vec<_>>(),
                other.errors.clone(),
            )
        };

        let mut inner = self.inner.lock();
        for run in runs {
            inner.runs.insert(run.id, run);
        }
        for node_run in node_runs {
            inner.node_runs.insert(node_run.id, node_run);
        }
        inner.errors.extend(errors);
    }

    pub fn runs(&self) -> Vec<WorkflowRun> {
        self.inner.lock().runs.values().cloned().collect()
    }

    pub fn node_runs(&self) -> Vec<WorkflowNodeRun> {
        self.inner.lock().node_runs.values().cloned().collect()
    }

    /// Errors in the order they were reported
    pub fn errors(&self) -> Vec<Arc<Error>> {
        self.inner.lock().errors.clone()
    }

    /// First error reported, in arrival order
    pub fn first_error(&self) -> Option<Arc<Error>> {
        self.inner.lock().errors.first().cloned()
    }

    pub fn has_errors(&self) -> bool {
        !self.inner.lock().errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.runs.is_empty() && inner.node_runs.is_empty() && inner.errors.is_empty()
    }
}
