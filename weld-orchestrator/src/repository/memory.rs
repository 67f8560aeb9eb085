//! In-memory store
//!
//! Keeps runs and node runs in shared tables behind a lock. A transaction
//! stages its writes locally, reads its own staged rows before the shared
//! ones, and applies everything at once on commit.
//!
//! Run numbers and sub-numbers are handed out like database sequences: a
//! reservation is visible to every transaction immediately and is never
//! given back, even on rollback. A run row updated by a transaction after
//! another transaction committed a newer version of it fails the commit
//! with [`StoreError::Conflict`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use weld_core::domain::run::{WorkflowNodeRun, WorkflowRun};

use super::{Store, StoreError, Transaction};

type WorkflowKey = (String, String);

#[derive(Debug, Default, Clone)]
struct Tables {
    /// Run rows, without their node runs
    runs: BTreeMap<i64, WorkflowRun>,
    node_runs: BTreeMap<i64, WorkflowNodeRun>,
    run_numbers: HashMap<WorkflowKey, u64>,
}

/// Shared bookkeeping that lives outside transactions
#[derive(Debug, Default)]
struct Sequences {
    run_numbers: HashMap<WorkflowKey, u64>,
    sub_numbers: HashMap<i64, u64>,
    /// Committed version of every run row
    revisions: HashMap<i64, u64>,
}

/// Store keeping everything in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    sequences: Arc<Mutex<Sequences>>,
    ids: Arc<AtomicI64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed runs
    pub fn run_count(&self) -> usize {
        self.tables.lock().runs.len()
    }

    /// Number of committed node runs
    pub fn node_run_count(&self) -> usize {
        self.tables.lock().node_runs.len()
    }

    /// Last committed run number of a workflow
    pub fn last_run_number(&self, project_key: &str, workflow_name: &str) -> Option<u64> {
        self.tables
            .lock()
            .run_numbers
            .get(&(project_key.to_string(), workflow_name.to_string()))
            .copied()
    }

    /// Inserts a run and its node runs directly, outside any transaction
    ///
    /// IDs left at 0 are assigned; the stored copy is returned.
    pub fn seed(&self, mut run: WorkflowRun) -> WorkflowRun {
        if run.id == 0 {
            run.id = self.next_id();
        }
        let mut node_runs = std::mem::take(&mut run.node_runs);
        for runs in node_runs.values_mut() {
            for nr in runs.iter_mut() {
                if nr.id == 0 {
                    nr.id = self.next_id();
                }
                nr.workflow_run_id = run.id;
            }
        }

        let mut tables = self.tables.lock();
        let key = (run.project_key.clone(), run.workflow_name.clone());
        let last = tables.run_numbers.entry(key).or_default();
        *last = (*last).max(run.number);
        for nr in node_runs.values().flatten() {
            tables.node_runs.insert(nr.id, nr.clone());
        }
        tables.runs.insert(run.id, run.clone());
        drop(tables);
        *self.sequences.lock().revisions.entry(run.id).or_default() += 1;

        run.node_runs = node_runs;
        run
    }

    fn next_id(&self) -> i64 {
        self.ids.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: Tables::default(),
            read_revisions: HashMap::new(),
        }))
    }
}

/// Transaction over a [`MemoryStore`]
pub struct MemoryTransaction {
    store: MemoryStore,
    staged: Tables,
    /// Version of every committed run row this transaction read
    read_revisions: HashMap<i64, u64>,
}

impl MemoryTransaction {
    fn run_row(&mut self, id: i64) -> Option<WorkflowRun> {
        if let Some(row) = self.staged.runs.get(&id) {
            return Some(row.clone());
        }
        let row = self.store.tables.lock().runs.get(&id).cloned()?;
        let revision = self.store.sequences.lock().revisions.get(&id).copied().unwrap_or(0);
        self.read_revisions.entry(id).or_insert(revision);
        Some(row)
    }

    fn node_run_row(&self, id: i64) -> Option<WorkflowNodeRun> {
        self.staged
            .node_runs
            .get(&id)
            .cloned()
            .or_else(|| self.store.tables.lock().node_runs.get(&id).cloned())
    }

    /// Committed rows overlaid with staged rows, filtered by `keep`
    fn node_run_rows<F>(&self, keep: F) -> Vec<WorkflowNodeRun>
    where
        F: Fn(&WorkflowNodeRun) -> bool,
    {
        let mut rows: BTreeMap<i64, WorkflowNodeRun> = self
            .store
            .tables
            .lock()
            .node_runs
            .values()
            .filter(|nr| keep(nr))
            .map(|nr| (nr.id, nr.clone()))
            .collect();
        for nr in self.staged.node_runs.values().filter(|nr| keep(nr)) {
            rows.insert(nr.id, nr.clone());
        }
        rows.into_values().collect()
    }

    fn assemble(&self, mut run: WorkflowRun) -> WorkflowRun {
        run.node_runs.clear();
        for nr in self.node_run_rows(|nr| nr.workflow_run_id == run.id) {
            run.push_node_run(nr);
        }
        run
    }

    fn find_run_id(&self, project_key: &str, workflow_name: &str, number: u64) -> Option<i64> {
        let matches = |r: &WorkflowRun| {
            r.project_key == project_key && r.workflow_name == workflow_name && r.number == number
        };
        self.staged
            .runs
            .values()
            .find(|r| matches(r))
            .map(|r| r.id)
            .or_else(|| {
                self.store
                    .tables
                    .lock()
                    .runs
                    .values()
                    .find(|r| matches(r))
                    .map(|r| r.id)
            })
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn load_run(
        &mut self,
        project_key: &str,
        workflow_name: &str,
        number: u64,
    ) -> Result<WorkflowRun, StoreError> {
        let run = self
            .find_run_id(project_key, workflow_name, number)
            .and_then(|id| self.run_row(id))
            .ok_or_else(|| {
                StoreError::NotFound(format!("run {}/{}#{}", project_key, workflow_name, number))
            })?;
        Ok(self.assemble(run))
    }

    async fn load_run_by_id(&mut self, id: i64) -> Result<WorkflowRun, StoreError> {
        let run = self
            .run_row(id)
            .ok_or_else(|| StoreError::NotFound(format!("run {}", id)))?;
        Ok(self.assemble(run))
    }

    async fn load_node_run_by_id(&mut self, id: i64) -> Result<WorkflowNodeRun, StoreError> {
        self.node_run_row(id)
            .ok_or_else(|| StoreError::NotFound(format!("node run {}", id)))
    }

    async fn load_previous_node_run(
        &mut self,
        node_run: &WorkflowNodeRun,
    ) -> Result<Option<WorkflowNodeRun>, StoreError> {
        let previous = self
            .node_run_rows(|nr| {
                nr.workflow_id == node_run.workflow_id
                    && nr.node_id == node_run.node_id
                    && nr.number < node_run.number
            })
            .into_iter()
            .max_by(|a, b| {
                a.number
                    .cmp(&b.number)
                    .then(a.sub_number.cmp(&b.sub_number))
                    .then(a.id.cmp(&b.id))
            });
        Ok(previous)
    }

    async fn next_run_number(
        &mut self,
        project_key: &str,
        workflow_name: &str,
    ) -> Result<u64, StoreError> {
        let key = (project_key.to_string(), workflow_name.to_string());
        let committed = self
            .store
            .tables
            .lock()
            .run_numbers
            .get(&key)
            .copied()
            .unwrap_or(0);

        let mut sequences = self.store.sequences.lock();
        let reserved = sequences.run_numbers.entry(key.clone()).or_default();
        *reserved = (*reserved).max(committed) + 1;
        let number = *reserved;
        drop(sequences);

        let staged = self.staged.run_numbers.entry(key).or_default();
        *staged = (*staged).max(number);
        Ok(number)
    }

    async fn next_sub_number(&mut self, run_id: i64) -> Result<u64, StoreError> {
        let current = self
            .run_row(run_id)
            .map(|run| run.last_sub_number)
            .ok_or_else(|| StoreError::NotFound(format!("run {}", run_id)))?;

        let mut sequences = self.store.sequences.lock();
        let reserved = sequences.sub_numbers.entry(run_id).or_default();
        *reserved = (*reserved).max(current) + 1;
        Ok(*reserved)
    }

    async fn insert_run(&mut self, run: &mut WorkflowRun) -> Result<(), StoreError> {
        if self
            .find_run_id(&run.project_key, &run.workflow_name, run.number)
            .is_some()
        {
            return Err(StoreError::Conflict(format!(
                "run {}/{}#{} already exists",
                run.project_key, run.workflow_name, run.number
            )));
        }

        run.id = self.store.next_id();
        let mut row = run.clone();
        row.node_runs.clear();
        self.staged.runs.insert(row.id, row);
        Ok(())
    }

    async fn update_run(&mut self, run: &WorkflowRun) -> Result<(), StoreError> {
        if self.run_row(run.id).is_none() {
            return Err(StoreError::NotFound(format!("run {}", run.id)));
        }
        let mut row = run.clone();
        row.node_runs.clear();
        self.staged.runs.insert(row.id, row);
        Ok(())
    }

    async fn insert_node_run(&mut self, node_run: &mut WorkflowNodeRun) -> Result<(), StoreError> {
        if self.run_row(node_run.workflow_run_id).is_none() {
            return Err(StoreError::NotFound(format!(
                "run {}",
                node_run.workflow_run_id
            )));
        }
        node_run.id = self.store.next_id();
        self.staged.node_runs.insert(node_run.id, node_run.clone());
        Ok(())
    }

    async fn update_node_run(&mut self, node_run: &WorkflowNodeRun) -> Result<(), StoreError> {
        if self.node_run_row(node_run.id).is_none() {
            return Err(StoreError::NotFound(format!("node run {}", node_run.id)));
        }
        self.staged.node_runs.insert(node_run.id, node_run.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            store,
            staged,
            read_revisions,
        } = *self;
        let mut tables = store.tables.lock();
        let mut sequences = store.sequences.lock();

        for run in staged.runs.values() {
            let stale = read_revisions.get(&run.id).is_some_and(|read| {
                sequences.revisions.get(&run.id).copied().unwrap_or(0) != *read
            });
            if stale {
                return Err(StoreError::Conflict(format!(
                    "run {}/{}#{} was modified concurrently",
                    run.project_key, run.workflow_name, run.number
                )));
            }

            let duplicate = tables.runs.values().any(|r| {
                r.id != run.id
                    && r.project_key == run.project_key
                    && r.workflow_name == run.workflow_name
                    && r.number == run.number
            });
            if duplicate {
                return Err(StoreError::Conflict(format!(
                    "run {}/{}#{} already exists",
                    run.project_key, run.workflow_name, run.number
                )));
            }
        }

        for id in staged.runs.keys() {
            *sequences.revisions.entry(*id).or_default() += 1;
        }
        drop(sequences);

        for (key, number) in staged.run_numbers {
            let last = tables.run_numbers.entry(key).or_default();
            *last = (*last).max(number);
        }
        tables.runs.extend(staged.runs);
        tables.node_runs.extend(staged.node_runs);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use weld_core::domain::status::Status;

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let store = MemoryStore::new();
        let wf = test_support::workflow();

        let mut tx = store.begin().await.unwrap();
        let number = tx.next_run_number("PROJ", "wf").await.unwrap();
        let mut run = WorkflowRun::new(wf, number);
        tx.insert_run(&mut run).await.unwrap();

        let mut other = store.begin().await.unwrap();
        assert!(other.load_run("PROJ", "wf", number).await.is_err());
        assert!(tx.load_run("PROJ", "wf", number).await.is_ok());

        tx.commit().await.unwrap();
        assert_eq!(store.run_count(), 1);
        assert_eq!(store.last_run_number("PROJ", "wf"), Some(1));
        assert!(other.load_run("PROJ", "wf", number).await.is_ok());
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let store = MemoryStore::new();
        let run = store.seed(test_support::run(test_support::workflow(), 1));

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_run_number("PROJ", "wf").await.unwrap(), 2);
        let mut nr = test_support::node_run(0, 1, 1, Status::Building);
        nr.workflow_run_id = run.id;
        tx.insert_node_run(&mut nr).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.node_run_count(), 0);
        assert_eq!(store.last_run_number("PROJ", "wf"), Some(1));
    }

    #[tokio::test]
    async fn test_interleaved_transactions_get_distinct_run_numbers() {
        let store = MemoryStore::new();
        let wf = test_support::workflow();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let n1 = first.next_run_number("PROJ", "wf").await.unwrap();
        let n2 = second.next_run_number("PROJ", "wf").await.unwrap();
        assert_eq!((n1, n2), (1, 2));

        first.insert_run(&mut WorkflowRun::new(wf.clone(), n1)).await.unwrap();
        second.insert_run(&mut WorkflowRun::new(wf, n2)).await.unwrap();
        second.commit().await.unwrap();
        first.commit().await.unwrap();

        assert_eq!(store.run_count(), 2);
        assert_eq!(store.last_run_number("PROJ", "wf"), Some(2));
    }

    #[tokio::test]
    async fn test_rolled_back_run_number_is_not_reused() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_run_number("PROJ", "wf").await.unwrap(), 1);
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_run_number("PROJ", "wf").await.unwrap(), 2);
        assert_eq!(store.last_run_number("PROJ", "wf"), None);
    }

    #[tokio::test]
    async fn test_commit_rejects_duplicate_run_number() {
        let store = MemoryStore::new();
        let wf = test_support::workflow();

        let mut tx = store.begin().await.unwrap();
        tx.insert_run(&mut WorkflowRun::new(wf.clone(), 5)).await.unwrap();
        // committed by someone else in the meantime
        store.seed(test_support::run(wf, 5));

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.run_count(), 1);
    }

    #[tokio::test]
    async fn test_sub_numbers_are_reserved_across_transactions() {
        let store = MemoryStore::new();
        let mut run = test_support::run(test_support::workflow(), 1);
        run.last_sub_number = 2;
        let run = store.seed(run);

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert_eq!(first.next_sub_number(run.id).await.unwrap(), 3);
        assert_eq!(second.next_sub_number(run.id).await.unwrap(), 4);

        let err = first.next_sub_number(404).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stale_run_update_conflicts() {
        let store = MemoryStore::new();
        let run = store.seed(test_support::run(test_support::workflow(), 1));

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let mut a = first.load_run_by_id(run.id).await.unwrap();
        let mut b = second.load_run_by_id(run.id).await.unwrap();

        a.last_sub_number = 1;
        first.update_run(&a).await.unwrap();
        b.last_sub_number = 2;
        second.update_run(&b).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.load_run_by_id(run.id).await.unwrap().last_sub_number, 1);

        // a transaction reading the new version commits fine
        let mut third = store.begin().await.unwrap();
        let mut c = third.load_run_by_id(run.id).await.unwrap();
        c.last_sub_number = 3;
        third.update_run(&c).await.unwrap();
        third.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_load_run_assembles_node_runs() {
        let store = MemoryStore::new();
        let mut run = test_support::run(test_support::workflow(), 1);
        run.push_node_run(test_support::node_run(0, 1, 0, Status::Success));
        run.push_node_run(test_support::node_run(0, 2, 0, Status::Building));
        let run = store.seed(run);

        let mut tx = store.begin().await.unwrap();
        let loaded = tx.load_run_by_id(run.id).await.unwrap();
        assert_eq!(loaded.node_runs.len(), 2);
        assert_eq!(
            loaded.latest_node_run(2).map(|nr| nr.status),
            Some(Status::Building)
        );
    }

    #[tokio::test]
    async fn test_previous_node_run_comes_from_earlier_run() {
        let store = MemoryStore::new();
        let wf = test_support::workflow();

        let mut first = test_support::run(wf.clone(), 1);
        first.push_node_run(test_support::node_run(0, 1, 0, Status::Fail));
        let first = store.seed(first);

        let mut second = test_support::run(wf, 2);
        let mut current = test_support::node_run(0, 1, 0, Status::Building);
        current.number = 2;
        second.push_node_run(current);
        let second = store.seed(second);

        let mut tx = store.begin().await.unwrap();
        let current = second.latest_node_run(1).unwrap().clone();
        let previous = tx.load_previous_node_run(&current).await.unwrap().unwrap();
        assert_eq!(previous.workflow_run_id, first.id);
        assert_eq!(previous.status, Status::Fail);
    }
}
