//! Fixtures and fakes shared by the unit tests

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use weld_core::domain::parameter::ParameterSet;
use weld_core::domain::project::{
    Application, Environment, Project, RepositoryStrategy, Variable, VcsServer,
};
use weld_core::domain::run::{Artifact, VcsInfo, WorkflowNodeRun, WorkflowRun};
use weld_core::domain::status::Status;
use weld_core::domain::user::{PermissionLevel, User};
use weld_core::domain::vcs::{CommitStatus, PullRequest, StatusEvent};
use weld_core::domain::workflow::{
    Node, NodeContext, Pipeline, PipelineJob, PipelineStage, Workflow,
};

use crate::gateway::object_store::{ObjectStore, ObjectStoreError};
use crate::gateway::vcs::{VcsClient, VcsError, VcsProvider};
use crate::gateway::{EventPublisher, PermissionChecker};
use crate::repository::{MemoryStore, Store, StoreError, Transaction};
use crate::Orchestrator;

/// Installs a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weld_orchestrator=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn project() -> Project {
    Project {
        key: "PROJ".to_string(),
        name: "Project".to_string(),
        variables: vec![Variable::new("foo", "bar")],
        vcs_servers: vec![VcsServer {
            name: "github".to_string(),
            url: "https://github.test".to_string(),
        }],
    }
}

pub fn app1() -> Application {
    Application {
        name: "app1".to_string(),
        variables: vec![Variable::new("app.port", "8080")],
        repository_strategy: RepositoryStrategy {
            connection_type: "ssh".to_string(),
            ssh_key: "proj-ssh".to_string(),
            default_branch: "master".to_string(),
            ..Default::default()
        },
        vcs_server: "github".to_string(),
        repository_fullname: "org/app1".to_string(),
        deployment_strategies: BTreeMap::new(),
    }
}

pub fn prod() -> Environment {
    Environment {
        name: "prod".to_string(),
        variables: vec![Variable::new("env.url", "https://prod.test")],
    }
}

fn pipelines() -> BTreeMap<i64, Pipeline> {
    let build = Pipeline {
        id: 1,
        name: "build".to_string(),
        parameters: vec![],
        stages: vec![
            PipelineStage {
                name: "compile".to_string(),
                jobs: vec![PipelineJob {
                    name: "make".to_string(),
                    steps: vec!["checkout".to_string(), "make all".to_string()],
                }],
            },
            PipelineStage {
                name: "package".to_string(),
                jobs: vec![PipelineJob {
                    name: "tarball".to_string(),
                    steps: vec!["tar".to_string()],
                }],
            },
        ],
    };
    let deploy = Pipeline {
        id: 2,
        name: "deploy".to_string(),
        parameters: vec![],
        stages: vec![PipelineStage {
            name: "rollout".to_string(),
            jobs: vec![PipelineJob {
                name: "apply".to_string(),
                steps: vec!["kubectl apply".to_string()],
            }],
        }],
    };
    BTreeMap::from([(1, build), (2, deploy)])
}

/// build(1) -> deploy(2, env prod)
///          -> lint(3)
pub fn workflow() -> Workflow {
    let with_app = |id: i64, name: &str, pipeline_id: i64, children: Vec<i64>| Node {
        id,
        name: name.to_string(),
        pipeline_id,
        context: NodeContext {
            application: Some(app1()),
            ..Default::default()
        },
        children,
        hooks: vec![],
    };

    let mut deploy = with_app(2, "deploy", 2, vec![]);
    deploy.context.environment = Some(prod());

    Workflow {
        id: 1,
        name: "wf".to_string(),
        project_key: "PROJ".to_string(),
        root_id: 1,
        nodes: vec![with_app(1, "build", 1, vec![2, 3]), deploy, with_app(3, "lint", 1, vec![])],
        pipelines: pipelines(),
    }
}

pub fn run(workflow: Workflow, number: u64) -> WorkflowRun {
    WorkflowRun::new(workflow, number)
}

/// Node run of run #1 on a node of [`workflow`]
pub fn node_run(id: i64, node_id: i64, sub_number: u64, status: Status) -> WorkflowNodeRun {
    let node_name = match node_id {
        1 => "build".to_string(),
        2 => "deploy".to_string(),
        3 => "lint".to_string(),
        other => format!("node-{}", other),
    };
    WorkflowNodeRun {
        id,
        workflow_run_id: 0,
        workflow_id: 1,
        node_id,
        node_name,
        number: 1,
        sub_number,
        status,
        start: Utc::now(),
        done: None,
        manual: None,
        hook_event: None,
        payload: serde_json::Value::Null,
        pipeline_parameters: vec![],
        build_parameters: ParameterSet::new(),
        source_node_runs: vec![],
        vcs: VcsInfo {
            server: "github".to_string(),
            repository: "org/app1".to_string(),
            branch: "main".to_string(),
            hash: "abc123".to_string(),
            tag: String::new(),
        },
        stages: vec![],
        artifacts: vec![],
    }
}

pub fn artifact(id: i64, name: &str) -> Artifact {
    Artifact {
        id,
        name: name.to_string(),
        tag: String::new(),
        size: 4,
        md5sum: String::new(),
        object_path: format!("PROJ/wf/{}", name),
        temp_url: None,
    }
}

pub fn user() -> User {
    User::new("alice").with_environment_permission("PROJ", "prod", PermissionLevel::ReadExecute)
}

/// Orchestrator over `store` with fake collaborators
pub fn orchestrator(store: &MemoryStore) -> (Orchestrator, FakeVcs, Arc<RecordingPublisher>) {
    let vcs = FakeVcs::default();
    let events = Arc::new(RecordingPublisher::default());
    let orch = Orchestrator::new(
        Arc::new(store.clone()),
        Arc::new(vcs.clone()),
        Arc::new(FakeObjectStore::default()),
    )
    .with_events(events.clone());
    (orch, vcs, events)
}

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
pub struct FakeVcsState {
    pub statuses: Mutex<Vec<CommitStatus>>,
    pub published: Mutex<Vec<StatusEvent>>,
    pub pull_requests: Mutex<Vec<PullRequest>>,
    pub comments: Mutex<Vec<(String, i64, String)>>,
    pub fail_client: AtomicBool,
    pub fail_set_status: AtomicBool,
    pub fail_comments: AtomicBool,
}

/// VCS provider and client recording every call
#[derive(Clone, Default)]
pub struct FakeVcs {
    pub state: Arc<FakeVcsState>,
}

impl FakeVcs {
    pub fn with_status(&self, description: &str, state: &str) {
        self.state.statuses.lock().push(CommitStatus {
            reference: "abc123".to_string(),
            description: description.to_string(),
            state: state.to_string(),
        });
    }

    pub fn published(&self) -> Vec<StatusEvent> {
        self.state.published.lock().clone()
    }

    pub fn comments(&self) -> Vec<(String, i64, String)> {
        self.state.comments.lock().clone()
    }
}

#[async_trait]
impl VcsClient for FakeVcs {
    async fn list_statuses(
        &self,
        _repository: &str,
        reference: &str,
    ) -> Result<Vec<CommitStatus>, VcsError> {
        Ok(self
            .state
            .statuses
            .lock()
            .iter()
            .filter(|s| s.reference == reference)
            .cloned()
            .collect())
    }

    async fn set_status(&self, event: &StatusEvent) -> Result<(), VcsError> {
        if self.state.fail_set_status.load(Ordering::SeqCst) {
            return Err(VcsError::api_error(502, "bad gateway"));
        }
        self.state.published.lock().push(event.clone());
        Ok(())
    }

    async fn pull_requests(&self, _repository: &str) -> Result<Vec<PullRequest>, VcsError> {
        Ok(self.state.pull_requests.lock().clone())
    }

    async fn pull_request_comment(
        &self,
        repository: &str,
        pull_request_id: i64,
        text: &str,
    ) -> Result<(), VcsError> {
        if self.state.fail_comments.load(Ordering::SeqCst) {
            return Err(VcsError::RequestFailed("connection reset".to_string()));
        }
        self.state
            .comments
            .lock()
            .push((repository.to_string(), pull_request_id, text.to_string()));
        Ok(())
    }
}

#[async_trait]
impl VcsProvider for FakeVcs {
    async fn client(&self, server: &VcsServer) -> Result<Arc<dyn VcsClient>, VcsError> {
        if self.state.fail_client.load(Ordering::SeqCst) {
            return Err(VcsError::Unauthorized(server.name.clone()));
        }
        Ok(Arc::new(self.clone()))
    }
}

/// Event publisher keeping what it was given
#[derive(Default)]
pub struct RecordingPublisher {
    /// (run id, run number)
    pub runs: Mutex<Vec<(i64, u64)>>,
    /// (node run id, previous node run id)
    pub node_runs: Mutex<Vec<(i64, Option<i64>)>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_run(&self, run: &WorkflowRun, _project_key: &str) {
        self.runs.lock().push((run.id, run.number));
    }

    async fn publish_node_run(
        &self,
        node_run: &WorkflowNodeRun,
        _workflow: &Workflow,
        previous: Option<&WorkflowNodeRun>,
    ) {
        self.node_runs
            .lock()
            .push((node_run.id, previous.map(|p| p.id)));
    }
}

/// Denies execution on the listed environments, allows everything else
pub struct DenyEnvironments(pub Vec<String>);

#[async_trait]
impl PermissionChecker for DenyEnvironments {
    async fn access_to_environment(
        &self,
        _project_key: &str,
        environment: &str,
        _actor: &User,
        _level: PermissionLevel,
    ) -> bool {
        !self.0.iter().any(|e| e == environment)
    }
}

/// Object store serving fixed contents keyed by object path
#[derive(Default)]
pub struct FakeObjectStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub no_temp_urls: AtomicBool,
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn fetch(&self, artifact: &Artifact) -> Result<Vec<u8>, ObjectStoreError> {
        self.objects
            .lock()
            .get(&artifact.object_path)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(artifact.object_path.clone()))
    }

    async fn fetch_temp_url(&self, artifact: &Artifact) -> Result<String, ObjectStoreError> {
        if self.no_temp_urls.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::TempUrlUnsupported);
        }
        Ok(format!("https://objects.test/{}", artifact.object_path))
    }
}

#[derive(Default)]
struct Faults {
    node_run_updates: AtomicUsize,
    fail_node_run_update_at: AtomicUsize,
    commits: AtomicUsize,
    fail_commit_at: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl Faults {
    /// Counts a call and tells whether it is the one to fail (1-based, 0 never fails)
    fn hit(counter: &AtomicUsize, fail_at: &AtomicUsize) -> bool {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        call == fail_at.load(Ordering::SeqCst)
    }
}

/// Store delegating to a [`MemoryStore`] that fails chosen calls
#[derive(Clone)]
pub struct FailingStore {
    inner: MemoryStore,
    faults: Arc<Faults>,
}

impl FailingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Fails the n-th `update_node_run`, counted across transactions
    pub fn fail_node_run_update_at(&self, n: usize) {
        self.faults.fail_node_run_update_at.store(n, Ordering::SeqCst);
    }

    /// Fails the n-th commit, counted across transactions
    pub fn fail_commit_at(&self, n: usize) {
        self.faults.fail_commit_at.store(n, Ordering::SeqCst);
    }

    pub fn rollbacks(&self) -> usize {
        self.faults.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        Ok(Box::new(FailingTransaction {
            inner: self.inner.begin().await?,
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct FailingTransaction {
    inner: Box<dyn Transaction>,
    faults: Arc<Faults>,
}

#[async_trait]
impl Transaction for FailingTransaction {
    async fn load_run(
        &mut self,
        project_key: &str,
        workflow_name: &str,
        number: u64,
    ) -> Result<WorkflowRun, StoreError> {
        self.inner.load_run(project_key, workflow_name, number).await
    }

    async fn load_run_by_id(&mut self, id: i64) -> Result<WorkflowRun, StoreError> {
        self.inner.load_run_by_id(id).await
    }

    async fn load_node_run_by_id(&mut self, id: i64) -> Result<WorkflowNodeRun, StoreError> {
        self.inner.load_node_run_by_id(id).await
    }

    async fn load_previous_node_run(
        &mut self,
        node_run: &WorkflowNodeRun,
    ) -> Result<Option<WorkflowNodeRun>, StoreError> {
        self.inner.load_previous_node_run(node_run).await
    }

    async fn next_run_number(
        &mut self,
        project_key: &str,
        workflow_name: &str,
    ) -> Result<u64, StoreError> {
        self.inner.next_run_number(project_key, workflow_name).await
    }

    async fn next_sub_number(&mut self, run_id: i64) -> Result<u64, StoreError> {
        self.inner.next_sub_number(run_id).await
    }

    async fn insert_run(&mut self, run: &mut WorkflowRun) -> Result<(), StoreError> {
        self.inner.insert_run(run).await
    }

    async fn update_run(&mut self, run: &WorkflowRun) -> Result<(), StoreError> {
        self.inner.update_run(run).await
    }

    async fn insert_node_run(&mut self, node_run: &mut WorkflowNodeRun) -> Result<(), StoreError> {
        self.inner.insert_node_run(node_run).await
    }

    async fn update_node_run(&mut self, node_run: &WorkflowNodeRun) -> Result<(), StoreError> {
        let faults = &self.faults;
        if Faults::hit(&faults.node_run_updates, &faults.fail_node_run_update_at) {
            return Err(StoreError::Backend("node run update failed".to_string()));
        }
        self.inner.update_node_run(node_run).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let FailingTransaction { inner, faults } = *self;
        if Faults::hit(&faults.commits, &faults.fail_commit_at) {
            return Err(StoreError::Backend("commit failed".to_string()));
        }
        inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.faults.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback().await
    }
}
