//! Artifact Service
//!
//! Lists and downloads the artifacts produced by the latest node runs of a
//! run. Listing is best effort on temporary URLs; downloading fails loudly.

use std::sync::Arc;
use tokio::task::JoinSet;
use weld_core::domain::run::{Artifact, WorkflowRun};

use crate::Orchestrator;
use crate::error::{Error, Result, ResultExt};
use crate::gateway::ObjectStore;

/// Artifacts of the latest node run of every node
///
/// Temporary URLs are fetched concurrently; an artifact whose URL cannot be
/// fetched is returned without one.
pub async fn run_artifacts(orch: &Orchestrator, run: &WorkflowRun) -> Vec<Artifact> {
    let mut artifacts: Vec<Artifact> = run
        .latest_node_runs()
        .flat_map(|nr| nr.artifacts.iter().cloned())
        .collect();

    let mut tasks = JoinSet::new();
    for (index, artifact) in artifacts.iter().enumerate() {
        let objects: Arc<dyn ObjectStore> = Arc::clone(&orch.objects);
        let artifact = artifact.clone();
        tasks.spawn(async move { (index, objects.fetch_temp_url(&artifact).await) });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(url))) => {
                if let Some(artifact) = artifacts.get_mut(index) {
                    artifact.temp_url = Some(url);
                }
            }
            Ok((index, Err(err))) => {
                let name = artifacts.get(index).map(|a| a.name.as_str()).unwrap_or("?");
                tracing::warn!("No temporary URL for artifact {}: {}", name, err);
            }
            Err(err) => tracing::error!("Temporary URL task failed: {}", err),
        }
    }

    artifacts
}

/// Downloads one artifact of the latest node runs of `run`
pub async fn fetch_artifact(
    orch: &Orchestrator,
    run: &WorkflowRun,
    artifact_id: i64,
) -> Result<(Artifact, Vec<u8>)> {
    let artifact = run
        .latest_node_runs()
        .flat_map(|nr| nr.artifacts.iter())
        .find(|a| a.id == artifact_id)
        .cloned()
        .ok_or(Error::ArtifactNotFound(artifact_id))?;

    let content = orch
        .objects
        .fetch(&artifact)
        .await
        .with_context(|| format!("fetch artifact {}", artifact.name))?;

    tracing::debug!("Artifact {} fetched ({} bytes)", artifact.name, content.len());
    Ok((artifact, content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::repository::MemoryStore;
    use crate::test_support::{self, FakeObjectStore};
    use std::sync::atomic::Ordering;
    use weld_core::domain::status::Status;

    fn orchestrator(objects: Arc<FakeObjectStore>) -> Orchestrator {
        let (orch, _, _) = test_support::orchestrator(&MemoryStore::new());
        Orchestrator {
            objects,
            ..orch
        }
    }

    fn run_with_artifacts() -> WorkflowRun {
        let mut run = test_support::run(test_support::workflow(), 1);

        let mut old_build = test_support::node_run(1, 1, 0, Status::Fail);
        old_build.artifacts.push(test_support::artifact(1, "old.tar"));
        run.push_node_run(old_build);

        let mut build = test_support::node_run(2, 1, 1, Status::Success);
        build.artifacts.push(test_support::artifact(2, "app.tar"));
        build.artifacts.push(test_support::artifact(3, "app.sha"));
        run.push_node_run(build);

        let mut lint = test_support::node_run(3, 3, 0, Status::Success);
        lint.artifacts.push(test_support::artifact(4, "lint.xml"));
        run.push_node_run(lint);
        run
    }

    #[tokio::test]
    async fn test_run_artifacts_lists_latest_node_runs_with_urls() {
        let orch = orchestrator(Arc::new(FakeObjectStore::default()));

        let artifacts = run_artifacts(&orch, &run_with_artifacts()).await;

        let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["app.tar", "app.sha", "lint.xml"]);
        assert_eq!(
            artifacts[0].temp_url.as_deref(),
            Some("https://objects.test/PROJ/wf/app.tar")
        );
        assert!(artifacts.iter().all(|a| a.temp_url.is_some()));
    }

    #[tokio::test]
    async fn test_run_artifacts_without_temp_urls() {
        let objects = Arc::new(FakeObjectStore::default());
        objects.no_temp_urls.store(true, Ordering::SeqCst);
        let orch = orchestrator(objects);

        let artifacts = run_artifacts(&orch, &run_with_artifacts()).await;
        assert_eq!(artifacts.len(), 3);
        assert!(artifacts.iter().all(|a| a.temp_url.is_none()));
    }

    #[tokio::test]
    async fn test_fetch_artifact() {
        let objects = Arc::new(FakeObjectStore::default());
        objects
            .objects
            .lock()
            .insert("PROJ/wf/app.tar".to_string(), b"data".to_vec());
        let orch = orchestrator(objects);
        let run = run_with_artifacts();

        let (artifact, content) = fetch_artifact(&orch, &run, 2).await.unwrap();
        assert_eq!(artifact.name, "app.tar");
        assert_eq!(content, b"data");

        // superseded by a later sub-run
        let err = fetch_artifact(&orch, &run, 1).await.unwrap_err();
        assert!(matches!(err, Error::ArtifactNotFound(1)));

        // known artifact, missing object
        let err = fetch_artifact(&orch, &run, 4).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);
    }
}
