//! Parent Parameter Service
//!
//! A node run inherits the build parameters of the node runs that triggered
//! it, renamed under `workflow.<parent node>.`.

use std::collections::BTreeMap;
use weld_core::domain::parameter::Parameter;
use weld_core::domain::workflow::Workflow;

use crate::error::{Error, Result, ResultExt};
use crate::repository::Transaction;

/// Names that are regenerated by every node run
const SKIPPED_NAMES: [&str; 2] = ["cds.semver", "cds.release.version"];

const SKIPPED_PREFIXES: [&str; 6] = [
    "cds.proj",
    "workflow.",
    "cds.version",
    "cds.run.number",
    "cds.workflow",
    "job.requirement",
];

fn is_inheritable(name: &str) -> bool {
    !name.is_empty()
        && !SKIPPED_NAMES.contains(&name)
        && !SKIPPED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Filters and renames the parameters of one parent node run
///
/// Git parameters are kept even when the payload defines them, unless the
/// workflow has a single repository.
pub fn inherit_from(
    parent_node_name: &str,
    parameters: &[Parameter],
    payload_keys: &BTreeMap<String, String>,
    single_repository: bool,
) -> Vec<Parameter> {
    let prefix = format!("workflow.{}.", parent_node_name);

    parameters
        .iter()
        .filter(|p| is_inheritable(&p.name))
        .filter(|p| {
            let is_git = p.name.starts_with("git.");
            if is_git {
                !single_repository
            } else {
                !payload_keys.contains_key(&p.name)
            }
        })
        .map(|p| {
            let name = match p.name.strip_prefix("cds.") {
                Some(rest) => format!("{}{}", prefix, rest),
                None => format!("{}{}", prefix, p.name),
            };
            Parameter {
                name,
                ..p.clone()
            }
        })
        .collect()
}

/// Loads the parent node runs and returns their inherited parameters
///
/// Parameters are concatenated in `parent_node_run_ids` order. Failing to
/// load any parent aborts the whole call.
pub async fn inherit_parent_parameters(
    tx: &mut dyn Transaction,
    workflow: &Workflow,
    parent_node_run_ids: &[i64],
    payload_keys: &BTreeMap<String, String>,
) -> Result<Vec<Parameter>> {
    let single_repository = workflow.repositories().len() == 1;
    let mut inherited = Vec::new();

    for &id in parent_node_run_ids {
        let parent = tx
            .load_node_run_by_id(id)
            .await
            .with_context(|| format!("load parent node run {}", id))?;

        let node = workflow
            .node(parent.node_id)
            .ok_or(Error::NodeNotFound(parent.node_id))?;

        inherited.extend(inherit_from(
            &node.name,
            parent.build_parameters.as_slice(),
            payload_keys,
            single_repository,
        ));
    }

    Ok(inherited)
}
