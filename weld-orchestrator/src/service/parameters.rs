//! Build Parameter Service
//!
//! Computes the build parameters of a node run by layering the variables of
//! its context, later layers overriding earlier ones:
//!
//! 1. project variables
//! 2. application variables, `cds.application`
//! 3. environment variables, `cds.environment`
//! 4. platform configuration, `cds.platform`, then the application deployment
//!    strategy for that platform
//! 5. pipeline parameters
//! 6. flattened payload
//! 7. `cds.project`, `cds.workflow`, `cds.pipeline`
//! 8. git keys of the application repository strategy
//!
//! The merged set is then interpolated against itself. Every call starts from
//! a fresh map.

use std::collections::BTreeMap;
use weld_core::domain::parameter::{Parameter, ParameterSet};
use weld_core::domain::project::{Project, Variable};
use weld_core::domain::run::{JobRun, Stage, WorkflowNodeRun, WorkflowRun};
use weld_core::domain::workflow::{Node, Workflow};

use crate::error::{Error, MultiError, Result};
use crate::service::interpolate::{interpolate, interpolate_value};
use crate::service::payload;

/// Keys derived from the application repository strategy
pub const GIT_STRATEGY_KEYS: [&str; 5] = [
    "git.connection.type",
    "git.ssh.key",
    "git.pgp.key",
    "git.http.user",
    "git.server",
];

/// Best-effort resolution: parameters that resolved, plus what failed
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    /// Parameters sorted by name
    pub parameters: ParameterSet,
    pub errors: MultiError,
}

impl Resolved {
    fn from_map(merged: &BTreeMap<String, String>) -> Self {
        let (values, errors) = interpolate(merged);
        Self {
            parameters: ParameterSet::from_map(values),
            errors,
        }
    }

    /// Fails when any parameter could not be interpolated
    pub fn into_result(self) -> Result<ParameterSet> {
        self.errors.into_result()?;
        Ok(self.parameters)
    }
}

fn extend_vars(vars: &mut BTreeMap<String, String>, variables: &[Variable]) {
    for v in variables {
        vars.insert(v.name.clone(), v.value.clone());
    }
}

fn merge_layers(
    project: &Project,
    workflow: &Workflow,
    node: &Node,
    pipeline_parameters: &[Parameter],
    payload: &serde_json::Value,
) -> Result<BTreeMap<String, String>> {
    let pipeline = workflow
        .pipeline(node.pipeline_id)
        .ok_or(Error::PipelineNotFound(node.pipeline_id))?;

    let mut vars = BTreeMap::new();
    extend_vars(&mut vars, &project.variables);

    if let Some(app) = node.application() {
        vars.insert("cds.application".to_string(), app.name.clone());
        extend_vars(&mut vars, &app.variables);
    }

    if let Some(env) = node.environment() {
        vars.insert("cds.environment".to_string(), env.name.clone());
        extend_vars(&mut vars, &env.variables);
    }

    if let Some(platform) = node.project_platform() {
        vars.insert("cds.platform".to_string(), platform.name.clone());
        vars.extend(platform.config.clone());

        if let Some(strategy) = node
            .application()
            .and_then(|app| app.deployment_strategies.get(&platform.name))
        {
            vars.extend(strategy.clone());
        }
    }

    for p in pipeline_parameters {
        vars.insert(p.name.clone(), p.value.clone());
    }

    vars.extend(payload::flatten(payload));

    vars.insert("cds.project".to_string(), workflow.project_key.clone());
    vars.insert("cds.workflow".to_string(), workflow.name.clone());
    vars.insert("cds.pipeline".to_string(), pipeline.name.clone());

    match node.application() {
        Some(app) if !app.repository_strategy.connection_type.is_empty() => {
            let strategy = &app.repository_strategy;
            let values = [
                &strategy.connection_type,
                &strategy.ssh_key,
                &strategy.pgp_key,
                &strategy.user,
                &app.vcs_server,
            ];
            for (key, value) in GIT_STRATEGY_KEYS.iter().zip(values) {
                if !value.is_empty() {
                    vars.insert(key.to_string(), value.clone());
                }
            }
        }
        _ => {
            for key in GIT_STRATEGY_KEYS {
                vars.remove(key);
            }
        }
    }

    Ok(vars)
}

/// Resolves the build parameters of `node`
///
/// Fails only when the node pipeline is unknown; interpolation failures are
/// returned in [`Resolved::errors`].
pub fn resolve_node_build_parameters(
    project: &Project,
    workflow: &Workflow,
    node: &Node,
    pipeline_parameters: &[Parameter],
    payload: &serde_json::Value,
) -> Result<Resolved> {
    let vars = merge_layers(project, workflow, node, pipeline_parameters, payload)?;
    Ok(Resolved::from_map(&vars))
}

/// Resolves the build parameters of a node run, including its run identity
///
/// `cds.version`, `cds.run`, `cds.run.number` and `cds.run.subnumber` are set
/// before interpolation, so other parameters may reference them.
pub fn resolve_fixed_run_parameters(
    project: &Project,
    run: &WorkflowRun,
    node_run: &WorkflowNodeRun,
) -> Result<Resolved> {
    let node = run
        .workflow
        .node(node_run.node_id)
        .ok_or(Error::NodeNotFound(node_run.node_id))?;

    let mut vars = merge_layers(
        project,
        &run.workflow,
        node,
        &node_run.pipeline_parameters,
        &node_run.payload,
    )?;

    let number = node_run.number.to_string();
    vars.insert("cds.version".to_string(), number.clone());
    vars.insert(
        "cds.run".to_string(),
        format!("{}.{}", node_run.number, node_run.sub_number),
    );
    vars.insert("cds.run.number".to_string(), number);
    vars.insert(
        "cds.run.subnumber".to_string(),
        node_run.sub_number.to_string(),
    );

    Ok(Resolved::from_map(&vars))
}

/// Parameters handed to a job: the node run build parameters plus
/// `cds.stage` and `cds.job`
pub fn job_run_parameters(node_run: &WorkflowNodeRun, stage: &Stage, job: &JobRun) -> Resolved {
    let mut params = node_run.build_parameters.clone();
    let mut errors = MultiError::new();
    let vars = params.to_map();

    for (key, value) in [("cds.stage", &stage.name), ("cds.job", &job.name)] {
        match interpolate_value(value, &vars) {
            Ok(resolved) => params.add(key, resolved),
            Err(err) => errors.push(err),
        }
    }

    Resolved {
        parameters: params,
        errors,
    }
}
