//! Run DTOs
//!
//! Body of a "start a run" request as received by the REST layer.

use serde::{Deserialize, Serialize};

use crate::domain::parameter::Parameter;
use crate::domain::trigger::HookEvent;

/// Request to start a workflow run
///
/// Exactly one trigger is honoured: a `hook` wins over `manual`, and a request
/// carrying neither is treated as a manual run with node defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    /// Number of an existing run to restart nodes in
    #[serde(default)]
    pub number: Option<u64>,
    /// Nodes to restart from; empty means "the workflow root"
    #[serde(default)]
    pub from_node_ids: Vec<i64>,
    #[serde(default)]
    pub manual: Option<ManualRequest>,
    #[serde(default)]
    pub hook: Option<HookEvent>,
}

/// Manual part of a run request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualRequest {
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub pipeline_parameters: Vec<Parameter>,
}

impl RunRequest {
    /// Manual request restarting `from_node_ids` of run `number`
    pub fn restart(number: u64, from_node_ids: Vec<i64>) -> Self {
        Self {
            number: Some(number),
            from_node_ids,
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.manual.get_or_insert_with(ManualRequest::default).payload = Some(payload);
        self
    }
}
