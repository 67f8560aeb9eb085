//! What started a node run

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::parameter::Parameter;
use crate::domain::user::User;

/// A run started by hand
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualTrigger {
    pub user: User,
    /// Structured payload; `None` means "use the node default payload"
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Empty means "use the node default pipeline parameters"
    #[serde(default)]
    pub pipeline_parameters: Vec<Parameter>,
}

/// A run started by a workflow hook (repository webhook, scheduler, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookEvent {
    pub hook_uuid: Uuid,
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
}

impl HookEvent {
    /// Hook payload as a JSON object
    pub fn payload_value(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.payload
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }
}
