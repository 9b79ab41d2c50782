//! Names of the foreign members a proxy touches.
//!
//! The defaults match the context class the driver expects. A host whose foreign class
//! spells a member differently can load a partial override from JSON; omitted keys keep
//! their defaults.
//!
//! ```
//! use tether::ContextBinding;
//!
//! let binding = ContextBinding::from_json(r#"{"submit_task_method": "submit"}"#).unwrap();
//! assert_eq!(binding.submit_task_method, "submit");
//! assert_eq!(binding.close_method, "close");
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Foreign field and method names used by the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextBinding {
    /// String field holding the context identifier.
    pub context_id_field: String,
    /// String field holding the owning evaluator identifier.
    pub evaluator_id_field: String,
    /// `(string) -> void` method that accepts a task configuration.
    pub submit_task_method: String,
    /// `() -> void` method that closes the context.
    pub close_method: String,
    /// `(string) -> void` method that receives error reports.
    pub on_error_method: String,
    /// `() -> string` method that returns the evaluator descriptor.
    pub evaluator_descriptor_method: String,
}

impl Default for ContextBinding {
    fn default() -> Self {
        Self {
            context_id_field: "contextId".to_owned(),
            evaluator_id_field: "evaluatorId".to_owned(),
            submit_task_method: "submitTaskString".to_owned(),
            close_method: "close".to_owned(),
            on_error_method: "onError".to_owned(),
            evaluator_descriptor_method: "getEvaluatorDescriptorString".to_owned(),
        }
    }
}

impl ContextBinding {
    /// Parses a binding from JSON, filling omitted keys with defaults.
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        serde_json::from_str(json).map_err(|e| BridgeError::Binding(e.to_string()))
    }

    /// Serializes the binding to pretty-printed JSON.
    pub fn to_json(&self) -> BridgeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BridgeError::Binding(e.to_string()))
    }
}
