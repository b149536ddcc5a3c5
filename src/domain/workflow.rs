//! Run input and result payloads.

use serde::{Deserialize, Serialize};

/// Input supplied once when a run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInput {
    /// Free-form description of the piece to generate
    pub prompt: String,

    /// Caller-supplied request kind. Recorded with the run; does not
    /// currently select a different pipeline.
    #[serde(default, alias = "requestType")]
    pub request_type: String,
}

impl WorkflowInput {
    pub fn new(prompt: impl Into<String>, request_type: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            request_type: request_type.into(),
        }
    }
}

/// Successful outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Reference to the materialized artifact (e.g. a storage link)
    pub link: String,
}

impl WorkflowResult {
    pub fn new(link: impl Into<String>) -> Self {
        Self { link: link.into() }
    }

    /// Wire form returned to callers: `{"link":"..."}`
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
