//! The external-model collaborator consulted by the last extraction layer.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Model results below this confidence are discarded.
pub const MODEL_CONFIDENCE_FLOOR: f64 = 0.35;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub utterance: String,
    pub business_id: String,
    pub target_slots: Vec<String>,
    pub known_values: BTreeMap<String, String>,
}

/// One slot as reported by the model. Every field may be missing in a sloppy reply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSlot {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ModelSlot {
    pub fn new(value: impl Into<String>, confidence: f64) -> Self {
        Self { value: Some(value.into()), confidence: Some(confidence), reason: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model transport failure: {0}")]
    Transport(String),
    #[error("model returned a malformed payload: {0}")]
    Malformed(String),
    #[error("model call timed out after {0}s")]
    Timeout(u64),
}

pub trait ModelClient: Send + Sync {
    fn extract_slots(
        &self,
        request: &ModelRequest,
    ) -> Result<BTreeMap<String, ModelSlot>, ModelError>;
}

impl<T> ModelClient for Arc<T>
where
    T: ModelClient + ?Sized,
{
    fn extract_slots(
        &self,
        request: &ModelRequest,
    ) -> Result<BTreeMap<String, ModelSlot>, ModelError> {
        (**self).extract_slots(request)
    }
}

/// Replays queued replies in order; an exhausted script answers with no slots.
#[derive(Debug, Default)]
pub struct ScriptedModelClient {
    replies: Mutex<VecDeque<Result<BTreeMap<String, ModelSlot>, ModelError>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, slots: &[(&str, ModelSlot)]) -> Self {
        let reply =
            slots.iter().map(|(name, slot)| ((*name).to_string(), slot.clone())).collect();
        self.push(Ok(reply));
        self
    }

    pub fn fail(self, error: ModelError) -> Self {
        self.push(Err(error));
        self
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, reply: Result<BTreeMap<String, ModelSlot>, ModelError>) {
        match self.replies.lock() {
            Ok(mut replies) => replies.push_back(reply),
            Err(poisoned) => poisoned.into_inner().push_back(reply),
        }
    }
}

impl ModelClient for ScriptedModelClient {
    fn extract_slots(
        &self,
        request: &ModelRequest,
    ) -> Result<BTreeMap<String, ModelSlot>, ModelError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }
        let next = match self.replies.lock() {
            Ok(mut replies) => replies.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| Ok(BTreeMap::new()))
    }
}
