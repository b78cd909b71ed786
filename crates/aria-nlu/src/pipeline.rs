use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors raised by a language-understanding pipeline.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline model not loaded")]
    NotReady,
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("query processing failed: {0}")]
    Process(String),
}

impl PipelineError {
    /// Short classification string for wire signals and logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotReady => "pipeline-not-ready",
            Self::ModelLoad(_) => "model-load-failed",
            Self::Process(_) => "pipeline-failure",
        }
    }
}

/// Result of processing one query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineReply {
    /// Name of the matched intent, or `"fallback"` when nothing matched.
    pub intent: String,
    pub answer: String,
    pub matched: bool,
}

/// A language-understanding engine bound to one locale.
///
/// An instance is exclusively owned by one session and is never safe for
/// concurrent invocation; callers must serialize `process` calls.
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Load the trained model from the given artifact path.
    async fn load(&mut self, path: &Path) -> Result<(), PipelineError>;

    /// Process one query value with its opaque extra payload.
    async fn process(
        &self,
        value: &str,
        extra: &serde_json::Value,
    ) -> Result<PipelineReply, PipelineError>;

    fn is_ready(&self) -> bool;

    fn locale(&self) -> &str;
}
