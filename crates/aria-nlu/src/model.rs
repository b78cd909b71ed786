//! Trained model artifact format.
//!
//! A single JSON file carries every locale variant; a pipeline binds to
//! one locale's section at load time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineError;

/// On-disk model artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelFile {
    pub version: u32,
    pub locales: HashMap<String, LocaleModel>,
}

/// One locale's trained data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocaleModel {
    pub intents: Vec<IntentDef>,
}

/// A single intent: utterance patterns and canned answers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentDef {
    pub name: String,
    pub patterns: Vec<String>,
    pub answers: Vec<String>,
}

impl ModelFile {
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(raw).map_err(|e| PipelineError::ModelLoad(e.to_string()))
    }

    pub fn locale(&self, tag: &str) -> Option<&LocaleModel> {
        self.locales.get(tag)
    }
}
