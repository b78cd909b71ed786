use std::path::Path;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use crate::model::ModelFile;
use crate::pipeline::{Pipeline, PipelineError, PipelineReply};

/// Answer returned when no intent pattern matches.
const FALLBACK_ANSWER: &str = "Sorry, I didn't catch that.";

struct CompiledIntent {
    name: String,
    patterns: Vec<Regex>,
    answers: Vec<String>,
}

/// Pattern-matching pipeline over a trained model artifact.
///
/// Patterns are compiled once at load; until `load` succeeds the pipeline
/// is unready and every `process` call fails with `NotReady`.
pub struct IntentPipeline {
    locale: String,
    compiled: Option<Vec<CompiledIntent>>,
}

impl IntentPipeline {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            compiled: None,
        }
    }
}

#[async_trait]
impl Pipeline for IntentPipeline {
    async fn load(&mut self, path: &Path) -> Result<(), PipelineError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::ModelLoad(format!("{}: {e}", path.display())))?;
        let model = ModelFile::parse(&raw)?;
        let locale_model = model.locale(&self.locale).ok_or_else(|| {
            PipelineError::ModelLoad(format!("model has no data for locale {}", self.locale))
        })?;

        let mut compiled = Vec::with_capacity(locale_model.intents.len());
        for intent in &locale_model.intents {
            let mut patterns = Vec::with_capacity(intent.patterns.len());
            for pattern in &intent.patterns {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        PipelineError::ModelLoad(format!("intent {}: {e}", intent.name))
                    })?;
                patterns.push(regex);
            }
            compiled.push(CompiledIntent {
                name: intent.name.clone(),
                patterns,
                answers: intent.answers.clone(),
            });
        }

        tracing::debug!(
            locale = %self.locale,
            intents = compiled.len(),
            "pipeline model loaded"
        );
        self.compiled = Some(compiled);
        Ok(())
    }

    async fn process(
        &self,
        value: &str,
        _extra: &serde_json::Value,
    ) -> Result<PipelineReply, PipelineError> {
        let intents = self.compiled.as_ref().ok_or(PipelineError::NotReady)?;

        for intent in intents {
            if intent.patterns.iter().any(|p| p.is_match(value)) {
                return Ok(PipelineReply {
                    intent: intent.name.clone(),
                    answer: intent
                        .answers
                        .first()
                        .cloned()
                        .unwrap_or_else(|| FALLBACK_ANSWER.to_string()),
                    matched: true,
                });
            }
        }

        Ok(PipelineReply {
            intent: "fallback".into(),
            answer: FALLBACK_ANSWER.into(),
            matched: false,
        })
    }

    fn is_ready(&self) -> bool {
        self.compiled.is_some()
    }

    fn locale(&self) -> &str {
        &self.locale
    }
}
