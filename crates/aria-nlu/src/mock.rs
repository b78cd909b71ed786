use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::pipeline::{Pipeline, PipelineError, PipelineReply};

/// Pre-programmed replies for deterministic testing without a model file.
#[derive(Clone, Debug)]
pub enum MockReply {
    Reply(PipelineReply),
    Error(PipelineError),
    /// Wait a duration, then yield the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    /// Convenience: a matched reply with the given answer.
    pub fn answer(text: &str) -> Self {
        Self::Reply(PipelineReply {
            intent: "mock".into(),
            answer: text.into(),
            matched: true,
        })
    }

    /// Convenience: wrap any reply with a delay.
    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock pipeline that returns pre-programmed replies in sequence.
///
/// When the scripted replies run out, the last one repeats. An empty
/// script echoes the query value back.
pub struct MockPipeline {
    locale: String,
    replies: Vec<MockReply>,
    next: AtomicUsize,
    ready: AtomicBool,
    load_failure: Option<String>,
    calls: AtomicUsize,
}

impl MockPipeline {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            locale: "en-US".into(),
            replies,
            next: AtomicUsize::new(0),
            ready: AtomicBool::new(true),
            load_failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A pipeline whose `load` fails with the given detail, leaving it
    /// unready.
    pub fn failing_load(detail: &str) -> Self {
        Self {
            locale: "en-US".into(),
            replies: Vec::new(),
            next: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
            load_failure: Some(detail.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A pipeline that was never loaded.
    pub fn unready() -> Self {
        let mock = Self::new(Vec::new());
        mock.ready.store(false, Ordering::SeqCst);
        mock
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Number of `process` calls observed.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pipeline for MockPipeline {
    async fn load(&mut self, _path: &Path) -> Result<(), PipelineError> {
        match &self.load_failure {
            Some(detail) => Err(PipelineError::ModelLoad(detail.clone())),
            None => {
                self.ready.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn process(
        &self,
        value: &str,
        _extra: &serde_json::Value,
    ) -> Result<PipelineReply, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.ready.load(Ordering::SeqCst) {
            return Err(PipelineError::NotReady);
        }

        let index = self.next.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .replies
            .get(index)
            .or_else(|| self.replies.last())
            .cloned();

        let mut reply = match scripted {
            Some(r) => r,
            None => {
                return Ok(PipelineReply {
                    intent: "echo".into(),
                    answer: value.to_string(),
                    matched: true,
                })
            }
        };

        loop {
            match reply {
                MockReply::Reply(r) => return Ok(r),
                MockReply::Error(e) => return Err(e),
                MockReply::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    reply = *inner;
                }
            }
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn locale(&self) -> &str {
        &self.locale
    }
}
