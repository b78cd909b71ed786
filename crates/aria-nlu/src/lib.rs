pub mod intent;
pub mod model;
pub mod pipeline;

pub mod mock;

pub use intent::IntentPipeline;
pub use mock::{MockPipeline, MockReply};
pub use pipeline::{Pipeline, PipelineError, PipelineReply};
