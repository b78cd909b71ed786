pub mod client;
pub mod orchestrator;
pub mod routes;
pub mod server;
pub mod session;
pub mod wire;

pub use client::{ClientRegistry, ConnectionId};
pub use orchestrator::{IntentPipelineFactory, Orchestrator, OrchestratorConfig, PipelineFactory};
pub use server::{start, AppState, ServerConfig, ServerError, ServerHandle};
pub use session::Session;
pub use wire::{ClientEvent, QueryPayload, ServerEvent};
