use std::sync::Arc;

use aria_core::bus::{BusEvent, StatusBus};
use aria_core::config::Config;
use aria_core::registry::{ModuleStatus, StartupBarrier};
use aria_core::status::{Destination, EntryKind, StatusMessage};
use aria_server::IntentPipelineFactory;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Aria server");

    let (config, warnings) = Config::from_env();
    let bus = StatusBus::default();

    // Presentation clients must subscribe before any traffic begins;
    // messages emitted earlier are lost by design.
    let _console = spawn_console_client(&bus);

    for warning in warnings {
        bus.emit(
            StatusMessage::single(EntryKind::Warning, "config", "Configuration", warning.to_string())
                .addressed_to(Destination::Any),
        );
    }

    let barrier = Arc::new(StartupBarrier::new(bus.clone()));

    // Chat-platform client: external system, stub registration only.
    barrier.register_module("chat", ModuleStatus::Okay);
    barrier.register_module("console", ModuleStatus::Okay);

    let server_config = aria_server::ServerConfig::from(&config);
    let port = server_config.port;
    let handle = match aria_server::start(
        server_config,
        bus.clone(),
        Arc::new(IntentPipelineFactory),
    )
    .await
    {
        Ok(handle) => {
            barrier.register_module("http", ModuleStatus::Okay);
            Some(handle)
        }
        Err(e) => {
            // A bind failure is reported, not fatal: the process keeps
            // running without serving.
            tracing::warn!(port = port, error = %e, "server failed to start");
            bus.emit(
                StatusMessage::single(EntryKind::Warning, "server", "Listen", e.to_string())
                    .addressed_to(Destination::Any),
            );
            barrier.register_module("http", ModuleStatus::Failed(e.to_string()));
            None
        }
    };

    // Reserved speech subsystem slot.
    barrier.register_module("speech", ModuleStatus::Failed("Not yet implemented".into()));

    if let Some(handle) = &handle {
        tracing::info!(port = handle.port, locale = %config.locale, "Aria ready");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}

/// Console presentation client: renders bus messages addressed to it
/// through the structured log formatter.
fn spawn_console_client(bus: &StatusBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => render_for_console(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "console client lagged, dropped messages");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn render_for_console(event: &BusEvent) {
    let message = event.message();
    let for_console = match &message.destination {
        None | Some(Destination::Any) => true,
        Some(Destination::Client(name)) => name == "console",
    };
    if !for_console {
        return;
    }

    for entry in message.entries() {
        match entry.kind {
            EntryKind::Info | EntryKind::Success => {
                tracing::info!(target: "console", source = %message.source, title = %message.title, "{}", entry.text);
            }
            EntryKind::Warning => {
                tracing::warn!(target: "console", source = %message.source, title = %message.title, "{}", entry.text);
            }
        }
    }
}
