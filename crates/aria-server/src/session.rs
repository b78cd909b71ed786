//! Per-connection execution context.
//!
//! A session exclusively owns one pipeline instance and a bounded FIFO
//! queue. Exactly one drain task pulls payloads off the queue and runs
//! them through the pipeline one at a time. The pipeline is not
//! reentrant, so the queue is the serialization guarantee, independent
//! of how the runtime schedules tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aria_nlu::Pipeline;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientRegistry, ConnectionId};
use crate::wire::{QueryPayload, ServerEvent};

/// Error returned when a payload cannot be queued.
#[derive(Debug)]
pub enum EnqueueError {
    /// The queue is at capacity; the payload is handed back for the
    /// busy signal.
    Full(QueryPayload),
    /// The session's drain task is gone.
    Closed(QueryPayload),
}

/// Handle to a live query-mode session.
pub struct Session {
    connection_id: ConnectionId,
    ready: bool,
    queue_tx: mpsc::Sender<QueryPayload>,
    busy: Arc<AtomicBool>,
    cancel: CancellationToken,
    _drain: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Create a session and spawn its drain task. The pipeline moves
    /// into the task, which is the only place it is ever invoked.
    pub fn spawn(
        connection_id: ConnectionId,
        pipeline: Box<dyn Pipeline>,
        ready: bool,
        registry: Arc<ClientRegistry>,
        queue_capacity: usize,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity);
        let busy = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let drain = tokio::spawn(drain_loop(
            connection_id.clone(),
            pipeline,
            queue_rx,
            Arc::clone(&busy),
            cancel.clone(),
            registry,
        ));

        Self {
            connection_id,
            ready,
            queue_tx,
            busy,
            cancel,
            _drain: drain,
        }
    }

    /// Append a payload to the FIFO queue without blocking.
    pub fn enqueue(&self, payload: QueryPayload) -> Result<(), EnqueueError> {
        match self.queue_tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(p)) => Err(EnqueueError::Full(p)),
            Err(mpsc::error::TrySendError::Closed(p)) => Err(EnqueueError::Closed(p)),
        }
    }

    /// Whether the pipeline model loaded successfully.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether a payload is currently being processed.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Stop scheduling queued work. In-flight processing completes; its
    /// result is discarded if the connection is gone.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub(crate) fn drain_handle(&mut self) -> &mut tokio::task::JoinHandle<()> {
        &mut self._drain
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The drain task exits on its own after cancellation.
        self.cancel.cancel();
    }
}

async fn drain_loop(
    connection_id: ConnectionId,
    pipeline: Box<dyn Pipeline>,
    mut queue: mpsc::Receiver<QueryPayload>,
    busy: Arc<AtomicBool>,
    cancel: CancellationToken,
    registry: Arc<ClientRegistry>,
) {
    loop {
        // Cancellation only stops FUTURE scheduling; once a payload is
        // popped, its processing runs to completion.
        let payload = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(p) => p,
                None => break,
            },
        };

        busy.store(true, Ordering::SeqCst);
        let outcome = pipeline.process(&payload.value, &payload.extra).await;
        let event = match outcome {
            Ok(reply) => ServerEvent::Answer {
                client: payload.client.clone(),
                reply,
            },
            Err(err) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %err,
                    "query processing failed"
                );
                ServerEvent::error(err.error_kind(), err.to_string())
            }
        };

        if let Some(json) = event.encode() {
            if !registry.send_to(&connection_id, json) {
                tracing::debug!(connection_id = %connection_id, "result dropped, connection gone");
            }
        }
        busy.store(false, Ordering::SeqCst);
    }

    tracing::debug!(connection_id = %connection_id, "session drain loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use aria_nlu::{MockPipeline, MockReply, PipelineError};
    use std::time::Duration;

    fn query(value: &str) -> QueryPayload {
        QueryPayload {
            client: "test-client".into(),
            value: value.into(),
            extra: serde_json::Value::Null,
        }
    }

    fn setup() -> (Arc<ClientRegistry>, ConnectionId, mpsc::Receiver<String>) {
        let registry = Arc::new(ClientRegistry::new(32));
        let (id, rx) = registry.register();
        (registry, id, rx)
    }

    #[tokio::test]
    async fn results_arrive_in_submission_order() {
        let (registry, id, mut rx) = setup();
        // First reply is slower than the second would be alone.
        let pipeline = MockPipeline::new(vec![
            MockReply::delayed(Duration::from_millis(80), MockReply::answer("first")),
            MockReply::answer("second"),
            MockReply::answer("third"),
        ]);
        let session = Session::spawn(id, Box::new(pipeline), true, registry, 8);

        session.enqueue(query("q1")).unwrap();
        session.enqueue(query("q2")).unwrap();
        session.enqueue(query("q3")).unwrap();

        for expected in ["first", "second", "third"] {
            let raw = rx.recv().await.unwrap();
            assert!(raw.contains(expected), "expected {expected} in {raw}");
        }
    }

    #[tokio::test]
    async fn back_to_back_queries_are_queued_not_dropped() {
        let (registry, id, mut rx) = setup();
        let pipeline = MockPipeline::new(vec![
            MockReply::delayed(Duration::from_millis(50), MockReply::answer("one")),
            MockReply::answer("two"),
        ]);
        let session = Session::spawn(id, Box::new(pipeline), true, registry, 8);

        session.enqueue(query("q1")).unwrap();
        // Submitted while q1 is still in flight.
        session.enqueue(query("q2")).unwrap();

        assert!(rx.recv().await.unwrap().contains("one"));
        assert!(rx.recv().await.unwrap().contains("two"));
    }

    #[tokio::test]
    async fn busy_while_processing() {
        let (registry, id, _rx) = setup();
        let pipeline = MockPipeline::new(vec![MockReply::delayed(
            Duration::from_millis(100),
            MockReply::answer("slow"),
        )]);
        let session = Session::spawn(id, Box::new(pipeline), true, registry, 8);

        assert!(!session.is_busy());
        session.enqueue(query("q1")).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(session.is_busy());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn full_queue_rejects_with_payload() {
        let (registry, id, _rx) = setup();
        let pipeline = MockPipeline::new(vec![MockReply::delayed(
            Duration::from_millis(200),
            MockReply::answer("slow"),
        )]);
        let session = Session::spawn(id, Box::new(pipeline), true, registry, 1);

        session.enqueue(query("q1")).unwrap();
        // Give the drain task a moment to pop q1 into flight.
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.enqueue(query("q2")).unwrap();
        let rejected = session.enqueue(query("q3"));
        match rejected {
            Err(EnqueueError::Full(p)) => assert_eq!(p.value, "q3"),
            other => panic!("expected Full, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unready_pipeline_yields_not_ready_error() {
        let (registry, id, mut rx) = setup();
        let session = Session::spawn(id, Box::new(MockPipeline::unready()), false, registry, 8);
        assert!(!session.is_ready());

        session.enqueue(query("q1")).unwrap();
        let raw = rx.recv().await.unwrap();
        assert!(raw.contains("pipeline-not-ready"), "got {raw}");
    }

    #[tokio::test]
    async fn pipeline_failure_surfaces_as_error_event() {
        let (registry, id, mut rx) = setup();
        let pipeline = MockPipeline::new(vec![MockReply::Error(PipelineError::Process(
            "engine exploded".into(),
        ))]);
        let session = Session::spawn(id, Box::new(pipeline), true, registry, 8);

        session.enqueue(query("q1")).unwrap();
        let raw = rx.recv().await.unwrap();
        assert!(raw.contains("pipeline-failure"));
        assert!(raw.contains("engine exploded"));
    }

    #[tokio::test]
    async fn shutdown_stops_future_scheduling() {
        let (registry, id, _rx) = setup();
        let pipeline = MockPipeline::new(vec![MockReply::answer("never")]);
        let mut session = Session::spawn(id, Box::new(pipeline), true, registry, 8);

        session.shutdown();
        session.drain_handle().await.unwrap();

        let rejected = session.enqueue(query("q1"));
        // The queue may still accept the payload (channel open until the
        // handle drops), but nothing will drain it; cancellation already
        // ended the loop.
        if let Err(EnqueueError::Closed(p)) = rejected {
            assert_eq!(p.value, "q1");
        }
    }

    #[tokio::test]
    async fn result_discarded_when_connection_gone() {
        let (registry, id, rx) = setup();
        let pipeline = MockPipeline::new(vec![MockReply::answer("late")]);
        let session = Session::spawn(id.clone(), Box::new(pipeline), true, Arc::clone(&registry), 8);

        // Connection disappears before the result is ready.
        drop(rx);
        registry.unregister(&id);

        session.enqueue(query("q1")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // No panic, no hang: the send failure was swallowed.
        assert!(!session.is_busy());
    }
}
