//! The three message kinds that move between a job-queue client and a queue
//! server running in a separate worker process, plus the [`WorkerTransport`]
//! contract both sides hold a handle to. Payloads are JSON; binary outputs
//! travel as base64 inside a `serde_json::Value`, per the wire contract
//! (no concrete transport — HTTP, IPC, or otherwise — ships here beyond the
//! in-process [`ChannelTransport`] used for testing job-queue against this
//! contract without a real worker boundary).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Submits a new job to the queue server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmit {
    pub job_id: String,
    pub queue: String,
    pub input: serde_json::Value,
}

/// A progress update for an in-flight job, keyed by `job_id` so the client
/// can route it back to the right `waitFor` future and progress listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusUpdate {
    pub job_id: String,
    pub progress: u8,
    pub message: Option<String>,
    pub details: Option<serde_json::Value>,
}

/// The terminal result of a job: success with an output, or failure with an
/// error message and an optional stable error code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobOutcome {
    Success { job_id: String, output: serde_json::Value },
    Failure { job_id: String, error: String, error_code: Option<String> },
}

impl JobOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            JobOutcome::Success { job_id, .. } | JobOutcome::Failure { job_id, .. } => job_id,
        }
    }
}

/// A message flowing across the worker boundary, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerMessage {
    Submit(JobSubmit),
    Status(JobStatusUpdate),
    Outcome(JobOutcome),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("worker transport channel closed")]
    Closed,
}

/// The contract a job-queue client and the queue server running in a worker
/// each hold a handle to. `send` pushes one message toward the other side;
/// `recv` waits for the next message addressed to this side.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn send(&self, message: WorkerMessage) -> Result<(), TransportError>;
    async fn recv(&self) -> Result<WorkerMessage, TransportError>;
}

/// An in-process transport over a pair of unbounded channels, standing in
/// for a real worker boundary (HTTP, IPC, ...) in tests that want to drive
/// the job-queue client/server split without crossing an actual process.
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<WorkerMessage>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkerMessage>>,
}

impl ChannelTransport {
    /// Builds a connected pair: `(client_side, server_side)`. Sending on one
    /// is receiving on the other.
    pub fn pair() -> (Self, Self) {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        (
            Self {
                outbound: to_server,
                inbound: tokio::sync::Mutex::new(from_server),
            },
            Self {
                outbound: to_client,
                inbound: tokio::sync::Mutex::new(from_client),
            },
        )
    }
}

#[async_trait]
impl WorkerTransport for ChannelTransport {
    async fn send(&self, message: WorkerMessage) -> Result<(), TransportError> {
        self.outbound.send(message).map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<WorkerMessage, TransportError> {
        self.inbound.lock().await.recv().await.ok_or(TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_transport_roundtrips_submit() {
        let (client, server) = ChannelTransport::pair();
        client
            .send(WorkerMessage::Submit(JobSubmit {
                job_id: "j1".into(),
                queue: "default".into(),
                input: serde_json::json!({"x": 1}),
            }))
            .await
            .unwrap();
        let received = server.recv().await.unwrap();
        assert!(matches!(received, WorkerMessage::Submit(s) if s.job_id == "j1"));
    }

    #[tokio::test]
    async fn channel_transport_roundtrips_outcome_back_to_client() {
        let (client, server) = ChannelTransport::pair();
        server
            .send(WorkerMessage::Outcome(JobOutcome::Success {
                job_id: "j1".into(),
                output: serde_json::json!({"ok": true}),
            }))
            .await
            .unwrap();
        let received = client.recv().await.unwrap();
        assert_eq!(received_job_id(&received), "j1");
    }

    fn received_job_id(message: &WorkerMessage) -> &str {
        match message {
            WorkerMessage::Submit(s) => &s.job_id,
            WorkerMessage::Status(s) => &s.job_id,
            WorkerMessage::Outcome(o) => o.job_id(),
        }
    }
}
