//! Dispatch transport — delivers start/stop messages to the execution layer.
//!
//! One outbound call per action. Any non-2xx response, connection error or
//! timeout fails that action only; the sender decides what to do with it.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use steward_state::{PendingStart, PendingStop, StopReason};

/// Start directive for one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMessage {
    pub app_id: String,
    pub app_version: String,
    pub instance_index: u32,
    pub message_id: u64,
    /// Live instances per index at send time.
    pub running_indices: BTreeMap<u32, u32>,
}

impl StartMessage {
    pub fn new(start: &PendingStart, running_indices: BTreeMap<u32, u32>) -> Self {
        Self {
            app_id: start.app_id.clone(),
            app_version: start.app_version.clone(),
            instance_index: start.instance_index,
            message_id: start.message_id,
            running_indices,
        }
    }
}

/// Stop directive for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopMessage {
    pub app_id: String,
    pub app_version: String,
    pub instance_index: u32,
    pub instance_guid: String,
    pub is_duplicate: bool,
    pub message_id: u64,
    pub running_indices: BTreeMap<u32, u32>,
}

impl StopMessage {
    pub fn new(stop: &PendingStop, running_indices: BTreeMap<u32, u32>) -> Self {
        Self {
            app_id: stop.app_id.clone(),
            app_version: stop.app_version.clone(),
            instance_index: stop.instance_index,
            instance_guid: stop.instance_guid.clone(),
            is_duplicate: stop.reason == StopReason::Duplicate,
            message_id: stop.message_id,
            running_indices,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("receiver answered {0}")]
    Status(u16),

    #[error("no answer within {0:?}")]
    Timeout(Duration),

    #[error("encode failed: {0}")]
    Encode(String),
}

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// Outbound side of the dispatcher.
pub trait ActionTransport: Send + Sync {
    fn send_start<'a>(&'a self, message: &'a StartMessage) -> SendFuture<'a>;

    fn send_stop<'a>(&'a self, message: &'a StopMessage) -> SendFuture<'a>;
}

/// Posts JSON messages to `http://{endpoint}/v1/starts` and `/v1/stops`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    endpoint: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, path: &'static str, payload: Vec<u8>) -> Result<(), TransportError> {
        let uri = format!("http://{}{path}", self.endpoint);

        let req = http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("host", &self.endpoint)
            .header("content-type", "application/json")
            .header("user-agent", "steward/0.1")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let result = tokio::time::timeout(self.timeout, async move {
            let stream = tokio::net::TcpStream::connect(self.endpoint.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?;

            if resp.status().is_success() {
                Ok(())
            } else {
                Err(TransportError::Status(resp.status().as_u16()))
            }
        })
        .await;

        match result {
            Ok(outcome) => {
                if let Err(ref e) = outcome {
                    debug!(%uri, error = %e, "dispatch failed");
                }
                outcome
            }
            Err(_) => {
                debug!(%uri, "dispatch timed out");
                Err(TransportError::Timeout(self.timeout))
            }
        }
    }
}

fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(message).map_err(|e| TransportError::Encode(e.to_string()))
}

impl ActionTransport for HttpTransport {
    fn send_start<'a>(&'a self, message: &'a StartMessage) -> SendFuture<'a> {
        Box::pin(async move {
            let payload = encode(message)?;
            self.post("/v1/starts", payload).await
        })
    }

    fn send_stop<'a>(&'a self, message: &'a StopMessage) -> SendFuture<'a> {
        Box::pin(async move {
            let payload = encode(message)?;
            self.post("/v1/stops", payload).await
        })
    }
}
