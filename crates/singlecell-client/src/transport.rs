//! Submit and poll endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use singlecell_core::config::Config;
use singlecell_core::error::{Result, SingleCellError};
use singlecell_core::ids::SessionId;
use singlecell_core::protocol::{self, ExecuteRequest, PollBatch, SubmitAck};

/// The two network operations a session suspends on.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Post an `execute_request`.
    async fn submit(&self, request: &ExecuteRequest) -> Result<SubmitAck>;

    /// Fetch messages with `sequence >= sequence` for a computation.
    async fn poll(&self, computation_id: &SessionId, sequence: u64) -> Result<PollBatch>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn submit(&self, request: &ExecuteRequest) -> Result<SubmitAck> {
        (**self).submit(request).await
    }

    async fn poll(&self, computation_id: &SessionId, sequence: u64) -> Result<PollBatch> {
        (**self).poll(computation_id, sequence).await
    }
}

/// HTTP transport: form-encoded submit, query-string poll.
pub struct HttpTransport {
    client: reqwest::Client,
    evaluate_url: String,
    output_poll_url: String,
}

fn transport_err(e: reqwest::Error) -> SingleCellError {
    SingleCellError::Transport(e.to_string())
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(transport_err)?;
        Ok(Self {
            client,
            evaluate_url: config.evaluate_url(),
            output_poll_url: config.output_poll_url(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, request: &ExecuteRequest) -> Result<SubmitAck> {
        let message = serde_json::to_string(request)?;
        debug!(url = %self.evaluate_url, msg_id = %request.msg_id(), "Submitting execute_request");

        let body: Value = self
            .client
            .post(&self.evaluate_url)
            .form(&[("message", message)])
            .send()
            .await
            .map_err(transport_err)?
            .error_for_status()
            .map_err(transport_err)?
            .json()
            .await
            .map_err(transport_err)?;

        protocol::decode_ack(&body)
    }

    async fn poll(&self, computation_id: &SessionId, sequence: u64) -> Result<PollBatch> {
        let body: Value = self
            .client
            .get(&self.output_poll_url)
            .query(&[
                ("computation_id", computation_id.to_string()),
                ("sequence", sequence.to_string()),
            ])
            .send()
            .await
            .map_err(transport_err)?
            .error_for_status()
            .map_err(transport_err)?
            .json()
            .await
            .map_err(transport_err)?;

        let batch = protocol::decode_batch(&body);
        debug!(%computation_id, sequence, received = batch.messages.len(), "Polled output");
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use singlecell_core::config::ServerConfig;

    #[test]
    fn test_http_transport_urls_from_config() {
        let config = Config {
            server: Some(ServerConfig {
                base_url: "https://cell.example.org/".into(),
                evaluate_path: "/eval".into(),
                output_poll_path: "/output_poll".into(),
                files_path: "/files".into(),
                timeout_ms: Some(1000),
            }),
            ..Config::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.evaluate_url, "https://cell.example.org/eval");
        assert_eq!(transport.output_poll_url, "https://cell.example.org/output_poll");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let config = Config {
            server: Some(ServerConfig {
                base_url: "http://127.0.0.1:9".into(),
                evaluate_path: "/eval".into(),
                output_poll_path: "/output_poll".into(),
                files_path: "/files".into(),
                timeout_ms: Some(500),
            }),
            ..Config::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        let err = transport.poll(&SessionId::from("s"), 0).await.unwrap_err();
        assert!(matches!(err, SingleCellError::Transport(_)));
    }
}
