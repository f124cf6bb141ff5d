//! reqwest implementation of [`AgentClient`]

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::sse::SseDecoder;
use crate::{
    AgentClient, AgentEndpoint, AgentError, AgentEvent, AgentEventStream, AgentInstance,
    InstanceAction,
};

const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Serialize)]
struct CreateBody<'a> {
    url: &'a str,
}

#[derive(Serialize)]
struct ControlBody {
    action: InstanceAction,
}

/// Talks to agents over HTTP
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
    /// Applied to request/response calls; the event stream is unbounded
    request_timeout: Duration,
}

impl Default for HttpAgentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpAgentClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn request(
        &self,
        method: reqwest::Method,
        endpoint: &AgentEndpoint,
        path: &str,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, endpoint.api_url(path))
            .header(API_KEY_HEADER, &endpoint.api_key)
    }

    async fn read_instance(response: reqwest::Response) -> Result<AgentInstance, AgentError> {
        let response = Self::check(response).await?;
        let instance: AgentInstance = response
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;
        if instance.id.is_empty() {
            return Err(AgentError::InvalidResponse(
                "instance id missing from response".to_string(),
            ));
        }
        Ok(instance)
    }

    /// Map non-2xx responses to [`AgentError::Rejected`]
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AgentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = rejection_message(status, &body);
        warn!(status = status.as_u16(), "Agent rejected request: {}", message);
        Err(AgentError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

/// Prefer the JSON `error` (or `message`) field, then the raw body
fn rejection_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "message"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn create_instance(
        &self,
        endpoint: &AgentEndpoint,
        command_url: &str,
    ) -> Result<AgentInstance, AgentError> {
        debug!(endpoint_id = endpoint.id, "Creating instance: {}", command_url);
        let response = self
            .request(reqwest::Method::POST, endpoint, "instances")
            .timeout(self.request_timeout)
            .json(&CreateBody { url: command_url })
            .send()
            .await?;
        Self::read_instance(response).await
    }

    async fn control_instance(
        &self,
        endpoint: &AgentEndpoint,
        instance_id: &str,
        action: InstanceAction,
    ) -> Result<AgentInstance, AgentError> {
        debug!(endpoint_id = endpoint.id, instance_id = %instance_id, action = %action, "Controlling instance");
        let response = self
            .request(
                reqwest::Method::PATCH,
                endpoint,
                &format!("instances/{}", instance_id),
            )
            .timeout(self.request_timeout)
            .json(&ControlBody { action })
            .send()
            .await?;
        Self::read_instance(response).await
    }

    async fn delete_instance(
        &self,
        endpoint: &AgentEndpoint,
        instance_id: &str,
    ) -> Result<(), AgentError> {
        debug!(endpoint_id = endpoint.id, instance_id = %instance_id, "Deleting instance");
        let response = self
            .request(
                reqwest::Method::DELETE,
                endpoint,
                &format!("instances/{}", instance_id),
            )
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn events(&self, endpoint: &AgentEndpoint) -> Result<AgentEventStream, AgentError> {
        debug!(endpoint_id = endpoint.id, "Subscribing to agent events");
        let response = self
            .request(reqwest::Method::GET, endpoint, "events")
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = Self::check(response).await?;

        let body = response.bytes_stream().boxed().fuse();
        let state = (body, SseDecoder::new(), VecDeque::<String>::new());

        let stream = futures::stream::unfold(state, |(mut body, mut decoder, mut pending)| async move {
            loop {
                if let Some(data) = pending.pop_front() {
                    let event = serde_json::from_str::<AgentEvent>(&data)
                        .map_err(|e| AgentError::InvalidResponse(format!("{}: {}", e, data)));
                    return Some((event, (body, decoder, pending)));
                }

                match body.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.feed(&chunk)),
                    Some(Err(e)) => {
                        return Some((
                            Err(AgentError::Transport(e.to_string())),
                            (body, decoder, pending),
                        ))
                    }
                    None => {
                        pending.extend(decoder.finish());
                        if pending.is_empty() {
                            return None;
                        }
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
