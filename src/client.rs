//! HTTP client for the mind map API.
//!
//! [`ApiClient`] speaks the JSON surface served by [`crate::api::routes`] and doubles as
//! a [`SaveTarget`] so an editing session can autosave to a remote server.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::auth::UserId;
use crate::error::{LibError, Result};
use crate::models::{
    CreateMindMapPayload, GraphViolation, MindMap, MindMapId, MindMapSummary,
    ReplaceGraphPayload,
};
use crate::sync::SaveTarget;

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL including the API prefix, e.g. `http://127.0.0.1:3001/api`.
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    config: ApiClientConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(default)]
    violations: Vec<GraphViolation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WhoAmI {
    user_id: UserId,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LibError::unknown("Failed to create HTTP client", anyhow!(e)))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn mind_map_url(&self, id: MindMapId) -> String {
        self.url(&format!("/mindmaps/{id}"))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;
        response.json::<T>().await.map_err(|e| {
            LibError::unknown("Unexpected response from mind map service", anyhow!(e))
        })
    }

    #[instrument(skip(self))]
    pub async fn whoami(&self) -> Result<UserId> {
        let me: WhoAmI = self.send(self.client.get(self.url("/auth/me"))).await?;
        Ok(me.user_id)
    }

    #[instrument(skip(self))]
    pub async fn list_mind_maps(&self) -> Result<Vec<MindMapSummary>> {
        self.send(self.client.get(self.url("/mindmaps"))).await
    }

    #[instrument(skip(self), fields(mind_map_id = %id))]
    pub async fn get_mind_map(&self, id: MindMapId) -> Result<MindMap> {
        self.send(self.client.get(self.mind_map_url(id))).await
    }

    #[instrument(skip(self, payload))]
    pub async fn create_mind_map(&self, payload: &CreateMindMapPayload) -> Result<MindMap> {
        self.send(self.client.post(self.url("/mindmaps")).json(payload))
            .await
    }

    #[instrument(skip(self, payload), fields(mind_map_id = %id, nodes = payload.nodes.len(), edges = payload.edges.len()))]
    pub async fn replace_mind_map_graph(
        &self,
        id: MindMapId,
        payload: &ReplaceGraphPayload,
    ) -> Result<MindMap> {
        debug!("replacing mind map graph");
        self.send(self.client.put(self.mind_map_url(id)).json(payload))
            .await
    }

    #[instrument(skip(self), fields(mind_map_id = %id))]
    pub async fn delete_mind_map(&self, id: MindMapId) -> Result<()> {
        let _: serde_json::Value = self.send(self.client.delete(self.mind_map_url(id))).await?;
        Ok(())
    }
}

#[async_trait]
impl SaveTarget for ApiClient {
    async fn save(&self, id: MindMapId, payload: ReplaceGraphPayload) -> Result<MindMap> {
        self.replace_mind_map_graph(id, &payload).await
    }
}

fn map_http_error(error: reqwest::Error) -> LibError {
    if error.is_timeout() || error.is_connect() {
        LibError::storage("Mind map service unreachable", anyhow!(error))
    } else {
        LibError::unknown("Mind map request failed", anyhow!(error))
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_response(status, &body))
}

/// Maps an API error response back onto the error kinds the server started from.
fn error_from_response(status: StatusCode, body: &str) -> LibError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let detail = parsed
        .as_ref()
        .map(|envelope| format!("{}: {}", envelope.error.code, envelope.error.message))
        .unwrap_or_else(|| body.to_string());
    let source = anyhow!("mind map service answered {status}: {detail}");

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => match parsed {
            Some(envelope) if !envelope.error.violations.is_empty() => {
                LibError::invalid_graph(envelope.error.violations)
            }
            _ => LibError::invalid("Invalid mind map request", source),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LibError::unauthenticated("Authentication required", source)
        }
        StatusCode::NOT_FOUND => LibError::not_found("Mind map not found", source),
        status if status.is_server_error() => {
            LibError::storage("Mind map service failed", source)
        }
        _ => LibError::unknown("Unexpected response from mind map service", source),
    }
}
