use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::{Method, StatusCode, header};
use serde::Deserialize;
use serde_json::Value;

use crate::config::AccountConfig;
use crate::error::ChannelError;
use crate::types::{Message, MessageRequest, Person, WebhookInfo, WebhookRequest};

/// One authenticated HTTP round trip against the Webex API.
///
/// The trait seam exists so the sender and the webhook processor can be
/// exercised against an in-memory executor; `WebexApi` is the real thing.
#[async_trait]
pub trait ApiExecutor: Send + Sync {
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ChannelError>;

    async fn get_me(&self) -> Result<Person, ChannelError> {
        let value = self.execute(Method::GET, "/people/me", None).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn get_message(&self, id: &str) -> Result<Message, ChannelError> {
        let value = self
            .execute(Method::GET, &format!("/messages/{id}"), None)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn create_message(&self, request: &MessageRequest) -> Result<Message, ChannelError> {
        let body = serde_json::to_value(request)?;
        let value = self.execute(Method::POST, "/messages", Some(body)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn delete_message(&self, id: &str) -> Result<(), ChannelError> {
        self.execute(Method::DELETE, &format!("/messages/{id}"), None)
            .await?;
        Ok(())
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookInfo>, ChannelError> {
        let value = self.execute(Method::GET, "/webhooks", None).await?;
        let items = value.get("items").cloned().unwrap_or(Value::Array(vec![]));
        Ok(serde_json::from_value(items)?)
    }

    async fn create_webhook(&self, request: &WebhookRequest) -> Result<WebhookInfo, ChannelError> {
        let body = serde_json::to_value(request)?;
        let value = self.execute(Method::POST, "/webhooks", Some(body)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn delete_webhook(&self, id: &str) -> Result<(), ChannelError> {
        self.execute(Method::DELETE, &format!("/webhooks/{id}"), None)
            .await?;
        Ok(())
    }
}

/// Structured error body Webex returns on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(default, rename = "trackingId")]
    tracking_id: Option<String>,
    #[serde(default)]
    errors: Vec<ApiFieldError>,
}

#[derive(Debug, Deserialize)]
struct ApiFieldError {
    #[serde(default)]
    description: Option<String>,
}

#[derive(Clone)]
pub struct WebexApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl WebexApi {
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("webex-channel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ChannelError::Transport(err.into()))?;
        Ok(Self {
            http,
            base_url: api_base.into(),
            token: token.into(),
        })
    }

    pub fn for_account(config: &AccountConfig) -> Result<Self, ChannelError> {
        Self::new(config.token.clone(), config.api_base.clone())
    }

    fn build_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ApiExecutor for WebexApi {
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ChannelError> {
        let url = self.build_url(path);
        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(&self.token)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ChannelError::Transport(err.into()))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| ChannelError::Transport(anyhow!("reading response body: {err}")))?;

        if !status.is_success() {
            return Err(error_from_response(status, &bytes));
        }

        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn error_from_response(status: StatusCode, body: &[u8]) -> ChannelError {
    match serde_json::from_slice::<ApiErrorBody>(body) {
        Ok(parsed) => ChannelError::Api {
            status: status.as_u16(),
            message: parsed.message,
            tracking_id: parsed.tracking_id,
            errors: parsed
                .errors
                .into_iter()
                .filter_map(|e| e.description)
                .collect(),
        },
        Err(_) => ChannelError::api(
            status.as_u16(),
            format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown")
            ),
        ),
    }
}
