use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ChannelError;

pub const DEFAULT_API_BASE: &str = "https://webexapis.com/v1";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Access policy for direct (1:1) conversations.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    #[default]
    Allow,
    Deny,
    /// Only senders whose id or email appears in `allow_from` pass.
    /// An empty allow-list denies everything: closed by default.
    Allowlisted,
}

/// Per-account settings. Immutable for the lifetime of an initialized
/// channel; changing any field requires a shutdown and re-initialization.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AccountConfig {
    pub name: String,
    /// Bot bearer token.
    pub token: String,
    /// Publicly reachable URL Webex will POST notifications to.
    pub webhook_url: String,
    #[serde(default)]
    pub dm_policy: DmPolicy,
    #[serde(default)]
    pub allow_from: Vec<String>,
    /// Shared secret for webhook HMAC signatures. Optional: without it,
    /// inbound payloads are accepted unauthenticated.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl AccountConfig {
    pub fn new(
        name: impl Into<String>,
        token: impl Into<String>,
        webhook_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            webhook_url: webhook_url.into(),
            dm_policy: DmPolicy::default(),
            allow_from: Vec::new(),
            webhook_secret: None,
            api_base: default_api_base(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }

    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.token.trim().is_empty() {
            return Err(ChannelError::validation("account token is empty"));
        }
        let url = Url::parse(&self.webhook_url)
            .map_err(|err| ChannelError::validation(format!("invalid webhook url: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChannelError::validation(format!(
                "webhook url must be http(s), got {}",
                url.scheme()
            )));
        }
        if self.dm_policy == DmPolicy::Allowlisted && self.allow_from.is_empty() {
            return Err(ChannelError::validation(
                "dm_policy is allowlisted but allow_from is empty",
            ));
        }
        Ok(())
    }

    /// Path component of the public webhook URL; this is what gets
    /// registered with the router.
    pub fn webhook_path(&self) -> Result<String, ChannelError> {
        let url = Url::parse(&self.webhook_url)
            .map_err(|err| ChannelError::validation(format!("invalid webhook url: {err}")))?;
        Ok(url.path().to_string())
    }
}
