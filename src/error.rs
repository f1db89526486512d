use thiserror::Error;

/// Error taxonomy for the Webex channel.
///
/// `Api` and `Transport` are the only classes the retry loop will ever
/// re-attempt; everything else is terminal for the operation that raised it.
/// Policy denials (DM policy, self-messages) are not errors at all and are
/// represented as an absent envelope, never as a variant here.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The outbound message failed local validation; no network call was made.
    #[error("invalid message: {0}")]
    Validation(String),

    /// The webhook payload did not match its HMAC signature.
    #[error("webhook signature mismatch")]
    Signature,

    /// Webex answered with a non-2xx status.
    #[error("webex api error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        tracking_id: Option<String>,
        errors: Vec<String>,
    },

    /// The request never produced an HTTP response (reset, timeout, DNS).
    #[error("transport error: {0}")]
    Transport(anyhow::Error),

    /// A 2xx response body did not match the expected shape.
    #[error("failed to decode webex response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The channel was used before `initialize` or after `shutdown`.
    #[error("channel is not initialized")]
    NotInitialized,
}

impl ChannelError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        ChannelError::Api {
            status,
            message: message.into(),
            tracking_id: None,
            errors: Vec::new(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ChannelError::Validation(message.into())
    }

    /// Whether a retry has any chance of succeeding.
    ///
    /// Rate limiting and upstream unavailability clear themselves; auth and
    /// request-shape failures never do.
    pub fn is_transient(&self) -> bool {
        match self {
            ChannelError::Api { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            ChannelError::Transport(_) => true,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ChannelError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
