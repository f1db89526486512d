use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD as B64, STANDARD_NO_PAD as B64_NO_PAD};
use serde_json::json;
use tracing::{debug, warn};

use crate::api::ApiExecutor;
use crate::config::AccountConfig;
use crate::error::ChannelError;
use crate::types::{Message, MessageRequest, OutboundMessage};

/// Webex rejects plain-text bodies above this many UTF-8 bytes.
pub const MAX_TEXT_BYTES: usize = 7439;

const MAX_BACKOFF: Duration = Duration::from_millis(30_000);
const JITTER_SPREAD: f64 = 0.3;

/// Base64 of `ciscospark://`, the prefix every opaque Webex id decodes from.
const SPARK_ID_PREFIX: &str = "Y2lzY29zcGFyazovL";

const CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.adaptive";

/// Target class a `to` address resolves to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Room(String),
    PersonId(String),
    PersonEmail(String),
}

/// Classify an opaque address into a Webex target.
///
/// Pure and heuristic: anything with an `@` is an email; opaque Webex ids
/// decode to a `ciscospark://` URI whose class segment says ROOM or PEOPLE.
/// Undecodable ids and unknown classes default to a room target, as does any
/// bare identifier.
pub fn classify_target(to: &str) -> Target {
    if to.contains('@') {
        return Target::PersonEmail(to.to_string());
    }
    if to.starts_with(SPARK_ID_PREFIX) {
        if let Some(uri) = decode_spark_uri(to) {
            if uri.contains("/PEOPLE/") {
                return Target::PersonId(to.to_string());
            }
        }
        return Target::Room(to.to_string());
    }
    Target::Room(to.to_string())
}

fn decode_spark_uri(id: &str) -> Option<String> {
    let bytes = B64
        .decode(id)
        .or_else(|_| B64_NO_PAD.decode(id))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Build the wire request for an outbound message, failing fast on anything
/// the provider would reject. No network call happens here.
pub fn build_request(msg: &OutboundMessage) -> Result<MessageRequest, ChannelError> {
    if msg.to.trim().is_empty() {
        return Err(ChannelError::validation("message target is empty"));
    }
    if msg.text.is_none() && msg.markdown.is_none() && msg.file.is_none() && msg.card.is_none() {
        return Err(ChannelError::validation(
            "message carries no text, markdown, file or card",
        ));
    }
    if let Some(text) = &msg.text
        && text.len() > MAX_TEXT_BYTES
    {
        return Err(ChannelError::validation(format!(
            "text is {} bytes, provider limit is {MAX_TEXT_BYTES}",
            text.len()
        )));
    }

    let mut request = MessageRequest {
        text: msg.text.clone(),
        markdown: msg.markdown.clone(),
        files: msg.file.clone().map(|url| vec![url]),
        parent_id: msg.parent_id.clone(),
        ..Default::default()
    };
    if let Some(card) = &msg.card {
        request.attachments = Some(vec![json!({
            "contentType": CARD_CONTENT_TYPE,
            "content": card,
        })]);
    }

    match classify_target(&msg.to) {
        Target::Room(id) => request.room_id = Some(id),
        Target::PersonId(id) => request.to_person_id = Some(id),
        Target::PersonEmail(email) => request.to_person_email = Some(email),
    }
    Ok(request)
}

/// Delay before re-running attempt `attempt` (1-indexed): exponential from
/// `base`, inflated by `jitter` in `[0, 0.3)`, capped at 30s.
fn backoff_delay(attempt: u32, base: Duration, jitter: f64) -> Duration {
    let pow = attempt.saturating_sub(1).min(16);
    let base_ms = base.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << pow);
    let with_jitter = (exp_ms as f64 * (1.0 + jitter)) as u64;
    Duration::from_millis(with_jitter).min(MAX_BACKOFF)
}

/// Ephemeral per-send retry bookkeeping. Created at the top of one `send`
/// call and discarded with it.
#[derive(Debug)]
struct RetryState {
    attempt: u32,
    max_retries: u32,
    base_delay: Duration,
    last_error: Option<ChannelError>,
}

impl RetryState {
    fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_retries,
            base_delay,
            last_error: None,
        }
    }

    /// Record a failed attempt. Returns the delay before the next attempt,
    /// or `None` once the budget is spent.
    fn record_failure(&mut self, err: ChannelError) -> Option<Duration> {
        self.attempt += 1;
        self.last_error = Some(err);
        if self.attempt > self.max_retries {
            return None;
        }
        let jitter = rand::random::<f64>() * JITTER_SPREAD;
        Some(backoff_delay(self.attempt, self.base_delay, jitter))
    }

    fn into_last_error(self) -> ChannelError {
        self.last_error
            .unwrap_or_else(|| ChannelError::validation("retry state without error"))
    }
}

/// Builds a provider request from a generic outbound message and drives it
/// through a bounded retry loop. Stateless between calls.
pub struct RetryingSender {
    api: Arc<dyn ApiExecutor>,
    max_retries: u32,
    base_delay: Duration,
}

impl RetryingSender {
    pub fn new(api: Arc<dyn ApiExecutor>, config: &AccountConfig) -> Self {
        Self {
            api,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    pub async fn send(&self, msg: &OutboundMessage) -> Result<Message, ChannelError> {
        let request = build_request(msg)?;
        let mut state = RetryState::new(self.max_retries, self.base_delay);

        loop {
            match self.api.create_message(&request).await {
                Ok(message) => {
                    debug!(msg_id = %message.id, "webex message sent");
                    return Ok(message);
                }
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => {
                    let reason = err.to_string();
                    match state.record_failure(err) {
                        Some(delay) => {
                            warn!(
                                attempt = state.attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %reason,
                                "transient webex send failure, backing off"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(state.into_last_error()),
                    }
                }
            }
        }
    }
}
