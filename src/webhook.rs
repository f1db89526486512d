use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::api::ApiExecutor;
use crate::config::{AccountConfig, DmPolicy};
use crate::error::ChannelError;
use crate::types::{Attachment, Author, Envelope, Message, Notification, NotificationData, Person};
use crate::verify;

const CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.adaptive";

/// Filters, authorizes, enriches and normalizes one webhook notification at
/// a time. The only state carried across calls is the bot's own identity,
/// fetched once at initialization.
pub struct WebhookProcessor {
    api: Arc<dyn ApiExecutor>,
    dm_policy: DmPolicy,
    allow_from: Vec<String>,
    secret: Option<String>,
    me: Person,
}

impl std::fmt::Debug for WebhookProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookProcessor")
            .field("dm_policy", &self.dm_policy)
            .field("allow_from", &self.allow_from)
            .field("me", &self.me)
            .finish_non_exhaustive()
    }
}

impl WebhookProcessor {
    /// Fetch the bot's own identity and build the processor. If the identity
    /// fetch fails there is no processor: self-filtering cannot work without
    /// it, so callers never see a half-usable instance.
    pub async fn initialize(
        api: Arc<dyn ApiExecutor>,
        config: &AccountConfig,
    ) -> Result<Self, ChannelError> {
        let me = api.get_me().await?;
        debug!(bot_id = %me.id, "webex webhook processor initialized");
        Ok(Self {
            api,
            dm_policy: config.dm_policy,
            allow_from: config.allow_from.clone(),
            secret: config.webhook_secret.clone(),
            me,
        })
    }

    /// Process one notification. `Ok(None)` is the expected outcome for
    /// traffic that is filtered or denied by policy; errors are reserved for
    /// bad signatures, malformed payloads and failed enrichment.
    pub async fn handle(
        &self,
        payload: &Value,
        raw: Option<&[u8]>,
        signature: Option<&str>,
    ) -> Result<Option<Envelope>, ChannelError> {
        let notification: Notification = serde_json::from_value(payload.clone())
            .map_err(|err| ChannelError::validation(format!("malformed notification: {err}")))?;

        if notification.resource.as_deref() != Some("messages")
            || notification.event.as_deref() != Some("created")
        {
            debug!(
                resource = notification.resource.as_deref().unwrap_or("-"),
                event = notification.event.as_deref().unwrap_or("-"),
                "ignoring non-message webhook"
            );
            return Ok(None);
        }

        let data = notification
            .data
            .as_ref()
            .ok_or_else(|| ChannelError::validation("notification has no data payload"))?;

        // Our own messages come back through the webhook; dropping them here
        // is what prevents reply feedback loops.
        if data.person_id.as_deref() == Some(self.me.id.as_str()) {
            return Ok(None);
        }

        if let (Some(secret), Some(signature), Some(raw)) =
            (self.secret.as_deref(), signature, raw)
            && !verify::verify(raw, signature, Some(secret))
        {
            return Err(ChannelError::Signature);
        }

        if data.room_type.as_deref() == Some("direct") && !self.dm_allowed(data) {
            info!(
                person = data.person_id.as_deref().unwrap_or("-"),
                "direct message denied by policy"
            );
            return Ok(None);
        }

        // The push payload only carries identifiers; the authoritative
        // content lives behind GET /messages/{id}.
        let message = self.api.get_message(&data.id).await?;

        Ok(Some(normalize(data, message, payload.clone())))
    }

    fn dm_allowed(&self, data: &NotificationData) -> bool {
        match self.dm_policy {
            DmPolicy::Allow => true,
            DmPolicy::Deny => false,
            DmPolicy::Allowlisted => {
                // Empty allow-list denies everything: closed by default.
                self.allow_from.iter().any(|entry| {
                    data.person_id.as_deref() == Some(entry.as_str())
                        || data
                            .person_email
                            .as_deref()
                            .is_some_and(|email| email.eq_ignore_ascii_case(entry))
                })
            }
        }
    }
}

fn normalize(data: &NotificationData, message: Message, raw: Value) -> Envelope {
    let mut attachments = Vec::new();
    for url in message.files.iter().flatten() {
        attachments.push(Attachment::File { url: url.clone() });
    }
    for attachment in message.attachments.iter().flatten() {
        if attachment.get("contentType").and_then(Value::as_str) == Some(CARD_CONTENT_TYPE) {
            attachments.push(Attachment::Card {
                content: attachment.get("content").cloned().unwrap_or(Value::Null),
            });
        }
    }

    let email = message
        .person_email
        .clone()
        .or_else(|| data.person_email.clone());
    // Webex bot accounts carry @webex.bot addresses.
    let is_bot = email
        .as_deref()
        .is_some_and(|e| e.to_ascii_lowercase().ends_with("@webex.bot"));

    Envelope {
        id: message.id,
        provider: "webex",
        room_id: message
            .room_id
            .or_else(|| data.room_id.clone())
            .unwrap_or_default(),
        room_type: message.room_type.or_else(|| data.room_type.clone()),
        author: Author {
            id: message
                .person_id
                .or_else(|| data.person_id.clone())
                .unwrap_or_default(),
            email,
            display_name: None,
            is_bot,
        },
        text: message.text,
        markdown: message.markdown,
        attachments,
        created: message.created.or_else(|| data.created.clone()),
        mentioned_people: message
            .mentioned_people
            .or_else(|| data.mentioned_people.clone())
            .unwrap_or_default(),
        parent_id: message.parent_id.or_else(|| data.parent_id.clone()),
        raw,
    }
}
