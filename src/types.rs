use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A provider-agnostic outbound message as handed to the channel by the host.
///
/// `to` is an opaque address: an email, a Webex person id, a Webex room id,
/// or a bare room identifier. It is disambiguated at send time.
#[derive(Clone, Debug, Default)]
pub struct OutboundMessage {
    pub to: String,
    pub text: Option<String>,
    pub markdown: Option<String>,
    /// At most one file, referenced by URL.
    pub file: Option<String>,
    /// At most one adaptive-card payload, passed through opaquely.
    pub card: Option<Value>,
    /// Thread parent, when replying inside a thread.
    pub parent_id: Option<String>,
}

/// The `POST /messages` wire shape. Exactly one of the three targets is set.
/// Built once per send and reused unchanged across retries.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_person_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_person_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// A message as returned by `GET /messages/{id}` or `POST /messages`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub room_type: Option<String>,
    #[serde(default)]
    pub person_id: Option<String>,
    #[serde(default)]
    pub person_email: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<String>>,
    #[serde(default)]
    pub attachments: Option<Vec<Value>>,
    #[serde(default)]
    pub mentioned_people: Option<Vec<String>>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
}

/// The `GET /people/me` shape; used to cache the bot's own identity.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "type")]
    pub person_type: Option<String>,
}

/// The asynchronous push payload delivered to the webhook endpoint.
/// Carries identifiers only; the authoritative message content must be
/// fetched separately.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub data: Option<NotificationData>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub id: String,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub room_type: Option<String>,
    #[serde(default)]
    pub person_id: Option<String>,
    #[serde(default)]
    pub person_email: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub mentioned_people: Option<Vec<String>>,
    #[serde(default)]
    pub mentioned_groups: Option<Vec<String>>,
    #[serde(default)]
    pub files: Option<Vec<String>>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(flatten)]
    #[serde(default)]
    pub additional: BTreeMap<String, Value>,
}

/// Webhook registration wire shapes (`/webhooks` CRUD).
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    pub name: String,
    pub target_url: String,
    pub resource: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookInfo {
    pub id: String,
    pub name: String,
    pub target_url: String,
    pub resource: String,
    pub event: String,
}

/// The author of an inbound message.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Author {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub is_bot: bool,
}

/// A typed inbound attachment. Webex file attachments arrive as URLs; card
/// attachments carry their adaptive-card content opaquely.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    File { url: String },
    Card { content: Value },
}

/// The normalized inbound representation handed to subscribers.
///
/// Built once per accepted notification and shared read-only; the raw
/// provider payload is retained for downstream consumers that need fields
/// the normalization does not carry.
#[derive(Clone, Debug, Serialize)]
pub struct Envelope {
    pub id: String,
    pub provider: &'static str,
    pub room_id: String,
    /// `direct` or `group`, as reported by Webex.
    pub room_type: Option<String>,
    pub author: Author,
    pub text: Option<String>,
    pub markdown: Option<String>,
    pub attachments: Vec<Attachment>,
    pub created: Option<String>,
    pub mentioned_people: Vec<String>,
    pub parent_id: Option<String>,
    pub raw: Value,
}
