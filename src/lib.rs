#![forbid(unsafe_code)]

//! Webex channel provider.
//!
//! Bridges the Webex REST/webhook API to the host's normalized message
//! envelopes. Two pipelines do the real work: [`send::RetryingSender`]
//! builds and delivers outbound messages with bounded retries, and
//! [`webhook::WebhookProcessor`] authenticates, filters, enriches and
//! normalizes inbound notifications. [`channel::WebexChannel`] ties both to
//! one account; [`router::WebhookRouter`] fans inbound HTTP traffic out to
//! concurrently-active accounts.

pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod router;
pub mod send;
pub mod testkit;
pub mod types;
pub mod verify;
pub mod webhook;

pub use api::{ApiExecutor, WebexApi};
pub use channel::{StopHandle, WebexChannel, start_account, start_account_with};
pub use config::{AccountConfig, DmPolicy};
pub use error::ChannelError;
pub use router::{DispatchOutcome, Registration, RouteGuard, WebhookHandler, WebhookRouter};
pub use send::{RetryingSender, Target, classify_target};
pub use types::{Attachment, Author, Envelope, Message, OutboundMessage};
pub use webhook::WebhookProcessor;
