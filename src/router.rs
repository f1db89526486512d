use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use axum::http::Method;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::ChannelError;
use crate::types::Envelope;

/// Processing seam between the router and an account's channel. The facade
/// implements this; tests substitute their own.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle_webhook(
        &self,
        payload: &Value,
        raw: &[u8],
        signature: Option<&str>,
    ) -> Result<Option<Envelope>, ChannelError>;
}

#[derive(Clone)]
pub struct Registration {
    pub account: String,
    pub handler: Arc<dyn WebhookHandler>,
}

struct Entry {
    id: u64,
    registration: Registration,
}

/// Outcome of dispatching one inbound HTTP request. `NotFound` means the
/// path is not ours and the caller may fall through to other handlers.
#[derive(Debug)]
pub enum DispatchOutcome {
    NotFound,
    MethodNotAllowed,
    BadRequest(&'static str),
    Unauthorized,
    Handled,
    Internal,
}

/// Maps inbound webhook paths to account registrations. The one shared
/// mutable structure in the system: registrations come and go while
/// dispatch lookups are in flight.
#[derive(Default)]
pub struct WebhookRouter {
    routes: Arc<DashMap<String, Entry>>,
    next_id: AtomicU64,
}

/// Capability token for one registration. Dropping it (or calling
/// `unregister`) removes the route; a route re-registered in the meantime
/// is left alone.
pub struct RouteGuard {
    routes: Arc<DashMap<String, Entry>>,
    path: String,
    id: u64,
}

impl RouteGuard {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn unregister(self) {}
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        let id = self.id;
        self.routes.remove_if(&self.path, |_, entry| entry.id == id);
    }
}

/// Ensure a leading slash and strip trailing slashes (except on the root),
/// so registration and dispatch agree on `/hook` vs `/hook/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

impl WebhookRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: &str, registration: Registration) -> RouteGuard {
        let path = normalize_path(path);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(path = %path, account = %registration.account, "webhook path registered");
        self.routes.insert(path.clone(), Entry { id, registration });
        RouteGuard {
            routes: self.routes.clone(),
            path,
            id,
        }
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.routes.contains_key(&normalize_path(path))
    }

    pub async fn dispatch(
        &self,
        path: &str,
        method: &Method,
        body: &[u8],
        signature: Option<&str>,
    ) -> DispatchOutcome {
        let path = normalize_path(path);
        // Snapshot the registration so the dashmap guard is not held across
        // the handler await.
        let registration = match self.routes.get(&path) {
            Some(entry) => entry.registration.clone(),
            None => return DispatchOutcome::NotFound,
        };

        if method != Method::POST {
            return DispatchOutcome::MethodNotAllowed;
        }

        let payload: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(err) => {
                warn!(path = %path, error = %err, "webhook body is not valid json");
                return DispatchOutcome::BadRequest("invalid JSON");
            }
        };

        match registration
            .handler
            .handle_webhook(&payload, body, signature)
            .await
        {
            Ok(Some(envelope)) => {
                info!(
                    path = %path,
                    account = %registration.account,
                    msg_id = %envelope.id,
                    "webhook processed"
                );
                DispatchOutcome::Handled
            }
            Ok(None) => DispatchOutcome::Handled,
            Err(ChannelError::Signature) => {
                warn!(path = %path, account = %registration.account, "webhook signature rejected");
                DispatchOutcome::Unauthorized
            }
            Err(ChannelError::Validation(reason)) => {
                warn!(path = %path, error = %reason, "webhook payload rejected");
                DispatchOutcome::BadRequest("invalid notification")
            }
            Err(err) => {
                error!(path = %path, account = %registration.account, error = %err, "webhook processing failed");
                DispatchOutcome::Internal
            }
        }
    }
}
