use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::api::{ApiExecutor, WebexApi};
use crate::config::AccountConfig;
use crate::error::ChannelError;
use crate::router::{Registration, RouteGuard, WebhookHandler, WebhookRouter};
use crate::send::RetryingSender;
use crate::types::{Envelope, Message, OutboundMessage, WebhookRequest};
use crate::webhook::WebhookProcessor;

type Subscriber = Box<dyn Fn(&Envelope) -> anyhow::Result<()> + Send + Sync>;

struct Runtime {
    config: AccountConfig,
    api: Arc<dyn ApiExecutor>,
    sender: RetryingSender,
    processor: WebhookProcessor,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Runtime {
    /// Invoke every subscriber in registration order. A failing subscriber
    /// is logged and skipped; it never blocks the ones after it.
    fn notify(&self, envelope: &Envelope) {
        let subscribers = self.subscribers.lock().unwrap();
        for (index, subscriber) in subscribers.iter().enumerate() {
            if let Err(err) = subscriber(envelope) {
                warn!(index, error = %err, "envelope subscriber failed");
            }
        }
    }
}

/// Public surface for one Webex account: outbound sends, inbound webhook
/// processing and the subscriber list for normalized envelopes.
///
/// Lifecycle: `uninitialized -> initialized -> shut down`, with
/// re-initialization permitted after shutdown. Every operational method
/// fails with [`ChannelError::NotInitialized`] outside the initialized
/// state. Subscribers do not survive a shutdown.
#[derive(Default)]
pub struct WebexChannel {
    runtime: RwLock<Option<Arc<Runtime>>>,
}

impl WebexChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config, fetch the bot identity and transition to
    /// initialized. Uses the real Webex API client.
    pub async fn initialize(&self, config: AccountConfig) -> Result<(), ChannelError> {
        config.validate()?;
        let api = Arc::new(WebexApi::for_account(&config)?);
        self.initialize_with(api, config).await
    }

    /// Initialization seam for hosts and tests that supply their own
    /// executor.
    pub async fn initialize_with(
        &self,
        api: Arc<dyn ApiExecutor>,
        config: AccountConfig,
    ) -> Result<(), ChannelError> {
        config.validate()?;
        let processor = WebhookProcessor::initialize(api.clone(), &config).await?;
        let sender = RetryingSender::new(api.clone(), &config);
        let runtime = Arc::new(Runtime {
            config,
            api,
            sender,
            processor,
            subscribers: Mutex::new(Vec::new()),
        });
        info!(account = %runtime.config.name, "webex channel initialized");
        *self.runtime.write().unwrap() = Some(runtime);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.runtime.read().unwrap().is_some()
    }

    /// Drop the sender, processor and all subscribers. The channel returns
    /// to the uninitialized state and may be initialized again.
    pub fn shutdown(&self) {
        if let Some(runtime) = self.runtime.write().unwrap().take() {
            info!(account = %runtime.config.name, "webex channel shut down");
        }
    }

    fn runtime(&self) -> Result<Arc<Runtime>, ChannelError> {
        self.runtime
            .read()
            .unwrap()
            .clone()
            .ok_or(ChannelError::NotInitialized)
    }

    /// Register a subscriber for normalized envelopes. Invocation order is
    /// registration order.
    pub fn subscribe(
        &self,
        subscriber: impl Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Result<(), ChannelError> {
        let runtime = self.runtime()?;
        runtime.subscribers.lock().unwrap().push(Box::new(subscriber));
        Ok(())
    }

    pub async fn send(&self, msg: &OutboundMessage) -> Result<Message, ChannelError> {
        self.runtime()?.sender.send(msg).await
    }

    pub async fn send_text(
        &self,
        to: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<Message, ChannelError> {
        let msg = OutboundMessage {
            to: to.into(),
            text: Some(text.into()),
            ..Default::default()
        };
        self.send(&msg).await
    }

    pub async fn delete_message(&self, id: &str) -> Result<(), ChannelError> {
        self.runtime()?.api.delete_message(id).await
    }

    /// Process one inbound notification and fan the resulting envelope out
    /// to subscribers. `Ok(None)` means filtered or denied by policy.
    pub async fn handle_webhook(
        &self,
        payload: &Value,
        raw: &[u8],
        signature: Option<&str>,
    ) -> Result<Option<Envelope>, ChannelError> {
        let runtime = self.runtime()?;
        let envelope = runtime.processor.handle(payload, Some(raw), signature).await?;
        if let Some(envelope) = &envelope {
            runtime.notify(envelope);
        }
        Ok(envelope)
    }

    /// Ensure the provider-side webhook registration for this account:
    /// create the `messages/created` webhook pointing at the configured
    /// public URL, removing any registration of ours that points elsewhere.
    /// Safe to call repeatedly.
    pub async fn register_webhooks(&self) -> Result<(), ChannelError> {
        let runtime = self.runtime()?;
        let config = &runtime.config;
        let name = webhook_name(&config.name);

        let mut exists = false;
        for hook in runtime.api.list_webhooks().await? {
            if hook.name != name {
                continue;
            }
            if hook.resource == "messages"
                && hook.event == "created"
                && hook.target_url == config.webhook_url
            {
                exists = true;
            } else {
                info!(hook_id = %hook.id, target = %hook.target_url, "removing stale webhook");
                runtime.api.delete_webhook(&hook.id).await?;
            }
        }

        if !exists {
            let created = runtime
                .api
                .create_webhook(&WebhookRequest {
                    name,
                    target_url: config.webhook_url.clone(),
                    resource: "messages".into(),
                    event: "created".into(),
                    secret: config.webhook_secret.clone(),
                })
                .await?;
            info!(hook_id = %created.id, target = %created.target_url, "webhook registered with provider");
        }
        Ok(())
    }

    /// Remove this account's provider-side webhook registrations.
    pub async fn unregister_webhooks(&self) -> Result<(), ChannelError> {
        let runtime = self.runtime()?;
        let name = webhook_name(&runtime.config.name);
        for hook in runtime.api.list_webhooks().await? {
            if hook.name == name {
                runtime.api.delete_webhook(&hook.id).await?;
            }
        }
        Ok(())
    }

    /// Lightweight health probe: one authenticated `GET /people/me`,
    /// reporting round-trip latency.
    pub async fn probe(&self) -> Result<Duration, ChannelError> {
        let runtime = self.runtime()?;
        let started = Instant::now();
        runtime.api.get_me().await?;
        Ok(started.elapsed())
    }
}

fn webhook_name(account: &str) -> String {
    format!("{account}-messages-created")
}

#[async_trait]
impl WebhookHandler for WebexChannel {
    async fn handle_webhook(
        &self,
        payload: &Value,
        raw: &[u8],
        signature: Option<&str>,
    ) -> Result<Option<Envelope>, ChannelError> {
        WebexChannel::handle_webhook(self, payload, raw, signature).await
    }
}

/// Handle returned by [`start_account`]; stopping it unregisters the router
/// path and shuts the channel down.
pub struct StopHandle {
    channel: Arc<WebexChannel>,
    guard: Option<RouteGuard>,
}

impl StopHandle {
    pub fn path(&self) -> Option<&str> {
        self.guard.as_ref().map(|g| g.path())
    }

    pub fn stop(mut self) {
        if let Some(guard) = self.guard.take() {
            guard.unregister();
        }
        self.channel.shutdown();
    }
}

/// Account lifecycle hook for the host: initialize the channel, ensure the
/// provider-side webhook, register the inbound path and hand back a stop
/// handle.
pub async fn start_account(
    channel: Arc<WebexChannel>,
    router: &WebhookRouter,
    config: AccountConfig,
) -> Result<StopHandle, ChannelError> {
    config.validate()?;
    let api = Arc::new(WebexApi::for_account(&config)?);
    start_account_with(channel, router, config, api).await
}

/// [`start_account`] with an injected executor.
pub async fn start_account_with(
    channel: Arc<WebexChannel>,
    router: &WebhookRouter,
    config: AccountConfig,
    api: Arc<dyn ApiExecutor>,
) -> Result<StopHandle, ChannelError> {
    let account = config.name.clone();
    let path = config.webhook_path()?;
    channel.initialize_with(api, config).await?;
    channel.register_webhooks().await?;
    let guard = router.register(
        &path,
        Registration {
            account,
            handler: channel.clone(),
        },
    );
    Ok(StopHandle {
        channel,
        guard: Some(guard),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{MockApi, StubResponse};
    use reqwest::Method;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> AccountConfig {
        AccountConfig::new("acme", "TOKEN", "https://bots.example.com/webex/acme")
    }

    fn mock_api() -> Arc<MockApi> {
        let api = Arc::new(MockApi::default());
        api.stub(
            Method::GET,
            "/people/me",
            vec![StubResponse::Ok(json!({"id": "bot-self", "emails": ["bot@webex.bot"]}))],
        );
        api
    }

    fn notification_payload() -> Value {
        json!({
            "resource": "messages",
            "event": "created",
            "data": {
                "id": "mid-1",
                "roomId": "room-1",
                "roomType": "group",
                "personId": "person-7",
                "created": "2024-01-01T00:00:00.000Z"
            }
        })
    }

    fn stub_fetched_message(api: &MockApi) {
        api.stub(
            Method::GET,
            "/messages/mid-1",
            vec![StubResponse::Ok(json!({
                "id": "mid-1",
                "roomId": "room-1",
                "personId": "person-7",
                "text": "hi"
            }))],
        );
    }

    #[tokio::test]
    async fn operations_fail_before_initialization() {
        let channel = WebexChannel::new();
        assert!(matches!(
            channel.send_text("room-1", "hi").await,
            Err(ChannelError::NotInitialized)
        ));
        assert!(matches!(
            channel
                .handle_webhook(&notification_payload(), b"{}", None)
                .await,
            Err(ChannelError::NotInitialized)
        ));
        assert!(matches!(
            channel.register_webhooks().await,
            Err(ChannelError::NotInitialized)
        ));
        assert!(matches!(
            channel.subscribe(|_| Ok(())),
            Err(ChannelError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn initialize_rejects_invalid_config() {
        let channel = WebexChannel::new();
        let mut bad = config();
        bad.webhook_url = "not a url".into();
        assert!(channel.initialize_with(mock_api(), bad).await.is_err());
        assert!(!channel.is_initialized());
    }

    #[tokio::test]
    async fn send_text_delivers_through_sender() {
        let api = mock_api();
        api.stub(
            Method::POST,
            "/messages",
            vec![StubResponse::Ok(json!({"id": "mid-9", "roomId": "room-1"}))],
        );
        let channel = WebexChannel::new();
        channel.initialize_with(api.clone(), config()).await.unwrap();
        let message = channel.send_text("room-1", "hi").await.unwrap();
        assert_eq!(message.id, "mid-9");
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn subscribers_run_in_order_and_failures_are_isolated() {
        let api = mock_api();
        stub_fetched_message(&api);
        let channel = WebexChannel::new();
        channel.initialize_with(api, config()).await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        channel
            .subscribe(move |_| {
                first.lock().unwrap().push("first");
                Err(anyhow::anyhow!("subscriber exploded"))
            })
            .unwrap();
        let second = order.clone();
        channel
            .subscribe(move |envelope| {
                second.lock().unwrap().push("second");
                assert_eq!(envelope.id, "mid-1");
                Ok(())
            })
            .unwrap();

        let payload = notification_payload();
        let raw = serde_json::to_vec(&payload).unwrap();
        let envelope = channel.handle_webhook(&payload, &raw, None).await.unwrap();
        assert!(envelope.is_some());
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert!(logs_contain("envelope subscriber failed"));
    }

    #[tokio::test]
    async fn reinitialization_drops_prior_subscribers() {
        let api = mock_api();
        stub_fetched_message(&api);
        let channel = WebexChannel::new();
        channel.initialize_with(api.clone(), config()).await.unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        channel
            .subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        channel.shutdown();
        assert!(!channel.is_initialized());
        channel.initialize_with(api, config()).await.unwrap();

        let payload = notification_payload();
        let raw = serde_json::to_vec(&payload).unwrap();
        channel.handle_webhook(&payload, &raw, None).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0, "old subscriber must be gone");
    }

    #[tokio::test]
    async fn register_webhooks_is_idempotent() {
        let api = mock_api();
        api.stub(Method::GET, "/webhooks", vec![
            StubResponse::Ok(json!({"items": []})),
            StubResponse::Ok(json!({"items": [{
                "id": "wh-1",
                "name": "acme-messages-created",
                "targetUrl": "https://bots.example.com/webex/acme",
                "resource": "messages",
                "event": "created"
            }]})),
        ]);
        api.stub(
            Method::POST,
            "/webhooks",
            vec![StubResponse::Ok(json!({
                "id": "wh-1",
                "name": "acme-messages-created",
                "targetUrl": "https://bots.example.com/webex/acme",
                "resource": "messages",
                "event": "created"
            }))],
        );
        let channel = WebexChannel::new();
        channel.initialize_with(api.clone(), config()).await.unwrap();

        channel.register_webhooks().await.unwrap();
        channel.register_webhooks().await.unwrap();
        assert_eq!(api.call_count(Method::POST, "/webhooks"), 1);
    }

    #[tokio::test]
    async fn register_webhooks_replaces_stale_target() {
        let api = mock_api();
        api.stub(
            Method::GET,
            "/webhooks",
            vec![StubResponse::Ok(json!({"items": [{
                "id": "wh-old",
                "name": "acme-messages-created",
                "targetUrl": "https://old.example.com/webex/acme",
                "resource": "messages",
                "event": "created"
            }]}))],
        );
        api.stub(Method::DELETE, "/webhooks/wh-old", vec![StubResponse::Ok(Value::Null)]);
        api.stub(
            Method::POST,
            "/webhooks",
            vec![StubResponse::Ok(json!({
                "id": "wh-new",
                "name": "acme-messages-created",
                "targetUrl": "https://bots.example.com/webex/acme",
                "resource": "messages",
                "event": "created"
            }))],
        );
        let channel = WebexChannel::new();
        channel.initialize_with(api.clone(), config()).await.unwrap();
        channel.register_webhooks().await.unwrap();
        assert_eq!(api.call_count(Method::DELETE, "/webhooks/wh-old"), 1);
        assert_eq!(api.call_count(Method::POST, "/webhooks"), 1);
    }

    #[tokio::test]
    async fn unregister_webhooks_removes_only_own_hooks() {
        let api = mock_api();
        api.stub(
            Method::GET,
            "/webhooks",
            vec![StubResponse::Ok(json!({"items": [
                {
                    "id": "wh-1",
                    "name": "acme-messages-created",
                    "targetUrl": "https://bots.example.com/webex/acme",
                    "resource": "messages",
                    "event": "created"
                },
                {
                    "id": "wh-other",
                    "name": "someone-else",
                    "targetUrl": "https://elsewhere.example.com/hook",
                    "resource": "messages",
                    "event": "created"
                }
            ]}))],
        );
        api.stub(Method::DELETE, "/webhooks/wh-1", vec![StubResponse::Ok(Value::Null)]);
        let channel = WebexChannel::new();
        channel.initialize_with(api.clone(), config()).await.unwrap();
        channel.unregister_webhooks().await.unwrap();
        assert_eq!(api.call_count(Method::DELETE, "/webhooks/wh-1"), 1);
        assert_eq!(api.call_count(Method::DELETE, "/webhooks/wh-other"), 0);
    }

    #[tokio::test]
    async fn start_account_registers_path_and_stop_unwinds() {
        let api = mock_api();
        api.stub(Method::GET, "/webhooks", vec![StubResponse::Ok(json!({"items": []}))]);
        api.stub(
            Method::POST,
            "/webhooks",
            vec![StubResponse::Ok(json!({
                "id": "wh-1",
                "name": "acme-messages-created",
                "targetUrl": "https://bots.example.com/webex/acme",
                "resource": "messages",
                "event": "created"
            }))],
        );

        let router = WebhookRouter::new();
        let channel = Arc::new(WebexChannel::new());
        let handle = start_account_with(channel.clone(), &router, config(), api)
            .await
            .unwrap();

        assert_eq!(handle.path(), Some("/webex/acme"));
        assert!(router.is_registered("/webex/acme"));
        assert!(channel.is_initialized());

        handle.stop();
        assert!(!router.is_registered("/webex/acme"));
        assert!(!channel.is_initialized());
    }

    #[tokio::test]
    async fn probe_reports_latency() {
        let api = mock_api();
        let channel = WebexChannel::new();
        channel.initialize_with(api, config()).await.unwrap();
        let latency = channel.probe().await.unwrap();
        assert!(latency < Duration::from_secs(1));
    }
}
