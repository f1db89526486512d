//! In-memory API executor for exercising the pipelines without a network.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::api::ApiExecutor;
use crate::error::ChannelError;

/// A canned response for one stubbed route.
#[derive(Clone, Debug)]
pub enum StubResponse {
    Ok(Value),
    /// A non-2xx API error with the given status.
    Status(u16),
    /// A network-level failure (no HTTP response at all).
    Transport,
}

impl StubResponse {
    fn into_result(self) -> Result<Value, ChannelError> {
        match self {
            StubResponse::Ok(value) => Ok(value),
            StubResponse::Status(status) => {
                Err(ChannelError::api(status, format!("stubbed HTTP {status}")))
            }
            StubResponse::Transport => {
                Err(ChannelError::Transport(anyhow!("connection reset by peer")))
            }
        }
    }
}

struct RouteStub {
    responses: Vec<StubResponse>,
    hits: usize,
}

/// Route-based mock executor. Responses for a route are consumed in order;
/// the last one repeats once the sequence is exhausted.
#[derive(Default)]
pub struct MockApi {
    calls: Mutex<Vec<(Method, String)>>,
    routes: Mutex<HashMap<String, RouteStub>>,
}

impl MockApi {
    pub fn stub(&self, method: Method, path: &str, responses: Vec<StubResponse>) {
        assert!(!responses.is_empty(), "stub needs at least one response");
        self.routes.lock().unwrap().insert(
            route_key(&method, path),
            RouteStub { responses, hits: 0 },
        );
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(Method, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, p)| *m == method && p == path)
            .count()
    }
}

fn route_key(method: &Method, path: &str) -> String {
    format!("{method} {path}")
}

#[async_trait]
impl ApiExecutor for MockApi {
    async fn execute(
        &self,
        method: Method,
        path: &str,
        _body: Option<Value>,
    ) -> Result<Value, ChannelError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.clone(), path.to_string()));

        let mut routes = self.routes.lock().unwrap();
        let Some(stub) = routes.get_mut(&route_key(&method, path)) else {
            return Err(ChannelError::api(404, format!("no stub for {method} {path}")));
        };
        let index = stub.hits.min(stub.responses.len() - 1);
        stub.hits += 1;
        stub.responses[index].clone().into_result()
    }
}
