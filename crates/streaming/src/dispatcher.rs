//! Topic routing and the per-exchange message handler seam
//!
//! A [`Router`] resolves a topic string to a route once per frame: exact key
//! first, then the longest registered prefix, then the longest key contained
//! anywhere in the topic. Unknown topics resolve to `None` and are left
//! unhandled.

use crate::client::StreamingClient;
use crate::errors::ExchangeError;
use crate::transport::OutboundFrame;
use serde_json::Value;
use std::collections::HashMap;

/// Receives everything a [`StreamingClient`] observes
///
/// All callbacks run synchronously on the client's dispatch task, in frame
/// arrival order.
pub trait MessageHandler {
    /// One decoded inbound frame
    fn handle_message(&self, client: &StreamingClient, message: Value);

    /// Application-level keepalive frame; `None` sends a protocol ping
    fn ping(&self, _client: &StreamingClient) -> Option<OutboundFrame> {
        None
    }

    fn on_connected(&self, _client: &StreamingClient) {}

    /// Connection-fatal error, after every pending future was rejected
    fn on_error(&self, _client: &StreamingClient, _error: &ExchangeError) {}

    /// Socket closed; `error` is what pending futures were rejected with
    fn on_close(&self, _client: &StreamingClient, _error: &ExchangeError) {}
}

/// Most-specific-match routing table
#[derive(Debug, Clone)]
pub struct Router<R> {
    exact: HashMap<String, R>,
    prefixes: Vec<(String, R)>,
    contained: Vec<(String, R)>,
}

impl<R: Clone> Default for Router<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Clone> Router<R> {
    pub fn new() -> Self {
        Self {
            exact: HashMap::new(),
            prefixes: Vec::new(),
            contained: Vec::new(),
        }
    }

    pub fn exact(mut self, topic: &str, route: R) -> Self {
        self.exact.insert(topic.to_string(), route);
        self
    }

    pub fn prefix(mut self, prefix: &str, route: R) -> Self {
        self.prefixes.push((prefix.to_string(), route));
        // Longest first so the first hit is the most specific
        self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    pub fn contains(mut self, fragment: &str, route: R) -> Self {
        self.contained.push((fragment.to_string(), route));
        self.contained.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    pub fn route(&self, topic: &str) -> Option<R> {
        if topic.is_empty() {
            return None;
        }
        if let Some(route) = self.exact.get(topic) {
            return Some(route.clone());
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| topic.starts_with(prefix.as_str()))
            .or_else(|| {
                self.contained
                    .iter()
                    .find(|(fragment, _)| topic.contains(fragment.as_str()))
            })
            .map(|(_, route)| route.clone())
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len() + self.contained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
