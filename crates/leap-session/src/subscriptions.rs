//! Standing subscriptions
//!
//! A subscription outlives the connection it was made on: when the session
//! reconnects, every entry is replayed under a fresh tag with the same
//! handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use leap_core::prelude::*;

/// Callback receiving the unwrapped body of each update.
pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

/// A URL and the handler its updates go to.
#[derive(Clone)]
pub struct Subscription {
    url: String,
    handler: Handler,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn new(url: impl Into<String>, handler: Handler) -> Self {
        Self {
            url: url.into(),
            handler,
        }
    }

    /// Wrap a typed handler; bodies that do not deserialize into `T` are
    /// logged and dropped.
    pub fn typed<T, F>(url: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let url = url.into();
        let label = url.clone();
        let handler: Handler = Arc::new(move |body: Value| match serde_json::from_value::<T>(body) {
            Ok(update) => handler(update),
            Err(e) => warn!("Dropping update for {}: {}", label, e),
        });
        Self { url, handler }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn handler(&self) -> Handler {
        self.handler.clone()
    }

    /// Deliver one update body.
    pub fn deliver(&self, body: Option<Value>) {
        (self.handler)(body.unwrap_or(Value::Null));
    }
}

/// Acknowledged subscriptions keyed by the tag the controller pushes under.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: HashMap<String, Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>, subscription: Subscription) {
        self.entries.insert(tag.into(), subscription);
    }

    pub fn get(&self, tag: &str) -> Option<&Subscription> {
        self.entries.get(tag)
    }

    /// Remove every entry for replay on a new connection.
    pub fn take_all(&mut self) -> Vec<(String, Subscription)> {
        self.entries.drain().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.entries.values().map(|s| s.url.clone()).collect();
        urls.sort();
        urls
    }
}
