//! In-flight request table
//!
//! Correlates outgoing `ClientTag`s with the callers waiting on them. Each
//! entry is settled exactly once: by its response, by its timeout timer, or
//! by cancellation when the session goes away.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use leap_core::prelude::*;
use leap_core::{Request, Response};

use crate::subscriptions::Subscription;

/// Receiver side of a registered request.
pub type ResponseReceiver = oneshot::Receiver<Result<Response>>;

/// A request waiting for its response.
pub struct PendingRequest {
    request: Request,
    response_tx: oneshot::Sender<Result<Response>>,
    timer: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("request", &self.request)
            .field("subscription", &self.subscription.is_some())
            .finish()
    }
}

impl PendingRequest {
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The subscription to register if this request is acknowledged.
    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    /// Settle with `result`, stopping the timeout timer.
    pub fn resolve(mut self, result: Result<Response>) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let _ = self.response_tx.send(result);
    }

    /// Settle with the synthetic timeout response. Called from the timer itself.
    pub fn expire(mut self) {
        self.timer = None;
        let _ = self.response_tx.send(Ok(Response::timeout()));
    }
}

/// Requests keyed by tag.
#[derive(Debug, Default)]
pub struct RequestTracker {
    pending: HashMap<String, PendingRequest>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `request` under its tag.
    ///
    /// An entry already holding the tag is failed with [`Error::TagReused`]
    /// before the new one takes its place.
    pub fn register(
        &mut self,
        request: Request,
        subscription: Option<Subscription>,
        timer: Option<JoinHandle<()>>,
    ) -> ResponseReceiver {
        let tag = request.tag().to_string();
        if let Some(stale) = self.pending.remove(&tag) {
            warn!("Tag {} reused while a request was in flight", tag);
            stale.resolve(Err(Error::tag_reused(&tag)));
        }

        let (response_tx, response_rx) = oneshot::channel();
        self.pending.insert(
            tag,
            PendingRequest {
                request,
                response_tx,
                timer,
                subscription,
            },
        );
        response_rx
    }

    /// Remove the entry for `tag`, leaving it to the caller to settle.
    pub fn take(&mut self, tag: &str) -> Option<PendingRequest> {
        self.pending.remove(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.pending.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.pending.drain().map(|(_, pending)| pending).collect()
    }

    /// Fail every entry with [`Error::RequestCancelled`].
    pub fn cancel_all(&mut self) -> usize {
        let drained = self.drain();
        let count = drained.len();
        for pending in drained {
            pending.resolve(Err(Error::RequestCancelled));
        }
        count
    }
}
