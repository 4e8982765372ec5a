//! Topic-keyed correlation of outbound requests with their responses.
//!
//! Each registered request owns a one-shot completion. Resolving, discarding
//! or cancelling removes the entry, so a request completes at most once;
//! late or duplicate responses find nothing and are logged.
//!
//! Topics are reused across attempts, so every registration also carries a
//! [`RequestId`]. Callers giving up on their own request discard by id and
//! never touch a newer registration on the same topic.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    error::WalletError,
    wallet::{RequestKind, Topic},
};

/// Receiving half handed to the caller awaiting a response.
pub type Completion<T> = oneshot::Receiver<Result<T, WalletError>>;

/// Identity of one registration, unique per correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

/// Handle returned by [`RequestCorrelator::register`].
#[derive(Debug)]
pub struct Registration<T> {
    /// Identity of the registration.
    pub id: RequestId,
    /// Resolves once the request completes.
    pub completion: Completion<T>,
}

/// A request awaiting its response.
#[derive(Debug)]
pub struct PendingRequest<T> {
    id: RequestId,
    kind: RequestKind,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    completion: oneshot::Sender<Result<T, WalletError>>,
}

impl<T> PendingRequest<T> {
    /// Identity of the registration.
    #[must_use]
    pub const fn id(&self) -> RequestId { self.id }

    /// Kind of request.
    #[must_use]
    pub const fn kind(&self) -> RequestKind { self.kind }

    /// When the request was registered.
    #[must_use]
    pub const fn issued_at(&self) -> DateTime<Utc> { self.issued_at }

    /// Provider-imposed expiry, if any.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> { self.expires_at }

    fn complete(self, topic: &Topic, outcome: Result<T, WalletError>) {
        if self.completion.send(outcome).is_err() {
            debug!(%topic, "requester dropped before completion");
        }
    }
}

/// Map from correlation topic to the request awaiting it.
#[derive(Debug)]
pub struct RequestCorrelator<T> {
    pending: HashMap<Topic, PendingRequest<T>>,
    next_id: u64,
}

impl<T> Default for RequestCorrelator<T> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<T> RequestCorrelator<T> {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register a request under `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::RequestPending`] if `topic` already has an
    /// unresolved request.
    pub fn register(
        &mut self,
        topic: Topic,
        kind: RequestKind,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Registration<T>, WalletError> {
        if self.pending.contains_key(&topic) {
            return Err(WalletError::RequestPending(topic.to_string()));
        }
        let id = RequestId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        let (completion, receiver) = oneshot::channel();
        debug!(%topic, ?kind, "registered pending request");
        self.pending.insert(
            topic,
            PendingRequest {
                id,
                kind,
                issued_at: Utc::now(),
                expires_at,
                completion,
            },
        );
        Ok(Registration {
            id,
            completion: receiver,
        })
    }

    /// Look up the request registered under `topic`.
    #[must_use]
    pub fn get(&self, topic: &Topic) -> Option<&PendingRequest<T>> { self.pending.get(topic) }

    /// Kind of the request registered under `topic`.
    #[must_use]
    pub fn kind_of(&self, topic: &Topic) -> Option<RequestKind> {
        self.pending.get(topic).map(PendingRequest::kind)
    }

    /// Complete the request registered under `topic`.
    ///
    /// Returns the kind of the resolved request, or `None` (after logging)
    /// when no request was waiting.
    pub fn resolve(
        &mut self,
        topic: &Topic,
        outcome: Result<T, WalletError>,
    ) -> Option<RequestKind> {
        let Some(pending) = self.pending.remove(topic) else {
            warn!(%topic, "response without a pending request");
            return None;
        };
        let kind = pending.kind();
        pending.complete(topic, outcome);
        Some(kind)
    }

    /// Drop the request registered under `topic` as `id` without
    /// completing it.
    ///
    /// The awaiting caller observes a closed channel. Returns `None` and
    /// leaves the entry alone when `topic` now belongs to another
    /// registration.
    pub fn discard(&mut self, topic: &Topic, id: RequestId) -> Option<RequestKind> {
        if self.pending.get(topic).map(PendingRequest::id) != Some(id) {
            return None;
        }
        self.pending.remove(topic).map(|pending| pending.kind())
    }

    /// Fail every pending request with [`WalletError::Cancelled`].
    ///
    /// Returns the number of requests cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        for (topic, pending) in self.pending.drain() {
            pending.complete(&topic, Err(WalletError::Cancelled));
        }
        if count > 0 {
            debug!(count, "cancelled pending requests");
        }
        count
    }

    /// Number of unresolved requests.
    #[must_use]
    pub fn len(&self) -> usize { self.pending.len() }

    /// Returns `true` when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.pending.is_empty() }
}
