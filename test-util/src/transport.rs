//! Recording implementations of the link opener and relay transport.

use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use tokio::sync::Notify;
use wallet_bridge::{
    WalletError,
    deeplink::{DeepLink, LinkOpener, RelayTransport},
    provider::RelayMessage,
};

use crate::lock;

/// Link opener that records every link and optionally refuses them.
#[derive(Debug)]
pub struct RecordingOpener {
    accept: AtomicBool,
    links: Mutex<Vec<DeepLink>>,
    opened: Notify,
}

impl RecordingOpener {
    /// Opener that reports every link as handled.
    #[must_use]
    pub fn accepting() -> Arc<Self> { Arc::new(Self::with_acceptance(true)) }

    /// Opener that behaves as if no wallet app were installed.
    #[must_use]
    pub fn refusing() -> Arc<Self> { Arc::new(Self::with_acceptance(false)) }

    fn with_acceptance(accept: bool) -> Self {
        Self {
            accept: AtomicBool::new(accept),
            links: Mutex::new(Vec::new()),
            opened: Notify::new(),
        }
    }

    /// Every link opened so far.
    #[must_use]
    pub fn links(&self) -> Vec<DeepLink> { lock(&self.links).clone() }

    /// Number of links opened so far.
    #[must_use]
    pub fn count(&self) -> usize { lock(&self.links).len() }

    /// Wait until the `n`th link (1-based) has been opened and return it.
    pub async fn nth(&self, n: usize) -> DeepLink {
        loop {
            let notified = self.opened.notified();
            if let Some(link) = n.checked_sub(1).and_then(|i| lock(&self.links).get(i).cloned()) {
                return link;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl LinkOpener for RecordingOpener {
    async fn open(&self, link: &DeepLink) -> bool {
        lock(&self.links).push(link.clone());
        self.opened.notify_waiters();
        self.accept.load(Ordering::SeqCst)
    }
}

/// Relay transport that records published messages.
#[derive(Debug)]
pub struct RecordingRelay {
    fail: AtomicBool,
    messages: Mutex<Vec<RelayMessage>>,
    published: Notify,
}

impl RecordingRelay {
    /// Relay accepting every message.
    #[must_use]
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
            messages: Mutex::new(Vec::new()),
            published: Notify::new(),
        })
    }

    /// Make later publishes fail.
    pub fn set_fail(&self, fail: bool) { self.fail.store(fail, Ordering::SeqCst); }

    /// Every message published so far.
    #[must_use]
    pub fn messages(&self) -> Vec<RelayMessage> { lock(&self.messages).clone() }

    /// Wait until the `n`th message (1-based) has been published and return
    /// it.
    pub async fn nth(&self, n: usize) -> RelayMessage {
        loop {
            let notified = self.published.notified();
            if let Some(message) =
                n.checked_sub(1).and_then(|i| lock(&self.messages).get(i).cloned())
            {
                return message;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl RelayTransport for RecordingRelay {
    async fn publish(&self, message: &RelayMessage) -> Result<(), WalletError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(WalletError::ConnectionFailed("relay unavailable".to_owned()));
        }
        lock(&self.messages).push(message.clone());
        self.published.notify_waiters();
        Ok(())
    }
}
