//! Lifecycle orchestration: connect, sign, send and disconnect.
//!
//! [`WalletBridge`] ties a [`WalletProvider`] to the [`SessionTracker`] and
//! the [`RequestCorrelator`]. Outbound requests are registered before they
//! are delivered, so a response that arrives while the link is still being
//! opened is never lost. The shared state sits behind one mutex which is
//! released before every `.await`; inbound messages may therefore be handled
//! from any thread.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::Utc;
use tokio::{
    sync::{broadcast, watch},
    time,
};
use tracing::{debug, info, warn};

use crate::{
    correlator::{Registration, RequestCorrelator, RequestId},
    deeplink::{DeepLink, InboundResponse, LinkOpener, RelayTransport},
    error::WalletError,
    provider::{
        ActiveSession,
        Approval,
        ConnectRequest,
        Delivery,
        Inbound,
        Outbound,
        Outcome,
        Resolution,
        TransactionPayload,
        WalletProvider,
        WalletRequest,
    },
    session::{SessionTracker, WalletStatus},
    wallet::{ConnectionState, RequestKind, Topic, WalletInfo, chain_reference},
};

/// Message reported when a wait runs past its deadline.
pub const TIMED_OUT: &str = "wallet did not respond in time";

/// Tuning for a [`WalletBridge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Chain used when a request triggers an implicit connect.
    pub chain_id: String,
    /// Upper bound on every wait for the wallet; `None` waits for the
    /// provider expiry or indefinitely.
    pub request_timeout: Option<Duration>,
}

impl BridgeOptions {
    /// Options connecting to `chain_id` with no timeout.
    #[must_use]
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            request_timeout: None,
        }
    }

    /// Bound every wait by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Value a pending request completes with.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Connected(WalletInfo),
    Completed(String),
}

#[derive(Debug)]
struct Inner<P> {
    provider: P,
    tracker: SessionTracker,
    correlator: RequestCorrelator<Reply>,
    teardown: Option<Delivery>,
}

impl<P: WalletProvider> Inner<P> {
    fn apply(&mut self, resolution: Resolution) -> bool {
        let Resolution { topic, outcome } = resolution;
        match outcome {
            Outcome::PeerReached => {
                if self.correlator.kind_of(&topic) != Some(RequestKind::Connect) {
                    warn!(%topic, "peer acknowledgement without a pending connect");
                    return false;
                }
                self.tracker
                    .advance(ConnectionState::ConnectedToServer)
                    .inspect_err(|err| warn!(%topic, %err, "ignoring peer acknowledgement"))
                    .is_ok()
            }
            Outcome::Approved(approval) => {
                if self.correlator.kind_of(&topic) != Some(RequestKind::Connect) {
                    warn!(%topic, "approval without a pending connect");
                    return false;
                }
                let reply = self.accept(approval).map(Reply::Connected);
                if reply.is_err() {
                    self.abort_attempt();
                }
                self.correlator.resolve(&topic, reply).is_some()
            }
            Outcome::Completed(text) => {
                if self.correlator.kind_of(&topic) == Some(RequestKind::Connect) {
                    warn!(%topic, "request result delivered on a connect topic");
                    return false;
                }
                self.correlator
                    .resolve(&topic, Ok(Reply::Completed(text)))
                    .is_some()
            }
            Outcome::Failed(err) => {
                debug!(%topic, %err, "wallet reported failure");
                let Some(kind) = self.correlator.resolve(&topic, Err(err)) else {
                    return false;
                };
                if kind == RequestKind::Connect {
                    self.abort_attempt();
                }
                true
            }
            Outcome::Terminated => {
                let cancelled = self.correlator.cancel_all();
                self.provider.end_session(None);
                self.tracker.reset();
                info!(%topic, cancelled, "wallet ended the session");
                true
            }
        }
    }

    fn accept(&mut self, approval: Approval) -> Result<WalletInfo, WalletError> {
        let requested = self
            .tracker
            .requested_chain()
            .ok_or_else(|| WalletError::invalid_session("no connect attempt in progress"))?
            .to_owned();
        let (wallet, handle) = approval.into_wallet(&requested)?;
        self.tracker.advance(ConnectionState::ConnectedToServer)?;
        self.tracker.connect_wallet(wallet.clone(), handle)?;
        info!(address = %wallet.address, chain = %wallet.chain_id, "wallet connected");
        Ok(wallet)
    }

    fn abort_attempt(&mut self) {
        self.tracker.reset();
        self.teardown = self.provider.end_session(None);
    }

    /// Drop the request registered as `id`, returning `false` when it was
    /// already resolved, cancelled or replaced by a newer registration.
    fn give_up(&mut self, topic: &Topic, id: RequestId) -> bool {
        let Some(kind) = self.correlator.discard(topic, id) else {
            return false;
        };
        self.provider.abandon(topic);
        if kind == RequestKind::Connect && self.tracker.state().is_connecting() {
            self.abort_attempt();
        }
        true
    }
}

/// Handle driving the wallet lifecycle for one provider.
///
/// Clones share the same session.
pub struct WalletBridge<P> {
    inner: Arc<Mutex<Inner<P>>>,
    opener: Arc<dyn LinkOpener>,
    relay: Option<Arc<dyn RelayTransport>>,
    options: BridgeOptions,
}

impl<P> Clone for WalletBridge<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            opener: Arc::clone(&self.opener),
            relay: self.relay.clone(),
            options: self.options.clone(),
        }
    }
}

impl<P: WalletProvider> WalletBridge<P> {
    /// Create a bridge opening links through `opener`.
    #[must_use]
    pub fn new(provider: P, opener: Arc<dyn LinkOpener>, options: BridgeOptions) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                provider,
                tracker: SessionTracker::new(),
                correlator: RequestCorrelator::new(),
                teardown: None,
            })),
            opener,
            relay: None,
            options,
        }
    }

    /// Publish relay messages through `relay`.
    #[must_use]
    pub fn with_relay(mut self, relay: Arc<dyn RelayTransport>) -> Self {
        self.relay = Some(relay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner<P>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> WalletStatus { self.lock().tracker.status() }

    /// Subscribe to status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WalletStatus> { self.lock().tracker.subscribe() }

    /// Stream every connection state in the order it was entered.
    ///
    /// Unlike [`Self::subscribe`], which only keeps the newest status, this
    /// receiver sees intermediate states published under a single lock.
    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.lock().tracker.transitions()
    }

    /// Returns `true` once a wallet has approved the session.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().tracker.state() == ConnectionState::ConnectedToWallet
    }

    /// Number of requests awaiting a wallet response.
    #[must_use]
    pub fn pending_requests(&self) -> usize { self.lock().correlator.len() }

    /// Connect to a wallet on `request.chain_id`.
    ///
    /// Returns the cached wallet when already connected.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::RequestPending`] while another attempt runs,
    /// [`WalletError::ConnectionFailed`] when the wallet cannot be reached or
    /// does not answer in time, and the provider's error when the wallet
    /// declines or approves the wrong chain.
    pub async fn connect(&self, request: ConnectRequest) -> Result<WalletInfo, WalletError> {
        let (outbound, registration) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let status = inner.tracker.status();
            if let Some(wallet) = status.wallet {
                return Ok(wallet);
            }
            if status.state != ConnectionState::Idle {
                return Err(WalletError::RequestPending(format!(
                    "connect ({})",
                    status.state
                )));
            }
            let outbound = inner.provider.begin_connect(&request)?;
            inner.tracker.begin_attempt(&request.chain_id)?;
            match inner
                .correlator
                .register(outbound.topic.clone(), outbound.kind, outbound.expires_at)
            {
                Ok(registration) => (outbound, registration),
                Err(err) => {
                    inner.abort_attempt();
                    return Err(err);
                }
            }
        };
        info!(chain = %request.chain_id, topic = %outbound.topic, "connecting wallet");
        match self.dispatch(&outbound, registration).await {
            Ok(Reply::Connected(wallet)) => Ok(wallet),
            Ok(Reply::Completed(_)) => Err(WalletError::unexpected(
                "connect completed without a wallet",
            )),
            Err(err) => {
                let teardown = self.lock().teardown.take();
                if let Some(delivery) = teardown {
                    self.deliver_best_effort(&delivery).await;
                }
                Err(err)
            }
        }
    }

    /// Ask the wallet to sign a UTF-8 message.
    ///
    /// # Errors
    ///
    /// See [`Self::connect`]; additionally any failure reported by the wallet.
    pub async fn sign_message(&self, message: impl Into<String>) -> Result<String, WalletError> {
        self.request(WalletRequest::SignMessage(message.into())).await
    }

    /// Ask the wallet to sign typed data supplied as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidRequest`] when the provider cannot sign
    /// typed data or the text is not JSON.
    pub async fn sign_typed_data(
        &self,
        typed_data: impl Into<String>,
    ) -> Result<String, WalletError> {
        self.request(WalletRequest::SignTypedData(typed_data.into())).await
    }

    /// Ask the wallet to sign a transaction without broadcasting it.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NetworkMismatch`] when the transaction targets
    /// a chain other than the connected one.
    pub async fn sign_transaction(
        &self,
        transaction: TransactionPayload,
    ) -> Result<String, WalletError> {
        self.request(WalletRequest::SignTransaction(transaction)).await
    }

    /// Ask the wallet to sign and broadcast a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NetworkMismatch`] when the transaction targets
    /// a chain other than the connected one.
    pub async fn send_transaction(
        &self,
        transaction: TransactionPayload,
    ) -> Result<String, WalletError> {
        self.request(WalletRequest::SendTransaction(transaction)).await
    }

    async fn request(&self, request: WalletRequest) -> Result<String, WalletError> {
        let chain = request
            .chain_id()
            .map_or_else(|| self.options.chain_id.clone(), str::to_owned);
        self.connect(ConnectRequest::new(chain)).await?;
        let (outbound, registration) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let wallet = inner
                .tracker
                .wallet()
                .ok_or_else(|| WalletError::invalid_session("wallet is not connected"))?;
            if let Some(requested) = request.chain_id() {
                if chain_reference(requested) != wallet.chain_id {
                    return Err(WalletError::NetworkMismatch {
                        connected: wallet.chain_id,
                        requested: requested.to_owned(),
                    });
                }
            }
            let handle = inner
                .tracker
                .handle()
                .ok_or_else(|| WalletError::invalid_session("no session handle"))?;
            let outbound = inner.provider.build_request(
                &request,
                ActiveSession {
                    handle,
                    wallet: &wallet,
                },
            )?;
            match inner
                .correlator
                .register(outbound.topic.clone(), outbound.kind, outbound.expires_at)
            {
                Ok(registration) => (outbound, registration),
                Err(err) => {
                    inner.provider.abandon(&outbound.topic);
                    return Err(err);
                }
            }
        };
        debug!(topic = %outbound.topic, kind = ?outbound.kind, "dispatching request");
        match self.dispatch(&outbound, registration).await? {
            Reply::Completed(text) => Ok(text),
            Reply::Connected(_) => Err(WalletError::unexpected(
                "request completed with a connection",
            )),
        }
    }

    /// End the session and fail every pending request with
    /// [`WalletError::Cancelled`].
    ///
    /// The provider's teardown message is sent best-effort. Calling this
    /// while idle is harmless.
    pub async fn disconnect(&self) {
        let teardown = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let wallet = inner.tracker.wallet();
            let session = match (inner.tracker.handle(), wallet.as_ref()) {
                (Some(handle), Some(wallet)) => Some(ActiveSession { handle, wallet }),
                _ => None,
            };
            let teardown = inner.provider.end_session(session);
            let cancelled = inner.correlator.cancel_all();
            inner.tracker.reset();
            inner.teardown = None;
            info!(cancelled, "wallet disconnected");
            teardown
        };
        if let Some(delivery) = teardown {
            self.deliver_best_effort(&delivery).await;
        }
    }

    /// Route a callback URI opened by the wallet app.
    ///
    /// Returns `true` when the URI resolved a pending request or advanced
    /// the connection; anything else is logged and ignored.
    #[must_use]
    pub fn handle_response(&self, uri: &str) -> bool {
        InboundResponse::parse(uri).map_or_else(
            |err| {
                warn!(%err, "ignoring unparseable wallet callback");
                false
            },
            |response| self.handle_inbound(Inbound::DeepLink(response)),
        )
    }

    /// Route any message received from the wallet.
    ///
    /// Returns `true` when the message resolved a pending request or
    /// advanced the connection.
    #[must_use]
    pub fn handle_inbound(&self, inbound: Inbound) -> bool {
        let mut inner = self.lock();
        let interpreted = inner.provider.interpret(inbound);
        interpreted.map_or_else(
            |err| {
                warn!(%err, "ignoring wallet message");
                false
            },
            |resolution| inner.apply(resolution),
        )
    }

    async fn dispatch(
        &self,
        outbound: &Outbound,
        registration: Registration<Reply>,
    ) -> Result<Reply, WalletError> {
        let Registration { id, mut completion } = registration;
        if let Err(err) = self.deliver(&outbound.delivery).await {
            if !self.lock().give_up(&outbound.topic, id) {
                debug!(topic = %outbound.topic, "delivery failed after the request settled");
            }
            return Err(err);
        }
        let received = match self.deadline(outbound) {
            Some(limit) => match time::timeout(limit, &mut completion).await {
                Ok(received) => received,
                Err(_) => {
                    if self.lock().give_up(&outbound.topic, id) {
                        warn!(topic = %outbound.topic, "wallet response timed out");
                        return Err(WalletError::ConnectionFailed(TIMED_OUT.to_owned()));
                    }
                    // Settled between the deadline and taking the lock.
                    completion.await
                }
            },
            None => completion.await,
        };
        received.unwrap_or(Err(WalletError::Cancelled))
    }

    fn deadline(&self, outbound: &Outbound) -> Option<Duration> {
        let remaining = outbound
            .expires_at
            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO));
        match (self.options.request_timeout, remaining) {
            (Some(timeout), Some(left)) => Some(timeout.min(left)),
            (timeout, left) => timeout.or(left),
        }
    }

    async fn deliver(&self, delivery: &Delivery) -> Result<(), WalletError> {
        match delivery {
            Delivery::DeepLink(link) => self.open(link).await,
            Delivery::Relay {
                message,
                wallet_link,
            } => {
                let relay = self.relay.as_ref().ok_or_else(|| {
                    WalletError::ConnectionFailed("no relay transport configured".to_owned())
                })?;
                relay.publish(message).await?;
                match wallet_link {
                    Some(link) => self.open(link).await,
                    None => Ok(()),
                }
            }
        }
    }

    async fn deliver_best_effort(&self, delivery: &Delivery) {
        if let Err(err) = self.deliver(delivery).await {
            warn!(%err, "session teardown not delivered");
        }
    }

    async fn open(&self, link: &DeepLink) -> Result<(), WalletError> {
        if self.opener.open(link).await {
            Ok(())
        } else {
            warn!(%link, "no app accepted wallet link");
            Err(WalletError::open_failed())
        }
    }
}
