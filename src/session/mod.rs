//! Connection state tracking with multi-subscriber notification.
//!
//! [`SessionTracker`] owns the [`ConnectionState`], the connected
//! [`WalletInfo`] and the provider [`SessionHandle`]. Every mutation is
//! published after the fields have changed, on two channels:
//!
//! - a [`tokio::sync::watch`] channel holding the latest [`WalletStatus`].
//!   Updates made in quick succession are merged, so a subscriber woken by a
//!   change reads the newest snapshot and may never see the states in
//!   between.
//! - a [`tokio::sync::broadcast`] channel carrying every [`ConnectionState`]
//!   in order. A receiver that falls more than [`TRANSITION_BUFFER`] states
//!   behind observes [`broadcast::error::RecvError::Lagged`].

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

use crate::{
    error::WalletError,
    wallet::{ConnectionState, SessionHandle, WalletInfo},
};

/// Observable snapshot of the connection.
///
/// `wallet` is `Some` exactly when `state` is
/// [`ConnectionState::ConnectedToWallet`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletStatus {
    /// Current connection state.
    pub state: ConnectionState,
    /// Connected wallet, if any.
    pub wallet: Option<WalletInfo>,
}

/// Transition rejected by the tracker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The transition would move backwards within an attempt.
    #[error("cannot move from {from} to {to}")]
    Backwards {
        /// State before the transition.
        from: ConnectionState,
        /// Requested state.
        to: ConnectionState,
    },
    /// `ConnectedToWallet` requires a wallet snapshot.
    #[error("connected-to-wallet requires wallet info")]
    MissingWallet,
    /// A new attempt was started while another one is active.
    #[error("a connection attempt is already {0}")]
    AttemptActive(ConnectionState),
}

impl From<TransitionError> for WalletError {
    fn from(value: TransitionError) -> Self { Self::InvalidSession(value.to_string()) }
}

/// Transitions buffered for each [`SessionTracker::transitions`] receiver.
pub const TRANSITION_BUFFER: usize = 16;

/// Owner of connection state for one provider instance.
#[derive(Debug)]
pub struct SessionTracker {
    status: watch::Sender<WalletStatus>,
    transitions: broadcast::Sender<ConnectionState>,
    handle: Option<SessionHandle>,
    requested_chain: Option<String>,
}

impl Default for SessionTracker {
    fn default() -> Self { Self::new() }
}

impl SessionTracker {
    /// Create an idle tracker.
    #[must_use]
    pub fn new() -> Self {
        let (status, _) = watch::channel(WalletStatus::default());
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            status,
            transitions,
            handle: None,
            requested_chain: None,
        }
    }

    /// Subscribe to the latest status.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WalletStatus> { self.status.subscribe() }

    /// Subscribe to every state published from now on, in order.
    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> WalletStatus { self.status.borrow().clone() }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.status.borrow().state }

    /// Connected wallet, if any.
    #[must_use]
    pub fn wallet(&self) -> Option<WalletInfo> { self.status.borrow().wallet.clone() }

    /// Session handle of the connected wallet.
    #[must_use]
    pub const fn handle(&self) -> Option<&SessionHandle> { self.handle.as_ref() }

    /// Chain requested by the attempt in progress.
    #[must_use]
    pub fn requested_chain(&self) -> Option<&str> { self.requested_chain.as_deref() }

    /// Start a connection attempt for `chain`, moving to `Listening`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::AttemptActive`] unless the tracker is idle.
    pub fn begin_attempt(&mut self, chain: &str) -> Result<(), TransitionError> {
        let current = self.state();
        if current != ConnectionState::Idle {
            return Err(TransitionError::AttemptActive(current));
        }
        self.requested_chain = Some(chain.to_owned());
        self.publish(ConnectionState::Listening, None);
        Ok(())
    }

    /// Move forward within the current attempt.
    ///
    /// Re-entering the current state is accepted without notification.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::MissingWallet`] for `ConnectedToWallet`
    /// (use [`Self::connect_wallet`]) and [`TransitionError::Backwards`] for
    /// regressions. Use [`Self::reset`] to return to `Idle`.
    pub fn advance(&mut self, next: ConnectionState) -> Result<(), TransitionError> {
        if next == ConnectionState::ConnectedToWallet {
            return Err(TransitionError::MissingWallet);
        }
        let current = self.state();
        if next == current {
            return Ok(());
        }
        if next.rank() < current.rank() || current == ConnectionState::Idle {
            return Err(TransitionError::Backwards {
                from: current,
                to: next,
            });
        }
        self.publish(next, None);
        Ok(())
    }

    /// Complete the attempt with the wallet's snapshot and session handle.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Backwards`] when no attempt is active.
    pub fn connect_wallet(
        &mut self,
        wallet: WalletInfo,
        handle: SessionHandle,
    ) -> Result<(), TransitionError> {
        let current = self.state();
        if !current.is_connecting() {
            return Err(TransitionError::Backwards {
                from: current,
                to: ConnectionState::ConnectedToWallet,
            });
        }
        self.handle = Some(handle);
        self.requested_chain = None;
        self.publish(ConnectionState::ConnectedToWallet, Some(wallet));
        Ok(())
    }

    /// Drop all session material and return to `Idle`.
    pub fn reset(&mut self) {
        self.handle = None;
        self.requested_chain = None;
        self.publish(ConnectionState::Idle, None);
    }

    fn publish(&self, state: ConnectionState, wallet: Option<WalletInfo>) {
        debug!(%state, "wallet status changed");
        self.status.send_replace(WalletStatus { state, wallet });
        if self.transitions.send(state).is_err() {
            trace!(%state, "no transition subscribers");
        }
    }
}
