//! Error taxonomy reported by every wallet operation.
//!
//! Operations never panic on wallet input. Failures travel back to the
//! awaiting caller as a [`WalletError`], which carries a short alert title
//! alongside its display message.

use thiserror::Error;

/// Message used when the operating system could not hand a link to a wallet.
pub const OPEN_WALLET_FAILED: &str = "Failed to open wallet app";

/// Errors surfaced by the connection and request lifecycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// The wallet could not be reached or the attempt was abandoned.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The wallet answered with a payload that could not be decoded.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    /// A request needed session material that is not available.
    #[error("invalid session: {0}")]
    InvalidSession(String),
    /// The wallet approved none of the requested chains.
    #[error("wallet approved chains {approved:?} but {requested} was requested")]
    WalletMismatch {
        /// Chain reference requested by the caller.
        requested: String,
        /// Chain identifiers approved by the wallet.
        approved: Vec<String>,
    },
    /// The wallet, or its user, declined the request.
    #[error("refused by wallet ({code}): {message}")]
    RefusedByWallet {
        /// Provider error code.
        code: i64,
        /// Provider error message.
        message: String,
    },
    /// A transaction targets a different chain than the connected wallet.
    #[error("network mismatch: wallet is on {connected}, request targets {requested}")]
    NetworkMismatch {
        /// Chain reference of the connected wallet.
        connected: String,
        /// Chain reference carried by the request.
        requested: String,
    },
    /// The wallet approved the session without exposing an account.
    #[error("wallet contains no account")]
    WalletContainsNoAccount,
    /// The request was flushed by a disconnect.
    #[error("request cancelled")]
    Cancelled,
    /// A request for the same topic is still awaiting its response.
    #[error("request already pending for topic {0}")]
    RequestPending(String),
    /// The provider cannot express the request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl WalletError {
    /// Short heading suitable for an alert presenting this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use wallet_bridge::error::WalletError;
    ///
    /// assert_eq!(WalletError::Cancelled.title(), "Request cancelled");
    /// ```
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "Connection failed",
            Self::UnexpectedResponse(_) => "Unexpected response",
            Self::InvalidSession(_) => "Invalid session",
            Self::WalletMismatch { .. } => "Wallet mismatch",
            Self::RefusedByWallet { .. } => "Refused by wallet",
            Self::NetworkMismatch { .. } => "Network mismatch",
            Self::WalletContainsNoAccount => "No account",
            Self::Cancelled => "Request cancelled",
            Self::RequestPending(_) => "Request pending",
            Self::InvalidRequest(_) => "Invalid request",
        }
    }

    pub(crate) fn open_failed() -> Self { Self::ConnectionFailed(OPEN_WALLET_FAILED.to_owned()) }

    pub(crate) fn unexpected(detail: impl Into<String>) -> Self {
        Self::UnexpectedResponse(detail.into())
    }

    pub(crate) fn invalid_session(detail: impl Into<String>) -> Self {
        Self::InvalidSession(detail.into())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn open_failure_message_is_actionable() {
        let err = WalletError::open_failed();

        assert_eq!(err.to_string(), "connection failed: Failed to open wallet app");
        assert_eq!(err.title(), "Connection failed");
    }

    #[rstest]
    fn mismatch_lists_approved_chains() {
        let err = WalletError::WalletMismatch {
            requested: "1".to_owned(),
            approved: vec!["eip155:5".to_owned()],
        };

        assert_eq!(
            err.to_string(),
            "wallet approved chains [\"eip155:5\"] but 1 was requested"
        );
    }
}
