//! Core data model shared by the tracker, correlator and providers.
//!
//! These types carry no behaviour beyond validation and formatting. A
//! [`WalletInfo`] is an immutable snapshot: state changes replace it
//! wholesale instead of mutating fields.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WalletError;

/// Connection progress of a single provider instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection attempt is running.
    #[default]
    Idle,
    /// A connect payload was handed to the wallet and a reply is awaited.
    Listening,
    /// The peer (relay or wallet endpoint) acknowledged the attempt.
    ConnectedToServer,
    /// The wallet approved the session; a [`WalletInfo`] is available.
    ConnectedToWallet,
}

impl ConnectionState {
    /// Position of the state within a connection attempt.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Listening => 1,
            Self::ConnectedToServer => 2,
            Self::ConnectedToWallet => 3,
        }
    }

    /// Returns `true` while a connect attempt is awaiting the wallet.
    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(self, Self::Listening | Self::ConnectedToServer)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::ConnectedToServer => "connected-to-server",
            Self::ConnectedToWallet => "connected-to-wallet",
        };
        f.write_str(label)
    }
}

/// Snapshot of the wallet an application is connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
    /// Account address as reported by the wallet.
    pub address: String,
    /// Chain reference without its namespace, e.g. `1` or `mainnet-beta`.
    pub chain_id: String,
    /// Identifier of the wallet implementation, e.g. `phantom`.
    pub wallet_ref: String,
    /// Display name advertised by the peer.
    pub peer_name: Option<String>,
    /// Icon advertised by the peer.
    pub peer_image_url: Option<String>,
}

/// Correlation key matching an outbound request to its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    /// Wrap a correlation key.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    /// Borrow the key text.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

impl From<String> for Topic {
    fn from(value: String) -> Self { Self(value) }
}

/// Opaque provider token identifying an established session.
///
/// The tracker owns the handle; providers only borrow it while building
/// requests.
#[derive(PartialEq, Eq)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Wrap a provider token.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    /// Borrow the provider token.
    #[must_use]
    pub fn expose(&self) -> &str { &self.0 }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionHandle(..)")
    }
}

/// Kind of operation awaiting a wallet response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Session establishment.
    Connect,
    /// Plain message signature.
    SignMessage,
    /// Structured (typed data) signature.
    SignTypedData,
    /// Transaction signature without broadcast.
    SignTransaction,
    /// Transaction signature and broadcast.
    SendTransaction,
}

/// Account reported by a wallet, in CAIP-10 form
/// (`namespace:reference:address`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainAccount {
    /// Chain namespace, e.g. `eip155` or `solana`.
    pub namespace: String,
    /// Chain reference within the namespace, e.g. `1`.
    pub reference: String,
    /// Account address.
    pub address: String,
}

impl ChainAccount {
    /// Parse a CAIP-10 account identifier.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::UnexpectedResponse`] when the identifier does not
    /// have three non-empty components.
    ///
    /// # Examples
    ///
    /// ```
    /// use wallet_bridge::wallet::ChainAccount;
    ///
    /// let account = ChainAccount::parse("eip155:1:0xab").expect("valid account");
    /// assert_eq!(account.chain(), "eip155:1");
    /// assert_eq!(account.address, "0xab");
    /// ```
    pub fn parse(value: &str) -> Result<Self, WalletError> {
        let mut parts = value.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(reference), Some(address))
                if !namespace.is_empty() && !reference.is_empty() && !address.is_empty() =>
            {
                Ok(Self {
                    namespace: namespace.to_owned(),
                    reference: reference.to_owned(),
                    address: address.to_owned(),
                })
            }
            _ => Err(WalletError::unexpected(format!(
                "malformed account identifier '{value}'"
            ))),
        }
    }

    /// CAIP-2 chain identifier of the account.
    #[must_use]
    pub fn chain(&self) -> String { format!("{}:{}", self.namespace, self.reference) }

    /// Returns `true` when the account lives on `chain`.
    ///
    /// `chain` may be a bare reference (`1`) or a CAIP-2 identifier
    /// (`eip155:1`).
    #[must_use]
    pub fn is_on(&self, chain: &str) -> bool {
        match chain.split_once(':') {
            Some((namespace, reference)) => {
                namespace == self.namespace && reference == self.reference
            }
            None => chain == self.reference,
        }
    }
}

/// Strip an optional CAIP-2 namespace from a chain identifier.
///
/// # Examples
///
/// ```
/// use wallet_bridge::wallet::chain_reference;
///
/// assert_eq!(chain_reference("eip155:137"), "137");
/// assert_eq!(chain_reference("137"), "137");
/// ```
#[must_use]
pub fn chain_reference(chain: &str) -> &str {
    chain
        .split_once(':')
        .map_or(chain, |(_, reference)| reference)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("eip155:1:0xabc", "1", true)]
    #[case("eip155:1:0xabc", "eip155:1", true)]
    #[case("eip155:5:0xabc", "1", false)]
    #[case("solana:devnet:Gx1", "eip155:devnet", false)]
    fn account_chain_matching(#[case] account: &str, #[case] chain: &str, #[case] expected: bool) {
        let parsed = ChainAccount::parse(account).expect("account parses");

        assert_eq!(parsed.is_on(chain), expected);
    }

    #[rstest]
    #[case("eip155:1")]
    #[case("eip155::0xabc")]
    #[case("")]
    fn rejects_malformed_accounts(#[case] account: &str) {
        let err = ChainAccount::parse(account).expect_err("must fail");

        assert!(matches!(err, WalletError::UnexpectedResponse(_)));
    }

    #[rstest]
    fn session_handle_debug_hides_token() {
        let handle = SessionHandle::new("secret-session");

        assert_eq!(format!("{handle:?}"), "SessionHandle(..)");
        assert_eq!(handle.expose(), "secret-session");
    }

    #[rstest]
    fn states_rank_in_attempt_order() {
        assert!(ConnectionState::Idle.rank() < ConnectionState::Listening.rank());
        assert!(ConnectionState::Listening.rank() < ConnectionState::ConnectedToServer.rank());
        assert!(
            ConnectionState::ConnectedToServer.rank() < ConnectionState::ConnectedToWallet.rank()
        );
        assert!(ConnectionState::Listening.is_connecting());
        assert!(!ConnectionState::ConnectedToWallet.is_connecting());
    }
}
