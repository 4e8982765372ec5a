//! Provider-specific request construction and response interpretation.
//!
//! A [`WalletProvider`] turns lifecycle operations into [`Outbound`]
//! deliveries and turns [`Inbound`] callbacks into [`Resolution`]s. It never
//! performs I/O; the bridge delivers outbounds through the platform seams
//! and applies resolutions to the tracker and correlator.

pub mod phantom;
pub mod walletconnect;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    codec::{JsonRpcError, JsonRpcRequest, JsonRpcResponse},
    deeplink::{DeepLink, InboundResponse},
    error::WalletError,
    wallet::{ChainAccount, RequestKind, SessionHandle, Topic, WalletInfo},
};

/// Parameters of a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Chain the application wants to use, bare (`1`) or CAIP-2
    /// (`eip155:1`).
    pub chain_id: String,
}

impl ConnectRequest {
    /// Request a connection on `chain_id`.
    #[must_use]
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
        }
    }
}

/// EVM transaction fields forwarded to the wallet unmodified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmTransaction {
    /// Sender; defaults to the connected account when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Recipient.
    pub to: String,
    /// Value in wei, hex-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Call data, hex-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Gas limit, hex-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    /// Chain the transaction is meant for.
    #[serde(skip)]
    pub chain_id: Option<String>,
}

/// Transaction handed to a wallet for signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionPayload {
    /// JSON transaction object for EVM wallets.
    Evm(EvmTransaction),
    /// Serialised transaction bytes for deep-link wallets.
    Serialized(Vec<u8>),
}

/// A request that needs the wallet's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletRequest {
    /// Sign a UTF-8 message.
    SignMessage(String),
    /// Sign typed data supplied as JSON text.
    SignTypedData(String),
    /// Sign a transaction without broadcasting it.
    SignTransaction(TransactionPayload),
    /// Sign and broadcast a transaction.
    SendTransaction(TransactionPayload),
}

impl WalletRequest {
    /// Correlator kind of the request.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::SignMessage(_) => RequestKind::SignMessage,
            Self::SignTypedData(_) => RequestKind::SignTypedData,
            Self::SignTransaction(_) => RequestKind::SignTransaction,
            Self::SendTransaction(_) => RequestKind::SendTransaction,
        }
    }

    /// Chain the request explicitly targets, if any.
    #[must_use]
    pub fn chain_id(&self) -> Option<&str> {
        match self {
            Self::SignTransaction(TransactionPayload::Evm(tx))
            | Self::SendTransaction(TransactionPayload::Evm(tx)) => tx.chain_id.as_deref(),
            _ => None,
        }
    }
}

/// Session material a provider borrows while building a request.
#[derive(Debug, Clone, Copy)]
pub struct ActiveSession<'a> {
    /// Provider session token.
    pub handle: &'a SessionHandle,
    /// Connected wallet.
    pub wallet: &'a WalletInfo,
}

/// Message published through a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// Session proposal sent on a fresh pairing topic.
    Propose {
        /// Pairing topic the wallet subscribes to.
        pairing_topic: String,
        /// Proposal parameters.
        proposal: Value,
    },
    /// JSON-RPC request on an established session.
    Request {
        /// Session topic.
        session_topic: String,
        /// CAIP-2 chain the request targets.
        chain_id: String,
        /// Request envelope.
        request: JsonRpcRequest,
    },
    /// Session teardown notice.
    Delete {
        /// Session topic.
        session_topic: String,
        /// Human-readable reason.
        reason: String,
    },
}

impl RelayMessage {
    /// Topic the message is published on.
    #[must_use]
    pub fn topic(&self) -> &str {
        match self {
            Self::Propose { pairing_topic, .. } => pairing_topic,
            Self::Request { session_topic, .. } | Self::Delete { session_topic, .. } => {
                session_topic
            }
        }
    }
}

/// How an outbound reaches the wallet.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Open a link in the wallet app.
    DeepLink(DeepLink),
    /// Publish through the relay, then optionally bring the wallet forward.
    Relay {
        /// Message to publish.
        message: RelayMessage,
        /// Link opening the wallet app after publishing.
        wallet_link: Option<DeepLink>,
    },
}

/// A request ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Topic the response will arrive on.
    pub topic: Topic,
    /// Kind of request.
    pub kind: RequestKind,
    /// Delivery route.
    pub delivery: Delivery,
    /// Provider-imposed expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Metadata a wallet advertises about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    /// Display name.
    pub name: String,
    /// Homepage.
    #[serde(default)]
    pub url: String,
    /// Icon URLs.
    #[serde(default)]
    pub icons: Vec<String>,
}

/// Event delivered by the relay SDK.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// The relay accepted the pairing; the wallet may now answer.
    PairingAcknowledged {
        /// Pairing topic.
        pairing_topic: String,
    },
    /// The wallet approved the proposal.
    SessionSettled {
        /// Pairing topic the proposal was sent on.
        pairing_topic: String,
        /// Newly established session topic.
        session_topic: String,
        /// Approved CAIP-10 accounts.
        accounts: Vec<String>,
        /// Wallet metadata.
        peer: PeerMetadata,
    },
    /// The wallet rejected the proposal.
    SessionRejected {
        /// Pairing topic the proposal was sent on.
        pairing_topic: String,
        /// Rejection reason.
        error: JsonRpcError,
    },
    /// The wallet answered a request.
    Response {
        /// Session topic.
        session_topic: String,
        /// Response envelope.
        response: JsonRpcResponse,
    },
    /// The wallet ended the session.
    SessionDeleted {
        /// Session topic.
        session_topic: String,
    },
}

/// Anything a wallet sends back.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Callback URI opened by the wallet app.
    DeepLink(InboundResponse),
    /// Relay event.
    Relay(RelayEvent),
}

/// Session approval reported by a wallet.
#[derive(Debug)]
pub struct Approval {
    /// Accounts the wallet exposes.
    pub accounts: Vec<ChainAccount>,
    /// Provider session token.
    pub handle: SessionHandle,
    /// Wallet implementation identifier.
    pub wallet_ref: String,
    /// Wallet display name.
    pub peer_name: Option<String>,
    /// Wallet icon.
    pub peer_image_url: Option<String>,
}

impl Approval {
    /// Select the account on `requested_chain` and build the wallet snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::WalletContainsNoAccount`] when no accounts were
    /// approved and [`WalletError::WalletMismatch`] when none lives on the
    /// requested chain.
    pub fn into_wallet(
        self,
        requested_chain: &str,
    ) -> Result<(WalletInfo, SessionHandle), WalletError> {
        if self.accounts.is_empty() {
            return Err(WalletError::WalletContainsNoAccount);
        }
        let Some(account) = self
            .accounts
            .iter()
            .find(|account| account.is_on(requested_chain))
        else {
            let mut approved: Vec<String> = self.accounts.iter().map(ChainAccount::chain).collect();
            approved.dedup();
            return Err(WalletError::WalletMismatch {
                requested: requested_chain.to_owned(),
                approved,
            });
        };
        let wallet = WalletInfo {
            address: account.address.clone(),
            chain_id: account.reference.clone(),
            wallet_ref: self.wallet_ref,
            peer_name: self.peer_name,
            peer_image_url: self.peer_image_url,
        };
        Ok((wallet, self.handle))
    }
}

/// What an inbound message means for the pending request on its topic.
#[derive(Debug)]
pub enum Outcome {
    /// The peer acknowledged a connect attempt.
    PeerReached,
    /// The wallet approved the session.
    Approved(Approval),
    /// The wallet completed a request with a textual result.
    Completed(String),
    /// The wallet reported a failure.
    Failed(WalletError),
    /// The wallet ended the session.
    Terminated,
}

/// An interpreted inbound message.
#[derive(Debug)]
pub struct Resolution {
    /// Topic the message answers.
    pub topic: Topic,
    /// Meaning of the message.
    pub outcome: Outcome,
}

impl Resolution {
    /// Pair a topic with an outcome.
    #[must_use]
    pub fn new(topic: impl Into<Topic>, outcome: Outcome) -> Self {
        Self {
            topic: topic.into(),
            outcome,
        }
    }
}

/// Protocol adapter for one wallet family.
pub trait WalletProvider: Send {
    /// Identifier recorded in [`WalletInfo::wallet_ref`].
    fn wallet_ref(&self) -> &'static str;

    /// Build the connect outbound, starting fresh attempt state.
    ///
    /// # Errors
    ///
    /// Returns a [`WalletError`] when the link or payload cannot be built.
    fn begin_connect(&mut self, request: &ConnectRequest) -> Result<Outbound, WalletError>;

    /// Build the outbound for a signing request on an established session.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidSession`] when session material is
    /// missing and [`WalletError::InvalidRequest`] when the provider cannot
    /// express the request.
    fn build_request(
        &mut self,
        request: &WalletRequest,
        session: ActiveSession<'_>,
    ) -> Result<Outbound, WalletError>;

    /// Interpret an inbound message.
    ///
    /// # Errors
    ///
    /// Returns an error when the message cannot be attributed to any topic;
    /// such messages are logged and dropped.
    fn interpret(&mut self, inbound: Inbound) -> Result<Resolution, WalletError>;

    /// Forget bookkeeping for a request the bridge gave up on.
    fn abandon(&mut self, _topic: &Topic) {}

    /// Forget session state, returning a teardown delivery if the wallet
    /// should be told.
    fn end_session(&mut self, session: Option<ActiveSession<'_>>) -> Option<Delivery>;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn approval(accounts: &[&str]) -> Approval {
        Approval {
            accounts: accounts
                .iter()
                .map(|account| ChainAccount::parse(account).expect("account"))
                .collect(),
            handle: SessionHandle::new("topic"),
            wallet_ref: "walletconnect".to_owned(),
            peer_name: Some("Wallet".to_owned()),
            peer_image_url: None,
        }
    }

    #[rstest]
    #[case("1")]
    #[case("eip155:1")]
    fn selects_account_on_requested_chain(#[case] chain: &str) {
        let (wallet, _) = approval(&["eip155:5:0x05", "eip155:1:0x01"])
            .into_wallet(chain)
            .expect("match");

        assert_eq!(wallet.chain_id, "1");
        assert_eq!(wallet.address, "0x01");
    }

    #[rstest]
    fn reports_mismatch_with_approved_chains() {
        let err = approval(&["eip155:5:0x05"]).into_wallet("1").expect_err("mismatch");

        assert_eq!(
            err,
            WalletError::WalletMismatch {
                requested: "1".to_owned(),
                approved: vec!["eip155:5".to_owned()],
            }
        );
    }

    #[rstest]
    fn reports_empty_approval() {
        let err = approval(&[]).into_wallet("1").expect_err("empty");

        assert_eq!(err, WalletError::WalletContainsNoAccount);
    }

    #[rstest]
    fn request_chain_comes_from_evm_transactions() {
        let request = WalletRequest::SendTransaction(TransactionPayload::Evm(EvmTransaction {
            to: "0xdef".to_owned(),
            chain_id: Some("5".to_owned()),
            ..EvmTransaction::default()
        }));

        assert_eq!(request.chain_id(), Some("5"));
        assert_eq!(request.kind(), RequestKind::SendTransaction);
        assert_eq!(WalletRequest::SignMessage("hi".to_owned()).chain_id(), None);
    }
}
