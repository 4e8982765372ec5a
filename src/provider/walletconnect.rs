//! WalletConnect v2-style relay provider (EVM).
//!
//! A connect attempt mints a pairing topic and symmetric key, publishes the
//! session proposal on the pairing topic and opens the native wallet with the
//! pairing URI. Once the wallet settles the session, JSON-RPC requests travel
//! on the session topic. Only one request may be in flight per session topic;
//! its JSON-RPC id is remembered so stray responses are not attributed to it.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use rand::Rng;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    ActiveSession,
    Approval,
    ConnectRequest,
    Delivery,
    EvmTransaction,
    Inbound,
    Outbound,
    Outcome,
    PeerMetadata,
    RelayEvent,
    RelayMessage,
    Resolution,
    TransactionPayload,
    WalletProvider,
    WalletRequest,
};
use crate::{
    codec::{JsonRpcRequest, JsonRpcResponse},
    deeplink::{DeepLink, DeepLinkBuilder, DeepLinkError},
    error::WalletError,
    wallet::{ChainAccount, RequestKind, SessionHandle, Topic},
};

/// Methods requested in every session proposal.
pub const METHODS: [&str; 4] = [
    "personal_sign",
    "eth_signTypedData_v4",
    "eth_signTransaction",
    "eth_sendTransaction",
];
/// Events requested in every session proposal.
pub const EVENTS: [&str; 2] = ["chainChanged", "accountsChanged"];

const REQUEST_TTL_MINUTES: i64 = 5;
const DISCONNECT_REASON: &str = "User disconnected";

/// Settings for [`WalletConnectProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConnectConfig {
    /// Relay endpoint advertised to the relay SDK.
    pub relay_url: String,
    /// Cloud project identifier.
    pub project_id: String,
    /// Native wallet link base, e.g. `metamask://`.
    pub wallet_link: String,
    /// Metadata presented to the wallet.
    pub metadata: PeerMetadata,
}

/// Pairing material for one connect attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct Pairing {
    topic: String,
    sym_key: String,
}

impl Pairing {
    /// Mint a random pairing topic and symmetric key.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            topic: hex::encode(rng.r#gen::<[u8; 32]>()),
            sym_key: hex::encode(rng.r#gen::<[u8; 32]>()),
        }
    }

    /// Pairing topic.
    #[must_use]
    pub fn topic(&self) -> &str { &self.topic }

    /// Pairing URI handed to the wallet.
    ///
    /// # Examples
    ///
    /// ```
    /// use wallet_bridge::provider::walletconnect::Pairing;
    ///
    /// let uri = Pairing::generate().uri();
    /// assert!(uri.starts_with("wc:"));
    /// assert!(uri.contains("@2?relay-protocol=irn&symKey="));
    /// ```
    #[must_use]
    pub fn uri(&self) -> String {
        format!(
            "wc:{}@2?relay-protocol=irn&symKey={}",
            self.topic, self.sym_key
        )
    }
}

impl std::fmt::Debug for Pairing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pairing")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// Provider speaking the relay protocol of WalletConnect v2.
#[derive(Debug)]
pub struct WalletConnectProvider {
    config: WalletConnectConfig,
    wallet_link: DeepLinkBuilder,
    pairing: Option<Pairing>,
    session_topic: Option<String>,
    in_flight: HashMap<String, u64>,
}

impl WalletConnectProvider {
    /// Build a provider from its settings.
    ///
    /// # Errors
    ///
    /// Returns [`DeepLinkError::InvalidBase`] when the wallet link is
    /// malformed.
    pub fn new(config: WalletConnectConfig) -> Result<Self, DeepLinkError> {
        Ok(Self {
            wallet_link: DeepLinkBuilder::new(&config.wallet_link)?,
            config,
            pairing: None,
            session_topic: None,
            in_flight: HashMap::new(),
        })
    }

    /// Pairing URI of the attempt in progress.
    #[must_use]
    pub fn pairing_uri(&self) -> Option<String> { self.pairing.as_ref().map(Pairing::uri) }

    /// Settled session topic.
    #[must_use]
    pub fn session_topic(&self) -> Option<&str> { self.session_topic.as_deref() }

    /// Link opening the native wallet with `pairing`.
    ///
    /// # Errors
    ///
    /// Returns [`DeepLinkError`] if the link cannot be assembled.
    pub fn pairing_link(&self, pairing: &Pairing) -> Result<DeepLink, DeepLinkError> {
        self.wallet_link.build("wc", [("uri", pairing.uri())])
    }

    fn proposal(&self, chain: &str) -> Value {
        json!({
            "relays": [{"protocol": "irn"}],
            "requiredNamespaces": {
                "eip155": {
                    "chains": [chain],
                    "methods": METHODS,
                    "events": EVENTS,
                }
            },
            "proposer": {"metadata": self.config.metadata},
            "projectId": self.config.project_id,
            "relayUrl": self.config.relay_url,
        })
    }

    fn settle(
        &mut self,
        pairing_topic: String,
        session_topic: String,
        accounts: &[String],
        peer: PeerMetadata,
    ) -> Resolution {
        let parsed: Result<Vec<ChainAccount>, WalletError> = accounts
            .iter()
            .map(|account| ChainAccount::parse(account))
            .collect();
        let approved = match parsed {
            Ok(list) => list,
            Err(err) => return Resolution::new(pairing_topic, Outcome::Failed(err)),
        };
        let awaiting = self.session_topic.is_none()
            && self.pairing.as_ref().is_some_and(|p| p.topic == pairing_topic);
        if awaiting {
            self.session_topic = Some(session_topic.clone());
        }
        let PeerMetadata { name, icons, .. } = peer;
        Resolution::new(
            pairing_topic,
            Outcome::Approved(Approval {
                accounts: approved,
                handle: SessionHandle::new(session_topic),
                wallet_ref: self.wallet_ref().to_owned(),
                peer_name: Some(name).filter(|n| !n.is_empty()),
                peer_image_url: icons.into_iter().next(),
            }),
        )
    }

    fn answer(
        &mut self,
        session_topic: String,
        response: JsonRpcResponse,
    ) -> Result<Resolution, WalletError> {
        match self.in_flight.get(&session_topic) {
            Some(&id) if id == response.id => {
                self.in_flight.remove(&session_topic);
                let outcome = response
                    .into_text()
                    .map_or_else(Outcome::Failed, Outcome::Completed);
                Ok(Resolution::new(session_topic, outcome))
            }
            Some(&id) => Err(WalletError::unexpected(format!(
                "response id {} does not match in-flight request {id}",
                response.id
            ))),
            None => Err(WalletError::unexpected(format!(
                "no request in flight on session {session_topic}"
            ))),
        }
    }
}

impl WalletProvider for WalletConnectProvider {
    fn wallet_ref(&self) -> &'static str { "walletconnect" }

    fn begin_connect(&mut self, request: &ConnectRequest) -> Result<Outbound, WalletError> {
        let pairing = Pairing::generate();
        let chain = caip2(&request.chain_id);
        let link = self.pairing_link(&pairing)?;
        let message = RelayMessage::Propose {
            pairing_topic: pairing.topic.clone(),
            proposal: self.proposal(&chain),
        };
        debug!(pairing_topic = %pairing.topic, %chain, "proposing session");
        let topic = Topic::from(pairing.topic.as_str());
        self.pairing = Some(pairing);
        self.session_topic = None;
        self.in_flight.clear();
        Ok(Outbound {
            topic,
            kind: RequestKind::Connect,
            delivery: Delivery::Relay {
                message,
                wallet_link: Some(link),
            },
            expires_at: Some(Utc::now() + Duration::minutes(REQUEST_TTL_MINUTES)),
        })
    }

    fn build_request(
        &mut self,
        request: &WalletRequest,
        session: ActiveSession<'_>,
    ) -> Result<Outbound, WalletError> {
        let session_topic = session.handle.expose();
        if session_topic.is_empty() {
            return Err(WalletError::invalid_session("session topic is empty"));
        }
        if self.in_flight.contains_key(session_topic) {
            return Err(WalletError::RequestPending(session_topic.to_owned()));
        }
        let address = session.wallet.address.as_str();
        let id = payload_id();
        let rpc = match request {
            WalletRequest::SignMessage(message) => {
                JsonRpcRequest::personal_sign(id, message, address)
            }
            WalletRequest::SignTypedData(typed) => {
                JsonRpcRequest::sign_typed_data(id, address, typed)?
            }
            WalletRequest::SignTransaction(TransactionPayload::Evm(tx)) => {
                JsonRpcRequest::sign_transaction(id, &with_sender(tx, address))?
            }
            WalletRequest::SendTransaction(TransactionPayload::Evm(tx)) => {
                JsonRpcRequest::send_transaction(id, &with_sender(tx, address))?
            }
            WalletRequest::SignTransaction(TransactionPayload::Serialized(_))
            | WalletRequest::SendTransaction(TransactionPayload::Serialized(_)) => {
                return Err(WalletError::InvalidRequest(
                    "relay wallets expect transaction objects".to_owned(),
                ));
            }
        };
        let chain = caip2(request.chain_id().unwrap_or(&session.wallet.chain_id));
        let wallet_link = self.wallet_link.build("", std::iter::empty::<(&str, &str)>())?;
        self.in_flight.insert(session_topic.to_owned(), id);
        debug!(%session_topic, id, method = %rpc.method, "publishing request");
        Ok(Outbound {
            topic: Topic::from(session_topic),
            kind: request.kind(),
            delivery: Delivery::Relay {
                message: RelayMessage::Request {
                    session_topic: session_topic.to_owned(),
                    chain_id: chain,
                    request: rpc,
                },
                wallet_link: Some(wallet_link),
            },
            expires_at: Some(Utc::now() + Duration::minutes(REQUEST_TTL_MINUTES)),
        })
    }

    fn interpret(&mut self, inbound: Inbound) -> Result<Resolution, WalletError> {
        let Inbound::Relay(event) = inbound else {
            return Err(WalletError::unexpected(
                "relay wallets do not answer through deep links",
            ));
        };
        match event {
            RelayEvent::PairingAcknowledged { pairing_topic } => {
                Ok(Resolution::new(pairing_topic, Outcome::PeerReached))
            }
            RelayEvent::SessionSettled {
                pairing_topic,
                session_topic,
                accounts,
                peer,
            } => Ok(self.settle(pairing_topic, session_topic, &accounts, peer)),
            RelayEvent::SessionRejected {
                pairing_topic,
                error,
            } => Ok(Resolution::new(pairing_topic, Outcome::Failed(error.into()))),
            RelayEvent::Response {
                session_topic,
                response,
            } => self.answer(session_topic, response),
            RelayEvent::SessionDeleted { session_topic } => {
                if self.session_topic.as_deref() != Some(session_topic.as_str()) {
                    return Err(WalletError::unexpected(format!(
                        "delete for unknown session {session_topic}"
                    )));
                }
                self.session_topic = None;
                self.in_flight.clear();
                Ok(Resolution::new(session_topic, Outcome::Terminated))
            }
        }
    }

    fn abandon(&mut self, topic: &Topic) { self.in_flight.remove(topic.as_str()); }

    fn end_session(&mut self, session: Option<ActiveSession<'_>>) -> Option<Delivery> {
        self.pairing = None;
        self.in_flight.clear();
        let stored = self.session_topic.take();
        let session_topic = session
            .map(|active| active.handle.expose().to_owned())
            .or(stored)?;
        Some(Delivery::Relay {
            message: RelayMessage::Delete {
                session_topic,
                reason: DISCONNECT_REASON.to_owned(),
            },
            wallet_link: None,
        })
    }
}

/// Qualify a bare EVM chain reference as CAIP-2.
fn caip2(chain: &str) -> String {
    if chain.contains(':') {
        chain.to_owned()
    } else {
        format!("eip155:{chain}")
    }
}

fn with_sender(tx: &EvmTransaction, address: &str) -> EvmTransaction {
    EvmTransaction {
        from: tx.from.clone().or_else(|| Some(address.to_owned())),
        ..tx.clone()
    }
}

/// JSON-RPC id in the relay's style: milliseconds with three random digits.
fn payload_id() -> u64 {
    let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    millis
        .saturating_mul(1000)
        .saturating_add(rand::thread_rng().gen_range(0..1000))
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{codec::JsonRpcError, wallet::WalletInfo};

    #[fixture]
    fn provider() -> WalletConnectProvider {
        WalletConnectProvider::new(WalletConnectConfig {
            relay_url: "wss://relay.walletconnect.com".to_owned(),
            project_id: "project".to_owned(),
            wallet_link: "metamask://".to_owned(),
            metadata: PeerMetadata {
                name: "Perp".to_owned(),
                url: "https://perp.example".to_owned(),
                icons: Vec::new(),
            },
        })
        .expect("provider")
    }

    fn wallet() -> WalletInfo {
        WalletInfo {
            address: "0xabc".to_owned(),
            chain_id: "1".to_owned(),
            wallet_ref: "walletconnect".to_owned(),
            peer_name: None,
            peer_image_url: None,
        }
    }

    fn send(provider: &mut WalletConnectProvider, handle: &SessionHandle) -> Outbound {
        provider
            .build_request(
                &WalletRequest::SignMessage("hello".to_owned()),
                ActiveSession {
                    handle,
                    wallet: &wallet(),
                },
            )
            .expect("request")
    }

    fn request_id(outbound: &Outbound) -> u64 {
        match &outbound.delivery {
            Delivery::Relay {
                message: RelayMessage::Request { request, .. },
                ..
            } => request.id,
            other => panic!("unexpected delivery {other:?}"),
        }
    }

    #[rstest]
    fn connect_proposes_on_pairing_topic(mut provider: WalletConnectProvider) {
        let outbound = provider
            .begin_connect(&ConnectRequest::new("137"))
            .expect("connect");

        let uri = provider.pairing_uri().expect("pairing");
        let Delivery::Relay {
            message: RelayMessage::Propose {
                pairing_topic,
                proposal,
            },
            wallet_link: Some(link),
        } = outbound.delivery
        else {
            panic!("expected proposal");
        };
        assert_eq!(outbound.topic.as_str(), pairing_topic);
        assert!(uri.starts_with(&format!("wc:{pairing_topic}@2?relay-protocol=irn&symKey=")));
        assert_eq!(
            proposal["requiredNamespaces"]["eip155"]["chains"],
            json!(["eip155:137"])
        );
        assert!(link.as_str().starts_with("metamask://wc?uri=wc%3A"));
        assert!(outbound.expires_at.is_some());
    }

    #[rstest]
    fn settlement_approves_with_session_topic(mut provider: WalletConnectProvider) {
        let outbound = provider
            .begin_connect(&ConnectRequest::new("1"))
            .expect("connect");

        let resolution = provider
            .interpret(Inbound::Relay(RelayEvent::SessionSettled {
                pairing_topic: outbound.topic.to_string(),
                session_topic: "session".to_owned(),
                accounts: vec!["eip155:1:0xabc".to_owned()],
                peer: PeerMetadata {
                    name: "MetaMask".to_owned(),
                    url: String::new(),
                    icons: vec!["https://icon".to_owned()],
                },
            }))
            .expect("resolution");

        assert_eq!(resolution.topic, outbound.topic);
        let Outcome::Approved(approval) = resolution.outcome else {
            panic!("expected approval");
        };
        let (info, handle) = approval.into_wallet("1").expect("wallet");
        assert_eq!(handle.expose(), "session");
        assert_eq!(info.peer_name.as_deref(), Some("MetaMask"));
        assert_eq!(info.peer_image_url.as_deref(), Some("https://icon"));
        assert_eq!(provider.session_topic(), Some("session"));
    }

    #[rstest]
    fn rejection_is_a_refusal(mut provider: WalletConnectProvider) {
        let resolution = provider
            .interpret(Inbound::Relay(RelayEvent::SessionRejected {
                pairing_topic: "pairing".to_owned(),
                error: JsonRpcError {
                    code: 5000,
                    message: "User rejected".to_owned(),
                },
            }))
            .expect("resolution");

        assert!(matches!(
            resolution.outcome,
            Outcome::Failed(WalletError::RefusedByWallet { code: 5000, .. })
        ));
    }

    #[rstest]
    fn mismatched_response_ids_are_not_attributed(mut provider: WalletConnectProvider) {
        let handle = SessionHandle::new("session");
        let outbound = send(&mut provider, &handle);
        let id = request_id(&outbound);

        let stray = provider.interpret(Inbound::Relay(RelayEvent::Response {
            session_topic: "session".to_owned(),
            response: JsonRpcResponse {
                id: id.wrapping_add(1),
                result: Some(json!("0xsig")),
                error: None,
            },
        }));
        let answer = provider
            .interpret(Inbound::Relay(RelayEvent::Response {
                session_topic: "session".to_owned(),
                response: JsonRpcResponse {
                    id,
                    result: Some(json!("0xsig")),
                    error: None,
                },
            }))
            .expect("answer");

        assert!(stray.is_err());
        assert!(matches!(answer.outcome, Outcome::Completed(ref sig) if sig == "0xsig"));
    }

    #[rstest]
    fn one_request_per_session_topic(mut provider: WalletConnectProvider) {
        let handle = SessionHandle::new("session");
        let outbound = send(&mut provider, &handle);

        let err = provider
            .build_request(
                &WalletRequest::SignMessage("again".to_owned()),
                ActiveSession {
                    handle: &handle,
                    wallet: &wallet(),
                },
            )
            .expect_err("busy");
        provider.abandon(&outbound.topic);

        assert_eq!(err, WalletError::RequestPending("session".to_owned()));
        assert_ne!(request_id(&send(&mut provider, &handle)), 0);
    }

    #[rstest]
    fn transactions_default_sender_and_chain(mut provider: WalletConnectProvider) {
        let handle = SessionHandle::new("session");
        let tx = EvmTransaction {
            to: "0xdef".to_owned(),
            value: Some("0x1".to_owned()),
            ..EvmTransaction::default()
        };

        let outbound = provider
            .build_request(
                &WalletRequest::SendTransaction(TransactionPayload::Evm(tx)),
                ActiveSession {
                    handle: &handle,
                    wallet: &wallet(),
                },
            )
            .expect("request");

        let Delivery::Relay {
            message: RelayMessage::Request {
                chain_id, request, ..
            },
            ..
        } = outbound.delivery
        else {
            panic!("expected request");
        };
        assert_eq!(chain_id, "eip155:1");
        assert_eq!(request.method, "eth_sendTransaction");
        assert_eq!(
            request.params,
            json!([{"from": "0xabc", "to": "0xdef", "value": "0x1"}])
        );
    }

    #[rstest]
    fn end_session_publishes_delete(mut provider: WalletConnectProvider) {
        let handle = SessionHandle::new("session");

        let delivery = provider.end_session(Some(ActiveSession {
            handle: &handle,
            wallet: &wallet(),
        }));

        assert!(matches!(
            delivery,
            Some(Delivery::Relay {
                message: RelayMessage::Delete { ref session_topic, .. },
                wallet_link: None,
            }) if session_topic == "session"
        ));
        assert_eq!(provider.end_session(None), None);
    }

    #[rstest]
    fn peer_delete_terminates_known_session(mut provider: WalletConnectProvider) {
        let outbound = provider
            .begin_connect(&ConnectRequest::new("1"))
            .expect("connect");
        provider
            .interpret(Inbound::Relay(RelayEvent::SessionSettled {
                pairing_topic: outbound.topic.to_string(),
                session_topic: "session".to_owned(),
                accounts: vec!["eip155:1:0xabc".to_owned()],
                peer: PeerMetadata::default(),
            }))
            .expect("settled");

        let unknown = provider.interpret(Inbound::Relay(RelayEvent::SessionDeleted {
            session_topic: "other".to_owned(),
        }));
        let known = provider
            .interpret(Inbound::Relay(RelayEvent::SessionDeleted {
                session_topic: "session".to_owned(),
            }))
            .expect("terminated");

        assert!(unknown.is_err());
        assert!(matches!(known.outcome, Outcome::Terminated));
        assert_eq!(provider.session_topic(), None);
    }

    #[rstest]
    fn repeated_settlement_keeps_the_first_session(mut provider: WalletConnectProvider) {
        let outbound = provider
            .begin_connect(&ConnectRequest::new("1"))
            .expect("connect");
        for session_topic in ["session", "replayed"] {
            provider
                .interpret(Inbound::Relay(RelayEvent::SessionSettled {
                    pairing_topic: outbound.topic.to_string(),
                    session_topic: session_topic.to_owned(),
                    accounts: vec!["eip155:1:0xabc".to_owned()],
                    peer: PeerMetadata::default(),
                }))
                .expect("settled");
        }

        assert_eq!(provider.session_topic(), Some("session"));
        let deleted = provider
            .interpret(Inbound::Relay(RelayEvent::SessionDeleted {
                session_topic: "session".to_owned(),
            }))
            .expect("terminated");
        assert!(matches!(deleted.outcome, Outcome::Terminated));
    }

    #[rstest]
    fn unbuildable_wallet_link_leaves_no_request_in_flight() {
        let mut provider = WalletConnectProvider::new(WalletConnectConfig {
            relay_url: "wss://relay.walletconnect.com".to_owned(),
            project_id: "project".to_owned(),
            wallet_link: "x://[".to_owned(),
            metadata: PeerMetadata::default(),
        })
        .expect("scheme accepted");
        let handle = SessionHandle::new("session");

        for _ in 0..2 {
            let err = provider
                .build_request(
                    &WalletRequest::SignMessage("hello".to_owned()),
                    ActiveSession {
                        handle: &handle,
                        wallet: &wallet(),
                    },
                )
                .expect_err("link cannot be built");
            assert!(!matches!(err, WalletError::RequestPending(_)), "{err:?}");
        }
        assert!(provider.in_flight.is_empty());
    }
}
