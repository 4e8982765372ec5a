//! Relay sessions driven through recorded relay traffic.

use std::sync::Arc;

use rstest::{fixture, rstest};
use serde_json::json;
use test_util::{RecordingOpener, RecordingRelay};
use wallet_bridge::{
    BridgeOptions,
    WalletBridge,
    WalletError,
    codec::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, jsonrpc::RELAY_USER_REJECTED},
    provider::{
        ConnectRequest,
        EvmTransaction,
        Inbound,
        PeerMetadata,
        RelayEvent,
        RelayMessage,
        TransactionPayload,
        walletconnect::{WalletConnectConfig, WalletConnectProvider},
    },
    wallet::ConnectionState,
};

const SESSION: &str = "settled-session";

struct Relayed {
    bridge: WalletBridge<WalletConnectProvider>,
    opener: Arc<RecordingOpener>,
    relay: Arc<RecordingRelay>,
}

impl Relayed {
    fn settle(&self, pairing_topic: &str) -> bool {
        self.bridge
            .handle_inbound(Inbound::Relay(RelayEvent::SessionSettled {
                pairing_topic: pairing_topic.to_owned(),
                session_topic: SESSION.to_owned(),
                accounts: vec!["eip155:1:0xabc".to_owned()],
                peer: PeerMetadata {
                    name: "MetaMask".to_owned(),
                    url: "https://metamask.io".to_owned(),
                    icons: vec!["https://metamask.io/icon.png".to_owned()],
                },
            }))
    }

    async fn connected(self) -> Self {
        let bridge = self.bridge.clone();
        let attempt = tokio::spawn(async move { bridge.connect(ConnectRequest::new("1")).await });
        let RelayMessage::Propose { pairing_topic, .. } = self.relay.nth(1).await else {
            panic!("expected a proposal");
        };
        assert!(self.settle(&pairing_topic));
        attempt.await.expect("connect task").expect("connected");
        self
    }

    /// Wait for the `n`th relay message and return it as a request.
    async fn request(&self, n: usize) -> JsonRpcRequest {
        match self.relay.nth(n).await {
            RelayMessage::Request {
                session_topic,
                request,
                ..
            } => {
                assert_eq!(session_topic, SESSION);
                request
            }
            other => panic!("expected a request, got {other:?}"),
        }
    }

    fn respond(&self, response: JsonRpcResponse) -> bool {
        self.bridge.handle_inbound(Inbound::Relay(RelayEvent::Response {
            session_topic: SESSION.to_owned(),
            response,
        }))
    }
}

#[fixture]
fn relayed() -> Relayed {
    let opener = RecordingOpener::accepting();
    let relay = RecordingRelay::accepting();
    let provider = WalletConnectProvider::new(WalletConnectConfig {
        relay_url: "wss://relay.example".to_owned(),
        project_id: "project".to_owned(),
        wallet_link: "metamask://".to_owned(),
        metadata: PeerMetadata {
            name: "wallet-bridge".to_owned(),
            ..PeerMetadata::default()
        },
    })
    .expect("provider");
    Relayed {
        bridge: WalletBridge::new(provider, opener.clone(), BridgeOptions::new("1"))
            .with_relay(relay.clone()),
        opener,
        relay,
    }
}

#[rstest]
#[tokio::test]
async fn proposal_walks_through_every_connection_state(relayed: Relayed) {
    let states = relayed.bridge.subscribe();
    let bridge = relayed.bridge.clone();
    let attempt = tokio::spawn(async move { bridge.connect(ConnectRequest::new("1")).await });

    let RelayMessage::Propose {
        pairing_topic,
        proposal,
    } = relayed.relay.nth(1).await
    else {
        panic!("expected a proposal");
    };
    assert_eq!(
        proposal["requiredNamespaces"]["eip155"]["chains"],
        json!(["eip155:1"])
    );
    let link = relayed.opener.nth(1).await;
    let pairing_uri = link.query_param("uri").expect("pairing uri");
    assert!(link.as_str().starts_with("metamask://wc?uri="));
    assert!(pairing_uri.starts_with(&format!("wc:{pairing_topic}@2?")));
    assert_eq!(relayed.bridge.status().state, ConnectionState::Listening);

    assert!(
        relayed
            .bridge
            .handle_inbound(Inbound::Relay(RelayEvent::PairingAcknowledged {
                pairing_topic: pairing_topic.clone(),
            }))
    );
    assert_eq!(relayed.bridge.status().state, ConnectionState::ConnectedToServer);

    assert!(relayed.settle(&pairing_topic));
    let wallet = attempt.await.expect("connect task").expect("connected");
    assert_eq!(wallet.address, "0xabc");
    assert_eq!(wallet.wallet_ref, "walletconnect");
    assert_eq!(
        wallet.peer_image_url.as_deref(),
        Some("https://metamask.io/icon.png")
    );
    assert!(states.has_changed().expect("tracker alive"));
    assert_eq!(states.borrow().state, ConnectionState::ConnectedToWallet);
}

#[rstest]
#[tokio::test]
async fn typed_data_answer_must_carry_the_request_id(relayed: Relayed) {
    let relayed = relayed.connected().await;
    let bridge = relayed.bridge.clone();
    let typed = r#"{"primaryType":"Mail","message":{"contents":"hi"}}"#;
    let signing = tokio::spawn(async move { bridge.sign_typed_data(typed).await });

    let request = relayed.request(2).await;
    assert_eq!(request.method, "eth_signTypedData_v4");
    assert_eq!(request.params, json!(["0xabc", typed]));

    assert!(!relayed.respond(JsonRpcResponse {
        id: request.id.wrapping_add(1),
        result: Some(json!("0xforged")),
        error: None,
    }));
    assert_eq!(relayed.bridge.pending_requests(), 1);
    assert!(relayed.respond(JsonRpcResponse {
        id: request.id,
        result: Some(json!("0xtyped")),
        error: None,
    }));

    assert_eq!(signing.await.expect("sign task"), Ok("0xtyped".to_owned()));
}

#[rstest]
#[tokio::test]
async fn relay_rejection_is_a_refusal(relayed: Relayed) {
    let relayed = relayed.connected().await;
    let bridge = relayed.bridge.clone();
    let sending = tokio::spawn(async move {
        bridge
            .send_transaction(TransactionPayload::Evm(EvmTransaction {
                to: "0xdef".to_owned(),
                value: Some("0x1".to_owned()),
                ..EvmTransaction::default()
            }))
            .await
    });

    let request = relayed.request(2).await;
    assert_eq!(request.method, "eth_sendTransaction");
    assert_eq!(request.params[0]["from"], json!("0xabc"));
    assert!(relayed.respond(JsonRpcResponse {
        id: request.id,
        result: None,
        error: Some(JsonRpcError {
            code: RELAY_USER_REJECTED,
            message: "User rejected.".to_owned(),
        }),
    }));

    assert_eq!(
        sending.await.expect("send task"),
        Err(WalletError::RefusedByWallet {
            code: RELAY_USER_REJECTED,
            message: "User rejected.".to_owned(),
        })
    );
    assert!(relayed.bridge.is_connected());
}

#[rstest]
#[tokio::test]
async fn disconnect_publishes_a_session_delete(relayed: Relayed) {
    let relayed = relayed.connected().await;

    relayed.bridge.disconnect().await;

    assert_eq!(
        relayed.relay.nth(2).await,
        RelayMessage::Delete {
            session_topic: SESSION.to_owned(),
            reason: "User disconnected".to_owned(),
        }
    );
    assert_eq!(relayed.bridge.status().state, ConnectionState::Idle);
}

#[rstest]
#[tokio::test]
async fn wallet_side_delete_resets_the_bridge(relayed: Relayed) {
    let relayed = relayed.connected().await;
    let bridge = relayed.bridge.clone();
    let signing = tokio::spawn(async move { bridge.sign_message("hello").await });
    relayed.request(2).await;

    assert!(
        relayed
            .bridge
            .handle_inbound(Inbound::Relay(RelayEvent::SessionDeleted {
                session_topic: SESSION.to_owned(),
            }))
    );

    assert_eq!(signing.await.expect("sign task"), Err(WalletError::Cancelled));
    let status = relayed.bridge.status();
    assert_eq!(status.state, ConnectionState::Idle);
    assert!(status.wallet.is_none());
    assert_eq!(relayed.relay.messages().len(), 2, "no delete echoed back");
}

#[rstest]
#[tokio::test]
async fn unreachable_relay_fails_the_connect(relayed: Relayed) {
    relayed.relay.set_fail(true);

    let outcome = relayed.bridge.connect(ConnectRequest::new("1")).await;

    assert_eq!(
        outcome,
        Err(WalletError::ConnectionFailed("relay unavailable".to_owned()))
    );
    assert_eq!(relayed.bridge.status().state, ConnectionState::Idle);
    assert_eq!(relayed.opener.count(), 0);
    assert_eq!(relayed.bridge.pending_requests(), 0);
}
