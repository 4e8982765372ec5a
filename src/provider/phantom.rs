//! Phantom-style encrypted deep-link provider (Solana).
//!
//! Connect links carry the application's ephemeral public key. The wallet
//! answers on `{redirect}/onConnect` with its own public key and a sealed
//! `{public_key, session}` payload. Every later request is sealed with the
//! shared key and answered on its own redirect action, which doubles as the
//! correlation topic. Ending a connected session opens a sealed `disconnect`
//! link so the wallet forgets it too.

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::warn;

use super::{
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
};
use crate::{
    codec::{EphemeralKeyPair, SealedChannel},
    deeplink::{DeepLink, DeepLinkBuilder, DeepLinkError, InboundResponse},
    error::WalletError,
    wallet::{ChainAccount, RequestKind, SessionHandle, Topic, chain_reference},
};

/// Callback action answering a connect link.
pub const ON_CONNECT: &str = "onConnect";
/// Callback action answering `signMessage`.
pub const ON_SIGN_MESSAGE: &str = "onSignMessage";
/// Callback action answering `signTransaction`.
pub const ON_SIGN_TRANSACTION: &str = "onSignTransaction";
/// Callback action answering `signAndSendTransaction`.
pub const ON_SIGN_AND_SEND_TRANSACTION: &str = "onSignAndSendTransaction";
/// Redirect action attached to `disconnect` links.
pub const ON_DISCONNECT: &str = "onDisconnect";

/// Query parameter carrying the wallet's public key on connect.
pub const WALLET_PUBLIC_KEY_PARAM: &str = "phantom_encryption_public_key";
/// Query parameter carrying the application's public key.
pub const APP_PUBLIC_KEY_PARAM: &str = "dapp_encryption_public_key";

const USER_REJECTED: i64 = 4001;
const UNAUTHORIZED: i64 = 4100;
const DISCONNECTED: i64 = 4900;

/// Settings for [`PhantomProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhantomConfig {
    /// Universal-link base, e.g. `https://phantom.app/ul/v1`.
    pub base_url: String,
    /// Application URL shown by the wallet.
    pub app_url: String,
    /// Base of the callback links the wallet opens.
    pub redirect_link: String,
}

/// Decrypted connect payload.
#[derive(Debug, Deserialize)]
struct ConnectData {
    public_key: String,
    session: String,
}

/// Decrypted request payload.
#[derive(Debug, Deserialize)]
struct ReplyData {
    signature: Option<String>,
    transaction: Option<String>,
}

/// Provider speaking Phantom's encrypted deep-link protocol.
#[derive(Debug)]
pub struct PhantomProvider {
    links: DeepLinkBuilder,
    redirect: DeepLinkBuilder,
    app_url: String,
    keys: Option<EphemeralKeyPair>,
    channel: Option<SealedChannel>,
    cluster: Option<String>,
}

impl PhantomProvider {
    /// Build a provider from its settings.
    ///
    /// # Errors
    ///
    /// Returns [`DeepLinkError::InvalidBase`] when either link base is
    /// malformed.
    pub fn new(config: &PhantomConfig) -> Result<Self, DeepLinkError> {
        Ok(Self {
            links: DeepLinkBuilder::new(&config.base_url)?,
            redirect: DeepLinkBuilder::new(&config.redirect_link)?,
            app_url: config.app_url.clone(),
            keys: None,
            channel: None,
            cluster: None,
        })
    }

    /// Key pair of the current attempt.
    #[must_use]
    pub const fn attempt_keys(&self) -> Option<&EphemeralKeyPair> { self.keys.as_ref() }

    fn redirect_for(&self, action: &str) -> Result<DeepLink, DeepLinkError> {
        self.redirect
            .build(action, std::iter::empty::<(&str, &str)>())
    }

    fn open_connect(&mut self, response: &InboundResponse) -> Result<Outcome, WalletError> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| WalletError::invalid_session("no connect attempt in progress"))?;
        let peer = response
            .param(WALLET_PUBLIC_KEY_PARAM)
            .ok_or_else(|| WalletError::unexpected("connect response lacks wallet public key"))?;
        let channel = keys.channel_with(peer)?;
        let data: ConnectData = open_payload(&channel, response)?;
        self.channel = Some(channel);
        let reference = self.cluster.clone().unwrap_or_default();
        let accounts = if data.public_key.is_empty() {
            Vec::new()
        } else {
            vec![ChainAccount {
                namespace: "solana".to_owned(),
                reference,
                address: data.public_key,
            }]
        };
        Ok(Outcome::Approved(Approval {
            accounts,
            handle: SessionHandle::new(data.session),
            wallet_ref: self.wallet_ref().to_owned(),
            peer_name: Some("Phantom".to_owned()),
            peer_image_url: None,
        }))
    }

    fn open_reply(&self, action: &str, response: &InboundResponse) -> Result<Outcome, WalletError> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| WalletError::invalid_session("no shared key with wallet"))?;
        let data: ReplyData = open_payload(channel, response)?;
        let value = if action == ON_SIGN_TRANSACTION {
            data.transaction
        } else {
            data.signature
        };
        value
            .map(Outcome::Completed)
            .ok_or_else(|| WalletError::unexpected(format!("{action} response lacks its result")))
    }

    fn sealed_link(
        &self,
        action: &str,
        topic: &str,
        payload: &Value,
    ) -> Result<DeepLink, WalletError> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| WalletError::invalid_session("no key pair for session"))?;
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| WalletError::invalid_session("no shared key with wallet"))?;
        let sealed = channel.seal(payload)?;
        let redirect = self.redirect_for(topic)?;
        Ok(self.links.build(
            action,
            [
                (APP_PUBLIC_KEY_PARAM, keys.public_key_base58().as_str()),
                ("nonce", sealed.nonce.as_str()),
                ("redirect_link", redirect.as_str()),
                ("payload", sealed.data.as_str()),
            ],
        )?)
    }
}

impl WalletProvider for PhantomProvider {
    fn wallet_ref(&self) -> &'static str { "phantom" }

    fn begin_connect(&mut self, request: &ConnectRequest) -> Result<Outbound, WalletError> {
        let keys = EphemeralKeyPair::generate();
        let cluster = chain_reference(&request.chain_id).to_owned();
        let redirect = self.redirect_for(ON_CONNECT)?;
        let link = self.links.build(
            "connect",
            [
                ("app_url", self.app_url.as_str()),
                (APP_PUBLIC_KEY_PARAM, keys.public_key_base58().as_str()),
                ("redirect_link", redirect.as_str()),
                ("cluster", cluster.as_str()),
            ],
        )?;
        self.keys = Some(keys);
        self.channel = None;
        self.cluster = Some(cluster);
        Ok(Outbound {
            topic: Topic::from(ON_CONNECT),
            kind: RequestKind::Connect,
            delivery: Delivery::DeepLink(link),
            expires_at: None,
        })
    }

    fn build_request(
        &mut self,
        request: &WalletRequest,
        session: ActiveSession<'_>,
    ) -> Result<Outbound, WalletError> {
        let token = session.handle.expose();
        let (action, topic, payload) = match request {
            WalletRequest::SignMessage(message) => (
                "signMessage",
                ON_SIGN_MESSAGE,
                json!({
                    "message": bs58::encode(message.as_bytes()).into_string(),
                    "session": token,
                    "display": "utf8",
                }),
            ),
            WalletRequest::SignTransaction(TransactionPayload::Serialized(bytes)) => (
                "signTransaction",
                ON_SIGN_TRANSACTION,
                json!({"transaction": bs58::encode(bytes).into_string(), "session": token}),
            ),
            WalletRequest::SendTransaction(TransactionPayload::Serialized(bytes)) => (
                "signAndSendTransaction",
                ON_SIGN_AND_SEND_TRANSACTION,
                json!({"transaction": bs58::encode(bytes).into_string(), "session": token}),
            ),
            WalletRequest::SignTypedData(_) => {
                return Err(WalletError::InvalidRequest(
                    "phantom does not sign typed data".to_owned(),
                ));
            }
            WalletRequest::SignTransaction(TransactionPayload::Evm(_))
            | WalletRequest::SendTransaction(TransactionPayload::Evm(_)) => {
                return Err(WalletError::InvalidRequest(
                    "phantom expects serialised transactions".to_owned(),
                ));
            }
        };
        let link = self.sealed_link(action, topic, &payload)?;
        Ok(Outbound {
            topic: Topic::from(topic),
            kind: request.kind(),
            delivery: Delivery::DeepLink(link),
            expires_at: None,
        })
    }

    fn interpret(&mut self, inbound: Inbound) -> Result<Resolution, WalletError> {
        let Inbound::DeepLink(response) = inbound else {
            return Err(WalletError::unexpected(
                "phantom answers through deep links only",
            ));
        };
        let action = response.action();
        if ![
            ON_CONNECT,
            ON_SIGN_MESSAGE,
            ON_SIGN_TRANSACTION,
            ON_SIGN_AND_SEND_TRANSACTION,
        ]
        .contains(&action)
        {
            return Err(WalletError::unexpected(format!(
                "unknown phantom callback '{action}'"
            )));
        }
        let topic = Topic::from(action);
        if let Some(code) = response.error_code() {
            let error = map_error(code, response.error_message().unwrap_or_default());
            return Ok(Resolution::new(topic, Outcome::Failed(error)));
        }
        let opened = if action == ON_CONNECT {
            self.open_connect(&response)
        } else {
            self.open_reply(action, &response)
        };
        Ok(Resolution::new(
            topic,
            opened.unwrap_or_else(Outcome::Failed),
        ))
    }

    fn end_session(&mut self, session: Option<ActiveSession<'_>>) -> Option<Delivery> {
        let teardown = session.and_then(|active| {
            let payload = json!({"session": active.handle.expose()});
            self.sealed_link("disconnect", ON_DISCONNECT, &payload)
                .inspect_err(|err| warn!(%err, "cannot build phantom disconnect link"))
                .ok()
        });
        self.keys = None;
        self.channel = None;
        self.cluster = None;
        teardown.map(Delivery::DeepLink)
    }
}

/// Decrypt the `data` payload of a connect callback with `keys`.
///
/// # Errors
///
/// Returns [`WalletError::UnexpectedResponse`] when the callback lacks its
/// fields or fails to decrypt.
pub fn decode_connect_callback(
    keys: &EphemeralKeyPair,
    response: &InboundResponse,
) -> Result<Value, WalletError> {
    let peer = response
        .param(WALLET_PUBLIC_KEY_PARAM)
        .ok_or_else(|| WalletError::unexpected("connect response lacks wallet public key"))?;
    let channel = keys.channel_with(peer)?;
    open_payload(&channel, response)
}

fn open_payload<T: DeserializeOwned>(
    channel: &SealedChannel,
    response: &InboundResponse,
) -> Result<T, WalletError> {
    let nonce = response
        .nonce()
        .ok_or_else(|| WalletError::unexpected("response lacks nonce"))?;
    let data = response
        .data()
        .ok_or_else(|| WalletError::unexpected("response lacks data"))?;
    channel.open(nonce, data)
}

fn map_error(code: &str, message: &str) -> WalletError {
    let Ok(parsed) = code.parse::<i64>() else {
        return WalletError::unexpected(format!("wallet error '{code}': {message}"));
    };
    match parsed {
        USER_REJECTED => WalletError::RefusedByWallet {
            code: parsed,
            message: message.to_owned(),
        },
        UNAUTHORIZED => WalletError::invalid_session(message),
        DISCONNECTED => WalletError::ConnectionFailed(message.to_owned()),
        _ => WalletError::unexpected(format!("wallet error {parsed}: {message}")),
    }
}
