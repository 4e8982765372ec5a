//! Simulated Phantom wallet answering connect and signing links.

use anyhow::{Context, Result, anyhow, ensure};
use serde_json::{Value, json};
use url::Url;
use wallet_bridge::{
    codec::{EphemeralKeyPair, SealedChannel},
    deeplink::DeepLink,
    provider::phantom::{APP_PUBLIC_KEY_PARAM, WALLET_PUBLIC_KEY_PARAM},
};

/// Wallet side of the Phantom deep-link protocol.
///
/// Each answer is returned as the callback URI the wallet app would open.
#[derive(Debug)]
pub struct PhantomWallet {
    keys: EphemeralKeyPair,
    account: String,
    session: String,
    channel: Option<SealedChannel>,
}

impl PhantomWallet {
    /// Wallet exposing `account`.
    #[must_use]
    pub fn new(account: &str) -> Self {
        Self {
            keys: EphemeralKeyPair::generate(),
            account: account.to_owned(),
            session: format!("session-{account}"),
            channel: None,
        }
    }

    /// Session token handed out on approval.
    #[must_use]
    pub fn session(&self) -> &str { &self.session }

    /// Approve a connect link.
    ///
    /// # Errors
    ///
    /// Fails when the link lacks the application key or redirect.
    pub fn approve_connect(&mut self, link: &DeepLink) -> Result<String> {
        let dapp_key = param(link, APP_PUBLIC_KEY_PARAM)?;
        let channel = self.keys.channel_with(&dapp_key)?;
        let sealed = channel.seal(&json!({
            "public_key": self.account,
            "session": self.session,
        }))?;
        self.channel = Some(channel);
        callback(
            link,
            &[
                (WALLET_PUBLIC_KEY_PARAM, self.keys.public_key_base58().as_str()),
                ("nonce", sealed.nonce.as_str()),
                ("data", sealed.data.as_str()),
            ],
        )
    }

    /// Decrypt the payload of a signing link.
    ///
    /// # Errors
    ///
    /// Fails before a connect was approved or when the payload does not
    /// carry this wallet's session.
    pub fn read_request(&self, link: &DeepLink) -> Result<Value> {
        let channel = self.channel.as_ref().context("wallet is not connected")?;
        let payload: Value = channel.open(&param(link, "nonce")?, &param(link, "payload")?)?;
        ensure!(
            payload.get("session").and_then(Value::as_str) == Some(self.session.as_str()),
            "request carries a foreign session"
        );
        Ok(payload)
    }

    /// Sign the message carried by a `signMessage` link.
    ///
    /// Returns the decoded message and the callback URI.
    ///
    /// # Errors
    ///
    /// See [`Self::read_request`].
    pub fn sign_message(&self, link: &DeepLink) -> Result<(String, String)> {
        let payload = self.read_request(link)?;
        let encoded = payload
            .get("message")
            .and_then(Value::as_str)
            .context("payload lacks message")?;
        let message = String::from_utf8(bs58::decode(encoded).into_vec()?)?;
        let uri = self.reply(link, &json!({"signature": signature_for(&message)}))?;
        Ok((message, uri))
    }

    /// Seal `value` as the reply to `link`.
    ///
    /// # Errors
    ///
    /// Fails before a connect was approved.
    pub fn reply(&self, link: &DeepLink, value: &Value) -> Result<String> {
        let channel = self.channel.as_ref().context("wallet is not connected")?;
        let sealed = channel.seal(value)?;
        callback(
            link,
            &[
                ("nonce", sealed.nonce.as_str()),
                ("data", sealed.data.as_str()),
            ],
        )
    }

    /// Reject `link` with a wallet error code.
    ///
    /// # Errors
    ///
    /// Fails when the link lacks a redirect.
    pub fn reject(link: &DeepLink, code: i64, message: &str) -> Result<String> {
        callback(
            link,
            &[
                ("errorCode", code.to_string().as_str()),
                ("errorMessage", message),
            ],
        )
    }
}

/// Signature the simulated wallet produces for `message`.
#[must_use]
pub fn signature_for(message: &str) -> String {
    bs58::encode(format!("signed:{message}")).into_string()
}

fn param(link: &DeepLink, name: &str) -> Result<String> {
    link.query_param(name)
        .ok_or_else(|| anyhow!("link {link} lacks {name}"))
}

fn callback(link: &DeepLink, params: &[(&str, &str)]) -> Result<String> {
    let mut url = Url::parse(&param(link, "redirect_link")?)?;
    url.query_pairs_mut().extend_pairs(params);
    Ok(url.into())
}
