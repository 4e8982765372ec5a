//! Box-encrypted JSON payloads for deep-link wallets.
//!
//! Each connection attempt generates a fresh [`EphemeralKeyPair`]. Once the
//! wallet returns its public key, a [`SealedChannel`] seals and opens JSON
//! payloads with X25519 + XSalsa20-Poly1305 and a random 24-byte nonce per
//! message. Keys, nonces and ciphertexts travel base58-encoded.

use std::fmt;

use crypto_box::{
    PublicKey,
    SalsaBox,
    SecretKey,
    aead::{Aead, AeadCore, Nonce, OsRng, generic_array::GenericArray},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::WalletError;

/// Length of a box nonce in bytes.
pub const NONCE_LEN: usize = 24;
/// Length of an X25519 key in bytes.
pub const KEY_LEN: usize = 32;

/// Per-attempt key pair used to agree on a [`SealedChannel`].
pub struct EphemeralKeyPair {
    secret: SecretKey,
}

impl EphemeralKeyPair {
    /// Generate a fresh key pair from the operating system RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::generate(&mut OsRng),
        }
    }

    /// Restore a key pair from a base58-encoded secret key.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidSession`] when the text is not a
    /// base58-encoded 32-byte key.
    pub fn from_secret_base58(encoded: &str) -> Result<Self, WalletError> {
        let bytes = decode_key(encoded)
            .map_err(|detail| WalletError::invalid_session(format!("secret key {detail}")))?;
        Ok(Self {
            secret: SecretKey::from(bytes),
        })
    }

    /// Public half of the pair, base58-encoded.
    #[must_use]
    pub fn public_key_base58(&self) -> String {
        bs58::encode(self.secret.public_key().as_bytes()).into_string()
    }

    /// Secret half of the pair, base58-encoded.
    #[must_use]
    pub fn secret_base58(&self) -> String { bs58::encode(self.secret.to_bytes()).into_string() }

    /// Agree on a channel with the peer's base58-encoded public key.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::UnexpectedResponse`] when the peer key is
    /// malformed.
    pub fn channel_with(&self, peer_base58: &str) -> Result<SealedChannel, WalletError> {
        let bytes = decode_key(peer_base58)
            .map_err(|detail| WalletError::unexpected(format!("peer public key {detail}")))?;
        Ok(SealedChannel {
            cipher: SalsaBox::new(&PublicKey::from(bytes), &self.secret),
        })
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public_key", &self.public_key_base58())
            .finish_non_exhaustive()
    }
}

/// A sealed payload ready to be placed into link parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// Base58-encoded nonce.
    pub nonce: String,
    /// Base58-encoded ciphertext.
    pub data: String,
}

/// Shared-key channel between the application and one wallet.
pub struct SealedChannel {
    cipher: SalsaBox,
}

impl SealedChannel {
    /// Seal raw bytes under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidRequest`] if encryption fails.
    pub fn seal_bytes(&self, plaintext: &[u8]) -> Result<SealedPayload, WalletError> {
        let nonce = SalsaBox::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| WalletError::InvalidRequest("payload encryption failed".to_owned()))?;
        Ok(SealedPayload {
            nonce: bs58::encode(nonce.as_slice()).into_string(),
            data: bs58::encode(ciphertext).into_string(),
        })
    }

    /// Serialise `value` as JSON and seal it.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidRequest`] if serialisation or encryption
    /// fails.
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<SealedPayload, WalletError> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|err| WalletError::InvalidRequest(format!("payload encoding: {err}")))?;
        self.seal_bytes(&plaintext)
    }

    /// Open a base58-encoded ciphertext.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::UnexpectedResponse`] for malformed encodings,
    /// wrong nonce lengths, and ciphertexts that fail authentication.
    pub fn open_bytes(&self, nonce: &str, data: &str) -> Result<Vec<u8>, WalletError> {
        let nonce_bytes = bs58::decode(nonce)
            .into_vec()
            .map_err(|err| WalletError::unexpected(format!("nonce encoding: {err}")))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(WalletError::unexpected(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                nonce_bytes.len()
            )));
        }
        let ciphertext = bs58::decode(data)
            .into_vec()
            .map_err(|err| WalletError::unexpected(format!("payload encoding: {err}")))?;
        let box_nonce: Nonce<SalsaBox> = GenericArray::clone_from_slice(&nonce_bytes);
        self.cipher
            .decrypt(&box_nonce, ciphertext.as_slice())
            .map_err(|_| WalletError::unexpected("payload failed to decrypt"))
    }

    /// Open a ciphertext and decode it as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::UnexpectedResponse`] when decryption or JSON
    /// decoding fails.
    pub fn open<T: DeserializeOwned>(&self, nonce: &str, data: &str) -> Result<T, WalletError> {
        let plaintext = self.open_bytes(nonce, data)?;
        serde_json::from_slice(&plaintext)
            .map_err(|err| WalletError::unexpected(format!("payload json: {err}")))
    }
}

impl fmt::Debug for SealedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedChannel").finish_non_exhaustive()
    }
}

fn decode_key(encoded: &str) -> Result<[u8; KEY_LEN], String> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|err| format!("is not base58: {err}"))?;
    <[u8; KEY_LEN]>::try_from(bytes.as_slice())
        .map_err(|_| format!("must be {KEY_LEN} bytes, got {}", bytes.len()))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;

    struct Pair {
        app: SealedChannel,
        wallet: SealedChannel,
    }

    #[fixture]
    fn pair() -> Pair {
        let app = EphemeralKeyPair::generate();
        let wallet = EphemeralKeyPair::generate();
        Pair {
            app: app
                .channel_with(&wallet.public_key_base58())
                .expect("wallet key"),
            wallet: wallet
                .channel_with(&app.public_key_base58())
                .expect("app key"),
        }
    }

    #[rstest]
    fn peers_open_each_others_payloads(pair: Pair) {
        let sealed = pair
            .app
            .seal(&json!({"session": "abc", "message": "hi"}))
            .expect("seal");

        let opened: serde_json::Value = pair
            .wallet
            .open(&sealed.nonce, &sealed.data)
            .expect("open");

        assert_eq!(opened, json!({"session": "abc", "message": "hi"}));
    }

    #[rstest]
    fn nonces_differ_per_message(pair: Pair) {
        let first = pair.app.seal_bytes(b"same").expect("seal");
        let second = pair.app.seal_bytes(b"same").expect("seal");

        assert_ne!(first.nonce, second.nonce);
    }

    #[rstest]
    fn mismatched_key_yields_unexpected_response(pair: Pair) {
        let stranger = EphemeralKeyPair::generate()
            .channel_with(&EphemeralKeyPair::generate().public_key_base58())
            .expect("stranger channel");
        let sealed = pair.app.seal_bytes(b"secret").expect("seal");

        let err = stranger
            .open_bytes(&sealed.nonce, &sealed.data)
            .expect_err("wrong key");

        assert!(matches!(err, WalletError::UnexpectedResponse(_)));
    }

    #[rstest]
    #[case("0OIl", "abc")]
    #[case("3mJr7AoUXx2Wqd", "abc")]
    fn malformed_nonce_yields_unexpected_response(
        pair: Pair,
        #[case] nonce: &str,
        #[case] data: &str,
    ) {
        let err = pair.wallet.open_bytes(nonce, data).expect_err("malformed");

        assert!(matches!(err, WalletError::UnexpectedResponse(_)));
    }

    #[rstest]
    fn rejects_short_peer_keys() {
        let err = EphemeralKeyPair::generate()
            .channel_with("3mJr7AoUXx2Wqd")
            .expect_err("short key");

        assert!(matches!(err, WalletError::UnexpectedResponse(_)));
    }

    #[rstest]
    fn secret_round_trips_through_base58() {
        let original = EphemeralKeyPair::generate();

        let restored =
            EphemeralKeyPair::from_secret_base58(&original.secret_base58()).expect("restore");

        assert_eq!(restored.public_key_base58(), original.public_key_base58());
    }

    proptest! {
        #[test]
        fn sealing_preserves_arbitrary_bytes(
            bytes in proptest::collection::vec(any::<u8>(), 0..512)
        ) {
            let Pair { app, wallet } = pair();
            let sealed = app.seal_bytes(&bytes).expect("seal");
            let opened = wallet.open_bytes(&sealed.nonce, &sealed.data).expect("open");
            prop_assert_eq!(opened, bytes);
        }
    }
}
