//! Payload codecs for the two families of wallet transport.
//!
//! - [`sealed`] encrypts JSON payloads for deep-link wallets that require
//!   end-to-end encryption.
//! - [`jsonrpc`] builds and decodes the JSON-RPC envelopes used over relays.

pub mod jsonrpc;
pub mod sealed;

pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use sealed::{EphemeralKeyPair, SealedChannel, SealedPayload};
