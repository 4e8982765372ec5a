//! Wallet connection and signing-request lifecycle.
//!
//! The crate drives a mobile-style wallet adapter: it connects to a wallet
//! through a deep link or a relay, tracks the connection state, dispatches
//! signing requests and correlates the asynchronous responses that come back
//! through callback URIs or relay events.
//!
//! Two protocol adapters are provided: Phantom-style encrypted deep links
//! ([`provider::phantom`]) and WalletConnect-style relay sessions
//! ([`provider::walletconnect`]). Both plug into the
//! [`bridge::WalletBridge`] orchestrator. Platform facilities are reached
//! through the [`deeplink::LinkOpener`] and [`deeplink::RelayTransport`]
//! traits.

pub mod bridge;
pub mod cli;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod deeplink;
pub mod error;
pub mod provider;
pub mod session;
pub mod wallet;

pub use bridge::{BridgeOptions, WalletBridge};
pub use error::WalletError;
