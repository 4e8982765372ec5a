//! Layered configuration for the bridge and its developer CLI.
//!
//! Values come from defaults, a dotfile, `WALLET_BRIDGE_*` environment
//! variables and command-line flags, later layers overriding earlier ones.

#![expect(
    non_snake_case,
    reason = "Clap/OrthoConfig derive macros generate helper modules with uppercase names"
)]
#![allow(
    missing_docs,
    reason = "OrthoConfig and Clap derive macros generate items that cannot be documented"
)]
#![allow(
    unfulfilled_lint_expectations,
    reason = "derive macros conditionally generate items"
)]

use std::time::Duration;

use clap::Args;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

use crate::{
    bridge::BridgeOptions,
    provider::{PeerMetadata, phantom::PhantomConfig, walletconnect::WalletConnectConfig},
};

/// Phantom universal-link base.
pub const DEFAULT_PHANTOM_BASE_URL: &str = "https://phantom.app/ul/v1";
/// Callback base the wallet redirects to.
pub const DEFAULT_REDIRECT_LINK: &str = "walletbridge://wallet";
/// Public WalletConnect relay.
pub const DEFAULT_RELAY_URL: &str = "wss://relay.walletconnect.com";

/// Settings shared by every provider.
#[expect(
    missing_docs,
    reason = "OrthoConfig derive macro generates items that cannot be documented"
)]
#[derive(Args, OrthoConfig, Serialize, Deserialize, Default, Debug, Clone)]
#[ortho_config(prefix = "WALLET_BRIDGE_")]
pub struct BridgeConfig {
    /// Application URL presented to wallets.
    #[ortho_config(default = "https://walletbridge.example".to_owned())]
    #[arg(long, default_value_t = String::from("https://walletbridge.example"))]
    pub app_url: String,
    /// Application name presented to wallets.
    #[ortho_config(default = "wallet-bridge".to_owned())]
    #[arg(long, default_value_t = String::from("wallet-bridge"))]
    pub app_name: String,
    /// Base of the callback links wallets open.
    #[ortho_config(default = DEFAULT_REDIRECT_LINK.to_owned())]
    #[arg(long, default_value_t = String::from(DEFAULT_REDIRECT_LINK))]
    pub redirect_link: String,
    /// Phantom universal-link base.
    #[ortho_config(default = DEFAULT_PHANTOM_BASE_URL.to_owned())]
    #[arg(long, default_value_t = String::from(DEFAULT_PHANTOM_BASE_URL))]
    pub phantom_base_url: String,
    /// Solana cluster used by Phantom connects.
    #[ortho_config(default = "mainnet-beta".to_owned())]
    #[arg(long, default_value_t = String::from("mainnet-beta"))]
    pub cluster: String,
    /// EVM chain used by relay connects.
    #[ortho_config(default = "1".to_owned())]
    #[arg(long, default_value_t = String::from("1"))]
    pub chain_id: String,
    /// Relay endpoint for WalletConnect sessions.
    #[ortho_config(default = DEFAULT_RELAY_URL.to_owned())]
    #[arg(long, default_value_t = String::from(DEFAULT_RELAY_URL))]
    pub relay_url: String,
    /// WalletConnect cloud project identifier.
    #[ortho_config(default = String::new())]
    #[arg(long, default_value_t = String::new())]
    pub project_id: String,
    /// Native wallet link opened after publishing relay messages.
    #[ortho_config(default = "metamask://".to_owned())]
    #[arg(long, default_value_t = String::from("metamask://"))]
    pub wallet_link: String,
    /// Seconds to wait for a wallet response; `0` waits indefinitely.
    #[ortho_config(default = 0)]
    #[arg(long, default_value_t = 0)]
    pub request_timeout_secs: u64,
}

impl BridgeConfig {
    /// Settings for a Phantom provider.
    #[must_use]
    pub fn phantom(&self) -> PhantomConfig {
        PhantomConfig {
            base_url: self.phantom_base_url.clone(),
            app_url: self.app_url.clone(),
            redirect_link: self.redirect_link.clone(),
        }
    }

    /// Settings for a WalletConnect provider.
    #[must_use]
    pub fn walletconnect(&self) -> WalletConnectConfig {
        WalletConnectConfig {
            relay_url: self.relay_url.clone(),
            project_id: self.project_id.clone(),
            wallet_link: self.wallet_link.clone(),
            metadata: PeerMetadata {
                name: self.app_name.clone(),
                url: self.app_url.clone(),
                icons: Vec::new(),
            },
        }
    }

    /// Bridge tuning for implicit connects on `chain_id`.
    #[must_use]
    pub fn bridge_options(&self, chain_id: &str) -> BridgeOptions {
        let options = BridgeOptions::new(chain_id);
        match self.request_timeout_secs {
            0 => options,
            secs => options.with_timeout(Duration::from_secs(secs)),
        }
    }
}
