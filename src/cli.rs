//! Developer CLI for building and inspecting wallet links.
//!
//! The binary stays a thin wrapper around [`run`]; output goes to a caller
//! supplied writer so the commands can be exercised in tests.

use std::{ffi::OsString, io::Write};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::{
    codec::EphemeralKeyPair,
    config::BridgeConfig,
    deeplink::InboundResponse,
    provider::{
        ConnectRequest,
        Delivery,
        RelayMessage,
        WalletProvider,
        phantom::{self, PhantomProvider},
        walletconnect::WalletConnectProvider,
    },
};

const SUBCOMMANDS: [&str; 3] = ["phantom-link", "phantom-decode", "wc-uri"];

/// Arguments for `phantom-link`.
#[derive(Args, Deserialize, Serialize, Debug, Clone, Default)]
pub struct PhantomLinkArgs {
    /// Cluster overriding the configured one.
    #[arg(long)]
    pub cluster: Option<String>,
}

/// Arguments for `phantom-decode`.
#[derive(Args, Deserialize, Serialize, Debug, Clone)]
pub struct PhantomDecodeArgs {
    /// Base58 secret key printed by `phantom-link`.
    #[arg(long)]
    pub secret: String,
    /// Callback URI opened by the wallet.
    pub uri: String,
}

/// Arguments for `wc-uri`.
#[derive(Args, Deserialize, Serialize, Debug, Clone, Default)]
pub struct WcUriArgs {
    /// Chain overriding the configured one.
    #[arg(long)]
    pub chain: Option<String>,
}

/// CLI subcommands exposed by `wallet-bridge`.
#[derive(Subcommand, Deserialize, Serialize, Debug, Clone)]
pub enum Commands {
    /// Build a Phantom connect link and print its ephemeral secret.
    #[command(name = "phantom-link")]
    PhantomLink(PhantomLinkArgs),
    /// Decrypt a Phantom connect callback.
    #[command(name = "phantom-decode")]
    PhantomDecode(PhantomDecodeArgs),
    /// Mint a WalletConnect pairing URI and session proposal.
    #[command(name = "wc-uri")]
    WcUri(WcUriArgs),
}

/// Top-level CLI entry point consumed by the binary.
#[derive(Parser, Deserialize, Serialize, Debug, Clone)]
#[command(name = "wallet-bridge", version, about)]
pub struct Cli {
    /// Bridge configuration.
    #[command(flatten)]
    pub config: BridgeConfig,
    /// Command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Install the `RUST_LOG`-driven tracing subscriber, writing to stderr.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
    if installed.is_err() {
        debug!("tracing subscriber already installed");
    }
}

/// Parse `args`, merge layered configuration and run the command.
///
/// # Errors
///
/// Returns any failure raised while parsing arguments, loading configuration
/// or building and decoding links.
pub fn run<I, T, W>(argv: I, out: &mut W) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    W: Write,
{
    let args: Vec<OsString> = argv.into_iter().map(Into::into).collect();
    let cli = Cli::try_parse_from(&args)?;
    let config = BridgeConfig::load_from_iter(global_args(&args))
        .map_err(|err| anyhow!("failed to load configuration: {err}"))?;
    dispatch(cli.command, &config, out)
}

/// Arguments preceding the subcommand, i.e. the configuration flags.
fn global_args(args: &[OsString]) -> Vec<OsString> {
    args.iter()
        .take_while(|arg| !SUBCOMMANDS.iter().any(|name| arg.as_os_str() == *name))
        .cloned()
        .collect()
}

/// Execute `command` with the merged `config`.
///
/// # Errors
///
/// Propagates failures from the individual commands.
pub fn dispatch<W: Write>(command: Commands, config: &BridgeConfig, out: &mut W) -> Result<()> {
    match command {
        Commands::PhantomLink(args) => phantom_link(&args, config, out),
        Commands::PhantomDecode(args) => phantom_decode(&args, out),
        Commands::WcUri(args) => wc_uri(&args, config, out),
    }
}

fn phantom_link<W: Write>(
    args: &PhantomLinkArgs,
    config: &BridgeConfig,
    out: &mut W,
) -> Result<()> {
    let mut provider = PhantomProvider::new(&config.phantom())?;
    let cluster = args.cluster.as_deref().unwrap_or(&config.cluster);
    let outbound = provider.begin_connect(&ConnectRequest::new(cluster))?;
    let keys = provider
        .attempt_keys()
        .context("connect attempt produced no key pair")?;
    let Delivery::DeepLink(link) = outbound.delivery else {
        return Err(anyhow!("phantom connect is not a deep link"));
    };
    writeln!(out, "link: {link}")?;
    writeln!(out, "secret: {}", keys.secret_base58())?;
    Ok(())
}

fn phantom_decode<W: Write>(args: &PhantomDecodeArgs, out: &mut W) -> Result<()> {
    let keys = EphemeralKeyPair::from_secret_base58(&args.secret)?;
    let response = InboundResponse::parse(&args.uri)?;
    if let Some(code) = response.error_code() {
        writeln!(
            out,
            "error {code}: {}",
            response.error_message().unwrap_or_default()
        )?;
        return Ok(());
    }
    let payload = phantom::decode_connect_callback(&keys, &response)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

fn wc_uri<W: Write>(args: &WcUriArgs, config: &BridgeConfig, out: &mut W) -> Result<()> {
    let mut provider = WalletConnectProvider::new(config.walletconnect())?;
    let chain = args.chain.as_deref().unwrap_or(&config.chain_id);
    let outbound = provider.begin_connect(&ConnectRequest::new(chain))?;
    let uri = provider
        .pairing_uri()
        .context("connect attempt produced no pairing")?;
    writeln!(out, "uri: {uri}")?;
    if let Delivery::Relay {
        message: RelayMessage::Propose { proposal, .. },
        wallet_link,
    } = outbound.delivery
    {
        if let Some(link) = wallet_link {
            writeln!(out, "wallet: {link}")?;
        }
        writeln!(out, "{}", serde_json::to_string_pretty(&proposal)?)?;
    }
    Ok(())
}
