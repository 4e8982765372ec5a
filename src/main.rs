//! Binary entry point for the `wallet-bridge` developer CLI.
//!
//! The command logic lives in `wallet_bridge::cli`, so this binary only
//! installs logging and delegates to the library.

use anyhow::Result;

fn main() -> Result<()> {
    wallet_bridge::cli::init_tracing();
    let stdout = std::io::stdout();
    wallet_bridge::cli::run(std::env::args_os(), &mut stdout.lock())
}
