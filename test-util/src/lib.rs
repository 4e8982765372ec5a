//! Utilities for integration tests.
//!
//! The `test-util` crate provides recording stand-ins for the platform link
//! opener and the relay transport, and a simulated Phantom wallet that answers
//! connect and signing links the way the real app does. It is used by the
//! integration tests of the main crate.

mod phantom;
mod transport;

use std::sync::{Mutex, MutexGuard};

pub use phantom::{PhantomWallet, signature_for};
use rstest::fixture;
pub use transport::{RecordingOpener, RecordingRelay};
use wallet_bridge::provider::phantom::PhantomConfig;

/// Callback base used by the fixtures.
pub const REDIRECT_LINK: &str = "walletbridge://wallet";

/// Phantom settings pointing callbacks at [`REDIRECT_LINK`].
#[fixture]
pub fn phantom_config() -> PhantomConfig {
    PhantomConfig {
        base_url: "https://phantom.app/ul/v1".to_owned(),
        app_url: "https://walletbridge.example".to_owned(),
        redirect_link: REDIRECT_LINK.to_owned(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
