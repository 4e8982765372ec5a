//! Deep-link construction and the seams to the host platform.
//!
//! A [`DeepLinkBuilder`] joins a provider base URL with an action segment and
//! query parameters. Opening the link is delegated to a [`LinkOpener`], and
//! relay-based providers publish through a [`RelayTransport`]. Both traits
//! stand in for platform or vendor SDK facilities.

mod inbound;

use std::fmt;

use async_trait::async_trait;
pub use inbound::InboundResponse;
use thiserror::Error;
use url::Url;

use crate::{error::WalletError, provider::RelayMessage};

/// Errors raised while building or parsing links.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeepLinkError {
    /// The configured base URL cannot carry an action segment.
    #[error("invalid deep-link base '{base}': {reason}")]
    InvalidBase {
        /// Offending base URL.
        base: String,
        /// Parser diagnostic.
        reason: String,
    },
    /// A URI could not be parsed.
    #[error("invalid uri '{uri}': {reason}")]
    InvalidUri {
        /// Offending URI.
        uri: String,
        /// Parser diagnostic.
        reason: String,
    },
    /// An inbound URI has no action to route on.
    #[error("uri '{0}' carries no action")]
    MissingAction(String),
}

impl From<DeepLinkError> for WalletError {
    fn from(value: DeepLinkError) -> Self {
        match value {
            DeepLinkError::InvalidBase { .. } => Self::ConnectionFailed(value.to_string()),
            DeepLinkError::InvalidUri { .. } | DeepLinkError::MissingAction(_) => {
                Self::UnexpectedResponse(value.to_string())
            }
        }
    }
}

/// A fully built provider URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLink(Url);

impl DeepLink {
    /// Parse an already assembled URI.
    ///
    /// # Errors
    ///
    /// Returns [`DeepLinkError::InvalidUri`] when `uri` is not a valid URL.
    pub fn parse(uri: &str) -> Result<Self, DeepLinkError> {
        Url::parse(uri).map(Self).map_err(|err| DeepLinkError::InvalidUri {
            uri: uri.to_owned(),
            reason: err.to_string(),
        })
    }

    /// Borrow the link as text.
    #[must_use]
    pub fn as_str(&self) -> &str { self.0.as_str() }

    /// Look up the first query parameter named `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.0
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

impl fmt::Display for DeepLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Builds provider URIs from a base URL.
///
/// Bases may be web URLs (`https://phantom.app/ul/v1`), authority-style
/// native schemes (`metamask://`) or bare schemes (`wc:`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLinkBuilder {
    base: String,
}

impl DeepLinkBuilder {
    /// Validate and store a base URL.
    ///
    /// # Errors
    ///
    /// Returns [`DeepLinkError::InvalidBase`] when `base` has no scheme.
    ///
    /// # Examples
    ///
    /// ```
    /// use wallet_bridge::deeplink::DeepLinkBuilder;
    ///
    /// let builder = DeepLinkBuilder::new("https://phantom.app/ul/v1/").expect("base");
    /// let link = builder.build("connect", [("cluster", "devnet")]).expect("link");
    /// assert_eq!(link.as_str(), "https://phantom.app/ul/v1/connect?cluster=devnet");
    /// ```
    pub fn new(base: &str) -> Result<Self, DeepLinkError> {
        let trimmed = base.trim();
        let Some((scheme, _)) = trimmed.split_once(':') else {
            return Err(DeepLinkError::InvalidBase {
                base: base.to_owned(),
                reason: "missing scheme".to_owned(),
            });
        };
        if scheme.is_empty() || !scheme.chars().all(is_scheme_char) {
            return Err(DeepLinkError::InvalidBase {
                base: base.to_owned(),
                reason: format!("invalid scheme '{scheme}'"),
            });
        }
        Ok(Self {
            base: trimmed.to_owned(),
        })
    }

    /// Join `action` onto the base and append `params` as query pairs.
    ///
    /// Parameter names are emitted exactly as given.
    ///
    /// # Errors
    ///
    /// Returns [`DeepLinkError::InvalidUri`] when the joined text is not a
    /// valid URL.
    pub fn build<I, K, V>(&self, action: &str, params: I) -> Result<DeepLink, DeepLinkError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let joined = self.join(action);
        let mut link = DeepLink::parse(&joined)?;
        let mut pairs = params.into_iter().peekable();
        if pairs.peek().is_some() {
            let mut query = link.0.query_pairs_mut();
            for (key, value) in pairs {
                query.append_pair(key.as_ref(), value.as_ref());
            }
        }
        Ok(link)
    }

    fn join(&self, action: &str) -> String {
        let segment = action.trim_start_matches('/');
        if segment.is_empty() {
            return self.base.clone();
        }
        if self.base.ends_with("://") || self.base.ends_with(':') {
            format!("{}{segment}", self.base)
        } else {
            format!("{}/{segment}", self.base.trim_end_matches('/'))
        }
    }
}

const fn is_scheme_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')
}

/// Hands a link to the operating system's inter-app mechanism.
#[async_trait]
pub trait LinkOpener: Send + Sync {
    /// Open `link`, returning `false` when no installed app handles it.
    async fn open(&self, link: &DeepLink) -> bool;
}

/// Publishes messages through a wallet relay network.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Publish `message` to its topic.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::ConnectionFailed`] when the relay rejects or
    /// cannot deliver the message.
    async fn publish(&self, message: &RelayMessage) -> Result<(), WalletError>;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("https://phantom.app/ul/v1", "connect", "https://phantom.app/ul/v1/connect")]
    #[case("https://phantom.app/ul/v1/", "/connect", "https://phantom.app/ul/v1/connect")]
    #[case("metamask://", "wc", "metamask://wc")]
    #[case("trust:", "wc", "trust:wc")]
    #[case("perp://wallet", "", "perp://wallet")]
    fn joins_actions_onto_bases(#[case] base: &str, #[case] action: &str, #[case] expected: &str) {
        let builder = DeepLinkBuilder::new(base).expect("valid base");

        let link = builder
            .build(action, std::iter::empty::<(&str, &str)>())
            .expect("link");

        assert_eq!(link.as_str(), expected);
    }

    #[rstest]
    fn encodes_nested_uris_in_parameters() {
        let builder = DeepLinkBuilder::new("metamask://").expect("valid base");

        let link = builder
            .build("wc", [("uri", "wc:abc@2?relay-protocol=irn&symKey=00")])
            .expect("link");

        assert_eq!(
            link.query_param("uri").as_deref(),
            Some("wc:abc@2?relay-protocol=irn&symKey=00")
        );
        assert!(!link.as_str().contains("&symKey"));
    }

    #[rstest]
    #[case("phantom.app/ul/v1")]
    #[case(":missing")]
    #[case("ht tp://bad")]
    fn rejects_bases_without_scheme(#[case] base: &str) {
        let err = DeepLinkBuilder::new(base).expect_err("must fail");

        assert!(matches!(err, DeepLinkError::InvalidBase { .. }));
    }

    #[rstest]
    fn base_errors_become_connection_failures() {
        let err: WalletError = DeepLinkError::InvalidBase {
            base: "x".to_owned(),
            reason: "missing scheme".to_owned(),
        }
        .into();

        assert!(matches!(err, WalletError::ConnectionFailed(_)));
    }
}
