//! Parsing of callback URIs returned by wallet apps.

use std::collections::HashMap;

use url::Url;

use super::DeepLinkError;

/// A callback URI split into its routing action and query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundResponse {
    action: String,
    params: HashMap<String, String>,
}

impl InboundResponse {
    /// Parse a callback URI.
    ///
    /// The action is the last non-empty path segment. For authority-style
    /// callbacks such as `app://onConnect?...` the host is used instead.
    ///
    /// # Errors
    ///
    /// Returns [`DeepLinkError::InvalidUri`] for malformed URIs and
    /// [`DeepLinkError::MissingAction`] when nothing identifies the action.
    ///
    /// # Examples
    ///
    /// ```
    /// use wallet_bridge::deeplink::InboundResponse;
    ///
    /// let response =
    ///     InboundResponse::parse("perp://wallet/onConnect?errorCode=4001&errorMessage=nope")
    ///         .expect("callback");
    /// assert_eq!(response.action(), "onConnect");
    /// assert_eq!(response.error_code(), Some("4001"));
    /// ```
    pub fn parse(uri: &str) -> Result<Self, DeepLinkError> {
        let url = Url::parse(uri).map_err(|err| DeepLinkError::InvalidUri {
            uri: uri.to_owned(),
            reason: err.to_string(),
        })?;
        let action = last_segment(&url)
            .or_else(|| url.host_str().filter(|host| !host.is_empty()))
            .ok_or_else(|| DeepLinkError::MissingAction(uri.to_owned()))?
            .to_owned();
        let params = url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        Ok(Self { action, params })
    }

    /// Routing action carried by the callback.
    #[must_use]
    pub fn action(&self) -> &str { &self.action }

    /// Look up a query parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> { self.params.get(name).map(String::as_str) }

    /// Provider error code, if the wallet reported a failure.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> { self.param("errorCode") }

    /// Provider error message accompanying [`Self::error_code`].
    #[must_use]
    pub fn error_message(&self) -> Option<&str> { self.param("errorMessage") }

    /// Encoded response payload.
    #[must_use]
    pub fn data(&self) -> Option<&str> { self.param("data") }

    /// Nonce used to seal [`Self::data`].
    #[must_use]
    pub fn nonce(&self) -> Option<&str> { self.param("nonce") }
}

fn last_segment(url: &Url) -> Option<&str> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()
}
