//! JSON-RPC envelopes for relay-connected EVM wallets.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::WalletError;

/// Wallet error code for a request rejected by the user (EIP-1193).
pub const USER_REJECTED: i64 = 4001;
/// Relay error code for a request rejected by the user.
pub const RELAY_USER_REJECTED: i64 = 5000;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Request identifier echoed in the response.
    pub id: u64,
    /// Protocol version, always `2.0`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Positional parameters.
    pub params: Value,
}

impl JsonRpcRequest {
    fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            id,
            jsonrpc: "2.0".to_owned(),
            method: method.to_owned(),
            params,
        }
    }

    /// `personal_sign` with the message hex-encoded.
    ///
    /// # Examples
    ///
    /// ```
    /// use wallet_bridge::codec::jsonrpc::JsonRpcRequest;
    ///
    /// let request = JsonRpcRequest::personal_sign(7, "hi", "0xabc");
    /// assert_eq!(request.params, serde_json::json!(["0x6869", "0xabc"]));
    /// ```
    #[must_use]
    pub fn personal_sign(id: u64, message: &str, address: &str) -> Self {
        let encoded = format!("0x{}", hex::encode(message.as_bytes()));
        Self::new(id, "personal_sign", json!([encoded, address]))
    }

    /// `eth_signTypedData_v4` with the typed data embedded as a string.
    ///
    /// The typed data is validated as JSON and then carried as text, so
    /// its quotes are escaped when the request is rendered.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidRequest`] when `typed_data` is not JSON.
    pub fn sign_typed_data(id: u64, address: &str, typed_data: &str) -> Result<Self, WalletError> {
        serde_json::from_str::<Value>(typed_data)
            .map_err(|err| WalletError::InvalidRequest(format!("typed data is not json: {err}")))?;
        Ok(Self::new(
            id,
            "eth_signTypedData_v4",
            json!([address, typed_data]),
        ))
    }

    /// `eth_signTransaction` for a transaction object.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidRequest`] if the transaction cannot be
    /// serialised.
    pub fn sign_transaction<T: Serialize>(id: u64, transaction: &T) -> Result<Self, WalletError> {
        Ok(Self::new(
            id,
            "eth_signTransaction",
            json!([transaction_value(transaction)?]),
        ))
    }

    /// `eth_sendTransaction` for a transaction object.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidRequest`] if the transaction cannot be
    /// serialised.
    pub fn send_transaction<T: Serialize>(id: u64, transaction: &T) -> Result<Self, WalletError> {
        Ok(Self::new(
            id,
            "eth_sendTransaction",
            json!([transaction_value(transaction)?]),
        ))
    }

    /// Render the positional parameters as JSON text.
    #[must_use]
    pub fn render_params(&self) -> String { self.params.to_string() }
}

fn transaction_value<T: Serialize>(transaction: &T) -> Result<Value, WalletError> {
    serde_json::to_value(transaction)
        .map_err(|err| WalletError::InvalidRequest(format!("transaction encoding: {err}")))
}

/// Error object returned by a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

impl From<JsonRpcError> for WalletError {
    fn from(value: JsonRpcError) -> Self {
        match value.code {
            USER_REJECTED | RELAY_USER_REJECTED => Self::RefusedByWallet {
                code: value.code,
                message: value.message,
            },
            _ => Self::UnexpectedResponse(format!(
                "wallet error {}: {}",
                value.code, value.message
            )),
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Identifier of the request being answered.
    pub id: u64,
    /// Successful result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Collapse the response into the textual result most wallet calls
    /// return (a signature or transaction hash).
    ///
    /// # Errors
    ///
    /// Returns the mapped wallet error, or
    /// [`WalletError::UnexpectedResponse`] when the result is missing or not
    /// a string.
    pub fn into_text(self) -> Result<String, WalletError> {
        if let Some(error) = self.error {
            return Err(error.into());
        }
        match self.result {
            Some(Value::String(text)) => Ok(text),
            Some(other) => Err(WalletError::unexpected(format!(
                "expected string result, got {other}"
            ))),
            None => Err(WalletError::unexpected("response carries no result")),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn typed_data_quotes_are_escaped_in_params() {
        let typed = r#"{"types":{"EIP712Domain":[]},"primaryType":"Mail"}"#;

        let request = JsonRpcRequest::sign_typed_data(1, "0xabc", typed).expect("request");

        assert_eq!(request.method, "eth_signTypedData_v4");
        assert!(request.render_params().contains(r#"\"primaryType\":\"Mail\""#));
        assert_eq!(request.params.get(1).and_then(Value::as_str), Some(typed));
    }

    #[rstest]
    fn rejects_typed_data_that_is_not_json() {
        let err = JsonRpcRequest::sign_typed_data(1, "0xabc", "{oops").expect_err("invalid");

        assert!(matches!(err, WalletError::InvalidRequest(_)));
    }

    #[rstest]
    fn transactions_pass_through_unmodified() {
        let tx = json!({"from": "0xabc", "to": "0xdef", "value": "0x1"});

        let request = JsonRpcRequest::send_transaction(9, &tx).expect("request");

        assert_eq!(request.params, json!([tx]));
        assert_eq!(request.id, 9);
    }

    #[rstest]
    #[case(USER_REJECTED)]
    #[case(RELAY_USER_REJECTED)]
    fn rejection_codes_map_to_refusal(#[case] code: i64) {
        let response = JsonRpcResponse {
            id: 1,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: "User rejected".to_owned(),
            }),
        };

        let err = response.into_text().expect_err("refused");

        assert!(matches!(err, WalletError::RefusedByWallet { .. }));
    }

    #[rstest]
    fn non_string_results_are_unexpected() {
        let response = JsonRpcResponse {
            id: 1,
            result: Some(json!({"r": 1})),
            error: None,
        };

        assert!(matches!(
            response.into_text(),
            Err(WalletError::UnexpectedResponse(_))
        ));
    }
}
