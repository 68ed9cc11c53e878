//! Error types for daemon RPC communication.
//!
//! Two families live here. [`TransportError`] describes why a request never
//! produced usable results (the daemon is down, or it answered with garbage).
//! [`RpcError`] is a structured error the daemon itself returned for one call,
//! carrying the numeric code that workflows branch on.

use std::fmt;

use thiserror::Error;

/// Errors raised by a [`Transport`](super::Transport) while sending a request.
///
/// The transport never retries; the caller decides what a failure means.
///
/// # Error Categories
///
/// - **Reachability**: [`Unreachable`](TransportError::Unreachable) covers
///   refused connections, timeouts and any failure before a body was read.
///   This is the only variant that flips connection health.
/// - **Protocol**: [`MalformedResponse`](TransportError::MalformedResponse)
///   means the daemon answered, but the body was not JSON or did not line up
///   with the calls that were sent.
/// - **Request**: [`Encode`](TransportError::Encode) means the request could
///   not be serialized, so nothing was sent.
/// - **Setup**: [`Client`](TransportError::Client) is returned when the HTTP
///   client cannot be built at all.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The daemon could not be reached.
    ///
    /// Typical causes:
    /// - Connection refused (daemon process not running)
    /// - Request timed out
    /// - Connection reset before the body was read
    #[error("Daemon unreachable: {0}")]
    Unreachable(String),

    /// The daemon answered but the body could not be matched to the request.
    ///
    /// Either the body is not valid JSON, or a batch response has a different
    /// number of entries than the batch request.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The request could not be serialized; nothing was sent.
    #[error("Could not encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl TransportError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, TransportError::Unreachable(_))
    }
}

/// A structured error returned by the daemon for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> RpcErrorCode {
        RpcErrorCode::from(self.code)
    }
}

/// Daemon error codes the synchronisation core gives meaning to.
///
/// The same code can mean different things depending on the method that
/// produced it, so the variants are named after the daemon's own constants
/// rather than after any single workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    /// `-4`: generic wallet error (already imported, insufficient funds).
    WalletError,
    /// `-5`: invalid address or key.
    InvalidAddressOrKey,
    /// `-14`: the supplied passphrase is wrong.
    PassphraseIncorrect,
    /// `-15`: the command requires an encrypted wallet.
    WrongEncryptionState,
    /// `-17`: the wallet is already unlocked.
    AlreadyUnlocked,
    /// `-32602`: invalid params. `walletpassphrase` without params answers
    /// with this when the wallet is locked and encrypted.
    InvalidParams,
    /// Any code without a defined meaning.
    Other(i64),
}

impl From<i64> for RpcErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -4 => RpcErrorCode::WalletError,
            -5 => RpcErrorCode::InvalidAddressOrKey,
            -14 => RpcErrorCode::PassphraseIncorrect,
            -15 => RpcErrorCode::WrongEncryptionState,
            -17 => RpcErrorCode::AlreadyUnlocked,
            -32602 => RpcErrorCode::InvalidParams,
            other => RpcErrorCode::Other(other),
        }
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcErrorCode::WalletError => write!(f, "Wallet Error"),
            RpcErrorCode::InvalidAddressOrKey => write!(f, "Invalid Address Or Key"),
            RpcErrorCode::PassphraseIncorrect => write!(f, "Passphrase Incorrect"),
            RpcErrorCode::WrongEncryptionState => write!(f, "Wrong Encryption State"),
            RpcErrorCode::AlreadyUnlocked => write!(f, "Already Unlocked"),
            RpcErrorCode::InvalidParams => write!(f, "Invalid Params"),
            RpcErrorCode::Other(code) => write!(f, "Code {}", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_named_variants() {
        assert_eq!(RpcErrorCode::from(-4), RpcErrorCode::WalletError);
        assert_eq!(RpcErrorCode::from(-5), RpcErrorCode::InvalidAddressOrKey);
        assert_eq!(RpcErrorCode::from(-14), RpcErrorCode::PassphraseIncorrect);
        assert_eq!(RpcErrorCode::from(-15), RpcErrorCode::WrongEncryptionState);
        assert_eq!(RpcErrorCode::from(-17), RpcErrorCode::AlreadyUnlocked);
        assert_eq!(RpcErrorCode::from(-32602), RpcErrorCode::InvalidParams);
        assert_eq!(RpcErrorCode::from(-1), RpcErrorCode::Other(-1));
    }

    #[test]
    fn rpc_error_display_includes_code() {
        let err = RpcError::new(-14, "Error: The wallet passphrase entered was incorrect.");
        assert_eq!(
            err.to_string(),
            "RPC error -14: Error: The wallet passphrase entered was incorrect."
        );
        assert_eq!(err.kind(), RpcErrorCode::PassphraseIncorrect);
    }
}
