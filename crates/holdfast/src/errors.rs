use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A structured error suitable for crossing the messenger boundary as an
/// envelope error string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HoldfastError {
    #[error("vault is locked")]
    VaultLocked,

    #[error("invalid password")]
    InvalidPassword,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("wallet has no recovery phrase")]
    NoRecoveryPhrase,

    #[error("account has no private key")]
    NoPrivateKey,

    #[error("malformed ciphertext")]
    MalformedCiphertext,

    #[error("corrupt plaintext")]
    CorruptPlaintext,

    #[error("invalid recovery phrase")]
    InvalidRecoveryPhrase,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("peer unreachable")]
    Unreachable,

    #[error("request timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    /// A remote-supplied error string that did not carry a known code.
    #[error("{0}")]
    Remote(String),
}

impl HoldfastError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::VaultLocked => "vault_locked",
            Self::InvalidPassword => "invalid_password",
            Self::NotFound(_) => "not_found",
            Self::NoRecoveryPhrase => "no_recovery_phrase",
            Self::NoPrivateKey => "no_private_key",
            Self::MalformedCiphertext => "malformed_ciphertext",
            Self::CorruptPlaintext => "corrupt_plaintext",
            Self::InvalidRecoveryPhrase => "invalid_recovery_phrase",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unreachable => "unreachable",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal_error",
            Self::Remote(_) => "remote",
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_owned(),
            message: self.to_string(),
        }
    }

    /// Reconstruct the taxonomy variant from a wire payload. Unknown codes
    /// surface as [`Self::Remote`] so no failure is silently swallowed.
    pub fn from_payload(p: &ErrorPayload) -> Self {
        fn detail(p: &ErrorPayload, prefix: &str) -> String {
            p.message
                .strip_prefix(prefix)
                .unwrap_or(&p.message)
                .to_owned()
        }

        match p.code.as_str() {
            "vault_locked" => Self::VaultLocked,
            "invalid_password" => Self::InvalidPassword,
            "not_found" => Self::NotFound(detail(p, "not found: ")),
            "no_recovery_phrase" => Self::NoRecoveryPhrase,
            "no_private_key" => Self::NoPrivateKey,
            "malformed_ciphertext" => Self::MalformedCiphertext,
            "corrupt_plaintext" => Self::CorruptPlaintext,
            "invalid_recovery_phrase" => Self::InvalidRecoveryPhrase,
            "invalid_request" => Self::InvalidRequest(detail(p, "invalid request: ")),
            "unreachable" => Self::Unreachable,
            "timeout" => Self::Timeout,
            "cancelled" => Self::Cancelled,
            "internal_error" => Self::Internal(detail(p, "internal error: ")),
            _ => Self::Remote(p.message.clone()),
        }
    }

    pub fn from_wire(s: &str) -> Self {
        match serde_json::from_str::<ErrorPayload>(s) {
            Ok(p) => Self::from_payload(&p),
            Err(_) => Self::Remote(s.to_owned()),
        }
    }
}
