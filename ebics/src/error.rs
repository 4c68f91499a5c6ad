use thiserror::Error;

use crate::return_code::EbicsReturnCode;

/// Everything that can go wrong inside the protocol engine.
///
/// A bank declining an order is *not* an error, see
/// [`crate::client::DownloadResult`] and [`crate::client::UploadResult`].
#[derive(Debug, Error)]
pub enum EbicsError {
    #[error("key generation failed: {0}")]
    KeyGen(String),

    #[error("malformed key: {0}")]
    KeyFormat(String),

    /// Decrypt failures and unknown public key digests.
    #[error("cryptographic failure: {0}")]
    Crypto(String),

    #[error("order data codec: {0}")]
    Codec(String),

    #[error("invalid XML: {0}")]
    InvalidXml(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid subscriber state: {0}")]
    InvalidSubscriberState(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("unknown EBICS return code '{0}'")]
    UnknownReturnCode(String),

    #[error("order ID counter overflow at {0}")]
    OrderIdOverflow(u32),

    #[error("transport: {0}")]
    Transport(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("configuration: {0}")]
    Config(String),

    /// Carries a return code chosen by the server logic itself.
    #[error("{code}: {message}")]
    Rejected {
        code: EbicsReturnCode,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, EbicsError>;

impl EbicsError {
    pub fn rejected(code: EbicsReturnCode, message: impl Into<String>) -> Self {
        EbicsError::Rejected {
            code,
            message: message.into(),
        }
    }

    /// The technical return code the sandbox answers with when a request
    /// fails with this error.
    pub fn return_code(&self) -> EbicsReturnCode {
        match self {
            EbicsError::InvalidXml(_) => EbicsReturnCode::InvalidXml,
            EbicsError::InvalidSubscriberState(_) => EbicsReturnCode::InvalidUserOrUserState,
            EbicsError::InvalidRequest(_) | EbicsError::ProtocolViolation(_) => {
                EbicsReturnCode::InvalidRequest
            }
            EbicsError::KeyFormat(_) | EbicsError::Codec(_) => {
                EbicsReturnCode::InvalidRequestContent
            }
            EbicsError::Crypto(_) => EbicsReturnCode::AuthenticationFailed,
            EbicsError::NotImplemented(_) => EbicsReturnCode::UnsupportedOrderType,
            EbicsError::OrderIdOverflow(_) => EbicsReturnCode::ProcessingError,
            EbicsError::Rejected { code, .. } => *code,
            EbicsError::KeyGen(_)
            | EbicsError::UnknownReturnCode(_)
            | EbicsError::Transport(_)
            | EbicsError::Storage(_)
            | EbicsError::Config(_) => EbicsReturnCode::InternalError,
        }
    }
}

impl From<base64::DecodeError> for EbicsError {
    fn from(e: base64::DecodeError) -> Self {
        EbicsError::Codec(format!("base64: {e}"))
    }
}

impl From<rsa::Error> for EbicsError {
    fn from(e: rsa::Error) -> Self {
        EbicsError::Crypto(e.to_string())
    }
}
