//! EBICS H004 return codes.
//!
//! See EBICS Specification 2.5, Annex 1 "Return codes". Technical codes travel in the
//! `header/mutable/ReturnCode` element, bank codes in `body/ReturnCode`.

use std::fmt;

use crate::error::{EbicsError, Result};

macro_rules! return_codes {
    ($($variant:ident => ($code:literal, $name:literal),)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EbicsReturnCode {
            $($variant,)*
        }

        impl EbicsReturnCode {
            /// The six digit wire representation, e.g. `"000000"`.
            pub fn code(&self) -> &'static str {
                match self {
                    $(EbicsReturnCode::$variant => $code,)*
                }
            }

            /// Symbolic name as used in report texts, e.g. `EBICS_OK`.
            pub fn name(&self) -> &'static str {
                match self {
                    $(EbicsReturnCode::$variant => $name,)*
                }
            }

            /// Unknown codes are a hard parse failure.
            pub fn lookup(code: &str) -> Result<Self> {
                match code.trim() {
                    $($code => Ok(EbicsReturnCode::$variant),)*
                    other => Err(EbicsError::UnknownReturnCode(other.to_string())),
                }
            }
        }
    };
}

return_codes! {
    Ok => ("000000", "EBICS_OK"),
    DownloadPostprocessDone => ("011000", "EBICS_DOWNLOAD_POSTPROCESS_DONE"),
    DownloadPostprocessSkipped => ("011001", "EBICS_DOWNLOAD_POSTPROCESS_SKIPPED"),
    TxSegmentNumberUnderrun => ("011101", "EBICS_TX_SEGMENT_NUMBER_UNDERRUN"),
    OrderParamsIgnored => ("031001", "EBICS_ORDER_PARAMS_IGNORED"),
    AuthenticationFailed => ("061001", "EBICS_AUTHENTICATION_FAILED"),
    InvalidRequest => ("061002", "EBICS_INVALID_REQUEST"),
    InternalError => ("061099", "EBICS_INTERNAL_ERROR"),
    TxRecoverySync => ("061101", "EBICS_TX_RECOVERY_SYNC"),
    AuthorisationOrderTypeFailed => ("090003", "EBICS_AUTHORISATION_ORDER_TYPE_FAILED"),
    InvalidOrderDataFormat => ("090004", "EBICS_INVALID_ORDER_DATA_FORMAT"),
    NoDownloadDataAvailable => ("090005", "EBICS_NO_DOWNLOAD_DATA_AVAILABLE"),
    InvalidUserOrUserState => ("091002", "EBICS_INVALID_USER_OR_USER_STATE"),
    UserUnknown => ("091003", "EBICS_USER_UNKNOWN"),
    InvalidUserState => ("091004", "EBICS_INVALID_USER_STATE"),
    InvalidOrderType => ("091005", "EBICS_INVALID_ORDER_TYPE"),
    UnsupportedOrderType => ("091006", "EBICS_UNSUPPORTED_ORDER_TYPE"),
    BankPubkeyUpdateRequired => ("091008", "EBICS_BANK_PUBKEY_UPDATE_REQUIRED"),
    SegmentSizeExceeded => ("091009", "EBICS_SEGMENT_SIZE_EXCEEDED"),
    InvalidXml => ("091010", "EBICS_INVALID_XML"),
    InvalidHostId => ("091011", "EBICS_INVALID_HOST_ID"),
    TxUnknownTxid => ("091101", "EBICS_TX_UNKNOWN_TXID"),
    TxAbort => ("091102", "EBICS_TX_ABORT"),
    TxMessageReplay => ("091103", "EBICS_TX_MESSAGE_REPLAY"),
    TxSegmentNumberExceeded => ("091104", "EBICS_TX_SEGMENT_NUMBER_EXCEEDED"),
    InvalidOrderParams => ("091112", "EBICS_INVALID_ORDER_PARAMS"),
    InvalidRequestContent => ("091113", "EBICS_INVALID_REQUEST_CONTENT"),
    ProcessingError => ("091116", "EBICS_PROCESSING_ERROR"),
    MaxOrderDataSizeExceeded => ("091117", "EBICS_MAX_ORDER_DATA_SIZE_EXCEEDED"),
    MaxSegmentsExceeded => ("091118", "EBICS_MAX_SEGMENTS_EXCEEDED"),
    MaxTransactionsExceeded => ("091119", "EBICS_MAX_TRANSACTIONS_EXCEEDED"),
    PartnerIdMismatch => ("091120", "EBICS_PARTNER_ID_MISMATCH"),
    IncompatibleOrderAttribute => ("091121", "EBICS_INCOMPATIBLE_ORDER_ATTRIBUTE"),
    SignatureVerificationFailed => ("091301", "EBICS_SIGNATURE_VERIFICATION_FAILED"),
    AccountAuthorisationFailed => ("091302", "EBICS_ACCOUNT_AUTHORISATION_FAILED"),
    AmountCheckFailed => ("091303", "EBICS_AMOUNT_CHECK_FAILED"),
    SignerUnknown => ("091304", "EBICS_SIGNER_UNKNOWN"),
    InvalidSignerState => ("091305", "EBICS_INVALID_SIGNER_STATE"),
    DuplicateSignature => ("091306", "EBICS_DUPLICATE_SIGNATURE"),
}

impl EbicsReturnCode {
    pub fn is_ok(&self) -> bool {
        *self == EbicsReturnCode::Ok
    }

    /// Default report text, e.g. `[EBICS_OK] OK`.
    pub fn report_text(&self) -> String {
        let text = match self {
            EbicsReturnCode::Ok => "OK",
            EbicsReturnCode::DownloadPostprocessDone => "Received positive receipt",
            EbicsReturnCode::DownloadPostprocessSkipped => "Received negative receipt",
            EbicsReturnCode::NoDownloadDataAvailable => "No data available",
            _ => "Request failed",
        };
        self.report_text_with(text)
    }

    pub fn report_text_with(&self, text: &str) -> String {
        format!("[{}] {}", self.name(), text)
    }
}

impl fmt::Display for EbicsReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
