//! Validation error type for domain primitives.

use thiserror::Error;

/// Errors raised when a domain primitive fails validation at construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// CNPJ is not 14 digits or its check digits do not verify.
    #[error("invalid CNPJ: {reason}")]
    InvalidCnpj {
        /// Description of the validation failure.
        reason: String,
    },

    /// Series is outside the legal 0–999 range.
    #[error("invalid series: {reason}")]
    InvalidSeries {
        /// Description of the validation failure.
        reason: String,
    },

    /// Document number is outside the legal 1–999,999,999 range.
    #[error("invalid document number: {reason}")]
    InvalidNumber {
        /// Description of the validation failure.
        reason: String,
    },

    /// State code is not a known IBGE federative unit code.
    #[error("invalid state code: {reason}")]
    InvalidStateCode {
        /// Description of the validation failure.
        reason: String,
    },

    /// Access key is not 44 digits or its check digit does not verify.
    #[error("invalid access key: {reason}")]
    InvalidAccessKey {
        /// Description of the validation failure.
        reason: String,
    },
}
