//! # mdfe-lifecycle — Lifecycle & Transmission Orchestration
//!
//! The orchestration core for electronic freight manifests: sequential
//! numbering under uniqueness constraints, the authorization state
//! machine, payload snapshots per transmission attempt, and careful
//! retry semantics against an unreliable external transmission agent.
//!
//! - **State machine** ([`status`]): Draft → Numbered →
//!   TransmissionPending → Authorized → {Cancelled, Closed}, with
//!   Rejected as the correctable detour. Every operation validates its
//!   transition before doing anything else.
//!
//! - **Allocation** ([`allocator`]): the next-number source per
//!   (issuer, series) scope. Unique under concurrency; gaps are
//!   acceptable, duplicates never are.
//!
//! - **Store** ([`store`]): versioned records with append-only attempt
//!   history. Optimistic commits serialize concurrent writers without
//!   holding locks across agent calls.
//!
//! - **Service** ([`service`]): the facade tying the pieces together,
//!   including the query-before-resend protocol for mutating commands
//!   whose outcome is unknown.

use mdfe_agent::AgentError;
use mdfe_core::ValidationError;
use mdfe_payload::PayloadError;
use thiserror::Error;
use uuid::Uuid;

pub mod allocator;
pub mod service;
pub mod status;
pub mod store;

// Re-export primary types.
pub use allocator::{InMemoryNumberAllocator, NumberAllocator};
pub use service::{CloseRequest, LifecycleService, ServiceConfig};
pub use status::{validate_transition, ManifestStatus, OperationKind};
pub use store::{
    AttemptOutcome, AttemptResolution, InMemoryManifestStore, ManifestRecord, ManifestStore,
    Rejection, StateUpdate, TransmissionAttempt,
};

/// Errors from lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    /// No record with the given id.
    #[error("manifest {id} not found")]
    NotFound { id: Uuid },

    /// The operation is not legal from the record's current status.
    #[error("operation {operation} is not legal from status {status}")]
    InvalidStateTransition {
        status: ManifestStatus,
        operation: OperationKind,
    },

    /// The storage backend cannot currently serve the request. Nothing
    /// was consumed; the whole operation is safe to retry.
    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    /// Another writer committed between the caller's read and its
    /// commit. Reload and retry.
    #[error("manifest {id} modified concurrently: expected version {expected}, found {found}")]
    ConcurrentModification {
        id: Uuid,
        expected: u64,
        found: u64,
    },

    /// An attempt resolution named an attempt the record does not hold.
    #[error("unknown transmission attempt {attempt_id}")]
    UnknownAttempt { attempt_id: Uuid },

    /// An attempt was resolved twice. Attempt resolution is
    /// exactly-once.
    #[error("transmission attempt {attempt_id} is already resolved")]
    AttemptAlreadyResolved { attempt_id: Uuid },

    /// The authority refused the operation. The reason is the
    /// authority's message, verbatim.
    #[error("authority rejected the operation (code {code:?}): {reason}")]
    Rejected { code: Option<u16>, reason: String },

    /// Every attempt in the retry schedule failed transiently.
    #[error("transmission failed after {attempts} attempt(s): {last_error}")]
    TransmissionFailed { attempts: u32, last_error: String },

    /// The integration itself misbehaved: unclassifiable reply, missing
    /// protocol on success, inconsistent record.
    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    /// Payload building failed; the manifest is incomplete.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// The agent call failed.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// A domain value failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Coarse classification for reporting and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The request itself is wrong; fix the input.
    Validation,
    /// The authority said no; fix the document.
    Business,
    /// Infrastructure hiccup; retrying the operation may succeed.
    Transient,
    /// Broken integration or internal inconsistency; investigate.
    System,
}

impl LifecycleError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. }
            | Self::InvalidStateTransition { .. }
            | Self::Payload(_)
            | Self::Validation(_) => ErrorClass::Validation,
            Self::Rejected { .. } => ErrorClass::Business,
            Self::StorageUnavailable { .. }
            | Self::ConcurrentModification { .. }
            | Self::TransmissionFailed { .. } => ErrorClass::Transient,
            Self::UnknownAttempt { .. }
            | Self::AttemptAlreadyResolved { .. }
            | Self::Protocol { .. } => ErrorClass::System,
            Self::Agent(e) => {
                if e.is_transient() {
                    ErrorClass::Transient
                } else {
                    ErrorClass::System
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classes() {
        assert_eq!(
            LifecycleError::NotFound { id: Uuid::new_v4() }.class(),
            ErrorClass::Validation
        );
        assert_eq!(
            LifecycleError::Rejected {
                code: Some(231),
                reason: "duplicada".to_string()
            }
            .class(),
            ErrorClass::Business
        );
        assert_eq!(
            LifecycleError::TransmissionFailed {
                attempts: 3,
                last_error: "timeout".to_string()
            }
            .class(),
            ErrorClass::Transient
        );
        assert_eq!(
            LifecycleError::Agent(AgentError::Timeout { elapsed_ms: 1 }).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            LifecycleError::Agent(AgentError::Protocol {
                reason: "garbage".to_string()
            })
            .class(),
            ErrorClass::System
        );
        assert_eq!(
            LifecycleError::Protocol {
                reason: "no protocol".to_string()
            }
            .class(),
            ErrorClass::System
        );
    }
}
