//! # Manifest State Machine
//!
//! ```text
//! Draft ──issue──▶ Numbered ──transmit──▶ TransmissionPending
//!                                              │        │
//!                                         authorized  rejected
//!                                              ▼        ▼
//!                                         Authorized  Rejected ──edit/transmit──▶ (loop)
//!                                          │      │
//!                                       cancel  close
//!                                          ▼      ▼
//!                                      Cancelled  Closed
//! ```
//!
//! Rejected manifests keep their allocated number and access key; they
//! are edited in place and retransmitted under the same identity. Every
//! operation checks [`validate_transition`] before doing anything else,
//! so an out-of-order request fails fast without touching the agent.

use serde::{Deserialize, Serialize};

use crate::LifecycleError;

/// Lifecycle states of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManifestStatus {
    /// Editable, not yet numbered.
    Draft,
    /// Number and access key allocated, not yet transmitted.
    Numbered,
    /// At least one transmission attempt is in flight or unresolved.
    TransmissionPending,
    /// The authority recorded the manifest and returned a protocol.
    Authorized,
    /// The authority refused the manifest. Correctable.
    Rejected,
    /// Terminal: cancelled by event after authorization.
    Cancelled,
    /// Terminal: journey completed, closed by event.
    Closed,
}

impl ManifestStatus {
    /// Terminal states admit no further mutating operation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Closed)
    }
}

impl std::fmt::Display for ManifestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "Draft"),
            Self::Numbered => write!(f, "Numbered"),
            Self::TransmissionPending => write!(f, "TransmissionPending"),
            Self::Authorized => write!(f, "Authorized"),
            Self::Rejected => write!(f, "Rejected"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// The lifecycle operations a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Edit the manifest body.
    Edit,
    /// Allocate a number and compose the access key.
    Issue,
    /// Transmit the issuance payload to the authority.
    Transmit,
    /// Cancel an authorized manifest.
    Cancel,
    /// Close an authorized manifest at journey end.
    Close,
    /// Add a conductor to an authorized manifest.
    Amend,
    /// Side-effect-free status query.
    Query,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Edit => write!(f, "Edit"),
            Self::Issue => write!(f, "Issue"),
            Self::Transmit => write!(f, "Transmit"),
            Self::Cancel => write!(f, "Cancel"),
            Self::Close => write!(f, "Close"),
            Self::Amend => write!(f, "Amend"),
            Self::Query => write!(f, "Query"),
        }
    }
}

/// Check that `operation` is legal from `status`.
pub fn validate_transition(
    status: ManifestStatus,
    operation: OperationKind,
) -> Result<(), LifecycleError> {
    use ManifestStatus as S;
    use OperationKind as O;

    let allowed = match (status, operation) {
        (S::Draft, O::Edit | O::Issue) => true,
        (S::Numbered, O::Transmit) => true,
        // Retransmission from TransmissionPending runs the
        // query-before-resend protocol first.
        (S::TransmissionPending, O::Transmit) => true,
        (S::Authorized, O::Cancel | O::Close | O::Amend) => true,
        // Rejected keeps its number; correct and retransmit in place.
        (S::Rejected, O::Edit | O::Transmit) => true,
        // Queries are legal from any state that has an access key; the
        // service enforces the key's presence separately.
        (_, O::Query) => true,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(LifecycleError::InvalidStateTransition { status, operation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        assert!(validate_transition(ManifestStatus::Draft, OperationKind::Issue).is_ok());
        assert!(validate_transition(ManifestStatus::Numbered, OperationKind::Transmit).is_ok());
        assert!(validate_transition(ManifestStatus::Authorized, OperationKind::Cancel).is_ok());
        assert!(validate_transition(ManifestStatus::Authorized, OperationKind::Close).is_ok());
        assert!(validate_transition(ManifestStatus::Authorized, OperationKind::Amend).is_ok());
    }

    #[test]
    fn rejected_is_correctable_in_place() {
        assert!(validate_transition(ManifestStatus::Rejected, OperationKind::Edit).is_ok());
        assert!(validate_transition(ManifestStatus::Rejected, OperationKind::Transmit).is_ok());
        // But never re-numbered.
        assert!(validate_transition(ManifestStatus::Rejected, OperationKind::Issue).is_err());
    }

    #[test]
    fn cancel_requires_authorization() {
        for status in [
            ManifestStatus::Draft,
            ManifestStatus::Numbered,
            ManifestStatus::TransmissionPending,
            ManifestStatus::Rejected,
            ManifestStatus::Cancelled,
            ManifestStatus::Closed,
        ] {
            let err = validate_transition(status, OperationKind::Cancel).unwrap_err();
            assert!(matches!(
                err,
                LifecycleError::InvalidStateTransition {
                    operation: OperationKind::Cancel,
                    ..
                }
            ));
        }
    }

    #[test]
    fn terminal_states_accept_only_queries() {
        for status in [ManifestStatus::Cancelled, ManifestStatus::Closed] {
            assert!(status.is_terminal());
            for op in [
                OperationKind::Edit,
                OperationKind::Issue,
                OperationKind::Transmit,
                OperationKind::Cancel,
                OperationKind::Close,
                OperationKind::Amend,
            ] {
                assert!(validate_transition(status, op).is_err());
            }
            assert!(validate_transition(status, OperationKind::Query).is_ok());
        }
    }

    #[test]
    fn draft_cannot_skip_numbering() {
        assert!(validate_transition(ManifestStatus::Draft, OperationKind::Transmit).is_err());
    }

    #[test]
    fn double_issue_is_illegal() {
        assert!(validate_transition(ManifestStatus::Numbered, OperationKind::Issue).is_err());
    }
}
