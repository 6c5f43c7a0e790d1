//! # Manifest State Store
//!
//! Records, their transmission attempt history, and the versioned commit
//! path every status change goes through.
//!
//! Commits are optimistic: the caller names the version it read, and a
//! mismatch fails with `ConcurrentModification` instead of silently
//! interleaving two writers. Attempts are append-only — one is recorded
//! *before* the agent call it describes, with an `Unknown` outcome, and
//! resolved exactly once afterwards. A crash between the two leaves an
//! `Unknown` attempt behind, which is precisely the signal that a status
//! query must precede any resend.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mdfe_core::{AccessKey, DocNumber};
use mdfe_payload::Manifest;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{ManifestStatus, OperationKind};
use crate::LifecycleError;

/// Resolution of a single transmission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    /// Recorded before the agent call; not yet resolved. The authority
    /// may or may not have processed the command.
    Unknown,
    /// The authority recorded the operation.
    Success,
    /// The authority refused the operation.
    Rejected,
    /// Transport failure; the command may not have arrived.
    Transient,
    /// The reply could not be understood.
    ProtocolError,
}

/// One transmission attempt, with the exact payload snapshot that was
/// (or was about to be) sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionAttempt {
    pub attempt_id: Uuid,
    pub operation: OperationKind,
    /// Rendered payload, verbatim as handed to the agent.
    pub payload: String,
    /// Raw agent reply, once one arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_reply: Option<String>,
    pub outcome: AttemptOutcome,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TransmissionAttempt {
    /// A fresh, unresolved attempt. Committed to the store before the
    /// agent call it describes.
    pub fn begin(operation: OperationKind, payload: String) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            operation,
            payload,
            raw_reply: None,
            outcome: AttemptOutcome::Unknown,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

/// Resolves a previously appended attempt. Rejected by the store if the
/// attempt is unknown or already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptResolution {
    pub attempt_id: Uuid,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_reply: Option<String>,
}

/// An authority rejection, stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Authority status code, when one was returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Authority message, unedited.
    pub reason: String,
}

/// A manifest under lifecycle management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub id: Uuid,
    pub manifest: Manifest,
    pub status: ManifestStatus,
    /// Authorization protocol, set when the authority records the
    /// issuance. Immutable afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transmitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Last rejection, kept until the manifest is corrected and
    /// retransmitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
    /// Append-only transmission history, oldest first.
    pub attempts: Vec<TransmissionAttempt>,
    /// Optimistic concurrency token, bumped by every commit.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManifestRecord {
    /// A fresh draft record. Any pre-set number or access key on the
    /// manifest is discarded — numbering is the allocator's job.
    pub fn new(mut manifest: Manifest) -> Self {
        manifest.number = None;
        manifest.access_key = None;
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            manifest,
            status: ManifestStatus::Draft,
            protocol: None,
            transmitted_at: None,
            authorized_at: None,
            cancelled_at: None,
            closed_at: None,
            rejection: None,
            attempts: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The most recent attempt, if any.
    pub fn last_attempt(&self) -> Option<&TransmissionAttempt> {
        self.attempts.last()
    }
}

/// One atomic state change. Fields left `None` are untouched, so a
/// commit can pair a status change with the attempt resolution that
/// caused it.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub status: Option<ManifestStatus>,
    /// Replace the manifest body (edits and amendments). Identity fields
    /// must match the stored record once numbered.
    pub manifest: Option<Manifest>,
    pub number: Option<DocNumber>,
    pub access_key: Option<AccessKey>,
    pub protocol: Option<String>,
    pub transmitted_at: Option<DateTime<Utc>>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub rejection: Option<Rejection>,
    pub clear_rejection: bool,
    pub append_attempt: Option<TransmissionAttempt>,
    pub resolve_attempt: Option<AttemptResolution>,
}

/// Persistence seam for manifest records.
///
/// `commit` is the only write path after insertion; it takes the version
/// the caller read and fails on a mismatch, which serializes concurrent
/// operations on one manifest without locks held across agent calls.
pub trait ManifestStore: Send + Sync {
    fn insert(&self, record: ManifestRecord) -> Result<(), LifecycleError>;

    fn fetch(&self, id: Uuid) -> Result<ManifestRecord, LifecycleError>;

    fn commit(
        &self,
        id: Uuid,
        expected_version: u64,
        update: StateUpdate,
    ) -> Result<ManifestRecord, LifecycleError>;
}

/// In-process store backed by a concurrent map. The map entry guard
/// makes each commit atomic with respect to other commits on the same
/// record.
#[derive(Debug, Default)]
pub struct InMemoryManifestStore {
    records: DashMap<Uuid, ManifestRecord>,
}

impl InMemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ManifestStore for InMemoryManifestStore {
    fn insert(&self, record: ManifestRecord) -> Result<(), LifecycleError> {
        let id = record.id;
        match self.records.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                Err(LifecycleError::ConcurrentModification {
                    id,
                    expected: 0,
                    found: existing.get().version,
                })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    fn fetch(&self, id: Uuid) -> Result<ManifestRecord, LifecycleError> {
        self.records
            .get(&id)
            .map(|r| r.clone())
            .ok_or(LifecycleError::NotFound { id })
    }

    fn commit(
        &self,
        id: Uuid,
        expected_version: u64,
        update: StateUpdate,
    ) -> Result<ManifestRecord, LifecycleError> {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or(LifecycleError::NotFound { id })?;
        let record = entry.value_mut();

        if record.version != expected_version {
            return Err(LifecycleError::ConcurrentModification {
                id,
                expected: expected_version,
                found: record.version,
            });
        }

        apply_update(record, update)?;
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

/// Apply an update to a record, enforcing the immutability rules. Shared
/// logic so alternative store backends behave identically.
pub fn apply_update(record: &mut ManifestRecord, update: StateUpdate) -> Result<(), LifecycleError> {
    let frozen = matches!(
        record.status,
        ManifestStatus::Authorized | ManifestStatus::Cancelled | ManifestStatus::Closed
    );

    if frozen && (update.number.is_some() || update.access_key.is_some()) {
        return Err(LifecycleError::InvalidStateTransition {
            status: record.status,
            operation: OperationKind::Issue,
        });
    }

    if let Some(manifest) = &update.manifest {
        if record.status.is_terminal() {
            return Err(LifecycleError::InvalidStateTransition {
                status: record.status,
                operation: OperationKind::Edit,
            });
        }
        // Once numbered, identity never changes under an edit.
        if record.manifest.number.is_some() {
            let identity_changed = manifest.number != record.manifest.number
                || manifest.access_key != record.manifest.access_key
                || manifest.issuer.cnpj != record.manifest.issuer.cnpj
                || manifest.series != record.manifest.series;
            if identity_changed {
                return Err(LifecycleError::InvalidStateTransition {
                    status: record.status,
                    operation: OperationKind::Edit,
                });
            }
        }
    }

    if let Some(manifest) = update.manifest {
        record.manifest = manifest;
    }
    if let Some(number) = update.number {
        record.manifest.number = Some(number);
    }
    if let Some(key) = update.access_key {
        record.manifest.access_key = Some(key);
    }
    if let Some(protocol) = update.protocol {
        record.protocol = Some(protocol);
    }
    if let Some(t) = update.transmitted_at {
        record.transmitted_at = Some(t);
    }
    if let Some(t) = update.authorized_at {
        record.authorized_at = Some(t);
    }
    if let Some(t) = update.cancelled_at {
        record.cancelled_at = Some(t);
    }
    if let Some(t) = update.closed_at {
        record.closed_at = Some(t);
    }
    if update.clear_rejection {
        record.rejection = None;
    }
    if let Some(rejection) = update.rejection {
        record.rejection = Some(rejection);
    }
    if let Some(attempt) = update.append_attempt {
        record.attempts.push(attempt);
    }
    if let Some(resolution) = update.resolve_attempt {
        let attempt = record
            .attempts
            .iter_mut()
            .find(|a| a.attempt_id == resolution.attempt_id)
            .ok_or(LifecycleError::UnknownAttempt {
                attempt_id: resolution.attempt_id,
            })?;
        if attempt.outcome != AttemptOutcome::Unknown {
            return Err(LifecycleError::AttemptAlreadyResolved {
                attempt_id: resolution.attempt_id,
            });
        }
        attempt.outcome = resolution.outcome;
        attempt.raw_reply = resolution.raw_reply;
        attempt.resolved_at = Some(Utc::now());
    }
    if let Some(status) = update.status {
        record.status = status;
    }

    Ok(())
}
