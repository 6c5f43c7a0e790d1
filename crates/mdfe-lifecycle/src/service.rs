//! # Lifecycle Service
//!
//! The orchestration facade: every operation validates the state
//! transition first, builds and persists its payload snapshot, then
//! talks to the agent, and finally commits the outcome through the
//! versioned store.
//!
//! Each operation reads the record once and threads the version token
//! through its commit chain, so two operations racing on one manifest
//! cannot both take effect: whichever commits second fails with
//! `ConcurrentModification` and never reaches the agent.
//!
//! ## Retransmission protocol
//!
//! The agent's transport is unreliable and a timed-out command may
//! still have been processed. Mutating commands are therefore never
//! blindly resent: after any transient failure the service first issues
//! a status query for the access key, adopts the authority's answer if
//! the operation is already on record, and only resends when the query
//! confirms it is not. Attempt records are committed *before* each wire
//! call, so an interrupted process leaves an `Unknown` attempt behind
//! and the next transmit resumes with the same query-first protocol.

use chrono::{NaiveDate, Utc};
use mdfe_agent::{
    parse_reply, with_backoff, AgentError, AgentOperation, CommandGrammar, ParsedReply,
    ReplyOutcome, RetryPolicy, StatusTable, TransmissionAgent,
};
use mdfe_core::access_key::random_code;
use mdfe_core::{AccessKey, AccessKeyParts};
use mdfe_payload::{
    build_amend, build_cancel, build_close, build_issue, AmendParams, CancelParams, CloseParams,
    Driver, Manifest, Municipality, Payload,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::allocator::NumberAllocator;
use crate::status::{validate_transition, ManifestStatus, OperationKind};
use crate::store::{
    AttemptOutcome, AttemptResolution, ManifestRecord, ManifestStore, Rejection, StateUpdate,
    TransmissionAttempt,
};
use crate::LifecycleError;

/// Service configuration: retry schedule, agent vocabulary, and the
/// status classification table. Defaults target the reference agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub retry: RetryPolicy,
    pub grammar: CommandGrammar,
    pub status_table: StatusTable,
    /// Status-query code confirming a cancellation is on record.
    pub cancel_confirm_code: u16,
    /// Status-query code confirming a closing is on record.
    pub close_confirm_code: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            grammar: CommandGrammar::default(),
            status_table: StatusTable::default(),
            cancel_confirm_code: 101,
            close_confirm_code: 132,
        }
    }
}

/// Closing request. Absent fields fall back to today's date and the
/// manifest's final unloading stop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_location: Option<Municipality>,
}

/// Manifest lifecycle orchestration over a store, an allocator, and a
/// transmission agent.
pub struct LifecycleService<S, N, A> {
    store: S,
    allocator: N,
    agent: A,
    config: ServiceConfig,
}

impl<S, N, A> LifecycleService<S, N, A>
where
    S: ManifestStore,
    N: NumberAllocator,
    A: TransmissionAgent,
{
    pub fn new(store: S, allocator: N, agent: A, config: ServiceConfig) -> Self {
        Self {
            store,
            allocator,
            agent,
            config,
        }
    }

    /// Whether the agent endpoint currently accepts connections.
    pub async fn agent_available(&self) -> bool {
        self.agent.probe().await
    }

    /// The current record.
    pub fn fetch(&self, id: Uuid) -> Result<ManifestRecord, LifecycleError> {
        self.store.fetch(id)
    }

    // -- Draft ------------------------------------------------------------

    /// Register a new draft. Any pre-set number or access key is
    /// discarded; numbering happens at issuance.
    pub fn create_draft(&self, manifest: Manifest) -> Result<ManifestRecord, LifecycleError> {
        let record = ManifestRecord::new(manifest);
        tracing::info!(manifest = %record.id, "draft registered");
        self.store.insert(record.clone())?;
        Ok(record)
    }

    /// Replace the manifest body of a draft or rejected record. The
    /// number and access key, once allocated, survive the edit.
    pub fn update_manifest(
        &self,
        id: Uuid,
        mut manifest: Manifest,
    ) -> Result<ManifestRecord, LifecycleError> {
        let record = self.store.fetch(id)?;
        validate_transition(record.status, OperationKind::Edit)?;
        manifest.number = record.manifest.number;
        manifest.access_key = record.manifest.access_key.clone();
        self.store.commit(
            id,
            record.version,
            StateUpdate {
                manifest: Some(manifest),
                ..Default::default()
            },
        )
    }

    // -- Issue ------------------------------------------------------------

    /// Allocate the next number in the manifest's (issuer, series) scope
    /// and compose the access key. No agent traffic; the manifest moves
    /// to `Numbered` and its identity is fixed from here on.
    ///
    /// If the commit after allocation fails, the consumed number is not
    /// reclaimed. Sequence gaps are preferable to a duplicate key.
    pub fn issue(&self, id: Uuid) -> Result<ManifestRecord, LifecycleError> {
        let record = self.store.fetch(id)?;
        validate_transition(record.status, OperationKind::Issue)?;

        let number = self
            .allocator
            .allocate_next(&record.manifest.issuer.cnpj, record.manifest.series)?;
        let access_key = AccessKey::compose(&AccessKeyParts {
            state: record.manifest.origin_state,
            issued: record.manifest.emission.date_naive(),
            issuer: record.manifest.issuer.cnpj.clone(),
            series: record.manifest.series,
            number,
            emission_type: record.manifest.emission_type,
            random: random_code(&mut rand::thread_rng()),
        });
        tracing::info!(
            manifest = %id,
            number = number.value(),
            access_key = access_key.as_str(),
            "manifest numbered"
        );

        self.store.commit(
            id,
            record.version,
            StateUpdate {
                status: Some(ManifestStatus::Numbered),
                number: Some(number),
                access_key: Some(access_key),
                ..Default::default()
            },
        )
    }

    // -- Transmit ---------------------------------------------------------

    /// Transmit the issuance payload. On success the record becomes
    /// `Authorized` with the authority's protocol; on rejection it
    /// becomes `Rejected` with the authority's reason stored verbatim
    /// and the error surfaces to the caller.
    pub async fn transmit(&self, id: Uuid) -> Result<ManifestRecord, LifecycleError> {
        let record = self.store.fetch(id)?;
        validate_transition(record.status, OperationKind::Transmit)?;
        let payload = build_issue(&record.manifest)?;
        let access_key = self.require_access_key(&record, OperationKind::Transmit)?;

        let text = payload.render();
        let command = self
            .config
            .grammar
            .render(AgentOperation::Issue, &[("conteudo", &text)]);

        let attempts = self.config.retry.max_attempts.max(1);
        // An unresolved prior attempt means the authority may already
        // hold this manifest; confirm by query before any resend.
        let mut confirm_first = record.status == ManifestStatus::TransmissionPending;
        let mut version = record.version;
        let mut last_error = String::from("no transmission attempted");

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry.delay_before(attempt)).await;
            }

            if confirm_first {
                match self.query_reply(&access_key).await {
                    Ok(reply) if reply.outcome == ReplyOutcome::Success => {
                        if reply.protocol.is_none() {
                            return Err(LifecycleError::Protocol {
                                reason: "authorization on record without a protocol".to_string(),
                            });
                        }
                        tracing::info!(
                            manifest = %id,
                            protocol = reply.protocol.as_deref(),
                            "prior transmission already recorded by the authority"
                        );
                        return self.commit_authorized(id, version, None, &reply);
                    }
                    Ok(reply) if reply.outcome == ReplyOutcome::Rejected => {
                        // The authority has no record of this key;
                        // resending is safe.
                    }
                    Ok(reply) => {
                        // An unclassifiable query reply confirms nothing.
                        // Retry the query; never resend on its strength.
                        last_error = protocol_reason(&reply);
                        continue;
                    }
                    Err(e) if e.is_transient() => {
                        last_error = e.to_string();
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            confirm_first = true;

            let attempt_rec = TransmissionAttempt::begin(OperationKind::Transmit, text.clone());
            let attempt_id = attempt_rec.attempt_id;
            let pending = self.store.commit(
                id,
                version,
                StateUpdate {
                    status: Some(ManifestStatus::TransmissionPending),
                    transmitted_at: Some(Utc::now()),
                    append_attempt: Some(attempt_rec),
                    ..Default::default()
                },
            )?;
            version = pending.version;

            match self.agent.execute(&command).await {
                Ok(raw) => return self.settle_issue_reply(id, version, attempt_id, &raw),
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        manifest = %id,
                        attempt = attempt + 1,
                        error = %e,
                        "transient transmission failure"
                    );
                    version = self
                        .resolve(id, version, attempt_id, AttemptOutcome::Transient, None)?
                        .version;
                    last_error = e.to_string();
                }
                Err(e) => {
                    self.resolve(id, version, attempt_id, AttemptOutcome::ProtocolError, None)?;
                    return Err(e.into());
                }
            }
        }

        Err(LifecycleError::TransmissionFailed {
            attempts,
            last_error,
        })
    }

    // -- Cancel -----------------------------------------------------------

    /// Cancel an authorized manifest. The justification is validated
    /// locally before any agent traffic; a failed cancellation leaves
    /// the record `Authorized`.
    pub async fn cancel(
        &self,
        id: Uuid,
        justification: &str,
    ) -> Result<ManifestRecord, LifecycleError> {
        let record = self.store.fetch(id)?;
        validate_transition(record.status, OperationKind::Cancel)?;
        let access_key = self.require_access_key(&record, OperationKind::Cancel)?;
        let protocol = self.require_protocol(&record)?;

        let payload = build_cancel(&CancelParams {
            access_key,
            protocol,
            justification: justification.to_string(),
        })?;

        self.run_event(
            &record,
            OperationKind::Cancel,
            AgentOperation::Cancel,
            payload,
            self.config.cancel_confirm_code,
            StateUpdate {
                status: Some(ManifestStatus::Cancelled),
                cancelled_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
    }

    // -- Close ------------------------------------------------------------

    /// Close an authorized manifest at journey end. Date defaults to
    /// today, location to the manifest's final unloading stop.
    pub async fn close(
        &self,
        id: Uuid,
        request: CloseRequest,
    ) -> Result<ManifestRecord, LifecycleError> {
        let record = self.store.fetch(id)?;
        validate_transition(record.status, OperationKind::Close)?;
        let access_key = self.require_access_key(&record, OperationKind::Close)?;
        let protocol = self.require_protocol(&record)?;

        let payload = build_close(
            &record.manifest,
            &CloseParams {
                access_key,
                protocol,
                closing_date: request
                    .closing_date
                    .unwrap_or_else(|| Utc::now().date_naive()),
                closing_location: request.closing_location,
            },
        )?;

        self.run_event(
            &record,
            OperationKind::Close,
            AgentOperation::Close,
            payload,
            self.config.close_confirm_code,
            StateUpdate {
                status: Some(ManifestStatus::Closed),
                closed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
    }

    // -- Amend ------------------------------------------------------------

    /// Add a conductor to an authorized manifest. The only body change
    /// the authority accepts after authorization; the record stays
    /// `Authorized`.
    pub async fn amend_driver(
        &self,
        id: Uuid,
        driver: Driver,
    ) -> Result<ManifestRecord, LifecycleError> {
        let record = self.store.fetch(id)?;
        validate_transition(record.status, OperationKind::Amend)?;
        let access_key = self.require_access_key(&record, OperationKind::Amend)?;
        let protocol = self.require_protocol(&record)?;

        let payload = build_amend(&AmendParams {
            access_key,
            protocol,
            driver: driver.clone(),
        })?;
        let command = self.event_command(AgentOperation::Amend, &payload)?;

        let attempt_rec = TransmissionAttempt::begin(OperationKind::Amend, payload.render());
        let attempt_id = attempt_rec.attempt_id;
        let version = self
            .store
            .commit(
                id,
                record.version,
                StateUpdate {
                    append_attempt: Some(attempt_rec),
                    ..Default::default()
                },
            )?
            .version;

        // No query can confirm whether an amendment event landed, so
        // there is no safe resend. One shot; the caller retries.
        let raw = match self.agent.execute(&command).await {
            Ok(raw) => raw,
            Err(e) => {
                let outcome = if e.is_transient() {
                    AttemptOutcome::Transient
                } else {
                    AttemptOutcome::ProtocolError
                };
                self.resolve(id, version, attempt_id, outcome, None)?;
                return Err(e.into());
            }
        };

        let reply = match parse_reply(&raw, &self.config.status_table) {
            Ok(reply) => reply,
            Err(e) => {
                self.resolve(
                    id,
                    version,
                    attempt_id,
                    AttemptOutcome::ProtocolError,
                    Some(&raw),
                )?;
                return Err(e.into());
            }
        };
        match reply.outcome {
            ReplyOutcome::Success => {
                let mut amended = record.manifest.clone();
                amended.drivers.push(driver);
                self.store.commit(
                    id,
                    version,
                    StateUpdate {
                        manifest: Some(amended),
                        resolve_attempt: Some(AttemptResolution {
                            attempt_id,
                            outcome: AttemptOutcome::Success,
                            raw_reply: Some(raw),
                        }),
                        ..Default::default()
                    },
                )
            }
            ReplyOutcome::Rejected => {
                self.resolve(id, version, attempt_id, AttemptOutcome::Rejected, Some(&raw))?;
                Err(LifecycleError::Rejected {
                    code: reply.status_code,
                    reason: reply.message,
                })
            }
            ReplyOutcome::ProtocolError => {
                self.resolve(
                    id,
                    version,
                    attempt_id,
                    AttemptOutcome::ProtocolError,
                    Some(&raw),
                )?;
                Err(LifecycleError::Protocol {
                    reason: protocol_reason(&reply),
                })
            }
        }
    }

    // -- Query ------------------------------------------------------------

    /// Query the authority for the manifest's status. Read-only: no
    /// state is committed, calling it any number of times changes
    /// nothing. Transport failures are retried with backoff.
    pub async fn query_status(&self, id: Uuid) -> Result<ParsedReply, LifecycleError> {
        let record = self.store.fetch(id)?;
        validate_transition(record.status, OperationKind::Query)?;
        let access_key = self.require_access_key(&record, OperationKind::Query)?;
        let reply = with_backoff(&self.config.retry, |_| self.query_reply(&access_key)).await?;
        Ok(reply)
    }

    // -- Internals --------------------------------------------------------

    fn require_access_key(
        &self,
        record: &ManifestRecord,
        operation: OperationKind,
    ) -> Result<AccessKey, LifecycleError> {
        record
            .manifest
            .access_key
            .clone()
            .ok_or(LifecycleError::InvalidStateTransition {
                status: record.status,
                operation,
            })
    }

    fn require_protocol(&self, record: &ManifestRecord) -> Result<String, LifecycleError> {
        record
            .protocol
            .clone()
            .ok_or_else(|| LifecycleError::Protocol {
                reason: format!("authorized manifest {} has no protocol on record", record.id),
            })
    }

    /// Render an event command from the payload's single section: the
    /// section entries become the command parameters, in order.
    fn event_command(
        &self,
        operation: AgentOperation,
        payload: &Payload,
    ) -> Result<String, LifecycleError> {
        let section = payload
            .sections
            .first()
            .ok_or_else(|| LifecycleError::Protocol {
                reason: "event payload has no section".to_string(),
            })?;
        let params: Vec<(&str, &str)> = section
            .entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        Ok(self.config.grammar.render(operation, &params))
    }

    async fn query_reply(&self, access_key: &AccessKey) -> Result<ParsedReply, AgentError> {
        let command = self.config.grammar.render(
            AgentOperation::StatusQuery,
            &[("chMDFe", access_key.as_str())],
        );
        let raw = self.agent.execute(&command).await?;
        parse_reply(&raw, &self.config.status_table)
    }

    /// Resolve a previously appended attempt in its own commit.
    fn resolve(
        &self,
        id: Uuid,
        version: u64,
        attempt_id: Uuid,
        outcome: AttemptOutcome,
        raw_reply: Option<&str>,
    ) -> Result<ManifestRecord, LifecycleError> {
        self.store.commit(
            id,
            version,
            StateUpdate {
                resolve_attempt: Some(AttemptResolution {
                    attempt_id,
                    outcome,
                    raw_reply: raw_reply.map(str::to_string),
                }),
                ..Default::default()
            },
        )
    }

    /// Commit authorization: status, protocol, and timestamp land in one
    /// commit, together with the attempt resolution when the reply came
    /// from a direct send rather than a confirming query.
    fn commit_authorized(
        &self,
        id: Uuid,
        version: u64,
        resolution: Option<(Uuid, &str)>,
        reply: &ParsedReply,
    ) -> Result<ManifestRecord, LifecycleError> {
        self.store.commit(
            id,
            version,
            StateUpdate {
                status: Some(ManifestStatus::Authorized),
                protocol: reply.protocol.clone(),
                authorized_at: Some(reply.received_at.unwrap_or_else(Utc::now)),
                clear_rejection: true,
                resolve_attempt: resolution.map(|(attempt_id, raw)| AttemptResolution {
                    attempt_id,
                    outcome: AttemptOutcome::Success,
                    raw_reply: Some(raw.to_string()),
                }),
                ..Default::default()
            },
        )
    }

    /// Settle a direct issuance reply against the record.
    fn settle_issue_reply(
        &self,
        id: Uuid,
        version: u64,
        attempt_id: Uuid,
        raw: &str,
    ) -> Result<ManifestRecord, LifecycleError> {
        let reply = match parse_reply(raw, &self.config.status_table) {
            Ok(reply) => reply,
            Err(e) => {
                self.resolve(
                    id,
                    version,
                    attempt_id,
                    AttemptOutcome::ProtocolError,
                    Some(raw),
                )?;
                return Err(e.into());
            }
        };
        match reply.outcome {
            ReplyOutcome::Success => {
                if reply.protocol.is_none() {
                    self.resolve(
                        id,
                        version,
                        attempt_id,
                        AttemptOutcome::ProtocolError,
                        Some(raw),
                    )?;
                    return Err(LifecycleError::Protocol {
                        reason: "authorization reply carried no protocol".to_string(),
                    });
                }
                self.commit_authorized(id, version, Some((attempt_id, raw)), &reply)
            }
            ReplyOutcome::Rejected => {
                self.store.commit(
                    id,
                    version,
                    StateUpdate {
                        status: Some(ManifestStatus::Rejected),
                        rejection: Some(Rejection {
                            code: reply.status_code,
                            reason: reply.message.clone(),
                        }),
                        resolve_attempt: Some(AttemptResolution {
                            attempt_id,
                            outcome: AttemptOutcome::Rejected,
                            raw_reply: Some(raw.to_string()),
                        }),
                        ..Default::default()
                    },
                )?;
                Err(LifecycleError::Rejected {
                    code: reply.status_code,
                    reason: reply.message,
                })
            }
            ReplyOutcome::ProtocolError => {
                self.resolve(
                    id,
                    version,
                    attempt_id,
                    AttemptOutcome::ProtocolError,
                    Some(raw),
                )?;
                Err(LifecycleError::Protocol {
                    reason: protocol_reason(&reply),
                })
            }
        }
    }

    /// Shared send loop for cancellation and closing events. The record
    /// keeps its current status until the authority confirms; transient
    /// failures are confirmed by status query before any resend.
    async fn run_event(
        &self,
        record: &ManifestRecord,
        operation: OperationKind,
        agent_operation: AgentOperation,
        payload: Payload,
        confirm_code: u16,
        success_update: StateUpdate,
    ) -> Result<ManifestRecord, LifecycleError> {
        let id = record.id;
        let access_key = self.require_access_key(record, operation)?;
        let command = self.event_command(agent_operation, &payload)?;
        let text = payload.render();

        let attempts = self.config.retry.max_attempts.max(1);
        let mut confirm_first = false;
        let mut version = record.version;
        let mut last_error = String::from("no transmission attempted");

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry.delay_before(attempt)).await;
            }

            if confirm_first {
                match self.query_reply(&access_key).await {
                    Ok(reply) if reply.status_code == Some(confirm_code) => {
                        tracing::info!(
                            manifest = %id,
                            %operation,
                            "prior event already recorded by the authority"
                        );
                        return self.store.commit(id, version, success_update);
                    }
                    Ok(reply) if reply.outcome != ReplyOutcome::ProtocolError => {
                        // Classified and not on record; resending is safe.
                    }
                    Ok(reply) => {
                        // An unclassifiable query reply confirms nothing.
                        // Retry the query; never resend on its strength.
                        last_error = protocol_reason(&reply);
                        continue;
                    }
                    Err(e) if e.is_transient() => {
                        last_error = e.to_string();
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            confirm_first = true;

            let attempt_rec = TransmissionAttempt::begin(operation, text.clone());
            let attempt_id = attempt_rec.attempt_id;
            version = self
                .store
                .commit(
                    id,
                    version,
                    StateUpdate {
                        append_attempt: Some(attempt_rec),
                        ..Default::default()
                    },
                )?
                .version;

            match self.agent.execute(&command).await {
                Ok(raw) => {
                    let reply = match parse_reply(&raw, &self.config.status_table) {
                        Ok(reply) => reply,
                        Err(e) => {
                            self.resolve(
                                id,
                                version,
                                attempt_id,
                                AttemptOutcome::ProtocolError,
                                Some(&raw),
                            )?;
                            return Err(e.into());
                        }
                    };
                    return match reply.outcome {
                        ReplyOutcome::Success => {
                            let mut update = success_update;
                            update.resolve_attempt = Some(AttemptResolution {
                                attempt_id,
                                outcome: AttemptOutcome::Success,
                                raw_reply: Some(raw),
                            });
                            self.store.commit(id, version, update)
                        }
                        ReplyOutcome::Rejected => {
                            self.resolve(
                                id,
                                version,
                                attempt_id,
                                AttemptOutcome::Rejected,
                                Some(&raw),
                            )?;
                            Err(LifecycleError::Rejected {
                                code: reply.status_code,
                                reason: reply.message,
                            })
                        }
                        ReplyOutcome::ProtocolError => {
                            self.resolve(
                                id,
                                version,
                                attempt_id,
                                AttemptOutcome::ProtocolError,
                                Some(&raw),
                            )?;
                            Err(LifecycleError::Protocol {
                                reason: protocol_reason(&reply),
                            })
                        }
                    };
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        manifest = %id,
                        %operation,
                        attempt = attempt + 1,
                        error = %e,
                        "transient event transmission failure"
                    );
                    version = self
                        .resolve(id, version, attempt_id, AttemptOutcome::Transient, None)?
                        .version;
                    last_error = e.to_string();
                }
                Err(e) => {
                    self.resolve(id, version, attempt_id, AttemptOutcome::ProtocolError, None)?;
                    return Err(e.into());
                }
            }
        }

        Err(LifecycleError::TransmissionFailed {
            attempts,
            last_error,
        })
    }
}

fn protocol_reason(reply: &ParsedReply) -> String {
    if reply.message.is_empty() {
        match reply.status_code {
            Some(code) => format!("unclassifiable authority status code {code}"),
            None => "reply carried no status code".to_string(),
        }
    } else {
        reply.message.clone()
    }
}
