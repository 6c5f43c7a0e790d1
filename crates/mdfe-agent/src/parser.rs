//! # Reply Parser
//!
//! The agent replies with a free-text block containing a structured
//! segment of `key=value` lines, often preceded (and interleaved) by log
//! noise. The parser collects the structured lines wherever they appear,
//! extracts the numeric status code and message, and classifies the
//! outcome through a [`StatusTable`].
//!
//! The table is exhaustive by construction: a code in the success list is
//! `Success`, a code inside a rejection range is `Rejected`, and anything
//! else — including a missing or non-numeric code — is `ProtocolError`.
//! An unrecognized reply is never treated as success.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AgentError;

/// Classified outcome of an agent reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyOutcome {
    /// The authority recorded the operation.
    Success,
    /// Business-rule rejection — not retryable without changing the
    /// payload.
    Rejected,
    /// Malformed or unexpected reply — the integration itself is broken.
    ProtocolError,
}

impl std::fmt::Display for ReplyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Rejected => write!(f, "Rejected"),
            Self::ProtocolError => write!(f, "ProtocolError"),
        }
    }
}

/// An inclusive status-code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRange {
    pub from: u16,
    pub to: u16,
}

impl StatusRange {
    fn contains(&self, code: u16) -> bool {
        (self.from..=self.to).contains(&code)
    }
}

/// Data-driven classification table for authority status codes.
///
/// Defaults cover the reference authority revision: 100 (authorized),
/// 101 (cancellation recorded), 132 (closing recorded), 135/136 (event
/// recorded), with 200–799 as business rejections. Success entries win
/// over overlapping rejection ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusTable {
    pub success: Vec<u16>,
    pub rejected: Vec<StatusRange>,
}

impl Default for StatusTable {
    fn default() -> Self {
        Self {
            success: vec![100, 101, 132, 135, 136],
            rejected: vec![StatusRange { from: 200, to: 799 }],
        }
    }
}

impl StatusTable {
    /// Classify a status code. Exhaustive: everything not listed is a
    /// protocol error.
    pub fn classify(&self, code: u16) -> ReplyOutcome {
        if self.success.contains(&code) {
            ReplyOutcome::Success
        } else if self.rejected.iter().any(|r| r.contains(code)) {
            ReplyOutcome::Rejected
        } else {
            ReplyOutcome::ProtocolError
        }
    }
}

/// Structured result of parsing an agent reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedReply {
    pub outcome: ReplyOutcome,
    /// Numeric authority status code, when one was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Authority message, verbatim.
    pub message: String,
    /// Authorization protocol number, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Access key echoed by the authority, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    /// Authority receipt timestamp, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

/// Parse a raw agent reply against a status table.
///
/// Returns `Err` only when no structured segment could be located at all;
/// a located segment with an unknown code comes back as
/// `ReplyOutcome::ProtocolError` so the caller can log the raw text.
pub fn parse_reply(raw: &str, table: &StatusTable) -> Result<ParsedReply, AgentError> {
    let mut status_code: Option<u16> = None;
    let mut message = String::new();
    let mut protocol: Option<String> = None;
    let mut access_key: Option<String> = None;
    let mut received_at: Option<DateTime<Utc>> = None;
    let mut saw_structured = false;

    for line in raw.lines() {
        let line = line.trim().trim_start_matches("OK: ");
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            continue;
        }
        saw_structured = true;
        if key.eq_ignore_ascii_case("cstat") {
            status_code = value.parse().ok();
        } else if key.eq_ignore_ascii_case("xmotivo") {
            message = value.to_string();
        } else if key.eq_ignore_ascii_case("nprot") && !value.is_empty() {
            protocol = Some(value.to_string());
        } else if key.eq_ignore_ascii_case("chmdfe") && !value.is_empty() {
            access_key = Some(value.to_string());
        } else if key.eq_ignore_ascii_case("dhrecbto") {
            received_at = DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|t| t.with_timezone(&Utc));
        }
    }

    if !saw_structured {
        return Err(AgentError::Protocol {
            reason: "no structured segment found in reply".to_string(),
        });
    }

    let outcome = match status_code {
        Some(code) => table.classify(code),
        None => ReplyOutcome::ProtocolError,
    };
    if outcome == ReplyOutcome::ProtocolError {
        tracing::warn!(
            status_code,
            raw_reply = raw,
            "agent reply could not be classified"
        );
    }

    Ok(ParsedReply {
        outcome,
        status_code,
        message,
        protocol,
        access_key,
        received_at,
    })
}
