//! # mdfe-agent — Transmission Agent Client
//!
//! The narrow request/response protocol to the external signing-and-
//! transmission agent: one command string in, one text block out,
//! synchronous per call.
//!
//! - **Command grammar** ([`command`]): renders `MODULE.Operation(k="v",...)`
//!   command strings. The module and operation names are configuration,
//!   not hard-code, so the same orchestration targets different agent
//!   revisions.
//!
//! - **Client** ([`client`]): the [`TransmissionAgent`] trait and the
//!   concrete [`TcpAgentClient`]. Calls on one connection are serialized
//!   (the protocol is not safely concurrent on a channel); an optional
//!   concurrent mode opens an independent connection per call.
//!
//! - **Parser** ([`parser`]): decodes the agent's line-oriented reply —
//!   `key=value` pairs possibly interleaved with free-text log noise —
//!   into a [`ParsedReply`], classifying the status code through a
//!   data-driven, exhaustive table. Unrecognized codes are protocol
//!   errors, never success.
//!
//! - **Retry** ([`retry`]): exponential backoff over transient transport
//!   errors only. Blind resends of mutating commands are the caller's
//!   responsibility to avoid — see the lifecycle crate's
//!   query-before-retry rule.

pub mod client;
pub mod command;
pub mod parser;
pub mod retry;

use thiserror::Error;

// Re-export primary types.
pub use client::{AgentClientConfig, TcpAgentClient, TransmissionAgent};
pub use command::{AgentOperation, CommandGrammar};
pub use parser::{parse_reply, ParsedReply, ReplyOutcome, StatusRange, StatusTable};
pub use retry::{with_backoff, RetryPolicy};

/// Errors from transmission agent calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The call did not complete within the caller's deadline. The agent
    /// may still have processed the command — never blindly resend.
    #[error("agent call timed out after {elapsed_ms}ms")]
    Timeout {
        /// Elapsed time in milliseconds before the deadline expired.
        elapsed_ms: u64,
    },

    /// The agent endpoint could not be reached or the connection dropped.
    #[error("agent unreachable: {reason}")]
    Unreachable {
        /// Human-readable description of the transport failure.
        reason: String,
    },

    /// The reply was malformed or the integration itself is broken
    /// (e.g. agent revision mismatch). Reported, never retried.
    #[error("agent protocol error: {reason}")]
    Protocol {
        /// Description of the malformation, with the raw reply logged
        /// separately for diagnosis.
        reason: String,
    },
}

impl AgentError {
    /// Whether the error is transient: safe to retry after a
    /// confirmatory status query, never by blind resend.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unreachable { .. })
    }
}
