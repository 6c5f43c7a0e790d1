//! # Command Grammar
//!
//! The agent speaks a single-line command language:
//!
//! ```text
//! MODULE.Operation(param="value",param="value")
//! ```
//!
//! Module and operation names vary between agent revisions, so they are
//! carried in a serde-loadable [`CommandGrammar`] rather than hard-coded.
//! Parameter values are always quoted; embedded quotes and backslashes
//! are escaped.

use serde::{Deserialize, Serialize};

/// The operations the orchestration issues against the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentOperation {
    /// Sign and transmit an issuance payload.
    Issue,
    /// Transmit a cancellation event.
    Cancel,
    /// Transmit a closing event.
    Close,
    /// Transmit a driver-inclusion amendment event.
    Amend,
    /// Side-effect-free status query by access key.
    StatusQuery,
}

impl std::fmt::Display for AgentOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Issue => write!(f, "Issue"),
            Self::Cancel => write!(f, "Cancel"),
            Self::Close => write!(f, "Close"),
            Self::Amend => write!(f, "Amend"),
            Self::StatusQuery => write!(f, "StatusQuery"),
        }
    }
}

/// Agent command vocabulary: the module prefix and one verb per
/// operation. Defaults match the reference agent revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandGrammar {
    pub module: String,
    pub issue_verb: String,
    pub cancel_verb: String,
    pub close_verb: String,
    pub amend_verb: String,
    pub query_verb: String,
}

impl Default for CommandGrammar {
    fn default() -> Self {
        Self {
            module: "MDFE".to_string(),
            issue_verb: "EnviarMDFe".to_string(),
            cancel_verb: "CancelarMDFe".to_string(),
            close_verb: "EncerrarMDFe".to_string(),
            amend_verb: "IncluirCondutorMDFe".to_string(),
            query_verb: "ConsultarMDFe".to_string(),
        }
    }
}

impl CommandGrammar {
    /// The verb for an operation.
    pub fn verb(&self, operation: AgentOperation) -> &str {
        match operation {
            AgentOperation::Issue => &self.issue_verb,
            AgentOperation::Cancel => &self.cancel_verb,
            AgentOperation::Close => &self.close_verb,
            AgentOperation::Amend => &self.amend_verb,
            AgentOperation::StatusQuery => &self.query_verb,
        }
    }

    /// Render a full command string for an operation with named
    /// parameters, in the order given.
    pub fn render(&self, operation: AgentOperation, params: &[(&str, &str)]) -> String {
        let rendered: Vec<String> = params
            .iter()
            .map(|(key, value)| format!("{key}=\"{}\"", escape(value)))
            .collect();
        format!("{}.{}({})", self.module, self.verb(operation), rendered.join(","))
    }
}

/// Escape quotes and backslashes inside a parameter value.
fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
