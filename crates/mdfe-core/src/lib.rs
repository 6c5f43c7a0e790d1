//! # mdfe-core — Foundational Types
//!
//! Domain primitives shared by every crate in the MDF-e stack:
//!
//! - **Identity** ([`identity`]): validated newtypes for the issuer tax ID
//!   (CNPJ), numbering series, sequential document number, and IBGE state
//!   code. Invalid values are rejected at construction time — and at
//!   deserialization time, since the newtypes route `Deserialize` through
//!   their constructors.
//!
//! - **Access Key** ([`access_key`]): the 44-digit key that uniquely names
//!   one manifest instance everywhere outside this system. Composed
//!   deterministically from state + issue date + issuer + model + series +
//!   number + emission type + random component, closed by a modulo-11
//!   check digit that the transmission agent independently recomputes.
//!
//! - **Formatting** ([`format`]): the single canonical rendering for dates,
//!   instants, currency (2 decimals) and weights (3 decimals) used in
//!   every payload handed to the transmission agent.

pub mod access_key;
pub mod error;
pub mod format;
pub mod identity;

// Re-export primary types.
pub use access_key::{AccessKey, AccessKeyParts, DOCUMENT_MODEL};
pub use error::ValidationError;
pub use format::{format_currency, format_date, format_instant, format_weight};
pub use identity::{Cnpj, DocNumber, Series, StateCode};
