//! # mdfe-payload — Manifest Graph & Payload Builder
//!
//! The typed manifest document graph and the builder that flattens it into
//! the textual format the external transmission agent consumes.
//!
//! - **Manifest** ([`manifest`]): issuer, vehicle, conductors, referenced
//!   cargo documents, route, insurance, toll vouchers, and totals.
//!
//! - **Sections** ([`section`]): the ordered section/key=value payload
//!   representation, its renderer, and the boundary re-parser used to
//!   verify that no field is silently dropped.
//!
//! - **Builder** ([`builder`]): one build path per operation (Issue,
//!   Cancel, Close, Amend). Section ordering is fixed — the agent is
//!   order-sensitive — and every required field is checked before any
//!   transmission attempt, so an incomplete manifest never reaches the
//!   agent.

pub mod builder;
pub mod manifest;
pub mod section;

// Re-export primary types.
pub use builder::{
    build_amend, build_cancel, build_close, build_issue, AmendParams, CancelParams, CloseParams,
    Operation, PayloadError, MIN_JUSTIFICATION_LEN,
};
pub use manifest::{
    CargoDocumentRef, Driver, Insurance, Issuer, IssuerAddress, Manifest, Municipality, Route,
    TollVoucher, Vehicle,
};
pub use section::{Payload, Section};
