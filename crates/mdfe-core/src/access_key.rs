//! # Access Key
//!
//! The 44-digit identifier that uniquely names one manifest instance for
//! every external party. It is composed deterministically from the fields
//! below and closed with a modulo-11 check digit. The transmission agent
//! and the authority both recompute the check digit independently, so the
//! algorithm here must match the statutory one exactly.
//!
//! ## Layout (44 digits)
//!
//! ```text
//! cUF(2) AAMM(4) CNPJ(14) mod(2) serie(3) numero(9) tpEmis(1) cRand(8) cDV(1)
//! ```

use chrono::{Datelike, NaiveDate};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::identity::{Cnpj, DocNumber, Series, StateCode};

/// Fiscal document model for freight manifests.
pub const DOCUMENT_MODEL: &str = "58";

/// The fields an access key is composed from. Fixing these fixes the key,
/// apart from the caller-supplied random component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKeyParts {
    /// Federative unit of the issuer.
    pub state: StateCode,
    /// Issue date; only year and month enter the key.
    pub issued: NaiveDate,
    /// Issuer tax ID.
    pub issuer: Cnpj,
    /// Numbering series.
    pub series: Series,
    /// Sequential document number.
    pub number: DocNumber,
    /// Emission type (1 = normal, 2 = contingency).
    pub emission_type: u8,
    /// Random component, 8 digits (0–99,999,999).
    pub random: u32,
}

/// A validated 44-digit access key. Immutable once constructed; the
/// canonical form is the digit string itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AccessKey(String);

impl AccessKey {
    /// Compose an access key from its parts, computing the check digit.
    pub fn compose(parts: &AccessKeyParts) -> Self {
        let aamm = format!("{:02}{:02}", parts.issued.year() % 100, parts.issued.month());
        let prefix = format!(
            "{:02}{}{}{}{:03}{:09}{}{:08}",
            parts.state.code(),
            aamm,
            parts.issuer.as_str(),
            DOCUMENT_MODEL,
            parts.series.value(),
            parts.number.value(),
            parts.emission_type % 10,
            parts.random % 100_000_000,
        );
        debug_assert_eq!(prefix.len(), 43);
        let dv = Self::check_digit(&prefix);
        Self(format!("{prefix}{dv}"))
    }

    /// Validate and construct from a 44-digit string, verifying length,
    /// digit content, field ranges, and the check digit.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.len() != 44 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::InvalidAccessKey {
                reason: format!("expected 44 digits, got {raw:?}"),
            });
        }
        // Field-level checks surface a better reason than a bare
        // check-digit mismatch when a single field is malformed.
        let state: u8 = raw[0..2].parse().map_err(|_| invalid(raw))?;
        StateCode::new(state).map_err(|_| ValidationError::InvalidAccessKey {
            reason: format!("unknown state code {state}"),
        })?;
        if &raw[20..22] != DOCUMENT_MODEL {
            return Err(ValidationError::InvalidAccessKey {
                reason: format!("model {} is not {DOCUMENT_MODEL}", &raw[20..22]),
            });
        }
        let expected = Self::check_digit(&raw[..43]);
        let found = u32::from(raw.as_bytes()[43] - b'0');
        if expected != found {
            return Err(ValidationError::InvalidAccessKey {
                reason: format!("check digit {found} does not verify (expected {expected})"),
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Modulo-11 check digit over the 43-digit prefix: weights 2..=9
    /// repeating from the rightmost digit; remainders 0 and 1 map to 0.
    pub fn check_digit(prefix: &str) -> u32 {
        let sum: u32 = prefix
            .bytes()
            .rev()
            .zip((2u32..=9).cycle())
            .map(|(b, weight)| u32::from(b - b'0') * weight)
            .sum();
        match sum % 11 {
            0 | 1 => 0,
            r => 11 - r,
        }
    }

    /// The 44-digit canonical form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Document number field (digits 25–33).
    pub fn number(&self) -> Result<DocNumber, ValidationError> {
        let n: u32 = self.0[25..34]
            .parse()
            .map_err(|_| invalid(&self.0))?;
        DocNumber::new(n)
    }

    /// Series field (digits 22–24).
    pub fn series(&self) -> Result<Series, ValidationError> {
        let s: u16 = self.0[22..25]
            .parse()
            .map_err(|_| invalid(&self.0))?;
        Series::new(s)
    }

    /// Issuer CNPJ field (digits 6–19).
    pub fn issuer(&self) -> Result<Cnpj, ValidationError> {
        Cnpj::new(&self.0[6..20])
    }
}

fn invalid(raw: &str) -> ValidationError {
    ValidationError::InvalidAccessKey {
        reason: format!("malformed field in {raw}"),
    }
}

impl<'de> Deserialize<'de> for AccessKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Draw the 8-digit random component of an access key.
pub fn random_code<R: Rng>(rng: &mut R) -> u32 {
    rng.gen_range(0..=99_999_999)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
