//! # Identity Newtypes
//!
//! Domain-primitive newtypes for the identifiers that partition manifest
//! numbering: the issuer tax ID ([`Cnpj`]), the numbering [`Series`], the
//! sequential [`DocNumber`], and the IBGE [`StateCode`] embedded in the
//! access key. Each identifier is a distinct type — you cannot pass a
//! [`Series`] where a [`DocNumber`] is expected.
//!
//! ## Validation
//!
//! String and integer identifiers validate at construction time. The
//! CNPJ verifies both modulo-11 check digits, since a mistyped issuer ID
//! would otherwise surface only as an authority rejection after
//! transmission.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Helper macro to implement `Deserialize` for newtypes that must validate
/// their contents. Deserializes the raw representation, then routes through
/// the type's `new()` constructor so that invalid values are rejected at
/// deserialization time — not silently accepted.
macro_rules! impl_validating_deserialize {
    ($ty:ident, $raw:ty) => {
        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = <$raw>::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Cnpj
// ---------------------------------------------------------------------------

/// Brazilian company tax ID (CNPJ): exactly 14 digits, the last two of
/// which are modulo-11 check digits over the preceding twelve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Cnpj(String);

impl Cnpj {
    /// Validate and construct a CNPJ from its 14-digit string form.
    ///
    /// Punctuation (`.`, `/`, `-`) is stripped before validation, so both
    /// `12.345.678/0001-95` and `12345678000195` are accepted.
    pub fn new(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        let digits: String = raw
            .chars()
            .filter(|c| !matches!(c, '.' | '/' | '-'))
            .collect();

        if digits.len() != 14 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::InvalidCnpj {
                reason: format!("expected 14 digits, got {raw:?}"),
            });
        }
        let d: Vec<u32> = digits.bytes().map(|b| u32::from(b - b'0')).collect();
        if d.iter().all(|&x| x == d[0]) {
            return Err(ValidationError::InvalidCnpj {
                reason: "all digits identical".to_string(),
            });
        }
        if d[12] != Self::check_digit(&d[..12]) || d[13] != Self::check_digit(&d[..13]) {
            return Err(ValidationError::InvalidCnpj {
                reason: format!("check digits do not verify for {digits}"),
            });
        }
        Ok(Self(digits))
    }

    /// Modulo-11 check digit over a 12- or 13-digit prefix, using the
    /// statutory weight sequence (2..=9 repeating from the rightmost digit).
    fn check_digit(prefix: &[u32]) -> u32 {
        let sum: u32 = prefix
            .iter()
            .rev()
            .zip((2u32..=9).cycle())
            .map(|(digit, weight)| digit * weight)
            .sum();
        match sum % 11 {
            0 | 1 => 0,
            r => 11 - r,
        }
    }

    /// Access the canonical 14-digit form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl_validating_deserialize!(Cnpj, String);

impl std::fmt::Display for Cnpj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Cnpj {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// Numbering series: a secondary partition per issuer (0–999), used to run
/// independent numbering sequences. Rendered as three digits in the access
/// key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Series(u16);

impl Series {
    /// Validate and construct a series (0–999).
    pub fn new(value: u16) -> Result<Self, ValidationError> {
        if value > 999 {
            return Err(ValidationError::InvalidSeries {
                reason: format!("series {value} exceeds 999"),
            });
        }
        Ok(Self(value))
    }

    /// The numeric value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl_validating_deserialize!(Series, u16);

impl std::fmt::Display for Series {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// DocNumber
// ---------------------------------------------------------------------------

/// Sequential document number, unique per (issuer, series). Rendered as
/// nine digits in the access key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DocNumber(u32);

impl DocNumber {
    /// Validate and construct a document number (1–999,999,999).
    pub fn new(value: u32) -> Result<Self, ValidationError> {
        if value == 0 || value > 999_999_999 {
            return Err(ValidationError::InvalidNumber {
                reason: format!("number {value} outside 1–999999999"),
            });
        }
        Ok(Self(value))
    }

    /// The numeric value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl_validating_deserialize!(DocNumber, u32);

impl std::fmt::Display for DocNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StateCode
// ---------------------------------------------------------------------------

/// IBGE federative unit codes paired with their two-letter abbreviations.
const STATES: &[(u8, &str)] = &[
    (11, "RO"),
    (12, "AC"),
    (13, "AM"),
    (14, "RR"),
    (15, "PA"),
    (16, "AP"),
    (17, "TO"),
    (21, "MA"),
    (22, "PI"),
    (23, "CE"),
    (24, "RN"),
    (25, "PB"),
    (26, "PE"),
    (27, "AL"),
    (28, "SE"),
    (29, "BA"),
    (31, "MG"),
    (32, "ES"),
    (33, "RJ"),
    (35, "SP"),
    (41, "PR"),
    (42, "SC"),
    (43, "RS"),
    (50, "MS"),
    (51, "MT"),
    (52, "GO"),
    (53, "DF"),
];

/// IBGE two-digit federative unit code. Carries both the numeric code used
/// in the access key and the two-letter abbreviation used in payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StateCode(u8);

impl StateCode {
    /// Validate and construct a state code from its IBGE numeric form.
    pub fn new(code: u8) -> Result<Self, ValidationError> {
        if STATES.iter().any(|(c, _)| *c == code) {
            Ok(Self(code))
        } else {
            Err(ValidationError::InvalidStateCode {
                reason: format!("{code} is not an IBGE federative unit code"),
            })
        }
    }

    /// Construct from the two-letter abbreviation (e.g. `"SP"`).
    pub fn from_uf(uf: &str) -> Result<Self, ValidationError> {
        STATES
            .iter()
            .find(|(_, abbrev)| abbrev.eq_ignore_ascii_case(uf))
            .map(|(code, _)| Self(*code))
            .ok_or_else(|| ValidationError::InvalidStateCode {
                reason: format!("{uf:?} is not a federative unit abbreviation"),
            })
    }

    /// The IBGE numeric code.
    pub fn code(&self) -> u8 {
        self.0
    }

    /// The two-letter abbreviation (e.g. `"SP"`).
    pub fn uf(&self) -> &'static str {
        STATES
            .iter()
            .find(|(c, _)| *c == self.0)
            .map(|(_, abbrev)| *abbrev)
            .unwrap_or("??")
    }
}

impl_validating_deserialize!(StateCode, u8);

impl std::fmt::Display for StateCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uf())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
