//! # Payload Builder
//!
//! One build path per operation. `Issue` flattens the full manifest graph
//! into the fixed section grammar below; `Cancel` and `Close` emit the
//! minimal event payloads. Section ordering never varies between calls —
//! the transmission agent is order-sensitive.
//!
//! ## Issue section order
//!
//! ```text
//! ide → emit → infMunCarregaNNN → infPercursoNNN → veicTracao
//!     → condutorNNN → infMunDescargaNNN → seg → valePedNNN → tot
//! ```
//!
//! Every required field is checked here, before any transmission attempt:
//! a manifest missing data fails with [`PayloadError::IncompleteManifest`]
//! instead of being discovered via an authority rejection.

use chrono::NaiveDate;
use mdfe_core::{format_currency, format_date, format_instant, format_weight, AccessKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::{Driver, Manifest, Municipality};
use crate::section::{Payload, Section};

/// Minimum length of a cancellation justification, in characters.
pub const MIN_JUSTIFICATION_LEN: usize = 15;

/// The operation a payload is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Issue,
    Cancel,
    Close,
    Amend,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Issue => write!(f, "Issue"),
            Self::Cancel => write!(f, "Cancel"),
            Self::Close => write!(f, "Close"),
            Self::Amend => write!(f, "Amend"),
        }
    }
}

/// Errors from payload building.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// A field required for the requested operation is missing or invalid.
    #[error("incomplete manifest: {field}: {reason}")]
    IncompleteManifest {
        /// The offending field, dotted path form (e.g. `drivers[0].cpf`).
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn incomplete(field: &str, reason: impl Into<String>) -> PayloadError {
    PayloadError::IncompleteManifest {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Parameters for a cancellation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelParams {
    pub access_key: AccessKey,
    /// Authorization protocol of the manifest being cancelled.
    pub protocol: String,
    /// Free-text justification, at least [`MIN_JUSTIFICATION_LEN`] chars.
    pub justification: String,
}

/// Parameters for a closing payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseParams {
    pub access_key: AccessKey,
    /// Authorization protocol of the manifest being closed.
    pub protocol: String,
    /// Closing date.
    pub closing_date: NaiveDate,
    /// Override closing location; defaults to the manifest's final stop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_location: Option<Municipality>,
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// Build the issuance payload from a numbered manifest.
pub fn build_issue(manifest: &Manifest) -> Result<Payload, PayloadError> {
    let number = manifest
        .number
        .ok_or_else(|| incomplete("number", "manifest has not been numbered"))?;
    let access_key = manifest
        .access_key
        .as_ref()
        .ok_or_else(|| incomplete("access_key", "manifest has no access key"))?;
    validate_issue_fields(manifest)?;

    let mut sections = Vec::new();

    sections.push(
        Section::new("ide")
            .entry("cUF", manifest.origin_state.code().to_string())
            .entry("tpEmis", manifest.emission_type.to_string())
            .entry("serie", manifest.series.to_string())
            .entry("nMDF", number.to_string())
            .entry("chMDF", access_key.to_string())
            .entry("dhEmi", format_instant(manifest.emission))
            .entry("UFIni", manifest.origin_state.uf())
            .entry("UFFim", manifest.destination_state.uf()),
    );

    let addr = &manifest.issuer.address;
    sections.push(
        Section::new("emit")
            .entry("CNPJ", manifest.issuer.cnpj.as_str())
            .entry("IE", &manifest.issuer.state_registration)
            .entry("xNome", &manifest.issuer.legal_name)
            .entry_opt("xFant", manifest.issuer.trade_name.clone())
            .entry("xLgr", &addr.street)
            .entry("nro", &addr.number)
            .entry("xBairro", &addr.district)
            .entry("cMun", addr.municipality_code.to_string())
            .entry("xMun", &addr.municipality)
            .entry("CEP", &addr.postal_code)
            .entry("UF", addr.state.uf()),
    );

    for (i, loading) in manifest.route.loading.iter().enumerate() {
        sections.push(
            Section::new(format!("infMunCarrega{:03}", i + 1))
                .entry("cMunCarrega", loading.code.to_string())
                .entry("xMunCarrega", &loading.name),
        );
    }

    for (i, uf) in manifest.route.traversal_states.iter().enumerate() {
        sections.push(
            Section::new(format!("infPercurso{:03}", i + 1)).entry("UFPer", uf.uf()),
        );
    }

    sections.push(
        Section::new("veicTracao")
            .entry("placa", &manifest.vehicle.plate)
            .entry_opt("RENAVAM", manifest.vehicle.renavam.clone())
            .entry("tara", manifest.vehicle.tare_kg.to_string())
            .entry_opt(
                "capKG",
                manifest.vehicle.capacity_kg.map(|c| c.to_string()),
            ),
    );

    for (i, driver) in manifest.drivers.iter().enumerate() {
        sections.push(
            Section::new(format!("condutor{:03}", i + 1))
                .entry("xNome", &driver.name)
                .entry("CPF", &driver.cpf),
        );
    }

    for (i, doc) in manifest.cargo_documents.iter().enumerate() {
        sections.push(
            Section::new(format!("infMunDescarga{:03}", i + 1))
                .entry("cMunDescarga", doc.unloading.code.to_string())
                .entry("xMunDescarga", &doc.unloading.name)
                .entry("chDoc", &doc.access_key),
        );
    }

    if let Some(ins) = &manifest.insurance {
        sections.push(
            Section::new("seg")
                .entry("xSeg", &ins.insurer_name)
                .entry("CNPJ", ins.insurer_cnpj.as_str())
                .entry("nApol", &ins.policy_number)
                .entry_opt("nAver", ins.endorsement_number.clone()),
        );
    }

    for (i, voucher) in manifest.toll_vouchers.iter().enumerate() {
        sections.push(
            Section::new(format!("valePed{:03}", i + 1))
                .entry("CNPJForn", voucher.provider_cnpj.as_str())
                .entry_opt(
                    "CNPJPg",
                    voucher.payer_cnpj.as_ref().map(|c| c.as_str().to_string()),
                )
                .entry("nCompra", &voucher.voucher_number)
                .entry("vValePed", format_currency(voucher.amount)),
        );
    }

    sections.push(
        Section::new("tot")
            .entry("qDoc", manifest.cargo_documents.len().to_string())
            .entry("vCarga", format_currency(manifest.cargo_value))
            .entry("cUnid", "KG")
            .entry("qCarga", format_weight(manifest.gross_weight_kg)),
    );

    Ok(Payload::new(sections))
}

fn validate_issue_fields(manifest: &Manifest) -> Result<(), PayloadError> {
    if manifest.issuer.state_registration.is_empty() {
        return Err(incomplete("issuer.state_registration", "must not be empty"));
    }
    if manifest.issuer.legal_name.is_empty() {
        return Err(incomplete("issuer.legal_name", "must not be empty"));
    }
    if manifest.vehicle.plate.is_empty() {
        return Err(incomplete("vehicle.plate", "must not be empty"));
    }
    if manifest.drivers.is_empty() {
        return Err(incomplete("drivers", "at least one conductor is required"));
    }
    for (i, driver) in manifest.drivers.iter().enumerate() {
        if driver.name.is_empty() {
            return Err(incomplete(&format!("drivers[{i}].name"), "must not be empty"));
        }
        if driver.cpf.len() != 11 || !driver.cpf.bytes().all(|b| b.is_ascii_digit()) {
            return Err(incomplete(
                &format!("drivers[{i}].cpf"),
                "expected 11 digits",
            ));
        }
    }
    if manifest.route.loading.is_empty() {
        return Err(incomplete(
            "route.loading",
            "at least one loading municipality is required",
        ));
    }
    if manifest.cargo_documents.is_empty() {
        return Err(incomplete(
            "cargo_documents",
            "at least one referenced document is required",
        ));
    }
    for (i, doc) in manifest.cargo_documents.iter().enumerate() {
        if doc.access_key.len() != 44 || !doc.access_key.bytes().all(|b| b.is_ascii_digit()) {
            return Err(incomplete(
                &format!("cargo_documents[{i}].access_key"),
                "expected 44 digits",
            ));
        }
    }
    if manifest.gross_weight_kg <= rust_decimal::Decimal::ZERO {
        return Err(incomplete("gross_weight_kg", "must be positive"));
    }
    if manifest.cargo_value < rust_decimal::Decimal::ZERO {
        return Err(incomplete("cargo_value", "must not be negative"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// Build the cancellation event payload.
pub fn build_cancel(params: &CancelParams) -> Result<Payload, PayloadError> {
    if params.protocol.is_empty() {
        return Err(incomplete("protocol", "must not be empty"));
    }
    let justification = params.justification.trim();
    if justification.chars().count() < MIN_JUSTIFICATION_LEN {
        return Err(incomplete(
            "justification",
            format!("at least {MIN_JUSTIFICATION_LEN} characters required"),
        ));
    }
    Ok(Payload::new(vec![Section::new("evCancMDFe")
        .entry("chMDFe", params.access_key.to_string())
        .entry("nProt", &params.protocol)
        .entry("xJust", justification)]))
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

/// Build the closing event payload. The closing location falls back to
/// the manifest's final unloading stop when no override is given.
pub fn build_close(manifest: &Manifest, params: &CloseParams) -> Result<Payload, PayloadError> {
    if params.protocol.is_empty() {
        return Err(incomplete("protocol", "must not be empty"));
    }
    let location = match &params.closing_location {
        Some(m) => m,
        None => manifest.final_stop().ok_or_else(|| {
            incomplete(
                "closing_location",
                "no override given and the route declares no unloading stop",
            )
        })?,
    };
    Ok(Payload::new(vec![Section::new("evEncMDFe")
        .entry("chMDFe", params.access_key.to_string())
        .entry("nProt", &params.protocol)
        .entry("dtEnc", format_date(params.closing_date))
        .entry("cMun", location.code.to_string())
        .entry("xMun", &location.name)]))
}

// ---------------------------------------------------------------------------
// Amend
// ---------------------------------------------------------------------------

/// Parameters for a driver-inclusion amendment payload. The only amendment
/// the authority accepts after authorization is adding a conductor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmendParams {
    pub access_key: AccessKey,
    /// Authorization protocol of the manifest being amended.
    pub protocol: String,
    pub driver: Driver,
}

/// Build the driver-inclusion amendment event payload.
pub fn build_amend(params: &AmendParams) -> Result<Payload, PayloadError> {
    if params.protocol.is_empty() {
        return Err(incomplete("protocol", "must not be empty"));
    }
    if params.driver.name.is_empty() {
        return Err(incomplete("driver.name", "must not be empty"));
    }
    if params.driver.cpf.len() != 11 || !params.driver.cpf.bytes().all(|b| b.is_ascii_digit()) {
        return Err(incomplete("driver.cpf", "expected 11 digits"));
    }
    Ok(Payload::new(vec![Section::new("evIncCondutorMDFe")
        .entry("chMDFe", params.access_key.to_string())
        .entry("nProt", &params.protocol)
        .entry("xNome", &params.driver.name)
        .entry("CPF", &params.driver.cpf)]))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{
        CargoDocumentRef, Driver, Insurance, Issuer, IssuerAddress, Route, TollVoucher, Vehicle,
    };
    use chrono::{TimeZone, Utc};
    use mdfe_core::{AccessKeyParts, Cnpj, DocNumber, Series, StateCode};
    use rust_decimal_macros::dec;

    fn numbered_manifest() -> Manifest {
        let issuer_cnpj = Cnpj::new("11222333000181").expect("cnpj");
        let number = DocNumber::new(42).expect("number");
        let series = Series::new(1).expect("series");
        let key = AccessKey::compose(&AccessKeyParts {
            state: StateCode::from_uf("SP").expect("SP"),
            issued: chrono::NaiveDate::from_ymd_opt(2026, 3, 14).expect("date"),
            issuer: issuer_cnpj.clone(),
            series,
            number,
            emission_type: 1,
            random: 7_654_321,
        });
        Manifest {
            issuer: Issuer {
                cnpj: issuer_cnpj,
                state_registration: "123456789".to_string(),
                legal_name: "Transportadora Horizonte Ltda".to_string(),
                trade_name: Some("Horizonte".to_string()),
                address: IssuerAddress {
                    street: "Av. das Nações".to_string(),
                    number: "1000".to_string(),
                    district: "Centro".to_string(),
                    municipality_code: 3550308,
                    municipality: "São Paulo".to_string(),
                    postal_code: "01000000".to_string(),
                    state: StateCode::from_uf("SP").expect("SP"),
                },
            },
            series,
            number: Some(number),
            access_key: Some(key),
            emission: Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
            emission_type: 1,
            origin_state: StateCode::from_uf("SP").expect("SP"),
            destination_state: StateCode::from_uf("RJ").expect("RJ"),
            vehicle: Vehicle {
                plate: "ABC1D23".to_string(),
                renavam: Some("12345678901".to_string()),
                tare_kg: 7500,
                capacity_kg: Some(24000),
            },
            drivers: vec![Driver {
                name: "José Carlos".to_string(),
                cpf: "52998224725".to_string(),
            }],
            route: Route {
                loading: vec![Municipality {
                    code: 3550308,
                    name: "São Paulo".to_string(),
                }],
                traversal_states: vec![StateCode::from_uf("MG").expect("MG")],
            },
            cargo_documents: vec![
                CargoDocumentRef {
                    access_key: "3".repeat(44),
                    unloading: Municipality {
                        code: 3106200,
                        name: "Belo Horizonte".to_string(),
                    },
                },
                CargoDocumentRef {
                    access_key: "5".repeat(44),
                    unloading: Municipality {
                        code: 3304557,
                        name: "Rio de Janeiro".to_string(),
                    },
                },
            ],
            insurance: Some(Insurance {
                insurer_name: "Seguradora Alfa".to_string(),
                insurer_cnpj: Cnpj::new("11444777000161").expect("cnpj"),
                policy_number: "AP-2026-0099".to_string(),
                endorsement_number: None,
            }),
            toll_vouchers: vec![TollVoucher {
                provider_cnpj: Cnpj::new("11444777000161").expect("cnpj"),
                payer_cnpj: None,
                voucher_number: "VP-555".to_string(),
                amount: dec!(230.5),
            }],
            cargo_value: dec!(150000),
            gross_weight_kg: dec!(12500.5),
        }
    }

    fn cancel_params(m: &Manifest) -> CancelParams {
        CancelParams {
            access_key: m.access_key.clone().expect("key"),
            protocol: "935260000012345".to_string(),
            justification: "cargo returned to origin after customer refusal".to_string(),
        }
    }

    // -- Issue ----------------------------------------------------------------

    #[test]
    fn issue_section_order_is_fixed() {
        let m = numbered_manifest();
        let payload = build_issue(&m).expect("payload");
        let names: Vec<&str> = payload.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ide",
                "emit",
                "infMunCarrega001",
                "infPercurso001",
                "veicTracao",
                "condutor001",
                "infMunDescarga001",
                "infMunDescarga002",
                "seg",
                "valePed001",
                "tot",
            ]
        );
    }

    #[test]
    fn issue_is_deterministic() {
        let m = numbered_manifest();
        let a = build_issue(&m).expect("a").render();
        let b = build_issue(&m).expect("b").render();
        assert_eq!(a, b);
    }

    #[test]
    fn issue_renders_fixed_precision() {
        let m = numbered_manifest();
        let payload = build_issue(&m).expect("payload");
        let tot = payload.section("tot").expect("tot");
        assert_eq!(tot.get("vCarga"), Some("150000.00"));
        assert_eq!(tot.get("qCarga"), Some("12500.500"));
        assert_eq!(tot.get("qDoc"), Some("2"));
        let toll = payload.section("valePed001").expect("valePed001");
        assert_eq!(toll.get("vValePed"), Some("230.50"));
    }

    #[test]
    fn issue_omits_absent_optional_sections() {
        let mut m = numbered_manifest();
        m.insurance = None;
        m.toll_vouchers.clear();
        m.route.traversal_states.clear();
        let payload = build_issue(&m).expect("payload");
        assert!(payload.section("seg").is_none());
        assert!(payload.section("valePed001").is_none());
        assert!(payload.section("infPercurso001").is_none());
    }

    #[test]
    fn issue_requires_number() {
        let mut m = numbered_manifest();
        m.number = None;
        assert!(matches!(
            build_issue(&m),
            Err(PayloadError::IncompleteManifest { field, .. }) if field == "number"
        ));
    }

    #[test]
    fn issue_requires_driver() {
        let mut m = numbered_manifest();
        m.drivers.clear();
        assert!(build_issue(&m).is_err());
    }

    #[test]
    fn issue_rejects_malformed_cpf() {
        let mut m = numbered_manifest();
        m.drivers[0].cpf = "123".to_string();
        assert!(matches!(
            build_issue(&m),
            Err(PayloadError::IncompleteManifest { field, .. }) if field == "drivers[0].cpf"
        ));
    }

    #[test]
    fn issue_rejects_zero_weight() {
        let mut m = numbered_manifest();
        m.gross_weight_kg = dec!(0);
        assert!(build_issue(&m).is_err());
    }

    #[test]
    fn issue_roundtrip_preserves_fields() {
        let m = numbered_manifest();
        let payload = build_issue(&m).expect("payload");
        let reparsed = Payload::parse(&payload.render());
        assert_eq!(reparsed.fields(), payload.fields());
    }

    // -- Cancel ---------------------------------------------------------------

    #[test]
    fn cancel_minimal_payload() {
        let m = numbered_manifest();
        let payload = build_cancel(&cancel_params(&m)).expect("payload");
        assert_eq!(payload.sections.len(), 1);
        let ev = payload.section("evCancMDFe").expect("event");
        assert_eq!(ev.get("nProt"), Some("935260000012345"));
        assert_eq!(
            ev.get("chMDFe").map(str::len),
            Some(44)
        );
    }

    #[test]
    fn cancel_rejects_short_justification() {
        let m = numbered_manifest();
        let mut params = cancel_params(&m);
        params.justification = "too short".to_string();
        assert!(matches!(
            build_cancel(&params),
            Err(PayloadError::IncompleteManifest { field, .. }) if field == "justification"
        ));
    }

    #[test]
    fn cancel_justification_counts_chars_not_bytes() {
        let m = numbered_manifest();
        let mut params = cancel_params(&m);
        // 14 characters, more than 15 bytes.
        params.justification = "çãoçãoçãoçãoçã".to_string();
        assert!(build_cancel(&params).is_err());
    }

    // -- Amend ----------------------------------------------------------------

    #[test]
    fn amend_emits_driver_inclusion_event() {
        let m = numbered_manifest();
        let params = AmendParams {
            access_key: m.access_key.clone().expect("key"),
            protocol: "935260000012345".to_string(),
            driver: Driver {
                name: "Maria Souza".to_string(),
                cpf: "15350946056".to_string(),
            },
        };
        let payload = build_amend(&params).expect("payload");
        let ev = payload.section("evIncCondutorMDFe").expect("event");
        assert_eq!(ev.get("xNome"), Some("Maria Souza"));
        assert_eq!(ev.get("CPF"), Some("15350946056"));
    }

    #[test]
    fn amend_rejects_malformed_cpf() {
        let m = numbered_manifest();
        let params = AmendParams {
            access_key: m.access_key.clone().expect("key"),
            protocol: "935260000012345".to_string(),
            driver: Driver {
                name: "Maria Souza".to_string(),
                cpf: "not-a-cpf".to_string(),
            },
        };
        assert!(matches!(
            build_amend(&params),
            Err(PayloadError::IncompleteManifest { field, .. }) if field == "driver.cpf"
        ));
    }

    // -- Close ----------------------------------------------------------------

    #[test]
    fn close_defaults_to_final_stop() {
        let m = numbered_manifest();
        let params = CloseParams {
            access_key: m.access_key.clone().expect("key"),
            protocol: "935260000012345".to_string(),
            closing_date: chrono::NaiveDate::from_ymd_opt(2026, 3, 16).expect("date"),
            closing_location: None,
        };
        let payload = build_close(&m, &params).expect("payload");
        let ev = payload.section("evEncMDFe").expect("event");
        assert_eq!(ev.get("cMun"), Some("3304557"));
        assert_eq!(ev.get("xMun"), Some("Rio de Janeiro"));
        assert_eq!(ev.get("dtEnc"), Some("2026-03-16"));
    }

    #[test]
    fn close_honours_override_location() {
        let m = numbered_manifest();
        let params = CloseParams {
            access_key: m.access_key.clone().expect("key"),
            protocol: "935260000012345".to_string(),
            closing_date: chrono::NaiveDate::from_ymd_opt(2026, 3, 16).expect("date"),
            closing_location: Some(Municipality {
                code: 3106200,
                name: "Belo Horizonte".to_string(),
            }),
        };
        let payload = build_close(&m, &params).expect("payload");
        let ev = payload.section("evEncMDFe").expect("event");
        assert_eq!(ev.get("cMun"), Some("3106200"));
    }

    #[test]
    fn close_requires_protocol() {
        let m = numbered_manifest();
        let params = CloseParams {
            access_key: m.access_key.clone().expect("key"),
            protocol: String::new(),
            closing_date: chrono::NaiveDate::from_ymd_opt(2026, 3, 16).expect("date"),
            closing_location: None,
        };
        assert!(build_close(&m, &params).is_err());
    }
}
