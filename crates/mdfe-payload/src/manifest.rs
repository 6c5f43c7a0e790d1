//! # Manifest Document Graph
//!
//! Typed structs for the freight manifest and everything it references:
//! issuer, vehicle, conductors, cargo documents, route, insurance, and
//! toll vouchers. Optional sub-objects serialize only when present so a
//! stored manifest carries no empty placeholder blocks.

use chrono::{DateTime, Utc};
use mdfe_core::{AccessKey, Cnpj, DocNumber, Series, StateCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Issuer address, rendered into the `emit` payload block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuerAddress {
    pub street: String,
    pub number: String,
    pub district: String,
    /// IBGE municipality code (7 digits).
    pub municipality_code: u32,
    pub municipality: String,
    pub postal_code: String,
    pub state: StateCode,
}

/// The business entity on whose behalf manifests are issued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issuer {
    pub cnpj: Cnpj,
    /// State tax registration.
    pub state_registration: String,
    pub legal_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_name: Option<String>,
    pub address: IssuerAddress,
}

/// Traction vehicle pulling the cargo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vehicle {
    pub plate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renavam: Option<String>,
    /// Tare weight in kilograms.
    pub tare_kg: u32,
    /// Load capacity in kilograms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_kg: Option<u32>,
}

/// Conductor (driver) assigned to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Driver {
    pub name: String,
    /// Natural-person tax ID, 11 digits.
    pub cpf: String,
}

/// A municipality along the route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Municipality {
    /// IBGE municipality code (7 digits).
    pub code: u32,
    pub name: String,
}

/// Declared route: loading municipalities in the origin state and the
/// federative units traversed in order. Unloading stops live on the
/// referenced cargo documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Route {
    pub loading: Vec<Municipality>,
    pub traversal_states: Vec<StateCode>,
}

/// Reference to a cargo fiscal document carried by this manifest, with
/// its unloading stop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CargoDocumentRef {
    /// 44-digit access key of the referenced document.
    pub access_key: String,
    pub unloading: Municipality,
}

/// Cargo insurance declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Insurance {
    pub insurer_name: String,
    pub insurer_cnpj: Cnpj,
    pub policy_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endorsement_number: Option<String>,
}

/// Pre-paid toll voucher declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TollVoucher {
    pub provider_cnpj: Cnpj,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer_cnpj: Option<Cnpj>,
    pub voucher_number: String,
    pub amount: Decimal,
}

/// The freight manifest: the central entity of the lifecycle. Number and
/// access key are absent on drafts and populated exactly once at
/// numbering; they never change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub issuer: Issuer,
    pub series: Series,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<DocNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<AccessKey>,
    pub emission: DateTime<Utc>,
    /// Emission type (1 = normal, 2 = contingency).
    pub emission_type: u8,
    pub origin_state: StateCode,
    pub destination_state: StateCode,
    pub vehicle: Vehicle,
    pub drivers: Vec<Driver>,
    pub route: Route,
    pub cargo_documents: Vec<CargoDocumentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurance: Option<Insurance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub toll_vouchers: Vec<TollVoucher>,
    /// Total declared cargo value.
    pub cargo_value: Decimal,
    /// Total gross weight in kilograms.
    pub gross_weight_kg: Decimal,
}

impl Manifest {
    /// The final unloading stop of the declared route: the last
    /// referenced document's unloading municipality. Used as the default
    /// closing location.
    pub fn final_stop(&self) -> Option<&Municipality> {
        self.cargo_documents.last().map(|d| &d.unloading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn sample_manifest() -> Manifest {
        Manifest {
            issuer: Issuer {
                cnpj: Cnpj::new("11222333000181").expect("cnpj"),
                state_registration: "123456789".to_string(),
                legal_name: "Transportadora Horizonte Ltda".to_string(),
                trade_name: None,
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
            series: Series::new(1).expect("series"),
            number: None,
            access_key: None,
            emission: Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
            emission_type: 1,
            origin_state: StateCode::from_uf("SP").expect("SP"),
            destination_state: StateCode::from_uf("RJ").expect("RJ"),
            vehicle: Vehicle {
                plate: "ABC1D23".to_string(),
                renavam: None,
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
                traversal_states: vec![],
            },
            cargo_documents: vec![CargoDocumentRef {
                access_key: "3".repeat(44),
                unloading: Municipality {
                    code: 3304557,
                    name: "Rio de Janeiro".to_string(),
                },
            }],
            insurance: None,
            toll_vouchers: vec![],
            cargo_value: dec!(150000.00),
            gross_weight_kg: dec!(12500.5),
        }
    }

    #[test]
    fn manifest_serde_roundtrip() {
        let m = sample_manifest();
        let json = serde_json::to_string(&m).expect("serialize");
        let back: Manifest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, m);
    }

    #[test]
    fn absent_optionals_are_omitted() {
        let m = sample_manifest();
        let json = serde_json::to_string(&m).expect("serialize");
        assert!(!json.contains("trade_name"));
        assert!(!json.contains("insurance"));
        assert!(!json.contains("toll_vouchers"));
    }

    #[test]
    fn final_stop_is_last_unloading() {
        let m = sample_manifest();
        assert_eq!(m.final_stop().map(|s| s.code), Some(3304557));
    }
}
