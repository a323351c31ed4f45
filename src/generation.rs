//! Sellers and the Generation Validator
//!
//! A seller is registered by an administrator together with the smart meter
//! that reports its generation. The meter then claims energy per type for a
//! window `[t0, t1)`; the claim is accepted only if every claimed quantity is
//! within the bound implied by nearby trusted telemetry:
//!
//! ```text
//! bound(type) = aggregate_mean(type) * installed_units(type) * conversion(type)
//! ```
//!
//! Accepted claims raise the seller's sellable balance and move
//! `last_generation_timestamp` to `t1`, so no interval is claimed twice.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::MarketConfig;
use crate::error::{ChaincodeError, Result};
use crate::identity::{self, Identity, ATTR_ADMIN, ATTR_SENSOR};
use crate::ledger::{compose_key, Ledger};
use crate::records::{EnergyType, MeterSeller, SellerInfo};
use crate::sensors;
use crate::telemetry;

pub const SELLER_INFO_TAG: &str = "SellerInfo";
pub const METER_SELLER_TAG: &str = "MeterSeller";

pub fn seller_key(seller_msp: &str, seller_id: &str) -> Result<String> {
    compose_key(SELLER_INFO_TAG, &[seller_msp, seller_id])
}

pub fn meter_key(meter_msp: &str, meter_id: &str) -> Result<String> {
    compose_key(METER_SELLER_TAG, &[meter_msp, meter_id])
}

// =============================================================================
// SELLER REGISTRY
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SellerRegistration {
    pub seller_id: String,
    pub meter_msp: String,
    pub meter_id: String,
    pub wind_turbines: u64,
    pub solar_panels: u64,
}

/// Register a seller of the caller's organization and its meter.
pub fn register_seller(
    ledger: &mut dyn Ledger,
    caller: &dyn Identity,
    config: &MarketConfig,
    now: u64,
    tx_timestamp: u64,
    registration: SellerRegistration,
) -> Result<SellerInfo> {
    caller.require_role(ATTR_ADMIN)?;

    if now.saturating_sub(tx_timestamp) > config.accepted_delay_secs {
        return Err(ChaincodeError::StaleTimestamp {
            timestamp: tx_timestamp,
            now,
            accepted_delay_secs: config.accepted_delay_secs,
        });
    }

    let seller_msp = caller.caller_msp().to_string();
    let key = seller_key(&seller_msp, &registration.seller_id)?;
    if ledger.get(&key)?.is_some() {
        return Err(ChaincodeError::AlreadyRegistered {
            what: "seller",
            key: format!("{}{}", seller_msp, registration.seller_id),
        });
    }

    let pointer_key = meter_key(&registration.meter_msp, &registration.meter_id)?;
    if ledger.get(&pointer_key)?.is_some() {
        return Err(ChaincodeError::AlreadyRegistered {
            what: "meter",
            key: format!("{}{}", registration.meter_msp, registration.meter_id),
        });
    }

    let mut sellable = BTreeMap::new();
    sellable.insert(EnergyType::Solar, 0.0);

    let seller = SellerInfo {
        seller_msp: seller_msp.clone(),
        seller_id: registration.seller_id.clone(),
        meter_msp: registration.meter_msp,
        meter_id: registration.meter_id,
        wind_turbines: registration.wind_turbines,
        solar_panels: registration.solar_panels,
        sellable,
        last_generation_timestamp: tx_timestamp,
        last_bid_sequence: 0,
    };
    codec::store(ledger, &key, &seller)?;
    codec::store(
        ledger,
        &pointer_key,
        &MeterSeller {
            seller_msp,
            seller_id: registration.seller_id,
        },
    )?;

    info!(
        seller = %format!("{}{}", seller.seller_msp, seller.seller_id),
        meter = %format!("{}{}", seller.meter_msp, seller.meter_id),
        "Seller registered"
    );
    Ok(seller)
}

pub fn load_seller(ledger: &dyn Ledger, seller_msp: &str, seller_id: &str) -> Result<SellerInfo> {
    codec::load(ledger, &seller_key(seller_msp, seller_id)?)?.ok_or_else(|| {
        ChaincodeError::NotRegistered {
            what: "seller",
            key: format!("{}{}", seller_msp, seller_id),
        }
    })
}

pub fn store_seller(ledger: &mut dyn Ledger, seller: &SellerInfo) -> Result<()> {
    codec::store(ledger, &seller_key(&seller.seller_msp, &seller.seller_id)?, seller)
}

/// Resolve the seller a meter reports for.
pub fn seller_for_meter(ledger: &dyn Ledger, meter_msp: &str, meter_id: &str) -> Result<SellerInfo> {
    let pointer: MeterSeller = codec::load(ledger, &meter_key(meter_msp, meter_id)?)?
        .ok_or_else(|| ChaincodeError::NotRegistered {
            what: "meter",
            key: format!("{}{}", meter_msp, meter_id),
        })?;
    load_seller(ledger, &pointer.seller_msp, &pointer.seller_id)
}

// =============================================================================
// GENERATION VALIDATOR
// =============================================================================

/// Energy claimed by a meter for `[t0, t1)`, keyed by energy type name.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationClaim {
    pub t0: u64,
    pub t1: u64,
    pub claims: BTreeMap<String, f64>,
}

/// Accepted claim with the bounds it was checked against.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub seller_msp: String,
    pub seller_id: String,
    pub accepted: BTreeMap<EnergyType, f64>,
    pub bounds: BTreeMap<EnergyType, f64>,
    pub last_generation_timestamp: u64,
}

fn parse_claims(claims: &BTreeMap<String, f64>) -> Result<Vec<(EnergyType, f64)>> {
    let mut parsed = Vec::with_capacity(claims.len());
    for (name, &kwh) in claims {
        let energy_type: EnergyType = name.parse()?;
        if !energy_type.has_generation_model() {
            return Err(ChaincodeError::UnsupportedEnergyType {
                energy_type: name.clone(),
                known: true,
            });
        }
        parsed.push((energy_type, kwh));
    }
    Ok(parsed)
}

fn conversion(config: &MarketConfig, energy_type: EnergyType) -> f64 {
    match energy_type {
        EnergyType::Solar => config.solar_conversion,
        EnergyType::Wind => config.wind_conversion,
        _ => 0.0,
    }
}

/// Validate a generation claim from the calling meter and credit the seller.
pub fn publish_generation(
    ledger: &mut dyn Ledger,
    caller: &dyn Identity,
    config: &MarketConfig,
    now: u64,
    claim: &GenerationClaim,
) -> Result<GenerationOutcome> {
    caller.require_role(ATTR_SENSOR)?;

    let GenerationClaim { t0, t1, .. } = *claim;
    if t0 >= t1 {
        return Err(ChaincodeError::InvalidArgument(format!(
            "window end {} must be greater than start {}",
            t1, t0
        )));
    }
    if t1 > now.saturating_add(config.accepted_clock_drift_secs) {
        return Err(ChaincodeError::FutureTimestamp {
            timestamp: t1,
            now,
            accepted_drift_secs: config.accepted_clock_drift_secs,
        });
    }

    let mut seller = seller_for_meter(ledger, caller.caller_msp(), caller.caller_id())?;

    if t0 < seller.last_generation_timestamp || t1 < seller.last_generation_timestamp {
        return Err(ChaincodeError::DuplicateGenerationWindow {
            t0,
            t1,
            last_generation_timestamp: seller.last_generation_timestamp,
        });
    }

    if claim.claims.is_empty() {
        return Err(ChaincodeError::InvalidArgument("claim names no energy type".to_string()));
    }
    for (name, &kwh) in &claim.claims {
        if !(kwh > 0.0) || !kwh.is_finite() {
            return Err(ChaincodeError::InvalidArgument(format!(
                "generated {} energy must be greater than 0, got {}",
                name, kwh
            )));
        }
    }
    let claims = parse_claims(&claim.claims)?;

    let position = identity::position(caller)?;
    let active = sensors::active_sensors(ledger, None)?;
    let trust_set = sensors::load_trust_set(ledger, &config.peer_msp)?;
    let selected = telemetry::select_sensors(&active, position.x, position.y, &trust_set);
    let evidence = telemetry::collect_evidence(ledger, &selected, t0, t1)?;

    debug!(
        active = active.len(),
        selected = selected.len(),
        peer_msp = %config.peer_msp,
        "Telemetry evidence collected"
    );

    let mut bounds = BTreeMap::new();
    for &(energy_type, kwh) in &claims {
        let Some(quantity) = telemetry::expected_quantity(energy_type) else {
            return Err(ChaincodeError::UnsupportedEnergyType {
                energy_type: energy_type.to_string(),
                known: true,
            });
        };
        let aggregate = telemetry::aggregate(&evidence, quantity);

        let Some(mean) = aggregate.mean else {
            warn!(energy_type = %energy_type, "No corroborating telemetry for claim");
            return Err(ChaincodeError::GenerationBoundExceeded {
                energy_type: energy_type.to_string(),
                claimed_kwh: kwh,
                bound_kwh: 0.0,
                contributing_sensors: 0,
            });
        };

        let bound =
            mean * seller.installed_units(energy_type) as f64 * conversion(config, energy_type);
        if kwh > bound {
            return Err(ChaincodeError::GenerationBoundExceeded {
                energy_type: energy_type.to_string(),
                claimed_kwh: kwh,
                bound_kwh: bound,
                contributing_sensors: aggregate.contributing_sensors,
            });
        }
        bounds.insert(energy_type, bound);
    }

    let mut accepted = BTreeMap::new();
    for (energy_type, kwh) in claims {
        *seller.sellable.entry(energy_type).or_insert(0.0) += kwh;
        accepted.insert(energy_type, kwh);
    }
    seller.last_generation_timestamp = t1;
    store_seller(ledger, &seller)?;

    info!(
        seller = %format!("{}{}", seller.seller_msp, seller.seller_id),
        t0,
        t1,
        ?accepted,
        "Generation accepted"
    );

    Ok(GenerationOutcome {
        seller_msp: seller.seller_msp,
        seller_id: seller.seller_id,
        accepted,
        bounds,
        last_generation_timestamp: t1,
    })
}
