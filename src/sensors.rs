//! Sensor registry, trust sets and telemetry publication
//!
//! Sensors declare themselves once from their certified position, are
//! switched on and off by administrators of the owning organization, and
//! publish readings under simple keys:
//!
//! ```text
//! "SmartData" + ownerMsp + sensorId + padded(timestamp)
//! ```
//!
//! Each organization keeps its own trust set naming the sensors whose
//! telemetry it accepts as evidence.

use tracing::{debug, info};

use crate::codec;
use crate::config::MarketConfig;
use crate::error::{ChaincodeError, Result};
use crate::identity::{self, Identity, ATTR_ADMIN, ATTR_RADIUS, ATTR_SENSOR};
use crate::ledger::{compose_key, padded_timestamp, Ledger};
use crate::records::{ActiveSensor, SensorReading, StoredReading, TrustSet};
use crate::units::Unit;

pub const ACTIVE_SENSOR_TAG: &str = "ActiveSensor";
pub const TRUST_SET_TAG: &str = "MspTrustedSensors";
pub const READING_PREFIX: &str = "SmartData";

// =============================================================================
// KEYS
// =============================================================================

pub fn active_sensor_key(owner_msp: &str, sensor_id: &str) -> Result<String> {
    compose_key(ACTIVE_SENSOR_TAG, &[owner_msp, sensor_id])
}

pub fn trust_set_key(msp: &str) -> Result<String> {
    compose_key(TRUST_SET_TAG, &[msp])
}

pub fn reading_key(owner_msp: &str, sensor_id: &str, timestamp: u64) -> String {
    format!("{}{}{}{}", READING_PREFIX, owner_msp, sensor_id, padded_timestamp(timestamp))
}

/// Trust set entry for a sensor.
pub fn trust_entry(owner_msp: &str, sensor_id: &str) -> String {
    format!("{}{}", owner_msp, sensor_id)
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Register the calling sensor at its certified position.
pub fn declare_active(ledger: &mut dyn Ledger, caller: &dyn Identity) -> Result<ActiveSensor> {
    caller.require_role(ATTR_SENSOR)?;

    let owner_msp = caller.caller_msp().to_string();
    let sensor_id = caller.caller_id().to_string();
    let key = active_sensor_key(&owner_msp, &sensor_id)?;

    if ledger.get(&key)?.is_some() {
        return Err(ChaincodeError::SensorAlreadyActive { owner_msp, sensor_id });
    }

    let position = identity::position(caller)?;
    let radius_raw = caller.attribute(ATTR_RADIUS).ok_or_else(|| {
        ChaincodeError::InvalidArgument(format!("missing attribute {}", ATTR_RADIUS))
    })?;
    let radius: f64 = radius_raw.trim().parse().map_err(|e| {
        ChaincodeError::InvalidArgument(format!("attribute {}={:?}: {}", ATTR_RADIUS, radius_raw, e))
    })?;
    if !radius.is_finite() || radius < 0.0 {
        return Err(ChaincodeError::InvalidArgument(format!(
            "influence radius must be a non-negative number, got {}",
            radius
        )));
    }

    let sensor = ActiveSensor {
        owner_msp,
        sensor_id,
        active: true,
        x: position.x,
        y: position.y,
        z: position.z,
        radius,
    };
    codec::store(ledger, &key, &sensor)?;

    info!(
        sensor = %sensor.asset_id(),
        x = sensor.x,
        y = sensor.y,
        radius = sensor.radius,
        "Sensor declared active"
    );
    Ok(sensor)
}

/// Enable or disable sensors of the caller's organization.
pub fn set_sensors_active(
    ledger: &mut dyn Ledger,
    caller: &dyn Identity,
    sensor_ids: &[String],
    active: bool,
) -> Result<usize> {
    caller.require_role(ATTR_ADMIN)?;
    if sensor_ids.is_empty() {
        return Err(ChaincodeError::InvalidArgument(
            "at least one sensor id is required".to_string(),
        ));
    }

    let msp = caller.caller_msp();
    for sensor_id in sensor_ids {
        let key = active_sensor_key(msp, sensor_id)?;
        let mut sensor: ActiveSensor =
            codec::load(ledger, &key)?.ok_or_else(|| ChaincodeError::NotRegistered {
                what: "sensor",
                key: trust_entry(msp, sensor_id),
            })?;
        sensor.active = active;
        codec::store(ledger, &key, &sensor)?;
    }

    info!(msp = %msp, count = sensor_ids.len(), active, "Sensors toggled");
    Ok(sensor_ids.len())
}

/// Active sensors in key order, optionally restricted to one organization.
pub fn active_sensors(ledger: &dyn Ledger, owner_msp: Option<&str>) -> Result<Vec<ActiveSensor>> {
    let segments: Vec<&str> = owner_msp.into_iter().collect();
    let entries = ledger.partial_scan(ACTIVE_SENSOR_TAG, &segments)?;
    Ok(codec::decode_all::<ActiveSensor>(entries)?
        .into_iter()
        .map(|(_, sensor)| sensor)
        .filter(|sensor| sensor.active)
        .collect())
}

/// Ids of the caller organization's active sensors.
pub fn list_active_sensors(ledger: &dyn Ledger, caller: &dyn Identity) -> Result<Vec<String>> {
    caller.require_role(ATTR_ADMIN)?;
    Ok(active_sensors(ledger, Some(caller.caller_msp()))?
        .into_iter()
        .map(|sensor| sensor.sensor_id)
        .collect())
}

// =============================================================================
// TRUST SETS
// =============================================================================

pub fn load_trust_set(ledger: &dyn Ledger, msp: &str) -> Result<TrustSet> {
    Ok(codec::load(ledger, &trust_set_key(msp)?)?.unwrap_or_default())
}

/// Mark sensors trusted or distrusted by the caller's organization.
///
/// Every listed entry is written, so a later distrust always clears an
/// earlier trust.
pub fn set_trust(
    ledger: &mut dyn Ledger,
    caller: &dyn Identity,
    owner_msps: &[String],
    sensor_ids: &[String],
    trusted: bool,
) -> Result<usize> {
    caller.require_role(ATTR_ADMIN)?;
    if owner_msps.is_empty() || owner_msps.len() != sensor_ids.len() {
        return Err(ChaincodeError::InvalidArgument(format!(
            "owner and sensor lists must be non-empty and of equal length ({} vs {})",
            owner_msps.len(),
            sensor_ids.len()
        )));
    }

    let msp = caller.caller_msp();
    let mut trust_set = load_trust_set(ledger, msp)?;
    for (owner, sensor_id) in owner_msps.iter().zip(sensor_ids) {
        trust_set.insert(trust_entry(owner, sensor_id), trusted);
    }
    codec::store(ledger, &trust_set_key(msp)?, &trust_set)?;

    info!(msp = %msp, count = sensor_ids.len(), trusted, "Trust set updated");
    Ok(sensor_ids.len())
}

/// Entries the caller's organization currently trusts.
pub fn trusted_sensors(ledger: &dyn Ledger, caller: &dyn Identity) -> Result<Vec<String>> {
    caller.require_role(ATTR_ADMIN)?;
    Ok(load_trust_set(ledger, caller.caller_msp())?
        .into_iter()
        .filter_map(|(entry, trusted)| trusted.then_some(entry))
        .collect())
}

// =============================================================================
// TELEMETRY
// =============================================================================

/// Fields of a reading as submitted by a sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingInput {
    pub version: i32,
    pub unit: u32,
    pub timestamp: u64,
    pub value: f64,
    pub error_measure: u32,
    pub confidence: u32,
    pub device: u32,
}

/// Store a reading from the calling sensor.
pub fn publish_reading(
    ledger: &mut dyn Ledger,
    caller: &dyn Identity,
    config: &MarketConfig,
    now: u64,
    input: ReadingInput,
) -> Result<SensorReading> {
    if now > input.timestamp.saturating_add(config.accepted_delay_secs) {
        return Err(ChaincodeError::StaleTimestamp {
            timestamp: input.timestamp,
            now,
            accepted_delay_secs: config.accepted_delay_secs,
        });
    }
    caller.require_role(ATTR_SENSOR)?;
    // NUM < 2 values are bit patterns and may be any float, NaN included.
    if Unit::new(input.unit).num() >= 2 && !input.value.is_finite() {
        return Err(ChaincodeError::InvalidArgument(format!(
            "reading value {} is not finite",
            input.value
        )));
    }

    let owner_msp = caller.caller_msp().to_string();
    let sensor_id = caller.caller_id().to_string();
    let sensor: Option<ActiveSensor> =
        codec::load(ledger, &active_sensor_key(&owner_msp, &sensor_id)?)?;
    if !sensor.map(|s| s.active).unwrap_or(false) {
        return Err(ChaincodeError::SensorNotActive { owner_msp, sensor_id });
    }

    let key = reading_key(&owner_msp, &sensor_id, input.timestamp);
    if ledger.get(&key)?.is_some() {
        return Err(ChaincodeError::InvalidArgument(format!(
            "sensor {}{} already published a reading at {}",
            owner_msp, sensor_id, input.timestamp
        )));
    }

    let reading = SensorReading {
        owner_msp,
        sensor_id,
        version: input.version,
        unit: input.unit,
        timestamp: input.timestamp,
        value: input.value,
        error_measure: input.error_measure,
        confidence: input.confidence,
        device: input.device,
    };
    codec::store(ledger, &key, &StoredReading::try_from(&reading)?)?;

    debug!(
        sensor = %reading.asset_id(),
        timestamp = reading.timestamp,
        unit = reading.unit,
        "Reading published"
    );
    Ok(reading)
}

/// Readings of one sensor with `t0 <= timestamp < t1`, in time order.
pub fn readings_in_window(
    ledger: &dyn Ledger,
    owner_msp: &str,
    sensor_id: &str,
    t0: u64,
    t1: u64,
) -> Result<Vec<SensorReading>> {
    let start = reading_key(owner_msp, sensor_id, t0);
    let end = reading_key(owner_msp, sensor_id, t1);
    decode_readings(ledger.range_scan(&start, &end)?, owner_msp, sensor_id)
}

/// Every reading of the listed sensors of the caller's organization.
pub fn sensor_readings(
    ledger: &dyn Ledger,
    caller: &dyn Identity,
    sensor_ids: &[String],
) -> Result<Vec<SensorReading>> {
    caller.require_role(ATTR_ADMIN)?;
    let msp = caller.caller_msp();
    let mut readings = Vec::new();
    for sensor_id in sensor_ids {
        let prefix = format!("{}{}{}", READING_PREFIX, msp, sensor_id);
        let end = format!("{}{}", prefix, char::MAX);
        readings.extend(decode_readings(ledger.range_scan(&prefix, &end)?, msp, sensor_id)?);
    }
    Ok(readings)
}

/// Decode scanned readings, dropping keys of other sensors whose id merely
/// extends this one (`s1` vs `s10`).
fn decode_readings(
    entries: Vec<(String, Vec<u8>)>,
    owner_msp: &str,
    sensor_id: &str,
) -> Result<Vec<SensorReading>> {
    Ok(codec::decode_all::<StoredReading>(entries)?
        .into_iter()
        .map(|(_, stored)| SensorReading::from(stored))
        .filter(|r| r.owner_msp == owner_msp && r.sensor_id == sensor_id)
        .collect())
}
