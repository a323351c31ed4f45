//! Telemetry Aggregator
//!
//! Turns the readings of nearby, trusted sensors into one mean physical
//! quantity for a claim window.
//!
//! # Pipeline
//!
//! 1. Keep active sensors whose influence radius covers the generator (x/y).
//! 2. Keep sensors the evaluating organization trusts.
//! 3. Fetch their readings in `[t0, t1)`.
//! 4. Per sensor, average the readings whose unit matches the quantity,
//!    after the NUM-field reinterpretation.
//! 5. Fold sensor means with the incremental mean
//!    `mean = (mean * n + next) / (n + 1)`, one sensor at a time in sensor
//!    key order. The fold order and formula fix the rounding; executors must
//!    not substitute a bulk sum.

use tracing::debug;

use crate::error::Result;
use crate::ledger::Ledger;
use crate::records::{ActiveSensor, EnergyType, SensorReading, TrustSet};
use crate::sensors;
use crate::units::{Quantity, Unit};

/// Quantity whose readings bound generation of an energy type.
pub fn expected_quantity(energy_type: EnergyType) -> Option<Quantity> {
    match energy_type {
        EnergyType::Solar => Some(Quantity::Candela),
        EnergyType::Wind => Some(Quantity::MetersPerSecond),
        _ => None,
    }
}

/// Readings of one selected sensor within the claim window.
#[derive(Debug, Clone)]
pub struct SensorEvidence {
    pub asset_id: String,
    pub readings: Vec<SensorReading>,
}

/// Aggregate for one quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// `None` when no sensor contributed a matching reading.
    pub mean: Option<f64>,
    pub contributing_sensors: usize,
}

/// Sensors covering `(x, y)` and trusted in `trust_set`, in input order.
pub fn select_sensors<'a>(
    sensors: &'a [ActiveSensor],
    x: i64,
    y: i64,
    trust_set: &TrustSet,
) -> Vec<&'a ActiveSensor> {
    sensors
        .iter()
        .filter(|sensor| sensor.active && sensor.covers(x, y))
        .filter(|sensor| trust_set.get(&sensor.asset_id()).copied().unwrap_or(false))
        .collect()
}

/// Fetch window readings for each selected sensor.
pub fn collect_evidence(
    ledger: &dyn Ledger,
    selected: &[&ActiveSensor],
    t0: u64,
    t1: u64,
) -> Result<Vec<SensorEvidence>> {
    let mut evidence = Vec::with_capacity(selected.len());
    for sensor in selected {
        let readings =
            sensors::readings_in_window(ledger, &sensor.owner_msp, &sensor.sensor_id, t0, t1)?;
        evidence.push(SensorEvidence {
            asset_id: sensor.asset_id(),
            readings,
        });
    }
    Ok(evidence)
}

/// Mean of one sensor's readings of `quantity`, or `None` if it has none.
pub fn sensor_mean(readings: &[SensorReading], quantity: Quantity) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for reading in readings {
        let unit = Unit::new(reading.unit);
        match unit.classify() {
            Ok(found) if found == quantity => {
                sum += unit.numeric_value(reading.value);
                count += 1;
            }
            Ok(found) => debug!(
                sensor = %reading.asset_id(),
                timestamp = reading.timestamp,
                ?found,
                ?quantity,
                "Reading measures another quantity"
            ),
            Err(rejection) => debug!(
                sensor = %reading.asset_id(),
                timestamp = reading.timestamp,
                unit = reading.unit,
                %rejection,
                "Reading unit not usable"
            ),
        }
    }
    (count > 0).then(|| sum / count as f64)
}

/// Incremental mean over sensor means.
pub fn running_mean(means: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut mean = 0.0;
    let mut n = 0.0;
    for next in means {
        mean = (mean * n + next) / (n + 1.0);
        n += 1.0;
    }
    (n > 0.0).then_some(mean)
}

/// Cross-sensor mean of `quantity` over the collected evidence.
pub fn aggregate(evidence: &[SensorEvidence], quantity: Quantity) -> Aggregate {
    let means: Vec<f64> = evidence
        .iter()
        .filter_map(|sensor| sensor_mean(&sensor.readings, quantity))
        .collect();
    Aggregate {
        mean: running_mean(means.iter().copied()),
        contributing_sensors: means.len(),
    }
}
