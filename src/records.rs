//! Ledger records
//!
//! Everything the contract persists. Types here are the canonical in-memory
//! shapes; [`StoredReading`] is the one record whose stored integer widths
//! are narrower than its in-memory form.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ChaincodeError, Result};

// =============================================================================
// ENERGY TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyType {
    Solar,
    Wind,
    Tidal,
    Hydro,
    Geothermal,
}

impl EnergyType {
    pub const ALL: [EnergyType; 5] = [
        EnergyType::Solar,
        EnergyType::Wind,
        EnergyType::Tidal,
        EnergyType::Hydro,
        EnergyType::Geothermal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Solar => "solar",
            Self::Wind => "wind",
            Self::Tidal => "tidal",
            Self::Hydro => "hydro",
            Self::Geothermal => "geothermal",
        }
    }

    /// Whether generation claims of this type can be validated.
    pub fn has_generation_model(&self) -> bool {
        matches!(self, Self::Solar | Self::Wind)
    }
}

impl std::fmt::Display for EnergyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EnergyType {
    type Err = ChaincodeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ChaincodeError::UnsupportedEnergyType {
                energy_type: s.to_string(),
                known: false,
            })
    }
}

// =============================================================================
// SENSORS
// =============================================================================

/// A telemetry reading as the contract works with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub owner_msp: String,
    pub sensor_id: String,
    pub version: i32,
    pub unit: u32,
    pub timestamp: u64,
    pub value: f64,
    pub error_measure: u32,
    pub confidence: u32,
    pub device: u32,
}

impl SensorReading {
    /// `ownerMsp + sensorId`, the asset id used by trust sets.
    pub fn asset_id(&self) -> String {
        format!("{}{}", self.owner_msp, self.sensor_id)
    }
}

/// Persisted form of a [`SensorReading`] (record version 1).
///
/// The value is kept as its IEEE-754 bits so bit-pattern readings, including
/// ones that are NaN or infinite as floats, survive storage unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub owner_msp: String,
    pub sensor_id: String,
    pub version: i8,
    pub unit: u32,
    pub timestamp: u64,
    pub value_bits: u64,
    pub error: u8,
    pub confidence: u8,
    pub device: u32,
}

impl TryFrom<&SensorReading> for StoredReading {
    type Error = ChaincodeError;

    fn try_from(reading: &SensorReading) -> Result<Self> {
        let narrow = |field: &str, value: i64| {
            ChaincodeError::InvalidArgument(format!("{} {} does not fit its stored width", field, value))
        };
        Ok(Self {
            owner_msp: reading.owner_msp.clone(),
            sensor_id: reading.sensor_id.clone(),
            version: i8::try_from(reading.version)
                .map_err(|_| narrow("version", reading.version as i64))?,
            unit: reading.unit,
            timestamp: reading.timestamp,
            value_bits: reading.value.to_bits(),
            error: u8::try_from(reading.error_measure)
                .map_err(|_| narrow("error measure", reading.error_measure as i64))?,
            confidence: u8::try_from(reading.confidence)
                .map_err(|_| narrow("confidence", reading.confidence as i64))?,
            device: reading.device,
        })
    }
}

impl From<StoredReading> for SensorReading {
    fn from(stored: StoredReading) -> Self {
        Self {
            owner_msp: stored.owner_msp,
            sensor_id: stored.sensor_id,
            version: stored.version.into(),
            unit: stored.unit,
            timestamp: stored.timestamp,
            value: f64::from_bits(stored.value_bits),
            error_measure: stored.error.into(),
            confidence: stored.confidence.into(),
            device: stored.device,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSensor {
    pub owner_msp: String,
    pub sensor_id: String,
    pub active: bool,
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub radius: f64,
}

impl ActiveSensor {
    pub fn asset_id(&self) -> String {
        format!("{}{}", self.owner_msp, self.sensor_id)
    }

    /// Planar (x/y) distance to a point.
    pub fn distance_to(&self, x: i64, y: i64) -> f64 {
        let dx = self.x as f64 - x as f64;
        let dy = self.y as f64 - y as f64;
        (dx.powi(2) + dy.powi(2)).sqrt()
    }

    pub fn covers(&self, x: i64, y: i64) -> bool {
        self.distance_to(x, y) <= self.radius
    }
}

/// Trust entries of one organization, keyed by sensor asset id.
pub type TrustSet = BTreeMap<String, bool>;

// =============================================================================
// SELLERS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerInfo {
    pub seller_msp: String,
    pub seller_id: String,
    pub meter_msp: String,
    pub meter_id: String,
    pub wind_turbines: u64,
    pub solar_panels: u64,
    pub sellable: BTreeMap<EnergyType, f64>,
    pub last_generation_timestamp: u64,
    pub last_bid_sequence: u64,
}

impl SellerInfo {
    pub fn sellable(&self, energy_type: EnergyType) -> f64 {
        self.sellable.get(&energy_type).copied().unwrap_or(0.0)
    }

    /// Installed units that drive the generation bound for a type.
    pub fn installed_units(&self, energy_type: EnergyType) -> u64 {
        match energy_type {
            EnergyType::Solar => self.solar_panels,
            EnergyType::Wind => self.wind_turbines,
            _ => 0,
        }
    }
}

/// Meter to seller pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterSeller {
    pub seller_msp: String,
    pub seller_id: String,
}

// =============================================================================
// BIDS & TRANSACTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellBid {
    pub seller_msp: String,
    pub seller_id: String,
    pub sequence: u64,
    pub quantity_kwh: f64,
    pub price_per_kwh: f64,
    pub energy_type: EnergyType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyBid {
    pub payment_msp: String,
    pub token: String,
    pub utility_msp: String,
    pub quantity_kwh: f64,
    pub price_per_kwh: f64,
    pub energy_type: EnergyType,
    pub validated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyTransaction {
    pub seller_msp: String,
    pub seller_id: String,
    pub sequence: u64,
    pub payment_msp: String,
    pub token: String,
    pub utility_msp: String,
    pub quantity_kwh: f64,
    pub price_per_kwh: f64,
    pub energy_type: EnergyType,
}

/// Payment company and token identifying one buy bid.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaymentToken {
    pub payment_msp: String,
    pub token: String,
}

/// Every buy bid that settled part of one sell bid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SellBidTransactions {
    pub tokens: Vec<PaymentToken>,
}
