//! Physical unit descriptors
//!
//! Each sensor reading carries a 32-bit unit word:
//!
//! ```text
//! bit 31     SI   1 = SI-derived unit
//! bits 30-29 NUM  numeric representation class
//! bits 28-27 MOD  0 = directly described (not scaled/derived)
//! bits 26-0  unit-type signature
//! ```
//!
//! Only SI, MOD=0 readings with a known signature are usable. When NUM < 2
//! the reading's value was transported as the bit pattern of an integer, so
//! its IEEE-754 bits are reinterpreted as `u64` before aggregation.

pub const SI_SHIFT: u32 = 31;
pub const NUM_SHIFT: u32 = 29;
pub const MOD_SHIFT: u32 = 27;
pub const FIELD_MASK: u32 = 0b11;
pub const SIGNATURE_MASK: u32 = 0x07FF_FFFF;

/// Full descriptor for meters per second.
pub const METERS_PER_SECOND: u32 = 0xE496_3924;
/// Full descriptor for candela.
pub const CANDELA: u32 = 0xE492_4925;

const METERS_PER_SECOND_SIGNATURE: u32 = METERS_PER_SECOND & SIGNATURE_MASK;
const CANDELA_SIGNATURE: u32 = CANDELA & SIGNATURE_MASK;

/// Physical quantity a usable descriptor measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    /// Wind speed.
    MetersPerSecond,
    /// Luminous intensity, the solar irradiance proxy.
    Candela,
}

/// Why a descriptor was not usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitRejection {
    NotSi,
    NotDirectlyDescribed,
    UnknownSignature,
}

impl std::fmt::Display for UnitRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSi => write!(f, "not an SI unit"),
            Self::NotDirectlyDescribed => write!(f, "not directly described"),
            Self::UnknownSignature => write!(f, "unknown unit signature"),
        }
    }
}

/// Decoded unit descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit {
    pub raw: u32,
}

impl Unit {
    pub fn new(raw: u32) -> Self {
        Self { raw }
    }

    pub fn si(&self) -> bool {
        self.raw >> SI_SHIFT == 1
    }

    pub fn num(&self) -> u32 {
        (self.raw >> NUM_SHIFT) & FIELD_MASK
    }

    pub fn modifier(&self) -> u32 {
        (self.raw >> MOD_SHIFT) & FIELD_MASK
    }

    pub fn signature(&self) -> u32 {
        self.raw & SIGNATURE_MASK
    }

    /// Classify the descriptor. NUM never affects the outcome.
    pub fn classify(&self) -> Result<Quantity, UnitRejection> {
        if !self.si() {
            return Err(UnitRejection::NotSi);
        }
        if self.modifier() != 0 {
            return Err(UnitRejection::NotDirectlyDescribed);
        }
        match self.signature() {
            METERS_PER_SECOND_SIGNATURE => Ok(Quantity::MetersPerSecond),
            CANDELA_SIGNATURE => Ok(Quantity::Candela),
            _ => Err(UnitRejection::UnknownSignature),
        }
    }

    /// Value to aggregate for a reading carrying this descriptor.
    pub fn numeric_value(&self, value: f64) -> f64 {
        if self.num() < 2 {
            value.to_bits() as f64
        } else {
            value
        }
    }
}
