//! Contract error kinds.
//!
//! Every failure an operation can report is one variant of [`ChaincodeError`].
//! None of them is fatal: the invoking transaction is simply not committed.

/// Failure reported to the caller of a contract operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChaincodeError {
    /// Reading or registration timestamp falls outside the accepted delay.
    StaleTimestamp {
        timestamp: u64,
        now: u64,
        accepted_delay_secs: u64,
    },
    /// Generation window ends beyond ledger time plus the accepted drift.
    FutureTimestamp {
        timestamp: u64,
        now: u64,
        accepted_drift_secs: u64,
    },
    /// The sensor exists but is disabled, or was never declared.
    SensorNotActive { owner_msp: String, sensor_id: String },
    /// The sensor already declared itself once.
    SensorAlreadyActive { owner_msp: String, sensor_id: String },
    /// Attribute assertion on the caller identity failed.
    UnauthorizedCaller {
        attribute: String,
        expected: String,
        actual: Option<String>,
    },
    /// Unknown energy type, or a known one without a generation model.
    UnsupportedEnergyType { energy_type: String, known: bool },
    /// Claimed generation is above what the trusted telemetry allows.
    GenerationBoundExceeded {
        energy_type: String,
        claimed_kwh: f64,
        bound_kwh: f64,
        contributing_sensors: usize,
    },
    /// Claim window starts or ends before already settled generation.
    DuplicateGenerationWindow {
        t0: u64,
        t1: u64,
        last_generation_timestamp: u64,
    },
    /// Seller balance for the energy type cannot cover the sell bid.
    InsufficientSellableBalance {
        energy_type: String,
        available_kwh: f64,
        requested_kwh: f64,
    },
    /// A bid, or transactions derived from one, could not be found.
    BidNotFound { key: String },
    /// Token does not match the stored bid, or was already used.
    TokenMismatchOrReused { payment_msp: String, token: String },
    /// Payment company cover is below the bid's total price.
    PaymentCoverageExceeded {
        token: String,
        total_price: f64,
        max_cover: f64,
    },
    /// A persisted record failed to decode.
    MalformedRecord { key: String, reason: String },
    /// Argument failed validation before touching the ledger.
    InvalidArgument(String),
    /// Seller, meter or sensor is not registered.
    NotRegistered { what: &'static str, key: String },
    /// Seller or meter is already registered.
    AlreadyRegistered { what: &'static str, key: String },
    /// Ledger backend failure.
    Ledger(String),
}

impl ChaincodeError {
    /// Stable tag for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StaleTimestamp { .. } => "StaleTimestamp",
            Self::FutureTimestamp { .. } => "FutureTimestamp",
            Self::SensorNotActive { .. } => "SensorNotActive",
            Self::SensorAlreadyActive { .. } => "SensorAlreadyActive",
            Self::UnauthorizedCaller { .. } => "UnauthorizedCaller",
            Self::UnsupportedEnergyType { .. } => "UnsupportedEnergyType",
            Self::GenerationBoundExceeded { .. } => "GenerationBoundExceeded",
            Self::DuplicateGenerationWindow { .. } => "DuplicateGenerationWindow",
            Self::InsufficientSellableBalance { .. } => "InsufficientSellableBalance",
            Self::BidNotFound { .. } => "BidNotFound",
            Self::TokenMismatchOrReused { .. } => "TokenMismatchOrReused",
            Self::PaymentCoverageExceeded { .. } => "PaymentCoverageExceeded",
            Self::MalformedRecord { .. } => "MalformedRecord",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::NotRegistered { .. } => "NotRegistered",
            Self::AlreadyRegistered { .. } => "AlreadyRegistered",
            Self::Ledger(_) => "Ledger",
        }
    }
}

impl std::fmt::Display for ChaincodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaleTimestamp { timestamp, now, accepted_delay_secs } => write!(
                f,
                "Timestamp {} is too old at ledger time {} (accepted delay {}s)",
                timestamp, now, accepted_delay_secs
            ),
            Self::FutureTimestamp { timestamp, now, accepted_drift_secs } => write!(
                f,
                "Timestamp {} is ahead of ledger time {} by more than {}s",
                timestamp, now, accepted_drift_secs
            ),
            Self::SensorNotActive { owner_msp, sensor_id } => {
                write!(f, "Sensor {}{} is not active", owner_msp, sensor_id)
            }
            Self::SensorAlreadyActive { owner_msp, sensor_id } => {
                write!(f, "Sensor {}{} is already active", owner_msp, sensor_id)
            }
            Self::UnauthorizedCaller { attribute, expected, actual } => write!(
                f,
                "Caller attribute {} must be {:?}, found {:?}",
                attribute, expected, actual
            ),
            Self::UnsupportedEnergyType { energy_type, known: true } => {
                write!(f, "Energy type {} is not implemented", energy_type)
            }
            Self::UnsupportedEnergyType { energy_type, known: false } => {
                write!(f, "{} is an invalid energy type", energy_type)
            }
            Self::GenerationBoundExceeded {
                energy_type,
                contributing_sensors: 0,
                ..
            } => write!(
                f,
                "Generation of {} energy rejected: no corroborating telemetry from trusted sensors",
                energy_type
            ),
            Self::GenerationBoundExceeded {
                energy_type,
                claimed_kwh,
                bound_kwh,
                contributing_sensors,
            } => write!(
                f,
                "Generation of {:.3} kWh of {} energy exceeds bound {:.3} kWh ({} sensors)",
                claimed_kwh, energy_type, bound_kwh, contributing_sensors
            ),
            Self::DuplicateGenerationWindow { t0, t1, last_generation_timestamp } => write!(
                f,
                "Generation window [{}, {}) overlaps already settled generation up to {}",
                t0, t1, last_generation_timestamp
            ),
            Self::InsufficientSellableBalance { energy_type, available_kwh, requested_kwh } => {
                write!(
                    f,
                    "Seller has {:.3} kWh of {} energy, bid requests {:.3} kWh",
                    available_kwh, energy_type, requested_kwh
                )
            }
            Self::BidNotFound { key } => write!(f, "Bid not found: {}", key.escape_debug()),
            Self::TokenMismatchOrReused { payment_msp, token } => write!(
                f,
                "Token {} of payment company {} does not match or was already used",
                token, payment_msp
            ),
            Self::PaymentCoverageExceeded { token, total_price, max_cover } => write!(
                f,
                "Bid of token {} costs {:.3}, above payment cover {:.3}",
                token, total_price, max_cover
            ),
            Self::MalformedRecord { key, reason } => {
                write!(f, "Malformed record at {}: {}", key.escape_debug(), reason)
            }
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Self::NotRegistered { what, key } => {
                write!(f, "{} {} is not registered", what, key.escape_debug())
            }
            Self::AlreadyRegistered { what, key } => {
                write!(f, "{} {} is already registered", what, key.escape_debug())
            }
            Self::Ledger(msg) => write!(f, "Ledger error: {}", msg),
        }
    }
}

impl std::error::Error for ChaincodeError {}

impl From<anyhow::Error> for ChaincodeError {
    fn from(err: anyhow::Error) -> Self {
        Self::Ledger(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, ChaincodeError>;
