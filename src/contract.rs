//! Contract entry point
//!
//! Every operation is a variant of the closed [`Operation`] enum and runs
//! through [`EnergyContract::invoke`]:
//!
//! 1. A [`Transaction`] overlay is opened over the ledger.
//! 2. The operation reads and writes through the overlay only.
//! 3. On success the resulting [`WriteSet`] is applied to the ledger and
//!    returned in the [`Response`] with its commit options and event.
//!    On failure nothing is written.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::auction;
use crate::bids::{self, BuyBidRequest, SellBidRequest};
use crate::config::MarketConfig;
use crate::error::{ChaincodeError, Result};
use crate::generation::{self, GenerationClaim, SellerRegistration};
use crate::identity::Identity;
use crate::ledger::{CommitOptions, Ledger, Priority, Transaction, WriteSet};
use crate::sensors::{self, ReadingInput};
use crate::settlement;

/// Event emitted by a successful auction pass.
pub const AUCTION_EVENT: &str = "auctionPerformed";

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    DeclareSensorActive,
    DisableSensors { sensor_ids: Vec<String> },
    EnableSensors { sensor_ids: Vec<String> },
    ListActiveSensors,
    TrustSensors { owner_msps: Vec<String>, sensor_ids: Vec<String> },
    DistrustSensors { owner_msps: Vec<String>, sensor_ids: Vec<String> },
    TrustedSensors,
    PublishSensorReading(ReadingInput),
    SensorReadings { sensor_ids: Vec<String> },
    RegisterSeller(SellerRegistration),
    PublishEnergyGeneration(GenerationClaim),
    RegisterSellBid(SellBidRequest),
    RegisterBuyBid(BuyBidRequest),
    ValidateBuyBid { token: String, max_payment_cover: f64 },
    Auction,
    EnergyQuantityForToken { payment_msp: String, token: String },
    TransactionsForToken { payment_msp: String, token: String },
    TransactionsForSellBids { sequences: Vec<u64> },
    TransactionsForSellerSince { seller_msp: String, seller_id: String, first_sequence: u64 },
    CallerInfo,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeclareSensorActive => "DeclareSensorActive",
            Self::DisableSensors { .. } => "DisableSensors",
            Self::EnableSensors { .. } => "EnableSensors",
            Self::ListActiveSensors => "ListActiveSensors",
            Self::TrustSensors { .. } => "TrustSensors",
            Self::DistrustSensors { .. } => "DistrustSensors",
            Self::TrustedSensors => "TrustedSensors",
            Self::PublishSensorReading(_) => "PublishSensorReading",
            Self::SensorReadings { .. } => "SensorReadings",
            Self::RegisterSeller(_) => "RegisterSeller",
            Self::PublishEnergyGeneration(_) => "PublishEnergyGeneration",
            Self::RegisterSellBid(_) => "RegisterSellBid",
            Self::RegisterBuyBid(_) => "RegisterBuyBid",
            Self::ValidateBuyBid { .. } => "ValidateBuyBid",
            Self::Auction => "Auction",
            Self::EnergyQuantityForToken { .. } => "EnergyQuantityForToken",
            Self::TransactionsForToken { .. } => "TransactionsForToken",
            Self::TransactionsForSellBids { .. } => "TransactionsForSellBids",
            Self::TransactionsForSellerSince { .. } => "TransactionsForSellerSince",
            Self::CallerInfo => "CallerInfo",
        }
    }

    /// Commit options requested from the platform.
    pub fn commit_options(&self) -> CommitOptions {
        match self {
            Self::PublishEnergyGeneration(_) => CommitOptions::elevated(Priority::Medium),
            Self::Auction => CommitOptions::elevated(Priority::High),
            _ => CommitOptions::default(),
        }
    }
}

/// Caller and clock of one invocation.
pub struct Invocation<'a> {
    pub identity: &'a dyn Identity,
    /// Ledger time (seconds since epoch).
    pub now: u64,
    /// Timestamp the client put on the transaction proposal.
    pub tx_timestamp: u64,
}

impl<'a> Invocation<'a> {
    pub fn new(identity: &'a dyn Identity, now: u64) -> Self {
        Self {
            identity,
            now,
            tx_timestamp: now,
        }
    }

    pub fn with_tx_timestamp(mut self, tx_timestamp: u64) -> Self {
        self.tx_timestamp = tx_timestamp;
        self
    }
}

/// Outcome of a successful invocation.
#[derive(Debug, Clone)]
pub struct Response {
    pub operation: &'static str,
    pub payload: Value,
    pub event: Option<&'static str>,
    pub commit: CommitOptions,
    pub write_set: WriteSet,
}

impl Response {
    pub fn digest(&self) -> String {
        self.write_set.digest()
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| ChaincodeError::Ledger(format!("failed to encode response: {}", e)))
}

pub struct EnergyContract {
    config: MarketConfig,
}

impl EnergyContract {
    pub fn new(config: MarketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Run one operation as a transaction against `ledger`.
    pub fn invoke(
        &self,
        ledger: &mut dyn Ledger,
        invocation: &Invocation<'_>,
        operation: &Operation,
    ) -> Result<Response> {
        let name = operation.name();
        let (payload, write_set) = {
            let mut tx = Transaction::new(&*ledger);
            match self.execute(&mut tx, invocation, operation) {
                Ok(payload) => (payload, tx.into_write_set()),
                Err(e) => {
                    warn!(
                        operation = name,
                        caller = %format!("{}{}", invocation.identity.caller_msp(), invocation.identity.caller_id()),
                        kind = e.kind(),
                        "Operation rejected: {}",
                        e
                    );
                    return Err(e);
                }
            }
        };

        ledger.apply(&write_set)?;

        let commit = operation.commit_options();
        debug!(
            operation = name,
            writes = write_set.len(),
            priority = ?commit.priority,
            digest = %write_set.digest(),
            "Write set applied"
        );

        Ok(Response {
            operation: name,
            payload,
            event: matches!(operation, Operation::Auction).then_some(AUCTION_EVENT),
            commit,
            write_set,
        })
    }

    /// [`invoke`](Self::invoke) with its wall-clock duration.
    pub fn invoke_timed(
        &self,
        ledger: &mut dyn Ledger,
        invocation: &Invocation<'_>,
        operation: &Operation,
    ) -> (Duration, Result<Response>) {
        let start = Instant::now();
        let result = self.invoke(ledger, invocation, operation);
        (start.elapsed(), result)
    }

    fn execute(
        &self,
        ledger: &mut dyn Ledger,
        invocation: &Invocation<'_>,
        operation: &Operation,
    ) -> Result<Value> {
        let caller = invocation.identity;
        let config = &self.config;

        match operation {
            Operation::DeclareSensorActive => to_payload(&sensors::declare_active(ledger, caller)?),
            Operation::DisableSensors { sensor_ids } => {
                let updated = sensors::set_sensors_active(ledger, caller, sensor_ids, false)?;
                Ok(json!({ "updated": updated }))
            }
            Operation::EnableSensors { sensor_ids } => {
                let updated = sensors::set_sensors_active(ledger, caller, sensor_ids, true)?;
                Ok(json!({ "updated": updated }))
            }
            Operation::ListActiveSensors => {
                to_payload(&sensors::list_active_sensors(ledger, caller)?)
            }
            Operation::TrustSensors { owner_msps, sensor_ids } => {
                let updated = sensors::set_trust(ledger, caller, owner_msps, sensor_ids, true)?;
                Ok(json!({ "updated": updated }))
            }
            Operation::DistrustSensors { owner_msps, sensor_ids } => {
                let updated = sensors::set_trust(ledger, caller, owner_msps, sensor_ids, false)?;
                Ok(json!({ "updated": updated }))
            }
            Operation::TrustedSensors => to_payload(&sensors::trusted_sensors(ledger, caller)?),
            Operation::PublishSensorReading(input) => to_payload(&sensors::publish_reading(
                ledger,
                caller,
                config,
                invocation.now,
                input.clone(),
            )?),
            Operation::SensorReadings { sensor_ids } => {
                to_payload(&sensors::sensor_readings(ledger, caller, sensor_ids)?)
            }
            Operation::RegisterSeller(registration) => to_payload(&generation::register_seller(
                ledger,
                caller,
                config,
                invocation.now,
                invocation.tx_timestamp,
                registration.clone(),
            )?),
            Operation::PublishEnergyGeneration(claim) => {
                let outcome =
                    generation::publish_generation(ledger, caller, config, invocation.now, claim)?;
                Ok(json!({
                    "seller_msp": outcome.seller_msp,
                    "seller_id": outcome.seller_id,
                    "accepted": to_payload(&outcome.accepted)?,
                    "bounds": to_payload(&outcome.bounds)?,
                    "last_generation_timestamp": outcome.last_generation_timestamp,
                }))
            }
            Operation::RegisterSellBid(request) => {
                to_payload(&bids::register_sell_bid(ledger, caller, request)?)
            }
            Operation::RegisterBuyBid(request) => {
                to_payload(&bids::register_buy_bid(ledger, caller, request)?)
            }
            Operation::ValidateBuyBid { token, max_payment_cover } => to_payload(
                &bids::validate_buy_bid(ledger, caller, token, *max_payment_cover)?,
            ),
            Operation::Auction => {
                let report = auction::run_auction(ledger)?;
                let prices: BTreeMap<String, f64> = report
                    .outcomes
                    .iter()
                    .filter_map(|o| o.clearing_price.map(|p| (o.energy_type.to_string(), p)))
                    .collect();
                let transactions: Vec<_> = report.transactions().collect();
                Ok(json!({
                    "clearing_prices": prices,
                    "transactions": to_payload(&transactions)?,
                }))
            }
            Operation::EnergyQuantityForToken { payment_msp, token } => Ok(json!(
                settlement::energy_quantity_for_token(ledger, payment_msp, token)?
            )),
            Operation::TransactionsForToken { payment_msp, token } => to_payload(
                &settlement::transactions_for_token(ledger, caller, payment_msp, token)?,
            ),
            Operation::TransactionsForSellBids { sequences } => to_payload(
                &settlement::transactions_for_sell_bids(ledger, caller, sequences)?,
            ),
            Operation::TransactionsForSellerSince {
                seller_msp,
                seller_id,
                first_sequence,
            } => to_payload(&settlement::transactions_for_seller_since(
                ledger,
                seller_msp,
                seller_id,
                *first_sequence,
            )?),
            Operation::CallerInfo => to_payload(&settlement::caller_info(caller)),
        }
    }
}
