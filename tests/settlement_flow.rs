//! End-to-end market flow through the public contract API
//!
//! Sensors publish telemetry, a meter claims generation backed by it, the
//! seller offers it, an anonymous buyer bids, the payment company validates
//! and the auction settles. Everything runs on a SQLite world state in a
//! temporary directory, so the tests also cover reopening persisted state.

use serde_json::json;
use std::collections::BTreeMap;
use tempfile::TempDir;

use energy_market::bids::{self, BuyBidRequest, SellBidRequest};
use energy_market::contract::{Invocation, Operation, Response, AUCTION_EVENT};
use energy_market::generation::{GenerationClaim, SellerRegistration};
use energy_market::identity::{
    CallerIdentity, ANONYMOUS_BUYER_OU, ATTR_ADMIN, ATTR_ORG_UNIT, ATTR_PAYMENT_COMPANY,
    ATTR_RADIUS, ATTR_SELLER, ATTR_SENSOR, ATTR_UTILITY,
};
use energy_market::ledger::{CommitOptions, Priority};
use energy_market::sensors::ReadingInput;
use energy_market::units::CANDELA;
use energy_market::{EnergyContract, MarketConfig, Result, SqliteLedger};

const T0: u64 = 1_700_000_000;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn contract() -> EnergyContract {
    EnergyContract::new(MarketConfig::default().with_peer_msp("Org1MSP"))
}

fn admin() -> CallerIdentity {
    CallerIdentity::new("Org1MSP", "admin").with_role(ATTR_ADMIN)
}

fn weather_sensor() -> CallerIdentity {
    CallerIdentity::new("Org2MSP", "lux1")
        .with_role(ATTR_SENSOR)
        .at(3, 4, 0)
        .with_attribute(ATTR_RADIUS, "10")
}

fn meter() -> CallerIdentity {
    CallerIdentity::new("Org1MSP", "meter1").with_role(ATTR_SENSOR).at(0, 0, 0)
}

fn seller() -> CallerIdentity {
    CallerIdentity::new("Org1MSP", "seller1").with_role(ATTR_SELLER)
}

fn buyer() -> CallerIdentity {
    CallerIdentity::new("IdemixMSP", "anon").with_attribute(ATTR_ORG_UNIT, ANONYMOUS_BUYER_OU)
}

fn payment_company() -> CallerIdentity {
    CallerIdentity::new("PayMSP", "pay").with_role(ATTR_PAYMENT_COMPANY)
}

fn utility() -> CallerIdentity {
    CallerIdentity::new("UtilityMSP", "grid").with_role(ATTR_UTILITY)
}

fn invoke(
    ledger: &mut SqliteLedger,
    caller: &CallerIdentity,
    now: u64,
    operation: Operation,
) -> Result<Response> {
    contract().invoke(ledger, &Invocation::new(caller, now), &operation)
}

fn reading(timestamp: u64, value: f64) -> Operation {
    Operation::PublishSensorReading(ReadingInput {
        version: 1,
        unit: CANDELA,
        timestamp,
        value,
        error_measure: 0,
        confidence: 100,
        device: 0,
    })
}

/// Seller with 15 kWh of validated solar generation.
fn funded_market(ledger: &mut SqliteLedger) {
    invoke(
        ledger,
        &admin(),
        T0,
        Operation::RegisterSeller(SellerRegistration {
            seller_id: "seller1".to_string(),
            meter_msp: "Org1MSP".to_string(),
            meter_id: "meter1".to_string(),
            wind_turbines: 0,
            solar_panels: 3,
        }),
    )
    .expect("register seller");

    invoke(ledger, &weather_sensor(), T0, Operation::DeclareSensorActive).expect("declare sensor");
    invoke(
        ledger,
        &admin(),
        T0,
        Operation::TrustSensors {
            owner_msps: vec!["Org2MSP".to_string()],
            sensor_ids: vec!["lux1".to_string()],
        },
    )
    .expect("trust sensor");

    for t in T0..=T0 + 10 {
        invoke(ledger, &weather_sensor(), t, reading(t, 50.0)).expect("publish reading");
    }

    let mut claims = BTreeMap::new();
    claims.insert("solar".to_string(), 15.0);
    let response = invoke(
        ledger,
        &meter(),
        T0 + 10,
        Operation::PublishEnergyGeneration(GenerationClaim {
            t0: T0 + 1,
            t1: T0 + 9,
            claims,
        }),
    )
    .expect("publish generation");
    assert_eq!(response.commit, CommitOptions::elevated(Priority::Medium));
    assert_eq!(response.payload["accepted"]["solar"], 15.0);
}

fn place_bids(ledger: &mut SqliteLedger) {
    invoke(
        ledger,
        &seller(),
        T0 + 20,
        Operation::RegisterSellBid(SellBidRequest {
            quantity_kwh: 10.0,
            price_per_kwh: 5.0,
            energy_type: "solar".to_string(),
        }),
    )
    .expect("sell bid");

    invoke(
        ledger,
        &buyer(),
        T0 + 21,
        Operation::RegisterBuyBid(BuyBidRequest {
            payment_msp: "PayMSP".to_string(),
            token: "tok1".to_string(),
            utility_msp: "UtilityMSP".to_string(),
            quantity_kwh: 6.0,
            price_per_kwh: 8.0,
            energy_type: "solar".to_string(),
        }),
    )
    .expect("buy bid");

    invoke(
        ledger,
        &payment_company(),
        T0 + 22,
        Operation::ValidateBuyBid {
            token: "tok1".to_string(),
            max_payment_cover: 48.0,
        },
    )
    .expect("validate buy bid");
}

// =============================================================================
// TESTS
// =============================================================================

#[test]
fn test_full_market_flow_settles_and_persists() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("world.db");
    let mut ledger = SqliteLedger::open(&db_path).unwrap();

    funded_market(&mut ledger);
    place_bids(&mut ledger);

    let auction = invoke(&mut ledger, &admin(), T0 + 30, Operation::Auction).unwrap();
    assert_eq!(auction.event, Some(AUCTION_EVENT));
    assert_eq!(auction.commit, CommitOptions::elevated(Priority::High));
    assert_eq!(auction.payload["clearing_prices"], json!({ "solar": 6.5 }));
    let transactions = auction.payload["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["quantity_kwh"], 6.0);
    assert_eq!(transactions[0]["price_per_kwh"], 6.5);

    let quantity = invoke(
        &mut ledger,
        &buyer(),
        T0 + 31,
        Operation::EnergyQuantityForToken {
            payment_msp: "PayMSP".to_string(),
            token: "tok1".to_string(),
        },
    )
    .unwrap();
    assert_eq!(quantity.payload, json!(6.0));

    let for_utility = invoke(
        &mut ledger,
        &utility(),
        T0 + 31,
        Operation::TransactionsForToken {
            payment_msp: "PayMSP".to_string(),
            token: "tok1".to_string(),
        },
    )
    .unwrap();
    assert_eq!(for_utility.payload[0]["seller_id"], "seller1");

    let for_seller = invoke(
        &mut ledger,
        &seller(),
        T0 + 31,
        Operation::TransactionsForSellBids { sequences: vec![1, 2] },
    )
    .unwrap();
    assert_eq!(for_seller.payload.as_array().unwrap().len(), 1);

    let since = invoke(
        &mut ledger,
        &admin(),
        T0 + 31,
        Operation::TransactionsForSellerSince {
            seller_msp: "Org1MSP".to_string(),
            seller_id: "seller1".to_string(),
            first_sequence: 1,
        },
    )
    .unwrap();
    assert_eq!(since.payload, for_seller.payload);

    // Reopen: the partially filled sell bid survives under its creation key.
    drop(ledger);
    let reopened = SqliteLedger::open(&db_path).unwrap();
    let open_sells = bids::sell_bids(&reopened).unwrap();
    assert_eq!(open_sells.len(), 1);
    assert_eq!(open_sells[0].sequence, 1);
    assert_eq!(open_sells[0].quantity_kwh, 4.0);
    assert!(bids::validated_buy_bids(&reopened).unwrap().is_empty());
}

#[test]
fn test_rejected_operations_leave_world_state_untouched() {
    let dir = TempDir::new().unwrap();
    let mut ledger = SqliteLedger::open(dir.path().join("world.db")).unwrap();
    funded_market(&mut ledger);
    let before = ledger.count().unwrap();

    // 15 kWh available, 16 requested.
    let err = invoke(
        &mut ledger,
        &seller(),
        T0 + 20,
        Operation::RegisterSellBid(SellBidRequest {
            quantity_kwh: 16.0,
            price_per_kwh: 5.0,
            energy_type: "solar".to_string(),
        }),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "InsufficientSellableBalance");

    let stale = invoke(&mut ledger, &weather_sensor(), T0 + 100, reading(T0 + 50, 50.0)).unwrap_err();
    assert_eq!(stale.kind(), "StaleTimestamp");

    // Same window again.
    let mut claims = BTreeMap::new();
    claims.insert("solar".to_string(), 1.0);
    let duplicate = invoke(
        &mut ledger,
        &meter(),
        T0 + 10,
        Operation::PublishEnergyGeneration(GenerationClaim {
            t0: T0 + 1,
            t1: T0 + 9,
            claims,
        }),
    )
    .unwrap_err();
    assert_eq!(duplicate.kind(), "DuplicateGenerationWindow");

    assert_eq!(ledger.count().unwrap(), before);
}

#[test]
fn test_independent_executors_agree_on_auction_write_set() {
    let run = || {
        let dir = TempDir::new().unwrap();
        let mut ledger = SqliteLedger::open(dir.path().join("world.db")).unwrap();
        funded_market(&mut ledger);
        place_bids(&mut ledger);
        invoke(&mut ledger, &admin(), T0 + 30, Operation::Auction)
            .unwrap()
            .digest()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_distrusted_sensor_no_longer_backs_generation() {
    let dir = TempDir::new().unwrap();
    let mut ledger = SqliteLedger::open(dir.path().join("world.db")).unwrap();
    funded_market(&mut ledger);

    invoke(
        &mut ledger,
        &admin(),
        T0 + 11,
        Operation::DistrustSensors {
            owner_msps: vec!["Org2MSP".to_string()],
            sensor_ids: vec!["lux1".to_string()],
        },
    )
    .unwrap();
    let trusted = invoke(&mut ledger, &admin(), T0 + 11, Operation::TrustedSensors).unwrap();
    assert_eq!(trusted.payload, json!([]));

    for t in T0 + 11..=T0 + 15 {
        invoke(&mut ledger, &weather_sensor(), t, reading(t, 50.0)).unwrap();
    }
    let mut claims = BTreeMap::new();
    claims.insert("solar".to_string(), 1.0);
    let err = invoke(
        &mut ledger,
        &meter(),
        T0 + 15,
        Operation::PublishEnergyGeneration(GenerationClaim {
            t0: T0 + 10,
            t1: T0 + 15,
            claims,
        }),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "GenerationBoundExceeded");
    assert!(err.to_string().contains("no corroborating telemetry"));
}
