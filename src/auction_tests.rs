//! Auction clearing tests
//!
//! Scenario tests for the matching walk plus seeded randomized books that
//! check quantity conservation, the single clearing price and price-time
//! priority.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

use crate::auction::{clear, run_auction, ClearingOutcome};
use crate::bids::{self, sell_bid_key};
use crate::codec;
use crate::ledger::{Ledger, MemoryLedger};
use crate::records::{BuyBid, EnergyType, SellBid};

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn make_sell(seller: &str, sequence: u64, quantity: f64, price: f64) -> SellBid {
    SellBid {
        seller_msp: "Org1MSP".to_string(),
        seller_id: seller.to_string(),
        sequence,
        quantity_kwh: quantity,
        price_per_kwh: price,
        energy_type: EnergyType::Solar,
    }
}

fn make_buy(token: &str, quantity: f64, price: f64) -> BuyBid {
    BuyBid {
        payment_msp: "PayMSP".to_string(),
        token: token.to_string(),
        utility_msp: "UtilityMSP".to_string(),
        quantity_kwh: quantity,
        price_per_kwh: price,
        energy_type: EnergyType::Solar,
        validated: true,
    }
}

fn sell_id(bid: &SellBid) -> (String, u64) {
    (bid.seller_id.clone(), bid.sequence)
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn test_partial_sell_fill_at_welfare_price() {
    let outcome = clear(
        EnergyType::Solar,
        vec![make_sell("s1", 1, 10.0, 5.0)],
        vec![make_buy("t1", 6.0, 8.0)],
    );

    assert_eq!(outcome.transactions.len(), 1);
    let tx = &outcome.transactions[0];
    assert_eq!(tx.quantity_kwh, 6.0);
    assert_eq!(tx.price_per_kwh, 6.5);
    assert_eq!(outcome.clearing_price, Some(6.5));

    let partial = outcome.partial_sell_bid.as_ref().expect("sell bid stays open");
    assert_eq!(partial.quantity_kwh, 4.0);
    assert_eq!(partial.sequence, 1);
    assert!(outcome.closed_sell_bids.is_empty());
    assert_eq!(outcome.closed_buy_bids.len(), 1);
    assert!(outcome.partial_buy_bid.is_none());
}

#[test]
fn test_last_pair_sets_uniform_price() {
    let outcome = clear(
        EnergyType::Solar,
        vec![make_sell("s1", 1, 1.0, 2.0), make_sell("s2", 1, 1.0, 4.0)],
        vec![make_buy("t1", 2.0, 6.0)],
    );

    // Pairs priced (2+6)/2 = 4 then (4+6)/2 = 5.
    assert_eq!(outcome.transactions.len(), 2);
    assert!(outcome.transactions.iter().all(|tx| tx.price_per_kwh == 5.0));
    assert_eq!(outcome.clearing_price, Some(5.0));
    assert_eq!(outcome.closed_sell_bids.len(), 2);
    assert_eq!(outcome.closed_buy_bids.len(), 1);
}

#[test]
fn test_equal_quantities_close_both_sides() {
    let outcome = clear(
        EnergyType::Solar,
        vec![make_sell("s1", 1, 3.0, 1.0), make_sell("s2", 1, 3.0, 1.0)],
        vec![make_buy("t1", 3.0, 2.0), make_buy("t2", 1.0, 2.0)],
    );

    assert_eq!(outcome.transactions.len(), 2);
    assert_eq!(outcome.closed_sell_bids.len(), 1);
    assert_eq!(outcome.closed_buy_bids.len(), 2);
    let partial = outcome.partial_sell_bid.expect("second sell bid partially filled");
    assert_eq!(partial.seller_id, "s2");
    assert_eq!(partial.quantity_kwh, 2.0);
}

#[test]
fn test_no_cross_no_trade() {
    let outcome = clear(
        EnergyType::Wind,
        vec![make_sell("s1", 1, 5.0, 9.0)],
        vec![make_buy("t1", 5.0, 8.0)],
    );
    assert_eq!(
        outcome,
        ClearingOutcome {
            energy_type: EnergyType::Wind,
            clearing_price: None,
            transactions: vec![],
            closed_sell_bids: vec![],
            closed_buy_bids: vec![],
            partial_sell_bid: None,
            partial_buy_bid: None,
        }
    );
}

#[test]
fn test_ties_keep_arrival_order() {
    let outcome = clear(
        EnergyType::Solar,
        vec![
            make_sell("early", 1, 2.0, 3.0),
            make_sell("cheap", 1, 2.0, 1.0),
            make_sell("late", 1, 2.0, 3.0),
        ],
        vec![make_buy("t1", 3.0, 5.0)],
    );

    let sellers: Vec<&str> = outcome.transactions.iter().map(|t| t.seller_id.as_str()).collect();
    assert_eq!(sellers, vec!["cheap", "early"]);
    assert_eq!(outcome.partial_sell_bid.unwrap().seller_id, "early");
}

#[test]
fn test_buy_side_exhaustion_leaves_partial_buy() {
    let outcome = clear(
        EnergyType::Solar,
        vec![make_sell("s1", 1, 2.0, 1.0), make_sell("s2", 1, 5.0, 7.0)],
        vec![make_buy("t1", 4.0, 5.0)],
    );
    assert_eq!(outcome.transactions.len(), 1);
    let partial = outcome.partial_buy_bid.expect("buy bid partially filled");
    assert_eq!(partial.quantity_kwh, 2.0);
    assert!(partial.validated);
    assert!(outcome.partial_sell_bid.is_none());
}

// =============================================================================
// LEDGER PASS
// =============================================================================

#[test]
fn test_run_auction_rewrites_partial_under_creation_key() {
    let mut ledger = MemoryLedger::new();
    let sell = make_sell("s1", 1, 10.0, 5.0);
    bids::put_sell_bid(&mut ledger, &sell).unwrap();
    bids::put_buy_bid(&mut ledger, &make_buy("t1", 6.0, 8.0)).unwrap();
    // Unvalidated bids do not take part.
    bids::put_buy_bid(
        &mut ledger,
        &BuyBid {
            validated: false,
            ..make_buy("t2", 100.0, 100.0)
        },
    )
    .unwrap();

    let report = run_auction(&mut ledger).unwrap();
    assert_eq!(report.transactions().count(), 1);

    let key = sell_bid_key("Org1MSP", "s1", EnergyType::Solar, 1).unwrap();
    let stored: SellBid = codec::load(&ledger, &key).unwrap().unwrap();
    assert_eq!(stored.quantity_kwh, 4.0);
    assert_eq!(bids::sell_bids(&ledger).unwrap().len(), 1);

    assert!(bids::validated_buy_bids(&ledger).unwrap().is_empty());
    assert!(ledger
        .get(&bids::buy_bid_key(false, "PayMSP", "t2").unwrap())
        .unwrap()
        .is_some());

    let settled = bids::transactions_for_sell_bid(&ledger, "Org1MSP", "s1", 1)
        .unwrap()
        .unwrap();
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].price_per_kwh, 6.5);
}

#[test]
fn test_run_auction_clears_types_independently() {
    let mut ledger = MemoryLedger::new();
    bids::put_sell_bid(&mut ledger, &make_sell("s1", 1, 5.0, 1.0)).unwrap();
    bids::put_sell_bid(
        &mut ledger,
        &SellBid {
            energy_type: EnergyType::Wind,
            ..make_sell("s1", 2, 5.0, 1.0)
        },
    )
    .unwrap();
    bids::put_buy_bid(
        &mut ledger,
        &BuyBid {
            energy_type: EnergyType::Wind,
            ..make_buy("w1", 5.0, 3.0)
        },
    )
    .unwrap();

    let report = run_auction(&mut ledger).unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].energy_type, EnergyType::Wind);
    assert_eq!(report.outcomes[0].clearing_price, Some(2.0));

    let remaining = bids::sell_bids(&ledger).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].energy_type, EnergyType::Solar);
}

#[test]
fn test_persisted_remainder_never_oversells_across_passes() {
    let mut ledger = MemoryLedger::new();
    let original = 9.222893153541019;
    let first_buy = 7.847980627353925;
    bids::put_sell_bid(&mut ledger, &make_sell("s1", 1, original, 5.0)).unwrap();
    bids::put_buy_bid(&mut ledger, &make_buy("t1", first_buy, 8.0)).unwrap();

    let first = run_auction(&mut ledger).unwrap();
    let in_memory = first.outcomes[0]
        .partial_sell_bid
        .as_ref()
        .expect("sell bid stays open")
        .quantity_kwh;
    let key = sell_bid_key("Org1MSP", "s1", EnergyType::Solar, 1).unwrap();
    let stored: SellBid = codec::load(&ledger, &key).unwrap().unwrap();
    assert_eq!(stored.quantity_kwh.to_bits(), in_memory.to_bits());

    bids::put_buy_bid(&mut ledger, &make_buy("t2", 100.0, 8.0)).unwrap();
    run_auction(&mut ledger).unwrap();
    assert!(bids::sell_bids(&ledger).unwrap().is_empty());

    let settled = bids::transactions_for_sell_bid(&ledger, "Org1MSP", "s1", 1)
        .unwrap()
        .unwrap();
    assert_eq!(settled.len(), 2);
    let sold: f64 = settled.iter().map(|tx| tx.quantity_kwh).sum();
    assert!(sold <= original, "sold {} of {}", sold, original);
    assert_eq!(sold, original);
}

// =============================================================================
// RANDOMIZED BOOKS
// =============================================================================

fn random_book(rng: &mut ChaCha8Rng) -> (Vec<SellBid>, Vec<BuyBid>) {
    let n_sells = rng.gen_range(1..=8);
    let n_buys = rng.gen_range(1..=8);
    let sells = (0..n_sells)
        .map(|i| {
            let quantity = rng.gen_range(1..=20) as f64 * 0.5;
            let price = rng.gen_range(1..=10) as f64;
            make_sell(&format!("s{}", i), i as u64 + 1, quantity, price)
        })
        .collect();
    let buys = (0..n_buys)
        .map(|i| {
            let quantity = rng.gen_range(1..=20) as f64 * 0.5;
            let price = rng.gen_range(1..=10) as f64;
            make_buy(&format!("t{}", i), quantity, price)
        })
        .collect();
    (sells, buys)
}

#[test]
fn test_randomized_books_conserve_quantity() {
    for seed in 0..300u64 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (sells, buys) = random_book(&mut rng);
        let outcome = clear(EnergyType::Solar, sells.clone(), buys.clone());

        let mut sold: HashMap<(String, u64), f64> = HashMap::new();
        let mut bought: HashMap<String, f64> = HashMap::new();
        for tx in &outcome.transactions {
            assert!(tx.quantity_kwh > 0.0, "seed {}: empty transaction", seed);
            *sold.entry((tx.seller_id.clone(), tx.sequence)).or_default() += tx.quantity_kwh;
            *bought.entry(tx.token.clone()).or_default() += tx.quantity_kwh;
        }

        for bid in &sells {
            let remaining = if outcome.closed_sell_bids.iter().any(|b| sell_id(b) == sell_id(bid)) {
                0.0
            } else if let Some(p) = outcome.partial_sell_bid.as_ref().filter(|p| sell_id(p) == sell_id(bid)) {
                p.quantity_kwh
            } else {
                bid.quantity_kwh
            };
            assert!(remaining >= 0.0, "seed {}: negative remaining", seed);
            let traded = sold.get(&sell_id(bid)).copied().unwrap_or(0.0);
            assert!(
                (bid.quantity_kwh - remaining - traded).abs() < 1e-9,
                "seed {}: sell bid {:?} traded {} remaining {}",
                seed,
                sell_id(bid),
                traded,
                remaining
            );
        }

        for bid in &buys {
            let remaining = if outcome.closed_buy_bids.iter().any(|b| b.token == bid.token) {
                0.0
            } else if let Some(p) = outcome.partial_buy_bid.as_ref().filter(|p| p.token == bid.token) {
                p.quantity_kwh
            } else {
                bid.quantity_kwh
            };
            assert!(remaining >= 0.0, "seed {}: negative remaining", seed);
            let traded = bought.get(&bid.token).copied().unwrap_or(0.0);
            assert!(
                (bid.quantity_kwh - remaining - traded).abs() < 1e-9,
                "seed {}: buy bid {} traded {} remaining {}",
                seed,
                bid.token,
                traded,
                remaining
            );
        }

        let total_sold: f64 = sold.values().sum();
        let total_bought: f64 = bought.values().sum();
        assert!((total_sold - total_bought).abs() < 1e-9, "seed {}", seed);
    }
}

#[test]
fn test_randomized_books_single_price_per_pass() {
    for seed in 0..300u64 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (sells, buys) = random_book(&mut rng);
        let outcome = clear(EnergyType::Solar, sells, buys);

        match outcome.clearing_price {
            Some(price) => {
                assert!(!outcome.transactions.is_empty(), "seed {}", seed);
                for tx in &outcome.transactions {
                    assert_eq!(tx.price_per_kwh, price, "seed {}", seed);
                }
            }
            None => assert!(outcome.transactions.is_empty(), "seed {}", seed),
        }
    }
}

#[test]
fn test_randomized_books_respect_price_time_priority() {
    for seed in 0..300u64 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (sells, buys) = random_book(&mut rng);
        let outcome = clear(EnergyType::Solar, sells.clone(), buys.clone());

        let mut sorted_sells = sells;
        sorted_sells.sort_by(|a, b| a.price_per_kwh.total_cmp(&b.price_per_kwh));
        let closed: Vec<(String, u64)> = outcome.closed_sell_bids.iter().map(sell_id).collect();
        let expected: Vec<(String, u64)> =
            sorted_sells.iter().take(closed.len()).map(sell_id).collect();
        assert_eq!(closed, expected, "seed {}: sell bids closed out of order", seed);
        if let Some(partial) = &outcome.partial_sell_bid {
            assert_eq!(sell_id(partial), sell_id(&sorted_sells[closed.len()]), "seed {}", seed);
        }

        let mut sorted_buys = buys;
        sorted_buys.sort_by(|a, b| b.price_per_kwh.total_cmp(&a.price_per_kwh));
        let closed: Vec<&str> = outcome.closed_buy_bids.iter().map(|b| b.token.as_str()).collect();
        let expected: Vec<&str> =
            sorted_buys.iter().take(closed.len()).map(|b| b.token.as_str()).collect();
        assert_eq!(closed, expected, "seed {}: buy bids closed out of order", seed);
        if let Some(partial) = &outcome.partial_buy_bid {
            assert_eq!(partial.token, sorted_buys[closed.len()].token, "seed {}", seed);
        }
    }
}

#[test]
fn test_pass_is_deterministic_across_executors() {
    let build = || {
        let mut ledger = MemoryLedger::new();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let (sells, buys) = random_book(&mut rng);
        for bid in &sells {
            bids::put_sell_bid(&mut ledger, bid).unwrap();
        }
        for bid in &buys {
            bids::put_buy_bid(&mut ledger, bid).unwrap();
        }
        ledger
    };

    let digest = |base: &MemoryLedger| {
        let mut tx = crate::ledger::Transaction::new(base);
        run_auction(&mut tx).unwrap();
        tx.into_write_set().digest()
    };

    let (a, b) = (build(), build());
    assert_eq!(digest(&a), digest(&b));
}
