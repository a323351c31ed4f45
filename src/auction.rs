//! Auction Clearing Engine
//!
//! Double auction over outstanding sell bids and validated buy bids, run
//! independently per energy type.
//!
//! # Matching
//!
//! Sell bids sort ascending by price, buy bids descending, both stable so
//! that ties keep ledger scan order (price-time priority). Two cursors walk
//! the books while the current ask is at or below the current bid; each
//! step settles the smaller remaining quantity and closes that side's bid.
//!
//! Every matched pair computes a welfare price `(ask + bid) / 2`. The last
//! one computed becomes the single clearing price of every transaction in
//! the pass.
//!
//! # Persistence
//!
//! Closed bids are deleted, the one partially filled bid per side (if any)
//! is rewritten under its creation key with the reduced quantity, and the
//! transactions are appended together with their per-sell-bid index.

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::bids;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::records::{BuyBid, EnergyTransaction, EnergyType, SellBid};

/// Result of clearing one energy type.
#[derive(Debug, Clone, PartialEq)]
pub struct ClearingOutcome {
    pub energy_type: EnergyType,
    /// Uniform price of the pass, `None` if nothing crossed.
    pub clearing_price: Option<f64>,
    pub transactions: Vec<EnergyTransaction>,
    pub closed_sell_bids: Vec<SellBid>,
    pub closed_buy_bids: Vec<BuyBid>,
    /// Sell bid left open with a reduced quantity.
    pub partial_sell_bid: Option<SellBid>,
    /// Buy bid left open with a reduced quantity.
    pub partial_buy_bid: Option<BuyBid>,
}

impl ClearingOutcome {
    fn empty(energy_type: EnergyType) -> Self {
        Self {
            energy_type,
            clearing_price: None,
            transactions: Vec::new(),
            closed_sell_bids: Vec::new(),
            closed_buy_bids: Vec::new(),
            partial_sell_bid: None,
            partial_buy_bid: None,
        }
    }

    pub fn traded_kwh(&self) -> f64 {
        self.transactions.iter().map(|tx| tx.quantity_kwh).sum()
    }
}

fn transaction(sell: &SellBid, buy: &BuyBid, quantity_kwh: f64) -> EnergyTransaction {
    EnergyTransaction {
        seller_msp: sell.seller_msp.clone(),
        seller_id: sell.seller_id.clone(),
        sequence: sell.sequence,
        payment_msp: buy.payment_msp.clone(),
        token: buy.token.clone(),
        utility_msp: buy.utility_msp.clone(),
        quantity_kwh,
        price_per_kwh: 0.0,
        energy_type: sell.energy_type,
    }
}

/// Match one energy type's books. Pure: the ledger is not touched.
pub fn clear(
    energy_type: EnergyType,
    mut sell_bids: Vec<SellBid>,
    mut buy_bids: Vec<BuyBid>,
) -> ClearingOutcome {
    let mut outcome = ClearingOutcome::empty(energy_type);
    if sell_bids.is_empty() || buy_bids.is_empty() {
        return outcome;
    }

    sell_bids.sort_by(|a, b| a.price_per_kwh.total_cmp(&b.price_per_kwh));
    buy_bids.sort_by(|a, b| b.price_per_kwh.total_cmp(&a.price_per_kwh));

    let (mut i, mut j) = (0usize, 0usize);
    let mut remaining_sell = sell_bids[0].quantity_kwh;
    let mut remaining_buy = buy_bids[0].quantity_kwh;
    let mut welfare_price = None;

    while sell_bids[i].price_per_kwh <= buy_bids[j].price_per_kwh {
        let (sell, buy) = (&sell_bids[i], &buy_bids[j]);
        welfare_price = Some((sell.price_per_kwh + buy.price_per_kwh) / 2.0);

        if remaining_sell > remaining_buy {
            remaining_sell -= remaining_buy;
            outcome.transactions.push(transaction(sell, buy, remaining_buy));
            outcome.closed_buy_bids.push(buy.clone());
            j += 1;
            if j < buy_bids.len() {
                remaining_buy = buy_bids[j].quantity_kwh;
            } else {
                remaining_buy = 0.0;
                break;
            }
        } else if remaining_sell < remaining_buy {
            remaining_buy -= remaining_sell;
            outcome.transactions.push(transaction(sell, buy, remaining_sell));
            outcome.closed_sell_bids.push(sell.clone());
            i += 1;
            if i < sell_bids.len() {
                remaining_sell = sell_bids[i].quantity_kwh;
            } else {
                remaining_sell = 0.0;
                break;
            }
        } else {
            outcome.transactions.push(transaction(sell, buy, remaining_buy));
            outcome.closed_sell_bids.push(sell.clone());
            outcome.closed_buy_bids.push(buy.clone());
            i += 1;
            j += 1;
            if i < sell_bids.len() && j < buy_bids.len() {
                remaining_sell = sell_bids[i].quantity_kwh;
                remaining_buy = buy_bids[j].quantity_kwh;
            } else {
                remaining_sell = 0.0;
                remaining_buy = 0.0;
                break;
            }
        }
    }

    if remaining_sell > 0.0 && remaining_sell < sell_bids[i].quantity_kwh {
        outcome.partial_sell_bid = Some(SellBid {
            quantity_kwh: remaining_sell,
            ..sell_bids[i].clone()
        });
    }
    if remaining_buy > 0.0 && remaining_buy < buy_bids[j].quantity_kwh {
        outcome.partial_buy_bid = Some(BuyBid {
            quantity_kwh: remaining_buy,
            ..buy_bids[j].clone()
        });
    }

    if let Some(price) = welfare_price {
        for tx in &mut outcome.transactions {
            tx.price_per_kwh = price;
        }
    }
    outcome.clearing_price = welfare_price;
    outcome
}

/// Write one outcome's bid changes and transactions.
pub fn apply_outcome(ledger: &mut dyn Ledger, outcome: &ClearingOutcome) -> Result<()> {
    for bid in &outcome.closed_sell_bids {
        bids::delete_sell_bid(ledger, bid)?;
    }
    for bid in &outcome.closed_buy_bids {
        bids::delete_buy_bid(ledger, bid)?;
    }
    if let Some(bid) = &outcome.partial_sell_bid {
        bids::put_sell_bid(ledger, bid)?;
    }
    if let Some(bid) = &outcome.partial_buy_bid {
        bids::put_buy_bid(ledger, bid)?;
    }
    bids::store_transactions(ledger, &outcome.transactions)
}

/// Summary of a full auction pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuctionReport {
    pub outcomes: Vec<ClearingOutcome>,
}

impl AuctionReport {
    pub fn transactions(&self) -> impl Iterator<Item = &EnergyTransaction> {
        self.outcomes.iter().flat_map(|o| o.transactions.iter())
    }
}

/// Clear every energy type that has bids on both sides.
pub fn run_auction(ledger: &mut dyn Ledger) -> Result<AuctionReport> {
    let mut sells_by_type: BTreeMap<EnergyType, Vec<SellBid>> = BTreeMap::new();
    for bid in bids::sell_bids(ledger)? {
        sells_by_type.entry(bid.energy_type).or_default().push(bid);
    }
    let mut buys_by_type: BTreeMap<EnergyType, Vec<BuyBid>> = BTreeMap::new();
    for bid in bids::validated_buy_bids(ledger)? {
        buys_by_type.entry(bid.energy_type).or_default().push(bid);
    }

    let mut report = AuctionReport::default();
    for (energy_type, sells) in sells_by_type {
        let Some(buys) = buys_by_type.remove(&energy_type) else {
            continue;
        };
        debug!(
            energy_type = %energy_type,
            sell_bids = sells.len(),
            buy_bids = buys.len(),
            "Clearing energy type"
        );

        let outcome = clear(energy_type, sells, buys);
        apply_outcome(ledger, &outcome)?;

        if let Some(price) = outcome.clearing_price {
            info!(
                energy_type = %energy_type,
                price,
                traded_kwh = outcome.traded_kwh(),
                transactions = outcome.transactions.len(),
                "Energy type cleared"
            );
        }
        report.outcomes.push(outcome);
    }
    Ok(report)
}
