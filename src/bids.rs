//! Bid Store
//!
//! Sell bids, buy bids and the energy transactions produced by clearing,
//! laid out so every query the auction needs is a single range scan.
//!
//! # Key Layout
//!
//! ```text
//! SellBid                   / sellerMsp / sellerId / energyType / seq(20)
//! BuyBid                    / "true"|"false" / paymentMsp / token
//! EnergyTransaction         / paymentMsp / token / sellerMsp / sellerId / seq(20)
//! SellBidEnergyTransactions / sellerMsp / sellerId / seq(20)
//! ```
//!
//! - Sequences are zero-padded, so one seller's bids scan in creation order.
//! - The validated flag is a key segment: validation deletes the `false`
//!   entry and inserts the `true` one, and `BuyBid/true` scans exactly the
//!   bids eligible for clearing.
//! - A sell bid is always rewritten under the key it was created with.

use tracing::{debug, info};

use crate::codec;
use crate::error::{ChaincodeError, Result};
use crate::generation;
use crate::identity::{Identity, ANONYMOUS_BUYER_OU, ATTR_ORG_UNIT, ATTR_PAYMENT_COMPANY, ATTR_SELLER};
use crate::ledger::{compose_key, padded_timestamp, Ledger};
use crate::records::{
    BuyBid, EnergyTransaction, EnergyType, PaymentToken, SellBid, SellBidTransactions,
};

pub const SELL_BID_TAG: &str = "SellBid";
pub const BUY_BID_TAG: &str = "BuyBid";
pub const ENERGY_TRANSACTION_TAG: &str = "EnergyTransaction";
pub const SELL_BID_TRANSACTIONS_TAG: &str = "SellBidEnergyTransactions";

// =============================================================================
// KEYS
// =============================================================================

fn validated_segment(validated: bool) -> &'static str {
    if validated {
        "true"
    } else {
        "false"
    }
}

pub fn sell_bid_key(
    seller_msp: &str,
    seller_id: &str,
    energy_type: EnergyType,
    sequence: u64,
) -> Result<String> {
    compose_key(
        SELL_BID_TAG,
        &[seller_msp, seller_id, energy_type.as_str(), &padded_timestamp(sequence)],
    )
}

pub fn buy_bid_key(validated: bool, payment_msp: &str, token: &str) -> Result<String> {
    compose_key(BUY_BID_TAG, &[validated_segment(validated), payment_msp, token])
}

pub fn energy_transaction_key(tx: &EnergyTransaction) -> Result<String> {
    compose_key(
        ENERGY_TRANSACTION_TAG,
        &[
            tx.payment_msp.as_str(),
            tx.token.as_str(),
            tx.seller_msp.as_str(),
            tx.seller_id.as_str(),
            padded_timestamp(tx.sequence).as_str(),
        ],
    )
}

pub fn sell_bid_transactions_key(seller_msp: &str, seller_id: &str, sequence: u64) -> Result<String> {
    compose_key(
        SELL_BID_TRANSACTIONS_TAG,
        &[seller_msp, seller_id, &padded_timestamp(sequence)],
    )
}

impl SellBid {
    pub fn key(&self) -> Result<String> {
        sell_bid_key(&self.seller_msp, &self.seller_id, self.energy_type, self.sequence)
    }
}

impl BuyBid {
    pub fn key(&self) -> Result<String> {
        buy_bid_key(self.validated, &self.payment_msp, &self.token)
    }
}

fn require_positive(what: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ChaincodeError::InvalidArgument(format!(
            "{} must be greater than 0, got {}",
            what, value
        )))
    }
}

// =============================================================================
// SELL BIDS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SellBidRequest {
    pub quantity_kwh: f64,
    pub price_per_kwh: f64,
    pub energy_type: String,
}

/// Offer part of the calling seller's validated generation.
pub fn register_sell_bid(
    ledger: &mut dyn Ledger,
    caller: &dyn Identity,
    request: &SellBidRequest,
) -> Result<SellBid> {
    caller.require_role(ATTR_SELLER)?;
    require_positive("quantity", request.quantity_kwh)?;
    require_positive("price", request.price_per_kwh)?;
    let energy_type: EnergyType = request.energy_type.parse()?;

    let mut seller = generation::load_seller(ledger, caller.caller_msp(), caller.caller_id())?;
    let available = seller.sellable(energy_type);
    if available < request.quantity_kwh {
        return Err(ChaincodeError::InsufficientSellableBalance {
            energy_type: energy_type.to_string(),
            available_kwh: available,
            requested_kwh: request.quantity_kwh,
        });
    }

    seller.sellable.insert(energy_type, available - request.quantity_kwh);
    seller.last_bid_sequence += 1;
    generation::store_seller(ledger, &seller)?;

    let bid = SellBid {
        seller_msp: seller.seller_msp,
        seller_id: seller.seller_id,
        sequence: seller.last_bid_sequence,
        quantity_kwh: request.quantity_kwh,
        price_per_kwh: request.price_per_kwh,
        energy_type,
    };
    put_sell_bid(ledger, &bid)?;

    info!(
        seller = %format!("{}{}", bid.seller_msp, bid.seller_id),
        sequence = bid.sequence,
        quantity = bid.quantity_kwh,
        price = bid.price_per_kwh,
        energy_type = %bid.energy_type,
        "Sell bid registered"
    );
    Ok(bid)
}

pub fn put_sell_bid(ledger: &mut dyn Ledger, bid: &SellBid) -> Result<()> {
    codec::store(ledger, &bid.key()?, bid)
}

pub fn delete_sell_bid(ledger: &mut dyn Ledger, bid: &SellBid) -> Result<()> {
    ledger.delete(&bid.key()?)
}

/// Every outstanding sell bid in key order.
pub fn sell_bids(ledger: &dyn Ledger) -> Result<Vec<SellBid>> {
    let entries = ledger.partial_scan(SELL_BID_TAG, &[])?;
    Ok(codec::decode_all(entries)?.into_iter().map(|(_, bid)| bid).collect())
}

// =============================================================================
// BUY BIDS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct BuyBidRequest {
    pub payment_msp: String,
    pub token: String,
    pub utility_msp: String,
    pub quantity_kwh: f64,
    pub price_per_kwh: f64,
    pub energy_type: String,
}

/// Register an unvalidated buy bid from an anonymous buyer.
pub fn register_buy_bid(
    ledger: &mut dyn Ledger,
    caller: &dyn Identity,
    request: &BuyBidRequest,
) -> Result<BuyBid> {
    caller.assert_attribute(ATTR_ORG_UNIT, ANONYMOUS_BUYER_OU)?;
    require_positive("quantity", request.quantity_kwh)?;
    require_positive("price", request.price_per_kwh)?;
    let energy_type: EnergyType = request.energy_type.parse()?;

    let key = buy_bid_key(false, &request.payment_msp, &request.token)?;
    let pending = ledger.get(&key)?.is_some()
        || ledger
            .get(&buy_bid_key(true, &request.payment_msp, &request.token)?)?
            .is_some();
    let spent = !ledger
        .partial_scan(ENERGY_TRANSACTION_TAG, &[request.payment_msp.as_str(), request.token.as_str()])?
        .is_empty();
    if pending || spent {
        return Err(ChaincodeError::TokenMismatchOrReused {
            payment_msp: request.payment_msp.clone(),
            token: request.token.clone(),
        });
    }

    let bid = BuyBid {
        payment_msp: request.payment_msp.clone(),
        token: request.token.clone(),
        utility_msp: request.utility_msp.clone(),
        quantity_kwh: request.quantity_kwh,
        price_per_kwh: request.price_per_kwh,
        energy_type,
        validated: false,
    };
    codec::store(ledger, &key, &bid)?;

    debug!(payment_msp = %bid.payment_msp, energy_type = %bid.energy_type, "Buy bid registered");
    Ok(bid)
}

/// Payment company confirms it covers the bid of `token`.
pub fn validate_buy_bid(
    ledger: &mut dyn Ledger,
    caller: &dyn Identity,
    token: &str,
    max_payment_cover: f64,
) -> Result<BuyBid> {
    caller.require_role(ATTR_PAYMENT_COMPANY)?;

    let payment_msp = caller.caller_msp();
    let key = buy_bid_key(false, payment_msp, token)?;
    let mut bid: BuyBid = codec::load(ledger, &key)?
        .ok_or_else(|| ChaincodeError::BidNotFound { key: key.clone() })?;

    if bid.token != token || bid.payment_msp != payment_msp {
        return Err(ChaincodeError::TokenMismatchOrReused {
            payment_msp: payment_msp.to_string(),
            token: token.to_string(),
        });
    }

    let total_price = bid.price_per_kwh * bid.quantity_kwh;
    if total_price > max_payment_cover {
        return Err(ChaincodeError::PaymentCoverageExceeded {
            token: token.to_string(),
            total_price,
            max_cover: max_payment_cover,
        });
    }

    ledger.delete(&key)?;
    bid.validated = true;
    put_buy_bid(ledger, &bid)?;

    info!(payment_msp = %payment_msp, total_price, "Buy bid validated");
    Ok(bid)
}

pub fn put_buy_bid(ledger: &mut dyn Ledger, bid: &BuyBid) -> Result<()> {
    codec::store(ledger, &bid.key()?, bid)
}

pub fn delete_buy_bid(ledger: &mut dyn Ledger, bid: &BuyBid) -> Result<()> {
    ledger.delete(&bid.key()?)
}

/// Validated buy bids in key order.
pub fn validated_buy_bids(ledger: &dyn Ledger) -> Result<Vec<BuyBid>> {
    let entries = ledger.partial_scan(BUY_BID_TAG, &[validated_segment(true)])?;
    Ok(codec::decode_all(entries)?.into_iter().map(|(_, bid)| bid).collect())
}

// =============================================================================
// ENERGY TRANSACTIONS
// =============================================================================

/// Persist transactions and extend each sell bid's token index.
pub fn store_transactions(ledger: &mut dyn Ledger, transactions: &[EnergyTransaction]) -> Result<()> {
    for tx in transactions {
        codec::store(ledger, &energy_transaction_key(tx)?, tx)?;

        let index_key = sell_bid_transactions_key(&tx.seller_msp, &tx.seller_id, tx.sequence)?;
        let mut index: SellBidTransactions =
            codec::load(ledger, &index_key)?.unwrap_or_default();
        let token = PaymentToken {
            payment_msp: tx.payment_msp.clone(),
            token: tx.token.clone(),
        };
        if !index.tokens.contains(&token) {
            index.tokens.push(token);
            codec::store(ledger, &index_key, &index)?;
        }
    }
    Ok(())
}

/// Transactions of one buy bid token, in key order.
pub fn transactions_for_token(
    ledger: &dyn Ledger,
    payment_msp: &str,
    token: &str,
) -> Result<Vec<EnergyTransaction>> {
    let entries = ledger.partial_scan(ENERGY_TRANSACTION_TAG, &[payment_msp, token])?;
    Ok(codec::decode_all(entries)?.into_iter().map(|(_, tx)| tx).collect())
}

/// Transactions that settled one sell bid, through its token index.
/// `None` if the bid never traded.
pub fn transactions_for_sell_bid(
    ledger: &dyn Ledger,
    seller_msp: &str,
    seller_id: &str,
    sequence: u64,
) -> Result<Option<Vec<EnergyTransaction>>> {
    let index_key = sell_bid_transactions_key(seller_msp, seller_id, sequence)?;
    let Some(index) = codec::load::<SellBidTransactions>(ledger, &index_key)? else {
        return Ok(None);
    };

    let sequence_segment = padded_timestamp(sequence);
    let mut transactions = Vec::with_capacity(index.tokens.len());
    for token in &index.tokens {
        let key = compose_key(
            ENERGY_TRANSACTION_TAG,
            &[
                token.payment_msp.as_str(),
                token.token.as_str(),
                seller_msp,
                seller_id,
                sequence_segment.as_str(),
            ],
        )?;
        let tx: EnergyTransaction = codec::load(ledger, &key)?.ok_or_else(|| {
            ChaincodeError::MalformedRecord {
                key: index_key.clone(),
                reason: format!("indexed transaction {} is missing", key.escape_debug()),
            }
        })?;
        transactions.push(tx);
    }
    Ok(Some(transactions))
}
