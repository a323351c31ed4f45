//! Settlement queries
//!
//! Read-side views over energy transactions for the parties that settle
//! them: payment companies (by token), utilities and sellers (by sell bid).

use tracing::debug;

use crate::bids::{self, ENERGY_TRANSACTION_TAG};
use crate::error::{ChaincodeError, Result};
use crate::generation;
use crate::identity::{Identity, ATTR_SELLER, ATTR_UTILITY};
use crate::ledger::{partial_key_range, Ledger};
use crate::records::EnergyTransaction;

/// Total energy settled for a buy bid token. Zero if it never traded.
pub fn energy_quantity_for_token(ledger: &dyn Ledger, payment_msp: &str, token: &str) -> Result<f64> {
    Ok(bids::transactions_for_token(ledger, payment_msp, token)?
        .iter()
        .map(|tx| tx.quantity_kwh)
        .sum())
}

/// Transactions of a buy bid token, for the utility delivering the energy.
pub fn transactions_for_token(
    ledger: &dyn Ledger,
    caller: &dyn Identity,
    payment_msp: &str,
    token: &str,
) -> Result<Vec<EnergyTransaction>> {
    caller.require_role(ATTR_UTILITY)?;
    let transactions = bids::transactions_for_token(ledger, payment_msp, token)?;
    if transactions.is_empty() {
        let (prefix, _) = partial_key_range(ENERGY_TRANSACTION_TAG, &[payment_msp, token])?;
        return Err(ChaincodeError::BidNotFound { key: prefix });
    }
    Ok(transactions)
}

/// The calling seller's transactions for the listed sell bid sequences.
/// Sequences that never traded are skipped.
pub fn transactions_for_sell_bids(
    ledger: &dyn Ledger,
    caller: &dyn Identity,
    sequences: &[u64],
) -> Result<Vec<EnergyTransaction>> {
    caller.require_role(ATTR_SELLER)?;
    let (msp, id) = (caller.caller_msp(), caller.caller_id());

    let mut transactions = Vec::new();
    for &sequence in sequences {
        match bids::transactions_for_sell_bid(ledger, msp, id, sequence)? {
            Some(found) => transactions.extend(found),
            None => debug!(seller = %format!("{}{}", msp, id), sequence, "Sell bid never traded"),
        }
    }
    Ok(transactions)
}

/// Transactions of every sell bid of a seller from `first_sequence` up to
/// its latest bid.
pub fn transactions_for_seller_since(
    ledger: &dyn Ledger,
    seller_msp: &str,
    seller_id: &str,
    first_sequence: u64,
) -> Result<Vec<EnergyTransaction>> {
    let seller = generation::load_seller(ledger, seller_msp, seller_id)?;

    let mut transactions = Vec::new();
    for sequence in first_sequence..=seller.last_bid_sequence {
        if let Some(found) = bids::transactions_for_sell_bid(ledger, seller_msp, seller_id, sequence)? {
            transactions.extend(found);
        }
    }
    Ok(transactions)
}

/// Caller id and organization as the contract sees them.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CallerInfo {
    pub caller_id: String,
    pub caller_msp: String,
}

pub fn caller_info(caller: &dyn Identity) -> CallerInfo {
    CallerInfo {
        caller_id: caller.caller_id().to_string(),
        caller_msp: caller.caller_msp().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bids::store_transactions;
    use crate::generation::store_seller;
    use crate::identity::CallerIdentity;
    use crate::ledger::MemoryLedger;
    use crate::records::{EnergyType, SellerInfo};
    use std::collections::BTreeMap;

    fn tx(token: &str, sequence: u64, quantity: f64) -> EnergyTransaction {
        EnergyTransaction {
            seller_msp: "Org1MSP".to_string(),
            seller_id: "seller1".to_string(),
            sequence,
            payment_msp: "PayMSP".to_string(),
            token: token.to_string(),
            utility_msp: "UtilityMSP".to_string(),
            quantity_kwh: quantity,
            price_per_kwh: 6.5,
            energy_type: EnergyType::Solar,
        }
    }

    fn seeded_ledger() -> MemoryLedger {
        let mut ledger = MemoryLedger::new();
        store_transactions(&mut ledger, &[tx("tok1", 1, 2.0), tx("tok1", 2, 3.5), tx("tok2", 2, 1.0)])
            .unwrap();
        store_seller(
            &mut ledger,
            &SellerInfo {
                seller_msp: "Org1MSP".to_string(),
                seller_id: "seller1".to_string(),
                meter_msp: "Org1MSP".to_string(),
                meter_id: "meter1".to_string(),
                wind_turbines: 0,
                solar_panels: 1,
                sellable: BTreeMap::new(),
                last_generation_timestamp: 0,
                last_bid_sequence: 3,
            },
        )
        .unwrap();
        ledger
    }

    #[test]
    fn test_energy_quantity_for_token() {
        let ledger = seeded_ledger();
        assert_eq!(energy_quantity_for_token(&ledger, "PayMSP", "tok1").unwrap(), 5.5);
        assert_eq!(energy_quantity_for_token(&ledger, "PayMSP", "nope").unwrap(), 0.0);
    }

    #[test]
    fn test_utility_token_query() {
        let ledger = seeded_ledger();
        let utility = CallerIdentity::new("UtilityMSP", "u1").with_role(ATTR_UTILITY);

        let found = transactions_for_token(&ledger, &utility, "PayMSP", "tok1").unwrap();
        assert_eq!(found.len(), 2);

        let missing = transactions_for_token(&ledger, &utility, "PayMSP", "tok9").unwrap_err();
        assert_eq!(missing.kind(), "BidNotFound");

        let outsider = CallerIdentity::new("Org1MSP", "seller1");
        let err = transactions_for_token(&ledger, &outsider, "PayMSP", "tok1").unwrap_err();
        assert_eq!(err.kind(), "UnauthorizedCaller");
    }

    #[test]
    fn test_seller_queries_skip_untraded_bids() {
        let ledger = seeded_ledger();
        let seller = CallerIdentity::new("Org1MSP", "seller1").with_role(ATTR_SELLER);

        let found = transactions_for_sell_bids(&ledger, &seller, &[2, 3, 40]).unwrap();
        let tokens: Vec<&str> = found.iter().map(|t| t.token.as_str()).collect();
        assert_eq!(tokens, vec!["tok1", "tok2"]);

        let since = transactions_for_seller_since(&ledger, "Org1MSP", "seller1", 1).unwrap();
        assert_eq!(since.len(), 3);
        let since_two = transactions_for_seller_since(&ledger, "Org1MSP", "seller1", 2).unwrap();
        assert_eq!(since_two.len(), 2);

        let err = transactions_for_seller_since(&ledger, "Org1MSP", "ghost", 1).unwrap_err();
        assert_eq!(err.kind(), "NotRegistered");
    }

    #[test]
    fn test_caller_info() {
        let caller = CallerIdentity::new("Org1MSP", "alice");
        assert_eq!(
            caller_info(&caller),
            CallerInfo {
                caller_id: "alice".to_string(),
                caller_msp: "Org1MSP".to_string(),
            }
        );
    }
}
