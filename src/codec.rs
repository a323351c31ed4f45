//! Record encoding
//!
//! Every record is persisted as a JSON envelope `{"v": 1, "body": {...}}`.
//! Anything that fails to decode, including a foreign version or an integer
//! out of range for its stored width, is reported as
//! [`ChaincodeError::MalformedRecord`] rather than skipped.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ChaincodeError, Result};
use crate::ledger::Ledger;

pub const RECORD_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    v: u32,
    body: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    v: u32,
    body: serde_json::Value,
}

pub fn encode<T: Serialize>(key: &str, record: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(&EnvelopeRef {
        v: RECORD_VERSION,
        body: record,
    })
    .map_err(|e| malformed(key, e))
}

pub fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    let envelope: Envelope = serde_json::from_slice(bytes).map_err(|e| malformed(key, e))?;
    if envelope.v != RECORD_VERSION {
        return Err(ChaincodeError::MalformedRecord {
            key: key.to_string(),
            reason: format!("unsupported record version {}", envelope.v),
        });
    }
    serde_json::from_value(envelope.body).map_err(|e| malformed(key, e))
}

/// Fetch and decode one record.
pub fn load<T: DeserializeOwned>(ledger: &dyn Ledger, key: &str) -> Result<Option<T>> {
    match ledger.get(key)? {
        Some(bytes) => decode(key, &bytes).map(Some),
        None => Ok(None),
    }
}

pub fn store<T: Serialize>(ledger: &mut dyn Ledger, key: &str, record: &T) -> Result<()> {
    let bytes = encode(key, record)?;
    ledger.put(key, bytes)
}

/// Decode every entry of a scan, keeping ledger order.
pub fn decode_all<T: DeserializeOwned>(entries: Vec<(String, Vec<u8>)>) -> Result<Vec<(String, T)>> {
    entries
        .into_iter()
        .map(|(key, bytes)| {
            let record = decode(&key, &bytes)?;
            Ok((key, record))
        })
        .collect()
}

fn malformed(key: &str, err: serde_json::Error) -> ChaincodeError {
    ChaincodeError::MalformedRecord {
        key: key.to_string(),
        reason: err.to_string(),
    }
}
