//! World State Ledger
//!
//! Ordered key-value store consumed by every contract operation.
//!
//! # Key layout
//!
//! The store has no secondary indexes. Every query the contract needs is a
//! range scan over lexicographically ordered keys:
//!
//! - Composite keys: `\0 + type + \0 + (segment + \0)*`. A partial key built
//!   from a leading subset of segments scans one entity class.
//! - Simple keys embed timestamps zero-padded to the width of `u64::MAX`,
//!   so byte order equals numeric order.
//!
//! # Transactions
//!
//! Operations never write to the backing store directly. They run against a
//! [`Transaction`], which buffers writes (reads see them) and yields an ordered
//! [`WriteSet`]. The write set is applied only when the operation succeeded.

pub mod sqlite;

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::{ChaincodeError, Result};

pub use sqlite::SqliteLedger;

// =============================================================================
// KEYS
// =============================================================================

const COMPOSITE_KEY_NAMESPACE: char = '\u{0000}';
const MAX_UNICODE_RUNE: char = '\u{10FFFF}';

/// Decimal width of `u64::MAX`.
pub const TIMESTAMP_WIDTH: usize = 20;

/// Build a composite key from a type tag and ordered segments.
pub fn compose_key(type_tag: &str, segments: &[&str]) -> Result<String> {
    validate_segment(type_tag)?;
    if type_tag.is_empty() {
        return Err(ChaincodeError::InvalidArgument(
            "composite key type tag must not be empty".to_string(),
        ));
    }

    let mut key = String::with_capacity(
        2 + type_tag.len() + segments.iter().map(|s| s.len() + 1).sum::<usize>(),
    );
    key.push(COMPOSITE_KEY_NAMESPACE);
    key.push_str(type_tag);
    key.push(COMPOSITE_KEY_NAMESPACE);
    for segment in segments {
        validate_segment(segment)?;
        key.push_str(segment);
        key.push(COMPOSITE_KEY_NAMESPACE);
    }
    Ok(key)
}

/// `[start, end)` covering every composite key that begins with the given
/// tag and leading segments.
pub fn partial_key_range(type_tag: &str, segments: &[&str]) -> Result<(String, String)> {
    let start = compose_key(type_tag, segments)?;
    let mut end = start.clone();
    end.push(MAX_UNICODE_RUNE);
    Ok((start, end))
}

/// Split a composite key back into its type tag and segments.
pub fn split_composite_key(key: &str) -> Option<(String, Vec<String>)> {
    let rest = key.strip_prefix(COMPOSITE_KEY_NAMESPACE)?;
    let mut parts = rest.split(COMPOSITE_KEY_NAMESPACE);
    let type_tag = parts.next()?.to_string();
    let mut segments: Vec<String> = parts.map(str::to_string).collect();
    // Trailing delimiter leaves one empty tail.
    if segments.pop().as_deref() != Some("") {
        return None;
    }
    Some((type_tag, segments))
}

/// Zero-padded decimal so that string order equals numeric order.
pub fn padded_timestamp(timestamp: u64) -> String {
    format!("{:0width$}", timestamp, width = TIMESTAMP_WIDTH)
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.contains(COMPOSITE_KEY_NAMESPACE) || segment.contains(MAX_UNICODE_RUNE) {
        return Err(ChaincodeError::InvalidArgument(format!(
            "key segment {:?} contains a reserved character",
            segment
        )));
    }
    Ok(())
}

// =============================================================================
// LEDGER TRAIT
// =============================================================================

/// Ordered key-value store.
pub trait Ledger {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()>;

    fn delete(&mut self, key: &str) -> Result<()>;

    /// Entries with `start <= key < end` in key order. An empty `end` means
    /// no upper bound.
    fn range_scan(&self, start: &str, end: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Entries under a partial composite key.
    fn partial_scan(&self, type_tag: &str, segments: &[&str]) -> Result<Vec<(String, Vec<u8>)>> {
        let (start, end) = partial_key_range(type_tag, segments)?;
        self.range_scan(&start, &end)
    }

    /// Apply a committed write set.
    fn apply(&mut self, write_set: &WriteSet) -> Result<()> {
        for op in &write_set.ops {
            match op {
                WriteOp::Put { key, value } => self.put(key, value.clone())?,
                WriteOp::Delete { key } => self.delete(key)?,
            }
        }
        Ok(())
    }
}

fn scan_bounds<'a>(start: &'a str, end: &'a str) -> Option<(Bound<&'a str>, Bound<&'a str>)> {
    if end.is_empty() {
        return Some((Bound::Included(start), Bound::Unbounded));
    }
    if start >= end {
        return None;
    }
    Some((Bound::Included(start), Bound::Excluded(end)))
}

// =============================================================================
// COMMIT METADATA
// =============================================================================

/// Ordering priority requested from the ledger platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

/// How the surrounding platform should commit an operation's write set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitOptions {
    pub priority: Priority,
    /// Skip the phantom-read conflict check at commit.
    pub bypass_phantom_read_check: bool,
}

impl CommitOptions {
    pub fn elevated(priority: Priority) -> Self {
        Self {
            priority,
            bypass_phantom_read_check: true,
        }
    }
}

// =============================================================================
// WRITE SET
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl WriteOp {
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Writes of one transaction, in key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSet {
    pub ops: Vec<WriteOp>,
}

impl WriteSet {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// SHA-256 over the ordered operations. Two executors that produce the
    /// same digest produced bit-identical state changes.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for op in &self.ops {
            match op {
                WriteOp::Put { key, value } => {
                    hasher.update(b"P");
                    hasher.update((key.len() as u64).to_be_bytes());
                    hasher.update(key.as_bytes());
                    hasher.update((value.len() as u64).to_be_bytes());
                    hasher.update(value);
                }
                WriteOp::Delete { key } => {
                    hasher.update(b"D");
                    hasher.update((key.len() as u64).to_be_bytes());
                    hasher.update(key.as_bytes());
                }
            }
        }
        hex::encode(hasher.finalize())
    }
}

// =============================================================================
// IN-MEMORY LEDGER
// =============================================================================

/// BTreeMap-backed ledger for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Ledger for MemoryLedger {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn range_scan(&self, start: &str, end: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let Some(bounds) = scan_bounds(start, end) else {
            return Ok(Vec::new());
        };
        Ok(self
            .entries
            .range::<str, _>(bounds)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// Write-buffering view over a base ledger.
pub struct Transaction<'a> {
    base: &'a dyn Ledger,
    /// `None` marks a delete.
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl<'a> Transaction<'a> {
    pub fn new(base: &'a dyn Ledger) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    /// Consume the transaction, yielding its writes in key order.
    pub fn into_write_set(self) -> WriteSet {
        let ops = self
            .writes
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => WriteOp::Put { key, value },
                None => WriteOp::Delete { key },
            })
            .collect();
        WriteSet { ops }
    }
}

impl Ledger for Transaction<'_> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(buffered) => Ok(buffered.clone()),
            None => self.base.get(key),
        }
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.writes.insert(key.to_string(), Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.writes.insert(key.to_string(), None);
        Ok(())
    }

    fn range_scan(&self, start: &str, end: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let Some(bounds) = scan_bounds(start, end) else {
            return Ok(Vec::new());
        };
        let mut merged: BTreeMap<String, Vec<u8>> =
            self.base.range_scan(start, end)?.into_iter().collect();
        for (key, value) in self.writes.range::<str, _>(bounds) {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}
