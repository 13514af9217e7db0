//! Value types shared between the engine and its collaborators
//!
//! - `Datum`: literal value bound into a partition predicate
//! - `RowBatch`: opaque row payload returned by the store
//! - `RowLockMode`: row-locking strength forwarded to the store
//! - `ExecParams`: statement-level limit and locking parameters
//! - `ReadTime`: read timestamp shared by every round of a statement

use std::fmt;
use std::sync::{Arc, OnceLock};

/// Literal value bound into a partition predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    /// SQL NULL
    Null,
    /// Boolean literal
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// Floating point literal
    Float(f64),
    /// Text literal
    Text(String),
    /// Binary literal
    Bytes(Vec<u8>),
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Text(v.to_string())
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Bool(v)
    }
}

/// Opaque batch of encoded rows returned by one physical request.
///
/// The engine never looks inside; it only queues batches in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowBatch(Vec<u8>);

impl RowBatch {
    /// Wrap an encoded payload
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        RowBatch(data.into())
    }

    /// Whether the batch carries no rows
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Borrow the encoded payload
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take ownership of the encoded payload
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for RowBatch {
    fn from(data: Vec<u8>) -> Self {
        RowBatch(data)
    }
}

impl From<&[u8]> for RowBatch {
    fn from(data: &[u8]) -> Self {
        RowBatch(data.to_vec())
    }
}

/// Row-locking strength requested by the statement (`FOR ... ` clauses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowLockMode {
    /// FOR KEY SHARE
    KeyShare,
    /// FOR SHARE
    Share,
    /// FOR NO KEY UPDATE
    NoKeyExclusive,
    /// FOR UPDATE
    Exclusive,
}

impl RowLockMode {
    /// Map the executor's raw row-mark value.
    ///
    /// Negative values mean "no row lock"; unknown values are treated the same.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(RowLockMode::Exclusive),
            1 => Some(RowLockMode::NoKeyExclusive),
            2 => Some(RowLockMode::Share),
            3 => Some(RowLockMode::KeyShare),
            _ => None,
        }
    }
}

impl fmt::Display for RowLockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RowLockMode::KeyShare => "key share",
            RowLockMode::Share => "share",
            RowLockMode::NoKeyExclusive => "no key update",
            RowLockMode::Exclusive => "update",
        };
        f.write_str(name)
    }
}

/// Statement-level execution parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecParams {
    /// LIMIT count of the statement
    pub limit_count: i64,
    /// OFFSET of the statement
    pub limit_offset: i64,
    /// Ignore the statement limit and use the system prefetch limit
    pub limit_use_default: bool,
    /// Row-locking mode; `None` clears any lock request
    pub row_mark: Option<RowLockMode>,
}

impl ExecParams {
    /// Parameters an operation starts with before the executor supplies its own.
    pub fn with_default_limit(prefetch_limit: u64) -> Self {
        Self {
            limit_count: i64::try_from(prefetch_limit).unwrap_or(i64::MAX),
            limit_offset: 0,
            limit_use_default: true,
            row_mark: None,
        }
    }

    /// Rows the statement needs from the store: LIMIT plus OFFSET.
    pub fn statement_rows(&self) -> i64 {
        self.limit_count.saturating_add(self.limit_offset)
    }
}

/// Hybrid timestamp at which a statement reads.
pub type HybridTime = u64;

/// Read timestamp shared by every sub-operation and every round of one
/// statement.
///
/// Clones share the same slot. The transport picks the timestamp on the
/// first apply if the statement did not bring one; once set it never changes.
#[derive(Debug, Clone, Default)]
pub struct ReadTime(Arc<OnceLock<HybridTime>>);

impl ReadTime {
    /// An unset read time
    pub fn new() -> Self {
        Self::default()
    }

    /// A read time fixed up front
    pub fn at(ht: HybridTime) -> Self {
        let slot = OnceLock::new();
        let _ = slot.set(ht);
        ReadTime(Arc::new(slot))
    }

    /// The timestamp, if one has been picked
    pub fn get(&self) -> Option<HybridTime> {
        self.0.get().copied()
    }

    /// Return the timestamp, picking it with `pick` if none is set yet.
    pub fn get_or_pick(&self, pick: impl FnOnce() -> HybridTime) -> HybridTime {
        *self.0.get_or_init(pick)
    }

    /// Whether two handles share the same slot
    pub fn same_slot(&self, other: &ReadTime) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_batch_accessors() {
        let batch = RowBatch::new(b"abc".to_vec());
        assert_eq!(batch.len(), 3);
        assert!(!batch.is_empty());
        assert_eq!(batch.as_bytes(), b"abc");
        assert!(RowBatch::default().is_empty());
    }

    #[test]
    fn test_row_lock_from_raw() {
        assert_eq!(RowLockMode::from_raw(-1), None);
        assert_eq!(RowLockMode::from_raw(0), Some(RowLockMode::Exclusive));
        assert_eq!(RowLockMode::from_raw(3), Some(RowLockMode::KeyShare));
        assert_eq!(RowLockMode::from_raw(99), None);
    }

    #[test]
    fn test_exec_params_defaults() {
        let params = ExecParams::with_default_limit(1024);
        assert_eq!(params.limit_count, 1024);
        assert_eq!(params.limit_offset, 0);
        assert!(params.limit_use_default);
        assert_eq!(params.row_mark, None);
    }

    #[test]
    fn test_statement_rows_saturates() {
        let params = ExecParams {
            limit_count: i64::MAX,
            limit_offset: 10,
            limit_use_default: false,
            row_mark: None,
        };
        assert_eq!(params.statement_rows(), i64::MAX);
    }

    #[test]
    fn test_read_time_picked_once() {
        let rt = ReadTime::new();
        assert_eq!(rt.get(), None);
        assert_eq!(rt.get_or_pick(|| 100), 100);
        assert_eq!(rt.get_or_pick(|| 200), 100);

        let shared = rt.clone();
        assert!(shared.same_slot(&rt));
        assert_eq!(shared.get(), Some(100));
    }

    #[test]
    fn test_read_time_fixed_up_front() {
        let rt = ReadTime::at(7);
        assert_eq!(rt.get_or_pick(|| 8), 7);
        assert!(!rt.same_slot(&ReadTime::at(7)));
    }
}
