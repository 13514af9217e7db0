//! Core types and traits for docop
//!
//! This crate defines the foundations the execution engine is built on:
//! - Error: error taxonomy and response-status codes
//! - Config: engine knobs loaded from `docop.toml`
//! - Types: row batches, exec parameters, row-lock modes, read time
//! - Physical: request/response model of one RPC unit
//! - Traits: the `Session` transport and `TableDescriptor` collaborators

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod physical;
pub mod traits;
pub mod types;

pub use config::{EngineConfig, CONFIG_FILE_NAME};
pub use error::{DocOpError, DocOpResult, ErrorCode, TxnErrorCode};
pub use physical::{
    ColumnPredicate, PagingState, PhysicalOp, PhysicalRequest, PhysicalResponse, ReadRequest,
    ResponseStatus, SharedOp, WriteKind, WriteRequest,
};
pub use traits::{ApplyOutcome, FlushCallback, Session, SessionHandle, TableDescriptor};
pub use types::{Datum, ExecParams, HybridTime, ReadTime, RowBatch, RowLockMode};

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(DocOpError: Send, Sync, Clone);
    static_assertions::assert_impl_all!(SharedOp: Send, Sync);
    static_assertions::assert_impl_all!(ReadTime: Send, Sync, Clone);
}
