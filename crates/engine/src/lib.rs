//! Document-operation execution engine
//!
//! This crate turns a logical read or write statement into physical
//! requests against the hash-partitioned document store:
//! - Operation: shared state machine (cache, cancellation, wait/notify)
//! - ReadOperation: partition fan-out and multi-round pagination
//! - WriteOperation: single physical write, optionally buffered
//! - CompoundOperation: extension point for multi-operation statements
//!
//! The transport and the catalog are collaborators reached through the
//! `Session` and `TableDescriptor` traits from `docop-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fanout;
pub mod operation;
pub mod status;

pub use fanout::FanOut;
pub use operation::{
    CompoundOp, CompoundOperation, DocOp, OpCore, Operation, OperationKind, ReadOp, ReadOperation,
    WriteOp, WriteOperation,
};
pub use status::{check_op, check_response};
