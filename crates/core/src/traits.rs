//! Collaborator traits
//!
//! The engine does not talk to the network or read the catalog itself. It
//! drives two collaborators through these traits:
//!
//! - `Session`: applies physical ops and flushes them asynchronously
//! - `TableDescriptor`: schema facts and prototype requests for one table

use crate::error::DocOpResult;
use crate::physical::{ReadRequest, SharedOp, WriteKind, WriteRequest};
use crate::types::ReadTime;

/// Identifies the transport session an applied op was queued on.
///
/// All ops applied for one round land in the same session, so the last
/// handle returned by `apply_async` is the one to flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// Result of applying one physical op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// The transport kept the op back to coalesce it with later writes
    pub buffered: bool,
    /// Session the op was queued on
    pub session: SessionHandle,
}

/// Completion for one flush. Receives the overall transport status; the
/// per-op statuses are read from each op's response.
pub type FlushCallback = Box<dyn FnOnce(DocOpResult<()>) + Send + 'static>;

/// Transport that applies and flushes physical ops.
///
/// Thread safety: the engine calls these methods without holding any
/// operation lock, and the callback may run on any thread, including the
/// caller's own thread before `flush_async` returns.
pub trait Session: Send + Sync {
    /// Queue `op` for the next flush, bound to `read_time`.
    ///
    /// The transport may pick the read time if it is still unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the op cannot be queued.
    fn apply_async(&self, op: &SharedOp, read_time: &ReadTime) -> DocOpResult<ApplyOutcome>;

    /// Send everything queued on `session`.
    ///
    /// On `Ok`, `callback` is invoked exactly once after every queued op
    /// has its response filled in. On `Err`, the callback is never invoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush could not be started.
    fn flush_async(&self, session: SessionHandle, callback: FlushCallback) -> DocOpResult<()>;
}

/// Schema-level view of one table.
pub trait TableDescriptor: Send + Sync {
    /// Table identifier
    fn table_id(&self) -> &str;

    /// Number of hash-partition key columns
    fn num_hash_key_columns(&self) -> usize;

    /// Schema-bound prototype read request with no predicates bound yet
    fn new_read_request(&self) -> ReadRequest;

    /// Schema-bound write request
    fn new_write_request(&self, kind: WriteKind) -> WriteRequest;
}
