//! Physical request/response model
//!
//! A `PhysicalOp` is the unit the transport ships to a tablet: one request
//! plus the response the transport fills in when the round is flushed. The
//! engine shares each op with the transport through a `SharedOp` handle and
//! only reads the response after the flush callback has fired.
//!
//! Read requests may be nested: an index scan request feeds a base-table
//! fetch. The pagination token belongs to the innermost request.

use crate::error::{DocOpError, DocOpResult, ErrorCode, TxnErrorCode};
use crate::types::{Datum, RowBatch, RowLockMode};
use parking_lot::Mutex;
use std::sync::Arc;

/// Predicate on one hash-partition column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnPredicate {
    /// `col = value`
    Eq(Datum),
    /// `col IN (v1, v2, ...)`
    In(Vec<Datum>),
}

impl ColumnPredicate {
    /// Literal candidates this predicate admits, in order.
    pub fn candidates(&self) -> Vec<Datum> {
        match self {
            ColumnPredicate::Eq(value) => vec![value.clone()],
            ColumnPredicate::In(values) => values.clone(),
        }
    }
}

/// Opaque cursor returned when a request was only partially satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingState(pub Vec<u8>);

/// Read request against one table, optionally fed by a nested index request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    /// Target table
    pub table_id: String,
    /// Scan direction
    pub is_forward_scan: bool,
    /// Maximum rows to return
    pub limit: Option<u64>,
    /// Rows to skip
    pub offset: Option<u64>,
    /// Row-lock strength; `None` requests no lock
    pub row_lock: Option<RowLockMode>,
    /// One predicate per hash-partition column; empty means full scan
    pub partition_values: Vec<ColumnPredicate>,
    /// Resume point from a previous round
    pub paging_state: Option<PagingState>,
    /// Ask the store to return a pagination token when it stops early
    pub return_paging_state: bool,
    /// Index scan feeding this request
    pub index_request: Option<Box<ReadRequest>>,
    /// Catalog version checked once by the store on the first round
    pub catalog_version: Option<u64>,
}

impl Default for ReadRequest {
    fn default() -> Self {
        Self {
            table_id: String::new(),
            is_forward_scan: true,
            limit: None,
            offset: None,
            row_lock: None,
            partition_values: Vec::new(),
            paging_state: None,
            return_paging_state: false,
            index_request: None,
            catalog_version: None,
        }
    }
}

impl ReadRequest {
    /// Empty forward-scan request for `table_id`
    pub fn new(table_id: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            ..Default::default()
        }
    }

    /// Walk the nested index-request chain to its innermost request.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` when the chain is deeper than `max_depth`.
    pub fn innermost_mut(&mut self, max_depth: usize) -> DocOpResult<&mut ReadRequest> {
        let mut current = self;
        for _ in 0..=max_depth {
            match current.index_request {
                Some(ref mut next) => current = &mut **next,
                None => return Ok(current),
            }
        }
        Err(DocOpError::illegal_state(format!(
            "index request nesting exceeds {} levels",
            max_depth
        )))
    }

    /// Number of nested index requests below this one
    pub fn nesting_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self;
        while let Some(next) = current.index_request.as_deref() {
            depth += 1;
            current = next;
        }
        depth
    }
}

/// Kind of row mutation carried by a write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// INSERT
    Insert,
    /// UPDATE
    Update,
    /// INSERT ... ON CONFLICT UPDATE
    Upsert,
    /// DELETE
    Delete,
}

/// Write request against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    /// Target table
    pub table_id: String,
    /// Mutation kind
    pub kind: WriteKind,
    /// Encoded column values
    pub row: Vec<u8>,
    /// Catalog version checked by the store
    pub catalog_version: Option<u64>,
}

impl WriteRequest {
    /// New write request for `table_id`
    pub fn new(table_id: impl Into<String>, kind: WriteKind) -> Self {
        Self {
            table_id: table_id.into(),
            kind,
            row: Vec::new(),
            catalog_version: None,
        }
    }
}

/// Request half of a physical op.
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicalRequest {
    /// Read
    Read(ReadRequest),
    /// Write
    Write(WriteRequest),
}

/// Status of a physical response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseStatus {
    /// Request applied
    #[default]
    Ok,
    /// Unique key collision
    DuplicateKey,
    /// Schema version did not match the catalog version sent
    SchemaVersionMismatch,
    /// Any other execution failure
    RuntimeError,
}

/// Response half of a physical op, filled in by the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhysicalResponse {
    /// Outcome of the request
    pub status: ResponseStatus,
    /// Human readable failure message
    pub error_message: String,
    /// Domain error code, if the store reported one
    pub error_code: Option<ErrorCode>,
    /// Transaction-conflict annotation, if any
    pub txn_error_code: Option<TxnErrorCode>,
    /// Set when the request stopped before exhausting its range
    pub paging_state: Option<PagingState>,
    /// Rows touched by a write
    pub rows_affected: u64,
    /// Returned rows
    pub rows_data: RowBatch,
}

impl PhysicalResponse {
    /// Successful response carrying `rows`
    pub fn ok(rows: impl Into<RowBatch>) -> Self {
        Self {
            rows_data: rows.into(),
            ..Default::default()
        }
    }

    /// Attach a pagination token
    pub fn with_paging_state(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.paging_state = Some(PagingState(token.into()));
        self
    }

    /// Set the rows-affected count
    pub fn with_rows_affected(mut self, rows: u64) -> Self {
        self.rows_affected = rows;
        self
    }

    /// Failed response
    pub fn failed(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            error_message: message.into(),
            ..Default::default()
        }
    }

    /// Attach a domain error code
    pub fn with_error_code(mut self, code: ErrorCode) -> Self {
        self.error_code = Some(code);
        self
    }

    /// Attach a transaction-conflict annotation
    pub fn with_txn_error_code(mut self, code: TxnErrorCode) -> Self {
        self.txn_error_code = Some(code);
        self
    }

    /// Whether the request succeeded
    pub fn succeeded(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// One RPC unit: a request and, once flushed, its response.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalOp {
    /// What to send
    pub request: PhysicalRequest,
    /// What came back; `None` until the transport completes the op
    pub response: Option<PhysicalResponse>,
}

impl PhysicalOp {
    /// Wrap a read request
    pub fn read(request: ReadRequest) -> Self {
        Self {
            request: PhysicalRequest::Read(request),
            response: None,
        }
    }

    /// Wrap a write request
    pub fn write(request: WriteRequest) -> Self {
        Self {
            request: PhysicalRequest::Write(request),
            response: None,
        }
    }

    /// The read request, if this is a read
    pub fn read_request(&self) -> Option<&ReadRequest> {
        match &self.request {
            PhysicalRequest::Read(req) => Some(req),
            PhysicalRequest::Write(_) => None,
        }
    }

    /// Mutable read request, if this is a read
    pub fn read_request_mut(&mut self) -> Option<&mut ReadRequest> {
        match &mut self.request {
            PhysicalRequest::Read(req) => Some(req),
            PhysicalRequest::Write(_) => None,
        }
    }

    /// Shareable handle
    pub fn into_shared(self) -> SharedOp {
        Arc::new(Mutex::new(self))
    }
}

/// Handle to a physical op shared between an operation and the transport.
pub type SharedOp = Arc<Mutex<PhysicalOp>>;
