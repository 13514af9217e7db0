//! Write operation: one physical write, possibly buffered by the transport
//!
//! The transport decides whether to send the write now or hold it back to
//! coalesce with later writes of the same transaction. A buffered write
//! completes at this layer immediately; its response is filled in by a
//! later flush that somebody else triggers, and `rows_affected` stays unset
//! until then.

use super::{OpCore, Operation, OperationKind};
use crate::status::check_op;
use docop_core::{
    DocOpResult, EngineConfig, PhysicalOp, Session, SharedOp, TableDescriptor, WriteKind,
    WriteRequest,
};
use std::sync::Arc;
use tracing::debug;

/// Write-specific operation state.
pub struct WriteOp {
    op: SharedOp,
    rows_affected: Option<u64>,
    buffered: bool,
}

/// Write operation handle
pub type WriteOperation = Operation<WriteOp>;

impl WriteOp {
    fn new(request: WriteRequest) -> Self {
        Self {
            op: PhysicalOp::write(request).into_shared(),
            rows_affected: None,
            buffered: false,
        }
    }

    /// Rows affected, once known.
    ///
    /// For a buffered write this picks up the count from the response the
    /// deferred flush filled in.
    fn rows_affected(&mut self, core: &OpCore) -> Option<u64> {
        if self.rows_affected.is_none() && self.buffered && !core.is_canceled() {
            let guard = self.op.lock();
            if let Some(response) = guard.response.as_ref().filter(|r| r.succeeded()) {
                self.rows_affected = Some(response.rows_affected);
            }
        }
        self.rows_affected
    }
}

impl OperationKind for WriteOp {
    const NAME: &'static str = "write";
    const ALLOWS_BUFFERING: bool = true;

    fn prepare_round(
        &mut self,
        _core: &mut OpCore,
        _config: &EngineConfig,
    ) -> DocOpResult<Vec<SharedOp>> {
        self.op.lock().response = None;
        self.rows_affected = None;
        self.buffered = false;
        Ok(vec![Arc::clone(&self.op)])
    }

    fn on_buffered(&mut self, core: &mut OpCore) {
        self.buffered = true;
        core.set_end_of_data(true);
    }

    fn receive_response(&mut self, core: &mut OpCore, _config: &EngineConfig) {
        let mut guard = self.op.lock();
        if let Err(e) = check_op(&guard) {
            core.set_error(e);
        }

        if !core.is_canceled() && !core.has_error() {
            if let Some(response) = guard.response.as_mut() {
                core.write_to_cache(std::mem::take(&mut response.rows_data));
                self.rows_affected = Some(response.rows_affected);
                debug!(rows_affected = response.rows_affected, "write applied");
            }
        }
        // Writes never paginate.
        core.set_end_of_data(true);
    }
}

impl Operation<WriteOp> {
    /// Write `request` through `session`.
    pub fn new(
        session: Arc<dyn Session>,
        config: Arc<EngineConfig>,
        request: WriteRequest,
    ) -> Self {
        Operation::from_kind(session, config, WriteOp::new(request))
    }

    /// Write of `kind` built from the table's prototype, with `row` encoded
    /// column values.
    pub fn for_table(
        session: Arc<dyn Session>,
        config: Arc<EngineConfig>,
        table: &dyn TableDescriptor,
        kind: WriteKind,
        row: Vec<u8>,
    ) -> Self {
        let mut request = table.new_write_request(kind);
        request.row = row;
        Self::new(session, config, request)
    }

    /// Rows the write touched; `None` until the write's response is known.
    pub fn rows_affected(&self) -> Option<u64> {
        self.with_kind_mut(|core, write| write.rows_affected(core))
    }

    /// Whether the last submission was held back by the transport
    pub fn is_buffered(&self) -> bool {
        self.with_kind(|_, write| write.buffered)
    }

    /// Handle to the physical write
    pub fn physical_op(&self) -> SharedOp {
        self.with_kind(|_, write| Arc::clone(&write.op))
    }
}
