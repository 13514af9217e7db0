//! Read operation: partition fan-out and multi-round pagination
//!
//! A read starts from a prototype request built by the table descriptor.
//! Each round it:
//!
//! 1. sizes the prototype's row limit from the prefetch settings and the
//!    statement's LIMIT/OFFSET, and applies the row-lock mode;
//! 2. materializes new sub-operations from the fan-out cursor, up to
//!    `request_limit` active sub-operations;
//! 3. submits every active sub-operation at the statement's read time and
//!    flushes them together.
//!
//! When the round lands, every returned batch is cached. A sub-operation
//! whose response carried a pagination token stays active with the token
//! attached to its innermost request; the others are retired. The read is
//! done when nothing is active and the fan-out is exhausted.

use super::{OpCore, Operation, OperationKind};
use crate::fanout::FanOut;
use crate::status::check_op;
use docop_core::{
    ColumnPredicate, DocOpError, DocOpResult, EngineConfig, ExecParams, PhysicalOp, ReadRequest,
    Session, SharedOp, TableDescriptor,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Read-specific operation state.
pub struct ReadOp {
    table: Arc<dyn TableDescriptor>,
    template: ReadRequest,
    active: Vec<SharedOp>,
    fan_out: Option<FanOut>,
    can_produce_more_ops: bool,
}

/// Read operation handle
pub type ReadOperation = Operation<ReadOp>;

impl ReadOp {
    fn new(
        table: Arc<dyn TableDescriptor>,
        template: ReadRequest,
        config: &EngineConfig,
    ) -> DocOpResult<Self> {
        config.validate()?;

        let depth = template.nesting_depth();
        if depth > config.max_index_nesting_depth {
            return Err(DocOpError::illegal_state(format!(
                "index request nesting of {} exceeds the limit of {}",
                depth, config.max_index_nesting_depth
            )));
        }

        let fan_out = if template.partition_values.is_empty() {
            None
        } else {
            let num_hash_cols = table.num_hash_key_columns();
            if template.partition_values.len() != num_hash_cols {
                return Err(DocOpError::illegal_state(format!(
                    "table {} has {} hash columns but the request binds {}",
                    table.table_id(),
                    num_hash_cols,
                    template.partition_values.len()
                )));
            }
            Some(FanOut::from_predicates(&template.partition_values)?)
        };

        Ok(Self {
            table,
            template,
            active: Vec::new(),
            fan_out,
            can_produce_more_ops: true,
        })
    }

    /// Predict how many rows one physical read should ask for.
    ///
    /// Backward scans are slower, so they get a scaled-down prefetch, but
    /// never less than one row. A smaller statement LIMIT+OFFSET wins unless
    /// the statement asked for the system default.
    pub fn request_limit(params: &ExecParams, is_forward_scan: bool, config: &EngineConfig) -> u64 {
        let mut predicted = i64::try_from(config.prefetch_limit).unwrap_or(i64::MAX);
        if !is_forward_scan {
            predicted = (predicted as f64 * config.backward_prefetch_scale_factor).floor() as i64;
        }
        predicted = predicted.max(1);

        let mut limit = params.statement_rows();
        if params.limit_use_default || limit > predicted {
            limit = predicted;
        }
        if limit < 1 {
            debug!(
                limit_count = params.limit_count,
                limit_offset = params.limit_offset,
                "statement row count below one, requesting a single row"
            );
            limit = 1;
        }
        u64::try_from(limit).unwrap_or(1)
    }

    fn set_request_prefetch_limit(&mut self, params: &ExecParams, config: &EngineConfig) {
        let limit = Self::request_limit(params, self.template.is_forward_scan, config);
        self.template.limit = Some(limit);
    }

    fn set_row_mark(&mut self, params: &ExecParams) {
        self.template.row_lock = params.row_mark;
    }

    fn initialize_next_ops(&mut self, num_ops: usize) {
        if num_ops == 0 {
            return;
        }

        let Some(fan_out) = self.fan_out.as_mut() else {
            self.active
                .push(PhysicalOp::read(self.template.clone()).into_shared());
            self.can_produce_more_ops = false;
            return;
        };

        for combination in fan_out.next_batch(num_ops) {
            let mut request = self.template.clone();
            request.partition_values = combination.into_iter().map(ColumnPredicate::Eq).collect();
            self.active.push(PhysicalOp::read(request).into_shared());
        }
        if fan_out.is_exhausted() {
            self.can_produce_more_ops = false;
        }
        debug!(
            table = self.table.table_id(),
            cursor = fan_out.cursor(),
            total = fan_out.total(),
            active = self.active.len(),
            "expanded partition fan-out"
        );
    }

    /// Set up every sub-operation that returned a pagination token for its
    /// next round and retire the rest.
    fn advance_pagination(&mut self, core: &mut OpCore, config: &EngineConfig) {
        let mut retained = Vec::with_capacity(self.active.len());
        for op in self.active.drain(..) {
            let mut guard = op.lock();
            let token = guard
                .response
                .as_mut()
                .and_then(|response| response.paging_state.take());
            let Some(token) = token else {
                continue;
            };
            guard.response = None;

            let Some(request) = guard.read_request_mut() else {
                core.set_error(DocOpError::illegal_state("read operation holds a write request"));
                continue;
            };
            match request.innermost_mut(config.max_index_nesting_depth) {
                Ok(innermost) => innermost.paging_state = Some(token),
                Err(e) => {
                    core.set_error(e);
                    continue;
                }
            }
            // The catalog version is only checked on the first round; later
            // rounds rely on the store's schema-version check.
            request.catalog_version = None;

            drop(guard);
            retained.push(op);
        }
        self.active = retained;
    }

    /// Number of sub-operations kept for the next round
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Snapshot of the active sub-operations' requests
    pub fn active_requests(&self) -> Vec<ReadRequest> {
        self.active
            .iter()
            .filter_map(|op| op.lock().read_request().cloned())
            .collect()
    }

    /// Whether more fan-out combinations remain to be produced
    pub fn can_produce_more_ops(&self) -> bool {
        self.can_produce_more_ops
    }

    /// The fan-out cursor, if the read is fanned out
    pub fn fan_out(&self) -> Option<&FanOut> {
        self.fan_out.as_ref()
    }

    /// The prototype request
    pub fn template(&self) -> &ReadRequest {
        &self.template
    }
}

impl OperationKind for ReadOp {
    const NAME: &'static str = "read";
    const ALLOWS_BUFFERING: bool = false;

    fn init_round(&mut self) {
        self.template.return_paging_state = true;
    }

    fn prepare_round(
        &mut self,
        core: &mut OpCore,
        config: &EngineConfig,
    ) -> DocOpResult<Vec<SharedOp>> {
        self.set_request_prefetch_limit(core.exec_params(), config);
        self.set_row_mark(core.exec_params());

        if self.can_produce_more_ops {
            self.initialize_next_ops(config.request_limit.saturating_sub(self.active.len()));
        }
        Ok(self.active.clone())
    }

    fn receive_response(&mut self, core: &mut OpCore, config: &EngineConfig) {
        for op in &self.active {
            if let Err(e) = check_op(&op.lock()) {
                core.set_error(e);
            }
        }
        if core.has_error() {
            core.set_end_of_data(true);
            return;
        }

        if core.is_canceled() {
            warn!(
                table = self.table.table_id(),
                sub_ops = self.active.len(),
                "discarding read results of a canceled operation"
            );
            core.set_end_of_data(true);
            return;
        }

        for op in &self.active {
            let mut guard = op.lock();
            if let Some(response) = guard.response.as_mut() {
                core.write_to_cache(std::mem::take(&mut response.rows_data));
            }
        }

        self.advance_pagination(core, config);
        if core.has_error() {
            core.set_end_of_data(true);
            return;
        }
        core.set_end_of_data(self.active.is_empty() && !self.can_produce_more_ops);
    }
}

impl Operation<ReadOp> {
    /// Read with the table's unbound prototype request (a full scan).
    pub fn new(
        session: Arc<dyn Session>,
        table: Arc<dyn TableDescriptor>,
        config: Arc<EngineConfig>,
    ) -> DocOpResult<Self> {
        let template = table.new_read_request();
        Self::with_prototype(session, table, config, template)
    }

    /// Read with a prototype whose predicates have already been bound.
    ///
    /// # Errors
    ///
    /// `IllegalState` when the partition predicates do not cover exactly the
    /// table's hash columns, the index chain is too deep, or the fan-out
    /// overflows; `InvalidConfig` when the configuration is unusable.
    pub fn with_prototype(
        session: Arc<dyn Session>,
        table: Arc<dyn TableDescriptor>,
        config: Arc<EngineConfig>,
        prototype: ReadRequest,
    ) -> DocOpResult<Self> {
        let kind = ReadOp::new(table, prototype, &config)?;
        Ok(Operation::from_kind(session, config, kind))
    }

    /// Number of sub-operations that will be reissued next round
    pub fn active_count(&self) -> usize {
        self.with_kind(|_, read| read.active_count())
    }

    /// Requests of the sub-operations that will be reissued next round
    pub fn active_requests(&self) -> Vec<ReadRequest> {
        self.with_kind(|_, read| read.active_requests())
    }

    /// Whether more fan-out combinations remain
    pub fn can_produce_more_ops(&self) -> bool {
        self.with_kind(|_, read| read.can_produce_more_ops())
    }

    /// `(cursor, total)` of the fan-out, if the read is fanned out
    pub fn fan_out_progress(&self) -> Option<(usize, usize)> {
        self.with_kind(|_, read| read.fan_out().map(|f| (f.cursor(), f.total())))
    }

    /// Snapshot of the prototype request
    pub fn template(&self) -> ReadRequest {
        self.with_kind(|_, read| read.template().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docop_core::RowLockMode;

    fn params(limit_count: i64, limit_offset: i64, use_default: bool) -> ExecParams {
        ExecParams {
            limit_count,
            limit_offset,
            limit_use_default: use_default,
            row_mark: None,
        }
    }

    #[test]
    fn test_forward_scan_uses_prefetch_limit() {
        let config = EngineConfig::new().with_prefetch_limit(1024);
        let limit = ReadOp::request_limit(&ExecParams::with_default_limit(1024), true, &config);
        assert_eq!(limit, 1024);
    }

    #[test]
    fn test_backward_scan_scales_down() {
        let config = EngineConfig::new()
            .with_prefetch_limit(1024)
            .with_backward_prefetch_scale_factor(0.0625);
        let limit = ReadOp::request_limit(&params(0, 0, true), false, &config);
        assert_eq!(limit, 64);
    }

    #[test]
    fn test_backward_scan_never_below_one() {
        let config = EngineConfig::new()
            .with_prefetch_limit(10)
            .with_backward_prefetch_scale_factor(0.01);
        assert_eq!(ReadOp::request_limit(&params(0, 0, true), false, &config), 1);

        let zero = EngineConfig::new().with_backward_prefetch_scale_factor(0.0);
        assert_eq!(ReadOp::request_limit(&params(0, 0, true), false, &zero), 1);
    }

    #[test]
    fn test_statement_limit_caps_request() {
        let config = EngineConfig::new().with_prefetch_limit(1024);
        assert_eq!(ReadOp::request_limit(&params(40, 10, false), true, &config), 50);
    }

    #[test]
    fn test_statement_limit_ignored_with_default() {
        let config = EngineConfig::new().with_prefetch_limit(1024);
        assert_eq!(ReadOp::request_limit(&params(40, 10, true), true, &config), 1024);
    }

    #[test]
    fn test_negative_statement_rows_request_one_row() {
        let config = EngineConfig::new().with_prefetch_limit(1024);
        assert_eq!(ReadOp::request_limit(&params(-5, 0, false), true, &config), 1);
        assert_eq!(ReadOp::request_limit(&params(0, 0, false), true, &config), 1);
        assert_eq!(ReadOp::request_limit(&params(i64::MIN, -1, false), false, &config), 1);
    }

    #[test]
    fn test_large_statement_limit_capped_by_prediction() {
        let config = EngineConfig::new().with_prefetch_limit(1024);
        assert_eq!(ReadOp::request_limit(&params(5000, 0, false), true, &config), 1024);
    }

    #[test]
    fn test_row_mark_applied_and_cleared() {
        struct Table;
        impl TableDescriptor for Table {
            fn table_id(&self) -> &str {
                "t"
            }
            fn num_hash_key_columns(&self) -> usize {
                0
            }
            fn new_read_request(&self) -> ReadRequest {
                ReadRequest::new("t")
            }
            fn new_write_request(&self, kind: docop_core::WriteKind) -> docop_core::WriteRequest {
                docop_core::WriteRequest::new("t", kind)
            }
        }

        let mut read =
            ReadOp::new(Arc::new(Table), ReadRequest::new("t"), &EngineConfig::default()).unwrap();
        let mut locked = params(1, 0, true);
        locked.row_mark = Some(RowLockMode::Exclusive);
        read.set_row_mark(&locked);
        assert_eq!(read.template().row_lock, Some(RowLockMode::Exclusive));

        read.set_row_mark(&params(1, 0, true));
        assert_eq!(read.template().row_lock, None);
    }
}
