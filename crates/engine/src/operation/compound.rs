//! Compound operation
//!
//! Placeholder for statements that span several physical operations under
//! one logical statement. It only defines construction and teardown; how
//! the parts are sequenced is left to the executor that composes them, and
//! no ordering or atomicity is promised here.

use super::{OpCore, Operation, OperationKind};
use docop_core::{DocOpResult, EngineConfig, Session, SharedOp};
use std::sync::Arc;

/// Compound-specific operation state. Holds nothing yet.
#[derive(Debug, Default)]
pub struct CompoundOp;

/// Compound operation handle
pub type CompoundOperation = Operation<CompoundOp>;

impl OperationKind for CompoundOp {
    const NAME: &'static str = "compound";
    const ALLOWS_BUFFERING: bool = false;

    fn prepare_round(
        &mut self,
        _core: &mut OpCore,
        _config: &EngineConfig,
    ) -> DocOpResult<Vec<SharedOp>> {
        Ok(Vec::new())
    }

    fn receive_response(&mut self, core: &mut OpCore, _config: &EngineConfig) {
        core.set_end_of_data(true);
    }
}

impl Operation<CompoundOp> {
    /// New compound operation bound to `session`
    pub fn new(session: Arc<dyn Session>, config: Arc<EngineConfig>) -> Self {
        Operation::from_kind(session, config, CompoundOp)
    }
}
