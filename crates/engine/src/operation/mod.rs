//! Operation state machine
//!
//! An operation turns one logical statement into rounds of physical
//! requests. The issuing thread drives it with `execute` / `get_result`;
//! the transport completes each round from an arbitrary thread through a
//! flush callback.
//!
//! ## Shared state
//!
//! Everything both sides touch (row-batch cache, end-of-data, outstanding
//! flag, cancellation, exec-status) sits behind one `parking_lot::Mutex`.
//! One `Condvar` wakes both `get_result` waiters (data, end, error) and
//! `abort_and_wait` waiters (outstanding round settled).
//!
//! ## Rounds
//!
//! ```text
//! execute()/get_result()
//!   -> kind.prepare_round()       (locked: shape requests, pick sub-ops)
//!   -> apply_async() per sub-op   (unlocked)
//!   -> flush_async(callback)      (unlocked)
//! callback
//!   -> receive_response()         (locked: statuses, cache, pagination)
//!   -> notify_all()
//! ```
//!
//! At most one round is outstanding. The flag is set before submission and
//! cleared only by the callback (or by a failed submission, which never
//! produces a callback).
//!
//! The callback owns an `Arc` of the shared state, so it can never run
//! against freed memory. `abort_and_wait` is still required before reusing
//! or dropping an operation whose round may be in flight: it is the only way
//! to know no late callback will touch the state.

pub mod compound;
pub mod read;
pub mod write;

use docop_core::{
    DocOpError, DocOpResult, EngineConfig, ExecParams, ReadTime, RowBatch, Session, SharedOp,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error};

pub use compound::{CompoundOp, CompoundOperation};
pub use read::{ReadOp, ReadOperation};
pub use write::{WriteOp, WriteOperation};

/// State common to every operation kind.
///
/// Only ever accessed with the operation's mutex held.
#[derive(Debug)]
pub struct OpCore {
    /// First failure seen; never overwritten once set
    exec_status: DocOpResult<()>,
    /// No more rounds will produce data
    end_of_data: bool,
    /// Mirrors `!cache.is_empty()`
    has_cached_data: bool,
    /// Set by `abort_and_wait`; never cleared
    canceled: bool,
    /// A round has been submitted and its callback has not run yet
    waiting_for_response: bool,
    cache: VecDeque<RowBatch>,
    exec_params: ExecParams,
    read_time: ReadTime,
}

impl OpCore {
    fn new(config: &EngineConfig) -> Self {
        Self {
            exec_status: Ok(()),
            end_of_data: false,
            has_cached_data: false,
            canceled: false,
            waiting_for_response: false,
            cache: VecDeque::new(),
            exec_params: ExecParams::with_default_limit(config.prefetch_limit),
            read_time: ReadTime::new(),
        }
    }

    /// Record a failure. The first failure wins.
    pub fn set_error(&mut self, err: DocOpError) {
        if self.exec_status.is_ok() {
            self.exec_status = Err(err);
        }
    }

    /// Whether a failure has been recorded
    pub fn has_error(&self) -> bool {
        self.exec_status.is_err()
    }

    /// Whether the operation has been canceled
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Mark that no further rounds will produce data
    pub fn set_end_of_data(&mut self, end_of_data: bool) {
        self.end_of_data = end_of_data;
    }

    /// Statement parameters
    pub fn exec_params(&self) -> &ExecParams {
        &self.exec_params
    }

    /// Append a batch to the cache. Empty batches are dropped.
    pub fn write_to_cache(&mut self, batch: RowBatch) {
        if !batch.is_empty() {
            self.cache.push_back(batch);
            self.has_cached_data = !self.cache.is_empty();
        }
    }

    /// Pop the oldest cached batch
    pub fn read_from_cache(&mut self) -> Option<RowBatch> {
        let batch = self.cache.pop_front();
        self.has_cached_data = !self.cache.is_empty();
        batch
    }

    /// Number of cached batches
    pub fn cached_batches(&self) -> usize {
        self.cache.len()
    }

    fn clear_cache(&mut self) {
        self.cache.clear();
        self.has_cached_data = false;
    }

    fn end_of_result(&self) -> bool {
        self.exec_status.is_ok() && !self.has_cached_data && self.end_of_data
    }
}

/// Behavior that differs between read, write and compound operations.
///
/// Every method runs with the operation's mutex held.
pub trait OperationKind: Send + 'static {
    /// Name used in log events
    const NAME: &'static str;

    /// Whether the transport may hold back this kind's sub-operations
    const ALLOWS_BUFFERING: bool;

    /// Reset kind-specific state at the start of `execute`
    fn init_round(&mut self) {}

    /// Shape the requests and return the sub-operations to submit this round.
    ///
    /// Returning no sub-operations ends the operation without a round.
    fn prepare_round(
        &mut self,
        core: &mut OpCore,
        config: &EngineConfig,
    ) -> DocOpResult<Vec<SharedOp>>;

    /// Every sub-operation of the round was buffered by the transport
    fn on_buffered(&mut self, core: &mut OpCore) {
        core.set_end_of_data(true);
    }

    /// Consume the responses of a round the transport reported as sent.
    fn receive_response(&mut self, core: &mut OpCore, config: &EngineConfig);
}

struct OperationState<K> {
    core: OpCore,
    kind: K,
}

enum Submission {
    Flushed,
    Buffered,
}

struct Shared<K: OperationKind> {
    session: Arc<dyn Session>,
    config: Arc<EngineConfig>,
    state: Mutex<OperationState<K>>,
    cond: Condvar,
}

impl<K: OperationKind> Shared<K> {
    /// Block until no round is outstanding, complaining first: callers must
    /// not start an execution while a round is in flight.
    fn init_round(&self, state: &mut MutexGuard<'_, OperationState<K>>) {
        if state.core.waiting_for_response {
            error!(
                kind = K::NAME,
                "execute called while a response is in flight; waiting for it"
            );
            while state.core.waiting_for_response {
                self.cond.wait(state);
            }
        }
        state.core.clear_cache();
        state.core.end_of_data = false;
        state.kind.init_round();
    }

    fn send_request_if_needed(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, OperationState<K>>,
    ) -> DocOpResult<()> {
        let core = &state.core;
        if !core.has_cached_data && !core.end_of_data && !core.waiting_for_response {
            self.send_request(state)?;
        }
        Ok(())
    }

    /// Submit one round. Returns whether a flush was started.
    ///
    /// Failures become the sticky exec-status and end the operation.
    fn send_request(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, OperationState<K>>,
    ) -> DocOpResult<bool> {
        let result = self.submit_round(state);
        if let Err(e) = &result {
            state.core.set_error(e.clone());
            state.core.end_of_data = true;
            self.cond.notify_all();
        }
        result
    }

    fn submit_round(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, OperationState<K>>,
    ) -> DocOpResult<bool> {
        if state.core.waiting_for_response {
            return Err(DocOpError::illegal_state(
                "request submitted while another is outstanding",
            ));
        }

        let ops = {
            let OperationState { core, kind } = &mut **state;
            kind.prepare_round(core, &self.config)?
        };
        if ops.is_empty() {
            debug!(kind = K::NAME, "nothing left to submit");
            state.core.end_of_data = true;
            return Ok(false);
        }

        debug!(kind = K::NAME, sub_ops = ops.len(), "sending request");
        state.core.waiting_for_response = true;
        let read_time = state.core.read_time.clone();

        // The transport may complete the round on this very thread, so the
        // lock is released while it runs.
        let submitted = MutexGuard::unlocked(state, || self.apply_and_flush(&ops, &read_time));

        match submitted {
            Ok(Submission::Flushed) => Ok(true),
            Ok(Submission::Buffered) => {
                state.core.waiting_for_response = false;
                let OperationState { core, kind } = &mut **state;
                kind.on_buffered(core);
                self.cond.notify_all();
                Ok(false)
            }
            Err(e) => {
                state.core.waiting_for_response = false;
                self.cond.notify_all();
                Err(e)
            }
        }
    }

    fn apply_and_flush(
        self: &Arc<Self>,
        ops: &[SharedOp],
        read_time: &ReadTime,
    ) -> DocOpResult<Submission> {
        let mut session = None;
        for op in ops {
            let outcome = self.session.apply_async(op, read_time)?;
            if outcome.buffered {
                if !K::ALLOWS_BUFFERING {
                    return Err(DocOpError::illegal_state(format!(
                        "{} operation must not be buffered",
                        K::NAME
                    )));
                }
                continue;
            }
            // All sub-operations of a round share one session.
            session = Some(outcome.session);
        }

        let Some(session) = session else {
            debug!(kind = K::NAME, "request buffered by the session");
            return Ok(Submission::Buffered);
        };

        let shared = Arc::clone(self);
        self.session
            .flush_async(session, Box::new(move |status| shared.receive_response(status)))?;
        Ok(Submission::Flushed)
    }

    fn receive_response(&self, status: DocOpResult<()>) {
        let mut state = self.state.lock();
        if !state.core.waiting_for_response {
            error!(kind = K::NAME, "response received with no request outstanding");
            return;
        }
        state.core.waiting_for_response = false;
        self.cond.notify_all();

        let OperationState { core, kind } = &mut *state;
        match status {
            Err(e) => {
                core.set_error(e);
                core.end_of_data = true;
            }
            Ok(()) => kind.receive_response(core, &self.config),
        }
        debug!(
            kind = K::NAME,
            cached = core.cache.len(),
            end_of_data = core.end_of_data,
            failed = core.exec_status.is_err(),
            "received response"
        );
    }
}

/// Handle to one logical statement's execution.
///
/// Constructed once per statement, reused across `execute` / `get_result`
/// pairs, and torn down only after `abort_and_wait` (or after the last
/// round has completed).
pub struct Operation<K: OperationKind> {
    shared: Arc<Shared<K>>,
}

impl<K: OperationKind> Operation<K> {
    pub(crate) fn from_kind(session: Arc<dyn Session>, config: Arc<EngineConfig>, kind: K) -> Self {
        let core = OpCore::new(&config);
        Self {
            shared: Arc::new(Shared {
                session,
                config,
                state: Mutex::new(OperationState { core, kind }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Use a read time chosen by the statement instead of letting the
    /// transport pick one.
    pub fn with_read_time(self, read_time: ReadTime) -> Self {
        self.shared.state.lock().core.read_time = read_time;
        self
    }

    /// Start an execution: reset the cache and submit the first round.
    ///
    /// Returns whether a request was actually sent.
    ///
    /// # Errors
    ///
    /// `OperationCanceled` after `abort_and_wait`, or the submission failure.
    pub fn execute(&self) -> DocOpResult<bool> {
        let mut state = self.shared.state.lock();
        if state.core.canceled {
            return Err(DocOpError::OperationCanceled);
        }
        self.shared.init_round(&mut state);
        if state.core.canceled {
            return Err(DocOpError::OperationCanceled);
        }
        self.shared.send_request(&mut state)
    }

    /// Pull the next row batch, blocking until one is available.
    ///
    /// Returns `Ok(None)` once all data has been returned. At most one batch
    /// is returned per call; when the cache drains the next round is
    /// prefetched before returning.
    ///
    /// # Errors
    ///
    /// `OperationCanceled` after cancellation, otherwise the sticky
    /// exec-status.
    pub fn get_result(&self) -> DocOpResult<Option<RowBatch>> {
        let mut state = self.shared.state.lock();
        if state.core.canceled {
            return Err(DocOpError::OperationCanceled);
        }
        state.core.exec_status.clone()?;

        self.shared.send_request_if_needed(&mut state)?;

        while !state.core.has_cached_data && !state.core.end_of_data && !state.core.canceled {
            self.shared.cond.wait(&mut state);
        }
        if state.core.canceled {
            return Err(DocOpError::OperationCanceled);
        }
        state.core.exec_status.clone()?;

        let batch = state.core.read_from_cache();

        // Prefetch failures are recorded as the sticky exec-status and
        // surface on the next call.
        let _ = self.shared.send_request_if_needed(&mut state);

        Ok(batch)
    }

    /// True once every batch has been returned and no error occurred.
    pub fn end_of_result(&self) -> bool {
        self.shared.state.lock().core.end_of_result()
    }

    /// The sticky exec-status
    pub fn exec_status(&self) -> DocOpResult<()> {
        self.shared.state.lock().core.exec_status.clone()
    }

    /// Replace the statement parameters. `None` keeps the current ones.
    pub fn set_exec_params(&self, params: Option<ExecParams>) {
        if let Some(params) = params {
            self.shared.state.lock().core.exec_params = params;
        }
    }

    /// Current statement parameters
    pub fn exec_params(&self) -> ExecParams {
        self.shared.state.lock().core.exec_params
    }

    /// Cancel the operation and block until no round is outstanding.
    ///
    /// Cached batches are dropped and end-of-data is forced, so
    /// `end_of_result` reports true once this returns (unless a failure was
    /// recorded).
    pub fn abort_and_wait(&self) {
        let mut state = self.shared.state.lock();
        state.core.canceled = true;
        self.shared.cond.notify_all();

        while state.core.waiting_for_response {
            self.shared.cond.wait(&mut state);
        }
        state.core.clear_cache();
        state.core.end_of_data = true;
    }

    /// Whether `abort_and_wait` has been called
    pub fn is_canceled(&self) -> bool {
        self.shared.state.lock().core.canceled
    }

    /// Whether a round is in flight
    pub fn is_request_outstanding(&self) -> bool {
        self.shared.state.lock().core.waiting_for_response
    }

    /// Read time shared by every round of this statement
    pub fn read_time(&self) -> ReadTime {
        self.shared.state.lock().core.read_time.clone()
    }

    /// Number of batches waiting to be pulled
    pub fn cached_batches(&self) -> usize {
        self.shared.state.lock().core.cached_batches()
    }

    /// Engine configuration this operation runs with
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub(crate) fn with_kind<R>(&self, f: impl FnOnce(&OpCore, &K) -> R) -> R {
        let state = self.shared.state.lock();
        f(&state.core, &state.kind)
    }

    pub(crate) fn with_kind_mut<R>(&self, f: impl FnOnce(&mut OpCore, &mut K) -> R) -> R {
        let mut state = self.shared.state.lock();
        let OperationState { core, kind } = &mut *state;
        f(core, kind)
    }
}

/// Object-safe view of any operation kind, for executors that hold a
/// heterogeneous set of statements.
pub trait DocOp: Send + Sync {
    /// See [`Operation::execute`]
    fn execute(&self) -> DocOpResult<bool>;
    /// See [`Operation::get_result`]
    fn get_result(&self) -> DocOpResult<Option<RowBatch>>;
    /// See [`Operation::end_of_result`]
    fn end_of_result(&self) -> bool;
    /// See [`Operation::exec_status`]
    fn exec_status(&self) -> DocOpResult<()>;
    /// See [`Operation::set_exec_params`]
    fn set_exec_params(&self, params: Option<ExecParams>);
    /// See [`Operation::abort_and_wait`]
    fn abort_and_wait(&self);
}

impl<K: OperationKind> DocOp for Operation<K> {
    fn execute(&self) -> DocOpResult<bool> {
        Operation::execute(self)
    }

    fn get_result(&self) -> DocOpResult<Option<RowBatch>> {
        Operation::get_result(self)
    }

    fn end_of_result(&self) -> bool {
        Operation::end_of_result(self)
    }

    fn exec_status(&self) -> DocOpResult<()> {
        Operation::exec_status(self)
    }

    fn set_exec_params(&self, params: Option<ExecParams>) {
        Operation::set_exec_params(self, params)
    }

    fn abort_and_wait(&self) {
        Operation::abort_and_wait(self)
    }
}
