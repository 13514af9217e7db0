//! Shared test fixtures: a scripted in-memory session and a table descriptor.
//!
//! The session answers every physical request with a responder closure.
//! Flush completions run inline, on a spawned thread, or are held until the
//! test releases them, so tests can step an operation round by round.

#![allow(dead_code)]

use docop_core::{
    ApplyOutcome, ColumnPredicate, Datum, DocOpError, DocOpResult, FlushCallback,
    PhysicalRequest, PhysicalResponse, ReadRequest, ReadTime, Session, SessionHandle, SharedOp,
    TableDescriptor, WriteKind, WriteRequest,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Read time the session picks when a statement has none.
pub const PICKED_READ_TIME: u64 = 1_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// ============================================================================
// Table descriptor
// ============================================================================

pub struct TestTable {
    pub id: String,
    pub hash_columns: usize,
}

impl TestTable {
    pub fn new(id: &str, hash_columns: usize) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            hash_columns,
        })
    }
}

impl TableDescriptor for TestTable {
    fn table_id(&self) -> &str {
        &self.id
    }

    fn num_hash_key_columns(&self) -> usize {
        self.hash_columns
    }

    fn new_read_request(&self) -> ReadRequest {
        let mut req = ReadRequest::new(self.id.clone());
        req.catalog_version = Some(1);
        req
    }

    fn new_write_request(&self, kind: WriteKind) -> WriteRequest {
        let mut req = WriteRequest::new(self.id.clone(), kind);
        req.catalog_version = Some(1);
        req
    }
}

// ============================================================================
// Responders
// ============================================================================

pub type Responder = Arc<dyn Fn(&PhysicalRequest) -> PhysicalResponse + Send + Sync>;

/// Partition key of a read as text, e.g. `"1/10"`, or `"scan"` when unbound.
pub fn key_of(req: &ReadRequest) -> String {
    if req.partition_values.is_empty() {
        return "scan".to_string();
    }
    req.partition_values
        .iter()
        .map(|p| match p {
            ColumnPredicate::Eq(Datum::Int(v)) => v.to_string(),
            other => format!("{:?}", other),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn paging_offset(req: &ReadRequest) -> u64 {
    let mut innermost = req.clone();
    let inner = innermost
        .innermost_mut(64)
        .expect("test chains are shallow");
    inner
        .paging_state
        .as_ref()
        .map(|p| String::from_utf8_lossy(&p.0).parse().expect("numeric token"))
        .unwrap_or(0)
}

/// Every partition key holds `rows_per_key` rows. A read returns at most
/// `limit` of them as `"<key>:<start>-<end>"` and a token when rows remain.
/// Writes succeed with one row affected.
pub fn paged_table(rows_per_key: u64) -> Responder {
    Arc::new(move |request| match request {
        PhysicalRequest::Read(req) => {
            let start = paging_offset(req);
            let limit = req.limit.unwrap_or(u64::MAX);
            let end = start.saturating_add(limit).min(rows_per_key);
            let rows = if end > start {
                format!("{}:{}-{}", key_of(req), start, end).into_bytes()
            } else {
                Vec::new()
            };
            let resp = PhysicalResponse::ok(rows);
            if end < rows_per_key {
                resp.with_paging_state(end.to_string().into_bytes())
            } else {
                resp
            }
        }
        PhysicalRequest::Write(_) => PhysicalResponse::ok(Vec::new()).with_rows_affected(1),
    })
}

/// Answer every request with the same response.
pub fn fixed(response: PhysicalResponse) -> Responder {
    Arc::new(move |_| response.clone())
}

// ============================================================================
// Scripted session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Complete on the flushing thread before `flush_async` returns
    Inline,
    /// Complete on a freshly spawned thread
    Thread,
    /// Hold the completion until `release_next` is called
    Manual,
}

type HeldFlush = (Vec<SharedOp>, DocOpResult<()>, FlushCallback);

#[derive(Default)]
struct SessionState {
    next_session: u64,
    queued: Vec<SharedOp>,
    buffered: Vec<SharedOp>,
    held: VecDeque<HeldFlush>,
    applied: Vec<PhysicalRequest>,
    read_times: Vec<ReadTime>,
    flushes: usize,
    buffer_writes: bool,
    buffer_reads: bool,
    fail_next_apply: Option<DocOpError>,
    fail_next_flush_start: Option<DocOpError>,
    fail_next_flush_status: Option<DocOpError>,
    threads: Vec<JoinHandle<()>>,
}

pub struct ScriptedSession {
    completion: Completion,
    responder: Responder,
    state: Mutex<SessionState>,
}

impl ScriptedSession {
    pub fn new(completion: Completion, responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            completion,
            responder,
            state: Mutex::new(SessionState::default()),
        })
    }

    pub fn set_buffer_writes(&self, buffer: bool) {
        self.state.lock().buffer_writes = buffer;
    }

    pub fn set_buffer_reads(&self, buffer: bool) {
        self.state.lock().buffer_reads = buffer;
    }

    pub fn fail_next_apply(&self, err: DocOpError) {
        self.state.lock().fail_next_apply = Some(err);
    }

    pub fn fail_next_flush_start(&self, err: DocOpError) {
        self.state.lock().fail_next_flush_start = Some(err);
    }

    /// The next flush starts fine but its callback reports `err`.
    pub fn fail_next_flush_status(&self, err: DocOpError) {
        self.state.lock().fail_next_flush_status = Some(err);
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }

    pub fn applied(&self) -> Vec<PhysicalRequest> {
        self.state.lock().applied.clone()
    }

    pub fn applied_reads(&self) -> Vec<ReadRequest> {
        self.applied()
            .into_iter()
            .filter_map(|r| match r {
                PhysicalRequest::Read(req) => Some(req),
                PhysicalRequest::Write(_) => None,
            })
            .collect()
    }

    pub fn read_times(&self) -> Vec<ReadTime> {
        self.state.lock().read_times.clone()
    }

    pub fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }

    pub fn buffered_count(&self) -> usize {
        self.state.lock().buffered.len()
    }

    /// Complete the oldest held flush on the calling thread.
    pub fn release_next(&self) -> bool {
        let next = self.state.lock().held.pop_front();
        match next {
            Some((ops, status, callback)) => {
                self.complete(ops, status, callback);
                true
            }
            None => false,
        }
    }

    /// Flush buffered writes, as a later statement in the transaction would.
    pub fn flush_buffered(&self) {
        let ops = std::mem::take(&mut self.state.lock().buffered);
        for op in &ops {
            self.respond(op);
        }
    }

    /// Join every completion thread spawned so far.
    pub fn join_threads(&self) {
        let threads = std::mem::take(&mut self.state.lock().threads);
        for handle in threads {
            handle.join().expect("completion thread panicked");
        }
    }

    fn respond(&self, op: &SharedOp) {
        let mut guard = op.lock();
        let response = (self.responder)(&guard.request);
        guard.response = Some(response);
    }

    fn complete(&self, ops: Vec<SharedOp>, status: DocOpResult<()>, callback: FlushCallback) {
        if status.is_ok() {
            for op in &ops {
                self.respond(op);
            }
        }
        callback(status);
    }
}

impl Session for ScriptedSession {
    fn apply_async(&self, op: &SharedOp, read_time: &ReadTime) -> DocOpResult<ApplyOutcome> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_next_apply.take() {
            return Err(err);
        }

        read_time.get_or_pick(|| PICKED_READ_TIME);
        state.read_times.push(read_time.clone());

        let request = op.lock().request.clone();
        let buffered = match &request {
            PhysicalRequest::Write(_) => state.buffer_writes,
            PhysicalRequest::Read(_) => state.buffer_reads,
        };
        state.applied.push(request);

        if buffered {
            state.buffered.push(Arc::clone(op));
        } else {
            state.queued.push(Arc::clone(op));
        }
        Ok(ApplyOutcome {
            buffered,
            session: SessionHandle(state.next_session),
        })
    }

    fn flush_async(&self, session: SessionHandle, callback: FlushCallback) -> DocOpResult<()> {
        let (ops, status) = {
            let mut state = self.state.lock();
            assert_eq!(session, SessionHandle(state.next_session));
            if let Some(err) = state.fail_next_flush_start.take() {
                state.queued.clear();
                return Err(err);
            }
            state.flushes += 1;
            state.next_session += 1;
            let ops = std::mem::take(&mut state.queued);
            let status = match state.fail_next_flush_status.take() {
                Some(err) => Err(err),
                None => Ok(()),
            };
            (ops, status)
        };

        match self.completion {
            Completion::Inline => self.complete(ops, status, callback),
            Completion::Thread => {
                let responder = Arc::clone(&self.responder);
                let handle = std::thread::spawn(move || {
                    if status.is_ok() {
                        for op in &ops {
                            let mut guard = op.lock();
                            let response = responder(&guard.request);
                            guard.response = Some(response);
                        }
                    }
                    callback(status);
                });
                self.state.lock().threads.push(handle);
            }
            Completion::Manual => self.state.lock().held.push_back((ops, status, callback)),
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn ints(values: &[i64]) -> ColumnPredicate {
    ColumnPredicate::In(values.iter().map(|v| Datum::Int(*v)).collect())
}

/// Pull every remaining batch as text.
pub fn drain(op: &docop_engine::ReadOperation) -> DocOpResult<Vec<String>> {
    let mut rows = Vec::new();
    while let Some(batch) = op.get_result()? {
        rows.push(String::from_utf8_lossy(batch.as_bytes()).into_owned());
    }
    Ok(rows)
}
