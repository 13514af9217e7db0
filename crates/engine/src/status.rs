//! Translation of physical response statuses into `DocOpError`

use docop_core::{DocOpError, DocOpResult, ErrorCode, PhysicalOp, PhysicalResponse, ResponseStatus};

/// Map a failed response to `DuplicateKey` or `QueryError`.
///
/// A missing domain code becomes `ErrorCode::INTERNAL_ERROR`; the
/// transaction-conflict code is carried through when present.
pub fn check_response(response: &PhysicalResponse) -> DocOpResult<()> {
    if response.succeeded() {
        return Ok(());
    }

    let message = response.error_message.clone();
    let code = response.error_code.unwrap_or(ErrorCode::INTERNAL_ERROR);
    let txn = response.txn_error_code;

    Err(match response.status {
        ResponseStatus::DuplicateKey => DocOpError::DuplicateKey { message, code, txn },
        _ => DocOpError::QueryError { message, code, txn },
    })
}

/// Check the response of a flushed op. A flushed op without a response is
/// a transport contract violation.
pub fn check_op(op: &PhysicalOp) -> DocOpResult<()> {
    match &op.response {
        Some(response) => check_response(response),
        None => Err(DocOpError::illegal_state(
            "transport reported success but left a sub-operation without a response",
        )),
    }
}
