//! Wire-level error taxonomy for depot RPCs.
//!
//! Every failure a handler can produce is one of a closed set of kinds, each
//! carrying a stable numeric code and a fixed message. Underlying causes
//! (io errors, store driver errors) are logged where they are detected and
//! never serialized into a response.

use thiserror::Error;

/// Status code space shared with the dispatch protocol (gRPC-compatible
/// values). Responses carry the numeric value.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

/// Terminal failure of an RPC call. The `Display` text is the exact message
/// sent to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("cannot unmarshal type")]
    Unmarshal,

    #[error("cannot marshal type")]
    Marshal,

    #[error("validation failed: {}", .violations.join("; "))]
    ValidationFailed { violations: Vec<String> },

    #[error("user ID in context not allowed")]
    IdentityNotAllowed,

    #[error("file not found")]
    FileNotFound,

    #[error("storage read failed")]
    StoreRead,

    #[error("storage write failed")]
    StoreWrite,

    #[error("unknown rpc: {0}")]
    UnknownRpc(String),
}

impl RpcError {
    /// Stable wire code for this kind.
    pub fn code(&self) -> ErrorCode {
        match self {
            RpcError::ValidationFailed { .. } | RpcError::IdentityNotAllowed => {
                ErrorCode::InvalidArgument
            }
            RpcError::UnknownRpc(_) => ErrorCode::NotFound,
            RpcError::Unmarshal
            | RpcError::Marshal
            | RpcError::FileNotFound
            | RpcError::StoreRead
            | RpcError::StoreWrite => ErrorCode::Internal,
        }
    }
}
