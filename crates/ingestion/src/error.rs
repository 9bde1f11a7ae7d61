use std::time::Duration;
use thiserror::Error;

/// Failure talking to the full node or the indexer.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },
    #[error("retryable status {status} from {endpoint}")]
    RetryableStatus { endpoint: String, status: u16 },
    #[error("unexpected status {status} from {endpoint}: {body}")]
    UnexpectedStatus {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("malformed payload from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::RetryableStatus { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetLimit {
    Attempts,
    Deadline,
}

impl BudgetLimit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attempts => "attempts",
            Self::Deadline => "deadline",
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("confirmation wait exhausted {} after {attempts} polls ({waited:?})", limit.as_str())]
    Timeout {
        limit: BudgetLimit,
        attempts: u32,
        waited: Duration,
    },
    #[error("confirmation wait cancelled")]
    Cancelled,
    #[error("full node rejected confirmation query: {0}")]
    Node(#[source] RemoteError),
    #[error("candidate queue closed")]
    CandidateQueueClosed,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("transaction not finalized after {attempts} lookups")]
    Exhausted { attempts: u32 },
    #[error("transaction not finalized within {waited:?} ({attempts} lookups)")]
    DeadlineExceeded { attempts: u32, waited: Duration },
    #[error("indexer answered with unexpected status {status}")]
    UnexpectedStatus { status: u16 },
    #[error("indexer returned an unusable record: {0}")]
    Malformed(#[source] RemoteError),
    #[error("transaction lookup cancelled")]
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("admission queue closed")]
    Closed,
    #[error("submission cancelled")]
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("event channel closed")]
    Closed,
    #[error("delivery cancelled")]
    Cancelled,
}
