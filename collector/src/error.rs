use rust_decimal::Decimal;
use thiserror::Error;

/// 上游 API 呼叫失敗的分類。
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UpstreamError {
    #[error("upstream request timed out: {0}")]
    Timeout(String),
    #[error("upstream unreachable: {0}")]
    Connection(String),
    #[error("upstream returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("upstream rejected credentials: {0}")]
    Auth(String),
    #[error("malformed upstream payload: {0}")]
    Malformed(String),
}

impl UpstreamError {
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => UpstreamError::Auth(format!("status {status}: {}", message.into())),
            _ => UpstreamError::Status {
                status,
                message: message.into(),
            },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, UpstreamError::Auth(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamError::Timeout(_) | UpstreamError::Connection(_) | UpstreamError::Status { .. }
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must not be negative (got {value})")]
    Negative { field: &'static str, value: Decimal },
    #[error("field `{field}` must be positive (got {value})")]
    NotPositive { field: &'static str, value: Decimal },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
    #[error("snapshot store rejected batch: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("collector `{0}` is already registered")]
    DuplicateName(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("collector initialization failed: {0}")]
    Initialization(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("cannot compute next boundary: {0}")]
    Clock(String),
    #[error("collection cycle aborted: {0}")]
    CycleAborted(String),
}
