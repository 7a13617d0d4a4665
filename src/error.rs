use thiserror::Error;

/// The standard Stratum protocol error codes a share validator can surface to the submitter.
///
/// Mirrors the code table a miner actually sees on the wire; every variant here round-trips
/// through [`crate::stratum::protocol::StratumError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StratumErrorCode {
    Other = 20,
    JobNotFound = 21,
    DuplicateShare = 22,
    LowDifficultyShare = 23,
    UnauthorizedWorker = 24,
    NotSubscribed = 25,
}

impl StratumErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn message(self) -> &'static str {
        match self {
            StratumErrorCode::Other => "unsupported method",
            StratumErrorCode::JobNotFound => "job not found",
            StratumErrorCode::DuplicateShare => "duplicate share",
            StratumErrorCode::LowDifficultyShare => "low difficulty share",
            StratumErrorCode::UnauthorizedWorker => "unauthorized worker",
            StratumErrorCode::NotSubscribed => "not subscribed",
        }
    }
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("database error: {0}")]
    Database(#[from] redis::RedisError),

    #[error("daemon rpc error: {0}")]
    Daemon(String),

    #[error("all daemon endpoints failed: {0}")]
    DaemonAggregate(String),

    #[error("stratum protocol error: {0}")]
    StratumProtocol(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("duplicate share")]
    DuplicateShare,

    #[error("low difficulty share ({0})")]
    LowDifficultyShare(f64),

    #[error("unauthorized worker")]
    UnauthorizedWorker,

    #[error("not subscribed")]
    NotSubscribed,

    #[error("payout error: {0}")]
    Payout(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("miner not found: {0}")]
    MinerNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("other error: {0}")]
    Other(String),
}

impl PoolError {
    /// Map a share-validation failure onto its protocol-visible Stratum error code.
    ///
    /// Returns `None` for errors that never surface as a stratum response (e.g. database
    /// errors raised from an out-of-band maintenance task).
    pub fn stratum_code(&self) -> Option<StratumErrorCode> {
        match self {
            PoolError::JobNotFound(_) => Some(StratumErrorCode::JobNotFound),
            PoolError::DuplicateShare => Some(StratumErrorCode::DuplicateShare),
            PoolError::LowDifficultyShare(_) => Some(StratumErrorCode::LowDifficultyShare),
            PoolError::UnauthorizedWorker => Some(StratumErrorCode::UnauthorizedWorker),
            PoolError::NotSubscribed => Some(StratumErrorCode::NotSubscribed),
            PoolError::StratumProtocol(_) => Some(StratumErrorCode::Other),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;

impl axum::response::IntoResponse for PoolError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match self {
            PoolError::MinerNotFound(_) | PoolError::JobNotFound(_) => StatusCode::NOT_FOUND,
            PoolError::Configuration(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
