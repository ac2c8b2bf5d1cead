use tessera_engine::DriverError;

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("arguments: {0}")]
    Args(String),

    #[error("{0}")]
    Driver(#[from] DriverError),

    #[error("read back of {what} differs: wrote {wrote}, read {read}")]
    Mismatch {
        what: String,
        wrote: String,
        read: String,
    },

    #[error("expected {expected} distinct statement ids, got {actual}")]
    DistinctIds { expected: usize, actual: usize },

    #[error("schema agreement not reached after '{0}'")]
    Agreement(String),

    #[error("interrupted")]
    Interrupted,

    #[error("task: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("summary: {0}")]
    Summary(#[from] serde_json::Error),
}
