use std::time::Duration;

use tessera_api::{LogicalType, NodeId, TransportError};
use tessera_codec::{CodecError, ErrorCode, ProtocolError, ServerError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("config error: {0}")]
    Config(String),

    /// A result cell that does not decode as its column's type. Scoped to
    /// one cell; other cells and rows of the set stay readable.
    #[error("malformed value in row {row}, column '{column}': {reason}")]
    MalformedValue {
        row: usize,
        column: String,
        reason: String,
    },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("parameter {index} ('{name}'): expected {expected}, got {actual}")]
    TypeMismatch {
        index: usize,
        name: String,
        expected: LogicalType,
        actual: String,
    },

    #[error("statement takes {expected} values, {actual} given")]
    ArityMismatch { expected: usize, actual: usize },

    /// The server refused the statement itself (syntax, unknown table,
    /// already exists, unauthorized).
    #[error("query invalid ({code:?}): {message}")]
    QueryInvalid { code: ErrorCode, message: String },

    #[error("server error: {0}")]
    Server(ServerError),

    /// The server forgot the statement again after a re-prepare.
    #[error("prepared statement is unknown to the server after re-prepare: {query}")]
    StaleStatementId { query: String },

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("column index {index} out of range for {len} columns")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("operation cancelled")]
    Cancelled,

    #[error("request to {node} timed out after {after:?}")]
    Timeout { node: NodeId, after: Duration },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no node available")]
    NoNodeAvailable,
}

impl DriverError {
    /// Add context to the error.
    ///
    /// Only message-carrying variants change; the rest keep their structure.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            DriverError::Config(msg) => DriverError::Config(format!("{ctx}: {msg}")),
            DriverError::QueryInvalid { code, message } => DriverError::QueryInvalid {
                code,
                message: format!("{ctx}: {message}"),
            },
            other => other,
        }
    }

    /// Classify an ERROR response.
    pub(crate) fn from_server(err: ServerError) -> Self {
        if err.code.is_statement_error() {
            DriverError::QueryInvalid {
                code: err.code,
                message: err.message,
            }
        } else {
            DriverError::Server(err)
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            DriverError::QueryInvalid {
                code: ErrorCode::AlreadyExists,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_errors_become_query_invalid() {
        let err = DriverError::from_server(ServerError::already_exists("ks", "t"));
        assert!(err.is_already_exists());

        let err = DriverError::from_server(ServerError::new(ErrorCode::Overloaded, "busy"));
        assert!(matches!(err, DriverError::Server(_)));
    }

    #[test]
    fn context_prefixes_messages() {
        let err = DriverError::Config("bad interval".into()).with_context("driver.toml");
        assert_eq!(err.to_string(), "config error: driver.toml: bad interval");
    }
}
