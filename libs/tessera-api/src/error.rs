use crate::transport::NodeId;

/// Failure reported by the transport collaborator.
///
/// `Unreachable` is the only kind the engine interprets: the schema agreement
/// waiter drops such nodes from its convergence set.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("node {0} is unreachable")]
    Unreachable(NodeId),

    #[error("connection to {node} closed: {reason}")]
    Closed { node: NodeId, reason: String },

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown consistency level: {0}")]
pub struct UnknownConsistency(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown column type: {0}")]
pub struct UnknownType(pub String);
