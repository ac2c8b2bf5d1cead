use tessera_api::{LogicalType, Opcode, UnknownConsistency};

/// Value-level codec failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    /// Payload bytes do not form a valid value of the declared type.
    #[error("malformed {ty} value: {reason}")]
    MalformedValue { ty: LogicalType, reason: String },

    /// A non-null value whose tag does not match the target type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: LogicalType, actual: String },

    #[error("{ty} value too large to encode: {len} bytes")]
    TooLarge { ty: LogicalType, len: usize },
}

impl CodecError {
    pub(crate) fn malformed(ty: &LogicalType, reason: impl Into<String>) -> Self {
        Self::MalformedValue {
            ty: ty.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(expected: &LogicalType, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.clone(),
            actual: actual.into(),
        }
    }
}

/// Message-level failure: a request or response body that cannot be
/// encoded or decoded.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("truncated {what}: need {needed} bytes, {available} available")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },

    #[error("unexpected {0:?} frame")]
    UnexpectedOpcode(Opcode),

    #[error("unsupported column type option 0x{0:04x}")]
    UnsupportedType(u16),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Consistency(#[from] UnknownConsistency),
}

impl ProtocolError {
    pub(crate) fn invalid(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            what,
            reason: reason.into(),
        }
    }
}
