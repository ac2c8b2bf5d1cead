//! Wire encoding for the native protocol: value payloads and the message
//! bodies the execution engine sends and receives.

pub mod error;
pub mod primitives;
pub mod protocol;
pub mod value;

pub use error::{CodecError, ProtocolError};
pub use protocol::{
    ErrorCode, ErrorDetail, ExecuteRequest, PrepareRequest, PreparedBody, QueryParameters,
    QueryRequest, Response, ResultBody, RowsBody, RowsMetadata, SchemaChange, ServerError,
};
