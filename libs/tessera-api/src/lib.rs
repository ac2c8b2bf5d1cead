pub mod consistency;
pub mod error;
pub mod metadata;
pub mod transport;
pub mod types;

pub use consistency::ConsistencyLevel;
pub use error::{TransportError, UnknownConsistency, UnknownType};
pub use metadata::{ColumnSpec, ColumnSpecs, column_position};
pub use transport::{BoxFuture, Frame, LoadBalancer, NodeId, Opcode, SchemaVersion, Transport};
pub use types::{Decimal, FromValue, LogicalType, Value};
