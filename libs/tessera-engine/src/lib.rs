//! Prepared-statement execution engine: statement cache, binding,
//! execution with transparent re-prepare, lazy result decoding and schema
//! agreement after DDL.

pub mod agreement;
pub mod cache;
pub mod config;
pub mod error;
pub mod policy;
pub mod result;
pub mod session;
pub mod statement;

pub use agreement::{SchemaAgreement, SchemaAgreementWaiter};
pub use cache::{CacheKey, Lookup, StatementCache};
pub use config::DriverConfig;
pub use error::DriverError;
pub use policy::RoundRobin;
pub use result::{ColumnIndex, ResultSet, Row};
pub use session::{Abort, Session, SessionStats};
pub use statement::{BoundStatement, PreparedStatement, bind, is_schema_statement};
