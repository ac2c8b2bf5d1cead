use std::sync::Arc;

use bytes::Bytes;

use tessera_api::{ColumnSpec, ColumnSpecs, ConsistencyLevel, LogicalType, Value};
use tessera_codec::PreparedBody;
use tessera_codec::value;

use crate::error::DriverError;

// ═══════════════════════════════════════════════════════════════
//  PreparedStatement
// ═══════════════════════════════════════════════════════════════

/// A statement the server has prepared: its opaque id plus the parameter
/// and result metadata returned with it. Immutable; shared through `Arc`.
#[derive(Debug)]
pub struct PreparedStatement {
    query: String,
    keyspace: Option<String>,
    id: Bytes,
    result_metadata_id: Bytes,
    parameters: ColumnSpecs,
    pk_indices: Vec<u16>,
    result_columns: Option<ColumnSpecs>,
}

impl PreparedStatement {
    pub fn new(query: impl Into<String>, keyspace: Option<String>, body: PreparedBody) -> Self {
        let result_columns = body
            .result
            .columns
            .filter(|columns| !columns.is_empty())
            .map(ColumnSpecs::from);
        Self {
            query: query.into(),
            keyspace,
            id: body.id,
            result_metadata_id: body.result_metadata_id,
            parameters: ColumnSpecs::from(body.parameters),
            pk_indices: body.pk_indices,
            result_columns,
        }
    }

    /// Same statement with result metadata the server reported as changed.
    pub fn with_result_metadata(&self, result_metadata_id: Bytes, columns: Vec<ColumnSpec>) -> Self {
        Self {
            query: self.query.clone(),
            keyspace: self.keyspace.clone(),
            id: self.id.clone(),
            result_metadata_id,
            parameters: self.parameters.clone(),
            pk_indices: self.pk_indices.clone(),
            result_columns: Some(ColumnSpecs::from(columns)),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    pub fn id(&self) -> &Bytes {
        &self.id
    }

    pub fn result_metadata_id(&self) -> &Bytes {
        &self.result_metadata_id
    }

    pub fn parameters(&self) -> &ColumnSpecs {
        &self.parameters
    }

    /// Indices of the parameters that form the partition key.
    pub fn pk_indices(&self) -> &[u16] {
        &self.pk_indices
    }

    /// Columns of the rows this statement returns; `None` for statements
    /// that return no rows.
    pub fn result_columns(&self) -> Option<&ColumnSpecs> {
        self.result_columns.as_ref()
    }

    pub fn is_schema_change(&self) -> bool {
        is_schema_statement(&self.query)
    }
}

/// Whether `query` mutates the schema (CREATE, ALTER or DROP).
pub fn is_schema_statement(query: &str) -> bool {
    let keyword = query
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    ["CREATE", "ALTER", "DROP"]
        .iter()
        .any(|ddl| keyword.eq_ignore_ascii_case(ddl))
}

// ═══════════════════════════════════════════════════════════════
//  BoundStatement
// ═══════════════════════════════════════════════════════════════

/// A prepared statement with encoded values and the consistency to run at.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    statement: Arc<PreparedStatement>,
    values: Vec<Bytes>,
    consistency: ConsistencyLevel,
    serial_consistency: Option<ConsistencyLevel>,
    paging_state: Option<Bytes>,
}

impl BoundStatement {
    pub fn statement(&self) -> &Arc<PreparedStatement> {
        &self.statement
    }

    /// Encoded values, each in `[int length][payload]` form.
    pub fn values(&self) -> &[Bytes] {
        &self.values
    }

    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency
    }

    pub fn serial_consistency(&self) -> Option<ConsistencyLevel> {
        self.serial_consistency
    }

    pub fn paging_state(&self) -> Option<&Bytes> {
        self.paging_state.as_ref()
    }

    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_serial_consistency(mut self, serial: Option<ConsistencyLevel>) -> Self {
        self.serial_consistency = serial;
        self
    }

    /// Resume from the page a previous result set ended at.
    pub fn with_paging_state(mut self, state: Option<Bytes>) -> Self {
        self.paging_state = state;
        self
    }

    /// Same values against a re-prepared copy of the statement.
    pub(crate) fn rebased(&self, statement: Arc<PreparedStatement>) -> Self {
        Self {
            statement,
            ..self.clone()
        }
    }
}

/// Validate `values` against the statement's parameters and encode them.
///
/// Each value must be `Null` or carry exactly the declared type.
pub fn bind(
    statement: &Arc<PreparedStatement>,
    values: &[Value],
    consistency: ConsistencyLevel,
) -> Result<BoundStatement, DriverError> {
    let parameters = statement.parameters();
    if values.len() != parameters.len() {
        return Err(DriverError::ArityMismatch {
            expected: parameters.len(),
            actual: values.len(),
        });
    }

    let mut encoded = Vec::with_capacity(values.len());
    for (index, (value, param)) in values.iter().zip(parameters.iter()).enumerate() {
        if !value.conforms_to(&param.ty) {
            return Err(DriverError::TypeMismatch {
                index,
                name: param.name.clone(),
                expected: param.ty.clone(),
                actual: value.type_name(),
            });
        }
        encoded.push(value::encode(value, &param.ty)?);
    }

    Ok(BoundStatement {
        statement: statement.clone(),
        values: encoded,
        consistency,
        serial_consistency: None,
        paging_state: None,
    })
}

/// Encode positional values of an unprepared query, each by its own tag.
pub(crate) fn encode_untyped(values: &[Value]) -> Result<Vec<Bytes>, DriverError> {
    values
        .iter()
        .map(|v| value::encode(v, &natural_type(v)).map_err(DriverError::from))
        .collect()
}

/// The type a value encodes as without metadata. Nulls and empty
/// collections encode the same under any element type.
fn natural_type(value: &Value) -> LogicalType {
    match value {
        Value::Null | Value::Blob(_) => LogicalType::Blob,
        Value::Boolean(_) => LogicalType::Boolean,
        Value::Int(_) => LogicalType::Int,
        Value::BigInt(_) => LogicalType::BigInt,
        Value::Float(_) => LogicalType::Float,
        Value::Double(_) => LogicalType::Double,
        Value::Decimal(_) => LogicalType::Decimal,
        Value::VarInt(_) => LogicalType::VarInt,
        Value::Text(_) => LogicalType::Text,
        Value::Timestamp(_) => LogicalType::Timestamp,
        Value::Uuid(_) => LogicalType::Uuid,
        Value::Inet(_) => LogicalType::Inet,
        Value::List(items) => LogicalType::list(items.first().map_or(LogicalType::Blob, natural_type)),
        Value::Set(items) => LogicalType::set(items.first().map_or(LogicalType::Blob, natural_type)),
        Value::Map(entries) => match entries.first() {
            Some((k, v)) => LogicalType::map(natural_type(k), natural_type(v)),
            None => LogicalType::map(LogicalType::Blob, LogicalType::Blob),
        },
    }
}
