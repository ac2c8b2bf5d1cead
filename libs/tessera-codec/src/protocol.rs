//! Request and response message bodies (native protocol v5 layout).
//!
//! Only the body is handled here; the frame header (version, stream id,
//! flags, length, compression) belongs to the framing layer.

use bytes::{BufMut, Bytes, BytesMut};

use tessera_api::{ColumnSpec, ConsistencyLevel, Frame, LogicalType, Opcode};

use crate::error::ProtocolError;
use crate::primitives::{
    read_bytes, read_framed_value, read_int, read_long_string, read_short, read_short_bytes,
    read_string, read_string_list, write_bytes, write_long_string, write_short_bytes, write_string,
    write_string_list,
};

// ═══════════════════════════════════════════════════════════════
//  Flags and kinds
// ═══════════════════════════════════════════════════════════════

const PREPARE_WITH_KEYSPACE: i32 = 0x01;

const QUERY_VALUES: i32 = 0x01;
const QUERY_SKIP_METADATA: i32 = 0x02;
const QUERY_PAGE_SIZE: i32 = 0x04;
const QUERY_PAGING_STATE: i32 = 0x08;
const QUERY_SERIAL_CONSISTENCY: i32 = 0x10;
const QUERY_KEYSPACE: i32 = 0x80;

const RESULT_VOID: i32 = 0x0001;
const RESULT_ROWS: i32 = 0x0002;
const RESULT_SET_KEYSPACE: i32 = 0x0003;
const RESULT_PREPARED: i32 = 0x0004;
const RESULT_SCHEMA_CHANGE: i32 = 0x0005;

const META_GLOBAL_TABLES_SPEC: i32 = 0x0001;
const META_HAS_MORE_PAGES: i32 = 0x0002;
const META_NO_METADATA: i32 = 0x0004;
const META_METADATA_CHANGED: i32 = 0x0008;

// ═══════════════════════════════════════════════════════════════
//  Query parameters
// ═══════════════════════════════════════════════════════════════

/// Parameters shared by QUERY and EXECUTE.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParameters {
    pub consistency: ConsistencyLevel,
    /// Positional values, each already in `[value]` form.
    pub values: Vec<Bytes>,
    pub skip_metadata: bool,
    pub page_size: Option<i32>,
    pub paging_state: Option<Bytes>,
    pub serial_consistency: Option<ConsistencyLevel>,
    pub keyspace: Option<String>,
}

impl QueryParameters {
    pub fn new(consistency: ConsistencyLevel) -> Self {
        Self {
            consistency,
            ..Self::default()
        }
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut flags = 0;
        if !self.values.is_empty() {
            flags |= QUERY_VALUES;
        }
        if self.skip_metadata {
            flags |= QUERY_SKIP_METADATA;
        }
        if self.page_size.is_some() {
            flags |= QUERY_PAGE_SIZE;
        }
        if self.paging_state.is_some() {
            flags |= QUERY_PAGING_STATE;
        }
        if self.serial_consistency.is_some() {
            flags |= QUERY_SERIAL_CONSISTENCY;
        }
        if self.keyspace.is_some() {
            flags |= QUERY_KEYSPACE;
        }

        buf.put_u16(self.consistency.code());
        buf.put_i32(flags);
        if !self.values.is_empty() {
            let n = u16::try_from(self.values.len()).map_err(|_| {
                ProtocolError::invalid("query parameters", format!("{} values", self.values.len()))
            })?;
            buf.put_u16(n);
            for value in &self.values {
                buf.put_slice(value);
            }
        }
        if let Some(page_size) = self.page_size {
            buf.put_i32(page_size);
        }
        if let Some(state) = &self.paging_state {
            write_bytes(buf, Some(&state[..]))?;
        }
        if let Some(serial) = self.serial_consistency {
            buf.put_u16(serial.code());
        }
        if let Some(keyspace) = &self.keyspace {
            write_string(buf, keyspace)?;
        }
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let consistency = ConsistencyLevel::from_code(read_short(buf)?)?;
        let flags = read_int(buf)?;
        let mut params = Self::new(consistency);

        if flags & QUERY_VALUES != 0 {
            let n = read_short(buf)?;
            params.values = (0..n).map(|_| read_framed_value(buf)).collect::<Result<Vec<_>, _>>()?;
        }
        params.skip_metadata = flags & QUERY_SKIP_METADATA != 0;
        if flags & QUERY_PAGE_SIZE != 0 {
            params.page_size = Some(read_int(buf)?);
        }
        if flags & QUERY_PAGING_STATE != 0 {
            params.paging_state = read_bytes(buf)?;
        }
        if flags & QUERY_SERIAL_CONSISTENCY != 0 {
            params.serial_consistency = Some(ConsistencyLevel::from_code(read_short(buf)?)?);
        }
        if flags & QUERY_KEYSPACE != 0 {
            params.keyspace = Some(read_string(buf)?);
        }
        Ok(params)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Requests
// ═══════════════════════════════════════════════════════════════

/// PREPARE: `[long string query][int flags][string keyspace]?`
#[derive(Debug, Clone, PartialEq)]
pub struct PrepareRequest {
    pub query: String,
    pub keyspace: Option<String>,
}

impl PrepareRequest {
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut buf = BytesMut::with_capacity(self.query.len() + 16);
        write_long_string(&mut buf, &self.query)?;
        match &self.keyspace {
            Some(keyspace) => {
                buf.put_i32(PREPARE_WITH_KEYSPACE);
                write_string(&mut buf, keyspace)?;
            }
            None => buf.put_i32(0),
        }
        Ok(Frame::new(Opcode::Prepare, buf.freeze()))
    }

    pub fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let query = read_long_string(&mut body)?;
        let flags = read_int(&mut body)?;
        let keyspace = if flags & PREPARE_WITH_KEYSPACE != 0 {
            Some(read_string(&mut body)?)
        } else {
            None
        };
        Ok(Self { query, keyspace })
    }
}

/// EXECUTE: `[short bytes id][short bytes result_metadata_id]<query parameters>`
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    pub id: Bytes,
    pub result_metadata_id: Bytes,
    pub params: QueryParameters,
}

impl ExecuteRequest {
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut buf = BytesMut::new();
        write_short_bytes(&mut buf, &self.id)?;
        write_short_bytes(&mut buf, &self.result_metadata_id)?;
        self.params.encode(&mut buf)?;
        Ok(Frame::new(Opcode::Execute, buf.freeze()))
    }

    pub fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let id = read_short_bytes(&mut body)?;
        let result_metadata_id = read_short_bytes(&mut body)?;
        let params = QueryParameters::decode(&mut body)?;
        Ok(Self {
            id,
            result_metadata_id,
            params,
        })
    }
}

/// QUERY: `[long string query]<query parameters>`
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query: String,
    pub params: QueryParameters,
}

impl QueryRequest {
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut buf = BytesMut::with_capacity(self.query.len() + 16);
        write_long_string(&mut buf, &self.query)?;
        self.params.encode(&mut buf)?;
        Ok(Frame::new(Opcode::Query, buf.freeze()))
    }

    pub fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let query = read_long_string(&mut body)?;
        let params = QueryParameters::decode(&mut body)?;
        Ok(Self { query, params })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Column types and specs
// ═══════════════════════════════════════════════════════════════

fn write_type(buf: &mut BytesMut, ty: &LogicalType) {
    let id: u16 = match ty {
        LogicalType::BigInt => 0x0002,
        LogicalType::Blob => 0x0003,
        LogicalType::Boolean => 0x0004,
        LogicalType::Decimal => 0x0006,
        LogicalType::Double => 0x0007,
        LogicalType::Float => 0x0008,
        LogicalType::Int => 0x0009,
        LogicalType::Timestamp => 0x000B,
        LogicalType::Uuid => 0x000C,
        LogicalType::Text => 0x000D,
        LogicalType::VarInt => 0x000E,
        LogicalType::Inet => 0x0010,
        LogicalType::List(_) => 0x0020,
        LogicalType::Map(..) => 0x0021,
        LogicalType::Set(_) => 0x0022,
    };
    buf.put_u16(id);
    match ty {
        LogicalType::List(e) | LogicalType::Set(e) => write_type(buf, e),
        LogicalType::Map(k, v) => {
            write_type(buf, k);
            write_type(buf, v);
        }
        _ => {}
    }
}

fn read_type(buf: &mut Bytes) -> Result<LogicalType, ProtocolError> {
    let id = read_short(buf)?;
    let ty = match id {
        0x0001 | 0x000D => LogicalType::Text,
        0x0002 | 0x0005 => LogicalType::BigInt,
        0x0003 => LogicalType::Blob,
        0x0004 => LogicalType::Boolean,
        0x0006 => LogicalType::Decimal,
        0x0007 => LogicalType::Double,
        0x0008 => LogicalType::Float,
        0x0009 => LogicalType::Int,
        0x000B => LogicalType::Timestamp,
        0x000C | 0x000F => LogicalType::Uuid,
        0x000E => LogicalType::VarInt,
        0x0010 => LogicalType::Inet,
        0x0020 => LogicalType::list(read_type(buf)?),
        0x0021 => {
            let k = read_type(buf)?;
            let v = read_type(buf)?;
            LogicalType::map(k, v)
        }
        0x0022 => LogicalType::set(read_type(buf)?),
        0x0000 => {
            let class = read_string(buf)?;
            return Err(ProtocolError::invalid("column type", format!("custom type {class}")));
        }
        other => return Err(ProtocolError::UnsupportedType(other)),
    };
    Ok(ty)
}

/// Shared keyspace/table when every column belongs to the same table.
fn global_table(columns: &[ColumnSpec]) -> Option<(&str, &str)> {
    let first = columns.first()?;
    columns
        .iter()
        .all(|c| c.keyspace == first.keyspace && c.table == first.table)
        .then_some((first.keyspace.as_str(), first.table.as_str()))
}

fn write_column_specs(
    buf: &mut BytesMut,
    columns: &[ColumnSpec],
    global: Option<(&str, &str)>,
) -> Result<(), ProtocolError> {
    if let Some((keyspace, table)) = global {
        write_string(buf, keyspace)?;
        write_string(buf, table)?;
    }
    for column in columns {
        if global.is_none() {
            write_string(buf, &column.keyspace)?;
            write_string(buf, &column.table)?;
        }
        write_string(buf, &column.name)?;
        write_type(buf, &column.ty);
    }
    Ok(())
}

fn read_column_specs(buf: &mut Bytes, flags: i32, count: usize) -> Result<Vec<ColumnSpec>, ProtocolError> {
    let global = if flags & META_GLOBAL_TABLES_SPEC != 0 {
        Some((read_string(buf)?, read_string(buf)?))
    } else {
        None
    };
    let mut columns = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let (keyspace, table) = match &global {
            Some((k, t)) => (k.clone(), t.clone()),
            None => (read_string(buf)?, read_string(buf)?),
        };
        let name = read_string(buf)?;
        let ty = read_type(buf)?;
        columns.push(ColumnSpec {
            keyspace,
            table,
            name,
            ty,
        });
    }
    Ok(columns)
}

fn read_count(buf: &mut Bytes, what: &'static str) -> Result<usize, ProtocolError> {
    let n = read_int(buf)?;
    usize::try_from(n).map_err(|_| ProtocolError::invalid(what, format!("negative count {n}")))
}

fn put_count(buf: &mut BytesMut, n: usize, what: &'static str) -> Result<(), ProtocolError> {
    let n = i32::try_from(n).map_err(|_| ProtocolError::invalid(what, format!("count {n}")))?;
    buf.put_i32(n);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  Rows
// ═══════════════════════════════════════════════════════════════

/// `<metadata>` of a Rows result (also the result part of a Prepared result).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowsMetadata {
    pub column_count: usize,
    /// `None` when the server sent no_metadata (skip_metadata was requested).
    pub columns: Option<Vec<ColumnSpec>>,
    pub paging_state: Option<Bytes>,
    /// Present when the server reports metadata_changed.
    pub new_metadata_id: Option<Bytes>,
}

impl RowsMetadata {
    pub fn with_columns(columns: Vec<ColumnSpec>) -> Self {
        Self {
            column_count: columns.len(),
            columns: Some(columns),
            ..Self::default()
        }
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let global = self.columns.as_deref().and_then(global_table);
        let mut flags = 0;
        if global.is_some() {
            flags |= META_GLOBAL_TABLES_SPEC;
        }
        if self.paging_state.is_some() {
            flags |= META_HAS_MORE_PAGES;
        }
        if self.columns.is_none() {
            flags |= META_NO_METADATA;
        }
        if self.new_metadata_id.is_some() {
            flags |= META_METADATA_CHANGED;
        }

        buf.put_i32(flags);
        put_count(buf, self.column_count, "rows metadata")?;
        if let Some(state) = &self.paging_state {
            write_bytes(buf, Some(&state[..]))?;
        }
        if let Some(id) = &self.new_metadata_id {
            write_short_bytes(buf, id)?;
        }
        if let Some(columns) = &self.columns {
            write_column_specs(buf, columns, global)?;
        }
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let flags = read_int(buf)?;
        let column_count = read_count(buf, "rows metadata")?;
        let paging_state = if flags & META_HAS_MORE_PAGES != 0 {
            read_bytes(buf)?
        } else {
            None
        };
        let new_metadata_id = if flags & META_METADATA_CHANGED != 0 {
            Some(read_short_bytes(buf)?)
        } else {
            None
        };
        let columns = if flags & META_NO_METADATA != 0 {
            None
        } else {
            Some(read_column_specs(buf, flags, column_count)?)
        };
        Ok(Self {
            column_count,
            columns,
            paging_state,
            new_metadata_id,
        })
    }
}

/// Rows result: metadata, row count and the undecoded row content.
///
/// `content` holds `row_count × column_count` cells, each a `[bytes]`.
/// Splitting it into rows is left to the consumer so that rows decode lazily.
#[derive(Debug, Clone, PartialEq)]
pub struct RowsBody {
    pub metadata: RowsMetadata,
    pub row_count: usize,
    pub content: Bytes,
}

impl RowsBody {
    /// Build a rows body from cell payloads (`None` = null).
    pub fn from_cells(metadata: RowsMetadata, rows: &[Vec<Option<Bytes>>]) -> Result<Self, ProtocolError> {
        let mut content = BytesMut::new();
        for row in rows {
            if row.len() != metadata.column_count {
                return Err(ProtocolError::invalid(
                    "rows",
                    format!("row of {} cells for {} columns", row.len(), metadata.column_count),
                ));
            }
            for cell in row {
                write_bytes(&mut content, cell.as_deref())?;
            }
        }
        Ok(Self {
            metadata,
            row_count: rows.len(),
            content: content.freeze(),
        })
    }
}

/// Split the next row (`column_count` cells) off the front of `content`.
pub fn read_row(content: &mut Bytes, column_count: usize) -> Result<Vec<Option<Bytes>>, ProtocolError> {
    (0..column_count).map(|_| read_bytes(content)).collect()
}

// ═══════════════════════════════════════════════════════════════
//  Prepared / schema change
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBody {
    pub id: Bytes,
    pub result_metadata_id: Bytes,
    pub parameters: Vec<ColumnSpec>,
    pub pk_indices: Vec<u16>,
    pub result: RowsMetadata,
}

impl PreparedBody {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        write_short_bytes(buf, &self.id)?;
        write_short_bytes(buf, &self.result_metadata_id)?;

        let global = global_table(&self.parameters);
        buf.put_i32(if global.is_some() { META_GLOBAL_TABLES_SPEC } else { 0 });
        put_count(buf, self.parameters.len(), "prepared metadata")?;
        put_count(buf, self.pk_indices.len(), "prepared metadata")?;
        for index in &self.pk_indices {
            buf.put_u16(*index);
        }
        write_column_specs(buf, &self.parameters, global)?;
        self.result.encode(buf)
    }

    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let id = read_short_bytes(buf)?;
        let result_metadata_id = read_short_bytes(buf)?;

        let flags = read_int(buf)?;
        let column_count = read_count(buf, "prepared metadata")?;
        let pk_count = read_count(buf, "prepared metadata")?;
        let pk_indices = (0..pk_count).map(|_| read_short(buf)).collect::<Result<Vec<_>, _>>()?;
        let parameters = read_column_specs(buf, flags, column_count)?;
        let result = RowsMetadata::decode(buf)?;
        Ok(Self {
            id,
            result_metadata_id,
            parameters,
            pk_indices,
            result,
        })
    }
}

/// Schema change result: what changed and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    /// CREATED, UPDATED or DROPPED.
    pub change_type: String,
    /// KEYSPACE, TABLE, TYPE, FUNCTION or AGGREGATE.
    pub target: String,
    pub keyspace: String,
    /// Table/type/function name; absent for keyspace changes.
    pub name: Option<String>,
    /// Argument types of a changed function or aggregate.
    pub arguments: Vec<String>,
}

impl SchemaChange {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        write_string(buf, &self.change_type)?;
        write_string(buf, &self.target)?;
        write_string(buf, &self.keyspace)?;
        if let Some(name) = &self.name {
            write_string(buf, name)?;
        }
        if matches!(self.target.as_str(), "FUNCTION" | "AGGREGATE") {
            write_string_list(buf, &self.arguments)?;
        }
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        let change_type = read_string(buf)?;
        let target = read_string(buf)?;
        let keyspace = read_string(buf)?;
        let (name, arguments) = match target.as_str() {
            "KEYSPACE" => (None, Vec::new()),
            "TABLE" | "TYPE" => (Some(read_string(buf)?), Vec::new()),
            "FUNCTION" | "AGGREGATE" => (Some(read_string(buf)?), read_string_list(buf)?),
            other => {
                return Err(ProtocolError::invalid(
                    "schema change",
                    format!("unknown target {other}"),
                ));
            }
        };
        Ok(Self {
            change_type,
            target,
            keyspace,
            name,
            arguments,
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Responses
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum ResultBody {
    Void,
    Rows(RowsBody),
    SetKeyspace(String),
    Prepared(PreparedBody),
    SchemaChange(SchemaChange),
}

impl ResultBody {
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut buf = BytesMut::new();
        match self {
            ResultBody::Void => buf.put_i32(RESULT_VOID),
            ResultBody::Rows(rows) => {
                buf.put_i32(RESULT_ROWS);
                rows.metadata.encode(&mut buf)?;
                put_count(&mut buf, rows.row_count, "rows")?;
                buf.put_slice(&rows.content);
            }
            ResultBody::SetKeyspace(keyspace) => {
                buf.put_i32(RESULT_SET_KEYSPACE);
                write_string(&mut buf, keyspace)?;
            }
            ResultBody::Prepared(prepared) => {
                buf.put_i32(RESULT_PREPARED);
                prepared.encode(&mut buf)?;
            }
            ResultBody::SchemaChange(change) => {
                buf.put_i32(RESULT_SCHEMA_CHANGE);
                change.encode(&mut buf)?;
            }
        }
        Ok(Frame::new(Opcode::Result, buf.freeze()))
    }

    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let kind = read_int(&mut body)?;
        let result = match kind {
            RESULT_VOID => ResultBody::Void,
            RESULT_ROWS => {
                let metadata = RowsMetadata::decode(&mut body)?;
                let row_count = read_count(&mut body, "rows")?;
                ResultBody::Rows(RowsBody {
                    metadata,
                    row_count,
                    content: body,
                })
            }
            RESULT_SET_KEYSPACE => ResultBody::SetKeyspace(read_string(&mut body)?),
            RESULT_PREPARED => ResultBody::Prepared(PreparedBody::decode(&mut body)?),
            RESULT_SCHEMA_CHANGE => ResultBody::SchemaChange(SchemaChange::decode(&mut body)?),
            other => {
                return Err(ProtocolError::invalid("result", format!("unknown kind 0x{other:04x}")));
            }
        };
        Ok(result)
    }
}

/// Server error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ServerError,
    ProtocolError,
    BadCredentials,
    Unavailable,
    Overloaded,
    IsBootstrapping,
    TruncateError,
    WriteTimeout,
    ReadTimeout,
    ReadFailure,
    FunctionFailure,
    WriteFailure,
    SyntaxError,
    Unauthorized,
    Invalid,
    ConfigError,
    AlreadyExists,
    Unprepared,
    Other(i32),
}

impl ErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            0x0000 => Self::ServerError,
            0x000A => Self::ProtocolError,
            0x0100 => Self::BadCredentials,
            0x1000 => Self::Unavailable,
            0x1001 => Self::Overloaded,
            0x1002 => Self::IsBootstrapping,
            0x1003 => Self::TruncateError,
            0x1100 => Self::WriteTimeout,
            0x1200 => Self::ReadTimeout,
            0x1300 => Self::ReadFailure,
            0x1400 => Self::FunctionFailure,
            0x1500 => Self::WriteFailure,
            0x2000 => Self::SyntaxError,
            0x2100 => Self::Unauthorized,
            0x2200 => Self::Invalid,
            0x2300 => Self::ConfigError,
            0x2400 => Self::AlreadyExists,
            0x2500 => Self::Unprepared,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::ServerError => 0x0000,
            Self::ProtocolError => 0x000A,
            Self::BadCredentials => 0x0100,
            Self::Unavailable => 0x1000,
            Self::Overloaded => 0x1001,
            Self::IsBootstrapping => 0x1002,
            Self::TruncateError => 0x1003,
            Self::WriteTimeout => 0x1100,
            Self::ReadTimeout => 0x1200,
            Self::ReadFailure => 0x1300,
            Self::FunctionFailure => 0x1400,
            Self::WriteFailure => 0x1500,
            Self::SyntaxError => 0x2000,
            Self::Unauthorized => 0x2100,
            Self::Invalid => 0x2200,
            Self::ConfigError => 0x2300,
            Self::AlreadyExists => 0x2400,
            Self::Unprepared => 0x2500,
            Self::Other(code) => code,
        }
    }

    /// Errors meaning the statement itself is unacceptable (as opposed to
    /// the cluster being unable to serve it right now).
    pub fn is_statement_error(self) -> bool {
        matches!(
            self,
            Self::SyntaxError | Self::Invalid | Self::Unauthorized | Self::ConfigError | Self::AlreadyExists
        )
    }
}

/// Code-specific payload following the message of an ERROR body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ErrorDetail {
    #[default]
    None,
    Unprepared { id: Bytes },
    AlreadyExists { keyspace: String, table: String },
}

/// ERROR body: `[int code][string message]` plus detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: ErrorCode,
    pub message: String,
    pub detail: ErrorDetail,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} (0x{:04x}): {}", self.code, self.code.code(), self.message)
    }
}

impl ServerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: ErrorDetail::None,
        }
    }

    pub fn unprepared(id: Bytes) -> Self {
        Self {
            code: ErrorCode::Unprepared,
            message: "prepared statement not found".to_string(),
            detail: ErrorDetail::Unprepared { id },
        }
    }

    pub fn already_exists(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        let keyspace = keyspace.into();
        let table = table.into();
        Self {
            code: ErrorCode::AlreadyExists,
            message: format!("table {keyspace}.{table} already exists"),
            detail: ErrorDetail::AlreadyExists { keyspace, table },
        }
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut buf = BytesMut::new();
        buf.put_i32(self.code.code());
        write_string(&mut buf, &self.message)?;
        match &self.detail {
            ErrorDetail::None => {}
            ErrorDetail::Unprepared { id } => write_short_bytes(&mut buf, id)?,
            ErrorDetail::AlreadyExists { keyspace, table } => {
                write_string(&mut buf, keyspace)?;
                write_string(&mut buf, table)?;
            }
        }
        Ok(Frame::new(Opcode::Error, buf.freeze()))
    }

    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let code = ErrorCode::from_code(read_int(&mut body)?);
        let message = read_string(&mut body)?;
        // Details of other codes (unavailable counts, timeouts, failures) are
        // not interpreted; they stay in the unread remainder.
        let detail = match code {
            ErrorCode::Unprepared => ErrorDetail::Unprepared {
                id: read_short_bytes(&mut body)?,
            },
            ErrorCode::AlreadyExists => ErrorDetail::AlreadyExists {
                keyspace: read_string(&mut body)?,
                table: read_string(&mut body)?,
            },
            _ => ErrorDetail::None,
        };
        Ok(Self {
            code,
            message,
            detail,
        })
    }
}

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Result(ResultBody),
    Error(ServerError),
}

impl Response {
    pub fn decode(frame: Frame) -> Result<Self, ProtocolError> {
        match frame.opcode {
            Opcode::Result => Ok(Response::Result(ResultBody::decode(frame.body)?)),
            Opcode::Error => Ok(Response::Error(ServerError::decode(frame.body)?)),
            other => Err(ProtocolError::UnexpectedOpcode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::encode;
    use tessera_api::Value;

    fn spec(name: &str, ty: LogicalType) -> ColumnSpec {
        ColumnSpec::new("tester", "t", name, ty)
    }

    #[test]
    fn prepare_body_layout() {
        let frame = PrepareRequest {
            query: "SELECT".into(),
            keyspace: Some("ks".into()),
        }
        .to_frame()
        .unwrap();
        assert_eq!(frame.opcode, Opcode::Prepare);
        assert_eq!(
            &frame.body[..],
            &[0, 0, 0, 6, b'S', b'E', b'L', b'E', b'C', b'T', 0, 0, 0, 1, 0, 2, b'k', b's']
        );
        assert_eq!(
            PrepareRequest::decode(frame.body).unwrap().keyspace.as_deref(),
            Some("ks")
        );
    }

    #[test]
    fn execute_body_carries_id_and_values_verbatim() {
        let id = Bytes::from_static(&[0xDE, 0xAD]);
        let mut params = QueryParameters::new(ConsistencyLevel::LocalQuorum);
        params.values = vec![
            encode(&Value::Int(7), &LogicalType::Int).unwrap(),
            encode(&Value::Null, &LogicalType::Text).unwrap(),
        ];
        params.skip_metadata = true;
        let request = ExecuteRequest {
            id: id.clone(),
            result_metadata_id: Bytes::new(),
            params,
        };
        let frame = request.to_frame().unwrap();
        assert_eq!(&frame.body[..6], &[0, 2, 0xDE, 0xAD, 0, 0]);
        // consistency LOCAL_QUORUM, flags values|skip_metadata, 2 values
        assert_eq!(&frame.body[6..14], &[0, 6, 0, 0, 0, 3, 0, 2]);
        assert_eq!(ExecuteRequest::decode(frame.body).unwrap(), request);
    }

    #[test]
    fn query_request_with_serial_and_keyspace() {
        let mut params = QueryParameters::new(ConsistencyLevel::Quorum);
        params.serial_consistency = Some(ConsistencyLevel::LocalSerial);
        params.keyspace = Some("tester".into());
        let request = QueryRequest {
            query: "SELECT * FROM t".into(),
            params,
        };
        let decoded = QueryRequest::decode(request.to_frame().unwrap().body).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn unknown_consistency_code_is_rejected() {
        let mut body = BytesMut::new();
        write_long_string(&mut body, "SELECT").unwrap();
        body.put_u16(0x00FF);
        body.put_i32(0);
        assert!(matches!(
            QueryRequest::decode(body.freeze()),
            Err(ProtocolError::Consistency(_))
        ));
    }

    #[test]
    fn prepared_result_round_trip() {
        let body = ResultBody::Prepared(PreparedBody {
            id: Bytes::from_static(b"0123456789abcdef"),
            result_metadata_id: Bytes::from_static(b"meta"),
            parameters: vec![
                spec("id", LogicalType::Uuid),
                spec("tags", LogicalType::set(LogicalType::Text)),
            ],
            pk_indices: vec![0],
            result: RowsMetadata::default(),
        });
        let frame = body.to_frame().unwrap();
        assert_eq!(Response::decode(frame).unwrap(), Response::Result(body));
    }

    #[test]
    fn rows_without_metadata_and_with_paging_state() {
        let metadata = RowsMetadata {
            column_count: 2,
            columns: None,
            paging_state: Some(Bytes::from_static(b"page")),
            new_metadata_id: None,
        };
        let rows = vec![
            vec![Some(Bytes::from_static(&[0, 0, 0, 1])), None],
            vec![Some(Bytes::from_static(&[0, 0, 0, 2])), Some(Bytes::from_static(b"x"))],
        ];
        let body = RowsBody::from_cells(metadata, &rows).unwrap();
        let frame = ResultBody::Rows(body.clone()).to_frame().unwrap();
        let Response::Result(ResultBody::Rows(decoded)) = Response::decode(frame).unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(decoded, body);

        let mut content = decoded.content;
        assert_eq!(read_row(&mut content, 2).unwrap(), rows[0]);
        assert_eq!(read_row(&mut content, 2).unwrap(), rows[1]);
        assert!(content.is_empty());
    }

    #[test]
    fn mixed_tables_use_per_column_specs() {
        let metadata = RowsMetadata::with_columns(vec![
            ColumnSpec::new("a", "t1", "x", LogicalType::Int),
            ColumnSpec::new("b", "t2", "y", LogicalType::map(LogicalType::Text, LogicalType::Inet)),
        ]);
        let body = RowsBody::from_cells(metadata, &[]).unwrap();
        let frame = ResultBody::Rows(body.clone()).to_frame().unwrap();
        assert_eq!(Response::decode(frame).unwrap(), Response::Result(ResultBody::Rows(body)));
    }

    #[test]
    fn error_details_decode() {
        let unprepared = ServerError::unprepared(Bytes::from_static(b"id"));
        assert_eq!(
            Response::decode(unprepared.to_frame().unwrap()).unwrap(),
            Response::Error(unprepared)
        );

        let exists = ServerError::already_exists("tester", "t");
        let Response::Error(decoded) = Response::decode(exists.to_frame().unwrap()).unwrap() else {
            panic!("expected error");
        };
        assert_eq!(decoded.code, ErrorCode::AlreadyExists);
        assert!(decoded.code.is_statement_error());
    }

    #[test]
    fn schema_change_targets() {
        let change = ResultBody::SchemaChange(SchemaChange {
            change_type: "CREATED".into(),
            target: "TABLE".into(),
            keyspace: "tester".into(),
            name: Some("t".into()),
            arguments: vec![],
        });
        let frame = change.to_frame().unwrap();
        assert_eq!(Response::decode(frame).unwrap(), Response::Result(change));
    }

    #[test]
    fn unsupported_column_type_is_reported() {
        let mut body = BytesMut::new();
        body.put_i32(RESULT_ROWS);
        body.put_i32(META_GLOBAL_TABLES_SPEC);
        body.put_i32(1);
        write_string(&mut body, "ks").unwrap();
        write_string(&mut body, "t").unwrap();
        write_string(&mut body, "d").unwrap();
        body.put_u16(0x0011); // date
        body.put_i32(0);
        assert!(matches!(
            Response::decode(Frame::new(Opcode::Result, body.freeze())),
            Err(ProtocolError::UnsupportedType(0x0011))
        ));
    }
}
