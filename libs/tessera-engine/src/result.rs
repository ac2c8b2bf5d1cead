use std::cell::OnceCell;

use bytes::Bytes;

use tessera_api::{ColumnSpec, ColumnSpecs, FromValue, Value, column_position};
use tessera_codec::protocol::read_row;
use tessera_codec::{ProtocolError, ResultBody, RowsBody, SchemaChange, value};

use crate::agreement::SchemaAgreement;
use crate::error::DriverError;

// ═══════════════════════════════════════════════════════════════
//  ResultSet
// ═══════════════════════════════════════════════════════════════

/// Rows of one response, decoded lazily as the set is iterated.
///
/// Forward-only: each row is split off the response buffer when yielded,
/// and cell values decode on first access.
#[derive(Debug)]
pub struct ResultSet {
    columns: ColumnSpecs,
    content: Bytes,
    remaining: usize,
    next_row: usize,
    paging_state: Option<Bytes>,
    keyspace: Option<String>,
    schema_change: Option<SchemaChange>,
    schema_agreement: Option<SchemaAgreement>,
}

impl ResultSet {
    pub(crate) fn empty() -> Self {
        Self {
            columns: ColumnSpecs::from(Vec::new()),
            content: Bytes::new(),
            remaining: 0,
            next_row: 0,
            paging_state: None,
            keyspace: None,
            schema_change: None,
            schema_agreement: None,
        }
    }

    /// Wrap a RESULT body. `known_columns` is used when the server omitted
    /// the rows metadata (skip_metadata).
    pub(crate) fn from_body(body: ResultBody, known_columns: Option<&ColumnSpecs>) -> Result<Self, DriverError> {
        match body {
            ResultBody::Void => Ok(Self::empty()),
            ResultBody::Rows(rows) => Self::from_rows(rows, known_columns),
            ResultBody::SetKeyspace(keyspace) => Ok(Self {
                keyspace: Some(keyspace),
                ..Self::empty()
            }),
            ResultBody::SchemaChange(change) => Ok(Self {
                schema_change: Some(change),
                ..Self::empty()
            }),
            ResultBody::Prepared(_) => Err(unexpected("prepared result to a query")),
        }
    }

    fn from_rows(rows: RowsBody, known_columns: Option<&ColumnSpecs>) -> Result<Self, DriverError> {
        let RowsBody {
            metadata,
            row_count,
            content,
        } = rows;
        let columns = match metadata.columns {
            Some(columns) => ColumnSpecs::from(columns),
            None => known_columns
                .cloned()
                .ok_or_else(|| unexpected("rows without metadata for an unknown statement"))?,
        };
        if columns.len() != metadata.column_count {
            return Err(unexpected(format!(
                "rows declare {} columns, metadata has {}",
                metadata.column_count,
                columns.len()
            )));
        }
        Ok(Self {
            columns,
            content,
            remaining: row_count,
            next_row: 0,
            paging_state: metadata.paging_state,
            keyspace: None,
            schema_change: None,
            schema_agreement: None,
        })
    }

    pub(crate) fn set_schema_agreement(&mut self, agreement: SchemaAgreement) {
        self.schema_agreement = Some(agreement);
    }

    pub fn columns(&self) -> &ColumnSpecs {
        &self.columns
    }

    /// Rows not yet yielded.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Resume token when the server has more pages.
    pub fn paging_state(&self) -> Option<&Bytes> {
        self.paging_state.as_ref()
    }

    /// Keyspace set by a `USE` statement.
    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    pub fn schema_change(&self) -> Option<&SchemaChange> {
        self.schema_change.as_ref()
    }

    /// Outcome of the agreement wait that followed a schema change. A
    /// timeout here is a warning; the statement itself succeeded.
    pub fn schema_agreement(&self) -> Option<&SchemaAgreement> {
        self.schema_agreement.as_ref()
    }

    /// Collect every remaining row.
    pub fn rows(self) -> Result<Vec<Row>, DriverError> {
        self.collect()
    }

    /// First remaining row, if any.
    pub fn first_row(mut self) -> Result<Option<Row>, DriverError> {
        self.next().transpose()
    }
}

fn unexpected(reason: impl Into<String>) -> DriverError {
    DriverError::Protocol(ProtocolError::Invalid {
        what: "result",
        reason: reason.into(),
    })
}

impl Iterator for ResultSet {
    type Item = Result<Row, DriverError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match read_row(&mut self.content, self.columns.len()) {
            Ok(cells) => {
                let row = Row::new(self.next_row, self.columns.clone(), cells);
                self.remaining -= 1;
                self.next_row += 1;
                Some(Ok(row))
            }
            Err(e) => {
                // Row boundaries are lost; nothing after this point is readable.
                self.remaining = 0;
                Some(Err(e.into()))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Row
// ═══════════════════════════════════════════════════════════════

/// Column addressing: by position or by name.
pub trait ColumnIndex {
    fn position(&self, columns: &[ColumnSpec]) -> Result<usize, DriverError>;
}

impl ColumnIndex for usize {
    fn position(&self, columns: &[ColumnSpec]) -> Result<usize, DriverError> {
        if *self < columns.len() {
            Ok(*self)
        } else {
            Err(DriverError::IndexOutOfRange {
                index: *self,
                len: columns.len(),
            })
        }
    }
}

impl ColumnIndex for &str {
    fn position(&self, columns: &[ColumnSpec]) -> Result<usize, DriverError> {
        column_position(columns, self).ok_or_else(|| DriverError::ColumnNotFound(self.to_string()))
    }
}

impl ColumnIndex for String {
    fn position(&self, columns: &[ColumnSpec]) -> Result<usize, DriverError> {
        self.as_str().position(columns)
    }
}

/// One row: raw cells plus the shared column descriptors. Each cell decodes
/// once, on first access.
#[derive(Debug)]
pub struct Row {
    index: usize,
    columns: ColumnSpecs,
    cells: Vec<Option<Bytes>>,
    decoded: Vec<OnceCell<Value>>,
}

impl Row {
    fn new(index: usize, columns: ColumnSpecs, cells: Vec<Option<Bytes>>) -> Self {
        let decoded = cells.iter().map(|_| OnceCell::new()).collect();
        Self {
            index,
            columns,
            cells,
            decoded,
        }
    }

    /// Position of this row within its result set.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn columns(&self) -> &ColumnSpecs {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn is_null(&self, column: impl ColumnIndex) -> Result<bool, DriverError> {
        let i = column.position(&self.columns)?;
        Ok(self.cells[i].is_none())
    }

    pub fn get(&self, column: impl ColumnIndex) -> Result<&Value, DriverError> {
        let i = column.position(&self.columns)?;
        if let Some(value) = self.decoded[i].get() {
            return Ok(value);
        }
        let spec = &self.columns[i];
        let value = match &self.cells[i] {
            None => Value::Null,
            Some(payload) => value::deserialize(&spec.ty, payload.clone()).map_err(|e| {
                DriverError::MalformedValue {
                    row: self.index,
                    column: spec.name.clone(),
                    reason: e.to_string(),
                }
            })?,
        };
        Ok(self.decoded[i].get_or_init(|| value))
    }

    /// Typed access. The conversion never coerces: asking for `i64` from an
    /// `int` column is a type mismatch.
    pub fn get_as<T: FromValue>(&self, column: impl ColumnIndex) -> Result<T, DriverError> {
        let i = column.position(&self.columns)?;
        let value = self.get(i)?;
        T::from_value(value).ok_or_else(|| DriverError::TypeMismatch {
            index: i,
            name: self.columns[i].name.clone(),
            expected: self.columns[i].ty.clone(),
            actual: std::any::type_name::<T>().to_string(),
        })
    }

    /// All values in column order.
    pub fn values(&self) -> Result<Vec<Value>, DriverError> {
        (0..self.len()).map(|i| self.get(i).cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_api::LogicalType;
    use tessera_codec::RowsMetadata;

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("ks", "t", "id", LogicalType::Int),
            ColumnSpec::new("ks", "t", "name", LogicalType::Text),
        ]
    }

    fn rows(cells: &[Vec<Option<Bytes>>]) -> ResultSet {
        let body = RowsBody::from_cells(RowsMetadata::with_columns(columns()), cells).unwrap();
        ResultSet::from_body(ResultBody::Rows(body), None).unwrap()
    }

    fn int(v: i32) -> Option<Bytes> {
        Some(Bytes::copy_from_slice(&v.to_be_bytes()))
    }

    #[test]
    fn rows_decode_by_index_and_name() {
        let mut set = rows(&[
            vec![int(1), Some(Bytes::from_static(b"one"))],
            vec![int(2), None],
        ]);
        assert_eq!(set.remaining(), 2);

        let first = set.next().unwrap().unwrap();
        assert_eq!(first.get(0).unwrap(), &Value::Int(1));
        assert_eq!(first.get("name").unwrap(), &Value::Text("one".into()));
        assert_eq!(first.get_as::<String>("NAME").unwrap(), "one");

        let second = set.next().unwrap().unwrap();
        assert_eq!(second.get("name").unwrap(), &Value::Null);
        assert_eq!(second.get_as::<Option<String>>("name").unwrap(), None);
        assert!(second.is_null(1).unwrap());

        assert!(set.next().is_none());
        assert!(set.next().is_none());
    }

    #[test]
    fn bad_addresses() {
        let row = rows(&[vec![int(1), None]]).first_row().unwrap().unwrap();
        assert!(matches!(row.get(2), Err(DriverError::IndexOutOfRange { index: 2, len: 2 })));
        assert!(matches!(row.get("nope"), Err(DriverError::ColumnNotFound(name)) if name == "nope"));
        assert!(matches!(row.get_as::<i64>("id"), Err(DriverError::TypeMismatch { index: 0, .. })));
    }

    #[test]
    fn malformed_cell_is_scoped_to_its_column() {
        let set = rows(&[
            vec![Some(Bytes::from_static(&[1, 2])), Some(Bytes::from_static(b"ok"))],
            vec![int(2), Some(Bytes::from_static(b"fine"))],
        ]);
        let rows = set.rows().unwrap();

        match rows[0].get("id") {
            Err(DriverError::MalformedValue { row, column, .. }) => {
                assert_eq!((row, column.as_str()), (0, "id"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rows[0].get("name").unwrap(), &Value::Text("ok".into()));
        assert_eq!(rows[1].values().unwrap(), vec![Value::Int(2), Value::Text("fine".into())]);
    }

    #[test]
    fn skipped_metadata_uses_known_columns() {
        let metadata = RowsMetadata {
            column_count: 2,
            ..RowsMetadata::default()
        };
        let body = RowsBody::from_cells(metadata, &[vec![int(5), None]]).unwrap();
        let known = ColumnSpecs::from(columns());

        assert!(ResultSet::from_body(ResultBody::Rows(body.clone()), None).is_err());
        let row = ResultSet::from_body(ResultBody::Rows(body), Some(&known))
            .unwrap()
            .first_row()
            .unwrap()
            .unwrap();
        assert_eq!(row.get_as::<i32>("id").unwrap(), 5);
    }

    #[test]
    fn truncated_content_ends_the_set() {
        let body = RowsBody {
            metadata: RowsMetadata::with_columns(columns()),
            row_count: 2,
            content: Bytes::from_static(&[0, 0, 0, 4, 0, 0, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0]),
        };
        let mut set = ResultSet::from_body(ResultBody::Rows(body), None).unwrap();
        assert!(set.next().unwrap().is_ok());
        assert!(matches!(set.next(), Some(Err(DriverError::Protocol(_)))));
        assert!(set.next().is_none());
    }

    #[test]
    fn set_keyspace_and_void() {
        let set = ResultSet::from_body(ResultBody::SetKeyspace("tester".into()), None).unwrap();
        assert_eq!(set.keyspace(), Some("tester"));
        assert_eq!(set.remaining(), 0);
        assert!(ResultSet::from_body(ResultBody::Void, None).unwrap().rows().unwrap().is_empty());
    }
}
