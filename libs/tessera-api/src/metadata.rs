use std::sync::Arc;

use crate::types::LogicalType;

/// Descriptor of one bind parameter or result column, as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub keyspace: String,
    pub table: String,
    pub name: String,
    pub ty: LogicalType,
}

impl ColumnSpec {
    pub fn new(
        keyspace: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
        ty: LogicalType,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            name: name.into(),
            ty,
        }
    }
}

/// Immutable, shareable column list. Received once per prepare or rows
/// response and never modified afterwards.
pub type ColumnSpecs = Arc<[ColumnSpec]>;

/// Position of `name` in `columns`.
///
/// An exact match wins; otherwise names compare case-insensitively, matching
/// how unquoted identifiers are folded by the server.
pub fn column_position(columns: &[ColumnSpec], name: &str) -> Option<usize> {
    columns
        .iter()
        .position(|c| c.name == name)
        .or_else(|| columns.iter().position(|c| c.name.eq_ignore_ascii_case(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_name_beats_folded_name() {
        let columns = vec![
            ColumnSpec::new("ks", "t", "Value", LogicalType::Int),
            ColumnSpec::new("ks", "t", "value", LogicalType::Text),
        ];
        assert_eq!(column_position(&columns, "value"), Some(1));
        assert_eq!(column_position(&columns, "VALUE"), Some(0));
        assert_eq!(column_position(&columns, "missing"), None);
    }
}
