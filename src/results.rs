use std::sync::Arc;

use crate::types::SqlValue;

/// A single row from a query result.
///
/// Column names are shared across all rows of a result set.
#[derive(Debug, Clone)]
pub struct Row {
    /// The column names for this row (shared across the result set)
    pub columns: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<SqlValue>,
}

impl Row {
    #[must_use]
    pub fn new(columns: Arc<Vec<String>>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Get the index of a column by name.
    #[must_use]
    pub fn column_index(&self, column_name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col == column_name)
    }

    /// Get a value by column name, or None if the column doesn't exist.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&SqlValue> {
        self.column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value by column index, or None if out of bounds.
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }
}

/// Rows returned by a read statement.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub rows: Vec<Row>,
    columns: Option<Arc<Vec<String>>>,
}

impl ResultSet {
    /// Create a result set with preallocated row capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            rows: Vec::with_capacity(capacity),
            columns: None,
        }
    }

    /// Set the column names shared by all rows.
    pub fn set_columns(&mut self, columns: Arc<Vec<String>>) {
        self.columns = Some(columns);
    }

    /// Column names, if any row has been described yet.
    #[must_use]
    pub fn columns(&self) -> Option<&Arc<Vec<String>>> {
        self.columns.as_ref()
    }

    /// Append a row built from the shared column names.
    pub fn add_values(&mut self, values: Vec<SqlValue>) {
        if let Some(columns) = &self.columns {
            self.rows.push(Row::new(columns.clone(), values));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row, if any. Convenience for read-one callers.
    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

/// Result of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// Rows changed by the statement.
    pub changes: usize,
    /// Rowid of the most recent successful INSERT on this connection;
    /// 0 if the statement inserted nothing.
    pub last_insert_id: i64,
}
