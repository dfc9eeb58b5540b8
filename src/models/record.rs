use std::fmt;

/// One decoded `(id, name)` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: i64,
    pub name: String,
}

impl Record {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID: {}  Name: {}", self.id, self.name)
    }
}

/// A row that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// Zero-based position in the result set
    pub index: usize,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.index, self.message)
    }
}

/// Rows of a query: everything that decoded, plus what did not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOutcome {
    pub records: Vec<Record>,
    pub errors: Vec<RowError>,
}

impl QueryOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total rows returned by the server
    pub fn row_count(&self) -> usize {
        self.records.len() + self.errors.len()
    }
}
