//! Forward-only cursor over one query result.

use std::fmt;

use crate::driver::RowSource;
use crate::value::Row;

/// Wraps a query result and buffers exactly one row: the current one.
///
/// The position starts before the first row (`-1`). [`advance`](Self::advance) discards
/// the buffered row and pulls the next; [`rewind`](Self::rewind) resets the underlying
/// result and advances once, leaving the cursor on row `0`.
/// [`row_count`](Self::row_count) is the count reported when the result was produced.
pub struct RecordCursor {
    source: Box<dyn RowSource>,
    current_row: i64,
    buffered: Option<Row>,
    count: usize,
}

impl RecordCursor {
    pub fn new(source: Box<dyn RowSource>) -> Self {
        let count = source.row_count();
        Self {
            source,
            current_row: -1,
            buffered: None,
            count,
        }
    }

    /// Move to the next row and return it.
    pub fn advance(&mut self) -> Option<&Row> {
        self.buffered = None;
        self.current_row += 1;
        self.buffered = self.source.next_row();
        tracing::trace!(
            target: "pgrecord.record",
            position = self.current_row,
            valid = self.buffered.is_some(),
            "cursor advanced"
        );
        self.buffered.as_ref()
    }

    /// Reset to the first row. Returns whether a row is now current.
    pub fn rewind(&mut self) -> bool {
        self.buffered = None;
        self.current_row = -1;
        if !self.source.reset() {
            tracing::warn!(target: "pgrecord.record", "result set cannot be rewound");
            return false;
        }
        self.advance().is_some()
    }

    pub fn current(&self) -> Option<&Row> {
        self.buffered.as_ref()
    }

    /// Index of the current row; `-1` before the first advance.
    pub fn key(&self) -> i64 {
        self.current_row
    }

    pub fn is_valid(&self) -> bool {
        self.buffered.is_some()
    }

    pub fn row_count(&self) -> usize {
        self.count
    }
}

impl Iterator for RecordCursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.advance().cloned()
    }
}

impl fmt::Debug for RecordCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCursor")
            .field("current_row", &self.current_row)
            .field("valid", &self.is_valid())
            .field("count", &self.count)
            .finish()
    }
}
