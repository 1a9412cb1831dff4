//! Typed access to index rows.

use bridge_traits::media_index::{QueryRow, QueryValue, UNKNOWN_STRING};

use crate::error::{LibraryError, Result};

#[derive(Clone, Copy)]
pub(crate) struct Row<'a> {
    row: &'a QueryRow,
    collection: &'static str,
}

impl<'a> Row<'a> {
    pub(crate) fn new(row: &'a QueryRow, collection: &'static str) -> Self {
        Self { row, collection }
    }

    pub(crate) fn int(&self, column: &str) -> Option<i64> {
        self.row.get(column).and_then(QueryValue::as_i64)
    }

    pub(crate) fn int32(&self, column: &str) -> Option<i32> {
        self.int(column).and_then(|value| i32::try_from(value).ok())
    }

    pub(crate) fn text(&self, column: &str) -> Option<String> {
        self.row.get(column).and_then(QueryValue::to_text)
    }

    /// Text with empty strings treated as missing.
    pub(crate) fn non_empty(&self, column: &str) -> Option<String> {
        self.text(column).filter(|value| !value.is_empty())
    }

    /// Text with the index's unknown placeholder treated as missing.
    pub(crate) fn tag(&self, column: &str) -> Option<String> {
        self.text(column).filter(|value| value != UNKNOWN_STRING)
    }

    pub(crate) fn required_int(&self, column: &'static str) -> Result<i64> {
        self.int(column).ok_or(LibraryError::MalformedRow {
            collection: self.collection,
            column,
        })
    }
}
