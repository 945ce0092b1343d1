use thiserror::Error;

use super::convert::FieldValue;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("too many fields (max {max})")]
    RowOverflow { max: usize },
    #[error("wrong number of fields (for row {row}, expected {expected}, got {got})")]
    FieldCount { row: usize, expected: usize, got: usize },
}

/// A row under construction: a fixed-width value sequence drawn from the
/// batch's storage pool.
#[derive(Debug, Default)]
pub struct Row {
    values: Vec<FieldValue>,
}

/// Bounded buffer of rows awaiting one bulk write.
///
/// Row storage cycles through an explicit pool: `checkout` hands out a
/// cleared storage (reusing a pooled one when available), `reset` returns
/// every storage to the pool after a flush. Over a multi-gigabyte file this
/// keeps allocation flat at `max_rows * nb_fields` values.
pub struct RowBatch {
    rows: Vec<Row>,
    pool: Vec<Row>,
    max_rows: usize,
    nb_fields: usize,
}

impl RowBatch {
    pub fn new(max_rows: usize, nb_fields: usize) -> Self {
        Self {
            rows: Vec::with_capacity(max_rows),
            pool: Vec::new(),
            max_rows,
            nb_fields,
        }
    }

    /// Append a fresh empty row and return a handle to fill it. Returns
    /// `None`, mutating nothing, when the batch is at capacity: the caller
    /// must flush and `reset` first.
    pub fn checkout(&mut self) -> Option<RowMut<'_>> {
        if self.rows.len() == self.max_rows {
            return None;
        }
        let row = self.pool.pop().unwrap_or_else(|| Row {
            values: Vec::with_capacity(self.nb_fields),
        });
        self.rows.push(row);
        let nb_fields = self.nb_fields;
        self.rows.last_mut().map(|row| RowMut { row, nb_fields })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() == self.max_rows
    }

    /// Validate every row and return a single-pass view for flushing.
    pub fn cursor(&self) -> Result<BatchCursor<'_>, BatchError> {
        for (i, row) in self.rows.iter().enumerate() {
            if row.values.len() != self.nb_fields {
                return Err(BatchError::FieldCount {
                    row: i,
                    expected: self.nb_fields,
                    got: row.values.len(),
                });
            }
        }
        Ok(BatchCursor { rows: &self.rows })
    }

    /// Empty the batch, returning all row storage to the pool for reuse.
    pub fn reset(&mut self) {
        for mut row in self.rows.drain(..) {
            row.values.clear();
            self.pool.push(row);
        }
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.pool.len()
    }
}

/// Write handle for one checked-out row.
pub struct RowMut<'a> {
    row: &'a mut Row,
    nb_fields: usize,
}

impl RowMut<'_> {
    /// Append one converted value; appending beyond the declared field
    /// count is a hard error, never silently accepted.
    pub fn push(&mut self, value: FieldValue) -> Result<(), BatchError> {
        if self.row.values.len() == self.nb_fields {
            return Err(BatchError::RowOverflow { max: self.nb_fields });
        }
        self.row.values.push(value);
        Ok(())
    }
}

/// Read-only positional view over a batch, valid only until the next
/// `reset` (the borrow enforces this).
#[derive(Debug)]
pub struct BatchCursor<'a> {
    rows: &'a [Row],
}

impl<'a> BatchCursor<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a [FieldValue]> + '_ {
        self.rows.iter().map(|row| row.values.as_slice())
    }
}
