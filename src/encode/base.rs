//! Generic run-length encoder: a table of `(value, last_seen_sample_index)`
//! rows, ordered by ascending `last_seen`, used as the backbone of the
//! shape, byte-position and chunk-id encoders.
//!
//! Rows are kept as a `Vec<Row<V>>` rather than a literal flat `Vec<u32>` —
//! the row-level index math is the same either way, and
//! the struct form keeps the split/coalesce logic readable. The on-disk
//! format produced by each concrete encoder is still the flat, densely
//! packed `u32` table layout: [`EncodedValue::to_cols`] and
//! [`EncodedValue::from_cols`] are the seam between the two.
//!
//! The value column width is a property of the *encoder instance*, not the
//! value type: byte-position and chunk-id rows have a fixed width, but
//! shape rows are `N`-wide for whatever dimensionality `N` the owning
//! tensor has, so `width` is carried alongside the rows rather than pinned
//! to `V` via an associated function.

use crate::config::EncodingDType;
use crate::error::{EngineError, Result};
use std::fmt;

/// A payload carried by one encoder row.
pub trait EncodedValue: Clone + fmt::Debug + PartialEq + Sized {
    /// Whether a row already carrying `self` may be extended to also cover
    /// a newly incoming run carrying `other`, instead of starting a new row.
    fn combines_with(&self, other: &Self) -> bool;

    /// Flattens this value into little-endian `u32` columns. The number of
    /// columns returned must equal the owning encoder's `value_width`.
    fn to_cols(&self) -> Vec<EncodingDType>;

    /// Inverse of [`to_cols`](Self::to_cols).
    fn from_cols(cols: &[EncodingDType]) -> Self;
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Row<V> {
    pub value: V,
    pub last_seen: EncodingDType,
}

/// Generic run-length table mapping sample index to payload `V`.
#[derive(Debug, Clone)]
pub struct RunLengthEncoder<V: EncodedValue> {
    pub(crate) rows: Vec<Row<V>>,
    value_width: usize,
}

impl<V: EncodedValue> RunLengthEncoder<V> {
    /// Builds an empty encoder whose rows carry `value_width` payload
    /// columns (not counting the trailing `last_seen` column).
    pub fn with_width(value_width: usize) -> Self {
        Self {
            rows: Vec::new(),
            value_width,
        }
    }

    pub fn value_width(&self) -> usize {
        self.value_width
    }

    /// Total number of samples registered so far.
    pub fn num_samples(&self) -> u64 {
        self.rows
            .last()
            .map(|r| r.last_seen as u64 + 1)
            .unwrap_or(0)
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The sample index at which the row at `row_index` begins.
    pub(crate) fn row_start(&self, row_index: usize) -> u64 {
        if row_index == 0 {
            0
        } else {
            self.rows[row_index - 1].last_seen as u64 + 1
        }
    }

    /// Appends `n` samples carrying `value`, extending the last row when its
    /// value combines with `value`, else starting a new row.
    pub fn register_samples(&mut self, value: V, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }

        let prev_last_seen = self.rows.last().map(|r| r.last_seen as u64);
        let new_last_seen = match prev_last_seen {
            Some(l) => l.checked_add(n).ok_or_else(|| {
                EngineError::InvalidArgument("encoder row count overflowed".into())
            })?,
            None => n - 1,
        };
        let new_last_seen = Self::checked_u32(new_last_seen)?;

        if let Some(last) = self.rows.last_mut() {
            if last.value.combines_with(&value) {
                last.last_seen = new_last_seen;
                return Ok(());
            }
        }
        self.rows.push(Row {
            value,
            last_seen: new_last_seen,
        });
        Ok(())
    }

    fn checked_u32(v: u64) -> Result<EncodingDType> {
        EncodingDType::try_from(v)
            .map_err(|_| EngineError::InvalidArgument("sample index exceeds u32 range".into()))
    }

    /// Pushes a brand-new row unconditionally, without consulting the
    /// combine condition. Used by the chunk-id encoder's
    /// `generate_chunk_id`, which always starts a fresh row.
    pub(crate) fn push_new_row(&mut self, value: V, last_seen: EncodingDType) {
        self.rows.push(Row { value, last_seen });
    }

    /// Binary search for the smallest row whose `last_seen >= i`.
    pub fn translate_index(&self, i: u64) -> Result<usize> {
        let num_samples = self.num_samples();
        if i >= num_samples {
            return Err(EngineError::InvalidArgument(format!(
                "sample index {} out of range (num_samples = {})",
                i, num_samples
            )));
        }
        Ok(self.rows.partition_point(|r| (r.last_seen as u64) < i))
    }

    pub fn get_row(&self, i: u64) -> Result<(&V, usize)> {
        let row_index = self.translate_index(i)?;
        Ok((&self.rows[row_index].value, row_index))
    }

    pub fn rows(&self) -> &[Row<V>] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut Vec<Row<V>> {
        &mut self.rows
    }

    /// Merges the row at `index` with its immediate neighbours if their
    /// values now satisfy the combine condition. Called after a split to
    /// keep the table in maximally-coalesced form. Returns the row index
    /// the sample that was originally at `index` ends up at.
    pub(crate) fn coalesce_around(&mut self, index: usize) -> usize {
        let mut index = index;
        if index + 1 < self.rows.len()
            && self.rows[index].value.combines_with(&self.rows[index + 1].value)
        {
            let next = self.rows.remove(index + 1);
            self.rows[index].last_seen = next.last_seen;
        }
        if index > 0 && self.rows[index - 1].value.combines_with(&self.rows[index].value) {
            let cur = self.rows.remove(index);
            self.rows[index - 1].last_seen = cur.last_seen;
            index -= 1;
        }
        index
    }

    /// Overwrites sample `i`'s value, splitting its owning row into up to
    /// three rows (prefix/singleton/suffix) and coalescing neighbours.
    /// Returns the row index the singleton ended up at after coalescing.
    pub fn overwrite_sample(&mut self, i: u64, value: V) -> Result<usize> {
        let row_index = self.translate_index(i)?;
        let row_start = self.row_start(row_index);
        let row_last_seen = self.rows[row_index].last_seen as u64;
        let old_value = self.rows[row_index].value.clone();

        if row_start == row_last_seen {
            self.rows[row_index].value = value;
            return Ok(self.coalesce_around(row_index));
        }

        let mut replacement = Vec::with_capacity(3);
        if i > row_start {
            replacement.push(Row {
                value: old_value.clone(),
                last_seen: Self::checked_u32(i - 1)?,
            });
        }
        let singleton_index = replacement.len();
        replacement.push(Row {
            value,
            last_seen: Self::checked_u32(i)?,
        });
        if i < row_last_seen {
            replacement.push(Row {
                value: old_value,
                last_seen: Self::checked_u32(row_last_seen)?,
            });
        }

        self.rows.splice(row_index..=row_index, replacement);
        Ok(self.coalesce_around(row_index + singleton_index))
    }

    /// Decrements the last row's `last_seen`, dropping the row if it becomes
    /// empty. Returns the value of the popped sample.
    pub fn pop(&mut self) -> Result<V> {
        if self.rows.is_empty() {
            return Err(EngineError::InvalidArgument(
                "cannot pop from an empty encoder".into(),
            ));
        }
        let last_index = self.rows.len() - 1;
        let value = self.rows[last_index].value.clone();
        let row_start = self.row_start(last_index);

        if self.rows[last_index].last_seen as u64 == row_start {
            self.rows.pop();
        } else {
            self.rows[last_index].last_seen -= 1;
        }
        Ok(value)
    }

    /// Bulk-appends another encoder's rows, shifting their `last_seen`
    /// values by this encoder's current `num_samples` (used to merge
    /// per-shard engine outputs into one tensor).
    pub fn extend_from(&mut self, other: &Self) -> Result<()> {
        for (idx, row) in other.rows.iter().enumerate() {
            let start = other.row_start(idx);
            let count = row.last_seen as u64 - start + 1;
            self.register_samples(row.value.clone(), count)?;
        }
        Ok(())
    }

    /// Serializes the table to the dense `[row-count:u4][col-count:u4][rows
    /// as u32 LE]` layout, with each row being the value's columns followed
    /// by `last_seen`.
    pub fn table_to_bytes(&self) -> Vec<u8> {
        use byteorder::{LittleEndian, WriteBytesExt};

        let col_count = self.value_width + 1;
        let mut out = Vec::with_capacity(8 + self.rows.len() * col_count * 4);
        out.write_u32::<LittleEndian>(self.rows.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(col_count as u32).unwrap();
        for row in &self.rows {
            for col in row.value.to_cols() {
                out.write_u32::<LittleEndian>(col).unwrap();
            }
            out.write_u32::<LittleEndian>(row.last_seen).unwrap();
        }
        out
    }

    /// Inverse of [`table_to_bytes`](Self::table_to_bytes). The blob is
    /// self-describing (its header carries `col-count`), so the value width
    /// is read back from the bytes themselves; `expected_width` is an
    /// optional cross-check against the width the caller already knows
    /// from context (shape rows need this, since their width varies by
    /// tensor dimensionality and can't be inferred from the encoder type
    /// alone). Returns the number of bytes consumed alongside the decoded
    /// table.
    pub fn table_from_bytes(buf: &[u8], expected_width: Option<usize>) -> Result<(Self, usize)> {
        use byteorder::{LittleEndian, ReadBytesExt};
        use std::io::Cursor;

        if buf.len() < 8 {
            return Err(EngineError::InvalidArgument(
                "encoder table header truncated".into(),
            ));
        }
        let mut cursor = Cursor::new(buf);
        let row_count = cursor.read_u32::<LittleEndian>()? as usize;
        let col_count = cursor.read_u32::<LittleEndian>()? as usize;
        if col_count == 0 {
            return Err(EngineError::InvalidArgument(
                "encoder table column width of 0 is invalid".into(),
            ));
        }
        let value_width = col_count - 1;
        if let Some(expected) = expected_width {
            if value_width != expected {
                return Err(EngineError::InvalidArgument(format!(
                    "encoder table column width mismatch: expected {}, found {}",
                    expected + 1,
                    col_count
                )));
            }
        }

        let mut rows = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            let mut cols = Vec::with_capacity(col_count - 1);
            for _ in 0..col_count - 1 {
                cols.push(cursor.read_u32::<LittleEndian>()?);
            }
            let last_seen = cursor.read_u32::<LittleEndian>()?;
            rows.push(Row {
                value: V::from_cols(&cols),
                last_seen,
            });
        }
        let consumed = cursor.position() as usize;
        Ok((Self { rows, value_width }, consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct IntValue(u32);

    impl EncodedValue for IntValue {
        fn combines_with(&self, other: &Self) -> bool {
            self.0 == other.0
        }

        fn to_cols(&self) -> Vec<EncodingDType> {
            vec![self.0]
        }

        fn from_cols(cols: &[EncodingDType]) -> Self {
            IntValue(cols[0])
        }
    }

    #[test]
    fn register_coalesces_equal_runs() {
        let mut enc: RunLengthEncoder<IntValue> = RunLengthEncoder::with_width(1);
        enc.register_samples(IntValue(5), 3).unwrap();
        enc.register_samples(IntValue(5), 2).unwrap();
        enc.register_samples(IntValue(3), 1).unwrap();

        assert_eq!(enc.num_rows(), 2);
        assert_eq!(enc.num_samples(), 6);
        assert_eq!(enc.get_row(4).unwrap().0, &IntValue(5));
        assert_eq!(enc.get_row(5).unwrap().0, &IntValue(3));
    }

    #[test]
    fn overwrite_splits_and_recoalesces() {
        let mut enc: RunLengthEncoder<IntValue> = RunLengthEncoder::with_width(1);
        enc.register_samples(IntValue(1), 5).unwrap();

        enc.overwrite_sample(2, IntValue(9)).unwrap();
        assert_eq!(enc.num_rows(), 3);
        assert_eq!(enc.get_row(1).unwrap().0, &IntValue(1));
        assert_eq!(enc.get_row(2).unwrap().0, &IntValue(9));
        assert_eq!(enc.get_row(3).unwrap().0, &IntValue(1));

        // overwriting back to the neighbouring value re-coalesces
        enc.overwrite_sample(2, IntValue(1)).unwrap();
        assert_eq!(enc.num_rows(), 1);
        assert_eq!(enc.num_samples(), 5);
    }

    #[test]
    fn pop_drops_empty_rows() {
        let mut enc: RunLengthEncoder<IntValue> = RunLengthEncoder::with_width(1);
        enc.register_samples(IntValue(1), 2).unwrap();
        enc.register_samples(IntValue(2), 1).unwrap();

        assert_eq!(enc.pop().unwrap(), IntValue(2));
        assert_eq!(enc.num_rows(), 1);
        assert_eq!(enc.num_samples(), 2);

        assert_eq!(enc.pop().unwrap(), IntValue(1));
        assert_eq!(enc.num_samples(), 1);
        assert_eq!(enc.pop().unwrap(), IntValue(1));
        assert_eq!(enc.num_samples(), 0);
        assert!(enc.pop().is_err());
    }

    #[test]
    fn out_of_range_index_errors() {
        let mut enc: RunLengthEncoder<IntValue> = RunLengthEncoder::with_width(1);
        enc.register_samples(IntValue(1), 3).unwrap();
        assert!(enc.translate_index(3).is_err());
        assert!(enc.translate_index(2).is_ok());
    }

    #[test]
    fn round_trip_bytes() {
        let mut enc: RunLengthEncoder<IntValue> = RunLengthEncoder::with_width(1);
        enc.register_samples(IntValue(7), 4).unwrap();
        enc.register_samples(IntValue(9), 1).unwrap();

        let bytes = enc.table_to_bytes();
        let (decoded, consumed) =
            RunLengthEncoder::<IntValue>::table_from_bytes(&bytes, Some(1)).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.rows, enc.rows);
    }

    /// A run built from `register_samples` calls, small enough to keep
    /// shrinking useful and `last_seen` safely within `u32`.
    #[derive(Debug, Clone)]
    struct Runs(Vec<(u8, u8)>);

    impl quickcheck::Arbitrary for Runs {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            let len = (usize::arbitrary(g) % 8) + 1;
            let runs = (0..len)
                .map(|_| {
                    let value = u8::arbitrary(g) % 4;
                    let count = (u8::arbitrary(g) % 5) + 1;
                    (value, count)
                })
                .collect();
            Runs(runs)
        }
    }

    fn build(runs: &Runs) -> (RunLengthEncoder<IntValue>, u64) {
        let mut enc: RunLengthEncoder<IntValue> = RunLengthEncoder::with_width(1);
        let mut total = 0u64;
        for &(value, count) in &runs.0 {
            enc.register_samples(IntValue(value as u32), count as u64)
                .unwrap();
            total += count as u64;
        }
        (enc, total)
    }

    #[quickcheck_macros::quickcheck]
    fn num_samples_matches_total_registered(runs: Runs) -> bool {
        let (enc, total) = build(&runs);
        enc.num_samples() == total
    }

    #[quickcheck_macros::quickcheck]
    fn every_index_resolves_to_the_value_it_was_registered_with(runs: Runs) -> bool {
        let (enc, _) = build(&runs);
        let mut i = 0u64;
        for &(value, count) in &runs.0 {
            for _ in 0..count {
                if enc.get_row(i).unwrap().0 != &IntValue(value as u32) {
                    return false;
                }
                i += 1;
            }
        }
        true
    }

    #[quickcheck_macros::quickcheck]
    fn adjacent_rows_never_share_a_combinable_value(runs: Runs) -> bool {
        let (enc, _) = build(&runs);
        enc.rows
            .windows(2)
            .all(|w| !w[0].value.combines_with(&w[1].value))
    }

    #[quickcheck_macros::quickcheck]
    fn table_round_trips_through_bytes(runs: Runs) -> bool {
        let (enc, _) = build(&runs);
        let bytes = enc.table_to_bytes();
        let (decoded, consumed) =
            RunLengthEncoder::<IntValue>::table_from_bytes(&bytes, Some(1)).unwrap();
        consumed == bytes.len() && decoded.rows == enc.rows
    }

    #[quickcheck_macros::quickcheck]
    fn pop_then_register_restores_num_samples(runs: Runs) -> bool {
        let (mut enc, total) = build(&runs);
        if total == 0 {
            return true;
        }
        let popped = enc.pop().unwrap();
        if enc.num_samples() != total - 1 {
            return false;
        }
        enc.register_samples(popped, 1).unwrap();
        enc.num_samples() == total
    }
}
