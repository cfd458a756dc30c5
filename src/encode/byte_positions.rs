//! Maps sample index to `(start_byte, end_byte)` within its chunk, kept
//! side by side with the shape table.

use super::base::{EncodedValue, RunLengthEncoder};
use crate::config::EncodingDType;
use crate::error::{EngineError, Result};

/// One row's payload: `nbytes` of every sample in the run, and the
/// `start_byte` of the *first* sample the row covers. Later samples in the
/// same row derive their range from these two fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytePosition {
    pub nbytes: u32,
    pub start_byte: u32,
}

impl EncodedValue for BytePosition {
    fn combines_with(&self, other: &Self) -> bool {
        self.nbytes == other.nbytes
    }

    fn to_cols(&self) -> Vec<EncodingDType> {
        vec![self.nbytes, self.start_byte]
    }

    fn from_cols(cols: &[EncodingDType]) -> Self {
        BytePosition {
            nbytes: cols[0],
            start_byte: cols[1],
        }
    }
}

/// Run-length table mapping sample index to its byte range within a chunk's
/// `data` buffer.
#[derive(Debug, Clone)]
pub struct BytePositionsEncoder {
    inner: RunLengthEncoder<BytePosition>,
}

impl Default for BytePositionsEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BytePositionsEncoder {
    pub fn new() -> Self {
        Self {
            inner: RunLengthEncoder::with_width(2),
        }
    }

    pub fn num_samples(&self) -> u64 {
        self.inner.num_samples()
    }

    pub fn num_rows(&self) -> usize {
        self.inner.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Total bytes occupied by all samples registered so far — the offset
    /// the next registered sample will start at.
    pub fn total_bytes(&self) -> u64 {
        let rows = self.inner.rows();
        match rows.last() {
            None => 0,
            Some(row) => {
                let row_index = rows.len() - 1;
                let row_start = self.inner.row_start(row_index);
                let count = row.last_seen as u64 - row_start + 1;
                row.value.start_byte as u64 + count * row.value.nbytes as u64
            }
        }
    }

    /// Registers `n` samples each `nbytes` long, implicitly occupying
    /// `[total_bytes(), total_bytes() + n*nbytes)`.
    pub fn register_samples(&mut self, nbytes: u32, n: u64) -> Result<()> {
        let start_byte = Self::checked_u32(self.total_bytes())?;
        self.inner
            .register_samples(BytePosition { nbytes, start_byte }, n)
    }

    /// Returns `(start, end)` for sample `i`.
    pub fn get(&self, i: u64) -> Result<(u64, u64)> {
        let (value, row_index) = self.inner.get_row(i)?;
        let row_start = self.inner.row_start(row_index);
        let start = value.start_byte as u64 + (i - row_start) * value.nbytes as u64;
        let end = start + value.nbytes as u64;
        Ok((start, end))
    }

    /// Resizes sample `i` to `new_nbytes`, splitting its row and shifting
    /// every later row's `start_byte` by the size delta.
    pub fn set(&mut self, i: u64, new_nbytes: u32) -> Result<()> {
        let (start, end) = self.get(i)?;
        let old_nbytes = end - start;
        let delta = new_nbytes as i64 - old_nbytes as i64;

        let new_value = BytePosition {
            nbytes: new_nbytes,
            start_byte: Self::checked_u32(start)?,
        };
        let singleton_index = self.inner.overwrite_sample(i, new_value)?;

        if delta != 0 {
            for row in self.inner.rows_mut().iter_mut().skip(singleton_index + 1) {
                row.value.start_byte = (row.value.start_byte as i64 + delta) as u32;
            }
        }
        Ok(())
    }

    pub fn pop(&mut self) -> Result<BytePosition> {
        self.inner.pop()
    }

    pub fn extend_from(&mut self, other: &BytePositionsEncoder) -> Result<()> {
        self.inner.extend_from(&other.inner)
    }

    pub fn table_to_bytes(&self) -> Vec<u8> {
        self.inner.table_to_bytes()
    }

    pub fn table_from_bytes(buf: &[u8]) -> Result<(Self, usize)> {
        let (inner, consumed) = RunLengthEncoder::table_from_bytes(buf, Some(2))?;
        Ok((Self { inner }, consumed))
    }

    fn checked_u32(v: u64) -> Result<u32> {
        u32::try_from(v)
            .map_err(|_| EngineError::InvalidArgument("byte offset exceeds u32 range".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_read_back_ranges() {
        let mut enc = BytePositionsEncoder::new();
        enc.register_samples(10, 3).unwrap();
        enc.register_samples(20, 2).unwrap();

        assert_eq!(enc.get(0).unwrap(), (0, 10));
        assert_eq!(enc.get(2).unwrap(), (20, 30));
        assert_eq!(enc.get(3).unwrap(), (30, 50));
        assert_eq!(enc.get(4).unwrap(), (50, 70));
        assert_eq!(enc.total_bytes(), 70);
    }

    #[test]
    fn setitem_resizes_and_shifts_later_rows() {
        // overwriting a sample that changes its encoded size
        let mut enc = BytePositionsEncoder::new();
        enc.register_samples(10, 3).unwrap();
        assert_eq!(enc.num_rows(), 1);

        enc.set(1, 20).unwrap();

        assert_eq!(enc.get(0).unwrap(), (0, 10));
        assert_eq!(enc.get(1).unwrap(), (10, 30));
        assert_eq!(enc.get(2).unwrap(), (30, 40));
        assert_eq!(enc.num_rows(), 3);
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut enc = BytePositionsEncoder::new();
        enc.register_samples(5, 4).unwrap();
        enc.register_samples(7, 1).unwrap();

        let bytes = enc.table_to_bytes();
        let (decoded, consumed) = BytePositionsEncoder::table_from_bytes(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.get(4).unwrap(), (20, 27));
    }

    /// A sequence of `(nbytes, count)` runs, small enough that shrinking
    /// stays useful and `total_bytes` can't overflow `u32`.
    #[derive(Debug, Clone)]
    struct Runs(Vec<(u8, u8)>);

    impl quickcheck::Arbitrary for Runs {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            let len = (usize::arbitrary(g) % 8) + 1;
            let runs = (0..len)
                .map(|_| {
                    let nbytes = (u8::arbitrary(g) % 32) + 1;
                    let count = (u8::arbitrary(g) % 5) + 1;
                    (nbytes, count)
                })
                .collect();
            Runs(runs)
        }
    }

    fn build(runs: &Runs) -> (BytePositionsEncoder, u64) {
        let mut enc = BytePositionsEncoder::new();
        let mut total = 0u64;
        for &(nbytes, count) in &runs.0 {
            enc.register_samples(nbytes as u32, count as u64).unwrap();
            total += count as u64;
        }
        (enc, total)
    }

    #[quickcheck_macros::quickcheck]
    fn ranges_are_contiguous_and_non_overlapping(runs: Runs) -> bool {
        let (enc, total) = build(&runs);
        let mut expected_start = 0u64;
        for i in 0..total {
            let (start, end) = enc.get(i).unwrap();
            if start != expected_start || end <= start {
                return false;
            }
            expected_start = end;
        }
        expected_start == enc.total_bytes()
    }

    #[quickcheck_macros::quickcheck]
    fn total_bytes_matches_sum_of_registered_runs(runs: Runs) -> bool {
        let (enc, _) = build(&runs);
        let expected: u64 = runs.0.iter().map(|&(n, c)| n as u64 * c as u64).sum();
        enc.total_bytes() == expected
    }

    #[quickcheck_macros::quickcheck]
    fn table_round_trips_through_bytes(runs: Runs) -> bool {
        let (enc, total) = build(&runs);
        let bytes = enc.table_to_bytes();
        let (decoded, consumed) = BytePositionsEncoder::table_from_bytes(&bytes).unwrap();
        if consumed != bytes.len() || decoded.total_bytes() != enc.total_bytes() {
            return false;
        }
        (0..total).all(|i| decoded.get(i).unwrap() == enc.get(i).unwrap())
    }
}
