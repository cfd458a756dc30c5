//! Maps sample index to shape tuple.

use super::base::{EncodedValue, RunLengthEncoder};
use crate::config::EncodingDType;
use crate::error::{EngineError, Result};

/// An `N`-tuple of non-negative integers, stored densely as a `Vec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape(pub Vec<u32>);

impl Shape {
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }
}

impl EncodedValue for Shape {
    fn combines_with(&self, other: &Self) -> bool {
        self.0 == other.0
    }

    fn to_cols(&self) -> Vec<EncodingDType> {
        self.0.clone()
    }

    fn from_cols(cols: &[EncodingDType]) -> Self {
        Shape(cols.to_vec())
    }
}

/// Run-length table mapping sample index to its shape.
#[derive(Debug, Clone)]
pub struct ShapeEncoder {
    inner: RunLengthEncoder<Shape>,
}

impl ShapeEncoder {
    /// Builds an empty encoder for shapes of dimensionality `ndim`.
    pub fn new(ndim: usize) -> Self {
        Self {
            inner: RunLengthEncoder::with_width(ndim),
        }
    }

    pub fn ndim(&self) -> usize {
        self.inner.value_width()
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

    /// Registers `n` samples all carrying `shape`. `shape`'s dimensionality
    /// must match the encoder's.
    pub fn register_samples(&mut self, shape: &[u32], n: u64) -> Result<()> {
        self.check_ndim(shape)?;
        self.inner.register_samples(Shape(shape.to_vec()), n)
    }

    /// Returns the shape stored for sample `i`.
    pub fn get(&self, i: u64) -> Result<Shape> {
        self.inner.get_row(i).map(|(v, _)| v.clone())
    }

    /// Overwrites sample `i`'s shape.
    pub fn set(&mut self, i: u64, shape: &[u32]) -> Result<()> {
        self.check_ndim(shape)?;
        self.inner.overwrite_sample(i, Shape(shape.to_vec()))?;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Shape> {
        self.inner.pop()
    }

    pub fn extend_from(&mut self, other: &ShapeEncoder) -> Result<()> {
        self.inner.extend_from(&other.inner)
    }

    fn check_ndim(&self, shape: &[u32]) -> Result<()> {
        if shape.len() != self.ndim() {
            return Err(EngineError::InvalidArgument(format!(
                "shape has {} dimensions, encoder expects {}",
                shape.len(),
                self.ndim()
            )));
        }
        Ok(())
    }

    pub fn table_to_bytes(&self) -> Vec<u8> {
        self.inner.table_to_bytes()
    }

    pub fn table_from_bytes(buf: &[u8]) -> Result<(Self, usize)> {
        let (inner, consumed) = RunLengthEncoder::table_from_bytes(buf, None)?;
        Ok((Self { inner }, consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_equal_shapes_and_keeps_distinct_rows() {
        // coalescing and splitting rows as shapes repeat and change
        let mut enc = ShapeEncoder::new(2);
        enc.register_samples(&[5, 5], 3).unwrap();
        enc.register_samples(&[5, 5], 2).unwrap();
        enc.register_samples(&[3, 3], 1).unwrap();

        assert_eq!(enc.num_rows(), 2);
        assert_eq!(enc.get(4).unwrap().0, vec![5, 5]);
        assert_eq!(enc.get(5).unwrap().0, vec![3, 3]);
    }

    #[test]
    fn rejects_dimensionality_mismatch() {
        let mut enc = ShapeEncoder::new(2);
        enc.register_samples(&[1, 1], 1).unwrap();
        assert!(enc.register_samples(&[1, 1, 1], 1).is_err());
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut enc = ShapeEncoder::new(2);
        enc.register_samples(&[2, 2], 4).unwrap();
        enc.register_samples(&[3, 3], 1).unwrap();

        let bytes = enc.table_to_bytes();
        let (decoded, consumed) = ShapeEncoder::table_from_bytes(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.ndim(), 2);
        assert_eq!(decoded.get(4).unwrap().0, vec![3, 3]);
    }
}
