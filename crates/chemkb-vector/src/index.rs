//! Exact nearest-neighbour index over dense vectors
//!
//! Brute-force Euclidean search over a row-major matrix. Row `i` is the
//! embedding of chunk ordinal `i`; search results refer to rows by ordinal.

use chemkb_core::{KbError, Result};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A search hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row (chunk ordinal) of the hit
    pub ordinal: usize,

    /// Euclidean distance to the query
    pub distance: f32,
}

/// Flat (exhaustive) L2 index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatL2Index {
    dimension: usize,
    vectors: Array2<f32>,
}

impl FlatL2Index {
    /// Create an empty index
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Array2::zeros((0, dimension)),
        }
    }

    /// Build an index from vectors in ordinal order
    pub fn build(dimension: usize, vectors: &[Vec<f32>]) -> Result<Self> {
        let mut data = Vec::with_capacity(vectors.len() * dimension);
        for vector in vectors {
            check_dimension(dimension, vector.len())?;
            data.extend_from_slice(vector);
        }

        let vectors = Array2::from_shape_vec((vectors.len(), dimension), data)
            .map_err(|e| KbError::Other(e.into()))?;
        Ok(Self { dimension, vectors })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors
    pub fn len(&self) -> usize {
        self.vectors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector stored at an ordinal
    pub fn vector(&self, ordinal: usize) -> Option<ArrayView1<'_, f32>> {
        (ordinal < self.len()).then(|| self.vectors.row(ordinal))
    }

    /// Append one vector as the next ordinal
    pub fn push(&mut self, vector: &[f32]) -> Result<()> {
        check_dimension(self.dimension, vector.len())?;
        self.vectors
            .push_row(ArrayView1::from(vector))
            .map_err(|e| KbError::Other(e.into()))
    }

    /// Append every vector of another index, preserving its order
    pub fn append(&mut self, other: &FlatL2Index) -> Result<()> {
        check_dimension(self.dimension, other.dimension)?;
        self.vectors
            .append(Axis(0), other.vectors.view())
            .map_err(|e| KbError::Other(e.into()))
    }

    /// Drop a contiguous run of ordinals; later rows shift down
    ///
    /// The range is clamped to the index size.
    pub fn remove_range(&mut self, range: Range<usize>) {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        if start == end {
            return;
        }

        let keep: Vec<usize> = (0..start).chain(end..self.len()).collect();
        self.vectors = self.vectors.select(Axis(0), &keep);
    }

    /// The `k` nearest vectors by ascending distance
    ///
    /// Ties are broken by ascending ordinal. `k` is clamped to the index
    /// size, so an empty index or `k == 0` gives no hits.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        check_dimension(self.dimension, query.len())?;

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = ArrayView1::from(query);
        let mut neighbors: Vec<Neighbor> = self
            .vectors
            .outer_iter()
            .enumerate()
            .map(|(ordinal, row)| {
                let squared: f32 = row
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                Neighbor {
                    ordinal,
                    distance: squared.sqrt(),
                }
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.ordinal.cmp(&b.ordinal))
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }
}

fn check_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(KbError::DimensionMismatch { expected, actual })
    }
}
