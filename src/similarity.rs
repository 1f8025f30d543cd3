//! Similarity scoring kernels
//!
//! Three metrics over a row-major (n × dim) matrix and a dim-length query.
//! All of them follow the convention "larger score = more similar", so
//! euclidean distance is negated. The iterator-based kernels auto-vectorize
//! with `-C target-cpu=native`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TankError;

/// Guard against division by zero in cosine similarity.
const COSINE_EPSILON: f32 = 1e-8;

/// Selectable similarity method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimMethod {
    /// Dot product per row.
    Inner,
    /// Dot product normalized by both L2 norms.
    #[default]
    Cosine,
    /// Negated L2 distance (larger = closer).
    Euclidean,
}

impl SimMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimMethod::Inner => "inner",
            SimMethod::Cosine => "cosine",
            SimMethod::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for SimMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimMethod {
    type Err = TankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inner" => Ok(SimMethod::Inner),
            "cosine" => Ok(SimMethod::Cosine),
            "euclidean" => Ok(SimMethod::Euclidean),
            _ => Err(TankError::UnsupportedMetric(s.to_string())),
        }
    }
}

/// Compute dot product of two equal-length vectors.
#[inline(always)]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector length mismatch");
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// L2 norm of a vector.
#[inline(always)]
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// L2 (Euclidean) distance between two equal-length vectors.
#[inline(always)]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector length mismatch");
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Score every row of `rows` against `query` under `method`.
///
/// `rows` is a contiguous row-major matrix holding exactly the live rows;
/// the result has one score per row in row order.
pub fn score_rows(method: SimMethod, rows: &[f32], dim: usize, query: &[f32]) -> Vec<f32> {
    debug_assert_eq!(query.len(), dim);
    debug_assert_eq!(rows.len() % dim.max(1), 0);

    let chunks = rows.chunks_exact(dim);
    match method {
        SimMethod::Inner => chunks.map(|row| dot(row, query)).collect(),
        SimMethod::Cosine => {
            let query_norm = l2_norm(query);
            chunks
                .map(|row| dot(row, query) / (l2_norm(row) * query_norm + COSINE_EPSILON))
                .collect()
        }
        SimMethod::Euclidean => chunks.map(|row| -l2_distance(row, query)).collect(),
    }
}
