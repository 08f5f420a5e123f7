//! Background reference table used by the explainer.

use std::path::Path;

use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::error::ArtifactLoadError;

#[derive(Debug, Clone)]
pub struct BackgroundDataset {
    columns: Vec<String>,
    rows: Array2<f32>,
}

impl BackgroundDataset {
    /// Build from in-memory rows; `columns` must match the row width.
    pub fn new(columns: Vec<String>, rows: Array2<f32>) -> Result<Self, ArtifactLoadError> {
        if columns.len() != rows.ncols() {
            return Err(ArtifactLoadError::WidthMismatch {
                artifact: "background table",
                expected: columns.len(),
                actual: rows.ncols(),
            });
        }
        Ok(Self { columns, rows })
    }

    /// Load a CSV table with a header row. The header must have as many
    /// columns as `expected_columns`; differing names only log a warning.
    pub fn load(path: &Path, expected_columns: &[String]) -> Result<Self, ArtifactLoadError> {
        let csv_err = |source| ArtifactLoadError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
        let columns: Vec<String> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if columns.len() != expected_columns.len() {
            return Err(ArtifactLoadError::WidthMismatch {
                artifact: "background table",
                expected: expected_columns.len(),
                actual: columns.len(),
            });
        }
        let renamed = columns
            .iter()
            .zip(expected_columns)
            .filter(|(a, b)| a != b)
            .count();
        if renamed > 0 {
            warn!(
                path = %path.display(),
                renamed,
                "background header names differ from the encoded column names"
            );
        }

        let mut values = Vec::new();
        let mut n_rows = 0;
        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(csv_err)?;
            for (j, field) in record.iter().enumerate() {
                let v: f32 = field.trim().parse().map_err(|_| {
                    ArtifactLoadError::invalid(
                        path,
                        format!("row {} column {:?}: {field:?} is not a number", i + 1, columns[j]),
                    )
                })?;
                values.push(v);
            }
            n_rows += 1;
        }

        if n_rows == 0 {
            return Err(ArtifactLoadError::invalid(path, "background table has no rows"));
        }

        let rows = Array2::from_shape_vec((n_rows, columns.len()), values)
            .map_err(|e| ArtifactLoadError::invalid(path, e.to_string()))?;
        info!(
            path = %path.display(),
            rows = n_rows,
            columns = columns.len(),
            "loaded background table"
        );
        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> ArrayView2<'_, f32> {
        self.rows.view()
    }

    pub fn n_rows(&self) -> usize {
        self.rows.nrows()
    }

    pub fn width(&self) -> usize {
        self.rows.ncols()
    }

    /// Keep at most `max_rows` rows, chosen uniformly without replacement.
    /// The same seed always keeps the same rows, in their original order.
    pub fn subsample(&self, max_rows: usize, seed: u64) -> Self {
        if max_rows == 0 || self.n_rows() <= max_rows {
            return self.clone();
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut keep = rand::seq::index::sample(&mut rng, self.n_rows(), max_rows).into_vec();
        keep.sort_unstable();

        Self {
            columns: self.columns.clone(),
            rows: self.rows.select(Axis(0), &keep),
        }
    }
}
