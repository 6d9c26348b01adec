use std::collections::HashMap;
use std::path::Path;

use ndarray::{Array2, ArrayView1, Axis};
use polars::prelude::*;
use tracing::info;

use crate::data_handling::series_matrix::SeriesMatrix;
use crate::helper_functions::{column_as_f64, column_as_string, read_tsv};
use crate::models::polars_err;
use crate::stats::descriptive;

/// Features (probes or genes) x samples, NaN for missing values.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    pub feature_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    pub values: Array2<f64>,
    feature_index: HashMap<String, usize>,
    sample_index: HashMap<String, usize>,
}

fn index_of(ids: &[String]) -> HashMap<String, usize> {
    let mut map = HashMap::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        // first occurrence wins for duplicated feature names
        map.entry(id.clone()).or_insert(i);
    }
    map
}

impl ExpressionMatrix {
    pub fn new(
        feature_ids: Vec<String>,
        sample_ids: Vec<String>,
        values: Array2<f64>,
    ) -> PolarsResult<Self> {
        if values.dim() != (feature_ids.len(), sample_ids.len()) {
            return Err(polars_err(
                format!(
                    "expression shape {:?} does not match {} features x {} samples",
                    values.dim(),
                    feature_ids.len(),
                    sample_ids.len()
                )
                .into(),
            ));
        }
        Ok(Self {
            feature_index: index_of(&feature_ids),
            sample_index: index_of(&sample_ids),
            feature_ids,
            sample_ids,
            values,
        })
    }

    pub fn from_series_matrix(matrix: &SeriesMatrix) -> PolarsResult<Self> {
        let n = matrix.n_samples();
        let flat: Vec<f64> = matrix.values.iter().flatten().copied().collect();
        let values = Array2::from_shape_vec((matrix.probe_ids.len(), n), flat)
            .map_err(|e| polars_err(Box::new(e)))?;
        Self::new(matrix.probe_ids.clone(), matrix.sample_ids.clone(), values)
    }

    /// Tab-separated gene table: a `Gene` column, optional `Accession`/`Gene_ID`, then one column per sample.
    pub fn from_gene_table(path: &Path, feature_col: &str) -> PolarsResult<Self> {
        info!("Reading expression table from {}", path.display());
        let df = read_tsv(path)?;
        let features: Vec<String> = column_as_string(&df, feature_col)?
            .into_iter()
            .map(|g| g.unwrap_or_default())
            .collect();

        let sample_cols: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|c| c.to_string())
            .filter(|c| c != feature_col && c != "Accession" && c != "Gene_ID")
            .collect();

        let mut values = Array2::<f64>::from_elem((features.len(), sample_cols.len()), f64::NAN);
        for (j, name) in sample_cols.iter().enumerate() {
            for (i, v) in column_as_f64(&df, name)?.into_iter().enumerate() {
                if let Some(v) = v {
                    values[[i, j]] = v;
                }
            }
        }
        info!("Expression: {} features x {} samples", features.len(), sample_cols.len());
        Self::new(features, sample_cols, values)
    }

    pub fn n_features(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn feature_position(&self, feature: &str) -> Option<usize> {
        self.feature_index.get(feature).copied()
    }

    pub fn sample_position(&self, sample: &str) -> Option<usize> {
        self.sample_index.get(sample).copied()
    }

    /// Column positions for the given sample ids; unknown ids are dropped.
    pub fn sample_positions(&self, samples: &[String]) -> Vec<usize> {
        samples
            .iter()
            .filter_map(|s| self.sample_position(s))
            .collect()
    }

    pub fn row(&self, feature: &str) -> Option<ArrayView1<'_, f64>> {
        self.feature_position(feature).map(|i| self.values.row(i))
    }

    /// Restrict to `samples`, in the order given. Unknown ids are skipped.
    pub fn subset_samples(&self, samples: &[String]) -> Self {
        let positions = self.sample_positions(samples);
        let kept: Vec<String> = positions.iter().map(|&j| self.sample_ids[j].clone()).collect();
        let values = self.values.select(Axis(1), &positions);
        Self {
            feature_ids: self.feature_ids.clone(),
            feature_index: self.feature_index.clone(),
            sample_index: index_of(&kept),
            sample_ids: kept,
            values,
        }
    }

    /// Sample standard deviation of one row, ignoring NaN.
    pub fn row_std(&self, i: usize) -> f64 {
        let row: Vec<f64> = self.values.row(i).to_vec();
        descriptive::std_nan(&row, 1).unwrap_or(0.0)
    }

    /// Z-score every row with the sample standard deviation; constant rows become zero.
    pub fn zscore_rows(&self) -> Self {
        let mut out = self.clone();
        for (i, mut row) in out.values.axis_iter_mut(Axis(0)).enumerate() {
            let z = descriptive::zscore(&self.values.row(i).to_vec());
            for (dst, src) in row.iter_mut().zip(z) {
                *dst = src;
            }
        }
        out
    }
}
