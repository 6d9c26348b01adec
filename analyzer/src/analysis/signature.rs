//! Composite expression scores: the tEgress score (egress minus retention
//! pathway genes) and the prognostic score built from Cox-screened genes.

use std::collections::HashMap;

use ndarray::Axis;
use polars::prelude::*;
use tracing::{info, warn};

use crate::config::PathwayGenes;
use crate::data_handling::annotation::ProbeAnnotation;
use crate::data_handling::expression::ExpressionMatrix;

/// Per-sample mean over the listed rows of `z`; NaN counts as 0. Rows that are
/// absent from `z` are skipped. Returns the means and the genes actually used.
pub fn side_mean(z: &ExpressionMatrix, genes: &[String]) -> (Vec<f64>, Vec<String>) {
    let mut sums = vec![0.0; z.n_samples()];
    let mut used = Vec::new();
    for gene in genes {
        let Some(row) = z.row(gene) else {
            continue;
        };
        for (s, v) in sums.iter_mut().zip(row.iter()) {
            if !v.is_nan() {
                *s += v;
            }
        }
        used.push(gene.clone());
    }
    if !used.is_empty() {
        let n = used.len() as f64;
        sums.iter_mut().for_each(|s| *s /= n);
    }
    (sums, used)
}

/// mean(z[up]) - mean(z[down]) per sample. An empty side contributes 0.
pub fn composite_score(z: &ExpressionMatrix, up: &[String], down: &[String]) -> Vec<f64> {
    let (u, _) = side_mean(z, up);
    let (d, _) = side_mean(z, down);
    u.iter().zip(&d).map(|(a, b)| a - b).collect()
}

/// Higher = worse prognosis.
pub fn prognostic_score(z: &ExpressionMatrix, adverse: &[String], favorable: &[String]) -> Vec<f64> {
    composite_score(z, adverse, favorable)
}

/// Gene-level matrix for `genes`, one row per gene taken from its first
/// annotated probe. Genes without a probe in `expr` are left out.
pub fn gene_level(
    expr: &ExpressionMatrix,
    gene_to_probe: &HashMap<String, String>,
    genes: &[String],
) -> PolarsResult<ExpressionMatrix> {
    let mut names = Vec::new();
    let mut positions = Vec::new();
    for gene in genes {
        if names.contains(gene) {
            continue;
        }
        let Some(pos) = gene_to_probe.get(gene).and_then(|p| expr.feature_position(p)) else {
            continue;
        };
        names.push(gene.clone());
        positions.push(pos);
    }
    let values = expr.values.select(Axis(0), &positions);
    ExpressionMatrix::new(names, expr.sample_ids.clone(), values)
}

#[derive(Debug, Clone)]
pub struct TegressScore {
    pub sample_ids: Vec<String>,
    pub retention: Vec<f64>,
    pub egress: Vec<f64>,
    /// egress - retention; higher means a more egress-like phenotype.
    pub score: Vec<f64>,
    pub retention_genes: Vec<String>,
    pub egress_genes: Vec<String>,
    /// Z-scored pathway genes, kept for the per-gene output columns.
    pub gene_z: ExpressionMatrix,
}

/// Z-score each pathway gene across all samples, then egress mean minus retention mean.
pub fn tegress_score(
    expr: &ExpressionMatrix,
    annotation: &ProbeAnnotation,
    pathways: &PathwayGenes,
) -> PolarsResult<TegressScore> {
    let gene_to_probe = annotation.gene_to_probe();
    let wanted: Vec<String> = pathways
        .retention
        .iter()
        .chain(&pathways.egress)
        .cloned()
        .collect();
    let z = gene_level(expr, &gene_to_probe, &wanted)?.zscore_rows();

    let (retention, retention_genes) = side_mean(&z, &pathways.retention);
    let (egress, egress_genes) = side_mean(&z, &pathways.egress);
    if retention_genes.is_empty() || egress_genes.is_empty() {
        warn!(
            "tEgress score has an empty side: {} retention, {} egress genes found",
            retention_genes.len(),
            egress_genes.len()
        );
    }
    info!("Retention genes used: {:?}", retention_genes);
    info!("Egress genes used: {:?}", egress_genes);

    let score = egress.iter().zip(&retention).map(|(e, r)| e - r).collect();
    Ok(TegressScore {
        sample_ids: expr.sample_ids.clone(),
        retention,
        egress,
        score,
        retention_genes,
        egress_genes,
        gene_z: z,
    })
}

impl TegressScore {
    pub fn score_of(&self) -> HashMap<&str, f64> {
        self.sample_ids
            .iter()
            .map(String::as_str)
            .zip(self.score.iter().copied())
            .collect()
    }

    /// `sample_id`, `tEgress`, `Retention_score`, `Egress_score`, then `<gene>_z`.
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let mut columns: Vec<Column> = vec![
            Series::new("sample_id".into(), self.sample_ids.clone()).into(),
            Series::new("tEgress".into(), self.score.clone()).into(),
            Series::new("Retention_score".into(), self.retention.clone()).into(),
            Series::new("Egress_score".into(), self.egress.clone()).into(),
        ];
        for (i, gene) in self.gene_z.feature_ids.iter().enumerate() {
            let z: Vec<f64> = self.gene_z.values.row(i).to_vec();
            columns.push(Series::new(format!("{gene}_z").into(), z).into());
        }
        DataFrame::new(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn composite_skips_missing_genes_and_zeroes_nan() {
        let z = ExpressionMatrix::new(
            strings(&["A", "B", "C"]),
            strings(&["s1", "s2"]),
            array![[1.0, -1.0], [3.0, f64::NAN], [0.5, 0.5]],
        )
        .unwrap();
        let score = composite_score(&z, &strings(&["A", "B", "absent"]), &strings(&["C"]));
        // up side: s1 = (1 + 3)/2, s2 = (-1 + 0)/2
        assert_relative_eq!(score[0], 2.0 - 0.5);
        assert_relative_eq!(score[1], -0.5 - 0.5);

        let only_up = composite_score(&z, &strings(&["C"]), &[]);
        assert_eq!(only_up, vec![0.5, 0.5]);
    }

    #[test]
    fn tegress_uses_first_probe_per_gene() {
        let expr = ExpressionMatrix::new(
            strings(&["p_cxcr4", "p_gna13", "p_gna13_b"]),
            strings(&["s1", "s2", "s3"]),
            array![[1.0, 2.0, 3.0], [3.0, 2.0, 1.0], [9.0, 9.0, 0.0]],
        )
        .unwrap();
        let annotation = ProbeAnnotation::from_pairs(vec![
            ("p_cxcr4".into(), "CXCR4".into()),
            ("p_gna13".into(), "GNA13".into()),
            ("p_gna13_b".into(), "GNA13".into()),
        ]);
        let t = tegress_score(&expr, &annotation, &PathwayGenes::default()).unwrap();
        assert_eq!(t.retention_genes, vec!["GNA13"]);
        assert_eq!(t.egress_genes, vec!["CXCR4"]);
        // z(CXCR4) = [-1, 0, 1], z(GNA13) = [1, 0, -1]
        assert_relative_eq!(t.score[0], -2.0, epsilon = 1e-12);
        assert_relative_eq!(t.score[2], 2.0, epsilon = 1e-12);

        let df = t.to_frame().unwrap();
        assert_eq!(df.width(), 6);
        assert!(df.column("GNA13_z").is_ok());
        assert_relative_eq!(t.score_of()["s2"], 0.0, epsilon = 1e-12);
    }
}
