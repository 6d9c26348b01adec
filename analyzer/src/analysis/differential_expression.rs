// src/analysis/differential_expression.rs
// -----------------------------------------------------------------------------
// Per-probe two-group comparison: means, log2 fold change with a 0.01 pseudo-
// count, Cohen's d, t statistic, BH FDR. Group 1 is the reference; positive
// fold changes mean higher expression in group 2.
// -----------------------------------------------------------------------------

use std::cmp::Ordering;

use polars::prelude::*;
use tracing::{info, warn};

use crate::data_handling::annotation::ProbeAnnotation;
use crate::data_handling::expression::ExpressionMatrix;
use crate::models::SampleGroup;
use crate::stats::descriptive::{cohens_d, finite, mean, variance};
use crate::stats::multiple_testing::benjamini_hochberg;
use crate::stats::ttest::{ttest, TTestKind};

const PSEUDOCOUNT: f64 = 0.01;
/// Per-group minimum inside a stratum before a stratified comparison is attempted.
pub const MIN_STRATUM_GROUP: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct DeOptions {
    pub min_per_group: usize,
    pub kind: TTestKind,
}

impl Default for DeOptions {
    fn default() -> Self {
        Self {
            min_per_group: 10,
            kind: TTestKind::Welch,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeRow {
    pub probe: String,
    pub mean1: f64,
    pub mean2: f64,
    pub log2fc: f64,
    pub cohens_d: f64,
    pub t_stat: f64,
    pub p_value: f64,
    pub fdr: f64,
    pub direction: String,
}

#[derive(Debug, Clone)]
pub struct DeResult {
    pub label: String,
    pub group1: String,
    pub group2: String,
    pub n1: usize,
    pub n2: usize,
    /// Sorted by p-value ascending.
    pub rows: Vec<DeRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeSummary {
    pub tested: usize,
    pub fdr_05: usize,
    pub fdr_10: usize,
    pub p_01: usize,
    pub p_05: usize,
    pub max_abs_log2fc: f64,
    /// Mean |log2FC| among probes with p < 0.05; NaN when there are none.
    pub mean_abs_log2fc_nominal: f64,
}

pub fn log2_fold_change(mean1: f64, mean2: f64) -> f64 {
    ((mean2 + PSEUDOCOUNT) / (mean1 + PSEUDOCOUNT)).log2()
}

/// Compare `group2` against `group1` for every feature of `expr`.
pub fn differential_expression(
    expr: &ExpressionMatrix,
    group1: &SampleGroup,
    group2: &SampleGroup,
    options: &DeOptions,
) -> DeResult {
    let idx1 = expr.sample_positions(&group1.samples);
    let idx2 = expr.sample_positions(&group2.samples);
    info!(
        "{} (n={}) vs {} (n={}) with expression; testing {} features",
        group1.name,
        idx1.len(),
        group2.name,
        idx2.len(),
        expr.n_features()
    );

    let up2 = format!("{}_high", group2.name);
    let up1 = format!("{}_high", group1.name);

    let mut rows = Vec::new();
    for (i, probe) in expr.feature_ids.iter().enumerate() {
        let row = expr.values.row(i);
        let a = finite(&idx1.iter().map(|&j| row[j]).collect::<Vec<f64>>());
        let b = finite(&idx2.iter().map(|&j| row[j]).collect::<Vec<f64>>());
        if a.len() < options.min_per_group || b.len() < options.min_per_group {
            continue;
        }
        let (Some(va), Some(vb)) = (variance(&a, 0), variance(&b, 0)) else {
            continue;
        };
        if va <= 0.0 || vb <= 0.0 {
            continue;
        }
        let Some(test) = ttest(&a, &b, options.kind) else {
            continue;
        };
        let (Some(m1), Some(m2)) = (mean(&a), mean(&b)) else {
            continue;
        };
        let log2fc = log2_fold_change(m1, m2);
        rows.push(DeRow {
            probe: probe.clone(),
            mean1: m1,
            mean2: m2,
            log2fc,
            cohens_d: cohens_d(&a, &b),
            t_stat: test.statistic,
            p_value: test.p_value,
            fdr: f64::NAN,
            direction: if log2fc > 0.0 { up2.clone() } else { up1.clone() },
        });
    }

    let p: Vec<f64> = rows.iter().map(|r| r.p_value).collect();
    for (row, q) in rows.iter_mut().zip(benjamini_hochberg(&p)) {
        row.fdr = q;
    }
    rows.sort_by(|a, b| a.p_value.partial_cmp(&b.p_value).unwrap_or(Ordering::Equal));
    info!("Probes tested: {}", rows.len());

    DeResult {
        label: "All".to_string(),
        group1: group1.name.clone(),
        group2: group2.name.clone(),
        n1: idx1.len(),
        n2: idx2.len(),
        rows,
    }
}

impl DeResult {
    pub fn summary(&self) -> DeSummary {
        let count = |f: fn(&DeRow) -> bool| self.rows.iter().filter(|r| f(r)).count();
        let nominal: Vec<f64> = self
            .rows
            .iter()
            .filter(|r| r.p_value < 0.05)
            .map(|r| r.log2fc.abs())
            .collect();
        DeSummary {
            tested: self.rows.len(),
            fdr_05: count(|r| r.fdr < 0.05),
            fdr_10: count(|r| r.fdr < 0.1),
            p_01: count(|r| r.p_value < 0.01),
            p_05: nominal.len(),
            max_abs_log2fc: self.rows.iter().map(|r| r.log2fc.abs()).fold(0.0, f64::max),
            mean_abs_log2fc_nominal: mean(&nominal).unwrap_or(f64::NAN),
        }
    }

    /// Rows below `fdr` going in `direction`.
    pub fn significant<'a>(&'a self, fdr: f64, direction: &'a str) -> impl Iterator<Item = &'a DeRow> + 'a {
        self.rows
            .iter()
            .filter(move |r| r.fdr < fdr && r.direction == direction)
    }

    /// Largest p-value still under `fdr`; where the FDR line sits on a volcano plot.
    pub fn fdr_p_threshold(&self, fdr: f64) -> Option<f64> {
        self.rows
            .iter()
            .filter(|r| r.fdr < fdr)
            .map(|r| r.p_value)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))))
    }

    pub fn to_frame(&self, annotation: Option<&ProbeAnnotation>) -> PolarsResult<DataFrame> {
        let f = |g: fn(&DeRow) -> f64| -> Vec<f64> { self.rows.iter().map(g).collect() };
        let mut df = DataFrame::new(vec![
            Series::new("Probe".into(), self.rows.iter().map(|r| r.probe.clone()).collect::<Vec<_>>()).into(),
            Series::new(format!("Mean_{}", self.group1).into(), f(|r| r.mean1)).into(),
            Series::new(format!("Mean_{}", self.group2).into(), f(|r| r.mean2)).into(),
            Series::new("Log2FC".into(), f(|r| r.log2fc)).into(),
            Series::new("Cohens_d".into(), f(|r| r.cohens_d)).into(),
            Series::new("T_stat".into(), f(|r| r.t_stat)).into(),
            Series::new("P_value".into(), f(|r| r.p_value)).into(),
            Series::new("FDR".into(), f(|r| r.fdr)).into(),
            Series::new("Direction".into(), self.rows.iter().map(|r| r.direction.clone()).collect::<Vec<_>>()).into(),
        ])?;
        if let Some(a) = annotation {
            df = a.annotate(&df)?;
        }
        Ok(df)
    }
}

/// Whole cohort first, then each stratum with both groups restricted to it.
/// Strata where either group falls below five samples are skipped.
pub fn stratified_differential_expression(
    expr: &ExpressionMatrix,
    group1: &SampleGroup,
    group2: &SampleGroup,
    strata: &[SampleGroup],
    options: &DeOptions,
) -> Vec<DeResult> {
    let mut results = vec![differential_expression(expr, group1, group2, options)];
    for stratum in strata {
        let within = |g: &SampleGroup| SampleGroup {
            name: g.name.clone(),
            samples: g
                .samples
                .iter()
                .filter(|s| stratum.samples.contains(s))
                .cloned()
                .collect(),
        };
        let (g1, g2) = (within(group1), within(group2));
        let n1 = expr.sample_positions(&g1.samples).len();
        let n2 = expr.sample_positions(&g2.samples).len();
        if n1 < MIN_STRATUM_GROUP || n2 < MIN_STRATUM_GROUP {
            warn!("{}: insufficient samples ({} {}, {} {}), skipping", stratum.name, g1.name, n1, g2.name, n2);
            continue;
        }
        let mut r = differential_expression(expr, &g1, &g2, options);
        r.label = stratum.name.clone();
        results.push(r);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn group(name: &str, ids: &[&str]) -> SampleGroup {
        SampleGroup {
            name: name.into(),
            samples: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Three probes over six samples: P_up rises in group B, P_flat is constant,
    /// P_noise barely moves.
    fn toy() -> ExpressionMatrix {
        let samples: Vec<String> = ["a1", "a2", "a3", "b1", "b2", "b3"].iter().map(|s| s.to_string()).collect();
        let values = Array2::from_shape_vec(
            (3, 6),
            vec![
                1.0, 1.2, 0.9, 4.0, 4.4, 3.9, //
                2.0, 2.0, 2.0, 2.0, 2.0, 2.0, //
                5.0, 5.5, 4.5, 5.1, 4.9, 5.3,
            ],
        )
        .unwrap();
        ExpressionMatrix::new(vec!["P_up".into(), "P_flat".into(), "P_noise".into()], samples, values).unwrap()
    }

    fn options() -> DeOptions {
        DeOptions { min_per_group: 3, kind: TTestKind::Welch }
    }

    #[test]
    fn ranks_probes_and_labels_direction() {
        let r = differential_expression(&toy(), &group("A", &["a1", "a2", "a3"]), &group("B", &["b1", "b2", "b3"]), &options());
        assert_eq!(r.rows.len(), 2, "constant probe is not tested");
        let top = &r.rows[0];
        assert_eq!(top.probe, "P_up");
        assert_eq!(top.direction, "B_high");
        assert_relative_eq!(top.log2fc, log2_fold_change(31.0 / 30.0, 12.3 / 3.0), epsilon = 1e-12);
        assert!(top.t_stat < 0.0);
        assert!(top.cohens_d > 0.0);
        assert!(r.rows[0].p_value <= r.rows[1].p_value);
        assert!(r.rows.iter().all(|row| row.fdr >= row.p_value));
    }

    #[test]
    fn minimum_group_size_is_enforced() {
        let opts = DeOptions { min_per_group: 4, ..options() };
        let r = differential_expression(&toy(), &group("A", &["a1", "a2", "a3"]), &group("B", &["b1", "b2", "b3"]), &opts);
        assert!(r.rows.is_empty());
    }

    #[test]
    fn frame_and_summary() {
        let r = differential_expression(&toy(), &group("Stage_I", &["a1", "a2", "a3"]), &group("Stage_III_IV", &["b1", "b2", "b3"]), &options());
        let df = r.to_frame(None).unwrap();
        let names: Vec<&str> = df.get_column_names().iter().map(|c| c.as_str()).collect();
        assert_eq!(
            names,
            vec!["Probe", "Mean_Stage_I", "Mean_Stage_III_IV", "Log2FC", "Cohens_d", "T_stat", "P_value", "FDR", "Direction"]
        );
        let s = r.summary();
        assert_eq!(s.tested, 2);
        assert!(s.p_05 >= 1);
        assert!(s.max_abs_log2fc > 1.0);
        assert_eq!(r.significant(0.1, "Stage_III_IV_high").count(), s.fdr_10);
    }

    #[test]
    fn small_strata_are_skipped() {
        let strata = vec![group("GCB", &["a1", "a2", "b1"]), group("ABC", &["a3", "b2", "b3"])];
        let results = stratified_differential_expression(
            &toy(),
            &group("A", &["a1", "a2", "a3"]),
            &group("B", &["b1", "b2", "b3"]),
            &strata,
            &options(),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, "All");
    }
}
