// src/analysis/mutation_association.rs
// -----------------------------------------------------------------------------
// Mutation frequency against stage group: one Fisher test per binary gene
// column, then BH FDR. Also the LoF-burden view: does the number of confident
// retention-pathway LoF mutations track advanced stage?
// -----------------------------------------------------------------------------

use std::cmp::Ordering;
use std::collections::HashMap;

use polars::prelude::*;
use tracing::{info, warn};

use crate::data_handling::clinical::StageGroup;
use crate::data_handling::mutations::LofBurden;
use crate::helper_functions::{column_as_f64, column_as_string};
use crate::stats::descriptive::spearman_correlation;
use crate::stats::fisher::{fisher_exact, FisherResult};
use crate::stats::multiple_testing::benjamini_hochberg;
use crate::stats::ttest::correlation_p_value;

const OR_CAP: f64 = 999.0;

fn round_to(v: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (v * f).round() / f
}

#[derive(Debug, Clone)]
pub struct MutationStageRow {
    pub gene: String,
    pub limited_n: u64,
    pub limited_pct: f64,
    pub advanced_n: u64,
    pub advanced_pct: f64,
    pub total_mut: u64,
    pub odds_ratio: f64,
    pub p_value: f64,
    pub fdr: f64,
    pub direction: StageGroup,
}

#[derive(Debug, Clone, Default)]
pub struct MutationStageResult {
    pub n_limited: usize,
    pub n_advanced: usize,
    /// Sorted by p-value ascending.
    pub rows: Vec<MutationStageRow>,
}

/// Test every column of `gene_cols` in `df` (patients x genes, 0/1) against
/// the stage group of each patient, looked up by `id_col`. Patients without a
/// stage are dropped; genes with fewer than `min_mutated` mutations in total are skipped.
pub fn mutation_stage_association(
    df: &DataFrame,
    id_col: &str,
    stages: &HashMap<String, StageGroup>,
    gene_cols: &[String],
    min_mutated: usize,
) -> PolarsResult<MutationStageResult> {
    let ids = column_as_string(df, id_col)?;
    let group: Vec<Option<StageGroup>> = ids
        .iter()
        .map(|id| id.as_ref().and_then(|id| stages.get(id).copied()))
        .collect();
    let n_limited = group.iter().filter(|g| **g == Some(StageGroup::Limited)).count();
    let n_advanced = group.iter().filter(|g| **g == Some(StageGroup::Advanced)).count();
    info!("Limited stage: n={}, Advanced stage: n={}", n_limited, n_advanced);
    if n_limited + n_advanced < 20 {
        warn!("Limited overlap between staged patients and mutation data ({} patients)", n_limited + n_advanced);
    }

    let mut rows = Vec::new();
    for gene in gene_cols {
        let values = column_as_f64(df, gene)?;
        let (mut lim_mut, mut adv_mut) = (0u64, 0u64);
        for (v, g) in values.iter().zip(&group) {
            if *v != Some(1.0) {
                continue;
            }
            match g {
                Some(StageGroup::Limited) => lim_mut += 1,
                Some(StageGroup::Advanced) => adv_mut += 1,
                None => {}
            }
        }
        let total_mut = lim_mut + adv_mut;
        if (total_mut as usize) < min_mutated {
            continue;
        }
        let lim_wt = n_limited as u64 - lim_mut;
        let adv_wt = n_advanced as u64 - adv_mut;
        let FisherResult { odds_ratio, p_value } = fisher_exact([[lim_mut, lim_wt], [adv_mut, adv_wt]]);

        let pct = |k: u64, n: usize| if n > 0 { 100.0 * k as f64 / n as f64 } else { 0.0 };
        let limited_pct = pct(lim_mut, n_limited);
        let advanced_pct = pct(adv_mut, n_advanced);
        rows.push(MutationStageRow {
            gene: gene.clone(),
            limited_n: lim_mut,
            limited_pct: round_to(limited_pct, 1),
            advanced_n: adv_mut,
            advanced_pct: round_to(advanced_pct, 1),
            total_mut,
            odds_ratio: if odds_ratio.is_nan() {
                f64::NAN
            } else if odds_ratio < 1000.0 {
                round_to(odds_ratio, 3)
            } else {
                OR_CAP
            },
            p_value,
            fdr: f64::NAN,
            direction: if advanced_pct > limited_pct {
                StageGroup::Advanced
            } else {
                StageGroup::Limited
            },
        });
    }

    rows.sort_by(|a, b| a.p_value.partial_cmp(&b.p_value).unwrap_or(Ordering::Equal));
    let p: Vec<f64> = rows.iter().map(|r| r.p_value).collect();
    for (row, q) in rows.iter_mut().zip(benjamini_hochberg(&p)) {
        row.fdr = q;
    }
    info!("Genes tested: {}", rows.len());
    Ok(MutationStageResult { n_limited, n_advanced, rows })
}

impl MutationStageResult {
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let r = &self.rows;
        df![
            "Gene" => r.iter().map(|x| x.gene.clone()).collect::<Vec<_>>(),
            "Limited_N" => r.iter().map(|x| x.limited_n).collect::<Vec<_>>(),
            "Limited_Pct" => r.iter().map(|x| x.limited_pct).collect::<Vec<_>>(),
            "Advanced_N" => r.iter().map(|x| x.advanced_n).collect::<Vec<_>>(),
            "Advanced_Pct" => r.iter().map(|x| x.advanced_pct).collect::<Vec<_>>(),
            "Total_Mut" => r.iter().map(|x| x.total_mut).collect::<Vec<_>>(),
            "OR" => r.iter().map(|x| x.odds_ratio).collect::<Vec<_>>(),
            "P_value" => r.iter().map(|x| x.p_value).collect::<Vec<_>>(),
            "FDR" => r.iter().map(|x| x.fdr).collect::<Vec<_>>(),
            "Direction" => r.iter().map(|x| x.direction.label()).collect::<Vec<_>>()
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LoF burden vs stage
// ─────────────────────────────────────────────────────────────────────────────

pub const BURDEN_CATEGORIES: [&str; 4] = ["0 (None)", "1", "2", "3+"];

pub fn burden_category(count: usize) -> &'static str {
    BURDEN_CATEGORIES[count.min(3)]
}

#[derive(Debug, Clone, PartialEq)]
pub struct BurdenCategoryRow {
    pub category: &'static str,
    pub n: usize,
    pub advanced: usize,
    pub limited: usize,
    pub rate: f64,
}

#[derive(Debug, Clone)]
pub struct BinaryComparison {
    /// [[with & advanced, with & limited], [without & advanced, without & limited]]
    pub table: [[u64; 2]; 2],
    pub fisher: FisherResult,
}

#[derive(Debug, Clone)]
pub struct LofBurdenAnalysis {
    pub categories: Vec<BurdenCategoryRow>,
    pub spearman_rho: Option<f64>,
    pub spearman_p: Option<f64>,
    /// Any LoF (1+) vs none.
    pub any_lof: BinaryComparison,
    /// High burden (2+) vs 0-1.
    pub high_lof: BinaryComparison,
    /// Per staged sample: (id, LoF count, stage).
    pub samples: Vec<(String, usize, StageGroup)>,
}

fn binary_comparison(samples: &[(String, usize, StageGroup)], threshold: usize) -> BinaryComparison {
    let mut table = [[0u64; 2]; 2];
    for (_, count, stage) in samples {
        let row = if *count >= threshold { 0 } else { 1 };
        let col = if *stage == StageGroup::Advanced { 0 } else { 1 };
        table[row][col] += 1;
    }
    BinaryComparison { table, fisher: fisher_exact(table) }
}

/// Join per-sample LoF counts onto staged samples (missing samples count as 0).
pub fn lof_burden_vs_stage(burden: &[LofBurden], stages: &HashMap<String, StageGroup>) -> LofBurdenAnalysis {
    let counts: HashMap<&str, usize> = burden.iter().map(|b| (b.sample_id.as_str(), b.lof_count)).collect();
    let mut samples: Vec<(String, usize, StageGroup)> = stages
        .iter()
        .map(|(id, stage)| (id.clone(), counts.get(id.as_str()).copied().unwrap_or(0), *stage))
        .collect();
    samples.sort_by(|a, b| a.0.cmp(&b.0));

    let categories = BURDEN_CATEGORIES
        .iter()
        .filter_map(|&cat| {
            let members: Vec<_> = samples.iter().filter(|s| burden_category(s.1) == cat).collect();
            if members.is_empty() {
                return None;
            }
            let advanced = members.iter().filter(|s| s.2 == StageGroup::Advanced).count();
            Some(BurdenCategoryRow {
                category: cat,
                n: members.len(),
                advanced,
                limited: members.len() - advanced,
                rate: advanced as f64 / members.len() as f64,
            })
        })
        .collect();

    let capped: Vec<f64> = samples.iter().map(|s| s.1.min(3) as f64).collect();
    let advanced: Vec<f64> = samples
        .iter()
        .map(|s| if s.2 == StageGroup::Advanced { 1.0 } else { 0.0 })
        .collect();
    let spearman_rho = spearman_correlation(&capped, &advanced);
    let spearman_p = spearman_rho.and_then(|r| correlation_p_value(r, samples.len()));

    LofBurdenAnalysis {
        categories,
        spearman_rho,
        spearman_p,
        any_lof: binary_comparison(&samples, 1),
        high_lof: binary_comparison(&samples, 2),
        samples,
    }
}

impl LofBurdenAnalysis {
    pub fn categories_frame(&self) -> PolarsResult<DataFrame> {
        let c = &self.categories;
        df![
            "LoF_Score" => c.iter().map(|r| r.category).collect::<Vec<_>>(),
            "N" => c.iter().map(|r| r.n as u64).collect::<Vec<_>>(),
            "Advanced" => c.iter().map(|r| r.advanced as u64).collect::<Vec<_>>(),
            "Limited" => c.iter().map(|r| r.limited as u64).collect::<Vec<_>>(),
            "Rate" => c.iter().map(|r| r.rate).collect::<Vec<_>>()
        ]
    }

    pub fn samples_frame(&self) -> PolarsResult<DataFrame> {
        let s = &self.samples;
        df![
            "sampleId" => s.iter().map(|x| x.0.clone()).collect::<Vec<_>>(),
            "LoF_count" => s.iter().map(|x| x.1 as u64).collect::<Vec<_>>(),
            "LoF_category" => s.iter().map(|x| burden_category(x.1)).collect::<Vec<_>>(),
            "Stage_Advanced" => s.iter().map(|x| x.2 == StageGroup::Advanced).collect::<Vec<_>>()
        ]
    }
}
