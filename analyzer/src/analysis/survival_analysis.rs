// src/analysis/survival_analysis.rs
// -----------------------------------------------------------------------------
// Survival association of expression: per-gene Cox screens (optionally IPI-
// adjusted), a composite prognostic signature with tertile risk groups,
// quartile/High-Low Kaplan-Meier comparisons of a score, and the Dead vs Alive
// expression contrast.
// -----------------------------------------------------------------------------

use std::cmp::Ordering;

use anyhow::{bail, Result};
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::analysis::differential_expression::{differential_expression, DeOptions, DeResult};
use crate::analysis::signature::{prognostic_score, TegressScore};
use crate::config::Thresholds;
use crate::data_handling::clinical::{CellOfOrigin, SurvivalCohort, SurvivalRecord};
use crate::data_handling::expression::ExpressionMatrix;
use crate::models::SampleGroup;
use crate::stats::cox::{fit_cox, CoxCoefficient, CoxData, CoxFit, MAX_ITER};
use crate::stats::descriptive::{median, qcut, std_nan};
use crate::stats::multiple_testing::benjamini_hochberg;
use crate::stats::survival::{kaplan_meier, logrank_test, logrank_two, KaplanMeier, LogRankResult};
use crate::stats::ttest::TTestKind;

pub const GENE_COVARIATE: &str = "gene_expr";
pub const IPI_COVARIATE: &str = "IPI_numeric";
pub const SCORE_COVARIATE: &str = "Prognostic_Score";
const PROGRESS_EVERY: usize = 2000;
/// Within-cohort spread below which a gene is not worth a fit.
const MIN_COHORT_STD: f64 = 0.01;

// ─────────────────────────────────────────────────────────────────────────────
// Per-gene Cox screen
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CoxScreenOptions {
    pub adjust_ipi: bool,
    /// Cohort-level minimum number of deaths.
    pub min_events: usize,
    /// Cohort-level minimum number of samples with expression.
    pub min_samples: usize,
    /// Genes with row std at or below this are skipped.
    pub min_std: f64,
    /// Complete cases a single gene's model needs.
    pub min_complete: usize,
}

impl CoxScreenOptions {
    pub fn from_thresholds(t: &Thresholds, adjust_ipi: bool) -> Self {
        Self {
            adjust_ipi,
            min_events: t.min_events,
            min_samples: t.min_cox_samples,
            min_std: t.min_gene_std,
            min_complete: t.min_cox_samples,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoxScreenRow {
    pub gene: String,
    pub group: String,
    pub hr: f64,
    pub hr_lower: f64,
    pub hr_upper: f64,
    pub p_value: f64,
    pub q_value: f64,
    pub n_samples: usize,
    pub n_events: usize,
    pub ipi_adjusted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CoxScreen {
    pub group: String,
    /// In expression-row order.
    pub rows: Vec<CoxScreenRow>,
    /// Fits kept after hitting the iteration cap.
    pub non_converged: usize,
}

/// Cohort records that have a column in `expr`, with that column's position.
fn with_expression<'a>(expr: &ExpressionMatrix, cohort: &'a SurvivalCohort) -> Vec<(&'a SurvivalRecord, usize)> {
    cohort
        .records
        .iter()
        .filter_map(|r| expr.sample_position(&r.sample_id).map(|j| (r, j)))
        .collect()
}

/// One Cox model per gene of `expr_z` against overall survival in `cohort`.
pub fn cox_screen(
    expr_z: &ExpressionMatrix,
    cohort: &SurvivalCohort,
    group: &str,
    options: &CoxScreenOptions,
) -> CoxScreen {
    let mut screen = CoxScreen {
        group: group.to_string(),
        rows: Vec::new(),
        non_converged: 0,
    };
    let n_events = cohort.n_events();
    if n_events < options.min_events {
        info!("{}: Insufficient events ({}), skipping", group, n_events);
        return screen;
    }
    let records = with_expression(expr_z, cohort);
    if records.len() < options.min_samples {
        info!("{}: Insufficient samples ({}), skipping", group, records.len());
        return screen;
    }

    let genes: Vec<usize> = (0..expr_z.n_features())
        .filter(|&i| expr_z.row_std(i) > options.min_std)
        .collect();
    info!(
        "{}: Analyzing {} genes, {} samples, {} events",
        group,
        genes.len(),
        records.len(),
        n_events
    );

    let time: Vec<f64> = records.iter().map(|(r, _)| r.time).collect();
    let event: Vec<bool> = records.iter().map(|(r, _)| r.event).collect();
    let ipi: Vec<f64> = records.iter().map(|(r, _)| r.ipi.unwrap_or(f64::NAN)).collect();

    for (k, &i) in genes.iter().enumerate() {
        if (k + 1) % PROGRESS_EVERY == 0 {
            info!("Progress: {}/{} genes...", k + 1, genes.len());
        }
        let gene = &expr_z.feature_ids[i];
        let row = expr_z.values.row(i);
        let x: Vec<f64> = records.iter().map(|(_, j)| row[*j]).collect();
        if std_nan(&x, 1).unwrap_or(0.0) < MIN_COHORT_STD {
            continue;
        }

        let mut columns = vec![(GENE_COVARIATE.to_string(), x)];
        if options.adjust_ipi {
            columns.push((IPI_COVARIATE.to_string(), ipi.clone()));
        }
        let data = match CoxData::from_columns(time.clone(), event.clone(), columns) {
            Ok(d) => d.complete_cases(),
            Err(e) => {
                debug!("{}: {}", gene, e);
                continue;
            }
        };
        if data.n_samples() < options.min_complete {
            continue;
        }
        match fit_cox(&data) {
            Ok(fit) => {
                if !fit.converged {
                    screen.non_converged += 1;
                }
                if let Some(c) = fit.coefficient(GENE_COVARIATE) {
                    screen.rows.push(CoxScreenRow {
                        gene: gene.clone(),
                        group: group.to_string(),
                        hr: c.hazard_ratio,
                        hr_lower: c.hr_lower,
                        hr_upper: c.hr_upper,
                        p_value: c.p_value,
                        q_value: f64::NAN,
                        n_samples: fit.n_samples,
                        n_events: fit.n_events,
                        ipi_adjusted: options.adjust_ipi,
                    });
                }
            }
            Err(e) => debug!("{}: Cox fit failed: {}", gene, e),
        }
    }

    let p: Vec<f64> = screen.rows.iter().map(|r| r.p_value).collect();
    for (row, q) in screen.rows.iter_mut().zip(benjamini_hochberg(&p)) {
        row.q_value = q;
    }
    info!("{}: {} genes fitted", group, screen.rows.len());
    if screen.non_converged > 0 {
        warn!(
            "{}: {} Cox fits did not converge in {} iterations",
            group,
            screen.non_converged,
            MAX_ITER
        );
    }
    screen
}

impl CoxScreen {
    pub fn sorted_by_p(&self) -> Vec<&CoxScreenRow> {
        let mut rows: Vec<&CoxScreenRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| a.p_value.partial_cmp(&b.p_value).unwrap_or(Ordering::Equal));
        rows
    }

    /// Up to `n` genes with p below `p_max` on the adverse (HR > 1) or favorable side, by p-value.
    pub fn top(&self, adverse: bool, p_max: f64, n: usize) -> Vec<&CoxScreenRow> {
        self.sorted_by_p()
            .into_iter()
            .filter(|r| r.p_value < p_max && if adverse { r.hr > 1.0 } else { r.hr < 1.0 })
            .take(n)
            .collect()
    }

    pub fn significant(&self, q_max: f64) -> Vec<&CoxScreenRow> {
        self.sorted_by_p().into_iter().filter(|r| r.q_value < q_max).collect()
    }
}

/// All rows of several screens in one table.
pub fn screens_frame<'a, I>(rows: I) -> PolarsResult<DataFrame>
where
    I: IntoIterator<Item = &'a CoxScreenRow>,
{
    let rows: Vec<&CoxScreenRow> = rows.into_iter().collect();
    let f = |g: fn(&CoxScreenRow) -> f64| -> Vec<f64> { rows.iter().map(|r| g(*r)).collect() };
    df![
        "Gene" => rows.iter().map(|r| r.gene.clone()).collect::<Vec<_>>(),
        "Group" => rows.iter().map(|r| r.group.clone()).collect::<Vec<_>>(),
        "HR" => f(|r| r.hr),
        "HR_lower" => f(|r| r.hr_lower),
        "HR_upper" => f(|r| r.hr_upper),
        "p_value" => f(|r| r.p_value),
        "q_value" => f(|r| r.q_value),
        "n_samples" => rows.iter().map(|r| r.n_samples as u64).collect::<Vec<_>>(),
        "n_events" => rows.iter().map(|r| r.n_events as u64).collect::<Vec<_>>(),
        "IPI_adjusted" => rows.iter().map(|r| r.ipi_adjusted).collect::<Vec<_>>()
    ]
}

/// IPI-adjusted screen over the whole cohort, then within each subtype with
/// at least 20 samples and 5 deaths.
pub fn stratified_cox_screen(expr_z: &ExpressionMatrix, cohort: &SurvivalCohort, thresholds: &Thresholds) -> Vec<CoxScreen> {
    let global = CoxScreenOptions::from_thresholds(thresholds, true);
    let mut screens = vec![cox_screen(expr_z, cohort, "Global", &global)];

    let per_subtype = CoxScreenOptions { min_events: 5, ..global };
    for subtype in cohort.subtypes() {
        let sub = cohort.with_subtype(&subtype);
        if sub.len() >= 20 && sub.n_events() >= 5 {
            let screen = cox_screen(expr_z, &sub, &subtype, &per_subtype);
            if !screen.rows.is_empty() {
                screens.push(screen);
            }
        } else {
            info!("{}: n={}, events={}, not screened", subtype, sub.len(), sub.n_events());
        }
    }
    screens
}

// ─────────────────────────────────────────────────────────────────────────────
// Prognostic signature
// ─────────────────────────────────────────────────────────────────────────────

pub const RISK_LABELS: [&str; 3] = ["Low", "Medium", "High"];
const SIGNATURE_P: f64 = 0.01;
const SIGNATURE_MIN_COMPLETE: usize = 50;

#[derive(Debug, Clone)]
pub struct SignatureGene {
    pub gene: String,
    pub adverse: bool,
    pub hr: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone)]
pub struct SignatureModel {
    pub label: &'static str,
    pub fit: Option<CoxFit>,
}

#[derive(Debug, Clone)]
pub struct ScoredSample {
    pub record: SurvivalRecord,
    pub score: f64,
    pub risk: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SubtypeSignatureFit {
    pub subtype: String,
    pub n: usize,
    pub coefficient: Option<CoxCoefficient>,
    pub note: &'static str,
}

#[derive(Debug, Clone)]
pub struct PrognosticSignature {
    pub screen: CoxScreen,
    pub genes: Vec<SignatureGene>,
    pub samples: Vec<ScoredSample>,
    /// Score only, IPI only, score + IPI.
    pub models: Vec<SignatureModel>,
    pub low_vs_high: Option<LogRankResult>,
    pub subtypes: Vec<SubtypeSignatureFit>,
}

fn fit_or_warn(label: &str, data: Result<CoxData>) -> Option<CoxFit> {
    match data.and_then(|d| fit_cox(&d.complete_cases())) {
        Ok(fit) => Some(fit),
        Err(e) => {
            warn!("{}: model failed: {}", label, e);
            None
        }
    }
}

/// Screen, pick up to `top_n` adverse and favorable genes at p < 0.01, score
/// every sample and test the score against IPI and across tertiles.
pub fn build_prognostic_signature(
    expr_z: &ExpressionMatrix,
    cohort: &SurvivalCohort,
    thresholds: &Thresholds,
) -> Result<PrognosticSignature> {
    let options = CoxScreenOptions {
        adjust_ipi: false,
        min_events: 1,
        min_samples: 0,
        min_std: thresholds.min_gene_std,
        min_complete: SIGNATURE_MIN_COMPLETE,
    };
    let screen = cox_screen(expr_z, cohort, "Univariate", &options);
    info!("Screened {} genes", screen.rows.len());

    let to_gene = |r: &CoxScreenRow, adverse: bool| SignatureGene {
        gene: r.gene.clone(),
        adverse,
        hr: r.hr,
        p_value: r.p_value,
    };
    let mut genes: Vec<SignatureGene> = screen
        .top(true, SIGNATURE_P, thresholds.top_n)
        .into_iter()
        .map(|r| to_gene(r, true))
        .collect();
    genes.extend(screen.top(false, SIGNATURE_P, thresholds.top_n).into_iter().map(|r| to_gene(r, false)));
    let adverse: Vec<String> = genes.iter().filter(|g| g.adverse).map(|g| g.gene.clone()).collect();
    let favorable: Vec<String> = genes.iter().filter(|g| !g.adverse).map(|g| g.gene.clone()).collect();
    info!("Top adverse genes (p<0.01, HR>1): {}", adverse.len());
    info!("Top favorable genes (p<0.01, HR<1): {}", favorable.len());
    if genes.is_empty() {
        bail!("no gene passed p < {} in the univariate screen", SIGNATURE_P);
    }

    let score = prognostic_score(expr_z, &adverse, &favorable);
    let mut samples: Vec<ScoredSample> = with_expression(expr_z, cohort)
        .into_iter()
        .map(|(r, j)| ScoredSample {
            record: r.clone(),
            score: score[j],
            risk: None,
        })
        .collect();
    let tertiles = qcut(&samples.iter().map(|s| s.score).collect::<Vec<_>>(), 3);
    for (s, t) in samples.iter_mut().zip(tertiles) {
        s.risk = t;
    }

    let with_ipi: Vec<&ScoredSample> = samples.iter().filter(|s| s.record.ipi.is_some()).collect();
    info!("Samples with IPI: {}, Deaths: {}", with_ipi.len(), with_ipi.iter().filter(|s| s.record.event).count());
    let time: Vec<f64> = with_ipi.iter().map(|s| s.record.time).collect();
    let event: Vec<bool> = with_ipi.iter().map(|s| s.record.event).collect();
    let sc: Vec<f64> = with_ipi.iter().map(|s| s.score).collect();
    let ipi: Vec<f64> = with_ipi.iter().map(|s| s.record.ipi.unwrap_or(f64::NAN)).collect();
    let design = |cols: Vec<(&str, &Vec<f64>)>| {
        CoxData::from_columns(
            time.clone(),
            event.clone(),
            cols.into_iter().map(|(n, v)| (n.to_string(), v.clone())).collect(),
        )
    };
    let models = vec![
        SignatureModel {
            label: "Signature only",
            fit: fit_or_warn("Signature only", design(vec![(SCORE_COVARIATE, &sc)])),
        },
        SignatureModel {
            label: "IPI only",
            fit: fit_or_warn("IPI only", design(vec![(IPI_COVARIATE, &ipi)])),
        },
        SignatureModel {
            label: "Signature + IPI",
            fit: fit_or_warn("Signature + IPI", design(vec![(SCORE_COVARIATE, &sc), (IPI_COVARIATE, &ipi)])),
        },
    ];

    let low_vs_high = risk_logrank(&samples.iter().collect::<Vec<_>>());
    let subtypes = subtype_signature_fits(&samples);

    Ok(PrognosticSignature {
        screen,
        genes,
        samples,
        models,
        low_vs_high,
        subtypes,
    })
}

fn risk_logrank(samples: &[&ScoredSample]) -> Option<LogRankResult> {
    let arm = |k: usize| -> (Vec<f64>, Vec<bool>) {
        samples
            .iter()
            .filter(|s| s.risk == Some(k))
            .map(|s| (s.record.time, s.record.event))
            .unzip()
    };
    let (t_low, e_low) = arm(0);
    let (t_high, e_high) = arm(RISK_LABELS.len() - 1);
    logrank_two(&t_low, &e_low, &t_high, &e_high)
}

fn subtype_signature_fits(samples: &[ScoredSample]) -> Vec<SubtypeSignatureFit> {
    let mut labels: Vec<String> = samples.iter().filter_map(|s| s.record.subtype.clone()).collect();
    labels.sort();
    labels.dedup();
    labels
        .into_iter()
        .map(|subtype| {
            let sub: Vec<&ScoredSample> = samples
                .iter()
                .filter(|s| s.record.subtype.as_deref() == Some(subtype.as_str()))
                .collect();
            let n = sub.len();
            let deaths = sub.iter().filter(|s| s.record.event).count();
            let in_risk = |k: usize| sub.iter().filter(|s| s.risk == Some(k)).count();
            let (coefficient, note) = if n < 20 || deaths < 5 {
                (None, "insufficient for analysis")
            } else if in_risk(0) < 3 || in_risk(2) < 3 {
                (None, "insufficient in risk groups")
            } else {
                let data = CoxData::from_columns(
                    sub.iter().map(|s| s.record.time).collect(),
                    sub.iter().map(|s| s.record.event).collect(),
                    vec![(SCORE_COVARIATE.to_string(), sub.iter().map(|s| s.score).collect())],
                );
                match fit_or_warn(&subtype, data) {
                    Some(fit) => (fit.coefficient(SCORE_COVARIATE).cloned(), ""),
                    None => (None, "model failed"),
                }
            };
            SubtypeSignatureFit {
                subtype,
                n,
                coefficient,
                note,
            }
        })
        .collect()
}

impl PrognosticSignature {
    pub fn risk_label(risk: Option<usize>) -> Option<&'static str> {
        risk.and_then(|k| RISK_LABELS.get(k).copied())
    }

    /// (label, n, deaths) per tertile.
    pub fn risk_summary(&self) -> Vec<(&'static str, usize, usize)> {
        RISK_LABELS
            .iter()
            .enumerate()
            .map(|(k, &label)| {
                let members = self.samples.iter().filter(|s| s.risk == Some(k));
                let (n, deaths) = members.fold((0, 0), |(n, d), s| (n + 1, d + s.record.event as usize));
                (label, n, deaths)
            })
            .collect()
    }

    pub fn risk_curves(&self) -> Vec<(String, KaplanMeier)> {
        RISK_LABELS
            .iter()
            .enumerate()
            .map(|(k, label)| {
                let members: Vec<&ScoredSample> = self.samples.iter().filter(|s| s.risk == Some(k)).collect();
                let times: Vec<f64> = members.iter().map(|s| s.record.time).collect();
                let events: Vec<bool> = members.iter().map(|s| s.record.event).collect();
                (format!("{} Risk (n={})", label, members.len()), kaplan_meier(&times, &events))
            })
            .collect()
    }

    pub fn genes_frame(&self) -> PolarsResult<DataFrame> {
        let g = &self.genes;
        df![
            "Gene" => g.iter().map(|x| x.gene.clone()).collect::<Vec<_>>(),
            "Direction" => g.iter().map(|x| if x.adverse { "Adverse" } else { "Favorable" }).collect::<Vec<_>>(),
            "HR" => g.iter().map(|x| x.hr).collect::<Vec<_>>(),
            "p_value" => g.iter().map(|x| x.p_value).collect::<Vec<_>>()
        ]
    }

    pub fn scores_frame(&self) -> PolarsResult<DataFrame> {
        let s = &self.samples;
        df![
            "Sample_ID" => s.iter().map(|x| x.record.sample_id.clone()).collect::<Vec<_>>(),
            "Prognostic_Score" => s.iter().map(|x| x.score).collect::<Vec<_>>(),
            "Risk_Group" => s.iter().map(|x| Self::risk_label(x.risk)).collect::<Vec<_>>(),
            "LymphGen_Subtype" => s.iter().map(|x| x.record.subtype.clone()).collect::<Vec<_>>(),
            "OS_status" => s.iter().map(|x| x.record.event as i32).collect::<Vec<_>>(),
            "OS_time_years" => s.iter().map(|x| x.record.time).collect::<Vec<_>>(),
            "IPI_numeric" => s.iter().map(|x| x.record.ipi).collect::<Vec<_>>()
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Score-group survival (quartiles, High/Low)
// ─────────────────────────────────────────────────────────────────────────────

pub const QUARTILE_LABELS: [&str; 4] = ["Q1 (Low)", "Q2", "Q3", "Q4 (High)"];
pub const SPLIT_LABELS: [&str; 2] = ["Low", "High"];
pub const MIN_SCORE_COHORT: usize = 20;
const MIN_CURVE_GROUP: usize = 5;

#[derive(Debug, Clone)]
pub struct SurvivalGroup {
    pub label: String,
    pub n: usize,
    pub events: usize,
    /// Only estimated for groups of at least five samples.
    pub km: Option<KaplanMeier>,
}

impl SurvivalGroup {
    /// "NR" when the curve never reaches 0.5, "NA" when no curve was fitted.
    pub fn median_label(&self) -> String {
        match &self.km {
            None => "NA".to_string(),
            Some(km) => km.median_survival().map_or("NR".to_string(), |m| format!("{m:.1}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupedSurvival {
    pub name: String,
    pub n: usize,
    pub events: usize,
    pub groups: Vec<SurvivalGroup>,
    /// First group against the last, both with at least five samples.
    pub extreme: Option<LogRankResult>,
    /// All groups together.
    pub overall: Option<LogRankResult>,
}

/// Survival per assigned group; samples with `None` are left out.
pub fn grouped_survival(
    name: &str,
    times: &[f64],
    events: &[bool],
    assignment: &[Option<usize>],
    labels: &[&str],
) -> GroupedSurvival {
    let members = |k: usize| -> (Vec<f64>, Vec<bool>) {
        assignment
            .iter()
            .enumerate()
            .filter(|(_, a)| **a == Some(k))
            .map(|(i, _)| (times[i], events[i]))
            .unzip()
    };
    let groups: Vec<SurvivalGroup> = labels
        .iter()
        .enumerate()
        .map(|(k, label)| {
            let (t, e) = members(k);
            SurvivalGroup {
                label: label.to_string(),
                n: t.len(),
                events: e.iter().filter(|&&x| x).count(),
                km: (t.len() >= MIN_CURVE_GROUP).then(|| kaplan_meier(&t, &e)),
            }
        })
        .collect();

    let last = labels.len().saturating_sub(1);
    let (t0, e0) = members(0);
    let (tn, en) = members(last);
    let extreme = if t0.len() >= MIN_CURVE_GROUP && tn.len() >= MIN_CURVE_GROUP {
        logrank_two(&t0, &e0, &tn, &en)
    } else {
        None
    };

    let assigned: Vec<usize> = (0..assignment.len()).filter(|&i| assignment[i].is_some()).collect();
    let overall = logrank_test(
        &assigned.iter().map(|&i| times[i]).collect::<Vec<_>>(),
        &assigned.iter().map(|&i| events[i]).collect::<Vec<_>>(),
        &assigned.iter().map(|&i| assignment[i].unwrap_or(0)).collect::<Vec<_>>(),
    );

    GroupedSurvival {
        name: name.to_string(),
        n: times.len(),
        events: events.iter().filter(|&&e| e).count(),
        groups,
        extreme,
        overall,
    }
}

/// Equal-width two-bin split at the midpoint of the observed range; the
/// midpoint itself falls in the lower bin. NaN scores are unassigned.
pub fn equal_width_split(scores: &[f64]) -> Vec<Option<usize>> {
    let finite: Vec<f64> = scores.iter().copied().filter(|v| v.is_finite()).collect();
    let lo = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mid = (lo + hi) / 2.0;
    scores
        .iter()
        .map(|&v| v.is_finite().then_some(if v <= mid { 0 } else { 1 }))
        .collect()
}

/// Kaplan-Meier by score quartile; `None` below twenty samples.
pub fn quartile_survival(name: &str, times: &[f64], events: &[bool], scores: &[f64]) -> Option<GroupedSurvival> {
    if times.len() < MIN_SCORE_COHORT {
        info!("{}: Insufficient samples (n={})", name, times.len());
        return None;
    }
    Some(grouped_survival(name, times, events, &qcut(scores, 4), &QUARTILE_LABELS))
}

pub fn split_survival(name: &str, times: &[f64], events: &[bool], scores: &[f64]) -> Option<GroupedSurvival> {
    if times.len() < MIN_SCORE_COHORT {
        return None;
    }
    Some(grouped_survival(name, times, events, &equal_width_split(scores), &SPLIT_LABELS))
}

#[derive(Debug, Clone)]
pub struct TegressSample {
    pub sample_id: String,
    pub coo: Option<CellOfOrigin>,
    pub time: f64,
    pub event: bool,
    pub score: f64,
    pub quartile: Option<usize>,
    pub split: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct TegressSurvival {
    pub samples: Vec<TegressSample>,
    /// Overall first, then each subtype that was large enough.
    pub quartiles: Vec<GroupedSurvival>,
    pub splits: Vec<GroupedSurvival>,
    /// (subtype, n) for subtypes below twenty samples.
    pub skipped: Vec<(String, usize)>,
}

/// Quartile and High/Low survival of the tEgress score overall and within each
/// cell-of-origin subtype; groups are recomputed inside every subtype.
pub fn tegress_survival(score: &TegressScore, cohort: &SurvivalCohort) -> TegressSurvival {
    let by_sample = score.score_of();
    let mut samples: Vec<TegressSample> = cohort
        .records
        .iter()
        .filter_map(|r| {
            let s = *by_sample.get(r.sample_id.as_str())?;
            Some(TegressSample {
                sample_id: r.sample_id.clone(),
                coo: r.subtype.as_deref().and_then(CellOfOrigin::parse),
                time: r.time,
                event: r.event,
                score: s,
                quartile: None,
                split: None,
            })
        })
        .collect();
    info!("Samples with survival data: {}", samples.len());

    let scores: Vec<f64> = samples.iter().map(|s| s.score).collect();
    for ((s, q), b) in samples.iter_mut().zip(qcut(&scores, 4)).zip(equal_width_split(&scores)) {
        s.quartile = q;
        s.split = b;
    }

    let run = |name: &str, subset: &[&TegressSample]| {
        let t: Vec<f64> = subset.iter().map(|s| s.time).collect();
        let e: Vec<bool> = subset.iter().map(|s| s.event).collect();
        let sc: Vec<f64> = subset.iter().map(|s| s.score).collect();
        (quartile_survival(name, &t, &e, &sc), split_survival(name, &t, &e, &sc))
    };

    let mut out = TegressSurvival {
        quartiles: Vec::new(),
        splits: Vec::new(),
        skipped: Vec::new(),
        samples: Vec::new(),
    };
    let all: Vec<&TegressSample> = samples.iter().collect();
    let (q, b) = run("Overall", &all);
    out.quartiles.extend(q);
    out.splits.extend(b);
    for coo in CellOfOrigin::SUBTYPES {
        let subset: Vec<&TegressSample> = samples.iter().filter(|s| s.coo == Some(coo)).collect();
        if subset.len() < MIN_SCORE_COHORT {
            out.skipped.push((coo.to_string(), subset.len()));
            continue;
        }
        let (q, b) = run(&coo.to_string(), &subset);
        out.quartiles.extend(q);
        out.splits.extend(b);
    }
    out.samples = samples;
    out
}

impl TegressSurvival {
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let s = &self.samples;
        df![
            "sample_id" => s.iter().map(|x| x.sample_id.clone()).collect::<Vec<_>>(),
            "COO" => s.iter().map(|x| x.coo.map(|c| c.to_string())).collect::<Vec<_>>(),
            "OS_status" => s.iter().map(|x| x.event as i32).collect::<Vec<_>>(),
            "OS_time" => s.iter().map(|x| x.time).collect::<Vec<_>>(),
            "tEgress" => s.iter().map(|x| x.score).collect::<Vec<_>>(),
            "tEgress_quartile" => s.iter().map(|x| x.quartile.map(|k| QUARTILE_LABELS[k])).collect::<Vec<_>>(),
            "tEgress_group" => s.iter().map(|x| x.split.map(|k| SPLIT_LABELS[k])).collect::<Vec<_>>()
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mortality signature
// ─────────────────────────────────────────────────────────────────────────────

pub const MORTALITY_MIN_GROUP: usize = 5;
const MORTALITY_WARN_GROUP: usize = 10;

/// Dead against Alive expression, over the whole cohort and then inside each
/// stratum. Pooled-variance t-test; probes need five values per group.
pub fn mortality_signature(expr: &ExpressionMatrix, cohort: &SurvivalCohort, strata: &[SampleGroup]) -> Vec<DeResult> {
    let options = DeOptions {
        min_per_group: MORTALITY_MIN_GROUP,
        kind: TTestKind::Student,
    };
    let everyone = SampleGroup {
        name: "All".to_string(),
        samples: cohort.sample_ids(),
    };

    let mut results = Vec::new();
    for stratum in std::iter::once(&everyone).chain(strata) {
        let sub = cohort.restrict_to(&stratum.samples);
        let alive_recs: Vec<&SurvivalRecord> = sub.records.iter().filter(|r| !r.event).collect();
        let dead_recs: Vec<&SurvivalRecord> = sub.records.iter().filter(|r| r.event).collect();
        let alive = SampleGroup {
            name: "Alive".to_string(),
            samples: alive_recs.iter().map(|r| r.sample_id.clone()).collect(),
        };
        let dead = SampleGroup {
            name: "Dead".to_string(),
            samples: dead_recs.iter().map(|r| r.sample_id.clone()).collect(),
        };
        let n_alive = expr.sample_positions(&alive.samples).len();
        let n_dead = expr.sample_positions(&dead.samples).len();
        info!("{}: Alive n={}, Dead n={}", stratum.name, n_alive, n_dead);
        if let Some(m) = median(&alive_recs.iter().map(|r| r.time).collect::<Vec<_>>()) {
            info!("Median follow-up (alive): {:.1} years", m);
        }
        if let Some(m) = median(&dead_recs.iter().map(|r| r.time).collect::<Vec<_>>()) {
            info!("Median time to death: {:.1} years", m);
        }
        if n_alive < MORTALITY_WARN_GROUP || n_dead < MORTALITY_WARN_GROUP {
            warn!("{}: Insufficient samples", stratum.name);
            if n_alive < MORTALITY_MIN_GROUP || n_dead < MORTALITY_MIN_GROUP {
                continue;
            }
        }
        let mut r = differential_expression(expr, &alive, &dead, &options);
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

    /// Forty samples; risk rises with `driver`, `noise` is unrelated, `flat` is constant.
    fn cohort_and_expression() -> (SurvivalCohort, ExpressionMatrix) {
        let n = 40;
        let ids: Vec<String> = (0..n).map(|i| format!("S{i:02}")).collect();
        let mut records = Vec::new();
        let mut values = Array2::<f64>::zeros((3, n));
        for i in 0..n {
            let driver = (i as f64 - 19.5) / 10.0;
            values[[0, i]] = driver;
            values[[1, i]] = ((i * 7) % 11) as f64 / 5.0 - 1.0;
            values[[2, i]] = 1.0;
            // high driver: short time, mostly deaths
            records.push(SurvivalRecord {
                sample_id: ids[i].clone(),
                time: 10.0 - 0.2 * i as f64 + ((i * 3) % 5) as f64 * 0.1,
                event: i % 3 != 0 || i > 30,
                subtype: Some(if i % 4 < 2 { "EZB" } else { "MCD" }.to_string()),
                ipi: Some((i % 4) as f64),
            });
        }
        let expr = ExpressionMatrix::new(
            vec!["driver".into(), "noise".into(), "flat".into()],
            ids,
            values,
        )
        .unwrap();
        (SurvivalCohort { records }, expr)
    }

    #[test]
    fn screen_finds_driver_and_skips_flat() {
        let (cohort, expr) = cohort_and_expression();
        let opts = CoxScreenOptions::from_thresholds(&Thresholds::default(), true);
        let screen = cox_screen(&expr, &cohort, "Global", &opts);
        let genes: Vec<&str> = screen.rows.iter().map(|r| r.gene.as_str()).collect();
        assert!(!genes.contains(&"flat"));
        let driver = screen.rows.iter().find(|r| r.gene == "driver").unwrap();
        assert!(driver.hr > 1.0);
        assert!(driver.p_value < 0.01);
        assert!(driver.ipi_adjusted);
        assert_eq!(driver.n_samples, 40);
        assert_eq!(screen.non_converged, 0);
        assert_eq!(screen.sorted_by_p()[0].gene, "driver");
        assert_eq!(screen.top(true, 0.001, 30).len(), 1);

        let df = screens_frame(&screen.rows).unwrap();
        assert_eq!(df.width(), 10);
    }

    #[test]
    fn screen_skips_small_cohorts() {
        let (cohort, expr) = cohort_and_expression();
        let few = SurvivalCohort {
            records: cohort.records[..10].to_vec(),
        };
        let opts = CoxScreenOptions {
            min_events: 1,
            ..CoxScreenOptions::from_thresholds(&Thresholds::default(), false)
        };
        assert!(cox_screen(&expr, &few, "tiny", &opts).rows.is_empty());
    }

    #[test]
    fn stratified_screen_includes_subtypes() {
        let (cohort, expr) = cohort_and_expression();
        let screens = stratified_cox_screen(&expr, &cohort, &Thresholds::default());
        assert_eq!(screens[0].group, "Global");
        assert!(screens.iter().any(|s| s.group == "EZB"));
    }

    #[test]
    fn equal_width_split_uses_range_midpoint() {
        let split = equal_width_split(&[0.0, 1.0, 2.0, 10.0, f64::NAN]);
        assert_eq!(split, vec![Some(0), Some(0), Some(0), Some(1), None]);
    }

    #[test]
    fn quartiles_need_twenty_samples() {
        let t: Vec<f64> = (1..=19).map(f64::from).collect();
        let e = vec![true; 19];
        assert!(quartile_survival("small", &t, &e, &t).is_none());
    }

    #[test]
    fn quartile_groups_and_logrank() {
        let (cohort, _) = cohort_and_expression();
        let times = cohort.times();
        let events = cohort.events();
        let scores: Vec<f64> = (0..40).map(f64::from).collect();
        let g = quartile_survival("Overall", &times, &events, &scores).unwrap();
        assert_eq!(g.groups.len(), 4);
        assert!(g.groups.iter().all(|q| q.n == 10 && q.km.is_some()));
        assert_eq!(g.groups[0].label, "Q1 (Low)");
        assert_eq!(g.overall.unwrap().df, 3);
        assert!(g.extreme.unwrap().p_value < 0.05);
        assert_eq!(g.n, 40);
    }

    #[test]
    fn median_label_formats() {
        let none = SurvivalGroup { label: "Q2".into(), n: 3, events: 1, km: None };
        assert_eq!(none.median_label(), "NA");
        let never = SurvivalGroup {
            label: "Q1".into(),
            n: 5,
            events: 1,
            km: Some(kaplan_meier(&[1.0, 2.0, 3.0, 4.0, 5.0], &[true, false, false, false, false])),
        };
        assert_eq!(never.median_label(), "NR");
        let reached = SurvivalGroup {
            label: "Q4".into(),
            n: 4,
            events: 4,
            km: Some(kaplan_meier(&[1.0, 2.0, 3.0, 4.0], &[true; 4])),
        };
        assert_eq!(reached.median_label(), "2.0");
    }

    #[test]
    fn prognostic_signature_end_to_end() {
        let (cohort, expr) = cohort_and_expression();
        // the screen needs at least 50 complete cases
        let mut records = cohort.records.clone();
        let mut values = Array2::<f64>::zeros((3, 60));
        let mut ids = Vec::new();
        for k in 0..60 {
            let src = k % 40;
            let mut r = records[src].clone();
            r.sample_id = format!("X{k:02}");
            r.time += (k / 40) as f64 * 0.05;
            ids.push(r.sample_id.clone());
            records.push(r);
            for g in 0..3 {
                values[[g, k]] = expr.values[[g, src]];
            }
        }
        records.drain(..40);
        let cohort = SurvivalCohort { records };
        let expr = ExpressionMatrix::new(expr.feature_ids.clone(), ids, values).unwrap();

        let sig = build_prognostic_signature(&expr, &cohort, &Thresholds::default()).unwrap();
        assert_eq!(sig.genes.len(), 1);
        assert!(sig.genes[0].adverse);
        assert_eq!(sig.samples.len(), 60);
        // single adverse gene: the score is that gene's z-value
        assert_relative_eq!(sig.samples[0].score, expr.values[[0, 0]]);
        assert_eq!(sig.models.len(), 3);
        assert!(sig.models.iter().all(|m| m.fit.is_some()));
        let summary = sig.risk_summary();
        assert_eq!(summary.iter().map(|r| r.1).sum::<usize>(), 60);
        assert!(sig.low_vs_high.unwrap().p_value < 0.05);
        assert_eq!(sig.scores_frame().unwrap().height(), 60);
        assert_eq!(sig.genes_frame().unwrap().height(), 1);
    }

    #[test]
    fn mortality_contrast_skips_small_strata() {
        let (cohort, expr) = cohort_and_expression();
        let strata = vec![SampleGroup {
            name: "tiny".into(),
            samples: vec!["S00".into(), "S01".into()],
        }];
        let results = mortality_signature(&expr, &cohort, &strata);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, "All");
        assert_eq!(results[0].group2, "Dead");
        // driver is higher in the deaths; t is computed Alive - Dead
        let driver = results[0].rows.iter().find(|r| r.probe == "driver").unwrap();
        assert!(driver.mean2 > driver.mean1);
        assert!(driver.t_stat < 0.0);
        assert_eq!((results[0].n1, results[0].n2), (11, 29));
    }
}
