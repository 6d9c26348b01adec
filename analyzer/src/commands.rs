// src/commands.rs
// -----------------------------------------------------------------------------
// One runner per CLI subcommand: load inputs, run the analysis, print the
// tables and write CSV/PNG outputs under the output directory.
// -----------------------------------------------------------------------------

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use polars::prelude::*;
use tracing::{info, warn};

use crate::analysis::differential_expression::{stratified_differential_expression, DeOptions, DeResult};
use crate::analysis::mutation_association::{lof_burden_vs_stage, mutation_stage_association};
use crate::analysis::plots::{km_plot, odds_ratio_plot, volcano_plot};
use crate::analysis::reporting::{
    banner, print_cox_rows, print_de_summaries, print_grouped_survival, print_lof_burden, print_mutation_table,
    print_pathway_check, print_signature, print_survival_summary, print_top_de, write_frame,
};
use crate::analysis::signature::tegress_score;
use crate::analysis::survival_analysis::{
    build_prognostic_signature, mortality_signature, screens_frame, stratified_cox_screen, tegress_survival,
    GroupedSurvival,
};
use crate::config::AnalysisConfig;
use crate::data_handling::annotation::ProbeAnnotation;
use crate::data_handling::cbioportal::{mutations_frame, pivot_clinical, CbioPortalClient, DEFAULT_BASE_URL};
use crate::data_handling::clinical::{
    coo_groups, find_stage_column, ClinicalTable, StageContrast, StageGroup, SurvivalCohort,
};
use crate::data_handling::expression::ExpressionMatrix;
use crate::data_handling::mutations::{
    binary_gene_columns, class_counts, classified_frame, classify_mutations, gof_samples, lof_burden,
    maf_to_binary_matrix, mutation_records, read_binary_matrix, LofBurden, Pathway,
};
use crate::data_handling::series_matrix::SeriesMatrix;
use crate::helper_functions::{column_as_string, read_csv, read_tsv, resolve_path};
use crate::models::{Dataset, SampleGroup};
use crate::stats::multiple_testing::n_significant;

const TOP_ROWS: usize = 20;
const COO_KEY: &str = "pred_combine";

pub struct RunContext {
    pub config: AnalysisConfig,
    pub out: PathBuf,
}

/// File-name friendly form of a group label.
fn slug(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

// ─────────────────────────────────────────────────────────────────────────────
// de-stage
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct DeStageArgs {
    /// GEO series matrix (.txt or .txt.gz)
    #[arg(long)]
    pub series_matrix: PathBuf,

    /// Probe to gene symbol CSV
    #[arg(long)]
    pub annotation: PathBuf,

    /// Characteristic holding the Ann Arbor stage
    #[arg(long, default_value = "stage")]
    pub stage_key: String,
}

/// Stage I and Stage III/IV sample groups; Stage II and unknown stages are left out.
pub fn stage_contrast_groups(sample_ids: &[String], stages: &[Option<String>]) -> (SampleGroup, SampleGroup) {
    let mut limited = SampleGroup {
        name: StageContrast::StageI.label().to_string(),
        samples: Vec::new(),
    };
    let mut advanced = SampleGroup {
        name: StageContrast::StageIIIIV.label().to_string(),
        samples: Vec::new(),
    };
    for (id, stage) in sample_ids.iter().zip(stages) {
        match stage.as_deref().and_then(StageContrast::extreme) {
            Some(StageContrast::StageI) => limited.samples.push(id.clone()),
            Some(StageContrast::StageIIIIV) => advanced.samples.push(id.clone()),
            None => {}
        }
    }
    (limited, advanced)
}

fn write_de_results(ctx: &RunContext, results: &[DeResult], prefix: &str, annotation: Option<&ProbeAnnotation>) -> Result<()> {
    for r in results {
        let mut df = r.to_frame(annotation)?;
        write_frame(&mut df, &ctx.out, &format!("{prefix}_{}.csv", slug(&r.label)))?;
    }
    Ok(())
}

pub fn de_stage(ctx: &RunContext, args: &DeStageArgs) -> Result<()> {
    banner("DIFFERENTIAL EXPRESSION: STAGE I vs STAGE III/IV");
    let matrix = SeriesMatrix::from_path(&resolve_path(&args.series_matrix))?;
    let annotation = ProbeAnnotation::from_path(&resolve_path(&args.annotation))?;
    let expr = ExpressionMatrix::from_series_matrix(&matrix)?;

    let stages = matrix.characteristic(&args.stage_key);
    if stages.iter().all(Option::is_none) {
        bail!("no '{}' characteristic in {}", args.stage_key, args.series_matrix.display());
    }
    let keys: Vec<&str> = matrix.keys().iter().map(String::as_str).collect();
    write_frame(&mut matrix.clinical_frame(&keys)?, &ctx.out, "sample_characteristics.csv")?;
    let (stage_i, stage_adv) = stage_contrast_groups(&matrix.sample_ids, &stages);
    info!("{}: n={}, {}: n={}", stage_i.name, stage_i.samples.len(), stage_adv.name, stage_adv.samples.len());

    let strata = coo_groups(&matrix.sample_ids, &matrix.characteristic(COO_KEY));
    let thresholds = &ctx.config.thresholds;
    let options = DeOptions {
        min_per_group: thresholds.min_group_size,
        ..DeOptions::default()
    };
    let results = stratified_differential_expression(&expr, &stage_i, &stage_adv, &strata, &options);

    print_de_summaries(&results);
    for r in &results {
        print_top_de(r, Some(&annotation), TOP_ROWS);
        print_pathway_check(r, &annotation, &ctx.config.pathways.highlight);
        let plot = ctx.out.join(format!("volcano_stageI_vs_III_IV_{}.png", slug(&r.label)));
        volcano_plot(r, Some(&annotation), &ctx.config.pathways.highlight, thresholds.fdr_threshold, &plot)?;
    }
    write_de_results(ctx, &results, "de_stageI_vs_III_IV", Some(&annotation))
}

// ─────────────────────────────────────────────────────────────────────────────
// mortality
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct MortalityArgs {
    /// GEO series matrix with os_status / os_followup_y characteristics
    #[arg(long)]
    pub series_matrix: PathBuf,

    /// Probe to gene symbol CSV
    #[arg(long)]
    pub annotation: Option<PathBuf>,
}

pub fn mortality(ctx: &RunContext, args: &MortalityArgs) -> Result<()> {
    banner("MORTALITY SIGNATURE: DEAD vs ALIVE");
    let matrix = SeriesMatrix::from_path(&resolve_path(&args.series_matrix))?;
    let annotation = match &args.annotation {
        Some(p) => Some(ProbeAnnotation::from_path(&resolve_path(p))?),
        None => None,
    };
    let expr = ExpressionMatrix::from_series_matrix(&matrix)?;
    let cohort = SurvivalCohort::from_series_matrix(&matrix);
    if cohort.is_empty() {
        bail!("no samples with overall-survival data");
    }
    let strata = coo_groups(&matrix.sample_ids, &matrix.characteristic(COO_KEY));

    let results = mortality_signature(&expr, &cohort, &strata);
    print_de_summaries(&results);
    for r in &results {
        print_top_de(r, annotation.as_ref(), TOP_ROWS);
    }
    write_de_results(ctx, &results, "mortality_dead_vs_alive", annotation.as_ref())
}

// ─────────────────────────────────────────────────────────────────────────────
// mutations-by-stage
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct MutationStageArgs {
    /// Patient x gene 0/1 CSV, or a MAF-style table with --maf
    #[arg(long)]
    pub mutations: PathBuf,

    /// Read --mutations as one row per mutation
    #[arg(long)]
    pub maf: bool,

    /// Sample column of the MAF table
    #[arg(long, default_value = "Tumor_Sample_Barcode")]
    pub sample_col: String,

    /// Gene column of the MAF table
    #[arg(long, default_value = "Hugo_Symbol")]
    pub gene_col: String,

    /// Patient id column of the 0/1 matrix
    #[arg(long, default_value = "PATIENT_ID")]
    pub id_col: String,

    /// Clinical CSV or workbook
    #[arg(long)]
    pub clinical: PathBuf,

    /// Worksheet to read when --clinical is a workbook
    #[arg(long)]
    pub sheet: Option<String>,

    /// Patient id column of the clinical table
    #[arg(long, default_value = "PATIENT_ID")]
    pub clinical_id_col: String,

    /// Stage column; detected from the header when omitted
    #[arg(long)]
    pub stage_col: Option<String>,

    /// The stage column is the IPI stage flag (0 = I/II, 1 = III/IV)
    #[arg(long)]
    pub ipi_flag: bool,

    /// cBioPortal-style mutation CSV for the LoF burden comparison
    #[arg(long)]
    pub classified: Option<PathBuf>,
}

/// Patient id → stage group, skipping rows without an id or a usable stage.
pub fn stage_map(df: &DataFrame, id_col: &str, stage_col: &str, ipi_flag: bool) -> PolarsResult<HashMap<String, StageGroup>> {
    let ids = column_as_string(df, id_col)?;
    let stages = column_as_string(df, stage_col)?;
    let parse: fn(&str) -> Option<StageGroup> = if ipi_flag { StageGroup::from_ipi_flag } else { StageGroup::classify };
    Ok(ids
        .into_iter()
        .zip(stages)
        .filter_map(|(id, stage)| Some((id?, parse(stage.as_deref()?)?)))
        .collect())
}

pub fn mutations_by_stage(ctx: &RunContext, args: &MutationStageArgs) -> Result<()> {
    banner("MUTATION FREQUENCY: LIMITED vs ADVANCED STAGE");
    let clinical = ClinicalTable {
        path: resolve_path(&args.clinical),
        sheet: args.sheet.clone(),
    }
    .load()?;
    let stage_col = match &args.stage_col {
        Some(c) => c.clone(),
        None => find_stage_column(&clinical).context("no stage column found in the clinical table")?,
    };
    info!("Stage column: {}", stage_col);
    let stages = stage_map(&clinical, &args.clinical_id_col, &stage_col, args.ipi_flag)?;

    let mutations_path = resolve_path(&args.mutations);
    let (matrix, id_col) = if args.maf {
        let long = match mutations_path.extension().and_then(|e| e.to_str()) {
            Some("csv") => read_csv(&mutations_path)?,
            _ => read_tsv(&mutations_path)?,
        };
        (maf_to_binary_matrix(&long, &args.sample_col, &args.gene_col)?, args.sample_col.as_str())
    } else {
        (read_binary_matrix(&mutations_path, &args.id_col)?, args.id_col.as_str())
    };
    let genes = binary_gene_columns(&matrix, &[id_col])?;
    info!("Testing up to {} genes", genes.len());

    let thresholds = &ctx.config.thresholds;
    let result = mutation_stage_association(&matrix, id_col, &stages, &genes, thresholds.min_mutated)?;
    print_mutation_table(&result, TOP_ROWS);
    let nominal = result.rows.iter().filter(|r| r.p_value < thresholds.nominal_p).count();
    println!("\nGenes tested: {}, nominal p < {}: {}", result.rows.len(), thresholds.nominal_p, nominal);
    write_frame(&mut result.to_frame()?, &ctx.out, "mutations_by_stage.csv")?;
    odds_ratio_plot(&result, thresholds.nominal_p, &ctx.out.join("mutations_by_stage_odds_ratios.png"))?;

    if let Some(path) = &args.classified {
        let classified = classify_mutations(&mutation_records(&read_csv(&resolve_path(path))?)?, &ctx.config.pathways);
        let burden = lof_burden_vs_stage(&lof_burden(&classified), &stages);
        banner("RETENTION LoF BURDEN vs STAGE");
        print_lof_burden(&burden);
        write_frame(&mut burden.categories_frame()?, &ctx.out, "lof_burden_by_stage.csv")?;
        write_frame(&mut burden.samples_frame()?, &ctx.out, "lof_burden_samples.csv")?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// classify-mutations
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// cBioPortal-style mutation CSV (sampleId, hugoGeneSymbol, mutationType, ...)
    #[arg(long)]
    pub mutations: PathBuf,
}

fn burden_frame(burden: &[LofBurden]) -> PolarsResult<DataFrame> {
    df![
        "sampleId" => burden.iter().map(|b| b.sample_id.clone()).collect::<Vec<_>>(),
        "lof_count" => burden.iter().map(|b| b.lof_count as u32).collect::<Vec<_>>(),
        "n_genes" => burden.iter().map(|b| b.n_genes() as u32).collect::<Vec<_>>(),
        "genes" => burden.iter().map(|b| b.genes.iter().cloned().collect::<Vec<_>>().join(";")).collect::<Vec<_>>()
    ]
}

pub fn classify(ctx: &RunContext, args: &ClassifyArgs) -> Result<()> {
    banner("FUNCTIONAL CLASSIFICATION OF PATHWAY MUTATIONS");
    let records = mutation_records(&read_csv(&resolve_path(&args.mutations))?)?;
    let classified = classify_mutations(&records, &ctx.config.pathways);
    info!("{} of {} mutations fall in pathway genes", classified.len(), records.len());

    for pathway in [Pathway::Retention, Pathway::Egress] {
        println!("\n{} pathway:", pathway.label());
        for (class, n) in class_counts(&classified, pathway) {
            println!("  {:<16} {:>6}", class.label(), n);
        }
    }
    let burden = lof_burden(&classified);
    let gof = gof_samples(&classified);
    println!("\nSamples with confident retention LoF: {}", burden.len());
    println!("Samples with confident egress GoF: {}", gof.len());

    write_frame(&mut classified_frame(&classified)?, &ctx.out, "classified_mutations.csv")?;
    write_frame(&mut burden_frame(&burden)?, &ctx.out, "lof_burden.csv")?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// fetch-cbioportal
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Study ids, e.g. dlbcl_duke_2017
    #[arg(long, num_args = 1.., required_unless_present = "list_studies")]
    pub studies: Vec<String>,

    /// Genes to fetch; defaults to the mutated pathway genes of the configuration
    #[arg(long, num_args = 1..)]
    pub genes: Vec<String>,

    /// Print the DLBCL studies known to the portal and exit
    #[arg(long)]
    pub list_studies: bool,

    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,
}

pub fn fetch_cbioportal(ctx: &RunContext, args: &FetchArgs) -> Result<()> {
    let client = CbioPortalClient::new(&args.base_url)?;
    if args.list_studies {
        for study in client.studies()?.iter().filter(|s| s.study_id.contains("dlbc")) {
            println!("{:<32} {}", study.study_id, study.name);
        }
        return Ok(());
    }

    let genes: Vec<String> = if args.genes.is_empty() {
        let p = &ctx.config.pathways;
        p.retention_mutated.iter().chain(&p.egress_mutated).cloned().collect()
    } else {
        args.genes.clone()
    };

    for study in &args.studies {
        let data = match client.fetch_study(study, &genes) {
            Ok(d) => d,
            Err(e) => {
                warn!("{}: fetch failed: {:#}", study, e);
                continue;
            }
        };
        write_frame(&mut mutations_frame(&data)?, &ctx.out, &format!("{study}_mutations.csv"))?;
        write_frame(&mut pivot_clinical(&data.clinical)?, &ctx.out, &format!("{study}_clinical.csv"))?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// gene-survival / prognostic-signature
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct GeneSurvivalArgs {
    /// Tab-separated gene x sample expression table
    #[arg(long)]
    pub expression: PathBuf,

    /// Clinical CSV with Sample_ID, OS_time_years, OS_status, IPI Group, LymphGen_Subtype
    #[arg(long)]
    pub clinical: PathBuf,

    #[arg(long, default_value = "Gene")]
    pub gene_col: String,
}

pub type SignatureArgs = GeneSurvivalArgs;

/// Expression z-scored over the samples that also have survival data, and
/// that cohort in the same sample order.
fn survival_inputs(ctx: &RunContext, args: &GeneSurvivalArgs) -> Result<(ExpressionMatrix, SurvivalCohort)> {
    let expr = ExpressionMatrix::from_gene_table(&resolve_path(&args.expression), &args.gene_col)?;
    let clinical = read_csv(&resolve_path(&args.clinical))?;
    let cohort = SurvivalCohort::from_clinical_frame(&clinical, &ctx.config)?;
    let cohort = cohort.filter(|r| expr.sample_position(&r.sample_id).is_some());
    if cohort.is_empty() {
        bail!("no overlap between expression samples and clinical Sample_ID");
    }
    info!("Survival cohort: n={}, events={}", cohort.len(), cohort.n_events());
    let expr_z = expr.subset_samples(&cohort.sample_ids()).zscore_rows();
    Ok((expr_z, cohort))
}

pub fn gene_survival(ctx: &RunContext, args: &GeneSurvivalArgs) -> Result<()> {
    banner("GENE EXPRESSION vs OVERALL SURVIVAL (IPI-ADJUSTED COX)");
    let (expr_z, cohort) = survival_inputs(ctx, args)?;
    let cohort = cohort.filter(|r| r.ipi.is_some());
    info!("With IPI: n={}", cohort.len());
    let expr_z = expr_z.subset_samples(&cohort.sample_ids());

    let thresholds = &ctx.config.thresholds;
    let screens = stratified_cox_screen(&expr_z, &cohort, thresholds);
    for screen in &screens {
        let q: Vec<f64> = screen.rows.iter().map(|r| r.q_value).collect();
        println!(
            "\n{} ({} genes tested, {} at q < {})",
            screen.group,
            screen.rows.len(),
            n_significant(&q, thresholds.strict_fdr),
            thresholds.strict_fdr
        );
        print_cox_rows("Adverse (HR > 1):", &screen.top(true, thresholds.nominal_p, 10));
        print_cox_rows("Favorable (HR < 1):", &screen.top(false, thresholds.nominal_p, 10));
    }

    let mut all = screens_frame(screens.iter().flat_map(|s| &s.rows))?;
    write_frame(&mut all, &ctx.out, "gene_survival_cox_results.csv")?;
    if let Some(global) = screens.first() {
        let independent = global.significant(thresholds.strict_fdr);
        println!("\nIPI-independent genes (global, q < {}): {}", thresholds.strict_fdr, independent.len());
        write_frame(&mut screens_frame(independent)?, &ctx.out, "global_ipi_independent_genes.csv")?;
    }
    Ok(())
}

pub fn prognostic_signature(ctx: &RunContext, args: &SignatureArgs) -> Result<()> {
    banner("MULTI-GENE PROGNOSTIC SIGNATURE");
    let (expr_z, cohort) = survival_inputs(ctx, args)?;
    let signature = build_prognostic_signature(&expr_z, &cohort, &ctx.config.thresholds)?;
    print_signature(&signature);

    write_frame(&mut signature.genes_frame()?, &ctx.out, "prognostic_signature_genes.csv")?;
    write_frame(&mut signature.scores_frame()?, &ctx.out, "patient_prognostic_scores.csv")?;
    km_plot(
        &signature.risk_curves(),
        "Prognostic signature risk groups",
        signature.low_vs_high.map(|lr| lr.p_value),
        &ctx.out.join("prognostic_signature_km_plot.png"),
    )?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// tegress
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct TegressArgs {
    /// GEO series matrix with survival and COO characteristics
    #[arg(long)]
    pub series_matrix: PathBuf,

    /// Probe to gene symbol CSV
    #[arg(long)]
    pub annotation: PathBuf,
}

fn plot_grouped(g: &GroupedSurvival, stem: &str, dir: &Path) -> Result<()> {
    let curves: Vec<_> = g
        .groups
        .iter()
        .filter_map(|grp| Some((format!("{} (n={})", grp.label, grp.n), grp.km.clone()?)))
        .collect();
    if curves.is_empty() {
        return Ok(());
    }
    let title = format!("tEgress: {} (n={})", g.name, g.n);
    let path = dir.join(format!("{stem}_{}.png", slug(&g.name)));
    km_plot(&curves, &title, g.extreme.map(|lr| lr.p_value), &path)?;
    Ok(())
}

pub fn tegress(ctx: &RunContext, args: &TegressArgs) -> Result<()> {
    banner("tEgress SCORE AND SURVIVAL");
    let matrix = SeriesMatrix::from_path(&resolve_path(&args.series_matrix))?;
    let annotation = ProbeAnnotation::from_path(&resolve_path(&args.annotation))?;
    let expr = ExpressionMatrix::from_series_matrix(&matrix)?;

    let score = tegress_score(&expr, &annotation, &ctx.config.pathways)?;
    info!("Retention genes: {:?}", score.retention_genes);
    info!("Egress genes: {:?}", score.egress_genes);
    write_frame(&mut score.to_frame()?, &ctx.out, "tegress_scores.csv")?;

    let cohort = SurvivalCohort::from_series_matrix(&matrix);
    let survival = tegress_survival(&score, &cohort);
    for (subtype, n) in &survival.skipped {
        warn!("{}: only {} samples, skipped", subtype, n);
    }
    for g in survival.quartiles.iter().chain(&survival.splits) {
        print_grouped_survival(g);
    }
    print_survival_summary(&survival.quartiles);

    for g in &survival.quartiles {
        plot_grouped(g, "tegress_km_quartiles", &ctx.out)?;
    }
    for g in &survival.splits {
        plot_grouped(g, "tegress_km_high_low", &ctx.out)?;
    }
    write_frame(&mut survival.to_frame()?, &ctx.out, "tegress_survival.csv")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn slug_lowercases_and_collapses_separators() {
        assert_eq!(slug("All"), "all");
        assert_eq!(slug("Q1 (Low)"), "q1_low");
        assert_eq!(slug("GCB"), "gcb");
    }

    #[test]
    fn stage_contrast_skips_stage_two_and_unknown() {
        let samples = ids(&["s1", "s2", "s3", "s4", "s5"]);
        let stages = vec![
            Some("I".to_string()),
            Some("II".to_string()),
            Some("IV".to_string()),
            None,
            Some("III".to_string()),
        ];
        let (lim, adv) = stage_contrast_groups(&samples, &stages);
        assert_eq!(lim.name, "Stage_I");
        assert_eq!(lim.samples, ids(&["s1"]));
        assert_eq!(adv.samples, ids(&["s3", "s5"]));
    }

    #[test]
    fn stage_map_reads_ann_arbor_or_ipi_flag() {
        let df = df![
            "PATIENT_ID" => &["p1", "p2", "p3", "p4"],
            "STAGE" => &["Stage IIA", "IV", "unknown", "I"],
            "IPI_ANNARBOR_STAGE" => &["0", "1", "1", "NA"]
        ]
        .unwrap();
        let ann = stage_map(&df, "PATIENT_ID", "STAGE", false).unwrap();
        assert_eq!(ann.len(), 3);
        assert_eq!(ann["p1"], StageGroup::Limited);
        assert_eq!(ann["p2"], StageGroup::Advanced);
        assert!(!ann.contains_key("p3"));

        let flag = stage_map(&df, "PATIENT_ID", "IPI_ANNARBOR_STAGE", true).unwrap();
        assert_eq!(flag.len(), 3);
        assert_eq!(flag["p3"], StageGroup::Advanced);
        assert!(!flag.contains_key("p4"));
    }

    #[test]
    fn burden_frame_joins_genes() {
        let burden = vec![LofBurden {
            sample_id: "s1".into(),
            lof_count: 3,
            genes: ["GNA13", "S1PR2"].iter().map(|g| g.to_string()).collect(),
        }];
        let df = burden_frame(&burden).unwrap();
        assert_eq!(df.height(), 1);
        let genes = column_as_string(&df, "genes").unwrap();
        assert_eq!(genes[0].as_deref(), Some("GNA13;S1PR2"));
    }

    #[test]
    fn classify_writes_tables() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("mutations.csv");
        std::fs::write(
            &input,
            "sampleId,hugoGeneSymbol,mutationType,proteinChange,proteinPosStart\n\
             s1,GNA13,Nonsense_Mutation,Q27*,27\n\
             s1,RHOA,Missense_Mutation,R5Q,5\n\
             s2,CXCR4,Nonsense_Mutation,S338*,338\n\
             s3,MYC,Missense_Mutation,T58A,58\n",
        )
        .unwrap();
        let ctx = RunContext {
            config: AnalysisConfig::default(),
            out: dir.path().join("out"),
        };
        classify(&ctx, &ClassifyArgs { mutations: input }).unwrap();
        let classified = read_csv(&ctx.out.join("classified_mutations.csv")).unwrap();
        assert_eq!(classified.height(), 3);
        let burden = read_csv(&ctx.out.join("lof_burden.csv")).unwrap();
        assert_eq!(burden.height(), 1);
    }
}
