// File: reporting.rs
// Console tables and CSV output shared by the analysis commands.

use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::error;

use crate::analysis::differential_expression::DeResult;
use crate::analysis::mutation_association::{LofBurdenAnalysis, MutationStageResult};
use crate::analysis::survival_analysis::{CoxScreenRow, GroupedSurvival, PrognosticSignature};
use crate::data_handling::annotation::ProbeAnnotation;
use crate::helper_functions::dataframe_to_csv;
use crate::models::polars_err;
use crate::stats::cox::CoxCoefficient;

const FIVE_YEARS: f64 = 5.0;

/// `***` FDR < 0.05, `**` FDR < 0.1, `*` nominal p < 0.05.
pub fn significance_stars(fdr: f64, p: f64) -> &'static str {
    if fdr < 0.05 {
        "***"
    } else if fdr < 0.1 {
        "**"
    } else if p < 0.05 {
        "*"
    } else {
        ""
    }
}

/// Mutation tables: `***` FDR < 0.1, `**` p < 0.01, `*` p < 0.05.
pub fn mutation_stars(fdr: f64, p: f64) -> &'static str {
    if fdr < 0.1 {
        "***"
    } else if p < 0.01 {
        "**"
    } else if p < 0.05 {
        "*"
    } else {
        ""
    }
}

pub fn p_stars(p: f64) -> &'static str {
    if p < 0.001 {
        "***"
    } else if p < 0.01 {
        "**"
    } else if p < 0.05 {
        "*"
    } else {
        ""
    }
}

pub fn p_interpretation(p: f64) -> &'static str {
    if p < 0.001 {
        "*** Highly significant"
    } else if p < 0.01 {
        "** Very significant"
    } else if p < 0.05 {
        "* Significant"
    } else if p < 0.1 {
        "Trend"
    } else {
        "Not significant"
    }
}

pub fn banner(title: &str) {
    println!("\n{}", "=".repeat(70));
    println!("{title}");
    println!("{}", "=".repeat(70));
}

/// Create `dir` if needed and write `<dir>/<name>`.
pub fn write_frame(df: &mut DataFrame, dir: &Path, name: &str) -> PolarsResult<PathBuf> {
    create_dir_all(dir).map_err(|e| {
        error!("Failed to create output directory {}: {}", dir.display(), e);
        polars_err(Box::new(e))
    })?;
    let path = dir.join(name);
    dataframe_to_csv(df, &path)?;
    Ok(path)
}

// ─────────────────────────────────────────────────────────────────────────────
// Differential expression
// ─────────────────────────────────────────────────────────────────────────────

pub fn print_de_summaries(results: &[DeResult]) {
    println!(
        "\n{:<10} {:>8} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "Subset", "n1", "n2", "FDR<0.05", "FDR<0.1", "p<0.01", "p<0.05", "Max|FC|"
    );
    println!("{}", "-".repeat(84));
    for r in results {
        let s = r.summary();
        println!(
            "{:<10} {:>8} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10.3}",
            r.label, r.n1, r.n2, s.fdr_05, s.fdr_10, s.p_01, s.p_05, s.max_abs_log2fc
        );
    }
}

/// Top `n` probes of one comparison with gene symbols when available.
pub fn print_top_de(result: &DeResult, annotation: Option<&ProbeAnnotation>, n: usize) {
    println!("\n{}: {} (n={}) vs {} (n={})", result.label, result.group1, result.n1, result.group2, result.n2);
    println!(
        "{:<16} {:<12} {:>9} {:>9} {:>11} {:>11} {:<4} {}",
        "Probe", "Gene", "Log2FC", "d", "P_value", "FDR", "", "Direction"
    );
    for row in result.rows.iter().take(n) {
        let gene = annotation.and_then(|a| a.gene(&row.probe)).unwrap_or("-");
        println!(
            "{:<16} {:<12} {:>9.3} {:>9.3} {:>11.2e} {:>11.2e} {:<4} {}",
            row.probe,
            gene,
            row.log2fc,
            row.cohens_d,
            row.p_value,
            row.fdr,
            significance_stars(row.fdr, row.p_value),
            row.direction
        );
    }
}

/// How the listed pathway genes behave in one comparison.
pub fn print_pathway_check(result: &DeResult, annotation: &ProbeAnnotation, genes: &[String]) {
    println!("\nPathway genes ({}):", result.label);
    for gene in genes {
        let hits: Vec<_> = result
            .rows
            .iter()
            .filter(|r| annotation.gene(&r.probe) == Some(gene.as_str()))
            .collect();
        match hits.first() {
            Some(r) => println!(
                "  {:<8} log2FC={:>7.3} p={:.2e} FDR={:.3} {}",
                gene,
                r.log2fc,
                r.p_value,
                r.fdr,
                significance_stars(r.fdr, r.p_value)
            ),
            None => println!("  {:<8} not tested", gene),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mutations
// ─────────────────────────────────────────────────────────────────────────────

pub fn print_mutation_table(result: &MutationStageResult, n: usize) {
    println!(
        "\n{:<12} {:>14} {:>14} {:>8} {:>10} {:>8} {:<4} {}",
        "Gene", "Limited", "Advanced", "OR", "P", "FDR", "", "Direction"
    );
    println!("{}", "-".repeat(84));
    for r in result.rows.iter().take(n) {
        println!(
            "{:<12} {:>5} ({:>5.1}%) {:>5} ({:>5.1}%) {:>8.3} {:>10.4} {:>8.3} {:<4} {}",
            r.gene,
            r.limited_n,
            r.limited_pct,
            r.advanced_n,
            r.advanced_pct,
            r.odds_ratio,
            r.p_value,
            r.fdr,
            mutation_stars(r.fdr, r.p_value),
            r.direction.label()
        );
    }
}

pub fn print_lof_burden(analysis: &LofBurdenAnalysis) {
    println!("\n{:<10} {:>6} {:>9} {:>9} {:>10}", "LoF score", "N", "Advanced", "Limited", "% Adv");
    for c in &analysis.categories {
        println!(
            "{:<10} {:>6} {:>9} {:>9} {:>9.1}%",
            c.category,
            c.n,
            c.advanced,
            c.limited,
            100.0 * c.rate
        );
    }
    if let (Some(rho), Some(p)) = (analysis.spearman_rho, analysis.spearman_p) {
        println!("\nSpearman (LoF score vs advanced stage): rho={:.3}, p={:.4}", rho, p);
    }
    for (label, cmp) in [("Any LoF vs none", &analysis.any_lof), ("LoF 2+ vs 0-1", &analysis.high_lof)] {
        println!(
            "{}: table={:?}, OR={:.2}, p={:.4} {}",
            label,
            cmp.table,
            cmp.fisher.odds_ratio,
            cmp.fisher.p_value,
            p_stars(cmp.fisher.p_value)
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Survival
// ─────────────────────────────────────────────────────────────────────────────

pub fn print_cox_rows(title: &str, rows: &[&CoxScreenRow]) {
    println!("\n   {title}");
    println!("   {:<15} {:>8} {:>18} {:>10} {:>10}", "Gene", "HR", "95% CI", "p-value", "q-value");
    println!("   {}", "-".repeat(65));
    for r in rows {
        let ci = format!("({:.2}-{:.2})", r.hr_lower, r.hr_upper);
        println!("   {:<15} {:>8.2} {:>18} {:>10.2e} {:>10.4}", r.gene, r.hr, ci, r.p_value, r.q_value);
    }
}

pub fn print_coefficient(c: &CoxCoefficient) {
    println!(
        "      {}: HR={:.2} ({:.2}-{:.2}), p={:.4} {}",
        c.name,
        c.hazard_ratio,
        c.hr_lower,
        c.hr_upper,
        c.p_value,
        p_stars(c.p_value)
    );
}

pub fn print_grouped_survival(g: &GroupedSurvival) {
    println!("\n{}", "-".repeat(60));
    println!("SURVIVAL ANALYSIS: {} (n={}, events={})", g.name, g.n, g.events);
    println!("{}", "-".repeat(60));
    for grp in &g.groups {
        let five_year = grp
            .km
            .as_ref()
            .map_or("NA".to_string(), |km| format!("{:.1}%", 100.0 * km.survival_at(FIVE_YEARS)));
        println!(
            "  {:<10} n={:<5} events={:<5} median OS={:<6} 5y OS={}",
            grp.label,
            grp.n,
            grp.events,
            grp.median_label(),
            five_year
        );
    }
    if let Some(lr) = g.extreme {
        let (first, last) = match (g.groups.first(), g.groups.last()) {
            (Some(a), Some(b)) => (a.label.as_str(), b.label.as_str()),
            _ => ("first", "last"),
        };
        println!("Log-rank test ({} vs {}): p = {:.4}", first, last, lr.p_value);
    }
    if g.groups.len() > 2 {
        if let Some(lr) = g.overall {
            println!("Log-rank test (all groups): p = {:.4}", lr.p_value);
        }
    }
}

/// One line per cohort: n, events, extreme-group p and its reading.
pub fn print_survival_summary(groups: &[GroupedSurvival]) {
    println!("\n{:<12} {:>8} {:>8} {:>12} {:<30}", "Cohort", "N", "Events", "Q1vsQ4 p", "Interpretation");
    println!("{}", "-".repeat(70));
    for g in groups {
        match g.extreme {
            Some(lr) => println!(
                "{:<12} {:>8} {:>8} {:>12.4} {:<30}",
                g.name,
                g.n,
                g.events,
                lr.p_value,
                p_interpretation(lr.p_value)
            ),
            None => println!("{:<12} {:>8} {:>8} {:>12} {:<30}", g.name, g.n, g.events, "NA", "Insufficient data"),
        }
    }
}

pub fn print_signature(sig: &PrognosticSignature) {
    let adverse: Vec<_> = sig.genes.iter().filter(|g| g.adverse).collect();
    let favorable: Vec<_> = sig.genes.iter().filter(|g| !g.adverse).collect();
    println!("\nSignature composition:");
    println!("  - {} adverse prognosis genes", adverse.len());
    println!("  - {} favorable prognosis genes", favorable.len());
    println!("\nKey genes (top 5 adverse):");
    for g in adverse.iter().take(5) {
        println!("  {}: HR={:.2}", g.gene, g.hr);
    }
    println!("\nKey genes (top 5 favorable):");
    for g in favorable.iter().take(5) {
        println!("  {}: HR={:.2}", g.gene, g.hr);
    }

    for model in &sig.models {
        println!("\n   Model: {}", model.label);
        match &model.fit {
            Some(fit) => fit.coefficients.iter().for_each(print_coefficient),
            None => println!("      model failed"),
        }
    }

    println!("\n   Risk group distribution:");
    for (label, n, deaths) in sig.risk_summary() {
        let pct = if n > 0 { 100.0 * deaths as f64 / n as f64 } else { 0.0 };
        println!("      {}: n={}, deaths={} ({:.1}%)", label, n, deaths, pct);
    }
    if let Some(lr) = sig.low_vs_high {
        println!("\n   Log-rank test (Low vs High): p = {:.2e}", lr.p_value);
    }

    println!("\n   Subtype-specific signature performance:");
    for s in &sig.subtypes {
        match &s.coefficient {
            Some(c) => println!(
                "   {}: n={}, HR={:.2}, p={:.4} {}",
                s.subtype,
                s.n,
                c.hazard_ratio,
                c.p_value,
                if c.p_value < 0.05 { "*" } else { "" }
            ),
            None => println!("   {}: n={}, {}", s.subtype, s.n, s.note),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn star_thresholds() {
        assert_eq!(significance_stars(0.01, 0.001), "***");
        assert_eq!(significance_stars(0.08, 0.001), "**");
        assert_eq!(significance_stars(0.5, 0.04), "*");
        assert_eq!(significance_stars(0.5, 0.2), "");
        assert_eq!(significance_stars(f64::NAN, f64::NAN), "");

        assert_eq!(mutation_stars(0.09, 0.001), "***");
        assert_eq!(mutation_stars(0.2, 0.005), "**");
        assert_eq!(mutation_stars(0.2, 0.03), "*");

        assert_eq!(p_stars(0.0005), "***");
        assert_eq!(p_interpretation(0.07), "Trend");
        assert_eq!(p_interpretation(0.5), "Not significant");
    }

    #[test]
    fn write_frame_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/results");
        let mut df = df!["Gene" => &["EZH2"], "P_value" => &[0.01]].unwrap();
        let path = write_frame(&mut df, &out, "table.csv").unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("Gene,P_value"));
        assert!(text.contains("EZH2"));
    }
}
