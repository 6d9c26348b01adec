// src/data_handling/mutations.rs
// -----------------------------------------------------------------------------
// Mutation inputs: patient x gene 0/1 matrices, MAF-style long tables, and
// functional classification of pathway mutations from cBioPortal rows.
// -----------------------------------------------------------------------------

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

use polars::prelude::*;
use tracing::{debug, info};

use crate::config::PathwayGenes;
use crate::helper_functions::{column_as_f64, column_as_string, read_csv};
use crate::models::polars_err;

// ─────────────────────────────────────────────────────────────────────────────
// Binary matrices
// ─────────────────────────────────────────────────────────────────────────────

/// Patient x gene 0/1 table; `id_col` must be present.
pub fn read_binary_matrix(path: &Path, id_col: &str) -> PolarsResult<DataFrame> {
    let df = read_csv(path)?;
    df.column(id_col)?;
    info!("Mutation matrix {}: {} patients x {} columns", path.display(), df.height(), df.width() - 1);
    Ok(df)
}

/// Numeric columns (not in `exclude`) whose non-null values are all 0 or 1.
pub fn binary_gene_columns(df: &DataFrame, exclude: &[&str]) -> PolarsResult<Vec<String>> {
    let mut genes = Vec::new();
    for col in df.get_columns() {
        let name = col.name().as_str();
        let numeric = matches!(
            col.dtype(),
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
                | DataType::Float32
                | DataType::Float64
        );
        if exclude.contains(&name) || !numeric {
            continue;
        }
        let binary = column_as_f64(df, name)?
            .into_iter()
            .flatten()
            .all(|v| v == 0.0 || v == 1.0);
        if binary {
            genes.push(name.to_string());
        }
    }
    debug!("{} binary gene columns", genes.len());
    Ok(genes)
}

/// Long (one row per mutation) to wide 0/1 matrix. Rows follow the first
/// appearance of each sample, columns the first appearance of each gene.
pub fn maf_to_binary_matrix(df: &DataFrame, sample_col: &str, gene_col: &str) -> PolarsResult<DataFrame> {
    let samples = column_as_string(df, sample_col)?;
    let genes = column_as_string(df, gene_col)?;

    let mut sample_order: Vec<String> = Vec::new();
    let mut sample_pos: HashMap<String, usize> = HashMap::new();
    let mut gene_order: Vec<String> = Vec::new();
    let mut gene_pos: HashMap<String, usize> = HashMap::new();
    let mut hits: Vec<(usize, usize)> = Vec::new();

    for (s, g) in samples.into_iter().zip(genes) {
        let (Some(s), Some(g)) = (s, g) else { continue };
        let si = *sample_pos.entry(s.clone()).or_insert_with(|| {
            sample_order.push(s);
            sample_order.len() - 1
        });
        let gi = *gene_pos.entry(g.clone()).or_insert_with(|| {
            gene_order.push(g);
            gene_order.len() - 1
        });
        hits.push((si, gi));
    }

    let mut matrix = vec![vec![0i32; sample_order.len()]; gene_order.len()];
    for (si, gi) in hits {
        matrix[gi][si] = 1;
    }

    let mut columns: Vec<Column> = Vec::with_capacity(gene_order.len() + 1);
    columns.push(Series::new(PlSmallStr::from(sample_col), sample_order).into());
    for (gene, values) in gene_order.into_iter().zip(matrix) {
        columns.push(Series::new(PlSmallStr::from(gene), values).into());
    }
    DataFrame::new(columns)
}

// ─────────────────────────────────────────────────────────────────────────────
// Functional classification
// ─────────────────────────────────────────────────────────────────────────────

const TRUNCATING: [&str; 6] = [
    "Nonsense_Mutation",
    "Frame_Shift_Del",
    "Frame_Shift_Ins",
    "Splice_Site",
    "Splice_Region",
    "Translation_Start_Site",
];
const MISSENSE: &str = "Missense_Mutation";

const RHOA_HOTSPOTS: [i64; 4] = [5, 17, 19, 42];
const CXCR4_WHIM: std::ops::RangeInclusive<i64> = 308..=352;
const GNAI2_ACTIVATING: [i64; 3] = [179, 182, 205];
const RAC2_ACTIVATING: [i64; 2] = [12, 61];

/// One row of a cBioPortal mutation table.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub sample_id: String,
    pub gene: String,
    pub mutation_type: String,
    pub protein_change: String,
    pub protein_pos_start: Option<i64>,
}

impl MutationRecord {
    fn is_truncating(&self) -> bool {
        TRUNCATING.contains(&self.mutation_type.as_str())
    }

    fn is_missense(&self) -> bool {
        self.mutation_type == MISSENSE
    }

    fn position_in(&self, positions: &[i64]) -> bool {
        self.protein_pos_start.is_some_and(|p| positions.contains(&p))
    }
}

/// Rows from a frame with `sampleId`, `hugoGeneSymbol`, `mutationType`,
/// `proteinChange` and `proteinPosStart` columns.
pub fn mutation_records(df: &DataFrame) -> PolarsResult<Vec<MutationRecord>> {
    require_columns(df, &["sampleId", "hugoGeneSymbol", "mutationType", "proteinChange", "proteinPosStart"])?;
    let samples = column_as_string(df, "sampleId")?;
    let genes = column_as_string(df, "hugoGeneSymbol")?;
    let types = column_as_string(df, "mutationType")?;
    let changes = column_as_string(df, "proteinChange")?;
    let positions = column_as_f64(df, "proteinPosStart")?;

    let mut out = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(sample_id), Some(gene)) = (samples[i].clone(), genes[i].clone()) else {
            continue;
        };
        out.push(MutationRecord {
            sample_id,
            gene,
            mutation_type: types[i].clone().unwrap_or_default(),
            protein_change: changes[i].clone().unwrap_or_default(),
            protein_pos_start: positions[i].map(|p| p as i64),
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionalClass {
    LofTruncating,
    LofHotspot,
    LofLikely,
    LofPossible,
    GofWhim,
    GofActivating,
    GofPossible,
    NotGof,
    Unknown,
}

impl FunctionalClass {
    pub fn label(&self) -> &'static str {
        match self {
            Self::LofTruncating => "LoF_truncating",
            Self::LofHotspot => "LoF_hotspot",
            Self::LofLikely => "LoF_likely",
            Self::LofPossible => "LoF_possible",
            Self::GofWhim => "GoF_WHIM",
            Self::GofActivating => "GoF_activating",
            Self::GofPossible => "GoF_possible",
            Self::NotGof => "Not_GoF",
            Self::Unknown => "Unknown",
        }
    }

    pub fn is_confident_lof(&self) -> bool {
        matches!(self, Self::LofTruncating | Self::LofHotspot | Self::LofLikely)
    }

    pub fn is_confident_gof(&self) -> bool {
        matches!(self, Self::GofWhim | Self::GofActivating)
    }
}

impl fmt::Display for FunctionalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Retention genes are expected to lose function.
pub fn classify_retention(m: &MutationRecord) -> FunctionalClass {
    if m.is_truncating() {
        return FunctionalClass::LofTruncating;
    }
    match m.gene.as_str() {
        "GNA13" if m.is_missense() => FunctionalClass::LofLikely,
        "RHOA" if m.position_in(&RHOA_HOTSPOTS) => FunctionalClass::LofHotspot,
        "RHOA" if m.is_missense() => FunctionalClass::LofLikely,
        "S1PR2" | "P2RY8" | "ARHGEF1" if m.is_missense() => FunctionalClass::LofPossible,
        _ => FunctionalClass::Unknown,
    }
}

/// Egress genes are expected to gain function.
pub fn classify_egress(m: &MutationRecord) -> FunctionalClass {
    match m.gene.as_str() {
        "CXCR4" => {
            let whim_region = m.protein_pos_start.is_some_and(|p| CXCR4_WHIM.contains(&p));
            if whim_region && (m.is_truncating() || m.protein_change.contains('*')) {
                FunctionalClass::GofWhim
            } else {
                FunctionalClass::NotGof
            }
        }
        "GNAI2" if m.position_in(&GNAI2_ACTIVATING) => FunctionalClass::GofActivating,
        "GNAI2" => FunctionalClass::NotGof,
        "S1PR1" if m.is_missense() => FunctionalClass::GofPossible,
        "RAC2" if m.position_in(&RAC2_ACTIVATING) => FunctionalClass::GofActivating,
        _ => FunctionalClass::Unknown,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pathway {
    Retention,
    Egress,
}

impl Pathway {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Retention => "Retention",
            Self::Egress => "Egress",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifiedMutation {
    pub record: MutationRecord,
    pub pathway: Pathway,
    pub class: FunctionalClass,
}

/// Classify every record that falls in one of the mutated-gene pathway lists;
/// other genes are dropped.
pub fn classify_mutations(records: &[MutationRecord], pathways: &PathwayGenes) -> Vec<ClassifiedMutation> {
    records
        .iter()
        .filter_map(|r| {
            if pathways.retention_mutated.contains(&r.gene) {
                Some((r, Pathway::Retention, classify_retention(r)))
            } else if pathways.egress_mutated.contains(&r.gene) {
                Some((r, Pathway::Egress, classify_egress(r)))
            } else {
                None
            }
        })
        .map(|(r, pathway, class)| ClassifiedMutation { record: r.clone(), pathway, class })
        .collect()
}

pub fn classified_frame(classified: &[ClassifiedMutation]) -> PolarsResult<DataFrame> {
    let strings = |f: fn(&ClassifiedMutation) -> String| -> Vec<String> { classified.iter().map(f).collect() };
    let positions: Vec<Option<i64>> = classified.iter().map(|c| c.record.protein_pos_start).collect();
    df![
        "sampleId" => strings(|c| c.record.sample_id.clone()),
        "hugoGeneSymbol" => strings(|c| c.record.gene.clone()),
        "mutationType" => strings(|c| c.record.mutation_type.clone()),
        "proteinChange" => strings(|c| c.record.protein_change.clone()),
        "proteinPosStart" => positions,
        "pathway" => strings(|c| c.pathway.label().to_string()),
        "functional_class" => strings(|c| c.class.label().to_string())
    ]
}

/// Count of each class, in enum order.
pub fn class_counts(classified: &[ClassifiedMutation], pathway: Pathway) -> BTreeMap<FunctionalClass, usize> {
    let mut counts = BTreeMap::new();
    for c in classified.iter().filter(|c| c.pathway == pathway) {
        *counts.entry(c.class).or_insert(0) += 1;
    }
    counts
}

// ─────────────────────────────────────────────────────────────────────────────
// LoF burden
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LofBurden {
    pub sample_id: String,
    pub lof_count: usize,
    pub genes: BTreeSet<String>,
}

impl LofBurden {
    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }
}

/// Confident retention-pathway LoF mutations per sample, sorted by sample id.
pub fn lof_burden(classified: &[ClassifiedMutation]) -> Vec<LofBurden> {
    let mut by_sample: BTreeMap<String, LofBurden> = BTreeMap::new();
    for c in classified
        .iter()
        .filter(|c| c.pathway == Pathway::Retention && c.class.is_confident_lof())
    {
        let entry = by_sample
            .entry(c.record.sample_id.clone())
            .or_insert_with(|| LofBurden {
                sample_id: c.record.sample_id.clone(),
                lof_count: 0,
                genes: BTreeSet::new(),
            });
        entry.lof_count += 1;
        entry.genes.insert(c.record.gene.clone());
    }
    by_sample.into_values().collect()
}

/// Samples carrying at least one confident GoF egress mutation.
pub fn gof_samples(classified: &[ClassifiedMutation]) -> BTreeSet<String> {
    classified
        .iter()
        .filter(|c| c.pathway == Pathway::Egress && c.class.is_confident_gof())
        .map(|c| c.record.sample_id.clone())
        .collect()
}

/// Fail early when a required input column is absent.
pub fn require_columns(df: &DataFrame, columns: &[&str]) -> PolarsResult<()> {
    for c in columns {
        if df.column(c).is_err() {
            return Err(polars_err(format!("missing column '{c}'").into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn rec(gene: &str, kind: &str, change: &str, pos: Option<i64>) -> MutationRecord {
        MutationRecord {
            sample_id: "S1".into(),
            gene: gene.into(),
            mutation_type: kind.into(),
            protein_change: change.into(),
            protein_pos_start: pos,
        }
    }

    #[test]
    fn retention_rules() {
        use FunctionalClass::*;
        assert_eq!(classify_retention(&rec("S1PR2", "Nonsense_Mutation", "W10*", Some(10))), LofTruncating);
        assert_eq!(classify_retention(&rec("GNA13", "Missense_Mutation", "L30P", Some(30))), LofLikely);
        assert_eq!(classify_retention(&rec("GNA13", "In_Frame_Del", "", Some(30))), Unknown);
        assert_eq!(classify_retention(&rec("RHOA", "In_Frame_Del", "G17del", Some(17))), LofHotspot);
        assert_eq!(classify_retention(&rec("RHOA", "Missense_Mutation", "A61T", Some(61))), LofLikely);
        assert_eq!(classify_retention(&rec("P2RY8", "Missense_Mutation", "R10C", Some(10))), LofPossible);
        assert_eq!(classify_retention(&rec("ARHGEF1", "Silent", "", None)), Unknown);
    }

    #[test]
    fn egress_rules() {
        use FunctionalClass::*;
        assert_eq!(classify_egress(&rec("CXCR4", "Nonsense_Mutation", "S338*", Some(338))), GofWhim);
        assert_eq!(classify_egress(&rec("CXCR4", "Missense_Mutation", "S338*", Some(338))), GofWhim);
        assert_eq!(classify_egress(&rec("CXCR4", "Frame_Shift_Del", "", Some(200))), NotGof);
        assert_eq!(classify_egress(&rec("GNAI2", "Missense_Mutation", "R179C", Some(179))), GofActivating);
        assert_eq!(classify_egress(&rec("GNAI2", "Missense_Mutation", "A10T", Some(10))), NotGof);
        assert_eq!(classify_egress(&rec("S1PR1", "Missense_Mutation", "", Some(5))), GofPossible);
        assert_eq!(classify_egress(&rec("S1PR1", "Nonsense_Mutation", "", Some(5))), Unknown);
        assert_eq!(classify_egress(&rec("RAC2", "Missense_Mutation", "G12V", Some(12))), GofActivating);
        assert!(GofWhim.is_confident_gof() && !GofPossible.is_confident_gof());
    }

    #[test]
    fn burden_counts_confident_lof_only() {
        let mut a = rec("GNA13", "Nonsense_Mutation", "", Some(1));
        a.sample_id = "A".into();
        let mut b = rec("GNA13", "Missense_Mutation", "", Some(2));
        b.sample_id = "A".into();
        let mut c = rec("RHOA", "Missense_Mutation", "", Some(17));
        c.sample_id = "A".into();
        let mut d = rec("S1PR2", "Missense_Mutation", "", Some(3));
        d.sample_id = "B".into();
        let mut e = rec("CXCR4", "Nonsense_Mutation", "S338*", Some(338));
        e.sample_id = "C".into();
        let classified = classify_mutations(&[a, b, c, d, e], &PathwayGenes::default());
        assert_eq!(classified.len(), 5);

        let burden = lof_burden(&classified);
        assert_eq!(burden.len(), 1);
        assert_eq!(burden[0].sample_id, "A");
        assert_eq!(burden[0].lof_count, 3);
        assert_eq!(burden[0].n_genes(), 2);
        assert_eq!(gof_samples(&classified).into_iter().collect::<Vec<_>>(), vec!["C"]);
        assert_eq!(class_counts(&classified, Pathway::Retention)[&FunctionalClass::LofLikely], 1);

        let frame = classified_frame(&classified).unwrap();
        assert_eq!(frame.shape(), (5, 7));
    }

    #[test]
    fn maf_pivot_keeps_first_appearance_order() {
        let maf = df![
            "Tumor_Sample_Barcode" => &["T2", "T1", "T2", "T2"],
            "Hugo_Symbol" => &["MYD88", "GNA13", "GNA13", "MYD88"]
        ]
        .unwrap();
        let wide = maf_to_binary_matrix(&maf, "Tumor_Sample_Barcode", "Hugo_Symbol").unwrap();
        let names: Vec<&str> = wide.get_column_names().iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["Tumor_Sample_Barcode", "MYD88", "GNA13"]);
        assert_eq!(column_as_f64(&wide, "MYD88").unwrap(), vec![Some(1.0), Some(0.0)]);
        assert_eq!(column_as_f64(&wide, "GNA13").unwrap(), vec![Some(1.0), Some(1.0)]);
        assert_eq!(binary_gene_columns(&wide, &["Tumor_Sample_Barcode"]).unwrap().len(), 2);
    }

    #[test]
    fn binary_columns_skip_counts_and_text() {
        let df = df![
            "PID" => &[1i64, 2, 3],
            "EZH2" => &[0i64, 1, 0],
            "BCL2" => &[Some(1.0), None, Some(0.0)],
            "age" => &[55i64, 61, 70],
            "COO" => &["GCB", "ABC", "GCB"]
        ]
        .unwrap();
        let genes = binary_gene_columns(&df, &["PID"]).unwrap();
        assert_eq!(genes, vec!["EZH2", "BCL2"]);
    }

    #[test]
    fn records_from_frame() {
        let df = df![
            "sampleId" => &["S1", "S2"],
            "hugoGeneSymbol" => &["RHOA", "CXCR4"],
            "mutationType" => &["Missense_Mutation", "Nonsense_Mutation"],
            "proteinChange" => &["G17V", "S338*"],
            "proteinPosStart" => &[Some(17i64), None]
        ]
        .unwrap();
        let recs = mutation_records(&df).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].protein_pos_start, Some(17));
        assert_eq!(recs[1].protein_pos_start, None);
        assert!(require_columns(&df, &["sampleId", "missing"]).is_err());
    }
}
