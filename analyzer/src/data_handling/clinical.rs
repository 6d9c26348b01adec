// src/data_handling/clinical.rs
// -----------------------------------------------------------------------------
// Clinical covariates: cell of origin, Ann Arbor stage groupings, vital status
// and the per-sample survival cohort used by every survival analysis.
// -----------------------------------------------------------------------------

use std::collections::BTreeSet;
use std::fmt;

use polars::prelude::*;
use tracing::{info, warn};

use crate::config::AnalysisConfig;
use crate::data_handling::series_matrix::SeriesMatrix;
use crate::helper_functions::{column_as_f64, column_as_string, read_csv, read_excel_sheet};
use crate::models::{polars_err, Dataset, SampleGroup};

// ─────────────────────────────────────────────────────────────────────────────
// Categorical covariates
// ─────────────────────────────────────────────────────────────────────────────

const MISSING: [&str; 9] = [
    "", "na", "nan", "none", "unknown", "not reported", "not done", "raised", "normal",
];

fn is_missing(raw: &str) -> bool {
    MISSING.contains(&raw.trim().to_lowercase().as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellOfOrigin {
    Gcb,
    Abc,
    Mhg,
    Unc,
    Other,
}

impl CellOfOrigin {
    pub const SUBTYPES: [CellOfOrigin; 4] = [Self::Gcb, Self::Abc, Self::Mhg, Self::Unc];

    pub fn parse(raw: &str) -> Option<Self> {
        if is_missing(raw) {
            return None;
        }
        Some(match raw.trim().to_uppercase().as_str() {
            "GCB" => Self::Gcb,
            "ABC" => Self::Abc,
            "MHG" => Self::Mhg,
            "UNC" | "UNCLASSIFIED" => Self::Unc,
            _ => Self::Other,
        })
    }
}

impl fmt::Display for CellOfOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Gcb => "GCB",
            Self::Abc => "ABC",
            Self::Mhg => "MHG",
            Self::Unc => "UNC",
            Self::Other => "Other",
        };
        write!(f, "{s}")
    }
}

/// Stage I against Stage III/IV, leaving Stage II out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageContrast {
    StageI,
    StageIIIIV,
}

impl StageContrast {
    pub fn extreme(stage: &str) -> Option<Self> {
        if is_missing(stage) {
            return None;
        }
        match stage.trim().to_uppercase().as_str() {
            "I" => Some(Self::StageI),
            "III" | "IV" => Some(Self::StageIIIIV),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::StageI => "Stage_I",
            Self::StageIIIIV => "Stage_III_IV",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageGroup {
    Limited,
    Advanced,
}

impl StageGroup {
    /// Ann Arbor stage (roman or arabic, optional `Stage` prefix and A/B/E/S suffix).
    pub fn classify(stage: &str) -> Option<Self> {
        if is_missing(stage) {
            return None;
        }
        let upper = stage.trim().to_uppercase();
        let normalized = upper.trim_start_matches("STAGE").trim();
        let core = normalized
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .trim_end_matches(['A', 'B', 'E', 'S']);
        match core {
            "I" | "II" | "1" | "2" => Some(Self::Limited),
            "III" | "IV" | "3" | "4" => Some(Self::Advanced),
            _ => None,
        }
    }

    /// The binary IPI stage component: 0 = I/II, 1 = III/IV.
    pub fn from_ipi_flag(flag: &str) -> Option<Self> {
        match whole_number(flag.trim().parse::<f64>().ok()?)? {
            0 => Some(Self::Limited),
            1 => Some(Self::Advanced),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Limited => "Limited",
            Self::Advanced => "Advanced",
        }
    }
}

/// `v` as an integer, or `None` for fractional and non-finite values.
fn whole_number(v: f64) -> Option<i64> {
    (v.is_finite() && v.fract() == 0.0).then_some(v as i64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Alive,
    Dead,
}

impl Outcome {
    pub fn from_os_status(status: i64) -> Option<Self> {
        match status {
            0 => Some(Self::Alive),
            1 => Some(Self::Dead),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Alive => "Alive",
            Self::Dead => "Dead",
        }
    }
}

/// First column naming a stage (but not a stage group), else an Ann Arbor column.
pub fn find_stage_column(df: &DataFrame) -> Option<String> {
    let names: Vec<String> = df.get_column_names().iter().map(|c| c.to_string()).collect();
    names
        .iter()
        .find(|c| {
            let lower = c.to_lowercase();
            lower.contains("stage") && !lower.contains("group") && !lower.contains("substage")
        })
        .or_else(|| names.iter().find(|c| c.to_lowercase().contains("ann_arbor")))
        .cloned()
}

/// Clinical table from `.csv`, or from a named sheet of an `.xlsx`/`.xls` workbook.
pub struct ClinicalTable {
    pub path: std::path::PathBuf,
    pub sheet: Option<String>,
}

impl Dataset for ClinicalTable {
    fn load(&self) -> PolarsResult<DataFrame> {
        let ext = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let df = match ext.as_str() {
            "xlsx" | "xls" | "xlsm" => {
                let sheet = self.sheet.as_deref().ok_or_else(|| {
                    polars_err(format!("{} is a workbook; a sheet name is required", self.path.display()).into())
                })?;
                read_excel_sheet(&self.path, sheet)?
            }
            _ => read_csv(&self.path)?,
        };
        info!("Clinical table {}: {} rows x {} columns", self.path.display(), df.height(), df.width());
        Ok(df)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Survival cohort
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SurvivalRecord {
    pub sample_id: String,
    pub time: f64,
    pub event: bool,
    pub subtype: Option<String>,
    /// Ordinal IPI group, if known.
    pub ipi: Option<f64>,
}

/// Samples with both an overall-survival time and a 0/1 status.
#[derive(Debug, Clone, Default)]
pub struct SurvivalCohort {
    pub records: Vec<SurvivalRecord>,
}

impl SurvivalCohort {
    /// From `os_followup_y`, `os_status` and `pred_combine` characteristics.
    pub fn from_series_matrix(matrix: &SeriesMatrix) -> Self {
        let times = matrix.characteristic_f64("os_followup_y");
        let status = matrix.characteristic_i64("os_status");
        let coo = matrix.characteristic("pred_combine");
        let records = matrix
            .sample_ids
            .iter()
            .enumerate()
            .filter_map(|(i, id)| {
                let time = times[i].filter(|t| t.is_finite())?;
                let event = Outcome::from_os_status(status[i]?)? == Outcome::Dead;
                Some(SurvivalRecord {
                    sample_id: id.clone(),
                    time,
                    event,
                    subtype: coo[i].clone().filter(|s| !is_missing(s)),
                    ipi: None,
                })
            })
            .collect::<Vec<_>>();
        info!("Survival cohort: {} of {} samples have OS data", records.len(), matrix.n_samples());
        Self { records }
    }

    /// From a clinical table with `Sample_ID`, `OS_time_years`, `OS_status`,
    /// `IPI Group` and `LymphGen_Subtype` columns (the last two optional).
    pub fn from_clinical_frame(df: &DataFrame, config: &AnalysisConfig) -> PolarsResult<Self> {
        let ids = column_as_string(df, "Sample_ID")?;
        let times = column_as_f64(df, "OS_time_years")?;
        let status = column_as_f64(df, "OS_status")?;
        let names: Vec<String> = df.get_column_names().iter().map(|c| c.to_string()).collect();
        let optional = |name: &str| -> PolarsResult<Vec<Option<String>>> {
            if names.iter().any(|c| c == name) {
                column_as_string(df, name)
            } else {
                warn!("Clinical table has no '{}' column", name);
                Ok(vec![None; df.height()])
            }
        };
        let ipi = optional("IPI Group")?;
        let subtype = optional("LymphGen_Subtype")?;

        let mut records = Vec::new();
        for i in 0..df.height() {
            let (Some(id), Some(time), Some(status)) = (ids[i].clone(), times[i], status[i]) else {
                continue;
            };
            if !time.is_finite() {
                continue;
            }
            let Some(outcome) = whole_number(status).and_then(Outcome::from_os_status) else {
                continue;
            };
            records.push(SurvivalRecord {
                sample_id: id,
                time,
                event: outcome == Outcome::Dead,
                subtype: subtype[i].clone().filter(|s| !is_missing(s)),
                ipi: ipi[i].as_deref().and_then(|g| config.ipi_numeric(g)),
            });
        }
        info!("Survival cohort: {} of {} clinical rows have OS data", records.len(), df.height());
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn n_events(&self) -> usize {
        self.records.iter().filter(|r| r.event).count()
    }

    pub fn sample_ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.sample_id.clone()).collect()
    }

    pub fn times(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.time).collect()
    }

    pub fn events(&self) -> Vec<bool> {
        self.records.iter().map(|r| r.event).collect()
    }

    /// IPI covariate per record, NaN when unknown.
    pub fn ipi(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.ipi.unwrap_or(f64::NAN)).collect()
    }

    pub fn filter<F: Fn(&SurvivalRecord) -> bool>(&self, keep: F) -> Self {
        Self {
            records: self.records.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// Keep samples whose id appears in `ids`.
    pub fn restrict_to(&self, ids: &[String]) -> Self {
        let ids: std::collections::HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.filter(|r| ids.contains(r.sample_id.as_str()))
    }

    pub fn with_subtype(&self, subtype: &str) -> Self {
        self.filter(|r| r.subtype.as_deref() == Some(subtype))
    }

    /// Distinct subtype labels in sorted order.
    pub fn subtypes(&self) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|r| r.subtype.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Split sample ids by cell of origin, as read from a per-sample label vector.
pub fn coo_groups(sample_ids: &[String], labels: &[Option<String>]) -> Vec<SampleGroup> {
    CellOfOrigin::SUBTYPES
        .iter()
        .map(|coo| SampleGroup {
            name: coo.to_string(),
            samples: sample_ids
                .iter()
                .zip(labels)
                .filter(|(_, l)| l.as_deref().and_then(CellOfOrigin::parse) == Some(*coo))
                .map(|(s, _)| s.clone())
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::series_matrix::tests::FIXTURE;
    use polars::df;
    use std::io::Cursor;

    #[test]
    fn stage_contrast_omits_stage_two() {
        assert_eq!(StageContrast::extreme("I"), Some(StageContrast::StageI));
        assert_eq!(StageContrast::extreme(" iv "), Some(StageContrast::StageIIIIV));
        assert_eq!(StageContrast::extreme("III").map(|s| s.label()), Some("Stage_III_IV"));
        assert_eq!(StageContrast::extreme("II"), None);
        assert_eq!(StageContrast::extreme("not done"), None);
        assert_eq!(StageContrast::extreme("NA"), None);
    }

    #[test]
    fn stage_group_normalises_labels() {
        assert_eq!(StageGroup::classify("Stage IVA"), Some(StageGroup::Advanced));
        assert_eq!(StageGroup::classify("IIE"), Some(StageGroup::Limited));
        assert_eq!(StageGroup::classify("3"), Some(StageGroup::Advanced));
        assert_eq!(StageGroup::classify("IIIE"), Some(StageGroup::Advanced));
        assert_eq!(StageGroup::classify("I"), Some(StageGroup::Limited));
        assert_eq!(StageGroup::classify("unknown"), None);
        assert_eq!(StageGroup::from_ipi_flag("1"), Some(StageGroup::Advanced));
        assert_eq!(StageGroup::from_ipi_flag("0.0"), Some(StageGroup::Limited));
        assert_eq!(StageGroup::from_ipi_flag("x"), None);
        assert_eq!(StageGroup::from_ipi_flag("0.5"), None);
        assert_eq!(StageGroup::from_ipi_flag("1.9"), None);
        assert_eq!(StageGroup::from_ipi_flag("inf"), None);
    }

    #[test]
    fn coo_and_outcome() {
        assert_eq!(CellOfOrigin::parse("gcb"), Some(CellOfOrigin::Gcb));
        assert_eq!(CellOfOrigin::parse("Type III"), Some(CellOfOrigin::Other));
        assert_eq!(CellOfOrigin::parse("NA"), None);
        assert_eq!(Outcome::from_os_status(1), Some(Outcome::Dead));
        assert_eq!(Outcome::from_os_status(2), None);
    }

    #[test]
    fn stage_column_lookup() {
        let df = df![
            "Stage_Group" => &["x"],
            "Ann Arbor Stage" => &["IV"],
            "ann_arbor" => &["IV"]
        ]
        .unwrap();
        assert_eq!(find_stage_column(&df).as_deref(), Some("Ann Arbor Stage"));
        let df = df!["id" => &["a"], "ann_arbor" => &["I"]].unwrap();
        assert_eq!(find_stage_column(&df).as_deref(), Some("ann_arbor"));
        let df = df!["id" => &["a"]].unwrap();
        assert_eq!(find_stage_column(&df), None);
    }

    #[test]
    fn cohort_from_series_matrix_skips_missing_status() {
        let m = SeriesMatrix::from_reader(Cursor::new(FIXTURE)).unwrap();
        let cohort = SurvivalCohort::from_series_matrix(&m);
        assert_eq!(cohort.sample_ids(), vec!["GSM1", "GSM2"]);
        assert_eq!(cohort.events(), vec![true, false]);
        assert_eq!(cohort.subtypes(), vec!["ABC", "GCB"]);
        assert_eq!(cohort.with_subtype("GCB").len(), 1);
    }

    #[test]
    fn cohort_drops_non_finite_follow_up() {
        let text = FIXTURE
            .replace("os_status: NA", "os_status: 1")
            .replace("os_followup_y: 2", "os_followup_y: NaN");
        let m = SeriesMatrix::from_reader(Cursor::new(text)).unwrap();
        let cohort = SurvivalCohort::from_series_matrix(&m);
        assert_eq!(cohort.len(), 2);
        assert!(cohort.times().iter().all(|t| t.is_finite()));

        let df = df![
            "Sample_ID" => &["A", "B", "C"],
            "OS_time_years" => &[1.0, f64::INFINITY, f64::NAN],
            "OS_status" => &[1.0, 1.0, 0.0]
        ]
        .unwrap();
        let cohort = SurvivalCohort::from_clinical_frame(&df, &AnalysisConfig::default()).unwrap();
        assert_eq!(cohort.sample_ids(), vec!["A"]);
    }

    #[test]
    fn fractional_status_is_rejected() {
        let df = df![
            "Sample_ID" => &["A", "B", "C"],
            "OS_time_years" => &[1.0, 2.0, 3.0],
            "OS_status" => &[1.0, 0.7, 1.5]
        ]
        .unwrap();
        let cohort = SurvivalCohort::from_clinical_frame(&df, &AnalysisConfig::default()).unwrap();
        assert_eq!(cohort.sample_ids(), vec!["A"]);
        assert_eq!(cohort.n_events(), 1);
    }

    #[test]
    fn cohort_from_clinical_frame_maps_ipi() {
        let df = df![
            "Sample_ID" => &["A", "B", "C", "D"],
            "OS_time_years" => &[Some(1.0), Some(2.0), None, Some(4.0)],
            "OS_status" => &[1.0, 0.0, 1.0, 1.0],
            "IPI Group" => &["High", "Low", "Low", "n/a"],
            "LymphGen_Subtype" => &["EZB", "MCD", "EZB", "Other"]
        ]
        .unwrap();
        let cohort = SurvivalCohort::from_clinical_frame(&df, &AnalysisConfig::default()).unwrap();
        assert_eq!(cohort.len(), 3);
        assert_eq!(cohort.n_events(), 2);
        assert_eq!(cohort.records[0].ipi, Some(3.0));
        assert!(cohort.ipi()[2].is_nan());
        assert_eq!(cohort.restrict_to(&["B".to_string()]).len(), 1);
    }

    #[test]
    fn coo_groups_bucket_samples() {
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let labels = vec![Some("GCB".to_string()), Some("ABC".to_string()), None];
        let groups = coo_groups(&ids, &labels);
        assert_eq!(groups[0].name, "GCB");
        assert_eq!(groups[0].samples, vec!["a"]);
        assert_eq!(groups[1].samples, vec!["b"]);
        assert!(groups[2].samples.is_empty());
    }
}
