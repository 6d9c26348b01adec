// src/data_handling/series_matrix.rs
// -----------------------------------------------------------------------------
// GEO series-matrix reader. Metadata lines start with `!`, per-sample values are
// tab separated and quoted. Sample characteristics are `key: value` cells, and a
// single `!Sample_characteristics_ch1` line may carry different keys for
// different samples, so cells are bucketed by their own key.
// -----------------------------------------------------------------------------

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::models::polars_err;

const ACCESSION_PREFIX: &str = "!Sample_geo_accession";
const TITLE_PREFIX: &str = "!Sample_title";
const CHARACTERISTICS_PREFIX: &str = "!Sample_characteristics_ch1";
const TABLE_BEGIN: &str = "!series_matrix_table_begin";
const TABLE_END: &str = "!series_matrix_table_end";

#[derive(Debug, Clone)]
pub struct SeriesMatrix {
    pub sample_ids: Vec<String>,
    pub sample_titles: Vec<String>,
    /// Characteristic keys in first-seen order.
    keys: Vec<String>,
    characteristics: HashMap<String, Vec<Option<String>>>,
    pub probe_ids: Vec<String>,
    /// One row per probe, aligned to `sample_ids`; missing values are NaN.
    pub values: Vec<Vec<f64>>,
}

fn unquote(field: &str) -> &str {
    field.trim().trim_matches('"')
}

fn split_fields(line: &str) -> Vec<&str> {
    line.trim_end_matches(['\r', '\n'])
        .split('\t')
        .skip(1)
        .map(unquote)
        .collect()
}

fn parse_value(raw: &str) -> f64 {
    let v = unquote(raw);
    if v.is_empty() || v.eq_ignore_ascii_case("null") {
        return f64::NAN;
    }
    v.parse::<f64>().unwrap_or(f64::NAN)
}

/// Split a `key: value` cell. The key is lower-cased; the value keeps everything after the last colon.
fn split_characteristic(cell: &str) -> Option<(String, String)> {
    let (key, _) = cell.split_once(':')?;
    let value = cell.rsplit(':').next()?.trim();
    let key = key.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }
    Some((key, value.to_string()))
}

impl SeriesMatrix {
    /// Open a series matrix from disk; `.gz` files are decompressed on the fly.
    pub fn from_path(path: &Path) -> PolarsResult<Self> {
        info!("Loading series matrix from {}", path.display());
        let file = File::open(path).map_err(|e| polars_err(Box::new(e)))?;
        let gz = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("gz"));
        let reader: Box<dyn Read> = if gz {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Self::from_reader(BufReader::new(reader))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> PolarsResult<Self> {
        let mut sample_ids: Option<Vec<String>> = None;
        let mut sample_titles = Vec::new();
        let mut char_lines: Vec<Vec<String>> = Vec::new();
        let mut header: Option<Vec<String>> = None;
        let mut probe_ids = Vec::new();
        let mut values = Vec::new();
        let mut in_table = false;
        let mut table_closed = false;

        for line in reader.lines() {
            let line = line.map_err(|e| polars_err(Box::new(e)))?;
            if in_table {
                if line.starts_with(TABLE_END) {
                    in_table = false;
                    table_closed = true;
                    continue;
                }
                if line.trim().is_empty() {
                    continue;
                }
                let mut fields = line.trim_end_matches(['\r', '\n']).split('\t');
                if header.is_none() {
                    header = Some(fields.skip(1).map(|f| unquote(f).to_string()).collect());
                    continue;
                }
                let probe = unquote(fields.next().unwrap_or_default()).to_string();
                probe_ids.push(probe);
                values.push(fields.map(parse_value).collect::<Vec<f64>>());
            } else if line.starts_with(ACCESSION_PREFIX) {
                sample_ids = Some(split_fields(&line).into_iter().map(String::from).collect());
            } else if line.starts_with(TITLE_PREFIX) {
                sample_titles = split_fields(&line).into_iter().map(String::from).collect();
            } else if line.starts_with(CHARACTERISTICS_PREFIX) {
                char_lines.push(split_fields(&line).into_iter().map(String::from).collect());
            } else if line.starts_with(TABLE_BEGIN) {
                in_table = true;
            }
        }

        let sample_ids = sample_ids
            .ok_or_else(|| polars_err(format!("no {ACCESSION_PREFIX} line found").into()))?;
        if !table_closed && header.is_none() {
            return Err(polars_err("series matrix contains no expression table".into()));
        }
        if !table_closed {
            warn!("Expression table is missing {}; using rows read so far", TABLE_END);
        }
        let header = header.unwrap_or_default();
        if header != sample_ids {
            return Err(polars_err(
                format!(
                    "expression header has {} samples but accession line has {}",
                    header.len(),
                    sample_ids.len()
                )
                .into(),
            ));
        }

        let n = sample_ids.len();
        for row in values.iter_mut() {
            row.resize(n, f64::NAN);
        }

        let mut keys = Vec::new();
        let mut characteristics: HashMap<String, Vec<Option<String>>> = HashMap::new();
        for cells in &char_lines {
            for (i, cell) in cells.iter().enumerate().take(n) {
                let Some((key, value)) = split_characteristic(cell) else {
                    continue;
                };
                let column = characteristics.entry(key.clone()).or_insert_with(|| {
                    keys.push(key.clone());
                    vec![None; n]
                });
                if column[i].is_none() {
                    column[i] = Some(value);
                }
            }
        }

        debug!(
            "Series matrix: {} samples, {} probes, characteristics {:?}",
            n,
            probe_ids.len(),
            keys
        );

        Ok(Self {
            sample_ids,
            sample_titles,
            keys,
            characteristics,
            probe_ids,
            values,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Per-sample value for `key`, aligned to `sample_ids`. All `None` if the key is absent.
    pub fn characteristic(&self, key: &str) -> Vec<Option<String>> {
        self.characteristics
            .get(&key.to_lowercase())
            .cloned()
            .unwrap_or_else(|| vec![None; self.n_samples()])
    }

    pub fn characteristic_f64(&self, key: &str) -> Vec<Option<f64>> {
        self.characteristic(key)
            .into_iter()
            .map(|v| v.and_then(|s| s.trim().parse::<f64>().ok()))
            .collect()
    }

    pub fn characteristic_i64(&self, key: &str) -> Vec<Option<i64>> {
        self.characteristic(key)
            .into_iter()
            .map(|v| v.and_then(|s| s.trim().parse::<i64>().ok()))
            .collect()
    }

    /// `sample_id` plus one string column per requested characteristic key.
    pub fn clinical_frame(&self, keys: &[&str]) -> PolarsResult<DataFrame> {
        let mut columns: Vec<Column> =
            vec![Series::new("sample_id".into(), self.sample_ids.clone()).into()];
        for key in keys {
            columns.push(Series::new(PlSmallStr::from(*key), self.characteristic(key)).into());
        }
        DataFrame::new(columns)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    pub(crate) const FIXTURE: &str = "\
!Series_title\t\"toy DLBCL cohort\"
!Sample_title\t\"s1\"\t\"s2\"\t\"s3\"
!Sample_geo_accession\t\"GSM1\"\t\"GSM2\"\t\"GSM3\"
!Sample_characteristics_ch1\t\"pred_combine: GCB\"\t\"pred_combine: ABC\"\t\"pred_combine: GCB\"
!Sample_characteristics_ch1\t\"Stage: I\"\t\"Stage: IV\"\t\"ipi: 2\"
!Sample_characteristics_ch1\t\"os_status: 1\"\t\"os_status: 0\"\t\"os_status: NA\"
!Sample_characteristics_ch1\t\"os_followup_y: 1.5\"\t\"os_followup_y: 4.25\"\t\"os_followup_y: 2\"
!series_matrix_table_begin
\"ID_REF\"\t\"GSM1\"\t\"GSM2\"\t\"GSM3\"
\"P1\"\t1.0\t2.0\t3.0
\"P2\"\tnull\t5.5\t
!series_matrix_table_end
";

    #[test]
    fn parses_metadata_and_table() {
        let m = SeriesMatrix::from_reader(Cursor::new(FIXTURE)).unwrap();
        assert_eq!(m.sample_ids, vec!["GSM1", "GSM2", "GSM3"]);
        assert_eq!(m.sample_titles, vec!["s1", "s2", "s3"]);
        assert_eq!(m.probe_ids, vec!["P1", "P2"]);
        assert_eq!(m.values[0], vec![1.0, 2.0, 3.0]);
        assert!(m.values[1][0].is_nan());
        assert_eq!(m.values[1][1], 5.5);
        assert!(m.values[1][2].is_nan());
    }

    #[test]
    fn mixed_key_lines_are_split_by_key() {
        let m = SeriesMatrix::from_reader(Cursor::new(FIXTURE)).unwrap();
        assert_eq!(
            m.characteristic("Stage"),
            vec![Some("I".to_string()), Some("IV".to_string()), None]
        );
        assert_eq!(m.characteristic("ipi"), vec![None, None, Some("2".to_string())]);
        assert_eq!(m.characteristic_i64("os_status"), vec![Some(1), Some(0), None]);
        assert_eq!(
            m.characteristic_f64("os_followup_y"),
            vec![Some(1.5), Some(4.25), Some(2.0)]
        );
        assert_eq!(m.characteristic("missing_key"), vec![None, None, None]);
    }

    #[test]
    fn clinical_frame_has_one_row_per_sample() {
        let m = SeriesMatrix::from_reader(Cursor::new(FIXTURE)).unwrap();
        let df = m.clinical_frame(&["pred_combine", "stage"]).unwrap();
        assert_eq!(df.shape(), (3, 3));
        let coo: Vec<Option<&str>> = df.column("pred_combine").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(coo, vec![Some("GCB"), Some("ABC"), Some("GCB")]);
    }

    #[test]
    fn gzipped_file_is_decoded() {
        use flate2::{write::GzEncoder, Compression};
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GSE_toy_series_matrix.txt.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(FIXTURE.as_bytes()).unwrap();
        enc.finish().unwrap();

        let m = SeriesMatrix::from_path(&path).unwrap();
        assert_eq!(m.n_samples(), 3);
        assert_eq!(m.characteristic("pred_combine")[1].as_deref(), Some("ABC"));
    }

    #[test]
    fn missing_accession_is_an_error() {
        let text = "!series_matrix_table_begin\n\"ID_REF\"\n!series_matrix_table_end\n";
        assert!(SeriesMatrix::from_reader(Cursor::new(text)).is_err());
    }

    #[test]
    fn header_mismatch_is_an_error() {
        let text = FIXTURE.replace("\"ID_REF\"\t\"GSM1\"\t\"GSM2\"\t\"GSM3\"", "\"ID_REF\"\t\"GSM1\"\t\"GSM2\"");
        assert!(SeriesMatrix::from_reader(Cursor::new(text)).is_err());
    }
}
