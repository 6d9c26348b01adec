use std::env;
use std::ffi::OsString;
use std::fs::{create_dir_all, File};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::{debug, info};

use crate::models::polars_err;

/// Base directory for relative input and output paths: `$PROJECT_ROOT`, else the working directory.
pub fn project_root() -> PathBuf {
    root_or_cwd(env::var_os("PROJECT_ROOT"))
}

fn root_or_cwd(configured: Option<OsString>) -> PathBuf {
    // an exported but empty variable counts as unset
    configured
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Relative paths are taken from the project root, absolute ones pass through.
pub fn resolve_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root().join(path)
    }
}

pub fn read_csv(file_path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()
}

pub fn read_tsv(file_path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .map_parse_options(|mut o| {
            o.separator = b'\t';
            o.truncate_ragged_lines = true;
            o
        })
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()
}

/// Write `df` to `path`, creating parent directories as needed.
pub fn dataframe_to_csv(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent).map_err(|e| polars_err(Box::new(e)))?;
        }
    }
    let mut file = File::create(path).map_err(|e| polars_err(Box::new(e)))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b',')
        .finish(df)?;
    info!("Saved: {}", path.display());
    Ok(())
}

fn cell_to_string(cell: &calamine::DataType) -> String {
    use calamine::DataType as Ct;
    match cell {
        Ct::String(s) => s.clone(),
        Ct::Empty => String::new(),
        Ct::Bool(b) => b.to_string(),
        Ct::Error(e) => format!("ERR({e:?})"),
        // Excel stores integers as floats; keep "3" rather than "3.0"
        Ct::Float(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        Ct::Float(n) | Ct::Duration(n) => n.to_string(),
        Ct::Int(i) => i.to_string(),
        Ct::DateTime(f) => f.to_string(),
        Ct::DateTimeIso(s) | Ct::DurationIso(s) => s.clone(),
    }
}

/// Read one worksheet (by name) into an all-string DataFrame. The first row is the header.
pub fn read_excel_sheet(path: &Path, sheet: &str) -> PolarsResult<DataFrame> {
    use calamine::{open_workbook_auto, Reader};

    let mut wb = open_workbook_auto(path).map_err(|e| polars_err(Box::new(e)))?;
    let range = wb
        .worksheet_range(sheet)
        .ok_or_else(|| polars_err(format!("worksheet '{sheet}' missing").into()))?
        .map_err(|e| polars_err(Box::new(e)))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| polars_err("empty sheet".into()))?
        .iter()
        .map(cell_to_string)
        .collect();
    debug!("Sheet '{}' header = {:?}", sheet, headers);

    let mut cols: Vec<Vec<Option<String>>> =
        vec![Vec::with_capacity(range.height()); headers.len()];
    for row in rows {
        for (i, col) in cols.iter_mut().enumerate() {
            col.push(match row.get(i) {
                None | Some(calamine::DataType::Empty) => None,
                Some(cell) => Some(cell_to_string(cell)),
            });
        }
    }

    // Duplicate or blank headers would make DataFrame::new fail
    let mut seen = std::collections::HashSet::new();
    let columns: Vec<Column> = headers
        .into_iter()
        .enumerate()
        .map(|(i, h)| {
            let mut name = if h.trim().is_empty() { format!("column_{i}") } else { h };
            if !seen.insert(name.clone()) {
                name = format!("{name}_{i}");
                seen.insert(name.clone());
            }
            name
        })
        .zip(cols)
        .map(|(h, c)| Series::new(PlSmallStr::from(h), c).into())
        .collect();

    DataFrame::new(columns)
}

/// Pull a column as `Vec<Option<f64>>`, casting strings/ints as needed.
pub fn column_as_f64(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let casted = df.column(name)?.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

/// Pull a column as `Vec<Option<String>>`, casting non-string columns.
pub fn column_as_string(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let casted = df.column(name)?.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn empty_root_falls_back_to_working_directory() {
        assert_eq!(root_or_cwd(Some(OsString::from("/data/dlbcl"))), PathBuf::from("/data/dlbcl"));
        let cwd = env::current_dir().unwrap();
        assert_eq!(root_or_cwd(Some(OsString::new())), cwd);
        assert_eq!(root_or_cwd(None), cwd);
    }

    #[test]
    fn csv_round_trip_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/table.csv");
        let mut df = df![
            "Gene" => &["GNA13", "RHOA"],
            "P_value" => &[0.01, 0.5]
        ]
        .unwrap();
        dataframe_to_csv(&mut df, &path).unwrap();

        let back = read_csv(&path).unwrap();
        assert_eq!(back.height(), 2);
        assert_eq!(
            column_as_string(&back, "Gene").unwrap(),
            vec![Some("GNA13".to_string()), Some("RHOA".to_string())]
        );
        assert_eq!(column_as_f64(&back, "P_value").unwrap()[1], Some(0.5));
    }

    #[test]
    fn absolute_paths_are_not_rebased() {
        let p = PathBuf::from("/tmp/somewhere.csv");
        assert_eq!(resolve_path(&p), p);
    }
}
