//! Probe → gene symbol annotation (platform CSV with `Probe` and `Gene_Symbol`).

use std::collections::HashMap;
use std::path::Path;

use polars::prelude::*;
use serde::Deserialize;
use tracing::info;

use crate::models::polars_err;

#[derive(Debug, Deserialize)]
struct AnnotationRecord {
    #[serde(rename = "Probe")]
    probe: String,
    #[serde(rename = "Gene_Symbol")]
    gene_symbol: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProbeAnnotation {
    /// (probe, gene) in file order.
    rows: Vec<(String, String)>,
    probe_to_gene: HashMap<String, String>,
}

impl ProbeAnnotation {
    pub fn from_path(path: &Path) -> PolarsResult<Self> {
        let reader = csv::Reader::from_path(path).map_err(|e| polars_err(Box::new(e)))?;
        let annotation = Self::from_csv_reader(reader)?;
        info!("Loaded {} probe annotations from {}", annotation.len(), path.display());
        Ok(annotation)
    }

    fn from_csv_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> PolarsResult<Self> {
        let mut rows = Vec::new();
        for record in reader.deserialize::<AnnotationRecord>() {
            let record = record.map_err(|e| polars_err(Box::new(e)))?;
            // unannotated probes carry an empty symbol
            if let Some(gene) = record.gene_symbol.filter(|g| !g.trim().is_empty()) {
                rows.push((record.probe, gene.trim().to_string()));
            }
        }
        Ok(Self::from_pairs(rows))
    }

    pub fn from_pairs(rows: Vec<(String, String)>) -> Self {
        let mut probe_to_gene = HashMap::with_capacity(rows.len());
        for (probe, gene) in &rows {
            probe_to_gene.entry(probe.clone()).or_insert_with(|| gene.clone());
        }
        Self { rows, probe_to_gene }
    }

    pub fn len(&self) -> usize {
        self.probe_to_gene.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probe_to_gene.is_empty()
    }

    pub fn gene(&self, probe: &str) -> Option<&str> {
        self.probe_to_gene.get(probe).map(String::as_str)
    }

    /// First listed probe per gene.
    pub fn gene_to_probe(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for (probe, gene) in &self.rows {
            map.entry(gene.clone()).or_insert_with(|| probe.clone());
        }
        map
    }

    /// Left-join `Gene_Symbol` onto `df` by its `Probe` column. Row order is kept;
    /// unannotated probes get null.
    pub fn annotate(&self, df: &DataFrame) -> PolarsResult<DataFrame> {
        let genes: Vec<Option<String>> = df
            .column("Probe")?
            .str()?
            .into_iter()
            .map(|p| p.and_then(|p| self.gene(p)).map(str::to_string))
            .collect();
        let mut out = df.clone();
        out.with_column(Series::new("Gene_Symbol".into(), genes))?;
        Ok(out)
    }
}
