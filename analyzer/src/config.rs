//! Analysis configuration: pathway gene sets, thresholds and covariate maps.
//!
//! Every field has a default, so a config file only needs the keys it overrides.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathwayGenes {
    /// Keep B cells in the germinal centre; higher expression is expected to be favourable.
    pub retention: Vec<String>,
    /// Promote germinal-centre exit.
    pub egress: Vec<String>,
    /// B-cell / GC identity markers reported for context.
    pub identity: Vec<String>,
    /// Genes highlighted on volcano plots and in the pathway check table.
    pub highlight: Vec<String>,
    /// Genes whose mutations are read as loss of retention.
    pub retention_mutated: Vec<String>,
    /// Genes whose mutations are read as gain of egress.
    pub egress_mutated: Vec<String>,
}

fn strings(genes: &[&str]) -> Vec<String> {
    genes.iter().map(|g| g.to_string()).collect()
}

impl Default for PathwayGenes {
    fn default() -> Self {
        Self {
            retention: strings(&["S1PR2", "P2RY8", "GNA13", "RHOA", "SGK1", "GNAI2", "FOXO1"]),
            egress: strings(&["CXCR4"]),
            identity: strings(&["PAX5", "MS4A1", "BCL6"]),
            highlight: strings(&[
                "FOXO1", "S1PR2", "GNA13", "RHOA", "P2RY8", "CXCR4", "SGK1", "GNAI2", "PAX5",
                "MS4A1", "MYC", "BCL2", "BCL6",
            ]),
            retention_mutated: strings(&["GNA13", "RHOA", "S1PR2", "P2RY8", "ARHGEF1"]),
            egress_mutated: strings(&["CXCR4", "GNAI2", "S1PR1", "RAC2"]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub fdr_threshold: f64,
    pub strict_fdr: f64,
    pub nominal_p: f64,
    /// Minimum non-missing values per group for a probe to be tested.
    pub min_group_size: usize,
    /// Minimum mutated patients (both groups together) for a gene to be tested.
    pub min_mutated: usize,
    pub min_events: usize,
    pub min_cox_samples: usize,
    /// Genes at or below this standard deviation are not screened.
    pub min_gene_std: f64,
    pub top_n: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            fdr_threshold: 0.1,
            strict_fdr: 0.05,
            nominal_p: 0.05,
            min_group_size: 10,
            min_mutated: 5,
            min_events: 10,
            min_cox_samples: 20,
            min_gene_std: 0.1,
            top_n: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub pathways: PathwayGenes,
    pub thresholds: Thresholds,
    /// IPI risk group label -> ordinal covariate.
    pub ipi_map: BTreeMap<String, f64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let ipi_map = [
            ("Low", 0.0),
            ("Low-Intermediate", 1.0),
            ("High-Intermediate", 2.0),
            ("High", 3.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            pathways: PathwayGenes::default(),
            thresholds: Thresholds::default(),
            ipi_map,
        }
    }
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Configuration file not found: {}", path.display()))?;
        let config: Self = serde_json::from_reader(file)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Use the file when given, otherwise the built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Wrote configuration to {}", path.display());
        Ok(())
    }

    pub fn ipi_numeric(&self, group: &str) -> Option<f64> {
        self.ipi_map.get(group.trim()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"thresholds": {"min_group_size": 5}}"#).unwrap();

        let cfg = AnalysisConfig::load(&path).unwrap();
        assert_eq!(cfg.thresholds.min_group_size, 5);
        assert_eq!(cfg.thresholds.min_mutated, 5);
        assert_eq!(cfg.pathways.egress, vec!["CXCR4".to_string()]);
        assert_eq!(cfg.ipi_numeric("High-Intermediate"), Some(2.0));
        assert_eq!(cfg.ipi_numeric("unknown"), None);
    }

    #[test]
    fn written_config_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/config.json");
        AnalysisConfig::default().write(&path).unwrap();
        let cfg = AnalysisConfig::load(&path).unwrap();
        assert_eq!(cfg.pathways.retention.len(), 7);
        assert_eq!(cfg.thresholds.top_n, 30);
    }
}
