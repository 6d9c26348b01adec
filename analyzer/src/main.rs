use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    ClassifyArgs, DeStageArgs, FetchArgs, GeneSurvivalArgs, MortalityArgs, MutationStageArgs, RunContext,
    SignatureArgs, TegressArgs,
};
use crate::config::AnalysisConfig;
use crate::helper_functions::resolve_path;

mod analysis;
mod commands;
mod config;
mod data_handling;
mod helper_functions;
mod models;
mod stats;

/// DLBCL stage, survival and mutation analyses on GEO and cBioPortal cohorts.
#[derive(Parser)]
#[command(name = "analyzer", version)]
struct Cli {
    /// JSON configuration (pathway genes, thresholds, IPI map); defaults when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output directory for CSV tables and plots
    #[arg(short, long, global = true, default_value = "results")]
    out: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage I vs Stage III/IV differential expression, whole cohort and per COO
    DeStage(DeStageArgs),

    /// Dead vs Alive differential expression, whole cohort and per COO
    Mortality(MortalityArgs),

    /// Fisher test of every mutated gene against Limited/Advanced stage
    MutationsByStage(MutationStageArgs),

    /// LoF/GoF classification of pathway mutations and per-sample LoF burden
    ClassifyMutations(ClassifyArgs),

    /// Download mutations and clinical attributes from cBioPortal
    FetchCbioportal(FetchArgs),

    /// Per-gene Cox screen adjusted for IPI, globally and per LymphGen subtype
    GeneSurvival(GeneSurvivalArgs),

    /// Multi-gene prognostic score, its Cox models and risk-group survival
    PrognosticSignature(SignatureArgs),

    /// tEgress score and its quartile / High-Low survival
    Tegress(TegressArgs),

    /// Write the default configuration as JSON
    WriteConfig {
        /// Destination file
        #[arg(default_value = "analysis_config.json")]
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::WriteConfig { path } = &cli.command {
        return AnalysisConfig::default().write(&resolve_path(path));
    }

    let config_path = cli.config.as_deref().map(resolve_path);
    let ctx = RunContext {
        config: AnalysisConfig::load_or_default(config_path.as_deref())?,
        out: resolve_path(&cli.out),
    };
    std::fs::create_dir_all(&ctx.out)?;
    info!("Writing results to {}", ctx.out.display());

    match cli.command {
        Commands::DeStage(args) => commands::de_stage(&ctx, &args),
        Commands::Mortality(args) => commands::mortality(&ctx, &args),
        Commands::MutationsByStage(args) => commands::mutations_by_stage(&ctx, &args),
        Commands::ClassifyMutations(args) => commands::classify(&ctx, &args),
        Commands::FetchCbioportal(args) => commands::fetch_cbioportal(&ctx, &args),
        Commands::GeneSurvival(args) => commands::gene_survival(&ctx, &args),
        Commands::PrognosticSignature(args) => commands::prognostic_signature(&ctx, &args),
        Commands::Tegress(args) => commands::tegress(&ctx, &args),
        Commands::WriteConfig { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "analyzer",
            "tegress",
            "--series-matrix",
            "GSE181063_series_matrix.txt.gz",
            "--annotation",
            "probes.csv",
            "--out",
            "tegress_out",
        ])
        .unwrap();
        assert_eq!(cli.out, PathBuf::from("tegress_out"));
        assert!(cli.config.is_none());
        assert!(matches!(cli.command, Commands::Tegress(_)));
    }

    #[test]
    fn write_config_has_a_default_path() {
        let cli = Cli::try_parse_from(["analyzer", "write-config"]).unwrap();
        match cli.command {
            Commands::WriteConfig { path } => assert_eq!(path, PathBuf::from("analysis_config.json")),
            _ => panic!("wrong subcommand"),
        }
    }
}
