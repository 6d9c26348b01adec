use polars::prelude::*;

/// Wrap any foreign error as a Polars compute error so loaders can stay on `PolarsResult`.
pub fn polars_err(e: Box<dyn std::error::Error + Send + Sync>) -> PolarsError {
    PolarsError::ComputeError(e.to_string().into())
}

/// Anything that can be materialised as a table.
pub trait Dataset {
    fn load(&self) -> PolarsResult<DataFrame>;
}

/// A named subset of samples (e.g. a cell-of-origin subtype or the whole cohort).
#[derive(Debug, Clone)]
pub struct SampleGroup {
    pub name: String,
    pub samples: Vec<String>,
}
