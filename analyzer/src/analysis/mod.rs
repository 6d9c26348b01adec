pub mod differential_expression;
pub mod mutation_association;
pub mod plots;
pub mod reporting;
pub mod signature;
pub mod survival_analysis;
