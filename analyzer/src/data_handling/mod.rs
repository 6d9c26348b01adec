pub mod annotation;
pub mod cbioportal;
pub mod clinical;
pub mod expression;
pub mod mutations;
pub mod series_matrix;
