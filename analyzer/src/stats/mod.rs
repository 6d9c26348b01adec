pub mod cox;
pub mod descriptive;
pub mod fisher;
pub mod multiple_testing;
pub mod survival;
pub mod ttest;
