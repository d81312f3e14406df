//! File input and output: pairwise matrices in, step records out.

pub mod export;
/// Pairwise comparison matrices stored as CSV.
pub mod matrix;
