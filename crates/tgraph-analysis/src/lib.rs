//! Analyses over tgraph modules.

pub mod dominator;

pub use dominator::{DominatorInfo, compute_dominator, compute_post_dominator};
