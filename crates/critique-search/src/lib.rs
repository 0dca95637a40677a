//! # critique-search
//!
//! Retrieval over dimensional profiles and the comparative context built
//! from what was retrieved.
//!
//! - [`similarity`]: top-k reference lookup by technique overlap, then by
//!   Euclidean distance over the eight rubric scores
//! - [`augment`]: deterministic prompt augmentation from retrieved references

pub mod augment;
pub mod similarity;

pub use augment::{AugmentedPrompt, ContextAugmenter};
pub use similarity::{deltas, distance, rank_candidates, RetrievalMode, SimilarityEngine};
