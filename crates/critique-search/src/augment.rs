//! Comparative context for retrieval-augmented critique.
//!
//! Pure text assembly: the same inputs always yield the same prompt. Scores
//! are printed with one decimal and dimensions walk the canonical order, so
//! nothing depends on map iteration or float formatting quirks.

use std::fmt::Write as _;

use serde::Serialize;

use critique_core::{Dimension, DimensionalProfile, ReferenceUsed, SimilarityResult};

/// Deltas smaller than this read as "even".
pub const EVEN_THRESHOLD: f64 = 0.05;

/// Augmented prompt plus the references it was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AugmentedPrompt {
    pub prompt: String,
    pub references: Vec<ReferenceUsed>,
}

/// Builds comparative context from retrieved references.
#[derive(Debug, Clone)]
pub struct ContextAugmenter {
    /// Include the reference's per-dimension commentary.
    include_comments: bool,
}

impl Default for ContextAugmenter {
    fn default() -> Self {
        Self {
            include_comments: true,
        }
    }
}

impl ContextAugmenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_comments(mut self, include: bool) -> Self {
        self.include_comments = include;
        self
    }

    /// Append the comparison and the per-dimension instruction block to
    /// `base_prompt`.
    pub fn augment(
        &self,
        base_prompt: &str,
        query: &DimensionalProfile,
        similar: &[SimilarityResult],
    ) -> AugmentedPrompt {
        let mut out = String::with_capacity(base_prompt.len() + 1024 * (similar.len() + 1));
        out.push_str(base_prompt.trim_end());
        out.push_str("\n\n");

        self.write_query(&mut out, query);
        for (i, result) in similar.iter().enumerate() {
            self.write_reference(&mut out, i + 1, query, result);
        }
        write_instructions(&mut out, similar.len());

        AugmentedPrompt {
            prompt: out,
            references: similar.iter().map(ReferenceUsed::from).collect(),
        }
    }

    fn write_query(&self, out: &mut String, query: &DimensionalProfile) {
        out.push_str("## The photograph under review\n");
        for (dim, score) in query.scores.iter() {
            match score {
                Some(v) => {
                    let _ = writeln!(out, "- {}: {:.1}", dim.label(), v);
                }
                None => {
                    let _ = writeln!(out, "- {}: not assessed", dim.label());
                }
            }
        }
        let _ = writeln!(
            out,
            "Techniques observed: {}\n",
            join_or_none(query.metadata.technique_tags.iter().map(String::as_str))
        );
    }

    fn write_reference(
        &self,
        out: &mut String,
        index: usize,
        query: &DimensionalProfile,
        result: &SimilarityResult,
    ) {
        let reference = &result.profile;
        let meta = &reference.metadata;

        let _ = write!(
            out,
            "## Reference {}: {}",
            index,
            meta.title.as_deref().unwrap_or("Untitled")
        );
        let place_and_date: Vec<&str> = [meta.date.as_deref(), meta.location.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if !place_and_date.is_empty() {
            let _ = write!(out, " ({})", place_and_date.join(", "));
        }
        let _ = writeln!(out, "\nSimilarity distance: {:.2}", result.distance);
        if let Some(significance) = meta.significance.as_deref() {
            let _ = writeln!(out, "Significance: {}", significance);
        }

        for dim in Dimension::ALL {
            let _ = write!(out, "- {}: ", dim.label());
            match (reference.scores.get(dim), result.deltas.get(&dim)) {
                (Some(r), Some(delta)) => {
                    let q = r - delta;
                    let _ = write!(out, "{:.1} vs yours {:.1}, {}", r, q, direction(*delta));
                }
                (Some(r), None) => {
                    let _ = write!(out, "{:.1}, not comparable", r);
                }
                (None, _) => out.push_str("not assessed"),
            }
            if self.include_comments {
                if let Some(comment) = reference.comments.get(&dim) {
                    let _ = write!(out, ". Note: {}", comment.trim());
                }
            }
            out.push('\n');
        }

        let ref_tags = &meta.technique_tags;
        let query_tags = &query.metadata.technique_tags;
        let _ = writeln!(
            out,
            "Shared techniques: {}",
            join_or_none(result.shared_techniques.iter().map(String::as_str))
        );
        let _ = writeln!(
            out,
            "Reference-only techniques: {}",
            join_or_none(ref_tags.difference(query_tags).map(String::as_str))
        );
        let _ = writeln!(
            out,
            "Techniques only in yours: {}\n",
            join_or_none(query_tags.difference(ref_tags).map(String::as_str))
        );
    }
}

/// Directional phrase for a `reference - query` delta.
pub fn direction(delta: f64) -> String {
    if delta.abs() < EVEN_THRESHOLD {
        "even".to_string()
    } else if delta > 0.0 {
        format!("reference stronger by {:.1}", delta)
    } else {
        format!("query stronger by {:.1}", -delta)
    }
}

fn join_or_none<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let joined: Vec<&str> = items.collect();
    if joined.is_empty() {
        "none recorded".to_string()
    } else {
        joined.join(", ")
    }
}

fn write_instructions(out: &mut String, reference_count: usize) {
    out.push_str("## How to critique\n");
    let _ = writeln!(
        out,
        "Compare the photograph under review with the {} reference{} above. For each \
         dimension ({}), give:",
        reference_count,
        if reference_count == 1 { "" } else { "s" },
        Dimension::ALL
            .iter()
            .map(|d| d.label())
            .collect::<Vec<_>>()
            .join(", ")
    );
    out.push_str(
        "1. user_technique: what the photographer did in this dimension\n\
         2. reference_technique: how the closest reference handled the same dimension\n\
         3. execution_gap: the concrete difference in execution between the two\n\
         4. recommendation: one specific change that would close the gap\n\
         Ground every statement in the scores and techniques listed; do not invent references.\n",
    );
}
