//! Nearest-reference retrieval over dimensional profiles.
//!
//! Two ranking modes, never blended within one call:
//!
//! 1. **Technique**: when the query carries technique tags, candidates sharing
//!    at least one tag are ranked by overlap size (descending), then distance.
//! 2. **Distance**: otherwise, or when no candidate shares a tag, candidates
//!    are ranked by Euclidean distance over the dimensions both sides scored.
//!
//! Remaining ties keep the store's creation order, so the earlier reference
//! wins and output is deterministic.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use critique_core::defaults::SIMILAR_K_MAX;
use critique_core::{
    Dimension, DimensionScores, DimensionalProfile, Error, ProfileRepository, Result,
    SimilarityResult,
};

/// Which ranking produced a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    Technique,
    Distance,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Technique => "technique",
            RetrievalMode::Distance => "distance",
        }
    }
}

/// Euclidean distance over dimensions scored on both sides.
///
/// `None` when the two share no scored dimension.
pub fn distance(query: &DimensionScores, reference: &DimensionScores) -> Option<f64> {
    let mut sum = 0.0;
    let mut shared = 0usize;
    for dim in Dimension::ALL {
        if let (Some(q), Some(r)) = (query.get(dim), reference.get(dim)) {
            sum += (r - q).powi(2);
            shared += 1;
        }
    }
    (shared > 0).then(|| sum.sqrt())
}

/// `reference - query` for every dimension scored on both sides.
pub fn deltas(query: &DimensionScores, reference: &DimensionScores) -> BTreeMap<Dimension, f64> {
    Dimension::ALL
        .into_iter()
        .filter_map(|dim| match (query.get(dim), reference.get(dim)) {
            (Some(q), Some(r)) => Some((dim, r - q)),
            _ => None,
        })
        .collect()
}

/// Rank `candidates` (in creation order) against `query` and keep the top `k`.
///
/// Candidates at the query's own path and candidates with nothing comparable
/// are dropped first. Returns the mode that produced the ranking.
pub fn rank_candidates(
    query: &DimensionalProfile,
    candidates: Vec<DimensionalProfile>,
    k: usize,
) -> (RetrievalMode, Vec<SimilarityResult>) {
    let scored: Vec<SimilarityResult> = candidates
        .into_iter()
        .filter(|c| c.image_path != query.image_path)
        .filter_map(|c| {
            let d = distance(&query.scores, &c.scores)?;
            let shared_techniques = c
                .metadata
                .technique_tags
                .intersection(&query.metadata.technique_tags)
                .cloned()
                .collect();
            trace!(
                image_path = %c.image_path,
                distance = d,
                "Scored reference candidate"
            );
            Some(SimilarityResult {
                deltas: deltas(&query.scores, &c.scores),
                distance: d,
                shared_techniques,
                profile: c,
            })
        })
        .collect();

    let by_distance = |a: &SimilarityResult, b: &SimilarityResult| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
    };

    let mut overlapping: Vec<SimilarityResult> = scored
        .iter()
        .filter(|r| !r.shared_techniques.is_empty())
        .cloned()
        .collect();

    // sort_by is stable: equal keys keep creation order
    if !overlapping.is_empty() {
        overlapping.sort_by(|a, b| {
            b.shared_techniques
                .len()
                .cmp(&a.shared_techniques.len())
                .then_with(|| by_distance(a, b))
        });
        overlapping.truncate(k);
        return (RetrievalMode::Technique, overlapping);
    }

    let mut ranked = scored;
    ranked.sort_by(by_distance);
    ranked.truncate(k);
    (RetrievalMode::Distance, ranked)
}

/// Top-k reference lookup for an advisor.
#[derive(Clone)]
pub struct SimilarityEngine {
    profiles: Arc<dyn ProfileRepository>,
}

impl SimilarityEngine {
    pub fn new(profiles: Arc<dyn ProfileRepository>) -> Self {
        Self { profiles }
    }

    /// Up to `k` references most similar to `query`.
    ///
    /// Fails with [`Error::NoReferenceData`] rather than returning an empty
    /// list when nothing comparable remains after exclusion.
    pub async fn find_similar(
        &self,
        advisor_id: &str,
        query: &DimensionalProfile,
        k: usize,
    ) -> Result<Vec<SimilarityResult>> {
        if k == 0 {
            return Err(Error::Validation("k must be at least 1".into()));
        }
        let k = k.min(SIMILAR_K_MAX);
        let start = Instant::now();

        let candidates = self
            .profiles
            .scan(advisor_id, std::slice::from_ref(&query.image_path))
            .await?;
        let candidate_count = candidates.len();

        let (mode, results) = rank_candidates(query, candidates, k);

        debug!(
            subsystem = "search",
            component = "similarity",
            op = "find_similar",
            advisor_id = %advisor_id,
            candidate_count,
            result_count = results.len(),
            retrieval_mode = mode.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Reference retrieval complete"
        );

        if results.is_empty() {
            return Err(Error::NoReferenceData {
                advisor_id: advisor_id.to_string(),
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use critique_core::{new_v7, ProfileMetadata, UpsertProfileRequest};
    use critique_db::MemoryProfileRepository;

    fn scores(values: [f64; 8]) -> DimensionScores {
        let mut s = DimensionScores::default();
        for (dim, v) in Dimension::ALL.into_iter().zip(values) {
            s.set(dim, Some(v));
        }
        s
    }

    fn profile(path: &str, scores: DimensionScores, age_secs: i64) -> DimensionalProfile {
        let at = Utc::now() - Duration::seconds(age_secs);
        DimensionalProfile {
            id: new_v7(),
            advisor_id: "ansel_adams".into(),
            image_path: path.into(),
            scores,
            comments: BTreeMap::new(),
            metadata: ProfileMetadata::default(),
            overall_grade: None,
            working_set: false,
            created_at: at,
            updated_at: at,
        }
    }

    fn with_tags(mut p: DimensionalProfile, tags: &[&str]) -> DimensionalProfile {
        p.metadata = p.metadata.with_tags(tags.iter().copied());
        p
    }

    const QUERY: [f64; 8] = [8.0, 8.0, 9.0, 7.0, 7.0, 7.0, 8.0, 7.0];

    #[test]
    fn test_single_dimension_difference() {
        let query = scores(QUERY);
        let mut reference = query;
        reference.set(Dimension::Lighting, Some(9.0));

        assert_eq!(distance(&query, &reference), Some(1.0));
        let d = deltas(&query, &reference);
        assert_eq!(d[&Dimension::Lighting], 1.0);
        assert!(d
            .iter()
            .filter(|(dim, _)| **dim != Dimension::Lighting)
            .all(|(_, v)| *v == 0.0));
        assert_eq!(d.len(), 8);
    }

    #[test]
    fn test_identical_scores_have_zero_distance() {
        let a = scores(QUERY);
        assert_eq!(distance(&a, &a), Some(0.0));
    }

    #[test]
    fn test_null_dimensions_are_skipped() {
        let query = scores(QUERY);
        let mut reference = DimensionScores::default();
        reference.set(Dimension::Composition, Some(5.0));
        reference.set(Dimension::Focus, Some(9.0));

        assert_eq!(distance(&query, &reference), Some(3.0));
        let d = deltas(&query, &reference);
        assert_eq!(d.len(), 2);
        assert_eq!(d[&Dimension::Composition], -3.0);
    }

    #[test]
    fn test_all_null_candidate_is_incomparable() {
        assert_eq!(
            distance(&scores(QUERY), &DimensionScores::default()),
            None
        );
    }

    #[test]
    fn test_rank_excludes_query_path_and_null_candidates() {
        let query = profile("/up/q.jpg", scores(QUERY), 0);
        let candidates = vec![
            profile("/up/q.jpg", scores(QUERY), 30),
            profile("/ref/empty.jpg", DimensionScores::default(), 20),
            profile("/ref/far.jpg", DimensionScores::uniform(2.0), 10),
        ];

        let (mode, results) = rank_candidates(&query, candidates, 5);
        assert_eq!(mode, RetrievalMode::Distance);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].profile.image_path, "/ref/far.jpg");
    }

    #[test]
    fn test_rank_by_distance_ascending_with_creation_tie_break() {
        let query = profile("/up/q.jpg", scores(QUERY), 0);
        let mut near = scores(QUERY);
        near.set(Dimension::Color, Some(8.0));
        let candidates = vec![
            profile("/ref/old_far.jpg", DimensionScores::uniform(1.0), 40),
            profile("/ref/older_near.jpg", near, 30),
            profile("/ref/newer_near.jpg", near, 20),
        ];

        let (_, results) = rank_candidates(&query, candidates, 2);
        let paths: Vec<_> = results.iter().map(|r| r.profile.image_path.as_str()).collect();
        assert_eq!(paths, vec!["/ref/older_near.jpg", "/ref/newer_near.jpg"]);
        assert!(results[0].distance <= results[1].distance);
    }

    #[test]
    fn test_technique_overlap_takes_precedence() {
        let query = with_tags(
            profile("/up/q.jpg", scores(QUERY), 0),
            &["zone_system", "long_exposure"],
        );
        let candidates = vec![
            profile("/ref/closest.jpg", scores(QUERY), 40),
            with_tags(
                profile("/ref/one_tag.jpg", DimensionScores::uniform(3.0), 30),
                &["zone_system"],
            ),
            with_tags(
                profile("/ref/two_tags.jpg", DimensionScores::uniform(1.0), 20),
                &["zone_system", "long_exposure"],
            ),
        ];

        let (mode, results) = rank_candidates(&query, candidates, 3);
        assert_eq!(mode, RetrievalMode::Technique);
        let paths: Vec<_> = results.iter().map(|r| r.profile.image_path.as_str()).collect();
        // Only overlapping candidates; modes are not mixed.
        assert_eq!(paths, vec!["/ref/two_tags.jpg", "/ref/one_tag.jpg"]);
        assert_eq!(
            results[0].shared_techniques,
            vec!["long_exposure".to_string(), "zone_system".to_string()]
        );
    }

    #[test]
    fn test_no_overlap_falls_back_to_distance() {
        let query = with_tags(profile("/up/q.jpg", scores(QUERY), 0), &["pinhole"]);
        let candidates = vec![
            with_tags(
                profile("/ref/a.jpg", DimensionScores::uniform(5.0), 20),
                &["zone_system"],
            ),
            profile("/ref/b.jpg", scores(QUERY), 10),
        ];

        let (mode, results) = rank_candidates(&query, candidates, 3);
        assert_eq!(mode, RetrievalMode::Distance);
        assert_eq!(results[0].profile.image_path, "/ref/b.jpg");
        assert_eq!(results.len(), 2);
    }

    async fn store_with(refs: &[(&str, DimensionScores, bool)]) -> Arc<MemoryProfileRepository> {
        let repo = Arc::new(MemoryProfileRepository::new());
        for (path, scores, working_set) in refs {
            repo.put(UpsertProfileRequest {
                advisor_id: "ansel_adams".into(),
                image_path: path.to_string(),
                scores: *scores,
                working_set: *working_set,
                ..Default::default()
            })
            .await
            .unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn test_find_similar_never_returns_query_or_working_set() {
        let repo = store_with(&[
            ("/up/q.jpg", scores(QUERY), true),
            ("/up/earlier.jpg", scores(QUERY), true),
            ("/ref/1.jpg", DimensionScores::uniform(6.0), false),
        ])
        .await;
        let engine = SimilarityEngine::new(repo.clone());
        let query = repo.get("ansel_adams", "/up/q.jpg").await.unwrap().unwrap();

        let results = engine.find_similar("ansel_adams", &query, 3).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].profile.image_path, "/ref/1.jpg");
    }

    #[tokio::test]
    async fn test_find_similar_empty_pool_is_no_reference_data() {
        let repo = store_with(&[("/up/q.jpg", scores(QUERY), true)]).await;
        let engine = SimilarityEngine::new(repo.clone());
        let query = repo.get("ansel_adams", "/up/q.jpg").await.unwrap().unwrap();

        let err = engine
            .find_similar("ansel_adams", &query, 3)
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::NoReferenceData { ref advisor_id } if advisor_id == "ansel_adams")
        );
    }

    #[tokio::test]
    async fn test_find_similar_rejects_zero_k() {
        let repo = store_with(&[]).await;
        let engine = SimilarityEngine::new(repo);
        let query = profile("/up/q.jpg", scores(QUERY), 0);
        assert!(matches!(
            engine.find_similar("ansel_adams", &query, 0).await,
            Err(Error::Validation(_))
        ));
    }
}
