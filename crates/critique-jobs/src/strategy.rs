//! Strategy resolution with fallback.
//!
//! The four analysis modes form a static table: each names what it needs
//! (reference profiles, a fine-tuned adapter, both, or nothing) and which
//! mode to fall back to. Resolution walks that chain from the requested mode
//! until it reaches one whose needs are met:
//!
//! ```text
//! rag_lora → lora → rag → baseline
//! ```
//!
//! Only the needs that appear along the chain are checked. Adapter presence
//! is cached per advisor in a bounded LRU with a TTL; reference presence is
//! always read fresh because a single import can change it.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use critique_core::defaults::{STRATEGY_CACHE_SIZE, STRATEGY_CACHE_TTL_SECS};
use critique_core::{AnalysisMode, Error, ProfileRepository, Result};
use critique_inference::ExclusiveEngine;

/// Environment variable overriding the adapter cache size.
pub const ENV_STRATEGY_CACHE_SIZE: &str = "CRITIQUE_STRATEGY_CACHE_SIZE";

/// Environment variable overriding the adapter cache TTL.
pub const ENV_STRATEGY_CACHE_TTL_SECS: &str = "CRITIQUE_STRATEGY_CACHE_TTL_SECS";

/// What a mode needs before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirements {
    pub references: bool,
    pub adapter: bool,
}

impl Requirements {
    pub fn of(mode: AnalysisMode) -> Self {
        Self {
            references: mode.uses_retrieval(),
            adapter: mode.uses_adapter(),
        }
    }
}

/// Checked preconditions for one advisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Availability {
    pub references: bool,
    pub adapter: bool,
}

impl Availability {
    pub fn satisfies(&self, mode: AnalysisMode) -> bool {
        let needs = Requirements::of(mode);
        (!needs.references || self.references) && (!needs.adapter || self.adapter)
    }
}

/// Outcome of resolving a requested mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub requested: AnalysisMode,
    pub effective: AnalysisMode,
    pub fell_back: bool,
    /// Modes tried, in order, ending with `effective`.
    pub visited: Vec<AnalysisMode>,
}

/// Every mode reachable from `requested`, in chain order.
pub fn fallback_chain(requested: AnalysisMode) -> Vec<AnalysisMode> {
    let mut chain = vec![requested];
    let mut current = requested;
    while let Some(next) = current.fallback() {
        if chain.contains(&next) {
            break;
        }
        chain.push(next);
        current = next;
    }
    chain
}

/// Walk the fallback chain from `requested` against known availability.
///
/// Fails with [`Error::NoStrategyAvailable`] if the chain runs out or
/// revisits a mode.
pub fn resolve(
    requested: AnalysisMode,
    availability: &Availability,
    advisor_id: &str,
) -> Result<Resolution> {
    let mut visited = Vec::new();
    let mut current = Some(requested);

    while let Some(mode) = current {
        if visited.contains(&mode) {
            break;
        }
        visited.push(mode);
        if availability.satisfies(mode) {
            return Ok(Resolution {
                requested,
                effective: mode,
                fell_back: mode != requested,
                visited,
            });
        }
        current = mode.fallback();
    }

    Err(Error::NoStrategyAvailable {
        mode: requested.to_string(),
        advisor_id: advisor_id.to_string(),
    })
}

/// Adapter cache sizing.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub cache_size: usize,
    pub cache_ttl: Duration,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            cache_size: STRATEGY_CACHE_SIZE,
            cache_ttl: Duration::from_secs(STRATEGY_CACHE_TTL_SECS),
        }
    }
}

impl StrategyConfig {
    pub fn from_env() -> Self {
        let cache_size = std::env::var(ENV_STRATEGY_CACHE_SIZE)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(STRATEGY_CACHE_SIZE);
        let ttl_secs = std::env::var(ENV_STRATEGY_CACHE_TTL_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(STRATEGY_CACHE_TTL_SECS);
        Self {
            cache_size,
            cache_ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedAdapter {
    present: bool,
    checked_at: Instant,
}

/// Resolves requested modes against live availability.
pub struct StrategyResolver {
    profiles: Arc<dyn ProfileRepository>,
    engine: Arc<ExclusiveEngine>,
    adapter_cache: Mutex<LruCache<String, CachedAdapter>>,
    cache_ttl: Duration,
}

impl StrategyResolver {
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        engine: Arc<ExclusiveEngine>,
        config: StrategyConfig,
    ) -> Self {
        let size = NonZeroUsize::new(config.cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            profiles,
            engine,
            adapter_cache: Mutex::new(LruCache::new(size)),
            cache_ttl: config.cache_ttl,
        }
    }

    /// Resolve `requested` for an advisor, excluding the query image itself
    /// from the reference count.
    pub async fn resolve(
        &self,
        requested: AnalysisMode,
        advisor_id: &str,
        image_path: &str,
    ) -> Result<Resolution> {
        let chain = fallback_chain(requested);
        let mut availability = Availability::default();

        if chain.iter().any(|m| m.uses_adapter()) {
            availability.adapter = self.adapter_available(advisor_id).await?;
        }
        // References matter only if a retrieval mode comes before the first
        // mode that is already satisfied.
        let mut needs_references = false;
        for mode in &chain {
            if mode.uses_retrieval() {
                needs_references = true;
                break;
            }
            if availability.satisfies(*mode) {
                break;
            }
        }
        if needs_references {
            let count = self
                .profiles
                .count_references(advisor_id, &[image_path.to_string()])
                .await?;
            availability.references = count > 0;
        }

        let resolution = resolve(requested, &availability, advisor_id)?;
        if resolution.fell_back {
            warn!(
                subsystem = "jobs",
                component = "strategy",
                advisor_id = %advisor_id,
                mode_requested = %requested,
                mode_effective = %resolution.effective,
                references = availability.references,
                adapter = availability.adapter,
                "Requested strategy unavailable, falling back"
            );
        } else {
            debug!(
                subsystem = "jobs",
                component = "strategy",
                advisor_id = %advisor_id,
                mode = %requested,
                "Requested strategy available"
            );
        }
        Ok(resolution)
    }

    async fn adapter_available(&self, advisor_id: &str) -> Result<bool> {
        {
            let mut cache = self.adapter_cache.lock().await;
            if let Some(entry) = cache.get(advisor_id) {
                if entry.checked_at.elapsed() < self.cache_ttl {
                    return Ok(entry.present);
                }
            }
        }

        let present = self.engine.has_adapter(advisor_id).await?;
        let mut cache = self.adapter_cache.lock().await;
        cache.put(
            advisor_id.to_string(),
            CachedAdapter {
                present,
                checked_at: Instant::now(),
            },
        );
        Ok(present)
    }

    /// Drop the cached adapter answer for an advisor (after training a new one).
    pub async fn invalidate(&self, advisor_id: &str) {
        self.adapter_cache.lock().await.pop(advisor_id);
    }

    pub async fn cached_advisors(&self) -> usize {
        self.adapter_cache.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use critique_core::{DimensionScores, UpsertProfileRequest};
    use critique_db::MemoryProfileRepository;
    use critique_inference::mock::MockInferenceEngine;

    const ALL_AVAILABILITY: [Availability; 4] = [
        Availability { references: false, adapter: false },
        Availability { references: true, adapter: false },
        Availability { references: false, adapter: true },
        Availability { references: true, adapter: true },
    ];

    #[test]
    fn test_resolution_always_terminates_on_available_mode() {
        for availability in ALL_AVAILABILITY {
            for mode in AnalysisMode::ALL {
                let r = resolve(mode, &availability, "a").unwrap();
                assert!(availability.satisfies(r.effective));
                assert_eq!(r.visited.last(), Some(&r.effective));
                let unique: HashSet<AnalysisMode> = r.visited.iter().copied().collect();
                assert_eq!(unique.len(), r.visited.len(), "chain repeated a mode");
                assert_eq!(r.fell_back, r.effective != mode);
            }
        }
    }

    #[test]
    fn test_rag_without_references_falls_back_to_baseline() {
        let r = resolve(AnalysisMode::Rag, &Availability::default(), "a").unwrap();
        assert_eq!(r.effective, AnalysisMode::Baseline);
        assert!(r.fell_back);
    }

    #[test]
    fn test_rag_lora_passes_through_lora() {
        let only_adapter = Availability {
            references: false,
            adapter: true,
        };
        let r = resolve(AnalysisMode::RagLora, &only_adapter, "a").unwrap();
        assert_eq!(r.effective, AnalysisMode::Lora);
        assert_eq!(r.visited, vec![AnalysisMode::RagLora, AnalysisMode::Lora]);

        let only_refs = Availability {
            references: true,
            adapter: false,
        };
        let r = resolve(AnalysisMode::RagLora, &only_refs, "a").unwrap();
        assert_eq!(r.effective, AnalysisMode::Rag);

        let r = resolve(AnalysisMode::RagLora, &Availability::default(), "a").unwrap();
        assert_eq!(r.effective, AnalysisMode::Baseline);
        assert_eq!(r.visited.len(), 4);
    }

    #[test]
    fn test_fallback_chain() {
        assert_eq!(
            fallback_chain(AnalysisMode::RagLora),
            vec![
                AnalysisMode::RagLora,
                AnalysisMode::Lora,
                AnalysisMode::Rag,
                AnalysisMode::Baseline
            ]
        );
        assert_eq!(fallback_chain(AnalysisMode::Baseline), vec![AnalysisMode::Baseline]);
    }

    async fn resolver_with(
        mock: MockInferenceEngine,
        references: &[&str],
    ) -> (StrategyResolver, Arc<MemoryProfileRepository>) {
        resolver_with_config(mock, references, StrategyConfig::default()).await
    }

    async fn resolver_with_config(
        mock: MockInferenceEngine,
        references: &[&str],
        config: StrategyConfig,
    ) -> (StrategyResolver, Arc<MemoryProfileRepository>) {
        let profiles = Arc::new(MemoryProfileRepository::new());
        for path in references {
            profiles
                .put(UpsertProfileRequest {
                    advisor_id: "ansel_adams".into(),
                    image_path: path.to_string(),
                    scores: DimensionScores::uniform(7.0),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let engine = Arc::new(ExclusiveEngine::new(Arc::new(mock)));
        (
            StrategyResolver::new(profiles.clone(), engine, config),
            profiles,
        )
    }

    #[tokio::test]
    async fn test_resolver_uses_live_reference_count() {
        let (resolver, profiles) = resolver_with(MockInferenceEngine::new(), &[]).await;
        let r = resolver
            .resolve(AnalysisMode::Rag, "ansel_adams", "/up/q.jpg")
            .await
            .unwrap();
        assert_eq!(r.effective, AnalysisMode::Baseline);

        profiles
            .put(UpsertProfileRequest {
                advisor_id: "ansel_adams".into(),
                image_path: "/ref/1.jpg".into(),
                scores: DimensionScores::uniform(7.0),
                ..Default::default()
            })
            .await
            .unwrap();
        let r = resolver
            .resolve(AnalysisMode::Rag, "ansel_adams", "/up/q.jpg")
            .await
            .unwrap();
        assert_eq!(r.effective, AnalysisMode::Rag);
        assert!(!r.fell_back);
    }

    #[tokio::test]
    async fn test_resolver_excludes_query_image_from_reference_count() {
        let (resolver, _) = resolver_with(MockInferenceEngine::new(), &["/ref/1.jpg"]).await;
        let r = resolver
            .resolve(AnalysisMode::Rag, "ansel_adams", "/ref/1.jpg")
            .await
            .unwrap();
        assert_eq!(r.effective, AnalysisMode::Baseline);
    }

    #[tokio::test]
    async fn test_resolver_with_adapter_and_references() {
        let (resolver, _) = resolver_with(
            MockInferenceEngine::new().with_adapter("ansel_adams"),
            &["/ref/1.jpg"],
        )
        .await;
        let r = resolver
            .resolve(AnalysisMode::RagLora, "ansel_adams", "/up/q.jpg")
            .await
            .unwrap();
        assert_eq!(r.effective, AnalysisMode::RagLora);
        assert!(!r.fell_back);
        assert_eq!(resolver.cached_advisors().await, 1);
    }

    #[tokio::test]
    async fn test_adapter_cache_is_bounded() {
        let config = StrategyConfig::default()
            .with_cache_size(2)
            .with_cache_ttl(Duration::from_secs(60));
        let (resolver, _) = resolver_with_config(MockInferenceEngine::new(), &[], config).await;
        for advisor in ["a", "b", "c"] {
            resolver
                .resolve(AnalysisMode::Lora, advisor, "/up/q.jpg")
                .await
                .unwrap();
        }
        assert_eq!(resolver.cached_advisors().await, 2);
        resolver.invalidate("c").await;
        assert_eq!(resolver.cached_advisors().await, 1);
    }

    #[tokio::test]
    async fn test_baseline_checks_nothing() {
        let (resolver, _) = resolver_with(MockInferenceEngine::new(), &[]).await;
        let r = resolver
            .resolve(AnalysisMode::Baseline, "ansel_adams", "/up/q.jpg")
            .await
            .unwrap();
        assert_eq!(r.effective, AnalysisMode::Baseline);
        assert_eq!(resolver.cached_advisors().await, 0);
    }
}
