use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use common::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    backend::{BackendInfo, RetrievalBackend},
    cache::QueryCache,
    scoring::{softmax, sort_by_score_desc},
};

pub const DEFAULT_K: usize = 10;
pub const MAX_K: usize = 100;

/// Missing or non-positive values fall back to [`DEFAULT_K`]; anything above
/// [`MAX_K`] is capped.
pub fn clamp_k(k: Option<i64>) -> usize {
    match k {
        Some(value) if value > 0 => usize::try_from(value).map_or(MAX_K, |v| v.min(MAX_K)),
        _ => DEFAULT_K,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub pid: u64,
    pub rank: usize,
    pub score: f32,
    pub prob: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub topk: Vec<SearchHit>,
}

impl SearchResponse {
    pub fn empty() -> Self {
        Self {
            query: String::new(),
            topk: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct GatewayStats {
    backend_calls: AtomicU64,
    cache_hits: AtomicU64,
}

impl GatewayStats {
    pub fn backend_calls(&self) -> u64 {
        self.backend_calls.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }
}

/// Cached front door to a retrieval backend.
///
/// Every miss asks the backend for [`MAX_K`] candidates, keeps the first `k`
/// in backend order, normalises their scores into probabilities over exactly
/// those `k`, then orders them by score.
pub struct SearchGateway {
    backend: Arc<dyn RetrievalBackend>,
    cache: QueryCache,
    stats: GatewayStats,
}

impl SearchGateway {
    pub fn new(backend: Arc<dyn RetrievalBackend>, cache: QueryCache) -> Self {
        Self {
            backend,
            cache,
            stats: GatewayStats::default(),
        }
    }

    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: Option<&str>,
        k: Option<i64>,
    ) -> Result<Arc<SearchResponse>, AppError> {
        let Some(query) = query else {
            return Ok(Arc::new(SearchResponse::empty()));
        };
        let k = clamp_k(k);
        info!(query, k, "Search query");

        if let Some(cached) = self.cache.get(query, k) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(query, k, "Serving search from cache");
            return Ok(cached);
        }

        self.stats.backend_calls.fetch_add(1, Ordering::Relaxed);
        let mut hits = self.backend.search(query, MAX_K).await?;
        hits.truncate(k);

        let scores: Vec<f32> = hits.iter().map(|hit| hit.score).collect();
        let probabilities = softmax(&scores);

        let mut topk: Vec<SearchHit> = hits
            .iter()
            .zip(probabilities)
            .map(|(hit, prob)| SearchHit {
                text: self.backend.lookup_text(hit.pid).unwrap_or_default(),
                pid: hit.pid,
                rank: hit.rank,
                score: hit.score,
                prob,
            })
            .collect();
        sort_by_score_desc(&mut topk);

        let response = Arc::new(SearchResponse {
            query: query.to_string(),
            topk,
        });
        self.cache.insert(query, k, Arc::clone(&response));
        Ok(response)
    }

    pub const fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    pub fn cached_queries(&self) -> usize {
        self.cache.len()
    }

    pub fn backend_info(&self) -> BackendInfo {
        self.backend.describe()
    }
}
