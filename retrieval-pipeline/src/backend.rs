use async_trait::async_trait;
use common::error::AppError;
use serde::Serialize;

/// One candidate returned by a retrieval backend, in the backend's own order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendHit {
    pub pid: u64,
    pub rank: usize,
    pub score: f32,
}

/// Static facts about an opened index, reported by the readiness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendInfo {
    pub index_name: String,
    pub passages: usize,
    pub collection_loaded: bool,
}

/// The narrow surface the search gateway needs from an index.
///
/// Implementations must be safe to call from many request handlers at once.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Return up to `max_results` hits for `query`, best first.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<BackendHit>, AppError>;

    /// Passage text for `pid`, if a collection is attached.
    fn lookup_text(&self, pid: u64) -> Option<String>;

    fn describe(&self) -> BackendInfo;
}
