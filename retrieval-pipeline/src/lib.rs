//! Query-time retrieval: the narrow backend interface, the concrete dense
//! index behind it, and the cached gateway that turns backend hits into
//! ranked, probability-annotated search responses.

pub mod backend;
pub mod cache;
pub mod collection;
pub mod dense;
pub mod gateway;
pub mod scoring;

pub use backend::{BackendHit, BackendInfo, RetrievalBackend};
pub use cache::QueryCache;
pub use collection::Collection;
pub use dense::{DenseIndex, DenseIndexOptions, IndexManifest};
pub use gateway::{
    clamp_k, GatewayStats, SearchGateway, SearchHit, SearchResponse, DEFAULT_K, MAX_K,
};
