use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use retrieval_pipeline::SearchGateway;

#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<SearchGateway>,
    requests: Arc<AtomicU64>,
}

impl ApiState {
    pub fn new(gateway: Arc<SearchGateway>) -> Self {
        Self {
            gateway,
            requests: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count one search request and return the running total.
    pub fn record_request(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed).saturating_add(1)
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}
