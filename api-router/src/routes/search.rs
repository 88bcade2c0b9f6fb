use std::num::IntErrorKind;

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SearchParams {
    pub query: Option<String>,
    pub k: Option<String>,
}

impl SearchParams {
    /// The first occurrence of a repeated parameter wins; unknown keys are ignored.
    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "query" if params.query.is_none() => params.query = Some(value),
                "k" if params.k.is_none() => params.k = Some(value),
                _ => {}
            }
        }
        params
    }

    /// Unparseable values are treated as absent. Integers too large for
    /// `i64` saturate so they still clamp like any other out-of-range `k`.
    fn k(&self) -> Option<i64> {
        let raw = self.k.as_deref()?.trim();
        match raw.parse::<i64>() {
            Ok(value) => Some(value),
            Err(err) => match err.kind() {
                IntErrorKind::PosOverflow => Some(i64::MAX),
                IntErrorKind::NegOverflow => Some(i64::MIN),
                _ => None,
            },
        }
    }
}

pub async fn search(
    State(state): State<ApiState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let count = state.record_request();
    info!(count, "API request count");

    let params = SearchParams::from_pairs(pairs);
    let response = state
        .gateway
        .search(params.query.as_deref(), params.k())
        .await?;

    Ok(Json(&*response).into_response())
}
