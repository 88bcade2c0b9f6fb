use std::cmp::Ordering;

use crate::gateway::SearchHit;

/// Softmax over exactly `scores`, shifted by the maximum for stability.
///
/// Falls back to all zeros when the normaliser is zero or not finite.
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores
        .iter()
        .copied()
        .filter(|score| score.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![0.0; scores.len()];
    }

    let exps: Vec<f32> = scores.iter().map(|score| (score - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    if total == 0.0 || !total.is_finite() {
        return vec![0.0; scores.len()];
    }

    exps.into_iter().map(|value| value / total).collect()
}

/// Descending score, ties broken by ascending passage id.
pub fn sort_by_score_desc(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.pid.cmp(&b.pid))
    });
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
