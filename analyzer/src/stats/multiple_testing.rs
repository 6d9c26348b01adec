//! Benjamini–Hochberg false discovery rate.

use std::cmp::Ordering;

/// BH q-values in input order.
///
/// `q[i] = min(p[i] * n / rank[i], q[i + 1])`, capped at 1. NaN p-values are left
/// out of `n` and come back as NaN.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let mut q_values = vec![f64::NAN; p_values.len()];

    let mut indices: Vec<usize> = (0..p_values.len())
        .filter(|&i| !p_values[i].is_nan())
        .collect();
    let n = indices.len();
    if n == 0 {
        return q_values;
    }
    indices.sort_by(|&a, &b| {
        p_values[a]
            .partial_cmp(&p_values[b])
            .unwrap_or(Ordering::Equal)
    });

    // Work backwards from the largest p-value
    let mut running = f64::INFINITY;
    for (pos, &idx) in indices.iter().enumerate().rev() {
        let rank = (pos + 1) as f64;
        let adjusted = p_values[idx] * n as f64 / rank;
        running = running.min(adjusted).min(1.0);
        q_values[idx] = running;
    }
    q_values
}

/// Number of q-values strictly below `alpha`.
pub fn n_significant(q_values: &[f64], alpha: f64) -> usize {
    q_values.iter().filter(|&&q| q < alpha).count()
}
