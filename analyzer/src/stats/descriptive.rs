//! Small summary statistics on slices. `_nan` variants skip NaN entries.

use std::cmp::Ordering;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| !v.is_nan()).collect()
}

pub fn mean_nan(values: &[f64]) -> Option<f64> {
    mean(&finite(values))
}

/// Variance with `ddof` delta degrees of freedom (0 = population, 1 = sample).
pub fn variance(values: &[f64], ddof: usize) -> Option<f64> {
    let n = values.len();
    if n <= ddof {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(ss / (n - ddof) as f64)
}

pub fn std(values: &[f64], ddof: usize) -> Option<f64> {
    variance(values, ddof).map(f64::sqrt)
}

pub fn std_nan(values: &[f64], ddof: usize) -> Option<f64> {
    std(&finite(values), ddof)
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = finite(values);
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    v
}

/// Linear-interpolated quantile, `p` in [0, 1].
pub fn quantile(values: &[f64], p: f64) -> Option<f64> {
    let v = sorted(values);
    quantile_sorted(&v, p)
}

fn quantile_sorted(v: &[f64], p: f64) -> Option<f64> {
    let n = v.len();
    if n == 0 {
        return None;
    }
    let pos = (n as f64 - 1.0) * p.clamp(0.0, 1.0);
    let idx = pos.floor() as usize;
    let frac = pos - idx as f64;
    if idx + 1 < n {
        Some(v[idx] * (1.0 - frac) + v[idx + 1] * frac)
    } else {
        Some(v[idx])
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Equal-frequency binning into `q` groups (0 = lowest). NaN values get `None`.
///
/// Edges are interpolated quantiles; the lowest edge is inclusive, every bin is
/// right-closed, so every value lands in exactly one bin.
pub fn qcut(values: &[f64], q: usize) -> Vec<Option<usize>> {
    let v = sorted(values);
    if q == 0 || v.is_empty() {
        return vec![None; values.len()];
    }
    let edges: Vec<f64> = (0..=q)
        .filter_map(|k| quantile_sorted(&v, k as f64 / q as f64))
        .collect();
    values
        .iter()
        .map(|&x| {
            if x.is_nan() {
                return None;
            }
            // first upper edge >= x
            (1..=q).find(|&k| x <= edges[k]).map(|k| k - 1)
        })
        .collect()
}

/// Z-score with the sample standard deviation; zero or undefined variance gives zeros.
/// NaN inputs stay NaN.
pub fn zscore(values: &[f64]) -> Vec<f64> {
    let m = mean_nan(values);
    let s = std_nan(values, 1);
    match (m, s) {
        (Some(m), Some(s)) if s > 0.0 => values.iter().map(|v| (v - m) / s).collect(),
        _ => values
            .iter()
            .map(|v| if v.is_nan() { f64::NAN } else { 0.0 })
            .collect(),
    }
}

/// Effect size (mean_b - mean_a) over the root mean of the two population variances.
pub fn cohens_d(a: &[f64], b: &[f64]) -> f64 {
    let (Some(ma), Some(mb), Some(va), Some(vb)) =
        (mean(a), mean(b), variance(a, 0), variance(b, 0))
    else {
        return 0.0;
    };
    let pooled = ((va + vb) / 2.0).sqrt();
    if pooled > 0.0 {
        (mb - ma) / pooled
    } else {
        0.0
    }
}

/// Ranks starting at 1; ties get the average rank.
fn rank_data(vals: &[f64]) -> Vec<f64> {
    let mut indexed: Vec<(usize, f64)> = vals.iter().cloned().enumerate().collect();
    indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; vals.len()];
    let mut i = 0;
    while i < indexed.len() {
        let mut j = i + 1;
        while j < indexed.len() && indexed[j].1 == indexed[i].1 {
            j += 1;
        }
        let avg_rank = (i + j + 1) as f64 / 2.0;
        for item in &indexed[i..j] {
            ranks[item.0] = avg_rank;
        }
        i = j;
    }
    ranks
}

pub fn pearson_correlation(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (a, b) in x.iter().zip(y) {
        cov += (a - mx) * (b - my);
        vx += (a - mx).powi(2);
        vy += (b - my).powi(2);
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
}

pub fn spearman_correlation(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() {
        return None;
    }
    pearson_correlation(&rank_data(x), &rank_data(y))
}
