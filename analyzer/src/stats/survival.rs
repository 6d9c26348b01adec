//! Kaplan–Meier estimates and the log-rank test.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use ndarray::{Array1, Array2};
use ndarray_linalg::SolveC;
use statrs::distribution::{ChiSquared, ContinuousCDF};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KmStep {
    pub time: f64,
    pub survival: f64,
    pub at_risk: usize,
    pub events: usize,
}

#[derive(Debug, Clone)]
pub struct KaplanMeier {
    /// One step per distinct event time, ascending.
    pub steps: Vec<KmStep>,
    pub n: usize,
    pub n_events: usize,
    /// Largest observed time, event or censored.
    pub max_time: f64,
}

impl KaplanMeier {
    /// First time the curve drops to 0.5 or below; `None` when it never does.
    pub fn median_survival(&self) -> Option<f64> {
        self.steps.iter().find(|s| s.survival <= 0.5).map(|s| s.time)
    }

    /// Survival probability just after `t`.
    pub fn survival_at(&self, t: f64) -> f64 {
        self.steps
            .iter()
            .take_while(|s| s.time <= t)
            .last()
            .map_or(1.0, |s| s.survival)
    }
}

fn sorted_pairs(times: &[f64], events: &[bool]) -> Vec<(f64, bool)> {
    let mut pairs: Vec<(f64, bool)> = times
        .iter()
        .zip(events)
        .filter(|(t, _)| t.is_finite())
        .map(|(&t, &e)| (t, e))
        .collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
    pairs
}

/// Product-limit estimate. Non-finite times are ignored.
pub fn kaplan_meier(times: &[f64], events: &[bool]) -> KaplanMeier {
    let pairs = sorted_pairs(times, events);
    let n = pairs.len();
    let mut steps = Vec::new();
    let mut survival = 1.0;
    let mut at_risk = n;
    let mut i = 0;
    while i < n {
        let t = pairs[i].0;
        let mut d = 0;
        let mut j = i;
        while j < n && pairs[j].0 == t {
            if pairs[j].1 {
                d += 1;
            }
            j += 1;
        }
        if d > 0 {
            survival *= 1.0 - d as f64 / at_risk as f64;
            steps.push(KmStep { time: t, survival, at_risk, events: d });
        }
        at_risk -= j - i;
        i = j;
    }
    KaplanMeier {
        steps,
        n,
        n_events: pairs.iter().filter(|p| p.1).count(),
        max_time: pairs.last().map_or(0.0, |p| p.0),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LogRankResult {
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
}

/// Log-rank test across the distinct values of `groups`.
///
/// Returns `None` with fewer than two groups, no events, or a singular covariance
/// (e.g. a group that is never at risk when events happen).
pub fn logrank_test(times: &[f64], events: &[bool], groups: &[usize]) -> Option<LogRankResult> {
    if times.len() != events.len() || times.len() != groups.len() {
        return None;
    }
    let kept: Vec<(f64, bool, usize)> = times
        .iter()
        .zip(events)
        .zip(groups)
        .filter(|((t, _), _)| t.is_finite())
        .map(|((&t, &e), &g)| (t, e, g))
        .collect();

    // Groups present only through non-finite times do not count
    let labels: Vec<usize> = kept.iter().map(|r| r.2).collect::<BTreeSet<_>>().into_iter().collect();
    let k = labels.len();
    if k < 2 {
        return None;
    }
    let slot = |g: usize| labels.binary_search(&g).unwrap_or(0);
    let mut rows: Vec<(f64, bool, usize)> = kept.into_iter().map(|(t, e, g)| (t, e, slot(g))).collect();
    rows.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let mut at_risk = vec![0.0f64; k];
    for r in &rows {
        at_risk[r.2] += 1.0;
    }

    // Only the first k-1 groups are free
    let m = k - 1;
    let mut o_minus_e = Array1::<f64>::zeros(m);
    let mut cov = Array2::<f64>::zeros((m, m));
    let mut total_events = 0usize;

    let mut i = 0;
    while i < rows.len() {
        let t = rows[i].0;
        let mut j = i;
        let mut deaths = vec![0.0f64; k];
        let mut leaving = vec![0.0f64; k];
        while j < rows.len() && rows[j].0 == t {
            if rows[j].1 {
                deaths[rows[j].2] += 1.0;
            }
            leaving[rows[j].2] += 1.0;
            j += 1;
        }
        let d: f64 = deaths.iter().sum();
        let n: f64 = at_risk.iter().sum();
        if d > 0.0 {
            total_events += d as usize;
            for a in 0..m {
                o_minus_e[a] += deaths[a] - d * at_risk[a] / n;
            }
            if n > 1.0 {
                let scale = d * (n - d) / (n * n * (n - 1.0));
                for a in 0..m {
                    for b in 0..m {
                        let v = if a == b {
                            at_risk[a] * (n - at_risk[a])
                        } else {
                            -at_risk[a] * at_risk[b]
                        };
                        cov[[a, b]] += scale * v;
                    }
                }
            }
        }
        for g in 0..k {
            at_risk[g] -= leaving[g];
        }
        i = j;
    }

    if total_events == 0 {
        return None;
    }
    let solved = cov.solvec(&o_minus_e).ok()?;
    let statistic = o_minus_e.dot(&solved);
    let p_value = ChiSquared::new(m as f64).ok()?.sf(statistic);
    Some(LogRankResult { statistic, df: m, p_value })
}

/// Two-group convenience wrapper.
pub fn logrank_two(t1: &[f64], e1: &[bool], t2: &[f64], e2: &[bool]) -> Option<LogRankResult> {
    let times: Vec<f64> = t1.iter().chain(t2).copied().collect();
    let events: Vec<bool> = e1.iter().chain(e2).copied().collect();
    let groups: Vec<usize> = std::iter::repeat(0)
        .take(t1.len())
        .chain(std::iter::repeat(1).take(t2.len()))
        .collect();
    logrank_test(&times, &events, &groups)
}
