//! Two-sample t-tests.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::stats::descriptive::{mean, variance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TTestKind {
    /// Unequal variances, Welch–Satterthwaite degrees of freedom.
    #[default]
    Welch,
    /// Pooled variance, n1 + n2 - 2 degrees of freedom.
    Student,
}

#[derive(Debug, Clone, Copy)]
pub struct TTestResult {
    pub statistic: f64,
    pub df: f64,
    pub p_value: f64,
}

fn two_sided_p(t: f64, df: f64) -> f64 {
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.sf(t.abs())).min(1.0),
        Err(_) => f64::NAN,
    }
}

/// Statistic is computed for `a - b`.
pub fn ttest(a: &[f64], b: &[f64], kind: TTestKind) -> Option<TTestResult> {
    match kind {
        TTestKind::Welch => welch_ttest(a, b),
        TTestKind::Student => student_ttest(a, b),
    }
}

pub fn welch_ttest(a: &[f64], b: &[f64]) -> Option<TTestResult> {
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let (v1, v2) = (variance(a, 1)?, variance(b, 1)?);
    if v1 == 0.0 && v2 == 0.0 {
        return None;
    }
    let (se1, se2) = (v1 / n1, v2 / n2);
    let se = (se1 + se2).sqrt();
    let t = (mean(a)? - mean(b)?) / se;
    let df = (se1 + se2).powi(2) / (se1.powi(2) / (n1 - 1.0) + se2.powi(2) / (n2 - 1.0));
    Some(TTestResult {
        statistic: t,
        df,
        p_value: two_sided_p(t, df),
    })
}

pub fn student_ttest(a: &[f64], b: &[f64]) -> Option<TTestResult> {
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let (v1, v2) = (variance(a, 1)?, variance(b, 1)?);
    if v1 == 0.0 && v2 == 0.0 {
        return None;
    }
    let df = n1 + n2 - 2.0;
    let pooled = ((n1 - 1.0) * v1 + (n2 - 1.0) * v2) / df;
    let t = (mean(a)? - mean(b)?) / (pooled * (1.0 / n1 + 1.0 / n2)).sqrt();
    Some(TTestResult {
        statistic: t,
        df,
        p_value: two_sided_p(t, df),
    })
}

/// Two-sided p-value for a correlation coefficient `r` over `n` pairs,
/// via t = r * sqrt((n - 2) / (1 - r^2)) on n - 2 degrees of freedom.
pub fn correlation_p_value(r: f64, n: usize) -> Option<f64> {
    if n < 3 || !r.is_finite() {
        return None;
    }
    if r.abs() >= 1.0 {
        return Some(0.0);
    }
    let df = (n - 2) as f64;
    let t = r * (df / (1.0 - r * r)).sqrt();
    Some(two_sided_p(t, df))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const A: [f64; 5] = [19.8, 20.4, 19.6, 17.8, 18.5];
    const B: [f64; 5] = [28.2, 26.6, 20.1, 23.3, 25.2];

    #[test]
    fn student_matches_reference() {
        // pooled variance 5.4545, se 1.4771, t = -5.46 / se
        let r = student_ttest(&A, &B).unwrap();
        assert_relative_eq!(r.df, 8.0);
        assert_relative_eq!(r.statistic, -3.6965, epsilon = 1e-3);
        // critical values for df = 8: 3.355 (p = 0.01), 3.833 (p = 0.005)
        assert!(r.p_value > 0.005 && r.p_value < 0.01);
    }

    #[test]
    fn welch_df_is_satterthwaite() {
        let r = welch_ttest(&A, &B).unwrap();
        // equal n: same statistic as Student, smaller df because variances differ
        assert_relative_eq!(r.statistic, -3.6965, epsilon = 1e-3);
        assert_relative_eq!(r.df, 4.8877, epsilon = 1e-3);
        assert!(r.p_value > student_ttest(&A, &B).unwrap().p_value);
    }

    #[test]
    fn correlation_p() {
        assert_eq!(correlation_p_value(0.5, 2), None);
        assert_relative_eq!(correlation_p_value(0.0, 10).unwrap(), 1.0);
        assert_eq!(correlation_p_value(1.0, 10), Some(0.0));
        // r = 0.6, n = 12: t = 2.372 on 10 df, p just under 0.04
        let p = correlation_p_value(0.6, 12).unwrap();
        assert!(p > 0.035 && p < 0.045);
    }

    #[test]
    fn degenerate_inputs() {
        assert!(welch_ttest(&[1.0], &[1.0, 2.0]).is_none());
        assert!(welch_ttest(&[1.0, 1.0], &[2.0, 2.0]).is_none());
        let same = welch_ttest(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        assert_relative_eq!(same.p_value, 1.0);
    }
}
