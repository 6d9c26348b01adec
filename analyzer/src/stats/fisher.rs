//! Fisher's exact test on 2x2 tables.

use statrs::function::factorial::ln_binomial;

#[derive(Debug, Clone, Copy)]
pub struct FisherResult {
    /// Sample odds ratio `ad / bc`.
    pub odds_ratio: f64,
    pub p_value: f64,
}

/// Two-sided Fisher exact test for `[[a, b], [c, d]]`.
///
/// Sums the hypergeometric probabilities of every table with the observed margins
/// that is no more likely than the observed one.
pub fn fisher_exact(table: [[u64; 2]; 2]) -> FisherResult {
    let [[a, b], [c, d]] = table;
    let odds_ratio = {
        let (num, den) = ((a * d) as f64, (b * c) as f64);
        if den == 0.0 {
            if num == 0.0 {
                f64::NAN
            } else {
                f64::INFINITY
            }
        } else {
            num / den
        }
    };

    let row1 = a + b;
    let col1 = a + c;
    let n = a + b + c + d;
    if n == 0 {
        return FisherResult { odds_ratio, p_value: 1.0 };
    }

    let ln_total = ln_binomial(n, col1);
    let ln_pmf = |x: u64| ln_binomial(row1, x) + ln_binomial(n - row1, col1 - x) - ln_total;

    let lo = col1.saturating_sub(n - row1);
    let hi = row1.min(col1);
    let observed = ln_pmf(a).exp();
    let cutoff = observed * (1.0 + 1e-7);

    let p_value: f64 = (lo..=hi)
        .map(|x| ln_pmf(x).exp())
        .filter(|&p| p <= cutoff)
        .sum();

    FisherResult {
        odds_ratio,
        p_value: p_value.min(1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn tea_tasting() {
        // [[3, 1], [1, 3]]: p = 34/70
        let r = fisher_exact([[3, 1], [1, 3]]);
        assert_relative_eq!(r.odds_ratio, 9.0);
        assert_relative_eq!(r.p_value, 34.0 / 70.0, epsilon = 1e-10);
    }

    #[test]
    fn extreme_table() {
        // only one table more extreme than itself: both tails of C(10,5)
        let r = fisher_exact([[5, 0], [0, 5]]);
        assert!(r.odds_ratio.is_infinite());
        assert_relative_eq!(r.p_value, 2.0 / 252.0, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_odds_ratio_is_nan() {
        let r = fisher_exact([[0, 4], [0, 6]]);
        assert!(r.odds_ratio.is_nan());
        assert_relative_eq!(r.p_value, 1.0);
    }

    #[test]
    fn large_counts_do_not_overflow() {
        let r = fisher_exact([[100, 400], [160, 340]]);
        assert!(r.p_value > 0.0 && r.p_value < 1e-3);
        assert!(r.odds_ratio < 1.0);
    }
}
