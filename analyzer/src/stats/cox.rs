// src/stats/cox.rs
// -----------------------------------------------------------------------------
// Cox proportional hazards by Newton-Raphson on the partial likelihood, Efron
// approximation for tied event times. Covariates are centred before fitting;
// that leaves the coefficients unchanged and keeps exp(x'b) in range.
// -----------------------------------------------------------------------------

use std::cmp::Ordering;

use anyhow::{anyhow, bail, Result};
use ndarray::{Array1, Array2, Axis};
use statrs::distribution::{ContinuousCDF, Normal};
use ndarray_linalg::{InverseC, SolveC};
use tracing::debug;

pub const MAX_ITER: usize = 50;
const TOLERANCE: f64 = 1e-9;
const MAX_HALVING: usize = 30;
const Z_95: f64 = 1.959964;

/// Survival times, event flags and a samples x covariates design.
#[derive(Debug, Clone)]
pub struct CoxData {
    pub time: Vec<f64>,
    pub event: Vec<bool>,
    pub covariates: Array2<f64>,
    pub names: Vec<String>,
}

impl CoxData {
    pub fn new(
        time: Vec<f64>,
        event: Vec<bool>,
        covariates: Array2<f64>,
        names: Vec<String>,
    ) -> Result<Self> {
        let n = time.len();
        if event.len() != n || covariates.nrows() != n {
            bail!(
                "mismatched lengths: {} times, {} events, {} covariate rows",
                n,
                event.len(),
                covariates.nrows()
            );
        }
        if names.len() != covariates.ncols() {
            bail!("{} names for {} covariates", names.len(), covariates.ncols());
        }
        Ok(Self { time, event, covariates, names })
    }

    /// Build from per-covariate columns.
    pub fn from_columns(
        time: Vec<f64>,
        event: Vec<bool>,
        columns: Vec<(String, Vec<f64>)>,
    ) -> Result<Self> {
        let n = time.len();
        let mut covariates = Array2::<f64>::zeros((n, columns.len()));
        let mut names = Vec::with_capacity(columns.len());
        for (j, (name, values)) in columns.into_iter().enumerate() {
            if values.len() != n {
                bail!("covariate {} has {} values for {} samples", name, values.len(), n);
            }
            covariates.column_mut(j).assign(&Array1::from(values));
            names.push(name);
        }
        Self::new(time, event, covariates, names)
    }

    pub fn n_samples(&self) -> usize {
        self.time.len()
    }

    pub fn n_events(&self) -> usize {
        self.event.iter().filter(|&&e| e).count()
    }

    /// Drop rows with a non-finite time or any non-finite covariate.
    pub fn complete_cases(&self) -> Self {
        let keep: Vec<usize> = (0..self.n_samples())
            .filter(|&i| {
                self.time[i].is_finite() && self.covariates.row(i).iter().all(|v| v.is_finite())
            })
            .collect();
        Self {
            time: keep.iter().map(|&i| self.time[i]).collect(),
            event: keep.iter().map(|&i| self.event[i]).collect(),
            covariates: self.covariates.select(Axis(0), &keep),
            names: self.names.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoxCoefficient {
    pub name: String,
    pub coef: f64,
    pub se: f64,
    pub z: f64,
    pub p_value: f64,
    pub hazard_ratio: f64,
    pub hr_lower: f64,
    pub hr_upper: f64,
}

#[derive(Debug, Clone)]
pub struct CoxFit {
    pub coefficients: Vec<CoxCoefficient>,
    pub log_likelihood: f64,
    pub null_log_likelihood: f64,
    pub n_samples: usize,
    pub n_events: usize,
    pub iterations: usize,
    pub converged: bool,
}

impl CoxFit {
    pub fn coefficient(&self, name: &str) -> Option<&CoxCoefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }
}

/// Log partial likelihood, score and information at `beta`.
struct Evaluation {
    loglik: f64,
    gradient: Array1<f64>,
    information: Array2<f64>,
}

/// Rows sorted by descending time so the risk set only grows.
fn descending_order(time: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..time.len()).collect();
    order.sort_by(|&a, &b| time[b].partial_cmp(&time[a]).unwrap_or(Ordering::Equal));
    order
}

fn evaluate(x: &Array2<f64>, time: &[f64], event: &[bool], order: &[usize], beta: &Array1<f64>) -> Evaluation {
    let p = beta.len();
    let eta = x.dot(beta);

    let mut loglik = 0.0;
    let mut gradient = Array1::<f64>::zeros(p);
    let mut information = Array2::<f64>::zeros((p, p));

    // Risk-set sums
    let mut s0 = 0.0;
    let mut s1 = Array1::<f64>::zeros(p);
    let mut s2 = Array2::<f64>::zeros((p, p));

    let mut i = 0;
    while i < order.len() {
        let t = time[order[i]];
        // Sums over the tied deaths at t
        let mut d0 = 0.0;
        let mut d1 = Array1::<f64>::zeros(p);
        let mut d2 = Array2::<f64>::zeros((p, p));
        let mut deaths = 0usize;

        let mut j = i;
        while j < order.len() && time[order[j]] == t {
            let r = order[j];
            let xi = x.row(r);
            let w = eta[r].exp();
            s0 += w;
            s1.scaled_add(w, &xi);
            for a in 0..p {
                for b in 0..p {
                    s2[[a, b]] += w * xi[a] * xi[b];
                }
            }
            if event[r] {
                deaths += 1;
                d0 += w;
                d1.scaled_add(w, &xi);
                for a in 0..p {
                    for b in 0..p {
                        d2[[a, b]] += w * xi[a] * xi[b];
                    }
                }
                loglik += eta[r];
                gradient += &xi;
            }
            j += 1;
        }

        for l in 0..deaths {
            let f = l as f64 / deaths as f64;
            let a0 = s0 - f * d0;
            let a1 = &s1 - &(&d1 * f);
            let a2 = &s2 - &(&d2 * f);
            loglik -= a0.ln();
            let mean = &a1 / a0;
            gradient -= &mean;
            for a in 0..p {
                for b in 0..p {
                    information[[a, b]] += a2[[a, b]] / a0 - mean[a] * mean[b];
                }
            }
        }
        i = j;
    }

    Evaluation { loglik, gradient, information }
}

/// Fit a Cox model to complete data.
pub fn fit_cox(data: &CoxData) -> Result<CoxFit> {
    let n = data.n_samples();
    let p = data.covariates.ncols();
    let n_events = data.n_events();
    if n == 0 || p == 0 {
        bail!("empty design: {} samples, {} covariates", n, p);
    }
    if n_events == 0 {
        bail!("no events among {} samples", n);
    }
    if data.time.iter().any(|t| !t.is_finite()) || data.covariates.iter().any(|v| !v.is_finite()) {
        bail!("non-finite values in survival data; drop incomplete cases first");
    }

    let means = data
        .covariates
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(p));
    let x = &data.covariates - &means;
    let order = descending_order(&data.time);

    let mut beta = Array1::<f64>::zeros(p);
    let mut current = evaluate(&x, &data.time, &data.event, &order, &beta);
    let null_log_likelihood = current.loglik;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < MAX_ITER {
        iterations += 1;
        let step = current
            .information
            .solvec(&current.gradient)
            .map_err(|e| anyhow!("information matrix is singular at iteration {}: {}", iterations, e))?;

        let mut scale = 1.0;
        let mut candidate = &beta + &step;
        let mut next = evaluate(&x, &data.time, &data.event, &order, &candidate);
        let mut halvings = 0;
        while (!next.loglik.is_finite() || next.loglik < current.loglik - TOLERANCE)
            && halvings < MAX_HALVING
        {
            scale *= 0.5;
            candidate = &beta + &(&step * scale);
            next = evaluate(&x, &data.time, &data.event, &order, &candidate);
            halvings += 1;
        }

        let max_step = step.iter().fold(0.0f64, |m, v| m.max((v * scale).abs()));
        let delta = (next.loglik - current.loglik).abs();
        beta = candidate;
        current = next;
        debug!(iteration = iterations, loglik = current.loglik, max_step, "cox step");

        if delta < TOLERANCE || max_step < TOLERANCE {
            converged = true;
            break;
        }
    }

    if !converged {
        debug!("Cox fit did not converge in {} iterations", MAX_ITER);
    }
    if beta.iter().any(|b| !b.is_finite()) {
        bail!("coefficients diverged");
    }
    let covariance = current
        .information
        .invc()
        .map_err(|e| anyhow!("information matrix is singular at the solution: {}", e))?;

    let normal = Normal::new(0.0, 1.0)?;
    let coefficients = data
        .names
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let coef = beta[j];
            let se = covariance[[j, j]].sqrt();
            let z = coef / se;
            CoxCoefficient {
                name: name.clone(),
                coef,
                se,
                z,
                p_value: (2.0 * normal.sf(z.abs())).min(1.0),
                hazard_ratio: coef.exp(),
                hr_lower: (coef - Z_95 * se).exp(),
                hr_upper: (coef + Z_95 * se).exp(),
            }
        })
        .collect();

    Ok(CoxFit {
        coefficients,
        log_likelihood: current.loglik,
        null_log_likelihood,
        n_samples: n,
        n_events,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn three_subject_closed_form() {
        // L(b) = e^b/(2e^b+1) * 1/(1+e^b); maximised at e^b = 1/sqrt(2)
        let data = CoxData::from_columns(
            vec![1.0, 2.0, 3.0],
            vec![true, true, true],
            vec![("x".to_string(), vec![1.0, 0.0, 1.0])],
        )
        .unwrap();
        let fit = fit_cox(&data).unwrap();
        let c = fit.coefficient("x").unwrap();
        assert!(fit.converged);
        assert_relative_eq!(c.coef, -0.5 * 2.0f64.ln(), epsilon = 1e-6);
        assert_relative_eq!(c.hazard_ratio, 1.0 / 2.0f64.sqrt(), epsilon = 1e-6);
        // information = 2 * 0.242641
        assert_relative_eq!(c.se, 1.0 / 0.485281f64.sqrt(), epsilon = 1e-4);
        assert!(c.hr_lower < c.hazard_ratio && c.hazard_ratio < c.hr_upper);
        assert_eq!(fit.n_events, 3);
    }

    #[test]
    fn efron_loglik_at_zero() {
        // risk sets 4 (two tied deaths: ln 4 + ln 3), then 2, then 1
        let x = array![[1.0], [0.0], [1.0], [0.0]];
        let time = [1.0, 1.0, 2.0, 3.0];
        let event = [true; 4];
        let order = descending_order(&time);
        let e = evaluate(&x, &time, &event, &order, &array![0.0]);
        assert_relative_eq!(e.loglik, -(24.0f64.ln()), epsilon = 1e-12);
    }

    #[test]
    fn early_deaths_with_high_covariate_give_hr_above_one() {
        let time = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let event = vec![true, true, false, true, true, true, false, true, true, false];
        let x = vec![2.1, 1.4, 1.9, 0.2, 1.1, 0.5, -0.3, 0.3, -1.0, -0.8];
        let data = CoxData::from_columns(time, event, vec![("gene".into(), x)]).unwrap();
        let fit = fit_cox(&data).unwrap();
        let c = &fit.coefficients[0];
        assert!(c.hazard_ratio > 1.0);
        assert!(fit.log_likelihood >= fit.null_log_likelihood);
    }

    #[test]
    fn two_covariates() {
        let time = vec![2.0, 3.0, 1.0, 8.0, 5.0, 7.0, 4.0, 9.0, 6.0, 10.0, 3.5, 2.5];
        let event = vec![true, true, true, false, true, true, true, false, true, true, false, true];
        let g = vec![1.2, 0.4, 2.0, -1.0, 0.1, -0.2, 0.9, -1.5, 0.0, -0.7, 0.3, 1.0];
        let ipi = vec![2.0, 3.0, 3.0, 0.0, 1.0, 1.0, 2.0, 0.0, 2.0, 1.0, 0.0, 3.0];
        let data = CoxData::from_columns(
            time,
            event,
            vec![("gene".into(), g), ("IPI_numeric".into(), ipi)],
        )
        .unwrap();
        let fit = fit_cox(&data).unwrap();
        assert_eq!(fit.coefficients.len(), 2);
        assert!(fit.coefficient("IPI_numeric").is_some());
        assert!(fit.coefficients.iter().all(|c| c.se.is_finite() && c.se > 0.0));
    }

    #[test]
    fn errors() {
        let no_events = CoxData::from_columns(
            vec![1.0, 2.0],
            vec![false, false],
            vec![("x".into(), vec![0.0, 1.0])],
        )
        .unwrap();
        assert!(fit_cox(&no_events).is_err());

        let constant = CoxData::from_columns(
            vec![1.0, 2.0, 3.0],
            vec![true, true, true],
            vec![("x".into(), vec![1.0, 1.0, 1.0])],
        )
        .unwrap();
        let err = fit_cox(&constant).unwrap_err();
        assert!(err.to_string().contains("singular"), "{err}");

        assert!(CoxData::from_columns(vec![1.0], vec![true], vec![("x".into(), vec![])]).is_err());
    }

    #[test]
    fn complete_cases_drop_nan_rows() {
        let data = CoxData::from_columns(
            vec![1.0, f64::NAN, 3.0, 4.0],
            vec![true, true, false, true],
            vec![("x".into(), vec![0.5, 1.0, f64::NAN, 2.0])],
        )
        .unwrap();
        let cc = data.complete_cases();
        assert_eq!(cc.n_samples(), 2);
        assert_eq!(cc.time, vec![1.0, 4.0]);
        assert_eq!(cc.n_events(), 2);
    }
}
