use std::{f64::consts::PI, sync::Arc};

use anyhow::{bail, Context, Result};
use faer::Mat;
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;

use super::{DensityEstimator, FittedDensity};
use crate::math::logsumexp;

/// Gaussian mixture with full covariances, fitted by expectation maximization.
///
/// Initial means are evenly spaced points of the training set, so the fit only
/// depends on the data.
#[derive(Debug, Clone, Copy)]
pub struct GaussianMixture {
    pub n_components: usize,
    pub max_iter: usize,
    /// Convergence threshold on the change of the mean log-likelihood.
    pub tol: f64,
    /// Added to the diagonal of every covariance.
    pub reg_covar: f64,
}

impl Default for GaussianMixture {
    fn default() -> Self {
        Self {
            n_components: 5,
            max_iter: 100,
            tol: 1e-4,
            reg_covar: 1e-6,
        }
    }
}

/// One multivariate normal in its eigenbasis.
#[derive(Debug)]
struct Component {
    mean: Box<[f64]>,
    axes: Vec<Box<[f64]>>,
    sd: Box<[f64]>,
    log_norm: f64,
}

impl Component {
    /// `cov` is the column major covariance matrix.
    fn from_moments(mean: Box<[f64]>, cov: &[f64], reg: f64) -> Result<Self> {
        let dim = mean.len();
        let mut mat: Mat<f64> = Mat::zeros(dim, dim);
        for j in 0..dim {
            mat.col_as_slice_mut(j)
                .copy_from_slice(&cov[j * dim..(j + 1) * dim]);
        }
        let eig = mat
            .self_adjoint_eigen(faer::Side::Lower)
            .ok()
            .context("Eigendecomposition of component covariance failed")?;
        let vals = eig.S().column_vector().to_owned();
        let vecs = eig.U().to_owned();

        let sd: Box<[f64]> = vals.iter().map(|&val| val.max(reg).sqrt()).collect();
        if sd.iter().any(|val| !val.is_finite()) {
            bail!("Non-finite component covariance");
        }
        let axes = (0..dim).map(|j| vecs.col_as_slice(j).into()).collect();
        let log_norm = -0.5 * dim as f64 * (2. * PI).ln() - sd.iter().map(|s| s.ln()).sum::<f64>();
        Ok(Self {
            mean,
            axes,
            sd,
            log_norm,
        })
    }

    fn log_density(&self, point: &[f64]) -> f64 {
        let quad = self
            .axes
            .iter()
            .zip(self.sd.iter())
            .map(|(axis, sd)| {
                let proj = axis
                    .iter()
                    .zip(point.iter().zip(self.mean.iter()))
                    .map(|(a, (x, mu))| a * (x - mu))
                    .sum::<f64>()
                    / sd;
                proj * proj
            })
            .sum::<f64>();
        self.log_norm - 0.5 * quad
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Box<[f64]> {
        let mut point = self.mean.clone();
        for (axis, sd) in self.axes.iter().zip(self.sd.iter()) {
            let z: f64 = rng.sample(StandardNormal);
            point
                .iter_mut()
                .zip(axis.iter())
                .for_each(|(x, a)| *x += a * sd * z);
        }
        point
    }
}

#[derive(Debug)]
struct MixtureDensity {
    weights: Box<[f64]>,
    components: Vec<Component>,
}

impl FittedDensity for MixtureDensity {
    fn sample(&self, rng: &mut dyn RngCore) -> Box<[f64]> {
        let mut u: f64 = rng.random();
        let mut chosen = self.components.len() - 1;
        for (idx, weight) in self.weights.iter().enumerate() {
            if u < *weight {
                chosen = idx;
                break;
            }
            u -= weight;
        }
        self.components[chosen].sample(rng)
    }

    fn log_density(&self, point: &[f64]) -> f64 {
        logsumexp(
            self.weights
                .iter()
                .zip(self.components.iter())
                .map(|(w, comp)| w.ln() + comp.log_density(point)),
        )
    }
}

fn weighted_moments(
    data: &[Box<[f64]>],
    resp: impl Fn(usize) -> f64,
    total: f64,
    reg: f64,
) -> (Box<[f64]>, Vec<f64>) {
    let dim = data[0].len();
    let mut mean = vec![0f64; dim];
    for (i, point) in data.iter().enumerate() {
        let r = resp(i);
        mean.iter_mut().zip(point.iter()).for_each(|(m, x)| *m += r * x);
    }
    mean.iter_mut().for_each(|m| *m /= total);

    let mut cov = vec![0f64; dim * dim];
    for (i, point) in data.iter().enumerate() {
        let r = resp(i);
        for j in 0..dim {
            let dj = point[j] - mean[j];
            for k in 0..dim {
                cov[j * dim + k] += r * dj * (point[k] - mean[k]);
            }
        }
    }
    cov.iter_mut().for_each(|c| *c /= total);
    for j in 0..dim {
        cov[j * dim + j] += reg;
    }
    (mean.into(), cov)
}

impl DensityEstimator for GaussianMixture {
    fn fit(&self, data: &[Box<[f64]>]) -> Result<Arc<dyn FittedDensity>> {
        let Some(first) = data.first() else {
            bail!("Can not fit a mixture to an empty data set");
        };
        let dim = first.len();
        let n = data.len();
        let k = self.n_components.min(n / (2 * (dim + 1))).max(1);

        let (_, global_cov) = weighted_moments(data, |_| 1., n as f64, self.reg_covar);
        let mut components = (0..k)
            .map(|j| Component::from_moments(data[j * n / k].clone(), &global_cov, self.reg_covar))
            .collect::<Result<Vec<_>>>()?;
        let mut weights: Box<[f64]> = vec![1. / k as f64; k].into();

        let mut resp = vec![0f64; n * k];
        let mut prev_ll = f64::NEG_INFINITY;
        for iter in 0..self.max_iter {
            let mut ll = 0f64;
            for (i, point) in data.iter().enumerate() {
                let row = &mut resp[i * k..(i + 1) * k];
                for (j, comp) in components.iter().enumerate() {
                    row[j] = weights[j].ln() + comp.log_density(point);
                }
                let norm = logsumexp(row.iter().copied());
                row.iter_mut().for_each(|r| *r = (*r - norm).exp());
                ll += norm;
            }
            let ll = ll / n as f64;
            if !ll.is_finite() {
                bail!("Mixture log-likelihood diverged in iteration {iter}");
            }
            if (ll - prev_ll).abs() < self.tol {
                break;
            }
            prev_ll = ll;

            for j in 0..k {
                let total: f64 = (0..n).map(|i| resp[i * k + j]).sum();
                if total < 1e-8 {
                    // empty component, keep its parameters
                    continue;
                }
                let (mean, cov) =
                    weighted_moments(data, |i| resp[i * k + j], total, self.reg_covar);
                components[j] = Component::from_moments(mean, &cov, self.reg_covar)?;
                weights[j] = total / n as f64;
            }
            let weight_sum: f64 = weights.iter().sum();
            weights.iter_mut().for_each(|w| *w /= weight_sum);
        }

        Ok(Arc::new(MixtureDensity {
            weights,
            components,
        }))
    }
}
