use std::{f64::consts::PI, sync::Arc};

use anyhow::{bail, Result};
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;

use super::{DensityEstimator, FittedDensity};
use crate::math::{logsumexp, variance};

/// Gaussian kernel density estimate with a diagonal bandwidth.
///
/// The bandwidth of every dimension is the sample standard deviation times
/// Scott's factor `n^(-1 / (d + 4))` times `bw_adjust`.
#[derive(Debug, Clone, Copy)]
pub struct GaussianKde {
    pub bw_adjust: f64,
}

impl Default for GaussianKde {
    fn default() -> Self {
        Self { bw_adjust: 1. }
    }
}

#[derive(Debug)]
struct KdeDensity {
    points: Vec<Box<[f64]>>,
    bandwidth: Box<[f64]>,
    log_norm: f64,
}

impl DensityEstimator for GaussianKde {
    fn fit(&self, data: &[Box<[f64]>]) -> Result<Arc<dyn FittedDensity>> {
        let Some(first) = data.first() else {
            bail!("Can not fit a KDE to an empty data set");
        };
        let dim = first.len();
        let n = data.len();
        let factor = (n as f64).powf(-1. / (dim as f64 + 4.)) * self.bw_adjust;

        let mut bandwidth = Vec::with_capacity(dim);
        for k in 0..dim {
            let column: Vec<f64> = data.iter().map(|p| p[k]).collect();
            let sd = variance(&column).sqrt();
            if !(sd > 0.) || !sd.is_finite() {
                bail!("Degenerate training data in dimension {k}");
            }
            bandwidth.push(sd * factor);
        }

        let log_norm = -(n as f64).ln()
            - bandwidth.iter().map(|h| h.ln()).sum::<f64>()
            - 0.5 * dim as f64 * (2. * PI).ln();

        Ok(Arc::new(KdeDensity {
            points: data.to_vec(),
            bandwidth: bandwidth.into(),
            log_norm,
        }))
    }
}

impl FittedDensity for KdeDensity {
    fn sample(&self, rng: &mut dyn RngCore) -> Box<[f64]> {
        let center = &self.points[rng.random_range(0..self.points.len())];
        center
            .iter()
            .zip(self.bandwidth.iter())
            .map(|(&mu, &h)| {
                let z: f64 = rng.sample(StandardNormal);
                mu + h * z
            })
            .collect()
    }

    fn log_density(&self, point: &[f64]) -> f64 {
        let kernels = self.points.iter().map(|center| {
            -0.5 * point
                .iter()
                .zip(center.iter())
                .zip(self.bandwidth.iter())
                .map(|((x, mu), h)| {
                    let z = (x - mu) / h;
                    z * z
                })
                .sum::<f64>()
        });
        logsumexp(kernels) + self.log_norm
    }
}
