use serde::{Deserialize, Serialize};

#[inline]
pub(crate) fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

pub(crate) fn logsumexp(values: impl IntoIterator<Item = f64>) -> f64 {
    values.into_iter().fold(f64::NEG_INFINITY, |acc, val| {
        if acc == f64::NEG_INFINITY {
            val
        } else if val == f64::NEG_INFINITY {
            acc
        } else {
            logaddexp(acc, val)
        }
    })
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
pub(crate) fn variance(values: &[f64]) -> f64 {
    let mu = mean(values);
    values.iter().map(|x| (x - mu) * (x - mu)).sum::<f64>() / values.len() as f64
}

/// Welford accumulator for the per-dimension mean and variance of a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RunningVariance {
    mean: Box<[f64]>,
    m2: Box<[f64]>,
    count: u64,
}

impl RunningVariance {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            mean: vec![0f64; dim].into(),
            m2: vec![0f64; dim].into(),
            count: 0,
        }
    }

    pub(crate) fn add_sample(&mut self, value: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        self.mean
            .iter_mut()
            .zip(self.m2.iter_mut())
            .zip(value.iter())
            .for_each(|((mean, m2), &x)| {
                let delta = x - *mean;
                *mean += delta / n;
                *m2 += delta * (x - *mean);
            });
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    /// Sample variance of every dimension, `None` before two samples.
    pub(crate) fn current(&self) -> Option<Box<[f64]>> {
        if self.count < 2 {
            return None;
        }
        let scale = ((self.count - 1) as f64).recip();
        Some(self.m2.iter().map(|m2| m2 * scale).collect())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn logsumexp_ignores_neg_infinity() {
        let val = logsumexp([f64::NEG_INFINITY, 0f64, f64::NEG_INFINITY]);
        assert_eq!(val, 0f64);
        let val = logsumexp([1f64.ln(), 3f64.ln()]);
        assert_relative_eq!(val, 4f64.ln(), epsilon = 1e-12);
        assert_eq!(logsumexp(std::iter::empty()), f64::NEG_INFINITY);
    }

    #[test]
    fn running_variance_matches_two_pass() {
        let draws = [[1.0, -2.0], [2.5, 0.0], [-0.5, 4.0], [3.0, 1.0]];
        let mut running = RunningVariance::new(2);
        for draw in draws.iter() {
            running.add_sample(draw);
        }
        let var = running.current().unwrap();
        for dim in 0..2 {
            let column: Vec<f64> = draws.iter().map(|d| d[dim]).collect();
            let expected = variance(&column) * 4. / 3.;
            assert_relative_eq!(var[dim], expected, epsilon = 1e-12);
        }
    }
}
