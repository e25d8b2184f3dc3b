//! Integrated autocorrelation time estimates.
//!
//! We use the windowed estimator of Sokal: the autocorrelation function is summed
//! up to the smallest lag `M` with `M >= c * tau(M)`. The estimate is never
//! smaller than one.

/// Window constant used when the caller has no preference.
pub const DEFAULT_WINDOW_C: f64 = 5.;

/// Result of a single windowed estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutocorrEstimate {
    pub tau: f64,
    pub window: usize,
    /// False if the window condition was never met before half the series length.
    pub converged: bool,
}

/// Estimate the integrated autocorrelation time of a scalar series.
///
/// Series shorter than three values and constant series have `tau = 1`.
pub fn integrated_time(series: &[f64], c: f64) -> AutocorrEstimate {
    let n = series.len();
    let trivial = AutocorrEstimate {
        tau: 1.,
        window: 0,
        converged: true,
    };
    if n < 3 {
        return trivial;
    }

    let mean = series.iter().sum::<f64>() / n as f64;
    let centered: Vec<f64> = series.iter().map(|x| x - mean).collect();
    let c0 = centered.iter().map(|x| x * x).sum::<f64>() / n as f64;
    if !(c0 > 0.) || !c0.is_finite() {
        return trivial;
    }

    let max_lag = n / 2;
    let mut tau = 1f64;
    for lag in 1..=max_lag {
        let ck = centered[..n - lag]
            .iter()
            .zip(centered[lag..].iter())
            .map(|(a, b)| a * b)
            .sum::<f64>()
            / n as f64;
        tau += 2. * ck / c0;
        if (lag as f64) >= c * tau {
            return AutocorrEstimate {
                tau: tau.max(1.),
                window: lag,
                converged: true,
            };
        }
    }
    AutocorrEstimate {
        tau: tau.max(1.),
        window: max_lag,
        converged: false,
    }
}

/// Maximum autocorrelation time over several scalar summaries of the same chain.
pub fn max_integrated_time<'a>(series: impl IntoIterator<Item = &'a [f64]>, c: f64) -> f64 {
    series
        .into_iter()
        .map(|s| integrated_time(s, c).tau)
        .fold(1f64, f64::max)
}
