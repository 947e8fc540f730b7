extern crate statrs;

use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// Normal log-density at `x` for mean `mean` and standard deviation `sd`.
pub fn normal_log_pdf(x: f64, mean: f64, sd: f64) -> f64 {
    let normal = Normal::new(mean, sd).unwrap();
    normal.ln_pdf(x)
}

/// Log of the lower-tail normal CDF at `x`.
pub fn normal_log_cdf(x: f64, mean: f64, sd: f64) -> f64 {
    let normal = Normal::new(mean, sd).unwrap();
    normal.cdf(x).ln()
}

/// Log of the upper-tail probability `1 - CDF(x)`.
pub fn normal_log_sf(x: f64, mean: f64, sd: f64) -> f64 {
    let normal = Normal::new(mean, sd).unwrap();
    normal.sf(x).ln()
}

/// Computes `log(exp(a) - exp(b))` for `a >= b` without leaving log space.
///
/// Returns negative infinity when the difference cancels out entirely,
/// which the caller must treat as a degenerate-interval signal.
pub fn log_diff(a: f64, b: f64) -> f64 {
    if b >= a {
        return f64::NEG_INFINITY;
    }
    a + (-((b - a).exp())).ln_1p()
}

/// Log-sum-exp over a slice with max subtraction for numerical stability.
///
/// Entries that are negative infinity contribute nothing to the sum.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Normalizes a vector of log-weights into a probability distribution.
///
/// Negative-infinity entries map to probability zero.
pub fn normalize_log_weights(log_weights: &[f64]) -> Vec<f64> {
    let denominator = log_sum_exp(log_weights);
    log_weights
        .iter()
        .map(|lw| {
            if *lw == f64::NEG_INFINITY {
                0.0
            } else {
                (lw - denominator).exp()
            }
        })
        .collect()
}
