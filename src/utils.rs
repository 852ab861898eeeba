//! Shared numeric helpers.

pub const EPSILON: f64 = 1e-10;
pub const LOG_2_PI: f64 = 1.8378770664093453;

#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let exp_x = x.exp();
        exp_x / (1.0 + exp_x)
    }
}

#[inline]
pub fn log_sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

#[inline]
pub fn clip(x: f64, min: f64, max: f64) -> f64 {
    x.max(min).min(max)
}

/// Clip a probability away from 0 and 1 before it is logged or divided by.
#[inline]
pub fn clip_probability(p: f64) -> f64 {
    clip(p, EPSILON, 1.0 - EPSILON)
}

#[inline]
pub fn logsumexp(arr: &[f64]) -> f64 {
    if arr.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max_val = arr.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    let sum: f64 = arr.iter().map(|x| (x - max_val).exp()).sum();
    max_val + sum.ln()
}

/// Turn unnormalised log posterior values into normalised weights.
pub fn normalize_log_posterior(log_posterior: &[f64]) -> Vec<f64> {
    let log_norm = logsumexp(log_posterior);
    if !log_norm.is_finite() {
        let n = log_posterior.len().max(1);
        return vec![1.0 / n as f64; log_posterior.len()];
    }
    log_posterior.iter().map(|&lp| (lp - log_norm).exp()).collect()
}

/// Posterior mean and standard deviation over quadrature nodes.
pub fn compute_eap_with_se(posterior: &[f64], nodes: &[f64]) -> (f64, f64) {
    let eap: f64 = posterior.iter().zip(nodes).map(|(&p, &t)| p * t).sum();
    let var: f64 = posterior
        .iter()
        .zip(nodes)
        .map(|(&p, &t)| p * (t - eap).powi(2))
        .sum();
    (eap, var.max(0.0).sqrt())
}

/// Evenly spaced quadrature nodes over `[lower, upper]`.
pub fn quadrature_grid(lower: f64, upper: f64, n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![(lower + upper) / 2.0];
    }
    let step = (upper - lower) / (n - 1) as f64;
    (0..n).map(|i| lower + i as f64 * step).collect()
}

/// Log density of a normal distribution.
#[inline]
pub fn log_normal_density(x: f64, mean: f64, sd: f64) -> f64 {
    let z = (x - mean) / sd;
    -0.5 * z * z - sd.ln() - 0.5 * LOG_2_PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_sigmoid_is_stable_at_extremes() {
        assert_abs_diff_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(log_sigmoid(-800.0).is_finite());
    }

    #[test]
    fn test_normalize_log_posterior_sums_to_one() {
        let w = normalize_log_posterior(&[-1000.0, -1001.0, -1002.0]);
        assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(w[0] > w[1] && w[1] > w[2]);
    }

    #[test]
    fn test_quadrature_grid_endpoints() {
        let grid = quadrature_grid(-6.0, 6.0, 61);
        assert_eq!(grid.len(), 61);
        assert_abs_diff_eq!(grid[0], -6.0);
        assert_abs_diff_eq!(grid[60], 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grid[30], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_eap_of_symmetric_posterior_is_centered() {
        let nodes = [-1.0, 0.0, 1.0];
        let (eap, sd) = compute_eap_with_se(&[0.25, 0.5, 0.25], &nodes);
        assert_abs_diff_eq!(eap, 0.0);
        assert_abs_diff_eq!(sd, 0.5f64.sqrt(), epsilon = 1e-12);
    }
}
