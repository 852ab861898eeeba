//! Response probability and item information functions.
//!
//! Everything here is a pure function of `(theta, item parameters)`.
//!
//! GRM items expose two information measures. [`ItemModel::information`] uses
//! `a² Σ P_k (1 - P_k)`, the approximation item selection has always ranked
//! items by. [`ItemModel::fisher_information`] is the exact polytomous Fisher
//! information `Σ P'_k² / P_k` and is what ability estimation and standard
//! errors use. For dichotomous models the two coincide.

use crate::item::ItemModel;
use crate::utils::{clip_probability, log_sigmoid, sigmoid};

/// Cumulative boundary curves `P*_0 = 1, P*_k = σ(a(θ - b_k)), P*_K = 0`.
fn grm_boundaries(a: f64, thresholds: &[f64], theta: f64) -> Vec<f64> {
    let mut bounds = Vec::with_capacity(thresholds.len() + 2);
    bounds.push(1.0);
    bounds.extend(thresholds.iter().map(|&b| sigmoid(a * (theta - b))));
    bounds.push(0.0);
    bounds
}

/// Category probabilities and their derivatives with respect to theta.
fn category_curves(model: &ItemModel, theta: f64) -> (Vec<f64>, Vec<f64>) {
    match model {
        ItemModel::Grm { a, thresholds } => {
            let bounds = grm_boundaries(*a, thresholds, theta);
            let slopes: Vec<f64> = bounds.iter().map(|&p| a * p * (1.0 - p)).collect();
            let n_cat = thresholds.len() + 1;
            let probs = (0..n_cat)
                .map(|k| (bounds[k] - bounds[k + 1]).max(0.0))
                .collect();
            let derivs = (0..n_cat).map(|k| slopes[k] - slopes[k + 1]).collect();
            (probs, derivs)
        }
        _ => {
            let p = model.probability(theta);
            let dp = dichotomous_slope(model, theta);
            (vec![1.0 - p, p], vec![-dp, dp])
        }
    }
}

/// dP/dθ for a dichotomous item.
fn dichotomous_slope(model: &ItemModel, theta: f64) -> f64 {
    match model {
        ItemModel::OnePl { b } => {
            let p = sigmoid(theta - b);
            p * (1.0 - p)
        }
        ItemModel::TwoPl { a, b } => {
            let p = sigmoid(a * (theta - b));
            a * p * (1.0 - p)
        }
        ItemModel::ThreePl { a, b, c } => {
            let p = sigmoid(a * (theta - b));
            a * (1.0 - c) * p * (1.0 - p)
        }
        ItemModel::Grm { .. } => 0.0,
    }
}

impl ItemModel {
    /// Probability of a correct response.
    ///
    /// For GRM items this is the expected score scaled to `[0, 1]`, which keeps
    /// the function monotone in theta.
    pub fn probability(&self, theta: f64) -> f64 {
        match self {
            ItemModel::OnePl { b } => sigmoid(theta - b),
            ItemModel::TwoPl { a, b } => sigmoid(a * (theta - b)),
            ItemModel::ThreePl { a, b, c } => c + (1.0 - c) * sigmoid(a * (theta - b)),
            ItemModel::Grm { a, thresholds } => {
                let expected: f64 = thresholds.iter().map(|&b| sigmoid(a * (theta - b))).sum();
                expected / thresholds.len() as f64
            }
        }
    }

    /// Probability of each response category, summing to one.
    pub fn category_probabilities(&self, theta: f64) -> Vec<f64> {
        category_curves(self, theta).0
    }

    /// Probability of one observed response; zero for categories the item does not have.
    pub fn response_probability(&self, theta: f64, response: u32) -> f64 {
        self.category_probabilities(theta)
            .get(response as usize)
            .copied()
            .unwrap_or(0.0)
    }

    /// Item information used to rank items during selection.
    pub fn information(&self, theta: f64) -> f64 {
        match self {
            ItemModel::OnePl { b } => {
                let p = sigmoid(theta - b);
                p * (1.0 - p)
            }
            ItemModel::TwoPl { a, b } => {
                let p = sigmoid(a * (theta - b));
                a * a * p * (1.0 - p)
            }
            ItemModel::ThreePl { a, b, c } => {
                let p = clip_probability(c + (1.0 - c) * sigmoid(a * (theta - b)));
                a * a * (p - c).powi(2) * (1.0 - p) / (p * (1.0 - c).powi(2))
            }
            ItemModel::Grm { a, .. } => {
                let probs = self.category_probabilities(theta);
                a * a * probs.iter().map(|&p| p * (1.0 - p)).sum::<f64>()
            }
        }
    }

    /// Exact Fisher information.
    pub fn fisher_information(&self, theta: f64) -> f64 {
        match self {
            ItemModel::Grm { .. } => {
                let (probs, derivs) = category_curves(self, theta);
                probs
                    .iter()
                    .zip(&derivs)
                    .map(|(&p, &dp)| dp * dp / clip_probability(p))
                    .sum()
            }
            _ => self.information(theta),
        }
    }

    /// Log-likelihood of one response.
    ///
    /// 1PL and 2PL responses use the log-sigmoid directly so extreme logits
    /// keep their slope instead of flattening at the probability clip.
    pub fn log_likelihood(&self, theta: f64, response: u32) -> f64 {
        let logit = match self {
            ItemModel::OnePl { b } => theta - b,
            ItemModel::TwoPl { a, b } => a * (theta - b),
            _ => return clip_probability(self.response_probability(theta, response)).ln(),
        };
        match response {
            0 => log_sigmoid(-logit),
            1 => log_sigmoid(logit),
            _ => clip_probability(0.0).ln(),
        }
    }

    /// First derivative of the log-likelihood of one response with respect to theta.
    pub fn score(&self, theta: f64, response: u32) -> f64 {
        let (probs, derivs) = category_curves(self, theta);
        match probs.get(response as usize) {
            Some(&p) => derivs[response as usize] / clip_probability(p),
            None => 0.0,
        }
    }

    /// Kullback-Leibler divergence of the response distribution at `theta`
    /// from the one at `theta_hat`.
    pub fn kl_divergence(&self, theta_hat: f64, theta: f64) -> f64 {
        let at_hat = self.category_probabilities(theta_hat);
        let at_theta = self.category_probabilities(theta);
        at_hat
            .iter()
            .zip(&at_theta)
            .filter(|(p, _)| **p > 0.0)
            .map(|(&p, &q)| p * (clip_probability(p) / clip_probability(q)).ln())
            .sum::<f64>()
            .max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn grm() -> ItemModel {
        ItemModel::Grm {
            a: 1.2,
            thresholds: vec![-1.5, 0.0, 1.5],
        }
    }

    #[test]
    fn test_three_pl_probability_floor() {
        let item = ItemModel::ThreePl {
            a: 1.5,
            b: 0.0,
            c: 0.2,
        };
        assert!(item.probability(-10.0) >= 0.2);
        assert_abs_diff_eq!(item.probability(0.0), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_three_pl_with_zero_guessing_matches_two_pl() {
        let three = ItemModel::ThreePl {
            a: 1.3,
            b: 0.4,
            c: 0.0,
        };
        let two = ItemModel::TwoPl { a: 1.3, b: 0.4 };
        for theta in [-2.0, -0.5, 0.0, 1.0, 2.5] {
            assert_relative_eq!(
                three.information(theta),
                two.information(theta),
                max_relative = 1e-8
            );
        }
    }

    #[test]
    fn test_two_pl_information_peaks_at_difficulty() {
        let item = ItemModel::TwoPl { a: 2.0, b: 0.5 };
        assert_abs_diff_eq!(item.information(0.5), 1.0, epsilon = 1e-12);
        assert!(item.information(0.0) < item.information(0.5));
        assert!(item.information(1.0) < item.information(0.5));
    }

    #[test]
    fn test_grm_categories_sum_to_one() {
        let probs = grm().category_probabilities(0.3);
        assert_eq!(probs.len(), 4);
        assert_abs_diff_eq!(probs.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(probs.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn test_grm_selection_information_is_an_approximation() {
        let item = grm();
        let approx = item.information(0.0);
        let exact = item.fisher_information(0.0);
        assert!(approx > 0.0 && exact > 0.0);
        assert!((approx - exact).abs() > 1e-6);
    }

    #[test]
    fn test_dichotomous_fisher_equals_selection_information() {
        let item = ItemModel::ThreePl {
            a: 1.1,
            b: -0.3,
            c: 0.25,
        };
        assert_abs_diff_eq!(item.fisher_information(0.7), item.information(0.7));
    }

    #[test]
    fn test_score_matches_numeric_derivative() {
        let h = 1e-6;
        let items = [
            ItemModel::OnePl { b: 0.2 },
            ItemModel::TwoPl { a: 1.7, b: -0.4 },
            ItemModel::ThreePl {
                a: 1.2,
                b: 0.5,
                c: 0.2,
            },
            grm(),
        ];
        for item in &items {
            for response in 0..item.n_categories() as u32 {
                let theta = 0.37;
                let numeric = (item.log_likelihood(theta + h, response)
                    - item.log_likelihood(theta - h, response))
                    / (2.0 * h);
                assert_relative_eq!(item.score(theta, response), numeric, max_relative = 1e-4);
            }
        }
    }

    #[test]
    fn test_dichotomous_log_likelihood_uses_logit() {
        let item = ItemModel::TwoPl { a: 1.4, b: 0.3 };
        for theta in [-2.0, 0.0, 1.5] {
            for response in 0..2 {
                assert_relative_eq!(
                    item.log_likelihood(theta, response),
                    item.response_probability(theta, response).ln(),
                    max_relative = 1e-10
                );
            }
        }

        // Far past the clip the log-likelihood keeps falling linearly.
        let far = item.log_likelihood(-40.0, 1);
        let farther = item.log_likelihood(-50.0, 1);
        assert!(far.is_finite() && farther.is_finite());
        assert_relative_eq!(far - farther, 14.0, max_relative = 1e-9);
        assert_eq!(item.log_likelihood(0.0, 2), clip_probability(0.0).ln());
    }

    #[test]
    fn test_response_out_of_range() {
        let item = ItemModel::TwoPl { a: 1.0, b: 0.0 };
        assert_eq!(item.response_probability(0.0, 2), 0.0);
        assert_eq!(item.score(0.0, 5), 0.0);
    }

    #[test]
    fn test_kl_divergence_properties() {
        let item = ItemModel::TwoPl { a: 1.5, b: 0.0 };
        assert_abs_diff_eq!(item.kl_divergence(0.3, 0.3), 0.0, epsilon = 1e-12);
        assert!(item.kl_divergence(0.0, 1.0) > 0.0);
        assert!(item.kl_divergence(0.0, 2.0) > item.kl_divergence(0.0, 1.0));
    }
}
