//! Ability estimation from a participant's response history.
//!
//! Estimates are pure functions of the full history. The only thing carried
//! between calls is an optional starting point for the iteration, normally the
//! previous estimate. The estimator never fails: unusable responses are skipped,
//! degenerate patterns are clamped to the theta bounds and an exhausted iteration
//! budget yields the last iterate flagged as not converged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};

use crate::error::{CatError, Result};
use crate::item::{ItemBank, ItemId, ItemModel};
use crate::utils::{
    clip, compute_eap_with_se, log_normal_density, normalize_log_posterior, quadrature_grid,
    EPSILON,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    /// Newton-Raphson (Fisher scoring) on the likelihood.
    #[default]
    MaximumLikelihood,
    /// Newton-Raphson on the likelihood times a normal prior.
    MaximumAPosteriori,
    /// Posterior mean over an evenly spaced quadrature grid.
    ExpectedAPosteriori,
}

impl fmt::Display for EstimationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EstimationMethod::MaximumLikelihood => "ML",
            EstimationMethod::MaximumAPosteriori => "MAP",
            EstimationMethod::ExpectedAPosteriori => "EAP",
        };
        f.write_str(name)
    }
}

impl FromStr for EstimationMethod {
    type Err = CatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ml" | "mle" | "maximum_likelihood" => Ok(EstimationMethod::MaximumLikelihood),
            "map" | "maximum_a_posteriori" => Ok(EstimationMethod::MaximumAPosteriori),
            "eap" | "expected_a_posteriori" => Ok(EstimationMethod::ExpectedAPosteriori),
            _ => Err(CatError::InvalidMethod(s.to_string())),
        }
    }
}

/// Normal prior on theta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    pub mean: f64,
    pub sd: f64,
}

impl Default for Prior {
    fn default() -> Self {
        Self { mean: 0.0, sd: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    pub method: EstimationMethod,
    /// Estimates are clamped to `[theta_min, theta_max]`. This biases extreme
    /// patterns toward the bounds in exchange for finite, stable estimates.
    pub theta_min: f64,
    pub theta_max: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Largest Newton step, in logits.
    pub max_step: f64,
    pub quadrature_points: usize,
    pub prior: Prior,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            method: EstimationMethod::default(),
            theta_min: -6.0,
            theta_max: 6.0,
            max_iterations: 50,
            tolerance: 0.001,
            max_step: 1.0,
            quadrature_points: 61,
            prior: Prior::default(),
        }
    }
}

impl EstimatorSettings {
    pub fn with_method(mut self, method: EstimationMethod) -> Self {
        self.method = method;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(CatError::InvalidConfig(msg));
        if !(self.prior.sd.is_finite() && self.prior.sd > 0.0) || !self.prior.mean.is_finite() {
            return invalid(format!(
                "prior must have finite mean and positive sd, got N({}, {})",
                self.prior.mean, self.prior.sd
            ));
        }
        if !(self.theta_min.is_finite() && self.theta_max.is_finite())
            || self.theta_min >= self.theta_max
        {
            return invalid(format!(
                "theta bounds must be finite and ordered, got [{}, {}]",
                self.theta_min, self.theta_max
            ));
        }
        if self.max_iterations == 0 {
            return invalid("max_iterations must be at least 1".to_string());
        }
        if !(self.tolerance > 0.0) || !(self.max_step > 0.0) {
            return invalid("tolerance and max_step must be positive".to_string());
        }
        if self.quadrature_points < 2 {
            return invalid("quadrature_points must be at least 2".to_string());
        }
        Ok(())
    }
}

/// Ability estimate after the latest response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbilityEstimate {
    pub theta: f64,
    /// Standard error; infinite when the responses carry no information.
    #[serde(with = "standard_error_serde")]
    pub se: f64,
    pub converged: bool,
    pub method: EstimationMethod,
    pub iterations: usize,
    /// `true` when theta sits on one of the clamping bounds.
    pub at_bound: bool,
}

impl AbilityEstimate {
    /// Estimate before any response: the prior itself, not converged.
    pub fn from_prior(settings: &EstimatorSettings) -> Self {
        Self {
            theta: settings.prior.mean,
            se: settings.prior.sd,
            converged: false,
            method: settings.method,
            iterations: 0,
            at_bound: false,
        }
    }
}

/// Estimate ability from `(item, response)` pairs, starting at the prior mean.
pub fn estimate_ability(
    responses: &[(ItemId, u32)],
    bank: &ItemBank,
    settings: &EstimatorSettings,
) -> AbilityEstimate {
    estimate_ability_from(responses, bank, settings, None)
}

/// Estimate ability, starting the iteration at `start` when given.
pub fn estimate_ability_from(
    responses: &[(ItemId, u32)],
    bank: &ItemBank,
    settings: &EstimatorSettings,
    start: Option<f64>,
) -> AbilityEstimate {
    let scored = scored_responses(responses, bank);
    if scored.is_empty() {
        return AbilityEstimate::from_prior(settings);
    }

    match settings.method {
        EstimationMethod::MaximumLikelihood => newton_raphson(&scored, settings, start, false),
        EstimationMethod::MaximumAPosteriori => newton_raphson(&scored, settings, start, true),
        EstimationMethod::ExpectedAPosteriori => expected_a_posteriori(&scored, settings),
    }
}

/// Resolve responses against the bank, dropping anything that cannot be scored.
fn scored_responses<'a>(
    responses: &[(ItemId, u32)],
    bank: &'a ItemBank,
) -> Vec<(&'a ItemModel, u32)> {
    responses
        .iter()
        .filter_map(|(id, response)| {
            let Some(item) = bank.get(id) else {
                warn!(item = %id, "response for unknown item ignored");
                return None;
            };
            if *response as usize >= item.model.n_categories() {
                warn!(item = %id, response, "response category out of range, ignored");
                return None;
            }
            Some((&item.model, *response))
        })
        .collect()
}

/// Log-likelihood gradient and Fisher information summed over responses.
fn derivatives(scored: &[(&ItemModel, u32)], theta: f64) -> (f64, f64) {
    scored
        .iter()
        .fold((0.0, 0.0), |(grad, info), (model, response)| {
            (
                grad + model.score(theta, *response),
                info + model.fisher_information(theta),
            )
        })
}

fn is_at_bound(theta: f64, settings: &EstimatorSettings) -> bool {
    (theta - settings.theta_min).abs() < 1e-9 || (settings.theta_max - theta).abs() < 1e-9
}

fn newton_raphson(
    scored: &[(&ItemModel, u32)],
    settings: &EstimatorSettings,
    start: Option<f64>,
    use_prior: bool,
) -> AbilityEstimate {
    let (lo, hi) = (settings.theta_min, settings.theta_max);
    let prior = settings.prior;
    let prior_precision = if use_prior {
        1.0 / (prior.sd * prior.sd)
    } else {
        0.0
    };

    let mut theta = clip(start.unwrap_or(prior.mean), lo, hi);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..settings.max_iterations {
        iterations = iter + 1;

        let (mut grad, mut info) = derivatives(scored, theta);
        if use_prior {
            grad -= (theta - prior.mean) * prior_precision;
            info += prior_precision;
        }
        if !grad.is_finite() {
            debug!(theta, "gradient is not finite, stopping iteration");
            break;
        }
        if !(info > EPSILON) {
            // The likelihood is flat here and still rising towards one bound.
            if grad != 0.0 {
                theta = if grad < 0.0 { lo } else { hi };
                converged = true;
            }
            debug!(theta, info, grad, "information vanished, stopping iteration");
            break;
        }

        let step = clip(grad / info, -settings.max_step, settings.max_step);
        let next = clip(theta + step, lo, hi);
        let delta = (next - theta).abs();
        theta = next;

        if delta < settings.tolerance {
            converged = true;
            break;
        }
    }

    let (_, info) = derivatives(scored, theta);
    let total_info = info + prior_precision;
    let se = if total_info > EPSILON {
        1.0 / total_info.sqrt()
    } else {
        f64::INFINITY
    };

    if !converged {
        warn!(
            theta,
            iterations,
            n_responses = scored.len(),
            "ability estimation did not converge, returning last iterate"
        );
    }

    AbilityEstimate {
        theta,
        se,
        converged,
        method: settings.method,
        iterations,
        at_bound: is_at_bound(theta, settings),
    }
}

fn expected_a_posteriori(
    scored: &[(&ItemModel, u32)],
    settings: &EstimatorSettings,
) -> AbilityEstimate {
    let nodes = quadrature_grid(
        settings.theta_min,
        settings.theta_max,
        settings.quadrature_points,
    );
    let prior = settings.prior;

    let log_posterior: Vec<f64> = nodes
        .iter()
        .map(|&theta| {
            let ll: f64 = scored
                .iter()
                .map(|(model, response)| model.log_likelihood(theta, *response))
                .sum();
            ll + log_normal_density(theta, prior.mean, prior.sd)
        })
        .collect();

    let posterior = normalize_log_posterior(&log_posterior);
    let (theta, se) = compute_eap_with_se(&posterior, &nodes);

    AbilityEstimate {
        theta,
        se,
        converged: se.is_finite(),
        method: EstimationMethod::ExpectedAPosteriori,
        iterations: 0,
        at_bound: is_at_bound(theta, settings),
    }
}

/// Serde for standard errors: an infinite SE is written as `null` and read back
/// as infinity, so states holding one survive a JSON round trip.
pub(crate) mod standard_error_serde {
    use super::*;

    pub fn serialize<S: Serializer>(
        se: &f64,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        if se.is_finite() {
            serializer.serialize_some(se)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}
