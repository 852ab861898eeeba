//! Monte Carlo evaluation of a CAT design.
//!
//! Each simulated examinee runs an independent session against the shared,
//! read-only bank, so replications fan out over rayon without any locking.

use rand::prelude::*;
use rand_distr::Normal;
use rand_pcg::Pcg64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{CatError, Result};
use crate::estimation::Prior;
use crate::item::ItemModel;
use crate::session::{CatEngine, SessionState};

/// Outcome of one simulated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedSession {
    pub true_theta: f64,
    pub theta: f64,
    #[serde(with = "crate::estimation::standard_error_serde")]
    pub se: f64,
    pub n_items: usize,
    pub state: SessionState,
}

/// Bias, MSE and mean test length at one true theta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConditionalStats {
    pub true_theta: f64,
    pub bias: f64,
    pub mse: f64,
    pub mean_items: f64,
    #[serde(with = "crate::estimation::standard_error_serde")]
    pub mean_se: f64,
}

/// Draw a response category from the item's category probabilities.
fn draw_response(model: &ItemModel, true_theta: f64, rng: &mut Pcg64) -> u32 {
    let probs = model.category_probabilities(true_theta);
    let u: f64 = rng.random();
    let mut cumulative = 0.0;
    for (k, p) in probs.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return k as u32;
        }
    }
    (probs.len() - 1) as u32
}

/// Run one complete session for a simulee with ability `true_theta`.
pub fn simulate_session(
    engine: &CatEngine<'_>,
    true_theta: f64,
    participant_id: &str,
    seed: u64,
) -> Result<SimulatedSession> {
    let mut rng = Pcg64::seed_from_u64(seed);
    let mut state = engine.start(participant_id);
    state.seed = seed;

    while state.status.is_active() {
        let (next, item_id) = engine.advance(&state, None);
        state = match item_id {
            Some(id) => {
                let model = &engine
                    .bank()
                    .get(&id)
                    .ok_or_else(|| CatError::UnknownItem(id.clone()))?
                    .model;
                let response = draw_response(model, true_theta, &mut rng);
                engine.record_response(&next, id, response)?
            }
            None => next,
        };
    }

    Ok(SimulatedSession {
        true_theta,
        theta: state.estimate.theta,
        se: state.estimate.se,
        n_items: state.n_administered(),
        state,
    })
}

/// Simulate `replications` sessions at each true theta in parallel.
///
/// Results come back grouped by theta, replications in order; the seed of each
/// task depends only on its position so runs are reproducible.
pub fn simulate_batch(
    engine: &CatEngine<'_>,
    true_thetas: &[f64],
    replications: usize,
    seed: u64,
) -> Result<Vec<SimulatedSession>> {
    let tasks: Vec<(usize, usize)> = (0..true_thetas.len())
        .flat_map(|t| (0..replications).map(move |r| (t, r)))
        .collect();

    tasks
        .par_iter()
        .map(|&(theta_idx, rep)| {
            let task_seed = seed
                .wrapping_add(theta_idx as u64 * 1000)
                .wrapping_add(rep as u64);
            let participant = format!("sim-{theta_idx}-{rep}");
            simulate_session(engine, true_thetas[theta_idx], &participant, task_seed)
        })
        .collect()
}

/// Conditional bias, MSE and average test length at each true theta.
pub fn conditional_statistics(
    engine: &CatEngine<'_>,
    true_thetas: &[f64],
    replications: usize,
    seed: u64,
) -> Result<Vec<ConditionalStats>> {
    if replications == 0 {
        return Err(CatError::InvalidConfig(
            "replications must be at least 1".to_string(),
        ));
    }
    let sessions = simulate_batch(engine, true_thetas, replications, seed)?;
    let n = replications as f64;

    Ok(sessions
        .chunks(replications)
        .zip(true_thetas)
        .map(|(runs, &true_theta)| {
            let mean_est = runs.iter().map(|s| s.theta).sum::<f64>() / n;
            let mse = runs
                .iter()
                .map(|s| (s.theta - true_theta).powi(2))
                .sum::<f64>()
                / n;
            ConditionalStats {
                true_theta,
                bias: mean_est - true_theta,
                mse,
                mean_items: runs.iter().map(|s| s.n_items as f64).sum::<f64>() / n,
                mean_se: runs.iter().map(|s| s.se).sum::<f64>() / n,
            }
        })
        .collect())
}

/// Accuracy and test length over simulees drawn from the prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationStats {
    pub n_simulees: usize,
    pub bias: f64,
    pub rmse: f64,
    pub mean_items: f64,
    #[serde(with = "crate::estimation::standard_error_serde")]
    pub mean_se: f64,
}

/// Draw `n` true abilities from the prior.
pub fn draw_population(n: usize, prior: &Prior, seed: u64) -> Result<Vec<f64>> {
    if !(prior.sd.is_finite() && prior.sd > 0.0) || !prior.mean.is_finite() {
        return Err(CatError::InvalidConfig(format!(
            "prior must have finite mean and positive sd, got N({}, {})",
            prior.mean, prior.sd
        )));
    }
    let normal = Normal::new(prior.mean, prior.sd)
        .map_err(|e| CatError::InvalidConfig(format!("invalid prior: {e}")))?;
    let mut rng = Pcg64::seed_from_u64(seed);
    Ok((0..n).map(|_| normal.sample(&mut rng)).collect())
}

/// One session for each of `n` simulees drawn from the estimator's prior.
pub fn population_statistics(
    engine: &CatEngine<'_>,
    n: usize,
    seed: u64,
) -> Result<PopulationStats> {
    if n == 0 {
        return Err(CatError::InvalidConfig(
            "population size must be at least 1".to_string(),
        ));
    }
    let thetas = draw_population(n, &engine.config().estimator.prior, seed)?;
    let sessions = simulate_batch(engine, &thetas, 1, seed.wrapping_add(1))?;
    let count = n as f64;

    Ok(PopulationStats {
        n_simulees: n,
        bias: sessions.iter().map(|s| s.theta - s.true_theta).sum::<f64>() / count,
        rmse: (sessions
            .iter()
            .map(|s| (s.theta - s.true_theta).powi(2))
            .sum::<f64>()
            / count)
            .sqrt(),
        mean_items: sessions.iter().map(|s| s.n_items as f64).sum::<f64>() / count,
        mean_se: sessions.iter().map(|s| s.se).sum::<f64>() / count,
    })
}
