//! Python bindings over numpy arrays.
//!
//! Items are addressed by their 0-based position in the parameter arrays.
//! `difficulty` is an `(n_items, k)` matrix: dichotomous models read column 0,
//! GRM items read every non-NaN column as a threshold.

use ndarray::Array1;
use numpy::{PyArray1, PyReadonlyArray1, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::config::CatConfig;
use crate::error::{CatError, Result};
use crate::estimation::{estimate_ability, EstimatorSettings, Prior};
use crate::item::{ItemBank, ItemId, ItemRow, ModelFamily};
use crate::selection::{select_next_item, SelectionSettings};
use crate::session::CatEngine;
use crate::simulation::conditional_statistics;
use crate::stopping::{evaluate_stopping, StoppingInput, StoppingRule, TestStatus};

fn to_py_err(err: CatError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

fn bank_from_arrays(
    model: &str,
    discrimination: &PyReadonlyArray1<f64>,
    difficulty: &PyReadonlyArray2<f64>,
    guessing: Option<&PyReadonlyArray1<f64>>,
) -> Result<ItemBank> {
    let model: ModelFamily = model.parse()?;
    let disc = discrimination.as_array();
    let diff = difficulty.as_array();
    let guess = guessing.map(|g| g.as_array());

    if diff.nrows() != disc.len() {
        return Err(CatError::InvalidConfig(format!(
            "difficulty has {} rows but discrimination has {} items",
            diff.nrows(),
            disc.len()
        )));
    }

    let rows = (0..disc.len())
        .map(|j| {
            let values: Vec<f64> = diff.row(j).iter().copied().filter(|v| !v.is_nan()).collect();
            let mut row = ItemRow::new(j as u64);
            row.a = Some(disc[j]).filter(|a| !a.is_nan());
            match model {
                ModelFamily::Grm => row.thresholds = Some(values),
                _ => row.b = values.first().copied(),
            }
            row.c = guess
                .as_ref()
                .and_then(|g| g.get(j).copied())
                .filter(|c| !c.is_nan());
            row
        })
        .collect();

    ItemBank::from_rows(model, rows)
}

fn item_ids(indices: &PyReadonlyArray1<i64>) -> Vec<ItemId> {
    indices
        .as_array()
        .iter()
        .filter(|&&j| j >= 0)
        .map(|&j| ItemId::Num(j as u64))
        .collect()
}

/// Selection information of every item at `theta`
#[pyfunction]
#[pyo3(signature = (theta, model, discrimination, difficulty, guessing=None))]
pub fn cat_item_information<'py>(
    py: Python<'py>,
    theta: f64,
    model: &str,
    discrimination: PyReadonlyArray1<f64>,
    difficulty: PyReadonlyArray2<f64>,
    guessing: Option<PyReadonlyArray1<f64>>,
) -> PyResult<Bound<'py, PyArray1<f64>>> {
    let bank = bank_from_arrays(model, &discrimination, &difficulty, guessing.as_ref())
        .map_err(to_py_err)?;
    Ok(bank.item_information(theta).to_pyarray(py))
}

/// Index of the next item, or `None` when the bank is exhausted
#[pyfunction]
#[pyo3(signature = (theta, model, discrimination, difficulty, administered, criterion="MI", guessing=None, seed=0))]
#[allow(clippy::too_many_arguments)]
pub fn cat_select_next_item(
    theta: f64,
    model: &str,
    discrimination: PyReadonlyArray1<f64>,
    difficulty: PyReadonlyArray2<f64>,
    administered: PyReadonlyArray1<i64>,
    criterion: &str,
    guessing: Option<PyReadonlyArray1<f64>>,
    seed: u64,
) -> PyResult<Option<u64>> {
    let bank = bank_from_arrays(model, &discrimination, &difficulty, guessing.as_ref())
        .map_err(to_py_err)?;
    let settings = SelectionSettings::with_criterion(criterion.parse().map_err(to_py_err)?);
    let selection = select_next_item(theta, &item_ids(&administered), &bank, &settings, None, seed);
    Ok(selection.item().and_then(|id| match id {
        ItemId::Num(j) => Some(*j),
        ItemId::Name(_) => None,
    }))
}

/// Ability estimate `(theta, se, converged)` from administered items and responses
#[pyfunction]
#[pyo3(signature = (model, discrimination, difficulty, administered, responses, method="ML", guessing=None, prior_mean=0.0, prior_sd=1.0, theta_min=-6.0, theta_max=6.0))]
#[allow(clippy::too_many_arguments)]
pub fn cat_estimate_ability(
    model: &str,
    discrimination: PyReadonlyArray1<f64>,
    difficulty: PyReadonlyArray2<f64>,
    administered: PyReadonlyArray1<i64>,
    responses: PyReadonlyArray1<i32>,
    method: &str,
    guessing: Option<PyReadonlyArray1<f64>>,
    prior_mean: f64,
    prior_sd: f64,
    theta_min: f64,
    theta_max: f64,
) -> PyResult<(f64, f64, bool)> {
    let bank = bank_from_arrays(model, &discrimination, &difficulty, guessing.as_ref())
        .map_err(to_py_err)?;
    let settings = EstimatorSettings {
        method: method.parse().map_err(to_py_err)?,
        prior: Prior {
            mean: prior_mean,
            sd: prior_sd,
        },
        theta_min,
        theta_max,
        ..Default::default()
    };
    settings.validate().map_err(to_py_err)?;

    let pairs: Vec<(ItemId, u32)> = administered
        .as_array()
        .iter()
        .zip(responses.as_array().iter())
        .filter(|&(&j, &r)| j >= 0 && r >= 0)
        .map(|(&j, &r)| (ItemId::Num(j as u64), r as u32))
        .collect();

    let estimate = estimate_ability(&pairs, &bank, &settings);
    Ok((estimate.theta, estimate.se, estimate.converged))
}

/// Stopping decision as `(state, reason)`
#[pyfunction]
#[pyo3(signature = (n_administered, se, min_items, max_items, min_sem=None, bank_exhausted=false))]
pub fn cat_evaluate_stopping(
    n_administered: usize,
    se: f64,
    min_items: usize,
    max_items: usize,
    min_sem: Option<f64>,
    bank_exhausted: bool,
) -> PyResult<(String, Option<String>)> {
    let rule = StoppingRule::new(min_items, max_items, min_sem);
    if let Err(err) = rule.validate() {
        return Ok(("aborted".to_string(), Some(err.to_string())));
    }
    let status = evaluate_stopping(
        &rule,
        &StoppingInput {
            administered: n_administered,
            se,
            bank_exhausted,
        },
    );
    Ok(match status {
        TestStatus::Active => ("active".to_string(), None),
        TestStatus::Stopped(reason) => ("stopped".to_string(), Some(reason.to_string())),
        TestStatus::Aborted(reason) => ("aborted".to_string(), Some(reason)),
    })
}

/// Conditional bias, MSE and mean test length from simulated sessions
#[pyfunction]
#[pyo3(signature = (eval_thetas, model, discrimination, difficulty, n_replications, seed, config_toml=None, guessing=None))]
#[allow(clippy::too_many_arguments)]
#[allow(clippy::type_complexity)]
pub fn cat_conditional_statistics<'py>(
    py: Python<'py>,
    eval_thetas: PyReadonlyArray1<f64>,
    model: &str,
    discrimination: PyReadonlyArray1<f64>,
    difficulty: PyReadonlyArray2<f64>,
    n_replications: usize,
    seed: u64,
    config_toml: Option<&str>,
    guessing: Option<PyReadonlyArray1<f64>>,
) -> PyResult<(
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray1<f64>>,
    Bound<'py, PyArray1<f64>>,
)> {
    let bank = bank_from_arrays(model, &discrimination, &difficulty, guessing.as_ref())
        .map_err(to_py_err)?;
    let config = match config_toml {
        Some(text) => CatConfig::from_toml_str(text).map_err(to_py_err)?,
        None => CatConfig::new(bank.model()),
    };
    let thetas = eval_thetas.as_array().to_vec();

    let stats = py
        .detach(|| {
            let engine = CatEngine::new(&bank, &config)?;
            conditional_statistics(&engine, &thetas, n_replications, seed)
        })
        .map_err(to_py_err)?;

    let bias: Array1<f64> = stats.iter().map(|s| s.bias).collect();
    let mse: Array1<f64> = stats.iter().map(|s| s.mse).collect();
    let mean_items: Array1<f64> = stats.iter().map(|s| s.mean_items).collect();

    Ok((
        bias.to_pyarray(py),
        mse.to_pyarray(py),
        mean_items.to_pyarray(py),
    ))
}

/// Register CAT functions with the Python module
pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(cat_item_information, m)?)?;
    m.add_function(wrap_pyfunction!(cat_select_next_item, m)?)?;
    m.add_function(wrap_pyfunction!(cat_estimate_ability, m)?)?;
    m.add_function(wrap_pyfunction!(cat_evaluate_stopping, m)?)?;
    m.add_function(wrap_pyfunction!(cat_conditional_statistics, m)?)?;
    Ok(())
}
