//! Computerized adaptive testing engine built on item response theory.
//!
//! This crate provides:
//! - Item banks for 1PL, 2PL, 3PL and graded response (GRM) items
//! - Response probabilities, Fisher information and KL divergence per item
//! - Ability estimation (ML, MAP and EAP) with standard errors
//! - Item selection (MI, MFI, KL, Random) under exposure and content constraints
//! - A stopping-rule state machine and a stateless session driver
//! - Monte Carlo evaluation of a test design
//! - Optional Python bindings (`python` feature) and a CLI (`cli` feature)

#[cfg(feature = "python")]
use pyo3::prelude::*;

pub mod utils;

pub mod config;
pub mod error;
pub mod estimation;
pub mod item;
pub mod probability;
pub mod selection;
pub mod session;
pub mod simulation;
pub mod stopping;

#[cfg(feature = "python")]
pub mod python;

pub use config::CatConfig;
pub use error::{CatError, Result};
pub use estimation::{
    estimate_ability, estimate_ability_from, AbilityEstimate, EstimationMethod, EstimatorSettings,
    Prior,
};
pub use item::{Item, ItemBank, ItemId, ItemModel, ItemRow, ModelFamily};
pub use selection::{
    select_next_item, ExposureTable, Selection, SelectionCriterion, SelectionSettings,
};
pub use session::{
    start_session, start_session_from_rows, CatEngine, ResponseRecord, SessionState,
    SessionSummary,
};
pub use simulation::{
    conditional_statistics, population_statistics, simulate_batch, simulate_session,
    ConditionalStats, PopulationStats,
};
pub use stopping::{evaluate_stopping, StopReason, StoppingInput, StoppingRule, TestStatus};

/// Python module for inrep_cat
#[cfg(feature = "python")]
#[pymodule]
fn inrep_cat(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register(m)?;
    Ok(())
}
