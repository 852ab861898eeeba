//! Session driver tying selection, estimation and stopping together.
//!
//! The engine borrows an immutable bank and configuration and keeps nothing
//! between calls. Every step takes the caller's [`SessionState`] and returns an
//! updated copy, so a session can be abandoned, cloned or resumed at any point
//! between items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::CatConfig;
use crate::error::{CatError, Result};
use crate::estimation::{estimate_ability_from, AbilityEstimate};
use crate::item::{ItemBank, ItemId, ItemRow};
use crate::selection::{select_next_item, ExposureTable, Selection};
use crate::stopping::{StopReason, StoppingInput, TestStatus};

/// One answered item. Never changed once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub item_id: ItemId,
    /// 0/1 for dichotomous items, 0-based category index for GRM items.
    pub response: u32,
    pub timestamp: DateTime<Utc>,
}

/// Caller-owned state of one participant's test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub participant_id: String,
    /// Seed for random selection, derived from the participant id.
    pub seed: u64,
    /// Administered items in presentation order.
    pub administered: Vec<ItemId>,
    pub responses: Vec<ResponseRecord>,
    pub estimate: AbilityEstimate,
    /// Estimate after each response, oldest first.
    pub trajectory: Vec<AbilityEstimate>,
    pub status: TestStatus,
}

impl SessionState {
    pub fn n_administered(&self) -> usize {
        self.administered.len()
    }

    /// `(item, response)` pairs in answer order.
    pub fn response_pairs(&self) -> Vec<(ItemId, u32)> {
        self.responses
            .iter()
            .map(|r| (r.item_id.clone(), r.response))
            .collect()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            participant_id: self.participant_id.clone(),
            theta: self.estimate.theta,
            se: self.estimate.se,
            converged: self.estimate.converged,
            n_items: self.administered.len(),
            status: self.status.clone(),
        }
    }
}

/// Final report of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub participant_id: String,
    pub theta: f64,
    #[serde(with = "crate::estimation::standard_error_serde")]
    pub se: f64,
    pub converged: bool,
    pub n_items: usize,
    pub status: TestStatus,
}

/// Stable 64-bit FNV-1a hash, used to tie random selection to a participant.
pub fn participant_seed(participant_id: &str) -> u64 {
    participant_id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        })
}

/// Stateless driver over a validated bank and configuration.
#[derive(Debug, Clone, Copy)]
pub struct CatEngine<'a> {
    bank: &'a ItemBank,
    config: &'a CatConfig,
}

impl<'a> CatEngine<'a> {
    /// Validate the configuration against the bank. Fails before any item is served.
    pub fn new(bank: &'a ItemBank, config: &'a CatConfig) -> Result<Self> {
        config.validate_for(bank)?;
        Ok(Self { bank, config })
    }

    pub fn bank(&self) -> &'a ItemBank {
        self.bank
    }

    pub fn config(&self) -> &'a CatConfig {
        self.config
    }

    /// Fresh session at the prior.
    pub fn start(&self, participant_id: impl Into<String>) -> SessionState {
        let participant_id = participant_id.into();
        SessionState {
            seed: participant_seed(&participant_id),
            participant_id,
            administered: Vec::new(),
            responses: Vec::new(),
            estimate: AbilityEstimate::from_prior(&self.config.estimator),
            trajectory: Vec::new(),
            status: TestStatus::Active,
        }
    }

    /// Next item for an active session, or `Exhausted`.
    pub fn next_item(&self, state: &SessionState, exposure: Option<&ExposureTable>) -> Selection {
        if state.status.is_terminal() {
            return Selection::Exhausted;
        }
        select_next_item(
            state.estimate.theta,
            &state.administered,
            self.bank,
            &self.config.selection,
            exposure,
            state.seed,
        )
    }

    /// Select the next item, stopping the session with `BankExhausted` when none is left.
    pub fn advance(
        &self,
        state: &SessionState,
        exposure: Option<&ExposureTable>,
    ) -> (SessionState, Option<ItemId>) {
        if state.status.is_terminal() {
            return (state.clone(), None);
        }
        match self.next_item(state, exposure) {
            Selection::Item(id) => (state.clone(), Some(id)),
            Selection::Exhausted => {
                let mut next = state.clone();
                next.status = TestStatus::Stopped(StopReason::BankExhausted);
                info!(
                    participant = %state.participant_id,
                    n_items = state.n_administered(),
                    "session stopped: bank_exhausted"
                );
                (next, None)
            }
        }
    }

    /// Record a response and return the updated session.
    ///
    /// Ability is re-estimated from the full history, starting at the previous
    /// theta, and the stopping rule is applied to the new estimate.
    #[instrument(skip(self, state), fields(participant = %state.participant_id))]
    pub fn record_response(
        &self,
        state: &SessionState,
        item_id: ItemId,
        response: u32,
    ) -> Result<SessionState> {
        self.record_response_at(state, item_id, response, Utc::now())
    }

    pub fn record_response_at(
        &self,
        state: &SessionState,
        item_id: ItemId,
        response: u32,
        timestamp: DateTime<Utc>,
    ) -> Result<SessionState> {
        if state.status.is_terminal() {
            return Err(CatError::SessionFinished);
        }
        let item = self
            .bank
            .get(&item_id)
            .ok_or_else(|| CatError::UnknownItem(item_id.clone()))?;
        if state.administered.contains(&item_id) {
            return Err(CatError::AlreadyAdministered(item_id));
        }
        let categories = item.model.n_categories();
        if response as usize >= categories {
            return Err(CatError::InvalidResponse {
                item: item_id,
                response,
                categories,
            });
        }

        let mut next = state.clone();
        next.administered.push(item_id.clone());
        next.responses.push(ResponseRecord {
            item_id,
            response,
            timestamp,
        });

        let estimate = estimate_ability_from(
            &next.response_pairs(),
            self.bank,
            &self.config.estimator,
            Some(state.estimate.theta),
        );
        next.estimate = estimate;
        next.trajectory.push(estimate);

        let bank_exhausted = next.administered.len() >= self.bank.len();
        next.status = state.status.advance(
            &self.config.stopping,
            &StoppingInput {
                administered: next.administered.len(),
                se: estimate.se,
                bank_exhausted,
            },
        );

        debug!(
            theta = estimate.theta,
            se = estimate.se,
            n_items = next.administered.len(),
            "ability updated"
        );
        if let TestStatus::Stopped(reason) = &next.status {
            info!(
                participant = %next.participant_id,
                theta = estimate.theta,
                se = estimate.se,
                n_items = next.administered.len(),
                "session stopped: {reason}"
            );
        }

        Ok(next)
    }
}

/// Start a session, or an already-aborted one when the bank and configuration
/// do not fit together.
pub fn start_session(
    bank: &ItemBank,
    config: &CatConfig,
    participant_id: impl Into<String>,
) -> SessionState {
    let participant_id = participant_id.into();
    match CatEngine::new(bank, config) {
        Ok(engine) => engine.start(participant_id),
        Err(err) => aborted_session(config, participant_id, &err),
    }
}

/// Build the bank from raw rows for the configured model and start a session.
///
/// A bank that does not fit the configuration (missing parameter columns,
/// unusable parameters, duplicate ids) yields an aborted session and no bank.
/// Errors that are not about configuration are returned as-is.
pub fn start_session_from_rows(
    rows: Vec<ItemRow>,
    config: &CatConfig,
    participant_id: impl Into<String>,
) -> Result<(Option<ItemBank>, SessionState)> {
    let participant_id = participant_id.into();
    let bank = config
        .validate()
        .and_then(|()| ItemBank::from_rows_with_gap(config.model, rows, config.threshold_gap));
    match bank {
        Ok(bank) => {
            let state = start_session(&bank, config, participant_id);
            Ok((Some(bank), state))
        }
        Err(err) if err.is_configuration() => {
            Ok((None, aborted_session(config, participant_id, &err)))
        }
        Err(err) => Err(err),
    }
}

fn aborted_session(config: &CatConfig, participant_id: String, err: &CatError) -> SessionState {
    tracing::error!(participant = %participant_id, "session aborted: {err}");
    SessionState {
        seed: participant_seed(&participant_id),
        participant_id,
        administered: Vec::new(),
        responses: Vec::new(),
        estimate: AbilityEstimate::from_prior(&config.estimator),
        trajectory: Vec::new(),
        status: TestStatus::Aborted(err.to_string()),
    }
}
