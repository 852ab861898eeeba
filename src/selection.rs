//! Next-item selection.
//!
//! Candidates are the bank minus the administered items. Content quotas and an
//! exposure-rate cap then narrow the pool before the criterion ranks what is
//! left. Exact ties go to the lowest item id so repeated calls agree.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use rand::prelude::*;
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CatError, Result};
use crate::item::{id_set, Item, ItemBank, ItemId};
use crate::utils::quadrature_grid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionCriterion {
    /// Item information as ranked for selection (GRM uses the approximation).
    #[default]
    MaxInformation,
    /// Exact Fisher information.
    MaxFisherInformation,
    /// Mean KL divergence over an interval around the current estimate.
    KullbackLeibler,
    /// Uniform draw from the eligible pool.
    Random,
}

impl fmt::Display for SelectionCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectionCriterion::MaxInformation => "MI",
            SelectionCriterion::MaxFisherInformation => "MFI",
            SelectionCriterion::KullbackLeibler => "KL",
            SelectionCriterion::Random => "RANDOM",
        };
        f.write_str(name)
    }
}

impl FromStr for SelectionCriterion {
    type Err = CatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mi" | "max_information" => Ok(SelectionCriterion::MaxInformation),
            "mfi" | "fisher" | "max_fisher_information" => {
                Ok(SelectionCriterion::MaxFisherInformation)
            }
            "kl" | "kullback_leibler" => Ok(SelectionCriterion::KullbackLeibler),
            "random" | "rand" => Ok(SelectionCriterion::Random),
            _ => Err(CatError::InvalidCriterion(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSettings {
    pub criterion: SelectionCriterion,
    /// Half-width of the KL interval before it narrows with test length.
    pub kl_delta: f64,
    pub kl_points: usize,
    /// Items at or above this population exposure rate are skipped.
    pub max_exposure_rate: Option<f64>,
    /// Maximum number of items per content area.
    pub content_quotas: BTreeMap<String, usize>,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            criterion: SelectionCriterion::default(),
            kl_delta: 1.0,
            kl_points: 11,
            max_exposure_rate: None,
            content_quotas: BTreeMap::new(),
        }
    }
}

impl SelectionSettings {
    pub fn with_criterion(criterion: SelectionCriterion) -> Self {
        Self {
            criterion,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.kl_delta > 0.0) || self.kl_points < 2 {
            return Err(CatError::InvalidConfig(format!(
                "KL interval needs kl_delta > 0 and at least 2 points, got {} / {}",
                self.kl_delta, self.kl_points
            )));
        }
        if let Some(rate) = self.max_exposure_rate {
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(CatError::InvalidConfig(format!(
                    "max_exposure_rate must lie in (0, 1], got {rate}"
                )));
            }
        }
        Ok(())
    }
}

/// Population exposure counts, owned and updated by the caller between sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExposureTable {
    sessions: u64,
    administrations: HashMap<ItemId, u64>,
}

impl ExposureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Count one finished session and the items it administered.
    pub fn record_session<'a>(&mut self, administered: impl IntoIterator<Item = &'a ItemId>) {
        self.sessions += 1;
        for id in administered {
            *self.administrations.entry(id.clone()).or_insert(0) += 1;
        }
    }

    pub fn administrations(&self, id: &ItemId) -> u64 {
        self.administrations.get(id).copied().unwrap_or(0)
    }

    /// Share of sessions that administered `id`; zero before any session.
    pub fn exposure_rate(&self, id: &ItemId) -> f64 {
        if self.sessions == 0 {
            return 0.0;
        }
        self.administrations(id) as f64 / self.sessions as f64
    }
}

/// Outcome of a selection request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Item(ItemId),
    /// No eligible item is left in the bank.
    Exhausted,
}

impl Selection {
    pub fn item(&self) -> Option<&ItemId> {
        match self {
            Selection::Item(id) => Some(id),
            Selection::Exhausted => None,
        }
    }
}

/// Pick the next item for a participant at `theta`.
///
/// `seed` drives the `Random` criterion and is combined with the number of
/// administered items so each step of a session draws differently.
pub fn select_next_item(
    theta: f64,
    administered: &[ItemId],
    bank: &ItemBank,
    settings: &SelectionSettings,
    exposure: Option<&ExposureTable>,
    seed: u64,
) -> Selection {
    let candidates = eligible_items(administered, bank, settings, exposure);
    if candidates.is_empty() {
        debug!(administered = administered.len(), "item bank exhausted");
        return Selection::Exhausted;
    }

    if settings.criterion == SelectionCriterion::Random {
        let mut rng = Pcg64::seed_from_u64(seed.wrapping_add(administered.len() as u64));
        let pick = rng.random_range(0..candidates.len());
        return Selection::Item(candidates[pick].id.clone());
    }

    let scores = item_scores(theta, &candidates, settings, administered.len());
    let mut best: Option<(&ItemId, f64)> = None;
    for (item, score) in candidates.iter().zip(scores) {
        let score = if score.is_nan() {
            f64::NEG_INFINITY
        } else {
            score
        };
        best = match best {
            Some((id, best_score))
                if score < best_score || (score == best_score && *id <= item.id) =>
            {
                Some((id, best_score))
            }
            _ => Some((&item.id, score)),
        };
    }

    match best {
        Some((id, _)) => Selection::Item(id.clone()),
        None => Selection::Exhausted,
    }
}

/// Criterion value of each candidate; higher is better. `Random` scores all zero.
pub fn item_scores(
    theta: f64,
    candidates: &[&Item],
    settings: &SelectionSettings,
    n_administered: usize,
) -> Vec<f64> {
    match settings.criterion {
        SelectionCriterion::MaxInformation => candidates
            .iter()
            .map(|item| item.model.information(theta))
            .collect(),
        SelectionCriterion::MaxFisherInformation => candidates
            .iter()
            .map(|item| item.model.fisher_information(theta))
            .collect(),
        SelectionCriterion::KullbackLeibler => {
            let delta = settings.kl_delta / (n_administered.max(1) as f64).sqrt();
            let grid = quadrature_grid(theta - delta, theta + delta, settings.kl_points);
            candidates
                .iter()
                .map(|item| {
                    grid.iter()
                        .map(|&t| item.model.kl_divergence(theta, t))
                        .sum::<f64>()
                        / grid.len() as f64
                })
                .collect()
        }
        SelectionCriterion::Random => vec![0.0; candidates.len()],
    }
}

/// Unadministered items after content quotas and the exposure cap.
///
/// A constraint that would remove every remaining item is relaxed instead, so
/// only a genuinely empty bank reports exhaustion.
pub fn eligible_items<'a>(
    administered: &[ItemId],
    bank: &'a ItemBank,
    settings: &SelectionSettings,
    exposure: Option<&ExposureTable>,
) -> Vec<&'a Item> {
    let seen = id_set(administered);
    let mut candidates: Vec<&Item> = bank
        .items()
        .iter()
        .filter(|item| !seen.contains(&item.id))
        .collect();
    if candidates.is_empty() {
        return candidates;
    }

    if !settings.content_quotas.is_empty() {
        let mut used: HashMap<&str, usize> = HashMap::new();
        for area in administered
            .iter()
            .filter_map(|id| bank.get(id)?.content_area.as_deref())
        {
            *used.entry(area).or_insert(0) += 1;
        }
        let within_quota = |item: &&Item| match item.content_area.as_deref() {
            Some(area) => match settings.content_quotas.get(area) {
                Some(&quota) => used.get(area).copied().unwrap_or(0) < quota,
                None => true,
            },
            None => true,
        };
        candidates = relax_if_empty(candidates, within_quota, "content quota");
    }

    if let (Some(cap), Some(table)) = (settings.max_exposure_rate, exposure) {
        let under_cap = |item: &&Item| table.exposure_rate(&item.id) < cap;
        candidates = relax_if_empty(candidates, under_cap, "exposure cap");
    }

    candidates
}

fn relax_if_empty<'a>(
    candidates: Vec<&'a Item>,
    keep: impl Fn(&&'a Item) -> bool,
    constraint: &str,
) -> Vec<&'a Item> {
    let filtered: Vec<&Item> = candidates.iter().copied().filter(|item| keep(item)).collect();
    if filtered.is_empty() {
        warn!(
            constraint,
            remaining = candidates.len(),
            "constraint would exclude every remaining item, relaxing it"
        );
        candidates
    } else {
        filtered
    }
}
