//! Item parameter model and the validated item bank.
//!
//! The bank is built once from raw table rows, repaired and checked against the
//! configured model family, and is immutable afterwards. It is `Send + Sync` and
//! meant to be shared by reference across any number of concurrent sessions.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CatError, Result};

/// Minimum distance enforced between consecutive GRM thresholds.
pub const DEFAULT_THRESHOLD_GAP: f64 = 0.1;

/// Guessing parameter used for 3PL items with no `c` value.
pub const DEFAULT_GUESSING: f64 = 0.15;

/// Item identifier. Numeric ids order numerically and sort before names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Num(u64),
    Name(String),
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Num(n) => write!(f, "{n}"),
            ItemId::Name(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ItemId {
    fn from(n: u64) -> Self {
        ItemId::Num(n)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId::Name(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        ItemId::Name(s)
    }
}

/// IRT model family configured for a bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelFamily {
    OnePl,
    TwoPl,
    ThreePl,
    Grm,
}

impl ModelFamily {
    /// Discrimination used when an item leaves `a` empty.
    pub fn default_discrimination(self) -> f64 {
        match self {
            ModelFamily::OnePl | ModelFamily::TwoPl => 1.0,
            ModelFamily::ThreePl => 1.2,
            ModelFamily::Grm => 1.5,
        }
    }

    /// Parameter columns the bank must carry for this family.
    pub fn required_columns(self) -> &'static [&'static str] {
        match self {
            ModelFamily::OnePl => &["b"],
            ModelFamily::TwoPl => &["a", "b"],
            ModelFamily::ThreePl => &["a", "b", "c"],
            ModelFamily::Grm => &["a", "b1..bk"],
        }
    }

    pub fn is_dichotomous(self) -> bool {
        !matches!(self, ModelFamily::Grm)
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelFamily::OnePl => "1PL",
            ModelFamily::TwoPl => "2PL",
            ModelFamily::ThreePl => "3PL",
            ModelFamily::Grm => "GRM",
        };
        f.write_str(name)
    }
}

impl FromStr for ModelFamily {
    type Err = CatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1pl" | "rasch" => Ok(ModelFamily::OnePl),
            "2pl" => Ok(ModelFamily::TwoPl),
            "3pl" => Ok(ModelFamily::ThreePl),
            "grm" | "graded" => Ok(ModelFamily::Grm),
            _ => Err(CatError::InvalidModel(s.to_string())),
        }
    }
}

impl TryFrom<String> for ModelFamily {
    type Error = CatError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ModelFamily> for String {
    fn from(m: ModelFamily) -> Self {
        m.to_string()
    }
}

/// Item parameters, one variant per model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ItemModel {
    OnePl { b: f64 },
    TwoPl { a: f64, b: f64 },
    ThreePl { a: f64, b: f64, c: f64 },
    Grm { a: f64, thresholds: Vec<f64> },
}

impl ItemModel {
    pub fn family(&self) -> ModelFamily {
        match self {
            ItemModel::OnePl { .. } => ModelFamily::OnePl,
            ItemModel::TwoPl { .. } => ModelFamily::TwoPl,
            ItemModel::ThreePl { .. } => ModelFamily::ThreePl,
            ItemModel::Grm { .. } => ModelFamily::Grm,
        }
    }

    pub fn discrimination(&self) -> f64 {
        match self {
            ItemModel::OnePl { .. } => 1.0,
            ItemModel::TwoPl { a, .. } | ItemModel::ThreePl { a, .. } | ItemModel::Grm { a, .. } => {
                *a
            }
        }
    }

    /// Number of response categories (2 for dichotomous items).
    pub fn n_categories(&self) -> usize {
        match self {
            ItemModel::Grm { thresholds, .. } => thresholds.len() + 1,
            _ => 2,
        }
    }
}

/// One row of the item bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub model: ItemModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_area: Option<String>,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, model: ItemModel) -> Self {
        Self {
            id: id.into(),
            model,
            content_area: None,
        }
    }

    pub fn one_pl(id: impl Into<ItemId>, b: f64) -> Self {
        Self::new(id, ItemModel::OnePl { b })
    }

    pub fn two_pl(id: impl Into<ItemId>, a: f64, b: f64) -> Self {
        Self::new(id, ItemModel::TwoPl { a, b })
    }

    pub fn three_pl(id: impl Into<ItemId>, a: f64, b: f64, c: f64) -> Self {
        Self::new(id, ItemModel::ThreePl { a, b, c })
    }

    pub fn grm(id: impl Into<ItemId>, a: f64, thresholds: Vec<f64>) -> Self {
        Self::new(id, ItemModel::Grm { a, thresholds })
    }

    pub fn with_content_area(mut self, area: impl Into<String>) -> Self {
        self.content_area = Some(area.into());
        self
    }
}

/// Raw item-bank row as it arrives from a table or JSON document.
///
/// GRM thresholds may come either as a `thresholds` list or as `b1`, `b2`, ...
/// columns, which land in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRow {
    pub item_id: ItemId,
    #[serde(default)]
    pub a: Option<f64>,
    #[serde(default)]
    pub b: Option<f64>,
    #[serde(default)]
    pub c: Option<f64>,
    #[serde(default)]
    pub thresholds: Option<Vec<f64>>,
    #[serde(default)]
    pub content_area: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ItemRow {
    pub fn new(item_id: impl Into<ItemId>) -> Self {
        Self {
            item_id: item_id.into(),
            a: None,
            b: None,
            c: None,
            thresholds: None,
            content_area: None,
            extra: BTreeMap::new(),
        }
    }

    /// Thresholds from the explicit list, or from `b1..bk` columns in index order.
    fn threshold_values(&self) -> Option<Vec<f64>> {
        if let Some(t) = &self.thresholds {
            if !t.is_empty() {
                return Some(t.clone());
            }
        }
        let mut indexed: Vec<(u32, f64)> = self
            .extra
            .iter()
            .filter_map(|(key, value)| {
                let idx = key.strip_prefix('b')?.parse::<u32>().ok()?;
                Some((idx, value.as_f64()?))
            })
            .collect();
        if indexed.is_empty() {
            return None;
        }
        indexed.sort_by_key(|(idx, _)| *idx);
        Some(indexed.into_iter().map(|(_, v)| v).collect())
    }
}

/// Sort thresholds and push later ones up until consecutive values differ by at
/// least `min_gap`. Returns `true` when anything changed.
pub fn repair_thresholds(thresholds: &mut [f64], min_gap: f64) -> bool {
    let original = thresholds.to_vec();
    thresholds.sort_by(f64::total_cmp);
    for k in 1..thresholds.len() {
        let floor = thresholds[k - 1] + min_gap;
        if thresholds[k] < floor {
            thresholds[k] = floor;
        }
    }
    original != thresholds
}

/// Immutable, validated item bank.
#[derive(Debug, Clone, Serialize)]
pub struct ItemBank {
    model: ModelFamily,
    items: Vec<Item>,
    #[serde(skip)]
    index: HashMap<ItemId, usize>,
}

impl ItemBank {
    /// Build a bank from raw rows with the default threshold gap.
    pub fn from_rows(model: ModelFamily, rows: Vec<ItemRow>) -> Result<Self> {
        Self::from_rows_with_gap(model, rows, DEFAULT_THRESHOLD_GAP)
    }

    pub fn from_rows_with_gap(model: ModelFamily, rows: Vec<ItemRow>, min_gap: f64) -> Result<Self> {
        if rows.is_empty() {
            return Err(CatError::EmptyBank);
        }
        check_columns(model, &rows)?;

        let items = rows
            .into_iter()
            .map(|row| item_from_row(model, row))
            .collect::<Result<Vec<_>>>()?;

        Self::from_items_with_gap(model, items, min_gap)
    }

    /// Build a bank from already-typed items.
    pub fn from_items(model: ModelFamily, items: Vec<Item>) -> Result<Self> {
        Self::from_items_with_gap(model, items, DEFAULT_THRESHOLD_GAP)
    }

    pub fn from_items_with_gap(
        model: ModelFamily,
        mut items: Vec<Item>,
        min_gap: f64,
    ) -> Result<Self> {
        if items.is_empty() {
            return Err(CatError::EmptyBank);
        }

        let mut index = HashMap::with_capacity(items.len());
        for (pos, item) in items.iter_mut().enumerate() {
            if item.model.family() != model {
                return Err(CatError::InvalidParameter {
                    item: item.id.clone(),
                    reason: format!(
                        "parameters are for the {} model, bank is {model}",
                        item.model.family()
                    ),
                });
            }
            validate_parameters(item, min_gap)?;
            if index.insert(item.id.clone(), pos).is_some() {
                return Err(CatError::DuplicateItem(item.id.clone()));
            }
        }

        debug!(model = %model, n_items = items.len(), "item bank loaded");
        Ok(Self {
            model,
            items,
            index,
        })
    }

    /// Parse a JSON array of rows.
    pub fn from_json_str(model: ModelFamily, json: &str) -> Result<Self> {
        let rows: Vec<ItemRow> = serde_json::from_str(json)?;
        Self::from_rows(model, rows)
    }

    pub fn from_path(model: ModelFamily, path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(model, &json)
    }

    pub fn model(&self) -> ModelFamily {
        self.model
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.index.get(id).map(|&pos| &self.items[pos])
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.index.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ItemId> {
        self.items.iter().map(|item| &item.id)
    }

    pub fn max_categories(&self) -> usize {
        self.items
            .iter()
            .map(|item| item.model.n_categories())
            .max()
            .unwrap_or(2)
    }

    /// Selection information of every item at `theta`, in bank order.
    pub fn item_information(&self, theta: f64) -> Array1<f64> {
        self.items
            .iter()
            .map(|item| item.model.information(theta))
            .collect()
    }

    /// Summed Fisher information of the given items at `theta`.
    pub fn test_information<'a>(
        &self,
        theta: f64,
        ids: impl IntoIterator<Item = &'a ItemId>,
    ) -> f64 {
        ids.into_iter()
            .filter_map(|id| self.get(id))
            .map(|item| item.model.fisher_information(theta))
            .sum()
    }

    /// Total bank information evaluated over a grid of thetas.
    pub fn information_curve(&self, thetas: &Array1<f64>) -> Array1<f64> {
        thetas.mapv(|theta| {
            self.items
                .iter()
                .map(|item| item.model.fisher_information(theta))
                .sum()
        })
    }
}

fn check_columns(model: ModelFamily, rows: &[ItemRow]) -> Result<()> {
    let has_a = rows.iter().any(|r| r.a.is_some());
    let has_b = rows.iter().any(|r| r.b.is_some());
    let has_c = rows.iter().any(|r| r.c.is_some());
    let has_thresholds = rows.iter().any(|r| r.threshold_values().is_some());

    let present = |column: &str| match column {
        "a" => has_a,
        "b" => has_b,
        "c" => has_c,
        _ => has_thresholds,
    };

    match model
        .required_columns()
        .iter()
        .find(|column| !present(**column))
    {
        Some(&column) => Err(CatError::MissingColumn { model, column }),
        None => Ok(()),
    }
}

fn item_from_row(model: ModelFamily, row: ItemRow) -> Result<Item> {
    let a = match (model, row.a) {
        (ModelFamily::OnePl, _) => 1.0,
        (_, Some(a)) => a,
        (_, None) => {
            let a = model.default_discrimination();
            debug!(item = %row.item_id, a, "discrimination missing, using model default");
            a
        }
    };

    let require_b = || {
        row.b.ok_or_else(|| CatError::InvalidParameter {
            item: row.item_id.clone(),
            reason: "difficulty 'b' is missing".to_string(),
        })
    };

    let params = match model {
        ModelFamily::OnePl => ItemModel::OnePl { b: require_b()? },
        ModelFamily::TwoPl => ItemModel::TwoPl { a, b: require_b()? },
        ModelFamily::ThreePl => {
            let c = row.c.unwrap_or_else(|| {
                debug!(item = %row.item_id, "guessing missing, using default");
                DEFAULT_GUESSING
            });
            ItemModel::ThreePl {
                a,
                b: require_b()?,
                c,
            }
        }
        ModelFamily::Grm => {
            let thresholds =
                row.threshold_values()
                    .ok_or_else(|| CatError::InvalidParameter {
                        item: row.item_id.clone(),
                        reason: "no thresholds given".to_string(),
                    })?;
            ItemModel::Grm { a, thresholds }
        }
    };

    Ok(Item {
        id: row.item_id,
        model: params,
        content_area: row.content_area,
    })
}

fn validate_parameters(item: &mut Item, min_gap: f64) -> Result<()> {
    let id = item.id.clone();
    let invalid = |reason: String| CatError::InvalidParameter {
        item: id.clone(),
        reason,
    };

    let a = item.model.discrimination();
    if !a.is_finite() || a <= 0.0 {
        return Err(invalid(format!("discrimination must be positive, got {a}")));
    }

    match &mut item.model {
        ItemModel::OnePl { b } | ItemModel::TwoPl { b, .. } => {
            if !b.is_finite() {
                return Err(invalid(format!("difficulty must be finite, got {b}")));
            }
        }
        ItemModel::ThreePl { b, c, .. } => {
            if !b.is_finite() {
                return Err(invalid(format!("difficulty must be finite, got {b}")));
            }
            if !(0.0..1.0).contains(&*c) {
                return Err(invalid(format!("guessing must lie in [0, 1), got {c}")));
            }
        }
        ItemModel::Grm { thresholds, .. } => {
            if thresholds.is_empty() {
                return Err(invalid("no thresholds given".to_string()));
            }
            if thresholds.iter().any(|t| !t.is_finite()) {
                return Err(invalid("thresholds must be finite".to_string()));
            }
            if repair_thresholds(thresholds, min_gap) {
                warn!(
                    item = %id,
                    repaired = ?thresholds,
                    "GRM thresholds were not strictly increasing, repaired"
                );
            }
        }
    }
    Ok(())
}

/// Collect ids into a set, used for set-difference style lookups.
pub(crate) fn id_set<'a>(ids: impl IntoIterator<Item = &'a ItemId>) -> HashSet<&'a ItemId> {
    ids.into_iter().collect()
}
