//! Filter, sort and paginate projection of the fleet
//!
//! Everything here is pure: the same snapshot and the same settings always
//! produce the same rows.

use crate::model::{Engine, Model, ModelStatus, UsageType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Predicates AND-ed over the fleet; `None` and an empty search match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetFilter {
    /// Case-insensitive substring of the model name
    pub search: String,
    pub status: Option<ModelStatus>,
    pub engine: Option<Engine>,
    pub usage: Option<UsageType>,
}

impl FleetFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn with_status(mut self, status: ModelStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_usage(mut self, usage: UsageType) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Match `model`, judging status by `status` (the display status)
    pub fn matches(&self, model: &Model, status: ModelStatus) -> bool {
        let search = self.search.trim();
        (search.is_empty() || model.name.to_lowercase().contains(&search.to_lowercase()))
            && self.status.is_none_or(|s| s == status)
            && self.engine.is_none_or(|e| e == model.engine)
            && self.usage.is_none_or(|u| u == model.usage_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    Name,
    Status,
    Engine,
    CreatedAt,
}

impl std::str::FromStr for SortKey {
    type Err = crate::error::FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "name" => Ok(Self::Name),
            "status" => Ok(Self::Status),
            "engine" => Ok(Self::Engine),
            "createdat" | "created" => Ok(Self::CreatedAt),
            other => Err(crate::error::FleetError::validation(format!(
                "unknown sort key '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

/// Active sort column and direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortState {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for SortState {
    /// Newest models first
    fn default() -> Self {
        Self {
            key: SortKey::CreatedAt,
            direction: SortDirection::Desc,
        }
    }
}

impl SortState {
    pub fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    /// Select a column: the active one flips direction, a new one starts ascending
    pub fn select(&mut self, key: SortKey) {
        if self.key == key {
            self.direction = self.direction.flipped();
        } else {
            self.key = key;
            self.direction = SortDirection::Asc;
        }
    }

    /// Compare two models under this sort, judging status by display status
    pub fn compare(
        &self,
        (a, a_status): (&Model, ModelStatus),
        (b, b_status): (&Model, ModelStatus),
    ) -> Ordering {
        let ord = match self.key {
            // Case variants of one name fall back to byte order
            SortKey::Name => a
                .name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name)),
            SortKey::Status => a_status.as_str().cmp(b_status.as_str()),
            SortKey::Engine => a.engine.as_str().cmp(b.engine.as_str()),
            SortKey::CreatedAt => a
                .created_at
                .timestamp_millis()
                .cmp(&b.created_at.timestamp_millis()),
        };

        match self.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub fn new(number: usize, size: usize) -> Self {
        Self {
            number: number.max(1),
            size: size.max(1),
        }
    }

    /// A single page large enough for any fleet
    pub fn all() -> Self {
        Self {
            number: 1,
            size: usize::MAX,
        }
    }

    fn offset(&self) -> usize {
        (self.number - 1).saturating_mul(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// One row of the projected fleet
#[derive(Debug, Clone, PartialEq)]
pub struct FleetRow {
    pub model: Model,
    /// Status used for filtering, sorting and action gating
    pub display_status: ModelStatus,
    pub stalled: bool,
    pub selected: bool,
}

impl FleetRow {
    pub fn enabled_actions(&self) -> Vec<crate::status::ModelAction> {
        self.display_status.enabled_actions()
    }
}

/// A page of filtered and sorted rows
#[derive(Debug, Clone, PartialEq)]
pub struct FleetPage {
    pub rows: Vec<FleetRow>,
    /// Rows matching the filter across all pages
    pub total: usize,
    pub page: Page,
    pub total_pages: usize,
}

/// Filter, sort, then cut one page out of `rows`
///
/// Rows with equal sort keys keep their input order.
pub fn project(rows: Vec<FleetRow>, filter: &FleetFilter, sort: SortState, page: Page) -> FleetPage {
    let mut matching: Vec<FleetRow> = rows
        .into_iter()
        .filter(|row| filter.matches(&row.model, row.display_status))
        .collect();

    matching.sort_by(|a, b| {
        sort.compare(
            (&a.model, a.display_status),
            (&b.model, b.display_status),
        )
    });

    let total = matching.len();
    let total_pages = total.div_ceil(page.size);
    let rows = matching
        .into_iter()
        .skip(page.offset())
        .take(page.size)
        .collect();

    FleetPage {
        rows,
        total,
        page,
        total_pages,
    }
}
