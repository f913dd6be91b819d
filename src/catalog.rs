use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category_id: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub provider_id: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Location {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRecord {
    pub id: String,
    pub location_id: String,
    pub template_id: String,
    pub price: f64,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// A price record joined with its location/provider/template context, as
/// considered during one search. Distance is filled in by the ranker once an
/// origin is known.
#[derive(Debug, Clone, Serialize)]
pub struct SearchCandidate {
    pub price_id: String,
    pub price: f64,
    pub comment: Option<String>,

    pub template_id: String,
    pub template_name: String,
    pub category_id: String,
    pub category_name: String,

    pub provider_id: String,
    pub provider_name: String,

    pub location_id: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    pub distance_miles: Option<f64>,
}

impl SearchCandidate {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        }
    }
}

/// Narrowing filters applied at retrieval time, not post-filters.
#[derive(Debug, Clone, Default)]
pub struct CandidateScope {
    pub location_id: Option<String>,
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSummary {
    pub categories: usize,
    pub templates: usize,
    pub providers: usize,
    pub locations: usize,
    pub price_records: usize,
}

/// Read path into the catalog/price store. The write path (provider CRUD)
/// lives elsewhere entirely; implementations only need consistent reads.
pub trait CatalogStore: Send + Sync {
    fn active_templates(&self) -> anyhow::Result<Vec<ProcedureTemplate>>;

    /// Every active price record whose template is in `template_ids`, joined
    /// with its active location and provider/category context. Distance is
    /// left unset.
    fn fetch_candidates(
        &self,
        template_ids: &HashSet<String>,
        scope: &CandidateScope,
    ) -> anyhow::Result<Vec<SearchCandidate>>;

    fn location_coordinates(&self, location_id: &str) -> anyhow::Result<Option<Coordinates>>;

    fn categories(&self) -> anyhow::Result<Vec<Category>>;

    fn summary(&self) -> anyhow::Result<CatalogSummary>;
}

/// On-disk snapshot format for the in-memory store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub templates: Vec<ProcedureTemplate>,
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub prices: Vec<PriceRecord>,
}

pub struct InMemoryCatalog {
    categories: HashMap<String, Category>,
    templates: HashMap<String, ProcedureTemplate>,
    providers: HashMap<String, Provider>,
    locations: HashMap<String, Location>,
    prices: Vec<PriceRecord>,
}

impl InMemoryCatalog {
    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        Self {
            categories: snapshot
                .categories
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect(),
            templates: snapshot
                .templates
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect(),
            providers: snapshot
                .providers
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
            locations: snapshot
                .locations
                .into_iter()
                .map(|l| (l.id.clone(), l))
                .collect(),
            prices: snapshot.prices,
        }
    }

    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read catalog file {}", path.display()))?;
        let snapshot: CatalogSnapshot = serde_json::from_str(&data)
            .with_context(|| format!("parse catalog file {}", path.display()))?;
        let catalog = Self::from_snapshot(snapshot);
        tracing::info!(
            templates = catalog.templates.len(),
            providers = catalog.providers.len(),
            locations = catalog.locations.len(),
            prices = catalog.prices.len(),
            "Loaded catalog snapshot"
        );
        Ok(catalog)
    }

    fn join_candidate(&self, price: &PriceRecord) -> Option<SearchCandidate> {
        let template = self.templates.get(&price.template_id)?;
        let location = self.locations.get(&price.location_id)?;
        let provider = self.providers.get(&location.provider_id)?;
        let category = self.categories.get(&template.category_id)?;

        Some(SearchCandidate {
            price_id: price.id.clone(),
            price: price.price,
            comment: price.comment.clone(),
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            category_id: category.id.clone(),
            category_name: category.name.clone(),
            provider_id: provider.id.clone(),
            provider_name: provider.name.clone(),
            location_id: location.id.clone(),
            street: location.street.clone(),
            city: location.city.clone(),
            state: location.state.clone(),
            postal_code: location.postal_code.clone(),
            latitude: location.latitude,
            longitude: location.longitude,
            distance_miles: None,
        })
    }
}

impl CatalogStore for InMemoryCatalog {
    fn active_templates(&self) -> anyhow::Result<Vec<ProcedureTemplate>> {
        Ok(self.templates.values().filter(|t| t.active).cloned().collect())
    }

    fn fetch_candidates(
        &self,
        template_ids: &HashSet<String>,
        scope: &CandidateScope,
    ) -> anyhow::Result<Vec<SearchCandidate>> {
        let mut out = Vec::new();
        for price in &self.prices {
            if !price.active || !template_ids.contains(&price.template_id) {
                continue;
            }
            if let Some(location_id) = scope.location_id.as_deref() {
                if price.location_id != location_id {
                    continue;
                }
            }
            let Some(location) = self.locations.get(&price.location_id) else {
                tracing::warn!(price_id = %price.id, "Price record references missing location; skipping");
                continue;
            };
            if !location.active {
                continue;
            }
            if let Some(provider_id) = scope.provider_id.as_deref() {
                if location.provider_id != provider_id {
                    continue;
                }
            }
            match self.join_candidate(price) {
                Some(c) => out.push(c),
                None => {
                    tracing::warn!(price_id = %price.id, "Price record has dangling references; skipping");
                }
            }
        }
        Ok(out)
    }

    fn location_coordinates(&self, location_id: &str) -> anyhow::Result<Option<Coordinates>> {
        Ok(self
            .locations
            .get(location_id)
            .and_then(|l| l.coordinates()))
    }

    fn categories(&self) -> anyhow::Result<Vec<Category>> {
        let mut out: Vec<Category> = self.categories.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn summary(&self) -> anyhow::Result<CatalogSummary> {
        Ok(CatalogSummary {
            categories: self.categories.len(),
            templates: self.templates.len(),
            providers: self.providers.len(),
            locations: self.locations.len(),
            price_records: self.prices.len(),
        })
    }
}
