use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::catalog::{CandidateScope, CatalogStore, SearchCandidate};
use crate::geo::{Coordinates, distance_miles};
use crate::geocode::Geocoder;
use crate::matcher::match_templates;
use crate::stats::{PriceStatistics, summarize};

pub const DEFAULT_RADIUS_MILES: f64 = 50.0;
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Price,
    Distance,
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub procedure_text: Option<String>,
    pub location_text: Option<String>,
    pub category_id: Option<String>,
    pub radius_miles: Option<f64>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub sort: SortKey,
    pub direction: SortDirection,
    pub page: usize,
    pub page_size: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            procedure_text: None,
            location_text: None,
            category_id: None,
            radius_miles: None,
            price_min: None,
            price_max: None,
            sort: SortKey::Price,
            direction: SortDirection::Asc,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    /// Client-side validation failure, rejected before any retrieval.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// Infrastructure failure in the retrieval collaborator.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultPage {
    pub results: Vec<SearchCandidate>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub page: SearchResultPage,
    pub stats: Option<PriceStatistics>,
}

pub struct SearchEngine {
    store: Arc<dyn CatalogStore>,
    geocoder: Arc<Geocoder>,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn CatalogStore>, geocoder: Arc<Geocoder>) -> Self {
        Self { store, geocoder }
    }

    /// One full search: geocode, match, retrieve, filter, summarize, sort,
    /// page. Statistics always cover the filtered-but-unpaginated set.
    pub async fn search(&self, query: SearchQuery) -> Result<SearchOutcome, SearchError> {
        validate(&query)?;
        let page = query.page.max(1);
        let page_size = query.page_size.clamp(1, MAX_PAGE_SIZE);

        // Geocoding failure is non-fatal: a location-less text search is valid.
        let origin = match query.location_text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => self.geocoder.resolve(text).await,
            _ => None,
        };

        let templates = self.store.active_templates()?;
        let template_ids = match_templates(
            &templates,
            query.procedure_text.as_deref(),
            query.category_id.as_deref(),
        );
        if template_ids.is_empty() {
            return Ok(SearchOutcome {
                page: empty_page(page, page_size),
                stats: None,
            });
        }

        let mut candidates = self
            .store
            .fetch_candidates(&template_ids, &CandidateScope::default())?;

        if let Some(origin) = origin {
            let radius = query.radius_miles.unwrap_or(DEFAULT_RADIUS_MILES);
            candidates = apply_radius_filter(candidates, origin, radius);
        }

        if let Some(floor) = query.price_min {
            candidates.retain(|c| c.price >= floor);
        }
        if let Some(ceiling) = query.price_max {
            candidates.retain(|c| c.price <= ceiling);
        }

        // Before sorting/paging, so paging can never change the statistics.
        let prices: Vec<f64> = candidates.iter().map(|c| c.price).collect();
        let stats = summarize(&prices);

        sort_candidates(&mut candidates, query.sort, query.direction, origin.is_some());

        let total = candidates.len();
        let total_pages = total.div_ceil(page_size);
        let results: Vec<SearchCandidate> = candidates
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(SearchOutcome {
            page: SearchResultPage {
                results,
                page,
                page_size,
                total,
                total_pages,
            },
            stats,
        })
    }

    /// Price statistics for one template, optionally restricted to the area
    /// around one of the catalog's own locations ("how do I compare locally").
    pub async fn template_stats(
        &self,
        template_id: &str,
        location_id: Option<&str>,
        radius_miles: Option<f64>,
    ) -> Result<Option<PriceStatistics>, SearchError> {
        if let Some(r) = radius_miles {
            if !r.is_finite() || r <= 0.0 {
                return Err(SearchError::InvalidQuery(
                    "radius must be a positive number of miles".to_string(),
                ));
            }
        }

        let template_ids: HashSet<String> = [template_id.to_string()].into_iter().collect();
        let mut candidates = self
            .store
            .fetch_candidates(&template_ids, &CandidateScope::default())?;

        // A location that cannot provide an origin (unknown or never geocoded)
        // degrades to unfiltered statistics, like an unresolvable search
        // location would.
        let origin = match location_id {
            Some(id) => {
                let coords = self.store.location_coordinates(id)?;
                if coords.is_none() {
                    tracing::warn!(location_id = %id, "No coordinates for stats origin; skipping distance filter");
                }
                coords
            }
            None => None,
        };

        if let Some(origin) = origin {
            let radius = radius_miles.unwrap_or(DEFAULT_RADIUS_MILES);
            candidates = apply_radius_filter(candidates, origin, radius);
        }

        let prices: Vec<f64> = candidates.iter().map(|c| c.price).collect();
        Ok(summarize(&prices))
    }
}

fn validate(query: &SearchQuery) -> Result<(), SearchError> {
    if let Some(r) = query.radius_miles {
        if !r.is_finite() || r <= 0.0 {
            return Err(SearchError::InvalidQuery(
                "radius must be a positive number of miles".to_string(),
            ));
        }
    }
    if let (Some(floor), Some(ceiling)) = (query.price_min, query.price_max) {
        if floor > ceiling {
            return Err(SearchError::InvalidQuery(
                "price_min must not exceed price_max".to_string(),
            ));
        }
    }
    Ok(())
}

/// Attaches distances from `origin` and drops candidates beyond `radius`.
/// Candidates without coordinates cannot be distance-filtered and are dropped
/// whenever a radius filter is active; an origin-less search never reaches
/// here and keeps them.
fn apply_radius_filter(
    candidates: Vec<SearchCandidate>,
    origin: Coordinates,
    radius: f64,
) -> Vec<SearchCandidate> {
    candidates
        .into_iter()
        .filter_map(|mut c| {
            let coords = c.coordinates()?;
            let d = distance_miles(origin, coords);
            if d > radius {
                return None;
            }
            c.distance_miles = Some(d);
            Some(c)
        })
        .collect()
}

fn sort_candidates(
    candidates: &mut [SearchCandidate],
    sort: SortKey,
    direction: SortDirection,
    has_origin: bool,
) {
    // Nothing to sort by without an origin.
    let (sort, direction) = if sort == SortKey::Distance && !has_origin {
        (SortKey::Name, SortDirection::Asc)
    } else {
        (sort, direction)
    };

    candidates.sort_by(|a, b| {
        let ord = match sort {
            SortKey::Price => a.price.total_cmp(&b.price),
            SortKey::Distance => a
                .distance_miles
                .unwrap_or(f64::INFINITY)
                .total_cmp(&b.distance_miles.unwrap_or(f64::INFINITY)),
            SortKey::Name => a.template_name.cmp(&b.template_name),
        };
        let ord = match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        };
        // Id tie-break keeps every ordering deterministic.
        ord.then_with(|| a.price_id.cmp(&b.price_id))
    });
}

fn empty_page(page: usize, page_size: usize) -> SearchResultPage {
    SearchResultPage {
        results: Vec::new(),
        page,
        page_size,
        total: 0,
        total_pages: 0,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use super::*;
    use crate::catalog::{
        CatalogSnapshot, Category, InMemoryCatalog, Location, PriceRecord, ProcedureTemplate,
        Provider,
    };
    use crate::geocode::GeocoderConfig;

    // The fallback centroid for ZIP 90210; candidate locations are placed at
    // pure-latitude offsets so their distances are predictable (1 degree of
    // latitude is about 69.1 miles).
    const ORIGIN_LAT: f64 = 34.0901;
    const ORIGIN_LON: f64 = -118.4065;
    const MILES_PER_LAT_DEGREE: f64 = 69.09;

    fn location(id: &str, lat: Option<f64>, lon: Option<f64>) -> Location {
        Location {
            id: id.to_string(),
            provider_id: "prov-1".to_string(),
            street: "1 Main St".to_string(),
            city: "Beverly Hills".to_string(),
            state: "CA".to_string(),
            postal_code: "90210".to_string(),
            latitude: lat,
            longitude: lon,
            active: true,
        }
    }

    fn price(id: &str, location_id: &str, template_id: &str, amount: f64) -> PriceRecord {
        PriceRecord {
            id: id.to_string(),
            location_id: location_id.to_string(),
            template_id: template_id.to_string(),
            price: amount,
            comment: None,
            active: true,
        }
    }

    /// Three MRI prices at roughly 2, 10, and 40 miles from the 90210
    /// centroid, plus one X-Ray price with no coordinates at all.
    fn snapshot() -> CatalogSnapshot {
        let at_miles = |m: f64| ORIGIN_LAT + m / MILES_PER_LAT_DEGREE;
        CatalogSnapshot {
            categories: vec![Category {
                id: "cat-imaging".to_string(),
                name: "Imaging".to_string(),
            }],
            templates: vec![
                ProcedureTemplate {
                    id: "tpl-mri".to_string(),
                    name: "MRI Brain without contrast".to_string(),
                    description: None,
                    category_id: "cat-imaging".to_string(),
                    active: true,
                },
                ProcedureTemplate {
                    id: "tpl-xray".to_string(),
                    name: "X-Ray Chest".to_string(),
                    description: None,
                    category_id: "cat-imaging".to_string(),
                    active: true,
                },
            ],
            providers: vec![Provider {
                id: "prov-1".to_string(),
                name: "Westside Imaging".to_string(),
                phone: None,
                website: None,
            }],
            locations: vec![
                location("loc-near", Some(at_miles(2.0)), Some(ORIGIN_LON)),
                location("loc-mid", Some(at_miles(10.0)), Some(ORIGIN_LON)),
                location("loc-far", Some(at_miles(40.0)), Some(ORIGIN_LON)),
                location("loc-nogeo", None, None),
            ],
            prices: vec![
                price("price-near", "loc-near", "tpl-mri", 650.0),
                price("price-mid", "loc-mid", "tpl-mri", 450.0),
                price("price-far", "loc-far", "tpl-mri", 300.0),
                price("price-nogeo", "loc-nogeo", "tpl-xray", 120.0),
            ],
        }
    }

    fn engine() -> SearchEngine {
        let store = Arc::new(InMemoryCatalog::from_snapshot(snapshot()));
        // No credential: ZIPs resolve from the fallback table, nothing else.
        let geocoder = Arc::new(Geocoder::new(GeocoderConfig::default()).unwrap());
        SearchEngine::new(store, geocoder)
    }

    fn result_ids(page: &SearchResultPage) -> Vec<&str> {
        page.results.iter().map(|c| c.price_id.as_str()).collect()
    }

    struct CountingStore {
        inner: InMemoryCatalog,
        fetches: AtomicUsize,
    }

    impl CatalogStore for CountingStore {
        fn active_templates(&self) -> anyhow::Result<Vec<ProcedureTemplate>> {
            self.inner.active_templates()
        }
        fn fetch_candidates(
            &self,
            template_ids: &HashSet<String>,
            scope: &CandidateScope,
        ) -> anyhow::Result<Vec<SearchCandidate>> {
            self.fetches.fetch_add(1, AtomicOrdering::SeqCst);
            self.inner.fetch_candidates(template_ids, scope)
        }
        fn location_coordinates(
            &self,
            location_id: &str,
        ) -> anyhow::Result<Option<Coordinates>> {
            self.inner.location_coordinates(location_id)
        }
        fn categories(&self) -> anyhow::Result<Vec<Category>> {
            self.inner.categories()
        }
        fn summary(&self) -> anyhow::Result<crate::catalog::CatalogSummary> {
            self.inner.summary()
        }
    }

    #[tokio::test]
    async fn mri_near_90210_filters_by_radius_and_summarizes_the_rest() {
        let outcome = engine()
            .search(SearchQuery {
                procedure_text: Some("MRI".to_string()),
                location_text: Some("90210".to_string()),
                radius_miles: Some(25.0),
                ..SearchQuery::default()
            })
            .await
            .unwrap();

        // The 40-mile record is out; the rest come back in ascending price.
        assert_eq!(result_ids(&outcome.page), vec!["price-mid", "price-near"]);
        assert_eq!(outcome.page.total, 2);
        for c in &outcome.page.results {
            assert!(c.distance_miles.unwrap() <= 25.0);
        }

        let stats = outcome.stats.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, 450.0);
        assert_eq!(stats.max, 650.0);
        assert_eq!(stats.mean, 550.0);
        assert_eq!(stats.median, 550.0);
    }

    #[tokio::test]
    async fn default_radius_is_fifty_miles() {
        let outcome = engine()
            .search(SearchQuery {
                procedure_text: Some("MRI".to_string()),
                location_text: Some("90210".to_string()),
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        // All three MRI records are within 50 miles.
        assert_eq!(outcome.page.total, 3);
    }

    #[tokio::test]
    async fn unresolvable_location_degrades_to_unfiltered_listing() {
        // "00000" is neither upstream-resolvable (no credential) nor in the
        // fallback table; with no procedure text either, everything matches.
        let outcome = engine()
            .search(SearchQuery {
                location_text: Some("00000".to_string()),
                ..SearchQuery::default()
            })
            .await
            .unwrap();

        assert_eq!(outcome.page.total, 4);
        // The coordinate-less candidate survives because no radius filter is
        // active, and its distance stays null.
        let nogeo = outcome
            .page
            .results
            .iter()
            .find(|c| c.price_id == "price-nogeo")
            .unwrap();
        assert!(nogeo.distance_miles.is_none());
    }

    #[tokio::test]
    async fn radius_filter_drops_coordinate_less_candidates() {
        let outcome = engine()
            .search(SearchQuery {
                location_text: Some("90210".to_string()),
                radius_miles: Some(1000.0),
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert!(
            !outcome
                .page
                .results
                .iter()
                .any(|c| c.price_id == "price-nogeo")
        );
        assert_eq!(outcome.page.total, 3);
    }

    #[tokio::test]
    async fn empty_match_short_circuits_before_retrieval() {
        let store = Arc::new(CountingStore {
            inner: InMemoryCatalog::from_snapshot(snapshot()),
            fetches: AtomicUsize::new(0),
        });
        let geocoder = Arc::new(Geocoder::new(GeocoderConfig::default()).unwrap());
        let engine = SearchEngine::new(store.clone(), geocoder);

        let outcome = engine
            .search(SearchQuery {
                procedure_text: Some("Nonexistent Procedure XYZ".to_string()),
                ..SearchQuery::default()
            })
            .await
            .unwrap();

        assert!(outcome.page.results.is_empty());
        assert_eq!(outcome.page.total, 0);
        assert_eq!(outcome.page.total_pages, 0);
        assert!(outcome.stats.is_none());
        assert_eq!(store.fetches.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_inputs_are_rejected_before_retrieval() {
        let e = engine()
            .search(SearchQuery {
                price_min: Some(100.0),
                price_max: Some(50.0),
                ..SearchQuery::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(e, SearchError::InvalidQuery(_)));

        let e = engine()
            .search(SearchQuery {
                radius_miles: Some(0.0),
                ..SearchQuery::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(e, SearchError::InvalidQuery(_)));

        let e = engine()
            .search(SearchQuery {
                radius_miles: Some(-5.0),
                ..SearchQuery::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(e, SearchError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn price_bounds_are_inclusive() {
        let outcome = engine()
            .search(SearchQuery {
                procedure_text: Some("MRI".to_string()),
                price_min: Some(300.0),
                price_max: Some(450.0),
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(result_ids(&outcome.page), vec!["price-far", "price-mid"]);
    }

    #[tokio::test]
    async fn sorting_by_price_desc_exactly_reverses_asc() {
        let asc = engine()
            .search(SearchQuery {
                procedure_text: Some("MRI".to_string()),
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        let desc = engine()
            .search(SearchQuery {
                procedure_text: Some("MRI".to_string()),
                direction: SortDirection::Desc,
                ..SearchQuery::default()
            })
            .await
            .unwrap();

        let mut reversed = result_ids(&desc.page);
        reversed.reverse();
        assert_eq!(result_ids(&asc.page), reversed);
    }

    #[tokio::test]
    async fn distance_sort_orders_by_proximity() {
        let outcome = engine()
            .search(SearchQuery {
                procedure_text: Some("MRI".to_string()),
                location_text: Some("90210".to_string()),
                sort: SortKey::Distance,
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(
            result_ids(&outcome.page),
            vec!["price-near", "price-mid", "price-far"]
        );
    }

    #[tokio::test]
    async fn distance_sort_without_origin_falls_back_to_name_asc() {
        let outcome = engine()
            .search(SearchQuery {
                sort: SortKey::Distance,
                direction: SortDirection::Desc,
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        // Name ascending: the three MRI rows (id tie-break) before the X-Ray.
        assert_eq!(
            result_ids(&outcome.page),
            vec!["price-far", "price-mid", "price-near", "price-nogeo"]
        );
    }

    #[tokio::test]
    async fn paging_concatenation_reproduces_the_sorted_list_and_stats_are_invariant() {
        let full = engine()
            .search(SearchQuery {
                page_size: 100,
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        let full_ids: Vec<String> = full
            .page
            .results
            .iter()
            .map(|c| c.price_id.clone())
            .collect();

        let mut concatenated = Vec::new();
        let mut page = 1;
        loop {
            let outcome = engine()
                .search(SearchQuery {
                    page,
                    page_size: 2,
                    ..SearchQuery::default()
                })
                .await
                .unwrap();
            assert_eq!(outcome.stats, full.stats);
            assert_eq!(outcome.page.total, full.page.total);
            if page > outcome.page.total_pages {
                assert!(outcome.page.results.is_empty());
                break;
            }
            concatenated.extend(outcome.page.results.iter().map(|c| c.price_id.clone()));
            page += 1;
        }
        assert_eq!(concatenated, full_ids);
    }

    #[tokio::test]
    async fn page_and_page_size_are_clamped() {
        let outcome = engine()
            .search(SearchQuery {
                page: 0,
                page_size: 10_000,
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.page.page, 1);
        assert_eq!(outcome.page.page_size, MAX_PAGE_SIZE);

        let outcome = engine()
            .search(SearchQuery {
                page_size: 0,
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.page.page_size, 1);
        assert_eq!(outcome.page.results.len(), 1);
    }

    #[tokio::test]
    async fn huge_page_numbers_return_an_empty_slice() {
        let outcome = engine()
            .search(SearchQuery {
                page: usize::MAX,
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert!(outcome.page.results.is_empty());
        assert_eq!(outcome.page.total, 4);
        assert_eq!(outcome.stats.unwrap().count, 4);
    }

    #[tokio::test]
    async fn page_beyond_last_is_empty_with_correct_counts() {
        let outcome = engine()
            .search(SearchQuery {
                procedure_text: Some("MRI".to_string()),
                page: 99,
                ..SearchQuery::default()
            })
            .await
            .unwrap();
        assert!(outcome.page.results.is_empty());
        assert_eq!(outcome.page.total, 3);
        assert_eq!(outcome.page.total_pages, 1);
        // Statistics still reflect the whole filtered set.
        assert_eq!(outcome.stats.unwrap().count, 3);
    }

    #[tokio::test]
    async fn template_stats_respects_a_local_origin() {
        let engine = engine();

        let all = engine
            .template_stats("tpl-mri", None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(all.count, 3);

        // From loc-near, a 10-mile radius covers loc-near and loc-mid only.
        let local = engine
            .template_stats("tpl-mri", Some("loc-near"), Some(10.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.count, 2);
        assert_eq!(local.min, 450.0);
        assert_eq!(local.max, 650.0);

        // A location without coordinates degrades to unfiltered statistics.
        let degraded = engine
            .template_stats("tpl-mri", Some("loc-nogeo"), Some(10.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(degraded.count, 3);

        // Unknown template: empty set, no statistics.
        assert!(
            engine
                .template_stats("tpl-unknown", None, None)
                .await
                .unwrap()
                .is_none()
        );

        let e = engine
            .template_stats("tpl-mri", None, Some(-1.0))
            .await
            .unwrap_err();
        assert!(matches!(e, SearchError::InvalidQuery(_)));
    }
}
