use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::catalog::{CatalogStore, CatalogSummary, InMemoryCatalog, SearchCandidate};
use crate::cli::ServeArgs;
use crate::geocode::{Geocoder, GeocoderConfig};
use crate::search::{SearchEngine, SearchError, SearchQuery, SortDirection, SortKey};
use crate::stats::{PriceStatistics, round_currency};

#[derive(Clone)]
struct AppState {
    store: Arc<dyn CatalogStore>,
    engine: Arc<SearchEngine>,
    summary: CatalogSummary,
}

pub async fn run(opts: ServeArgs) -> anyhow::Result<()> {
    let catalog = InMemoryCatalog::load_file(Path::new(&opts.catalog_file))?;
    let store: Arc<dyn CatalogStore> = Arc::new(catalog);
    let summary = store.summary()?;

    // The credential is read once here; call sites never touch the
    // environment. Without it the geocoder answers from its fallback table.
    let geocoder = Geocoder::new(GeocoderConfig {
        endpoint: opts.geocoder_endpoint.clone(),
        api_key: std::env::var("GEOCODER_API_KEY").ok().filter(|s| !s.is_empty()),
        timeout: Duration::from_secs(opts.geocoder_timeout_secs),
    })?;

    let engine = Arc::new(SearchEngine::new(store.clone(), Arc::new(geocoder)));

    let state = AppState {
        store,
        engine,
        summary,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/search", get(api_search))
        .route("/api/stats", get(api_stats))
        .route("/api/categories", get(api_categories))
        .route("/api/meta", get(api_meta))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", opts.host, opts.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("parse host:port: {e}"))?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    location: Option<String>,
    category: Option<String>,
    radius: Option<f64>,
    price_min: Option<f64>,
    price_max: Option<f64>,
    sort: Option<String>,
    page: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    results: Vec<ResultRow>,
    pagination: Pagination,
    stats: Option<StatsView>,
}

#[derive(Debug, Serialize)]
struct Pagination {
    page: usize,
    limit: usize,
    total: usize,
    pages: usize,
}

/// A candidate as rendered on the wire: currency-rounded, with the derived
/// savings-vs-average figure the UI shows. Savings are never stored; they are
/// recomputed here from the single-sourced statistics mean.
#[derive(Debug, Serialize)]
struct ResultRow {
    #[serde(flatten)]
    candidate: SearchCandidate,
    savings_percent: Option<f64>,
}

#[derive(Debug, Serialize)]
struct StatsView {
    min: f64,
    max: f64,
    mean: f64,
    median: f64,
    count: usize,
}

impl From<PriceStatistics> for StatsView {
    fn from(s: PriceStatistics) -> Self {
        Self {
            min: round_currency(s.min),
            max: round_currency(s.max),
            mean: round_currency(s.mean),
            median: round_currency(s.median),
            count: s.count,
        }
    }
}

async fn api_search(
    State(st): State<AppState>,
    Query(p): Query<SearchParams>,
) -> impl IntoResponse {
    let (sort, direction) = match parse_sort(p.sort.as_deref()) {
        Ok(s) => s,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    let query = SearchQuery {
        procedure_text: p.q,
        location_text: p.location,
        category_id: p.category,
        radius_miles: p.radius,
        price_min: p.price_min,
        price_max: p.price_max,
        sort,
        direction,
        page: p.page.unwrap_or(1),
        page_size: p.page_size.unwrap_or(crate::search::DEFAULT_PAGE_SIZE),
    };

    let outcome = match st.engine.search(query).await {
        Ok(o) => o,
        Err(e) => return search_error_response(e),
    };

    let mean = outcome.stats.map(|s| s.mean);
    let results = outcome
        .page
        .results
        .into_iter()
        .map(|mut c| {
            let savings_percent = savings_percent(c.price, mean);
            c.price = round_currency(c.price);
            c.distance_miles = c.distance_miles.map(round_currency);
            ResultRow {
                candidate: c,
                savings_percent,
            }
        })
        .collect();

    Json(SearchResponse {
        results,
        pagination: Pagination {
            page: outcome.page.page,
            limit: outcome.page.page_size,
            total: outcome.page.total,
            pages: outcome.page.total_pages,
        },
        stats: outcome.stats.map(StatsView::from),
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
struct StatsParams {
    template_id: String,
    location_id: Option<String>,
    radius: Option<f64>,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    stats: Option<StatsView>,
}

async fn api_stats(State(st): State<AppState>, Query(p): Query<StatsParams>) -> impl IntoResponse {
    match st
        .engine
        .template_stats(&p.template_id, p.location_id.as_deref(), p.radius)
        .await
    {
        Ok(stats) => Json(StatsResponse {
            stats: stats.map(StatsView::from),
        })
        .into_response(),
        Err(e) => search_error_response(e),
    }
}

async fn api_categories(State(st): State<AppState>) -> impl IntoResponse {
    match st.store.categories() {
        Ok(v) => Json(v).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn api_meta(State(st): State<AppState>) -> impl IntoResponse {
    Json(st.summary.clone())
}

fn search_error_response(e: SearchError) -> axum::response::Response {
    match e {
        SearchError::InvalidQuery(_) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        SearchError::Store(_) => {
            tracing::error!(error = %e, "Search failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Combined sort tokens, `price_asc` style. Unknown tokens are a client
/// error, not a silent default.
fn parse_sort(s: Option<&str>) -> Result<(SortKey, SortDirection), String> {
    let Some(s) = s.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok((SortKey::Price, SortDirection::Asc));
    };
    match s.to_ascii_lowercase().as_str() {
        "price_asc" => Ok((SortKey::Price, SortDirection::Asc)),
        "price_desc" => Ok((SortKey::Price, SortDirection::Desc)),
        "distance_asc" => Ok((SortKey::Distance, SortDirection::Asc)),
        "distance_desc" => Ok((SortKey::Distance, SortDirection::Desc)),
        "name_asc" => Ok((SortKey::Name, SortDirection::Asc)),
        "name_desc" => Ok((SortKey::Name, SortDirection::Desc)),
        other => Err(format!("unknown sort: {other}")),
    }
}

fn savings_percent(price: f64, mean: Option<f64>) -> Option<f64> {
    let mean = mean?;
    if mean <= 0.0 {
        return None;
    }
    Some(round_currency((mean - price) / mean * 100.0))
}
