use serde::Serialize;

/// Price aggregates over the fully filtered (but unpaginated) candidate set.
/// Mean and median carry full precision; rounding happens at presentation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub count: usize,
}

/// Exact min/max/mean/median. Empty input yields None, never zeros, so
/// callers cannot render a "$0.00 average".
pub fn summarize(prices: &[f64]) -> Option<PriceStatistics> {
    if prices.is_empty() {
        return None;
    }

    let mut sorted = prices.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;

    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    Some(PriceStatistics {
        min,
        max,
        mean,
        median,
        count: sorted.len(),
    })
}

/// Currency rounding for presentation only.
pub fn round_currency(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
