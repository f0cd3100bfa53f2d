//! Derived metrics. Every ratio is rounded to two decimals and a zero
//! denominator yields 0.

use attribution_core::query::AggFunction;
use attribution_core::types::{round_with_precision, DEFAULT_PRECISION};

fn ratio(numerator: f64, denominator: f64, scale: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    round_with_precision(scale * numerator / denominator, DEFAULT_PRECISION)
}

/// 100 × clicks / impressions.
pub fn ctr(clicks: i64, impressions: i64) -> f64 {
    ratio(clicks as f64, impressions as f64, 100.0)
}

/// 1000 × spend / impressions.
pub fn cpm(spend: f64, impressions: i64) -> f64 {
    ratio(spend, impressions as f64, 1000.0)
}

pub fn avg_cpc(spend: f64, clicks: i64) -> f64 {
    ratio(spend, clicks as f64, 1.0)
}

/// 100 × conversions / clicks.
pub fn click_conversion_rate(conversions: f64, clicks: i64) -> f64 {
    ratio(conversions, clicks as f64, 100.0)
}

/// Return on spend for summed goals, cost per conversion otherwise.
pub fn cost_ratio(agg: AggFunction, conversions: f64, spend: f64) -> f64 {
    match agg {
        AggFunction::Sum => ratio(conversions, spend, 1.0),
        AggFunction::Unique | AggFunction::Count => ratio(spend, conversions, 1.0),
    }
}

/// 100 × conversions / visitors (or sessions).
pub fn conversion_rate(conversions: f64, population: i64) -> f64 {
    ratio(conversions, population as f64, 100.0)
}

/// Average of two averages weighted by their counts.
pub fn weighted_average(a: f64, a_weight: i64, b: f64, b_weight: i64) -> f64 {
    let total = a_weight + b_weight;
    ratio(a * a_weight as f64 + b * b_weight as f64, total as f64, 1.0)
}
