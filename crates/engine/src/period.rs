//! Period membership and lookback tests.

use attribution_core::config::MAX_LOOKBACK_DAYS;
use attribution_core::query::{QueryType, ResolvedQuery};
use attribution_core::types::SECS_IN_A_DAY;

/// Lookback actually applied, whatever the caller asked for.
pub fn effective_lookback_days(lookback_days: i64) -> i64 {
    lookback_days.clamp(0, MAX_LOOKBACK_DAYS)
}

/// Whether a touch counts toward the query period.
///
/// Engagement-based queries reach back one lookback window before `from`.
/// Conversion-based queries only count touches inside `[from, to]`; their
/// lookback is applied against each conversion instead.
pub fn is_within_period(
    query_type: QueryType,
    lookback_days: i64,
    from: i64,
    to: i64,
    touch_ts: i64,
) -> bool {
    match query_type {
        QueryType::EngagementBased => {
            let lookback = effective_lookback_days(lookback_days) * SECS_IN_A_DAY;
            touch_ts >= from.saturating_sub(lookback) && touch_ts <= to
        }
        QueryType::ConversionBased => touch_ts >= from && touch_ts <= to,
    }
}

/// A touch can only be credited for a conversion at or after it, and no
/// more than the lookback before it.
pub fn is_within_lookback(touch_ts: i64, conversion_ts: i64, lookback_secs: i64) -> bool {
    conversion_ts >= touch_ts && conversion_ts.saturating_sub(touch_ts) <= lookback_secs
}

/// Settled time window of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributionWindow {
    pub query_type: QueryType,
    pub lookback_days: i64,
    pub from: i64,
    pub to: i64,
}

impl AttributionWindow {
    pub fn new(query_type: QueryType, lookback_days: i64, from: i64, to: i64) -> Self {
        Self {
            query_type,
            lookback_days: effective_lookback_days(lookback_days),
            from,
            to,
        }
    }

    pub fn from_query(query: &ResolvedQuery) -> Self {
        Self::new(query.query_type, query.lookback_days, query.from, query.to)
    }

    pub fn lookback_secs(&self) -> i64 {
        self.lookback_days * SECS_IN_A_DAY
    }

    pub fn contains_touch(&self, touch_ts: i64) -> bool {
        is_within_period(self.query_type, self.lookback_days, self.from, self.to, touch_ts)
    }

    pub fn contains_conversion(&self, conversion_ts: i64) -> bool {
        conversion_ts >= self.from && conversion_ts <= self.to
    }

    /// Whether a touch may receive credit for a conversion.
    pub fn credits(&self, touch_ts: i64, conversion_ts: i64) -> bool {
        if !is_within_lookback(touch_ts, conversion_ts, self.lookback_secs()) {
            return false;
        }
        match self.query_type {
            QueryType::ConversionBased => self.contains_conversion(conversion_ts),
            QueryType::EngagementBased => touch_ts >= self.from && touch_ts <= self.to,
        }
    }
}
