//! Per-key accumulators: in-period touches, credited conversions and
//! report spend folded into one [`AttributionData`] per composite key.

use std::collections::{BTreeMap, HashMap, HashSet};

use attribution_core::marketing::{MarketingData, MarketingReports};
use attribution_core::query::{AggFunction, AttributionKey, AttributionMethodology, ResolvedQuery};
use attribution_core::types::PROPERTY_VALUE_NONE;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extractor::{SessionMap, UserSessionData};
use crate::filter;
use crate::methods::{self, KeyWeight};
use crate::period::AttributionWindow;
use crate::resolver::{added_keys, composite_key, display_name};

// ─── Conversions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionKind {
    #[default]
    Goal,
    Linked,
}

/// One conversion (or linked funnel event, or KPI value) to credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRecord {
    /// User id, or KPI id when sessions were coalesced.
    pub user_id: String,
    pub event_name: String,
    pub timestamp: i64,
    #[serde(default)]
    pub kind: ConversionKind,
    /// Used by `sum` goals; ignored otherwise.
    #[serde(default = "default_value")]
    pub value: f64,
}

fn default_value() -> f64 {
    1.0
}

impl ConversionRecord {
    pub fn goal(user_id: &str, event_name: &str, timestamp: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            event_name: event_name.to_string(),
            timestamp,
            kind: ConversionKind::Goal,
            value: default_value(),
        }
    }

    pub fn linked(user_id: &str, event_name: &str, timestamp: i64) -> Self {
        Self {
            kind: ConversionKind::Linked,
            ..Self::goal(user_id, event_name, timestamp)
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }
}

// ─── Accumulator ────────────────────────────────────────────────────────────

/// Everything known about one composite key.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributionData {
    pub key: String,
    pub name: String,
    pub added_keys: Vec<String>,
    pub marketing: MarketingData,
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub website_visitors: i64,
    pub sessions: i64,
    /// Sum of touch spans in seconds.
    pub session_time: f64,
    pub conversions: Vec<f64>,
    pub influence: Vec<f64>,
    pub compare_conversions: Vec<f64>,
    pub compare_influence: Vec<f64>,
    pub linked_conversions: Vec<f64>,
    pub linked_influence: Vec<f64>,
}

impl AttributionData {
    fn new(attribution_key: AttributionKey, key: &str, marketing: &MarketingData, goals: usize, linked: usize) -> Self {
        Self {
            key: key.to_string(),
            name: display_name(attribution_key, marketing),
            added_keys: added_keys(attribution_key, marketing),
            marketing: marketing.clone(),
            impressions: 0,
            clicks: 0,
            spend: 0.0,
            website_visitors: 0,
            sessions: 0,
            session_time: 0.0,
            conversions: vec![0.0; goals],
            influence: vec![0.0; goals],
            compare_conversions: vec![0.0; goals],
            compare_influence: vec![0.0; goals],
            linked_conversions: vec![0.0; linked],
            linked_influence: vec![0.0; linked],
        }
    }

    pub fn average_session_time(&self) -> f64 {
        if self.sessions == 0 {
            0.0
        } else {
            self.session_time / self.sessions as f64
        }
    }
}

/// Folds sessions, conversions and report spend into per-key entries.
/// Entries appear only when something non-zero is added for their key.
pub struct Aggregator<'a> {
    query: &'a ResolvedQuery,
    window: AttributionWindow,
    entries: BTreeMap<String, AttributionData>,
}

impl<'a> Aggregator<'a> {
    pub fn new(query: &'a ResolvedQuery) -> Self {
        Self {
            query,
            window: AttributionWindow::from_query(query),
            entries: BTreeMap::new(),
        }
    }

    fn entry(&mut self, key: &str, marketing: &MarketingData) -> &mut AttributionData {
        let (attribution_key, goals, linked) = (
            self.query.attribution_key,
            self.query.goals.len(),
            self.query.linked_events.len(),
        );
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| AttributionData::new(attribution_key, key, marketing, goals, linked))
    }

    /// Visitors, sessions and session time from in-period touches.
    pub fn add_sessions(&mut self, sessions: &SessionMap) {
        for user_sessions in sessions.values() {
            for (key, session) in user_sessions {
                if !session.within_query_period {
                    continue;
                }
                let in_period = session
                    .timestamps
                    .iter()
                    .filter(|&&ts| self.window.contains_touch(ts))
                    .count() as i64;
                let entry = self.entry(key, &session.marketing);
                entry.website_visitors += 1;
                entry.sessions += in_period;
                entry.session_time += session.span_secs() as f64;
            }
        }
    }

    /// Impressions, clicks and spend from the ad-platform reports. Rows
    /// with nothing to add are ignored.
    pub fn add_performance(&mut self, reports: &MarketingReports) {
        let key_type = self.query.attribution_key;
        if !matches!(
            key_type,
            AttributionKey::Campaign | AttributionKey::AdGroup | AttributionKey::Keyword
        ) {
            return;
        }
        for row in &reports.performance {
            if row.is_zero() {
                continue;
            }
            let key = composite_key(key_type, &row.marketing);
            let entry = self.entry(&key, &row.marketing);
            entry.impressions += row.impressions;
            entry.clicks += row.clicks;
            entry.spend += row.spend;
        }
    }

    /// Credit conversions and linked events to the converting users' touches.
    pub fn add_conversions(&mut self, sessions: &SessionMap, records: &[ConversionRecord]) {
        let mut ordered: Vec<&ConversionRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.timestamp);

        let mut counted_unique: HashSet<(usize, &str)> = HashSet::new();
        // Earliest primary-goal conversion per user, gate for linked events.
        let mut first_conversion: HashMap<&str, i64> = HashMap::new();
        let (mut credited, mut uncredited) = (0u64, 0u64);

        for record in ordered.iter().filter(|r| r.kind == ConversionKind::Goal) {
            let Some(goal) = self.query.goals.iter().position(|g| g.name == record.event_name) else {
                continue;
            };
            let Some(user_sessions) = sessions.get(&record.user_id) else {
                uncredited += 1;
                continue;
            };
            let agg = self.query.goals[goal].agg;
            if agg == AggFunction::Unique && counted_unique.contains(&(goal, record.user_id.as_str())) {
                continue;
            }
            let value = match agg {
                AggFunction::Sum => record.value,
                AggFunction::Count | AggFunction::Unique => 1.0,
            };

            let primary = self.credit(self.query.methodology, user_sessions, record.timestamp);
            if primary.is_empty() {
                uncredited += 1;
                continue;
            }
            credited += 1;
            if agg == AggFunction::Unique {
                counted_unique.insert((goal, record.user_id.as_str()));
            }
            if goal == 0 {
                first_conversion
                    .entry(record.user_id.as_str())
                    .or_insert(record.timestamp);
            }
            let influence = self.credit(AttributionMethodology::Linear, user_sessions, record.timestamp);
            self.apply(&primary, user_sessions, value, |d, v| d.conversions[goal] += v);
            self.apply(&influence, user_sessions, value, |d, v| d.influence[goal] += v);

            if let Some(compare) = self.query.compare_methodology {
                let weights = self.credit(compare, user_sessions, record.timestamp);
                self.apply(&weights, user_sessions, value, |d, v| d.compare_conversions[goal] += v);
                self.apply(&influence, user_sessions, value, |d, v| d.compare_influence[goal] += v);
            }
        }

        for record in ordered.iter().filter(|r| r.kind == ConversionKind::Linked) {
            let Some(linked) = self
                .query
                .linked_events
                .iter()
                .position(|e| *e == record.event_name)
            else {
                continue;
            };
            let converted_before = first_conversion
                .get(record.user_id.as_str())
                .is_some_and(|&at| at <= record.timestamp);
            let Some(user_sessions) = sessions.get(&record.user_id) else {
                continue;
            };
            if !converted_before {
                continue;
            }
            let primary = self.credit(self.query.methodology, user_sessions, record.timestamp);
            let influence = self.credit(AttributionMethodology::Linear, user_sessions, record.timestamp);
            self.apply(&primary, user_sessions, 1.0, |d, v| d.linked_conversions[linked] += v);
            self.apply(&influence, user_sessions, 1.0, |d, v| d.linked_influence[linked] += v);
        }

        debug!(credited, uncredited, "Conversions attributed");
    }

    fn credit(
        &self,
        methodology: AttributionMethodology,
        sessions: &HashMap<String, UserSessionData>,
        conversion_ts: i64,
    ) -> Vec<KeyWeight> {
        methods::attribute(
            methodology,
            &self.window,
            self.query.attribution_key,
            sessions,
            conversion_ts,
        )
    }

    fn apply<F>(
        &mut self,
        weights: &[KeyWeight],
        sessions: &HashMap<String, UserSessionData>,
        value: f64,
        add: F,
    ) where
        F: Fn(&mut AttributionData, f64),
    {
        for (key, weight) in methods::weights_by_key(weights) {
            if weight == 0.0 {
                continue;
            }
            let marketing = sessions
                .get(key)
                .map(|s| s.marketing.clone())
                .unwrap_or_default();
            add(self.entry(key, &marketing), weight * value);
        }
    }

    /// Re-check the key filters against the resolved display names.
    pub fn apply_filter(&mut self) {
        let (key, filters) = (self.query.attribution_key, &self.query.key_filters);
        self.entries
            .retain(|_, data| filter::matches(key, &data.name, filters));
    }

    /// Keyword results never show the "none" keyword.
    pub fn drop_none_keywords(&mut self) {
        if self.query.attribution_key == AttributionKey::Keyword {
            self.entries.retain(|_, data| data.name != PROPERTY_VALUE_NONE);
        }
    }

    pub fn entries(&self) -> &BTreeMap<String, AttributionData> {
        &self.entries
    }

    pub fn into_entries(self) -> BTreeMap<String, AttributionData> {
        self.entries
    }
}
