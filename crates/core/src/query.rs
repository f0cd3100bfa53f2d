//! Attribution request model.
//!
//! Field names follow the JSON contract used by saved queries (`ce`, `lfe`,
//! `attribution_key_f`, `lbw`, ...). An unknown attribution key or
//! methodology fails decoding; the engine never guesses one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AttributionSettings;
use crate::error::{AttributionError, AttributionResult};
use crate::tables;

// ─── Enumerations ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributionKey {
    Campaign,
    AdGroup,
    Keyword,
    Source,
    #[serde(alias = "Channel")]
    ChannelGroup,
    LandingPage,
    AllPageView,
}

impl AttributionKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Campaign => "Campaign",
            Self::AdGroup => "AdGroup",
            Self::Keyword => "Keyword",
            Self::Source => "Source",
            Self::ChannelGroup => "ChannelGroup",
            Self::LandingPage => "LandingPage",
            Self::AllPageView => "AllPageView",
        }
    }

    /// Page keys use the reduced row layout without an ad-spend block.
    pub fn is_page_key(&self) -> bool {
        matches!(self, Self::LandingPage | Self::AllPageView)
    }

    /// Campaign and AdGroup rows can be renamed through the id reports.
    pub fn supports_id_enrichment(&self) -> bool {
        matches!(self, Self::Campaign | Self::AdGroup)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributionMethodology {
    #[serde(rename = "First_Touch")]
    FirstTouch,
    #[serde(rename = "First_Touch_ND")]
    FirstTouchNonDirect,
    #[serde(rename = "Last_Touch")]
    LastTouch,
    #[serde(rename = "Last_Touch_ND")]
    LastTouchNonDirect,
    #[serde(rename = "Linear")]
    Linear,
    #[serde(rename = "U_Shaped")]
    UShaped,
    #[serde(rename = "Time_Decay")]
    TimeDecay,
    #[serde(rename = "Influence")]
    Influence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    ConversionBased,
    EngagementBased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzeType {
    #[default]
    Users,
    UserKpi,
    HubspotDeals,
    SalesforceOpportunities,
}

impl AnalyzeType {
    /// KPI analyses attribute deals/opportunities instead of users.
    pub fn is_kpi(&self) -> bool {
        !matches!(self, Self::Users)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TacticOfferType {
    #[default]
    Tactic,
    Offer,
    TacticOffer,
}

impl TacticOfferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tactic => "Tactic",
            Self::Offer => "Offer",
            Self::TacticOffer => "TacticOffer",
        }
    }
}

/// How a goal's conversion values are aggregated. Anything other than
/// `sum` or `unique` counts conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunction {
    Sum,
    Unique,
    #[default]
    #[serde(other)]
    Count,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "equals")]
    Equals,
    #[serde(rename = "notEqual")]
    NotEqual,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "notContains")]
    NotContains,
    /// Operators this engine does not know never match.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogicalOp {
    #[default]
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

// ─── Request parts ──────────────────────────────────────────────────────────

/// One attribution key filter clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFilter {
    pub attribution_key: AttributionKey,
    #[serde(rename = "ty", default)]
    pub value_type: String,
    #[serde(rename = "pr", default)]
    pub property: String,
    #[serde(rename = "op")]
    pub operator: FilterOperator,
    #[serde(rename = "va", default)]
    pub value: String,
    #[serde(rename = "lop", default)]
    pub logical_op: LogicalOp,
}

/// A goal the result reports conversion columns for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionGoal {
    #[serde(rename = "na")]
    pub name: String,
    #[serde(default)]
    pub agg: AggFunction,
}

impl ConversionGoal {
    pub fn counted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agg: AggFunction::Count,
        }
    }
}

/// The attribution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionQuery {
    #[serde(default)]
    pub analyze_type: AnalyzeType,
    /// Goal event for user analyses.
    #[serde(rename = "ce", default)]
    pub conversion_event: Option<ConversionGoal>,
    /// Goals for KPI analyses, one column group each.
    #[serde(default)]
    pub kpi_goals: Vec<ConversionGoal>,
    /// Linked funnel events.
    #[serde(rename = "lfe", default)]
    pub linked_events: Vec<String>,
    pub attribution_key: AttributionKey,
    #[serde(rename = "attribution_key_dimensions", default)]
    pub key_dimensions: Vec<String>,
    #[serde(rename = "attribution_key_custom_dimensions", default)]
    pub custom_dimensions: Vec<String>,
    #[serde(rename = "attribution_content_groups", default)]
    pub content_groups: Vec<String>,
    #[serde(rename = "attribution_key_f", default)]
    pub key_filters: Vec<KeyFilter>,
    #[serde(rename = "attribution_methodology", default)]
    pub methodology: Option<AttributionMethodology>,
    #[serde(rename = "attribution_methodology_c", default)]
    pub compare_methodology: Option<AttributionMethodology>,
    #[serde(rename = "lbw", default)]
    pub lookback_days: Option<i64>,
    pub from: i64,
    pub to: i64,
    #[serde(default)]
    pub query_type: Option<QueryType>,
    #[serde(default)]
    pub tactic_offer_type: Option<TacticOfferType>,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

/// A request with every optional knob settled. Produced by
/// [`AttributionQuery::resolve`]; the engine only works on this form.
#[derive(Debug, Clone)]
pub struct ResolvedQuery {
    pub analyze_type: AnalyzeType,
    pub goals: Vec<ConversionGoal>,
    pub linked_events: Vec<String>,
    pub attribution_key: AttributionKey,
    pub key_dimensions: Vec<String>,
    pub custom_dimensions: Vec<String>,
    pub content_groups: Vec<String>,
    pub key_filters: Vec<KeyFilter>,
    pub methodology: AttributionMethodology,
    pub compare_methodology: Option<AttributionMethodology>,
    pub lookback_days: i64,
    pub from: i64,
    pub to: i64,
    pub query_type: QueryType,
    pub tactic_offer_type: TacticOfferType,
    pub time_zone: String,
}

impl AttributionQuery {
    pub fn from_json(raw: &str) -> AttributionResult<Self> {
        serde_json::from_str(raw).map_err(|e| AttributionError::InvalidQuery(e.to_string()))
    }

    /// Validate the request and fill the gaps from project settings.
    pub fn resolve(&self, settings: &AttributionSettings) -> AttributionResult<ResolvedQuery> {
        if self.from > self.to {
            return Err(AttributionError::InvalidQuery(format!(
                "query window is inverted: from {} > to {}",
                self.from, self.to
            )));
        }

        let goals = if self.analyze_type.is_kpi() {
            self.kpi_goals.clone()
        } else {
            self.conversion_event.clone().into_iter().collect()
        };
        if goals.is_empty() {
            return Err(AttributionError::InvalidQuery(
                "no conversion goal given".to_string(),
            ));
        }
        if let Some(goal) = goals.iter().find(|g| g.name.trim().is_empty()) {
            return Err(AttributionError::InvalidQuery(format!(
                "goal with empty name ({:?})",
                goal.agg
            )));
        }

        for dimension in &self.key_dimensions {
            if tables::dimension_header(dimension).is_none() {
                return Err(AttributionError::InvalidQuery(format!(
                    "unknown key dimension '{}'",
                    dimension
                )));
            }
        }

        let key_dimensions = if self.key_dimensions.is_empty()
            && self.custom_dimensions.is_empty()
            && self.content_groups.is_empty()
        {
            tables::default_key_dimensions(self.attribution_key)
                .iter()
                .map(|d| d.to_string())
                .collect()
        } else {
            self.key_dimensions.clone()
        };

        Ok(ResolvedQuery {
            analyze_type: self.analyze_type,
            goals,
            linked_events: self.linked_events.clone(),
            attribution_key: self.attribution_key,
            key_dimensions,
            custom_dimensions: self.custom_dimensions.clone(),
            content_groups: self.content_groups.clone(),
            key_filters: self.key_filters.clone(),
            methodology: self.methodology.unwrap_or(settings.default_methodology),
            compare_methodology: self.compare_methodology,
            lookback_days: settings.effective_lookback(self.lookback_days),
            from: self.from,
            to: self.to,
            query_type: self.query_type.unwrap_or(settings.default_query_type),
            tactic_offer_type: self
                .tactic_offer_type
                .unwrap_or(settings.default_tactic_offer_type),
            time_zone: self.time_zone.clone(),
        })
    }
}

impl ResolvedQuery {
    pub fn lookback_secs(&self) -> i64 {
        self.lookback_days * crate::types::SECS_IN_A_DAY
    }

    /// Human-readable window, used in log lines.
    pub fn window(&self) -> String {
        let fmt = |ts: i64| {
            DateTime::<Utc>::from_timestamp(ts, 0)
                .map(|d| d.to_rfc3339())
                .unwrap_or_else(|| ts.to_string())
        };
        format!("{}..{} ({})", fmt(self.from), fmt(self.to), self.time_zone)
    }
}

// ─── Query classes ──────────────────────────────────────────────────────────

/// Every query class a dashboard unit can hold. Only attribution is
/// executed by this engine; the other payloads are carried untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cl", content = "query", rename_all = "snake_case")]
pub enum QueryUnit {
    Events(serde_json::Value),
    Funnel(serde_json::Value),
    #[serde(rename = "channel_v1")]
    Channel(serde_json::Value),
    Attribution(Box<AttributionQuery>),
    Kpi(serde_json::Value),
    Web(serde_json::Value),
}

impl QueryUnit {
    pub fn class(&self) -> &'static str {
        match self {
            Self::Events(_) => "events",
            Self::Funnel(_) => "funnel",
            Self::Channel(_) => "channel_v1",
            Self::Attribution(_) => "attribution",
            Self::Kpi(_) => "kpi",
            Self::Web(_) => "web",
        }
    }
}
