//! Marketing context of a touch, and the ad-platform reports used to
//! enrich it.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::{is_non_empty_key, PROPERTY_VALUE_NONE};

pub const CHANNEL_ADWORDS: &str = "adwords";
pub const CHANNEL_BINGADS: &str = "bingads";
pub const CHANNEL_FACEBOOK: &str = "facebook";
pub const CHANNEL_LINKEDIN: &str = "linkedin";
pub const CHANNEL_CUSTOM_ADS: &str = "custom_ads";
/// Channel of touches that came in through plain UTM/session data.
pub const CHANNEL_SESSION: &str = "session";

/// Source value that identifies Bing traffic without a click-id hit.
pub const SOURCE_BING: &str = "bing";

/// Marketing context of a single touch. Every missing field holds the
/// `$none` sentinel, never an empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketingData {
    pub channel: String,
    pub campaign_id: String,
    pub campaign_name: String,
    pub adgroup_id: String,
    pub adgroup_name: String,
    pub keyword_id: String,
    pub keyword_name: String,
    pub keyword_match_type: String,
    pub source: String,
    pub channel_group: String,
    pub type_name: String,
    pub slot: String,
    pub landing_page_url: String,
    pub all_page_view_url: String,
    pub content_groups: BTreeMap<String, String>,
    /// Resolved display value for the query's attribution key.
    pub name: String,
    /// Composite grouping key.
    pub key: String,
}

impl Default for MarketingData {
    fn default() -> Self {
        let none = || PROPERTY_VALUE_NONE.to_string();
        Self {
            channel: none(),
            campaign_id: none(),
            campaign_name: none(),
            adgroup_id: none(),
            adgroup_name: none(),
            keyword_id: none(),
            keyword_name: none(),
            keyword_match_type: none(),
            source: none(),
            channel_group: none(),
            type_name: none(),
            slot: none(),
            landing_page_url: none(),
            all_page_view_url: none(),
            content_groups: BTreeMap::new(),
            name: none(),
            key: none(),
        }
    }
}

impl MarketingData {
    /// Copy every informative field of `report` over `self`. Empty and
    /// `$none` report values never erase what the session already knows.
    pub fn fill_from(&mut self, report: &MarketingData) {
        let pairs: [(&mut String, &String); 12] = [
            (&mut self.campaign_id, &report.campaign_id),
            (&mut self.campaign_name, &report.campaign_name),
            (&mut self.adgroup_id, &report.adgroup_id),
            (&mut self.adgroup_name, &report.adgroup_name),
            (&mut self.keyword_id, &report.keyword_id),
            (&mut self.keyword_name, &report.keyword_name),
            (&mut self.keyword_match_type, &report.keyword_match_type),
            (&mut self.source, &report.source),
            (&mut self.channel_group, &report.channel_group),
            (&mut self.type_name, &report.type_name),
            (&mut self.slot, &report.slot),
            (&mut self.landing_page_url, &report.landing_page_url),
        ];
        for (target, value) in pairs {
            if is_non_empty_key(value) {
                target.clone_from(value);
            }
        }
    }

    /// True for paid-search clicks. Click-id rows for other slots are not
    /// keyword-attributable.
    pub fn is_search_slot(&self) -> bool {
        self.slot.to_lowercase().contains("search")
    }
}

/// Ad-platform report keyed by campaign and ad group id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdReport {
    pub channel: String,
    pub campaigns: HashMap<String, MarketingData>,
    pub adgroups: HashMap<String, MarketingData>,
}

impl IdReport {
    /// Channel to stamp on a hit. Custom-ads reports carry their own channel
    /// per row.
    pub fn channel_for(&self, entry: &MarketingData) -> String {
        if self.channel == CHANNEL_CUSTOM_ADS && is_non_empty_key(&entry.channel) {
            entry.channel.clone()
        } else {
            self.channel.clone()
        }
    }
}

/// Spend data for one report row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceRow {
    #[serde(flatten)]
    pub marketing: MarketingData,
    #[serde(default)]
    pub impressions: i64,
    #[serde(default)]
    pub clicks: i64,
    #[serde(default)]
    pub spend: f64,
}

impl PerformanceRow {
    pub fn is_zero(&self) -> bool {
        self.impressions == 0 && self.clicks == 0 && self.spend == 0.0
    }
}

/// Read-only report data produced by the ad-platform sync jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketingReports {
    /// Google click-id (gclid) to the clicked ad.
    pub adwords_click_ids: HashMap<String, MarketingData>,
    /// Microsoft click-id (msclkid) to the clicked ad.
    pub bing_click_ids: HashMap<String, MarketingData>,
    /// Id reports in lookup priority order.
    pub id_reports: Vec<IdReport>,
    pub performance: Vec<PerformanceRow>,
    /// Custom dimension values per composite key.
    pub custom_dimensions: HashMap<String, HashMap<String, String>>,
}

impl MarketingReports {
    pub fn is_empty(&self) -> bool {
        self.adwords_click_ids.is_empty()
            && self.bing_click_ids.is_empty()
            && self.id_reports.is_empty()
            && self.performance.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fields_are_none_sentinel() {
        let data = MarketingData::default();
        assert_eq!(data.campaign_name, PROPERTY_VALUE_NONE);
        assert_eq!(data.key, PROPERTY_VALUE_NONE);
    }

    #[test]
    fn test_partial_json_keeps_sentinels() {
        let data: MarketingData =
            serde_json::from_value(serde_json::json!({"campaign_name": "Spring"})).unwrap();
        assert_eq!(data.campaign_name, "Spring");
        assert_eq!(data.adgroup_name, PROPERTY_VALUE_NONE);
    }

    #[test]
    fn test_fill_from_skips_uninformative_values() {
        let mut session = MarketingData {
            campaign_name: "utm-campaign".to_string(),
            source: "google".to_string(),
            ..Default::default()
        };
        let report = MarketingData {
            campaign_name: "Brand Search".to_string(),
            source: String::new(),
            adgroup_name: "Exact".to_string(),
            ..Default::default()
        };
        session.fill_from(&report);
        assert_eq!(session.campaign_name, "Brand Search");
        assert_eq!(session.source, "google");
        assert_eq!(session.adgroup_name, "Exact");
    }

    #[test]
    fn test_custom_ads_channel_comes_from_row() {
        let report = IdReport {
            channel: CHANNEL_CUSTOM_ADS.to_string(),
            ..Default::default()
        };
        let row = MarketingData {
            channel: "tiktok".to_string(),
            ..Default::default()
        };
        assert_eq!(report.channel_for(&row), "tiktok");
        assert_eq!(report.channel_for(&MarketingData::default()), CHANNEL_CUSTOM_ADS);
    }

    #[test]
    fn test_search_slot_detection() {
        let data = MarketingData {
            slot: "Google search: Top".to_string(),
            ..Default::default()
        };
        assert!(data.is_search_slot());
        assert!(!MarketingData::default().is_search_slot());
    }
}
