//! Marketing record resolution.
//!
//! A touch's raw identifiers go through an ordered list of [`Enricher`]s.
//! Each one either renames the touch, fills fields without renaming it,
//! reports a miss, or does not apply. Every applicable enricher runs and a
//! later rename wins over an earlier one, so a campaign renamed in the ad
//! platform shows its current name even when the click-id report still
//! carries the old one. Misses land in a bounded [`MissingIdLog`].

use std::collections::{BTreeMap, HashMap};

use attribution_core::marketing::{
    MarketingData, MarketingReports, CHANNEL_ADWORDS, CHANNEL_BINGADS, SOURCE_BING,
};
use attribution_core::query::AttributionKey;
use attribution_core::types::{is_non_empty_key, KEY_DELIMITER, PROPERTY_VALUE_NONE};
use tracing::debug;

use crate::diagnostics::{MissingIdKind, MissingIdLog};

/// Identifiers exactly as the cursor delivered them, NULLs already mapped
/// to the `$none` sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct RawIdentifiers {
    pub campaign_id: String,
    pub campaign_name: String,
    pub adgroup_id: String,
    pub adgroup_name: String,
    pub keyword_name: String,
    pub keyword_match_type: String,
    pub source: String,
    pub channel_group: String,
    /// Value of the attribution key's own property on the event.
    pub attribution_id: String,
    pub click_id: String,
    pub landing_page_url: String,
    pub all_page_view_url: String,
    pub content_groups: BTreeMap<String, String>,
}

impl Default for RawIdentifiers {
    fn default() -> Self {
        let none = || PROPERTY_VALUE_NONE.to_string();
        Self {
            campaign_id: none(),
            campaign_name: none(),
            adgroup_id: none(),
            adgroup_name: none(),
            keyword_name: none(),
            keyword_match_type: none(),
            source: none(),
            channel_group: none(),
            attribution_id: none(),
            click_id: none(),
            landing_page_url: none(),
            all_page_view_url: none(),
            content_groups: BTreeMap::new(),
        }
    }
}

impl RawIdentifiers {
    fn into_marketing_data(self) -> (MarketingData, String, String) {
        let data = MarketingData {
            campaign_id: self.campaign_id,
            campaign_name: self.campaign_name,
            adgroup_id: self.adgroup_id,
            adgroup_name: self.adgroup_name,
            keyword_name: self.keyword_name,
            keyword_match_type: self.keyword_match_type,
            source: self.source,
            channel_group: self.channel_group,
            landing_page_url: self.landing_page_url,
            all_page_view_url: self.all_page_view_url,
            content_groups: self.content_groups,
            ..MarketingData::default()
        };
        (data, self.attribution_id, self.click_id)
    }
}

/// Grouping key for a resolved record. Hierarchical keys embed their
/// ancestors so equal names under different campaigns stay apart.
pub fn composite_key(key: AttributionKey, data: &MarketingData) -> String {
    let name_or = |fallback: &str| -> String {
        if is_non_empty_key(&data.name) {
            data.name.clone()
        } else {
            fallback.to_string()
        }
    };
    match key {
        AttributionKey::Campaign => {
            [data.channel.clone(), name_or(&data.campaign_name)].join(KEY_DELIMITER)
        }
        AttributionKey::AdGroup => [
            data.channel.clone(),
            data.campaign_name.clone(),
            name_or(&data.adgroup_name),
        ]
        .join(KEY_DELIMITER),
        AttributionKey::Keyword => [
            data.channel.clone(),
            data.campaign_name.clone(),
            data.adgroup_name.clone(),
            data.keyword_match_type.clone(),
            name_or(&data.keyword_name),
        ]
        .join(KEY_DELIMITER),
        AttributionKey::Source => name_or(&data.source),
        AttributionKey::ChannelGroup => name_or(&data.channel_group),
        AttributionKey::LandingPage => name_or(&data.landing_page_url),
        AttributionKey::AllPageView => name_or(&data.all_page_view_url),
    }
}

/// Display value of a record for the given key type.
pub fn display_name(key: AttributionKey, data: &MarketingData) -> String {
    if is_non_empty_key(&data.name) {
        return data.name.clone();
    }
    let field = match key {
        AttributionKey::Campaign => &data.campaign_name,
        AttributionKey::AdGroup => &data.adgroup_name,
        AttributionKey::Keyword => &data.keyword_name,
        AttributionKey::Source => &data.source,
        AttributionKey::ChannelGroup => &data.channel_group,
        AttributionKey::LandingPage => &data.landing_page_url,
        AttributionKey::AllPageView => &data.all_page_view_url,
    };
    field.clone()
}

/// Ancestor values shown in front of hierarchical keys.
pub fn added_keys(key: AttributionKey, data: &MarketingData) -> Vec<String> {
    match key {
        AttributionKey::Campaign => vec![data.channel.clone()],
        AttributionKey::AdGroup => vec![data.channel.clone(), data.campaign_name.clone()],
        AttributionKey::Keyword => vec![
            data.channel.clone(),
            data.campaign_name.clone(),
            data.adgroup_name.clone(),
            data.keyword_match_type.clone(),
        ],
        _ => Vec::new(),
    }
}

// ─── Enrichment strategies ──────────────────────────────────────────────────

/// Outcome of one enrichment strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Report hit that names the touch for this key type.
    Named(String),
    /// Report hit that only filled fields.
    Filled,
    /// The id had no report row.
    NoMatch(MissingIdKind, String),
    NotApplicable,
}

pub trait Enricher: Send + Sync {
    fn stage(&self) -> &'static str;

    fn enrich(
        &self,
        key: AttributionKey,
        click_id: &str,
        data: &mut MarketingData,
        reports: &MarketingReports,
    ) -> Resolution;
}

/// Click-id lookup against the Adwords then the Bing Ads click reports.
#[derive(Debug, Default)]
pub struct ClickIdEnricher;

impl Enricher for ClickIdEnricher {
    fn stage(&self) -> &'static str {
        "click_id"
    }

    fn enrich(
        &self,
        key: AttributionKey,
        click_id: &str,
        data: &mut MarketingData,
        reports: &MarketingReports,
    ) -> Resolution {
        if !is_non_empty_key(click_id) {
            return Resolution::NotApplicable;
        }
        let hit = reports
            .adwords_click_ids
            .get(click_id)
            .map(|v| (v, CHANNEL_ADWORDS))
            .or_else(|| {
                reports
                    .bing_click_ids
                    .get(click_id)
                    .map(|v| (v, CHANNEL_BINGADS))
            });

        // Keyword rows only come from search clicks.
        if key == AttributionKey::Keyword && !hit.map(|(v, _)| v.is_search_slot()).unwrap_or(false)
        {
            return Resolution::NotApplicable;
        }

        let Some((report, channel)) = hit else {
            return Resolution::NoMatch(MissingIdKind::ClickId, click_id.to_string());
        };
        data.fill_from(report);
        data.channel = channel.to_string();

        let pick = |name: &str, id: &str| {
            if is_non_empty_key(name) {
                name.to_string()
            } else {
                id.to_string()
            }
        };
        let name = match key {
            AttributionKey::Campaign => pick(&report.campaign_name, &report.campaign_id),
            AttributionKey::AdGroup => pick(&report.adgroup_name, &report.adgroup_id),
            AttributionKey::Keyword => pick(&report.keyword_name, &report.keyword_id),
            _ => return Resolution::Filled,
        };
        if is_non_empty_key(&name) {
            Resolution::Named(name)
        } else {
            Resolution::Filled
        }
    }
}

/// Campaign/ad group id lookup across the id reports in priority order.
#[derive(Debug, Default)]
pub struct MarketingIdEnricher;

impl Enricher for MarketingIdEnricher {
    fn stage(&self) -> &'static str {
        "marketing_id"
    }

    fn enrich(
        &self,
        key: AttributionKey,
        _click_id: &str,
        data: &mut MarketingData,
        reports: &MarketingReports,
    ) -> Resolution {
        match key {
            AttributionKey::Campaign if is_non_empty_key(&data.campaign_id) => {
                for report in &reports.id_reports {
                    if let Some(v) = report.campaigns.get(&data.campaign_id) {
                        if !is_non_empty_key(&v.campaign_name) {
                            continue;
                        }
                        data.campaign_name.clone_from(&v.campaign_name);
                        data.channel = report.channel_for(v);
                        if is_non_empty_key(&v.type_name) {
                            data.type_name.clone_from(&v.type_name);
                        }
                        return Resolution::Named(v.campaign_name.clone());
                    }
                }
                Resolution::NoMatch(MissingIdKind::CampaignId, data.campaign_id.clone())
            }
            AttributionKey::AdGroup if is_non_empty_key(&data.adgroup_id) => {
                for report in &reports.id_reports {
                    if let Some(v) = report.adgroups.get(&data.adgroup_id) {
                        if !is_non_empty_key(&v.adgroup_name) {
                            continue;
                        }
                        data.adgroup_name.clone_from(&v.adgroup_name);
                        data.campaign_id.clone_from(&v.campaign_id);
                        data.campaign_name.clone_from(&v.campaign_name);
                        data.channel = report.channel_for(v);
                        if is_non_empty_key(&v.type_name) {
                            data.type_name.clone_from(&v.type_name);
                        }
                        return Resolution::Named(v.adgroup_name.clone());
                    }
                }
                Resolution::NoMatch(MissingIdKind::AdgroupId, data.adgroup_id.clone())
            }
            _ => Resolution::NotApplicable,
        }
    }
}

// ─── Resolver ───────────────────────────────────────────────────────────────

/// Stateful resolver for one extraction run.
pub struct Resolver<'a> {
    key: AttributionKey,
    reports: &'a MarketingReports,
    enrichers: Vec<Box<dyn Enricher>>,
    source_by_campaign: HashMap<String, String>,
    channel_group_by_campaign: HashMap<String, String>,
    missing: MissingIdLog,
}

impl<'a> Resolver<'a> {
    pub fn new(key: AttributionKey, reports: &'a MarketingReports, diagnostics_cap: usize) -> Self {
        Self::with_enrichers(
            key,
            reports,
            diagnostics_cap,
            vec![Box::new(ClickIdEnricher), Box::new(MarketingIdEnricher)],
        )
    }

    pub fn with_enrichers(
        key: AttributionKey,
        reports: &'a MarketingReports,
        diagnostics_cap: usize,
        enrichers: Vec<Box<dyn Enricher>>,
    ) -> Self {
        Self {
            key,
            reports,
            enrichers,
            source_by_campaign: HashMap::new(),
            channel_group_by_campaign: HashMap::new(),
            missing: MissingIdLog::new(diagnostics_cap),
        }
    }

    /// Resolve one touch into its record and display name.
    pub fn resolve(&mut self, raw: RawIdentifiers) -> (MarketingData, String) {
        let (mut data, mut name, click_id) = raw.into_marketing_data();

        for enricher in &self.enrichers {
            match enricher.enrich(self.key, &click_id, &mut data, self.reports) {
                Resolution::Named(resolved) => {
                    debug!(stage = enricher.stage(), name = %resolved, "Touch renamed");
                    name = resolved;
                }
                Resolution::NoMatch(kind, id) => self.missing.record(kind, &id, &name),
                Resolution::Filled | Resolution::NotApplicable => {}
            }
        }

        if data.source == SOURCE_BING {
            data.channel = CHANNEL_BINGADS.to_string();
        }

        self.backfill_from_campaign(&mut data);
        if !is_non_empty_key(&name) {
            name = match self.key {
                AttributionKey::Source => data.source.clone(),
                AttributionKey::ChannelGroup => data.channel_group.clone(),
                _ => name,
            };
        }

        data.name = name;
        data.key = composite_key(self.key, &data);
        let display = display_name(self.key, &data);
        (data, display)
    }

    /// Learn campaign -> source/channel group pairs as rows stream past and
    /// use them for rows that carry the campaign but not the value.
    fn backfill_from_campaign(&mut self, data: &mut MarketingData) {
        let (map, field) = match self.key {
            AttributionKey::Source => (&mut self.source_by_campaign, &mut data.source),
            AttributionKey::ChannelGroup => {
                (&mut self.channel_group_by_campaign, &mut data.channel_group)
            }
            _ => return,
        };
        if !is_non_empty_key(&data.campaign_name) {
            return;
        }
        if is_non_empty_key(field.as_str()) {
            map.insert(data.campaign_name.clone(), field.clone());
        } else if let Some(known) = map.get(&data.campaign_name) {
            field.clone_from(known);
        }
    }

    pub fn into_missing_ids(self) -> MissingIdLog {
        self.missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attribution_core::marketing::{IdReport, CHANNEL_FACEBOOK};

    fn raw(campaign_name: &str, attribution_id: &str) -> RawIdentifiers {
        RawIdentifiers {
            campaign_name: campaign_name.to_string(),
            attribution_id: attribution_id.to_string(),
            ..Default::default()
        }
    }

    fn gclid_reports() -> MarketingReports {
        let mut reports = MarketingReports::default();
        reports.adwords_click_ids.insert(
            "g1".to_string(),
            MarketingData {
                campaign_id: "100".to_string(),
                campaign_name: "Brand Search".to_string(),
                adgroup_name: "Exact".to_string(),
                keyword_name: "shoes".to_string(),
                keyword_match_type: "exact".to_string(),
                slot: "Google search: Top".to_string(),
                ..Default::default()
            },
        );
        reports
    }

    #[test]
    fn test_composite_keys() {
        let data = MarketingData {
            channel: "adwords".to_string(),
            campaign_name: "Spring".to_string(),
            adgroup_name: "Shoes".to_string(),
            keyword_match_type: "exact".to_string(),
            keyword_name: "red shoes".to_string(),
            ..Default::default()
        };
        assert_eq!(composite_key(AttributionKey::Campaign, &data), "adwords:-:Spring");
        assert_eq!(composite_key(AttributionKey::AdGroup, &data), "adwords:-:Spring:-:Shoes");
        assert_eq!(
            composite_key(AttributionKey::Keyword, &data),
            "adwords:-:Spring:-:Shoes:-:exact:-:red shoes"
        );
        let named = MarketingData {
            name: "Override".to_string(),
            ..data
        };
        assert_eq!(composite_key(AttributionKey::Campaign, &named), "adwords:-:Override");
        assert_eq!(composite_key(AttributionKey::Source, &named), "Override");
    }

    #[test]
    fn test_click_id_miss_falls_back_to_event_name() {
        let reports = MarketingReports::default();
        let mut resolver = Resolver::new(AttributionKey::Campaign, &reports, 100);
        let mut ids = raw(PROPERTY_VALUE_NONE, "DirectCampaign");
        ids.click_id = "c1".to_string();

        let (data, name) = resolver.resolve(ids);
        assert_eq!(name, "DirectCampaign");
        assert_eq!(data.name, "DirectCampaign");
        assert!(resolver.into_missing_ids().contains(MissingIdKind::ClickId, "c1"));
    }

    #[test]
    fn test_click_id_hit_renames_and_forces_channel() {
        let reports = gclid_reports();
        let mut resolver = Resolver::new(AttributionKey::Campaign, &reports, 100);
        let mut ids = raw("utm-brand", "utm-brand");
        ids.click_id = "g1".to_string();

        let (data, name) = resolver.resolve(ids);
        assert_eq!(name, "Brand Search");
        assert_eq!(data.channel, CHANNEL_ADWORDS);
        assert_eq!(data.key, "adwords:-:Brand Search");
        assert_eq!(resolver.into_missing_ids().total(), 0);
    }

    #[test]
    fn test_campaign_id_enrichment_wins_over_click_id() {
        let mut reports = gclid_reports();
        let mut campaigns = HashMap::new();
        campaigns.insert(
            "100".to_string(),
            MarketingData {
                campaign_name: "Brand Search 2024".to_string(),
                ..Default::default()
            },
        );
        reports.id_reports.push(IdReport {
            channel: CHANNEL_ADWORDS.to_string(),
            campaigns,
            adgroups: HashMap::new(),
        });
        let mut resolver = Resolver::new(AttributionKey::Campaign, &reports, 100);
        let mut ids = raw(PROPERTY_VALUE_NONE, PROPERTY_VALUE_NONE);
        ids.click_id = "g1".to_string();

        // The id comes from the click report, the name from the id report.
        let (data, name) = resolver.resolve(ids);
        assert_eq!(name, "Brand Search 2024");
        assert_eq!(data.campaign_name, "Brand Search 2024");
    }

    #[test]
    fn test_id_reports_checked_in_priority_order() {
        let mut reports = MarketingReports::default();
        for (channel, label) in [(CHANNEL_FACEBOOK, "FB name"), (CHANNEL_ADWORDS, "Adwords name")] {
            let mut campaigns = HashMap::new();
            campaigns.insert(
                "7".to_string(),
                MarketingData {
                    campaign_name: label.to_string(),
                    ..Default::default()
                },
            );
            reports.id_reports.push(IdReport {
                channel: channel.to_string(),
                campaigns,
                adgroups: HashMap::new(),
            });
        }
        let mut resolver = Resolver::new(AttributionKey::Campaign, &reports, 100);
        let mut ids = raw("old", "old");
        ids.campaign_id = "7".to_string();
        let (data, name) = resolver.resolve(ids);
        assert_eq!(name, "FB name");
        assert_eq!(data.channel, CHANNEL_FACEBOOK);
    }

    #[test]
    fn test_campaign_id_miss_is_diagnostic() {
        let reports = MarketingReports::default();
        let mut resolver = Resolver::new(AttributionKey::Campaign, &reports, 100);
        let mut ids = raw("Spring", "Spring");
        ids.campaign_id = "999".to_string();
        let (_, name) = resolver.resolve(ids);
        assert_eq!(name, "Spring");
        assert!(resolver.into_missing_ids().contains(MissingIdKind::CampaignId, "999"));
    }

    #[test]
    fn test_keyword_key_ignores_non_search_clicks() {
        let mut reports = gclid_reports();
        if let Some(entry) = reports.adwords_click_ids.get_mut("g1") {
            entry.slot = "Display".to_string();
        }
        let mut resolver = Resolver::new(AttributionKey::Keyword, &reports, 100);
        let mut ids = raw(PROPERTY_VALUE_NONE, "utm keyword");
        ids.click_id = "g1".to_string();
        let (data, name) = resolver.resolve(ids);
        assert_eq!(name, "utm keyword");
        assert_eq!(data.channel, PROPERTY_VALUE_NONE);
        assert_eq!(resolver.into_missing_ids().total(), 0);
    }

    #[test]
    fn test_keyword_key_uses_search_clicks() {
        let reports = gclid_reports();
        let mut resolver = Resolver::new(AttributionKey::Keyword, &reports, 100);
        let mut ids = raw(PROPERTY_VALUE_NONE, PROPERTY_VALUE_NONE);
        ids.click_id = "g1".to_string();
        let (data, name) = resolver.resolve(ids);
        assert_eq!(name, "shoes");
        assert_eq!(data.key, "adwords:-:Brand Search:-:Exact:-:exact:-:shoes");
    }

    #[test]
    fn test_bing_source_forces_bing_channel() {
        let reports = MarketingReports::default();
        let mut resolver = Resolver::new(AttributionKey::Campaign, &reports, 100);
        let mut ids = raw("Spring", "Spring");
        ids.source = SOURCE_BING.to_string();
        let (data, _) = resolver.resolve(ids);
        assert_eq!(data.channel, CHANNEL_BINGADS);
    }

    #[test]
    fn test_source_backfilled_from_campaign_map() {
        let reports = MarketingReports::default();
        let mut resolver = Resolver::new(AttributionKey::Source, &reports, 100);

        let mut first = raw("Spring", "google");
        first.source = "google".to_string();
        let (_, name) = resolver.resolve(first);
        assert_eq!(name, "google");

        // Same campaign, no source on the row.
        let (data, name) = resolver.resolve(raw("Spring", PROPERTY_VALUE_NONE));
        assert_eq!(data.source, "google");
        assert_eq!(name, "google");
        assert_eq!(data.key, "google");
    }

    #[test]
    fn test_custom_strategy_list() {
        struct Fixed;
        impl Enricher for Fixed {
            fn stage(&self) -> &'static str {
                "fixed"
            }
            fn enrich(
                &self,
                _key: AttributionKey,
                _click_id: &str,
                _data: &mut MarketingData,
                _reports: &MarketingReports,
            ) -> Resolution {
                Resolution::Named("pinned".to_string())
            }
        }
        let reports = MarketingReports::default();
        let mut resolver =
            Resolver::with_enrichers(AttributionKey::Source, &reports, 10, vec![Box::new(Fixed)]);
        let (_, name) = resolver.resolve(raw("Spring", "google"));
        assert_eq!(name, "pinned");
    }

    #[test]
    fn test_blank_report_name_counts_as_miss() {
        let mut reports = MarketingReports::default();
        let mut campaigns = HashMap::new();
        campaigns.insert(
            "55".to_string(),
            MarketingData {
                campaign_name: PROPERTY_VALUE_NONE.to_string(),
                ..Default::default()
            },
        );
        reports.id_reports.push(IdReport {
            channel: CHANNEL_ADWORDS.to_string(),
            campaigns,
            adgroups: HashMap::new(),
        });
        let mut resolver = Resolver::new(AttributionKey::Campaign, &reports, 100);
        let mut ids = raw("Summer Sale", "Summer Sale");
        ids.campaign_id = "55".to_string();
        let (data, name) = resolver.resolve(ids);
        assert_eq!(name, "Summer Sale");
        assert_eq!(data.campaign_name, "Summer Sale");
        assert_eq!(data.channel, PROPERTY_VALUE_NONE);
        assert!(resolver.into_missing_ids().contains(MissingIdKind::CampaignId, "55"));
    }
}
