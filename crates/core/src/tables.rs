//! Static lookup tables: header names, dimension names and per-key defaults.
//! Everything here is constant data; nothing is written after start-up.

use crate::query::AttributionKey;

pub const FIELD_CHANNEL_NAME: &str = "channel_name";
pub const FIELD_CAMPAIGN_NAME: &str = "campaign_name";
pub const FIELD_ADGROUP_NAME: &str = "adgroup_name";
pub const FIELD_KEYWORD_MATCH_TYPE: &str = "keyword_match_type";
pub const FIELD_KEYWORD: &str = "keyword";
pub const FIELD_SOURCE: &str = "source";
pub const FIELD_CHANNEL_GROUP: &str = "channel_group";
pub const FIELD_LANDING_PAGE_URL: &str = "landing_page_url";
pub const FIELD_ALL_PAGE_VIEW: &str = "all_page_view";

const KEY_DIMENSION_HEADERS: [(&str, &str); 9] = [
    (FIELD_CHANNEL_NAME, "ChannelName"),
    (FIELD_CAMPAIGN_NAME, "Campaign"),
    (FIELD_ADGROUP_NAME, "AdGroup"),
    (FIELD_KEYWORD_MATCH_TYPE, "MatchType"),
    (FIELD_KEYWORD, "Keyword"),
    (FIELD_SOURCE, "Source"),
    (FIELD_CHANNEL_GROUP, "ChannelGroup"),
    (FIELD_LANDING_PAGE_URL, "LandingPage"),
    (FIELD_ALL_PAGE_VIEW, "AllPageView"),
];

const ADDED_KEYS_CAMPAIGN: &[&str] = &["ChannelName"];
const ADDED_KEYS_ADGROUP: &[&str] = &["ChannelName", "Campaign"];
const ADDED_KEYS_KEYWORD: &[&str] = &["ChannelName", "Campaign", "AdGroup", "MatchType"];

pub const MARKETING_FIXED_HEADERS: &[&str] = &[
    "Impressions",
    "Clicks",
    "Spend",
    "CTR(%)",
    "Average CPC",
    "CPM",
    "ClickConversionRate(%)",
    "Website Visitors",
];

/// Appended to the marketing block for KPI analyses.
pub const KPI_EXTRA_HEADERS: &[&str] = &["Sessions", "Average Session Time"];

pub const GRAND_TOTAL_LABEL: &str = "Grand Total";
pub const KEY_COLUMN_HEADER: &str = "key";

/// Header shown for a key dimension field name.
pub fn dimension_header(dimension: &str) -> Option<&'static str> {
    KEY_DIMENSION_HEADERS
        .iter()
        .find(|(field, _)| *field == dimension)
        .map(|(_, header)| *header)
}

/// Ancestor columns shown in front of hierarchical keys.
pub fn added_key_headers(key: AttributionKey) -> &'static [&'static str] {
    match key {
        AttributionKey::Campaign => ADDED_KEYS_CAMPAIGN,
        AttributionKey::AdGroup => ADDED_KEYS_ADGROUP,
        AttributionKey::Keyword => ADDED_KEYS_KEYWORD,
        _ => &[],
    }
}

/// Display column of the key itself.
pub fn key_header(key: AttributionKey) -> &'static str {
    key.as_str()
}

/// Dimensions used when a request names none. Channel is left out, which
/// hides the channel column by default.
pub fn default_key_dimensions(key: AttributionKey) -> &'static [&'static str] {
    match key {
        AttributionKey::Campaign => &[FIELD_CAMPAIGN_NAME],
        AttributionKey::AdGroup => &[FIELD_CAMPAIGN_NAME, FIELD_ADGROUP_NAME],
        AttributionKey::Keyword => &[
            FIELD_CAMPAIGN_NAME,
            FIELD_ADGROUP_NAME,
            FIELD_KEYWORD_MATCH_TYPE,
            FIELD_KEYWORD,
        ],
        AttributionKey::Source => &[FIELD_SOURCE],
        AttributionKey::ChannelGroup => &[FIELD_CHANNEL_GROUP],
        AttributionKey::LandingPage => &[FIELD_LANDING_PAGE_URL],
        AttributionKey::AllPageView => &[FIELD_ALL_PAGE_VIEW],
    }
}
