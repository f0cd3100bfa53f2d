use serde::Deserialize;

use crate::error::{AttributionError, AttributionResult};
use crate::query::{AttributionMethodology, QueryType, TacticOfferType};

/// Root application configuration. Loaded from environment variables
/// with the prefix `ATTRIBUTION_EXPRESS__` and an optional TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub attribution: AttributionSettings,
    #[serde(default)]
    pub input: InputConfig,
}

/// Project-level attribution settings. Supplies the lookback window and
/// methodology when a request leaves them out.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributionSettings {
    #[serde(default = "default_lookback_days")]
    pub default_lookback_days: i64,
    #[serde(default = "default_max_lookback_days")]
    pub max_lookback_days: i64,
    #[serde(default = "default_methodology")]
    pub default_methodology: AttributionMethodology,
    #[serde(default = "default_query_type")]
    pub default_query_type: QueryType,
    #[serde(default)]
    pub default_tactic_offer_type: TacticOfferType,
    #[serde(default = "default_diagnostics_cap")]
    pub diagnostics_cap: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    /// Content groups configured for the project, in cursor column order.
    #[serde(default)]
    pub content_groups: Vec<String>,
    #[serde(default = "default_output_pretty")]
    pub pretty_output: bool,
}

/// Hard ceiling on the lookback window, whatever the settings say.
pub const MAX_LOOKBACK_DAYS: i64 = 180;

// Default functions
fn default_node_id() -> String {
    "attribution-01".to_string()
}
fn default_lookback_days() -> i64 {
    30
}
fn default_max_lookback_days() -> i64 {
    MAX_LOOKBACK_DAYS
}
fn default_methodology() -> AttributionMethodology {
    AttributionMethodology::LastTouch
}
fn default_query_type() -> QueryType {
    QueryType::ConversionBased
}
fn default_diagnostics_cap() -> usize {
    100
}
fn default_output_pretty() -> bool {
    false
}

impl Default for AttributionSettings {
    fn default() -> Self {
        Self {
            default_lookback_days: default_lookback_days(),
            max_lookback_days: default_max_lookback_days(),
            default_methodology: default_methodology(),
            default_query_type: default_query_type(),
            default_tactic_offer_type: TacticOfferType::default(),
            diagnostics_cap: default_diagnostics_cap(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            content_groups: Vec::new(),
            pretty_output: default_output_pretty(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            attribution: AttributionSettings::default(),
            input: InputConfig::default(),
        }
    }
}

impl AttributionSettings {
    /// Effective lookback for a requested value. Missing or non-positive
    /// requests take the project default; nothing exceeds 180 days.
    pub fn effective_lookback(&self, requested: Option<i64>) -> i64 {
        let ceiling = self.max_lookback_days.clamp(0, MAX_LOOKBACK_DAYS);
        match requested {
            Some(days) if days > 0 => days.min(ceiling),
            _ => self.default_lookback_days.clamp(0, ceiling),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    pub fn load_from(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("ATTRIBUTION_EXPRESS")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("input.content_groups"),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> AttributionResult<()> {
        let settings = &self.attribution;
        if settings.max_lookback_days <= 0 {
            return Err(AttributionError::Config(format!(
                "max_lookback_days must be positive, got {}",
                settings.max_lookback_days
            )));
        }
        if settings.default_lookback_days < 0 {
            return Err(AttributionError::Config(format!(
                "default_lookback_days must not be negative, got {}",
                settings.default_lookback_days
            )));
        }
        if settings.diagnostics_cap == 0 {
            return Err(AttributionError::Config(
                "diagnostics_cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
