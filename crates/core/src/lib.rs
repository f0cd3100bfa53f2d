pub mod config;
pub mod error;
pub mod marketing;
pub mod query;
pub mod tables;
pub mod types;

pub use config::AppConfig;
pub use error::{AttributionError, AttributionResult};
pub use marketing::{MarketingData, MarketingReports};
pub use query::{AttributionKey, AttributionMethodology, AttributionQuery, QueryType};
pub use types::{Cell, QueryResult, Row};
