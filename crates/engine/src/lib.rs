//! Multi-touch attribution engine.
//!
//! Rows flow through [`extractor`] (per-user touch map, enriched by
//! [`resolver`] and gated by [`filter`]), then [`aggregator`] folds the
//! in-period touches and credited conversions into per-key accumulators,
//! and [`formatter`] renders the header/row matrix using the arithmetic in
//! [`merge`].

pub mod aggregator;
pub mod diagnostics;
pub mod extractor;
pub mod filter;
pub mod formatter;
pub mod merge;
pub mod methods;
pub mod period;
pub mod pipeline;
pub mod ratios;
pub mod resolver;

pub use aggregator::{AttributionData, Aggregator, ConversionKind, ConversionRecord};
pub use diagnostics::MissingIdLog;
pub use extractor::{extract, Extraction, RowCursor, UserSessionData, VecCursor};
pub use formatter::{combine_results, AttributionReport};
pub use merge::{merge_rows, RowLayout};
pub use pipeline::{dispatch, run_attribution, AttributionInput, ResultSink};
pub use resolver::Resolver;
