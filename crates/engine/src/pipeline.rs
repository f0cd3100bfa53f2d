//! One attribution run end to end, plus query-class dispatch and result
//! sinks.

use std::collections::HashMap;
use std::io::Write;

use attribution_core::config::AttributionSettings;
use attribution_core::error::{AttributionError, AttributionResult};
use attribution_core::marketing::MarketingReports;
use attribution_core::query::{QueryUnit, ResolvedQuery};
use attribution_core::types::QueryResult;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span};
use uuid::Uuid;

use crate::aggregator::{Aggregator, ConversionRecord};
use crate::extractor::{coalesce_sessions, extract, ColumnContract, RowCursor};
use crate::formatter::AttributionReport;

/// Select behaviour by query class. Only attribution queries run here; the
/// other classes belong to other engines.
pub fn dispatch(unit: &QueryUnit, settings: &AttributionSettings) -> AttributionResult<ResolvedQuery> {
    match unit {
        QueryUnit::Attribution(query) => query.resolve(settings),
        QueryUnit::Events(_)
        | QueryUnit::Funnel(_)
        | QueryUnit::Channel(_)
        | QueryUnit::Kpi(_)
        | QueryUnit::Web(_) => Err(AttributionError::Unsupported(format!(
            "query class '{}' is not handled by the attribution engine",
            unit.class()
        ))),
    }
}

/// KPI side of a run: which KPI object (deal, opportunity) each user belongs
/// to and the KPI values keyed by KPI id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KpiInput {
    pub user_groups: HashMap<String, String>,
    pub conversions: Vec<ConversionRecord>,
}

/// Everything a run needs besides the cursor.
#[derive(Debug, Clone)]
pub struct AttributionInput<'a> {
    pub query: &'a ResolvedQuery,
    pub reports: &'a MarketingReports,
    pub contract: ColumnContract,
    pub conversions: &'a [ConversionRecord],
    /// When set, sessions are re-keyed to KPI ids before crediting.
    pub kpi_groups: Option<&'a HashMap<String, String>>,
    pub diagnostics_cap: usize,
    /// Visitors, sessions and report spend. Off for a run whose result is
    /// combined with another run over the same touches and reports.
    pub reach_and_spend: bool,
}

impl<'a> AttributionInput<'a> {
    pub fn new(query: &'a ResolvedQuery, reports: &'a MarketingReports) -> Self {
        Self {
            query,
            reports,
            contract: ColumnContract::new(query.content_groups.clone()),
            conversions: &[],
            kpi_groups: None,
            diagnostics_cap: AttributionSettings::default().diagnostics_cap,
            reach_and_spend: true,
        }
    }

    pub fn with_conversions(mut self, conversions: &'a [ConversionRecord]) -> Self {
        self.conversions = conversions;
        self
    }

    pub fn with_kpi_groups(mut self, groups: &'a HashMap<String, String>) -> Self {
        self.kpi_groups = Some(groups);
        self
    }

    pub fn with_contract(mut self, contract: ColumnContract) -> Self {
        self.contract = contract;
        self
    }

    pub fn with_diagnostics_cap(mut self, cap: usize) -> Self {
        self.diagnostics_cap = cap;
        self
    }

    /// Credit conversions only.
    pub fn conversions_only(mut self) -> Self {
        self.reach_and_spend = false;
        self
    }
}

/// Extract, aggregate and render one result. The report is returned before
/// finalizing so that it can be combined with another run.
pub fn run_attribution(
    cursor: &mut dyn RowCursor,
    input: &AttributionInput<'_>,
) -> AttributionResult<AttributionReport> {
    let query_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "attribution",
        query_id = %query_id,
        key = input.query.attribution_key.as_str(),
        kpi = input.kpi_groups.is_some(),
        reach_and_spend = input.reach_and_spend
    );
    let _guard = span.enter();
    info!(window = %input.query.window(), methodology = ?input.query.methodology, "Attribution run started");

    let extraction = extract(
        cursor,
        input.query,
        input.reports,
        &input.contract,
        input.diagnostics_cap,
    )?;
    extraction.missing_ids.log_summary(&query_id);

    let sessions = match input.kpi_groups {
        Some(groups) => coalesce_sessions(&extraction.sessions, groups),
        None => extraction.sessions,
    };

    let mut aggregator = Aggregator::new(input.query);
    if input.reach_and_spend {
        aggregator.add_sessions(&sessions);
    }
    aggregator.add_conversions(&sessions, input.conversions);
    if input.reach_and_spend {
        aggregator.add_performance(input.reports);
    }
    aggregator.apply_filter();
    aggregator.drop_none_keywords();

    let report = AttributionReport::build(input.query, aggregator.entries(), input.reports)?;
    info!(
        keys = report.rows.len(),
        users = extraction.user_ids.len(),
        rows_read = extraction.rows_read,
        "Attribution run finished"
    );
    Ok(report)
}

// ─── Sinks ──────────────────────────────────────────────────────────────────

/// Receives the final header/row matrix (cache, renderer, file).
pub trait ResultSink {
    fn accept(&mut self, result: &QueryResult) -> AttributionResult<()>;
}

/// Writes the result as one JSON document.
pub struct JsonSink<W> {
    writer: W,
    pretty: bool,
}

impl<W: Write> JsonSink<W> {
    pub fn new(writer: W, pretty: bool) -> Self {
        Self { writer, pretty }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for JsonSink<W> {
    fn accept(&mut self, result: &QueryResult) -> AttributionResult<()> {
        if self.pretty {
            serde_json::to_writer_pretty(&mut self.writer, result)?;
        } else {
            serde_json::to_writer(&mut self.writer, result)?;
        }
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attribution_core::query::AttributionQuery;
    use attribution_core::types::{Cell, Row};

    use crate::extractor::VecCursor;

    const FROM: i64 = 1_700_000_000;
    const TO: i64 = FROM + 86_400 * 30;

    fn query() -> ResolvedQuery {
        let q: AttributionQuery = serde_json::from_value(serde_json::json!({
            "ce": {"na": "signup"},
            "attribution_key": "Source",
            "from": FROM,
            "to": TO,
            "lbw": 30
        }))
        .unwrap();
        q.resolve(&AttributionSettings::default()).unwrap()
    }

    fn touch(user: &str, source: &str, ts: i64) -> Row {
        let mut cells = vec![Cell::str(user)];
        cells.extend(std::iter::repeat(Cell::Null).take(6));
        cells.push(Cell::str(source));
        cells.extend(std::iter::repeat(Cell::Null).take(5));
        cells.push(Cell::Int(ts));
        cells
    }

    #[test]
    fn test_dispatch_by_class() {
        let unit: QueryUnit = serde_json::from_value(serde_json::json!({
            "cl": "funnel",
            "query": {"ewp": []}
        }))
        .unwrap();
        let err = dispatch(&unit, &AttributionSettings::default()).unwrap_err();
        assert!(matches!(err, AttributionError::Unsupported(_)));

        let unit: QueryUnit = serde_json::from_value(serde_json::json!({
            "cl": "attribution",
            "query": {"ce": {"na": "signup"}, "attribution_key": "Source", "from": FROM, "to": TO}
        }))
        .unwrap();
        let resolved = dispatch(&unit, &AttributionSettings::default()).unwrap();
        assert_eq!(resolved.goals[0].name, "signup");
    }

    #[test]
    fn test_run_end_to_end() {
        let q = query();
        let reports = MarketingReports::default();
        let conversions = vec![ConversionRecord::goal("u1", "signup", FROM + 500)];
        let input = AttributionInput::new(&q, &reports).with_conversions(&conversions);
        let mut cursor = VecCursor::new(vec![
            touch("u1", "google", FROM + 100),
            touch("u1", "newsletter", FROM + 200),
            touch("u2", "google", FROM + 300),
        ]);
        let result = run_attribution(&mut cursor, &input).unwrap().finalize().unwrap();
        assert_eq!(result.headers[0], "Source");
        let visitors = result.column_index("Website Visitors").unwrap();
        let conv = result.column_index("signup - Conversion").unwrap();
        assert_eq!(result.rows[0][0], Cell::str("newsletter"));
        assert_eq!(result.rows[0][conv], Cell::Float(1.0));
        assert_eq!(result.rows[1][0], Cell::str("google"));
        assert_eq!(result.rows[1][visitors], Cell::Int(2));
        assert_eq!(result.rows[2][visitors], Cell::Int(3));
    }

    #[test]
    fn test_kpi_run_credits_groups() {
        let q = query();
        let reports = MarketingReports::default();
        let mut groups = HashMap::new();
        groups.insert("u1".to_string(), "deal-7".to_string());
        groups.insert("u2".to_string(), "deal-7".to_string());
        let conversions = vec![ConversionRecord::goal("deal-7", "signup", FROM + 500)];
        let input = AttributionInput::new(&q, &reports)
            .with_conversions(&conversions)
            .with_kpi_groups(&groups);
        let mut cursor = VecCursor::new(vec![
            touch("u1", "google", FROM + 100),
            touch("u2", "bing", FROM + 300),
        ]);
        let result = run_attribution(&mut cursor, &input).unwrap().finalize().unwrap();
        let conv = result.column_index("signup - Conversion").unwrap();
        assert_eq!(result.rows[0][0], Cell::str("bing"));
        assert_eq!(result.rows[0][conv], Cell::Float(1.0));
    }

    #[test]
    fn test_cursor_failure_surfaces() {
        let q = query();
        let reports = MarketingReports::default();
        let input = AttributionInput::new(&q, &reports);
        let mut cursor = VecCursor::failing_after(vec![touch("u1", "google", FROM)], 0, "timeout");
        let err = run_attribution(&mut cursor, &input).unwrap_err();
        assert!(matches!(err, AttributionError::Cursor(_)));
    }

    #[test]
    fn test_json_sink() {
        let mut sink = JsonSink::new(Vec::new(), false);
        let result = QueryResult {
            headers: vec!["Source".to_string()],
            rows: vec![vec![Cell::str("google")]],
        };
        sink.accept(&result).unwrap();
        let written = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(written, "{\"headers\":[\"Source\"],\"rows\":[[\"google\"]]}\n");
    }

    #[test]
    fn test_conversions_only_run_skips_reach() {
        let q = query();
        let reports = MarketingReports::default();
        let conversions = vec![ConversionRecord::goal("u1", "signup", FROM + 500)];
        let input = AttributionInput::new(&q, &reports)
            .with_conversions(&conversions)
            .conversions_only();
        let mut cursor = VecCursor::new(vec![touch("u1", "google", FROM + 100), touch("u2", "bing", FROM + 100)]);
        let result = run_attribution(&mut cursor, &input).unwrap().finalize().unwrap();
        let visitors = result.column_index("Website Visitors").unwrap();
        let conv = result.column_index("signup - Conversion").unwrap();
        // Only the converting key gets a row.
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0][0], Cell::str("google"));
        assert_eq!(result.rows[0][conv], Cell::Float(1.0));
        assert_eq!(result.rows[0][visitors], Cell::Int(0));
    }
}
