//! Session extraction: cursor rows to a per-user map of attribution key to
//! touch timing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::BufRead;

use attribution_core::error::{AttributionError, AttributionResult};
use attribution_core::marketing::{MarketingData, MarketingReports};
use attribution_core::query::{ResolvedQuery, TacticOfferType};
use attribution_core::types::{Cell, Row, PROPERTY_VALUE_NONE};
use tracing::{debug, info, warn};

use crate::diagnostics::MissingIdLog;
use crate::filter;
use crate::period::AttributionWindow;
use crate::resolver::{RawIdentifiers, Resolver};

// ─── Cursor ─────────────────────────────────────────────────────────────────

/// Forward-only row source. `Err` with a row-level error skips that row;
/// any other error ends the extraction.
pub trait RowCursor {
    fn next_row(&mut self) -> Option<AttributionResult<Row>>;
}

/// In-memory cursor, optionally failing after a number of rows.
#[derive(Debug, Default)]
pub struct VecCursor {
    rows: std::vec::IntoIter<Row>,
    fail_after: Option<(usize, String)>,
    served: usize,
}

impl VecCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
            fail_after: None,
            served: 0,
        }
    }

    /// Serve `count` rows, then report a cursor error such as a timeout.
    pub fn failing_after(rows: Vec<Row>, count: usize, reason: &str) -> Self {
        Self {
            rows: rows.into_iter(),
            fail_after: Some((count, reason.to_string())),
            served: 0,
        }
    }
}

impl RowCursor for VecCursor {
    fn next_row(&mut self) -> Option<AttributionResult<Row>> {
        if let Some((count, reason)) = &self.fail_after {
            if self.served >= *count {
                return Some(Err(AttributionError::Cursor(reason.clone())));
            }
        }
        let row = self.rows.next()?;
        self.served += 1;
        Some(Ok(row))
    }
}

/// One JSON array per line. Undecodable lines are row-level failures, read
/// failures end the cursor.
pub struct JsonLinesCursor<R> {
    reader: R,
    line: String,
    line_no: usize,
}

impl<R: BufRead> JsonLinesCursor<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> RowCursor for JsonLinesCursor<R> {
    fn next_row(&mut self) -> Option<AttributionResult<Row>> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(AttributionError::Cursor(e.to_string()))),
            }
            self.line_no += 1;
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Some(serde_json::from_str::<Row>(trimmed).map_err(|e| {
                AttributionError::RowParse {
                    column: 0,
                    reason: format!("line {}: {}", self.line_no, e),
                }
            }));
        }
    }
}

// ─── Column contract ────────────────────────────────────────────────────────

const COL_USER_ID: usize = 0;
const COL_CAMPAIGN_ID: usize = 1;
const COL_CAMPAIGN_NAME: usize = 2;
const COL_ADGROUP_ID: usize = 3;
const COL_ADGROUP_NAME: usize = 4;
const COL_KEYWORD_NAME: usize = 5;
const COL_KEYWORD_MATCH_TYPE: usize = 6;
const COL_SOURCE: usize = 7;
const COL_CHANNEL_GROUP: usize = 8;
const COL_ATTRIBUTION_ID: usize = 9;
const COL_CLICK_ID: usize = 10;
const COL_LANDING_PAGE: usize = 11;
const COL_ALL_PAGE_VIEW: usize = 12;
const FIXED_COLUMNS: usize = 13;

/// Column order of cursor rows: thirteen fixed columns, one per configured
/// content group, then the timestamp.
#[derive(Debug, Clone, Default)]
pub struct ColumnContract {
    content_groups: Vec<String>,
}

impl ColumnContract {
    pub fn new(content_groups: Vec<String>) -> Self {
        Self { content_groups }
    }

    pub fn width(&self) -> usize {
        FIXED_COLUMNS + self.content_groups.len() + 1
    }

    fn timestamp_column(&self) -> usize {
        FIXED_COLUMNS + self.content_groups.len()
    }

    pub fn parse(&self, row: &[Cell]) -> AttributionResult<TouchRow> {
        if row.len() != self.width() {
            return Err(AttributionError::RowParse {
                column: row.len(),
                reason: format!("expected {} columns, found {}", self.width(), row.len()),
            });
        }
        let prop = |i: usize| row[i].to_property(i);

        let mut content_groups = BTreeMap::new();
        for (offset, name) in self.content_groups.iter().enumerate() {
            let column = FIXED_COLUMNS + offset;
            content_groups.insert(name.clone(), prop(column)?);
        }

        Ok(TouchRow {
            user_id: prop(COL_USER_ID)?,
            timestamp: row[self.timestamp_column()].to_timestamp(self.timestamp_column())?,
            ids: RawIdentifiers {
                campaign_id: prop(COL_CAMPAIGN_ID)?,
                campaign_name: prop(COL_CAMPAIGN_NAME)?,
                adgroup_id: prop(COL_ADGROUP_ID)?,
                adgroup_name: prop(COL_ADGROUP_NAME)?,
                keyword_name: prop(COL_KEYWORD_NAME)?,
                keyword_match_type: prop(COL_KEYWORD_MATCH_TYPE)?,
                source: prop(COL_SOURCE)?,
                channel_group: prop(COL_CHANNEL_GROUP)?,
                attribution_id: prop(COL_ATTRIBUTION_ID)?,
                click_id: prop(COL_CLICK_ID)?,
                landing_page_url: prop(COL_LANDING_PAGE)?,
                all_page_view_url: prop(COL_ALL_PAGE_VIEW)?,
                content_groups,
            },
        })
    }
}

/// One parsed cursor row.
#[derive(Debug, Clone)]
pub struct TouchRow {
    pub user_id: String,
    pub timestamp: i64,
    pub ids: RawIdentifiers,
}

// ─── Sessions ───────────────────────────────────────────────────────────────

/// Timing of one user's touches on one attribution key.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSessionData {
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub timestamps: Vec<i64>,
    /// Sticky: once any observation was in period, the session is.
    pub within_query_period: bool,
    pub marketing: MarketingData,
}

impl UserSessionData {
    pub fn new(timestamp: i64, within_query_period: bool, marketing: MarketingData) -> Self {
        Self {
            min_timestamp: timestamp,
            max_timestamp: timestamp,
            timestamps: vec![timestamp],
            within_query_period,
            marketing,
        }
    }

    pub fn observe(&mut self, timestamp: i64, within_query_period: bool) {
        self.min_timestamp = self.min_timestamp.min(timestamp);
        self.max_timestamp = self.max_timestamp.max(timestamp);
        self.timestamps.push(timestamp);
        self.within_query_period = self.within_query_period || within_query_period;
    }

    /// Fold another session on the same key into this one.
    pub fn absorb(&mut self, other: &UserSessionData) {
        self.min_timestamp = self.min_timestamp.min(other.min_timestamp);
        self.max_timestamp = self.max_timestamp.max(other.max_timestamp);
        self.timestamps.extend_from_slice(&other.timestamps);
        self.within_query_period = self.within_query_period || other.within_query_period;
    }

    pub fn span_secs(&self) -> i64 {
        self.max_timestamp.saturating_sub(self.min_timestamp)
    }
}

/// user id -> composite key -> session.
pub type SessionMap = HashMap<String, HashMap<String, UserSessionData>>;

/// Output of one extraction run.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub sessions: SessionMap,
    /// Users with at least one kept touch, in first-seen order.
    pub user_ids: Vec<String>,
    pub rows_read: u64,
    pub rows_skipped: u64,
    pub rows_filtered: u64,
    pub missing_ids: MissingIdLog,
}

fn tactic_offer_excluded(query: TacticOfferType, type_name: &str) -> bool {
    query != TacticOfferType::TacticOffer
        && type_name != PROPERTY_VALUE_NONE
        && type_name != query.as_str()
}

/// Consume the cursor into the per-user session map.
pub fn extract(
    cursor: &mut dyn RowCursor,
    query: &ResolvedQuery,
    reports: &MarketingReports,
    contract: &ColumnContract,
    diagnostics_cap: usize,
) -> AttributionResult<Extraction> {
    let window = AttributionWindow::from_query(query);
    let mut resolver = Resolver::new(query.attribution_key, reports, diagnostics_cap);
    let mut sessions: SessionMap = HashMap::new();
    let mut user_ids = Vec::new();
    let mut seen_users = HashSet::new();
    let (mut rows_read, mut rows_skipped, mut rows_filtered) = (0u64, 0u64, 0u64);

    while let Some(next) = cursor.next_row() {
        let touch = match next.and_then(|row| contract.parse(&row)) {
            Ok(touch) => touch,
            Err(e) if e.is_row_level() => {
                rows_read += 1;
                rows_skipped += 1;
                metrics::counter!("attribution.rows_skipped").increment(1);
                debug!(error = %e, "Skipping malformed row");
                continue;
            }
            Err(e) => {
                warn!(error = %e, rows_read, "Cursor failed, aborting extraction");
                return Err(e);
            }
        };
        rows_read += 1;
        metrics::counter!("attribution.rows_read").increment(1);

        let (marketing, name) = resolver.resolve(touch.ids);
        if !filter::matches(query.attribution_key, &name, &query.key_filters)
            || tactic_offer_excluded(query.tactic_offer_type, &marketing.type_name)
        {
            rows_filtered += 1;
            metrics::counter!("attribution.rows_filtered").increment(1);
            continue;
        }

        if seen_users.insert(touch.user_id.clone()) {
            user_ids.push(touch.user_id.clone());
        }
        let in_period = window.contains_touch(touch.timestamp);
        let key = marketing.key.clone();
        sessions
            .entry(touch.user_id)
            .or_default()
            .entry(key)
            .and_modify(|s| s.observe(touch.timestamp, in_period))
            .or_insert_with(|| UserSessionData::new(touch.timestamp, in_period, marketing));
    }

    let missing_ids = resolver.into_missing_ids();
    info!(
        rows_read,
        rows_skipped,
        rows_filtered,
        users = user_ids.len(),
        missing_ids = missing_ids.total(),
        "Session extraction finished"
    );

    Ok(Extraction {
        sessions,
        user_ids,
        rows_read,
        rows_skipped,
        rows_filtered,
        missing_ids,
    })
}

/// Re-key sessions from user ids to group ids (deal, opportunity). Users
/// without a group are dropped; sessions of users sharing a group merge.
pub fn coalesce_sessions(
    sessions: &SessionMap,
    group_of_user: &HashMap<String, String>,
) -> SessionMap {
    let mut coalesced: SessionMap = HashMap::new();
    let mut users: Vec<&String> = sessions.keys().collect();
    users.sort();
    for user in users {
        let Some(group) = group_of_user.get(user) else {
            continue;
        };
        let target = coalesced.entry(group.clone()).or_default();
        for (key, session) in &sessions[user] {
            target
                .entry(key.clone())
                .and_modify(|s| s.absorb(session))
                .or_insert_with(|| session.clone());
        }
    }
    coalesced
}

#[cfg(test)]
mod tests {
    use super::*;
    use attribution_core::config::AttributionSettings;
    use attribution_core::query::{
        AttributionKey, AttributionQuery, FilterOperator, KeyFilter, LogicalOp, QueryType,
    };

    const FROM: i64 = 1_700_000_000;
    const TO: i64 = FROM + 86_400 * 7;

    fn query(key: AttributionKey) -> ResolvedQuery {
        let raw = serde_json::json!({
            "ce": {"na": "signup"},
            "attribution_key": key,
            "from": FROM,
            "to": TO,
            "lbw": 10,
            "query_type": "EngagementBased"
        });
        let q: AttributionQuery = serde_json::from_value(raw).unwrap();
        q.resolve(&AttributionSettings::default()).unwrap()
    }

    fn row(user: &str, campaign: &str, ts: i64) -> Row {
        let mut cells = vec![Cell::str(user), Cell::Null, Cell::str(campaign)];
        cells.extend(std::iter::repeat(Cell::Null).take(6));
        cells.push(Cell::str(campaign)); // attribution id
        cells.extend([Cell::Null, Cell::Null, Cell::Null]);
        cells.push(Cell::Int(ts));
        cells
    }

    fn run(rows: Vec<Row>, q: &ResolvedQuery) -> Extraction {
        let mut cursor = VecCursor::new(rows);
        extract(
            &mut cursor,
            q,
            &MarketingReports::default(),
            &ColumnContract::default(),
            100,
        )
        .unwrap()
    }

    #[test]
    fn test_repeated_touches_upsert_one_session() {
        let q = query(AttributionKey::Campaign);
        let out = run(
            vec![
                row("u1", "Black Friday", FROM + 500),
                row("u1", "Black Friday", FROM + 100),
                row("u1", "Black Friday", FROM - 86_400 * 30),
            ],
            &q,
        );
        let session = &out.sessions["u1"]["$none:-:Black Friday"];
        assert_eq!(session.min_timestamp, FROM - 86_400 * 30);
        assert_eq!(session.max_timestamp, FROM + 500);
        assert_eq!(session.timestamps, vec![FROM + 500, FROM + 100, FROM - 86_400 * 30]);
        assert!(session.within_query_period);
        assert_eq!(out.user_ids, vec!["u1".to_string()]);
    }

    #[test]
    fn test_in_period_flag_is_sticky_or() {
        let q = query(AttributionKey::Campaign);
        let out = run(
            vec![
                row("u1", "Spring", FROM - 86_400 * 60),
                row("u1", "Spring", FROM + 10),
                row("u2", "Spring", FROM - 86_400 * 60),
            ],
            &q,
        );
        assert!(out.sessions["u1"]["$none:-:Spring"].within_query_period);
        assert!(!out.sessions["u2"]["$none:-:Spring"].within_query_period);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let q = query(AttributionKey::Campaign);
        let mut bad_type = row("u1", "Spring", FROM);
        bad_type[2] = Cell::Int(7);
        let short = vec![Cell::str("u2")];
        let out = run(vec![bad_type, short, row("u3", "Spring", FROM)], &q);
        assert_eq!(out.rows_read, 3);
        assert_eq!(out.rows_skipped, 2);
        assert_eq!(out.user_ids, vec!["u3".to_string()]);
    }

    #[test]
    fn test_cursor_error_aborts() {
        let q = query(AttributionKey::Campaign);
        let mut cursor = VecCursor::failing_after(
            vec![row("u1", "Spring", FROM), row("u2", "Spring", FROM)],
            1,
            "query timeout",
        );
        let err = extract(
            &mut cursor,
            &q,
            &MarketingReports::default(),
            &ColumnContract::default(),
            100,
        )
        .unwrap_err();
        assert!(matches!(err, AttributionError::Cursor(_)));
    }

    #[test]
    fn test_key_filters_drop_rows() {
        let mut q = query(AttributionKey::Campaign);
        q.key_filters = vec![KeyFilter {
            attribution_key: AttributionKey::Campaign,
            value_type: String::new(),
            property: String::new(),
            operator: FilterOperator::Equals,
            value: "Spring".to_string(),
            logical_op: LogicalOp::And,
        }];
        let out = run(
            vec![row("u1", "Spring", FROM), row("u2", "Autumn", FROM)],
            &q,
        );
        assert_eq!(out.rows_filtered, 1);
        assert!(out.sessions.contains_key("u1"));
        assert!(!out.sessions.contains_key("u2"));
    }

    #[test]
    fn test_null_user_maps_to_none_sentinel() {
        let q = query(AttributionKey::Campaign);
        let mut r = row("x", "Spring", FROM);
        r[0] = Cell::Null;
        let out = run(vec![r], &q);
        assert!(out.sessions.contains_key(PROPERTY_VALUE_NONE));
    }

    #[test]
    fn test_content_group_columns() {
        let q = query(AttributionKey::LandingPage);
        let contract = ColumnContract::new(vec!["blog".to_string()]);
        let mut r = row("u1", "Spring", FROM);
        let ts = r.pop().unwrap();
        r[COL_LANDING_PAGE] = Cell::str("/pricing");
        r[COL_ATTRIBUTION_ID] = Cell::str("/pricing");
        r.push(Cell::str("posts"));
        r.push(ts);
        let touch = contract.parse(&r).unwrap();
        assert_eq!(touch.ids.content_groups["blog"], "posts");
        assert_eq!(touch.ids.landing_page_url, "/pricing");

        let mut cursor = VecCursor::new(vec![r]);
        let out = extract(&mut cursor, &q, &MarketingReports::default(), &contract, 10).unwrap();
        assert!(out.sessions["u1"].contains_key("/pricing"));
    }

    #[test]
    fn test_json_lines_cursor() {
        let input = "[\"u1\",null]\nnot json\n\n[1,2]\n";
        let mut cursor = JsonLinesCursor::new(input.as_bytes());
        assert!(cursor.next_row().unwrap().is_ok());
        let err = cursor.next_row().unwrap().unwrap_err();
        assert!(err.is_row_level());
        assert_eq!(cursor.next_row().unwrap().unwrap(), vec![Cell::Int(1), Cell::Int(2)]);
        assert!(cursor.next_row().is_none());
    }

    #[test]
    fn test_coalesce_sessions_merges_users_of_one_group() {
        let q = query(AttributionKey::Campaign);
        let out = run(
            vec![
                row("u1", "Spring", FROM + 10),
                row("u2", "Spring", FROM + 50),
                row("u3", "Spring", FROM + 90),
            ],
            &q,
        );
        let mut groups = HashMap::new();
        groups.insert("u1".to_string(), "deal-1".to_string());
        groups.insert("u2".to_string(), "deal-1".to_string());
        let merged = coalesce_sessions(&out.sessions, &groups);
        assert_eq!(merged.len(), 1);
        let session = &merged["deal-1"]["$none:-:Spring"];
        assert_eq!(session.min_timestamp, FROM + 10);
        assert_eq!(session.max_timestamp, FROM + 50);
        assert_eq!(session.timestamps.len(), 2);
        assert_eq!(q.query_type, QueryType::EngagementBased);
    }
}
