//! Header/row rendering, sorting, grand total and dimension trimming.

use std::collections::{BTreeMap, HashSet};

use attribution_core::error::{AttributionError, AttributionResult};
use attribution_core::marketing::MarketingReports;
use attribution_core::query::{AggFunction, AttributionMethodology, ResolvedQuery};
use attribution_core::tables::{
    self, GRAND_TOTAL_LABEL, KEY_COLUMN_HEADER, KPI_EXTRA_HEADERS, MARKETING_FIXED_HEADERS,
};
use attribution_core::types::{
    round_with_precision, Cell, QueryResult, Row, DEFAULT_PRECISION, NONE_DISPLAY,
    PROPERTY_VALUE_NONE,
};
use tracing::{debug, warn};

use crate::aggregator::AttributionData;
use crate::merge::{merge_rows, merge_rows_by_key, recompute, LayoutKind, RowLayout};

/// An unfinalized result: untrimmed identity columns, no sort, no total.
/// Two reports of the same query can still be combined at this stage.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributionReport {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub layout: RowLayout,
    /// One flag per identity column: shown in the final result or not.
    keep_identity: Vec<bool>,
    methodology: AttributionMethodology,
    compare_methodology: Option<AttributionMethodology>,
}

fn goal_headers(kind: LayoutKind, goal: &str, agg: AggFunction) -> Vec<String> {
    let cost = match agg {
        AggFunction::Sum => "Return on Cost",
        AggFunction::Count | AggFunction::Unique => "Cost Per Conversion",
    };
    let block = |prefix: &str| -> Vec<String> {
        match kind {
            LayoutKind::Page => vec![
                format!("{}{} - Conversion", prefix, goal),
                format!("{}{} - Conversion Influence", prefix, goal),
            ],
            LayoutKind::Marketing | LayoutKind::Kpi => vec![
                format!("{}{} - Conversion", prefix, goal),
                format!("{}{} - Conversion Influence", prefix, goal),
                format!("{}{} - {}", prefix, goal, cost),
                format!("{}{} - Conversion Rate(%)", prefix, goal),
            ],
        }
    };
    let mut headers = block("");
    headers.extend(block("Compare - "));
    headers
}

fn linked_headers(kind: LayoutKind, event: &str) -> Vec<String> {
    let mut headers = vec![
        format!("{} - Users", event),
        format!("{} - Users Influence", event),
    ];
    if kind != LayoutKind::Page {
        headers.push(format!("{} - Cost Per Conversion", event));
    }
    headers
}

impl AttributionReport {
    /// Render aggregated entries into rows of the query's layout.
    pub fn build(
        query: &ResolvedQuery,
        entries: &BTreeMap<String, AttributionData>,
        reports: &MarketingReports,
    ) -> AttributionResult<Self> {
        let key = query.attribution_key;
        let kind = RowLayout::kind_for(key, query.analyze_type);

        let mut headers: Vec<String> = tables::added_key_headers(key)
            .iter()
            .map(|h| h.to_string())
            .collect();
        headers.push(tables::key_header(key).to_string());
        let shown: HashSet<&str> = query
            .key_dimensions
            .iter()
            .filter_map(|d| tables::dimension_header(d))
            .collect();
        let mut keep_identity: Vec<bool> = headers
            .iter()
            .map(|h| shown.contains(h.as_str()))
            .collect();
        // The key's own column is always shown.
        if let Some(last) = keep_identity.last_mut() {
            *last = true;
        }
        let extra_identity: Vec<&String> = query
            .custom_dimensions
            .iter()
            .chain(query.content_groups.iter())
            .collect();
        headers.extend(extra_identity.iter().map(|h| h.to_string()));
        keep_identity.extend(std::iter::repeat(true).take(extra_identity.len()));

        let layout = RowLayout::new(
            headers.len() - 1,
            kind,
            query.goals.iter().map(|g| g.agg).collect(),
            query.linked_events.len(),
        );

        match kind {
            LayoutKind::Marketing => headers.extend(MARKETING_FIXED_HEADERS.iter().map(|h| h.to_string())),
            LayoutKind::Kpi => headers.extend(
                MARKETING_FIXED_HEADERS
                    .iter()
                    .chain(KPI_EXTRA_HEADERS.iter())
                    .map(|h| h.to_string()),
            ),
            LayoutKind::Page => {}
        }
        for goal in &query.goals {
            headers.extend(goal_headers(kind, &goal.name, goal.agg));
        }
        for event in &query.linked_events {
            headers.extend(linked_headers(kind, event));
        }
        headers.push(KEY_COLUMN_HEADER.to_string());

        let mut rows = Vec::with_capacity(entries.len());
        for data in entries.values() {
            let mut identity: Vec<Cell> = data.added_keys.iter().map(Cell::str).collect();
            identity.push(Cell::str(data.name.as_str()));
            for dimension in &query.custom_dimensions {
                let value = reports
                    .custom_dimensions
                    .get(&data.key)
                    .and_then(|dims| dims.get(dimension))
                    .map(String::as_str)
                    .unwrap_or(PROPERTY_VALUE_NONE);
                identity.push(Cell::str(value));
            }
            for group in &query.content_groups {
                let value = data
                    .marketing
                    .content_groups
                    .get(group)
                    .map(String::as_str)
                    .unwrap_or(PROPERTY_VALUE_NONE);
                identity.push(Cell::str(value));
            }
            rows.push(data_row(&layout, identity, data)?);
        }

        debug!(rows = rows.len(), columns = headers.len(), "Attribution rows built");
        Ok(Self {
            headers,
            rows,
            layout,
            keep_identity,
            methodology: query.methodology,
            compare_methodology: query.compare_methodology,
        })
    }

    /// Drop the hidden identity columns, merge rows that now show the same
    /// identity, then sort and append the grand total.
    pub fn finalize(self) -> AttributionResult<QueryResult> {
        let hidden: Vec<usize> = self
            .keep_identity
            .iter()
            .enumerate()
            .filter(|(_, keep)| !**keep)
            .map(|(idx, _)| idx)
            .collect();
        let mut headers = self.headers;
        let mut rows = self.rows;
        for &idx in hidden.iter().rev() {
            headers.remove(idx);
            for row in rows.iter_mut() {
                row.remove(idx);
            }
        }

        let layout = RowLayout {
            key_index: self.layout.key_index - hidden.len(),
            ..self.layout
        };
        let before = rows.len();
        let mut rows = merge_rows_by_key(rows, &layout);
        if rows.len() < before {
            debug!(before, after = rows.len(), "Rows merged on the shown identity");
        }

        if rows.is_empty() {
            let identity = vec![Cell::str(NONE_DISPLAY); layout.key_index + 1];
            rows.push(layout.zero_row(identity, NONE_DISPLAY));
        }

        sort_by_primary_conversion(&mut rows, &layout);
        let total = grand_total(&rows, &layout, self.methodology, self.compare_methodology)?;
        rows.push(total);
        Ok(QueryResult { headers, rows })
    }
}

fn data_row(layout: &RowLayout, identity: Vec<Cell>, data: &AttributionData) -> AttributionResult<Row> {
    let mut row = identity;
    if layout.kind != LayoutKind::Page {
        row.extend([
            Cell::Int(data.impressions),
            Cell::Int(data.clicks),
            Cell::Float(data.spend),
        ]);
        // Ratios are filled in by `recompute`.
        row.extend(std::iter::repeat(Cell::Float(0.0)).take(4));
        row.push(Cell::Int(data.website_visitors));
        if layout.kind == LayoutKind::Kpi {
            row.push(Cell::Int(data.sessions));
            row.push(Cell::Float(round_with_precision(
                data.average_session_time(),
                DEFAULT_PRECISION,
            )));
        }
    }
    for goal in 0..layout.goals.len() {
        let (conv, infl) = (data.conversions[goal], data.influence[goal]);
        let (c_conv, c_infl) = (data.compare_conversions[goal], data.compare_influence[goal]);
        match layout.kind {
            LayoutKind::Page => row.extend([conv, infl, c_conv, c_infl].map(Cell::Float)),
            LayoutKind::Marketing | LayoutKind::Kpi => row.extend(
                [conv, infl, 0.0, 0.0, c_conv, c_infl, 0.0, 0.0].map(Cell::Float),
            ),
        }
    }
    for linked in 0..layout.linked_events {
        row.push(Cell::Float(data.linked_conversions[linked]));
        row.push(Cell::Float(data.linked_influence[linked]));
        if layout.kind != LayoutKind::Page {
            row.push(Cell::Float(0.0));
        }
    }
    row.push(Cell::str(data.key.as_str()));
    recompute(&mut row, layout)?;
    Ok(row)
}

/// Stable descending sort on the primary conversion column. Rows without a
/// numeric value there keep their position.
fn sort_by_primary_conversion(rows: &mut [Row], layout: &RowLayout) {
    let Some(column) = layout.primary_conversion() else {
        return;
    };
    let positions: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.get(column).and_then(Cell::as_f64).is_some())
        .map(|(idx, _)| idx)
        .collect();
    let mut sortable: Vec<Row> = positions
        .iter()
        .map(|&idx| std::mem::take(&mut rows[idx]))
        .collect();
    sortable.sort_by(|a, b| {
        let value = |row: &Row| row[column].as_f64().unwrap_or_default();
        value(b).total_cmp(&value(a))
    });
    for (idx, row) in positions.into_iter().zip(sortable) {
        rows[idx] = row;
    }
}

fn grand_total(
    rows: &[Row],
    layout: &RowLayout,
    methodology: AttributionMethodology,
    compare_methodology: Option<AttributionMethodology>,
) -> AttributionResult<Row> {
    let identity: Vec<Cell> = (0..=layout.key_index)
        .map(|idx| Cell::str(if idx == 0 { GRAND_TOTAL_LABEL } else { "" }))
        .collect();
    let mut total = layout.zero_row(identity, GRAND_TOTAL_LABEL);
    for row in rows {
        match merge_rows(&total, row, layout) {
            Ok(merged) => total = merged,
            Err(e) => warn!(error = %e, "Row left out of the grand total"),
        }
    }

    // Influence totals stand in for conversion totals, block by block.
    let influence = AttributionMethodology::Influence;
    if methodology == influence {
        for goal in 0..layout.goals.len() {
            total[layout.conversion(goal)] = total[layout.influence(goal)].clone();
        }
        for linked in 0..layout.linked_events {
            let base = layout.linked_base(linked);
            total[base] = total[base + 1].clone();
        }
    }
    if compare_methodology == Some(influence) {
        for goal in 0..layout.goals.len() {
            total[layout.compare_conversion(goal)] = total[layout.compare_influence(goal)].clone();
        }
    }
    if methodology == influence || compare_methodology == Some(influence) {
        recompute(&mut total, layout)?;
    }
    Ok(total)
}

/// Merge two reports of the same query into one, combining rows that share
/// their identity cells.
pub fn combine_results(
    a: AttributionReport,
    b: AttributionReport,
) -> AttributionResult<AttributionReport> {
    if a.headers != b.headers || a.layout != b.layout {
        return Err(AttributionError::Merge(format!(
            "cannot combine results with different layouts ({} and {} columns)",
            a.headers.len(),
            b.headers.len()
        )));
    }
    let AttributionReport {
        headers,
        mut rows,
        layout,
        keep_identity,
        methodology,
        compare_methodology,
    } = a;
    rows.extend(b.rows);
    let rows = merge_rows_by_key(rows, &layout);
    Ok(AttributionReport {
        headers,
        rows,
        layout,
        keep_identity,
        methodology,
        compare_methodology,
    })
}
