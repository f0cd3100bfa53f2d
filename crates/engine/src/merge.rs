//! Row layout and the merge of two partial rows sharing a composite key.
//!
//! Raw counters are summed and every derived ratio is recomputed from the
//! summed counters. Ratios are never averaged.

use std::collections::HashMap;

use attribution_core::error::{AttributionError, AttributionResult};
use attribution_core::query::{AggFunction, AnalyzeType, AttributionKey};
use attribution_core::types::{Cell, Row, KEY_DELIMITER};
use tracing::warn;

use crate::ratios;

// ─── Layout ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    /// Ad-spend block plus per-goal and linked-event groups.
    Marketing,
    /// Marketing block plus session count and average session time.
    Kpi,
    /// Landing page / all page view: conversion counts only.
    Page,
}

/// Column positions of a result row. Identity columns run up to and
/// including `key_index`; metrics follow; the last column is the raw
/// composite key.
#[derive(Debug, Clone, PartialEq)]
pub struct RowLayout {
    pub key_index: usize,
    pub kind: LayoutKind,
    pub goals: Vec<AggFunction>,
    pub linked_events: usize,
}

// Offsets inside the fixed block.
const IMPRESSIONS: usize = 0;
const CLICKS: usize = 1;
const SPEND: usize = 2;
const CTR: usize = 3;
const AVG_CPC: usize = 4;
const CPM: usize = 5;
const CLICK_CONV_RATE: usize = 6;
const VISITORS: usize = 7;
const SESSIONS: usize = 8;
const AVG_SESSION_TIME: usize = 9;

// Offsets inside a goal group.
const CONV: usize = 0;
const INFLUENCE: usize = 1;
const COST_RATIO: usize = 2;
const CONV_RATE: usize = 3;
const COMPARE: usize = 4;

impl RowLayout {
    pub fn new(
        key_index: usize,
        kind: LayoutKind,
        goals: Vec<AggFunction>,
        linked_events: usize,
    ) -> Self {
        Self {
            key_index,
            kind,
            goals,
            linked_events,
        }
    }

    pub fn kind_for(key: AttributionKey, analyze_type: AnalyzeType) -> LayoutKind {
        if key.is_page_key() {
            LayoutKind::Page
        } else if analyze_type.is_kpi() {
            LayoutKind::Kpi
        } else {
            LayoutKind::Marketing
        }
    }

    fn metrics_start(&self) -> usize {
        self.key_index + 1
    }

    pub fn fixed_width(&self) -> usize {
        match self.kind {
            LayoutKind::Marketing => 8,
            LayoutKind::Kpi => 10,
            LayoutKind::Page => 0,
        }
    }

    pub fn goal_width(&self) -> usize {
        match self.kind {
            LayoutKind::Page => 4,
            LayoutKind::Marketing | LayoutKind::Kpi => 8,
        }
    }

    pub fn linked_width(&self) -> usize {
        match self.kind {
            LayoutKind::Page => 2,
            LayoutKind::Marketing | LayoutKind::Kpi => 3,
        }
    }

    pub fn fixed(&self, offset: usize) -> usize {
        self.metrics_start() + offset
    }

    pub fn goal_base(&self, goal: usize) -> usize {
        self.metrics_start() + self.fixed_width() + goal * self.goal_width()
    }

    pub fn conversion(&self, goal: usize) -> usize {
        self.goal_base(goal) + CONV
    }

    pub fn influence(&self, goal: usize) -> usize {
        self.goal_base(goal) + INFLUENCE
    }

    pub fn compare_conversion(&self, goal: usize) -> usize {
        match self.kind {
            LayoutKind::Page => self.goal_base(goal) + 2,
            _ => self.goal_base(goal) + COMPARE + CONV,
        }
    }

    pub fn compare_influence(&self, goal: usize) -> usize {
        match self.kind {
            LayoutKind::Page => self.goal_base(goal) + 3,
            _ => self.goal_base(goal) + COMPARE + INFLUENCE,
        }
    }

    pub fn linked_base(&self, linked: usize) -> usize {
        self.goal_base(self.goals.len()) + linked * self.linked_width()
    }

    pub fn key_column(&self) -> usize {
        self.linked_base(self.linked_events)
    }

    pub fn width(&self) -> usize {
        self.key_column() + 1
    }

    /// Column holding the primary conversion metric, used for sorting.
    pub fn primary_conversion(&self) -> Option<usize> {
        (!self.goals.is_empty()).then(|| self.conversion(0))
    }

    /// A zero-valued row with the given identity cells and raw key.
    pub fn zero_row(&self, identity: Vec<Cell>, key: &str) -> Row {
        let mut row = identity;
        row.resize(self.metrics_start(), Cell::str(""));
        if self.kind != LayoutKind::Page {
            row.extend([Cell::Int(0), Cell::Int(0), Cell::Float(0.0)]);
            row.extend(std::iter::repeat(Cell::Float(0.0)).take(4));
            row.push(Cell::Int(0));
            if self.kind == LayoutKind::Kpi {
                row.extend([Cell::Int(0), Cell::Float(0.0)]);
            }
        }
        let metric_floats =
            self.goals.len() * self.goal_width() + self.linked_events * self.linked_width();
        row.extend(std::iter::repeat(Cell::Float(0.0)).take(metric_floats));
        row.push(Cell::str(key));
        row
    }

    /// Identity cells joined into a grouping key.
    pub fn identity_key(&self, row: &[Cell]) -> String {
        row.iter()
            .take(self.metrics_start())
            .map(|c| match c {
                Cell::Str(s) => s.clone(),
                Cell::Null => String::new(),
                other => format!("{:?}", other),
            })
            .collect::<Vec<_>>()
            .join(KEY_DELIMITER)
    }
}

// ─── Typed cell access ──────────────────────────────────────────────────────

fn int_at(row: &[Cell], idx: usize) -> AttributionResult<i64> {
    match row.get(idx) {
        Some(Cell::Int(v)) => Ok(*v),
        other => Err(AttributionError::Merge(format!(
            "column {} expected an integer counter, found {:?}",
            idx, other
        ))),
    }
}

fn float_at(row: &[Cell], idx: usize) -> AttributionResult<f64> {
    row.get(idx).and_then(Cell::as_f64).ok_or_else(|| {
        AttributionError::Merge(format!(
            "column {} expected a numeric value, found {:?}",
            idx,
            row.get(idx)
        ))
    })
}

fn add_int(out: &mut Row, a: &[Cell], b: &[Cell], idx: usize) -> AttributionResult<()> {
    out[idx] = Cell::Int(int_at(a, idx)? + int_at(b, idx)?);
    Ok(())
}

fn add_float(out: &mut Row, a: &[Cell], b: &[Cell], idx: usize) -> AttributionResult<()> {
    out[idx] = Cell::Float(float_at(a, idx)? + float_at(b, idx)?);
    Ok(())
}

// ─── Recompute and merge ────────────────────────────────────────────────────

/// Rewrite every derived column from the raw counters already in `row`.
pub fn recompute(row: &mut Row, layout: &RowLayout) -> AttributionResult<()> {
    if row.len() != layout.width() {
        return Err(AttributionError::Merge(format!(
            "row has {} columns, layout expects {}",
            row.len(),
            layout.width()
        )));
    }
    if layout.kind == LayoutKind::Page {
        return Ok(());
    }

    let impressions = int_at(row, layout.fixed(IMPRESSIONS))?;
    let clicks = int_at(row, layout.fixed(CLICKS))?;
    let spend = float_at(row, layout.fixed(SPEND))?;
    let visitors = int_at(row, layout.fixed(VISITORS))?;
    let population = match layout.kind {
        LayoutKind::Kpi => int_at(row, layout.fixed(SESSIONS))?,
        _ => visitors,
    };
    let first_conversion = match layout.primary_conversion() {
        Some(idx) => float_at(row, idx)?,
        None => 0.0,
    };

    row[layout.fixed(CTR)] = Cell::Float(ratios::ctr(clicks, impressions));
    row[layout.fixed(AVG_CPC)] = Cell::Float(ratios::avg_cpc(spend, clicks));
    row[layout.fixed(CPM)] = Cell::Float(ratios::cpm(spend, impressions));
    row[layout.fixed(CLICK_CONV_RATE)] =
        Cell::Float(ratios::click_conversion_rate(first_conversion, clicks));

    for (goal, agg) in layout.goals.iter().enumerate() {
        let base = layout.goal_base(goal);
        for block in [0, COMPARE] {
            let conversions = float_at(row, base + block + CONV)?;
            row[base + block + COST_RATIO] =
                Cell::Float(ratios::cost_ratio(*agg, conversions, spend));
            row[base + block + CONV_RATE] =
                Cell::Float(ratios::conversion_rate(conversions, population));
        }
    }

    for linked in 0..layout.linked_events {
        let base = layout.linked_base(linked);
        let count = float_at(row, base)?;
        row[base + 2] = Cell::Float(ratios::cost_ratio(AggFunction::Count, count, spend));
    }
    Ok(())
}

/// Merge two rows of the same layout. Identity cells come from `a`.
pub fn merge_rows(a: &[Cell], b: &[Cell], layout: &RowLayout) -> AttributionResult<Row> {
    let width = layout.width();
    if a.len() != width || b.len() != width {
        return Err(AttributionError::Merge(format!(
            "row lengths {} and {} do not match layout width {}",
            a.len(),
            b.len(),
            width
        )));
    }
    let mut out = a.to_vec();

    if layout.kind != LayoutKind::Page {
        add_int(&mut out, a, b, layout.fixed(IMPRESSIONS))?;
        add_int(&mut out, a, b, layout.fixed(CLICKS))?;
        add_float(&mut out, a, b, layout.fixed(SPEND))?;
        add_int(&mut out, a, b, layout.fixed(VISITORS))?;
        if layout.kind == LayoutKind::Kpi {
            let (sa, sb) = (
                int_at(a, layout.fixed(SESSIONS))?,
                int_at(b, layout.fixed(SESSIONS))?,
            );
            let (ta, tb) = (
                float_at(a, layout.fixed(AVG_SESSION_TIME))?,
                float_at(b, layout.fixed(AVG_SESSION_TIME))?,
            );
            out[layout.fixed(SESSIONS)] = Cell::Int(sa + sb);
            out[layout.fixed(AVG_SESSION_TIME)] =
                Cell::Float(ratios::weighted_average(ta, sa, tb, sb));
        }
    }

    for goal in 0..layout.goals.len() {
        for idx in [
            layout.conversion(goal),
            layout.influence(goal),
            layout.compare_conversion(goal),
            layout.compare_influence(goal),
        ] {
            add_float(&mut out, a, b, idx)?;
        }
    }
    for linked in 0..layout.linked_events {
        let base = layout.linked_base(linked);
        add_float(&mut out, a, b, base)?;
        add_float(&mut out, a, b, base + 1)?;
    }

    recompute(&mut out, layout)?;
    Ok(out)
}

/// Merge rows that share identity cells, keeping first-seen order. A row
/// shorter than the longest row seen so far is dropped, as is any row the
/// merge rejects.
pub fn merge_rows_by_key(rows: Vec<Row>, layout: &RowLayout) -> Vec<Row> {
    let mut merged: Vec<Row> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut max_len = 0usize;

    for row in rows {
        max_len = max_len.max(row.len());
        if row.is_empty() || row.len() != max_len {
            warn!(len = row.len(), expected = max_len, "Dropping row with mismatched length");
            metrics::counter!("attribution.merge_rows_dropped").increment(1);
            continue;
        }
        let key = layout.identity_key(&row);
        match position.get(&key) {
            Some(&idx) => match merge_rows(&merged[idx], &row, layout) {
                Ok(m) => merged[idx] = m,
                Err(e) => {
                    warn!(error = %e, key = %key, "Dropping row that failed to merge");
                    metrics::counter!("attribution.merge_rows_dropped").increment(1);
                }
            },
            None => {
                position.insert(key, merged.len());
                merged.push(row);
            }
        }
    }
    merged
}
