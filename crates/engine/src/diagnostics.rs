//! Bounded record of enrichment ids that had no report row.

use serde::Serialize;
use tracing::warn;

/// Which enrichment stage missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingIdKind {
    ClickId,
    CampaignId,
    AdgroupId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingId {
    pub kind: MissingIdKind,
    pub id: String,
    /// Name the row fell back to.
    pub fallback: String,
}

/// Keeps the first `cap` misses and counts the rest.
#[derive(Debug, Clone, Serialize)]
pub struct MissingIdLog {
    cap: usize,
    entries: Vec<MissingId>,
    total: u64,
}

impl MissingIdLog {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: Vec::new(),
            total: 0,
        }
    }

    pub fn record(&mut self, kind: MissingIdKind, id: &str, fallback: &str) {
        self.total += 1;
        metrics::counter!("attribution.enrichment_missing").increment(1);
        if self.entries.len() < self.cap {
            self.entries.push(MissingId {
                kind,
                id: id.to_string(),
                fallback: fallback.to_string(),
            });
        }
    }

    pub fn entries(&self) -> &[MissingId] {
        &self.entries
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn contains(&self, kind: MissingIdKind, id: &str) -> bool {
        self.entries.iter().any(|e| e.kind == kind && e.id == id)
    }

    /// Emit one summary line; the entries go out as a single field.
    pub fn log_summary(&self, query_id: &str) {
        if self.total == 0 {
            return;
        }
        let sample: Vec<&str> = self.entries.iter().map(|e| e.id.as_str()).collect();
        warn!(
            query_id,
            missing_total = self.total,
            kept = self.entries.len(),
            sample = ?sample,
            "Enrichment ids without report rows"
        );
    }
}

impl Default for MissingIdLog {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_capped_but_counts_everything() {
        let mut log = MissingIdLog::new(2);
        log.record(MissingIdKind::ClickId, "c1", "A");
        log.record(MissingIdKind::ClickId, "c2", "B");
        log.record(MissingIdKind::CampaignId, "42", "C");
        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.total(), 3);
        assert!(log.contains(MissingIdKind::ClickId, "c1"));
        assert!(!log.contains(MissingIdKind::CampaignId, "42"));
    }
}
