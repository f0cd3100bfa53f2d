//! Attribution key filter evaluation.
//!
//! A value is kept when it passes the AND pass (every clause holds) or the
//! OR pass (some clause holds). The clauses' own logical operators are not
//! consulted. An empty list keeps everything.

use attribution_core::query::{AttributionKey, FilterOperator, KeyFilter};

/// Evaluate one clause. Clauses scoped to another key type always hold.
pub fn apply_operator(key: AttributionKey, value: &str, filter: &KeyFilter) -> bool {
    if filter.attribution_key != key {
        return true;
    }
    match filter.operator {
        FilterOperator::Equals => value == filter.value,
        FilterOperator::NotEqual => value != filter.value,
        FilterOperator::Contains => value.contains(filter.value.as_str()),
        FilterOperator::NotContains => !value.contains(filter.value.as_str()),
        FilterOperator::Unknown => false,
    }
}

pub fn passes_and(key: AttributionKey, value: &str, filters: &[KeyFilter]) -> bool {
    filters.iter().all(|f| apply_operator(key, value, f))
}

pub fn passes_or(key: AttributionKey, value: &str, filters: &[KeyFilter]) -> bool {
    filters.iter().any(|f| apply_operator(key, value, f))
}

pub fn matches(key: AttributionKey, value: &str, filters: &[KeyFilter]) -> bool {
    filters.is_empty() || passes_and(key, value, filters) || passes_or(key, value, filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attribution_core::query::LogicalOp;

    fn clause(op: FilterOperator, value: &str, lop: LogicalOp) -> KeyFilter {
        KeyFilter {
            attribution_key: AttributionKey::Campaign,
            value_type: "categorical".to_string(),
            property: "$campaign".to_string(),
            operator: op,
            value: value.to_string(),
            logical_op: lop,
        }
    }

    #[test]
    fn test_no_filters_accepts_everything() {
        assert!(matches(AttributionKey::Campaign, "anything", &[]));
    }

    #[test]
    fn test_single_equals_clause() {
        let filters = vec![clause(FilterOperator::Equals, "X", LogicalOp::And)];
        assert!(passes_and(AttributionKey::Campaign, "X", &filters));
        assert!(passes_or(AttributionKey::Campaign, "X", &filters));
        assert!(!passes_and(AttributionKey::Campaign, "Y", &filters));
        assert!(!passes_or(AttributionKey::Campaign, "Y", &filters));
        assert!(matches(AttributionKey::Campaign, "X", &filters));
        assert!(!matches(AttributionKey::Campaign, "Y", &filters));
    }

    #[test]
    fn test_either_pass_is_enough() {
        // Fails the AND pass, passes the OR pass.
        let filters = vec![
            clause(FilterOperator::Contains, "brand", LogicalOp::And),
            clause(FilterOperator::Contains, "search", LogicalOp::And),
        ];
        assert!(!passes_and(AttributionKey::Campaign, "brand display", &filters));
        assert!(matches(AttributionKey::Campaign, "brand display", &filters));
        assert!(!matches(AttributionKey::Campaign, "generic display", &filters));
    }

    #[test]
    fn test_negative_operators() {
        let filters = vec![clause(FilterOperator::NotContains, "test", LogicalOp::And)];
        assert!(matches(AttributionKey::Campaign, "Spring Sale", &filters));
        assert!(!matches(AttributionKey::Campaign, "test campaign", &filters));

        let filters = vec![clause(FilterOperator::NotEqual, "$none", LogicalOp::Or)];
        assert!(!matches(AttributionKey::Campaign, "$none", &filters));
    }

    #[test]
    fn test_unknown_operator_never_matches() {
        let filters = vec![clause(FilterOperator::Unknown, "X", LogicalOp::And)];
        assert!(!matches(AttributionKey::Campaign, "X", &filters));
    }

    #[test]
    fn test_clause_for_other_key_type_holds() {
        let filters = vec![clause(FilterOperator::Equals, "X", LogicalOp::And)];
        assert!(matches(AttributionKey::Source, "google", &filters));
    }
}
