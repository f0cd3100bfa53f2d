//! Attribution methodologies: split one conversion's credit across the
//! converting user's eligible touches.

use std::collections::HashMap;

use attribution_core::marketing::MarketingData;
use attribution_core::query::{AttributionKey, AttributionMethodology};
use attribution_core::types::SECS_IN_A_DAY;

use crate::extractor::UserSessionData;
use crate::period::AttributionWindow;
use crate::resolver::composite_key;

const TIME_DECAY_HALF_LIFE_DAYS: f64 = 7.0;

/// Credit given to one key for one conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyWeight {
    pub key: String,
    pub weight: f64,
}

impl KeyWeight {
    fn new(key: &str, weight: f64) -> Self {
        Self {
            key: key.to_string(),
            weight,
        }
    }
}

/// Composite key of a touch that carried no marketing information.
pub fn none_key(key: AttributionKey) -> String {
    composite_key(key, &MarketingData::default())
}

#[derive(Debug, Clone, Copy)]
struct Interaction<'a> {
    key: &'a str,
    at: i64,
}

/// All touches of a user, oldest first. Ties order by key so results do
/// not depend on map iteration order.
fn interactions(sessions: &HashMap<String, UserSessionData>) -> Vec<Interaction<'_>> {
    let mut all: Vec<Interaction<'_>> = sessions
        .iter()
        .flat_map(|(key, session)| {
            session.timestamps.iter().map(move |&at| Interaction {
                key: key.as_str(),
                at,
            })
        })
        .collect();
    all.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.key.cmp(b.key)));
    all
}

/// `2^(-days/7)`, days counted in whole days before the conversion.
pub fn time_decay_weight(conversion_ts: i64, touch_ts: i64) -> f64 {
    let days = conversion_ts.saturating_sub(touch_ts) / SECS_IN_A_DAY;
    2f64.powf(-(days as f64) / TIME_DECAY_HALF_LIFE_DAYS)
}

/// Split one conversion at `conversion_ts` across the user's touches.
/// Returns nothing when no touch is eligible.
pub fn attribute(
    methodology: AttributionMethodology,
    window: &AttributionWindow,
    attribution_key: AttributionKey,
    sessions: &HashMap<String, UserSessionData>,
    conversion_ts: i64,
) -> Vec<KeyWeight> {
    let all = interactions(sessions);
    let eligible: Vec<Interaction<'_>> = all
        .into_iter()
        .filter(|i| window.credits(i.at, conversion_ts))
        .collect();
    if eligible.is_empty() {
        return Vec::new();
    }

    match methodology {
        AttributionMethodology::FirstTouch => vec![KeyWeight::new(eligible[0].key, 1.0)],
        AttributionMethodology::LastTouch => {
            vec![KeyWeight::new(eligible[eligible.len() - 1].key, 1.0)]
        }
        AttributionMethodology::FirstTouchNonDirect => {
            non_direct(eligible.iter(), &none_key(attribution_key))
        }
        AttributionMethodology::LastTouchNonDirect => {
            non_direct(eligible.iter().rev(), &none_key(attribution_key))
        }
        AttributionMethodology::Linear | AttributionMethodology::Influence => {
            let share = 1.0 / eligible.len() as f64;
            eligible
                .iter()
                .map(|i| KeyWeight::new(i.key, share))
                .collect()
        }
        AttributionMethodology::UShaped => vec![
            KeyWeight::new(eligible[0].key, 0.5),
            KeyWeight::new(eligible[eligible.len() - 1].key, 0.5),
        ],
        AttributionMethodology::TimeDecay => {
            let raw: Vec<f64> = eligible
                .iter()
                .map(|i| time_decay_weight(conversion_ts, i.at))
                .collect();
            let total: f64 = raw.iter().sum();
            eligible
                .iter()
                .zip(raw)
                .map(|(i, w)| KeyWeight::new(i.key, w / total))
                .collect()
        }
    }
}

/// First eligible touch with marketing information; the direct ("none")
/// key only when nothing else qualified.
fn non_direct<'a, I>(mut ordered: I, none: &str) -> Vec<KeyWeight>
where
    I: Iterator<Item = &'a Interaction<'a>>,
{
    match ordered.find(|i| i.key != none) {
        Some(i) => vec![KeyWeight::new(i.key, 1.0)],
        None => vec![KeyWeight::new(none, 1.0)],
    }
}

/// Sum weights per key.
pub fn weights_by_key(weights: &[KeyWeight]) -> HashMap<&str, f64> {
    let mut out: HashMap<&str, f64> = HashMap::new();
    for w in weights {
        *out.entry(w.key.as_str()).or_insert(0.0) += w.weight;
    }
    out
}
