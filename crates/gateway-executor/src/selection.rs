//! C8 selection algorithm (§4.8 step 1–3).

use chrono::{DateTime, Utc};
use gateway_auth::{Auth, RuntimePauseRegistry};

/// Filters `auths` down to eligible candidates for `(provider, model)`, sorts
/// desc by priority with a least-recently-updated tie-break, and returns the
/// winner (or `None` if no candidate is eligible).
pub fn select_candidate(
    auths: &[Auth],
    provider: &str,
    model: &str,
    pauses: &RuntimePauseRegistry,
    excluded_ids: &[String],
    now: DateTime<Utc>,
) -> Option<Auth> {
    let mut candidates: Vec<&Auth> = auths
        .iter()
        .filter(|a| {
            a.is_eligible(provider, model, now)
                && !pauses.is_paused(&a.id, model)
                && !excluded_ids.contains(&a.id)
        })
        .collect();
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.updated_at.cmp(&b.updated_at)));
    candidates.into_iter().next().cloned()
}
