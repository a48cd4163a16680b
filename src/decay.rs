//! Time-and-usage confidence decay.
//!
//! Pure functions over a [`DecayView`] snapshot — nothing here touches
//! storage. Confidence follows exponential half-life decay where each
//! recorded access extends the effective half-life, so frequently used
//! memories forget slower. Decay is lazy: the stored confidence is only
//! rewritten when an access is recorded, never by a background sweep.
//!
//! The law: `T = min(base_half_life + access_count * access_boost,
//! max_half_life)` and `R(t) = R0 * 0.5^(dt / T)` with `dt` measured from
//! `last_accessed`.

use chrono::{DateTime, Duration, Utc};

pub use crate::config::DecayConfig;

/// Snapshot of the decay-relevant fields of a record.
#[derive(Debug, Clone)]
pub struct DecayView {
    pub id: String,
    pub confidence: f64,
    pub access_count: u32,
    pub created_at: DateTime<Utc>,
    /// Falls back to `created_at` for never-accessed records.
    pub last_accessed: DateTime<Utc>,
}

/// Effective half-life in hours, grown by usage and capped.
pub fn effective_half_life(config: &DecayConfig, access_count: u32) -> f64 {
    let extended =
        config.base_half_life_hours + access_count as f64 * config.access_boost_hours;
    extended.min(config.max_half_life_hours)
}

/// Confidence at `now`, computed from the stored value and elapsed time.
///
/// Monotonically non-increasing between accesses. Clock skew that puts
/// `last_accessed` in the future yields no decay rather than growth.
pub fn decayed_confidence(config: &DecayConfig, view: &DecayView, now: DateTime<Utc>) -> f64 {
    let elapsed = now - view.last_accessed;
    if elapsed <= Duration::zero() {
        return view.confidence.clamp(0.0, 1.0);
    }
    let dt_hours = elapsed.num_milliseconds() as f64 / 3_600_000.0;
    let half_life = effective_half_life(config, view.access_count);
    let decayed = view.confidence * 0.5_f64.powf(dt_hours / half_life);
    decayed.clamp(0.0, 1.0)
}

/// True when the computed confidence has fallen below the cleanup threshold.
pub fn should_cleanup(config: &DecayConfig, view: &DecayView, now: DateTime<Utc>) -> bool {
    decayed_confidence(config, view, now) < config.cleanup_threshold
}

/// True while the computed confidence is at or above the validity floor.
///
/// `cleanup_threshold < min_confidence_threshold`, so a memory passes
/// through a dead zone — no longer valid, not yet purged — before cleanup.
pub fn is_valid(config: &DecayConfig, view: &DecayView, now: DateTime<Utc>) -> bool {
    decayed_confidence(config, view, now) >= config.min_confidence_threshold
}

/// Reinforce a memory at access time.
///
/// Recovers part of what was forgotten — `(stored - current) *
/// reinforcement_factor` — plus a small flat bonus, capped at 1.0. Returns
/// the updated snapshot for the caller to persist.
pub fn record_access(config: &DecayConfig, view: &DecayView, now: DateTime<Utc>) -> DecayView {
    let current = decayed_confidence(config, view, now);
    let reinforcement = (view.confidence - current) * config.reinforcement_factor;
    let confidence = (current + reinforcement + config.access_bonus).min(1.0);

    DecayView {
        id: view.id.clone(),
        confidence,
        access_count: view.access_count + 1,
        created_at: view.created_at,
        last_accessed: now,
    }
}

/// Ranking relevance: query similarity, decayed confidence, and a short
/// recency bonus. The 0.6/0.25/0.15 split is a tuning constant, stable
/// across the engine.
pub fn relevance(
    config: &DecayConfig,
    view: &DecayView,
    similarity: f64,
    now: DateTime<Utc>,
) -> f64 {
    const SIMILARITY_WEIGHT: f64 = 0.6;
    const CONFIDENCE_WEIGHT: f64 = 0.25;
    const RECENCY_WEIGHT: f64 = 0.15;

    let confidence = decayed_confidence(config, view, now);
    let recency = recency_bonus(view.last_accessed, now);

    SIMILARITY_WEIGHT * similarity + CONFIDENCE_WEIGHT * confidence + RECENCY_WEIGHT * recency
}

/// Full strength within 24 hours, linearly decaying to zero at 7 days.
fn recency_bonus(last_accessed: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed = now - last_accessed;
    if elapsed <= Duration::zero() {
        return 1.0;
    }
    let hours = elapsed.num_milliseconds() as f64 / 3_600_000.0;
    if hours <= 24.0 {
        1.0
    } else if hours >= 7.0 * 24.0 {
        0.0
    } else {
        1.0 - (hours - 24.0) / (6.0 * 24.0)
    }
}
