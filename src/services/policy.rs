//! Suggestion policy — pure mapping from an aggregate to a next-session
//! load and rep target.
//!
//! DESIGN
//! ======
//! A deterministic threshold heuristic over the window's average RIR,
//! first match wins:
//! - avg RIR >= 2.5 → add 5.0 kg
//! - avg RIR >= 1.8 → add 2.5 kg
//! - avg RIR <= 0.5 → hold the load, drop the rep target to 8
//! - otherwise      → hold the load at 10 reps
//! Loads are rounded half-away-from-zero to the configured step. No I/O,
//! no clock, no randomness: the same aggregate always yields the same
//! suggestion.

use serde::Serialize;

use crate::rate_limit::env_parse;
use crate::services::history::AggregateResult;

const RIR_HIGH: f64 = 2.5;
const RIR_ELEVATED: f64 = 1.8;
const RIR_LOW: f64 = 0.5;

const PLUS_HIGH_KG: f64 = 5.0;
const PLUS_ELEVATED_KG: f64 = 2.5;

const DEFAULT_REPS: i32 = 10;
const REDUCED_REPS: i32 = 8;

const DEFAULT_ROUND_STEP_KG: f64 = 0.5;

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Clone, Copy)]
pub struct PolicyConfig {
    /// Suggested loads snap to multiples of this increment, in kg.
    pub round_step_kg: f64,
}

impl PolicyConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let round_step_kg: f64 = env_parse("SUGGEST_ROUND_STEP_KG", DEFAULT_ROUND_STEP_KG);
        Self {
            round_step_kg: if round_step_kg > 0.0 { round_step_kg } else { DEFAULT_ROUND_STEP_KG },
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self { round_step_kg: DEFAULT_ROUND_STEP_KG }
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// Why a suggestion came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rationale {
    NoHistory,
    RirHighPlus5,
    RirElevatedPlus2_5,
    RirLowReduceReps,
    RirModerateHold,
}

impl Rationale {
    /// Stable code used in responses and audit rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoHistory => "NO_HISTORY",
            Self::RirHighPlus5 => "RIR_HIGH_PLUS_5",
            Self::RirElevatedPlus2_5 => "RIR_ELEVATED_PLUS_2_5",
            Self::RirLowReduceReps => "RIR_LOW_REDUCE_REPS",
            Self::RirModerateHold => "RIR_MODERATE_HOLD",
        }
    }
}

impl Serialize for Rationale {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Next-session recommendation returned to the caller.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Suggestion {
    pub suggested_load_kg: f64,
    pub suggested_reps: i32,
    pub rationale: Rationale,
    pub avg_load_kg: f64,
    pub avg_rir: f64,
    pub sample_count: i64,
}

// =============================================================================
// POLICY
// =============================================================================

/// Map an aggregate onto a suggestion. Pure computation.
#[must_use]
pub fn suggest(agg: &AggregateResult, config: &PolicyConfig) -> Suggestion {
    let step = config.round_step_kg;

    if agg.sample_count == 0 {
        return Suggestion {
            suggested_load_kg: 0.0,
            suggested_reps: DEFAULT_REPS,
            rationale: Rationale::NoHistory,
            avg_load_kg: 0.0,
            avg_rir: agg.avg_rir,
            sample_count: 0,
        };
    }

    let mut suggested_load_kg = round_to_step(agg.avg_load_kg, step);
    let mut suggested_reps = DEFAULT_REPS;
    let rationale = if agg.avg_rir >= RIR_HIGH {
        suggested_load_kg = round_to_step(agg.avg_load_kg + PLUS_HIGH_KG, step);
        Rationale::RirHighPlus5
    } else if agg.avg_rir >= RIR_ELEVATED {
        suggested_load_kg = round_to_step(agg.avg_load_kg + PLUS_ELEVATED_KG, step);
        Rationale::RirElevatedPlus2_5
    } else if agg.avg_rir <= RIR_LOW {
        suggested_reps = REDUCED_REPS;
        Rationale::RirLowReduceReps
    } else {
        Rationale::RirModerateHold
    };

    Suggestion {
        suggested_load_kg,
        suggested_reps,
        rationale,
        avg_load_kg: round_to_step(agg.avg_load_kg, step),
        avg_rir: agg.avg_rir,
        sample_count: agg.sample_count,
    }
}

/// Round half away from zero to the nearest multiple of `step`.
#[must_use]
pub fn round_to_step(value: f64, step: f64) -> f64 {
    (value / step).round() * step
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "policy_test.rs"]
mod tests;
