//! Parameters structure for the encoder guard

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Tuning parameters for the encoder guard.
///
/// Loaded from `params/encoder_guard.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Number of previous readings kept per joint.
    pub max_num_prev_angles: usize,

    /// With a full window, a joint is faulty when strictly more than this
    /// many window comparisons exceed the staleness-scaled threshold.
    pub max_fishy_vals: usize,

    /// Base discrepancy threshold between a reading and a previous reading.
    /// Scaled by the staleness of the compared entry.
    ///
    /// Units: radians
    pub encoder_error_threshold_rad: f64,

    /// Raw readings within `dud_epsilon` of any of these values indicate a
    /// disconnected or uninitialised encoder rather than a true angle.
    pub dud_values: Vec<f64>,

    /// Tolerance around each dud value.
    ///
    /// Units: radians
    pub dud_epsilon: f64,
}
