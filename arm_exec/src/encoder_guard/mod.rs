//! Encoder guard module
//!
//! Arbitrates between incoming encoder telemetry and the last-known-good
//! model state. Each reading vector passes a dud-value check, a joint-limit
//! check and a staleness-scaled temporal-jump check against a sliding window
//! of recent readings. Faulty joints have the model's current angle
//! substituted so bad values never propagate downstream.
//!
//! The guard never mutates the arm model - it returns a sanitized vector and
//! leaves what to do with it to the caller.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::collections::VecDeque;

// Internal
use crate::arm_model::{ArmModel, NUM_JOINTS};
pub use params::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The encoder guard.
#[derive(Debug, Clone)]
pub struct EncoderGuard {
    params: Params,

    /// Per joint, the most recent readings, newest at the front.
    windows: [VecDeque<f64>; NUM_JOINTS],
}

/// The result of sanitizing one reading vector.
#[derive(Debug, Clone)]
pub struct Sanitized {
    /// The sanitized angle vector, safe to apply to the model.
    pub angles: [f64; NUM_JOINTS],

    /// True if any joint was marked faulty this message.
    pub error_raised: bool,

    /// Human readable message enumerating the faulty joints.
    pub message: String,

    /// Which joints were marked faulty.
    pub faulty: [bool; NUM_JOINTS],
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl EncoderGuard {
    /// Create a new guard with empty windows.
    pub fn new(params: Params) -> Self {
        Self {
            params,
            windows: Default::default(),
        }
    }

    /// Sanitize one reading vector of logical joint angles.
    ///
    /// The checks run in order: dud substitution, limit check, temporal-jump
    /// check, fault substitution. The (dud-substituted, limit-clamped)
    /// readings are then pushed onto the windows, evicting the oldest
    /// entries when full.
    pub fn sanitize(&mut self, readings: &[f64; NUM_JOINTS], model: &ArmModel) -> Sanitized {
        let mut angles = *readings;
        let mut faulty = [false; NUM_JOINTS];
        let mut message =
            String::from("Encoder Error in encoder(s) (joint A = 0, F = 5): ");

        // Dud check: distinguished raw values mean a disconnected encoder,
        // substitute the last-known-good model angle without raising a fault
        for i in 0..NUM_JOINTS {
            for dud in &self.params.dud_values {
                if (angles[i] - dud).abs() < self.params.dud_epsilon {
                    angles[i] = model.angle(i);
                }
            }
        }

        // Limit check: clamp small breaches, fault anything larger
        for i in 0..NUM_JOINTS {
            let (lo, hi) = model.limits(i);
            let tol = model.acceptable_beyond_limit();

            if angles[i] < lo && (angles[i] - lo).abs() < tol {
                angles[i] = lo;
            } else if angles[i] > hi && (angles[i] - hi).abs() < tol {
                angles[i] = hi;
            } else if angles[i] < lo || angles[i] > hi {
                faulty[i] = true;
            }
        }

        // Temporal-jump check: compare each reading against the window,
        // with the allowed discrepancy growing with the staleness of the
        // compared entry
        for i in 0..NUM_JOINTS {
            if faulty[i] {
                continue;
            }

            let window = &self.windows[i];
            let threshold = self.params.encoder_error_threshold_rad;

            if window.len() < self.params.max_num_prev_angles {
                // Partial window: a single violation marks the joint faulty
                for (k, prev) in window.iter().enumerate() {
                    if (angles[i] - prev).abs() > threshold * (k + 1) as f64 {
                        faulty[i] = true;
                        break;
                    }
                }
            } else {
                // Full window: the joint is faulty only when strictly more
                // than max_fishy_vals comparisons exceed the threshold
                let mut num_fishy = 0;

                for (k, prev) in window.iter().enumerate() {
                    if (angles[i] - prev).abs() > threshold * (k + 1) as f64 {
                        num_fishy += 1;
                    }
                }

                if num_fishy > self.params.max_fishy_vals {
                    faulty[i] = true;
                }
            }
        }

        // Push the checked readings onto the windows, then substitute the
        // model angle for each faulty joint so the output stays trustworthy
        let mut error_raised = false;
        for i in 0..NUM_JOINTS {
            if self.windows[i].len() >= self.params.max_num_prev_angles {
                self.windows[i].pop_back();
            }
            self.windows[i].push_front(angles[i]);

            if faulty[i] {
                error_raised = true;
                message.push_str(&format!(", {}", i));
                angles[i] = model.angle(i);
            }
        }

        Sanitized {
            angles,
            error_raised,
            message,
            faulty,
        }
    }

    /// Drop all window history, e.g. when switching between sim and
    /// hardware telemetry sources.
    pub fn reset(&mut self) {
        for window in self.windows.iter_mut() {
            window.clear();
        }
    }

    /// The configured window depth. A fault clears once this many healthy
    /// readings accumulate.
    pub fn window_len(&self) -> usize {
        self.params.max_num_prev_angles
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_model::test_util::test_model;
    use nalgebra::Vector6;

    const GUARD_PATH: &str =
        concat!(env!("CARGO_MANIFEST_DIR"), "/../params/encoder_guard.toml");

    fn test_guard() -> EncoderGuard {
        let params: Params = util::params::load(GUARD_PATH).unwrap();
        EncoderGuard::new(params)
    }

    fn steady(value: f64) -> [f64; NUM_JOINTS] {
        [value; NUM_JOINTS]
    }

    #[test]
    fn test_dud_reading_substitutes_model_angle() {
        let mut model = test_model();
        let mut guard = test_guard();

        model.set_angles(&Vector6::from_element(0.2));

        // Build up a healthy window
        for _ in 0..5 {
            let out = guard.sanitize(&steady(0.2), &model);
            assert!(!out.error_raised);
        }

        // Joint C reports exactly 0.0, which is in the dud list
        let mut readings = steady(0.2);
        readings[2] = 0.0;

        let out = guard.sanitize(&readings, &model);
        assert!(!out.error_raised);
        assert_eq!(out.angles[2], 0.2);
        assert!(!out.faulty[2]);
    }

    #[test]
    fn test_limit_breach_within_tolerance_clamps() {
        let mut model = test_model();
        let mut guard = test_guard();

        let (_, hi) = model.limits(1);
        model.set_angles(&Vector6::from_element(0.0));

        let mut readings = steady(0.0);
        readings[1] = hi + 0.05;

        let out = guard.sanitize(&readings, &model);
        assert!(!out.error_raised);
        assert_eq!(out.angles[1], hi);
    }

    #[test]
    fn test_limit_breach_beyond_tolerance_faults() {
        let mut model = test_model();
        let mut guard = test_guard();

        let (_, hi) = model.limits(1);
        model.set_angles(&Vector6::from_element(0.1));

        let mut readings = steady(0.1);
        readings[1] = hi + 0.5;

        let out = guard.sanitize(&readings, &model);
        assert!(out.error_raised);
        assert!(out.faulty[1]);
        // The output carries the model angle, not the bad reading
        assert_eq!(out.angles[1], 0.1);
        assert!(out.message.contains(", 1"));
    }

    #[test]
    fn test_partial_window_single_violation_faults() {
        let mut model = test_model();
        let mut guard = test_guard();

        model.set_angles(&Vector6::from_element(0.2));

        // Two healthy readings, window not yet full
        guard.sanitize(&steady(0.2), &model);
        guard.sanitize(&steady(0.2), &model);

        // One big jump on joint D
        let mut readings = steady(0.2);
        readings[3] = 1.5;

        let out = guard.sanitize(&readings, &model);
        assert!(out.error_raised);
        assert!(out.faulty[3]);
        assert_eq!(out.angles[3], 0.2);
    }

    #[test]
    fn test_full_window_single_anomaly_tolerated() {
        let mut model = test_model();
        let mut guard = test_guard();

        model.set_angles(&Vector6::from_element(0.2));

        // Fill the window with healthy readings
        for _ in 0..5 {
            guard.sanitize(&steady(0.2), &model);
        }

        // A jump of 0.35 exceeds the base threshold against the newest
        // entries but not against the staler ones: 0.35 > 0.1 (k = 0),
        // > 0.2 (k = 1), > 0.3 (k = 2), but not > 0.4, 0.5. Three fishy
        // comparisons is more than max_fishy_vals = 2, so this faults.
        let mut readings = steady(0.2);
        readings[2] = 0.55;
        let out = guard.sanitize(&readings, &model);
        assert!(out.faulty[2]);

        // Reset and check the monotonicity property: a jump which only
        // trips the two newest comparisons never faults on a full window
        let mut guard = test_guard();
        for _ in 0..5 {
            guard.sanitize(&steady(0.2), &model);
        }
        let mut readings = steady(0.2);
        readings[2] = 0.45; // 0.25 > 0.1, 0.25 > 0.2, but not > 0.3
        let out = guard.sanitize(&readings, &model);
        assert!(!out.faulty[2]);
        assert!(!out.error_raised);
    }

    #[test]
    fn test_persistent_jitter_faults() {
        let mut model = test_model();
        let mut guard = test_guard();

        model.set_angles(&Vector6::from_element(0.2));

        for _ in 0..5 {
            guard.sanitize(&steady(0.2), &model);
        }

        // Joint C jitters by +-1.0 rad tick after tick
        let mut faulted = false;
        for tick in 0..5 {
            let mut readings = steady(0.2);
            readings[2] = if tick % 2 == 0 { 1.2 } else { -0.8 };

            let out = guard.sanitize(&readings, &model);
            if out.error_raised {
                faulted = true;
                assert!(out.faulty[2]);
                assert!(out.message.contains(", 2"));
                break;
            }
        }

        assert!(faulted, "Persistent jitter never raised a fault");
    }

    #[test]
    fn test_sanitized_output_is_separate_from_input() {
        let mut model = test_model();
        let mut guard = test_guard();

        model.set_angles(&Vector6::from_element(0.3));

        let readings = steady(0.0); // all duds
        let out = guard.sanitize(&readings, &model);

        // Input untouched, output substituted
        assert_eq!(readings, steady(0.0));
        assert_eq!(out.angles, steady(0.3));
    }
}
