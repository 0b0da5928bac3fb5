use crate::models::{GainPlan, LoudnessMeasurement};

/// Inputs measured at or below this integrated level are treated as silence
/// and passed through unamplified; raising them toward the target would only
/// amplify the noise floor.
pub const SILENCE_THRESHOLD_DB: f64 = -70.0;

/// Compute the gain (and limiter parameters, if any) required to bring a
/// measured input to `target_db` without projecting its peak above
/// `ceiling_db`.
///
/// Pure and deterministic. When flat gain would exceed the ceiling, the gain
/// is capped so `peak + gain == ceiling` exactly and the limiter flag is set;
/// the apply pass's limiter absorbs any residual loudness shortfall. The
/// plan never exceeds the ceiling on its own.
pub fn compute(measurement: &LoudnessMeasurement, target_db: f64, ceiling_db: f64) -> GainPlan {
    if measurement.integrated_db <= SILENCE_THRESHOLD_DB {
        return GainPlan {
            gain_db: 0.0,
            limiter_needed: false,
            effective_ceiling: ceiling_db,
        };
    }

    let mut gain_db = target_db - measurement.integrated_db;
    let mut limiter_needed = false;

    let projected_peak = measurement.peak_db + gain_db;
    if projected_peak > ceiling_db {
        gain_db = ceiling_db - measurement.peak_db;
        limiter_needed = true;
    }

    GainPlan {
        gain_db,
        limiter_needed,
        effective_ceiling: ceiling_db,
    }
}
