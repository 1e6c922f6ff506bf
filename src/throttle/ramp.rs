// Ramp limiting: move applied power toward the request by a bounded step

/// Next applied power, at most `max_step` away from `applied`, never past
/// `requested`. A non-finite request ramps toward zero.
pub fn step(applied: f32, requested: f32, max_step: f32) -> f32 {
    let target = if requested.is_finite() { requested } else { 0.0 };
    let diff = target - applied;
    if diff.abs() <= max_step {
        target
    } else {
        applied + max_step.copysign(diff)
    }
}
