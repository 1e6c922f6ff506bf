// Telemetry message types published by the runtime

use serde::{Deserialize, Serialize};

use crate::throttle::ThrottleState;

// Throttle state -> dashboards/loggers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThrottleTelemetry {
    pub requested_power: f32,
    pub applied_power: f32,
    pub running: bool,
    // Last value the remote sent, if any
    pub remote_power: Option<f32>,
}

impl ThrottleTelemetry {
    pub fn new(state: &ThrottleState, remote_power: Option<f32>) -> Self {
        Self {
            requested_power: state.requested_power,
            applied_power: state.applied_power,
            running: state.running,
            remote_power,
        }
    }
}

/// Remote link health published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    LinkStale,
}
