// Throttle ramp controller for the longboard drive channels
//
// Provides:
// - Channel resolution (bind left/right PWM channels by name)
// - Lock-step control of the channel pair with fail-safe shutdown
// - The ramp-limited background control loop

mod channels;
mod controller;
pub mod ramp;
mod resolver;

pub use channels::{ChannelBinding, ChannelPair};
pub use controller::{Throttle, ThrottleConfig, ThrottleState};
pub use resolver::resolve;

use crate::pwm::PwmError;
use crate::status::{self, Status};

/// Error types for throttle control
#[derive(Debug, thiserror::Error)]
pub enum ThrottleError {
    #[error("PWM channel {name} not found")]
    ChannelNotFound { name: String },

    #[error("Could not enumerate PWM channels: {0}")]
    Enumerate(#[source] PwmError),

    #[error("PWM error: {0}")]
    Pwm(#[from] PwmError),

    #[error("PWM channels disagree: left={left}%, right={right}%")]
    Mismatch { left: f32, right: f32 },

    #[error("Throttle is already running")]
    AlreadyRunning,

    #[error("Throttle is not running")]
    NotRunning,

    #[error("Failed to spawn throttle loop: {0}")]
    Spawn(#[source] std::io::Error),
}

impl ThrottleError {
    /// True for hardware faults, which always leave both channels stopped.
    pub fn is_pwm(&self) -> bool {
        matches!(self, ThrottleError::Pwm(_) | ThrottleError::Mismatch { .. })
    }
}

impl Status for ThrottleError {
    fn status(&self) -> i32 {
        match self {
            ThrottleError::ChannelNotFound { .. } | ThrottleError::Enumerate(_) => {
                status::NOT_FOUND
            }
            ThrottleError::Pwm(_) | ThrottleError::Mismatch { .. } => status::PWM_ERROR,
            ThrottleError::AlreadyRunning
            | ThrottleError::NotRunning
            | ThrottleError::Spawn(_) => status::STATE_ERROR,
        }
    }
}
