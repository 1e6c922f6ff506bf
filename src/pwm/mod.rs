// Motor driver PWM capability
//
// Provides:
// - The channel handle trait the throttle drives (duty cycle, enable/disable)
// - The driver trait that enumerates named channels
// - An in-memory simulated driver and a Linux sysfs driver
//
// Handles are shared as `Arc<dyn PwmChannel>`: cloning takes a reference,
// dropping releases it.

pub mod sim;
pub mod sysfs;

use std::sync::Arc;

pub use sim::{SimChannel, SimDriver};
pub use sysfs::SysfsDriver;

/// Error types for PWM driver access
#[derive(Debug, thiserror::Error)]
pub enum PwmError {
    #[error("IO error on channel {channel}: {source}")]
    Io {
        channel: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Duty cycle {duty}% out of range on channel {channel}")]
    OutOfRange { channel: String, duty: f32 },

    #[error("Channel {channel} fault: {reason}")]
    Fault { channel: String, reason: String },

    #[error("Failed to enumerate PWM channels: {0}")]
    Enumerate(String),
}

/// One physical motor-drive channel.
pub trait PwmChannel: Send + Sync {
    /// Name the driver enumerates this channel under, e.g. `"odc1_pwm0"`.
    fn name(&self) -> &str;

    /// Set the duty cycle as a percentage in `0.0..=100.0`.
    fn set_duty_cycle(&self, percent: f32) -> Result<(), PwmError>;

    /// Read back the duty cycle as a percentage.
    fn duty_cycle(&self) -> Result<f32, PwmError>;

    fn enable(&self) -> Result<(), PwmError>;

    fn disable(&self) -> Result<(), PwmError>;
}

/// A motor driver that exposes named PWM channels.
pub trait PwmDriver: Send + Sync {
    /// Point-in-time snapshot of every channel the driver exposes.
    fn channels(&self) -> Result<Vec<Arc<dyn PwmChannel>>, PwmError>;
}

/// Reject duty cycles the hardware cannot express.
pub(crate) fn check_duty(channel: &str, percent: f32) -> Result<(), PwmError> {
    if (0.0..=100.0).contains(&percent) {
        Ok(())
    } else {
        Err(PwmError::OutOfRange {
            channel: channel.to_string(),
            duty: percent,
        })
    }
}
