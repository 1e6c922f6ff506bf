// Bind the left/right channels by name from one driver enumeration

use std::sync::Arc;

use tracing::{debug, warn};

use super::{ChannelBinding, ChannelPair, ThrottleError};
use crate::pwm::PwmDriver;

/// Enumerate the driver's channels once and bind the first exact match for
/// each name.
///
/// On failure nothing stays referenced: bindings taken so far and the
/// enumeration snapshot are dropped before the error is returned. Not meant
/// to be called concurrently against the same driver.
pub fn resolve(driver: &dyn PwmDriver, left: &str, right: &str) -> Result<ChannelPair, ThrottleError> {
    let channels = driver.channels().map_err(|e| {
        warn!("PWM enumeration failed: {}", e);
        ThrottleError::Enumerate(e)
    })?;
    debug!("Enumerated {} PWM channels", channels.len());

    let bind = |name: &str| {
        channels
            .iter()
            .find(|c| c.name() == name)
            .map(|handle| ChannelBinding::new(name, Arc::clone(handle)))
            .ok_or_else(|| {
                warn!("PWM channel {} not found", name);
                ThrottleError::ChannelNotFound {
                    name: name.to_string(),
                }
            })
    };

    let left = bind(left)?;
    let right = bind(right)?;
    Ok(ChannelPair { left, right })
}
