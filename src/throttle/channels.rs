// Left/right channel pair driven in lock-step
//
// Every failing operation stops both channels (duty 0, disabled) before the
// error is handed back.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::ThrottleError;
use crate::pwm::{PwmChannel, PwmError};

/// A named, referenced PWM channel. Dropping the binding releases the handle.
#[derive(Clone)]
pub struct ChannelBinding {
    name: String,
    handle: Arc<dyn PwmChannel>,
}

impl ChannelBinding {
    pub fn new(name: &str, handle: Arc<dyn PwmChannel>) -> Self {
        Self {
            name: name.to_string(),
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Arc<dyn PwmChannel> {
        &self.handle
    }
}

impl fmt::Debug for ChannelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBinding")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The two drive channels.
#[derive(Debug, Clone)]
pub struct ChannelPair {
    pub left: ChannelBinding,
    pub right: ChannelBinding,
}

impl ChannelPair {
    /// Zero both channels, then enable both.
    pub fn arm(&self) -> Result<(), ThrottleError> {
        let result = self
            .left
            .handle
            .set_duty_cycle(0.0)
            .and_then(|()| self.right.handle.set_duty_cycle(0.0))
            .and_then(|()| self.left.handle.enable())
            .and_then(|()| self.right.handle.enable());

        match result {
            Ok(()) => {
                debug!("Armed {} and {}", self.left.name, self.right.name);
                Ok(())
            }
            Err(e) => Err(self.contain(e.into())),
        }
    }

    /// Zero both channels, then disable both.
    ///
    /// Every step is attempted even if an earlier one fails; the first
    /// failure is returned.
    pub fn halt(&self) -> Result<(), ThrottleError> {
        let steps = [
            self.left.handle.set_duty_cycle(0.0),
            self.right.handle.set_duty_cycle(0.0),
            self.left.handle.disable(),
            self.right.handle.disable(),
        ];

        let mut first: Option<PwmError> = None;
        for result in steps {
            if let Err(e) = result {
                warn!("Halt step failed: {}", e);
                first.get_or_insert(e);
            }
        }

        match first {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Write `power` to the left channel, then the right.
    pub fn apply(&self, power: f32) -> Result<(), ThrottleError> {
        self.left
            .handle
            .set_duty_cycle(power)
            .and_then(|()| self.right.handle.set_duty_cycle(power))
            .map_err(|e| self.contain(e.into()))
    }

    /// Read both channels back; they must agree exactly.
    pub fn read(&self) -> Result<f32, ThrottleError> {
        self.read_both().map_err(|e| self.contain(e))
    }

    fn read_both(&self) -> Result<f32, ThrottleError> {
        let left = self.left.handle.duty_cycle()?;
        let right = self.right.handle.duty_cycle()?;
        if left != right {
            return Err(ThrottleError::Mismatch { left, right });
        }
        Ok(left)
    }

    fn contain(&self, err: ThrottleError) -> ThrottleError {
        error!("PWM fault, stopping both channels: {}", err);
        if let Err(e) = self.halt() {
            error!("Safety stop incomplete: {}", e);
        }
        err
    }
}
