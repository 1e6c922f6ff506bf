// In-memory PWM driver
//
// Behaves like real channels (duty range checked, enable state kept) and
// lets tests inject faults: failing writes, failing enables, and a forced
// readback value that makes a channel disagree with its partner.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::{PwmChannel, PwmDriver, PwmError, check_duty};
use crate::config::{TEST_PWM_LEFT, TEST_PWM_RIGHT};

#[derive(Debug, Default)]
struct SimState {
    duty: f32,
    enabled: bool,
    fail_writes: bool,
    fail_enable: bool,
    forced_reading: Option<f32>,
    write_delay: Option<Duration>,
    writes: u64,
}

/// A simulated PWM channel.
#[derive(Debug)]
pub struct SimChannel {
    name: String,
    state: Mutex<SimState>,
}

impl SimChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(SimState::default()),
        }
    }

    /// Last duty cycle actually written.
    pub fn duty(&self) -> f32 {
        self.state.lock().duty
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Number of successful duty cycle writes.
    pub fn writes(&self) -> u64 {
        self.state.lock().writes
    }

    /// Make every duty cycle write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Make `enable` fail.
    pub fn fail_enable(&self, fail: bool) {
        self.state.lock().fail_enable = fail;
    }

    /// Report `reading` from `duty_cycle` regardless of what was written.
    pub fn force_reading(&self, reading: Option<f32>) {
        self.state.lock().forced_reading = reading;
    }

    /// Block for `delay` after every successful duty cycle write.
    pub fn write_delay(&self, delay: Option<Duration>) {
        self.state.lock().write_delay = delay;
    }

    fn fault(&self, reason: &str) -> PwmError {
        PwmError::Fault {
            channel: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

impl PwmChannel for SimChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_duty_cycle(&self, percent: f32) -> Result<(), PwmError> {
        check_duty(&self.name, percent)?;
        let delay = {
            let mut state = self.state.lock();
            if state.fail_writes {
                return Err(self.fault("injected write failure"));
            }
            state.duty = percent;
            state.writes += 1;
            state.write_delay
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        Ok(())
    }

    fn duty_cycle(&self) -> Result<f32, PwmError> {
        let state = self.state.lock();
        Ok(state.forced_reading.unwrap_or(state.duty))
    }

    fn enable(&self) -> Result<(), PwmError> {
        let mut state = self.state.lock();
        if state.fail_enable {
            return Err(self.fault("injected enable failure"));
        }
        state.enabled = true;
        Ok(())
    }

    fn disable(&self) -> Result<(), PwmError> {
        self.state.lock().enabled = false;
        Ok(())
    }
}

/// A simulated motor driver. Channels can be unplugged and plugged back in.
#[derive(Debug, Default)]
pub struct SimDriver {
    channels: Mutex<Vec<Arc<SimChannel>>>,
}

impl SimDriver {
    pub fn new(names: &[&str]) -> Self {
        Self {
            channels: Mutex::new(names.iter().map(|n| Arc::new(SimChannel::new(n))).collect()),
        }
    }

    /// Driver exposing the two test rig channels.
    pub fn test_rig() -> Self {
        Self::new(&[TEST_PWM_LEFT, TEST_PWM_RIGHT])
    }

    /// Direct handle to a channel, for inspection and fault injection.
    pub fn channel(&self, name: &str) -> Option<Arc<SimChannel>> {
        self.channels.lock().iter().find(|c| c.name == name).cloned()
    }

    /// Remove a channel from future enumerations.
    pub fn unplug(&self, name: &str) -> Option<Arc<SimChannel>> {
        let mut channels = self.channels.lock();
        let idx = channels.iter().position(|c| c.name == name)?;
        Some(channels.remove(idx))
    }

    pub fn plug(&self, channel: Arc<SimChannel>) {
        self.channels.lock().push(channel);
    }
}

impl PwmDriver for SimDriver {
    fn channels(&self) -> Result<Vec<Arc<dyn PwmChannel>>, PwmError> {
        Ok(self
            .channels
            .lock()
            .iter()
            .map(|c| Arc::clone(c) as Arc<dyn PwmChannel>)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_channel_tracks_writes() {
        let ch = SimChannel::new("test_pwm0");
        ch.set_duty_cycle(42.0).unwrap();
        ch.enable().unwrap();
        assert_eq!(ch.duty(), 42.0);
        assert_eq!(ch.duty_cycle().unwrap(), 42.0);
        assert!(ch.is_enabled());
        assert_eq!(ch.writes(), 1);

        ch.disable().unwrap();
        assert!(!ch.is_enabled());
    }

    #[test]
    fn test_sim_channel_faults() {
        let ch = SimChannel::new("test_pwm0");
        ch.fail_writes(true);
        assert!(ch.set_duty_cycle(10.0).is_err());
        assert_eq!(ch.writes(), 0);

        ch.fail_enable(true);
        assert!(ch.enable().is_err());
        assert!(!ch.is_enabled());

        ch.force_reading(Some(7.5));
        assert_eq!(ch.duty_cycle().unwrap(), 7.5);
        assert_eq!(ch.duty(), 0.0);
    }

    #[test]
    fn test_sim_channel_rejects_out_of_range() {
        let ch = SimChannel::new("test_pwm0");
        assert!(matches!(
            ch.set_duty_cycle(120.0),
            Err(PwmError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_sim_driver_enumerates_in_order() {
        let driver = SimDriver::test_rig();
        let names: Vec<String> = driver
            .channels()
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec![TEST_PWM_LEFT, TEST_PWM_RIGHT]);
        assert!(driver.channel("nope").is_none());
    }

    #[test]
    fn test_sim_driver_unplug_and_plug() {
        let driver = SimDriver::test_rig();
        let ch = driver.unplug(TEST_PWM_RIGHT).unwrap();
        assert_eq!(driver.channels().unwrap().len(), 1);
        assert!(driver.unplug(TEST_PWM_RIGHT).is_none());

        driver.plug(ch);
        assert_eq!(driver.channels().unwrap().len(), 2);
        assert!(driver.channel(TEST_PWM_RIGHT).is_some());
    }
}
