// Throttle controller: ramp-limited background loop over the channel pair
//
// The loop thread is the only writer of `applied_power`. Callers set the
// requested power; every tick the loop steps applied power toward it by at
// most `max_step` and mirrors the result to both channels.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::channels::ChannelPair;
use super::ramp;
use super::resolver::resolve;
use super::ThrottleError;
use crate::config::{
    TEST_PWM_LEFT, TEST_PWM_RIGHT, THROTTLE_ARM_RETRY, THROTTLE_MAX_STEP, THROTTLE_TICK,
};
use crate::pwm::PwmDriver;

/// Loop timing and ramp limits
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    /// Period between ramp ticks
    pub tick: Duration,
    /// Maximum change in applied power per tick (percent)
    pub max_step: f32,
    /// Delay between attempts to arm the channels
    pub arm_retry: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            tick: THROTTLE_TICK,
            max_step: THROTTLE_MAX_STEP,
            arm_retry: THROTTLE_ARM_RETRY,
        }
    }
}

/// Snapshot of the controller state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ThrottleState {
    pub requested_power: f32,
    pub applied_power: f32,
    pub running: bool,
}

struct Core {
    state: ThrottleState,
    channels: ChannelPair,
}

struct Shared {
    core: Mutex<Core>,
    wake: Condvar,
    config: ThrottleConfig,
}

impl Shared {
    /// Sleep for `period` unless stopped first. Spurious wakeups go back to
    /// sleep until the same deadline. Returns whether still running.
    fn pause(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut core = self.core.lock();
        while core.state.running {
            if self.wake.wait_until(&mut core, deadline).timed_out() {
                break;
            }
        }
        core.state.running
    }
}

/// Ramp-limited throttle over a left/right pair of PWM channels.
pub struct Throttle {
    driver: Arc<dyn PwmDriver>,
    left_name: String,
    right_name: String,
    shared: Arc<Shared>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl Throttle {
    /// Bind the named channels. The control loop is not started.
    pub fn new(driver: Arc<dyn PwmDriver>, left: &str, right: &str) -> Result<Self, ThrottleError> {
        Self::with_config(driver, left, right, ThrottleConfig::default())
    }

    /// Throttle bound to the test rig channels.
    pub fn test_new(driver: Arc<dyn PwmDriver>) -> Result<Self, ThrottleError> {
        Self::new(driver, TEST_PWM_LEFT, TEST_PWM_RIGHT)
    }

    pub fn with_config(
        driver: Arc<dyn PwmDriver>,
        left: &str,
        right: &str,
        config: ThrottleConfig,
    ) -> Result<Self, ThrottleError> {
        let channels = resolve(driver.as_ref(), left, right)?;
        info!("Throttle bound to {} / {}", left, right);

        Ok(Self {
            driver,
            left_name: left.to_string(),
            right_name: right.to_string(),
            shared: Arc::new(Shared {
                core: Mutex::new(Core {
                    state: ThrottleState::default(),
                    channels,
                }),
                wake: Condvar::new(),
                config,
            }),
            runner: Mutex::new(None),
        })
    }

    /// Start the control loop.
    ///
    /// The channel bindings are resolved again first; if a channel has gone
    /// away the throttle stays stopped and can be started later.
    pub fn start(&self) -> Result<(), ThrottleError> {
        let mut core = self.shared.core.lock();
        if core.state.running {
            return Err(ThrottleError::AlreadyRunning);
        }

        core.channels = resolve(self.driver.as_ref(), &self.left_name, &self.right_name)?;
        core.state = ThrottleState {
            requested_power: 0.0,
            applied_power: 0.0,
            running: true,
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("throttle".to_string())
            .spawn(move || run_loop(shared));

        match spawned {
            Ok(handle) => {
                *self.runner.lock() = Some(handle);
                info!("Throttle started");
                Ok(())
            }
            Err(e) => {
                core.state.running = false;
                Err(ThrottleError::Spawn(e))
            }
        }
    }

    /// Stop the control loop. Returns once the loop thread has exited; the
    /// loop makes no further hardware writes after that.
    pub fn stop(&self) -> Result<(), ThrottleError> {
        let handle = {
            let mut core = self.shared.core.lock();
            if !core.state.running {
                return Err(ThrottleError::NotRunning);
            }
            core.state.running = false;
            self.shared.wake.notify_all();
            self.runner.lock().take()
        };

        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Throttle loop panicked");
            }
        }
        info!("Throttle stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.core.lock().state.running
    }

    /// Set the requested power. Not range checked.
    pub fn request_set(&self, power: f32) {
        self.shared.core.lock().state.requested_power = power;
    }

    pub fn request_get(&self) -> f32 {
        self.shared.core.lock().state.requested_power
    }

    /// Write `power` straight to both channels. A fault stops both channels.
    ///
    /// Holds the state lock so the write never interleaves with a loop tick.
    pub fn current_set(&self, power: f32) -> Result<(), ThrottleError> {
        self.shared.core.lock().channels.apply(power)
    }

    /// Read the power both channels are outputting. A fault or a left/right
    /// disagreement stops both channels.
    pub fn current_get(&self) -> Result<f32, ThrottleError> {
        self.shared.core.lock().channels.read()
    }

    pub fn state(&self) -> ThrottleState {
        self.shared.core.lock().state
    }

    /// Stop if running, then release both channel bindings.
    pub fn delete(self) {
        drop(self);
    }
}

impl Drop for Throttle {
    fn drop(&mut self) {
        if self.stop().is_ok() {
            debug!("Stopped running throttle on drop");
        }
    }
}

fn run_loop(shared: Arc<Shared>) {
    let config = shared.config;
    debug!(
        "Throttle loop: tick {:?}, max step {}%",
        config.tick, config.max_step
    );

    let mut armed = false;
    loop {
        if !armed {
            // Under the lock, so a direct read never sees one channel zeroed
            let armed_now = shared.core.lock().channels.arm();
            match armed_now {
                Ok(()) => {
                    info!("PWM channels armed");
                    armed = true;
                }
                Err(e) => {
                    warn!("Failed to arm PWM channels, retrying: {}", e);
                    if !shared.pause(config.arm_retry) {
                        break;
                    }
                    continue;
                }
            }
        }

        {
            let mut core = shared.core.lock();
            if !core.state.running {
                break;
            }

            let ThrottleState {
                requested_power,
                applied_power,
                ..
            } = core.state;
            if applied_power != requested_power {
                let next = ramp::step(applied_power, requested_power, config.max_step);
                match core.channels.apply(next) {
                    Ok(()) => core.state.applied_power = next,
                    Err(e) => {
                        // Fail safe: collapse to zero and re-arm before ramping again
                        error!("Dropping throttle to zero after PWM fault: {}", e);
                        core.state.applied_power = 0.0;
                        armed = false;
                    }
                }
            }
        }

        if !shared.pause(config.tick) {
            break;
        }
    }

    let halted = shared.core.lock().channels.halt();
    if let Err(e) = halted {
        warn!("Failed to halt PWM channels on loop exit: {}", e);
    }
    debug!("Throttle loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TEST_PWM_LEFT, TEST_PWM_RIGHT};
    use crate::pwm::{SimChannel, SimDriver};
    use crate::status::{self, Status};

    fn rig() -> (Arc<SimDriver>, Arc<SimChannel>, Arc<SimChannel>) {
        let driver = Arc::new(SimDriver::test_rig());
        let left = driver.channel(TEST_PWM_LEFT).unwrap();
        let right = driver.channel(TEST_PWM_RIGHT).unwrap();
        (driver, left, right)
    }

    fn fast() -> ThrottleConfig {
        ThrottleConfig {
            tick: Duration::from_millis(5),
            max_step: 10.0,
            arm_retry: Duration::from_millis(20),
        }
    }

    fn fast_throttle(driver: &Arc<SimDriver>) -> Throttle {
        Throttle::with_config(driver.clone(), TEST_PWM_LEFT, TEST_PWM_RIGHT, fast()).unwrap()
    }

    /// Poll `cond` for up to two seconds.
    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_start_stop() {
        let (driver, _, _) = rig();
        let throttle = Throttle::test_new(driver).unwrap();
        assert!(!throttle.is_running());

        throttle.start().unwrap();
        assert!(throttle.is_running());

        throttle.stop().unwrap();
        assert!(!throttle.is_running());
        throttle.delete();
    }

    #[test]
    fn test_double_start() {
        let (driver, _, _) = rig();
        let throttle = Throttle::test_new(driver).unwrap();
        throttle.start().unwrap();
        throttle.request_set(10.0);

        let err = throttle.start().unwrap_err();
        assert!(matches!(err, ThrottleError::AlreadyRunning));
        assert_eq!(err.status(), status::STATE_ERROR);
        assert!(throttle.is_running());
        assert_eq!(throttle.request_get(), 10.0);

        throttle.stop().unwrap();
    }

    #[test]
    fn test_early_stop() {
        let (driver, _, _) = rig();
        let throttle = Throttle::test_new(driver).unwrap();
        assert!(matches!(throttle.stop(), Err(ThrottleError::NotRunning)));

        throttle.start().unwrap();
        throttle.stop().unwrap();
        assert!(matches!(throttle.stop(), Err(ThrottleError::NotRunning)));
    }

    #[test]
    fn test_restart_resets_powers() {
        let (driver, _, _) = rig();
        let throttle = fast_throttle(&driver);
        throttle.start().unwrap();
        throttle.request_set(30.0);
        assert!(wait_for(|| throttle.state().applied_power == 30.0));
        throttle.stop().unwrap();

        throttle.start().unwrap();
        let state = throttle.state();
        assert_eq!(state.requested_power, 0.0);
        assert_eq!(state.applied_power, 0.0);
        assert!(state.running);
        throttle.stop().unwrap();
    }

    #[test]
    fn test_new_missing_channel() {
        let (driver, _, _) = rig();
        let err = Throttle::new(driver, TEST_PWM_LEFT, "odc1_pwm1").err().unwrap();
        assert!(matches!(err, ThrottleError::ChannelNotFound { .. }));
        assert_eq!(err.status(), status::NOT_FOUND);
    }

    #[test]
    fn test_start_revalidates_channels() {
        let (driver, _, _) = rig();
        let throttle = Throttle::test_new(driver.clone()).unwrap();

        let right = driver.unplug(TEST_PWM_RIGHT).unwrap();
        assert!(matches!(
            throttle.start(),
            Err(ThrottleError::ChannelNotFound { .. })
        ));
        assert!(!throttle.is_running());

        driver.plug(right);
        throttle.start().unwrap();
        throttle.stop().unwrap();
    }

    #[test]
    fn test_set_get_request() {
        let (driver, _, _) = rig();
        let throttle = Throttle::test_new(driver).unwrap();
        throttle.start().unwrap();

        for power in [0.0f32, 33.3, 100.0] {
            throttle.request_set(power);
            assert_eq!(throttle.request_get(), power);
        }

        throttle.delete();
    }

    #[test]
    fn test_request_not_clamped() {
        let (driver, _, _) = rig();
        let throttle = Throttle::test_new(driver).unwrap();
        throttle.request_set(150.0);
        assert_eq!(throttle.request_get(), 150.0);
        throttle.request_set(-5.0);
        assert_eq!(throttle.request_get(), -5.0);
    }

    #[test]
    fn test_set_get_request_timed() {
        let (driver, _, _) = rig();
        let throttle = Throttle::test_new(driver).unwrap();
        throttle.start().unwrap();

        throttle.request_set(0.0);
        assert!(wait_for(|| throttle.current_get().ok() == Some(0.0)));

        let since = Instant::now();
        throttle.request_set(100.0);
        thread::sleep(Duration::from_secs(1));
        let power = throttle.current_get().unwrap();
        let elapsed = since.elapsed();

        let config = ThrottleConfig::default();
        let ticks = elapsed.as_secs_f32() / config.tick.as_secs_f32();
        assert!(power > 0.0, "No ramp progress after {:?}", elapsed);
        assert!(power <= 100.0);
        assert!(
            power <= config.max_step * (ticks + 2.0),
            "Power {} ramped faster than {} per tick over {} ticks",
            power,
            config.max_step,
            ticks
        );

        throttle.delete();
    }

    #[test]
    fn test_ramp_is_monotonic_and_converges() {
        let (driver, left, right) = rig();
        let throttle = fast_throttle(&driver);
        throttle.start().unwrap();
        throttle.request_set(55.0);

        let mut last = 0.0;
        assert!(wait_for(|| {
            let applied = throttle.state().applied_power;
            assert!(applied >= last && applied <= 55.0);
            last = applied;
            applied == 55.0
        }));
        assert_eq!(left.duty(), 55.0);
        assert_eq!(right.duty(), 55.0);
        assert!(left.is_enabled() && right.is_enabled());

        throttle.request_set(0.0);
        assert!(wait_for(|| throttle.state().applied_power == 0.0));
        throttle.stop().unwrap();
    }

    #[test]
    fn test_loop_waits_for_arm() {
        let (driver, left, right) = rig();
        right.fail_enable(true);
        let throttle = fast_throttle(&driver);
        throttle.start().unwrap();
        throttle.request_set(40.0);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(throttle.state().applied_power, 0.0);

        right.fail_enable(false);
        assert!(wait_for(|| throttle.state().applied_power == 40.0));
        assert!(left.is_enabled() && right.is_enabled());
        throttle.stop().unwrap();
    }

    #[test]
    fn test_stop_while_arming_is_prompt() {
        let (driver, _, right) = rig();
        right.fail_enable(true);
        let throttle = Throttle::test_new(driver).unwrap();
        throttle.start().unwrap();
        thread::sleep(Duration::from_millis(50));

        let since = Instant::now();
        throttle.stop().unwrap();
        assert!(since.elapsed() < THROTTLE_ARM_RETRY);
    }

    #[test]
    fn test_pwm_fault_collapses_to_zero() {
        let (driver, left, right) = rig();
        let throttle = fast_throttle(&driver);
        throttle.start().unwrap();
        throttle.request_set(20.0);
        assert!(wait_for(|| throttle.state().applied_power == 20.0));

        left.fail_writes(true);
        throttle.request_set(60.0);
        assert!(wait_for(|| throttle.state().applied_power == 0.0
            && !left.is_enabled()
            && !right.is_enabled()));
        assert_eq!(right.duty(), 0.0);
        assert!(throttle.is_running());

        // Recovers once the channel does
        left.fail_writes(false);
        assert!(wait_for(|| throttle.state().applied_power == 60.0));
        assert!(left.is_enabled() && right.is_enabled());
        throttle.stop().unwrap();
    }

    #[test]
    fn test_current_get_mismatch_halts() {
        let (driver, left, right) = rig();
        let throttle = Throttle::test_new(driver).unwrap();
        throttle.current_set(25.0).unwrap();
        assert_eq!(throttle.current_get().unwrap(), 25.0);

        left.force_reading(Some(26.0));
        let err = throttle.current_get().unwrap_err();
        assert!(matches!(err, ThrottleError::Mismatch { .. }));
        assert_eq!(err.status(), status::PWM_ERROR);

        left.force_reading(None);
        assert_eq!(throttle.current_get().unwrap(), 0.0);
        assert_eq!(left.duty(), 0.0);
        assert_eq!(right.duty(), 0.0);
        assert!(!left.is_enabled());
        assert!(!right.is_enabled());
    }

    #[test]
    fn test_current_get_during_arm_sees_both_channels_armed() {
        let (driver, left, right) = rig();
        let throttle = fast_throttle(&driver);
        throttle.current_set(25.0).unwrap();

        left.write_delay(Some(Duration::from_millis(300)));
        throttle.start().unwrap();
        thread::sleep(Duration::from_millis(100));

        // Left is zeroed, right not yet: the read waits for the arm step
        assert_eq!(throttle.current_get().unwrap(), 0.0);
        assert!(left.is_enabled() && right.is_enabled());

        left.write_delay(None);
        throttle.stop().unwrap();
    }

    #[test]
    fn test_current_set_fault_halts() {
        let (driver, left, right) = rig();
        let throttle = Throttle::test_new(driver).unwrap();
        throttle.current_set(25.0).unwrap();
        right.fail_writes(true);

        assert!(throttle.current_set(30.0).unwrap_err().is_pwm());
        assert_eq!(left.duty(), 0.0);
        assert!(!left.is_enabled() && !right.is_enabled());
    }

    #[test]
    fn test_out_of_range_request_trips_fail_safe() {
        let (driver, left, _) = rig();
        let throttle = fast_throttle(&driver);
        throttle.start().unwrap();
        throttle.request_set(150.0);

        // Ramps up to 100, then the driver rejects 110 and the loop drops to 0
        let mut peak = 0.0f32;
        let mut collapsed = false;
        assert!(wait_for(|| {
            let applied = throttle.state().applied_power;
            assert!(applied <= 100.0 && left.duty() <= 100.0);
            collapsed |= applied < peak;
            peak = peak.max(applied);
            collapsed
        }));
        assert!(peak > 0.0);
        throttle.stop().unwrap();
    }

    #[test]
    fn test_no_writes_after_stop() {
        let (driver, left, right) = rig();
        let throttle = fast_throttle(&driver);
        throttle.start().unwrap();
        throttle.request_set(90.0);
        thread::sleep(Duration::from_millis(20));
        throttle.stop().unwrap();

        // Loop exit halts both channels
        assert_eq!(left.duty(), 0.0);
        assert!(!left.is_enabled() && !right.is_enabled());

        let writes = (left.writes(), right.writes());
        thread::sleep(Duration::from_millis(50));
        assert_eq!((left.writes(), right.writes()), writes);
    }

    #[test]
    fn test_delete_while_running_releases_channels() {
        let (driver, left, _) = rig();
        let throttle = fast_throttle(&driver);
        throttle.start().unwrap();
        throttle.request_set(50.0);
        thread::sleep(Duration::from_millis(20));

        // driver + ours + throttle binding
        assert_eq!(Arc::strong_count(&left), 3);
        throttle.delete();
        assert_eq!(Arc::strong_count(&left), 2);
        assert!(!left.is_enabled());
    }
}
