// Timing, ramp limits, transport and telemetry configuration
use std::time::Duration;

// Throttle loop tick period
pub const THROTTLE_TICK: Duration = Duration::from_millis(100);

// Maximum change in applied power per tick (percent). 2.0 per 100ms = 20%/s
pub const THROTTLE_MAX_STEP: f32 = 2.0;

// How often the loop retries zeroing + enabling the channels before it ramps
pub const THROTTLE_ARM_RETRY: Duration = Duration::from_secs(1);

// PWM channel names on the rider unit and on the test rig
pub const PWM_LEFT: &str = "odc1_pwm0";
pub const PWM_RIGHT: &str = "odc1_pwm1";
pub const TEST_PWM_LEFT: &str = "test_pwm0";
pub const TEST_PWM_RIGHT: &str = "test_pwm1";

// Linux sysfs PWM class root and default period (20 kHz)
pub const PWM_SYSFS_ROOT: &str = "/sys/class/pwm";
pub const PWM_PERIOD_NS: u64 = 50_000;

// Transport
pub const COMM_RECV_TIMEOUT: Duration = Duration::from_secs(2);
pub const COMM_LINE_MAX: usize = 32;
pub const RFCOMM_CHANNEL: u8 = 1;
pub const SERIAL_BAUDRATE: u32 = 115_200;

// Supervisor loop frequency
pub const SUPERVISOR_HZ: u64 = 20;

// Watchdog: drop the request to zero if the remote goes quiet
pub const POWER_TIMEOUT: Duration = Duration::from_millis(500);

// Delay before reopening a failed transport
pub const REOPEN_DELAY: Duration = Duration::from_secs(1);

// Zenoh topics
pub const TOPIC_THROTTLE: &str = "longboard/state/throttle"; // applied/requested power
pub const TOPIC_HEALTH: &str = "longboard/state/health"; // link health
