// Supervisor: remote power -> throttle, with a watchdog
//
// A blocking reader pulls power values off the transport and hands them to
// the supervisor loop, which feeds the latest one to the throttle. If the
// remote goes quiet the watchdog requests zero power.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};
use zenoh::pubsub::Publisher;

use crate::comm::{CommEndpoint, CommError};
use crate::config::{POWER_TIMEOUT, REOPEN_DELAY, SUPERVISOR_HZ, TOPIC_HEALTH, TOPIC_THROTTLE};
use crate::messages::{RuntimeHealth, ThrottleTelemetry};
use crate::pwm::{PwmDriver, SimDriver, SysfsDriver};
use crate::throttle::Throttle;

/// Where remote power values come from
#[derive(Debug, Clone)]
pub enum TransportOptions {
    Bluetooth { address: String },
    Serial { path: String, baudrate: u32 },
}

impl TransportOptions {
    fn endpoint(&self) -> CommEndpoint {
        match self {
            TransportOptions::Bluetooth { address } => CommEndpoint::bluetooth(address),
            TransportOptions::Serial { path, baudrate } => CommEndpoint::serial(path, *baudrate),
        }
    }
}

/// Which PWM driver backs the channels
#[derive(Debug, Clone)]
pub enum PwmBackend {
    Sim,
    Sysfs { root: PathBuf, period_ns: u64 },
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub transport: TransportOptions,
    pub pwm: PwmBackend,
    pub left: String,
    pub right: String,
    pub telemetry: bool,
}

pub struct Supervisor {
    latest: Option<f32>,
    received_at: Instant,
    timeout: Duration,
    health: RuntimeHealth,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_timeout(POWER_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            latest: None,
            received_at: Instant::now(),
            timeout,
            health: RuntimeHealth::LinkStale, // Stale until the first sample
        }
    }

    /// Record a power value from the remote
    pub fn on_power(&mut self, power: f32) {
        if !power.is_finite() {
            warn!("Ignoring non-finite power value {}", power);
            return;
        }
        debug!("Remote power: {}", power);
        self.latest = Some(power);
        self.received_at = Instant::now();
    }

    /// Power to request from the throttle, clamped to 0-100%.
    /// Zero when no fresh sample is available.
    pub fn compute_request(&mut self) -> f32 {
        let age = self.received_at.elapsed();

        match self.latest {
            Some(power) if age <= self.timeout => {
                if self.health != RuntimeHealth::Ok {
                    info!("Remote power link healthy");
                }
                self.health = RuntimeHealth::Ok;
                power.clamp(0.0, 100.0)
            }
            _ => {
                if self.health != RuntimeHealth::LinkStale {
                    warn!("Remote power stale ({:?} old), requesting zero", age);
                }
                self.health = RuntimeHealth::LinkStale;
                0.0
            }
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn latest(&self) -> Option<f32> {
        self.latest
    }
}

/// Pull power values off the transport until the receiver goes away.
/// Retries overflowed lines, reopens the transport after failures.
fn pump_power(mut endpoint: CommEndpoint, tx: mpsc::Sender<f32>) {
    while !tx.is_closed() {
        if !endpoint.is_open() {
            if let Err(e) = endpoint.open() {
                warn!("Failed to open {:?} transport: {}", endpoint.kind(), e);
                std::thread::sleep(REOPEN_DELAY);
                continue;
            }
        }

        match endpoint.get_power() {
            Ok(power) => {
                if tx.blocking_send(power).is_err() {
                    break;
                }
            }
            Err(e) if e.is_retry() => debug!("{}", e),
            Err(CommError::Timeout) => debug!("No power value within receive timeout"),
            Err(e) => warn!("Power read failed: {}", e),
        }
    }

    if let Err(e) = endpoint.delete() {
        warn!("Failed to close transport: {}", e);
    }
    debug!("Power reader exited");
}

async fn publish<T: Serialize>(
    publisher: &Publisher<'_>,
    value: &T,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(serde_json::to_string(value)?).await?;
    Ok(())
}

pub async fn run(options: RuntimeOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let driver: Arc<dyn PwmDriver> = match &options.pwm {
        PwmBackend::Sim => {
            info!("Using simulated PWM channels");
            Arc::new(SimDriver::new(&[options.left.as_str(), options.right.as_str()]))
        }
        PwmBackend::Sysfs { root, period_ns } => {
            info!("Using sysfs PWM channels under {}", root.display());
            Arc::new(SysfsDriver::new(root.clone(), *period_ns))
        }
    };

    let throttle = Throttle::new(driver, &options.left, &options.right)?;
    throttle.start()?;

    let (tx, mut rx) = mpsc::channel(16);
    let endpoint = options.transport.endpoint();
    let reader = tokio::task::spawn_blocking(move || pump_power(endpoint, tx));

    let session = if options.telemetry {
        info!("Opening Zenoh session...");
        Some(zenoh::open(zenoh::Config::default()).await?)
    } else {
        None
    };
    let mut publishers = None;
    if let Some(session) = &session {
        let pub_throttle = session.declare_publisher(TOPIC_THROTTLE).await?;
        let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;
        info!("Publishing to: {}, {}", TOPIC_THROTTLE, TOPIC_HEALTH);
        publishers = Some((pub_throttle, pub_health));
    }

    let mut supervisor = Supervisor::new();
    let mut tick = interval(Duration::from_millis(1000 / SUPERVISOR_HZ));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Supervisor started: {}Hz loop, {}ms power timeout",
        SUPERVISOR_HZ,
        POWER_TIMEOUT.as_millis()
    );

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            _ = tick.tick() => {}
        }

        // 1. Drain pending samples, keep latest
        while let Ok(power) = rx.try_recv() {
            supervisor.on_power(power);
        }

        // 2. Feed the throttle (includes watchdog)
        throttle.request_set(supervisor.compute_request());

        // 3. Publish telemetry; a failed publish never stops the motors
        if let Some((pub_throttle, pub_health)) = &publishers {
            let telemetry = ThrottleTelemetry::new(&throttle.state(), supervisor.latest());
            if let Err(e) = publish(pub_throttle, &telemetry).await {
                warn!("Failed to publish throttle telemetry: {}", e);
            }
            if let Err(e) = publish(pub_health, &supervisor.health()).await {
                warn!("Failed to publish runtime health: {}", e);
            }
        }
    }

    drop(rx);
    tokio::task::spawn_blocking(move || throttle.delete()).await?;
    reader.await?;
    Ok(())
}
