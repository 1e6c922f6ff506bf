use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use longboard_throttle::config::{PWM_LEFT, PWM_PERIOD_NS, PWM_RIGHT, PWM_SYSFS_ROOT, SERIAL_BAUDRATE};
use longboard_throttle::runtime::{PwmBackend, RuntimeOptions, TransportOptions};

/// Drive the longboard motors from a remote power link
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    link: Link,

    /// Left PWM channel name
    #[arg(long, default_value = PWM_LEFT)]
    left: String,

    /// Right PWM channel name
    #[arg(long, default_value = PWM_RIGHT)]
    right: String,

    /// Use simulated PWM channels (no hardware)
    #[arg(long)]
    sim: bool,

    #[arg(long, default_value = PWM_SYSFS_ROOT)]
    pwm_root: PathBuf,

    /// PWM period in nanoseconds
    #[arg(long, default_value_t = PWM_PERIOD_NS)]
    period_ns: u64,

    /// Don't publish telemetry over Zenoh
    #[arg(long)]
    no_telemetry: bool,
}

/// Where the remote power link comes from
#[derive(Subcommand, Debug)]
enum Link {
    /// Remote over Bluetooth RFCOMM
    Bluetooth {
        /// Address of the remote (XX:XX:XX:XX:XX:XX)
        address: String,
    },
    /// Remote over a serial device
    Serial {
        path: String,

        #[arg(long, default_value_t = SERIAL_BAUDRATE)]
        baud: u32,
    },
}

impl Args {
    fn into_options(self) -> RuntimeOptions {
        let transport = match self.link {
            Link::Bluetooth { address } => TransportOptions::Bluetooth { address },
            Link::Serial { path, baud } => TransportOptions::Serial {
                path,
                baudrate: baud,
            },
        };
        let pwm = if self.sim {
            PwmBackend::Sim
        } else {
            PwmBackend::Sysfs {
                root: self.pwm_root,
                period_ns: self.period_ns,
            }
        };

        RuntimeOptions {
            transport,
            pwm,
            left: self.left,
            right: self.right,
            telemetry: !self.no_telemetry,
        }
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    if let Err(e) = longboard_throttle::runtime::run(args.into_options()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
