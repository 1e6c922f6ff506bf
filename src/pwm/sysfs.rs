// Linux sysfs PWM driver
//
// Enumerates exported channels under `<root>/pwmchipN/pwmM` and names them
// `pwmchipN_pwmM`. Duty cycle percentages are converted to nanoseconds
// against a fixed period, written on the first duty cycle write.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use super::{PwmChannel, PwmDriver, PwmError, check_duty};

/// A PWM channel backed by a sysfs directory.
#[derive(Debug)]
pub struct SysfsChannel {
    name: String,
    dir: PathBuf,
    period_ns: u64,
    configured: AtomicBool,
}

impl SysfsChannel {
    fn new(name: String, dir: PathBuf, period_ns: u64) -> Self {
        Self {
            name,
            dir,
            period_ns,
            configured: AtomicBool::new(false),
        }
    }

    fn io(&self, source: std::io::Error) -> PwmError {
        PwmError::Io {
            channel: self.name.clone(),
            source,
        }
    }

    fn write_attr(&self, attr: &str, value: u64) -> Result<(), PwmError> {
        debug!("pwm {}: {} <- {}", self.name, attr, value);
        fs::write(self.dir.join(attr), value.to_string()).map_err(|e| self.io(e))
    }

    fn read_attr(&self, attr: &str) -> Result<u64, PwmError> {
        let raw = fs::read_to_string(self.dir.join(attr)).map_err(|e| self.io(e))?;
        raw.trim().parse().map_err(|_| PwmError::Fault {
            channel: self.name.clone(),
            reason: format!("unreadable {}: {:?}", attr, raw.trim()),
        })
    }

    fn ensure_period(&self) -> Result<(), PwmError> {
        if !self.configured.load(Ordering::Acquire) {
            self.write_attr("period", self.period_ns)?;
            self.configured.store(true, Ordering::Release);
        }
        Ok(())
    }
}

impl PwmChannel for SysfsChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_duty_cycle(&self, percent: f32) -> Result<(), PwmError> {
        check_duty(&self.name, percent)?;
        self.ensure_period()?;
        let duty_ns = (self.period_ns as f64 * percent as f64 / 100.0).round() as u64;
        self.write_attr("duty_cycle", duty_ns)
    }

    fn duty_cycle(&self) -> Result<f32, PwmError> {
        let period = self.read_attr("period")?;
        if period == 0 {
            return Err(PwmError::Fault {
                channel: self.name.clone(),
                reason: "period not configured".to_string(),
            });
        }
        let duty = self.read_attr("duty_cycle")?;
        Ok((duty as f64 * 100.0 / period as f64) as f32)
    }

    fn enable(&self) -> Result<(), PwmError> {
        self.ensure_period()?;
        self.write_attr("enable", 1)
    }

    fn disable(&self) -> Result<(), PwmError> {
        self.write_attr("enable", 0)
    }
}

/// Driver over a sysfs PWM class directory (normally `/sys/class/pwm`).
#[derive(Debug, Clone)]
pub struct SysfsDriver {
    root: PathBuf,
    period_ns: u64,
}

impl SysfsDriver {
    pub fn new(root: impl Into<PathBuf>, period_ns: u64) -> Self {
        Self {
            root: root.into(),
            period_ns,
        }
    }

    fn sorted_entries(dir: &Path, prefix: &str) -> std::io::Result<Vec<(String, PathBuf)>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_match = name
                .strip_prefix(prefix)
                .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()));
            if is_match && entry.path().is_dir() {
                entries.push((name, entry.path()));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

impl PwmDriver for SysfsDriver {
    fn channels(&self) -> Result<Vec<Arc<dyn PwmChannel>>, PwmError> {
        let enumerate = |e: std::io::Error| {
            PwmError::Enumerate(format!("{}: {}", self.root.display(), e))
        };

        let mut channels: Vec<Arc<dyn PwmChannel>> = Vec::new();
        for (chip, chip_dir) in Self::sorted_entries(&self.root, "pwmchip").map_err(enumerate)? {
            for (pwm, dir) in Self::sorted_entries(&chip_dir, "pwm").map_err(enumerate)? {
                let name = format!("{}_{}", chip, pwm);
                channels.push(Arc::new(SysfsChannel::new(name, dir, self.period_ns)));
            }
        }
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_tree() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for pwm in ["pwm0", "pwm1"] {
            let dir = root.path().join("pwmchip0").join(pwm);
            fs::create_dir_all(&dir).unwrap();
            for attr in ["period", "duty_cycle", "enable"] {
                fs::write(dir.join(attr), "0\n").unwrap();
            }
        }
        // Not a channel directory
        fs::write(root.path().join("pwmchip0").join("npwm"), "2\n").unwrap();
        root
    }

    #[test]
    fn test_enumerates_exported_channels() {
        let root = fake_tree();
        let driver = SysfsDriver::new(root.path(), 50_000);
        let names: Vec<String> = driver
            .channels()
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["pwmchip0_pwm0", "pwmchip0_pwm1"]);
    }

    #[test]
    fn test_duty_cycle_percent_to_nanoseconds() {
        let root = fake_tree();
        let driver = SysfsDriver::new(root.path(), 50_000);
        let channels = driver.channels().unwrap();
        let ch = &channels[0];

        ch.set_duty_cycle(50.0).unwrap();
        let dir = root.path().join("pwmchip0").join("pwm0");
        assert_eq!(fs::read_to_string(dir.join("period")).unwrap(), "50000");
        assert_eq!(fs::read_to_string(dir.join("duty_cycle")).unwrap(), "25000");
        assert_eq!(ch.duty_cycle().unwrap(), 50.0);

        ch.enable().unwrap();
        assert_eq!(fs::read_to_string(dir.join("enable")).unwrap(), "1");
        ch.disable().unwrap();
        assert_eq!(fs::read_to_string(dir.join("enable")).unwrap(), "0");
    }

    #[test]
    fn test_unconfigured_period_is_a_fault() {
        let root = fake_tree();
        let driver = SysfsDriver::new(root.path(), 50_000);
        let channels = driver.channels().unwrap();
        assert!(matches!(
            channels[1].duty_cycle(),
            Err(PwmError::Fault { .. })
        ));
    }

    #[test]
    fn test_missing_root_fails_enumeration() {
        let driver = SysfsDriver::new("/nonexistent/pwm/root", 50_000);
        assert!(matches!(driver.channels(), Err(PwmError::Enumerate(_))));
    }
}
