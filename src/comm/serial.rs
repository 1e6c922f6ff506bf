// Serial transport: the same power line protocol over a serial device
// (USB CDC, UART radio modem, or a paired /dev/rfcomm0 tty)

use serialport::SerialPort;
use tracing::info;

use super::{CommError, Link, Transport};
use crate::config::COMM_RECV_TIMEOUT;

pub struct SerialTransport {
    path: String,
    baudrate: u32,
    link: Link<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(path: &str, baudrate: u32) -> Self {
        Self {
            path: path.to_string(),
            baudrate,
            link: Link::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), CommError> {
        self.link.detach();
        let port = serialport::new(&self.path, self.baudrate)
            .timeout(COMM_RECV_TIMEOUT)
            .open()?;
        self.link.attach(port);
        info!("Opened {} at {} baud", self.path, self.baudrate);
        Ok(())
    }

    fn close(&mut self) -> Result<(), CommError> {
        if self.link.detach() {
            info!("Closed {}", self.path);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.link.is_open()
    }

    fn get_power(&mut self) -> Result<f32, CommError> {
        self.link.read_power(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_power_unopened() {
        let mut serial = SerialTransport::new("/dev/ttyUSB0", 115_200);
        assert!(matches!(serial.get_power(), Err(CommError::NotOpen)));
        assert_eq!(serial.path(), "/dev/ttyUSB0");
    }

    #[test]
    fn test_open_missing_device() {
        let mut serial = SerialTransport::new("/dev/does-not-exist-longboard", 115_200);
        assert!(matches!(serial.open(), Err(CommError::Serial(_))));
        assert!(!serial.is_open());
        serial.close().unwrap();
    }
}
