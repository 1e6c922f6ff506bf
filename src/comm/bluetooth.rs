// Bluetooth RFCOMM transport
//
// Disconnected (no socket) -> `open` -> Connected -> `close` or a fatal read
// error -> Disconnected. The socket gets a fixed receive timeout, so a quiet
// remote shows up as `CommError::Timeout` instead of blocking forever.

use std::fs::File;

use tracing::info;

use super::{CommError, Link, Transport};
use crate::config::{COMM_RECV_TIMEOUT, RFCOMM_CHANNEL};

/// Parse `XX:XX:XX:XX:XX:XX` into a Bluetooth device address.
///
/// The result is in the little-endian order the kernel expects (the last
/// textual octet first).
pub fn parse_bdaddr(address: &str) -> Result<[u8; 6], CommError> {
    let invalid = || CommError::Address(address.to_string());

    let mut octets = [0u8; 6];
    let mut parts = address.split(':');
    for slot in octets.iter_mut().rev() {
        let part = parts.next().ok_or_else(invalid)?;
        if part.len() != 2 {
            return Err(invalid());
        }
        *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
    }
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(octets)
}

/// RFCOMM connection to a remote power source.
#[derive(Debug)]
pub struct BluetoothTransport {
    address: String,
    link: Link<File>,
}

impl BluetoothTransport {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            link: Link::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Transport for BluetoothTransport {
    fn open(&mut self) -> Result<(), CommError> {
        if self.link.detach() {
            info!("Reopening RFCOMM link to {}", self.address);
        }
        let stream = rfcomm::connect(&self.address, RFCOMM_CHANNEL)?;
        self.link.attach(stream);
        info!("Connected to {} on RFCOMM channel {}", self.address, RFCOMM_CHANNEL);
        Ok(())
    }

    fn close(&mut self) -> Result<(), CommError> {
        if self.link.detach() {
            info!("Disconnected from {}", self.address);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.link.is_open()
    }

    fn get_power(&mut self) -> Result<f32, CommError> {
        self.link.read_power(&self.address)
    }
}

#[cfg(target_os = "linux")]
mod rfcomm {
    use std::fs::File;
    use std::mem;
    use std::os::fd::OwnedFd;

    use socket2::{Domain, Protocol, SockAddr, Socket, Type};

    use super::{COMM_RECV_TIMEOUT, CommError, parse_bdaddr};

    const BTPROTO_RFCOMM: libc::c_int = 3;

    /// `struct sockaddr_rc` from <bluetooth/rfcomm.h>
    #[repr(C)]
    struct SockaddrRc {
        rc_family: libc::sa_family_t,
        rc_bdaddr: [u8; 6],
        rc_channel: u8,
    }

    fn sockaddr(bdaddr: [u8; 6], channel: u8) -> Result<SockAddr, CommError> {
        // SAFETY: the storage is zeroed, large and aligned enough for a
        // sockaddr_rc, and the length written matches the struct.
        let ((), addr) = unsafe {
            SockAddr::try_init(|storage, len| {
                storage.cast::<SockaddrRc>().write(SockaddrRc {
                    rc_family: libc::AF_BLUETOOTH as libc::sa_family_t,
                    rc_bdaddr: bdaddr,
                    rc_channel: channel,
                });
                *len = mem::size_of::<SockaddrRc>() as libc::socklen_t;
                Ok(())
            })
        }
        .map_err(CommError::Socket)?;
        Ok(addr)
    }

    /// Create, configure and connect an RFCOMM stream socket. The socket is
    /// closed on any failure.
    pub fn connect(address: &str, channel: u8) -> Result<File, CommError> {
        let addr = sockaddr(parse_bdaddr(address)?, channel)?;

        let socket = Socket::new(
            Domain::from(libc::AF_BLUETOOTH),
            Type::STREAM,
            Some(Protocol::from(BTPROTO_RFCOMM)),
        )
        .map_err(CommError::Socket)?;
        socket
            .set_read_timeout(Some(COMM_RECV_TIMEOUT))
            .map_err(CommError::Socket)?;

        socket.connect(&addr).map_err(|source| CommError::Connect {
            addr: address.to_string(),
            source,
        })?;

        Ok(File::from(OwnedFd::from(socket)))
    }
}

#[cfg(not(target_os = "linux"))]
mod rfcomm {
    use std::fs::File;

    use super::{CommError, parse_bdaddr};

    pub fn connect(address: &str, _channel: u8) -> Result<File, CommError> {
        parse_bdaddr(address)?;
        Err(CommError::Unsupported("Bluetooth RFCOMM"))
    }
}
