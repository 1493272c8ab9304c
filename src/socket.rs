/*! UDP receive socket for detector readout data.

Thin wrapper around [`std::net::UdpSocket`] that adds the kernel buffer
tuning the readout path needs. The kernel socket buffer is the secondary
queue behind the packet ring, so its size is checked and logged at startup.
*/
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::AsRawFd;
use std::time::Duration;

use log::{info, warn};

use crate::Result;

/// Receive timeout used by the ingress loop.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Bound UDP socket with receive timeout support.
pub struct UdpReceiver {
    socket: UdpSocket,
}

impl UdpReceiver {
    /// Bind to `local`. A bind failure is fatal at startup.
    pub fn new(local: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local)?;
        info!("Bound UDP receive socket to {local}");
        Ok(Self { socket })
    }

    /// Request kernel socket buffer sizes, in bytes. Zero leaves a value
    /// untouched.
    pub fn set_buffer_sizes(&self, sndbuf: usize, rcvbuf: usize) -> Result<()> {
        if sndbuf != 0 {
            self.set_sock_opt(libc::SO_SNDBUF, sndbuf as libc::c_int)?;
        }
        if rcvbuf != 0 {
            self.set_sock_opt(libc::SO_RCVBUF, rcvbuf as libc::c_int)?;
        }
        Ok(())
    }

    /// Warn if the kernel clamped the receive buffer below `min`.
    ///
    /// Linux reports back twice the requested value, hence the factor.
    pub fn check_rx_buffer_size(&self, min: usize) {
        match self.get_sock_opt(libc::SO_RCVBUF) {
            Ok(actual) if (actual as usize) < 2 * min => {
                warn!("Receive buffer is {actual} bytes, wanted at least {min} (doubled by the kernel)");
            }
            Ok(_) => {}
            Err(e) => warn!("Could not read receive buffer size: {e}"),
        }
    }

    /// Log the effective socket buffer sizes.
    pub fn print_buffer_sizes(&self) {
        if let Ok(v) = self.get_sock_opt(libc::SO_RCVBUF) {
            info!("Socket receive buffer size: {v}");
        }
        if let Ok(v) = self.get_sock_opt(libc::SO_SNDBUF) {
            info!("Socket send buffer size: {v}");
        }
    }

    /// Set the blocking receive timeout.
    pub fn set_recv_timeout(&self, timeout: Duration) -> Result<()> {
        self.socket.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    /// Receive one datagram. `None` means the timeout expired.
    pub fn receive(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.socket.recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Local address, useful when bound to port 0 in tests.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn set_sock_opt(&self, option: libc::c_int, value: libc::c_int) -> Result<()> {
        // SAFETY: fd is valid for the lifetime of self; value points to a
        // properly sized c_int.
        let rc = unsafe {
            libc::setsockopt(
                self.socket.as_raw_fd(),
                libc::SOL_SOCKET,
                option,
                &value as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn get_sock_opt(&self, option: libc::c_int) -> Result<libc::c_int> {
        let mut value: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: fd is valid; value/len point to properly sized storage.
        let rc = unsafe {
            libc::getsockopt(
                self.socket.as_raw_fd(),
                libc::SOL_SOCKET,
                option,
                &mut value as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(value)
    }
}
