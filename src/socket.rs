//! Non-blocking client socket for the market-data feed.
//!
//! Wraps a raw TCP socket tuned for latency: non-blocking connect with
//! an epoll-based timeout, edge-triggered receive readiness,
//! TCP_NODELAY, and a 4 MiB kernel receive buffer. The descriptor is
//! owned by this type and closed on drop or disconnect, never anywhere
//! else.

use crate::defs::CLIENT_RECV_SOCKET_BUFFER;
use crate::epoll::{empty_event, Epoll};
use crate::errors::SocketError;
use crate::protocol;

use std::io;
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Client-side market-data socket.
///
/// All methods take `&self`; the descriptor and connection flag are
/// atomics so the receiver thread and control plane (subscription
/// sends, disconnect) can share one instance behind an `Arc`.
#[derive(Debug)]
pub struct MarketDataSocket {
    fd: AtomicI32,
    epoll: Epoll,
    connected: AtomicBool,
}

impl MarketDataSocket {
    /// Creates an unconnected socket.
    ///
    /// # Errors
    /// [`SocketError::Setup`] when the epoll instance cannot be
    /// created.
    pub fn new() -> Result<Self, SocketError> {
        let epoll = Epoll::new().map_err(|e| SocketError::Setup(e.to_string()))?;
        Ok(Self {
            fd: AtomicI32::new(-1),
            epoll,
            connected: AtomicBool::new(false),
        })
    }

    /// Connects to `host:port` within `timeout_ms`.
    ///
    /// The connect is issued non-blocking; completion is awaited as
    /// writability under epoll and verified through `SO_ERROR`. On
    /// success the socket is re-registered edge-triggered for reads,
    /// TCP_NODELAY is enabled and the kernel receive buffer raised to
    /// 4 MiB. Any failure tears the partial state down.
    ///
    /// # Errors
    /// [`SocketError::BadAddress`] for non-IPv4-literal hosts,
    /// [`SocketError::ConnectFailed`] for timeouts and refused or
    /// failed connections, [`SocketError::Setup`] for descriptor or
    /// registration failures.
    pub fn connect(&self, host: &str, port: u16, timeout_ms: u32) -> Result<(), SocketError> {
        let addr: Ipv4Addr = host
            .parse()
            .map_err(|_| SocketError::BadAddress(host.to_string()))?;
        let endpoint = format!("{}:{}", host, port);

        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(SocketError::Setup(io::Error::last_os_error().to_string()));
        }

        if let Err(e) = set_nonblocking(fd) {
            unsafe { libc::close(fd) };
            return Err(SocketError::Setup(e.to_string()));
        }

        let sockaddr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: libc::in_addr {
                s_addr: u32::from(addr).to_be(),
            },
            sin_zero: [0; 8],
        };

        let rc = unsafe {
            libc::connect(
                fd,
                &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                unsafe { libc::close(fd) };
                return Err(SocketError::ConnectFailed(endpoint, err.to_string()));
            }
        }

        // Await writability = connection established (or failed).
        if let Err(e) = self.epoll.add(fd, libc::EPOLLOUT as u32) {
            unsafe { libc::close(fd) };
            return Err(SocketError::Setup(e.to_string()));
        }

        if let Err(e) = self.wait_for_connection(fd, timeout_ms) {
            let _ = self.epoll.delete(fd);
            unsafe { libc::close(fd) };
            return Err(SocketError::ConnectFailed(endpoint, e));
        }

        // Switch to edge-triggered read readiness for the feed.
        if let Err(e) = self
            .epoll
            .modify(fd, (libc::EPOLLIN | libc::EPOLLET) as u32)
        {
            let _ = self.epoll.delete(fd);
            unsafe { libc::close(fd) };
            return Err(SocketError::Setup(e.to_string()));
        }

        self.fd.store(fd, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);

        // Latency tuning; failures here are not fatal.
        if let Err(e) = self.set_tcp_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY: {}", e);
        }
        if let Err(e) = self.set_recv_buffer_size(CLIENT_RECV_SOCKET_BUFFER) {
            log::warn!("Failed to set receive buffer size: {}", e);
        }

        log::info!("Connected to {}", endpoint);
        Ok(())
    }

    /// Non-blocking receive into `buf`.
    ///
    /// Returns `Ok(n)` with `n > 0` for received bytes and `Ok(0)` for
    /// both "no data right now" and "peer closed"; the two are
    /// distinguished by [`is_connected`](Self::is_connected), which
    /// flips to false on close.
    ///
    /// # Errors
    /// [`SocketError::NotConnected`] when called on a disconnected
    /// socket; [`SocketError::RecvFailed`] on hard errors, which also
    /// mark the socket disconnected.
    pub fn receive(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        let fd = self.fd.load(Ordering::SeqCst);
        if fd < 0 || !self.is_connected() {
            return Err(SocketError::NotConnected);
        }

        let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };

        if n == 0 {
            // Orderly shutdown by the peer.
            self.connected.store(false, Ordering::SeqCst);
            return Ok(0);
        }
        if n < 0 {
            let err = io::Error::last_os_error();
            if matches!(
                err.raw_os_error(),
                Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)
            ) {
                return Ok(0);
            }
            self.connected.store(false, Ordering::SeqCst);
            return Err(SocketError::RecvFailed(err.to_string()));
        }

        Ok(n as usize)
    }

    /// Serializes and sends a subscription frame for `symbol_ids`.
    ///
    /// The send suppresses SIGPIPE so a broken pipe surfaces as an
    /// error instead of terminating the process.
    ///
    /// # Errors
    /// [`SocketError::NotConnected`] when disconnected;
    /// [`SocketError::SendFailed`] when the frame is not written in
    /// full.
    pub fn send_subscription(&self, symbol_ids: &[u16]) -> Result<(), SocketError> {
        let fd = self.fd.load(Ordering::SeqCst);
        if fd < 0 || !self.is_connected() {
            return Err(SocketError::NotConnected);
        }

        let frame = protocol::encode_subscription(symbol_ids);
        let sent = unsafe {
            libc::send(
                fd,
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                libc::MSG_NOSIGNAL,
            )
        };

        if sent != frame.len() as isize {
            return Err(SocketError::SendFailed(
                io::Error::last_os_error().to_string(),
            ));
        }

        log::debug!("Sent subscription for {} symbols", symbol_ids.len());
        Ok(())
    }

    /// Whether the socket currently believes it is connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the socket if open. Idempotent.
    pub fn disconnect(&self) {
        let fd = self.fd.swap(-1, Ordering::SeqCst);
        if fd >= 0 {
            let _ = self.epoll.delete(fd);
            unsafe { libc::close(fd) };
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Enables or disables Nagle's algorithm. Idempotent.
    pub fn set_tcp_nodelay(&self, enable: bool) -> Result<(), SocketError> {
        self.setsockopt(libc::IPPROTO_TCP, libc::TCP_NODELAY, enable as i32)
    }

    /// Requests a kernel receive buffer of `bytes`. Idempotent.
    pub fn set_recv_buffer_size(&self, bytes: usize) -> Result<(), SocketError> {
        self.setsockopt(libc::SOL_SOCKET, libc::SO_RCVBUF, bytes as i32)
    }

    /// Sets the socket priority (`SO_PRIORITY`). Idempotent.
    pub fn set_priority(&self, priority: i32) -> Result<(), SocketError> {
        self.setsockopt(libc::SOL_SOCKET, libc::SO_PRIORITY, priority)
    }

    fn setsockopt(
        &self,
        level: libc::c_int,
        name: libc::c_int,
        value: i32,
    ) -> Result<(), SocketError> {
        let fd = self.fd.load(Ordering::SeqCst);
        if fd < 0 {
            return Err(SocketError::NotConnected);
        }

        let rc = unsafe {
            libc::setsockopt(
                fd,
                level,
                name,
                &value as *const i32 as *const libc::c_void,
                std::mem::size_of::<i32>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(SocketError::Setup(io::Error::last_os_error().to_string()));
        }
        Ok(())
    }

    fn wait_for_connection(&self, fd: RawFd, timeout_ms: u32) -> Result<(), String> {
        let mut events = [empty_event(); 1];
        let n = self
            .epoll
            .wait(&mut events, timeout_ms as i32)
            .map_err(|e| e.to_string())?;

        if n == 0 {
            return Err(format!("timed out after {}ms", timeout_ms));
        }

        // The socket went writable; check how the connect finished.
        let mut so_error: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut so_error as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().to_string());
        }
        if so_error != 0 {
            return Err(io::Error::from_raw_os_error(so_error).to_string());
        }
        Ok(())
    }
}

impl Drop for MarketDataSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_bad_address() {
        let socket = MarketDataSocket::new().unwrap();
        assert!(matches!(
            socket.connect("not-an-ip", 9876, 100),
            Err(SocketError::BadAddress(_))
        ));
    }

    #[test]
    fn test_connect_refused() {
        let socket = MarketDataSocket::new().unwrap();
        // Grab a port that is free, then connect after the listener is
        // gone.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = socket.connect("127.0.0.1", port, 1000);
        assert!(matches!(result, Err(SocketError::ConnectFailed(_, _))));
        assert!(!socket.is_connected());
    }

    #[test]
    fn test_connect_and_subscribe() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).unwrap();
            buf[..n].to_vec()
        });

        let socket = MarketDataSocket::new().unwrap();
        socket.connect("127.0.0.1", port, 1000).unwrap();
        assert!(socket.is_connected());

        // Option setters are idempotent once connected.
        socket.set_tcp_nodelay(true).unwrap();
        socket.set_tcp_nodelay(true).unwrap();
        socket.set_recv_buffer_size(1 << 20).unwrap();

        socket.send_subscription(&[1, 2, 3]).unwrap();

        let frame = accept.join().unwrap();
        assert_eq!(frame[0], 0xFF);
        assert_eq!(u16::from_le_bytes([frame[1], frame[2]]), 3);

        // No data pending: receive reports zero but stays connected.
        let mut buf = [0u8; 128];
        assert_eq!(socket.receive(&mut buf).unwrap(), 0);
        assert!(socket.is_connected());
    }

    #[test]
    fn test_peer_close_flips_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let socket = MarketDataSocket::new().unwrap();
        socket.connect("127.0.0.1", port, 1000).unwrap();

        let (stream, _) = listener.accept().unwrap();
        drop(stream);

        // Allow the FIN to arrive.
        thread::sleep(Duration::from_millis(50));

        let mut buf = [0u8; 128];
        let n = socket.receive(&mut buf).unwrap();
        assert_eq!(n, 0);
        assert!(!socket.is_connected());

        // Further receives on a disconnected socket error out.
        assert!(matches!(
            socket.receive(&mut buf),
            Err(SocketError::NotConnected)
        ));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let socket = MarketDataSocket::new().unwrap();
        socket.disconnect();
        socket.disconnect();
        assert!(!socket.is_connected());
    }
}
