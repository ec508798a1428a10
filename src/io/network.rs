//! UDP transport for encoded tick frames.
//!
//! - [`DatagramSender`] - Sends each frame as one datagram to a fixed peer
//! - [`DatagramReceiver`] - Receives datagrams and hands them to a [`TickListener`]
//!
//! # Protocol
//!
//! One frame per datagram, in production order. A frame never exceeds
//! [`MAX_FRAME_SIZE`], so it always fits one UDP payload. An empty datagram
//! marks the end of the track. UDP does not guarantee ordering or delivery;
//! lost frames play as gaps and reordered frames play out of order.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};

use crate::error::SinkError;
use crate::session::TickListener;
use crate::spectral::MAX_FRAME_SIZE;

pub const DEFAULT_PORT: u16 = 7667;

/// How often a blocked receive wakes up to check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn new_socket(addr: &SocketAddr) -> Result<Socket> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("Failed to create socket")
}

/// Sends encoded frames to one peer.
pub struct DatagramSender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl DatagramSender {
    pub fn new(target: SocketAddr) -> Result<Self> {
        let socket = new_socket(&target)?;
        let local: SocketAddr = match target {
            SocketAddr::V4(_) => "0.0.0.0:0".parse()?,
            SocketAddr::V6(_) => "[::]:0".parse()?,
        };
        socket
            .bind(&local.into())
            .context("Failed to bind sender socket")?;
        socket
            .set_send_buffer_size(MAX_FRAME_SIZE * 16)
            .context("Failed to set send buffer size")?;

        info!("Datagram sender initialized for {}", target);
        Ok(Self {
            socket: socket.into(),
            target,
        })
    }

    pub fn send(&self, frame: &[u8]) -> Result<(), SinkError> {
        let sent = self.socket.send_to(frame, self.target)?;
        if sent < frame.len() {
            warn!("Partial sent: {}/{}", sent, frame.len());
        }
        Ok(())
    }
}

impl TickListener for DatagramSender {
    fn deliver(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        self.send(frame)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.send(&[])
    }
}

/// Receives frames on a bound socket until shut down or the sender signals
/// the end of the track.
pub struct DatagramReceiver {
    socket: UdpSocket,
    shutdown_flag: Arc<AtomicBool>,
}

impl DatagramReceiver {
    pub fn bind(addr: SocketAddr, shutdown_flag: Arc<AtomicBool>) -> Result<Self> {
        let socket = new_socket(&addr)?;
        socket
            .set_reuse_address(true)
            .context("Failed to set SO_REUSEADDR")?;
        socket
            .set_recv_buffer_size(MAX_FRAME_SIZE * 64)
            .context("Failed to set receive buffer size")?;
        socket
            .bind(&addr.into())
            .with_context(|| format!("Failed to bind {addr}"))?;
        socket
            .set_read_timeout(Some(POLL_INTERVAL))
            .context("Failed to set read timeout")?;

        info!("Datagram receiver listening on {}", addr);
        Ok(Self {
            socket: socket.into(),
            shutdown_flag,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Forward every datagram to `listener` until shutdown or end of track.
    pub fn run(self, listener: &mut dyn TickListener) -> Result<(), SinkError> {
        let mut buf = vec![0u8; MAX_FRAME_SIZE + 1];
        let mut received = 0u64;

        while !self.shutdown_flag.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut buf) {
                Ok((0, source)) => {
                    info!("End of track from {} after {} frames", source, received);
                    return listener.finish();
                }
                Ok((size, source)) => {
                    if size > MAX_FRAME_SIZE {
                        warn!("Oversized datagram from {}, dropped", source);
                        continue;
                    }
                    received += 1;
                    debug!("Frame {} ({} bytes) from {}", received, size, source);
                    listener.deliver(&buf[..size])?;
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => {
                    error!("Failed to receive UDP packet: {:?}", e);
                    return Err(e.into());
                }
            }
        }

        info!("Datagram receiver shutting down");
        listener.close();
        Ok(())
    }
}
