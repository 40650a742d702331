//! UDP socket link.
//!
//! [`UdpLink`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`Segment`] instead of raw bytes.  All protocol logic lives elsewhere; this
//! module owns only byte I/O and the endpoint-to-address table.
//!
//! The engine's ticks are synchronous, so both directions use the socket's
//! non-blocking `try_*` calls.  A datagram that cannot be sent right now, or
//! that fails to decode on arrival, is logged and treated as lost; the
//! sender's retransmission timer covers it like any other loss.  The driving
//! task must `.await` between ticks so the runtime can refresh socket
//! readiness.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::link::Link;
use crate::packet::{EndpointId, Segment};

/// Largest datagram accepted; comfortably above any encodable segment.
const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    peers: HashMap<EndpointId, SocketAddr>,
    buf: Vec<u8>,
}

impl UdpLink {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `127.0.0.1:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        log::debug!("[udp] bound {}", socket.local_addr()?);
        Ok(Self {
            socket,
            peers: HashMap::new(),
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Route segments addressed to `id` to `addr`.
    pub fn add_peer(&mut self, id: impl Into<EndpointId>, addr: SocketAddr) {
        self.peers.insert(id.into(), addr);
    }
}

impl Link for UdpLink {
    fn send(&mut self, segment: Segment, from: &EndpointId) {
        let Some(&dest) = self.peers.get(&segment.dst) else {
            log::warn!("[udp] {from}: no address for {}; dropping", segment.dst);
            return;
        };
        let bytes = match segment.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("[udp] {from}: cannot encode {segment}: {e}");
                return;
            }
        };
        match self.socket.try_send_to(&bytes, dest) {
            Ok(_) => log::trace!("[udp] {} bytes → {dest}", bytes.len()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                log::debug!("[udp] socket not writable; segment lost: {segment}");
            }
            Err(e) => log::warn!("[udp] send to {dest} failed: {e}"),
        }
    }

    fn receive(&mut self, at: &EndpointId) -> Option<Segment> {
        loop {
            let (n, addr) = match self.socket.try_recv_from(&mut self.buf) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    log::warn!("[udp] receive failed: {e}");
                    return None;
                }
            };
            match Segment::decode(&self.buf[..n]) {
                Ok(segment) if &segment.dst == at => return Some(segment),
                Ok(segment) => {
                    log::debug!("[udp] datagram from {addr} not for {at}: {segment}");
                }
                Err(e) => log::warn!("[udp] undecodable datagram from {addr}: {e}"),
            }
        }
    }
}
