//! UDP multicast gateway
//!
//! Every cloud member on the segment joins the same group. The gateway binds
//! the first free port of a small range and sends each datagram to every port
//! of the range, so several processes on one host can share the group.
//! A dedicated reader thread decodes datagrams in arrival order.

use super::{Endpoint, EndpointType, Gateway, GatewayError, Listener, Listeners, Network, Receipt};
use crate::config::UdpConfig;
use crate::identity::Iden;
use crate::message::{decode_bytes, encode_message, Message, Status, MAX_MESSAGE_SIZE};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Number of consecutive ports the gateway may bind and always sends to
pub const PORT_SPAN: u16 = 5;

const READ_TIMEOUT: Duration = Duration::from_millis(250);

pub struct UdpGateway {
    socket: UdpSocket,
    group: Ipv4Addr,
    interface: Ipv4Addr,
    base_port: u16,
    bound_port: u16,
    listeners: Arc<Listeners>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl UdpGateway {
    /// Bind a port in the configured range, join the group and start reading
    pub fn bind(config: &UdpConfig) -> Result<Self, GatewayError> {
        let socket = bind_in_range(config.port)?;
        let bound_port = socket.local_addr()?.port();

        if config.group.is_multicast() {
            socket.join_multicast_v4(&config.group, &config.interface)?;
            socket.set_multicast_ttl_v4(config.ttl)?;
            socket.set_multicast_loop_v4(true)?;
        }
        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        let listeners = Arc::new(Listeners::default());
        let running = Arc::new(AtomicBool::new(true));
        let reader = spawn_reader(socket.try_clone()?, listeners.clone(), running.clone())?;

        info!(
            "UDP gateway bound to port {} (group {}:{}+{})",
            bound_port, config.group, config.port, PORT_SPAN
        );

        Ok(Self {
            socket,
            group: config.group,
            interface: config.interface,
            base_port: config.port,
            bound_port,
            listeners,
            running,
            reader: Mutex::new(Some(reader)),
        })
    }

    pub fn port(&self) -> u16 {
        self.bound_port
    }

    /// Address the host uses to reach the group
    fn local_ip(&self) -> Option<IpAddr> {
        if !self.interface.is_unspecified() {
            return Some(IpAddr::V4(self.interface));
        }
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect(SocketAddrV4::new(self.group, self.base_port)).ok()?;
        socket.local_addr().ok().map(|a| a.ip())
    }
}

fn bind_in_range(base: u16) -> Result<UdpSocket, GatewayError> {
    let mut last_error = None;
    for port in base..base.saturating_add(PORT_SPAN) {
        match UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)) {
            Ok(socket) => return Ok(socket),
            Err(e) => {
                debug!("UDP port {} unavailable: {}", port, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| std::io::Error::new(ErrorKind::AddrNotAvailable, "empty port range"))
        .into())
}

fn spawn_reader(
    socket: UdpSocket,
    listeners: Arc<Listeners>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, GatewayError> {
    let handle = std::thread::Builder::new()
        .name("cloudbus-udp-reader".to_string())
        .spawn(move || {
            let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
            while running.load(Ordering::Relaxed) {
                let (len, from) = match socket.recv_from(&mut buf) {
                    Ok(read) => read,
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                        continue
                    }
                    Err(e) => {
                        if running.load(Ordering::Relaxed) {
                            warn!("UDP read failed: {}", e);
                        }
                        continue;
                    }
                };
                match decode_bytes(&buf[..len]) {
                    Ok(message) => listeners.dispatch("UDP", &message),
                    Err(e) => debug!("Dropping undecodable datagram from {}: {}", from, e),
                }
            }
            debug!("UDP reader stopped");
        })?;
    Ok(handle)
}

impl Gateway for UdpGateway {
    fn name(&self) -> &'static str {
        "UDP"
    }

    fn send(&self, _cloud: &Iden, message: &Message) -> Result<Receipt, GatewayError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(GatewayError::Closed);
        }
        let text = encode_message(message)?;
        debug!(target: "protocol", "TX(UDP): {}", message);
        for port in self.base_port..self.base_port.saturating_add(PORT_SPAN) {
            self.socket
                .send_to(text.as_bytes(), SocketAddrV4::new(self.group, port))?;
        }
        Ok(Receipt::new(message.uuid(), self.name(), Status::Unknown))
    }

    fn add_listener(&self, cloud: &Iden, listener: Listener) {
        self.listeners.add(cloud, listener);
    }

    fn endpoints(&self) -> BTreeSet<Endpoint> {
        self.local_ip()
            .map(|ip| Endpoint::new(EndpointType::Udp, Network::from_ip(ip, 32), self.bound_port))
            .into_iter()
            .collect()
    }

    fn close(&self) -> Result<(), GatewayError> {
        if !self.running.swap(false, Ordering::Relaxed) {
            return Ok(());
        }
        if self.group.is_multicast() {
            if let Err(e) = self.socket.leave_multicast_v4(&self.group, &self.interface) {
                debug!("Leaving multicast group failed: {}", e);
            }
        }
        if let Some(reader) = self.reader.lock().take() {
            if reader.join().is_err() {
                warn!("UDP reader panicked");
            }
        }
        Ok(())
    }
}

impl Drop for UdpGateway {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}
