use super::packet::{self, EchoPacket};
use super::{report, PingError};
use crate::configuration::PingConfiguration;
use crate::resolver::{AddressFamily, ResolvedAddress};
use pnet::packet::ipv4::Ipv4Packet;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::future::Future;
use std::io::{self, Read};
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::unix::AsyncFd;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

// Large enough for an IPv4 header with options and a full size echo reply
const RECEIVE_BUFFER_SIZE: usize = 4096;

/// Every raw ICMP socket sees every echo reply reaching the host, so transports living
/// in the same process must not share an identifier.
pub fn next_identifier() -> u16 {
    static NEXT_IDENTIFIER: OnceLock<AtomicU16> = OnceLock::new();
    NEXT_IDENTIFIER
        .get_or_init(|| AtomicU16::new(rand::random()))
        .fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Completed,
    TimedOut,
    Failed,
}

/// One outstanding echo request. Moves to a terminal state exactly once.
#[derive(Debug, Clone)]
pub struct OngoingRequest {
    target: ResolvedAddress,
    identifier: u16,
    sequence: u16,
    sent_at: Instant,
    state: RequestState,
}

impl OngoingRequest {
    pub fn new(target: ResolvedAddress, identifier: u16, sequence: u16) -> Self {
        Self {
            target,
            identifier,
            sequence,
            sent_at: Instant::now(),
            state: RequestState::Pending,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn sent_at(&self) -> Instant {
        self.sent_at
    }

    pub fn mark_sent(&mut self, at: Instant) {
        self.sent_at = at;
    }

    /// A reply answers this request only while it is pending and when both identifier and
    /// sequence number match.
    pub fn accepts(&self, reply: &EchoPacket) -> bool {
        self.state == RequestState::Pending
            && reply.is_reply(self.target.family())
            && reply.identifier == self.identifier
            && reply.sequence == self.sequence
    }

    /// Whether a datagram read from the raw socket is the reply to this request.
    pub fn answered_by(&self, data: &[u8], local: Option<IpAddr>) -> bool {
        match parse_reply(data, &self.target, local) {
            Some(reply) if self.accepts(&reply) => true,
            Some(reply) => {
                trace!(
                    "Discarding echo reply id={} sn={} (waiting for id={} sn={})",
                    reply.identifier,
                    reply.sequence,
                    self.identifier,
                    self.sequence
                );
                false
            }
            None => {
                trace!("Discarding {} byte packet", data.len());
                false
            }
        }
    }

    pub fn elapsed(&self, at: Instant) -> Duration {
        at.saturating_duration_since(self.sent_at)
    }

    /// Moves the request to `state` and returns the time spent since sending. Returns `None`
    /// if the request had already left the pending state.
    pub fn finish(&mut self, state: RequestState, at: Instant) -> Option<Duration> {
        if self.state != RequestState::Pending || state == RequestState::Pending {
            return None;
        }
        self.state = state;
        Some(self.elapsed(at))
    }
}

/// Strips the network header a raw socket hands back and validates what remains as an
/// echo reply from `target`. Packets failing any check are dropped.
pub fn parse_reply(
    data: &[u8],
    target: &ResolvedAddress,
    local: Option<IpAddr>,
) -> Option<EchoPacket> {
    let icmp = match target.ip() {
        IpAddr::V4(target_ip) => {
            let ip = Ipv4Packet::new(data)?;
            let header_length = ip.get_header_length() as usize * 4;
            if header_length < Ipv4Packet::minimum_packet_size() || data.len() < header_length {
                return None;
            }
            if ip.get_source() != target_ip {
                return None;
            }
            let icmp = &data[header_length..];
            if !packet::checksum_is_valid(icmp) {
                return None;
            }
            icmp
        }
        IpAddr::V6(target_ip) => {
            // Without a known local address the kernel checksum validation is all we get
            if let Some(IpAddr::V6(local_ip)) = local {
                if !packet::checksum_v6_is_valid(data, &target_ip, &local_ip) {
                    return None;
                }
            }
            data
        }
    };
    let reply = EchoPacket::decode(icmp)?;
    if reply.is_reply(target.family()) {
        Some(reply)
    } else {
        None
    }
}

fn open_socket(
    target: &ResolvedAddress,
    conf: &PingConfiguration,
) -> Result<(Socket, Option<IpAddr>), io::Error> {
    let (domain, protocol) = match target.family() {
        AddressFamily::Ipv4 => (Domain::IPV4, Protocol::ICMPV4),
        _ => (Domain::IPV6, Protocol::ICMPV6),
    };
    let socket = Socket::new(domain, Type::RAW, Some(protocol))?;
    socket.set_nonblocking(true)?;
    if let Some(ttl) = conf.ttl {
        match target.family() {
            AddressFamily::Ipv4 => socket.set_ttl(ttl)?,
            _ => socket.set_unicast_hops_v6(ttl)?,
        }
    }
    socket.connect(&SockAddr::from(target.socket_addr()))?;
    let local = socket
        .local_addr()
        .ok()
        .and_then(|addr| addr.as_socket())
        .map(|addr| addr.ip())
        .filter(|ip| !ip.is_unspecified());
    Ok((socket, local))
}

async fn send_packet(socket: &AsyncFd<Socket>, data: &[u8]) -> io::Result<()> {
    loop {
        let mut guard = socket.writable().await?;
        match guard.try_io(|inner| inner.get_ref().send(data)) {
            Ok(result) => {
                let sent = result?;
                if sent != data.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "echo request truncated",
                    ));
                }
                return Ok(());
            }
            Err(_would_block) => continue,
        }
    }
}

async fn wait_reply(
    socket: &AsyncFd<Socket>,
    ongoing: &OngoingRequest,
    local: Option<IpAddr>,
) -> io::Result<Instant> {
    let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
    loop {
        let mut guard = socket.readable().await?;
        let size = match guard.try_io(|inner| {
            let mut socket: &Socket = inner.get_ref();
            socket.read(&mut buffer)
        }) {
            Ok(result) => result?,
            Err(_would_block) => continue,
        };
        let received = Instant::now();
        if ongoing.answered_by(&buffer[..size], local) {
            return Ok(received);
        }
    }
}

struct Exchange {
    socket: Arc<AsyncFd<Socket>>,
    local: Option<IpAddr>,
    timeout: Duration,
    packet: EchoPacket,
    ongoing: OngoingRequest,
}

impl Exchange {
    async fn run(mut self, mut stop_rx: oneshot::Receiver<()>) -> Result<Duration, PingError> {
        if let Err(source) = send_packet(&self.socket, &self.packet.encode()).await {
            self.ongoing.finish(RequestState::Failed, Instant::now());
            return Err(PingError::Send { source });
        }
        self.ongoing.mark_sent(Instant::now());
        debug!(
            "Sent echo request to {} id={} sn={}",
            self.ongoing.target, self.ongoing.identifier, self.ongoing.sequence
        );

        let deadline = tokio::time::Instant::from_std(self.ongoing.sent_at() + self.timeout);
        let reply = wait_reply(&self.socket, &self.ongoing, self.local);
        let outcome = tokio::select! {
            _ = &mut stop_rx => None,
            result = tokio::time::timeout_at(deadline, reply) => Some(result),
        };

        let now = Instant::now();
        match outcome {
            Some(Ok(Ok(received))) => {
                let latency = self
                    .ongoing
                    .finish(RequestState::Completed, received)
                    .unwrap_or_default();
                debug!("Echo reply from {} after {:?}", self.ongoing.target, latency);
                Ok(latency)
            }
            Some(Ok(Err(source))) => {
                let elapsed = self.ongoing.elapsed(now);
                self.ongoing.finish(RequestState::Failed, now);
                Err(PingError::Receive { source, elapsed })
            }
            Some(Err(_)) => {
                let elapsed = self.ongoing.elapsed(now);
                self.ongoing.finish(RequestState::TimedOut, now);
                debug!("No echo reply from {} after {:?}", self.ongoing.target, elapsed);
                Err(PingError::Timeout { elapsed })
            }
            None => {
                let elapsed = self.ongoing.elapsed(now);
                self.ongoing.finish(RequestState::Failed, now);
                Err(PingError::Cancelled { elapsed })
            }
        }
    }
}

/// Completion of one ping. Resolves exactly once.
#[derive(Debug)]
pub struct PingHandle {
    identifier: u16,
    sequence: u16,
    rx: oneshot::Receiver<Result<Duration, PingError>>,
}

impl PingHandle {
    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }
}

impl Future for PingHandle {
    type Output = Result<Duration, PingError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(PingError::BackendClosed)))
    }
}

/// A raw ICMP socket connected to a single target.
///
/// Must be created and used from within a tokio runtime: the socket is registered with
/// the runtime reactor and every ping runs as its own task.
#[derive(Debug)]
pub struct IcmpTransport {
    socket: Option<Arc<AsyncFd<Socket>>>,
    target: ResolvedAddress,
    local: Option<IpAddr>,
    identifier: u16,
    next_sequence: u16,
    payload_size: usize,
    timeout: Duration,
    pending: Option<oneshot::Sender<()>>,
}

impl IcmpTransport {
    pub fn connect(target: &ResolvedAddress, conf: &PingConfiguration) -> Result<Self, PingError> {
        let family = target.family();
        if family == AddressFamily::Unspecified {
            return Err(PingError::UnsupportedFamily);
        }
        let open_failed = |source: io::Error| {
            warn!("Failed to open {} icmp socket to {}: {}", family, target, source);
            PingError::SocketOpen { family, source }
        };
        let (socket, local) = open_socket(target, conf).map_err(open_failed)?;
        let socket = AsyncFd::new(socket).map_err(open_failed)?;
        let identifier = next_identifier();
        debug!(
            "Opened {} icmp socket to {} (local {:?}, id={})",
            family, target, local, identifier
        );

        Ok(Self {
            socket: Some(Arc::new(socket)),
            target: *target,
            local,
            identifier,
            next_sequence: 0,
            payload_size: conf.payload_size(),
            timeout: conf.timeout,
            pending: None,
        })
    }

    pub fn target(&self) -> &ResolvedAddress {
        &self.target
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn is_stopped(&self) -> bool {
        self.socket.is_none()
    }

    /// Builds the next echo request for this transport's family and identifier.
    pub fn echo_packet(&mut self) -> Result<EchoPacket, PingError> {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        let mut packet = EchoPacket::request(
            self.target.family(),
            self.identifier,
            sequence,
            packet::payload_pattern(self.payload_size),
        )?;
        if let (Some(IpAddr::V6(local)), IpAddr::V6(target)) = (self.local, self.target.ip()) {
            packet.seal_v6(&local, &target);
        }
        Ok(packet)
    }

    /// Sends `packet` and waits for the matching reply in a background task.
    ///
    /// A request still outstanding from a previous call is cancelled: only the most recent
    /// request is ever correlated.
    pub fn send(&mut self, packet: EchoPacket) -> PingHandle {
        let (result_tx, rx) = oneshot::channel();
        let ping = PingHandle {
            identifier: packet.identifier,
            sequence: packet.sequence,
            rx,
        };

        let socket = match &self.socket {
            Some(socket) => socket.clone(),
            None => {
                let _ = result_tx.send(Err(PingError::Send {
                    source: io::Error::new(io::ErrorKind::NotConnected, "transport stopped"),
                }));
                return ping;
            }
        };
        if let Some(previous) = self.pending.take() {
            let _ = previous.send(());
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        self.pending = Some(stop_tx);

        let exchange = Exchange {
            socket,
            local: self.local,
            timeout: self.timeout,
            ongoing: OngoingRequest::new(self.target, packet.identifier, packet.sequence),
            packet,
        };
        tokio::spawn(async move {
            let _ = result_tx.send(exchange.run(stop_rx).await);
        });
        ping
    }

    /// Handler flavoured `send`: `on_result` gets `(success, elapsed seconds)` once.
    pub fn send_with<F>(&mut self, packet: EchoPacket, on_result: F)
    where
        F: FnOnce(bool, f64) + Send + 'static,
    {
        let ping = self.send(packet);
        tokio::spawn(async move {
            let (success, elapsed) = report(&ping.await);
            on_result(success, elapsed);
        });
    }

    /// Cancels the outstanding request, if any, and releases the socket. Idempotent.
    pub fn stop(&mut self) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.send(());
        }
        if self.socket.take().is_some() {
            debug!("Stopped icmp transport to {}", self.target);
        }
    }
}
