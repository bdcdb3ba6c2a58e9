//! Hybrid TCP/UDP transport
//!
//! The server owns a TCP listener and a UDP socket on the same port; the
//! client owns one TCP stream and one UDP socket talking to that port. All I/O
//! runs in spawned tokio tasks that stop when [`ConnectionManager::shutdown`]
//! flips the shared watch channel. Inbound packets, connects and disconnects
//! are reported as [`ConnectionEvent`]s on an unbounded channel.
//!
//! Outbound packets whose type requires TCP are framed with a 4-byte
//! little-endian length prefix and queued on the session's writer task.
//! Everything else goes out as a single UDP datagram, tracked by the session's
//! [`ReliableUdpEngine`] when flagged reliable.

use crate::config::{
    NetworkConfig, BUFFER_POOL_CAPACITY, MAX_PAYLOAD_SIZE, MAX_TCP_FRAME_SIZE,
    RELIABLE_SWEEP_INTERVAL,
};
use crate::error::{NetworkError, Result};
use crate::message::BROADCAST_TARGET;
use crate::packet::{
    decode_ack, encode_ack, is_probe, NetworkPacket, PacketType, ACK_SIZE, MIN_PACKET_SIZE,
    PROBE,
};
use crate::pool::BufferPool;
use crate::reliable::ReliableUdpEngine;
use crate::session::{ClientSession, SERVER_SESSION_ID};
use crate::stats::{NetworkStatistics, StatisticsSnapshot};
use dashmap::DashMap;
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, timeout};

/// Largest datagram a peer can legitimately send
const MAX_DATAGRAM_SIZE: usize = MAX_PAYLOAD_SIZE + MIN_PACKET_SIZE;

/// Events sent from the I/O tasks to whoever owns the manager
#[derive(Debug)]
pub enum ConnectionEvent {
    PacketReceived {
        packet: NetworkPacket,
        sender_id: i32,
    },
    ClientConnected(i32),
    ClientDisconnected(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

type Datagram = (Vec<u8>, SocketAddr);

/// State shared by the manager handle and every I/O task
struct Transport {
    role: Role,
    config: NetworkConfig,
    sessions: DashMap<i32, Arc<ClientSession>>,
    next_client_id: Mutex<i32>,
    udp_tx: mpsc::UnboundedSender<Datagram>,
    pool: BufferPool,
    stats: NetworkStatistics,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    shutdown: watch::Sender<bool>,
}

pub struct ConnectionManager {
    transport: Arc<Transport>,
    local_addr: SocketAddr,
}

impl ConnectionManager {
    /// Binds the TCP listener and the UDP socket on the same address and
    /// starts the accept, receive and retry tasks
    pub async fn start_server(
        config: NetworkConfig,
        addr: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(NetworkError::ServerStartFailed)?;
        let local_addr = listener
            .local_addr()
            .map_err(NetworkError::ServerStartFailed)?;
        let udp = UdpSocket::bind(local_addr)
            .await
            .map_err(NetworkError::ServerStartFailed)?;
        let udp = Arc::new(udp);

        let (transport, events_rx, udp_rx) = Transport::new(Role::Server, config);

        tokio::spawn(Arc::clone(&transport).udp_sender(Arc::clone(&udp), udp_rx));
        tokio::spawn(Arc::clone(&transport).accept_loop(listener));
        tokio::spawn(Arc::clone(&transport).udp_server_loop(udp));
        tokio::spawn(Arc::clone(&transport).reliable_sweep());

        info!("Server listening on {} (TCP + UDP)", local_addr);
        Ok((
            Self {
                transport,
                local_addr,
            },
            events_rx,
        ))
    }

    /// Connects to a server, then sends the UDP probe so the server can learn
    /// this client's UDP endpoint
    pub async fn connect(
        config: NetworkConfig,
        addr: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        let connect_timeout = config.connection_timeout();
        let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Err(_) => return Err(NetworkError::ConnectionTimeout(connect_timeout)),
            Ok(Err(e)) => return Err(NetworkError::ConnectionFailed(e)),
            Ok(Ok(stream)) => stream,
        };
        stream
            .set_nodelay(true)
            .map_err(NetworkError::ConnectionFailed)?;
        let server_addr = stream.peer_addr().map_err(NetworkError::ConnectionFailed)?;
        let local_ip = stream
            .local_addr()
            .map_err(NetworkError::ConnectionFailed)?
            .ip();

        let udp = UdpSocket::bind(SocketAddr::new(local_ip, 0))
            .await
            .map_err(NetworkError::ConnectionFailed)?;
        let local_addr = udp.local_addr().map_err(NetworkError::ConnectionFailed)?;
        let udp = Arc::new(udp);

        let (transport, events_rx, udp_rx) = Transport::new(Role::Client, config);
        tokio::spawn(Arc::clone(&transport).udp_sender(Arc::clone(&udp), udp_rx));

        let server = transport.register_session(SERVER_SESSION_ID, stream, server_addr);
        server.set_udp_endpoint(server_addr);

        tokio::spawn(Arc::clone(&transport).udp_client_loop(udp, server_addr));
        tokio::spawn(Arc::clone(&transport).reliable_sweep());

        let manager = Self {
            transport,
            local_addr,
        };
        manager.send_probe();

        info!("Connected to {} (local UDP {})", server_addr, local_addr);
        Ok((manager, events_rx))
    }

    pub fn role(&self) -> Role {
        self.transport.role
    }

    /// Listening address on the server, local UDP address on the client
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sends each packet to its target session(s); returns the number of
    /// transport-level sends performed
    pub fn send_packets(&self, packets: Vec<NetworkPacket>) -> usize {
        self.transport.send_packets(packets)
    }

    /// Re-sends the 2-byte UDP probe to the server
    pub fn send_probe(&self) {
        if let Some(server) = self.transport.server_session() {
            if let Some(endpoint) = server.udp_endpoint() {
                self.transport.send_datagram(PROBE.to_vec(), endpoint);
                debug!("Sent UDP probe to {}", endpoint);
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.transport.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.transport.sessions.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn session(&self, client_id: i32) -> Option<Arc<ClientSession>> {
        self.transport
            .sessions
            .get(&client_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.transport.stats.snapshot()
    }

    pub fn disconnect_client(&self, client_id: i32) {
        self.transport.disconnect(client_id);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.transport.shutdown.borrow()
    }

    /// Stops every I/O task, closes all sessions and releases pooled buffers
    pub fn shutdown(&self) {
        if self.transport.shutdown.send_replace(true) {
            return;
        }

        for entry in self.transport.sessions.iter() {
            entry.value().close();
        }
        self.transport.sessions.clear();
        self.transport.pool.clear();
        info!("Connection manager shut down");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Transport {
    fn new(
        role: Role,
        config: NetworkConfig,
    ) -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<ConnectionEvent>,
        mpsc::UnboundedReceiver<Datagram>,
    ) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (udp_tx, udp_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let transport = Arc::new(Self {
            role,
            pool: BufferPool::new(config.buffer_size, BUFFER_POOL_CAPACITY),
            config,
            sessions: DashMap::new(),
            next_client_id: Mutex::new(1),
            udp_tx,
            stats: NetworkStatistics::default(),
            events,
            shutdown,
        });
        (transport, events_rx, udp_rx)
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            trace!("Connection event dropped, receiver is gone");
        }
    }

    fn next_client_id(&self) -> i32 {
        let mut next = self.next_client_id.lock();
        let id = *next;
        *next += 1;
        id
    }

    fn server_session(&self) -> Option<Arc<ClientSession>> {
        self.sessions
            .get(&SERVER_SESSION_ID)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn new_engine(&self) -> ReliableUdpEngine {
        ReliableUdpEngine::new(self.config.retry_timeout(), self.config.max_retries)
    }

    /// Creates the session, announces it and only then starts reading from it
    fn register_session(
        self: &Arc<Self>,
        client_id: i32,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Arc<ClientSession> {
        let (reader, writer) = stream.into_split();
        let (tcp_tx, tcp_rx) = mpsc::unbounded_channel();

        let session = Arc::new(ClientSession::new(client_id, peer, tcp_tx, self.new_engine()));
        self.sessions.insert(client_id, Arc::clone(&session));

        if self.role == Role::Server {
            info!("Client {} connected from {}", client_id, peer);
            self.emit(ConnectionEvent::ClientConnected(client_id));
        }

        tokio::spawn(Arc::clone(self).tcp_writer(Arc::clone(&session), writer, tcp_rx));
        tokio::spawn(Arc::clone(self).tcp_reader(Arc::clone(&session), reader));
        session
    }

    fn disconnect(&self, client_id: i32) {
        if let Some((_, session)) = self.sessions.remove(&client_id) {
            session.close();
            match self.role {
                Role::Server => info!("Client {} disconnected", client_id),
                Role::Client => info!("Disconnected from server"),
            }
            self.emit(ConnectionEvent::ClientDisconnected(client_id));
        }
    }

    fn send_datagram(&self, data: Vec<u8>, addr: SocketAddr) -> bool {
        self.udp_tx.send((data, addr)).is_ok()
    }

    fn targets_for(&self, target_id: i32) -> Vec<Arc<ClientSession>> {
        match self.role {
            Role::Client => self.server_session().into_iter().collect(),
            Role::Server if target_id == BROADCAST_TARGET => self
                .sessions
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect(),
            Role::Server => match self.sessions.get(&target_id) {
                Some(entry) => vec![Arc::clone(entry.value())],
                None => {
                    warn!("No session for client {}, packet dropped", target_id);
                    Vec::new()
                }
            },
        }
    }

    fn send_packets(&self, packets: Vec<NetworkPacket>) -> usize {
        let mut sends = 0;

        for mut packet in packets {
            let data = match packet.serialize() {
                Ok(data) => data,
                Err(e) => {
                    error!("Failed to serialize packet: {}", e);
                    continue;
                }
            };
            let target_id = packet.target_id();
            let targets = self.targets_for(target_id);

            if packet.header.packet_type.requires_tcp() {
                let mut frame = Vec::with_capacity(4 + data.len());
                frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
                frame.extend_from_slice(&data);

                for session in &targets {
                    if session.send_frame(frame.clone()) {
                        self.stats.record_tcp_sent();
                        sends += 1;
                    } else {
                        warn!("TCP send to {} failed, session closed", session.client_id());
                    }
                }
                continue;
            }

            let sequence = packet.header.sequence_number;
            let reliable = packet.is_reliable() && self.config.enable_reliable_udp;

            for session in &targets {
                if reliable {
                    session.reliable().track_packet(sequence, data.clone());
                }
                match session.udp_endpoint() {
                    Some(endpoint) => {
                        if self.send_datagram(data.clone(), endpoint) {
                            self.stats.record_udp_sent();
                            sends += 1;
                        }
                    }
                    None if target_id == BROADCAST_TARGET => {
                        trace!("Client {} has no UDP endpoint yet", session.client_id());
                    }
                    None => {
                        warn!(
                            "UDP endpoint unknown for client {}, packet {} dropped",
                            session.client_id(),
                            sequence
                        );
                    }
                }
            }
        }
        sends
    }

    /// Resends whatever the reliable engines report as due
    fn retry_pending(&self) -> usize {
        let sessions: Vec<Arc<ClientSession>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut resent = 0;
        for session in sessions {
            let engine = session.reliable();
            engine.update();
            let due = engine.get_packets_to_retry();
            let Some(endpoint) = session.udp_endpoint() else {
                continue;
            };
            for data in due {
                if self.send_datagram(data, endpoint) {
                    self.stats.record_retransmission();
                    resent += 1;
                }
            }
        }
        if resent > 0 {
            trace!("Retransmitted {} reliable packets", resent);
        }
        resent
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Could not disable Nagle for {}: {}", peer, e);
                        }
                        let client_id = self.next_client_id();
                        self.register_session(client_id, stream, peer);
                    }
                    Err(e) => {
                        error!("Failed to accept TCP connection: {}", e);
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
        debug!("Accept loop stopped");
    }

    async fn read_frame(&self, reader: &mut OwnedReadHalf, buffer: &mut Vec<u8>) -> io::Result<usize> {
        let len = reader.read_u32_le().await? as usize;
        if len == 0 || len > MAX_TCP_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid frame length {}", len),
            ));
        }
        if buffer.len() < len {
            let small = std::mem::replace(buffer, self.pool.rent_at_least(len));
            self.pool.give_back(small);
        }
        reader.read_exact(&mut buffer[..len]).await?;
        Ok(len)
    }

    async fn tcp_reader(self: Arc<Self>, session: Arc<ClientSession>, mut reader: OwnedReadHalf) {
        let client_id = session.client_id();
        let mut shutdown = self.shutdown.subscribe();
        let mut closed = session.closed_signal();
        let mut buffer = self.pool.rent();

        loop {
            if *shutdown.borrow() || session.is_closed() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = closed.changed() => break,
                frame = self.read_frame(&mut reader, &mut buffer) => match frame {
                    Ok(len) => self.handle_tcp_frame(&session, &buffer[..len]),
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        debug!("TCP stream of {} closed by peer", client_id);
                        break;
                    }
                    Err(e) => {
                        warn!("TCP read from {} failed: {}", client_id, e);
                        break;
                    }
                }
            }
        }

        self.pool.give_back(buffer);
        self.disconnect(client_id);
    }

    fn handle_tcp_frame(&self, session: &ClientSession, data: &[u8]) {
        match NetworkPacket::deserialize(data) {
            Ok(packet) => {
                self.stats.record_tcp_received();
                session.update_activity();
                self.emit(ConnectionEvent::PacketReceived {
                    packet,
                    sender_id: session.client_id(),
                });
            }
            Err(e) => {
                self.stats.record_invalid();
                warn!("Invalid TCP packet from {}: {}", session.client_id(), e);
            }
        }
    }

    async fn tcp_writer(
        self: Arc<Self>,
        session: Arc<ClientSession>,
        mut writer: OwnedWriteHalf,
        mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        let client_id = session.client_id();
        let mut shutdown = self.shutdown.subscribe();
        let mut closed = session.closed_signal();

        loop {
            if *shutdown.borrow() || session.is_closed() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = closed.changed() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = writer.write_all(&frame).await {
                            warn!("TCP write to {} failed: {}", client_id, e);
                            break;
                        }
                    }
                    None => break,
                }
            }
        }

        let _ = writer.shutdown().await;
        self.disconnect(client_id);
    }

    async fn udp_sender(
        self: Arc<Self>,
        socket: Arc<UdpSocket>,
        mut outbound: mpsc::UnboundedReceiver<Datagram>,
    ) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                datagram = outbound.recv() => match datagram {
                    Some((data, addr)) => {
                        if let Err(e) = socket.send_to(&data, addr).await {
                            error!("UDP send to {} failed: {}", addr, e);
                        }
                    }
                    None => break,
                }
            }
        }
    }

    async fn udp_server_loop(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut buffer = self.pool.rent_at_least(MAX_DATAGRAM_SIZE);

        loop {
            let (len, from) = tokio::select! {
                _ = shutdown.changed() => break,
                received = socket.recv_from(&mut buffer) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        // ICMP port-unreachable from a vanished client surfaces here
                        trace!("UDP receive error: {}", e);
                        sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                }
            };
            self.handle_server_datagram(&buffer[..len], from);
        }

        self.pool.give_back(buffer);
        debug!("UDP receive loop stopped");
    }

    fn handle_server_datagram(&self, data: &[u8], from: SocketAddr) {
        if data.len() == ACK_SIZE {
            if let Some(sequence) = decode_ack(data) {
                match self.session_by_endpoint(from) {
                    Some(session) => {
                        session.reliable().process_ack(data);
                        self.stats.record_ack_received();
                        trace!("ACK {} from client {}", sequence, session.client_id());
                    }
                    None => warn!("ACK {} from unknown endpoint {}", sequence, from),
                }
                return;
            }
        }

        if is_probe(data) {
            self.bind_probe(from);
            return;
        }

        let packet = match NetworkPacket::deserialize(data) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.record_invalid();
                warn!("Invalid UDP packet from {}: {}", from, e);
                return;
            }
        };

        let client_id = packet.sender_id();
        let Some(session) = self
            .sessions
            .get(&client_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            warn!("UDP packet from unknown client {} at {}", client_id, from);
            return;
        };

        if session.set_udp_endpoint(from) {
            info!("UDP endpoint for client {} is now {}", client_id, from);
        }
        session.update_activity();
        self.stats.record_udp_received();
        self.receive_udp_packet(&session, packet, from);
    }

    fn session_by_endpoint(&self, endpoint: SocketAddr) -> Option<Arc<ClientSession>> {
        self.sessions
            .iter()
            .find(|entry| entry.value().udp_endpoint() == Some(endpoint))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// A probe carries no id, so it only binds when exactly one unbound
    /// session shares the probe's source IP
    fn bind_probe(&self, from: SocketAddr) {
        if let Some(session) = self.session_by_endpoint(from) {
            session.update_activity();
            return;
        }

        let candidates: Vec<Arc<ClientSession>> = self
            .sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                session.udp_endpoint().is_none() && session.tcp_peer().ip() == from.ip()
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        match candidates.as_slice() {
            [session] => {
                session.set_udp_endpoint(from);
                session.update_activity();
                debug!("UDP probe bound client {} to {}", session.client_id(), from);
            }
            [] => debug!("UDP probe from {} matches no session", from),
            many => debug!(
                "UDP probe from {} is ambiguous across {} sessions",
                from,
                many.len()
            ),
        }
    }

    async fn udp_client_loop(self: Arc<Self>, socket: Arc<UdpSocket>, server_addr: SocketAddr) {
        let mut shutdown = self.shutdown.subscribe();
        let mut buffer = self.pool.rent_at_least(MAX_DATAGRAM_SIZE);

        loop {
            let (len, from) = tokio::select! {
                _ = shutdown.changed() => break,
                received = socket.recv_from(&mut buffer) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        trace!("UDP receive error: {}", e);
                        sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                }
            };
            if from != server_addr {
                trace!("Ignoring datagram from {}", from);
                continue;
            }
            self.handle_client_datagram(&buffer[..len], from);
        }

        self.pool.give_back(buffer);
    }

    fn handle_client_datagram(&self, data: &[u8], from: SocketAddr) {
        let Some(server) = self.server_session() else {
            return;
        };

        if server.reliable().process_ack(data) {
            self.stats.record_ack_received();
            return;
        }

        match NetworkPacket::deserialize(data) {
            Ok(packet) => {
                server.update_activity();
                self.stats.record_udp_received();
                self.receive_udp_packet(&server, packet, from);
            }
            Err(e) => {
                self.stats.record_invalid();
                warn!("Invalid UDP packet from server: {}", e);
            }
        }
    }

    /// Shared tail of UDP handling: heartbeat filter, ACK reply, de-duplication
    fn receive_udp_packet(&self, session: &ClientSession, packet: NetworkPacket, from: SocketAddr) {
        if packet.header.packet_type == PacketType::Heartbeat {
            trace!("Heartbeat from {}", session.client_id());
            return;
        }

        if packet.is_reliable() {
            let sequence = packet.header.sequence_number;
            if self.send_datagram(encode_ack(sequence).to_vec(), from) {
                self.stats.record_ack_sent();
            }
            if !session.accept_reliable(sequence) {
                trace!("Duplicate reliable packet {} dropped", sequence);
                return;
            }
        }

        self.emit(ConnectionEvent::PacketReceived {
            packet,
            sender_id: session.client_id(),
        });
    }

    async fn reliable_sweep(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval(RELIABLE_SWEEP_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.retry_pending();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketFlags;

    const WAIT: Duration = Duration::from_secs(3);

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    fn packet(packet_type: PacketType, client_id: i32, target: i32, seq: u32) -> NetworkPacket {
        let mut packet = NetworkPacket::new(packet_type, vec![1, 2, 3]);
        packet.header.client_id = client_id;
        packet.header.target_client_id = target;
        packet.header.sequence_number = seq;
        packet
    }

    async fn server() -> (ConnectionManager, mpsc::UnboundedReceiver<ConnectionEvent>, String) {
        let (server, events) = ConnectionManager::start_server(NetworkConfig::default(), "127.0.0.1:0")
            .await
            .unwrap();
        let addr = server.local_addr().to_string();
        (server, events, addr)
    }

    #[tokio::test]
    async fn test_accept_assigns_increasing_ids() {
        let (server, mut events, addr) = server().await;

        let (_a, _) = ConnectionManager::connect(NetworkConfig::default(), &addr).await.unwrap();
        assert!(matches!(next_event(&mut events).await, ConnectionEvent::ClientConnected(1)));
        let (_b, _) = ConnectionManager::connect(NetworkConfig::default(), &addr).await.unwrap();
        assert!(matches!(next_event(&mut events).await, ConnectionEvent::ClientConnected(2)));

        assert_eq!(server.session_ids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_tcp_packet_reaches_server_with_session_id() {
        let (_server, mut events, addr) = server().await;
        let (client, _) = ConnectionManager::connect(NetworkConfig::default(), &addr).await.unwrap();
        next_event(&mut events).await;

        let sent = client.send_packets(vec![packet(PacketType::Handshake, -1, -1, 1)]);
        assert_eq!(sent, 1);

        match next_event(&mut events).await {
            ConnectionEvent::PacketReceived { packet, sender_id } => {
                assert_eq!(sender_id, 1);
                assert_eq!(packet.header.packet_type, PacketType::Handshake);
                assert_eq!(packet.payload, vec![1, 2, 3]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reliable_udp_is_acked() {
        let (server, mut events, addr) = server().await;
        let (client, _) = ConnectionManager::connect(NetworkConfig::default(), &addr).await.unwrap();
        next_event(&mut events).await;

        let mut reliable = packet(PacketType::GameData, 1, -1, 77);
        reliable.header.flags = PacketFlags::RELIABLE;
        assert_eq!(client.send_packets(vec![reliable]), 1);

        match next_event(&mut events).await {
            ConnectionEvent::PacketReceived { packet, sender_id } => {
                assert_eq!(sender_id, 1);
                assert_eq!(packet.header.sequence_number, 77);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let engine_drained = async {
            loop {
                let pending = client
                    .session(SERVER_SESSION_ID)
                    .map(|s| s.reliable().pending_count())
                    .unwrap_or(0);
                if pending == 0 {
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
        };
        timeout(WAIT, engine_drained).await.unwrap();
        assert!(server.statistics().acks_sent >= 1);
        assert!(server.session(1).unwrap().udp_endpoint().is_some());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_session_once() {
        let (server, mut events, addr) = server().await;
        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(ConnectionManager::connect(NetworkConfig::default(), &addr).await.unwrap());
            next_event(&mut events).await;
        }

        let sent = server.send_packets(vec![packet(PacketType::PlayerLifecycle, 0, -1, 5)]);
        assert_eq!(sent, 3);

        for (_, client_events) in clients.iter_mut() {
            match next_event(client_events).await {
                ConnectionEvent::PacketReceived { sender_id, .. } => assert_eq!(sender_id, 0),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_unicast_to_unknown_client_is_dropped() {
        let (server, _events, _addr) = server().await;
        assert_eq!(
            server.send_packets(vec![packet(PacketType::PlayerLifecycle, 0, 42, 1)]),
            0
        );
    }

    #[tokio::test]
    async fn test_client_close_disconnects_session() {
        let (server, mut events, addr) = server().await;
        let (client, _) = ConnectionManager::connect(NetworkConfig::default(), &addr).await.unwrap();
        next_event(&mut events).await;

        client.shutdown();
        drop(client);

        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::ClientDisconnected(1)
        ));
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_failed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        match ConnectionManager::connect(NetworkConfig::default(), &addr).await {
            Err(e) => assert!(!e.is_recoverable()),
            Ok(_) => panic!("connected to a closed port"),
        }
    }

    #[tokio::test]
    async fn test_bind_conflict_is_server_start_failed() {
        let (server, _events, _) = server().await;
        let addr = server.local_addr().to_string();
        match ConnectionManager::start_server(NetworkConfig::default(), &addr).await {
            Err(e) => assert!(matches!(e, NetworkError::ServerStartFailed(_))),
            Ok(_) => panic!("second bind on the same port succeeded"),
        }
    }
}
