//! Network service: the game-facing side of the transport
//!
//! I/O tasks decode packets and push the resulting messages onto an unbounded
//! queue. The simulation thread drains that queue once per tick through
//! [`NetworkService::process_incoming`], which routes at most
//! `max_messages_per_frame` messages and leaves the rest, in arrival order,
//! for later ticks.
//!
//! A client has no id until the server's first Handshake names one in its
//! target field. Every outbound packet is stamped with the local id (0 on the
//! server, -1 before assignment on a client).

use crate::config::{NetworkConfig, QUEUE_BACKLOG_WARNING};
use crate::connection::{ConnectionEvent, ConnectionManager, Role};
use crate::error::Result;
use crate::message::{MessageType, NetworkMessage};
use crate::packet::{NetworkPacket, PacketType};
use crate::processor::PacketProcessor;
use crate::router::MessageRouter;
use crate::session::SERVER_SESSION_ID;
use crate::stats::StatisticsSnapshot;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::interval;

/// How often a client refreshes its UDP endpoint with the server
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

const UNASSIGNED_CLIENT_ID: i32 = -1;

/// Lifecycle notifications for the game layer, drained with [`NetworkService::poll_events`]
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    ClientConnected(i32),
    ClientDisconnected(i32),
    ConnectionFailed(String),
    LocalIdAssigned(i32),
}

/// Anything game logic can hand an outbound message to
pub trait MessageSink: Send + Sync {
    fn send(&self, message: NetworkMessage);
}

#[derive(Debug, Clone)]
struct ReceivedMessage {
    message: NetworkMessage,
    sender_id: i32,
}

/// Decode side shared between the service and its pump task
struct InboundPipeline {
    processor: Arc<PacketProcessor>,
    local_client_id: AtomicI32,
    is_client: AtomicBool,
    messages: Sender<ReceivedMessage>,
    events: Sender<NetworkEvent>,
    id_assigned: Notify,
}

impl InboundPipeline {
    fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::PacketReceived { packet, sender_id } => {
                self.handle_packet(packet, sender_id)
            }
            ConnectionEvent::ClientConnected(id) => {
                let _ = self.events.send(NetworkEvent::ClientConnected(id));
            }
            ConnectionEvent::ClientDisconnected(id) => {
                let _ = self.events.send(NetworkEvent::ClientDisconnected(id));
            }
        }
    }

    fn handle_packet(&self, packet: NetworkPacket, sender_id: i32) {
        let message = match self.processor.process_packet(packet) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                warn!(
                    "Dropping packet from {} ({:?}): {}",
                    sender_id,
                    e.code(),
                    e
                );
                return;
            }
        };

        self.assign_identity(&message, sender_id);
        let _ = self.messages.send(ReceivedMessage { message, sender_id });
    }

    /// Adopts the id from the server's first Handshake; later ones are ignored
    fn assign_identity(&self, message: &NetworkMessage, sender_id: i32) {
        if !self.is_client.load(Ordering::Acquire)
            || message.message_type() != MessageType::Handshake
            || sender_id != SERVER_SESSION_ID
            || message.target_id <= 0
        {
            return;
        }

        let assigned = self.local_client_id.compare_exchange(
            UNASSIGNED_CLIENT_ID,
            message.target_id,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if assigned.is_ok() {
            info!("Assigned local client id {}", message.target_id);
            let _ = self
                .events
                .send(NetworkEvent::LocalIdAssigned(message.target_id));
            self.id_assigned.notify_one();
        }
    }
}

struct ActiveConnection {
    connection: Arc<ConnectionManager>,
    stop: watch::Sender<bool>,
}

pub struct NetworkService {
    config: NetworkConfig,
    router: Arc<MessageRouter>,
    inbound: Arc<InboundPipeline>,
    inbound_rx: Receiver<ReceivedMessage>,
    events_rx: Receiver<NetworkEvent>,
    active: RwLock<Option<ActiveConnection>>,
}

impl NetworkService {
    pub fn new(config: NetworkConfig, router: Arc<MessageRouter>) -> Self {
        let (messages, inbound_rx) = unbounded();
        let (events, events_rx) = unbounded();

        let inbound = Arc::new(InboundPipeline {
            processor: Arc::new(PacketProcessor::new(&config)),
            local_client_id: AtomicI32::new(UNASSIGNED_CLIENT_ID),
            is_client: AtomicBool::new(false),
            messages,
            events,
            id_assigned: Notify::new(),
        });

        Self {
            config,
            router,
            inbound,
            inbound_rx,
            events_rx,
            active: RwLock::new(None),
        }
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Starts listening; the server's own id is 0
    pub async fn start_server(&self, addr: &str) -> Result<SocketAddr> {
        if let Some(existing) = self.local_addr() {
            warn!("Already running on {}", existing);
            return Ok(existing);
        }

        let (connection, events) =
            match ConnectionManager::start_server(self.config.clone(), addr).await {
                Ok(started) => started,
                Err(e) => {
                    let _ = self
                        .inbound
                        .events
                        .send(NetworkEvent::ConnectionFailed(format!("Server start failed: {}", e)));
                    return Err(e);
                }
            };

        self.inbound.is_client.store(false, Ordering::Release);
        self.inbound.local_client_id.store(SERVER_SESSION_ID, Ordering::Release);

        let local_addr = connection.local_addr();
        self.activate(connection, events);
        info!("Network service running as server on {}", local_addr);
        Ok(local_addr)
    }

    /// Connects to a server; the local id arrives later with the server's Handshake
    pub async fn connect(&self, addr: &str) -> Result<()> {
        if self.is_connected() {
            warn!("Already connected");
            return Ok(());
        }

        let (connection, events) = match ConnectionManager::connect(self.config.clone(), addr).await
        {
            Ok(connected) => connected,
            Err(e) => {
                let _ = self
                    .inbound
                    .events
                    .send(NetworkEvent::ConnectionFailed(format!("Connection failed: {}", e)));
                return Err(e);
            }
        };

        self.inbound.is_client.store(true, Ordering::Release);
        self.inbound
            .local_client_id
            .store(UNASSIGNED_CLIENT_ID, Ordering::Release);

        self.activate(connection, events);
        info!("Connected to {}, waiting for id assignment", addr);
        Ok(())
    }

    fn activate(
        &self,
        connection: ConnectionManager,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        let connection = Arc::new(connection);
        let (stop, stop_rx) = watch::channel(false);

        tokio::spawn(pump_events(
            Arc::clone(&self.inbound),
            events,
            stop_rx.clone(),
        ));
        if connection.role() == Role::Client {
            tokio::spawn(send_heartbeats(
                Arc::clone(&self.inbound),
                Arc::clone(&connection),
                stop_rx,
            ));
        }

        *self.active.write() = Some(ActiveConnection { connection, stop });
    }

    pub fn is_connected(&self) -> bool {
        self.active.read().is_some()
    }

    pub fn is_server(&self) -> bool {
        self.active
            .read()
            .as_ref()
            .is_some_and(|active| active.connection.role() == Role::Server)
    }

    pub fn local_client_id(&self) -> i32 {
        self.inbound.local_client_id.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active
            .read()
            .as_ref()
            .map(|active| active.connection.local_addr())
    }

    pub fn connected_clients(&self) -> Vec<i32> {
        self.active
            .read()
            .as_ref()
            .map(|active| active.connection.session_ids())
            .unwrap_or_default()
    }

    /// Packs, stamps and sends one message; returns the number of transport sends
    pub fn send_message(&self, message: &NetworkMessage) -> usize {
        let active = self.active.read();
        let Some(active) = active.as_ref() else {
            warn!("Cannot send {:?}: not connected", message.message_type());
            return 0;
        };

        let mut packets = match self.inbound.processor.create_packets(message) {
            Ok(packets) => packets,
            Err(e) => {
                warn!("Failed to create packets for {:?}: {}", message.message_type(), e);
                return 0;
            }
        };

        let local_id = self.local_client_id();
        for packet in &mut packets {
            packet.header.client_id = local_id;
        }
        active.connection.send_packets(packets)
    }

    /// Routes up to `max_messages_per_frame` queued messages; returns how many were routed
    pub fn process_incoming(&self) -> usize {
        let mut routed = 0;
        while routed < self.config.max_messages_per_frame {
            let Ok(received) = self.inbound_rx.try_recv() else {
                break;
            };
            self.router
                .route_message(&received.message, received.sender_id);
            routed += 1;
        }

        let backlog = self.inbound_rx.len();
        if backlog > QUEUE_BACKLOG_WARNING {
            warn!("Message queue backlog: {} messages", backlog);
        }
        routed
    }

    pub fn pending_messages(&self) -> usize {
        self.inbound_rx.len()
    }

    pub fn poll_events(&self) -> Vec<NetworkEvent> {
        self.events_rx.try_iter().collect()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.active
            .read()
            .as_ref()
            .map(|active| active.connection.statistics())
            .unwrap_or_default()
    }

    /// Stops all tasks and resets identity; safe to call when not connected
    pub fn disconnect(&self) {
        let Some(active) = self.active.write().take() else {
            return;
        };

        info!("Disconnecting");
        active.stop.send_replace(true);
        active.connection.shutdown();
        self.inbound
            .local_client_id
            .store(UNASSIGNED_CLIENT_ID, Ordering::Release);
        self.inbound.processor.clear();
        info!("Disconnected");
    }
}

impl MessageSink for NetworkService {
    fn send(&self, message: NetworkMessage) {
        self.send_message(&message);
    }
}

impl Drop for NetworkService {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn pump_events(
    inbound: Arc<InboundPipeline>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            event = events.recv() => match event {
                Some(event) => inbound.handle_event(event),
                None => break,
            }
        }
    }
    debug!("Event pump stopped");
}

/// Keeps the server's view of this client's UDP endpoint fresh
async fn send_heartbeats(
    inbound: Arc<InboundPipeline>,
    connection: Arc<ConnectionManager>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = inbound.id_assigned.notified() => {}
            _ = ticker.tick() => {}
        }

        let local_id = inbound.local_client_id.load(Ordering::Acquire);
        if local_id <= 0 {
            continue;
        }
        let mut heartbeat = NetworkPacket::new(PacketType::Heartbeat, Vec::new());
        heartbeat.header.client_id = local_id;
        connection.send_packets(vec![heartbeat]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HandshakeMessage, PlayerLeftMessage};
    use parking_lot::Mutex;

    fn service(max_per_frame: usize) -> NetworkService {
        let config = NetworkConfig {
            max_messages_per_frame: max_per_frame,
            ..NetworkConfig::default()
        };
        NetworkService::new(config, Arc::new(MessageRouter::new()))
    }

    fn packet_for(service: &NetworkService, message: &NetworkMessage) -> NetworkPacket {
        service
            .inbound
            .processor
            .create_packets(message)
            .unwrap()
            .remove(0)
    }

    #[test]
    fn test_bounded_drain_keeps_arrival_order() {
        let service = service(10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        service
            .router()
            .register(MessageType::PlayerLeft, move |message, _| {
                if let crate::message::MessageBody::PlayerLeft(left) = &message.body {
                    record.lock().push(left.player_id);
                }
                Ok(())
            });

        for id in 0..25 {
            let message = NetworkMessage::new(PlayerLeftMessage { player_id: id });
            let packet = packet_for(&service, &message);
            service.inbound.handle_packet(packet, 1);
        }
        assert_eq!(service.pending_messages(), 25);

        assert_eq!(service.process_incoming(), 10);
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
        assert_eq!(service.process_incoming(), 10);
        assert_eq!(service.process_incoming(), 5);
        assert_eq!(service.process_incoming(), 0);
        assert_eq!(*seen.lock(), (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_first_server_handshake_assigns_id() {
        let service = service(10);
        service.inbound.is_client.store(true, Ordering::Release);

        let reply = NetworkMessage::to(3, HandshakeMessage::default());
        service
            .inbound
            .handle_packet(packet_for(&service, &reply), SERVER_SESSION_ID);
        assert_eq!(service.local_client_id(), 3);
        assert_eq!(service.poll_events(), vec![NetworkEvent::LocalIdAssigned(3)]);

        // Replaying or receiving a different id changes nothing
        let replay = NetworkMessage::to(3, HandshakeMessage::default());
        service
            .inbound
            .handle_packet(packet_for(&service, &replay), SERVER_SESSION_ID);
        let other = NetworkMessage::to(8, HandshakeMessage::default());
        service
            .inbound
            .handle_packet(packet_for(&service, &other), SERVER_SESSION_ID);
        assert_eq!(service.local_client_id(), 3);
        assert!(service.poll_events().is_empty());

        // The handshakes are still delivered to handlers
        assert_eq!(service.pending_messages(), 3);
    }

    #[test]
    fn test_handshake_from_non_server_is_ignored() {
        let service = service(10);
        service.inbound.is_client.store(true, Ordering::Release);

        let forged = NetworkMessage::to(5, HandshakeMessage::default());
        service.inbound.handle_packet(packet_for(&service, &forged), 2);
        assert_eq!(service.local_client_id(), UNASSIGNED_CLIENT_ID);
    }

    #[test]
    fn test_server_never_adopts_handshake_id() {
        let service = service(10);
        service.inbound.local_client_id.store(0, Ordering::Release);

        let message = NetworkMessage::to(4, HandshakeMessage::default());
        service
            .inbound
            .handle_packet(packet_for(&service, &message), SERVER_SESSION_ID);
        assert_eq!(service.local_client_id(), 0);
    }

    #[test]
    fn test_corrupt_packet_is_dropped() {
        let service = service(10);
        let packet = NetworkPacket::new(PacketType::GameData, vec![250, 0, 0]);
        service.inbound.handle_packet(packet, 1);
        assert_eq!(service.pending_messages(), 0);
    }

    #[test]
    fn test_send_without_connection_is_noop() {
        let service = service(10);
        let message = NetworkMessage::new(PlayerLeftMessage { player_id: 1 });
        assert_eq!(service.send_message(&message), 0);
        assert!(!service.is_connected());
        service.disconnect();
    }

    #[test]
    fn test_failed_connect_raises_event() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let service = service(10);
        tokio_test::assert_err!(tokio_test::block_on(service.connect(&addr)));
        assert!(matches!(
            service.poll_events().as_slice(),
            [NetworkEvent::ConnectionFailed(_)]
        ));
        assert!(!service.is_connected());
    }
}
