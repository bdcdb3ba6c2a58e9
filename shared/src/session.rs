//! One connected peer as seen by the connection manager
//!
//! On the server there is one session per accepted client. On the client the
//! server itself is modelled as a session with id 0.

use crate::reliable::ReliableUdpEngine;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// Id under which the server appears to its clients
pub const SERVER_SESSION_ID: i32 = 0;

/// How many reliable sequence numbers are remembered for duplicate detection
const RECEIVED_RELIABLE_WINDOW: usize = 512;

pub struct ClientSession {
    client_id: i32,
    tcp_peer: SocketAddr,
    tcp_tx: mpsc::UnboundedSender<Vec<u8>>,
    udp_endpoint: RwLock<Option<SocketAddr>>,
    reliable: ReliableUdpEngine,
    received_reliable: Mutex<VecDeque<u32>>,
    connected_at: Instant,
    last_activity: Mutex<Instant>,
    closed: watch::Sender<bool>,
}

impl ClientSession {
    /// Creates a session whose outbound TCP frames are pushed into `tcp_tx`
    pub fn new(
        client_id: i32,
        tcp_peer: SocketAddr,
        tcp_tx: mpsc::UnboundedSender<Vec<u8>>,
        reliable: ReliableUdpEngine,
    ) -> Self {
        let now = Instant::now();
        let (closed, _) = watch::channel(false);
        debug!("Session {} created for {}", client_id, tcp_peer);

        Self {
            client_id,
            tcp_peer,
            tcp_tx,
            udp_endpoint: RwLock::new(None),
            reliable,
            received_reliable: Mutex::new(VecDeque::with_capacity(RECEIVED_RELIABLE_WINDOW)),
            connected_at: now,
            last_activity: Mutex::new(now),
            closed,
        }
    }

    pub fn client_id(&self) -> i32 {
        self.client_id
    }

    pub fn tcp_peer(&self) -> SocketAddr {
        self.tcp_peer
    }

    pub fn udp_endpoint(&self) -> Option<SocketAddr> {
        *self.udp_endpoint.read()
    }

    /// Binds or rebinds the UDP endpoint; returns true if it changed
    pub fn set_udp_endpoint(&self, addr: SocketAddr) -> bool {
        let mut endpoint = self.udp_endpoint.write();
        if *endpoint == Some(addr) {
            return false;
        }
        *endpoint = Some(addr);
        true
    }

    pub fn reliable(&self) -> &ReliableUdpEngine {
        &self.reliable
    }

    /// Records an inbound reliable sequence; false if it was already seen
    pub fn accept_reliable(&self, sequence_number: u32) -> bool {
        let mut received = self.received_reliable.lock();
        if received.contains(&sequence_number) {
            return false;
        }
        if received.len() == RECEIVED_RELIABLE_WINDOW {
            received.pop_front();
        }
        received.push_back(sequence_number);
        true
    }

    pub fn update_activity(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Queues a length-prefixed frame for the session's TCP writer
    pub fn send_frame(&self, frame: Vec<u8>) -> bool {
        !self.is_closed() && self.tcp_tx.send(frame).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Stops the session's I/O loops and forgets in-flight reliable packets
    pub fn close(&self) {
        self.reliable.clear();
        self.received_reliable.lock().clear();
        self.closed.send_replace(true);
        debug!("Session {} closed", self.client_id);
    }
}
