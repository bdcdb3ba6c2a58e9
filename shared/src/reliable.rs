//! Per-peer tracker of in-flight reliable datagrams
//!
//! A tracked packet is either acknowledged, retried verbatim (same sequence
//! number, same bytes) up to `max_retries` times, or dropped as lost. Loss is
//! logged and otherwise silent; periodic full-state broadcasts heal it.

use crate::packet::decode_ack;
use log::{trace, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// How many recently acknowledged sequence numbers are remembered
const ACKNOWLEDGED_WINDOW: usize = 256;

#[derive(Debug)]
struct PendingPacket {
    data: Vec<u8>,
    last_send: Instant,
    retry_count: u32,
}

#[derive(Debug, Default)]
struct EngineState {
    pending: HashMap<u32, PendingPacket>,
    acknowledged: VecDeque<u32>,
}

#[derive(Debug)]
pub struct ReliableUdpEngine {
    state: Mutex<EngineState>,
    retry_timeout: Duration,
    max_retries: u32,
}

impl Default for ReliableUdpEngine {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_TIMEOUT, DEFAULT_MAX_RETRIES)
    }
}

impl ReliableUdpEngine {
    pub fn new(retry_timeout: Duration, max_retries: u32) -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            retry_timeout,
            max_retries,
        }
    }

    pub fn track_packet(&self, sequence_number: u32, data: Vec<u8>) {
        self.track_packet_at(sequence_number, data, Instant::now());
    }

    pub fn track_packet_at(&self, sequence_number: u32, data: Vec<u8>, now: Instant) {
        trace!("Tracking reliable packet {}", sequence_number);
        self.state.lock().pending.insert(
            sequence_number,
            PendingPacket {
                data,
                last_send: now,
                retry_count: 0,
            },
        );
    }

    /// Consumes an ACK datagram; returns false if `data` is not an ACK at all
    ///
    /// Acknowledging an unknown or already acknowledged sequence is a no-op.
    pub fn process_ack(&self, data: &[u8]) -> bool {
        let Some(sequence_number) = decode_ack(data) else {
            return false;
        };

        let mut state = self.state.lock();
        if state.pending.remove(&sequence_number).is_some() {
            trace!("Packet {} acknowledged", sequence_number);
            if state.acknowledged.len() == ACKNOWLEDGED_WINDOW {
                state.acknowledged.pop_front();
            }
            state.acknowledged.push_back(sequence_number);
        }
        true
    }

    /// Drops packets that timed out with no retries left
    pub fn update(&self) {
        self.update_at(Instant::now());
    }

    pub fn update_at(&self, now: Instant) {
        let retry_timeout = self.retry_timeout;
        let max_retries = self.max_retries;

        self.state.lock().pending.retain(|seq, packet| {
            let expired = now.saturating_duration_since(packet.last_send) > retry_timeout;
            if expired && packet.retry_count >= max_retries {
                warn!(
                    "Reliable packet {} lost after {} retries",
                    seq, packet.retry_count
                );
                return false;
            }
            true
        });
    }

    /// Returns packets due for resend, stamping them as just sent
    pub fn get_packets_to_retry(&self) -> Vec<Vec<u8>> {
        self.get_packets_to_retry_at(Instant::now())
    }

    pub fn get_packets_to_retry_at(&self, now: Instant) -> Vec<Vec<u8>> {
        let mut state = self.state.lock();
        let mut due = Vec::new();

        for (seq, packet) in state.pending.iter_mut() {
            let expired = now.saturating_duration_since(packet.last_send) > self.retry_timeout;
            if expired && packet.retry_count < self.max_retries {
                packet.last_send = now;
                packet.retry_count += 1;
                trace!("Retrying packet {} (attempt {})", seq, packet.retry_count);
                due.push(packet.data.clone());
            }
        }
        due
    }

    pub fn is_acknowledged(&self, sequence_number: u32) -> bool {
        self.state.lock().acknowledged.contains(&sequence_number)
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.acknowledged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::encode_ack;

    const TICK: Duration = Duration::from_millis(50);

    /// Drives the engine the way the sweep task does and counts resends
    fn sweep(engine: &ReliableUdpEngine, now: Instant) -> usize {
        engine.update_at(now);
        engine.get_packets_to_retry_at(now).len()
    }

    #[test]
    fn test_unacked_packet_is_retried_max_times_then_dropped() {
        let engine = ReliableUdpEngine::default();
        let start = Instant::now();
        engine.track_packet_at(1, vec![0xAA; 30], start);

        let mut retry_times = Vec::new();
        for step in 1..=60 {
            let now = start + TICK * step;
            if sweep(&engine, now) > 0 {
                retry_times.push(now);
            }
        }

        assert_eq!(retry_times.len(), DEFAULT_MAX_RETRIES as usize);
        assert!(retry_times[0] - start > DEFAULT_RETRY_TIMEOUT);
        for pair in retry_times.windows(2) {
            assert!(pair[1] - pair[0] >= DEFAULT_RETRY_TIMEOUT);
        }
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_retry_resends_identical_bytes() {
        let engine = ReliableUdpEngine::default();
        let start = Instant::now();
        engine.track_packet_at(5, vec![1, 2, 3], start);

        let resent = engine.get_packets_to_retry_at(start + Duration::from_millis(250));
        assert_eq!(resent, vec![vec![1, 2, 3]]);
        assert!(engine
            .get_packets_to_retry_at(start + Duration::from_millis(300))
            .is_empty());
    }

    #[test]
    fn test_ack_halts_retries() {
        let engine = ReliableUdpEngine::default();
        let start = Instant::now();
        engine.track_packet_at(9, vec![7; 10], start);

        assert_eq!(sweep(&engine, start + Duration::from_millis(250)), 1);
        assert_eq!(sweep(&engine, start + Duration::from_millis(500)), 1);

        assert!(engine.process_ack(&encode_ack(9)));
        assert!(engine.is_acknowledged(9));

        for step in 11..40 {
            assert_eq!(sweep(&engine, start + TICK * step), 0);
        }
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_ack_is_noop() {
        let engine = ReliableUdpEngine::default();
        engine.track_packet(3, vec![1]);
        engine.track_packet(4, vec![2]);

        let ack = encode_ack(3);
        assert!(engine.process_ack(&ack));
        assert_eq!(engine.pending_count(), 1);
        assert!(engine.process_ack(&ack));
        assert_eq!(engine.pending_count(), 1);
        assert!(engine.is_acknowledged(3));
    }

    #[test]
    fn test_non_ack_bytes_are_reported() {
        let engine = ReliableUdpEngine::default();
        engine.track_packet(3, vec![1]);
        assert!(!engine.process_ack(&[0x48, 0x49]));
        assert!(!engine.process_ack(&[0u8; 8]));
        assert_eq!(engine.pending_count(), 1);
    }

    #[test]
    fn test_not_due_before_timeout() {
        let engine = ReliableUdpEngine::new(Duration::from_millis(100), 2);
        let start = Instant::now();
        engine.track_packet_at(1, vec![1], start);
        assert!(engine
            .get_packets_to_retry_at(start + Duration::from_millis(100))
            .is_empty());
        assert_eq!(
            engine
                .get_packets_to_retry_at(start + Duration::from_millis(101))
                .len(),
            1
        );
    }

    #[test]
    fn test_clear() {
        let engine = ReliableUdpEngine::default();
        engine.track_packet(1, vec![1]);
        engine.process_ack(&encode_ack(1));
        engine.track_packet(2, vec![2]);
        engine.clear();
        assert_eq!(engine.pending_count(), 0);
        assert!(!engine.is_acknowledged(1));
    }
}
