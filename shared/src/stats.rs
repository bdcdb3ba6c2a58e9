use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Transport counters, updated from every I/O task
#[derive(Debug, Default)]
pub struct NetworkStatistics {
    tcp_packets_sent: AtomicU64,
    tcp_packets_received: AtomicU64,
    udp_packets_sent: AtomicU64,
    udp_packets_received: AtomicU64,
    retransmissions: AtomicU64,
    acks_sent: AtomicU64,
    acks_received: AtomicU64,
    invalid_packets: AtomicU64,
}

/// Point-in-time copy of [`NetworkStatistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub tcp_packets_sent: u64,
    pub tcp_packets_received: u64,
    pub udp_packets_sent: u64,
    pub udp_packets_received: u64,
    pub retransmissions: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub invalid_packets: u64,
}

macro_rules! counter {
    ($($record:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $record(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl NetworkStatistics {
    counter! {
        record_tcp_sent => tcp_packets_sent,
        record_tcp_received => tcp_packets_received,
        record_udp_sent => udp_packets_sent,
        record_udp_received => udp_packets_received,
        record_retransmission => retransmissions,
        record_ack_sent => acks_sent,
        record_ack_received => acks_received,
        record_invalid => invalid_packets,
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            tcp_packets_sent: self.tcp_packets_sent.load(Ordering::Relaxed),
            tcp_packets_received: self.tcp_packets_received.load(Ordering::Relaxed),
            udp_packets_sent: self.udp_packets_sent.load(Ordering::Relaxed),
            udp_packets_received: self.udp_packets_received.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            invalid_packets: self.invalid_packets.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = NetworkStatistics::default();
        stats.record_udp_sent();
        stats.record_udp_sent();
        stats.record_invalid();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.udp_packets_sent, 2);
        assert_eq!(snapshot.invalid_packets, 1);
        assert_eq!(snapshot.tcp_packets_sent, 0);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"udp_packets_sent\":2"));
    }
}
