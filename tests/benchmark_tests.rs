//! Performance benchmarks for critical game systems
//!
//! Thresholds are loose enough for unoptimized test builds; they catch
//! accidental quadratic behaviour, not small regressions.

use client::game::ClientGameState;
use parking_lot::Mutex;
use server::physics::StaticWorld;
use server::ServerSimulation;
use shared::packet::encode_ack;
use shared::reliable::ReliableUdpEngine;
use shared::utils::rotate_xor_checksum;
use shared::{
    FireMessage, HandshakeMessage, MessageRouter, MessageSink, MessageType, NetworkConfig,
    NetworkMessage, NetworkPacket, PacketProcessor, PlayerInputMessage, PlayerStateMessage, Vec2,
    Vec3,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct DiscardSink {
    sent: Mutex<usize>,
}

impl MessageSink for DiscardSink {
    fn send(&self, _message: NetworkMessage) {
        *self.sent.lock() += 1;
    }
}

fn report(name: &str, iterations: usize, duration: Duration) {
    println!(
        "{}: {} iterations in {:?} ({:.2} μs/iter)",
        name,
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );
}

/// Benchmarks the full message -> packet -> bytes -> packet -> message path
#[test]
fn benchmark_state_message_pipeline() {
    let processor = PacketProcessor::new(&NetworkConfig::default());
    let message = NetworkMessage::new(PlayerStateMessage {
        player_id: 3,
        position: Vec3::new(1.0, 0.0, 2.0),
        velocity: Vec3::new(7.0, 0.0, 0.0),
        health: 75.0,
        is_alive: true,
        last_processed_input: 1234,
        ..PlayerStateMessage::default()
    });

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        for mut packet in processor.create_packets(&message).unwrap() {
            let bytes = packet.serialize().unwrap();
            let decoded = NetworkPacket::deserialize(&bytes).unwrap();
            let _ = processor.process_packet(decoded).unwrap();
        }
    }

    let duration = start.elapsed();
    report("State message pipeline", iterations, duration);

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks fragmentation and reassembly of an oversized message
#[test]
fn benchmark_large_message_fragmentation() {
    let processor = PacketProcessor::new(&NetworkConfig::default());
    let message = NetworkMessage::new(HandshakeMessage {
        client_version: "v".repeat(1000),
        player_name: "n".repeat(1000),
    });

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let packets = processor.create_packets(&message).unwrap();
        assert!(packets.len() >= 2);

        let mut reassembled = None;
        for mut packet in packets {
            let bytes = packet.serialize().unwrap();
            reassembled = processor
                .process_packet(NetworkPacket::deserialize(&bytes).unwrap())
                .unwrap();
        }
        assert_eq!(reassembled.as_ref(), Some(&message));
    }

    let duration = start.elapsed();
    report("Fragmentation round trip", iterations, duration);
    assert_eq!(processor.pending_fragment_groups(), 0);

    // Should complete in under 3 seconds
    assert!(duration.as_millis() < 3000);
}

/// Benchmarks checksum computation over a full-size packet
#[test]
fn benchmark_checksum() {
    let data: Vec<u8> = (0..1400).map(|i| (i % 251) as u8).collect();

    let iterations = 100_000;
    let start = Instant::now();

    let mut acc = 0u32;
    for _ in 0..iterations {
        acc ^= rotate_xor_checksum(&data);
    }

    let duration = start.elapsed();
    report("Checksum (1400 bytes)", iterations, duration);
    assert_eq!(acc, 0);

    // Should complete in under 3 seconds
    assert!(duration.as_millis() < 3000);
}

/// Stress tests reliable tracking with thousands of packets in flight
#[test]
fn stress_test_reliable_tracking() {
    let engine = ReliableUdpEngine::new(Duration::from_millis(200), 5);
    let count = 5_000u32;

    let start = Instant::now();
    for seq in 0..count {
        engine.track_packet(seq, vec![0u8; 64]);
    }
    for seq in 0..count {
        assert!(engine.process_ack(&encode_ack(seq)));
    }
    let duration = start.elapsed();
    report("Reliable track+ack", count as usize, duration);

    assert_eq!(engine.pending_count(), 0);

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks router dispatch with several handlers per type
#[test]
fn benchmark_router_dispatch() {
    let router = MessageRouter::new();
    let hits = Arc::new(Mutex::new(0usize));
    for _ in 0..4 {
        let hits = Arc::clone(&hits);
        router.register(MessageType::PlayerInput, move |_, _| {
            *hits.lock() += 1;
            Ok(())
        });
    }
    let message = NetworkMessage::new(PlayerInputMessage::default());

    let iterations = 100_000;
    let start = Instant::now();
    for _ in 0..iterations {
        router.route_message(&message, 1);
    }
    let duration = start.elapsed();
    report("Router dispatch", iterations, duration);

    assert_eq!(*hits.lock(), iterations * 4);

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks the server frame with a full lobby and bullets in the air
#[test]
fn benchmark_server_simulation() {
    let sink = Arc::new(DiscardSink {
        sent: Mutex::new(0),
    });
    let simulation = Arc::new(ServerSimulation::new(
        NetworkConfig::default(),
        sink.clone(),
        Arc::new(StaticWorld::arena()),
    ));
    let router = MessageRouter::new();
    simulation.register_handlers(&router);

    for id in 1..=16 {
        simulation.on_client_connected(id);
    }
    for id in 1..=16 {
        router.route_message(
            &NetworkMessage::new(FireMessage {
                fire_position: Vec3::new(0.0, 0.0, id as f32),
                fire_direction: Vec3::new(1.0, 0.0, 0.0),
                damage: 1.0,
                bullet_speed: 5.0,
            }),
            id,
        );
    }

    let frames = 1_000;
    let start = Instant::now();
    for frame in 0..frames {
        for id in 1..=16 {
            let input = PlayerInputMessage {
                move_input: Vec2::new(0.0, 0.0),
                mouse_world_position: Vec3::ZERO,
                attack_pressed: false,
                sequence_number: frame as u32 + 1,
            };
            router.route_message(&NetworkMessage::new(input), id);
        }
        simulation.update(0.05);
    }
    let duration = start.elapsed();
    report("Server frame (16 players)", frames, duration);

    assert!(*sink.sent.lock() > 0);

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks client reconciliation with a backlog of unconfirmed inputs
#[test]
fn benchmark_reconciliation_performance() {
    let config = NetworkConfig::default();
    let mut game = ClientGameState::new(&config);
    game.set_local_id(1);
    game.apply_server_state(&PlayerStateMessage {
        player_id: 1,
        health: 100.0,
        is_alive: true,
        ..PlayerStateMessage::default()
    });

    let iterations = 10_000u32;
    let start = Instant::now();
    for seq in 1..=iterations {
        game.apply_prediction(&PlayerInputMessage {
            move_input: Vec2::new(1.0, 0.0),
            sequence_number: seq,
            ..PlayerInputMessage::default()
        });
        game.update(config.client_timestep());

        // Server lags ten inputs behind
        if seq > 10 {
            game.apply_server_state(&PlayerStateMessage {
                player_id: 1,
                position: Vec3::new(0.35 * (seq - 10) as f32, 0.0, 0.0),
                health: 100.0,
                is_alive: true,
                last_processed_input: seq - 10,
                ..PlayerStateMessage::default()
            });
        }
    }
    let duration = start.elapsed();
    report("Reconciliation", iterations as usize, duration);

    assert_eq!(game.pending_input_count(), 10);

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}
