//! Conversion between typed messages and wire packets
//!
//! Outbound: serialize, optionally gzip, then emit one packet or a run of
//! fragments. Inbound: reassemble fragments, inflate, decode.

use crate::config::{NetworkConfig, MAX_PAYLOAD_SIZE};
use crate::error::{NetworkError, Result};
use crate::fragment::{FragmentReassembler, MAX_FRAGMENTS_PER_GROUP};
use crate::message::{MessageType, NetworkMessage};
use crate::packet::{NetworkPacket, PacketFlags, PacketType};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};

/// Inflated payloads larger than this are treated as hostile
const MAX_DECOMPRESSED_SIZE: u64 = 1 << 20;

pub struct PacketProcessor {
    next_sequence: AtomicU32,
    reassembler: FragmentReassembler,
    enable_compression: bool,
    compression_threshold: usize,
}

impl Default for PacketProcessor {
    fn default() -> Self {
        Self::new(&NetworkConfig::default())
    }
}

impl PacketProcessor {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            next_sequence: AtomicU32::new(1),
            reassembler: FragmentReassembler::default(),
            enable_compression: config.enable_compression,
            compression_threshold: config.compression_threshold_bytes,
        }
    }

    /// Reserves `count` consecutive sequence numbers and returns the first
    fn reserve_sequences(&self, count: u32) -> u32 {
        self.next_sequence.fetch_add(count, Ordering::Relaxed)
    }

    /// Turns one message into the packets that carry it
    pub fn create_packets(&self, message: &NetworkMessage) -> Result<Vec<NetworkPacket>> {
        let message_type = message.message_type();
        let mut data = message
            .serialize()
            .map_err(|e| NetworkError::PacketCreationFailed(e.to_string()))?;

        let mut flags = PacketFlags::NONE;
        if self.should_compress(message_type, data.len()) {
            match compress(&data) {
                Ok(compressed) => {
                    debug!(
                        "Compressed {:?} from {} to {} bytes",
                        message_type,
                        data.len(),
                        compressed.len()
                    );
                    data = compressed;
                    flags.insert(PacketFlags::COMPRESSED);
                }
                Err(e) => warn!("Compression failed, sending raw: {}", e),
            }
        }
        if message_type.is_critical() {
            flags.insert(PacketFlags::RELIABLE);
        }

        let packet_type = PacketType::for_message(message_type);

        if data.len() <= MAX_PAYLOAD_SIZE {
            let mut packet = NetworkPacket::new(packet_type, data);
            packet.header.flags = flags;
            packet.header.sequence_number = self.reserve_sequences(1);
            packet.header.target_client_id = message.target_id;
            return Ok(vec![packet]);
        }

        let chunks: Vec<&[u8]> = data.chunks(MAX_PAYLOAD_SIZE).collect();
        let total = chunks.len();
        if total > MAX_FRAGMENTS_PER_GROUP {
            return Err(NetworkError::PacketCreationFailed(format!(
                "message of {} bytes needs too many fragments",
                data.len()
            )));
        }

        // One number names the group, the rest go to the fragments in order
        let first = self.reserve_sequences(total as u32 + 1);
        let fragment_id = (first & 0xFFFF) as u16;

        let packets = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let mut packet = NetworkPacket::new(packet_type, chunk.to_vec());
                packet.header.flags = flags | PacketFlags::FRAGMENT;
                if i == total - 1 {
                    packet.header.flags.insert(PacketFlags::LAST_FRAGMENT);
                }
                packet.header.sequence_number = first.wrapping_add(1 + i as u32);
                packet.header.fragment_id = fragment_id;
                packet.header.target_client_id = message.target_id;
                packet
            })
            .collect();

        debug!("Created {} fragments for {:?}", total, message_type);
        Ok(packets)
    }

    /// Decodes a packet; `Ok(None)` while a fragment group is still incomplete
    pub fn process_packet(&self, packet: NetworkPacket) -> Result<Option<NetworkMessage>> {
        let compressed = packet.header.flags.contains(PacketFlags::COMPRESSED);

        let data = if packet.header.flags.contains(PacketFlags::FRAGMENT) {
            match self.reassembler.add_fragment(packet)? {
                Some(data) => data,
                None => return Ok(None),
            }
        } else {
            packet.payload
        };

        let data = if compressed { decompress(&data)? } else { data };
        NetworkMessage::deserialize(&data).map(Some)
    }

    pub fn pending_fragment_groups(&self) -> usize {
        self.reassembler.pending_groups()
    }

    pub fn clear(&self) {
        self.reassembler.clear();
    }

    fn should_compress(&self, message_type: MessageType, len: usize) -> bool {
        self.enable_compression && message_type.is_compressible() && len > self.compression_threshold
    }
}

fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(MAX_DECOMPRESSED_SIZE)
        .read_to_end(&mut out)
        .map_err(NetworkError::DecompressionFailed)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        BulletSpawnMessage, FireMessage, HandshakeMessage, MessageBody, PlayerStateMessage,
    };
    use crate::math::Vec3;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn oversized_handshake() -> NetworkMessage {
        // Two strings at the 1024 byte limit push the message past one payload
        NetworkMessage::to(
            3,
            HandshakeMessage {
                client_version: "v".repeat(1000),
                player_name: "n".repeat(1000),
            },
        )
    }

    #[test]
    fn test_small_message_is_single_packet() {
        let processor = PacketProcessor::default();
        let message = NetworkMessage::to(2, PlayerStateMessage::default());
        let packets = processor.create_packets(&message).unwrap();

        assert_eq!(packets.len(), 1);
        let packet = &packets[0];
        assert_eq!(packet.header.packet_type, PacketType::GameData);
        assert_eq!(packet.target_id(), 2);
        assert!(!packet.is_reliable());
        assert_eq!(packet.header.fragment_id, 0);

        let decoded = processor.process_packet(packet.clone()).unwrap();
        assert_eq!(decoded, Some(message));
    }

    #[test]
    fn test_critical_messages_are_reliable() {
        let processor = PacketProcessor::default();
        let fire = NetworkMessage::new(FireMessage::default());
        let spawn = NetworkMessage::new(BulletSpawnMessage::default());
        for message in [fire, spawn] {
            let packets = processor.create_packets(&message).unwrap();
            assert!(packets.iter().all(|p| p.is_reliable()));
        }
    }

    #[test]
    fn test_large_message_fragments_and_reassembles() {
        let processor = PacketProcessor::default();
        let message = oversized_handshake();
        let packets = processor.create_packets(&message).unwrap();

        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| p.payload.len() <= MAX_PAYLOAD_SIZE));
        assert!(packets
            .iter()
            .all(|p| p.header.flags.contains(PacketFlags::FRAGMENT)));
        assert!(packets[1].header.flags.contains(PacketFlags::LAST_FRAGMENT));
        assert!(!packets[0].header.flags.contains(PacketFlags::LAST_FRAGMENT));
        assert_eq!(packets[0].header.fragment_id, packets[1].header.fragment_id);
        assert_eq!(
            packets[1].header.sequence_number,
            packets[0].header.sequence_number + 1
        );
        // The group id consumed the sequence number right before the fragments
        assert_eq!(
            packets[0].header.fragment_id as u32,
            (packets[0].header.sequence_number - 1) & 0xFFFF
        );

        assert_eq!(processor.process_packet(packets[0].clone()).unwrap(), None);
        assert_eq!(processor.pending_fragment_groups(), 1);
        let decoded = processor.process_packet(packets[1].clone()).unwrap();
        assert_eq!(decoded, Some(message));
    }

    #[test]
    fn test_last_fragment_first_is_dropped() {
        let processor = PacketProcessor::default();
        let packets = processor.create_packets(&oversized_handshake()).unwrap();
        assert!(processor.process_packet(packets[1].clone()).is_err());
        assert_eq!(processor.pending_fragment_groups(), 0);
    }

    #[test]
    fn test_fragments_survive_wire_framing() {
        let processor = PacketProcessor::default();
        let receiver = PacketProcessor::default();
        let message = oversized_handshake();

        let mut decoded = None;
        for mut packet in processor.create_packets(&message).unwrap() {
            let bytes = packet.serialize().unwrap();
            let received = NetworkPacket::deserialize(&bytes).unwrap();
            decoded = receiver.process_packet(received).unwrap();
        }
        assert_eq!(decoded, Some(message));
        assert_eq!(receiver.pending_fragment_groups(), 0);
    }

    #[test]
    fn test_interleaved_fragments_from_two_clients() {
        let receiver = PacketProcessor::default();
        let first = oversized_handshake();
        let second = NetworkMessage::new(HandshakeMessage {
            client_version: "w".repeat(1000),
            player_name: "m".repeat(1000),
        });

        // Fresh processors hand out the same group ids and sequence numbers
        let stamp = |message: &NetworkMessage, sender: i32| {
            let mut packets = PacketProcessor::default().create_packets(message).unwrap();
            for packet in &mut packets {
                packet.header.client_id = sender;
            }
            packets
        };
        let from_one = stamp(&first, 1);
        let from_two = stamp(&second, 2);
        assert_eq!(from_one[0].header.fragment_id, from_two[0].header.fragment_id);

        let mut decoded = Vec::new();
        for (a, b) in from_one.into_iter().zip(from_two) {
            decoded.extend(receiver.process_packet(a).unwrap());
            decoded.extend(receiver.process_packet(b).unwrap());
        }
        assert_eq!(decoded, vec![first, second]);
    }

    #[test]
    fn test_sequence_numbers_strictly_increase() {
        let processor = PacketProcessor::default();
        let mut last = 0;
        for _ in 0..20 {
            for packet in processor.create_packets(&oversized_handshake()).unwrap() {
                assert!(packet.header.sequence_number > last);
                last = packet.header.sequence_number;
            }
            let single = processor
                .create_packets(&NetworkMessage::new(FireMessage::default()))
                .unwrap();
            assert!(single[0].header.sequence_number > last);
            last = single[0].header.sequence_number;
        }
    }

    #[test]
    fn test_concurrent_sequence_numbers_are_unique() {
        let processor = Arc::new(PacketProcessor::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let processor = Arc::clone(&processor);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    for _ in 0..200 {
                        let message = if i % 2 == 0 {
                            oversized_handshake()
                        } else {
                            NetworkMessage::new(FireMessage::default())
                        };
                        let packets = processor.create_packets(&message).unwrap();
                        // Fragments of one message stay contiguous
                        for pair in packets.windows(2) {
                            assert_eq!(
                                pair[1].header.sequence_number,
                                pair[0].header.sequence_number + 1
                            );
                        }
                        seen.extend(packets.iter().map(|p| p.header.sequence_number));
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        let mut total = 0;
        for handle in handles {
            let seen = handle.join().unwrap();
            for pair in seen.windows(2) {
                assert!(pair[1] > pair[0]);
            }
            total += seen.len();
            all.extend(seen);
        }
        assert_eq!(all.len(), total);
    }

    #[test]
    fn test_compressed_payload_is_inflated() {
        let processor = PacketProcessor::default();
        let message = NetworkMessage::new(PlayerStateMessage {
            player_id: 4,
            position: Vec3::new(1.0, 2.0, 3.0),
            ..Default::default()
        });
        let raw = message.serialize().unwrap();

        let mut packet = NetworkPacket::new(PacketType::GameData, compress(&raw).unwrap());
        packet.header.flags = PacketFlags::COMPRESSED;
        let decoded = processor.process_packet(packet).unwrap().unwrap();
        assert!(matches!(decoded.body, MessageBody::PlayerState(ref s) if s.player_id == 4));
    }

    #[test]
    fn test_bad_compressed_payload_is_decompression_error() {
        let processor = PacketProcessor::default();
        let mut packet = NetworkPacket::new(PacketType::GameData, vec![1, 2, 3, 4]);
        packet.header.flags = PacketFlags::COMPRESSED;
        let err = processor.process_packet(packet).unwrap_err();
        assert!(matches!(err, NetworkError::DecompressionFailed(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_garbage_payload_is_error_not_panic() {
        let processor = PacketProcessor::default();
        let packet = NetworkPacket::new(PacketType::GameData, vec![99, 1, 2]);
        assert!(processor.process_packet(packet).is_err());
    }
}
