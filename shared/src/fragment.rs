//! Reassembly of messages split across several packets
//!
//! Fragments of one message share a fragment group id and carry consecutive
//! sequence numbers; the final one is flagged `LAST_FRAGMENT`. When the last
//! fragment shows up, the number of fragments received so far becomes the
//! expected count. A group whose sorted sequence numbers are not contiguous is
//! dropped with an error. Groups that never complete are purged after a
//! timeout on the next arrival.
//!
//! Groups are keyed by sender and group id, so two peers fragmenting at the
//! same time never share a group. A repeated sequence number within a group is
//! ignored, and a group may hold at most [`MAX_FRAGMENTS_PER_GROUP`] fragments.

use crate::config::{FRAGMENT_TIMEOUT, MAX_PAYLOAD_SIZE, MAX_TCP_FRAME_SIZE};
use crate::error::{NetworkError, Result};
use crate::packet::{NetworkPacket, PacketFlags};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Enough fragments for the largest message a TCP frame can carry
pub const MAX_FRAGMENTS_PER_GROUP: usize = MAX_TCP_FRAME_SIZE.div_ceil(MAX_PAYLOAD_SIZE);

/// Sender id plus fragment group id
type GroupKey = (i32, u16);

struct FragmentGroup {
    packets: Vec<NetworkPacket>,
    first_received: Instant,
    expected_count: Option<usize>,
}

pub struct FragmentReassembler {
    groups: Mutex<HashMap<GroupKey, FragmentGroup>>,
    timeout: Duration,
}

impl Default for FragmentReassembler {
    fn default() -> Self {
        Self::new(FRAGMENT_TIMEOUT)
    }
}

impl FragmentReassembler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Adds one fragment; yields the concatenated payload once the group completes
    pub fn add_fragment(&self, packet: NetworkPacket) -> Result<Option<Vec<u8>>> {
        self.add_fragment_at(packet, Instant::now())
    }

    pub fn add_fragment_at(&self, packet: NetworkPacket, now: Instant) -> Result<Option<Vec<u8>>> {
        let mut groups = self.groups.lock();
        self.purge_expired(&mut groups, now);

        let fragment_id = packet.header.fragment_id;
        let key = (packet.sender_id(), fragment_id);
        let is_last = packet.header.flags.contains(PacketFlags::LAST_FRAGMENT);

        let group = groups.entry(key).or_insert_with(|| FragmentGroup {
            packets: Vec::new(),
            first_received: now,
            expected_count: None,
        });

        let sequence = packet.header.sequence_number;
        if group
            .packets
            .iter()
            .any(|p| p.header.sequence_number == sequence)
        {
            debug!(
                "Duplicate fragment {} in group {} from {}",
                sequence, fragment_id, key.0
            );
            return Ok(None);
        }

        if group.packets.len() == MAX_FRAGMENTS_PER_GROUP {
            groups.remove(&key);
            return Err(NetworkError::InvalidPacket(format!(
                "fragment group {} from {} exceeds {} fragments",
                fragment_id, key.0, MAX_FRAGMENTS_PER_GROUP
            )));
        }

        group.packets.push(packet);

        if is_last {
            group.expected_count = Some(group.packets.len());
        }

        match group.expected_count {
            Some(expected) if group.packets.len() >= expected => {}
            _ => return Ok(None),
        }

        let Some(group) = groups.remove(&key) else {
            return Ok(None);
        };
        drop(groups);

        let data = reassemble(fragment_id, group.packets)?;
        debug!(
            "Reassembled fragment group {} into {} bytes",
            fragment_id,
            data.len()
        );
        Ok(Some(data))
    }

    pub fn pending_groups(&self) -> usize {
        self.groups.lock().len()
    }

    pub fn clear(&self) {
        self.groups.lock().clear();
    }

    fn purge_expired(&self, groups: &mut HashMap<GroupKey, FragmentGroup>, now: Instant) {
        groups.retain(|(sender, id), group| {
            let expired = now.saturating_duration_since(group.first_received) > self.timeout;
            if expired {
                warn!(
                    "Fragment group {} from {} timed out with {} fragments",
                    id,
                    sender,
                    group.packets.len()
                );
            }
            !expired
        });
    }
}

fn reassemble(fragment_id: u16, mut packets: Vec<NetworkPacket>) -> Result<Vec<u8>> {
    // Messages that fit one payload are never fragmented
    if packets.len() < 2 {
        return Err(NetworkError::InvalidPacket(format!(
            "fragment group {} completed with a single fragment",
            fragment_id
        )));
    }

    packets.sort_by_key(|p| p.header.sequence_number);

    for pair in packets.windows(2) {
        let expected = pair[0].header.sequence_number.wrapping_add(1);
        let actual = pair[1].header.sequence_number;
        if actual != expected {
            return Err(NetworkError::InvalidPacket(format!(
                "fragment group {} is missing sequence {} (next was {})",
                fragment_id, expected, actual
            )));
        }
    }

    // The flagged fragment must close the run, or the expected count was fixed too early
    let closes_run = packets
        .last()
        .is_some_and(|p| p.header.flags.contains(PacketFlags::LAST_FRAGMENT));
    if !closes_run {
        return Err(NetworkError::InvalidPacket(format!(
            "fragment group {} completed before its last fragment",
            fragment_id
        )));
    }

    let total = packets.iter().map(|p| p.payload.len()).sum();
    let mut data = Vec::with_capacity(total);
    for packet in &packets {
        data.extend_from_slice(&packet.payload);
    }
    Ok(data)
}
