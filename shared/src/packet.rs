//! Packet framing: fixed 23-byte header, payload, trailing checksum
//!
//! Also holds the two raw datagram shapes that never carry a header: the
//! 8-byte acknowledgment and the 2-byte UDP endpoint probe.

use crate::error::{NetworkError, Result};
use crate::message::MessageType;
use crate::utils::rotate_xor_checksum;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read};

pub const PACKET_MAGIC: u32 = 0x4152_4E41;
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 23;
pub const CHECKSUM_SIZE: usize = 4;
pub const MIN_PACKET_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;

pub const ACK_MAGIC: u32 = 0x4143_4B00;
pub const ACK_SIZE: usize = 8;
pub const PROBE: [u8; 2] = [0x48, 0x49];

/// Id carried by packets that have no assigned sender or target
pub const UNASSIGNED_ID: i32 = -1;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Handshake = 0,
    GameData = 1,
    Heartbeat = 2,
    Disconnect = 3,
    Acknowledgment = 4,
    Fragment = 5,
    PlayerLifecycle = 6,
}

impl TryFrom<u8> for PacketType {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => PacketType::Handshake,
            1 => PacketType::GameData,
            2 => PacketType::Heartbeat,
            3 => PacketType::Disconnect,
            4 => PacketType::Acknowledgment,
            5 => PacketType::Fragment,
            6 => PacketType::PlayerLifecycle,
            other => {
                return Err(NetworkError::InvalidPacket(format!(
                    "unknown packet type {}",
                    other
                )))
            }
        })
    }
}

impl PacketType {
    pub fn for_message(message_type: MessageType) -> Self {
        match message_type {
            MessageType::Handshake => PacketType::Handshake,
            MessageType::Heartbeat => PacketType::Heartbeat,
            MessageType::PlayerJoined | MessageType::PlayerLeft => PacketType::PlayerLifecycle,
            _ => PacketType::GameData,
        }
    }

    /// Session-critical packets always travel over the stream transport
    pub fn requires_tcp(self) -> bool {
        matches!(
            self,
            PacketType::Handshake | PacketType::Disconnect | PacketType::PlayerLifecycle
        )
    }
}

/// Bitset of per-packet flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags(0);
    pub const RELIABLE: PacketFlags = PacketFlags(1 << 0);
    pub const COMPRESSED: PacketFlags = PacketFlags(1 << 1);
    pub const ENCRYPTED: PacketFlags = PacketFlags(1 << 2);
    pub const FRAGMENT: PacketFlags = PacketFlags(1 << 3);
    pub const LAST_FRAGMENT: PacketFlags = PacketFlags(1 << 4);
    pub const DUPLICATE: PacketFlags = PacketFlags(1 << 5);
    pub const PRIORITY: PacketFlags = PacketFlags(1 << 6);

    pub fn from_bits(bits: u8) -> Self {
        PacketFlags(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: PacketFlags) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for PacketFlags {
    type Output = PacketFlags;

    fn bitor(self, rhs: PacketFlags) -> PacketFlags {
        PacketFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u8,
    pub packet_type: PacketType,
    pub flags: PacketFlags,
    pub client_id: i32,
    pub target_client_id: i32,
    pub sequence_number: u32,
    pub payload_size: u16,
    pub fragment_id: u16,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            magic: PACKET_MAGIC,
            version: PROTOCOL_VERSION,
            packet_type,
            flags: PacketFlags::NONE,
            client_id: UNASSIGNED_ID,
            target_client_id: UNASSIGNED_ID,
            sequence_number: 0,
            payload_size: 0,
            fragment_id: 0,
        }
    }

    fn write_to(&self, writer: &mut impl WriteBytesExt) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u8(self.version)?;
        writer.write_u8(self.packet_type as u8)?;
        writer.write_u8(self.flags.bits())?;
        writer.write_i32::<LittleEndian>(self.client_id)?;
        writer.write_i32::<LittleEndian>(self.target_client_id)?;
        writer.write_u32::<LittleEndian>(self.sequence_number)?;
        writer.write_u16::<LittleEndian>(self.payload_size)?;
        writer.write_u16::<LittleEndian>(self.fragment_id)
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != PACKET_MAGIC {
            return Err(NetworkError::InvalidPacket(format!(
                "bad magic number {:#010x}",
                magic
            )));
        }

        Ok(Self {
            magic,
            version: reader.read_u8()?,
            packet_type: PacketType::try_from(reader.read_u8()?)?,
            flags: PacketFlags::from_bits(reader.read_u8()?),
            client_id: reader.read_i32::<LittleEndian>()?,
            target_client_id: reader.read_i32::<LittleEndian>()?,
            sequence_number: reader.read_u32::<LittleEndian>()?,
            payload_size: reader.read_u16::<LittleEndian>()?,
            fragment_id: reader.read_u16::<LittleEndian>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkPacket {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
    pub checksum: u32,
}

impl NetworkPacket {
    pub fn new(packet_type: PacketType, payload: Vec<u8>) -> Self {
        Self {
            header: PacketHeader::new(packet_type),
            payload,
            checksum: 0,
        }
    }

    pub fn sender_id(&self) -> i32 {
        self.header.client_id
    }

    pub fn target_id(&self) -> i32 {
        self.header.target_client_id
    }

    pub fn is_reliable(&self) -> bool {
        self.header.flags.contains(PacketFlags::RELIABLE)
    }

    /// Writes header, payload and checksum; the checksum covers every byte before it
    ///
    /// Updates `payload_size` and `checksum` to match what was written.
    pub fn serialize(&mut self) -> Result<Vec<u8>> {
        if self.payload.len() > u16::MAX as usize {
            return Err(NetworkError::PacketCreationFailed(format!(
                "payload of {} bytes does not fit a packet",
                self.payload.len()
            )));
        }
        self.header.payload_size = self.payload.len() as u16;

        let mut buf = Vec::with_capacity(MIN_PACKET_SIZE + self.payload.len());
        self.header.write_to(&mut buf)?;
        buf.extend_from_slice(&self.payload);

        self.checksum = rotate_xor_checksum(&buf);
        buf.write_u32::<LittleEndian>(self.checksum)?;
        Ok(buf)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_PACKET_SIZE {
            return Err(NetworkError::InvalidPacket(format!(
                "packet of {} bytes is smaller than the minimum {}",
                data.len(),
                MIN_PACKET_SIZE
            )));
        }

        let mut reader = Cursor::new(data);
        let header = PacketHeader::read_from(&mut reader)?;

        let body_end = HEADER_SIZE + header.payload_size as usize;
        if data.len() < body_end + CHECKSUM_SIZE {
            return Err(NetworkError::InvalidPacket(format!(
                "truncated packet: payload size {} but only {} bytes",
                header.payload_size,
                data.len()
            )));
        }

        let mut payload = vec![0u8; header.payload_size as usize];
        reader.read_exact(&mut payload)?;
        let checksum = reader.read_u32::<LittleEndian>()?;

        let calculated = rotate_xor_checksum(&data[..body_end]);
        if checksum != calculated {
            return Err(NetworkError::InvalidPacket(format!(
                "checksum mismatch: stored {:#010x}, calculated {:#010x}",
                checksum, calculated
            )));
        }

        Ok(Self {
            header,
            payload,
            checksum,
        })
    }
}

pub fn encode_ack(sequence_number: u32) -> [u8; ACK_SIZE] {
    let mut buf = [0u8; ACK_SIZE];
    buf[..4].copy_from_slice(&ACK_MAGIC.to_le_bytes());
    buf[4..].copy_from_slice(&sequence_number.to_le_bytes());
    buf
}

/// Returns the acknowledged sequence number if `data` is an ACK datagram
pub fn decode_ack(data: &[u8]) -> Option<u32> {
    if data.len() != ACK_SIZE {
        return None;
    }
    let mut reader = Cursor::new(data);
    match reader.read_u32::<LittleEndian>() {
        Ok(ACK_MAGIC) => reader.read_u32::<LittleEndian>().ok(),
        _ => None,
    }
}

pub fn is_probe(data: &[u8]) -> bool {
    data == PROBE
}
