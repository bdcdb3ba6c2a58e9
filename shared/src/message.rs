//! Typed game messages and their binary layout
//!
//! Every message starts with the same prefix: the type tag (1 byte), the target
//! client id (i32, -1 = broadcast) and a timestamp (f32 seconds on the sender's
//! local clock). Type-specific fields follow in a fixed order. Decoding goes through a
//! lookup table keyed by the tag, see [`NetworkMessage::deserialize`].

use crate::codec::{WireRead, WireWrite};
use crate::error::{NetworkError, Result};
use crate::math::{Quat, Vec2, Vec3};
use crate::utils::timestamp_secs;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

pub const BROADCAST_TARGET: i32 = -1;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    None = 0,
    Handshake = 1,
    PlayerInput = 2,
    PlayerState = 3,
    VisionData = 4,
    PlayerDeath = 5,
    Heartbeat = 6,
    Fire = 7,
    BulletSpawn = 8,
    BulletDestroy = 9,
    Respawn = 10,
    PlayerJoined = 11,
    PlayerLeft = 12,
    GameTime = 13,
}

impl TryFrom<u8> for MessageType {
    type Error = NetworkError;

    fn try_from(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => MessageType::None,
            1 => MessageType::Handshake,
            2 => MessageType::PlayerInput,
            3 => MessageType::PlayerState,
            4 => MessageType::VisionData,
            5 => MessageType::PlayerDeath,
            6 => MessageType::Heartbeat,
            7 => MessageType::Fire,
            8 => MessageType::BulletSpawn,
            9 => MessageType::BulletDestroy,
            10 => MessageType::Respawn,
            11 => MessageType::PlayerJoined,
            12 => MessageType::PlayerLeft,
            13 => MessageType::GameTime,
            other => return Err(NetworkError::UnknownMessageType(other)),
        })
    }
}

impl MessageType {
    /// Messages that must arrive or clients diverge from the server
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            MessageType::Fire
                | MessageType::BulletSpawn
                | MessageType::BulletDestroy
                | MessageType::PlayerDeath
                | MessageType::Respawn
        )
    }

    /// Bulky cosmetic payloads worth gzipping
    pub fn is_compressible(self) -> bool {
        matches!(self, MessageType::VisionData)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    HitPlayer = 0,
    HitWall = 1,
    Timeout = 2,
}

impl TryFrom<u8> for DestroyReason {
    type Error = io::Error;

    fn try_from(value: u8) -> io::Result<Self> {
        match value {
            0 => Ok(DestroyReason::HitPlayer),
            1 => Ok(DestroyReason::HitWall),
            2 => Ok(DestroyReason::Timeout),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid destroy reason {}", other),
            )),
        }
    }
}

/// Field-level encoding shared by every concrete message body
trait MessageFields: Sized {
    fn write_fields(&self, w: &mut dyn Write) -> io::Result<()>;
    fn read_fields(r: &mut dyn Read) -> io::Result<Self>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeMessage {
    pub client_version: String,
    pub player_name: String,
}

impl Default for HandshakeMessage {
    fn default() -> Self {
        Self {
            client_version: "1.0.0".to_string(),
            player_name: "Player".to_string(),
        }
    }
}

impl MessageFields for HandshakeMessage {
    fn write_fields(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_string(&self.client_version)?;
        w.write_string(&self.player_name)
    }

    fn read_fields(r: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            client_version: r.read_string()?,
            player_name: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerInputMessage {
    pub move_input: Vec2,
    pub mouse_world_position: Vec3,
    pub attack_pressed: bool,
    pub sequence_number: u32,
}

impl MessageFields for PlayerInputMessage {
    fn write_fields(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_vec2(self.move_input)?;
        w.write_vec3(self.mouse_world_position)?;
        w.write_bool(self.attack_pressed)?;
        w.write_u32::<LittleEndian>(self.sequence_number)
    }

    fn read_fields(r: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            move_input: r.read_vec2()?,
            mouse_world_position: r.read_vec3()?,
            attack_pressed: r.read_bool()?,
            sequence_number: r.read_u32::<LittleEndian>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerStateMessage {
    pub player_id: i32,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub health: f32,
    pub is_alive: bool,
    pub last_processed_input: u32,
}

impl MessageFields for PlayerStateMessage {
    fn write_fields(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_i32::<LittleEndian>(self.player_id)?;
        w.write_vec3(self.position)?;
        w.write_quat(self.rotation)?;
        w.write_vec3(self.velocity)?;
        w.write_f32_le(self.health)?;
        w.write_bool(self.is_alive)?;
        w.write_u32::<LittleEndian>(self.last_processed_input)
    }

    fn read_fields(r: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            player_id: r.read_i32::<LittleEndian>()?,
            position: r.read_vec3()?,
            rotation: r.read_quat()?,
            velocity: r.read_vec3()?,
            health: r.read_f32_le()?,
            is_alive: r.read_bool()?,
            last_processed_input: r.read_u32::<LittleEndian>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FireMessage {
    pub fire_position: Vec3,
    pub fire_direction: Vec3,
    pub damage: f32,
    pub bullet_speed: f32,
}

impl MessageFields for FireMessage {
    fn write_fields(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_vec3(self.fire_position)?;
        w.write_vec3(self.fire_direction)?;
        w.write_f32_le(self.damage)?;
        w.write_f32_le(self.bullet_speed)
    }

    fn read_fields(r: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            fire_position: r.read_vec3()?,
            fire_direction: r.read_vec3()?,
            damage: r.read_f32_le()?,
            bullet_speed: r.read_f32_le()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulletSpawnMessage {
    pub bullet_id: u32,
    pub owner_id: i32,
    pub spawn_position: Vec3,
    pub direction: Vec3,
    pub speed: f32,
    pub damage: f32,
}

impl MessageFields for BulletSpawnMessage {
    fn write_fields(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.bullet_id)?;
        w.write_i32::<LittleEndian>(self.owner_id)?;
        w.write_vec3(self.spawn_position)?;
        w.write_vec3(self.direction)?;
        w.write_f32_le(self.speed)?;
        w.write_f32_le(self.damage)
    }

    fn read_fields(r: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            bullet_id: r.read_u32::<LittleEndian>()?,
            owner_id: r.read_i32::<LittleEndian>()?,
            spawn_position: r.read_vec3()?,
            direction: r.read_vec3()?,
            speed: r.read_f32_le()?,
            damage: r.read_f32_le()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulletDestroyMessage {
    pub bullet_id: u32,
    pub reason: DestroyReason,
}

impl MessageFields for BulletDestroyMessage {
    fn write_fields(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.bullet_id)?;
        w.write_u8(self.reason as u8)
    }

    fn read_fields(r: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            bullet_id: r.read_u32::<LittleEndian>()?,
            reason: DestroyReason::try_from(r.read_u8()?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerJoinedMessage {
    pub player_id: i32,
    pub player_name: String,
    pub spawn_position: Vec3,
    pub health: f32,
}

impl MessageFields for PlayerJoinedMessage {
    fn write_fields(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_i32::<LittleEndian>(self.player_id)?;
        w.write_string(&self.player_name)?;
        w.write_vec3(self.spawn_position)?;
        w.write_f32_le(self.health)
    }

    fn read_fields(r: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            player_id: r.read_i32::<LittleEndian>()?,
            player_name: r.read_string()?,
            spawn_position: r.read_vec3()?,
            health: r.read_f32_le()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerLeftMessage {
    pub player_id: i32,
}

impl MessageFields for PlayerLeftMessage {
    fn write_fields(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_i32::<LittleEndian>(self.player_id)
    }

    fn read_fields(r: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            player_id: r.read_i32::<LittleEndian>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GameTimeMessage {
    pub remaining_time: f32,
    pub is_night: bool,
    pub cycle_duration: f32,
}

impl MessageFields for GameTimeMessage {
    fn write_fields(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_f32_le(self.remaining_time)?;
        w.write_bool(self.is_night)?;
        w.write_f32_le(self.cycle_duration)
    }

    fn read_fields(r: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            remaining_time: r.read_f32_le()?,
            is_night: r.read_bool()?,
            cycle_duration: r.read_f32_le()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Handshake(HandshakeMessage),
    PlayerInput(PlayerInputMessage),
    PlayerState(PlayerStateMessage),
    Fire(FireMessage),
    BulletSpawn(BulletSpawnMessage),
    BulletDestroy(BulletDestroyMessage),
    PlayerJoined(PlayerJoinedMessage),
    PlayerLeft(PlayerLeftMessage),
    GameTime(GameTimeMessage),
}

macro_rules! impl_body_from {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for MessageBody {
                fn from(message: $ty) -> Self {
                    MessageBody::$variant(message)
                }
            }
        )*
    };
}

impl_body_from! {
    Handshake => HandshakeMessage,
    PlayerInput => PlayerInputMessage,
    PlayerState => PlayerStateMessage,
    Fire => FireMessage,
    BulletSpawn => BulletSpawnMessage,
    BulletDestroy => BulletDestroyMessage,
    PlayerJoined => PlayerJoinedMessage,
    PlayerLeft => PlayerLeftMessage,
    GameTime => GameTimeMessage,
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Handshake(_) => MessageType::Handshake,
            MessageBody::PlayerInput(_) => MessageType::PlayerInput,
            MessageBody::PlayerState(_) => MessageType::PlayerState,
            MessageBody::Fire(_) => MessageType::Fire,
            MessageBody::BulletSpawn(_) => MessageType::BulletSpawn,
            MessageBody::BulletDestroy(_) => MessageType::BulletDestroy,
            MessageBody::PlayerJoined(_) => MessageType::PlayerJoined,
            MessageBody::PlayerLeft(_) => MessageType::PlayerLeft,
            MessageBody::GameTime(_) => MessageType::GameTime,
        }
    }

    fn write_fields(&self, w: &mut dyn Write) -> io::Result<()> {
        match self {
            MessageBody::Handshake(m) => m.write_fields(w),
            MessageBody::PlayerInput(m) => m.write_fields(w),
            MessageBody::PlayerState(m) => m.write_fields(w),
            MessageBody::Fire(m) => m.write_fields(w),
            MessageBody::BulletSpawn(m) => m.write_fields(w),
            MessageBody::BulletDestroy(m) => m.write_fields(w),
            MessageBody::PlayerJoined(m) => m.write_fields(w),
            MessageBody::PlayerLeft(m) => m.write_fields(w),
            MessageBody::GameTime(m) => m.write_fields(w),
        }
    }
}

type BodyDecoder = fn(&mut dyn Read) -> io::Result<MessageBody>;

fn decode_as<T: MessageFields + Into<MessageBody>>(r: &mut dyn Read) -> io::Result<MessageBody> {
    T::read_fields(r).map(Into::into)
}

/// Tag to constructor table; tags without an entry are unknown on the wire
const MESSAGE_DECODERS: &[(MessageType, BodyDecoder)] = &[
    (MessageType::PlayerInput, decode_as::<PlayerInputMessage>),
    (MessageType::PlayerState, decode_as::<PlayerStateMessage>),
    (MessageType::Handshake, decode_as::<HandshakeMessage>),
    (MessageType::Fire, decode_as::<FireMessage>),
    (MessageType::BulletSpawn, decode_as::<BulletSpawnMessage>),
    (MessageType::BulletDestroy, decode_as::<BulletDestroyMessage>),
    (MessageType::PlayerJoined, decode_as::<PlayerJoinedMessage>),
    (MessageType::PlayerLeft, decode_as::<PlayerLeftMessage>),
    (MessageType::GameTime, decode_as::<GameTimeMessage>),
];

fn decoder_for(message_type: MessageType) -> Option<BodyDecoder> {
    MESSAGE_DECODERS
        .iter()
        .find(|(ty, _)| *ty == message_type)
        .map(|(_, decoder)| *decoder)
}

/// A decoded game message with its common prefix fields
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMessage {
    pub target_id: i32,
    pub timestamp: f32,
    pub body: MessageBody,
}

impl NetworkMessage {
    /// Creates a broadcast message stamped with the current time
    pub fn new(body: impl Into<MessageBody>) -> Self {
        Self {
            target_id: BROADCAST_TARGET,
            timestamp: timestamp_secs(),
            body: body.into(),
        }
    }

    /// Creates a message addressed to a single client
    pub fn to(target_id: i32, body: impl Into<MessageBody>) -> Self {
        Self {
            target_id,
            ..Self::new(body)
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    pub fn is_broadcast(&self) -> bool {
        self.target_id == BROADCAST_TARGET
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        buf.write_u8(self.message_type() as u8)?;
        buf.write_i32::<LittleEndian>(self.target_id)?;
        buf.write_f32_le(self.timestamp)?;
        self.body.write_fields(&mut buf)?;
        Ok(buf)
    }

    /// Decodes a message, choosing the body layout from the leading tag
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let Some(&tag) = data.first() else {
            return Err(NetworkError::InvalidPacket("empty message buffer".into()));
        };

        let message_type = MessageType::try_from(tag)?;
        let decoder = decoder_for(message_type).ok_or(NetworkError::UnknownMessageType(tag))?;

        let mut cursor = Cursor::new(&data[1..]);
        let decode = |r: &mut Cursor<&[u8]>| -> io::Result<NetworkMessage> {
            let target_id = r.read_i32::<LittleEndian>()?;
            let timestamp = r.read_f32_le()?;
            let body = decoder(r)?;
            Ok(NetworkMessage {
                target_id,
                timestamp,
                body,
            })
        };

        decode(&mut cursor).map_err(|e| {
            NetworkError::InvalidPacket(format!("malformed {:?} message: {}", message_type, e))
        })
    }
}
