//! Sanity checks applied to messages a client sends before the simulation
//! acts on them. One validator is kept per player so timestamp and sequence
//! history are never shared across clients.

use log::warn;
use shared::{MessageBody, NetworkMessage, PlayerInputMessage, PlayerStateMessage, Vec3};

const MAX_MOVE_MAGNITUDE: f32 = 1.5;
const MIN_POSITION: f32 = -100.0;
const MAX_POSITION: f32 = 100.0;
/// Timestamps may jitter backwards by this much before being rejected
const TIMESTAMP_TOLERANCE_SECS: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    TimestampError,
    DuplicatePacket,
    InvalidData,
}

impl ValidationResult {
    pub fn is_valid(self) -> bool {
        self == ValidationResult::Valid
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageValidator {
    last_timestamp: f32,
    last_sequence_number: u32,
}

impl MessageValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&mut self, message: &NetworkMessage) -> ValidationResult {
        if message.timestamp < self.last_timestamp - TIMESTAMP_TOLERANCE_SECS {
            warn!(
                "Timestamp went backwards: {} < {}",
                message.timestamp, self.last_timestamp
            );
            return ValidationResult::TimestampError;
        }

        let result = match &message.body {
            MessageBody::PlayerInput(input) => self.validate_input(input),
            MessageBody::PlayerState(state) => validate_state(state),
            _ => ValidationResult::Valid,
        };

        if result.is_valid() {
            self.last_timestamp = self.last_timestamp.max(message.timestamp);
        }
        result
    }

    fn validate_input(&mut self, input: &PlayerInputMessage) -> ValidationResult {
        if input.sequence_number <= self.last_sequence_number {
            warn!(
                "Duplicate or old input sequence: {} <= {}",
                input.sequence_number, self.last_sequence_number
            );
            return ValidationResult::DuplicatePacket;
        }

        let magnitude = input.move_input.magnitude();
        if magnitude > MAX_MOVE_MAGNITUDE {
            warn!("Move input exceeds valid range: {}", magnitude);
            return ValidationResult::InvalidData;
        }

        if !is_position_valid(input.mouse_world_position) {
            warn!(
                "Mouse position out of bounds: {:?}",
                input.mouse_world_position
            );
            return ValidationResult::InvalidData;
        }

        self.last_sequence_number = input.sequence_number;
        ValidationResult::Valid
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn validate_state(state: &PlayerStateMessage) -> ValidationResult {
    if !is_position_valid(state.position) || state.health < 0.0 {
        warn!("Player state out of range for {}", state.player_id);
        return ValidationResult::InvalidData;
    }
    ValidationResult::Valid
}

fn is_position_valid(position: Vec3) -> bool {
    let in_range = |v: f32| (MIN_POSITION..=MAX_POSITION).contains(&v);
    in_range(position.x) && in_range(position.y) && in_range(position.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{PlayerLeftMessage, Vec2};

    fn input(sequence_number: u32, move_input: Vec2, mouse: Vec3) -> NetworkMessage {
        NetworkMessage::new(PlayerInputMessage {
            move_input,
            mouse_world_position: mouse,
            attack_pressed: false,
            sequence_number,
        })
    }

    #[test]
    fn test_accepts_normal_input() {
        let mut validator = MessageValidator::new();
        let msg = input(1, Vec2::new(1.0, 0.0), Vec3::new(10.0, 0.0, 3.0));
        assert_eq!(validator.validate(&msg), ValidationResult::Valid);
    }

    #[test]
    fn test_rejects_oversized_move_and_far_mouse() {
        let mut validator = MessageValidator::new();
        let fast = input(1, Vec2::new(2.0, 0.0), Vec3::ZERO);
        assert_eq!(validator.validate(&fast), ValidationResult::InvalidData);

        let far = input(2, Vec2::new(0.5, 0.5), Vec3::new(150.0, 0.0, 0.0));
        assert_eq!(validator.validate(&far), ValidationResult::InvalidData);
    }

    #[test]
    fn test_rejects_replayed_sequence() {
        let mut validator = MessageValidator::new();
        assert!(validator
            .validate(&input(5, Vec2::ZERO, Vec3::ZERO))
            .is_valid());
        assert_eq!(
            validator.validate(&input(5, Vec2::ZERO, Vec3::ZERO)),
            ValidationResult::DuplicatePacket
        );
        assert_eq!(
            validator.validate(&input(3, Vec2::ZERO, Vec3::ZERO)),
            ValidationResult::DuplicatePacket
        );
    }

    #[test]
    fn test_rejected_input_does_not_advance_sequence() {
        let mut validator = MessageValidator::new();
        let bad = input(4, Vec2::new(3.0, 0.0), Vec3::ZERO);
        assert!(!validator.validate(&bad).is_valid());
        assert!(validator
            .validate(&input(4, Vec2::ZERO, Vec3::ZERO))
            .is_valid());
    }

    #[test]
    fn test_timestamp_going_backwards() {
        let mut validator = MessageValidator::new();
        let mut msg = NetworkMessage::new(PlayerLeftMessage { player_id: 1 });
        msg.timestamp = 100.0;
        assert!(validator.validate(&msg).is_valid());

        msg.timestamp = 99.5;
        assert!(validator.validate(&msg).is_valid());

        msg.timestamp = 98.0;
        assert_eq!(validator.validate(&msg), ValidationResult::TimestampError);

        validator.reset();
        assert!(validator.validate(&msg).is_valid());
    }
}
