use std::sync::OnceLock;
use std::time::Instant;

static CLOCK_START: OnceLock<Instant> = OnceLock::new();

// Seconds since this process first asked for the time, as stamped on every message.
pub fn timestamp_secs() -> f32 {
    CLOCK_START.get_or_init(Instant::now).elapsed().as_secs_f32()
}

// Rotate-left-by-one XOR accumulator used as the packet integrity check
pub fn rotate_xor_checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| acc.rotate_left(1) ^ b as u32)
}
