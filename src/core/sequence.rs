//! Per-connection packet sequence numbers.

use std::sync::Mutex;

/// Bit 15 marks a reply to the request sharing the low 15 bits
pub const REPLY_BIT: u16 = 0x8000;

/// Highest sequence handed out before wrapping back to zero
pub const MAX_SEQUENCE: u16 = 32760;

/// Rolling 15-bit counter. The first value is 1; after `MAX_SEQUENCE` the
/// next value is 0.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    current: Mutex<u16>,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an arbitrary value; the next call returns `start + 1`
    pub fn starting_at(start: u16) -> Self {
        Self {
            current: Mutex::new(start.min(MAX_SEQUENCE)),
        }
    }

    pub fn next(&self) -> u16 {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = if *current >= MAX_SEQUENCE {
            0
        } else {
            *current + 1
        };
        *current
    }
}
