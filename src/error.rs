//! Error types for the host-level (fallible) edges of the sound core.
//!
//! The per-tick voice/stream core never raises: it validates and clamps
//! (spec §7). These types exist only for the handful of operations that
//! genuinely can fail — bank/project I/O, export, and audio-device start.

use std::fmt;

#[derive(Debug)]
pub enum SoundError {
    Io(String),
    Decode(String),
    Export(String),
    Audio(String),
}

impl fmt::Display for SoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoundError::Io(msg) => write!(f, "I/O error: {msg}"),
            SoundError::Decode(msg) => write!(f, "decode error: {msg}"),
            SoundError::Export(msg) => write!(f, "export error: {msg}"),
            SoundError::Audio(msg) => write!(f, "audio error: {msg}"),
        }
    }
}

impl std::error::Error for SoundError {}

pub type SoundResult<T> = Result<T, SoundError>;
