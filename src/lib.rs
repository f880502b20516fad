//! Cycle-accurate PSG/Z80 sound stack and authoring-tool core for the NGPC
//! handheld: a two-chip PSG mixer, a minimal Z80 co-processor shell running
//! a fixed polling-driver image, an instrument/voice state machine, the
//! music byte-code stream interpreter and SFX engine that drive it, a
//! tool-side replayer for preview/offline rendering, a cpal-backed audio
//! output, and the C-source export back-end that compiles authored songs
//! for the runtime driver.
//!
//! Module map, leaves first: [`psg`] (C1), [`z80`] (C2), [`driver`]
//! (C3/C4), [`instrument`] + [`bank`] (C5), [`voice`] (C6), [`stream`]
//! (C7), [`sfx`] (C7b), [`note_table`], [`replayer`] (C8), [`audio_out`]
//! (C9), [`export`] (C10), [`project`], [`config`], [`error`].

pub mod audio_out;
pub mod bank;
pub mod config;
pub mod driver;
pub mod error;
pub mod export;
pub mod instrument;
pub mod note_table;
pub mod project;
pub mod psg;
pub mod replayer;
pub mod sfx;
pub mod stream;
pub mod voice;
pub mod z80;

pub use bank::SoundBank;
pub use error::{SoundError, SoundResult};
pub use project::Project;
pub use psg::PsgMixer;
pub use replayer::{PreviewMode, Replayer};
pub use stream::Song;
