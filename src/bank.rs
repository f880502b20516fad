//! Instrument bank storage: the factory presets plus the JSON file format
//! used to save/load a tool-authored bank.
//!
//! Reference: `spec.md` §4.5's bank serialization shape
//! (`{version, instruments:[{name, def}]}`) and
//! `examples/original_source/core/src/instrument.cpp`'s factory tables.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{SoundError, SoundResult};
use crate::instrument::{
    factory_env_curves, factory_instrument_presets, factory_macros, factory_pitch_curves,
    EnvCurve, InstrumentPreset, Macro, PitchCurve,
};

pub const MAX_SLOTS: usize = 128;
const BANK_VERSION: u32 = 2;

/// All instrument-adjacent data a song or the tool needs at once: presets
/// plus the shared envelope/pitch-curve/macro tables they reference by id.
#[derive(Debug, Clone)]
pub struct SoundBank {
    pub instruments: Vec<InstrumentPreset>,
    pub env_curves: Vec<EnvCurve>,
    pub pitch_curves: Vec<PitchCurve>,
    pub macros: Vec<Macro>,
}

impl SoundBank {
    pub fn factory() -> Self {
        Self {
            instruments: factory_instrument_presets(),
            env_curves: factory_env_curves(),
            pitch_curves: factory_pitch_curves(),
            macros: factory_macros(),
        }
    }

    pub fn instrument(&self, id: u8) -> Option<&InstrumentPreset> {
        self.instruments.get(id as usize)
    }

    /// Loads a bank file, clamping slot count to `MAX_SLOTS` and leaving the
    /// curve/macro tables at their factory defaults (the file format only
    /// carries instrument presets; curves and macros are fixed system data).
    pub fn load(path: &Path) -> SoundResult<Self> {
        let text =
            fs::read_to_string(path).map_err(|e| SoundError::Io(format!("{}: {e}", path.display())))?;
        let file: BankFile = serde_json::from_str(&text)
            .map_err(|e| SoundError::Decode(format!("{}: {e}", path.display())))?;
        let mut instruments = file.instruments;
        if instruments.len() > MAX_SLOTS {
            instruments.truncate(MAX_SLOTS);
        }
        for preset in &mut instruments {
            preset.def.clamp();
        }
        Ok(Self {
            instruments,
            env_curves: factory_env_curves(),
            pitch_curves: factory_pitch_curves(),
            macros: factory_macros(),
        })
    }

    pub fn save(&self, path: &Path) -> SoundResult<()> {
        let file = BankFile {
            version: BANK_VERSION,
            instruments: self.instruments.clone(),
        };
        let text = serde_json::to_string_pretty(&file)
            .map_err(|e| SoundError::Export(e.to_string()))?;
        fs::write(path, text).map_err(|e| SoundError::Io(format!("{}: {e}", path.display())))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BankFile {
    version: u32,
    instruments: Vec<InstrumentPreset>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn factory_bank_has_expected_table_sizes() {
        let bank = SoundBank::factory();
        assert_eq!(bank.instruments.len(), 32);
        assert_eq!(bank.env_curves.len(), 6);
        assert_eq!(bank.pitch_curves.len(), 9);
        assert_eq!(bank.macros.len(), 5);
    }

    #[test]
    fn save_then_load_round_trips_instrument_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bank.json");
        let bank = SoundBank::factory();
        bank.save(&path).unwrap();
        let loaded = SoundBank::load(&path).unwrap();
        assert_eq!(loaded.instruments.len(), bank.instruments.len());
        assert_eq!(loaded.instruments[4].name, bank.instruments[4].name);
    }

    #[test]
    fn load_truncates_oversized_instrument_lists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.json");
        let mut bank = SoundBank::factory();
        while bank.instruments.len() < MAX_SLOTS + 10 {
            let p = bank.instruments[0].clone();
            bank.instruments.push(p);
        }
        bank.save(&path).unwrap();
        let loaded = SoundBank::load(&path).unwrap();
        assert_eq!(loaded.instruments.len(), MAX_SLOTS);
    }

    #[test]
    fn load_clamps_out_of_range_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dirty.json");
        let mut bank = SoundBank::factory();
        bank.instruments[0].def.attn = 200;
        bank.instruments[0].def.lfo_algo = 200;
        bank.save(&path).unwrap();
        let loaded = SoundBank::load(&path).unwrap();
        assert!(loaded.instruments[0].def.attn <= 15);
        assert!(loaded.instruments[0].def.lfo_algo <= 7);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert!(matches!(SoundBank::load(&path), Err(SoundError::Io(_))));
    }
}
