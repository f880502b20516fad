//! Project document: the JSON file the editor persists per project, naming
//! its songs, SFX presets, and autosave policy.
//!
//! Reference: `spec.md` §6 (project document schema) and the teacher's own
//! `src/tracker/io.rs` save/load shape (ported from `ron` to `serde_json`
//! per `SPEC_FULL.md` §6-FULL, since the document is consumed by a
//! non-Rust editor as well).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{SoundError, SoundResult};

const PROJECT_VERSION: u32 = 1;

/// Autosave fires on a fixed menu of intervals; `0` disables the timer
/// entirely (the editor may still autosave `on_tab_change`/`on_close`).
const VALID_AUTOSAVE_INTERVALS: [u32; 5] = [0, 30, 60, 120, 300];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SongRef {
    pub id: String,
    pub name: String,
    pub file: String,
}

/// A saved tone-effect preset: `Sfx_PlayToneEx`'s full parameter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneSfxPreset {
    pub name: String,
    pub channel: u8,
    pub divider: u16,
    pub attn: u8,
    pub frames: u8,
    pub sweep_on: bool,
    pub sweep_end: u16,
    pub sweep_step: i16,
    pub sweep_speed: u8,
    pub sweep_ping: bool,
    pub env_on: bool,
    pub env_step: u8,
    pub env_speed: u8,
}

/// A saved noise-effect preset: `Sfx_PlayNoiseEx`'s full parameter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseSfxPreset {
    pub name: String,
    pub rate: u8,
    pub kind: u8,
    pub attn: u8,
    pub frames: u8,
    pub burst_on: bool,
    pub burst_duration: u8,
    pub env_on: bool,
    pub env_step: u8,
    pub env_speed: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SfxPreset {
    Tone(ToneSfxPreset),
    Noise(NoiseSfxPreset),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosavePolicy {
    pub interval_sec: u32,
    pub on_tab_change: bool,
    pub on_close: bool,
}

impl Default for AutosavePolicy {
    fn default() -> Self {
        Self {
            interval_sec: 60,
            on_tab_change: true,
            on_close: true,
        }
    }
}

impl AutosavePolicy {
    /// Snaps an out-of-menu interval down to the nearest valid one.
    fn clamp(&mut self) {
        if !VALID_AUTOSAVE_INTERVALS.contains(&self.interval_sec) {
            self.interval_sec = VALID_AUTOSAVE_INTERVALS
                .iter()
                .rev()
                .find(|&&v| v <= self.interval_sec)
                .copied()
                .unwrap_or(0);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub version: u32,
    pub name: String,
    pub active_song_id: Option<String>,
    pub songs: Vec<SongRef>,
    pub sfx: Vec<SfxPreset>,
    pub autosave: AutosavePolicy,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: PROJECT_VERSION,
            name: name.into(),
            active_song_id: None,
            songs: Vec::new(),
            sfx: Vec::new(),
            autosave: AutosavePolicy::default(),
        }
    }

    pub fn load(path: &Path) -> SoundResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| SoundError::Io(format!("{}: {e}", path.display())))?;
        let mut project: Project = serde_json::from_str(&text)
            .map_err(|e| SoundError::Decode(format!("{}: {e}", path.display())))?;
        project.autosave.clamp();
        if let Some(id) = &project.active_song_id {
            if !project.songs.iter().any(|s| &s.id == id) {
                project.active_song_id = None;
            }
        }
        Ok(project)
    }

    pub fn save(&self, path: &Path) -> SoundResult<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| SoundError::Export(e.to_string()))?;
        fs::write(path, text).map_err(|e| SoundError::Io(format!("{}: {e}", path.display())))
    }

    pub fn active_song(&self) -> Option<&SongRef> {
        let id = self.active_song_id.as_ref()?;
        self.songs.iter().find(|s| &s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_project_defaults_to_no_active_song() {
        let project = Project::new("Demo");
        assert!(project.active_song_id.is_none());
        assert_eq!(project.version, PROJECT_VERSION);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("project.json");
        let mut project = Project::new("Demo");
        project.songs.push(SongRef {
            id: "song1".into(),
            name: "Title Theme".into(),
            file: "song1.json".into(),
        });
        project.active_song_id = Some("song1".into());
        project.sfx.push(SfxPreset::Tone(ToneSfxPreset {
            name: "Coin".into(),
            channel: 0,
            divider: 200,
            attn: 2,
            frames: 10,
            sweep_on: false,
            sweep_end: 200,
            sweep_step: 0,
            sweep_speed: 1,
            sweep_ping: false,
            env_on: true,
            env_step: 1,
            env_speed: 2,
        }));
        project.save(&path).unwrap();
        let loaded = Project::load(&path).unwrap();
        assert_eq!(loaded.songs.len(), 1);
        assert_eq!(loaded.active_song().unwrap().name, "Title Theme");
        assert_eq!(loaded.sfx.len(), 1);
    }

    #[test]
    fn stale_active_song_id_is_dropped_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("project.json");
        let mut project = Project::new("Demo");
        project.active_song_id = Some("ghost".into());
        project.save(&path).unwrap();
        let loaded = Project::load(&path).unwrap();
        assert!(loaded.active_song_id.is_none());
    }

    #[test]
    fn out_of_menu_autosave_interval_snaps_down() {
        let mut policy = AutosavePolicy {
            interval_sec: 90,
            on_tab_change: true,
            on_close: true,
        };
        policy.clamp();
        assert_eq!(policy.interval_sec, 60);
    }

    #[test]
    fn missing_project_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert!(matches!(Project::load(&path), Err(SoundError::Io(_))));
    }
}
