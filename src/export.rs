//! Export back-end: turns an authored song (a per-channel row grid) and a
//! `SoundBank`/`Project` into the byte-code streams and C source a target
//! build links against.
//!
//! Two serialization modes, matching `spec.md` §4.10:
//!   - [`ExportMode::Hybrid`] only (re-)emits a control opcode when the
//!     field it sets actually changes since the previous note on that
//!     channel, relying on the runtime driver to carry modulation state
//!     forward between notes. Smaller output.
//!   - [`ExportMode::PreBaked`] re-emits the full opcode set in front of
//!     every note, so a decoder never needs to remember state from an
//!     earlier note to reproduce this one. Larger output, order-independent.
//!
//! Both modes decode through the exact same `crate::stream` opcode
//! vocabulary (no export-only opcodes), so a row-grid export and a
//! hand-written stream are interchangeable inputs to `crate::stream::Song`.
//!
//! Reference: `examples/original_source/app/src/models/TrackerDocument.h`
//! (`TrackerCell` row shape), `core/src/instrument.cpp`
//! (`InstrumentPresetsToCArray`), `app/src/MainWindow.cpp`
//! (`rewrite_song_export_symbols`, `write_project_audio_api_export`,
//! `export_project_songs_only`).

use std::fs;
use std::path::Path;

use crate::bank::SoundBank;
use crate::error::{SoundError, SoundResult};
use crate::note_table::default_table_bytes;
use crate::project::{Project, SfxPreset};
use crate::stream::op;

/// Tracker fx column: change the global tick speed; `fx_param` is the new
/// multiplier (clamped to at least 1 by the encoder, mirroring
/// `StreamVoice`'s own `HOST_CMD` handling).
pub const FX_SET_SPEED: u8 = 0x0B;
/// Marks a cell's `attn` field as "use the instrument's own attenuation".
pub const ATTN_USE_INSTRUMENT: u8 = 0xFF;

const CHANNEL_COUNT: usize = 4;
const NOTE_MAX: u8 = 51;

/// One row's worth of authored state for a single channel.
///
/// `note == 0` means "no new event" (the previous note, if any, keeps
/// ringing); `note == 0xFF` is note-off; `1..=51` triggers `instrument` at
/// `attn` (or the instrument's own attenuation if `attn ==
/// ATTN_USE_INSTRUMENT`). Modeled on `TrackerCell` from the original
/// editor's row-grid document, trimmed to the fields this exporter uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerCell {
    pub note: u8,
    pub instrument: u8,
    pub attn: u8,
    pub fx: u8,
    pub fx_param: u8,
}

impl TrackerCell {
    pub fn note_off() -> Self {
        Self {
            note: 0xFF,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.note == 0 && self.fx == 0
    }

    pub fn is_note_off(&self) -> bool {
        self.note == 0xFF
    }

    pub fn is_note_on(&self) -> bool {
        (1..=NOTE_MAX).contains(&self.note)
    }
}

impl Default for TrackerCell {
    fn default() -> Self {
        Self {
            note: 0,
            instrument: 0,
            attn: ATTN_USE_INSTRUMENT,
            fx: 0,
            fx_param: 0,
        }
    }
}

/// One channel's authored rows.
#[derive(Debug, Clone, Default)]
pub struct AuthoredChannel {
    pub rows: Vec<TrackerCell>,
}

/// A full authored song: four channels (tone0, tone1, tone2, noise) of
/// equal row count, plus the loop point and tick scaling every row shares.
#[derive(Debug, Clone)]
pub struct AuthoredSong {
    pub channels: [AuthoredChannel; CHANNEL_COUNT],
    pub ticks_per_row: u8,
    pub loop_row: Option<usize>,
}

impl AuthoredSong {
    pub fn new(row_count: usize, ticks_per_row: u8) -> Self {
        Self {
            channels: [
                AuthoredChannel {
                    rows: vec![TrackerCell::default(); row_count],
                },
                AuthoredChannel {
                    rows: vec![TrackerCell::default(); row_count],
                },
                AuthoredChannel {
                    rows: vec![TrackerCell::default(); row_count],
                },
                AuthoredChannel {
                    rows: vec![TrackerCell::default(); row_count],
                },
            ],
            ticks_per_row: ticks_per_row.max(1),
            loop_row: None,
        }
    }
}

/// Which opcode-emission strategy [`export_song`] should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    Hybrid,
    PreBaked,
}

/// The byte-code streams, loop offsets, and note table produced for one
/// song, plus any warnings raised while encoding it.
#[derive(Debug, Clone)]
pub struct ExportedStreams {
    pub note_table: [u8; 102],
    pub channel_bytes: [Vec<u8>; CHANNEL_COUNT],
    pub loop_offsets: [u16; CHANNEL_COUNT],
    pub warnings: Vec<String>,
}

/// Appends `(head_byte, duration)` pairs covering `ticks` total, splitting
/// across multiple pairs when `ticks` exceeds the single-byte duration
/// field's 255 limit. Used for both note and rest emission.
fn push_duration_chunks(bytes: &mut Vec<u8>, head: u8, ticks: u32) {
    let mut remaining = ticks.max(1);
    while remaining > 0 {
        let chunk = remaining.min(255) as u8;
        bytes.push(head);
        bytes.push(chunk);
        remaining -= chunk as u32;
    }
}

fn encode_channel(
    channel: &AuthoredChannel,
    ticks_per_row: u8,
    loop_row: Option<usize>,
    baked: bool,
    channel_index: usize,
    warnings: &mut Vec<String>,
) -> (Vec<u8>, u16) {
    let ticks_per_row = ticks_per_row.max(1) as u32;
    let rows = &channel.rows;
    let n = rows.len();
    let mut bytes = Vec::new();
    let mut loop_offset = 0u16;
    let mut last_inst: Option<u8> = None;
    let mut last_attn: Option<u8> = None;
    let mut i = 0;

    while i < n {
        if loop_row == Some(i) {
            loop_offset = bytes.len() as u16;
        }
        let cell = rows[i];

        if cell.is_note_off() {
            push_duration_chunks(&mut bytes, op::REST, ticks_per_row);
            i += 1;
            continue;
        }

        if cell.is_note_on() {
            let mut run = 1usize;
            while i + run < n && rows[i + run].is_empty() && loop_row != Some(i + run) {
                run += 1;
            }
            if baked || last_inst != Some(cell.instrument) {
                if cell.instrument as usize >= crate::bank::MAX_SLOTS {
                    warnings.push(format!(
                        "channel {channel_index} row {i}: instrument id {} exceeds the {} slot bank",
                        cell.instrument,
                        crate::bank::MAX_SLOTS
                    ));
                }
                bytes.push(op::SET_INST);
                bytes.push(cell.instrument);
                last_inst = Some(cell.instrument);
            }
            if cell.attn != ATTN_USE_INSTRUMENT {
                let attn = cell.attn.min(15);
                if attn != cell.attn {
                    warnings.push(format!(
                        "channel {channel_index} row {i}: attenuation {} out of range, clamped to 15",
                        cell.attn
                    ));
                }
                if baked || last_attn != Some(attn) {
                    bytes.push(op::SET_ATTN);
                    bytes.push(attn);
                    last_attn = Some(attn);
                }
            }
            push_duration_chunks(&mut bytes, cell.note, run as u32 * ticks_per_row);
            i += run;
            continue;
        }

        if cell.fx == FX_SET_SPEED {
            bytes.push(op::HOST_CMD);
            bytes.push(1);
            bytes.push(cell.fx_param.max(1));
        }
        let mut run = 1usize;
        while i + run < n && rows[i + run].is_empty() && loop_row != Some(i + run) {
            run += 1;
        }
        push_duration_chunks(&mut bytes, op::REST, run as u32 * ticks_per_row);
        i += run;
    }

    bytes.push(op::END);
    (bytes, loop_offset)
}

/// Encodes an authored song into byte-code streams for its four channels.
pub fn export_song(song: &AuthoredSong, mode: ExportMode) -> ExportedStreams {
    let baked = mode == ExportMode::PreBaked;
    let mut warnings = Vec::new();
    let mut channel_bytes: [Vec<u8>; CHANNEL_COUNT] =
        [Vec::new(), Vec::new(), Vec::new(), Vec::new()];
    let mut loop_offsets = [0u16; CHANNEL_COUNT];

    for (idx, ch_bytes) in channel_bytes.iter_mut().enumerate() {
        let (bytes, loop_off) = encode_channel(
            &song.channels[idx],
            song.ticks_per_row,
            song.loop_row,
            baked,
            idx,
            &mut warnings,
        );
        *ch_bytes = bytes;
        loop_offsets[idx] = loop_off;
    }

    ExportedStreams {
        note_table: default_table_bytes(),
        channel_bytes,
        loop_offsets,
        warnings,
    }
}

/// Walks a raw byte-code stream and flags the two behaviors §4.7/§7 call
/// out as suspicious-but-legal: a nonzero `SET_PAN` payload (pan is parsed
/// and discarded, not a no-op on hardware this targets) and a fade
/// `HOST_CMD` whose argument is zero (cancels the fade instead of starting
/// one, per the decoder's own `FadeOut` handling). Bounds-checked so a
/// truncated stream never panics, mirroring `StreamVoice::step`'s own
/// end-of-stream handling.
pub fn scan_stream_warnings(bytes: &[u8]) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        let opcode = bytes[i];
        match opcode {
            op::SET_PAN => {
                if let Some(&pan) = bytes.get(i + 1) {
                    if pan != 0 {
                        warnings.push(format!(
                            "offset {i}: SET_PAN payload {pan} is parsed and discarded, not applied"
                        ));
                    }
                }
                i += 2;
            }
            op::HOST_CMD => {
                if let (Some(&kind), Some(&arg)) = (bytes.get(i + 1), bytes.get(i + 2)) {
                    if kind == 0 && arg == 0 {
                        warnings.push(format!(
                            "offset {i}: fade HOST_CMD with arg=0 cancels any running fade instead of starting one"
                        ));
                    }
                }
                i += 3;
            }
            op::SET_ATTN | op::SET_INST | op::SET_PITCH_CURVE | op::SET_ENV_CURVE
            | op::SET_MACRO | op::SET_EXPR | op::REST => i += 2,
            op::SET_ENV => i += 3,
            op::SET_VIB | op::SET_LFO => i += 4,
            op::SET_SWEEP => i += 5,
            op::SET_ADSR => i += 5,
            op::PITCH_BEND => i += 3,
            op::EXT => match bytes.get(i + 1) {
                Some(&crate::stream::EXT_SET_ADSR5) => i += 7,
                Some(&crate::stream::EXT_SET_MOD2) => i += 13,
                _ => i += 2,
            },
            op::END => i += 1,
            _ => i += 2,
        }
    }
    warnings
}

fn sanitize_symbol_prefix(song_id: &str) -> String {
    let mut stem: String = song_id
        .trim()
        .to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    while stem.contains("__") {
        stem = stem.replace("__", "_");
    }
    let stem = stem.trim_matches('_').to_string();
    let mut stem = if stem.is_empty() {
        "SONG".to_string()
    } else {
        stem
    };
    if stem.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        stem = format!("S_{stem}");
    }
    format!("PROJECT_{stem}")
}

fn write_byte_table(out: &mut String, bytes: &[u8]) {
    if bytes.is_empty() {
        out.push_str("    0x00,\n");
        return;
    }
    for chunk in bytes.chunks(12) {
        out.push_str("    ");
        let line: Vec<String> = chunk.iter().map(|b| format!("0x{b:02X}")).collect();
        out.push_str(&line.join(", "));
        out.push_str(",\n");
    }
}

/// Generates one song's C source file: the note table plus its four
/// channel streams and loop offsets, all namespaced under
/// `PROJECT_<SONG_ID>_`. Layout mirrors `MainWindow.cpp`'s
/// `rewrite_song_export_symbols` naming convention, baked in directly at
/// generation time rather than as a separate text-rewrite pass.
pub fn song_to_c_source(song_id: &str, exported: &ExportedStreams) -> String {
    let prefix = sanitize_symbol_prefix(song_id);
    let mut out = String::new();
    out.push_str("/* Generated by the NGPC sound authoring core. Do not edit by hand. */\n\n");
    out.push_str(&format!(
        "const unsigned char {prefix}_NOTE_TABLE[102] = {{\n"
    ));
    write_byte_table(&mut out, &exported.note_table);
    out.push_str("};\n\n");

    const NAMES: [&str; CHANNEL_COUNT] = ["BGM_CH0", "BGM_CH1", "BGM_CH2", "BGM_CHN"];
    for (i, name) in NAMES.iter().enumerate() {
        out.push_str(&format!(
            "const unsigned char {prefix}_{name}[] = {{\n"
        ));
        write_byte_table(&mut out, &exported.channel_bytes[i]);
        out.push_str("};\n");
        out.push_str(&format!(
            "const unsigned short {prefix}_{name}_LOOP = {};\n\n",
            exported.loop_offsets[i]
        ));
    }
    out
}

fn push_field(out: &mut String, value: impl std::fmt::Display, last: bool) {
    out.push_str(&value.to_string());
    if !last {
        out.push_str(", ");
    }
}

/// Generates `project_instruments.c`: one `BgmInstrumentDef` initializer per
/// preset, fields in the exact order `InstrumentDef` mirrors from
/// `InstrumentPresetsToCArray`.
pub fn instruments_to_c_source(bank: &SoundBank) -> String {
    let mut out = String::new();
    out.push_str("/* Generated by the NGPC sound authoring core. Do not edit by hand. */\n\n");
    out.push_str(&format!(
        "const unsigned char PROJECT_INSTRUMENT_COUNT = {};\n\n",
        bank.instruments.len().min(crate::bank::MAX_SLOTS)
    ));
    out.push_str("const BgmInstrumentDef PROJECT_INSTRUMENTS[] = {\n");
    for (i, preset) in bank.instruments.iter().enumerate() {
        let d = &preset.def;
        out.push_str(&format!("    /* {i}: {} */\n", preset.name));
        out.push_str("    { ");
        push_field(&mut out, d.attn, false);
        push_field(&mut out, d.env_on, false);
        push_field(&mut out, d.env_step, false);
        push_field(&mut out, d.env_speed, false);
        push_field(&mut out, d.env_curve_id, false);
        push_field(&mut out, d.pitch_curve_id, false);
        push_field(&mut out, d.vib_on, false);
        push_field(&mut out, d.vib_depth, false);
        push_field(&mut out, d.vib_speed, false);
        push_field(&mut out, d.vib_delay, false);
        push_field(&mut out, d.sweep_on, false);
        push_field(&mut out, d.sweep_end, false);
        push_field(&mut out, d.sweep_step, false);
        push_field(&mut out, d.sweep_speed, false);
        push_field(&mut out, d.mode, false);
        push_field(&mut out, d.noise_config, false);
        push_field(&mut out, d.macro_id, false);
        push_field(&mut out, d.adsr_on, false);
        push_field(&mut out, d.adsr_attack, false);
        push_field(&mut out, d.adsr_decay, false);
        push_field(&mut out, d.adsr_sustain, false);
        push_field(&mut out, d.adsr_release, false);
        push_field(&mut out, d.adsr_sustain_rate, false);
        push_field(&mut out, d.lfo_on, false);
        push_field(&mut out, d.lfo_wave, false);
        push_field(&mut out, d.lfo_rate, false);
        push_field(&mut out, d.lfo_depth, false);
        push_field(&mut out, d.lfo_hold, false);
        push_field(&mut out, d.lfo2_on, false);
        push_field(&mut out, d.lfo2_wave, false);
        push_field(&mut out, d.lfo2_hold, false);
        push_field(&mut out, d.lfo2_rate, false);
        push_field(&mut out, d.lfo2_depth, false);
        push_field(&mut out, d.lfo_algo, true);
        out.push_str(" },\n");
    }
    out.push_str("};\n");
    out
}

/// Generates `project_sfx.c`: one parallel-array row per saved SFX preset,
/// matching `MainWindow.cpp`'s `PROJECT_SFX_*` flat-table convention (tone
/// and noise presets share one table; the unused kind's fields read 0).
pub fn sfx_to_c_source(project: &Project) -> String {
    let mut out = String::new();
    out.push_str("/* Generated by the NGPC sound authoring core. Do not edit by hand. */\n\n");
    out.push_str(&format!(
        "const unsigned char PROJECT_SFX_COUNT = {};\n\n",
        project.sfx.len().min(255)
    ));

    macro_rules! array {
        ($name:expr, $ty:expr, $values:expr) => {{
            out.push_str(&format!("{} PROJECT_SFX_{}[] = {{\n    ", $ty, $name));
            let line: Vec<String> = $values;
            out.push_str(&line.join(", "));
            out.push_str("\n};\n");
        }};
    }

    array!(
        "NAME",
        "const char*",
        project
            .sfx
            .iter()
            .map(|p| format!("\"{}\"", preset_name(p)))
            .collect()
    );
    array!(
        "IS_NOISE",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| matches!(p, SfxPreset::Noise(_)).then(|| "1").unwrap_or("0").to_string())
            .collect()
    );
    array!(
        "TONE_CHANNEL",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Tone(t) => t.channel.to_string(),
                SfxPreset::Noise(_) => "0".to_string(),
            })
            .collect()
    );
    array!(
        "DIVIDER",
        "const unsigned short",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Tone(t) => t.divider.to_string(),
                SfxPreset::Noise(_) => "0".to_string(),
            })
            .collect()
    );
    array!(
        "NOISE_RATE",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Noise(n) => n.rate.to_string(),
                SfxPreset::Tone(_) => "0".to_string(),
            })
            .collect()
    );
    array!(
        "NOISE_KIND",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Noise(n) => n.kind.to_string(),
                SfxPreset::Tone(_) => "0".to_string(),
            })
            .collect()
    );
    array!(
        "ATTN",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Tone(t) => t.attn.to_string(),
                SfxPreset::Noise(n) => n.attn.to_string(),
            })
            .collect()
    );
    array!(
        "FRAMES",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Tone(t) => t.frames.to_string(),
                SfxPreset::Noise(n) => n.frames.to_string(),
            })
            .collect()
    );
    array!(
        "SWEEP_ON",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Tone(t) => bool_to_c(t.sweep_on),
                SfxPreset::Noise(_) => "0".to_string(),
            })
            .collect()
    );
    array!(
        "SWEEP_END",
        "const unsigned short",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Tone(t) => t.sweep_end.to_string(),
                SfxPreset::Noise(_) => "0".to_string(),
            })
            .collect()
    );
    array!(
        "SWEEP_STEP",
        "const short",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Tone(t) => t.sweep_step.to_string(),
                SfxPreset::Noise(_) => "0".to_string(),
            })
            .collect()
    );
    array!(
        "SWEEP_SPEED",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Tone(t) => t.sweep_speed.to_string(),
                SfxPreset::Noise(_) => "0".to_string(),
            })
            .collect()
    );
    array!(
        "SWEEP_PING",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Tone(t) => bool_to_c(t.sweep_ping),
                SfxPreset::Noise(_) => "0".to_string(),
            })
            .collect()
    );
    array!(
        "BURST_ON",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Noise(n) => bool_to_c(n.burst_on),
                SfxPreset::Tone(_) => "0".to_string(),
            })
            .collect()
    );
    array!(
        "BURST_DURATION",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Noise(n) => n.burst_duration.to_string(),
                SfxPreset::Tone(_) => "0".to_string(),
            })
            .collect()
    );
    array!(
        "ENV_ON",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Tone(t) => bool_to_c(t.env_on),
                SfxPreset::Noise(n) => bool_to_c(n.env_on),
            })
            .collect()
    );
    array!(
        "ENV_STEP",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Tone(t) => t.env_step.to_string(),
                SfxPreset::Noise(n) => n.env_step.to_string(),
            })
            .collect()
    );
    array!(
        "ENV_SPEED",
        "const unsigned char",
        project
            .sfx
            .iter()
            .map(|p| match p {
                SfxPreset::Tone(t) => t.env_speed.to_string(),
                SfxPreset::Noise(n) => n.env_speed.to_string(),
            })
            .collect()
    );

    out
}

fn preset_name(p: &SfxPreset) -> &str {
    match p {
        SfxPreset::Tone(t) => &t.name,
        SfxPreset::Noise(n) => &n.name,
    }
}

fn bool_to_c(b: bool) -> String {
    if b { "1" } else { "0" }.to_string()
}

/// Generated header for `project_audio_api.c`. A single lookup table of
/// song refs plus an index-based start helper, so a target build can
/// switch songs without naming per-song symbols directly.
pub fn audio_api_header() -> &'static str {
    "/* Generated by the NGPC sound authoring core. Do not edit by hand. */\n\
#ifndef NGPC_PROJECT_AUDIO_API_H\n\
#define NGPC_PROJECT_AUDIO_API_H\n\n\
#ifdef __cplusplus\nextern \"C\" {\n#endif\n\n\
typedef struct NgpcProjectSongRef {\n    \
const char* id;\n    \
const char* name;\n    \
const unsigned char* note_table;\n    \
const unsigned char* ch0;\n    \
const unsigned char* ch1;\n    \
const unsigned char* ch2;\n    \
const unsigned char* chn;\n    \
unsigned short loop_ch0;\n    \
unsigned short loop_ch1;\n    \
unsigned short loop_ch2;\n    \
unsigned short loop_chn;\n\
} NgpcProjectSongRef;\n\n\
extern const unsigned short NGPC_PROJECT_SONG_COUNT;\n\
extern const NgpcProjectSongRef NGPC_PROJECT_SONGS[];\n\n\
const NgpcProjectSongRef* NgpcProject_GetSong(unsigned short index);\n\
void NgpcProject_BgmStartLoop4ByIndex(unsigned short index);\n\n\
#ifdef __cplusplus\n}\n#endif\n\n\
#endif /* NGPC_PROJECT_AUDIO_API_H */\n"
}

/// One song's identity as seen by the generated `project_audio_api.c`.
pub struct SongExportEntry {
    pub id: String,
    pub name: String,
}

/// Generates `project_audio_api.c`: externs every song's symbols, a lookup
/// table of `NgpcProjectSongRef`, and the index-based start helper that
/// calls into the runtime driver's `Bgm_SetNoteTable`/`Bgm_StartLoop4Ex`.
pub fn audio_api_source(songs: &[SongExportEntry]) -> String {
    let mut c = String::new();
    c.push_str("/* Generated by the NGPC sound authoring core. Do not edit by hand. */\n");
    c.push_str("#include \"project_audio_api.h\"\n\n");
    c.push_str("extern void Bgm_SetNoteTable(const unsigned char* note_table);\n");
    c.push_str("extern void Bgm_StartLoop4Ex(const unsigned char* stream0, unsigned short loop0,\n");
    c.push_str("                             const unsigned char* stream1, unsigned short loop1,\n");
    c.push_str("                             const unsigned char* stream2, unsigned short loop2,\n");
    c.push_str("                             const unsigned char* streamN, unsigned short loopN);\n\n");

    let prefixes: Vec<String> = songs.iter().map(|s| sanitize_symbol_prefix(&s.id)).collect();
    const NAMES: [&str; CHANNEL_COUNT] = ["BGM_CH0", "BGM_CH1", "BGM_CH2", "BGM_CHN"];
    for prefix in &prefixes {
        c.push_str(&format!("extern const unsigned char {prefix}_NOTE_TABLE[];\n"));
        for name in NAMES {
            c.push_str(&format!("extern const unsigned char {prefix}_{name}[];\n"));
        }
        for name in NAMES {
            c.push_str(&format!("extern const unsigned short {prefix}_{name}_LOOP;\n"));
        }
        c.push('\n');
    }

    c.push_str(&format!(
        "const unsigned short NGPC_PROJECT_SONG_COUNT = {};\n\n",
        songs.len()
    ));
    c.push_str("const NgpcProjectSongRef NGPC_PROJECT_SONGS[] = {\n");
    for (song, prefix) in songs.iter().zip(prefixes.iter()) {
        c.push_str("    {\n");
        c.push_str(&format!("        \"{}\",\n", song.id));
        c.push_str(&format!("        \"{}\",\n", song.name));
        c.push_str(&format!("        {prefix}_NOTE_TABLE,\n"));
        c.push_str(&format!("        {prefix}_BGM_CH0,\n"));
        c.push_str(&format!("        {prefix}_BGM_CH1,\n"));
        c.push_str(&format!("        {prefix}_BGM_CH2,\n"));
        c.push_str(&format!("        {prefix}_BGM_CHN,\n"));
        c.push_str(&format!("        {prefix}_BGM_CH0_LOOP,\n"));
        c.push_str(&format!("        {prefix}_BGM_CH1_LOOP,\n"));
        c.push_str(&format!("        {prefix}_BGM_CH2_LOOP,\n"));
        c.push_str(&format!("        {prefix}_BGM_CHN_LOOP,\n"));
        c.push_str("    },\n");
    }
    c.push_str("};\n\n");
    c.push_str("const NgpcProjectSongRef* NgpcProject_GetSong(unsigned short index) {\n");
    c.push_str("    if (index >= NGPC_PROJECT_SONG_COUNT) return 0;\n");
    c.push_str("    return &NGPC_PROJECT_SONGS[index];\n");
    c.push_str("}\n\n");
    c.push_str("void NgpcProject_BgmStartLoop4ByIndex(unsigned short index) {\n");
    c.push_str("    const NgpcProjectSongRef* song = NgpcProject_GetSong(index);\n");
    c.push_str("    if (!song) return;\n");
    c.push_str("    Bgm_SetNoteTable(song->note_table);\n");
    c.push_str("    Bgm_StartLoop4Ex(song->ch0, song->loop_ch0, song->ch1, song->loop_ch1,\n");
    c.push_str("                     song->ch2, song->loop_ch2, song->chn, song->loop_chn);\n");
    c.push_str("}\n");
    c
}

/// Plain-text manifest written alongside the generated sources, listing
/// every exported song's id, file, and symbol prefix plus the export mode
/// used. Grounded on `MainWindow.cpp`'s manifest writer, trimmed to the
/// fields this exporter actually produces.
pub fn manifest_text(project: &Project, mode: ExportMode) -> String {
    let mut out = String::new();
    out.push_str("NGPC sound authoring core - project audio manifest\n");
    out.push_str(&format!(
        "mode={}\n",
        match mode {
            ExportMode::Hybrid => "hybrid",
            ExportMode::PreBaked => "pre-baked",
        }
    ));
    out.push_str(&format!("song_count={}\n", project.songs.len()));
    out.push_str("songs:\n");
    for song in &project.songs {
        out.push_str(&format!(
            "  - id={} name={} file=exports/{}.c symbols={}_*\n",
            song.id,
            song.name,
            song.id,
            sanitize_symbol_prefix(&song.id)
        ));
    }
    out.push_str("instruments=exports/project_instruments.c\n");
    out.push_str("sfx=exports/project_sfx.c\n");
    out.push_str("api=exports/project_audio_api.h, exports/project_audio_api.c\n");
    out
}

/// Writes a complete export pass to `<root>/exports/`: one C file per
/// authored song, `project_instruments.c`, `project_sfx.c`, the audio API
/// header/source pair, and the manifest. Returns every warning collected
/// while encoding.
pub fn write_project_export(
    root: &Path,
    project: &Project,
    bank: &SoundBank,
    songs: &[(String, AuthoredSong)],
    mode: ExportMode,
) -> SoundResult<Vec<String>> {
    let exports_dir = root.join("exports");
    fs::create_dir_all(&exports_dir)
        .map_err(|e| SoundError::Export(format!("{}: {e}", exports_dir.display())))?;

    let mut warnings = Vec::new();
    for (id, song) in songs {
        let exported = export_song(song, mode);
        warnings.extend(exported.warnings.clone());
        for ch_bytes in &exported.channel_bytes {
            warnings.extend(scan_stream_warnings(ch_bytes));
        }
        let path = exports_dir.join(format!("{id}.c"));
        fs::write(&path, song_to_c_source(id, &exported))
            .map_err(|e| SoundError::Export(format!("{}: {e}", path.display())))?;
    }

    let instruments_path = exports_dir.join("project_instruments.c");
    fs::write(&instruments_path, instruments_to_c_source(bank))
        .map_err(|e| SoundError::Export(format!("{}: {e}", instruments_path.display())))?;

    let sfx_path = exports_dir.join("project_sfx.c");
    fs::write(&sfx_path, sfx_to_c_source(project))
        .map_err(|e| SoundError::Export(format!("{}: {e}", sfx_path.display())))?;

    let api_header_path = exports_dir.join("project_audio_api.h");
    fs::write(&api_header_path, audio_api_header())
        .map_err(|e| SoundError::Export(format!("{}: {e}", api_header_path.display())))?;

    let entries: Vec<SongExportEntry> = songs
        .iter()
        .map(|(id, _)| SongExportEntry {
            id: id.clone(),
            name: project
                .songs
                .iter()
                .find(|s| &s.id == id)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| id.clone()),
        })
        .collect();
    let api_source_path = exports_dir.join("project_audio_api.c");
    fs::write(&api_source_path, audio_api_source(&entries))
        .map_err(|e| SoundError::Export(format!("{}: {e}", api_source_path.display())))?;

    let manifest_path = exports_dir.join("project_audio_manifest.txt");
    fs::write(&manifest_path, manifest_text(project, mode))
        .map_err(|e| SoundError::Export(format!("{}: {e}", manifest_path.display())))?;

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn single_note_song(note: u8, instrument: u8, rows: usize, ticks_per_row: u8) -> AuthoredSong {
        let mut song = AuthoredSong::new(rows, ticks_per_row);
        song.channels[0].rows[0] = TrackerCell {
            note,
            instrument,
            attn: ATTN_USE_INSTRUMENT,
            fx: 0,
            fx_param: 0,
        };
        song
    }

    #[test]
    fn hybrid_mode_only_emits_set_inst_once_for_unchanged_instrument() {
        let mut song = single_note_song(10, 2, 4, 4);
        song.channels[0].rows[1] = TrackerCell {
            note: 12,
            instrument: 2,
            attn: ATTN_USE_INSTRUMENT,
            fx: 0,
            fx_param: 0,
        };
        let exported = export_song(&song, ExportMode::Hybrid);
        let bytes = &exported.channel_bytes[0];
        let set_inst_count = bytes
            .iter()
            .zip(bytes.iter().skip(1))
            .filter(|(a, _)| **a == op::SET_INST)
            .count();
        assert_eq!(set_inst_count, 1);
    }

    #[test]
    fn pre_baked_mode_repeats_set_inst_for_every_note() {
        let mut song = single_note_song(10, 2, 4, 4);
        song.channels[0].rows[1] = TrackerCell {
            note: 12,
            instrument: 2,
            attn: ATTN_USE_INSTRUMENT,
            fx: 0,
            fx_param: 0,
        };
        let exported = export_song(&song, ExportMode::PreBaked);
        let bytes = &exported.channel_bytes[0];
        let set_inst_count = bytes.iter().filter(|&&b| b == op::SET_INST).count();
        assert_eq!(set_inst_count, 2);
    }

    #[test]
    fn empty_rows_coalesce_into_the_prior_note_duration() {
        let song = single_note_song(10, 2, 8, 4);
        let exported = export_song(&song, ExportMode::Hybrid);
        let bytes = &exported.channel_bytes[0];
        assert_eq!(bytes[bytes.len() - 3], 10);
        assert_eq!(bytes[bytes.len() - 2], 32);
        assert_eq!(*bytes.last().unwrap(), op::END);
    }

    #[test]
    fn note_run_longer_than_255_ticks_splits_across_chunks() {
        let song = single_note_song(10, 2, 100, 4);
        let exported = export_song(&song, ExportMode::Hybrid);
        let bytes = &exported.channel_bytes[0];
        let note_bytes: Vec<u8> = bytes
            .iter()
            .zip(bytes.iter().skip(1))
            .filter(|(a, _)| **a == 10)
            .map(|(_, &b)| b)
            .collect();
        assert!(note_bytes.len() >= 2);
        let total: u32 = note_bytes.iter().map(|&b| b as u32).sum();
        assert_eq!(total, 400);
    }

    #[test]
    fn loop_offset_points_at_the_opcode_boundary() {
        let mut song = single_note_song(10, 2, 6, 1);
        song.loop_row = Some(1);
        song.channels[0].rows[1] = TrackerCell {
            note: 15,
            instrument: 2,
            attn: ATTN_USE_INSTRUMENT,
            fx: 0,
            fx_param: 0,
        };
        let exported = export_song(&song, ExportMode::Hybrid);
        let bytes = &exported.channel_bytes[0];
        let off = exported.loop_offsets[0] as usize;
        assert!(off < bytes.len());
        assert!(bytes[off] == op::SET_INST || bytes[off] == 15);
    }

    #[test]
    fn out_of_range_attn_is_clamped_and_warned() {
        let mut song = AuthoredSong::new(2, 4);
        song.channels[0].rows[0] = TrackerCell {
            note: 10,
            instrument: 0,
            attn: 40,
            fx: 0,
            fx_param: 0,
        };
        let exported = export_song(&song, ExportMode::Hybrid);
        assert!(!exported.warnings.is_empty());
        let attn_pos = exported.channel_bytes[0]
            .iter()
            .position(|&b| b == op::SET_ATTN)
            .unwrap();
        assert_eq!(exported.channel_bytes[0][attn_pos + 1], 15);
    }

    #[test]
    fn scan_stream_warnings_flags_nonzero_pan_and_zero_arg_fade() {
        let bytes = vec![op::SET_PAN, 3, op::HOST_CMD, 0, 0, op::END];
        let warnings = scan_stream_warnings(&bytes);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn symbol_prefix_sanitizes_and_avoids_leading_digit() {
        assert_eq!(sanitize_symbol_prefix("title theme"), "PROJECT_TITLE_THEME");
        assert_eq!(sanitize_symbol_prefix("2nd-song!"), "PROJECT_S_2ND_SONG");
    }

    #[test]
    fn song_to_c_source_embeds_symbols_and_loop_constants() {
        let song = single_note_song(10, 0, 4, 4);
        let exported = export_song(&song, ExportMode::Hybrid);
        let source = song_to_c_source("boss_theme", &exported);
        assert!(source.contains("PROJECT_BOSS_THEME_NOTE_TABLE"));
        assert!(source.contains("PROJECT_BOSS_THEME_BGM_CH0_LOOP"));
    }

    #[test]
    fn instruments_to_c_source_emits_one_row_per_preset() {
        let bank = SoundBank::factory();
        let source = instruments_to_c_source(&bank);
        let row_count = source.matches("},\n").count();
        assert_eq!(row_count, bank.instruments.len());
    }

    #[test]
    fn write_project_export_creates_every_expected_file() {
        let dir = tempdir().unwrap();
        let project = Project::new("Demo");
        let bank = SoundBank::factory();
        let song = single_note_song(10, 0, 4, 4);
        let warnings =
            write_project_export(dir.path(), &project, &bank, &[("song1".into(), song)], ExportMode::Hybrid)
                .unwrap();
        assert!(warnings.is_empty());
        let exports = dir.path().join("exports");
        for name in [
            "song1.c",
            "project_instruments.c",
            "project_sfx.c",
            "project_audio_api.h",
            "project_audio_api.c",
            "project_audio_manifest.txt",
        ] {
            assert!(exports.join(name).exists(), "missing {name}");
        }
    }
}
