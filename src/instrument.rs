//! Instrument model: timbre parameter blocks plus the factory content banks.
//!
//! `InstrumentDef` mirrors `BgmInstrumentDef` from the original driver field
//! for field, in source order, so the C-array exporter (`src/export.rs`) can
//! emit initializers in the same sequence as the original
//! `InstrumentPresetsToCArray`.
//!
//! Reference: `examples/original_source/core/include/ngpc/instrument.h`,
//! `core/src/instrument.cpp`.

use serde::{Deserialize, Serialize};

/// One timbre's full parameter block. Field order matches
/// `BgmInstrumentDef` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentDef {
    pub attn: u8,
    pub env_on: u8,
    pub env_step: u8,
    pub env_speed: u8,
    pub env_curve_id: u8,
    pub pitch_curve_id: u8,
    pub vib_on: u8,
    pub vib_depth: u8,
    pub vib_speed: u8,
    pub vib_delay: u8,
    pub sweep_on: u8,
    pub sweep_end: u16,
    pub sweep_step: i16,
    pub sweep_speed: u8,
    pub mode: u8,
    pub noise_config: u8,
    pub macro_id: u8,
    pub adsr_on: u8,
    pub adsr_attack: u8,
    pub adsr_decay: u8,
    pub adsr_sustain: u8,
    pub adsr_release: u8,
    pub adsr_sustain_rate: u8,
    pub lfo_on: u8,
    pub lfo_wave: u8,
    pub lfo_rate: u8,
    pub lfo_depth: u8,
    pub lfo_hold: u8,
    pub lfo2_on: u8,
    pub lfo2_wave: u8,
    pub lfo2_hold: u8,
    pub lfo2_rate: u8,
    pub lfo2_depth: u8,
    pub lfo_algo: u8,
}

impl Default for InstrumentDef {
    fn default() -> Self {
        Self {
            attn: 2,
            env_on: 0,
            env_step: 1,
            env_speed: 1,
            env_curve_id: 0,
            pitch_curve_id: 0,
            vib_on: 0,
            vib_depth: 0,
            vib_speed: 1,
            vib_delay: 0,
            sweep_on: 0,
            sweep_end: 1,
            sweep_step: 0,
            sweep_speed: 1,
            mode: 0,
            noise_config: 0,
            macro_id: 0,
            adsr_on: 0,
            adsr_attack: 0,
            adsr_decay: 0,
            adsr_sustain: 0,
            adsr_release: 0,
            adsr_sustain_rate: 0,
            lfo_on: 0,
            lfo_wave: 0,
            lfo_rate: 1,
            lfo_depth: 0,
            lfo_hold: 0,
            lfo2_on: 0,
            lfo2_wave: 0,
            lfo2_hold: 0,
            lfo2_rate: 1,
            lfo2_depth: 0,
            lfo_algo: 1,
        }
    }
}

impl InstrumentDef {
    /// Clamp every field to the ranges `spec.md` §3/§4.5 document, as done
    /// on bank load.
    pub fn clamp(&mut self) {
        self.attn = self.attn.min(15);
        self.env_curve_id = self.env_curve_id.min(5);
        self.pitch_curve_id = self.pitch_curve_id.min(8);
        self.sweep_end = self.sweep_end.clamp(1, 1023);
        self.mode = self.mode.min(1);
        self.noise_config = self.noise_config & 0x07;
        self.adsr_sustain = self.adsr_sustain.min(15);
        if self.lfo_wave > 4 {
            self.lfo_wave = 0;
        }
        if self.lfo2_wave > 4 {
            self.lfo2_wave = 0;
        }
        self.lfo_algo = self.lfo_algo.min(7);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentPreset {
    pub name: String,
    pub def: InstrumentDef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvCurve {
    pub name: String,
    pub steps: Vec<i8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchCurve {
    pub name: String,
    pub steps: Vec<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroStep {
    pub frames: u8,
    pub attn_delta: i8,
    pub pitch_delta: i16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macro {
    pub name: String,
    pub steps: Vec<MacroStep>,
}

fn preset(name: &str, def: InstrumentDef) -> InstrumentPreset {
    InstrumentPreset {
        name: name.to_string(),
        def,
    }
}

/// The factory instrument bank, ported verbatim (including its two-pass
/// construction) from `FactoryInstrumentPresets`: a base table, a
/// normalization pass that fills in the modulation fields added after the
/// legacy presets were authored, then five named overrides that opt specific
/// presets into the richer dual-LFO behavior.
pub fn factory_instrument_presets() -> Vec<InstrumentPreset> {
    let d = InstrumentDef::default();
    let mut presets = vec![
        preset("Clean Tone", InstrumentDef { ..d }),
        preset(
            "Noise Kick",
            InstrumentDef {
                mode: 1,
                adsr_on: 1,
                adsr_decay: 1,
                adsr_sustain: 13,
                adsr_release: 2,
                ..d
            },
        ),
        preset(
            "Noise HiHat",
            InstrumentDef {
                attn: 4,
                mode: 1,
                noise_config: 4,
                adsr_on: 1,
                adsr_sustain: 15,
                adsr_release: 1,
                ..d
            },
        ),
        preset(
            "Noise Snare",
            InstrumentDef {
                mode: 1,
                noise_config: 5,
                adsr_on: 1,
                adsr_decay: 1,
                adsr_sustain: 11,
                adsr_release: 2,
                ..d
            },
        ),
        preset(
            "Bright Lead",
            InstrumentDef {
                attn: 1,
                vib_on: 1,
                vib_depth: 2,
                vib_speed: 3,
                vib_delay: 2,
                adsr_on: 1,
                adsr_attack: 1,
                adsr_decay: 2,
                adsr_sustain: 4,
                adsr_release: 4,
                ..d
            },
        ),
        preset(
            "Soft Pad",
            InstrumentDef {
                attn: 4,
                vib_on: 1,
                vib_depth: 1,
                vib_speed: 5,
                vib_delay: 4,
                adsr_on: 1,
                adsr_attack: 3,
                adsr_decay: 4,
                adsr_sustain: 8,
                adsr_release: 8,
                ..d
            },
        ),
        preset(
            "Pluck",
            InstrumentDef {
                macro_id: 1,
                adsr_on: 1,
                adsr_decay: 1,
                adsr_sustain: 10,
                adsr_release: 2,
                ..d
            },
        ),
        preset(
            "Bass",
            InstrumentDef {
                attn: 3,
                pitch_curve_id: 1,
                sweep_on: 1,
                sweep_end: 180,
                sweep_step: -2,
                sweep_speed: 3,
                adsr_on: 1,
                adsr_decay: 2,
                adsr_sustain: 6,
                adsr_release: 4,
                ..d
            },
        ),
        preset(
            "Bell",
            InstrumentDef {
                pitch_curve_id: 3,
                vib_on: 1,
                vib_depth: 1,
                vib_speed: 4,
                vib_delay: 2,
                adsr_on: 1,
                adsr_decay: 2,
                adsr_sustain: 9,
                adsr_release: 4,
                ..d
            },
        ),
        preset(
            "Zap",
            InstrumentDef {
                pitch_curve_id: 4,
                sweep_on: 1,
                sweep_end: 220,
                sweep_step: -6,
                sweep_speed: 2,
                macro_id: 1,
                adsr_on: 1,
                adsr_sustain: 12,
                adsr_release: 1,
                ..d
            },
        ),
        preset(
            "Square Brass",
            InstrumentDef {
                pitch_curve_id: 2,
                sweep_on: 1,
                sweep_end: 260,
                sweep_step: -3,
                sweep_speed: 2,
                adsr_on: 1,
                adsr_attack: 1,
                adsr_decay: 2,
                adsr_sustain: 5,
                adsr_release: 4,
                ..d
            },
        ),
        preset(
            "Wide Lead",
            InstrumentDef {
                attn: 1,
                pitch_curve_id: 3,
                vib_on: 1,
                vib_depth: 2,
                vib_speed: 3,
                vib_delay: 1,
                adsr_on: 1,
                adsr_decay: 1,
                adsr_sustain: 4,
                adsr_release: 3,
                ..d
            },
        ),
        preset(
            "Deep Bass",
            InstrumentDef {
                pitch_curve_id: 1,
                sweep_on: 1,
                sweep_end: 140,
                sweep_step: -1,
                sweep_speed: 4,
                adsr_on: 1,
                adsr_decay: 2,
                adsr_sustain: 7,
                adsr_release: 5,
                ..d
            },
        ),
        preset(
            "Soft Keys",
            InstrumentDef {
                attn: 3,
                env_curve_id: 1,
                vib_on: 1,
                vib_depth: 1,
                vib_speed: 4,
                vib_delay: 3,
                adsr_on: 1,
                adsr_attack: 2,
                adsr_decay: 3,
                adsr_sustain: 8,
                adsr_release: 6,
                ..d
            },
        ),
        preset(
            "Chime Pad",
            InstrumentDef {
                attn: 3,
                env_curve_id: 1,
                pitch_curve_id: 2,
                vib_on: 1,
                vib_depth: 1,
                vib_speed: 5,
                vib_delay: 4,
                adsr_on: 1,
                adsr_attack: 2,
                adsr_decay: 3,
                adsr_sustain: 9,
                adsr_release: 8,
                lfo_rate: 2,
                ..d
            },
        ),
        preset(
            "Sweep Rise FX",
            InstrumentDef {
                pitch_curve_id: 2,
                sweep_on: 1,
                sweep_end: 380,
                sweep_step: 6,
                sweep_speed: 1,
                macro_id: 1,
                adsr_on: 1,
                adsr_sustain: 11,
                adsr_release: 1,
                ..d
            },
        ),
        preset(
            "Sweep Fall FX",
            InstrumentDef {
                pitch_curve_id: 4,
                sweep_on: 1,
                sweep_end: 120,
                sweep_step: -8,
                sweep_speed: 1,
                macro_id: 1,
                adsr_on: 1,
                adsr_sustain: 12,
                adsr_release: 1,
                ..d
            },
        ),
        preset(
            "Noise Clap",
            InstrumentDef {
                mode: 1,
                noise_config: 6,
                adsr_on: 1,
                adsr_sustain: 10,
                adsr_release: 3,
                ..d
            },
        ),
        preset(
            "Noise Crash",
            InstrumentDef {
                mode: 1,
                noise_config: 6,
                adsr_on: 1,
                adsr_decay: 1,
                adsr_sustain: 14,
                adsr_release: 6,
                ..d
            },
        ),
        preset(
            "Open HiHat",
            InstrumentDef {
                attn: 4,
                mode: 1,
                noise_config: 4,
                adsr_on: 1,
                adsr_sustain: 14,
                adsr_release: 4,
                ..d
            },
        ),
        preset(
            "Noise Tom",
            InstrumentDef {
                mode: 1,
                noise_config: 1,
                adsr_on: 1,
                adsr_decay: 1,
                adsr_sustain: 11,
                adsr_release: 3,
                ..d
            },
        ),
        preset(
            "Siren FX",
            InstrumentDef {
                sweep_on: 1,
                sweep_end: 90,
                sweep_step: -2,
                sweep_speed: 2,
                adsr_on: 1,
                adsr_sustain: 10,
                adsr_release: 2,
                lfo_wave: 2,
                lfo_rate: 9,
                ..d
            },
        ),
        preset(
            "Chip Lead PWM",
            InstrumentDef {
                attn: 1,
                vib_on: 1,
                vib_depth: 1,
                vib_speed: 3,
                vib_delay: 1,
                adsr_on: 1,
                adsr_decay: 1,
                adsr_sustain: 4,
                adsr_release: 3,
                lfo_on: 1,
                lfo_wave: 4,
                lfo_rate: 4,
                ..d
            },
        ),
        preset(
            "Pulse Organ",
            InstrumentDef {
                vib_on: 1,
                vib_depth: 1,
                vib_speed: 6,
                vib_delay: 10,
                lfo_on: 1,
                lfo_wave: 0,
                lfo_rate: 2,
                ..d
            },
        ),
        preset(
            "Chip Piano",
            InstrumentDef {
                env_on: 1,
                env_step: 2,
                env_curve_id: 2,
                macro_id: 1,
                ..d
            },
        ),
        preset(
            "Air Pad",
            InstrumentDef {
                attn: 5,
                vib_on: 1,
                vib_depth: 1,
                vib_speed: 6,
                vib_delay: 6,
                adsr_on: 1,
                adsr_attack: 6,
                adsr_decay: 6,
                adsr_sustain: 9,
                adsr_release: 12,
                ..d
            },
        ),
        preset(
            "Pulse Bass",
            InstrumentDef {
                pitch_curve_id: 5,
                sweep_on: 1,
                sweep_end: 220,
                sweep_step: -3,
                sweep_speed: 2,
                macro_id: 3,
                adsr_on: 1,
                adsr_decay: 2,
                adsr_sustain: 7,
                adsr_release: 4,
                ..d
            },
        ),
        preset(
            "Metal Lead",
            InstrumentDef {
                attn: 1,
                pitch_curve_id: 6,
                vib_on: 1,
                vib_depth: 2,
                vib_speed: 2,
                vib_delay: 1,
                adsr_on: 1,
                adsr_decay: 1,
                adsr_sustain: 4,
                adsr_release: 4,
                ..d
            },
        ),
        preset(
            "UI Blip",
            InstrumentDef {
                attn: 1,
                env_on: 1,
                env_step: 2,
                env_curve_id: 2,
                pitch_curve_id: 7,
                sweep_on: 1,
                sweep_end: 300,
                sweep_step: -18,
                sweep_speed: 1,
                ..d
            },
        ),
        preset(
            "Noise Ride",
            InstrumentDef {
                attn: 5,
                mode: 1,
                noise_config: 6,
                adsr_on: 1,
                adsr_decay: 1,
                adsr_sustain: 13,
                adsr_release: 8,
                ..d
            },
        ),
        preset(
            "Noise Rim",
            InstrumentDef {
                attn: 1,
                mode: 1,
                noise_config: 0,
                adsr_on: 1,
                adsr_sustain: 12,
                adsr_release: 1,
                ..d
            },
        ),
        preset(
            "Noise Shaker",
            InstrumentDef {
                attn: 6,
                mode: 1,
                noise_config: 4,
                adsr_on: 1,
                adsr_sustain: 14,
                adsr_release: 2,
                ..d
            },
        ),
    ];

    // New modulation fields were added after the legacy presets. Normalize
    // all presets first, then opt in richer behavior on selected tones.
    for p in &mut presets {
        let d = &mut p.def;
        d.adsr_sustain_rate = 0;
        d.lfo_hold = 0;
        d.lfo2_on = 0;
        d.lfo2_wave = 0;
        d.lfo2_hold = 0;
        d.lfo2_rate = 1;
        d.lfo2_depth = 0;
        d.lfo_algo = 1;
        if d.lfo_wave > 4 {
            d.lfo_wave = 0;
        }
        if d.lfo2_wave > 4 {
            d.lfo2_wave = 0;
        }
        if d.adsr_sustain > 15 {
            d.adsr_sustain = 15;
        }
        if d.mode == 1 {
            d.lfo_on = 0;
            d.lfo_depth = 0;
            d.lfo2_on = 0;
            d.lfo2_depth = 0;
            d.lfo_algo = 0;
        } else if d.lfo_on != 0 && d.lfo_depth > 0 && d.lfo_rate == 0 {
            d.lfo_rate = 1;
        }
    }

    // Bright Lead: SNK-style tremolo + vibrato split (algo 1).
    {
        let d = &mut presets[4].def;
        d.adsr_sustain_rate = 2;
        d.lfo_on = 1;
        d.lfo_wave = 1;
        d.lfo_hold = 2;
        d.lfo_rate = 4;
        d.lfo_depth = 6;
        d.lfo2_on = 1;
        d.lfo2_wave = 0;
        d.lfo2_hold = 0;
        d.lfo2_rate = 3;
        d.lfo2_depth = 5;
        d.lfo_algo = 1;
    }

    // Soft Pad: slow evolving sustain + dual LFO blend.
    {
        let d = &mut presets[5].def;
        d.adsr_sustain_rate = 1;
        d.lfo_on = 1;
        d.lfo_wave = 0;
        d.lfo_hold = 8;
        d.lfo_rate = 6;
        d.lfo_depth = 4;
        d.lfo2_on = 1;
        d.lfo2_wave = 2;
        d.lfo2_hold = 16;
        d.lfo2_rate = 8;
        d.lfo2_depth = 3;
        d.lfo_algo = 2;
    }

    // Bell: light AM shimmer plus slight FM.
    {
        let d = &mut presets[8].def;
        d.adsr_sustain_rate = 1;
        d.lfo_on = 1;
        d.lfo_wave = 2;
        d.lfo_hold = 0;
        d.lfo_rate = 3;
        d.lfo_depth = 4;
        d.lfo2_on = 1;
        d.lfo2_wave = 0;
        d.lfo2_hold = 4;
        d.lfo2_rate = 5;
        d.lfo2_depth = 2;
        d.lfo_algo = 4;
    }

    // Air Pad: deeper dual movement for long textures.
    {
        let d = &mut presets[25].def;
        d.adsr_sustain_rate = 1;
        d.lfo_on = 1;
        d.lfo_wave = 0;
        d.lfo_hold = 10;
        d.lfo_rate = 7;
        d.lfo_depth = 6;
        d.lfo2_on = 1;
        d.lfo2_wave = 2;
        d.lfo2_hold = 20;
        d.lfo2_rate = 10;
        d.lfo2_depth = 4;
        d.lfo_algo = 2;
    }

    // Metal Lead: fast dual modulation to add bite.
    {
        let d = &mut presets[27].def;
        d.adsr_sustain_rate = 2;
        d.lfo_on = 1;
        d.lfo_wave = 1;
        d.lfo_hold = 0;
        d.lfo_rate = 3;
        d.lfo_depth = 5;
        d.lfo2_on = 1;
        d.lfo2_wave = 2;
        d.lfo2_hold = 2;
        d.lfo2_rate = 4;
        d.lfo2_depth = 3;
        d.lfo_algo = 2;
    }

    presets
}

pub fn factory_env_curves() -> Vec<EnvCurve> {
    fn c(name: &str, steps: &[i8]) -> EnvCurve {
        EnvCurve {
            name: name.to_string(),
            steps: steps.to_vec(),
        }
    }
    vec![
        c("None", &[]),
        c("Fade Out", &[0, 1, 2, 3, 4, 6, 8, 10]),
        c("Staccato", &[0, 2, 5, 9, 13, 15]),
        c("Swell", &[12, 8, 5, 2, 0]),
        c("Gate Pulse", &[0, 4, 0, 6, 1, 8, 2, 10]),
        c("Long Tail", &[0, 1, 1, 2, 2, 3, 4, 5, 7, 9, 11, 13]),
    ]
}

pub fn factory_pitch_curves() -> Vec<PitchCurve> {
    fn c(name: &str, steps: &[i16]) -> PitchCurve {
        PitchCurve {
            name: name.to_string(),
            steps: steps.to_vec(),
        }
    }
    vec![
        c("None", &[]),
        c("Gentle Down", &[0, -2, -4, -6, -8]),
        c("Gentle Up", &[0, 2, 4, 6, 8]),
        c("Wobble", &[0, 2, 0, -2, 0]),
        c("Fast Fall", &[0, -4, -8, -12, -8, -4, 0]),
        c("Kick Drop", &[8, 4, 2, 0, -2, -4]),
        c("Trill", &[0, 3, 0, -3, 0, 3, 0, -3]),
        c("Pitch Up Fast", &[0, -6, -12, -18, -12, -6, 0]),
        c("Pitch Down Fast", &[0, 6, 12, 18, 12, 6, 0]),
    ]
}

pub fn factory_macros() -> Vec<Macro> {
    fn step(frames: u8, attn_delta: i8, pitch_delta: i16) -> MacroStep {
        MacroStep {
            frames,
            attn_delta,
            pitch_delta,
        }
    }
    vec![
        Macro {
            name: "None".to_string(),
            steps: vec![],
        },
        Macro {
            name: "Pluck Punch".to_string(),
            steps: vec![step(2, -4, 0), step(4, 0, 0), step(6, 4, 0)],
        },
        Macro {
            name: "Hard Attack".to_string(),
            steps: vec![step(1, -6, 0), step(2, 0, -3), step(2, 2, 0)],
        },
        Macro {
            name: "Kick Punch".to_string(),
            steps: vec![step(1, -6, 6), step(2, 0, 2), step(3, 3, 0)],
        },
        Macro {
            name: "Gate Chop".to_string(),
            steps: vec![step(2, 6, 0), step(2, 0, 0), step(2, 8, 0)],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_bank_has_expected_counts() {
        assert_eq!(factory_instrument_presets().len(), 32);
        assert_eq!(factory_env_curves().len(), 6);
        assert_eq!(factory_pitch_curves().len(), 9);
        assert_eq!(factory_macros().len(), 5);
    }

    #[test]
    fn noise_presets_have_no_lfo_modulation() {
        for p in factory_instrument_presets() {
            if p.def.mode == 1 {
                assert_eq!(p.def.lfo_on, 0, "{}", p.name);
                assert_eq!(p.def.lfo2_on, 0, "{}", p.name);
                assert_eq!(p.def.lfo_algo, 0, "{}", p.name);
            }
        }
    }

    #[test]
    fn bright_lead_gets_dual_lfo_override() {
        let presets = factory_instrument_presets();
        let bright = &presets[4];
        assert_eq!(bright.name, "Bright Lead");
        assert_eq!(bright.def.lfo_algo, 1);
        assert_eq!(bright.def.lfo2_on, 1);
        assert_eq!(bright.def.adsr_sustain_rate, 2);
    }

    #[test]
    fn instrument_clamp_caps_out_of_range_fields() {
        let mut def = InstrumentDef {
            attn: 200,
            adsr_sustain: 255,
            lfo_wave: 9,
            mode: 7,
            ..InstrumentDef::default()
        };
        def.clamp();
        assert_eq!(def.attn, 15);
        assert_eq!(def.adsr_sustain, 15);
        assert_eq!(def.lfo_wave, 0);
        assert_eq!(def.mode, 1);
    }
}
