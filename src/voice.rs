//! Per-channel voice state machine: amplitude envelope (legacy or ADSR),
//! pitch curve, sweep, vibrato, dual LFO, and macro modulation, composed
//! into one PSG command per tick.
//!
//! A `Voice` owns no stream cursor — `crate::stream` drives it with
//! `set_note`/`note_off` and ticks it once per frame with `update_fx` +
//! `command_from_state`. This split mirrors the original `BgmVoice`, whose
//! modulation sub-state and byte-code cursor are fields of the same struct;
//! here they live in `Voice` and `crate::stream::StreamVoice` respectively.
//!
//! Reference: `examples/original_source/driver_custom_latest/sounds.c`
//! (`BgmVoice_ApplyInstrument`, `BgmVoice_SetNote`, `BgmVoice_UpdateFx`,
//! `BgmVoice_CommandFromState`, `BgmLfoStepWave`, `BgmLfoResolve`) and
//! `spec.md` §4.6, whose literal ADSR/LFO prose this module follows where
//! it states behavior the C reference leaves ambiguous.

use crate::instrument::{EnvCurve, InstrumentDef, Macro, MacroStep, PitchCurve};

/// Which physical PSG channel a voice drives. Fixes `Mode` and the
/// register-select nibbles used when composing the final command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Tone0,
    Tone1,
    Tone2,
    Noise,
}

impl Channel {
    fn freq_base(self) -> u8 {
        match self {
            Channel::Tone0 => 0x80,
            Channel::Tone1 => 0xA0,
            Channel::Tone2 => 0xC0,
            Channel::Noise => 0xE0,
        }
    }

    fn attn_base(self) -> u8 {
        match self {
            Channel::Tone0 => 0x90,
            Channel::Tone1 => 0xB0,
            Channel::Tone2 => 0xD0,
            Channel::Noise => 0xF0,
        }
    }

    fn mode(self) -> Mode {
        match self {
            Channel::Noise => Mode::Noise,
            _ => Mode::Tone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Tone,
    Noise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdsrPhase {
    Off,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Three raw PSG bytes (latch/data/attn or mode/attn), ready to hand to
/// `DriverHost` or write straight into a `PsgMixer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsgCommand {
    pub b1: u8,
    pub b2: u8,
    pub b3: u8,
}

/// One LFO's running state: hold gate, rate gate, and waveform ramp.
#[derive(Debug, Clone, Copy, Default)]
struct LfoState {
    on: bool,
    wave: u8,
    rate: u8,
    depth: u8,
    hold: u8,
    hold_counter: u8,
    rate_counter: u8,
    delta: i16,
    dir: i16,
}

impl LfoState {
    fn reset(&mut self) {
        self.hold_counter = self.hold;
        self.rate_counter = self.rate;
        self.delta = 0;
        self.dir = 1;
    }

    /// Advances one tick; returns whether `delta` changed.
    fn tick(&mut self) -> bool {
        if !self.on || self.depth == 0 || self.rate == 0 {
            let changed = self.delta != 0;
            self.delta = 0;
            return changed;
        }
        if self.hold_counter > 0 {
            self.hold_counter -= 1;
            return false;
        }
        if self.rate_counter == 0 {
            self.step_wave();
            self.rate_counter = self.rate;
            true
        } else {
            self.rate_counter -= 1;
            false
        }
    }

    fn step_wave(&mut self) {
        let depth = self.depth as i16;
        match self.wave {
            0 => {
                // Triangle: bounce between -depth and +depth.
                self.delta += self.dir;
                if self.delta >= depth {
                    self.delta = depth;
                    self.dir = -1;
                } else if self.delta <= -depth {
                    self.delta = -depth;
                    self.dir = 1;
                }
            }
            1 => {
                // Square: snap to the opposite extreme every step.
                self.delta = if self.dir > 0 { depth } else { -depth };
                self.dir = -self.dir;
            }
            2 => {
                // Saw: ramp up by one, then wrap to the bottom.
                self.delta += 1;
                if self.delta > depth {
                    self.delta = -depth;
                }
            }
            3 => {
                // Sweep up: ramp from 0 to +depth, then hold.
                if self.delta < depth {
                    self.delta += 1;
                }
            }
            4 => {
                // Sweep down: ramp from 0 to -depth, then hold.
                if self.delta > -depth {
                    self.delta -= 1;
                }
            }
            _ => self.delta = 0,
        }
    }
}

fn am(x: i32) -> i32 {
    -((x / 16).clamp(-15, 15))
}

/// `BgmLfoResolve`'s 8-algorithm combiner table (`spec.md` §4.6 step 6).
fn resolve_lfo(algo: u8, l1: i16, l2: i16) -> (i32, i32) {
    let l1 = l1 as i32;
    let l2 = l2 as i32;
    let mix = (l1 + l2).clamp(-255, 255);
    match algo {
        0 => (0, 0),
        1 => (l2, am(l1)),
        2 => (mix, am(mix)),
        3 => (l2, am(mix)),
        4 => (mix, am(l1)),
        5 => (0, am(mix)),
        6 => (mix, 0),
        7 => (mix / 2, 0),
        _ => (0, 0),
    }
}

/// One channel's full modulation state machine.
pub struct Voice {
    pub channel: Channel,
    mode: Mode,

    pub note_active: bool,
    note_idx: u8,
    shadow: (u8, u8, u8),
    dirty: bool,

    base_attn: u8,
    pub current_attn: u8,
    expression: u8,

    env_on: bool,
    env_step: u8,
    env_speed: u8,
    env_curve: Vec<i8>,
    env_counter: u8,
    env_index: usize,

    adsr_on: bool,
    adsr_attack: u8,
    adsr_decay: u8,
    adsr_sustain: u8,
    adsr_release: u8,
    adsr_sustain_rate: u8,
    adsr_phase: AdsrPhase,
    adsr_counter: u8,

    pitch_curve: Vec<i16>,
    pitch_index: usize,
    pitch_counter: u8,
    pitch_offset: i16,
    pitch_bend: i16,

    sweep_on: bool,
    sweep_end: u16,
    sweep_step: i16,
    sweep_speed: u8,
    sweep_counter: u8,

    vib_on: bool,
    vib_depth: u8,
    vib_speed: u8,
    vib_delay: u8,
    vib_delay_counter: u8,
    vib_counter: u8,
    vib_dir: i16,

    lfo1: LfoState,
    lfo2: LfoState,
    lfo_algo: u8,
    lfo_pitch_delta: i32,
    lfo_attn_delta: i32,

    macro_steps: Vec<MacroStep>,
    macro_active: bool,
    macro_step: usize,
    macro_counter: u8,
    pub macro_pitch: i16,

    noise_config: u8,
    base_divider: u16,
    pub current_divider: u16,
}

impl Voice {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            mode: channel.mode(),
            note_active: false,
            note_idx: 0,
            shadow: (channel.attn_base() | 0x0F, channel.attn_base() | 0x0F, channel.attn_base() | 0x0F),
            dirty: false,
            base_attn: 0,
            current_attn: 15,
            expression: 0,
            env_on: false,
            env_step: 1,
            env_speed: 1,
            env_curve: Vec::new(),
            env_counter: 0,
            env_index: 0,
            adsr_on: false,
            adsr_attack: 0,
            adsr_decay: 0,
            adsr_sustain: 0,
            adsr_release: 0,
            adsr_sustain_rate: 0,
            adsr_phase: AdsrPhase::Off,
            adsr_counter: 0,
            pitch_curve: Vec::new(),
            pitch_index: 0,
            pitch_counter: 0,
            pitch_offset: 0,
            pitch_bend: 0,
            sweep_on: false,
            sweep_end: 1,
            sweep_step: 0,
            sweep_speed: 1,
            sweep_counter: 0,
            vib_on: false,
            vib_depth: 0,
            vib_speed: 1,
            vib_delay: 0,
            vib_delay_counter: 0,
            vib_counter: 0,
            vib_dir: 1,
            lfo1: LfoState::default(),
            lfo2: LfoState::default(),
            lfo_algo: 1,
            lfo_pitch_delta: 0,
            lfo_attn_delta: 0,
            macro_steps: Vec::new(),
            macro_active: false,
            macro_step: 0,
            macro_counter: 0,
            macro_pitch: 0,
            noise_config: 0,
            base_divider: 1,
            current_divider: 1,
        }
    }

    pub fn shadow(&self) -> (u8, u8, u8) {
        self.shadow
    }

    pub fn is_tone(&self) -> bool {
        self.mode == Mode::Tone
    }

    pub fn noise_config(&self) -> u8 {
        self.noise_config
    }

    /// Stream note bytes on the noise voice select the noise configuration
    /// directly (`spec.md` §4.7): low 3 bits of `note_idx - 1`. Overrides
    /// whatever the active instrument set as a default.
    pub fn set_noise_config_from_note(&mut self, note_idx: u8) {
        self.noise_config = note_idx.wrapping_sub(1) & 0x07;
    }

    pub fn set_expression(&mut self, expr: u8) {
        self.expression = expr.min(15);
        self.dirty = true;
    }

    pub fn set_pitch_bend(&mut self, bend: i16) {
        self.pitch_bend = bend;
        self.dirty = true;
    }

    pub fn set_attn(&mut self, attn: u8) {
        self.base_attn = attn.min(15);
        self.dirty = true;
    }

    pub fn set_env(&mut self, step: u8, speed: u8) {
        self.env_step = step.min(4);
        self.env_on = self.env_step > 0;
        self.env_speed = speed.clamp(1, 10);
        self.env_counter = self.env_speed;
        self.env_index = 0;
        self.pitch_index = 0;
        self.pitch_counter = self.env_speed;
        self.pitch_offset = 0;
    }

    pub fn set_env_curve(&mut self, curves: &[EnvCurve], id: u8) {
        self.env_curve = curves
            .get(id as usize)
            .map(|c| c.steps.clone())
            .unwrap_or_default();
        self.env_index = 0;
    }

    pub fn set_pitch_curve(&mut self, curves: &[PitchCurve], id: u8) {
        self.pitch_curve = curves
            .get(id as usize)
            .map(|c| c.steps.clone())
            .unwrap_or_default();
        self.pitch_index = 0;
        self.pitch_offset = self.pitch_curve.first().copied().unwrap_or(0);
    }

    pub fn set_vibrato(&mut self, depth: u8, speed: u8, delay: u8) {
        self.vib_on = true;
        self.vib_depth = depth;
        self.vib_speed = speed.clamp(1, 30);
        self.vib_delay = delay;
        self.vib_delay_counter = delay;
        self.vib_counter = self.vib_speed;
        self.vib_dir = 1;
    }

    pub fn set_sweep(&mut self, end: u16, step: i16, speed: u8) {
        self.sweep_on = step != 0;
        self.sweep_end = end.clamp(1, 1023);
        self.sweep_step = step;
        self.sweep_speed = speed.clamp(1, 30);
        self.sweep_counter = self.sweep_speed;
    }

    pub fn set_adsr(&mut self, attack: u8, decay: u8, sustain: u8, release: u8, sustain_rate: u8) {
        self.adsr_on = true;
        self.adsr_attack = attack;
        self.adsr_decay = decay;
        self.adsr_sustain = sustain.min(15);
        self.adsr_release = release;
        self.adsr_sustain_rate = sustain_rate;
        self.adsr_phase = AdsrPhase::Off;
        self.adsr_counter = 0;
    }

    pub fn set_lfo(&mut self, wave: u8, rate: u8, depth: u8) {
        self.lfo1 = LfoState {
            on: depth > 0 && rate > 0,
            wave: wave.min(4),
            rate: rate.max(1),
            depth,
            ..LfoState::default()
        };
        self.lfo2 = LfoState::default();
        self.lfo_algo = 1;
        self.lfo_pitch_delta = 0;
        self.lfo_attn_delta = 0;
    }

    pub fn set_macro(&mut self, macros: &[Macro], id: u8) {
        self.macro_steps = macros
            .get(id as usize)
            .map(|m| m.steps.clone())
            .unwrap_or_default();
        self.macro_reset();
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_mod2(
        &mut self,
        algo: u8,
        lfo1_on: bool,
        lfo1_wave: u8,
        lfo1_hold: u8,
        lfo1_rate: u8,
        lfo1_depth: u8,
        lfo2_on: bool,
        lfo2_wave: u8,
        lfo2_hold: u8,
        lfo2_rate: u8,
        lfo2_depth: u8,
    ) {
        self.lfo_algo = algo.min(7);
        self.lfo1 = LfoState {
            on: lfo1_on && lfo1_depth > 0 && lfo1_rate > 0,
            wave: (lfo1_wave & 0x07).min(4),
            rate: lfo1_rate.max(1),
            depth: lfo1_depth,
            hold: lfo1_hold,
            ..LfoState::default()
        };
        self.lfo1.reset();
        self.lfo2 = LfoState {
            on: lfo2_on && lfo2_depth > 0 && lfo2_rate > 0,
            wave: (lfo2_wave & 0x07).min(4),
            rate: lfo2_rate.max(1),
            depth: lfo2_depth,
            hold: lfo2_hold,
            ..LfoState::default()
        };
        self.lfo2.reset();
    }

    pub fn set_adsr5(&mut self, attack: u8, decay: u8, sustain: u8, sustain_rate: u8, release: u8) {
        self.adsr_on = true;
        self.adsr_attack = attack;
        self.adsr_decay = decay;
        self.adsr_sustain = sustain.min(15);
        self.adsr_sustain_rate = sustain_rate;
        self.adsr_release = release;
        self.adsr_phase = AdsrPhase::Off;
        self.adsr_counter = 0;
    }

    /// `BgmVoice_ApplyInstrument`: copies an instrument snapshot into the
    /// voice's active effect parameters. `mode` is forced by channel
    /// identity rather than trusted from `inst.mode`; speeds defensively
    /// floor at 1 so a zero never stalls a counter forever; LFO waveform
    /// ids clamp to 4 here (distinct from the factory-table normalization,
    /// which clamps out-of-range waves to 0).
    pub fn apply_instrument(
        &mut self,
        inst: &InstrumentDef,
        env_curves: &[EnvCurve],
        pitch_curves: &[PitchCurve],
        macros: &[Macro],
    ) {
        self.base_attn = inst.attn.min(15);
        self.env_on = inst.env_on != 0;
        self.env_step = inst.env_step.min(4);
        self.env_speed = inst.env_speed.max(1);
        self.env_curve = env_curves
            .get(inst.env_curve_id as usize)
            .map(|c| c.steps.clone())
            .unwrap_or_default();
        self.pitch_curve = pitch_curves
            .get(inst.pitch_curve_id as usize)
            .map(|c| c.steps.clone())
            .unwrap_or_default();
        self.vib_on = inst.vib_on != 0;
        self.vib_depth = inst.vib_depth;
        self.vib_speed = inst.vib_speed.max(1);
        self.vib_delay = inst.vib_delay;
        self.sweep_on = inst.sweep_on != 0;
        self.sweep_end = inst.sweep_end.clamp(1, 1023);
        self.sweep_step = inst.sweep_step;
        self.sweep_speed = inst.sweep_speed.max(1);
        self.mode = self.channel.mode();
        self.noise_config = inst.noise_config & 0x07;
        self.macro_steps = macros
            .get(inst.macro_id as usize)
            .map(|m| m.steps.clone())
            .unwrap_or_default();
        self.adsr_on = inst.adsr_on != 0;
        self.adsr_attack = inst.adsr_attack;
        self.adsr_decay = inst.adsr_decay;
        self.adsr_sustain = inst.adsr_sustain.min(15);
        self.adsr_release = inst.adsr_release;
        self.adsr_sustain_rate = inst.adsr_sustain_rate;

        self.lfo1.wave = if inst.lfo_wave > 4 { 4 } else { inst.lfo_wave };
        self.lfo1.rate = inst.lfo_rate.max(1);
        self.lfo1.depth = inst.lfo_depth;
        self.lfo1.hold = inst.lfo_hold;
        self.lfo1.on = inst.lfo_on != 0 && inst.lfo_depth > 0 && inst.lfo_rate > 0;

        self.lfo2.wave = if inst.lfo2_wave > 4 { 4 } else { inst.lfo2_wave };
        self.lfo2.rate = inst.lfo2_rate.max(1);
        self.lfo2.depth = inst.lfo2_depth;
        self.lfo2.hold = inst.lfo2_hold;
        self.lfo2.on = inst.lfo2_on != 0 && inst.lfo2_depth > 0 && inst.lfo2_rate > 0;

        self.lfo_algo = inst.lfo_algo.min(7);
        self.dirty = true;
    }

    fn macro_reset(&mut self) {
        self.macro_step = 0;
        if let Some(first) = self.macro_steps.first().copied() {
            if first.frames > 0 {
                self.macro_active = true;
                self.macro_counter = first.frames;
                self.macro_pitch = first.pitch_delta;
                if !self.adsr_on {
                    self.current_attn =
                        (self.current_attn as i16 + first.attn_delta as i16).clamp(0, 15) as u8;
                }
                return;
            }
        }
        self.macro_active = false;
        self.macro_counter = 0;
        self.macro_pitch = 0;
    }

    /// Note-on: `spec.md` §4.6. `divider` is the note table lookup for tone
    /// voices, or a fixed value (conventionally 1) for the noise voice.
    pub fn set_note(&mut self, note_idx: u8, divider: u16) {
        self.note_active = true;
        self.note_idx = note_idx;
        if self.adsr_on {
            self.current_attn = 15;
            self.adsr_phase = AdsrPhase::Attack;
            self.adsr_counter = self.adsr_attack;
        } else {
            self.current_attn = self.base_attn;
            self.adsr_phase = AdsrPhase::Off;
            self.adsr_counter = 0;
        }
        self.env_counter = self.env_speed.max(1);
        self.env_index = 0;
        self.pitch_index = 0;
        self.pitch_offset = self.pitch_curve.first().copied().unwrap_or(0);
        self.pitch_counter = self.env_speed;
        self.vib_delay_counter = self.vib_delay;
        self.vib_counter = self.vib_speed;
        self.vib_dir = 1;
        self.sweep_counter = self.sweep_speed;
        self.lfo1.reset();
        self.lfo2.reset();
        self.lfo_pitch_delta = 0;
        self.lfo_attn_delta = 0;
        self.macro_reset();
        self.base_divider = divider;
        self.current_divider = divider;
        self.dirty = true;
    }

    pub fn note_idx(&self) -> u8 {
        self.note_idx
    }

    /// Note-off: enters Release if configured, otherwise silences at once.
    pub fn note_off(&mut self) -> Option<PsgCommand> {
        if self.adsr_on && self.adsr_release > 0 {
            self.adsr_phase = AdsrPhase::Release;
            self.adsr_counter = self.adsr_release;
            self.dirty = true;
            None
        } else {
            Some(self.command_silence())
        }
    }

    pub fn command_silence(&mut self) -> PsgCommand {
        let b = self.channel.attn_base() | 0x0F;
        self.shadow = (b, b, b);
        self.note_active = false;
        self.dirty = false;
        PsgCommand { b1: b, b2: b, b3: b }
    }

    fn macro_tick(&mut self) -> bool {
        if !self.macro_active {
            return false;
        }
        if self.macro_counter > 0 {
            self.macro_counter -= 1;
            return false;
        }
        self.macro_step += 1;
        match self.macro_steps.get(self.macro_step).copied() {
            Some(step) if step.frames > 0 => {
                self.macro_counter = step.frames;
                self.macro_pitch = step.pitch_delta;
                if !self.adsr_on {
                    self.current_attn =
                        (self.current_attn as i16 + step.attn_delta as i16).clamp(0, 15) as u8;
                }
                true
            }
            _ => {
                self.macro_active = false;
                false
            }
        }
    }

    fn pitch_curve_tick(&mut self) -> bool {
        if self.pitch_curve.is_empty() {
            return false;
        }
        if self.pitch_counter > 0 {
            self.pitch_counter -= 1;
            return false;
        }
        if self.pitch_index + 1 < self.pitch_curve.len() {
            self.pitch_index += 1;
        }
        self.pitch_offset = self.pitch_curve[self.pitch_index];
        self.pitch_counter = self.env_speed.max(1);
        true
    }

    fn env_tick(&mut self) -> bool {
        if !self.env_on {
            return false;
        }
        if self.env_counter > 0 {
            self.env_counter -= 1;
            return false;
        }
        if self.env_curve.is_empty() {
            let next = (self.current_attn as i16 + self.env_step as i16).clamp(0, 15);
            self.current_attn = next as u8;
        } else {
            if self.env_index + 1 < self.env_curve.len() {
                self.env_index += 1;
            }
            let delta = self.env_curve[self.env_index] as i16;
            self.current_attn = (self.base_attn as i16 + delta).clamp(0, 15) as u8;
        }
        self.env_counter = self.env_speed.max(1);
        true
    }

    /// Enters Decay, collapsing straight through to Sustain if `adsr_decay`
    /// is 0 (`sounds.c`'s decay-state `if (v->adsr_decay == 0 || ...)`
    /// instant-jump case).
    fn enter_decay(&mut self) {
        let target = self.base_attn.max(self.adsr_sustain);
        if self.adsr_decay == 0 {
            self.current_attn = target;
            self.enter_sustain();
        } else {
            self.adsr_phase = AdsrPhase::Decay;
            self.adsr_counter = self.adsr_decay;
        }
    }

    fn enter_sustain(&mut self) {
        self.adsr_phase = AdsrPhase::Sustain;
        self.adsr_counter = self.adsr_sustain_rate;
    }

    /// ADSR sub-state-machine (`spec.md` §4.6): `attack`/`decay`/`release`
    /// of 0 act as "instant", so `current_attn` reaches its target in one
    /// tick and the phase immediately advances. Each phase's counter is
    /// seeded to that phase's own rate at entry, so a step lands every
    /// `rate + 1` ticks (`sounds.c:947,1567`).
    fn adsr_tick(&mut self) -> bool {
        match self.adsr_phase {
            AdsrPhase::Off => false,
            AdsrPhase::Attack => {
                if self.adsr_attack == 0 {
                    // sounds.c:1236 `if (v->adsr_attack == 0) {...}`.
                    self.current_attn = self.base_attn;
                    self.enter_decay();
                    return true;
                }
                if self.adsr_counter > 0 {
                    self.adsr_counter -= 1;
                    return false;
                }
                if self.current_attn > self.base_attn {
                    self.current_attn -= 1;
                }
                if self.current_attn <= self.base_attn {
                    self.current_attn = self.base_attn;
                    self.enter_decay();
                } else {
                    self.adsr_counter = self.adsr_attack;
                }
                true
            }
            AdsrPhase::Decay => {
                let target = self.base_attn.max(self.adsr_sustain);
                if self.adsr_decay == 0 {
                    self.current_attn = target;
                    self.enter_sustain();
                    return true;
                }
                if self.adsr_counter > 0 {
                    self.adsr_counter -= 1;
                    return false;
                }
                if self.current_attn < target {
                    self.current_attn += 1;
                } else if self.current_attn > target {
                    self.current_attn -= 1;
                }
                if self.current_attn == target {
                    self.enter_sustain();
                } else {
                    self.adsr_counter = self.adsr_decay;
                }
                true
            }
            AdsrPhase::Sustain => {
                if self.adsr_sustain_rate == 0 {
                    return false;
                }
                if self.adsr_counter > 0 {
                    self.adsr_counter -= 1;
                    return false;
                }
                if self.current_attn < 15 {
                    self.current_attn += 1;
                }
                if self.current_attn >= 15 {
                    self.current_attn = 15;
                    self.note_active = false;
                    self.adsr_phase = AdsrPhase::Off;
                } else {
                    self.adsr_counter = self.adsr_sustain_rate;
                }
                true
            }
            AdsrPhase::Release => {
                if self.adsr_counter > 0 {
                    self.adsr_counter -= 1;
                    return false;
                }
                if self.current_attn < 15 {
                    self.current_attn += 1;
                }
                if self.current_attn >= 15 {
                    self.current_attn = 15;
                    self.note_active = false;
                    self.adsr_phase = AdsrPhase::Off;
                } else {
                    self.adsr_counter = self.adsr_release;
                }
                true
            }
        }
    }

    fn sweep_tick(&mut self) -> bool {
        if !self.sweep_on {
            return false;
        }
        if self.sweep_counter > 0 {
            self.sweep_counter -= 1;
            return false;
        }
        let next = (self.current_divider as i32 + self.sweep_step as i32).clamp(1, 1023);
        self.current_divider = next as u16;
        let reached = match self.sweep_step.cmp(&0) {
            std::cmp::Ordering::Greater => self.current_divider >= self.sweep_end,
            std::cmp::Ordering::Less => self.current_divider <= self.sweep_end,
            std::cmp::Ordering::Equal => true,
        };
        if reached {
            self.current_divider = self.sweep_end;
            self.sweep_on = false;
        }
        self.sweep_counter = self.sweep_speed.max(1);
        true
    }

    fn vibrato_tick(&mut self) -> bool {
        if !self.vib_on || self.vib_depth == 0 {
            return false;
        }
        if self.vib_delay_counter > 0 {
            self.vib_delay_counter -= 1;
            return false;
        }
        if self.vib_counter > 0 {
            self.vib_counter -= 1;
            return false;
        }
        self.vib_dir = -self.vib_dir;
        self.vib_counter = self.vib_speed.max(1);
        true
    }

    fn lfo_tick(&mut self) -> bool {
        let d1 = self.lfo1.tick();
        let d2 = self.lfo2.tick();
        let (pitch, attn) = resolve_lfo(self.lfo_algo, self.lfo1.delta, self.lfo2.delta);
        let changed = pitch != self.lfo_pitch_delta || attn != self.lfo_attn_delta;
        self.lfo_pitch_delta = pitch;
        self.lfo_attn_delta = attn;
        d1 || d2 || changed
    }

    /// Runs the fixed per-tick order from `spec.md` §4.6 steps 1-6.
    pub fn update_fx(&mut self) -> bool {
        let mut dirty = false;
        dirty |= self.macro_tick();
        dirty |= self.pitch_curve_tick();
        if self.adsr_on && self.adsr_phase != AdsrPhase::Off {
            dirty |= self.adsr_tick();
        } else if self.env_on {
            dirty |= self.env_tick();
        }
        if self.mode == Mode::Tone {
            dirty |= self.sweep_tick();
            dirty |= self.vibrato_tick();
            dirty |= self.lfo_tick();
        } else if self.lfo_pitch_delta != 0 || self.lfo_attn_delta != 0 {
            self.lfo_pitch_delta = 0;
            self.lfo_attn_delta = 0;
            dirty = true;
        }
        if dirty {
            self.dirty = true;
        }
        dirty
    }

    /// Step 7: composes and emits the final PSG write, if any sub-system
    /// reported dirty since the last call. Follows `spec.md`'s single
    /// sum-then-clamp formula for both attenuation and divider (see
    /// `DESIGN.md` decision 5 for why this diverges from the two-stage
    /// clamp in the original `BgmVoice_CommandFromState`).
    pub fn command_from_state(&mut self, global_fade_attn: u8) -> Option<PsgCommand> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;

        let final_attn = (self.current_attn as i32
            + self.lfo_attn_delta
            + self.expression as i32
            + global_fade_attn as i32)
            .clamp(0, 15) as u8;

        let cmd = match self.mode {
            Mode::Tone => {
                let vib_term = if self.vib_on {
                    self.vib_depth as i32 * self.vib_dir as i32
                } else {
                    0
                };
                let div = (self.current_divider as i32
                    + self.macro_pitch as i32
                    + self.pitch_offset as i32
                    + self.pitch_bend as i32
                    + self.lfo_pitch_delta
                    + vib_term)
                    .clamp(1, 1023) as u16;
                let freq = self.channel.freq_base();
                let attn = self.channel.attn_base();
                PsgCommand {
                    b1: freq | (div & 0x0F) as u8,
                    b2: ((div >> 4) & 0x3F) as u8,
                    b3: attn | final_attn,
                }
            }
            Mode::Noise => {
                let freq = self.channel.freq_base();
                let attn = self.channel.attn_base();
                let control = freq | self.noise_config;
                PsgCommand {
                    b1: control,
                    b2: control,
                    b3: attn | final_attn,
                }
            }
        };
        self.shadow = (cmd.b1, cmd.b2, cmd.b3);
        Some(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{factory_env_curves, factory_macros, factory_pitch_curves};

    fn bare_voice(channel: Channel) -> Voice {
        Voice::new(channel)
    }

    #[test]
    fn adsr_instant_attack_and_decay_reach_sustain_in_one_tick() {
        let mut v = bare_voice(Channel::Tone0);
        v.adsr_on = true;
        v.adsr_attack = 0;
        v.adsr_decay = 0;
        v.adsr_sustain = 8;
        v.adsr_release = 5;
        v.base_attn = 2;
        v.set_note(25, 218);
        assert_eq!(v.current_attn, 15);
        v.update_fx();
        assert_eq!(v.adsr_phase, AdsrPhase::Sustain);
        assert_eq!(v.current_attn, 8);
    }

    #[test]
    fn adsr_release_reaches_fifteen_and_deactivates() {
        let mut v = bare_voice(Channel::Tone0);
        v.adsr_on = true;
        v.adsr_attack = 0;
        v.adsr_decay = 0;
        v.adsr_sustain = 8;
        v.adsr_release = 1;
        v.base_attn = 2;
        v.set_note(25, 218);
        v.update_fx(); // reach sustain
        v.note_off();
        assert_eq!(v.adsr_phase, AdsrPhase::Release);
        for _ in 0..14 {
            v.update_fx();
        }
        assert_eq!(v.current_attn, 15);
        assert!(!v.note_active);
        assert_eq!(v.adsr_phase, AdsrPhase::Off);
    }

    #[test]
    fn sweep_clears_exactly_on_reaching_its_target() {
        let mut v = bare_voice(Channel::Tone0);
        v.set_sweep(180, -2, 3);
        v.set_note(25, 218);
        for _ in 0..19 {
            for _ in 0..3 {
                v.update_fx();
            }
        }
        assert_eq!(v.current_divider, 180);
        assert!(!v.sweep_on);
        let before = v.current_divider;
        for _ in 0..10 {
            v.update_fx();
        }
        assert_eq!(v.current_divider, before);
    }

    #[test]
    fn sweep_never_escapes_divider_bounds_with_long_runs() {
        let mut v = bare_voice(Channel::Tone0);
        v.set_sweep(1, -1, 1);
        v.set_note(1, 5);
        for _ in 0..50 {
            v.update_fx();
            assert!(v.current_divider >= 1 && v.current_divider <= 1023);
        }
    }

    #[test]
    fn noise_voice_never_emits_lfo_modulation() {
        let mut v = bare_voice(Channel::Noise);
        v.lfo1 = LfoState {
            on: true,
            wave: 0,
            rate: 1,
            depth: 30,
            ..LfoState::default()
        };
        v.lfo_algo = 2;
        v.set_note(1, 1);
        for _ in 0..10 {
            v.update_fx();
        }
        assert_eq!(v.lfo_pitch_delta, 0);
        assert_eq!(v.lfo_attn_delta, 0);
    }

    #[test]
    fn resolve_lfo_algo_1_splits_pitch_and_attenuation() {
        let (pitch, attn) = resolve_lfo(1, 8, 16);
        assert_eq!(pitch, 16);
        assert_eq!(attn, 0); // 8/16 truncates to 0
        let (_, attn2) = resolve_lfo(1, 32, 16);
        assert_eq!(attn2, -2);
    }

    #[test]
    fn lfo_outputs_stay_within_documented_ranges() {
        for algo in 0..=7u8 {
            for l1 in [-255i16, -64, 0, 64, 255] {
                for l2 in [-255i16, -64, 0, 64, 255] {
                    let (pitch, attn) = resolve_lfo(algo, l1, l2);
                    assert!((-510..=510).contains(&pitch));
                    assert!((-15..=15).contains(&attn));
                }
            }
        }
    }

    #[test]
    fn macro_with_zero_frame_first_step_disables_immediately() {
        let mut v = bare_voice(Channel::Tone0);
        v.macro_steps = vec![MacroStep {
            frames: 0,
            attn_delta: -6,
            pitch_delta: 0,
        }];
        v.set_note(1, 100);
        assert!(!v.macro_active);
    }

    #[test]
    fn current_attn_and_divider_stay_in_range_across_full_factory_bank() {
        let env_curves = factory_env_curves();
        let pitch_curves = factory_pitch_curves();
        let macros = factory_macros();
        for preset in crate::instrument::factory_instrument_presets() {
            let channel = if preset.def.mode == 1 {
                Channel::Noise
            } else {
                Channel::Tone0
            };
            let mut v = Voice::new(channel);
            v.apply_instrument(&preset.def, &env_curves, &pitch_curves, &macros);
            v.set_note(25, 218);
            for _ in 0..200 {
                v.update_fx();
                assert!(v.current_attn <= 15);
                assert!(v.current_divider >= 1 && v.current_divider <= 1023);
            }
        }
    }
}
