//! Music byte-code stream interpreter and the four-voice song it drives.
//!
//! `StreamVoice` owns one voice's byte cursor and decodes its opcode stream
//! one note/rest/control-change at a time, exactly mirroring
//! `BgmVoice_Step`. `Song` owns the four stream voices plus the SFX engine
//! and fade state and reproduces `Bgm_Update`'s per-frame order: fade tick,
//! then voice0/voice1/voice2/noise step, then a priority-ordered PSG push
//! (SFX first, then noise, tone0, tone1, tone2) with SFX-ownership masking
//! and shadow-restore on release.
//!
//! Reference: `examples/original_source/driver_custom_latest/sounds.c`
//! (`BgmVoice_Step`, `Bgm_Update`) and `spec.md` §4.7.

use std::rc::Rc;

use crate::bank::SoundBank;
use crate::note_table::{default_table, divider_of};
use crate::sfx::SfxEngine;
use crate::voice::{Channel, PsgCommand, Voice};

pub(crate) mod op {
    pub const SET_ATTN: u8 = 0xF0;
    pub const SET_ENV: u8 = 0xF1;
    pub const SET_VIB: u8 = 0xF2;
    pub const SET_SWEEP: u8 = 0xF3;
    pub const SET_INST: u8 = 0xF4;
    pub const SET_PAN: u8 = 0xF5;
    pub const HOST_CMD: u8 = 0xF6;
    pub const SET_EXPR: u8 = 0xF7;
    pub const PITCH_BEND: u8 = 0xF8;
    pub const SET_ADSR: u8 = 0xF9;
    pub const SET_LFO: u8 = 0xFA;
    pub const SET_ENV_CURVE: u8 = 0xFB;
    pub const SET_PITCH_CURVE: u8 = 0xFC;
    pub const SET_MACRO: u8 = 0xFD;
    pub const EXT: u8 = 0xFE;
    pub const REST: u8 = 0xFF;
    pub const END: u8 = 0x00;
}

pub(crate) const EXT_SET_ADSR5: u8 = 0x01;
pub(crate) const EXT_SET_MOD2: u8 = 0x02;
const NOTE_MAX_INDEX: u8 = 50;

fn mul_div_100(value: u16, percent: u8) -> u16 {
    let q = value / 100;
    let r = value % 100;
    q * percent as u16 + (r * percent as u16) / 100
}

/// A side effect a stream opcode can request of the whole song rather than
/// just its own voice (`BGM_OP_HOST_CMD`'s fade-out/tempo-change payload).
enum HostRequest {
    FadeOut(u8),
    Tempo(u8),
}

/// One voice's byte-code cursor plus the `Voice` it drives.
struct StreamVoice {
    channel: Channel,
    voice: Voice,
    stream: Rc<[u8]>,
    loop_pos: Option<usize>,
    pos: usize,
    enabled: bool,
    next_frame: u64,
    gate_active: bool,
    gate_off_frame: u64,
}

impl StreamVoice {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            voice: Voice::new(channel),
            stream: Rc::from(Vec::new().into_boxed_slice()),
            loop_pos: None,
            pos: 0,
            enabled: false,
            next_frame: 0,
            gate_active: false,
            gate_off_frame: 0,
        }
    }

    fn start(&mut self, stream: Rc<[u8]>, loop_offset: u16) {
        self.voice = Voice::new(self.channel);
        self.stream = stream;
        self.loop_pos = if loop_offset != 0 {
            Some(loop_offset as usize)
        } else {
            None
        };
        self.pos = 0;
        self.enabled = true;
        self.next_frame = 0;
        self.gate_active = false;
        self.gate_off_frame = 0;
    }

    fn stop(&mut self) {
        self.enabled = false;
        self.gate_active = false;
    }

    fn shadow(&self) -> (u8, u8, u8) {
        self.voice.shadow()
    }

    fn read_u8(&mut self) -> u8 {
        let b = self.stream.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        b
    }

    fn peek_u8(&self) -> u8 {
        self.stream.get(self.pos).copied().unwrap_or(0)
    }

    fn command_silence(&mut self) -> PsgCommand {
        self.voice.command_silence()
    }

    /// `BgmVoice_Step`. Returns this tick's command, if any, and any
    /// song-wide request the stream asked for via `BGM_OP_HOST_CMD`.
    fn step(
        &mut self,
        song_frame: u64,
        speed: u8,
        gate_percent: u8,
        loop_song: bool,
        fade_attn: u8,
        bank: &SoundBank,
    ) -> (Option<PsgCommand>, Option<HostRequest>) {
        if !self.enabled {
            return (None, None);
        }
        if self.gate_active && self.voice.note_active && song_frame >= self.gate_off_frame {
            return (Some(self.command_silence()), None);
        }
        if song_frame < self.next_frame {
            let dirty = self.voice.update_fx();
            let cmd = if dirty {
                self.voice.command_from_state(fade_attn)
            } else {
                None
            };
            return (cmd, None);
        }

        while self.enabled && song_frame >= self.next_frame {
            let note = self.read_u8();

            if note == op::END {
                if loop_song && self.loop_pos.is_some() {
                    self.pos = self.loop_pos.unwrap();
                    if self.peek_u8() != op::END {
                        continue;
                    }
                    self.next_frame = song_frame + 1;
                    return (Some(self.command_silence()), None);
                }
                self.enabled = false;
                return (Some(self.command_silence()), None);
            }

            if note == op::REST {
                let dur = self.read_u8();
                let scaled = ((dur as u32 * speed.max(1) as u32).max(1)) as u64;
                self.next_frame += scaled;
                let cmd = match self.voice.note_off() {
                    Some(cmd) => cmd,
                    None => self
                        .voice
                        .command_from_state(fade_attn)
                        .unwrap_or_else(|| self.command_silence()),
                };
                return (Some(cmd), None);
            }

            if note >= op::SET_ATTN {
                let request = self.dispatch_opcode(note, bank);
                if request.is_some() {
                    return (None, request);
                }
                continue;
            }

            // Note-on.
            let dur = self.read_u8();
            let scaled = ((dur as u32 * speed.max(1) as u32).max(1)) as u64;
            self.next_frame += scaled;

            if note > NOTE_MAX_INDEX + 1 {
                return (Some(self.command_silence()), None);
            }
            let divider = if self.channel == Channel::Noise {
                1
            } else {
                divider_of(default_table()[(note - 1) as usize])
            };
            self.voice.set_note(note, divider);
            if self.channel == Channel::Noise {
                self.voice.set_noise_config_from_note(note);
            }
            if gate_percent < 100 {
                let gate_frames = mul_div_100(scaled as u16, gate_percent).max(1);
                if gate_frames as u64 >= scaled {
                    self.gate_active = false;
                } else {
                    self.gate_active = true;
                    self.gate_off_frame = song_frame + gate_frames as u64;
                }
            } else {
                self.gate_active = false;
            }
            let cmd = self
                .voice
                .command_from_state(fade_attn)
                .unwrap_or_else(|| self.command_silence());
            return (Some(cmd), None);
        }
        (None, None)
    }

    /// Decodes one `0xF0..=0xFE` control opcode. Returns `Some` only for
    /// `BGM_OP_HOST_CMD`, whose effect (fade or tempo) belongs to the song.
    fn dispatch_opcode(&mut self, note: u8, bank: &SoundBank) -> Option<HostRequest> {
        match note {
            op::SET_ATTN => {
                let attn = self.read_u8();
                self.voice.set_attn(attn);
            }
            op::SET_ENV => {
                let step = self.read_u8();
                let speed = self.read_u8();
                self.voice.set_env(step, speed);
            }
            op::SET_VIB => {
                let depth = self.read_u8();
                let speed = self.read_u8();
                let delay = self.read_u8();
                self.voice.set_vibrato(depth, speed, delay);
            }
            op::SET_SWEEP => {
                let lo = self.read_u8();
                let hi = self.read_u8();
                let step = self.read_u8() as i8;
                let speed = self.read_u8();
                let end = (lo as u16) | ((hi as u16) << 8);
                self.voice.set_sweep(end, step as i16, speed);
            }
            op::SET_INST => {
                let inst_id = self.read_u8();
                if let Some(preset) = bank.instrument(inst_id) {
                    self.voice.apply_instrument(
                        &preset.def,
                        &bank.env_curves,
                        &bank.pitch_curves,
                        &bank.macros,
                    );
                } else if let Some(preset) = bank.instrument(0) {
                    self.voice.apply_instrument(
                        &preset.def,
                        &bank.env_curves,
                        &bank.pitch_curves,
                        &bank.macros,
                    );
                }
            }
            op::SET_PAN => {
                // Reserved for stereo pan; this mixer is mono, so the
                // payload is consumed and otherwise ignored.
                self.read_u8();
            }
            op::HOST_CMD => {
                let kind = self.read_u8();
                let data = self.read_u8();
                return Some(if kind == 0 {
                    HostRequest::FadeOut(data)
                } else {
                    HostRequest::Tempo(data.max(1))
                });
            }
            op::SET_EXPR => {
                let expr = self.read_u8();
                self.voice.set_expression(expr);
            }
            op::PITCH_BEND => {
                let lo = self.read_u8();
                let hi = self.read_u8();
                let bend = ((lo as u16) | ((hi as u16) << 8)) as i16;
                self.voice.set_pitch_bend(bend);
            }
            op::SET_ADSR => {
                let a = self.read_u8();
                let d = self.read_u8();
                let s = self.read_u8();
                let r = self.read_u8();
                self.voice.set_adsr(a, d, s, r, 0);
            }
            op::SET_LFO => {
                let wave = self.read_u8();
                let rate = self.read_u8();
                let depth = self.read_u8();
                self.voice.set_lfo(wave, rate, depth);
            }
            op::SET_ENV_CURVE => {
                let id = self.read_u8();
                self.voice.set_env_curve(&bank.env_curves, id);
            }
            op::SET_PITCH_CURVE => {
                let id = self.read_u8();
                self.voice.set_pitch_curve(&bank.pitch_curves, id);
            }
            op::SET_MACRO => {
                let id = self.read_u8();
                self.voice.set_macro(&bank.macros, id);
            }
            op::EXT => {
                let sub = self.read_u8();
                if sub == EXT_SET_ADSR5 {
                    let a = self.read_u8();
                    let d = self.read_u8();
                    let sl = self.read_u8();
                    let sr = self.read_u8();
                    let rr = self.read_u8();
                    self.voice.set_adsr5(a, d, sl, sr, rr);
                } else if sub == EXT_SET_MOD2 {
                    let algo = self.read_u8();
                    let lfo1_on = self.read_u8() != 0;
                    let lfo1_wave = self.read_u8();
                    let lfo1_hold = self.read_u8();
                    let lfo1_rate = self.read_u8();
                    let lfo1_depth = self.read_u8();
                    let lfo2_on = self.read_u8() != 0;
                    let lfo2_wave = self.read_u8();
                    let lfo2_hold = self.read_u8();
                    let lfo2_rate = self.read_u8();
                    let lfo2_depth = self.read_u8();
                    self.voice.set_mod2(
                        algo, lfo1_on, lfo1_wave, lfo1_hold, lfo1_rate, lfo1_depth, lfo2_on,
                        lfo2_wave, lfo2_hold, lfo2_rate, lfo2_depth,
                    );
                } else {
                    self.read_u8();
                }
            }
            _ => {
                self.read_u8();
            }
        }
        None
    }
}

/// Which of the four PSG channels a given frame's SFX/BGM command targets,
/// in the fixed push priority `Bgm_Update` uses: noise, tone0, tone1, tone2.
const PUSH_ORDER: [usize; 4] = [3, 0, 1, 2];

/// A loaded song: four parallel streams plus the shared fade/speed/gate
/// state and the SFX engine that can temporarily steal any of the four
/// channels.
pub struct Song {
    voices: [StreamVoice; 4],
    loop_song: bool,
    speed: u8,
    gate_percent: u8,
    fade_speed: u8,
    fade_counter: u8,
    fade_attn: u8,
    song_frame: u64,
    sfx: SfxEngine,
    stopped: bool,
}

/// One frame's raw PSG bytes for all four channels, ready to hand to
/// `PsgMixer` or `DriverHost`.
pub struct FrameOutput {
    pub commands: [Option<PsgCommand>; 4],
}

impl Song {
    pub fn new() -> Self {
        Self {
            voices: [
                StreamVoice::new(Channel::Tone0),
                StreamVoice::new(Channel::Tone1),
                StreamVoice::new(Channel::Tone2),
                StreamVoice::new(Channel::Noise),
            ],
            loop_song: false,
            speed: 1,
            gate_percent: 100,
            fade_speed: 0,
            fade_counter: 0,
            fade_attn: 0,
            song_frame: 0,
            sfx: SfxEngine::new(),
            stopped: true,
        }
    }

    pub fn sfx_mut(&mut self) -> &mut SfxEngine {
        &mut self.sfx
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// `Bgm_StartLoop4Ex`: up to four independent streams, each with its
    /// own optional loop offset. Unused voices are left stopped.
    pub fn start(&mut self, streams: [Option<(Rc<[u8]>, u16)>; 4], looped: bool) {
        self.reset_fade();
        self.song_frame = 0;
        for (voice, stream) in self.voices.iter_mut().zip(streams) {
            match stream {
                Some((bytes, loop_offset)) => voice.start(bytes, loop_offset),
                None => voice.stop(),
            }
        }
        self.loop_song = looped;
        self.stopped = false;
    }

    /// `Bgm_Stop`: hard stop, silence all four channels immediately.
    pub fn stop(&mut self) -> FrameOutput {
        self.reset_fade();
        let mut commands = [None; 4];
        for (i, voice) in self.voices.iter_mut().enumerate() {
            commands[i] = Some(voice.command_silence());
            voice.stop();
        }
        self.song_frame = 0;
        self.stopped = true;
        FrameOutput { commands }
    }

    pub fn set_speed(&mut self, mul: u8) {
        self.speed = mul.max(1);
    }

    pub fn set_gate(&mut self, percent: u8) {
        self.gate_percent = percent.clamp(1, 100);
    }

    pub fn fade_out(&mut self, speed: u8) {
        if speed == 0 {
            self.reset_fade();
        } else {
            self.fade_speed = speed;
            self.fade_counter = speed;
        }
    }

    fn reset_fade(&mut self) {
        self.fade_speed = 0;
        self.fade_counter = 0;
        self.fade_attn = 0;
    }

    /// Advances the song by one frame and returns the bytes that should be
    /// written to the PSG this tick, already resolved for SFX ownership and
    /// shadow-restore. Mirrors `Bgm_Update`'s body for a single elapsed
    /// frame (the caller is responsible for any "elapsed VBlanks" catch-up
    /// looping, since this crate's callers drive ticks directly rather than
    /// off a VBlank counter).
    pub fn tick(&mut self, bank: &SoundBank) -> FrameOutput {
        if self.stopped {
            return FrameOutput { commands: [None; 4] };
        }
        self.song_frame += 1;

        if self.fade_speed > 0 {
            if self.fade_counter == 0 {
                if self.fade_attn < 15 {
                    self.fade_attn += 1;
                }
                if self.fade_attn >= 15 {
                    return self.stop();
                }
                self.fade_counter = self.fade_speed;
            } else {
                self.fade_counter -= 1;
            }
        }

        let mut bgm_cmds: [Option<PsgCommand>; 4] = [None; 4];
        let mut host_request = None;
        for (i, voice) in self.voices.iter_mut().enumerate() {
            let (cmd, req) = voice.step(
                self.song_frame,
                self.speed,
                self.gate_percent,
                self.loop_song,
                self.fade_attn,
                bank,
            );
            bgm_cmds[i] = cmd;
            if req.is_some() {
                host_request = req;
            }
        }
        match host_request {
            Some(HostRequest::FadeOut(speed)) => self.fade_out(speed),
            Some(HostRequest::Tempo(speed)) => self.set_speed(speed),
            None => {}
        }

        let sfx_tick = self.sfx.tick();
        let mut out: [Option<PsgCommand>; 4] = [None; 4];
        for ch in 0..4 {
            if let Some(cmd) = sfx_tick.commands[ch] {
                out[ch] = Some(cmd);
            }
        }
        for &ch in &PUSH_ORDER {
            if let Some(cmd) = bgm_cmds[ch] {
                if !self.sfx.owns(ch) {
                    out[ch] = Some(cmd);
                }
            } else if sfx_tick.ended[ch] && !self.sfx.owns(ch) {
                let (b1, b2, b3) = self.voices[ch].shadow();
                out[ch] = Some(PsgCommand { b1, b2, b3 });
            }
        }
        FrameOutput { commands: out }
    }
}

impl Default for Song {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(n: u8, dur: u8) -> Vec<u8> {
        vec![n, dur]
    }

    #[test]
    fn single_note_then_end_silences_and_stops_voice() {
        let bank = SoundBank::factory();
        let mut song = Song::new();
        let mut bytes = note(25, 4);
        bytes.push(0x00);
        let stream: Rc<[u8]> = Rc::from(bytes.into_boxed_slice());
        song.start([Some((stream, 0)), None, None, None], false);
        let f1 = song.tick(&bank);
        assert!(f1.commands[0].is_some());
        for _ in 0..3 {
            song.tick(&bank);
        }
        let f_end = song.tick(&bank);
        assert!(f_end.commands[0].is_some());
    }

    #[test]
    fn loop_point_restarts_voice_0() {
        let bank = SoundBank::factory();
        let mut song = Song::new();
        let mut bytes = note(25, 2);
        let loop_pos = bytes.len();
        bytes.extend(note(27, 2));
        bytes.push(0x00);
        let stream: Rc<[u8]> = Rc::from(bytes.into_boxed_slice());
        song.start([Some((stream, loop_pos as u16)), None, None, None], true);
        for _ in 0..20 {
            song.tick(&bank);
        }
        assert!(!song.is_stopped());
    }

    #[test]
    fn sfx_masks_tone0_then_restores_bgm_shadow() {
        let bank = SoundBank::factory();
        let mut song = Song::new();
        let mut bytes = note(25, 50);
        bytes.push(0x00);
        let stream: Rc<[u8]> = Rc::from(bytes.into_boxed_slice());
        song.start([Some((stream, 0)), None, None, None], false);
        song.tick(&bank); // establishes the BGM note and its shadow bytes
        song.sfx_mut().play_tone(0, 500, 2, 3);
        let masked = song.tick(&bank);
        // channel 0 should reflect the SFX command, not the BGM note.
        assert!(masked.commands[0].is_some());
        for _ in 0..3 {
            song.tick(&bank);
        }
        // a few frames after the SFX ends, BGM shadow bytes should resurface.
        let mut saw_restore = false;
        for _ in 0..3 {
            let f = song.tick(&bank);
            if f.commands[0].is_some() {
                saw_restore = true;
            }
        }
        assert!(saw_restore);
    }

    #[test]
    fn fade_out_eventually_stops_the_song() {
        let bank = SoundBank::factory();
        let mut song = Song::new();
        let mut bytes = note(25, 200);
        bytes.push(0x00);
        let stream: Rc<[u8]> = Rc::from(bytes.into_boxed_slice());
        song.start([Some((stream, 0)), None, None, None], false);
        song.fade_out(1);
        for _ in 0..40 {
            song.tick(&bank);
        }
        assert!(song.is_stopped());
    }

    #[test]
    fn host_cmd_fade_out_opcode_triggers_fade() {
        let bank = SoundBank::factory();
        let mut song = Song::new();
        let mut bytes = vec![op::HOST_CMD, 0, 1];
        bytes.extend(note(25, 200));
        bytes.push(0x00);
        let stream: Rc<[u8]> = Rc::from(bytes.into_boxed_slice());
        song.start([Some((stream, 0)), None, None, None], false);
        for _ in 0..40 {
            song.tick(&bank);
        }
        assert!(song.is_stopped());
    }
}
