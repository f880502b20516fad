//! One-shot sound effects that temporarily "own" a BGM channel.
//!
//! Four independent slots mirror the four PSG channels: tone0, tone1,
//! tone2 (sweep + step envelope) and noise (burst + step envelope). While a
//! slot's timer is running it masks the corresponding BGM voice; the BGM
//! voice's last-known bytes are replayed once the slot ends so the song
//! resumes exactly where the effect interrupted it.
//!
//! Reference: `examples/original_source/driver_custom_latest/sounds.c`
//! (`Sfx_PlayToneEx`, `Sfx_PlayNoiseEx`, `Sfx_Update`, `Sfx_Stop`) and
//! `spec.md` §4.7.

use crate::voice::PsgCommand;

fn freq_base(ch: usize) -> u8 {
    [0x80, 0xA0, 0xC0, 0xE0][ch]
}

fn attn_base(ch: usize) -> u8 {
    [0x90, 0xB0, 0xD0, 0xF0][ch]
}

fn make_tone_cmd(ch: usize, divider: u16, attn: u8) -> PsgCommand {
    PsgCommand {
        b1: freq_base(ch) | (divider & 0x0F) as u8,
        b2: ((divider >> 4) & 0x3F) as u8,
        b3: attn_base(ch) | (attn & 0x0F),
    }
}

fn make_noise_cmd(noise_val: u8, attn: u8) -> PsgCommand {
    let ctrl = 0xE0 | (noise_val & 0x07);
    PsgCommand {
        b1: ctrl,
        b2: ctrl,
        b3: 0xF0 | (attn & 0x0F),
    }
}

fn make_silence_cmd(base: u8) -> PsgCommand {
    let b = base | 0x0F;
    PsgCommand { b1: b, b2: b, b3: b }
}

#[derive(Default)]
struct ToneSlot {
    timer: u8,
    just_started: bool,
    div_base: u16,
    div_cur: u16,
    attn_cur: u8,
    sw_on: bool,
    sw_ping: bool,
    sw_end: u16,
    sw_step: u16,
    sw_dir: i8,
    sw_speed: u8,
    sw_counter: u8,
    env_on: bool,
    env_step: u8,
    env_spd: u8,
    env_counter: u8,
}

impl ToneSlot {
    fn tick(&mut self, ch: usize) -> Option<(PsgCommand, bool)> {
        if self.timer == 0 && !self.just_started {
            return None;
        }
        let mut dirty = self.just_started;
        self.just_started = false;

        if self.timer == 0 {
            // One-shot slot (`frames == 0`): the command played at trigger
            // time is the only thing this slot ever emits.
            return Some((make_tone_cmd(ch, self.div_cur, self.attn_cur), true));
        }

        if self.sw_on {
            if self.sw_counter == 0 {
                let mut v = self.div_cur as i32 + (self.sw_step as i32 * self.sw_dir as i32);
                if self.sw_ping {
                    let minv = self.div_base.min(self.sw_end) as i32;
                    let maxv = self.div_base.max(self.sw_end) as i32;
                    if v <= minv {
                        v = minv;
                        self.sw_dir = 1;
                    } else if v >= maxv {
                        v = maxv;
                        self.sw_dir = -1;
                    }
                } else if self.sw_dir < 0 && v <= self.sw_end as i32 {
                    v = self.sw_end as i32;
                    self.sw_on = false;
                } else if self.sw_dir > 0 && v >= self.sw_end as i32 {
                    v = self.sw_end as i32;
                    self.sw_on = false;
                }
                self.div_cur = v.clamp(1, 1023) as u16;
                self.sw_counter = self.sw_speed;
                dirty = true;
            } else {
                self.sw_counter -= 1;
            }
        }
        if self.env_on {
            if self.env_counter == 0 {
                if self.attn_cur < 15 {
                    self.attn_cur = (self.attn_cur + self.env_step).min(15);
                    dirty = true;
                }
                self.env_counter = self.env_spd;
            } else {
                self.env_counter -= 1;
            }
        }

        let mut cmd = dirty.then(|| make_tone_cmd(ch, self.div_cur, self.attn_cur));
        self.timer -= 1;
        let mut ended = false;
        if self.timer == 0 {
            cmd = Some(make_silence_cmd(attn_base(ch)));
            self.sw_on = false;
            self.env_on = false;
            ended = true;
        }
        cmd.map(|c| (c, ended))
    }
}

#[derive(Default)]
struct NoiseSlot {
    timer: u8,
    just_started: bool,
    val: u8,
    attn_cur: u8,
    env_on: bool,
    env_step: u8,
    env_spd: u8,
    env_counter: u8,
    burst: bool,
    burst_dur: u8,
    burst_counter: u8,
    burst_off: bool,
}

impl NoiseSlot {
    fn tick(&mut self) -> Option<(PsgCommand, bool)> {
        if self.timer == 0 && !self.just_started {
            return None;
        }
        let mut dirty = self.just_started;
        self.just_started = false;

        if self.timer == 0 {
            return Some((make_noise_cmd(self.val, self.attn_cur), true));
        }

        if self.env_on {
            if self.env_counter == 0 {
                if self.attn_cur < 15 {
                    self.attn_cur = (self.attn_cur + self.env_step).min(15);
                    dirty = true;
                }
                self.env_counter = self.env_spd;
            } else {
                self.env_counter -= 1;
            }
        }
        if self.burst {
            if self.burst_counter == 0 {
                self.burst_off = !self.burst_off;
                self.burst_counter = if self.burst_off { 1 } else { self.burst_dur };
                dirty = true;
            } else {
                self.burst_counter -= 1;
            }
        }

        let mut cmd = dirty.then(|| {
            if self.burst && self.burst_off {
                make_silence_cmd(attn_base(3))
            } else {
                make_noise_cmd(self.val, self.attn_cur)
            }
        });
        self.timer -= 1;
        let mut ended = false;
        if self.timer == 0 {
            cmd = Some(make_silence_cmd(attn_base(3)));
            self.env_on = false;
            self.burst = false;
            self.burst_off = false;
            ended = true;
        }
        cmd.map(|c| (c, ended))
    }
}

/// Per-frame SFX output: one slot per PSG channel (tone0, tone1, tone2,
/// noise), plus which channels this frame's SFX ownership just released.
pub struct SfxTick {
    pub commands: [Option<PsgCommand>; 4],
    pub ended: [bool; 4],
}

/// Owns all four SFX slots and the channel-ownership bookkeeping that lets
/// `crate::stream::Song` decide whether a BGM voice's command should be
/// masked this frame.
#[derive(Default)]
pub struct SfxEngine {
    tones: [ToneSlot; 3],
    noise: NoiseSlot,
    used_by_sfx: [bool; 4],
    pending_release: [bool; 4],
}

impl SfxEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether SFX currently owns `ch` (0..=2 tone, 3 noise) and the BGM
    /// voice on that channel should be masked this frame.
    pub fn owns(&self, ch: usize) -> bool {
        self.used_by_sfx[ch]
    }

    /// Plain tone blip: `examples/original_source/driver_custom_latest/sounds.c::Sfx_PlayToneCh`.
    pub fn play_tone(&mut self, ch: u8, divider: u16, attn: u8, frames: u8) {
        self.play_tone_ex(ch, divider, attn, frames, 1, 0, 1, false, false, false, 1, 1);
    }

    /// Full tone effect with optional sweep and step envelope:
    /// `Sfx_PlayToneEx`. Parameter clamps match the original exactly.
    #[allow(clippy::too_many_arguments)]
    pub fn play_tone_ex(
        &mut self,
        ch: u8,
        divider: u16,
        attn: u8,
        frames: u8,
        sw_end: u16,
        sw_step: i16,
        sw_speed: u8,
        sw_ping: bool,
        sw_on: bool,
        env_on: bool,
        env_step: u8,
        env_spd: u8,
    ) {
        let ch = match ch {
            0..=2 => ch as usize,
            _ => return,
        };
        let divider = divider.clamp(1, 1023);
        let attn = attn.min(15);
        let sw_end = sw_end.clamp(1, 1023);
        let sw_step = if sw_on && sw_step == 0 { 1 } else { sw_step };
        let sw_speed = sw_speed.clamp(1, 30);
        let env_step = env_step.clamp(1, 4);
        let env_spd = env_spd.clamp(1, 10);

        let slot = &mut self.tones[ch];
        slot.div_base = divider;
        slot.div_cur = divider;
        slot.attn_cur = attn;
        slot.sw_end = sw_end;
        if sw_step < 0 {
            slot.sw_step = (-sw_step) as u16;
            slot.sw_dir = -1;
        } else {
            slot.sw_step = sw_step as u16;
            slot.sw_dir = 1;
        }
        slot.sw_speed = sw_speed;
        slot.sw_counter = 0;
        slot.sw_on = sw_on;
        slot.sw_ping = sw_ping;
        slot.env_on = env_on;
        slot.env_step = env_step;
        slot.env_spd = env_spd;
        slot.env_counter = 0;
        slot.timer = frames;
        slot.just_started = true;

        self.used_by_sfx[ch] = true;
        self.pending_release[ch] = false;
    }

    /// Plain noise blip: `Sfx_PlayNoise`.
    pub fn play_noise(&mut self, noise_val: u8, attn: u8, frames: u8) {
        let noise = &mut self.noise;
        noise.val = noise_val & 0x07;
        noise.attn_cur = attn.min(15);
        noise.env_on = false;
        noise.env_counter = 0;
        noise.burst = false;
        noise.burst_off = false;
        noise.burst_counter = 0;
        noise.timer = frames;
        noise.just_started = true;
        self.used_by_sfx[3] = true;
        self.pending_release[3] = false;
    }

    /// Full noise effect with optional burst gating and step envelope:
    /// `Sfx_PlayNoiseEx`.
    #[allow(clippy::too_many_arguments)]
    pub fn play_noise_ex(
        &mut self,
        rate: u8,
        kind: u8,
        attn: u8,
        mut frames: u8,
        burst: bool,
        burst_dur: u8,
        env_on: bool,
        env_step: u8,
        env_spd: u8,
    ) {
        let rate = rate.min(3);
        let kind = kind.min(1);
        let attn = attn.min(15);
        let burst_dur = burst_dur.clamp(1, 30);
        let env_step = env_step.clamp(1, 4);
        let env_spd = env_spd.clamp(1, 10);
        let noise_val = (kind & 0x01) << 2 | (rate & 0x03);

        if frames == 0 && burst {
            frames = burst_dur;
        }

        let noise = &mut self.noise;
        noise.val = noise_val;
        noise.attn_cur = attn;
        noise.env_on = env_on;
        noise.env_step = env_step;
        noise.env_spd = env_spd;
        noise.env_counter = 0;
        noise.burst = burst;
        noise.burst_dur = burst_dur;
        noise.burst_counter = burst_dur;
        noise.burst_off = false;
        noise.timer = frames;
        noise.just_started = true;

        self.used_by_sfx[3] = true;
        self.pending_release[3] = false;
    }

    /// Immediately silences and releases every slot: `Sfx_Stop`. Unlike a
    /// natural end-of-timer release, ownership is handed back this same
    /// frame rather than one frame later, so the BGM voice can resume
    /// without waiting for a restore-shadow pass.
    pub fn stop(&mut self) -> [PsgCommand; 4] {
        let mut out = [PsgCommand { b1: 0, b2: 0, b3: 0 }; 4];
        for ch in 0..3 {
            self.tones[ch] = ToneSlot::default();
            out[ch] = make_silence_cmd(attn_base(ch));
            self.used_by_sfx[ch] = false;
            self.pending_release[ch] = false;
        }
        self.noise = NoiseSlot::default();
        out[3] = make_silence_cmd(attn_base(3));
        self.used_by_sfx[3] = false;
        self.pending_release[3] = false;
        out
    }

    /// Advances every active slot by one frame. Ownership on a channel
    /// whose slot ended this frame is released on the *next* call, mirroring
    /// the one-frame delay in `Bgm_Update`'s end-of-frame flag clearing.
    pub fn tick(&mut self) -> SfxTick {
        for ch in 0..4 {
            if self.pending_release[ch] {
                self.used_by_sfx[ch] = false;
                self.pending_release[ch] = false;
            }
        }
        let mut commands = [None; 4];
        let mut ended = [false; 4];
        for ch in 0..3 {
            if let Some((cmd, end)) = self.tones[ch].tick(ch) {
                commands[ch] = Some(cmd);
                if end {
                    ended[ch] = true;
                    self.pending_release[ch] = true;
                }
            }
        }
        if let Some((cmd, end)) = self.noise.tick() {
            commands[3] = Some(cmd);
            if end {
                ended[3] = true;
                self.pending_release[3] = true;
            }
        }
        SfxTick { commands, ended }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_tone_fires_once_and_releases_next_tick() {
        let mut sfx = SfxEngine::new();
        sfx.play_tone(0, 200, 10, 0);
        assert!(sfx.owns(0));
        let t1 = sfx.tick();
        assert!(t1.commands[0].is_some());
        assert!(t1.ended[0]);
        assert!(sfx.owns(0)); // still owned this frame
        let t2 = sfx.tick();
        assert!(t2.commands[0].is_none());
        assert!(!sfx.owns(0));
    }

    #[test]
    fn sustained_tone_silences_and_releases_when_timer_expires() {
        let mut sfx = SfxEngine::new();
        sfx.play_tone(1, 300, 5, 2);
        let t1 = sfx.tick();
        assert!(t1.commands[1].is_some());
        assert!(!t1.ended[1]);
        assert!(sfx.owns(1));
        let t2 = sfx.tick();
        assert!(t2.commands[1].is_some());
        assert!(t2.ended[1]);
        let t3 = sfx.tick();
        assert!(t3.commands[1].is_none());
        assert!(!sfx.owns(1));
    }

    #[test]
    fn sweep_moves_divider_toward_end_and_stops_without_ping() {
        let mut sfx = SfxEngine::new();
        sfx.play_tone_ex(0, 100, 8, 20, 110, 2, 1, false, true, false, 1, 1);
        for _ in 0..20 {
            sfx.tick();
        }
        assert_eq!(sfx.tones[0].div_cur, 110);
        assert!(!sfx.tones[0].sw_on);
    }

    #[test]
    fn noise_burst_toggles_silence_on_and_off() {
        let mut sfx = SfxEngine::new();
        sfx.play_noise_ex(1, 0, 9, 10, true, 2, false, 1, 1);
        let mut saw_silence = false;
        for _ in 0..10 {
            let t = sfx.tick();
            if let Some(cmd) = t.commands[3] {
                if cmd.b3 & 0x0F == 0x0F {
                    saw_silence = true;
                }
            }
        }
        assert!(saw_silence);
    }

    #[test]
    fn stop_releases_ownership_immediately() {
        let mut sfx = SfxEngine::new();
        sfx.play_tone(2, 50, 3, 30);
        assert!(sfx.owns(2));
        let cmds = sfx.stop();
        assert!(!sfx.owns(2));
        assert_eq!(cmds[2].b3 & 0x0F, 0x0F);
    }
}
