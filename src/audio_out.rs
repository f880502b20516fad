//! Host audio-device wrapper: negotiates an output format against the
//! default device, renders from the shared PSG mixer, and tracks peak/clip
//! metering.
//!
//! Ticking the song/voice state machines is *not* this module's job — the
//! mixer's `Rc`-free, lock-protected register state is the only thing
//! shared across the device callback and the host thread (`spec.md` §5:
//! "only the mixer's internal PSG registers are shared across threads").
//! Callers tick a `Replayer` on their own thread (UI timer or offline
//! render loop); `AudioOutput` only ever reads from its `Arc<PsgMixer>`.
//!
//! Reference: `src/tracker/audio.rs`'s `native::init_audio_stream` and
//! `lock_or_recover`, adapted to mono PSG output with device format
//! negotiation and peak/clip metering (`spec.md` §4.9).

use std::sync::{Arc, Mutex, MutexGuard};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use crate::psg::PsgMixer;

const PEAK_DECAY: f32 = 0.92;
const CLIP_HOLD_SECS: f32 = 0.4;

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        eprintln!("audio_out: mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

#[derive(Default)]
struct PeakMeter {
    peak: f32,
    clip_hold: u32,
}

fn format_rank(format: SampleFormat) -> u32 {
    match format {
        SampleFormat::I16 => 0,
        SampleFormat::F32 => 1,
        _ => 2,
    }
}

fn channel_rank(channels: u16) -> u32 {
    match channels {
        1 => 0,
        2 => 1,
        _ => 2,
    }
}

/// Picks the device's closest supported config to mono 16-bit PCM at
/// `desired_rate`, falling back to stereo or float32 in that priority
/// order, and to the device's own max sample rate if `desired_rate` is out
/// of every range.
fn negotiate_config(
    device: &cpal::Device,
    desired_rate: u32,
) -> Result<cpal::SupportedStreamConfig, String> {
    let mut ranges: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| format!("no supported output configs: {e}"))?
        .collect();
    if ranges.is_empty() {
        return Err("output device exposes no supported configs".to_string());
    }
    ranges.sort_by_key(|r| (format_rank(r.sample_format()), channel_rank(r.channels())));

    let wanted = cpal::SampleRate(desired_rate);
    for range in &ranges {
        if range.min_sample_rate() <= wanted && wanted <= range.max_sample_rate() {
            return Ok(range.clone().with_sample_rate(wanted));
        }
    }
    Ok(ranges[0].clone().with_max_sample_rate())
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    mixer: Arc<PsgMixer>,
    peak: Arc<Mutex<PeakMeter>>,
) -> Result<Stream, String> {
    let stream_config: StreamConfig = config.clone().into();
    let channels = (stream_config.channels as usize).max(1);
    let clip_hold_samples = (CLIP_HOLD_SECS * stream_config.sample_rate.0 as f32) as u32;
    let err_fn = |err| eprintln!("audio_out: stream error: {err}");

    let result = match config.sample_format() {
        SampleFormat::F32 => {
            let mut scratch: Vec<i16> = Vec::new();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frame_count = data.len() / channels;
                    if scratch.len() != frame_count {
                        scratch.resize(frame_count, 0);
                    }
                    let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        mixer.render(&mut scratch);
                        let mut meter = lock_or_recover(&peak);
                        for (frame, &sample) in data.chunks_mut(channels).zip(scratch.iter()) {
                            meter.observe(sample, clip_hold_samples);
                            let value = sample as f32 / i16::MAX as f32;
                            for out in frame.iter_mut() {
                                *out = value;
                            }
                        }
                    }))
                    .is_err();
                    if panicked {
                        for out in data.iter_mut() {
                            *out = 0.0;
                        }
                    }
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let mut scratch: Vec<i16> = Vec::new();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let frame_count = data.len() / channels;
                    if scratch.len() != frame_count {
                        scratch.resize(frame_count, 0);
                    }
                    let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        mixer.render(&mut scratch);
                        let mut meter = lock_or_recover(&peak);
                        for (frame, &sample) in data.chunks_mut(channels).zip(scratch.iter()) {
                            meter.observe(sample, clip_hold_samples);
                            for out in frame.iter_mut() {
                                *out = sample;
                            }
                        }
                    }))
                    .is_err();
                    if panicked {
                        for out in data.iter_mut() {
                            *out = 0;
                        }
                    }
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let mut scratch: Vec<i16> = Vec::new();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    let frame_count = data.len() / channels;
                    if scratch.len() != frame_count {
                        scratch.resize(frame_count, 0);
                    }
                    let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        mixer.render(&mut scratch);
                        let mut meter = lock_or_recover(&peak);
                        for (frame, &sample) in data.chunks_mut(channels).zip(scratch.iter()) {
                            meter.observe(sample, clip_hold_samples);
                            let value = (sample as i32 + 0x8000) as u16;
                            for out in frame.iter_mut() {
                                *out = value;
                            }
                        }
                    }))
                    .is_err();
                    if panicked {
                        for out in data.iter_mut() {
                            *out = 0x8000;
                        }
                    }
                },
                err_fn,
                None,
            )
        }
        other => return Err(format!("unsupported sample format: {other:?}")),
    };

    result.map_err(|e| format!("failed to build output stream: {e}"))
}

impl PeakMeter {
    fn observe(&mut self, sample: i16, clip_hold_samples: u32) {
        let level = (sample as f32 / i16::MAX as f32).abs();
        if level > self.peak {
            self.peak = level;
        } else {
            self.peak *= PEAK_DECAY;
        }
        if level >= 1.0 {
            self.clip_hold = clip_hold_samples;
        } else if self.clip_hold > 0 {
            self.clip_hold -= 1;
        }
    }
}

/// Owns the negotiated output device stream and the peak/clip meter fed
/// from it. Ticking the song belongs to whoever owns the `Replayer` this
/// output was built from — see the module doc comment.
pub struct AudioOutput {
    stream: Option<Stream>,
    sample_rate: u32,
    peak: Arc<Mutex<PeakMeter>>,
    last_error: Option<String>,
}

impl AudioOutput {
    /// Opens the default output device against `mixer`, preferring
    /// `desired_rate`. On failure the returned `AudioOutput` has no stream
    /// and `last_error` explains why; the caller may retry by constructing
    /// a new one.
    pub fn start(mixer: Arc<PsgMixer>, desired_rate: u32) -> Self {
        let peak = Arc::new(Mutex::new(PeakMeter::default()));
        match Self::open(mixer, desired_rate, peak.clone()) {
            Ok((stream, sample_rate)) => Self {
                stream: Some(stream),
                sample_rate,
                peak,
                last_error: None,
            },
            Err(e) => Self {
                stream: None,
                sample_rate: 0,
                peak,
                last_error: Some(e),
            },
        }
    }

    fn open(
        mixer: Arc<PsgMixer>,
        desired_rate: u32,
        peak: Arc<Mutex<PeakMeter>>,
    ) -> Result<(Stream, u32), String> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| "no default output device".to_string())?;
        let config = negotiate_config(&device, desired_rate)?;
        let sample_rate = config.sample_rate().0;
        let stream = build_output_stream(&device, &config, mixer, peak)?;
        stream
            .play()
            .map_err(|e| format!("failed to start stream: {e}"))?;
        Ok((stream, sample_rate))
    }

    /// Sample rate actually negotiated with the device; `0` if not running.
    /// Callers should reconcile their `Replayer`'s mixer against this rate
    /// (`Replayer::set_sample_rate`) before starting playback if it differs
    /// from what the mixer was built with.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn peak_level(&self) -> f32 {
        lock_or_recover(&self.peak).peak
    }

    pub fn clip_recently_observed(&self) -> bool {
        lock_or_recover(&self.peak).clip_hold > 0
    }

    /// Drops the device stream and resets metering. Idempotent.
    pub fn stop(&mut self) {
        self.stream = None;
        let mut meter = lock_or_recover(&self.peak);
        meter.peak = 0.0;
        meter.clip_hold = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_rank_prefers_i16_over_f32_over_other() {
        assert!(format_rank(SampleFormat::I16) < format_rank(SampleFormat::F32));
        assert!(format_rank(SampleFormat::F32) < format_rank(SampleFormat::U16));
    }

    #[test]
    fn channel_rank_prefers_mono_then_stereo_then_other() {
        assert!(channel_rank(1) < channel_rank(2));
        assert!(channel_rank(2) < channel_rank(6));
    }

    #[test]
    fn peak_meter_decays_and_sets_clip_hold_on_full_scale() {
        let mut meter = PeakMeter::default();
        meter.observe(i16::MAX, 100);
        assert!(meter.peak > 0.99);
        assert_eq!(meter.clip_hold, 100);
        meter.observe(0, 100);
        assert!(meter.peak < 1.0);
        assert_eq!(meter.clip_hold, 99);
    }

    #[test]
    fn peak_meter_never_flags_clip_for_silence() {
        let mut meter = PeakMeter::default();
        for _ in 0..10 {
            meter.observe(0, 100);
        }
        assert_eq!(meter.peak, 0.0);
        assert_eq!(meter.clip_hold, 0);
    }
}
