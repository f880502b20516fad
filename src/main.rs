//! Command-line entry point: exercises the sound core directly, without a
//! graphical editor (out of scope per `spec.md` §1). Two subcommands —
//! `play` drives a compiled byte stream through the real-time pipeline
//! (C1/C2/C6/C7/C8/C9); `render` offline-renders the same stream and
//! reports its peak level, the way the tool's loudness-analysis step would
//! before suggesting an export attenuation offset.
//!
//! No argument-parsing crate is introduced: the teacher has none in its
//! dependency table, and this surface is small enough for manual
//! `std::env::args` matching.

use std::env;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ngpc_sound::audio_out::AudioOutput;
use ngpc_sound::bank::SoundBank;
use ngpc_sound::replayer::{PreviewMode, Replayer};

fn usage() -> String {
    "usage:\n  \
     ngpc-sound-cli play <stream.bin> [--channel N] [--sample-rate HZ] [--driver-faithful] [--loop]\n  \
     ngpc-sound-cli render <stream.bin> <ticks> [--sample-rate HZ]\n  \
     ngpc-sound-cli bank-info <bank.json>"
        .to_string()
}

fn load_stream(path: &Path) -> Result<Rc<[u8]>, String> {
    let bytes = fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
    Ok(Rc::from(bytes.into_boxed_slice()))
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn run_play(args: &[String]) -> Result<(), String> {
    let stream_path = args.first().ok_or_else(usage)?;
    let channel: usize = parse_flag_value(args, "--channel")
        .map(|v| v.parse().unwrap_or(0))
        .unwrap_or(0)
        .min(3);
    let sample_rate: u32 = parse_flag_value(args, "--sample-rate")
        .map(|v| v.parse().unwrap_or(44_100))
        .unwrap_or(44_100);
    let looped = has_flag(args, "--loop");
    let driver_faithful = has_flag(args, "--driver-faithful");

    let stream = load_stream(Path::new(stream_path))?;
    let mut replayer = Replayer::new(sample_rate, SoundBank::factory());
    if driver_faithful {
        replayer.set_mode(PreviewMode::DriverFaithful);
    }
    let mut streams = [None, None, None, None];
    streams[channel] = Some((stream, 0u16));
    replayer.song_mut().start(streams, looped);

    let mut output = AudioOutput::start(Arc::clone(replayer.mixer()), sample_rate);
    if !output.is_running() {
        return Err(output
            .last_error()
            .map(str::to_string)
            .unwrap_or_else(|| "failed to open audio device".to_string()));
    }
    if output.sample_rate() != sample_rate {
        replayer.set_sample_rate(output.sample_rate());
    }

    let tick_period = Duration::from_secs_f64(1.0 / 60.0);
    let mut elapsed_ticks: u64 = 0;
    while !replayer.song_mut().is_stopped() {
        replayer.tick();
        thread::sleep(tick_period);
        elapsed_ticks += 1;
        if elapsed_ticks % 60 == 0 {
            eprintln!(
                "peak {:.1}% clip={}",
                output.peak_level() * 100.0,
                output.clip_recently_observed()
            );
        }
    }
    output.stop();
    Ok(())
}

fn run_render(args: &[String]) -> Result<(), String> {
    let stream_path = args.first().ok_or_else(usage)?;
    let ticks: u32 = args
        .get(1)
        .ok_or_else(usage)?
        .parse()
        .map_err(|_| "ticks must be an integer".to_string())?;
    let sample_rate: u32 = parse_flag_value(args, "--sample-rate")
        .map(|v| v.parse().unwrap_or(44_100))
        .unwrap_or(44_100);

    let stream = load_stream(Path::new(stream_path))?;
    let mut replayer = Replayer::new(sample_rate, SoundBank::factory());
    replayer
        .song_mut()
        .start([Some((stream, 0)), None, None, None], false);
    let buffer = replayer.render_song(ticks);
    let peak_pct = Replayer::analyze_song_peak_percent(&buffer);
    println!("{} samples rendered, peak {:.1}%", buffer.len(), peak_pct);
    Ok(())
}

fn run_bank_info(args: &[String]) -> Result<(), String> {
    let bank_path = args.first().ok_or_else(usage)?;
    let bank = SoundBank::load(Path::new(bank_path)).map_err(|e| e.to_string())?;
    println!("{} instruments:", bank.instruments.len());
    for (id, preset) in bank.instruments.iter().enumerate() {
        println!("  {id:3} {}", preset.name);
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        eprintln!("{}", usage());
        return ExitCode::FAILURE;
    };

    let result = match command.as_str() {
        "play" => run_play(rest),
        "render" => run_render(rest),
        "bank-info" => run_bank_info(rest),
        _ => Err(usage()),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
