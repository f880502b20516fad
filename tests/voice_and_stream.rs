//! End-to-end scenarios that cross several modules at once: a byte-code
//! stream decoded through `Song::tick`, composed against a `SoundBank`
//! instrument and the note table, and (for the last test) relayed through
//! the polling-driver mailbox and an emulated Z80 instead of written to the
//! `PsgMixer` directly. The per-module unit suites already cover ADSR shape,
//! sweep/LFO boundary behavior, loop restart, SFX masking, and driver buffer
//! semantics in isolation; this file only adds scenarios that need two or
//! more of those pieces wired together to be meaningful.

use std::rc::Rc;
use std::sync::Arc;

use ngpc_sound::bank::SoundBank;
use ngpc_sound::driver::DriverHost;
use ngpc_sound::note_table::{default_table, divider_of};
use ngpc_sound::psg::PsgMixer;
use ngpc_sound::stream::Song;

// `ngpc_sound::stream::op` is crate-private; these mirror its values so an
// external test can still assemble a byte-code stream by hand.
const OP_SET_SWEEP: u8 = 0xF3;
const OP_SET_INST: u8 = 0xF4;
const OP_END: u8 = 0x00;

#[test]
fn note_on_through_song_tick_produces_the_exact_tone_command() {
    let bank = SoundBank::factory();
    let mut song = Song::new();
    let note_idx: u8 = 5;
    let bytes: Vec<u8> = vec![note_idx, 30, OP_END];
    let stream: Rc<[u8]> = Rc::from(bytes.into_boxed_slice());
    song.start([Some((stream, 0)), None, None, None], false);

    let frame = song.tick(&bank);
    let cmd = frame.commands[0].expect("note-on should emit a command on its first tick");

    let divider = divider_of(default_table()[(note_idx - 1) as usize]);
    assert_eq!(cmd.b1, 0x80 | (divider & 0x0F) as u8);
    assert_eq!(cmd.b2, ((divider >> 4) & 0x3F) as u8);
    assert_eq!(cmd.b3, 0x90); // attn base, zero attenuation, no ADSR/fade active
}

#[test]
fn gate_percent_silences_a_note_before_its_full_duration_elapses() {
    let bank = SoundBank::factory();
    let mut song = Song::new();
    song.set_gate(50);
    let bytes: Vec<u8> = vec![5, 20, OP_END];
    let stream: Rc<[u8]> = Rc::from(bytes.into_boxed_slice());
    song.start([Some((stream, 0)), None, None, None], false);

    let onset = song.tick(&bank);
    let onset_cmd = onset.commands[0].expect("note-on tick always emits a command");
    assert_eq!(onset_cmd.b3 & 0x0F, 0); // sounding, not silenced

    // Ticks between onset and the 50%-duration gate point carry no further
    // writes: nothing in this voice is modulating, so nothing is dirty.
    for _ in 0..9 {
        let frame = song.tick(&bank);
        assert!(frame.commands[0].is_none());
    }

    // Tick 11 (50% of a 20-frame note, rounded down to 10 gate frames past
    // the onset tick) is where the gate silences the voice early.
    let gated = song.tick(&bank);
    let gated_cmd = gated.commands[0].expect("gate closing emits a silence command");
    assert_eq!(gated_cmd.b3 & 0x0F, 0x0F);

    // No further writes until the note's declared duration actually elapses
    // and the stream reads its next opcode.
    for _ in 0..8 {
        let frame = song.tick(&bank);
        assert!(frame.commands[0].is_none());
    }
}

#[test]
fn instrument_and_sweep_opcodes_combine_through_the_full_stream_pipeline() {
    let bank = SoundBank::factory();
    let mut song = Song::new();
    let note_idx: u8 = 20;
    let base_divider = divider_of(default_table()[(note_idx - 1) as usize]);
    let sweep_end = base_divider + 20;
    let step: i8 = 2;
    let speed: u8 = 1;

    let mut bytes: Vec<u8> = vec![OP_SET_INST, 0];
    bytes.push(OP_SET_SWEEP);
    bytes.push((sweep_end & 0xFF) as u8);
    bytes.push((sweep_end >> 8) as u8);
    bytes.push(step as u8);
    bytes.push(speed);
    bytes.push(note_idx);
    bytes.push(200); // long enough for the sweep to finish before the next opcode
    bytes.push(OP_END);
    let stream: Rc<[u8]> = Rc::from(bytes.into_boxed_slice());
    song.start([Some((stream, 0)), None, None, None], false);

    let mut last_cmd = None;
    for _ in 0..80 {
        let frame = song.tick(&bank);
        if let Some(cmd) = frame.commands[0] {
            last_cmd = Some(cmd);
        }
    }

    let cmd = last_cmd.expect("sweep should produce at least one late command");
    let divider = (cmd.b1 & 0x0F) as u16 | ((cmd.b2 as u16 & 0x3F) << 4);
    assert_eq!(divider, sweep_end);
}

#[test]
fn driver_relay_produces_identical_psg_samples_to_a_direct_tone_write() {
    let divider: u16 = 300;
    let attn: u8 = 4;
    let b1 = 0x80 | (divider & 0x0F) as u8;
    let b2 = ((divider >> 4) & 0x3F) as u8;
    let b3 = 0x90 | (attn & 0x0F);

    let mixer_direct = PsgMixer::new(44_100);
    mixer_direct.write_tone(b1);
    mixer_direct.write_tone(b2);
    mixer_direct.write_tone(b3);

    let mixer_driver = Arc::new(PsgMixer::new(44_100));
    let mut driver = DriverHost::new();
    driver.z80_mut().set_psg(Arc::clone(&mixer_driver));
    driver.play_tone(divider, attn, true);
    driver.z80_mut().step_cycles(3_072_000 / 60);

    let mut direct_out = [0i16; 512];
    let mut driver_out = [0i16; 512];
    mixer_direct.render(&mut direct_out);
    mixer_driver.render(&mut driver_out);
    assert_eq!(direct_out, driver_out);
}
