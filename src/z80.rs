//! Minimal Z80-compatible core.
//!
//! Implements only the instruction subset needed to run the polling driver
//! image (`crate::driver::IMAGE`) deterministically: `di`, `ld sp,nn`,
//! `ld a,(nn)`, `ld (nn),a`, `or a`, `jr z,e`, `ld b,a`, `ld hl,nn`,
//! `ld a,(hl)`, `inc hl`, `djnz e`, `xor a`, `jp nn`, `jr e`. Cycle
//! accounting is nominal, not hardware-exact — acceptable per spec design
//! notes since the mailbox handshake is event-driven, not interrupt-driven,
//! and this driver never re-enables interrupts after its initial `di`.
//!
//! Reference: memory map and API surface mirror `ngpc::Z80Machine`
//! (core/include/ngpc/z80_machine.h).

use crate::psg::PsgMixer;
use std::sync::Arc;

const RAM_SIZE: usize = 0x1000;
const NOISE_PORT: u16 = 0x4000;
const TONE_PORT: u16 = 0x4001;
const COMM_ADDR: u16 = 0x8000;

#[derive(Default, Clone, Copy)]
struct Flags {
    zero: bool,
}

/// A minimal Z80-compatible machine: 4 KiB RAM plus four memory-mapped I/O
/// windows (shared RAM, tone port, noise port, mailbox byte).
pub struct Z80Machine {
    ram: [u8; RAM_SIZE],
    a: u8,
    b: u8,
    hl: u16,
    sp: u16,
    pc: u16,
    flags: Flags,
    iff: bool,
    irq_pending: u32,
    nmi_pending: u32,
    comm: u8,
    psg: Option<Arc<PsgMixer>>,
    halted_on_unknown: bool,
}

impl Z80Machine {
    pub fn new() -> Self {
        Self {
            ram: [0; RAM_SIZE],
            a: 0,
            b: 0,
            hl: 0,
            sp: 0,
            pc: 0,
            flags: Flags::default(),
            iff: true,
            irq_pending: 0,
            nmi_pending: 0,
            comm: 0,
            psg: None,
            halted_on_unknown: false,
        }
    }

    pub fn set_psg(&mut self, psg: Arc<PsgMixer>) {
        self.psg = Some(psg);
    }

    pub fn reset(&mut self) {
        self.ram = [0; RAM_SIZE];
        self.a = 0;
        self.b = 0;
        self.hl = 0;
        self.sp = 0;
        self.pc = 0;
        self.flags = Flags::default();
        self.iff = true;
        self.irq_pending = 0;
        self.nmi_pending = 0;
        self.comm = 0;
        self.halted_on_unknown = false;
    }

    /// Loads a binary image at `address`, silently truncating any bytes
    /// that would extend past the 4 KiB RAM window.
    pub fn load_binary(&mut self, data: &[u8], address: u16) {
        let base = address as usize;
        if base >= RAM_SIZE {
            return;
        }
        let max_len = RAM_SIZE - base;
        let len = data.len().min(max_len);
        self.ram[base..base + len].copy_from_slice(&data[..len]);
        self.pc = address;
    }

    pub fn ram(&self) -> &[u8; RAM_SIZE] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8; RAM_SIZE] {
        &mut self.ram
    }

    pub fn request_irq(&mut self) {
        self.irq_pending += 1;
    }

    pub fn request_nmi(&mut self) {
        self.nmi_pending += 1;
    }

    pub fn comm_value(&self) -> u8 {
        self.comm
    }

    pub fn set_comm_value(&mut self, value: u8) {
        self.comm = value;
    }

    fn read_mem(&self, addr: u16) -> u8 {
        if (addr as usize) < RAM_SIZE {
            self.ram[addr as usize]
        } else if addr == COMM_ADDR {
            self.comm
        } else {
            0xFF
        }
    }

    fn write_mem(&mut self, addr: u16, value: u8) {
        if (addr as usize) < RAM_SIZE {
            self.ram[addr as usize] = value;
        } else if addr == NOISE_PORT {
            if let Some(psg) = &self.psg {
                psg.write_noise(value);
            }
        } else if addr == TONE_PORT {
            if let Some(psg) = &self.psg {
                psg.write_tone(value);
            }
        } else if addr == COMM_ADDR {
            self.comm = value;
        }
    }

    fn fetch_u8(&mut self) -> u8 {
        let b = self.read_mem(self.pc);
        self.pc = self.pc.wrapping_add(1);
        b
    }

    fn fetch_u16(&mut self) -> u16 {
        let lo = self.fetch_u8() as u16;
        let hi = self.fetch_u8() as u16;
        (hi << 8) | lo
    }

    /// Executes instructions until at least `cycles` cycles have elapsed.
    pub fn step_cycles(&mut self, cycles: u32) {
        let mut elapsed: u32 = 0;
        while elapsed < cycles {
            if self.halted_on_unknown {
                return;
            }
            elapsed += self.step_one();
        }
    }

    fn step_one(&mut self) -> u32 {
        let op = self.fetch_u8();
        match op {
            0xF3 => {
                // di
                self.iff = false;
                4
            }
            0x31 => {
                // ld sp, nn
                self.sp = self.fetch_u16();
                10
            }
            0x3A => {
                // ld a, (nn)
                let addr = self.fetch_u16();
                self.a = self.read_mem(addr);
                13
            }
            0x32 => {
                // ld (nn), a
                let addr = self.fetch_u16();
                self.write_mem(addr, self.a);
                13
            }
            0xB7 => {
                // or a
                self.flags.zero = self.a == 0;
                4
            }
            0x28 => {
                // jr z, e
                let offset = self.fetch_u8() as i8;
                if self.flags.zero {
                    self.pc = self.pc.wrapping_add(offset as i16 as u16);
                }
                12
            }
            0x47 => {
                // ld b, a
                self.b = self.a;
                4
            }
            0x21 => {
                // ld hl, nn
                self.hl = self.fetch_u16();
                10
            }
            0x7E => {
                // ld a, (hl)
                self.a = self.read_mem(self.hl);
                7
            }
            0x23 => {
                // inc hl
                self.hl = self.hl.wrapping_add(1);
                6
            }
            0x10 => {
                // djnz e
                let offset = self.fetch_u8() as i8;
                self.b = self.b.wrapping_sub(1);
                if self.b != 0 {
                    self.pc = self.pc.wrapping_add(offset as i16 as u16);
                    13
                } else {
                    8
                }
            }
            0xAF => {
                // xor a
                self.a = 0;
                self.flags.zero = true;
                4
            }
            0xC3 => {
                // jp nn
                self.pc = self.fetch_u16();
                10
            }
            0x18 => {
                // jr e
                let offset = self.fetch_u8() as i8;
                self.pc = self.pc.wrapping_add(offset as i16 as u16);
                12
            }
            _ => {
                // Unknown opcode outside the polling-driver subset: halt
                // deterministically rather than execute garbage.
                self.halted_on_unknown = true;
                self.pc = self.pc.wrapping_sub(1);
                4
            }
        }
    }
}

impl Default for Z80Machine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_truncates_oversized_binaries() {
        let mut z80 = Z80Machine::new();
        let big = vec![0xAAu8; RAM_SIZE + 500];
        z80.load_binary(&big, 0);
        assert_eq!(z80.ram()[RAM_SIZE - 1], 0xAA);
    }

    #[test]
    fn xor_a_zeroes_accumulator_and_sets_zero_flag() {
        let mut z80 = Z80Machine::new();
        z80.load_binary(&[0xAF], 0);
        z80.step_cycles(4);
        assert_eq!(z80.a, 0);
        assert!(z80.flags.zero);
    }

    #[test]
    fn jr_z_takes_branch_when_zero_flag_set() {
        let mut z80 = Z80Machine::new();
        // xor a; jr z, +2 ; (skip) xor would-not-execute ; ld b,a at target
        z80.load_binary(&[0xAF, 0x28, 0x01, 0xAA, 0x47], 0);
        z80.step_cycles(4); // xor a
        z80.step_cycles(12); // jr z, +1 -> lands on the ld b,a at offset 4
        z80.step_cycles(4);
        assert_eq!(z80.b, 0);
    }

    #[test]
    fn djnz_loops_b_times() {
        let mut z80 = Z80Machine::new();
        // ld b,a (a=0 from reset... use direct b set via loop count 3)
        // program: ld hl,0 ; djnz -2 relative jump back to self until b==0
        z80.b = 3;
        z80.load_binary(&[0x10, 0xFE], 0); // djnz -2 (self loop)
        z80.step_cycles(13);
        assert_eq!(z80.b, 2);
        z80.step_cycles(13);
        assert_eq!(z80.b, 1);
        z80.step_cycles(8);
        assert_eq!(z80.b, 0);
    }
}
