//! Zilog Z80 CPU interpreter.
//!
//! Instruction-stepped: `step()` fetches, decodes and executes exactly one
//! instruction and returns its T-state cost. Decoding is a dense `match` per
//! prefix page (unprefixed, CB, ED, DD/FD, DD CB / FD CB) so the whole ISA is
//! auditable in one place per page.
//!
//! Block-repeat instructions (LDIR and friends) execute one iteration per
//! `step()` and rewind PC onto their own opcode while the loop condition
//! holds, so interrupts can be accepted between iterations.
//!
//! The public execution surface is the [`zx_core::Cpu`] trait; the CPU only
//! talks to the outside world through a [`zx_core::IoBus`], which makes it
//! trivial to test against a synthetic bus.
//!
//! # Unknown opcodes
//!
//! The only undefined encodings on a Z80 are in the ED page. The policy here
//! is strict: the PC and opcode are logged at error level and the CPU raises
//! a fault the scheduler stops on.

pub mod alu;
pub mod flags;
mod bit_ops;
mod execute;
mod extended;
mod indexed;
mod registers;

use zx_core::{Cpu, IoBus};

pub use registers::Registers;

/// The Z80 CPU.
#[derive(Debug, Default)]
pub struct Z80 {
    pub regs: Registers,
    /// EI enables interrupts one instruction late: armed to 2 by EI,
    /// decremented at the end of each step, latches set at 0.
    ei_delay: u8,
    /// Set when an undefined encoding was executed (strict policy).
    fault: bool,
}

impl Z80 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers {
                sp: 0xFFFF,
                ..Registers::default()
            },
            ei_delay: 0,
            fault: false,
        }
    }

    /// Whether an undefined encoding was hit. Latched until reset.
    #[must_use]
    pub fn faulted(&self) -> bool {
        self.fault
    }

    /// Force the carry flag (used by the tape fast-load trap).
    pub fn set_carry(&mut self, carry: bool) {
        if carry {
            self.regs.f |= flags::CF;
        } else {
            self.regs.f &= !flags::CF;
        }
    }

    /// Pop the return address off the stack into PC (used by the tape
    /// fast-load trap to return from the ROM loader).
    pub fn force_ret<B: IoBus>(&mut self, bus: &mut B) {
        self.regs.pc = self.pop(bus);
    }

    pub(crate) fn mark_fault(&mut self) {
        self.fault = true;
    }

    // -----------------------------------------------------------------------
    // Fetch/stack helpers
    // -----------------------------------------------------------------------

    /// Fetch the byte at PC as an opcode (M1 cycle: bumps R).
    fn fetch_opcode<B: IoBus>(&mut self, bus: &mut B) -> u8 {
        self.regs.bump_r();
        self.fetch_byte(bus)
    }

    /// Fetch the byte at PC and advance PC.
    fn fetch_byte<B: IoBus>(&mut self, bus: &mut B) -> u8 {
        let value = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    /// Fetch a little-endian word at PC and advance PC by 2.
    fn fetch_word<B: IoBus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.fetch_byte(bus);
        let hi = self.fetch_byte(bus);
        u16::from(lo) | (u16::from(hi) << 8)
    }

    fn push<B: IoBus>(&mut self, bus: &mut B, value: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp, (value >> 8) as u8);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp, value as u8);
    }

    fn pop<B: IoBus>(&mut self, bus: &mut B) -> u16 {
        let lo = bus.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = bus.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        u16::from(lo) | (u16::from(hi) << 8)
    }

    fn leave_halt(&mut self) {
        if self.regs.halted {
            self.regs.halted = false;
            self.regs.pc = self.regs.pc.wrapping_add(1);
        }
    }

    // -----------------------------------------------------------------------
    // Operand accessors shared by the decode pages
    // -----------------------------------------------------------------------

    /// Read register by operand index (0=B 1=C 2=D 3=E 4=H 5=L 7=A).
    /// Index 6 is (HL) and is handled at the call sites.
    fn get_r8(&self, idx: u8) -> u8 {
        match idx {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            7 => self.regs.a,
            _ => unreachable!("(HL) is not a simple register"),
        }
    }

    fn set_r8(&mut self, idx: u8, value: u8) {
        match idx {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            7 => self.regs.a = value,
            _ => unreachable!("(HL) is not a simple register"),
        }
    }

    /// Register pair by index for the 16-bit groups (0=BC 1=DE 2=HL 3=SP).
    fn get_rp(&self, idx: u8) -> u16 {
        match idx {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            3 => self.regs.sp,
            _ => unreachable!(),
        }
    }

    fn set_rp(&mut self, idx: u8, value: u16) {
        match idx {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            3 => self.regs.sp = value,
            _ => unreachable!(),
        }
    }

    /// Condition code by index (0=NZ 1=Z 2=NC 3=C 4=PO 5=PE 6=P 7=M).
    fn condition(&self, idx: u8) -> bool {
        let f = self.regs.f;
        match idx {
            0 => f & flags::ZF == 0,
            1 => f & flags::ZF != 0,
            2 => f & flags::CF == 0,
            3 => f & flags::CF != 0,
            4 => f & flags::PF == 0,
            5 => f & flags::PF != 0,
            6 => f & flags::SF == 0,
            7 => f & flags::SF != 0,
            _ => unreachable!(),
        }
    }
}

impl<B: IoBus> Cpu<B> for Z80 {
    /// Execute one instruction (including any prefix chain) and return the
    /// T-states consumed.
    fn step(&mut self, bus: &mut B) -> u32 {
        let mut prefix_extra = 0u32;
        let mut index: Option<bool> = None;

        let cycles = loop {
            let op = self.fetch_opcode(bus);
            match op {
                // DD/FD select IX/IY for the next decode; stacked prefixes
                // each cost 4 T-states and the last one wins.
                0xDD | 0xFD => {
                    if index.is_some() {
                        prefix_extra += 4;
                    }
                    index = Some(op == 0xFD);
                }
                _ => {
                    break match index {
                        None => self.execute(bus, op),
                        Some(use_iy) => self.execute_indexed(bus, op, use_iy),
                    };
                }
            }
        };

        if self.ei_delay > 0 {
            self.ei_delay -= 1;
            if self.ei_delay == 0 {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
            }
        }

        cycles + prefix_extra
    }

    fn reset(&mut self, _bus: &mut B) {
        self.regs = Registers {
            sp: 0xFFFF,
            ..Registers::default()
        };
        self.ei_delay = 0;
        self.fault = false;
    }

    /// Accept a maskable interrupt. No-op (returning 0) unless IFF1 is set.
    fn interrupt(&mut self, bus: &mut B) -> u32 {
        if !self.regs.iff1 {
            return 0;
        }
        self.leave_halt();
        self.regs.iff1 = false;
        self.regs.iff2 = false;
        self.regs.bump_r();
        let pc = self.regs.pc;
        self.push(bus, pc);
        if self.regs.im == 2 {
            let vector = (u16::from(self.regs.i) << 8) | 0xFF;
            self.regs.pc = bus.read_word(vector);
            19
        } else {
            // IM 0 behaves as IM 1 on the Spectrum: the bus floats 0xFF (RST 38)
            self.regs.pc = 0x0038;
            13
        }
    }

    /// Accept a non-maskable interrupt: IFF1 is copied into IFF2 and
    /// cleared, and execution vectors to 0x0066. RETN restores IFF1.
    fn nmi(&mut self, bus: &mut B) -> u32 {
        self.leave_halt();
        self.regs.iff2 = self.regs.iff1;
        self.regs.iff1 = false;
        self.regs.bump_r();
        let pc = self.regs.pc;
        self.push(bus, pc);
        self.regs.pc = 0x0066;
        11
    }

    fn pc(&self) -> u16 {
        self.regs.pc
    }

    fn halted(&self) -> bool {
        self.regs.halted
    }
}
