//! The unprefixed decode page (0x00-0xFF).

use zx_core::IoBus;

use crate::Z80;
use crate::alu;
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF};

impl Z80 {
    pub(crate) fn read_hl<B: IoBus>(&mut self, bus: &mut B) -> u8 {
        bus.read(self.regs.hl())
    }

    pub(crate) fn write_hl<B: IoBus>(&mut self, bus: &mut B, value: u8) {
        bus.write(self.regs.hl(), value);
    }

    /// Apply an ALU operation (operation index 0-7 from bits 3-5 of the
    /// opcode) between A and `value`.
    pub(crate) fn alu_op(&mut self, op: u8, value: u8) {
        let a = self.regs.a;
        let carry = self.regs.f & CF != 0;
        let res = match op {
            0 => alu::add8(a, value, false),
            1 => alu::add8(a, value, carry),
            2 => alu::sub8(a, value, false),
            3 => alu::sub8(a, value, carry),
            4 => alu::and8(a, value),
            5 => alu::xor8(a, value),
            6 => alu::or8(a, value),
            7 => alu::cp8(a, value),
            _ => unreachable!(),
        };
        if op != 7 {
            self.regs.a = res.value;
        }
        self.regs.f = res.flags;
    }

    /// Relative jump: consume the displacement and move PC.
    fn jump_relative(&mut self, d: u8) {
        self.regs.pc = self.regs.pc.wrapping_add_signed(i16::from(d as i8));
    }

    /// Execute an unprefixed opcode. Returns T-states.
    pub(crate) fn execute<B: IoBus>(&mut self, bus: &mut B, op: u8) -> u32 {
        match op {
            // NOP
            0x00 => 4,

            // LD rr, nn
            0x01 | 0x11 | 0x21 | 0x31 => {
                let nn = self.fetch_word(bus);
                self.set_rp((op >> 4) & 3, nn);
                10
            }

            // LD (BC), A / LD (DE), A
            0x02 => {
                bus.write(self.regs.bc(), self.regs.a);
                7
            }
            0x12 => {
                bus.write(self.regs.de(), self.regs.a);
                7
            }

            // INC rr / DEC rr
            0x03 | 0x13 | 0x23 | 0x33 => {
                let rp = (op >> 4) & 3;
                self.set_rp(rp, self.get_rp(rp).wrapping_add(1));
                6
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let rp = (op >> 4) & 3;
                self.set_rp(rp, self.get_rp(rp).wrapping_sub(1));
                6
            }

            // INC r / INC (HL)
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                let r = (op >> 3) & 7;
                let res = alu::inc8(self.get_r8(r));
                self.set_r8(r, res.value);
                self.regs.f = (self.regs.f & CF) | res.flags;
                4
            }
            0x34 => {
                let res = alu::inc8(self.read_hl(bus));
                self.write_hl(bus, res.value);
                self.regs.f = (self.regs.f & CF) | res.flags;
                11
            }

            // DEC r / DEC (HL)
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                let r = (op >> 3) & 7;
                let res = alu::dec8(self.get_r8(r));
                self.set_r8(r, res.value);
                self.regs.f = (self.regs.f & CF) | res.flags;
                4
            }
            0x35 => {
                let res = alu::dec8(self.read_hl(bus));
                self.write_hl(bus, res.value);
                self.regs.f = (self.regs.f & CF) | res.flags;
                11
            }

            // LD r, n / LD (HL), n
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let n = self.fetch_byte(bus);
                self.set_r8((op >> 3) & 7, n);
                7
            }
            0x36 => {
                let n = self.fetch_byte(bus);
                self.write_hl(bus, n);
                10
            }

            // Accumulator rotates: S, Z and P/V are preserved, bits 3/5 are
            // copied from the new A, carry takes the rotated-out bit.
            0x07 => {
                // RLCA
                let carry = self.regs.a >> 7;
                self.regs.a = self.regs.a.rotate_left(1);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
                4
            }
            0x0F => {
                // RRCA
                let carry = self.regs.a & 1;
                self.regs.a = self.regs.a.rotate_right(1);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
                4
            }
            0x17 => {
                // RLA
                let carry_in = u8::from(self.regs.f & CF != 0);
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | carry_in;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
                4
            }
            0x1F => {
                // RRA
                let carry_in = u8::from(self.regs.f & CF != 0) << 7;
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | carry_in;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
                4
            }

            // EX AF, AF'
            0x08 => {
                let af = self.regs.af();
                let alt = self.regs.af_alt();
                self.regs.set_af(alt);
                self.regs.set_af_alt(af);
                4
            }

            // ADD HL, rr
            0x09 | 0x19 | 0x29 | 0x39 => {
                let rr = self.get_rp((op >> 4) & 3);
                let (value, f) = alu::add16(self.regs.hl(), rr);
                self.regs.set_hl(value);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | f;
                11
            }

            // LD A, (BC) / LD A, (DE)
            0x0A => {
                self.regs.a = bus.read(self.regs.bc());
                7
            }
            0x1A => {
                self.regs.a = bus.read(self.regs.de());
                7
            }

            // DJNZ d
            0x10 => {
                let d = self.fetch_byte(bus);
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b != 0 {
                    self.jump_relative(d);
                    13
                } else {
                    8
                }
            }

            // JR d
            0x18 => {
                let d = self.fetch_byte(bus);
                self.jump_relative(d);
                12
            }

            // JR cc, d
            0x20 | 0x28 | 0x30 | 0x38 => {
                let d = self.fetch_byte(bus);
                if self.condition((op >> 3) & 3) {
                    self.jump_relative(d);
                    12
                } else {
                    7
                }
            }

            // LD (nn), HL / LD HL, (nn)
            0x22 => {
                let nn = self.fetch_word(bus);
                bus.write_word(nn, self.regs.hl());
                16
            }
            0x2A => {
                let nn = self.fetch_word(bus);
                let value = bus.read_word(nn);
                self.regs.set_hl(value);
                16
            }

            // DAA
            0x27 => {
                let res = alu::daa(self.regs.a, self.regs.f);
                self.regs.a = res.value;
                self.regs.f = res.flags;
                4
            }

            // CPL
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f = (self.regs.f & (SF | ZF | PF | CF))
                    | HF
                    | NF
                    | (self.regs.a & (YF | XF));
                4
            }

            // LD (nn), A / LD A, (nn)
            0x32 => {
                let nn = self.fetch_word(bus);
                bus.write(nn, self.regs.a);
                13
            }
            0x3A => {
                let nn = self.fetch_word(bus);
                self.regs.a = bus.read(nn);
                13
            }

            // SCF / CCF
            0x37 => {
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | CF
                    | (self.regs.a & (YF | XF));
                4
            }
            0x3F => {
                let old_carry = self.regs.f & CF != 0;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if old_carry { HF } else { CF };
                4
            }

            // HALT: back PC onto the opcode so the CPU keeps executing it
            // (4 T-states each) until an interrupt is accepted.
            0x76 => {
                self.regs.halted = true;
                self.regs.pc = self.regs.pc.wrapping_sub(1);
                4
            }

            // LD r, r' block (01 ddd sss)
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    let value = self.read_hl(bus);
                    self.set_r8(dst, value);
                    7
                } else if dst == 6 {
                    let value = self.get_r8(src);
                    self.write_hl(bus, value);
                    7
                } else {
                    let value = self.get_r8(src);
                    self.set_r8(dst, value);
                    4
                }
            }

            // ALU block (10 ooo sss)
            0x80..=0xBF => {
                let src = op & 7;
                let (value, cycles) = if src == 6 {
                    (self.read_hl(bus), 7)
                } else {
                    (self.get_r8(src), 4)
                };
                self.alu_op((op >> 3) & 7, value);
                cycles
            }

            // RET cc
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = self.pop(bus);
                    11
                } else {
                    5
                }
            }

            // POP rr (BC, DE, HL, AF)
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let value = self.pop(bus);
                match (op >> 4) & 3 {
                    0 => self.regs.set_bc(value),
                    1 => self.regs.set_de(value),
                    2 => self.regs.set_hl(value),
                    _ => self.regs.set_af(value),
                }
                10
            }

            // JP cc, nn
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let nn = self.fetch_word(bus);
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = nn;
                }
                10
            }

            // JP nn
            0xC3 => {
                self.regs.pc = self.fetch_word(bus);
                10
            }

            // CALL cc, nn
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let nn = self.fetch_word(bus);
                if self.condition((op >> 3) & 7) {
                    let ret = self.regs.pc;
                    self.push(bus, ret);
                    self.regs.pc = nn;
                    17
                } else {
                    10
                }
            }

            // PUSH rr (BC, DE, HL, AF)
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let value = match (op >> 4) & 3 {
                    0 => self.regs.bc(),
                    1 => self.regs.de(),
                    2 => self.regs.hl(),
                    _ => self.regs.af(),
                };
                self.push(bus, value);
                11
            }

            // ALU A, n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let n = self.fetch_byte(bus);
                self.alu_op((op >> 3) & 7, n);
                7
            }

            // RST p
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                let ret = self.regs.pc;
                self.push(bus, ret);
                self.regs.pc = u16::from(op & 0x38);
                11
            }

            // RET
            0xC9 => {
                self.regs.pc = self.pop(bus);
                10
            }

            // CALL nn
            0xCD => {
                let nn = self.fetch_word(bus);
                let ret = self.regs.pc;
                self.push(bus, ret);
                self.regs.pc = nn;
                17
            }

            // Prefix pages
            0xCB => self.execute_cb(bus),
            0xED => self.execute_extended(bus),

            // OUT (n), A -- A supplies the high address byte
            0xD3 => {
                let n = self.fetch_byte(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(n);
                bus.write_io(port, self.regs.a);
                11
            }

            // IN A, (n) -- no flags affected
            0xDB => {
                let n = self.fetch_byte(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(n);
                self.regs.a = bus.read_io(port);
                11
            }

            // EXX
            0xD9 => {
                let (bc, de, hl) = (self.regs.bc(), self.regs.de(), self.regs.hl());
                let (bc2, de2, hl2) =
                    (self.regs.bc_alt(), self.regs.de_alt(), self.regs.hl_alt());
                self.regs.set_bc(bc2);
                self.regs.set_de(de2);
                self.regs.set_hl(hl2);
                self.regs.set_bc_alt(bc);
                self.regs.set_de_alt(de);
                self.regs.set_hl_alt(hl);
                4
            }

            // EX (SP), HL
            0xE3 => {
                let sp = self.regs.sp;
                let value = bus.read_word(sp);
                bus.write_word(sp, self.regs.hl());
                self.regs.set_hl(value);
                19
            }

            // JP (HL)
            0xE9 => {
                self.regs.pc = self.regs.hl();
                4
            }

            // EX DE, HL
            0xEB => {
                let de = self.regs.de();
                let hl = self.regs.hl();
                self.regs.set_de(hl);
                self.regs.set_hl(de);
                4
            }

            // DI / EI
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
                self.ei_delay = 0;
                4
            }
            0xFB => {
                // Takes effect after the next instruction (see step()).
                self.ei_delay = 2;
                4
            }

            // LD SP, HL
            0xF9 => {
                self.regs.sp = self.regs.hl();
                6
            }

            // DD/FD never reach here: step() strips index prefixes.
            0xDD | 0xFD => unreachable!("index prefixes are handled in step()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Z80;
    use crate::flags::{CF, HF, NF, ZF};
    use crate::testing::TestBus;
    use zx_core::Cpu;

    fn run_one(code: &[u8]) -> (Z80, TestBus) {
        let mut cpu = Z80::new();
        let mut bus = TestBus::new();
        cpu.regs.pc = 0x8000;
        bus.load(0x8000, code);
        cpu.step(&mut bus);
        (cpu, bus)
    }

    #[test]
    fn ld_r_n_loads_each_register() {
        // LD A/B/C/D/E/H/L, n opcodes with distinct immediates
        let cases: [(u8, u8, fn(&Z80) -> u8); 7] = [
            (0x3E, 0x11, |c| c.regs.a),
            (0x06, 0x22, |c| c.regs.b),
            (0x0E, 0x33, |c| c.regs.c),
            (0x16, 0x44, |c| c.regs.d),
            (0x1E, 0x55, |c| c.regs.e),
            (0x26, 0x66, |c| c.regs.h),
            (0x2E, 0x77, |c| c.regs.l),
        ];
        for (op, n, get) in cases {
            let (cpu, _) = run_one(&[op, n]);
            assert_eq!(get(&cpu), n, "opcode {op:02X}");
        }
    }

    #[test]
    fn jp_sets_pc() {
        let (cpu, _) = run_one(&[0xC3, 0x10, 0x80]); // JP 0x8010
        assert_eq!(cpu.regs.pc, 0x8010);
    }

    #[test]
    fn call_and_ret() {
        let mut cpu = Z80::new();
        let mut bus = TestBus::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.sp = 0xFFFF;
        bus.load(0x8000, &[0xCD, 0x20, 0x80]); // CALL 0x8020
        bus.load(0x8020, &[0xC9]); // RET

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.pc, 0x8020);
        assert_eq!(cpu.regs.sp, 0xFFFD);
        assert_eq!(bus.mem[0xFFFD], 0x03);
        assert_eq!(bus.mem[0xFFFE], 0x80);

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.pc, 0x8003);
        assert_eq!(cpu.regs.sp, 0xFFFF);
    }

    #[test]
    fn push_pop_round_trip() {
        let mut cpu = Z80::new();
        let mut bus = TestBus::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.sp = 0xFFFF;
        cpu.regs.set_bc(0xBEEF);
        bus.load(0x8000, &[0xC5, 0xC1]); // PUSH BC; POP BC

        cpu.step(&mut bus);
        cpu.regs.set_bc(0);
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.bc(), 0xBEEF);
        assert_eq!(cpu.regs.sp, 0xFFFF);
    }

    #[test]
    fn djnz_taken_then_not_taken() {
        let mut cpu = Z80::new();
        let mut bus = TestBus::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.b = 2;
        bus.load(0x8000, &[0x10, 0x04]); // DJNZ +4

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.b, 1);
        assert_eq!(cpu.regs.pc, 0x8006);

        cpu.regs.pc = 0x8000;
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.b, 0);
        assert_eq!(cpu.regs.pc, 0x8002);
    }

    #[test]
    fn rlca_rotates_bit_7_into_carry() {
        let mut cpu = Z80::new();
        let mut bus = TestBus::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.a = 0x80;
        cpu.regs.f = 0;
        bus.load(0x8000, &[0x07]); // RLCA

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.a, 0x01);
        assert_ne!(cpu.regs.f & CF, 0);
        assert_eq!(cpu.regs.f & HF, 0);
        assert_eq!(cpu.regs.f & NF, 0);
    }

    #[test]
    fn add_then_sub_restores_a() {
        let mut cpu = Z80::new();
        let mut bus = TestBus::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.a = 0x21;
        cpu.regs.f = 0;
        bus.load(0x8000, &[0xC6, 0x17, 0xD6, 0x17]); // ADD A,0x17; SUB 0x17

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.a, 0x38);
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.a, 0x21);
    }

    #[test]
    fn halt_backs_pc_and_costs_4_per_step() {
        let mut cpu = Z80::new();
        let mut bus = TestBus::new();
        cpu.regs.pc = 0x8000;
        bus.load(0x8000, &[0x76]);

        assert_eq!(cpu.step(&mut bus), 4);
        assert!(cpu.regs.halted);
        assert_eq!(cpu.regs.pc, 0x8000);
        assert_eq!(cpu.step(&mut bus), 4);
        assert_eq!(cpu.regs.pc, 0x8000);
    }

    #[test]
    fn ex_sp_hl_swaps_top_of_stack() {
        let mut cpu = Z80::new();
        let mut bus = TestBus::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.sp = 0x9000;
        cpu.regs.set_hl(0x1234);
        bus.load(0x9000, &[0x78, 0x56]);
        bus.load(0x8000, &[0xE3]); // EX (SP),HL

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.hl(), 0x5678);
        assert_eq!(bus.mem[0x9000], 0x34);
        assert_eq!(bus.mem[0x9001], 0x12);
    }

    #[test]
    fn exx_swaps_register_banks() {
        let mut cpu = Z80::new();
        let mut bus = TestBus::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.set_bc(0x1111);
        cpu.regs.set_de(0x2222);
        cpu.regs.set_hl(0x3333);
        cpu.regs.set_bc_alt(0xAAAA);
        cpu.regs.set_de_alt(0xBBBB);
        cpu.regs.set_hl_alt(0xCCCC);
        bus.load(0x8000, &[0xD9]); // EXX

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.bc(), 0xAAAA);
        assert_eq!(cpu.regs.de(), 0xBBBB);
        assert_eq!(cpu.regs.hl(), 0xCCCC);
        assert_eq!(cpu.regs.bc_alt(), 0x1111);
    }

    #[test]
    fn scf_ccf() {
        let mut cpu = Z80::new();
        let mut bus = TestBus::new();
        cpu.regs.pc = 0x8000;
        bus.load(0x8000, &[0x37, 0x3F]); // SCF; CCF

        cpu.step(&mut bus);
        assert_ne!(cpu.regs.f & CF, 0);
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.f & CF, 0);
        assert_ne!(cpu.regs.f & HF, 0, "CCF moves old carry into H");
    }

    #[test]
    fn out_n_a_uses_a_as_high_address_byte() {
        let mut cpu = Z80::new();
        let mut bus = TestBus::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.a = 0x12;
        bus.load(0x8000, &[0xD3, 0xFE]); // OUT (0xFE),A

        cpu.step(&mut bus);
        assert_eq!(bus.io_writes, vec![(0x12FE, 0x12)]);
    }

    #[test]
    fn conditional_ret_timing() {
        let mut cpu = Z80::new();
        let mut bus = TestBus::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.f = ZF;
        bus.load(0x8000, &[0xC0]); // RET NZ (not taken)
        assert_eq!(cpu.step(&mut bus), 5);

        cpu.regs.pc = 0x8000;
        cpu.regs.f = 0;
        cpu.regs.sp = 0x9000;
        bus.load(0x9000, &[0x34, 0x12]);
        assert_eq!(cpu.step(&mut bus), 11); // taken
        assert_eq!(cpu.regs.pc, 0x1234);
    }
}
