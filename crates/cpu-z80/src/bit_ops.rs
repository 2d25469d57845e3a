//! The CB decode page: rotates/shifts, BIT, RES, SET.

use zx_core::IoBus;

use crate::Z80;
use crate::alu::{self, AluResult};
use crate::flags::{CF, HF, PF, SF, XF, YF, ZF};

/// Apply the rotate/shift selected by bits 3-5 of a CB opcode.
pub(crate) fn rotate_shift(selector: u8, value: u8, carry_in: bool) -> AluResult {
    match selector {
        0 => alu::rlc8(value),
        1 => alu::rrc8(value),
        2 => alu::rl8(value, carry_in),
        3 => alu::rr8(value, carry_in),
        4 => alu::sla8(value),
        5 => alu::sra8(value),
        6 => alu::sll8(value),
        7 => alu::srl8(value),
        _ => unreachable!(),
    }
}

/// Flags for BIT b: Z (and P/V) from the complement of the tested bit,
/// H set, N clear, S only when bit 7 is tested and set, bits 3/5 copied
/// from the tested value. Carry survives.
pub(crate) fn bit_flags(old_f: u8, value: u8, bit: u8) -> u8 {
    let tested = value & (1 << bit);
    let mut f = (old_f & CF) | HF | (value & (YF | XF));
    if tested == 0 {
        f |= ZF | PF;
    }
    if bit == 7 && tested != 0 {
        f |= SF;
    }
    f
}

impl Z80 {
    /// Execute a CB-prefixed opcode. Returns T-states.
    pub(crate) fn execute_cb<B: IoBus>(&mut self, bus: &mut B) -> u32 {
        let op = self.fetch_opcode(bus);
        let operand = op & 7;
        let bit = (op >> 3) & 7;

        match op >> 6 {
            // Rotate/shift family
            0 => {
                let carry_in = self.regs.f & CF != 0;
                if operand == 6 {
                    let res = rotate_shift(bit, self.read_hl(bus), carry_in);
                    self.write_hl(bus, res.value);
                    self.regs.f = res.flags;
                    15
                } else {
                    let res = rotate_shift(bit, self.get_r8(operand), carry_in);
                    self.set_r8(operand, res.value);
                    self.regs.f = res.flags;
                    8
                }
            }

            // BIT b
            1 => {
                if operand == 6 {
                    let value = self.read_hl(bus);
                    self.regs.f = bit_flags(self.regs.f, value, bit);
                    12
                } else {
                    let value = self.get_r8(operand);
                    self.regs.f = bit_flags(self.regs.f, value, bit);
                    8
                }
            }

            // RES b
            2 => {
                let mask = !(1u8 << bit);
                if operand == 6 {
                    let value = self.read_hl(bus) & mask;
                    self.write_hl(bus, value);
                    15
                } else {
                    let value = self.get_r8(operand) & mask;
                    self.set_r8(operand, value);
                    8
                }
            }

            // SET b
            _ => {
                let mask = 1u8 << bit;
                if operand == 6 {
                    let value = self.read_hl(bus) | mask;
                    self.write_hl(bus, value);
                    15
                } else {
                    let value = self.get_r8(operand) | mask;
                    self.set_r8(operand, value);
                    8
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Z80;
    use crate::flags::{CF, HF, NF, SF, ZF};
    use crate::testing::TestBus;
    use zx_core::Cpu;

    fn cpu_at(code: &[u8]) -> (Z80, TestBus) {
        let mut cpu = Z80::new();
        let mut bus = TestBus::new();
        cpu.regs.pc = 0x8000;
        bus.load(0x8000, code);
        (cpu, bus)
    }

    #[test]
    fn bit_0_b() {
        let (mut cpu, mut bus) = cpu_at(&[0xCB, 0x40, 0xCB, 0x40]); // BIT 0,B twice
        cpu.regs.b = 0x01;
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.f & ZF, 0);
        assert_ne!(cpu.regs.f & HF, 0);
        assert_eq!(cpu.regs.f & NF, 0);

        cpu.regs.b = 0xFE;
        cpu.step(&mut bus);
        assert_ne!(cpu.regs.f & ZF, 0);
    }

    #[test]
    fn bit_7_copies_sign() {
        let (mut cpu, mut bus) = cpu_at(&[0xCB, 0x7F]); // BIT 7,A
        cpu.regs.a = 0x80;
        cpu.step(&mut bus);
        assert_ne!(cpu.regs.f & SF, 0);
        assert_eq!(cpu.regs.f & ZF, 0);
    }

    #[test]
    fn bit_preserves_carry() {
        let (mut cpu, mut bus) = cpu_at(&[0xCB, 0x40]);
        cpu.regs.b = 0;
        cpu.regs.f = CF;
        cpu.step(&mut bus);
        assert_ne!(cpu.regs.f & CF, 0);
    }

    #[test]
    fn set_and_res_on_register() {
        let (mut cpu, mut bus) = cpu_at(&[0xCB, 0xC7, 0xCB, 0x87]); // SET 0,A; RES 0,A
        cpu.regs.a = 0;
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.a, 0x01);
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.a, 0x00);
    }

    #[test]
    fn set_on_memory() {
        let (mut cpu, mut bus) = cpu_at(&[0xCB, 0xDE]); // SET 3,(HL)
        cpu.regs.set_hl(0x9000);
        bus.mem[0x9000] = 0x00;
        let cycles = cpu.step(&mut bus);
        assert_eq!(cycles, 15);
        assert_eq!(bus.mem[0x9000], 0x08);
    }

    #[test]
    fn rlc_register_via_cb() {
        let (mut cpu, mut bus) = cpu_at(&[0xCB, 0x00]); // RLC B
        cpu.regs.b = 0x81;
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.b, 0x03);
        assert_ne!(cpu.regs.f & CF, 0);
    }

    #[test]
    fn sll_shifts_one_into_bit_0() {
        let (mut cpu, mut bus) = cpu_at(&[0xCB, 0x30]); // SLL B (undocumented)
        cpu.regs.b = 0x40;
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.b, 0x81);
        assert_eq!(cpu.regs.f & CF, 0);
    }

    #[test]
    fn srl_memory_timing() {
        let (mut cpu, mut bus) = cpu_at(&[0xCB, 0x3E]); // SRL (HL)
        cpu.regs.set_hl(0x9000);
        bus.mem[0x9000] = 0x03;
        let cycles = cpu.step(&mut bus);
        assert_eq!(cycles, 15);
        assert_eq!(bus.mem[0x9000], 0x01);
        assert_ne!(cpu.regs.f & CF, 0);
    }
}
