//! The machine bus: memory access with first-order contention, and the
//! ULA/Kempston I/O dispatch.
//!
//! Port decode follows the hardware: any port with A0 low belongs to the
//! ULA (reads return keyboard + EAR, writes set border/MIC/speaker); a low
//! byte of 0x1F is the Kempston interface; everything else reads 0xFF as a
//! floating-bus approximation.

use zx_core::{Bus, IoBus};

use crate::keyboard::KeyboardState;
use crate::memory::Memory48;
use crate::ula::Ula;

/// Memory plus peripherals as seen by the CPU.
pub struct SpectrumBus {
    pub memory: Memory48,
    pub ula: Ula,
    pub keyboard: KeyboardState,
    /// Kempston joystick byte (active high, 0x00 idle).
    pub kempston: u8,
    /// EAR override while the tape is playing; `None` falls back to the
    /// MIC loopback.
    pub tape_ear: Option<bool>,
}

impl SpectrumBus {
    #[must_use]
    pub fn new(memory: Memory48) -> Self {
        Self {
            memory,
            ula: Ula::new(),
            keyboard: KeyboardState::new(),
            kempston: 0,
            tape_ear: None,
        }
    }

    /// Current EAR level: the tape drives it during playback, otherwise
    /// the MIC output loops back (the ROM's beeper routines rely on this).
    fn ear_level(&self) -> bool {
        self.tape_ear.unwrap_or(self.ula.mic)
    }
}

impl Bus for SpectrumBus {
    fn read(&mut self, addr: u16) -> u8 {
        if Memory48::is_contended(addr) {
            self.ula.contend();
        }
        self.memory.read(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        if Memory48::is_contended(addr) {
            self.ula.contend();
        }
        self.memory.write(addr, value);
    }
}

impl IoBus for SpectrumBus {
    fn read_io(&mut self, port: u16) -> u8 {
        if port & 0x01 == 0 {
            // ULA port: keyboard rows (bits 0-4), bit 5 and 7 high from the
            // keyboard read, EAR ORed into bit 6 here.
            let keyboard = self.keyboard.read((port >> 8) as u8);
            let ear = if self.ear_level() { 0x40 } else { 0x00 };
            keyboard | ear
        } else if port & 0xFF == 0x1F {
            self.kempston
        } else {
            0xFF
        }
    }

    fn write_io(&mut self, port: u16, value: u8) {
        if port & 0x01 == 0 {
            self.ula.write_port(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ROM_LEN;

    fn make_bus() -> SpectrumBus {
        let mut rom = vec![0u8; ROM_LEN];
        rom[0] = 0xF3;
        SpectrumBus::new(Memory48::new(&rom))
    }

    #[test]
    fn memory_round_trip() {
        let mut bus = make_bus();
        bus.write(0x8000, 0xAB);
        assert_eq!(bus.read(0x8000), 0xAB);
    }

    #[test]
    fn rom_protected_through_bus() {
        let mut bus = make_bus();
        bus.write(0x0000, 0xFF);
        assert_eq!(bus.read(0x0000), 0xF3);
    }

    #[test]
    fn word_access_is_little_endian() {
        let mut bus = make_bus();
        bus.write_word(0x9000, 0x1234);
        assert_eq!(bus.read(0x9000), 0x34);
        assert_eq!(bus.read(0x9001), 0x12);
        assert_eq!(bus.read_word(0x9000), 0x1234);
    }

    #[test]
    fn keyboard_via_ula_port() {
        let mut bus = make_bus();
        assert_eq!(bus.read_io(0xFEFE) & 0x1F, 0x1F);

        bus.keyboard.set_key(0, 0, true); // CAPS SHIFT
        assert_eq!(bus.read_io(0xFEFE) & 0x01, 0x00);
    }

    #[test]
    fn ula_write_sets_border_and_speaker() {
        let mut bus = make_bus();
        bus.write_io(0x00FE, 0x12); // border 2, speaker on
        assert_eq!(bus.ula.border, 2);
        assert!(bus.ula.speaker);
    }

    #[test]
    fn any_even_port_hits_the_ula() {
        let mut bus = make_bus();
        bus.write_io(0x00F0, 0x05);
        assert_eq!(bus.ula.border, 5);
    }

    #[test]
    fn ear_bit_follows_tape_override() {
        let mut bus = make_bus();
        assert_eq!(bus.read_io(0xFEFE) & 0x40, 0x00);

        bus.tape_ear = Some(true);
        assert_eq!(bus.read_io(0xFEFE) & 0x40, 0x40);

        bus.tape_ear = Some(false);
        assert_eq!(bus.read_io(0xFEFE) & 0x40, 0x00);
    }

    #[test]
    fn ear_falls_back_to_mic_loopback() {
        let mut bus = make_bus();
        bus.write_io(0x00FE, 0x08); // MIC on
        assert_eq!(bus.read_io(0xFEFE) & 0x40, 0x40);

        bus.write_io(0x00FE, 0x00);
        assert_eq!(bus.read_io(0xFEFE) & 0x40, 0x00);
    }

    #[test]
    fn kempston_port() {
        let mut bus = make_bus();
        assert_eq!(bus.read_io(0x001F), 0x00);
        bus.kempston = 0x11; // right + fire
        assert_eq!(bus.read_io(0x001F), 0x11);
    }

    #[test]
    fn unattached_ports_float_high() {
        let mut bus = make_bus();
        assert_eq!(bus.read_io(0x00FF), 0xFF);
        assert_eq!(bus.read_io(0x1235), 0xFF);
    }

    #[test]
    fn contended_access_accumulates_wait_states() {
        let mut bus = make_bus();
        // Put the beam in the display area
        bus.ula.frame_t_state = crate::ula::DISPLAY_START_LINE * crate::ula::T_STATES_PER_LINE;
        let _ = bus.read(0x4000);
        assert_eq!(bus.ula.take_contention(), 6);

        // Uncontended RAM adds nothing
        let _ = bus.read(0x8000);
        assert_eq!(bus.ula.take_contention(), 0);
    }
}
