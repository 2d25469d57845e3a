//! The 48K Spectrum machine: CPU + bus + tape + audio under one
//! cycle-driven frame scheduler.
//!
//! # Frame loop
//!
//! One frame is 69,888 T-states. Each executed instruction returns its
//! T-state cost; that cost advances the tape (EAR edges), the audio mixer
//! (PCM samples) and the ULA frame clock before the next fetch. The frame
//! never ends mid-instruction, so it usually overshoots by a few T-states;
//! the overshoot carries into the next frame. The maskable interrupt is
//! raised after the final instruction's cost has been observed.

use cpu_z80::Z80;
use cpu_z80::flags::CF;
use format_sna::SnapshotState;
use format_tzx::TzxFile;
use zx_core::{AudioConfig, Cpu, JoystickState, KeyCode, Machine, VideoConfig};

use crate::audio::{AudioSink, Mixer, SAMPLE_RATE};
use crate::bus::SpectrumBus;
use crate::input;
use crate::memory::Memory48;
use crate::tape::TapeDeck;
use crate::ula::T_STATES_PER_FRAME;
use crate::video::{self, NATIVE_HEIGHT, NATIVE_WIDTH};

/// ROM entry point of the LD-BYTES tape loader, trapped for fast loading.
const LD_BYTES_ADDR: u16 = 0x0556;

/// FLASH attribute period in frames (ink/paper swap every 16).
const FLASH_PERIOD: u32 = 16;

/// The ZX Spectrum 48K.
pub struct Spectrum {
    cpu: Z80,
    bus: SpectrumBus,
    tape: TapeDeck,
    mixer: Mixer,
    frame_count: u32,
    /// T-states the previous frame overshot by; this frame starts that far in.
    carry_tstates: u32,
    /// Latched when the CPU hits an undefined encoding (strict policy).
    fault: bool,
}

impl Spectrum {
    /// Create a machine with the given 16K ROM image.
    ///
    /// # Panics
    ///
    /// Panics if the ROM is not exactly 16,384 bytes; validate the file
    /// size before calling.
    #[must_use]
    pub fn new(rom: &[u8]) -> Self {
        Self {
            cpu: Z80::new(),
            bus: SpectrumBus::new(Memory48::new(rom)),
            tape: TapeDeck::new(),
            mixer: Mixer::new(),
            frame_count: 0,
            carry_tstates: 0,
            fault: false,
        }
    }

    /// Run one frame of emulation. Returns the T-states consumed
    /// (>= 69,888 unless the CPU faulted).
    pub fn run_frame(&mut self) -> u32 {
        self.bus.ula.begin_frame();
        let mut t = self.carry_tstates;
        self.bus.ula.frame_t_state = t;

        while t < T_STATES_PER_FRAME {
            if self.fault {
                break;
            }
            t += self.step_instruction();
            self.bus.ula.frame_t_state = t;
        }

        // End-of-frame interrupt, strictly after the last instruction's
        // cost reached the tape/audio/video clocks.
        let int_cost = self.cpu.interrupt(&mut self.bus);
        if int_cost > 0 {
            self.observe(int_cost);
            t += int_cost;
        }

        self.carry_tstates = t.saturating_sub(T_STATES_PER_FRAME);
        self.mixer.flush();
        self.frame_count = self.frame_count.wrapping_add(1);
        t
    }

    /// Execute one instruction (or one halted idle step) and feed its cost
    /// to the collaborators. Returns the T-states consumed.
    pub fn step_instruction(&mut self) -> u32 {
        let advance = if self.cpu.regs.halted {
            4
        } else {
            if self.tape.fast_load()
                && self.cpu.regs.pc == LD_BYTES_ADDR
                && self.tape.has_blocks()
            {
                self.fast_load_trap();
            }
            let cycles = self.cpu.step(&mut self.bus);
            if self.cpu.faulted() {
                self.fault = true;
            }
            cycles
        } + self.bus.ula.take_contention();

        self.observe(advance);
        advance
    }

    /// Advance tape and audio by an instruction's T-state cost.
    fn observe(&mut self, t_states: u32) {
        self.tape.advance(t_states);
        self.bus.tape_ear = if self.tape.is_playing() {
            Some(self.tape.ear_level())
        } else {
            None
        };
        let ear = self.bus.tape_ear.unwrap_or(false);
        self.mixer.advance(t_states, self.bus.ula.speaker, ear);
    }

    /// Service the ROM LD-BYTES entry: copy the next tape block straight
    /// into memory instead of replaying its pulses.
    ///
    /// Register conventions at 0x0556: A = expected flag byte, DE = byte
    /// count, IX = destination, carry set for LOAD (clear for VERIFY).
    /// On exit carry signals success and the routine returns to its caller.
    fn fast_load_trap(&mut self) {
        let Some(block) = self.tape.next_trap_block() else {
            self.cpu.set_carry(false);
            self.cpu.force_ret(&mut self.bus);
            return;
        };

        let Some(flag) = block.flag() else {
            self.cpu.set_carry(false);
            self.cpu.force_ret(&mut self.bus);
            return;
        };
        if flag != self.cpu.regs.a {
            log::warn!(
                "fast-load flag mismatch: tape {flag:#04X}, expected {:#04X}",
                self.cpu.regs.a
            );
            self.cpu.set_carry(false);
            self.cpu.force_ret(&mut self.bus);
            return;
        }

        let is_load = self.cpu.regs.f & CF != 0;
        if is_load {
            // Block body without the flag and trailing checksum.
            let end = block.data.len().saturating_sub(1);
            let body = block.data.get(1..end).unwrap_or(&[]);
            let count = usize::from(self.cpu.regs.de()).min(body.len());
            let dest = self.cpu.regs.ix;
            for (i, &byte) in body[..count].iter().enumerate() {
                self.bus.memory.write(dest.wrapping_add(i as u16), byte);
            }
            log::info!("fast-loaded {count} bytes to {dest:#06X}");
        }

        self.cpu.set_carry(true);
        self.cpu.force_ret(&mut self.bus);
    }

    /// Install a parsed snapshot: registers, border, RAM.
    pub fn apply_snapshot(&mut self, snap: &SnapshotState) {
        let regs = &mut self.cpu.regs;
        regs.set_af(snap.af);
        regs.set_bc(snap.bc);
        regs.set_de(snap.de);
        regs.set_hl(snap.hl);
        regs.set_af_alt(snap.af_alt);
        regs.set_bc_alt(snap.bc_alt);
        regs.set_de_alt(snap.de_alt);
        regs.set_hl_alt(snap.hl_alt);
        regs.ix = snap.ix;
        regs.iy = snap.iy;
        regs.sp = snap.sp;
        regs.pc = snap.pc;
        regs.i = snap.i;
        regs.r = snap.r;
        regs.iff1 = snap.iff1;
        regs.iff2 = snap.iff2;
        regs.im = snap.im;
        regs.halted = false;

        self.bus.memory.load_ram(&snap.ram);
        self.bus.ula.set_border(snap.border);
    }

    /// Insert a parsed TZX tape.
    pub fn insert_tape(&mut self, tzx: TzxFile, fast_load: bool) {
        log::info!("tape inserted: {} block(s)", tzx.blocks.len());
        self.tape.insert(tzx.blocks);
        self.tape.set_fast_load(fast_load);
    }

    pub fn tape_play(&mut self) {
        self.tape.play();
    }

    pub fn tape_stop(&mut self) {
        self.tape.stop();
    }

    pub fn tape_rewind(&mut self) {
        self.tape.rewind();
    }

    /// Handle for the host audio callback.
    #[must_use]
    pub fn audio_sink(&self) -> AudioSink {
        self.mixer.sink()
    }

    /// Whether the strict unknown-opcode policy stopped the CPU.
    #[must_use]
    pub fn faulted(&self) -> bool {
        self.fault
    }

    #[must_use]
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    #[must_use]
    pub fn cpu(&self) -> &Z80 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Z80 {
        &mut self.cpu
    }

    #[must_use]
    pub fn bus(&self) -> &SpectrumBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut SpectrumBus {
        &mut self.bus
    }

    /// Screen region of memory (pixels + attributes).
    #[must_use]
    pub fn screen(&self) -> &[u8] {
        self.bus.memory.screen()
    }

    /// Pixel byte at byte column `x` (0-31), line `y` (0-191).
    #[must_use]
    pub fn pixel_byte(&self, x: usize, y: usize) -> u8 {
        self.screen()[video::pixel_offset(x, y)]
    }

    /// Write a pixel byte (host/debug path; ROM protection not relevant).
    pub fn set_pixel_byte(&mut self, x: usize, y: usize, value: u8) {
        let addr = 0x4000 + video::pixel_offset(x, y) as u16;
        self.bus.memory.write(addr, value);
    }

    /// Attribute byte for character cell (`cx`, `cy`).
    #[must_use]
    pub fn attribute(&self, cx: usize, cy: usize) -> u8 {
        self.screen()[video::attribute_offset(cx, cy)]
    }
}

impl Machine for Spectrum {
    fn video_config(&self) -> VideoConfig {
        VideoConfig {
            width: NATIVE_WIDTH,
            height: NATIVE_HEIGHT,
            fps: 50.0,
        }
    }

    fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: SAMPLE_RATE,
        }
    }

    fn run_frame(&mut self) {
        Spectrum::run_frame(self);
    }

    fn render(&self, buffer: &mut [u8]) {
        let flash_swap = (self.frame_count / FLASH_PERIOD) % 2 == 1;
        video::render_screen(
            self.screen(),
            &self.bus.ula.border_transitions,
            flash_swap,
            buffer,
        );
    }

    fn key_down(&mut self, key: KeyCode) {
        for &(row, col) in input::map_key(key) {
            self.bus.keyboard.set_key(row, col, true);
        }
    }

    fn key_up(&mut self, key: KeyCode) {
        for &(row, col) in input::map_key(key) {
            self.bus.keyboard.set_key(row, col, false);
        }
    }

    fn set_joystick(&mut self, state: JoystickState) {
        self.bus.kempston = input::joystick_to_kempston(state);
    }

    fn reset(&mut self) {
        self.cpu.reset(&mut self.bus);
        self.bus.memory.reset();
        self.bus.ula.reset();
        self.bus.keyboard.release_all();
        self.bus.kempston = 0;
        self.bus.tape_ear = None;
        self.tape.rewind();
        self.mixer.reset();
        self.frame_count = 0;
        self.carry_tstates = 0;
        self.fault = false;
    }

    fn load_file(&mut self, path: &str, data: &[u8]) -> Result<(), String> {
        let lower = path.to_lowercase();
        if lower.ends_with(".tzx") {
            let tzx = TzxFile::parse(data)?;
            self.insert_tape(tzx, false);
            Ok(())
        } else if lower.ends_with(".sna") {
            let snap = format_sna::parse(data)?;
            self.apply_snapshot(&snap);
            Ok(())
        } else if lower.ends_with(".z80") {
            let snap = format_z80::parse(data)?;
            self.apply_snapshot(&snap);
            Ok(())
        } else {
            Err(format!("unknown file type: {path}"))
        }
    }
}
