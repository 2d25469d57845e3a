//! Virtual tape deck: pulse-level EAR signal generation for standard-speed
//! blocks, plus the block cursor used by the ROM fast-load trap.
//!
//! Playback is a state machine clocked in T-states. Each block plays as
//! pilot tone, two sync pulses, the data bits (MSB first, two equal pulses
//! per bit), then a silent pause before the next block's pilot.

use format_tzx::TapeBlock;

/// Standard pulse timing in T-states (ROM loader values).
pub mod timing {
    /// Pilot pulse length.
    pub const PILOT_PULSE: u32 = 2168;

    /// Pilot edges for a header block (flag < 128).
    pub const PILOT_HEADER_EDGES: u32 = 8063;

    /// Pilot edges for a data block (flag >= 128).
    pub const PILOT_DATA_EDGES: u32 = 3223;

    /// First sync pulse.
    pub const SYNC1_PULSE: u32 = 667;

    /// Second sync pulse.
    pub const SYNC2_PULSE: u32 = 735;

    /// Half-pulse for a 0 bit (two per bit).
    pub const BIT0_PULSE: u32 = 855;

    /// Half-pulse for a 1 bit (two per bit).
    pub const BIT1_PULSE: u32 = 1710;

    /// T-states per millisecond at 3.5 MHz.
    pub const T_STATES_PER_MS: u32 = 3500;
}

/// Playback phase within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pilot,
    Sync1,
    Sync2,
    Data,
    Pause,
}

/// Position of the playback head. Created by `play()`, destroyed by
/// `stop()` or tape end.
#[derive(Debug)]
struct PlayCursor {
    block_idx: usize,
    byte_idx: usize,
    /// Bit within the current byte, 7 down to 0 (MSB first).
    bit_idx: u8,
    /// Data bits take two equal pulses; true during the second.
    second_pulse: bool,
    /// Pilot edges emitted so far.
    pilot_edges: u32,
    phase: Phase,
    /// T-states left in the current pulse; deficits carry into the next.
    pulse_remaining: i64,
    ear_high: bool,
}

/// The tape deck: block store plus optional playback cursor.
pub struct TapeDeck {
    blocks: Vec<TapeBlock>,
    cursor: Option<PlayCursor>,
    /// ROM-trap fast loading instead of pulse playback.
    fast_load: bool,
    /// Next block the fast-load trap will serve.
    trap_pos: usize,
}

impl TapeDeck {
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            cursor: None,
            fast_load: false,
            trap_pos: 0,
        }
    }

    /// Insert a tape, replacing any previous one. Playback stops.
    pub fn insert(&mut self, blocks: Vec<TapeBlock>) {
        self.blocks = blocks;
        self.cursor = None;
        self.trap_pos = 0;
    }

    /// Remove the tape.
    pub fn eject(&mut self) {
        self.blocks.clear();
        self.cursor = None;
        self.trap_pos = 0;
    }

    /// Rewind to the first block (stops playback).
    pub fn rewind(&mut self) {
        self.cursor = None;
        self.trap_pos = 0;
    }

    pub fn set_fast_load(&mut self, enabled: bool) {
        self.fast_load = enabled;
    }

    #[must_use]
    pub fn fast_load(&self) -> bool {
        self.fast_load
    }

    #[must_use]
    pub fn has_blocks(&self) -> bool {
        !self.blocks.is_empty()
    }

    /// Start pulse playback from the first block.
    pub fn play(&mut self) {
        if self.blocks.is_empty() || self.fast_load {
            return;
        }
        log::info!("tape playing ({} blocks)", self.blocks.len());
        self.cursor = Some(PlayCursor {
            block_idx: 0,
            byte_idx: 0,
            bit_idx: 7,
            second_pulse: false,
            pilot_edges: 0,
            phase: Phase::Pilot,
            pulse_remaining: i64::from(timing::PILOT_PULSE),
            ear_high: false,
        });
    }

    /// Stop playback; the cursor is discarded.
    pub fn stop(&mut self) {
        if self.cursor.take().is_some() {
            log::info!("tape stopped");
        }
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.cursor.is_some()
    }

    /// Current EAR level (false when stopped).
    #[must_use]
    pub fn ear_level(&self) -> bool {
        self.cursor.as_ref().is_some_and(|c| c.ear_high)
    }

    /// Advance playback by `t_states`, toggling the EAR level on each pulse
    /// edge (the level holds steady through Pause).
    pub fn advance(&mut self, t_states: u32) {
        if let Some(c) = &mut self.cursor {
            c.pulse_remaining -= i64::from(t_states);
        }
        loop {
            let Some(c) = &self.cursor else { return };
            if c.pulse_remaining > 0 {
                return;
            }
            self.next_edge();
        }
    }

    /// Handle one pulse boundary: toggle (except out of Pause), pick the
    /// next phase and pulse length.
    fn next_edge(&mut self) {
        let Some(cursor) = &mut self.cursor else {
            return;
        };
        let block = &self.blocks[cursor.block_idx];

        match cursor.phase {
            Phase::Pilot => {
                cursor.ear_high = !cursor.ear_high;
                cursor.pilot_edges += 1;
                let edges = match block.flag() {
                    Some(flag) if flag >= 128 => timing::PILOT_DATA_EDGES,
                    _ => timing::PILOT_HEADER_EDGES,
                };
                if cursor.pilot_edges >= edges {
                    cursor.phase = Phase::Sync1;
                    cursor.pulse_remaining += i64::from(timing::SYNC1_PULSE);
                } else {
                    cursor.pulse_remaining += i64::from(timing::PILOT_PULSE);
                }
            }

            Phase::Sync1 => {
                cursor.ear_high = !cursor.ear_high;
                cursor.phase = Phase::Sync2;
                cursor.pulse_remaining += i64::from(timing::SYNC2_PULSE);
            }

            Phase::Sync2 => {
                cursor.ear_high = !cursor.ear_high;
                cursor.byte_idx = 0;
                cursor.bit_idx = 7;
                cursor.second_pulse = false;
                if block.data.is_empty() {
                    Self::enter_pause(cursor, block.pause_after_ms);
                } else {
                    cursor.phase = Phase::Data;
                    cursor.pulse_remaining += i64::from(bit_pulse(block, 0, 7));
                }
            }

            Phase::Data => {
                cursor.ear_high = !cursor.ear_high;
                if !cursor.second_pulse {
                    // Second half of the same bit, same length.
                    cursor.second_pulse = true;
                    cursor.pulse_remaining +=
                        i64::from(bit_pulse(block, cursor.byte_idx, cursor.bit_idx));
                } else if cursor.bit_idx > 0 {
                    cursor.second_pulse = false;
                    cursor.bit_idx -= 1;
                    cursor.pulse_remaining +=
                        i64::from(bit_pulse(block, cursor.byte_idx, cursor.bit_idx));
                } else if cursor.byte_idx + 1 < block.data.len() {
                    cursor.second_pulse = false;
                    cursor.byte_idx += 1;
                    cursor.bit_idx = 7;
                    cursor.pulse_remaining +=
                        i64::from(bit_pulse(block, cursor.byte_idx, 7));
                } else {
                    Self::enter_pause(cursor, block.pause_after_ms);
                }
            }

            Phase::Pause => {
                // No toggle: EAR held steady through the pause. Move on.
                if cursor.block_idx + 1 < self.blocks.len() {
                    cursor.block_idx += 1;
                    cursor.phase = Phase::Pilot;
                    cursor.pilot_edges = 0;
                    cursor.pulse_remaining += i64::from(timing::PILOT_PULSE);
                } else {
                    log::info!("tape finished");
                    self.cursor = None;
                }
            }
        }
    }

    fn enter_pause(cursor: &mut PlayCursor, pause_ms: u16) {
        cursor.phase = Phase::Pause;
        // Minimum 1 ms of silence between blocks.
        let ms = u32::from(pause_ms).max(1);
        cursor.pulse_remaining += i64::from(ms * timing::T_STATES_PER_MS);
    }

    /// Next block for the ROM fast-load trap, advancing the trap cursor.
    pub fn next_trap_block(&mut self) -> Option<TapeBlock> {
        let block = self.blocks.get(self.trap_pos)?.clone();
        self.trap_pos += 1;
        Some(block)
    }
}

fn bit_pulse(block: &TapeBlock, byte_idx: usize, bit_idx: u8) -> u32 {
    if block.data[byte_idx] & (1 << bit_idx) != 0 {
        timing::BIT1_PULSE
    } else {
        timing::BIT0_PULSE
    }
}

impl Default for TapeDeck {
    fn default() -> Self {
        Self::new()
    }
}
