//! SNA snapshot parser.
//!
//! A 48K SNA file is exactly 49,179 bytes: a 27-byte register header
//! followed by the 49,152 bytes of RAM from 0x4000 upward. PC is not in the
//! header; it was pushed onto the stack before the snapshot was taken, so
//! the parser pops it from the RAM image and bumps SP by 2.
//!
//! This crate also defines [`SnapshotState`], the fully-resolved machine
//! state shared with the .Z80 parser.

/// Exact size of a 48K SNA file.
pub const SNA_LEN: usize = 27 + RAM_LEN;

/// Bytes of RAM in a 48K image (0x4000..=0xFFFF).
pub const RAM_LEN: usize = 0xC000;

/// A fully-resolved snapshot: registers, interrupt state, border colour and
/// the 48K RAM image. Produced by both the SNA and .Z80 parsers; the machine
/// applies it atomically.
#[derive(Debug, Clone)]
pub struct SnapshotState {
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub af_alt: u16,
    pub bc_alt: u16,
    pub de_alt: u16,
    pub hl_alt: u16,
    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub i: u8,
    pub r: u8,
    pub iff1: bool,
    pub iff2: bool,
    pub im: u8,
    /// Border colour 0-7.
    pub border: u8,
    /// RAM image, offset 0 = address 0x4000. Always `RAM_LEN` bytes.
    pub ram: Vec<u8>,
}

/// Parse a 48K SNA image.
///
/// # Errors
///
/// Returns an error if the size is not exactly 49,179 bytes, if the
/// interrupt mode field is out of range, or if SP points into ROM (the PC
/// pop would read outside the RAM image).
pub fn parse(data: &[u8]) -> Result<SnapshotState, String> {
    if data.len() != SNA_LEN {
        return Err(format!(
            "invalid SNA size: expected {SNA_LEN} bytes, got {}",
            data.len()
        ));
    }

    let word = |off: usize| u16::from(data[off]) | (u16::from(data[off + 1]) << 8);

    let i = data[0];
    let hl_alt = word(1);
    let de_alt = word(3);
    let bc_alt = word(5);
    let af_alt = word(7);
    let hl = word(9);
    let de = word(11);
    let bc = word(13);
    let iy = word(15);
    let ix = word(17);
    let iff2 = data[19] & 0x04 != 0;
    let r = data[20];
    // F at 21, A at 22
    let af = (u16::from(data[22]) << 8) | u16::from(data[21]);
    let sp = word(23);
    let im = data[25];
    let border = data[26] & 0x07;

    if im > 2 {
        return Err(format!("invalid SNA interrupt mode {im}"));
    }

    let ram = data[27..].to_vec();

    // Pop PC from the stack image and unwind SP.
    if sp < 0x4000 || sp == 0xFFFF {
        return Err(format!(
            "SNA stack pointer {sp:#06X} leaves no room to pop PC from RAM"
        ));
    }
    let lo = ram[sp as usize - 0x4000];
    let hi = ram[sp as usize + 1 - 0x4000];
    let pc = u16::from(lo) | (u16::from(hi) << 8);
    let sp = sp.wrapping_add(2);

    log::info!("SNA snapshot: PC={pc:#06X} SP={sp:#06X} IM{im} border {border}");

    Ok(SnapshotState {
        af,
        bc,
        de,
        hl,
        af_alt,
        bc_alt,
        de_alt,
        hl_alt,
        ix,
        iy,
        sp,
        pc,
        i,
        r,
        // SNA stores only IFF2; IFF1 is restored from it.
        iff1: iff2,
        iff2,
        im,
        border,
        ram,
    })
}
