//! .Z80 snapshot parser (versions 1, 2 and 3), 48K machines only.
//!
//! Version 1 is a 30-byte header followed by one 48K memory image, raw or
//! RLE-compressed. If the header's PC field (offsets 6-7) is zero the file
//! is v2/v3: an extended header (length at offsets 30-31, real PC at 32-33)
//! followed by length-prefixed 16K page blocks.
//!
//! Compression is the `ED ED count value` run-length scheme; a v2/v3 block
//! length of 0xFFFF means 16K of raw bytes. A v1 stream ends at the
//! `00 ED ED 00` terminator.

use format_sna::{RAM_LEN, SnapshotState};

/// Base header size shared by all versions.
const V1_HEADER: usize = 30;

/// Parse a .Z80 snapshot into a [`SnapshotState`].
///
/// # Errors
///
/// Returns an error for truncated data, 128K hardware modes (out of scope
/// for a 48K machine), or malformed page blocks.
pub fn parse(data: &[u8]) -> Result<SnapshotState, String> {
    if data.len() < V1_HEADER {
        return Err(format!(
            ".Z80 file too short: need at least {V1_HEADER} bytes, got {}",
            data.len()
        ));
    }

    let word = |off: usize| u16::from(data[off]) | (u16::from(data[off + 1]) << 8);

    // Flags byte 1: the quirky 255 value reads as 1.
    let flags1 = if data[12] == 255 { 1 } else { data[12] };

    let mut snap = SnapshotState {
        af: (u16::from(data[0]) << 8) | u16::from(data[1]),
        bc: (u16::from(data[3]) << 8) | u16::from(data[2]),
        de: (u16::from(data[14]) << 8) | u16::from(data[13]),
        hl: (u16::from(data[5]) << 8) | u16::from(data[4]),
        af_alt: (u16::from(data[21]) << 8) | u16::from(data[22]),
        bc_alt: (u16::from(data[16]) << 8) | u16::from(data[15]),
        de_alt: (u16::from(data[18]) << 8) | u16::from(data[17]),
        hl_alt: (u16::from(data[20]) << 8) | u16::from(data[19]),
        ix: word(25),
        iy: word(23),
        sp: word(8),
        pc: word(6),
        i: data[10],
        r: (data[11] & 0x7F) | ((flags1 & 0x01) << 7),
        iff1: data[27] != 0,
        iff2: data[28] != 0,
        im: data[29] & 0x03,
        border: (flags1 >> 1) & 0x07,
        ram: vec![0u8; RAM_LEN],
    };

    if snap.pc != 0 {
        load_v1_memory(&mut snap, flags1, &data[V1_HEADER..]);
        log::info!(".Z80 v1 snapshot: PC={:#06X} IM{}", snap.pc, snap.im);
        Ok(snap)
    } else {
        load_v2v3(&mut snap, data)?;
        Ok(snap)
    }
}

/// v1 body: a single 48K image, compressed when flags1 bit 5 is set.
fn load_v1_memory(snap: &mut SnapshotState, flags1: u8, body: &[u8]) {
    // Strip the 00 ED ED 00 end-of-data marker if present.
    let body = if body.len() >= 4 && body[body.len() - 4..] == [0x00, 0xED, 0xED, 0x00] {
        &body[..body.len() - 4]
    } else {
        body
    };

    if flags1 & 0x20 != 0 {
        decompress(body, &mut snap.ram);
    } else {
        let len = body.len().min(RAM_LEN);
        snap.ram[..len].copy_from_slice(&body[..len]);
    }
}

/// v2/v3: extended header plus page blocks.
fn load_v2v3(snap: &mut SnapshotState, data: &[u8]) -> Result<(), String> {
    if data.len() < 34 {
        return Err(".Z80 v2/v3 file too short for extended header".to_string());
    }

    let ext_len = usize::from(data[30]) | (usize::from(data[31]) << 8);
    if ext_len < 23 {
        return Err(format!(".Z80 extended header length {ext_len} is too short"));
    }
    let ext_end = 32 + ext_len;
    if data.len() < ext_end {
        return Err(format!(
            ".Z80 extended header truncated: need {ext_end} bytes, got {}",
            data.len()
        ));
    }

    snap.pc = u16::from(data[32]) | (u16::from(data[33]) << 8);
    let hw_mode = data[34];

    let version = if ext_len == 23 { 2 } else { 3 };
    if is_128k_hardware(version, hw_mode) {
        return Err(format!(
            ".Z80 hardware mode {hw_mode} is a 128K machine, only 48K is supported"
        ));
    }
    log::info!(".Z80 v{version} snapshot: PC={:#06X} IM{}", snap.pc, snap.im);

    let mut pos = ext_end;
    while pos < data.len() {
        if pos + 3 > data.len() {
            return Err(format!(".Z80 page block header truncated at offset {pos}"));
        }
        let block_len = usize::from(data[pos]) | (usize::from(data[pos + 1]) << 8);
        let page = data[pos + 2];
        pos += 3;

        // Page IDs for 48K snapshots: 8 -> 0x4000, 4 -> 0x8000, 5 -> 0xC000.
        let ram_off = match page {
            8 => 0x0000,
            4 => 0x4000,
            5 => 0x8000,
            other => {
                log::warn!(".Z80 page {other} has no 48K mapping, skipping");
                let skip = if block_len == 0xFFFF { 0x4000 } else { block_len };
                pos += skip;
                continue;
            }
        };
        let dst = &mut snap.ram[ram_off..ram_off + 0x4000];

        if block_len == 0xFFFF {
            // Raw 16K, no RLE
            if pos + 0x4000 > data.len() {
                return Err(format!(".Z80 raw block for page {page} truncated"));
            }
            dst.copy_from_slice(&data[pos..pos + 0x4000]);
            pos += 0x4000;
        } else {
            if pos + block_len > data.len() {
                return Err(format!(".Z80 compressed block for page {page} truncated"));
            }
            decompress(&data[pos..pos + block_len], dst);
            pos += block_len;
        }
    }

    Ok(())
}

fn is_128k_hardware(version: u8, hw_mode: u8) -> bool {
    if version == 2 {
        matches!(hw_mode, 3 | 4)
    } else {
        matches!(hw_mode, 4 | 5 | 6 | 7 | 12 | 13)
    }
}

/// Expand the `ED ED count value` run-length encoding into `dst`. Stops
/// when either side is exhausted.
fn decompress(src: &[u8], dst: &mut [u8]) {
    let mut si = 0;
    let mut di = 0;

    while si < src.len() && di < dst.len() {
        if si + 3 < src.len() && src[si] == 0xED && src[si + 1] == 0xED {
            let count = src[si + 2] as usize;
            let value = src[si + 3];
            let run = count.min(dst.len() - di);
            dst[di..di + run].fill(value);
            di += run;
            si += 4;
        } else {
            dst[di] = src[si];
            di += 1;
            si += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A v1 header with PC and SP set and a recognisable register pattern.
    fn v1_header(pc: u16, flags1: u8) -> Vec<u8> {
        let mut h = vec![0u8; V1_HEADER];
        h[0] = 0xAA; // A
        h[1] = 0x55; // F
        h[2] = 0x34; // C
        h[3] = 0x12; // B
        h[4] = 0x78; // L
        h[5] = 0x56; // H
        h[6] = pc as u8;
        h[7] = (pc >> 8) as u8;
        h[8] = 0x00; // SP low
        h[9] = 0x80; // SP high
        h[10] = 0x3F; // I
        h[11] = 0x42; // R (low 7 bits)
        h[12] = flags1;
        h[23] = 0xCD; // IY low
        h[24] = 0xAB;
        h[25] = 0x21; // IX low
        h[26] = 0x43;
        h[27] = 1; // IFF1
        h[28] = 1; // IFF2
        h[29] = 1; // IM 1
        h
    }

    #[test]
    fn v1_uncompressed() {
        // Border 2 (bits 1-3), uncompressed
        let mut data = v1_header(0x8100, 0x04);
        let mut ram = vec![0u8; RAM_LEN];
        ram[0] = 0x11; // 0x4000
        ram[0x4000] = 0x22; // 0x8000
        ram[0x8000] = 0x33; // 0xC000
        data.extend_from_slice(&ram);

        let snap = parse(&data).expect("v1 uncompressed");
        assert_eq!(snap.pc, 0x8100);
        assert_eq!(snap.sp, 0x8000);
        assert_eq!(snap.af, 0xAA55);
        assert_eq!(snap.bc, 0x1234);
        assert_eq!(snap.hl, 0x5678);
        assert_eq!(snap.iy, 0xABCD);
        assert_eq!(snap.ix, 0x4321);
        assert_eq!(snap.border, 2);
        assert_eq!(snap.im, 1);
        assert!(snap.iff1);
        assert_eq!(snap.ram[0], 0x11);
        assert_eq!(snap.ram[0x4000], 0x22);
        assert_eq!(snap.ram[0x8000], 0x33);
    }

    #[test]
    fn v1_compressed_with_terminator() {
        // Bit 5 = compressed, border 3
        let mut data = v1_header(0x8100, 0x26);
        data.extend_from_slice(&[0xED, 0xED, 10, 0xAA]); // 10 x 0xAA
        data.extend_from_slice(&[0x55, 0x66]); // literals
        data.extend_from_slice(&[0x00, 0xED, 0xED, 0x00]); // end marker

        let snap = parse(&data).expect("v1 compressed");
        for i in 0..10 {
            assert_eq!(snap.ram[i], 0xAA);
        }
        assert_eq!(snap.ram[10], 0x55);
        assert_eq!(snap.ram[11], 0x66);
        assert_eq!(snap.ram[12], 0x00, "nothing written past the stream");
        assert_eq!(snap.border, 3);
    }

    #[test]
    fn r_register_bit7_comes_from_flags1() {
        let mut data = v1_header(0x8100, 0x01); // flags1 bit 0 = R bit 7
        data.extend_from_slice(&vec![0u8; RAM_LEN]);
        let snap = parse(&data).expect("v1");
        assert_eq!(snap.r, 0xC2); // 0x42 | 0x80
    }

    /// Build a v2 48K snapshot with one compressed page.
    fn v2_48k(pc: u16, page: u8, first_byte: u8) -> Vec<u8> {
        let mut data = v1_header(0, 0x04); // PC=0 -> v2/v3
        data.push(23); // ext header length (v2)
        data.push(0);
        let mut ext = vec![0u8; 23];
        ext[0] = pc as u8;
        ext[1] = (pc >> 8) as u8;
        ext[2] = 0; // hardware mode: 48K
        data.extend_from_slice(&ext);

        // One page, "compressed" as raw literals (no ED ED pairs inside)
        let mut page_data = vec![0u8; 0x4000];
        page_data[0] = first_byte;
        data.push((page_data.len() & 0xFF) as u8);
        data.push((page_data.len() >> 8) as u8);
        data.push(page);
        data.extend_from_slice(&page_data);
        data
    }

    #[test]
    fn v2_pc_comes_from_extended_header() {
        let snap = parse(&v2_48k(0xCAFE, 8, 0x77)).expect("v2");
        assert_eq!(snap.pc, 0xCAFE);
    }

    #[test]
    fn v2_page_mapping() {
        // Page 8 -> 0x4000, page 4 -> 0x8000, page 5 -> 0xC000
        let snap = parse(&v2_48k(0x100, 8, 0x11)).expect("v2 page 8");
        assert_eq!(snap.ram[0x0000], 0x11);

        let snap = parse(&v2_48k(0x100, 4, 0x22)).expect("v2 page 4");
        assert_eq!(snap.ram[0x4000], 0x22);

        let snap = parse(&v2_48k(0x100, 5, 0x33)).expect("v2 page 5");
        assert_eq!(snap.ram[0x8000], 0x33);
    }

    #[test]
    fn v2_raw_block_marker() {
        let mut data = v1_header(0, 0x04);
        data.push(23);
        data.push(0);
        let mut ext = vec![0u8; 23];
        ext[0] = 0x00;
        ext[1] = 0x90; // PC = 0x9000
        data.extend_from_slice(&ext);

        // 0xFFFF marker: 16K raw
        data.push(0xFF);
        data.push(0xFF);
        data.push(8);
        let mut raw = vec![0u8; 0x4000];
        raw[0] = 0xED; // a literal ED must survive raw copy
        raw[1] = 0xED;
        raw[2] = 0x05;
        raw[3] = 0x99;
        data.extend_from_slice(&raw);

        let snap = parse(&data).expect("raw block");
        assert_eq!(&snap.ram[0..4], &[0xED, 0xED, 0x05, 0x99]);
    }

    #[test]
    fn v2_128k_rejected() {
        let mut data = v1_header(0, 0x04);
        data.push(23);
        data.push(0);
        let mut ext = vec![0u8; 23];
        ext[2] = 3; // 128K hardware mode (v2)
        data.extend_from_slice(&ext);
        assert!(parse(&data).is_err());
    }

    #[test]
    fn truncated_rejected() {
        assert!(parse(&[0u8; 10]).is_err());

        // v2 header that claims a longer extension than present
        let mut data = v1_header(0, 0x04);
        data.push(54);
        data.push(0);
        data.extend_from_slice(&[0u8; 10]);
        assert!(parse(&data).is_err());
    }

    #[test]
    fn rle_decompress_edge_cases() {
        // Single ED followed by non-ED passes through
        let mut dst = [0u8; 3];
        decompress(&[0xED, 0x55, 0x66], &mut dst);
        assert_eq!(dst, [0xED, 0x55, 0x66]);

        // Run clamped to destination size
        let mut dst = [0u8; 4];
        decompress(&[0xED, 0xED, 0x10, 0xAA], &mut dst);
        assert_eq!(dst, [0xAA; 4]);
    }
}
