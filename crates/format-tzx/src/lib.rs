//! TZX tape container parser.
//!
//! A TZX file starts with a 10-byte header (`"ZXTape!" + 0x1A + major +
//! minor`) followed by ID-prefixed blocks. This parser understands the
//! standard-speed data block ($10), which is all the ROM loader ever
//! produces, and the text description block ($30), which is logged and
//! discarded. An unknown block ID stops parsing with a warning; blocks
//! accepted up to that point remain playable.
//!
//! Reference: <https://worldofspectrum.net/TZXformat.html>

/// TZX header magic: "ZXTape!" + 0x1A.
const MAGIC: &[u8; 8] = b"ZXTape!\x1A";

/// Standard-speed data block ID.
const BLOCK_STANDARD_SPEED: u8 = 0x10;

/// Text description block ID.
const BLOCK_TEXT_DESCRIPTION: u8 = 0x30;

/// One playable tape block: the raw bytes (flag + payload + checksum) and
/// the silence that follows them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapeBlock {
    /// TZX block ID this came from (always $10 for now).
    pub id: u8,
    /// Pause after the block in milliseconds.
    pub pause_after_ms: u16,
    /// Block bytes, flag byte first.
    pub data: Vec<u8>,
}

impl TapeBlock {
    /// The flag byte decides the pilot length (header vs data) and is
    /// matched against A by the ROM loader.
    #[must_use]
    pub fn flag(&self) -> Option<u8> {
        self.data.first().copied()
    }
}

/// A parsed TZX tape: an ordered list of playable blocks.
#[derive(Debug, Clone)]
pub struct TzxFile {
    pub major: u8,
    pub minor: u8,
    pub blocks: Vec<TapeBlock>,
}

impl TzxFile {
    /// Parse a TZX container from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is missing or malformed, or if a
    /// recognised block is truncated. An *unknown* block ID is not an
    /// error: parsing stops there and the accepted blocks are returned.
    pub fn parse(data: &[u8]) -> Result<Self, String> {
        if data.len() < 10 {
            return Err("TZX file too short for header (need 10 bytes)".to_string());
        }
        if &data[0..8] != MAGIC {
            return Err("invalid TZX magic (expected \"ZXTape!\" + 0x1A)".to_string());
        }

        let major = data[8];
        let minor = data[9];
        log::info!("TZX version {major}.{minor}");

        let mut blocks = Vec::new();
        let mut pos = 10;

        while pos < data.len() {
            let id = data[pos];
            pos += 1;

            match id {
                BLOCK_STANDARD_SPEED => {
                    need(data, pos, 4, "standard-speed header")?;
                    let pause_after_ms = read_u16_le(data, pos);
                    let len = read_u16_le(data, pos + 2) as usize;
                    pos += 4;

                    need(data, pos, len, "standard-speed data")?;
                    blocks.push(TapeBlock {
                        id,
                        pause_after_ms,
                        data: data[pos..pos + len].to_vec(),
                    });
                    pos += len;
                }
                BLOCK_TEXT_DESCRIPTION => {
                    need(data, pos, 1, "text description length")?;
                    let len = data[pos] as usize;
                    pos += 1;

                    need(data, pos, len, "text description")?;
                    let text = String::from_utf8_lossy(&data[pos..pos + len]);
                    log::info!("tape description: {text}");
                    pos += len;
                }
                other => {
                    log::warn!(
                        "unsupported TZX block ${other:02X} at offset {}, \
                         keeping {} block(s) parsed so far",
                        pos - 1,
                        blocks.len()
                    );
                    break;
                }
            }
        }

        Ok(Self {
            major,
            minor,
            blocks,
        })
    }
}

fn need(data: &[u8], pos: usize, n: usize, what: &str) -> Result<(), String> {
    if pos + n > data.len() {
        Err(format!(
            "truncated TZX {what} at offset {pos}: need {n} bytes, {} remain",
            data.len() - pos
        ))
    } else {
        Ok(())
    }
}

fn read_u16_le(data: &[u8], pos: usize) -> u16 {
    u16::from(data[pos]) | (u16::from(data[pos + 1]) << 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tzx_header() -> Vec<u8> {
        let mut h = MAGIC.to_vec();
        h.push(1);
        h.push(20);
        h
    }

    fn push_standard_block(out: &mut Vec<u8>, pause_ms: u16, payload: &[u8]) {
        out.push(0x10);
        out.extend_from_slice(&pause_ms.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
    }

    #[test]
    fn empty_tape_parses() {
        let tzx = TzxFile::parse(&tzx_header()).expect("valid empty TZX");
        assert_eq!(tzx.major, 1);
        assert_eq!(tzx.minor, 20);
        assert!(tzx.blocks.is_empty());
    }

    #[test]
    fn short_file_rejected() {
        assert!(TzxFile::parse(&[]).is_err());
        assert!(TzxFile::parse(&[0u8; 9]).is_err());
    }

    #[test]
    fn bad_magic_rejected() {
        let mut data = tzx_header();
        data[0] = b'Y';
        assert!(TzxFile::parse(&data).is_err());
    }

    #[test]
    fn standard_speed_block() {
        let mut data = tzx_header();
        push_standard_block(&mut data, 1000, &[0x00, 0x01, 0x02, 0x03]);

        let tzx = TzxFile::parse(&data).expect("standard block");
        assert_eq!(tzx.blocks.len(), 1);
        let block = &tzx.blocks[0];
        assert_eq!(block.id, 0x10);
        assert_eq!(block.pause_after_ms, 1000);
        assert_eq!(block.data, vec![0x00, 0x01, 0x02, 0x03]);
        assert_eq!(block.flag(), Some(0x00));
    }

    #[test]
    fn text_description_is_discarded() {
        let mut data = tzx_header();
        data.push(0x30);
        data.push(5);
        data.extend_from_slice(b"Hello");
        push_standard_block(&mut data, 0, &[0xFF, 0xAA]);

        let tzx = TzxFile::parse(&data).expect("text + data");
        assert_eq!(tzx.blocks.len(), 1);
        assert_eq!(tzx.blocks[0].data, vec![0xFF, 0xAA]);
    }

    #[test]
    fn unknown_block_stops_parsing_keeping_accepted() {
        let mut data = tzx_header();
        push_standard_block(&mut data, 500, &[0x00, 0x11]);
        data.push(0x19); // generalized data block -- unsupported
        data.extend_from_slice(&[0u8; 4]);
        push_standard_block(&mut data, 500, &[0xFF, 0x22]);

        let tzx = TzxFile::parse(&data).expect("partial parse");
        assert_eq!(tzx.blocks.len(), 1, "blocks after the unknown ID dropped");
        assert_eq!(tzx.blocks[0].data, vec![0x00, 0x11]);
    }

    #[test]
    fn truncated_block_is_an_error() {
        let mut data = tzx_header();
        data.push(0x10);
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&100u16.to_le_bytes()); // claims 100 bytes
        data.push(0x00); // but only 1 follows
        assert!(TzxFile::parse(&data).is_err());
    }

    #[test]
    fn multiple_blocks_in_order() {
        let mut data = tzx_header();
        push_standard_block(&mut data, 1000, &[0x00, 0x01]);
        push_standard_block(&mut data, 2000, &[0xFF, 0x02]);

        let tzx = TzxFile::parse(&data).expect("two blocks");
        assert_eq!(tzx.blocks.len(), 2);
        assert_eq!(tzx.blocks[0].flag(), Some(0x00));
        assert_eq!(tzx.blocks[1].flag(), Some(0xFF));
        assert_eq!(tzx.blocks[1].pause_after_ms, 2000);
    }
}
