//! Intel HEX parsing.

use anyhow::{bail, ensure, Context, Result};

const REC_DATA: u8 = 0x00;
const REC_EOF: u8 = 0x01;
const REC_EXT_SEGMENT_ADDRESS: u8 = 0x02;
const REC_START_SEGMENT_ADDRESS: u8 = 0x03;
const REC_EXT_LINEAR_ADDRESS: u8 = 0x04;
const REC_START_LINEAR_ADDRESS: u8 = 0x05;

/// A parsed segment of data at a specific address from an Intel HEX file.
#[derive(Debug, Clone)]
pub struct HexSegment {
    pub address: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct HexFile {
    pub segments: Vec<HexSegment>,
    /// Initial CS:IP from a start segment address record.
    pub start_segment: Option<(u16, u16)>,
    /// Initial EIP from a start linear address record.
    pub start_linear: Option<u32>,
}

struct Record<'a> {
    address: u16,
    kind: u8,
    data: &'a [u8],
}

fn parse_record(line: &str, bytes: &mut Vec<u8>) -> Result<()> {
    let Some(hex) = line.strip_prefix(':') else {
        bail!("missing start code ':'");
    };
    *bytes = decode_hex_bytes(hex).context("invalid hex data")?;

    ensure!(bytes.len() >= 5, "record too short");
    let byte_count = bytes[0] as usize;
    ensure!(
        bytes.len() == 5 + byte_count,
        "expected {} data bytes, got {}",
        byte_count,
        bytes.len() - 5
    );

    // Sum of all bytes (including checksum) should be 0 mod 256
    let checksum: u8 = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    ensure!(checksum == 0, "checksum mismatch");
    Ok(())
}

impl<'a> Record<'a> {
    fn from_bytes(bytes: &'a [u8]) -> Self {
        let byte_count = bytes[0] as usize;
        Self {
            address: u16::from_be_bytes([bytes[1], bytes[2]]),
            kind: bytes[3],
            data: &bytes[4..4 + byte_count],
        }
    }

    /// Address records carry their value in the data field; the address
    /// field must be zero.
    fn address_value(&self, len: usize, what: &str) -> Result<&'a [u8]> {
        ensure!(
            self.address == 0,
            "non-zero address ({:#x}) on {} record",
            self.address,
            what
        );
        ensure!(
            self.data.len() == len,
            "{} record must carry {} bytes",
            what,
            len
        );
        Ok(self.data)
    }
}

/// Parse an Intel HEX format string.
///
/// Supports record types 00 (data) through 05 (start linear address).
/// The file must end with an EOF record; anything after it is an error.
pub fn parse_hex(input: &str) -> Result<HexFile> {
    let mut file = HexFile::default();
    let mut base_address: u32 = 0;
    let mut eof_seen = false;
    let mut bytes = Vec::new();

    for (line_num, line) in input.lines().enumerate() {
        let line_num = line_num + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if eof_seen {
            bail!("line {}: additional data after EOF record", line_num);
        }

        parse_record(line, &mut bytes).with_context(|| format!("line {}", line_num))?;
        let record = Record::from_bytes(&bytes);

        let value = |len, what| {
            record
                .address_value(len, what)
                .with_context(|| format!("line {}", line_num))
        };

        match record.kind {
            REC_DATA => {
                let full_address = base_address + record.address as u32;

                // Try to extend the last segment if this data is contiguous
                if let Some(last) = file.segments.last_mut() {
                    let last_end = last.address + last.data.len() as u32;
                    if full_address == last_end {
                        last.data.extend_from_slice(record.data);
                        continue;
                    }
                }

                file.segments.push(HexSegment {
                    address: full_address,
                    data: record.data.to_vec(),
                });
            }
            REC_EOF => eof_seen = true,
            REC_EXT_SEGMENT_ADDRESS => {
                let data = value(2, "extended segment address")?;
                base_address = (u16::from_be_bytes([data[0], data[1]]) as u32) << 4;
            }
            REC_START_SEGMENT_ADDRESS => {
                let data = value(4, "start segment address")?;
                file.start_segment = Some((
                    u16::from_be_bytes([data[0], data[1]]),
                    u16::from_be_bytes([data[2], data[3]]),
                ));
            }
            REC_EXT_LINEAR_ADDRESS => {
                let data = value(2, "extended linear address")?;
                base_address = (u16::from_be_bytes([data[0], data[1]]) as u32) << 16;
            }
            REC_START_LINEAR_ADDRESS => {
                let data = value(4, "start linear address")?;
                file.start_linear = Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
            }
            other => {
                bail!("line {}: unsupported record type 0x{:02X}", line_num, other);
            }
        }
    }

    ensure!(eof_seen, "no EOF record found");
    Ok(file)
}

/// Flatten parsed HEX segments into a contiguous firmware image.
/// Returns (base_address, data) where gaps are filled with 0xFF.
pub fn flatten_segments(segments: &[HexSegment]) -> Result<(u32, Vec<u8>)> {
    let min_addr = segments
        .iter()
        .map(|s| s.address)
        .min()
        .context("no data segments in HEX file")?;
    let max_addr = segments
        .iter()
        .map(|s| s.address + s.data.len() as u32)
        .max()
        .unwrap_or(min_addr);

    let total_size = (max_addr - min_addr) as usize;
    let mut image = vec![0xFFu8; total_size]; // 0xFF = erased flash

    for seg in segments {
        let offset = (seg.address - min_addr) as usize;
        image[offset..offset + seg.data.len()].copy_from_slice(&seg.data);
    }

    Ok((min_addr, image))
}

fn decode_hex_bytes(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        bail!("odd number of hex characters");
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .with_context(|| format!("invalid hex at position {}", i))
        })
        .collect()
}
