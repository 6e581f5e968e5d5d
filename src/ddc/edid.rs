//! EDID data parsing.
//!
//! Only the first 128-byte block is read; it carries everything the engine
//! needs to identify a display (vendor, product, serial, model and serial
//! descriptor strings). The raw block is kept because profile records emit
//! and match it verbatim.

use nom::bytes::complete::{tag, take};
use nom::number::complete::{be_u16, le_u16, le_u32, le_u8};
use nom::{Finish, IResult};
use thiserror::Error;

pub const EDID_LENGTH: usize = 128;

/// I²C address of the EDID EEPROM.
pub const EDID_ADDRESS: u8 = 0x50;

/// E-DDC segment pointer. Writing zero here before a read selects the
/// first 256-byte segment, which holds the block parsed in this module.
pub const EDDC_SEGMENT_POINTER_ADDR: u8 = 0x30;

const MODEL_DESCRIPTOR: u8 = 0xfc;
const SERIAL_DESCRIPTOR: u8 = 0xff;

#[derive(Debug, Error)]
pub enum EdidParseError {
    #[error("edid data shorter than one block")]
    TooShort,
    #[error("edid block checksum invalid")]
    BadChecksum,
    #[error("edid parse failed: {0}")]
    Malformed(String),
}

/// Parsed first EDID block.
#[derive(Debug, Clone, PartialEq)]
pub struct Edid {
    raw: [u8; EDID_LENGTH],
    /// Three letter manufacturer id.
    pub vendor: [char; 3],
    pub product: u16,
    pub serial_number: u32,
    pub week: u8,
    /// Starting at year 1990.
    pub year: u8,
    pub version: u8,
    pub revision: u8,
    /// Model name descriptor text, when present.
    pub model: Option<String>,
    /// Serial number descriptor text, when present.
    pub serial_ascii: Option<String>,
}

impl Edid {
    pub fn raw(&self) -> &[u8; EDID_LENGTH] {
        &self.raw
    }

    pub fn vendor_id(&self) -> String {
        self.vendor.iter().collect()
    }

    /// Model string, falling back to the numeric product code.
    pub fn model_name(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| format!("{}{:04X}", self.vendor_id(), self.product))
    }

    /// Serial string, falling back to the numeric serial number.
    pub fn serial_text(&self) -> String {
        self.serial_ascii
            .clone()
            .unwrap_or_else(|| self.serial_number.to_string())
    }

    pub fn manufacture_year(&self) -> usize {
        self.year as usize + 1990
    }
}

fn parse_vendor(v: u16) -> [char; 3] {
    let mask: u8 = 0x1f; // each letter is 5 bits
    let i0 = b'A' - 1; // 0x01 = A
    [
        (((v >> 10) as u8 & mask) + i0) as char,
        (((v >> 5) as u8 & mask) + i0) as char,
        ((v as u8 & mask) + i0) as char,
    ]
}

fn descriptor_text(block: &[u8]) -> String {
    block[5..18]
        .iter()
        .take_while(|&&b| b != 0x0a)
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '?'
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

fn parse_block(i: &[u8]) -> IResult<&[u8], Edid> {
    let (i, _) = tag(&[0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00][..])(i)?;
    let (i, vendor) = be_u16(i)?;
    let (i, product) = le_u16(i)?;
    let (i, serial_number) = le_u32(i)?;
    let (i, week) = le_u8(i)?;
    let (i, year) = le_u8(i)?;
    let (i, version) = le_u8(i)?;
    let (i, revision) = le_u8(i)?;
    // display parameters, chromaticity, established and standard timings
    let (i, _) = take(5usize)(i)?;
    let (i, _) = take(10usize)(i)?;
    let (i, _) = take(3usize)(i)?;
    let (i, _) = take(16usize)(i)?;

    let mut model = None;
    let mut serial_ascii = None;
    let mut rest = i;
    for _ in 0..4 {
        let (i, block) = take(18usize)(rest)?;
        rest = i;
        // display descriptors are marked by a zero pixel clock
        if block[0] == 0 && block[1] == 0 {
            match block[3] {
                MODEL_DESCRIPTOR => model = Some(descriptor_text(block)),
                SERIAL_DESCRIPTOR => serial_ascii = Some(descriptor_text(block)),
                _ => {}
            }
        }
    }

    Ok((
        rest,
        Edid {
            raw: [0; EDID_LENGTH],
            vendor: parse_vendor(vendor),
            product,
            serial_number,
            week,
            year,
            version,
            revision,
            model,
            serial_ascii,
        },
    ))
}

pub fn parse_edid(data: &[u8]) -> Result<Edid, EdidParseError> {
    if data.len() < EDID_LENGTH {
        return Err(EdidParseError::TooShort);
    }
    let block = &data[..EDID_LENGTH];
    if block.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) != 0 {
        return Err(EdidParseError::BadChecksum);
    }
    let (_, mut edid) = parse_block(block)
        .finish()
        .map_err(|e| EdidParseError::Malformed(format!("{:?}", e.code)))?;
    edid.raw.copy_from_slice(block);
    Ok(edid)
}

/// Minimal valid EDID block for a display named `model` / `serial`.
#[cfg(test)]
pub(crate) fn synthesize(
    vendor: [char; 3],
    product: u16,
    model: &str,
    serial: &str,
) -> [u8; EDID_LENGTH] {
    let mut data = [0u8; EDID_LENGTH];
    data[..8].copy_from_slice(&[0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00]);
    let packed: u16 = ((vendor[0] as u16 - 'A' as u16 + 1) << 10)
        | ((vendor[1] as u16 - 'A' as u16 + 1) << 5)
        | (vendor[2] as u16 - 'A' as u16 + 1);
    data[8..10].copy_from_slice(&packed.to_be_bytes());
    data[10..12].copy_from_slice(&product.to_le_bytes());
    data[12..16].copy_from_slice(&0x1234u32.to_le_bytes());
    data[16] = 2; // week
    data[17] = 30; // 2020
    data[18] = 1;
    data[19] = 4;

    let mut descriptor = |index: usize, ty: u8, text: &str| {
        let base = 54 + index * 18;
        data[base + 3] = ty;
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0x0a);
        bytes.resize(13, b' ');
        data[base + 5..base + 18].copy_from_slice(&bytes);
    };
    descriptor(1, MODEL_DESCRIPTOR, model);
    descriptor(2, SERIAL_DESCRIPTOR, serial);

    let sum: u8 = data[..127].iter().fold(0u8, |a, b| a.wrapping_add(*b));
    data[127] = 0u8.wrapping_sub(sum);
    data
}
