//! The on-disk instruction unit: `len:u16, opcode:u8, fixed_flag:u8,
//! params[len-4]`, little-endian, packed back to back.

use anyhow::{bail, Result};
use luca_core::format::io;

/// Minimum valid CodeLine length: the four header bytes.
pub const MIN_LINE_LEN: u16 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLine {
    pub opcode: u8,
    pub fixed_flag: u8,
    pub params: Vec<u8>,
    /// Byte offset of this line within the script stream.
    pub offset: u32,
}

impl CodeLine {
    pub fn len(&self) -> u16 {
        MIN_LINE_LEN + self.params.len() as u16
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        io::put_u16_le(self.len(), out);
        io::put_u8(self.opcode, out);
        io::put_u8(self.fixed_flag, out);
        out.extend_from_slice(&self.params);
    }
}

/// Outcome of parsing one PAK entry as a script.
#[derive(Debug, Clone)]
pub enum ParsedEntry {
    Code(Vec<CodeLine>),
    /// First CodeLine had `len < 4`: not bytecode but a baked data table
    /// (seen in e.g. SEEN85xx minigame entries). Must be left untouched.
    DataTable,
}

/// Walk a byte stream into CodeLines.
///
/// A short first length marks the entry as a data table; a short or
/// truncated length later in the stream is a parse error the caller
/// recovers from at the entry boundary.
pub fn parse_entry(data: &[u8]) -> Result<ParsedEntry> {
    if data.len() < MIN_LINE_LEN as usize {
        return Ok(ParsedEntry::DataTable);
    }
    let first_len = u16::from_le_bytes([data[0], data[1]]);
    if first_len < MIN_LINE_LEN {
        return Ok(ParsedEntry::DataTable);
    }

    let mut lines = Vec::new();
    let mut off = 0usize;
    while off < data.len() {
        let start = off;
        let len = io::read_u16_le(data, &mut off)?;
        if len < MIN_LINE_LEN {
            bail!("CodeLine at offset {} has invalid length {}", start, len);
        }
        let opcode = io::read_u8(data, &mut off)?;
        let fixed_flag = io::read_u8(data, &mut off)?;
        let params = io::read_bytes(data, &mut off, len as usize - MIN_LINE_LEN as usize)?;
        lines.push(CodeLine {
            opcode,
            fixed_flag,
            params: params.to_vec(),
            offset: start as u32,
        });
    }
    Ok(ParsedEntry::Code(lines))
}

/// Serialise a line sequence, recomputing offsets as it goes.
pub fn write_lines(lines: &[CodeLine]) -> Vec<u8> {
    let mut out = Vec::new();
    for line in lines {
        line.write(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_lines() {
        let lines = vec![
            CodeLine {
                opcode: 2,
                fixed_flag: 1,
                params: vec![0xAA, 0xBB],
                offset: 0,
            },
            CodeLine {
                opcode: 7,
                fixed_flag: 0,
                params: vec![],
                offset: 6,
            },
        ];
        let bytes = write_lines(&lines);
        match parse_entry(&bytes).unwrap() {
            ParsedEntry::Code(parsed) => assert_eq!(parsed, lines),
            ParsedEntry::DataTable => panic!("expected code"),
        }
    }

    #[test]
    fn zero_length_first_line_is_a_data_table() {
        let data = [0x00, 0x00, 0x12, 0x34, 0x56, 0x78];
        assert!(matches!(parse_entry(&data).unwrap(), ParsedEntry::DataTable));
    }

    #[test]
    fn short_length_mid_stream_is_an_error() {
        let mut bytes = Vec::new();
        CodeLine {
            opcode: 1,
            fixed_flag: 0,
            params: vec![],
            offset: 0,
        }
        .write(&mut bytes);
        bytes.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]);
        assert!(parse_entry(&bytes).is_err());
    }

    #[test]
    fn truncated_params_are_an_error() {
        let bytes = [0x08, 0x00, 0x01, 0x00, 0xAA];
        assert!(parse_entry(&bytes).is_err());
    }
}
