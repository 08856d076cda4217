//! LZW block compression, in the two dialects the CZ family uses.
//!
//! Dialect A (CZ1/CZ3/CZ4) writes each code as a little-endian u16;
//! a block's `compressed_size` counts codes. Dialect B (CZ2) writes a
//! byte stream with escape prefixes; `compressed_size` counts bytes.
//!
//! The dictionary restarts at every block, but the in-progress match
//! carries across the boundary. The carried match is always a single
//! raw byte: the encoder only stops a block right after emitting a code,
//! at which point the pending match has just been reset to one byte.
//! Per-block accounting follows
//! `raw_size = prev_carry + consumed - curr_carry` with carry counted in
//! raw data bytes (0 or 1).

use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::cancel::CancelToken;
use crate::format::io;

/// Default block limit for dialect A, in emitted codes.
/// Keeps the per-block dictionary below the 16-bit code ceiling.
const BLOCK_CODES: usize = 0xFEFD;

/// Default block limit for dialect B, in emitted bytes.
const BLOCK_BYTES: usize = 0x87BDF;

/// Escape prefix for a 16-bit dictionary reference in dialect B.
const ESC_REF: u8 = 0xFF;
/// Escape prefix for a literal 0xFE/0xFF byte in dialect B.
const ESC_LIT: u8 = 0xFE;

const DICT_MAX: u32 = 0x10000;

/// One entry of the CZ block table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub compressed_size: u32,
    pub raw_size: u32,
}

struct EncodedBlock {
    consumed: usize,
    codes: Vec<u16>,
    carry: Option<u8>,
}

/// Encode one block. `code_limit == 0` means "until the input ends".
///
/// Stops in one of two ways: the input slice is exhausted (the pending
/// match is flushed, no carry), or the code budget fills right after an
/// emit (the pending match is the single byte just consumed, carried out).
fn encode_block(data: &[u8], code_limit: usize, carry: Option<u8>) -> EncodedBlock {
    let mut dict: HashMap<(u32, u8), u32> = HashMap::new();
    let mut next: u32 = 256;
    let mut codes: Vec<u16> = Vec::new();
    let mut elem: Option<u32> = carry.map(u32::from);
    let mut consumed = 0usize;

    for &c in data {
        consumed += 1;
        match elem {
            None => elem = Some(u32::from(c)),
            Some(e) => {
                if let Some(&code) = dict.get(&(e, c)) {
                    elem = Some(code);
                } else {
                    codes.push(e as u16);
                    if next < DICT_MAX {
                        dict.insert((e, c), next);
                        next += 1;
                    }
                    elem = Some(u32::from(c));
                    if code_limit > 0 && codes.len() >= code_limit {
                        return EncodedBlock {
                            consumed,
                            codes,
                            carry: Some(c),
                        };
                    }
                }
            }
        }
    }
    if let Some(e) = elem {
        codes.push(e as u16);
    }
    EncodedBlock {
        consumed,
        codes,
        carry: None,
    }
}

/// Decode one block's code sequence; must reproduce exactly `raw_size` bytes.
fn decode_block(codes: &[u16], raw_size: usize, out: &mut Vec<u8>) -> Result<()> {
    let mut dict: Vec<Vec<u8>> = (0u16..256).map(|b| vec![b as u8]).collect();
    let mut prev: Vec<u8> = Vec::new();
    let start = out.len();

    for (i, &code) in codes.iter().enumerate() {
        let code = code as usize;
        let s = if code < dict.len() {
            dict[code].clone()
        } else if code == dict.len() && !prev.is_empty() {
            // The KwKwK case: the reference was created by this very code.
            let mut s = prev.clone();
            s.push(prev[0]);
            s
        } else {
            bail!("corrupt LZW stream: code {} at index {} (dict {})", code, i, dict.len());
        };
        out.extend_from_slice(&s);
        if !prev.is_empty() && dict.len() < DICT_MAX as usize {
            let mut entry = prev.clone();
            entry.push(s[0]);
            dict.push(entry);
        }
        prev = s;
    }

    let produced = out.len() - start;
    if produced != raw_size {
        bail!(
            "LZW block decoded to {} bytes, block table says {}",
            produced,
            raw_size
        );
    }
    Ok(())
}

/// Decompress a dialect-A payload described by `blocks`.
pub fn decompress(data: &[u8], blocks: &[BlockInfo], cancel: &CancelToken) -> Result<Vec<u8>> {
    let total_raw: usize = blocks.iter().map(|b| b.raw_size as usize).sum();
    let mut out = Vec::with_capacity(total_raw);
    let mut off = 0usize;
    for block in blocks {
        cancel.check()?;
        let n = block.compressed_size as usize;
        let mut codes = Vec::with_capacity(n);
        for _ in 0..n {
            codes.push(io::read_u16_le(data, &mut off)?);
        }
        decode_block(&codes, block.raw_size as usize, &mut out)?;
    }
    Ok(out)
}

/// Compress with dialect A. `code_limit` bounds the codes per block;
/// 0 selects the default. Returns the code payload and the block table
/// entries; `Σ raw_size` always equals `data.len()`.
pub fn compress(
    data: &[u8],
    code_limit: usize,
    cancel: &CancelToken,
) -> Result<(Vec<u8>, Vec<BlockInfo>)> {
    let limit = if code_limit == 0 { BLOCK_CODES } else { code_limit };
    let mut payload = Vec::new();
    let mut blocks = Vec::new();
    let mut offset = 0usize;
    let mut carry: Option<u8> = None;

    while offset < data.len() {
        cancel.check()?;
        let block = encode_block(&data[offset..], limit, carry);
        for &code in &block.codes {
            io::put_u16_le(code, &mut payload);
        }
        let prev_carry = carry.is_some() as u32;
        let curr_carry = block.carry.is_some() as u32;
        blocks.push(BlockInfo {
            compressed_size: block.codes.len() as u32,
            raw_size: prev_carry + block.consumed as u32 - curr_carry,
        });
        offset += block.consumed;
        carry = block.carry;
    }
    // A carry with no input left becomes a one-byte final block.
    if let Some(b) = carry {
        io::put_u16_le(u16::from(b), &mut payload);
        blocks.push(BlockInfo {
            compressed_size: 1,
            raw_size: 1,
        });
    }
    Ok((payload, blocks))
}

/// Compress with dialect A against a fixed block layout: each target entry
/// is the exact `raw_size` the corresponding output block must report.
/// Used when a host engine has the original block layout baked in.
pub fn compress_with_raw_sizes(
    data: &[u8],
    targets: &[u32],
    cancel: &CancelToken,
) -> Result<(Vec<u8>, Vec<BlockInfo>)> {
    let mut payload = Vec::new();
    let mut blocks = Vec::new();
    let mut offset = 0usize;

    for &target in targets {
        if offset >= data.len() {
            break;
        }
        cancel.check()?;
        let end = (offset + target as usize).min(data.len());
        // The window end is a phrase boundary: the pending match is
        // flushed, so every block reports exactly its window length.
        let block = encode_block(&data[offset..end], 0, None);
        debug_assert_eq!(block.consumed, end - offset);
        for &code in &block.codes {
            io::put_u16_le(code, &mut payload);
        }
        blocks.push(BlockInfo {
            compressed_size: block.codes.len() as u32,
            raw_size: block.consumed as u32,
        });
        offset = end;
    }
    if offset < data.len() {
        log::warn!(
            "fixed block layout covers {} of {} bytes; compressing the rest with default blocks",
            offset,
            data.len()
        );
        let (rest_payload, rest_blocks) = compress(&data[offset..], 0, cancel)?;
        payload.extend_from_slice(&rest_payload);
        blocks.extend(rest_blocks);
    }
    Ok((payload, blocks))
}

/// Decompress a dialect-B (byte stream) payload described by `blocks`.
pub fn decompress2(data: &[u8], blocks: &[BlockInfo], cancel: &CancelToken) -> Result<Vec<u8>> {
    let total_raw: usize = blocks.iter().map(|b| b.raw_size as usize).sum();
    let mut out = Vec::with_capacity(total_raw);
    let mut off = 0usize;
    for block in blocks {
        cancel.check()?;
        let stream = io::read_bytes(data, &mut off, block.compressed_size as usize)?;
        let mut codes = Vec::new();
        let mut pos = 0usize;
        while pos < stream.len() {
            match stream[pos] {
                ESC_REF => {
                    let mut p = pos + 1;
                    codes.push(io::read_u16_le(stream, &mut p)?);
                    pos = p;
                }
                ESC_LIT => {
                    let mut p = pos + 1;
                    codes.push(u16::from(io::read_u8(stream, &mut p)?));
                    pos = p;
                }
                lit => {
                    codes.push(u16::from(lit));
                    pos += 1;
                }
            }
        }
        decode_block(&codes, block.raw_size as usize, &mut out)?;
    }
    Ok(out)
}

/// Byte cost of a dialect-B code on the wire.
fn code_cost(code: u32) -> usize {
    match code {
        0..=0xFD => 1,
        0xFE | 0xFF => 2,
        _ => 3,
    }
}

fn put_code2(code: u32, out: &mut Vec<u8>) {
    match code {
        0..=0xFD => out.push(code as u8),
        0xFE | 0xFF => {
            out.push(ESC_LIT);
            out.push(code as u8);
        }
        _ => {
            out.push(ESC_REF);
            io::put_u16_le(code as u16, out);
        }
    }
}

/// Compress with dialect B. `byte_limit` bounds the emitted bytes per
/// block; 0 selects the default.
pub fn compress2(
    data: &[u8],
    byte_limit: usize,
    cancel: &CancelToken,
) -> Result<(Vec<u8>, Vec<BlockInfo>)> {
    let limit = if byte_limit == 0 { BLOCK_BYTES } else { byte_limit };
    let mut payload = Vec::new();
    let mut blocks = Vec::new();
    let mut offset = 0usize;
    let mut carry: Option<u8> = None;

    while offset < data.len() {
        cancel.check()?;
        let data = &data[offset..];

        let mut dict: HashMap<(u32, u8), u32> = HashMap::new();
        let mut next: u32 = 256;
        let mut stream: Vec<u8> = Vec::new();
        let mut elem: Option<u32> = carry.map(u32::from);
        let mut consumed = 0usize;
        let mut carry_out: Option<u8> = None;

        for &c in data {
            consumed += 1;
            match elem {
                None => elem = Some(u32::from(c)),
                Some(e) => {
                    if let Some(&code) = dict.get(&(e, c)) {
                        elem = Some(code);
                    } else {
                        put_code2(e, &mut stream);
                        if next < DICT_MAX {
                            dict.insert((e, c), next);
                            next += 1;
                        }
                        elem = Some(u32::from(c));
                        if stream.len() + code_cost(u32::from(c)) >= limit {
                            carry_out = Some(c);
                            break;
                        }
                    }
                }
            }
        }
        if carry_out.is_none() {
            if let Some(e) = elem {
                put_code2(e, &mut stream);
            }
        }

        let prev_carry = carry.is_some() as u32;
        let curr_carry = carry_out.is_some() as u32;
        blocks.push(BlockInfo {
            compressed_size: stream.len() as u32,
            raw_size: prev_carry + consumed as u32 - curr_carry,
        });
        payload.extend_from_slice(&stream);
        offset += consumed;
        carry = carry_out;
    }
    if let Some(b) = carry {
        let mut stream = Vec::new();
        put_code2(u32::from(b), &mut stream);
        blocks.push(BlockInfo {
            compressed_size: stream.len() as u32,
            raw_size: 1,
        });
        payload.extend_from_slice(&stream);
    }
    Ok((payload, blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancelToken {
        CancelToken::new()
    }

    #[test]
    fn roundtrip_single_block() {
        let data = b"TOBEORNOTTOBEORTOBEORNOT".to_vec();
        let (payload, blocks) = compress(&data, 0, &token()).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(decompress(&payload, &blocks, &token()).unwrap(), data);
    }

    #[test]
    fn roundtrip_across_block_sizes() {
        let mut data = Vec::new();
        for i in 0..4096u32 {
            data.push((i % 251) as u8);
            data.push((i * 7 % 13) as u8);
        }
        for limit in [1, 2, 3, 7, 64, 1000] {
            let (payload, blocks) = compress(&data, limit, &token()).unwrap();
            assert_eq!(decompress(&payload, &blocks, &token()).unwrap(), data);
            let raw: u32 = blocks.iter().map(|b| b.raw_size).sum();
            assert_eq!(raw as usize, data.len());
            let codes: usize = blocks.iter().map(|b| b.compressed_size as usize).sum();
            assert_eq!(codes * 2, payload.len());
        }
    }

    #[test]
    fn ababab_raw_sizes_sum_regardless_of_split() {
        let data = b"ababab";
        for limit in [1, 2, 3, 4] {
            let (payload, blocks) = compress(data, limit, &token()).unwrap();
            let raw: u32 = blocks.iter().map(|b| b.raw_size).sum();
            assert_eq!(raw, 6, "limit {}", limit);
            assert_eq!(decompress(&payload, &blocks, &token()).unwrap(), data);
        }
    }

    #[test]
    fn carry_boundary_at_high_bytes() {
        // Bytes straddling 0x80 used to trip length-based carry accounting.
        let data: Vec<u8> = (0..=255u8).chain(0..=255u8).chain(120..=140u8).collect();
        for limit in [1, 2, 5] {
            let (payload, blocks) = compress(&data, limit, &token()).unwrap();
            let raw: u32 = blocks.iter().map(|b| b.raw_size).sum();
            assert_eq!(raw as usize, data.len());
            assert_eq!(decompress(&payload, &blocks, &token()).unwrap(), data);
        }
    }

    #[test]
    fn fixed_raw_sizes_preserve_layout() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 17) as u8).collect();
        let targets = [300u32, 300, 400];
        let (payload, blocks) = compress_with_raw_sizes(&data, &targets, &token()).unwrap();
        assert_eq!(blocks.len(), 3);
        for (block, want) in blocks.iter().zip(targets) {
            assert_eq!(block.raw_size, want);
        }
        assert_eq!(decompress(&payload, &blocks, &token()).unwrap(), data);
    }

    #[test]
    fn empty_input_yields_no_blocks() {
        let (payload, blocks) = compress(&[], 0, &token()).unwrap();
        assert!(payload.is_empty());
        assert!(blocks.is_empty());
    }

    #[test]
    fn dialect_b_roundtrip() {
        let mut data = b"abcabcabcABCABC".to_vec();
        data.extend([0xFE, 0xFF, 0xFE, 0xFF, 0x00, 0x01]);
        let (payload, blocks) = compress2(&data, 0, &token()).unwrap();
        let bytes: usize = blocks.iter().map(|b| b.compressed_size as usize).sum();
        assert_eq!(bytes, payload.len());
        assert_eq!(decompress2(&payload, &blocks, &token()).unwrap(), data);
    }

    #[test]
    fn dialect_b_small_blocks() {
        let data: Vec<u8> = (0..600u32).map(|i| (i % 29) as u8 + 0xE0).collect();
        for limit in [8, 13, 64] {
            let (payload, blocks) = compress2(&data, limit, &token()).unwrap();
            let raw: u32 = blocks.iter().map(|b| b.raw_size).sum();
            assert_eq!(raw as usize, data.len());
            assert_eq!(decompress2(&payload, &blocks, &token()).unwrap(), data);
        }
    }

    #[test]
    fn cancelled_compress_bails() {
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(compress(b"data", 0, &cancel).is_err());
    }
}
