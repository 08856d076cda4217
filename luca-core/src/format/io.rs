//! Little-endian primitive reads and writes over byte buffers.
//!
//! Every read is bounds-checked and reports the failing offset; malformed
//! input surfaces as an error, never a panic.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

pub fn read_u8(bytes: &[u8], off: &mut usize) -> Result<u8> {
    if *off + 1 > bytes.len() {
        bail!("unexpected EOF while reading u8 at {}", off);
    }
    let v = bytes[*off];
    *off += 1;
    Ok(v)
}

pub fn read_u16_le(bytes: &[u8], off: &mut usize) -> Result<u16> {
    if *off + 2 > bytes.len() {
        bail!("unexpected EOF while reading u16 at {}", off);
    }
    let v = u16::from_le_bytes([bytes[*off], bytes[*off + 1]]);
    *off += 2;
    Ok(v)
}

pub fn read_u32_le(bytes: &[u8], off: &mut usize) -> Result<u32> {
    if *off + 4 > bytes.len() {
        bail!("unexpected EOF while reading u32 at {}", off);
    }
    let v = u32::from_le_bytes([
        bytes[*off],
        bytes[*off + 1],
        bytes[*off + 2],
        bytes[*off + 3],
    ]);
    *off += 4;
    Ok(v)
}

pub fn read_bytes<'a>(bytes: &'a [u8], off: &mut usize, len: usize) -> Result<&'a [u8]> {
    if *off + len > bytes.len() {
        bail!(
            "unexpected EOF while reading {} bytes at {} (len={})",
            len,
            off,
            bytes.len()
        );
    }
    let v = &bytes[*off..*off + len];
    *off += len;
    Ok(v)
}

pub fn put_u8(value: u8, buffer: &mut Vec<u8>) {
    buffer.push(value);
}

pub fn put_u16_le(value: u16, buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u32_le(value: u32, buffer: &mut Vec<u8>) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

/// Write a file atomically: stage to `<path>.tmp`, rename into place.
/// A failed or cancelled write leaves no partial artifact behind.
pub fn atomic_write(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let tmp = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    fs::write(&tmp, bytes).with_context(|| format!("unable to write {:?}", tmp))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("unable to rename {:?} -> {:?}", tmp, path));
    }
    Ok(())
}
