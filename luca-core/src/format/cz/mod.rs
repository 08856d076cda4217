//! The CZ image family.
//!
//! All five variants share a 15-byte header; the magic selects the
//! payload coding. CZ0 is raw pixels, CZ1 palette+LZW, CZ2 byte-stream
//! LZW, CZ3 delta-per-line over interleaved RGBA, CZ4 delta-per-line
//! over planar RGB+A.

mod cz0;
mod cz1;
mod cz2;
mod cz3;
mod cz4;
pub mod diff;

use std::io::Cursor;

use anyhow::{bail, Context, Result};
use image::{imageops, RgbaImage};

use crate::cancel::CancelToken;
use crate::format::io;
use crate::format::lzw::BlockInfo;

pub use cz0::Cz0Image;
pub use cz1::Cz1Image;
pub use cz2::Cz2Image;
pub use cz3::{CropHeader, Cz3Image};
pub use cz4::Cz4Image;

pub const HEADER_LEN: usize = 15;

/// The fixed 15-byte header every CZ variant starts with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CzHeader {
    pub magic: [u8; 4],
    pub header_length: u8,
    pub width: u16,
    pub height: u16,
    pub colorbits: u16,
    /// Legacy hint for the delta predictor; kept for byte fidelity but
    /// never trusted (the predictor derives its stride from the height).
    pub color_block: u32,
}

impl CzHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut off = 0;
        let magic_bytes = io::read_bytes(data, &mut off, 4)?;
        let magic = [magic_bytes[0], magic_bytes[1], magic_bytes[2], magic_bytes[3]];
        if &magic[..2] != b"CZ" || !(b'0'..=b'4').contains(&magic[2]) || magic[3] != 0 {
            bail!("not a CZ image (magic {:02X?})", magic);
        }
        let header_length = io::read_u8(data, &mut off)?;
        let width = io::read_u16_le(data, &mut off)?;
        let height = io::read_u16_le(data, &mut off)?;
        let colorbits = io::read_u16_le(data, &mut off)?;
        let color_block = io::read_u32_le(data, &mut off)?;
        if (header_length as usize) < HEADER_LEN {
            bail!("CZ header length {} is shorter than the base header", header_length);
        }
        Ok(Self {
            magic,
            header_length,
            width,
            height,
            colorbits,
            color_block,
        })
    }

    pub fn version(&self) -> u8 {
        self.magic[2] - b'0'
    }

    /// Colorbits above 32 (0xF8 in the wild) are a proprietary marker for
    /// 8-bit indexed mode and normalise to 8.
    pub fn normalized_colorbits(&self) -> u16 {
        if self.colorbits > 32 {
            log::debug!(
                "colorbits {} > 32, normalizing to 8 (indexed palette)",
                self.colorbits
            );
            8
        } else {
            self.colorbits
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic);
        io::put_u8(self.header_length, out);
        io::put_u16_le(self.width, out);
        io::put_u16_le(self.height, out);
        io::put_u16_le(self.colorbits, out);
        io::put_u32_le(self.color_block, out);
    }
}

/// Block table preceding an LZW payload: a count followed by
/// `{compressed_size, raw_size}` pairs.
#[derive(Debug, Clone, Default)]
pub struct BlockTable {
    pub blocks: Vec<BlockInfo>,
    pub total_raw_size: usize,
    pub total_compressed_size: usize,
    /// Byte offset of the compressed payload within the post-header region.
    pub offset: usize,
}

impl BlockTable {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut off = 0;
        let count = io::read_u32_le(data, &mut off)? as usize;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let compressed_size = io::read_u32_le(data, &mut off)?;
            let raw_size = io::read_u32_le(data, &mut off)?;
            blocks.push(BlockInfo {
                compressed_size,
                raw_size,
            });
        }
        Ok(Self::from_blocks(blocks))
    }

    pub fn from_blocks(blocks: Vec<BlockInfo>) -> Self {
        let total_raw_size = blocks.iter().map(|b| b.raw_size as usize).sum();
        let total_compressed_size = blocks.iter().map(|b| b.compressed_size as usize).sum();
        let offset = 4 + 8 * blocks.len();
        Self {
            blocks,
            total_raw_size,
            total_compressed_size,
            offset,
        }
    }

    /// Code budget hint for re-encoding: the first block's compressed size.
    pub fn first_block_hint(&self) -> usize {
        self.blocks
            .first()
            .map(|b| b.compressed_size as usize)
            .unwrap_or(0)
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        io::put_u32_le(self.blocks.len() as u32, out);
        for block in &self.blocks {
            io::put_u32_le(block.compressed_size, out);
            io::put_u32_le(block.raw_size, out);
        }
    }
}

/// Palette stored on disk as B,G,R,A; held in memory as R,G,B,A.
pub fn parse_palette(data: &[u8], off: &mut usize, colorbits: u16) -> Result<Vec<[u8; 4]>> {
    let count = 1usize << colorbits;
    let mut palette = Vec::with_capacity(count);
    for _ in 0..count {
        let e = io::read_bytes(data, off, 4)?;
        palette.push([e[2], e[1], e[0], e[3]]);
    }
    Ok(palette)
}

pub fn write_palette(palette: &[[u8; 4]], out: &mut Vec<u8>) {
    for c in palette {
        out.extend_from_slice(&[c[2], c[1], c[0], c[3]]);
    }
}

/// Nearest palette entry by squared L2 distance over R,G,B,A.
pub fn closest_palette_entry(palette: &[[u8; 4]], c: [u8; 4]) -> u8 {
    let mut best_idx = 0u8;
    let mut best_dist = i64::MAX;
    for (i, pc) in palette.iter().enumerate() {
        let dr = i64::from(c[0]) - i64::from(pc[0]);
        let dg = i64::from(c[1]) - i64::from(pc[1]);
        let db = i64::from(c[2]) - i64::from(pc[2]);
        let da = i64::from(c[3]) - i64::from(pc[3]);
        let dist = dr * dr + dg * dg + db * db + da * da;
        if dist == 0 {
            return i as u8;
        }
        if dist < best_dist {
            best_dist = dist;
            best_idx = i as u8;
        }
    }
    best_idx
}

/// Paste `src` onto a `width`×`height` transparent canvas at the origin.
pub fn fill_image(src: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let mut dst = RgbaImage::new(width, height);
    imageops::overlay(&mut dst, src, 0, 0);
    dst
}

/// Decode a PNG buffer and force it to RGBA, whatever the encoder
/// optimised it to.
pub fn png_to_rgba(data: &[u8]) -> Result<RgbaImage> {
    let img = image::load_from_memory(data).context("unable to decode PNG")?;
    Ok(img.to_rgba8())
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .context("unable to encode PNG")?;
    Ok(buf.into_inner())
}

/// Check an imported image against the source CZ dimensions, applying
/// `--fill` when requested.
pub fn conform_size(img: RgbaImage, width: u32, height: u32, fill: bool) -> Result<RgbaImage> {
    let img = if fill && (img.width() < width || img.height() < height) {
        fill_image(&img, width, height)
    } else {
        img
    };
    if img.width() != width || img.height() != height {
        bail!(
            "image size mismatch: got {}x{}, source CZ is {}x{}",
            img.width(),
            img.height(),
            width,
            height
        );
    }
    Ok(img)
}

/// A parsed CZ file, dispatched on the header magic.
#[derive(Debug, Clone)]
pub enum CzFile {
    Cz0(Cz0Image),
    Cz1(Cz1Image),
    Cz2(Cz2Image),
    Cz3(Cz3Image),
    Cz4(Cz4Image),
}

impl CzFile {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = CzHeader::parse(data)?;
        let file = match header.version() {
            0 => CzFile::Cz0(Cz0Image::load(header, data)?),
            1 => CzFile::Cz1(Cz1Image::load(header, data)?),
            2 => CzFile::Cz2(Cz2Image::load(header, data)?),
            3 => CzFile::Cz3(Cz3Image::load(header, data)?),
            4 => CzFile::Cz4(Cz4Image::load(header, data)?),
            v => bail!("unsupported CZ version {}", v),
        };
        Ok(file)
    }

    pub fn header(&self) -> &CzHeader {
        match self {
            CzFile::Cz0(cz) => &cz.header,
            CzFile::Cz1(cz) => &cz.header,
            CzFile::Cz2(cz) => &cz.header,
            CzFile::Cz3(cz) => &cz.header,
            CzFile::Cz4(cz) => &cz.header,
        }
    }

    /// Decode (and cache) the pixel data.
    pub fn image(&mut self, cancel: &CancelToken) -> Result<&RgbaImage> {
        match self {
            CzFile::Cz0(cz) => cz.image(cancel),
            CzFile::Cz1(cz) => cz.image(cancel),
            CzFile::Cz2(cz) => cz.image(cancel),
            CzFile::Cz3(cz) => cz.image(cancel),
            CzFile::Cz4(cz) => cz.image(cancel),
        }
    }

    /// Replace the pixel data, re-encoding with the source block layout
    /// as the compression hint.
    pub fn import(&mut self, img: RgbaImage, fill: bool, cancel: &CancelToken) -> Result<()> {
        match self {
            CzFile::Cz0(cz) => cz.import(img, fill, cancel),
            CzFile::Cz1(cz) => cz.import(img, fill, cancel),
            CzFile::Cz2(cz) => cz.import(img, fill, cancel),
            CzFile::Cz3(cz) => cz.import(img, fill, cancel),
            CzFile::Cz4(cz) => cz.import(img, fill, cancel),
        }
    }

    /// Serialise back to the on-disk layout.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            CzFile::Cz0(cz) => cz.write(out),
            CzFile::Cz1(cz) => cz.write(out),
            CzFile::Cz2(cz) => cz.write(out),
            CzFile::Cz3(cz) => cz.write(out),
            CzFile::Cz4(cz) => cz.write(out),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }

    /// Export the decoded image as PNG bytes.
    pub fn export_png(&mut self, cancel: &CancelToken) -> Result<Vec<u8>> {
        let img = self.image(cancel)?.clone();
        encode_png(&img)
    }

    /// Grow the declared dimensions (font append extends the atlas).
    /// The next `import` must supply an image of exactly this size.
    pub fn set_size(&mut self, width: u16, height: u16) {
        let header = match self {
            CzFile::Cz0(cz) => &mut cz.header,
            CzFile::Cz1(cz) => &mut cz.header,
            CzFile::Cz2(cz) => &mut cz.header,
            CzFile::Cz3(cz) => &mut cz.header,
            CzFile::Cz4(cz) => &mut cz.header,
        };
        header.width = width;
        header.height = height;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_rejects_bad_magic() {
        let mut data = vec![0u8; 15];
        data[..4].copy_from_slice(b"CZ9\0");
        assert!(CzHeader::parse(&data).is_err());
        data[..4].copy_from_slice(b"PNG\0");
        assert!(CzHeader::parse(&data).is_err());
    }

    #[test]
    fn header_roundtrip() {
        let header = CzHeader {
            magic: *b"CZ3\0",
            header_length: 28,
            width: 640,
            height: 480,
            colorbits: 32,
            color_block: 3,
        };
        let mut buf = Vec::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(CzHeader::parse(&buf).unwrap(), header);
    }

    #[test]
    fn colorbits_marker_normalizes_to_indexed() {
        let header = CzHeader {
            magic: *b"CZ1\0",
            header_length: 15,
            width: 16,
            height: 16,
            colorbits: 0xF8,
            color_block: 0,
        };
        assert_eq!(header.normalized_colorbits(), 8);
    }

    #[test]
    fn block_table_derives_offset() {
        let mut buf = Vec::new();
        io::put_u32_le(2, &mut buf);
        for pair in [(10u32, 100u32), (20, 200)] {
            io::put_u32_le(pair.0, &mut buf);
            io::put_u32_le(pair.1, &mut buf);
        }
        let table = BlockTable::parse(&buf).unwrap();
        assert_eq!(table.offset, 4 + 8 * 2);
        assert_eq!(table.total_raw_size, 300);
        assert_eq!(table.total_compressed_size, 30);
        let mut out = Vec::new();
        table.write(&mut out);
        assert_eq!(out, buf);
    }

    #[test]
    fn closest_entry_short_circuits_on_exact_match() {
        let palette = vec![[0, 0, 0, 255], [255, 0, 0, 255], [254, 1, 0, 255]];
        assert_eq!(closest_palette_entry(&palette, [255, 0, 0, 255]), 1);
        assert_eq!(closest_palette_entry(&palette, [250, 0, 0, 255]), 2);
    }
}
