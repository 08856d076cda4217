use anyhow::{bail, Result};
use image::RgbaImage;

use crate::cancel::CancelToken;
use crate::format::cz::{conform_size, diff, BlockTable, CzHeader, HEADER_LEN};
use crate::format::{io, lzw};

/// Extended header shared by CZ3 and CZ4: a crop/anchor rectangle the
/// engine uses for sprite placement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CropHeader {
    pub flag: u8,
    pub x: u16,
    pub y: u16,
    pub width1: u16,
    pub height1: u16,
    pub width2: u16,
    pub height2: u16,
}

pub(super) const CROP_LEN: usize = 13;

impl CropHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut off = HEADER_LEN;
        Ok(Self {
            flag: io::read_u8(data, &mut off)?,
            x: io::read_u16_le(data, &mut off)?,
            y: io::read_u16_le(data, &mut off)?,
            width1: io::read_u16_le(data, &mut off)?,
            height1: io::read_u16_le(data, &mut off)?,
            width2: io::read_u16_le(data, &mut off)?,
            height2: io::read_u16_le(data, &mut off)?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        io::put_u8(self.flag, out);
        io::put_u16_le(self.x, out);
        io::put_u16_le(self.y, out);
        io::put_u16_le(self.width1, out);
        io::put_u16_le(self.height1, out);
        io::put_u16_le(self.width2, out);
        io::put_u16_le(self.height2, out);
    }
}

/// CZ3: interleaved RGBA (or RGB) rows, delta-coded per line, then LZW.
/// The workhorse format for backgrounds and event CGs.
#[derive(Debug, Clone)]
pub struct Cz3Image {
    pub header: CzHeader,
    pub crop: CropHeader,
    ext_tail: Vec<u8>,
    table: BlockTable,
    payload: Vec<u8>,
    image: Option<RgbaImage>,
}

impl Cz3Image {
    pub fn load(header: CzHeader, data: &[u8]) -> Result<Self> {
        let crop = CropHeader::parse(data)?;
        let header_end = header.header_length as usize;
        if header_end > data.len() || header_end < HEADER_LEN + CROP_LEN {
            bail!("CZ3 header length {} is out of range", header_end);
        }
        let ext_tail = data[HEADER_LEN + CROP_LEN..header_end].to_vec();

        let table = BlockTable::parse(&data[header_end..])?;
        let payload_start = header_end + table.offset;
        let payload_len = table.total_compressed_size * 2;
        if data.len() < payload_start + payload_len {
            bail!(
                "CZ3 payload truncated: {} code bytes needed at {}",
                payload_len,
                payload_start
            );
        }
        let payload = data[payload_start..payload_start + payload_len].to_vec();
        Ok(Self {
            header,
            crop,
            ext_tail,
            table,
            payload,
            image: None,
        })
    }

    pub fn image(&mut self, cancel: &CancelToken) -> Result<&RgbaImage> {
        if self.image.is_none() {
            let buf = lzw::decompress(&self.payload, &self.table.blocks, cancel)?;
            log::debug!("cz3 decompressed {} bytes", buf.len());
            self.image = Some(diff::line_diff(
                u32::from(self.header.width),
                u32::from(self.header.height),
                self.header.colorbits,
                &buf,
            )?);
        }
        Ok(self.image.as_ref().unwrap())
    }

    pub fn import(&mut self, img: RgbaImage, fill: bool, cancel: &CancelToken) -> Result<()> {
        let img = conform_size(
            img,
            u32::from(self.header.width),
            u32::from(self.header.height),
            fill,
        )?;
        // The engine always expects RGBA back, whatever the source depth.
        self.header.colorbits = 32;
        let data = diff::diff_line(32, &img)?;
        let hint = self.table.first_block_hint();
        let (payload, blocks) = lzw::compress(&data, hint, cancel)?;
        self.payload = payload;
        self.table = BlockTable::from_blocks(blocks);
        self.image = Some(img);
        Ok(())
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut header = self.header.clone();
        header.magic = *b"CZ3\0";
        if header.colorbits != 32 {
            log::warn!("forcing CZ3 colorbits from {} to 32", header.colorbits);
            header.colorbits = 32;
        }
        header.write(out);
        self.crop.write(out);
        out.extend_from_slice(&self.ext_tail);
        self.table.write(out);
        out.extend_from_slice(&self.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::cz::CzFile;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([
                (x * 3 + y) as u8,
                (y * 5) as u8,
                ((x + y) * 2) as u8,
                255 - (y % 17) as u8,
            ])
        })
    }

    fn build_cz3(img: &RgbaImage) -> Vec<u8> {
        let cancel = CancelToken::new();
        let data = diff::diff_line(32, img).unwrap();
        let (payload, blocks) = lzw::compress(&data, 0, &cancel).unwrap();
        let table = BlockTable::from_blocks(blocks);

        let mut out = Vec::new();
        CzHeader {
            magic: *b"CZ3\0",
            header_length: (HEADER_LEN + CROP_LEN) as u8,
            width: img.width() as u16,
            height: img.height() as u16,
            colorbits: 32,
            color_block: 3,
        }
        .write(&mut out);
        CropHeader {
            flag: 1,
            width1: img.width() as u16,
            height1: img.height() as u16,
            width2: img.width() as u16,
            height2: img.height() as u16,
            ..Default::default()
        }
        .write(&mut out);
        table.write(&mut out);
        out.extend_from_slice(&payload);
        out
    }

    #[test]
    fn decode_encode_roundtrip() {
        let img = gradient(24, 18);
        let bytes = build_cz3(&img);
        let cancel = CancelToken::new();

        let mut cz = CzFile::parse(&bytes).unwrap();
        assert_eq!(cz.image(&cancel).unwrap(), &img);
        cz.import(img.clone(), false, &cancel).unwrap();
        assert_eq!(cz.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn import_reuses_first_block_size() {
        let img = gradient(40, 30);
        let cancel = CancelToken::new();
        let data = diff::diff_line(32, &img).unwrap();
        let (payload, blocks) = lzw::compress(&data, 64, &cancel).unwrap();
        let table = BlockTable::from_blocks(blocks);

        let mut bytes = Vec::new();
        CzHeader {
            magic: *b"CZ3\0",
            header_length: (HEADER_LEN + CROP_LEN) as u8,
            width: 40,
            height: 30,
            colorbits: 32,
            color_block: 3,
        }
        .write(&mut bytes);
        CropHeader::default().write(&mut bytes);
        table.write(&mut bytes);
        bytes.extend_from_slice(&payload);

        let mut cz = CzFile::parse(&bytes).unwrap();
        let decoded = cz.image(&cancel).unwrap().clone();
        cz.import(decoded, false, &cancel).unwrap();
        let rewritten = cz.to_bytes().unwrap();
        assert_eq!(rewritten, bytes, "same hint must reproduce the block layout");
    }
}
