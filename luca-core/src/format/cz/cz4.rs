use anyhow::{bail, Result};
use image::RgbaImage;

use crate::cancel::CancelToken;
use crate::format::cz::cz3::{CropHeader, CROP_LEN};
use crate::format::cz::{conform_size, diff, BlockTable, CzHeader, HEADER_LEN};
use crate::format::lzw;

/// CZ4: same framing as CZ3, but pixels are stored as a full RGB plane
/// followed by a full alpha plane, each delta-coded with independent
/// predictor state. Favoured for sprites with soft alpha edges.
#[derive(Debug, Clone)]
pub struct Cz4Image {
    pub header: CzHeader,
    pub crop: CropHeader,
    ext_tail: Vec<u8>,
    table: BlockTable,
    payload: Vec<u8>,
    image: Option<RgbaImage>,
}

impl Cz4Image {
    pub fn load(header: CzHeader, data: &[u8]) -> Result<Self> {
        let crop = CropHeader::parse(data)?;
        let header_end = header.header_length as usize;
        if header_end > data.len() || header_end < HEADER_LEN + CROP_LEN {
            bail!("CZ4 header length {} is out of range", header_end);
        }
        let ext_tail = data[HEADER_LEN + CROP_LEN..header_end].to_vec();

        let table = BlockTable::parse(&data[header_end..])?;
        let payload_start = header_end + table.offset;
        let payload_len = table.total_compressed_size * 2;
        if data.len() < payload_start + payload_len {
            bail!(
                "CZ4 payload truncated: {} code bytes needed at {}",
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
            log::debug!("cz4 decompressed {} bytes", buf.len());
            self.image = Some(diff::line_diff4(
                u32::from(self.header.width),
                u32::from(self.header.height),
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
        self.header.colorbits = 32;
        let data = diff::diff_line4(&img);
        let hint = self.table.first_block_hint();
        let (payload, blocks) = lzw::compress(&data, hint, cancel)?;
        self.payload = payload;
        self.table = BlockTable::from_blocks(blocks);
        self.image = Some(img);
        Ok(())
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut header = self.header.clone();
        header.magic = *b"CZ4\0";
        if header.colorbits != 32 {
            log::warn!("forcing CZ4 colorbits from {} to 32", header.colorbits);
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

    fn build_cz4(img: &RgbaImage) -> Vec<u8> {
        let cancel = CancelToken::new();
        let data = diff::diff_line4(img);
        let (payload, blocks) = lzw::compress(&data, 0, &cancel).unwrap();
        let table = BlockTable::from_blocks(blocks);

        let mut out = Vec::new();
        CzHeader {
            magic: *b"CZ4\0",
            header_length: (HEADER_LEN + CROP_LEN) as u8,
            width: img.width() as u16,
            height: img.height() as u16,
            colorbits: 32,
            color_block: 3,
        }
        .write(&mut out);
        CropHeader::default().write(&mut out);
        table.write(&mut out);
        out.extend_from_slice(&payload);
        out
    }

    #[test]
    fn planar_roundtrip_4x4() {
        let img = RgbaImage::from_fn(4, 4, |x, y| {
            image::Rgba([(x * 60) as u8, (y * 60) as u8, (x * y * 16) as u8, (128 + x * 30) as u8])
        });
        let bytes = build_cz4(&img);
        let cancel = CancelToken::new();

        let mut cz = CzFile::parse(&bytes).unwrap();
        assert_eq!(cz.image(&cancel).unwrap(), &img);
        cz.import(img, false, &cancel).unwrap();
        assert_eq!(cz.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn alpha_plane_survives_translucency() {
        let img = RgbaImage::from_fn(10, 9, |x, y| {
            image::Rgba([(x * 20) as u8, 0, (y * 25) as u8, ((x + y) * 12 % 256) as u8])
        });
        let bytes = build_cz4(&img);
        let cancel = CancelToken::new();
        let mut cz = CzFile::parse(&bytes).unwrap();
        let decoded = cz.image(&cancel).unwrap();
        assert_eq!(decoded, &img);
    }
}
