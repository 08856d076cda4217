use anyhow::{bail, Result};
use image::RgbaImage;

use crate::cancel::CancelToken;
use crate::format::cz::cz1::{image_to_pixels, pixels_to_image};
use crate::format::cz::{conform_size, parse_palette, write_palette, BlockTable, CzHeader, HEADER_LEN};
use crate::format::lzw;

/// CZ2: the same palette/pixel layout as CZ1, but the LZW codes are a
/// byte stream with escape prefixes and `compressed_size` counts bytes.
/// Mostly seen on font atlases.
#[derive(Debug, Clone)]
pub struct Cz2Image {
    pub header: CzHeader,
    extended: Vec<u8>,
    palette: Option<Vec<[u8; 4]>>,
    table: BlockTable,
    payload: Vec<u8>,
    image: Option<RgbaImage>,
}

impl Cz2Image {
    pub fn load(mut header: CzHeader, data: &[u8]) -> Result<Self> {
        header.colorbits = header.normalized_colorbits();
        let header_end = header.header_length as usize;
        if header_end > data.len() {
            bail!("CZ2 header length {} is out of range", header_end);
        }
        let extended = data[HEADER_LEN..header_end].to_vec();

        let mut off = header_end;
        let palette = if header.colorbits == 4 || header.colorbits == 8 {
            Some(parse_palette(data, &mut off, header.colorbits)?)
        } else {
            None
        };

        let table = BlockTable::parse(&data[off..])?;
        let payload_start = off + table.offset;
        let payload_len = table.total_compressed_size;
        if data.len() < payload_start + payload_len {
            bail!(
                "CZ2 payload truncated: {} stream bytes needed at {}",
                payload_len,
                payload_start
            );
        }
        let payload = data[payload_start..payload_start + payload_len].to_vec();
        Ok(Self {
            header,
            extended,
            palette,
            table,
            payload,
            image: None,
        })
    }

    pub fn image(&mut self, cancel: &CancelToken) -> Result<&RgbaImage> {
        if self.image.is_none() {
            let buf = lzw::decompress2(&self.payload, &self.table.blocks, cancel)?;
            log::debug!("cz2 decompressed {} bytes", buf.len());
            self.image = Some(pixels_to_image(&self.header, self.palette.as_deref(), &buf)?);
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
        let data = image_to_pixels(&self.header, self.palette.as_deref(), &img)?;
        let hint = self.table.first_block_hint();
        let (payload, blocks) = lzw::compress2(&data, hint, cancel)?;
        self.payload = payload;
        self.table = BlockTable::from_blocks(blocks);
        self.image = Some(img);
        Ok(())
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut header = self.header.clone();
        header.magic = *b"CZ2\0";
        header.write(out);
        out.extend_from_slice(&self.extended);
        if let Some(palette) = &self.palette {
            write_palette(palette, out);
        }
        self.table.write(out);
        out.extend_from_slice(&self.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::cz::CzFile;

    fn build_cz2(width: u16, height: u16, indices: &[u8]) -> Vec<u8> {
        let cancel = CancelToken::new();
        let (payload, blocks) = lzw::compress2(indices, 0, &cancel).unwrap();
        let table = BlockTable::from_blocks(blocks);
        let palette: Vec<[u8; 4]> = (0..256).map(|i| [i as u8, 0, 255 - i as u8, 0xFF]).collect();

        let mut data = Vec::new();
        CzHeader {
            magic: *b"CZ2\0",
            header_length: HEADER_LEN as u8,
            width,
            height,
            colorbits: 8,
            color_block: 0,
        }
        .write(&mut data);
        write_palette(&palette, &mut data);
        table.write(&mut data);
        data.extend_from_slice(&payload);
        data
    }

    #[test]
    fn byte_stream_roundtrip() {
        let indices: Vec<u8> = (0..400u32).map(|i| (i % 7 * 30) as u8).collect();
        let bytes = build_cz2(20, 20, &indices);
        let cancel = CancelToken::new();

        let mut cz = CzFile::parse(&bytes).unwrap();
        let img = cz.image(&cancel).unwrap().clone();
        assert_eq!(img.dimensions(), (20, 20));
        cz.import(img.clone(), false, &cancel).unwrap();
        let encoded = cz.to_bytes().unwrap();

        let mut again = CzFile::parse(&encoded).unwrap();
        assert_eq!(again.image(&cancel).unwrap(), &img);
    }
}
