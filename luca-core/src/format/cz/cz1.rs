use anyhow::{bail, Result};
use image::RgbaImage;

use crate::cancel::CancelToken;
use crate::format::cz::{
    closest_palette_entry, conform_size, parse_palette, write_palette, BlockTable, CzHeader,
    HEADER_LEN,
};
use crate::format::lzw;

/// CZ1: optionally palettised pixels behind 16-bit-code LZW.
///
/// 4- and 8-bit files carry a BGRA palette between the header and the
/// block table; 24- and 32-bit files store RGB/RGBA directly. Anything
/// between the base header and the palette is opaque and preserved
/// verbatim on write.
#[derive(Debug, Clone)]
pub struct Cz1Image {
    pub header: CzHeader,
    extended: Vec<u8>,
    palette: Option<Vec<[u8; 4]>>,
    table: BlockTable,
    payload: Vec<u8>,
    image: Option<RgbaImage>,
}

/// Expand a decompressed pixel buffer into RGBA according to the header
/// depth. Shared by CZ1 and CZ2, which differ only in the LZW dialect.
pub(super) fn pixels_to_image(
    header: &CzHeader,
    palette: Option<&[[u8; 4]]>,
    buf: &[u8],
) -> Result<RgbaImage> {
    let (w, h) = (u32::from(header.width), u32::from(header.height));
    let count = (w * h) as usize;
    let mut img = RgbaImage::new(w, h);
    let pix: &mut [u8] = &mut img;
    match header.colorbits {
        4 => {
            let palette = palette.ok_or_else(|| anyhow::anyhow!("4-bit image without palette"))?;
            if buf.len() < count.div_ceil(2) {
                bail!("indexed payload is {} bytes, need {}", buf.len(), count.div_ceil(2));
            }
            for i in 0..count {
                // Low nibble is the even pixel, high nibble the odd one.
                let index = if i % 2 == 0 {
                    buf[i / 2] & 0x0F
                } else {
                    (buf[i / 2] & 0xF0) >> 4
                };
                pix[i * 4..i * 4 + 4].copy_from_slice(&palette[index as usize]);
            }
        }
        8 => {
            let palette = palette.ok_or_else(|| anyhow::anyhow!("8-bit image without palette"))?;
            if buf.len() < count {
                bail!("indexed payload is {} bytes, need {}", buf.len(), count);
            }
            for i in 0..count {
                pix[i * 4..i * 4 + 4].copy_from_slice(&palette[buf[i] as usize]);
            }
        }
        24 => {
            if buf.len() < count * 3 {
                bail!("RGB payload is {} bytes, need {}", buf.len(), count * 3);
            }
            for i in 0..count {
                pix[i * 4] = buf[i * 3];
                pix[i * 4 + 1] = buf[i * 3 + 1];
                pix[i * 4 + 2] = buf[i * 3 + 2];
                pix[i * 4 + 3] = 0xFF;
            }
        }
        32 => {
            if buf.len() < count * 4 {
                bail!("RGBA payload is {} bytes, need {}", buf.len(), count * 4);
            }
            pix.copy_from_slice(&buf[..count * 4]);
        }
        bits => bail!("unsupported colorbits {}", bits),
    }
    Ok(img)
}

/// Inverse of [`pixels_to_image`]: flatten RGBA into the on-disk pixel
/// representation, quantising through the palette for indexed depths.
pub(super) fn image_to_pixels(
    header: &CzHeader,
    palette: Option<&[[u8; 4]]>,
    img: &RgbaImage,
) -> Result<Vec<u8>> {
    let count = (img.width() * img.height()) as usize;
    let raw = img.as_raw();
    let data = match header.colorbits {
        4 => {
            let palette = palette.ok_or_else(|| anyhow::anyhow!("4-bit image without palette"))?;
            let mut data = vec![0u8; count.div_ceil(2)];
            for i in 0..count {
                let c = [raw[i * 4], raw[i * 4 + 1], raw[i * 4 + 2], raw[i * 4 + 3]];
                let idx = closest_palette_entry(palette, c);
                if i % 2 == 0 {
                    data[i / 2] = idx & 0x0F;
                } else {
                    data[i / 2] |= (idx & 0x0F) << 4;
                }
            }
            data
        }
        8 => {
            let palette = palette.ok_or_else(|| anyhow::anyhow!("8-bit image without palette"))?;
            (0..count)
                .map(|i| {
                    let c = [raw[i * 4], raw[i * 4 + 1], raw[i * 4 + 2], raw[i * 4 + 3]];
                    closest_palette_entry(palette, c)
                })
                .collect()
        }
        24 => raw.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2]]).collect(),
        32 => raw.clone(),
        bits => bail!("unsupported colorbits {}", bits),
    };
    Ok(data)
}

impl Cz1Image {
    pub fn load(mut header: CzHeader, data: &[u8]) -> Result<Self> {
        header.colorbits = header.normalized_colorbits();
        let header_end = header.header_length as usize;
        if header_end > data.len() {
            bail!("CZ1 header length {} is out of range", header_end);
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
        let payload_len = table.total_compressed_size * 2;
        if data.len() < payload_start + payload_len {
            bail!(
                "CZ1 payload truncated: {} code bytes needed at {}",
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
            let buf = lzw::decompress(&self.payload, &self.table.blocks, cancel)?;
            log::debug!("cz1 decompressed {} bytes", buf.len());
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
        let (payload, blocks) = lzw::compress(&data, hint, cancel)?;
        self.payload = payload;
        self.table = BlockTable::from_blocks(blocks);
        self.image = Some(img);
        Ok(())
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut header = self.header.clone();
        header.magic = *b"CZ1\0";
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

    fn grayscale_palette() -> Vec<[u8; 4]> {
        (0..256).map(|i| [i as u8, i as u8, i as u8, 0xFF]).collect()
    }

    /// Assemble an 8-bit indexed CZ1 from raw parts, using the 0xF8
    /// proprietary colorbits marker.
    fn build_indexed_cz1(width: u16, height: u16, indices: &[u8]) -> Vec<u8> {
        let cancel = CancelToken::new();
        let (payload, blocks) = lzw::compress(indices, 0, &cancel).unwrap();
        let table = BlockTable::from_blocks(blocks);

        let mut data = Vec::new();
        CzHeader {
            magic: *b"CZ1\0",
            header_length: HEADER_LEN as u8,
            width,
            height,
            colorbits: 0xF8,
            color_block: 0,
        }
        .write(&mut data);
        write_palette(&grayscale_palette(), &mut data);
        table.write(&mut data);
        data.extend_from_slice(&payload);
        data
    }

    #[test]
    fn indexed_marker_decodes_through_palette() {
        let indices: Vec<u8> = (0..256u32).map(|i| (i % 256) as u8).collect();
        let bytes = build_indexed_cz1(16, 16, &indices);
        let mut cz = CzFile::parse(&bytes).unwrap();
        assert_eq!(cz.header().colorbits, 8, "0xF8 must normalise to 8");
        let cancel = CancelToken::new();
        let img = cz.image(&cancel).unwrap();
        for (i, p) in img.pixels().enumerate() {
            assert_eq!(p.0, [indices[i], indices[i], indices[i], 0xFF]);
        }
    }

    #[test]
    fn encode_decode_encode_is_byte_identical() {
        let indices: Vec<u8> = (0..1024u32).map(|i| (i * 13 % 256) as u8).collect();
        let bytes = build_indexed_cz1(32, 32, &indices);
        let cancel = CancelToken::new();

        let mut first = CzFile::parse(&bytes).unwrap();
        let img = first.image(&cancel).unwrap().clone();
        first.import(img.clone(), false, &cancel).unwrap();
        let encoded = first.to_bytes().unwrap();

        let mut second = CzFile::parse(&encoded).unwrap();
        let img2 = second.image(&cancel).unwrap().clone();
        assert_eq!(img2, img);
        second.import(img2, false, &cancel).unwrap();
        assert_eq!(second.to_bytes().unwrap(), encoded);
    }

    #[test]
    fn four_bit_nibble_packing() {
        let palette: Vec<[u8; 4]> = (0..16).map(|i| [i * 16, 0, 0, 0xFF]).collect();
        let header = CzHeader {
            magic: *b"CZ1\0",
            header_length: HEADER_LEN as u8,
            width: 4,
            height: 1,
            colorbits: 4,
            color_block: 0,
        };
        // Pixels 1,2,3,4 -> bytes 0x21, 0x43.
        let img = pixels_to_image(&header, Some(&palette), &[0x21, 0x43]).unwrap();
        assert_eq!(img.get_pixel(0, 0).0[0], 16);
        assert_eq!(img.get_pixel(1, 0).0[0], 32);
        assert_eq!(img.get_pixel(2, 0).0[0], 48);
        assert_eq!(img.get_pixel(3, 0).0[0], 64);
        let packed = image_to_pixels(&header, Some(&palette), &img).unwrap();
        assert_eq!(packed, vec![0x21, 0x43]);
    }

    #[test]
    fn size_mismatch_without_fill_is_an_error() {
        let indices = vec![0u8; 64];
        let bytes = build_indexed_cz1(8, 8, &indices);
        let mut cz = CzFile::parse(&bytes).unwrap();
        let cancel = CancelToken::new();
        let small = RgbaImage::new(4, 4);
        assert!(cz.import(small.clone(), false, &cancel).is_err());
        assert!(cz.import(small, true, &cancel).is_ok());
    }
}
