use anyhow::{bail, Result};
use image::RgbaImage;

use crate::cancel::CancelToken;
use crate::format::cz::{conform_size, CzHeader, HEADER_LEN};

/// CZ0: header plus un-encoded pixels. Used for small UI assets where
/// compression is not worth the engine's time.
#[derive(Debug, Clone)]
pub struct Cz0Image {
    pub header: CzHeader,
    extended: Vec<u8>,
    pixels: Vec<u8>,
    image: Option<RgbaImage>,
}

impl Cz0Image {
    pub fn load(header: CzHeader, data: &[u8]) -> Result<Self> {
        let bpp = match header.colorbits {
            24 => 3usize,
            32 => 4,
            bits => bail!("CZ0 with colorbits {} is not supported", bits),
        };
        let start = header.header_length as usize;
        if start > data.len() || start < HEADER_LEN {
            bail!("CZ0 header length {} is out of range", start);
        }
        let extended = data[HEADER_LEN..start].to_vec();
        let expected = header.width as usize * header.height as usize * bpp;
        if data.len() < start + expected {
            bail!(
                "CZ0 payload truncated at {}: {} pixel bytes needed",
                data.len(),
                expected
            );
        }
        let pixels = data[start..start + expected].to_vec();
        Ok(Self {
            header,
            extended,
            pixels,
            image: None,
        })
    }

    fn decode(&self) -> RgbaImage {
        let (w, h) = (u32::from(self.header.width), u32::from(self.header.height));
        let mut img = RgbaImage::new(w, h);
        let pix: &mut [u8] = &mut img;
        if self.header.colorbits == 32 {
            pix.copy_from_slice(&self.pixels);
        } else {
            for (dst, src) in pix.chunks_exact_mut(4).zip(self.pixels.chunks_exact(3)) {
                dst[0] = src[0];
                dst[1] = src[1];
                dst[2] = src[2];
                dst[3] = 0xFF;
            }
        }
        img
    }

    pub fn image(&mut self, _cancel: &CancelToken) -> Result<&RgbaImage> {
        if self.image.is_none() {
            self.image = Some(self.decode());
        }
        Ok(self.image.as_ref().unwrap())
    }

    pub fn import(&mut self, img: RgbaImage, fill: bool, _cancel: &CancelToken) -> Result<()> {
        let img = conform_size(
            img,
            u32::from(self.header.width),
            u32::from(self.header.height),
            fill,
        )?;
        self.pixels = if self.header.colorbits == 32 {
            img.as_raw().clone()
        } else {
            img.as_raw()
                .chunks_exact(4)
                .flat_map(|p| [p[0], p[1], p[2]])
                .collect()
        };
        self.image = Some(img);
        Ok(())
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut header = self.header.clone();
        header.magic = *b"CZ0\0";
        header.write(out);
        out.extend_from_slice(&self.extended);
        out.extend_from_slice(&self.pixels);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::cz::CzFile;

    fn raw_cz0(width: u16, height: u16) -> Vec<u8> {
        let mut data = Vec::new();
        CzHeader {
            magic: *b"CZ0\0",
            header_length: HEADER_LEN as u8,
            width,
            height,
            colorbits: 32,
            color_block: 0,
        }
        .write(&mut data);
        for i in 0..u32::from(width) * u32::from(height) {
            data.extend_from_slice(&[(i % 256) as u8, 7, (i / 3) as u8, 0xFF]);
        }
        data
    }

    #[test]
    fn raw_passthrough_roundtrip() {
        let bytes = raw_cz0(6, 5);
        let mut cz = CzFile::parse(&bytes).unwrap();
        let cancel = CancelToken::new();
        let img = cz.image(&cancel).unwrap().clone();
        assert_eq!(img.dimensions(), (6, 5));
        cz.import(img, false, &cancel).unwrap();
        assert_eq!(cz.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut bytes = raw_cz0(6, 5);
        bytes.truncate(bytes.len() - 1);
        assert!(CzFile::parse(&bytes).is_err());
    }
}
