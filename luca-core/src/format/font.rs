//! Bitmap font handling: a CZ-encoded glyph atlas paired with a flat
//! per-glyph info record (codepoint and advance width).
//!
//! The info record size is data-driven: whatever stride divides the file
//! evenly against the atlas capacity is preserved on edit, including the
//! padding bytes we do not interpret.

use anyhow::{anyhow, bail, Result};
use image::RgbaImage;

use crate::cancel::CancelToken;
use crate::format::cz::CzFile;

/// Candidate record strides seen across engine revisions.
const KNOWN_STRIDES: [usize; 3] = [4, 8, 16];

#[derive(Debug, Clone)]
pub struct GlyphInfo {
    pub codepoint: u16,
    pub width: u8,
    /// Unknown trailing bytes of the record, preserved verbatim.
    pad: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FontInfo {
    stride: usize,
    pub glyphs: Vec<GlyphInfo>,
}

impl FontInfo {
    /// Parse against the companion atlas capacity. A file that divides
    /// evenly by the capacity fixes the stride exactly; otherwise the
    /// stride falls back to the known record sizes.
    pub fn parse(bytes: &[u8], capacity: usize) -> Result<Self> {
        let stride = if capacity > 0 && bytes.len() % capacity == 0 && bytes.len() / capacity >= 3 {
            bytes.len() / capacity
        } else {
            *KNOWN_STRIDES
                .iter()
                .find(|&&s| bytes.len() % s == 0)
                .ok_or_else(|| {
                    anyhow!(
                        "font info of {} bytes fits no record stride (atlas capacity {})",
                        bytes.len(),
                        capacity
                    )
                })?
        };
        let glyphs = bytes
            .chunks_exact(stride)
            .map(|rec| GlyphInfo {
                codepoint: u16::from_le_bytes([rec[0], rec[1]]),
                width: rec[2],
                pad: rec[3..].to_vec(),
            })
            .collect();
        Ok(Self { stride, glyphs })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn push(&mut self, codepoint: u16, width: u8) {
        self.glyphs.push(GlyphInfo {
            codepoint,
            width,
            pad: vec![0; self.stride - 3],
        });
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.glyphs.len() * self.stride);
        for g in &self.glyphs {
            out.extend_from_slice(&g.codepoint.to_le_bytes());
            out.push(g.width);
            out.extend_from_slice(&g.pad);
        }
        out
    }
}

/// What `edit` does with the rendered glyphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    /// Overwrite glyphs starting at this index.
    Replace(usize),
    /// Add glyphs after the last record, growing the atlas as needed.
    Append,
    /// Re-render every existing glyph, keeping its codepoint.
    Redraw,
}

pub struct FontAtlas {
    pub cz: CzFile,
    pub info: FontInfo,
    cell: u32,
}

impl FontAtlas {
    pub fn load(cz_bytes: &[u8], info_bytes: &[u8], cell: u32) -> Result<Self> {
        let cz = CzFile::parse(cz_bytes)?;
        let header = cz.header();
        if cell == 0
            || u32::from(header.width) % cell != 0
            || u32::from(header.height) % cell != 0
        {
            bail!(
                "cell size {} does not tile a {}x{} atlas",
                cell,
                header.width,
                header.height
            );
        }
        let capacity =
            (u32::from(header.width) / cell * u32::from(header.height) / cell) as usize;
        let info = FontInfo::parse(info_bytes, capacity)?;
        Ok(Self { cz, info, cell })
    }

    pub fn cell(&self) -> u32 {
        self.cell
    }

    fn columns(&self) -> u32 {
        u32::from(self.cz.header().width) / self.cell
    }

    fn cell_origin(&self, index: usize) -> (u32, u32) {
        let cols = self.columns();
        (
            (index as u32 % cols) * self.cell,
            (index as u32 / cols) * self.cell,
        )
    }

    pub fn export_png(&mut self, cancel: &CancelToken) -> Result<Vec<u8>> {
        self.cz.export_png(cancel)
    }

    /// One glyph per line, line number = glyph index; unused records
    /// (codepoint 0) produce empty lines.
    pub fn charset_text(&self) -> String {
        let mut out = String::new();
        for g in &self.info.glyphs {
            if g.codepoint != 0 {
                if let Some(c) = char::from_u32(u32::from(g.codepoint)) {
                    out.push(c);
                }
            }
            out.push('\n');
        }
        out
    }

    fn draw_glyph(&self, img: &mut RgbaImage, index: usize, font: &fontdue::Font, ch: char) -> u8 {
        let cell = self.cell;
        let (cx, cy) = self.cell_origin(index);

        // Clear the cell to transparent before drawing.
        for y in 0..cell {
            for x in 0..cell {
                img.put_pixel(cx + x, cy + y, image::Rgba([0, 0, 0, 0]));
            }
        }

        let (metrics, coverage) = font.rasterize(ch, cell as f32);
        let baseline = (cell as i32 * 4) / 5;
        let top = baseline - metrics.height as i32 - metrics.ymin;
        let left = metrics.xmin.max(0);
        for row in 0..metrics.height {
            for col in 0..metrics.width {
                let x = left + col as i32;
                let y = top + row as i32;
                if x < 0 || y < 0 || x >= cell as i32 || y >= cell as i32 {
                    continue;
                }
                let a = coverage[row * metrics.width + col];
                if a > 0 {
                    img.put_pixel(cx + x as u32, cy + y as u32, image::Rgba([255, 255, 255, a]));
                }
            }
        }
        metrics.advance_width.round().clamp(0.0, 255.0).min(cell as f32) as u8
    }

    /// Rasterise `chars` from a vector font into the atlas.
    pub fn edit(
        &mut self,
        font_data: &[u8],
        chars: &[char],
        mode: EditMode,
        cancel: &CancelToken,
    ) -> Result<()> {
        let font = fontdue::Font::from_bytes(font_data.to_vec(), fontdue::FontSettings::default())
            .map_err(|e| anyhow!("unable to load font: {}", e))?;
        let mut img = self.cz.image(cancel)?.clone();

        match mode {
            EditMode::Redraw => {
                for i in 0..self.info.glyphs.len() {
                    cancel.check()?;
                    let cp = self.info.glyphs[i].codepoint;
                    if cp == 0 {
                        continue;
                    }
                    let Some(ch) = char::from_u32(u32::from(cp)) else {
                        continue;
                    };
                    let width = self.draw_glyph(&mut img, i, &font, ch);
                    self.info.glyphs[i].width = width;
                }
            }
            EditMode::Replace(start) => {
                if start + chars.len() > self.info.glyphs.len() {
                    bail!(
                        "replace range {}..{} exceeds {} glyphs",
                        start,
                        start + chars.len(),
                        self.info.glyphs.len()
                    );
                }
                for (i, &ch) in chars.iter().enumerate() {
                    cancel.check()?;
                    let width = self.draw_glyph(&mut img, start + i, &font, ch);
                    let glyph = &mut self.info.glyphs[start + i];
                    glyph.codepoint = ch as u16;
                    glyph.width = width;
                }
            }
            EditMode::Append => {
                let start = self.info.glyphs.len();
                let needed = start + chars.len();
                let cols = self.columns() as usize;
                let rows_needed = needed.div_ceil(cols) as u32;
                let new_height = rows_needed * self.cell;
                if new_height > img.height() {
                    let mut grown = RgbaImage::new(img.width(), new_height);
                    image::imageops::overlay(&mut grown, &img, 0, 0);
                    img = grown;
                    self.cz.set_size(img.width() as u16, img.height() as u16);
                }
                for (i, &ch) in chars.iter().enumerate() {
                    cancel.check()?;
                    let width = self.draw_glyph(&mut img, start + i, &font, ch);
                    self.info.push(ch as u16, width);
                }
            }
        }

        self.cz.import(img, false, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::cz::{CzHeader, HEADER_LEN};

    fn atlas_cz0(width: u16, height: u16) -> Vec<u8> {
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
        data.extend(std::iter::repeat(0u8).take(width as usize * height as usize * 4));
        data
    }

    #[test]
    fn info_stride_from_capacity() {
        // 16-cell atlas, 64-byte info: stride 4.
        let mut info_bytes = Vec::new();
        for i in 0..16u16 {
            info_bytes.extend_from_slice(&(0x3041 + i).to_le_bytes());
            info_bytes.push(20);
            info_bytes.push(0xEE);
        }
        let info = FontInfo::parse(&info_bytes, 16).unwrap();
        assert_eq!(info.stride(), 4);
        assert_eq!(info.glyphs.len(), 16);
        assert_eq!(info.glyphs[1].codepoint, 0x3042);
        assert_eq!(info.to_bytes(), info_bytes, "pad bytes must survive");
    }

    #[test]
    fn info_partial_table_falls_back_to_known_stride() {
        // 10 records of 8 bytes in a 16-cell atlas: not an even divide.
        let info_bytes = vec![0u8; 80];
        let info = FontInfo::parse(&info_bytes, 16).unwrap();
        assert_eq!(info.stride(), 4);
        assert_eq!(info.glyphs.len(), 20);
    }

    #[test]
    fn atlas_geometry() {
        let cz = atlas_cz0(32, 16);
        let info_bytes = vec![0u8; 8 * 4];
        let atlas = FontAtlas::load(&cz, &info_bytes, 8).unwrap();
        assert_eq!(atlas.columns(), 4);
        assert_eq!(atlas.cell_origin(0), (0, 0));
        assert_eq!(atlas.cell_origin(3), (24, 0));
        assert_eq!(atlas.cell_origin(5), (8, 8));
    }

    #[test]
    fn cell_must_tile_the_atlas() {
        let cz = atlas_cz0(30, 16);
        assert!(FontAtlas::load(&cz, &[0u8; 16], 8).is_err());
    }

    #[test]
    fn charset_lines_align_with_indices() {
        let cz = atlas_cz0(16, 16);
        let mut info_bytes = Vec::new();
        for cp in [0x41u16, 0, 0x3042, 0x42] {
            info_bytes.extend_from_slice(&cp.to_le_bytes());
            info_bytes.extend_from_slice(&[10, 0]);
        }
        let atlas = FontAtlas::load(&cz, &info_bytes, 8).unwrap();
        assert_eq!(atlas.charset_text(), "A\n\nあ\nB\n");
    }
}
