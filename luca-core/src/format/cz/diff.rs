//! Per-line additive predictor used by CZ3 (interleaved) and CZ4 (planar).
//!
//! Every `block_height` rows the predictor reseeds: those rows are stored
//! verbatim, the rows in between as wrapping deltas against the previous
//! row. `curr` and `prev` are owned scratch buffers: sharing either with
//! the pixel buffer would corrupt rows mid-loop, because `prev` is
//! rebuilt in place while `curr` is being rewritten.

use anyhow::{bail, Result};
use image::RgbaImage;

/// Reset stride of the predictor.
#[inline]
pub fn block_height(height: u32) -> u32 {
    (height + 2) / 3
}

/// Delta-decode `data` rows of `line_len` bytes in place of a fresh buffer.
fn undiff_rows(data: &[u8], line_len: usize, height: usize) -> Vec<u8> {
    let bh = block_height(height as u32) as usize;
    let mut out = vec![0u8; data.len()];
    let mut prev = vec![0u8; line_len];
    let mut curr = vec![0u8; line_len];
    for y in 0..height {
        let i = y * line_len;
        curr.copy_from_slice(&data[i..i + line_len]);
        if y % bh != 0 {
            for x in 0..line_len {
                curr[x] = curr[x].wrapping_add(prev[x]);
            }
        }
        prev.copy_from_slice(&curr);
        out[i..i + line_len].copy_from_slice(&curr);
    }
    out
}

/// Delta-encode `data` rows of `line_len` bytes.
fn diff_rows(data: &[u8], line_len: usize, height: usize) -> Vec<u8> {
    let bh = block_height(height as u32) as usize;
    let mut out = vec![0u8; data.len()];
    let mut prev = vec![0u8; line_len];
    let mut curr = vec![0u8; line_len];
    for y in 0..height {
        let i = y * line_len;
        curr.copy_from_slice(&data[i..i + line_len]);
        if y % bh != 0 {
            for x in 0..line_len {
                curr[x] = curr[x].wrapping_sub(prev[x]);
                // Reconstruct the original value so the next row diffs
                // against real pixels, not deltas.
                prev[x] = prev[x].wrapping_add(curr[x]);
            }
        } else {
            prev.copy_from_slice(&curr);
        }
        out[i..i + line_len].copy_from_slice(&curr);
    }
    out
}

/// Decode a CZ3 payload (delta-coded interleaved RGBA or RGB) into an image.
pub fn line_diff(width: u32, height: u32, colorbits: u16, data: &[u8]) -> Result<RgbaImage> {
    let bpp = (colorbits / 8) as usize;
    if bpp != 3 && bpp != 4 {
        bail!("unsupported colorbits {} for delta-coded image", colorbits);
    }
    let line_len = width as usize * bpp;
    let expected = line_len * height as usize;
    if data.len() != expected {
        bail!(
            "delta payload is {} bytes, {}x{}@{} needs {}",
            data.len(),
            width,
            height,
            colorbits,
            expected
        );
    }
    let rows = undiff_rows(data, line_len, height as usize);

    let mut img = RgbaImage::new(width, height);
    let pix: &mut [u8] = &mut img;
    if bpp == 4 {
        pix.copy_from_slice(&rows);
    } else {
        for (dst, src) in pix.chunks_exact_mut(4).zip(rows.chunks_exact(3)) {
            dst[0] = src[0];
            dst[1] = src[1];
            dst[2] = src[2];
            dst[3] = 0xFF;
        }
    }
    Ok(img)
}

/// Encode an image into a CZ3 payload.
pub fn diff_line(colorbits: u16, img: &RgbaImage) -> Result<Vec<u8>> {
    let bpp = (colorbits / 8) as usize;
    if bpp != 3 && bpp != 4 {
        bail!("unsupported colorbits {} for delta-coded image", colorbits);
    }
    let (width, height) = (img.width() as usize, img.height() as usize);
    let raw: Vec<u8> = if bpp == 4 {
        img.as_raw().clone()
    } else {
        img.as_raw()
            .chunks_exact(4)
            .flat_map(|p| [p[0], p[1], p[2]])
            .collect()
    };
    Ok(diff_rows(&raw, width * bpp, height))
}

/// Decode a CZ4 payload: `[RGB plane][alpha plane]`, each delta-coded
/// per line with its own predictor state.
pub fn line_diff4(width: u32, height: u32, data: &[u8]) -> Result<RgbaImage> {
    let (w, h) = (width as usize, height as usize);
    let rgb_len = w * h * 3;
    let expected = rgb_len + w * h;
    if data.len() != expected {
        bail!(
            "planar payload is {} bytes, {}x{} needs {}",
            data.len(),
            width,
            height,
            expected
        );
    }
    let rgb = undiff_rows(&data[..rgb_len], w * 3, h);
    let alpha = undiff_rows(&data[rgb_len..], w, h);

    let mut img = RgbaImage::new(width, height);
    let pix: &mut [u8] = &mut img;
    for i in 0..w * h {
        pix[i * 4] = rgb[i * 3];
        pix[i * 4 + 1] = rgb[i * 3 + 1];
        pix[i * 4 + 2] = rgb[i * 3 + 2];
        pix[i * 4 + 3] = alpha[i];
    }
    Ok(img)
}

/// Encode an image into a CZ4 payload.
pub fn diff_line4(img: &RgbaImage) -> Vec<u8> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let raw = img.as_raw();
    let mut rgb = Vec::with_capacity(w * h * 3);
    let mut alpha = Vec::with_capacity(w * h);
    for p in raw.chunks_exact(4) {
        rgb.extend_from_slice(&p[..3]);
        alpha.push(p[3]);
    }
    let mut out = diff_rows(&rgb, w * 3, h);
    out.extend(diff_rows(&alpha, w, h));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([
                (x * 7 + y * 3) as u8,
                (x ^ y) as u8,
                (x * y % 251) as u8,
                (200 + x % 55) as u8,
            ])
        })
    }

    #[test]
    fn block_height_reset_stride() {
        assert_eq!(block_height(480), 160);
        assert_eq!(block_height(4), 2);
        assert_eq!(block_height(1), 1);
    }

    #[test]
    fn rows_are_self_inverse_for_every_height() {
        for h in 1..=12usize {
            let line_len = 9;
            let data: Vec<u8> = (0..line_len * h).map(|i| (i * 31 % 256) as u8).collect();
            let diffed = diff_rows(&data, line_len, h);
            assert_eq!(undiff_rows(&diffed, line_len, h), data, "height {}", h);
        }
    }

    #[test]
    fn reseed_rows_stored_verbatim() {
        // 480 rows reseed at 0, 160, 320.
        let img = test_image(8, 480);
        let encoded = diff_line(32, &img).unwrap();
        let line = 8 * 4;
        for y in [0usize, 160, 320] {
            assert_eq!(
                &encoded[y * line..(y + 1) * line],
                &img.as_raw()[y * line..(y + 1) * line],
                "row {} should be verbatim",
                y
            );
        }
        assert_ne!(&encoded[line..2 * line], &img.as_raw()[line..2 * line]);
    }

    #[test]
    fn interleaved_roundtrip_rgba() {
        let img = test_image(13, 7);
        let encoded = diff_line(32, &img).unwrap();
        let decoded = line_diff(13, 7, 32, &encoded).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn interleaved_roundtrip_rgb() {
        let mut img = test_image(5, 9);
        for p in img.pixels_mut() {
            p.0[3] = 0xFF;
        }
        let encoded = diff_line(24, &img).unwrap();
        assert_eq!(encoded.len(), 5 * 9 * 3);
        let decoded = line_diff(5, 9, 24, &encoded).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn planar_roundtrip_4x4() {
        let img = test_image(4, 4);
        let encoded = diff_line4(&img);
        assert_eq!(encoded.len(), 48 + 16);
        let decoded = line_diff4(4, 4, &encoded).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn wrong_payload_size_is_an_error() {
        assert!(line_diff(4, 4, 32, &[0u8; 10]).is_err());
        assert!(line_diff4(4, 4, &[0u8; 10]).is_err());
    }
}
