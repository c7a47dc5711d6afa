//! Decoder for the indexed-color PNG subset used by GBA tileset assets.
//!
//! Tileset graphics are stored as paletted PNGs at bit depths 1/2/4/8, and the
//! converter needs the raw palette indices, not resolved colors, because the
//! palette applied to a tile is chosen per metatile reference, not per image.
//! General image libraries tend to hide the index plane, so this module parses
//! the chunk stream itself and stops at exactly the subset the corpus uses:
//! no interlacing, no truecolor, no alpha in the source.
//!
//! Some shipped assets have non-standard dimensions and truncated tails; the
//! decoder keeps every fully reconstructed scanline instead of hard-failing.

use flate2::read::ZlibDecoder;
use std::io::Read;
use thiserror::Error;

/// PNG file signature.
const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Color type for paletted images in the IHDR chunk.
const COLOR_TYPE_INDEXED: u8 = 3;

/// Error decoding an indexed raster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The source is valid but outside the supported indexed subset.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// The chunk structure or compressed payload is broken.
    #[error("corrupt stream: {0}")]
    CorruptStream(String),
}

/// A decoded indexed-color raster: one palette index per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedRaster {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    /// Row-major, `width * height` entries, each 0..(1 << bit_depth).
    pub indices: Vec<u8>,
}

impl IndexedRaster {
    /// Palette index at `(x, y)`. Out-of-bounds coordinates return 0,
    /// the universally-transparent index.
    pub fn index_at(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.indices[(y * self.width + x) as usize]
    }

    /// Number of whole 8x8 tiles per raster row.
    pub fn tiles_per_row(&self) -> u32 {
        self.width / 8
    }

    /// Total number of whole 8x8 tiles in the raster.
    pub fn tile_count(&self) -> u32 {
        self.tiles_per_row() * (self.height / 8)
    }

    /// Copy out the 64 palette indices of one 8x8 tile, row-major.
    /// Returns `None` when `tile_id` is outside the raster.
    pub fn tile(&self, tile_id: u32) -> Option<[u8; 64]> {
        let per_row = self.tiles_per_row();
        if per_row == 0 || tile_id >= self.tile_count() {
            return None;
        }
        let tx = (tile_id % per_row) * 8;
        let ty = (tile_id / per_row) * 8;
        let mut out = [0u8; 64];
        for y in 0..8 {
            for x in 0..8 {
                out[(y * 8 + x) as usize] = self.index_at(tx + x, ty + y);
            }
        }
        Some(out)
    }
}

/// Decode an indexed-color PNG from its on-disk bytes.
///
/// Fails with [`DecodeError::UnsupportedFormat`] for anything but paletted
/// color at bit depths 1/2/4/8, and [`DecodeError::CorruptStream`] when the
/// chunk stream or compressed payload is unreadable. Truncated pixel data is
/// tolerated: the returned raster contains every scanline that could be fully
/// reconstructed, with `height` shrunk to match.
pub fn decode(bytes: &[u8]) -> Result<IndexedRaster, DecodeError> {
    if bytes.len() < SIGNATURE.len() || bytes[..SIGNATURE.len()] != SIGNATURE {
        return Err(DecodeError::CorruptStream("missing PNG signature".into()));
    }

    let mut width = 0u32;
    let mut height = 0u32;
    let mut bit_depth = 0u8;
    let mut seen_header = false;
    let mut compressed: Vec<u8> = Vec::new();

    let mut pos = SIGNATURE.len();
    loop {
        // length (4) + tag (4); data; crc (4, not validated)
        if pos + 8 > bytes.len() {
            break;
        }
        let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
            as usize;
        let tag = &bytes[pos + 4..pos + 8];
        let data_start = pos + 8;
        let data_end = data_start + len;
        if data_end > bytes.len() {
            // Truncated chunk; keep whatever was gathered so far.
            break;
        }
        let data = &bytes[data_start..data_end];

        match tag {
            b"IHDR" => {
                if data.len() < 13 {
                    return Err(DecodeError::CorruptStream("short IHDR".into()));
                }
                width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
                bit_depth = data[8];
                let color_type = data[9];
                let interlace = data[12];
                if color_type != COLOR_TYPE_INDEXED {
                    return Err(DecodeError::UnsupportedFormat(format!(
                        "color type {color_type} (only indexed palette is supported)"
                    )));
                }
                if !matches!(bit_depth, 1 | 2 | 4 | 8) {
                    return Err(DecodeError::UnsupportedFormat(format!(
                        "bit depth {bit_depth}"
                    )));
                }
                if interlace != 0 {
                    return Err(DecodeError::UnsupportedFormat("interlaced image".into()));
                }
                seen_header = true;
            }
            b"IDAT" => compressed.extend_from_slice(data),
            b"IEND" => break,
            _ => {}
        }
        pos = data_end + 4;
    }

    if !seen_header {
        return Err(DecodeError::CorruptStream("missing IHDR".into()));
    }
    if width == 0 || height == 0 {
        return Err(DecodeError::CorruptStream("zero dimension".into()));
    }

    let mut raw = Vec::new();
    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    if let Err(e) = decoder.read_to_end(&mut raw) {
        // A clean prefix may still have been inflated; only fail when
        // nothing at all came out.
        if raw.is_empty() {
            return Err(DecodeError::CorruptStream(format!("inflate failed: {e}")));
        }
    }

    let stride = ((width as usize) * (bit_depth as usize) + 7) / 8;
    let rows = unfilter(&raw, stride, height as usize)?;
    let recovered = rows.len() as u32;

    let mut indices = Vec::with_capacity((width * recovered) as usize);
    for row in &rows {
        unpack_row(row, width as usize, bit_depth, &mut indices);
    }

    Ok(IndexedRaster {
        width,
        height: recovered,
        bit_depth,
        indices,
    })
}

/// Reconstruct scanlines from the filtered byte stream. Each scanline is one
/// filter-type byte followed by `stride` filtered bytes, reconstructed against
/// the previous scanline only. Stops at the first incomplete scanline.
fn unfilter(raw: &[u8], stride: usize, max_rows: usize) -> Result<Vec<Vec<u8>>, DecodeError> {
    let mut rows: Vec<Vec<u8>> = Vec::new();
    let mut prev = vec![0u8; stride];

    for y in 0..max_rows {
        let start = y * (stride + 1);
        if start + stride + 1 > raw.len() {
            break;
        }
        let filter = raw[start];
        let line = &raw[start + 1..start + 1 + stride];
        let mut out = vec![0u8; stride];

        match filter {
            0 => out.copy_from_slice(line),
            1 => {
                // Sub: predict from the byte one filter unit to the left.
                for x in 0..stride {
                    let a = if x >= 1 { out[x - 1] } else { 0 };
                    out[x] = line[x].wrapping_add(a);
                }
            }
            2 => {
                for x in 0..stride {
                    out[x] = line[x].wrapping_add(prev[x]);
                }
            }
            3 => {
                for x in 0..stride {
                    let a = if x >= 1 { out[x - 1] as u16 } else { 0 };
                    let b = prev[x] as u16;
                    out[x] = line[x].wrapping_add(((a + b) / 2) as u8);
                }
            }
            4 => {
                for x in 0..stride {
                    let a = if x >= 1 { out[x - 1] } else { 0 };
                    let b = prev[x];
                    let c = if x >= 1 { prev[x - 1] } else { 0 };
                    out[x] = line[x].wrapping_add(paeth(a, b, c));
                }
            }
            other => {
                return Err(DecodeError::CorruptStream(format!(
                    "unknown filter type {other} on row {y}"
                )));
            }
        }

        prev.copy_from_slice(&out);
        rows.push(out);
    }

    Ok(rows)
}

/// Paeth predictor: whichever of left/up/up-left is closest to `a + b - c`.
fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i32 + b as i32 - c as i32;
    let pa = (p - a as i32).abs();
    let pb = (p - b as i32).abs();
    let pc = (p - c as i32).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Expand one reconstructed scanline into per-pixel indices, MSB-first
/// within each byte for sub-byte depths.
fn unpack_row(row: &[u8], width: usize, bit_depth: u8, out: &mut Vec<u8>) {
    match bit_depth {
        8 => out.extend_from_slice(&row[..width]),
        4 => {
            for x in 0..width {
                let byte = row[x / 2];
                out.push(if x % 2 == 0 { byte >> 4 } else { byte & 0x0F });
            }
        }
        2 => {
            for x in 0..width {
                let byte = row[x / 4];
                let shift = 6 - 2 * (x % 4);
                out.push((byte >> shift) & 0x03);
            }
        }
        1 => {
            for x in 0..width {
                let byte = row[x / 8];
                let shift = 7 - (x % 8);
                out.push((byte >> shift) & 0x01);
            }
        }
        _ => unreachable!("bit depth validated at header parse"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Pack per-pixel indices into scanline bytes at the given depth.
    fn pack_row(pixels: &[u8], bit_depth: u8) -> Vec<u8> {
        let per_byte = 8 / bit_depth as usize;
        let mut row = vec![0u8; (pixels.len() + per_byte - 1) / per_byte];
        for (x, &p) in pixels.iter().enumerate() {
            let shift = 8 - bit_depth as usize * (x % per_byte + 1);
            row[x / per_byte] |= p << shift;
        }
        row
    }

    /// Apply a PNG filter forward (the encoder direction).
    fn filter_row(filter: u8, row: &[u8], prev: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(row.len());
        for x in 0..row.len() {
            let a = if x >= 1 { row[x - 1] } else { 0 };
            let b = prev[x];
            let c = if x >= 1 { prev[x - 1] } else { 0 };
            let predictor = match filter {
                0 => 0,
                1 => a,
                2 => b,
                3 => (((a as u16) + (b as u16)) / 2) as u8,
                4 => paeth(a, b, c),
                _ => panic!("bad filter"),
            };
            out.push(row[x].wrapping_sub(predictor));
        }
        out
    }

    fn chunk(tag: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(tag);
        out.extend_from_slice(data);
        out.extend_from_slice(&[0, 0, 0, 0]); // CRC is not validated
        out
    }

    /// Build a minimal paletted PNG: `rows` are per-pixel index rows, and
    /// `filters[y]` chooses the filter applied to row `y`.
    fn build_png(width: u32, bit_depth: u8, rows: &[Vec<u8>], filters: &[u8]) -> Vec<u8> {
        let mut raw = Vec::new();
        let stride = ((width as usize) * (bit_depth as usize) + 7) / 8;
        let mut prev = vec![0u8; stride];
        for (y, pixels) in rows.iter().enumerate() {
            let packed = pack_row(pixels, bit_depth);
            assert_eq!(packed.len(), stride);
            let filter = filters[y % filters.len()];
            raw.push(filter);
            raw.extend(filter_row(filter, &packed, &prev));
            prev = packed;
        }

        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&raw).unwrap();
        let compressed = enc.finish().unwrap();

        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&width.to_be_bytes());
        ihdr.extend_from_slice(&(rows.len() as u32).to_be_bytes());
        ihdr.extend_from_slice(&[bit_depth, COLOR_TYPE_INDEXED, 0, 0, 0]);

        let mut png = SIGNATURE.to_vec();
        png.extend(chunk(b"IHDR", &ihdr));
        png.extend(chunk(b"IDAT", &compressed));
        png.extend(chunk(b"IEND", &[]));
        png
    }

    #[test]
    fn test_roundtrip_all_filters_and_depths() {
        for &bit_depth in &[1u8, 2, 4, 8] {
            let max = 1u16 << bit_depth;
            let width = 8u32;
            let rows: Vec<Vec<u8>> = (0u16..6)
                .map(|y| {
                    (0u16..width as u16)
                        .map(|x| ((x * 3 + y * 5) % max) as u8)
                        .collect()
                })
                .collect();
            for filter in 0u8..=4 {
                let png = build_png(width, bit_depth, &rows, &[filter]);
                let raster = decode(&png).unwrap();
                assert_eq!(raster.width, width);
                assert_eq!(raster.height, rows.len() as u32);
                assert_eq!(raster.bit_depth, bit_depth);
                let expected: Vec<u8> = rows.iter().flatten().copied().collect();
                assert_eq!(
                    raster.indices, expected,
                    "filter {filter} depth {bit_depth}"
                );
            }
        }
    }

    #[test]
    fn test_mixed_filters_roundtrip() {
        let rows: Vec<Vec<u8>> = (0usize..5)
            .map(|y| (0usize..16).map(|x| ((x + y) % 16) as u8).collect())
            .collect();
        let png = build_png(16, 4, &rows, &[0, 1, 2, 3, 4]);
        let raster = decode(&png).unwrap();
        let expected: Vec<u8> = rows.iter().flatten().copied().collect();
        assert_eq!(raster.indices, expected);
    }

    #[test]
    fn test_scenario_sub_filtered_2x2() {
        // 2x2 4bpp raster, Sub filter on every row, indices [3,5,3,5].
        let rows = vec![vec![3u8, 5], vec![3, 5]];
        let png = build_png(2, 4, &rows, &[1]);
        let raster = decode(&png).unwrap();
        assert_eq!(raster.width, 2);
        assert_eq!(raster.height, 2);
        assert_eq!(raster.indices, vec![3, 5, 3, 5]);
    }

    #[test]
    fn test_truecolor_rejected() {
        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&8u32.to_be_bytes());
        ihdr.extend_from_slice(&8u32.to_be_bytes());
        ihdr.extend_from_slice(&[8, 2, 0, 0, 0]); // color type 2 = RGB
        let mut png = SIGNATURE.to_vec();
        png.extend(chunk(b"IHDR", &ihdr));
        png.extend(chunk(b"IEND", &[]));
        assert!(matches!(
            decode(&png),
            Err(DecodeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_garbage_idat_is_corrupt_stream() {
        let mut ihdr = Vec::new();
        ihdr.extend_from_slice(&4u32.to_be_bytes());
        ihdr.extend_from_slice(&4u32.to_be_bytes());
        ihdr.extend_from_slice(&[4, COLOR_TYPE_INDEXED, 0, 0, 0]);
        let mut png = SIGNATURE.to_vec();
        png.extend(chunk(b"IHDR", &ihdr));
        png.extend(chunk(b"IDAT", &[0xDE, 0xAD, 0xBE, 0xEF]));
        png.extend(chunk(b"IEND", &[]));
        assert!(matches!(decode(&png), Err(DecodeError::CorruptStream(_))));
    }

    #[test]
    fn test_truncated_rows_recovered() {
        // Declare 4 rows but only supply pixel data for 2 of them.
        let rows = vec![vec![1u8, 2, 3, 4], vec![5, 6, 7, 0]];
        let mut png = build_png(4, 4, &rows, &[0]);
        // Patch the declared height up to 4.
        let height_offset = SIGNATURE.len() + 8 + 4;
        png[height_offset..height_offset + 4].copy_from_slice(&4u32.to_be_bytes());
        let raster = decode(&png).unwrap();
        assert_eq!(raster.height, 2);
        assert_eq!(raster.indices, vec![1, 2, 3, 4, 5, 6, 7, 0]);
    }

    #[test]
    fn test_tile_extraction() {
        let rows: Vec<Vec<u8>> = (0u8..8)
            .map(|y| (0u8..16).map(|x| if x < 8 { y } else { 15 - y }).collect())
            .collect();
        let png = build_png(16, 4, &rows, &[0]);
        let raster = decode(&png).unwrap();
        assert_eq!(raster.tiles_per_row(), 2);
        assert_eq!(raster.tile_count(), 2);
        let left = raster.tile(0).unwrap();
        assert_eq!(left[0], 0);
        assert_eq!(left[63], 7);
        let right = raster.tile(1).unwrap();
        assert_eq!(right[0], 15);
        assert!(raster.tile(2).is_none());
    }

    #[test]
    fn test_paeth_predictor() {
        assert_eq!(paeth(0, 0, 0), 0);
        assert_eq!(paeth(10, 20, 15), 15);
        assert_eq!(paeth(100, 2, 3), 100);
        assert_eq!(paeth(1, 200, 100), 100);
    }
}
