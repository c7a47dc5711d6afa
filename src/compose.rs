//! Metatile composition: 2x2 grids of 8x8 indexed tiles into 16x16 RGBA.
//!
//! Everything here is a pure function over borrowed inputs, so workers can
//! compose concurrently without synchronization. All the failure modes are
//! rendered, not raised: a missing raster skips the tile, a missing palette
//! renders deterministic grayscale, and color index 0 is always transparent,
//! so malformed sources still produce a visibly-wrong-but-valid image.

use crate::indexed::IndexedRaster;
use crate::metatile::{TileRef, METATILE_SIZE, PRIMARY_VRAM_TILES, TILES_PER_LAYER, TILE_SIZE};
use crate::palette::{self, PaletteSet, SECONDARY_PALETTE_START, TRANSPARENT};
use image::{Rgba, RgbaImage};

/// Destination offsets for the four references, in reference order:
/// top-left, top-right, bottom-left, bottom-right.
const QUADRANTS: [(u32, u32); TILES_PER_LAYER] = [
    (0, 0),
    (TILE_SIZE, 0),
    (0, TILE_SIZE),
    (TILE_SIZE, TILE_SIZE),
];

/// A fully transparent 16x16 image, the placeholder for unrenderable
/// metatiles. `RgbaImage::new` zero-fills, which is already transparent.
pub fn empty_half() -> RgbaImage {
    RgbaImage::new(METATILE_SIZE, METATILE_SIZE)
}

/// Resolve one color through the sub-palette ownership rule: slots below
/// [`SECONDARY_PALETTE_START`] come from the primary tileset's palette file,
/// the rest from the secondary's, regardless of which raster supplied the
/// pixels. Index 0 is transparent for any palette; anything unresolvable
/// renders grayscale.
pub fn resolve_color(
    primary: Option<&PaletteSet>,
    secondary: Option<&PaletteSet>,
    palette_slot: u8,
    color_index: u8,
) -> Rgba<u8> {
    if color_index == 0 {
        return TRANSPARENT;
    }
    let set = if palette_slot >= SECONDARY_PALETTE_START {
        secondary
    } else {
        primary
    };
    match set.and_then(|s| s.get(palette_slot)) {
        Some(sub) => sub.color(color_index),
        None => palette::grayscale(color_index),
    }
}

/// Pick the raster a tile id addresses. Ids below [`PRIMARY_VRAM_TILES`]
/// always reference the primary raster; higher ids reference the secondary
/// at `id - 512`, falling back to the primary when the secondary raster is
/// absent or too small (pokeemerald leaves those VRAM slots to the primary).
fn select_tile(
    tile_id: u16,
    primary: Option<&IndexedRaster>,
    secondary: Option<&IndexedRaster>,
) -> Option<[u8; 64]> {
    if tile_id < PRIMARY_VRAM_TILES {
        return primary.and_then(|r| r.tile(tile_id as u32));
    }
    let local = (tile_id - PRIMARY_VRAM_TILES) as u32;
    secondary
        .and_then(|r| r.tile(local))
        .or_else(|| primary.and_then(|r| r.tile(local)))
}

/// Compose one metatile half (four tile references) into a 16x16 RGBA image.
pub fn compose_half(
    refs: &[TileRef; TILES_PER_LAYER],
    primary: Option<&IndexedRaster>,
    secondary: Option<&IndexedRaster>,
    primary_palettes: Option<&PaletteSet>,
    secondary_palettes: Option<&PaletteSet>,
) -> RgbaImage {
    let mut out = empty_half();

    for (quadrant, tile_ref) in refs.iter().enumerate() {
        if tile_ref.is_empty() {
            continue;
        }
        let Some(indices) = select_tile(tile_ref.tile_id, primary, secondary) else {
            continue;
        };
        let (dx, dy) = QUADRANTS[quadrant];
        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE {
                let sx = if tile_ref.flip_h { TILE_SIZE - 1 - x } else { x };
                let sy = if tile_ref.flip_v { TILE_SIZE - 1 - y } else { y };
                let color_index = indices[(sy * TILE_SIZE + sx) as usize];
                let color = resolve_color(
                    primary_palettes,
                    secondary_palettes,
                    tile_ref.palette,
                    color_index,
                );
                if color[3] != 0 {
                    out.put_pixel(dx + x, dy + y, color);
                }
            }
        }
    }

    out
}

/// Recolor a whole indexed raster through the same palette rule the
/// compositor applies to tiles. Used for animation frames, which are
/// themselves indexed rasters drawn with the palette slot of the metatile
/// reference that consumes them.
pub fn recolor(
    raster: &IndexedRaster,
    primary_palettes: Option<&PaletteSet>,
    secondary_palettes: Option<&PaletteSet>,
    palette_slot: u8,
) -> RgbaImage {
    let mut out = RgbaImage::new(raster.width, raster.height);
    for y in 0..raster.height {
        for x in 0..raster.width {
            let color = resolve_color(
                primary_palettes,
                secondary_palettes,
                palette_slot,
                raster.index_at(x, y),
            );
            out.put_pixel(x, y, color);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::SubPalette;

    /// A raster whose tile `t` is filled with color index `t % 15 + 1`,
    /// except tile 1 which holds a gradient (so flips are observable).
    fn test_raster(tiles: u32) -> IndexedRaster {
        let width = 8 * tiles;
        let mut indices = vec![0u8; (width * 8) as usize];
        for t in 0..tiles {
            for y in 0..8u32 {
                for x in 0..8u32 {
                    let v = if t == 1 {
                        ((x + 2 * y) % 15 + 1) as u8
                    } else {
                        (t as u8 % 15) + 1
                    };
                    indices[(y * width + t * 8 + x) as usize] = v;
                }
            }
        }
        IndexedRaster {
            width,
            height: 8,
            bit_depth: 4,
            indices,
        }
    }

    fn test_palettes() -> PaletteSet {
        let colors: Vec<Rgba<u8>> = (0..16).map(|i| Rgba([i * 10, i, 0, 255])).collect();
        let sub = SubPalette::from_colors(&colors);
        PaletteSet::from_slots(vec![Some(sub.clone()), None, Some(sub)])
    }

    fn tile(id: u16, palette: u8) -> TileRef {
        TileRef {
            tile_id: id,
            palette,
            flip_h: false,
            flip_v: false,
        }
    }

    #[test]
    fn test_left_half_mirror_composite() {
        // Two references to the same gradient tile, the second H-flipped:
        // the top-right quadrant must be the mirror of the top-left, row by
        // row, while the bottom quadrants stay uniform fills.
        let raster = test_raster(11);
        let pals = test_palettes();
        let gradient = tile(1, 2);
        let refs = [
            gradient,
            TileRef {
                flip_h: true,
                ..gradient
            },
            tile(10, 2),
            tile(10, 2),
        ];
        let img = compose_half(&refs, Some(&raster), None, Some(&pals), None);
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(
                    img.get_pixel(x, y),
                    img.get_pixel(15 - x, y),
                    "mirror mismatch at ({x},{y})"
                );
            }
        }
        assert_eq!(img.get_pixel(0, 8), img.get_pixel(7, 15));
    }

    #[test]
    fn test_empty_tile_skipped_and_transparent() {
        let raster = test_raster(2);
        let pals = test_palettes();
        let refs = [TileRef::default(); 4];
        let img = compose_half(&refs, Some(&raster), None, Some(&pals), None);
        assert!(img.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_color_index_zero_transparent() {
        let pals = test_palettes();
        assert_eq!(resolve_color(Some(&pals), None, 0, 0), TRANSPARENT);
        assert_eq!(resolve_color(None, None, 0, 0), TRANSPARENT);
        assert_eq!(resolve_color(Some(&pals), None, 9, 0), TRANSPARENT);
    }

    #[test]
    fn test_grayscale_fallback_without_palette() {
        // Palette slot 1 is not loaded; colors come out grayscale.
        let pals = test_palettes();
        assert_eq!(
            resolve_color(Some(&pals), None, 1, 3),
            Rgba([51, 51, 51, 255])
        );
        // No palette sets at all.
        assert_eq!(resolve_color(None, None, 0, 2), Rgba([34, 34, 34, 255]));
    }

    #[test]
    fn test_palette_ownership_boundary() {
        let primary = test_palettes();
        // Secondary set with a distinct color in slot 6.
        let colors: Vec<Rgba<u8>> = (0..16).map(|i| Rgba([0, 0, i * 10, 255])).collect();
        let mut slots = vec![None; 6];
        slots.push(Some(SubPalette::from_colors(&colors)));
        let secondary = PaletteSet::from_slots(slots);

        // Slot 6 resolves from the secondary set even for primary tiles.
        assert_eq!(
            resolve_color(Some(&primary), Some(&secondary), 6, 2),
            Rgba([0, 0, 20, 255])
        );
        // Slot 2 resolves from the primary set.
        assert_eq!(
            resolve_color(Some(&primary), Some(&secondary), 2, 2),
            Rgba([20, 2, 0, 255])
        );
    }

    #[test]
    fn test_secondary_raster_selection_and_fallback() {
        let primary = test_raster(4);
        let secondary = test_raster(2);
        let pals = test_palettes();

        // Tile 513 -> secondary tile 1 (the gradient; (0,0) holds index 1).
        let refs = [tile(513, 0), TileRef::default(), TileRef::default(), TileRef::default()];
        let img = compose_half(&refs, Some(&primary), Some(&secondary), Some(&pals), None);
        assert_eq!(*img.get_pixel(0, 0), Rgba([10, 1, 0, 255]));

        // Tile 515 is outside the secondary raster; falls back to primary
        // tile 3 (flat fill of index 4).
        let refs = [tile(515, 0), TileRef::default(), TileRef::default(), TileRef::default()];
        let img = compose_half(&refs, Some(&primary), Some(&secondary), Some(&pals), None);
        assert_eq!(*img.get_pixel(0, 0), Rgba([40, 4, 0, 255]));

        // No secondary raster at all: same fallback.
        let img = compose_half(&refs, Some(&primary), None, Some(&pals), None);
        assert_eq!(*img.get_pixel(0, 0), Rgba([40, 4, 0, 255]));
    }

    #[test]
    fn test_recolor_frame() {
        let raster = IndexedRaster {
            width: 2,
            height: 1,
            bit_depth: 4,
            indices: vec![0, 3],
        };
        let pals = test_palettes();
        let img = recolor(&raster, Some(&pals), None, 0);
        assert_eq!(*img.get_pixel(0, 0), TRANSPARENT);
        assert_eq!(*img.get_pixel(1, 0), Rgba([30, 3, 0, 255]));
    }
}
