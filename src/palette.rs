//! JASC-PAL palette loading and sub-palette resolution.
//!
//! Tileset colors live outside the raster, in plain-text `.pal` files. Each
//! sub-palette is a block of 16 colors, and a tileset's full palette is the
//! set of sub-palettes in its `palettes/` directory (`00.pal`..`15.pal`).
//! GBA convention: slot 0 of every sub-palette is never drawn, so it is
//! forced fully transparent regardless of the stored triplet.
//!
//! A missing palette file is a valid, common state; callers render through
//! the grayscale fallback instead of failing.

use image::Rgba;
use std::path::Path;

/// Colors per sub-palette block.
pub const COLORS_PER_SUB_PALETTE: usize = 16;

/// Sub-palette slots per tileset (`00.pal` through `15.pal`).
pub const SUB_PALETTES_PER_SET: usize = 16;

/// First sub-palette slot owned by the secondary tileset. Slots 0-5 come from
/// the primary tileset's palette files, 6-12 from the secondary's, the way
/// the GBA combines them in palette RAM. Documented assumption: tilesets with
/// custom sub-palette counts would shift this boundary.
pub const SECONDARY_PALETTE_START: u8 = 6;

/// Fixed header line of the JASC-PAL format.
const PAL_HEADER: &str = "JASC-PAL";

/// Fully transparent color (used for slot 0 and empty tiles).
pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// One 16-color block of a tileset palette. Slot 0 is always transparent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPalette {
    colors: [Rgba<u8>; COLORS_PER_SUB_PALETTE],
}

impl SubPalette {
    /// Build a sub-palette from up to 16 colors, padding short input with
    /// opaque black and forcing slot 0 transparent.
    pub fn from_colors(colors: &[Rgba<u8>]) -> Self {
        let mut out = [Rgba([0, 0, 0, 255]); COLORS_PER_SUB_PALETTE];
        for (slot, color) in out.iter_mut().zip(colors.iter()) {
            *slot = *color;
        }
        out[0] = TRANSPARENT;
        Self { colors: out }
    }

    /// Color for a palette index. Index 0 is always fully transparent;
    /// indices past the block fall back to deterministic grayscale so
    /// malformed sources stay visibly wrong instead of failing.
    pub fn color(&self, index: u8) -> Rgba<u8> {
        if index == 0 {
            return TRANSPARENT;
        }
        match self.colors.get(index as usize) {
            Some(color) => *color,
            None => grayscale(index),
        }
    }
}

/// Deterministic grayscale fallback for unresolvable colors: `index * 17`
/// maps the 4-bit index range onto full luminance. Index 0 stays transparent.
pub fn grayscale(index: u8) -> Rgba<u8> {
    if index == 0 {
        return TRANSPARENT;
    }
    let gray = index.wrapping_mul(17);
    Rgba([gray, gray, gray, 255])
}

/// Parse a JASC-PAL file into consecutive 16-color sub-palettes.
///
/// Format: line 1 the literal `JASC-PAL`, line 2 an ignored version, line 3
/// the color count, then one `R G B` triplet per line. Returns `None` when
/// the file is absent or malformed; "no palette" is an expected state, and
/// callers render through the grayscale fallback.
pub fn load_palette(path: &Path) -> Option<Vec<SubPalette>> {
    let text = std::fs::read_to_string(path).ok()?;
    parse_palette(&text)
}

/// Parse JASC-PAL text. Split out from [`load_palette`] for testability.
pub fn parse_palette(text: &str) -> Option<Vec<SubPalette>> {
    let mut lines = text.lines();
    if lines.next()?.trim() != PAL_HEADER {
        return None;
    }
    lines.next()?; // version line, ignored
    let count: usize = lines.next()?.trim().parse().ok()?;

    let mut colors: Vec<Rgba<u8>> = Vec::with_capacity(count);
    for line in lines.take(count) {
        let mut parts = line.split_whitespace();
        let r: u8 = parts.next()?.parse().ok()?;
        let g: u8 = parts.next()?.parse().ok()?;
        let b: u8 = parts.next()?.parse().ok()?;
        colors.push(Rgba([r, g, b, 255]));
    }
    if colors.is_empty() {
        return None;
    }

    Some(
        colors
            .chunks(COLORS_PER_SUB_PALETTE)
            .map(SubPalette::from_colors)
            .collect(),
    )
}

/// The resolved palette of one tileset: up to 16 optional sub-palette slots.
/// Missing slots keep their `None` and resolve through the fallback.
#[derive(Debug, Clone, Default)]
pub struct PaletteSet {
    slots: Vec<Option<SubPalette>>,
}

impl PaletteSet {
    /// Load `palettes/00.pal` .. `15.pal` under a tileset directory. Files
    /// that are missing or malformed leave their slot empty.
    pub fn load(tileset_dir: &Path) -> Self {
        let palettes_dir = tileset_dir.join("palettes");
        let slots = (0..SUB_PALETTES_PER_SET)
            .map(|i| {
                let path = palettes_dir.join(format!("{i:02}.pal"));
                load_palette(&path).and_then(|mut subs| {
                    if subs.is_empty() {
                        None
                    } else {
                        Some(subs.remove(0))
                    }
                })
            })
            .collect();
        Self { slots }
    }

    /// Build a set from explicit slots (tests and collaborators).
    pub fn from_slots(slots: Vec<Option<SubPalette>>) -> Self {
        Self { slots }
    }

    /// Sub-palette at `slot`, if loaded.
    pub fn get(&self, slot: u8) -> Option<&SubPalette> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }

    /// Number of loaded sub-palettes.
    pub fn loaded_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
