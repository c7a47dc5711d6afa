//! Metatile data model and binary table readers.
//!
//! A metatile is a fixed composition of 8 tile references: four for the
//! bottom layer, four for the top, each layer a 2x2 grid of 8x8 tiles. The
//! layer-type attribute decides which background layers the two halves land
//! on downstream; this core only carries it through as part of the identity
//! of a rendered metatile.
//!
//! On disk the tables are little-endian u16 streams: `metatiles.bin` holds
//! 8 packed tile references per metatile, `metatile_attributes.bin` one
//! attribute word per metatile with the layer type in bits 12-15.

use serde::Serialize;

/// Tile references per metatile (two layers of four).
pub const TILES_PER_METATILE: usize = 8;

/// Tile references per metatile layer (2x2 grid).
pub const TILES_PER_LAYER: usize = 4;

/// Edge length of a source tile, in pixels.
pub const TILE_SIZE: u32 = 8;

/// Edge length of a composed metatile, in pixels.
pub const METATILE_SIZE: u32 = 16;

/// Tile ids 0-511 address the primary tileset's raster; 512-1023 address the
/// secondary's, offset by this count (the GBA VRAM split).
pub const PRIMARY_VRAM_TILES: u16 = 512;

/// Metatile ids below this belong to the primary tileset.
pub const METATILES_IN_PRIMARY: u16 = 512;

/// How a metatile's two halves distribute across background layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    /// Bottom half to the middle layer, top half to the overhead layer.
    #[default]
    Normal,
    /// Bottom half to the ground layer, top half to the middle layer.
    Covered,
    /// Bottom half to the ground layer, top half to the overhead layer.
    Split,
}

impl LayerType {
    /// Layer type from a `metatile_attributes.bin` word (bits 12-15).
    /// Unknown values fall back to `Normal`.
    pub fn from_attribute(attribute: u16) -> Self {
        match (attribute >> 12) & 0x0F {
            1 => LayerType::Covered,
            2 => LayerType::Split,
            _ => LayerType::Normal,
        }
    }
}

/// One tile reference inside a metatile: which tile, which sub-palette,
/// and how it is mirrored before placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileRef {
    /// 0-1023; 0 is the empty tile and is skipped during composition.
    pub tile_id: u16,
    /// Sub-palette slot 0-15 (0-5 primary-owned, 6-12 secondary-owned).
    pub palette: u8,
    pub flip_h: bool,
    pub flip_v: bool,
}

impl TileRef {
    /// Unpack a `metatiles.bin` word: bits 0-9 tile id, bit 10 H-flip,
    /// bit 11 V-flip, bits 12-15 palette slot.
    pub fn from_raw(raw: u16) -> Self {
        Self {
            tile_id: raw & 0x03FF,
            flip_h: raw & 0x0400 != 0,
            flip_v: raw & 0x0800 != 0,
            palette: (raw >> 12) as u8,
        }
    }

    /// Tile id 0 renders nothing.
    pub fn is_empty(&self) -> bool {
        self.tile_id == 0
    }
}

/// A metatile: two ordered layers of four tile references plus the layer
/// type tag. Immutable once read from source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metatile {
    pub bottom: [TileRef; TILES_PER_LAYER],
    pub top: [TileRef; TILES_PER_LAYER],
    pub layer_type: LayerType,
}

impl Metatile {
    /// An all-empty metatile, the fallback for out-of-bounds ids.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Read the packed tile references of a `metatiles.bin` stream. A trailing
/// odd byte is ignored.
pub fn read_tile_refs(data: &[u8]) -> Vec<TileRef> {
    data.chunks_exact(2)
        .map(|pair| TileRef::from_raw(u16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Read per-metatile layer types from a `metatile_attributes.bin` stream.
pub fn read_layer_types(data: &[u8]) -> Vec<LayerType> {
    data.chunks_exact(2)
        .map(|pair| LayerType::from_attribute(u16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// Assemble the metatile at `metatile_id` from a tileset's tables. Returns
/// `None` when the id is outside the table; callers substitute
/// [`Metatile::empty`] and keep going.
pub fn metatile_at(
    refs: &[TileRef],
    layer_types: &[LayerType],
    metatile_id: u16,
) -> Option<Metatile> {
    let start = metatile_id as usize * TILES_PER_METATILE;
    let tiles = refs.get(start..start + TILES_PER_METATILE)?;
    let mut bottom = [TileRef::default(); TILES_PER_LAYER];
    let mut top = [TileRef::default(); TILES_PER_LAYER];
    bottom.copy_from_slice(&tiles[..TILES_PER_LAYER]);
    top.copy_from_slice(&tiles[TILES_PER_LAYER..]);
    Some(Metatile {
        bottom,
        top,
        layer_type: layer_types
            .get(metatile_id as usize)
            .copied()
            .unwrap_or_default(),
    })
}
