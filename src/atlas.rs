//! Flip-aware deduplication and atlas construction.
//!
//! Composed metatile images are interned into a shared atlas: pixel-identical
//! images, and images that are horizontal/vertical/180-degree mirrors of an
//! already stored image, resolve to the same base id. Flip state travels in
//! the two top bits of the returned 32-bit value rather than as duplicated
//! storage, so a caller can hand the packed value straight to a renderer.
//!
//! Secondary-owned entries get a provisional marker bit instead of a numeric
//! offset: the true offset (the final primary entry count) is only known once
//! every map sharing the tileset pair has contributed. [`AtlasBuilder::finalize`]
//! rewrites the provisional ids in one explicit open-to-finalized transition,
//! after which any mutation is a contract violation and panics.
//!
//! One builder serves many worker threads; all mutable state sits behind a
//! single mutex. Compose images before calling in; the lock only covers
//! hash-table work and the image clone for storage.

use crate::metatile::{LayerType, METATILE_SIZE};
use image::RgbaImage;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// Horizontal-flip bit of a packed atlas id.
pub const FLIP_H: u32 = 1 << 31;

/// Vertical-flip bit of a packed atlas id.
pub const FLIP_V: u32 = 1 << 30;

/// Provisional marker on ids minted for secondary-owned entries, cleared by
/// [`AtlasBuilder::finalize`]. Never escapes a finalized builder.
pub const SECONDARY_MARKER: u32 = 1 << 29;

/// Low bits carrying the 1-based atlas id (0 = empty cell).
pub const ID_MASK: u32 = (1 << 28) - 1;

/// Columns in the emitted atlas raster.
pub const ATLAS_COLUMNS: u32 = 16;

/// Identity of one rendered metatile across maps. Metatiles are composed
/// once per key and memoized; the tileset name is part of the key, so equal
/// metatile ids on different tilesets never alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetatileKey {
    pub metatile_id: u16,
    pub tileset: String,
    pub layer_type: LayerType,
}

/// The packed ids assigned to a metatile's two halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LayerIds {
    pub bottom: u32,
    pub top: u32,
}

/// A mirror-hash entry: the image hashing to this value equals the entry's
/// stored image flipped by `(flip_h, flip_v)`.
#[derive(Debug, Clone, Copy)]
struct Variant {
    id: u32,
    flip_h: bool,
    flip_v: bool,
}

#[derive(Debug, Default)]
struct AtlasState {
    /// Stored images in mint order, one per base id on each side.
    primary_images: Vec<RgbaImage>,
    secondary_images: Vec<RgbaImage>,
    /// All four mirror hashes of every stored image.
    variants: HashMap<u64, Variant>,
    /// Rendered-metatile memo; ids here still carry the marker bit while
    /// the builder is open.
    memo: HashMap<MetatileKey, LayerIds>,
    finalized: bool,
}

/// Deduplicating atlas builder for one tileset pair. Shared across worker
/// threads through an `Arc`.
#[derive(Debug, Default)]
pub struct AtlasBuilder {
    state: Mutex<AtlasState>,
}

/// The four flip combinations, identity first.
const FLIP_COMBOS: [(bool, bool); 4] = [(false, false), (true, false), (false, true), (true, true)];

fn flip_bits(flip_h: bool, flip_v: bool) -> u32 {
    (if flip_h { FLIP_H } else { 0 }) | (if flip_v { FLIP_V } else { 0 })
}

/// Content hash of an image traversed in a mirrored orientation. Hashing the
/// traversal instead of materializing the mirror keeps the mint path to a
/// single image clone.
fn orientation_hash(image: &RgbaImage, flip_h: bool, flip_v: bool) -> u64 {
    let (w, h) = image.dimensions();
    let mut hasher = DefaultHasher::new();
    w.hash(&mut hasher);
    h.hash(&mut hasher);
    for y in 0..h {
        for x in 0..w {
            let sx = if flip_h { w - 1 - x } else { x };
            let sy = if flip_v { h - 1 - y } else { y };
            image.get_pixel(sx, sy).0.hash(&mut hasher);
        }
    }
    hasher.finish()
}

impl AtlasBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids already assigned for a metatile key, if it was rendered before.
    /// Callers check this first and skip composition entirely on a hit.
    pub fn cached_ids(&self, key: &MetatileKey) -> Option<LayerIds> {
        self.state.lock().unwrap().memo.get(key).copied()
    }

    /// Intern both halves of a composed metatile and memoize the result
    /// under `key`. `secondary` marks ids minted here as provisional
    /// secondary entries. Safe to call twice for the same key from racing
    /// workers; the first registration wins and both see the same ids.
    ///
    /// # Panics
    ///
    /// Panics if the builder has been finalized.
    pub fn process_metatile(
        &self,
        key: MetatileKey,
        bottom: &RgbaImage,
        top: &RgbaImage,
        secondary: bool,
    ) -> LayerIds {
        let mut state = self.state.lock().unwrap();
        assert!(
            !state.finalized,
            "process_metatile on a finalized atlas builder"
        );
        if let Some(ids) = state.memo.get(&key) {
            return *ids;
        }
        let ids = LayerIds {
            bottom: intern_locked(&mut state, bottom, secondary),
            top: intern_locked(&mut state, top, secondary),
        };
        state.memo.insert(key, ids);
        ids
    }

    /// Intern a single image through the same dedup path as metatile halves.
    /// Animation frames come in this way.
    ///
    /// # Panics
    ///
    /// Panics if the builder has been finalized.
    pub fn intern_image(&self, image: &RgbaImage, secondary: bool) -> u32 {
        let mut state = self.state.lock().unwrap();
        assert!(!state.finalized, "intern_image on a finalized atlas builder");
        intern_locked(&mut state, image, secondary)
    }

    /// Unique images stored so far, both sides combined.
    pub fn entry_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.primary_images.len() + state.secondary_images.len()
    }

    /// Unique primary-side images stored so far; the offset applied to
    /// secondary ids at finalization.
    pub fn primary_count(&self) -> u32 {
        self.state.lock().unwrap().primary_images.len() as u32
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().unwrap().finalized
    }

    /// Rewrite a provisional id against a known primary count: the marker
    /// clears, the base shifts by `primary_count`, flip bits survive
    /// untouched. Ids without the marker pass through unchanged.
    pub fn resolve_id(id: u32, primary_count: u32) -> u32 {
        if id & SECONDARY_MARKER == 0 {
            return id;
        }
        let flips = id & (FLIP_H | FLIP_V);
        let base = id & ID_MASK;
        flips | (base + primary_count)
    }

    /// Close the builder for insertion and resolve every provisional id to
    /// `base + primary_count`. Returns the fully resolved memo table for
    /// the map writer.
    ///
    /// # Panics
    ///
    /// Panics when called twice.
    pub fn finalize(&self, primary_count: u32) -> HashMap<MetatileKey, LayerIds> {
        let mut state = self.state.lock().unwrap();
        assert!(!state.finalized, "finalize called twice on atlas builder");
        state.finalized = true;
        for ids in state.memo.values_mut() {
            ids.bottom = Self::resolve_id(ids.bottom, primary_count);
            ids.top = Self::resolve_id(ids.top, primary_count);
        }
        state.memo.clone()
    }

    /// Lay the stored images out in final id order, primary entries then
    /// secondary, into a 16-column grid over a transparent background. An
    /// empty builder yields a one-cell transparent placeholder so downstream
    /// consumers need no special case.
    pub fn build_atlas_image(&self) -> RgbaImage {
        let state = self.state.lock().unwrap();
        let total = (state.primary_images.len() + state.secondary_images.len()) as u32;
        if total == 0 {
            return RgbaImage::new(METATILE_SIZE, METATILE_SIZE);
        }
        let columns = ATLAS_COLUMNS.min(total);
        let rows = (total + ATLAS_COLUMNS - 1) / ATLAS_COLUMNS;
        let mut out = RgbaImage::new(columns * METATILE_SIZE, rows * METATILE_SIZE);

        let all = state
            .primary_images
            .iter()
            .chain(state.secondary_images.iter());
        for (index, tile) in all.enumerate() {
            let cx = (index as u32 % ATLAS_COLUMNS) * METATILE_SIZE;
            let cy = (index as u32 / ATLAS_COLUMNS) * METATILE_SIZE;
            for (x, y, pixel) in tile.enumerate_pixels() {
                if cx + x < out.width() && cy + y < out.height() {
                    out.put_pixel(cx + x, cy + y, *pixel);
                }
            }
        }
        out
    }
}

/// Assign an id to an image under the builder lock. Walks the four flip
/// combinations of the incoming image against the variant map; a hit reuses
/// the stored base id with XOR-combined flip bits, a miss mints a new id and
/// registers all four mirror hashes of the stored image.
fn intern_locked(state: &mut AtlasState, image: &RgbaImage, secondary: bool) -> u32 {
    for (fh, fv) in FLIP_COMBOS {
        let hash = orientation_hash(image, fh, fv);
        if let Some(variant) = state.variants.get(&hash) {
            return variant.id | flip_bits(variant.flip_h ^ fh, variant.flip_v ^ fv);
        }
    }

    let (images, marker) = if secondary {
        (&mut state.secondary_images, SECONDARY_MARKER)
    } else {
        (&mut state.primary_images, 0)
    };
    let base = images.len() as u32 + 1;
    assert!(base <= ID_MASK, "atlas id space exhausted");
    images.push(image.clone());
    let id = base | marker;

    for (fh, fv) in FLIP_COMBOS {
        let hash = orientation_hash(image, fh, fv);
        state.variants.entry(hash).or_insert(Variant {
            id,
            flip_h: fh,
            flip_v: fv,
        });
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// An asymmetric 16x16 test image parameterized by a seed.
    fn asym_image(seed: u8) -> RgbaImage {
        let mut img = RgbaImage::new(METATILE_SIZE, METATILE_SIZE);
        for y in 0..METATILE_SIZE {
            for x in 0..METATILE_SIZE {
                let v = seed.wrapping_add((x * 3) as u8).wrapping_add((y * 7) as u8);
                img.put_pixel(x, y, Rgba([v, x as u8, y as u8, 255]));
            }
        }
        img
    }

    fn mirrored(img: &RgbaImage, flip_h: bool, flip_v: bool) -> RgbaImage {
        let (w, h) = img.dimensions();
        let mut out = RgbaImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let sx = if flip_h { w - 1 - x } else { x };
                let sy = if flip_v { h - 1 - y } else { y };
                out.put_pixel(x, y, *img.get_pixel(sx, sy));
            }
        }
        out
    }

    fn key(id: u16, tileset: &str) -> MetatileKey {
        MetatileKey {
            metatile_id: id,
            tileset: tileset.to_string(),
            layer_type: LayerType::Normal,
        }
    }

    #[test]
    fn test_mirror_dedup_single_entry() {
        let builder = AtlasBuilder::new();
        let img = asym_image(1);

        let base = builder.intern_image(&img, false);
        assert_eq!(base, 1);

        let h = builder.intern_image(&mirrored(&img, true, false), false);
        let v = builder.intern_image(&mirrored(&img, false, true), false);
        let hv = builder.intern_image(&mirrored(&img, true, true), false);

        assert_eq!(h, 1 | FLIP_H);
        assert_eq!(v, 1 | FLIP_V);
        assert_eq!(hv, 1 | FLIP_H | FLIP_V);
        assert_eq!(builder.entry_count(), 1);
    }

    #[test]
    fn test_mirror_of_mirror_combines_flips() {
        let builder = AtlasBuilder::new();
        let img = asym_image(9);
        // Store the H-mirror first; the original must come back as the
        // H-flip of the stored base.
        let first = builder.intern_image(&mirrored(&img, true, false), false);
        assert_eq!(first, 1);
        let original = builder.intern_image(&img, false);
        assert_eq!(original, 1 | FLIP_H);
        // And the HV mirror of the original is the V-flip of the base.
        let hv = builder.intern_image(&mirrored(&img, true, true), false);
        assert_eq!(hv, 1 | FLIP_V);
        assert_eq!(builder.entry_count(), 1);
    }

    #[test]
    fn test_distinct_images_distinct_ids() {
        let builder = AtlasBuilder::new();
        assert_eq!(builder.intern_image(&asym_image(1), false), 1);
        assert_eq!(builder.intern_image(&asym_image(2), false), 2);
        assert_eq!(builder.entry_count(), 2);
    }

    #[test]
    fn test_memoization_no_duplicate_entries() {
        let builder = AtlasBuilder::new();
        let bottom = asym_image(3);
        let top = asym_image(4);

        let first = builder.process_metatile(key(7, "general"), &bottom, &top, false);
        let count = builder.entry_count();
        let second = builder.process_metatile(key(7, "general"), &bottom, &top, false);

        assert_eq!(first, second);
        assert_eq!(builder.entry_count(), count);
        assert_eq!(builder.cached_ids(&key(7, "general")), Some(first));
        assert_eq!(builder.cached_ids(&key(8, "general")), None);
    }

    #[test]
    fn test_no_cross_tileset_key_aliasing() {
        // Same metatile id on different tilesets composes different pixels;
        // the memo key keeps them apart and each gets its own entry.
        let builder = AtlasBuilder::new();
        let a = builder.process_metatile(key(5, "general"), &asym_image(1), &asym_image(2), false);
        let b = builder.process_metatile(key(5, "lavaridge"), &asym_image(5), &asym_image(6), false);
        assert_ne!(a.bottom, b.bottom);
        assert_ne!(a.top, b.top);
        assert_eq!(builder.entry_count(), 4);
    }

    #[test]
    fn test_secondary_marker_and_resolution() {
        let builder = AtlasBuilder::new();
        let p = builder.intern_image(&asym_image(1), false);
        let s = builder.intern_image(&mirrored(&asym_image(2), true, false), true);
        assert_eq!(p, 1);
        assert_eq!(s, 1 | SECONDARY_MARKER);

        // A mirror of the secondary image keeps the marker and gains flips.
        let s_flip = builder.intern_image(&asym_image(2), true);
        assert_eq!(s_flip, 1 | SECONDARY_MARKER | FLIP_H);

        // The marker clears, the base shifts, the flips survive.
        let resolved = AtlasBuilder::resolve_id(s_flip, 40);
        assert_eq!(resolved, (1 + 40) | FLIP_H);
        // Non-provisional ids pass through.
        assert_eq!(AtlasBuilder::resolve_id(p | FLIP_V, 40), 1 | FLIP_V);
    }

    #[test]
    fn test_cross_side_dedup_reuses_first_mint() {
        // An image minted on the primary side is found again when a
        // secondary metatile produces identical pixels.
        let builder = AtlasBuilder::new();
        let img = asym_image(8);
        let p = builder.intern_image(&img, false);
        let again = builder.intern_image(&img, true);
        assert_eq!(p, again);
        assert_eq!(builder.entry_count(), 1);
    }

    #[test]
    fn test_finalize_rewrites_memo() {
        let builder = AtlasBuilder::new();
        builder.process_metatile(key(0, "general"), &asym_image(1), &asym_image(2), false);
        builder.process_metatile(key(1, "fallarbor"), &asym_image(3), &asym_image(4), true);

        let primary_count = builder.primary_count();
        assert_eq!(primary_count, 2);
        let resolved = builder.finalize(primary_count);

        let sec = resolved[&key(1, "fallarbor")];
        assert_eq!(sec.bottom & SECONDARY_MARKER, 0);
        assert_eq!(sec.bottom & ID_MASK, 3);
        assert_eq!(sec.top & ID_MASK, 4);
        assert!(builder.is_finalized());
    }

    #[test]
    #[should_panic(expected = "finalized")]
    fn test_mutation_after_finalize_panics() {
        let builder = AtlasBuilder::new();
        builder.finalize(0);
        builder.intern_image(&asym_image(1), false);
    }

    #[test]
    #[should_panic(expected = "finalize called twice")]
    fn test_double_finalize_panics() {
        let builder = AtlasBuilder::new();
        builder.finalize(0);
        builder.finalize(0);
    }

    #[test]
    fn test_atlas_layout_and_placeholder() {
        let builder = AtlasBuilder::new();
        let placeholder = builder.build_atlas_image();
        assert_eq!(placeholder.dimensions(), (METATILE_SIZE, METATILE_SIZE));
        assert!(placeholder.pixels().all(|p| p[3] == 0));

        for seed in 0..18u8 {
            builder.intern_image(&asym_image(seed), false);
        }
        let atlas = builder.build_atlas_image();
        // 18 entries: 16 columns, 2 rows.
        assert_eq!(atlas.dimensions(), (16 * METATILE_SIZE, 2 * METATILE_SIZE));
        // Entry 1 sits at the origin, entry 17 starts row two.
        assert_eq!(atlas.get_pixel(0, 0), asym_image(0).get_pixel(0, 0));
        assert_eq!(
            atlas.get_pixel(0, METATILE_SIZE),
            asym_image(16).get_pixel(0, 0)
        );
    }

    #[test]
    fn test_secondary_entries_follow_primary_in_layout() {
        let builder = AtlasBuilder::new();
        builder.intern_image(&asym_image(1), false);
        builder.intern_image(&asym_image(2), true);
        let atlas = builder.build_atlas_image();
        assert_eq!(atlas.dimensions(), (2 * METATILE_SIZE, METATILE_SIZE));
        assert_eq!(
            atlas.get_pixel(METATILE_SIZE, 0),
            asym_image(2).get_pixel(0, 0)
        );
    }
}
