//! Tileset animation declarations and per-atlas-entry binding.
//!
//! GBA tilesets animate by DMA-copying frame tiles over a fixed VRAM range
//! every few ticks; the frames live as indexed images in
//! `anim/<folder>/<n>.png` under the tileset directory. This module carries
//! the declaration table (which VRAM range each named animation covers),
//! watches composed metatiles for references into those ranges, and binds
//! the affected atlas entries to their frame sequences.
//!
//! Everything degrades to "no binding": a missing frame folder, a
//! wrong-sized frame, or an undeclared tileset simply produces no
//! animation output for that entry.

use crate::atlas::{AtlasBuilder, LayerIds};
use crate::compose;
use crate::indexed;
use crate::metatile::{Metatile, METATILE_SIZE, PRIMARY_VRAM_TILES};
use crate::tileset::{camel_to_snake, display_name, TilesetCache};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;

/// Default frame duration: 8 ticks at 60 fps.
pub const DEFAULT_FRAME_DURATION_MS: u32 = 133;

/// One declared tileset animation: a VRAM tile range fed from a frame
/// folder. `base_tile` is relative to the owning tileset's raster; for
/// secondary tilesets the range lands at `base_tile + 512` in VRAM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationDef {
    pub name: String,
    pub base_tile: u16,
    pub tile_count: u16,
    pub frame_folder: String,
    #[serde(default = "default_duration")]
    pub frame_duration_ms: u32,
    /// Playback order as frame-file indices. `None` plays linearly.
    #[serde(default)]
    pub frame_sequence: Option<Vec<usize>>,
    /// Whether the declaring tileset is a secondary tileset.
    #[serde(default)]
    pub secondary: bool,
}

fn default_duration() -> u32 {
    DEFAULT_FRAME_DURATION_MS
}

impl AnimationDef {
    /// The VRAM tile-id range this animation overwrites, as seen from a
    /// consuming metatile. A secondary tileset's tiles sit past the primary
    /// VRAM block, so the range shifts by 512 when both the animation and
    /// the consumer are secondary-owned.
    pub fn vram_range(&self, consumer_secondary: bool) -> std::ops::Range<u16> {
        let base = if self.secondary && consumer_secondary {
            self.base_tile + PRIMARY_VRAM_TILES
        } else {
            self.base_tile
        };
        base..base.saturating_add(self.tile_count)
    }
}

/// The animation declarations of every known tileset, keyed by snake-case
/// tileset name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnimationCatalog {
    tilesets: HashMap<String, Vec<AnimationDef>>,
}

impl AnimationCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a catalog override from a JSON file: a map from snake-case
    /// tileset name to a list of [`AnimationDef`] objects.
    pub fn from_json_file(path: &Path) -> Result<Self, AnimationCatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| AnimationCatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let tilesets = serde_json::from_str(&text).map_err(|source| {
            AnimationCatalogError::Parse {
                path: path.display().to_string(),
                source,
            }
        })?;
        Ok(Self { tilesets })
    }

    /// Declarations for a tileset, accepting symbol ids (`gTileset_General`),
    /// display names, or snake-case names.
    pub fn for_tileset(&self, name: &str) -> &[AnimationDef] {
        let snake = camel_to_snake(display_name(name));
        self.tilesets.get(&snake).map_or(&[], Vec::as_slice)
    }

    pub fn get_def(&self, tileset: &str, animation: &str) -> Option<&AnimationDef> {
        self.for_tileset(tileset).iter().find(|d| d.name == animation)
    }

    pub fn insert(&mut self, tileset: &str, def: AnimationDef) {
        self.tilesets.entry(tileset.to_string()).or_default().push(def);
    }

    /// The animation table of vanilla pokeemerald, transcribed from the
    /// VRAM offsets in `tileset_anims.c`.
    pub fn builtin() -> Self {
        fn def(
            name: &str,
            base_tile: u16,
            tile_count: u16,
            secondary: bool,
            frame_sequence: Option<&[usize]>,
        ) -> AnimationDef {
            AnimationDef {
                name: name.to_string(),
                base_tile,
                tile_count,
                frame_folder: name.to_string(),
                frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
                frame_sequence: frame_sequence.map(<[usize]>::to_vec),
                secondary,
            }
        }

        let mut catalog = Self::default();
        let mut add = |tileset: &str, defs: Vec<AnimationDef>| {
            catalog.tilesets.insert(tileset.to_string(), defs);
        };

        add(
            "general",
            vec![
                def("flower", 508, 4, false, Some(&[0, 1, 0, 2])),
                def("water", 432, 30, false, Some(&[0, 1, 2, 3, 4, 5, 6, 7])),
                def("sand_water_edge", 464, 10, false, Some(&[0, 1, 2, 3, 4, 5, 6, 0])),
                def("waterfall", 496, 6, false, Some(&[0, 1, 2, 3])),
                def("land_water_edge", 480, 10, false, Some(&[0, 1, 2, 3])),
            ],
        );
        add("building", vec![def("tv_turned_on", 496, 4, false, None)]);
        add(
            "rustboro",
            vec![
                def("windy_water", 128, 8, true, None),
                def("fountain", 448, 4, true, None),
            ],
        );
        add("dewford", vec![def("flag", 170, 6, true, None)]);
        add("slateport", vec![def("balloons", 224, 4, true, None)]);
        add(
            "mauville",
            vec![
                def("flower_1", 96, 4, true, None),
                def("flower_2", 128, 4, true, None),
            ],
        );
        add(
            "lavaridge",
            vec![
                def("steam", 288, 4, true, Some(&[0, 1, 2, 3])),
                def("lava", 160, 4, true, Some(&[0, 1, 2, 3])),
            ],
        );
        add("ever_grande", vec![def("flowers", 224, 4, true, None)]);
        add(
            "pacifidlog",
            vec![
                def("log_bridges", 464, 30, true, Some(&[0, 1, 2, 1])),
                def("water_currents", 496, 8, true, Some(&[0, 1, 2, 3, 4, 5, 6, 7])),
            ],
        );
        add("sootopolis", vec![def("stormy_water", 240, 96, true, None)]);
        add("underwater", vec![def("seaweed", 496, 4, true, Some(&[0, 1, 2, 3]))]);
        add("cave", vec![def("lava", 416, 4, true, Some(&[0, 1, 2, 3]))]);
        add(
            "battle_frontier_outside_west",
            vec![def("flag", 218, 6, true, None)],
        );
        add(
            "battle_frontier_outside_east",
            vec![def("flag", 218, 6, true, None)],
        );
        add("mauville_gym", vec![def("electric_gates", 144, 16, true, None)]);
        add(
            "sootopolis_gym",
            vec![
                def("side_waterfall", 496, 12, true, None),
                def("front_waterfall", 464, 20, true, None),
            ],
        );
        add(
            "elite_four",
            vec![
                def("floor_light", 480, 4, true, None),
                def("wall_lights", 504, 1, true, None),
            ],
        );
        add("bike_shop", vec![def("blinking_lights", 496, 9, true, None)]);
        add(
            "battle_pyramid",
            vec![
                def("torch", 151, 8, true, None),
                def("statue_shadow", 135, 8, true, None),
            ],
        );
        catalog
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnimationCatalogError {
    #[error("cannot read animation catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid animation catalog {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One atlas entry bound to an animation's frame sequence. The ids are
/// provisional until the owning builder finalizes; the converter resolves
/// them before emitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnimationBinding {
    pub atlas_id: u32,
    pub tileset: String,
    pub animation: String,
    pub frame_ids: Vec<u32>,
    pub frame_duration_ms: u32,
}

/// A recorded hit: this atlas entry's bottom layer touched an animated VRAM
/// range, drawn with this palette slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Usage {
    tileset: String,
    animation: String,
    atlas_id: u32,
    palette: u8,
}

/// Collects animated-range usages during composition and resolves them to
/// frame bindings afterwards. Shared across worker threads like the atlas
/// builder it feeds.
#[derive(Debug, Default)]
pub struct AnimationBinder {
    usages: Mutex<BTreeSet<Usage>>,
}

impl AnimationBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a composed metatile's bottom layer against the declared
    /// animated ranges of its owning tileset and record a usage per hit.
    /// Only the bottom layer is checked; vanilla animations never touch
    /// tiles that appear exclusively on top layers.
    pub fn track_usage(
        &self,
        catalog: &AnimationCatalog,
        tileset_name: &str,
        consumer_secondary: bool,
        metatile: &Metatile,
        ids: LayerIds,
    ) {
        let defs = catalog.for_tileset(tileset_name);
        if defs.is_empty() {
            return;
        }
        let snake = camel_to_snake(display_name(tileset_name));
        for def in defs {
            let range = def.vram_range(consumer_secondary);
            let hit = metatile
                .bottom
                .iter()
                .find(|r| !r.is_empty() && range.contains(&r.tile_id));
            if let Some(tile_ref) = hit {
                self.usages.lock().unwrap().insert(Usage {
                    tileset: snake.clone(),
                    animation: def.name.clone(),
                    atlas_id: ids.bottom,
                    palette: tile_ref.palette,
                });
            }
        }
    }

    pub fn usage_count(&self) -> usize {
        self.usages.lock().unwrap().len()
    }

    /// Resolve every recorded usage to a frame binding: decode the frame
    /// images, recolor them with the usage's palette slot, intern them
    /// through the pair's atlas builder, and order them by the declared
    /// frame sequence. Usages whose frames are missing or malformed yield
    /// no binding. Each atlas id gets at most one binding; when its tiles
    /// straddle two declared ranges, the first usage in
    /// (tileset, animation, palette) order wins.
    ///
    /// Must run before the builder finalizes; the returned ids still carry
    /// provisional markers.
    pub fn resolve(
        &self,
        catalog: &AnimationCatalog,
        cache: &TilesetCache,
        builder: &AtlasBuilder,
        primary_tileset: &str,
        secondary_tileset: Option<&str>,
    ) -> Vec<AnimationBinding> {
        let primary_palettes = cache.palette_set(primary_tileset);
        let secondary_palettes = secondary_tileset.and_then(|name| cache.palette_set(name));

        let usages = self.usages.lock().unwrap().clone();
        let mut bindings = Vec::new();
        let mut bound_ids = std::collections::HashSet::new();
        let mut frame_cache: HashMap<(String, String, u8), Option<Vec<u32>>> = HashMap::new();

        for usage in usages {
            if bound_ids.contains(&usage.atlas_id) {
                continue;
            }
            let Some(def) = catalog.get_def(&usage.tileset, &usage.animation) else {
                continue;
            };
            let cache_key = (usage.tileset.clone(), usage.animation.clone(), usage.palette);
            let frame_ids = frame_cache
                .entry(cache_key)
                .or_insert_with(|| {
                    load_frames(
                        cache,
                        builder,
                        &usage.tileset,
                        def,
                        usage.palette,
                        primary_palettes.as_deref(),
                        secondary_palettes.as_deref(),
                    )
                })
                .clone();
            if let Some(frame_ids) = frame_ids {
                bound_ids.insert(usage.atlas_id);
                bindings.push(AnimationBinding {
                    atlas_id: usage.atlas_id,
                    tileset: usage.tileset,
                    animation: usage.animation,
                    frame_ids,
                    frame_duration_ms: def.frame_duration_ms,
                });
            }
        }
        bindings
    }
}

/// Decode, recolor, and intern one animation's frames, returning the interned
/// ids in declared playback order. `None` when any piece is missing. The
/// whole set is validated before the first intern, so a bad frame never
/// leaves orphan entries in the atlas.
fn load_frames(
    cache: &TilesetCache,
    builder: &AtlasBuilder,
    tileset: &str,
    def: &AnimationDef,
    palette_slot: u8,
    primary_palettes: Option<&crate::palette::PaletteSet>,
    secondary_palettes: Option<&crate::palette::PaletteSet>,
) -> Option<Vec<u32>> {
    let folder = cache.anim_dir(tileset)?.join(&def.frame_folder);
    let pattern = folder.join("*.png");
    let mut frames: Vec<(usize, std::path::PathBuf)> = Vec::new();
    for entry in glob::glob(pattern.to_str()?).ok()? {
        let path = entry.ok()?;
        let index: usize = path.file_stem()?.to_str()?.parse().ok()?;
        frames.push((index, path));
    }
    if frames.is_empty() {
        return None;
    }
    frames.sort_by_key(|(index, _)| *index);

    let mut images = Vec::with_capacity(frames.len());
    for (_, path) in &frames {
        let bytes = std::fs::read(path).ok()?;
        let raster = indexed::decode(&bytes).ok()?;
        if raster.width != METATILE_SIZE || raster.height != METATILE_SIZE {
            return None;
        }
        images.push(compose::recolor(
            &raster,
            primary_palettes,
            secondary_palettes,
            palette_slot,
        ));
    }
    if let Some(sequence) = &def.frame_sequence {
        if sequence.iter().any(|&i| i >= images.len()) {
            return None;
        }
    }

    let interned: Vec<u32> = images
        .iter()
        .map(|image| builder.intern_image(image, def.secondary))
        .collect();
    Some(match &def.frame_sequence {
        Some(sequence) => sequence.iter().map(|&i| interned[i]).collect(),
        None => interned,
    })
}
