//! Tileset asset discovery, loading, and caching.
//!
//! Maps name their tilesets with C symbol ids (`gTileset_General`); on disk
//! the assets live under `data/tilesets/{primary,secondary}/<snake_name>/`
//! as `tiles.png`, `palettes/NN.pal`, `metatiles.bin`,
//! `metatile_attributes.bin`, and optionally `anim/<folder>/<n>.png`.
//!
//! Every lookup is memoized, including misses, so a tileset shared by fifty
//! maps decodes once and a missing tileset warns once. The cache is shared
//! across worker threads; each table has its own lock and none is held
//! during file IO or decoding, so two threads may race to load the same
//! asset and the second result is simply dropped.

use crate::indexed::{self, IndexedRaster};
use crate::metatile::{self, LayerType, TileRef};
use crate::palette::PaletteSet;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A non-fatal asset problem, collected for one report at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetWarning {
    pub tileset: String,
    pub message: String,
}

impl fmt::Display for AssetWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tileset '{}': {}", self.tileset, self.message)
    }
}

/// Strip the C symbol prefix from a tileset id: `gTileset_General` ->
/// `General`. Names without the prefix pass through.
pub fn display_name(tileset_id: &str) -> &str {
    tileset_id.strip_prefix("gTileset_").unwrap_or(tileset_id)
}

/// Convert a CamelCase tileset name to the snake_case directory convention:
/// `InsideShip` -> `inside_ship`, `BattleFrontierOutsideWest` ->
/// `battle_frontier_outside_west`.
pub fn camel_to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            let boundary = prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower);
            if boundary && prev != '_' {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// Directory-name candidates for a tileset, tried in order. Real trees are
/// inconsistent about naming, so three spellings are accepted.
fn name_variants(name: &str) -> Vec<String> {
    let mut variants = vec![
        camel_to_snake(name),
        name.to_lowercase(),
        name.replace('_', "").to_lowercase(),
    ];
    variants.dedup();
    variants
}

/// Shared loader for tileset assets rooted at a source tree. All lookups,
/// including failed ones, are cached.
#[derive(Debug)]
pub struct TilesetCache {
    root: PathBuf,
    dirs: Mutex<HashMap<String, Option<PathBuf>>>,
    rasters: Mutex<HashMap<String, Option<Arc<IndexedRaster>>>>,
    palettes: Mutex<HashMap<String, Option<Arc<PaletteSet>>>>,
    refs: Mutex<HashMap<String, Option<Arc<Vec<TileRef>>>>>,
    layers: Mutex<HashMap<String, Option<Arc<Vec<LayerType>>>>>,
    warnings: Mutex<Vec<AssetWarning>>,
}

impl TilesetCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs: Mutex::new(HashMap::new()),
            rasters: Mutex::new(HashMap::new()),
            palettes: Mutex::new(HashMap::new()),
            refs: Mutex::new(HashMap::new()),
            layers: Mutex::new(HashMap::new()),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn warn(&self, tileset: &str, message: impl Into<String>) {
        let warning = AssetWarning {
            tileset: tileset.to_string(),
            message: message.into(),
        };
        let mut warnings = self.warnings.lock().unwrap();
        if !warnings.contains(&warning) {
            warnings.push(warning);
        }
    }

    /// Drain the warnings collected so far.
    pub fn take_warnings(&self) -> Vec<AssetWarning> {
        std::mem::take(&mut self.warnings.lock().unwrap())
    }

    /// Resolve a tileset name to its directory, trying the primary category
    /// first, then secondary, then the flat legacy layout.
    pub fn tileset_dir(&self, name: &str) -> Option<PathBuf> {
        let name = display_name(name);
        if let Some(cached) = self.dirs.lock().unwrap().get(name) {
            return cached.clone();
        }

        let tilesets = self.root.join("data").join("tilesets");
        let mut found = None;
        'search: for variant in name_variants(name) {
            for category in ["primary", "secondary"] {
                let candidate = tilesets.join(category).join(&variant);
                if candidate.is_dir() {
                    found = Some(candidate);
                    break 'search;
                }
            }
        }
        if found.is_none() {
            for variant in name_variants(name) {
                let candidate = tilesets.join(&variant);
                if candidate.is_dir() {
                    found = Some(candidate);
                    break;
                }
            }
        }

        if found.is_none() {
            self.warn(name, "no tileset directory found");
        }
        self.dirs
            .lock()
            .unwrap()
            .insert(name.to_string(), found.clone());
        found
    }

    /// The decoded `tiles.png` raster of a tileset.
    pub fn raster(&self, name: &str) -> Option<Arc<IndexedRaster>> {
        let name = display_name(name);
        if let Some(cached) = self.rasters.lock().unwrap().get(name) {
            return cached.clone();
        }

        let loaded = self.load_raster(name);
        self.rasters
            .lock()
            .unwrap()
            .insert(name.to_string(), loaded.clone());
        loaded
    }

    fn load_raster(&self, name: &str) -> Option<Arc<IndexedRaster>> {
        let path = self.tileset_dir(name)?.join("tiles.png");
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.warn(name, format!("cannot read {}: {err}", path.display()));
                return None;
            }
        };
        match indexed::decode(&bytes) {
            Ok(raster) => Some(Arc::new(raster)),
            Err(err) => {
                self.warn(name, format!("cannot decode {}: {err}", path.display()));
                None
            }
        }
    }

    /// The sub-palettes of a tileset. Missing palette files leave empty
    /// slots rather than failing; a fully absent directory still yields a
    /// set (all slots empty) so composition falls back to grayscale.
    pub fn palette_set(&self, name: &str) -> Option<Arc<PaletteSet>> {
        let name = display_name(name);
        if let Some(cached) = self.palettes.lock().unwrap().get(name) {
            return cached.clone();
        }

        let loaded = self
            .tileset_dir(name)
            .map(|dir| Arc::new(PaletteSet::load(&dir)));
        if let Some(set) = &loaded {
            if set.loaded_count() == 0 {
                self.warn(name, "no palette files loaded; rendering grayscale");
            }
        }
        self.palettes
            .lock()
            .unwrap()
            .insert(name.to_string(), loaded.clone());
        loaded
    }

    /// The packed tile references of a tileset's `metatiles.bin`.
    pub fn tile_refs(&self, name: &str) -> Option<Arc<Vec<TileRef>>> {
        let name = display_name(name);
        if let Some(cached) = self.refs.lock().unwrap().get(name) {
            return cached.clone();
        }

        let loaded = self.tileset_dir(name).and_then(|dir| {
            let path = dir.join("metatiles.bin");
            match std::fs::read(&path) {
                Ok(bytes) => Some(Arc::new(metatile::read_tile_refs(&bytes))),
                Err(err) => {
                    self.warn(name, format!("cannot read {}: {err}", path.display()));
                    None
                }
            }
        });
        self.refs
            .lock()
            .unwrap()
            .insert(name.to_string(), loaded.clone());
        loaded
    }

    /// Per-metatile layer types from `metatile_attributes.bin`. An absent
    /// file is common and yields an empty table (everything `Normal`).
    pub fn layer_types(&self, name: &str) -> Arc<Vec<LayerType>> {
        let name = display_name(name);
        if let Some(cached) = self.layers.lock().unwrap().get(name) {
            if let Some(cached) = cached {
                return Arc::clone(cached);
            }
            return Arc::new(Vec::new());
        }

        let loaded = self.tileset_dir(name).and_then(|dir| {
            std::fs::read(dir.join("metatile_attributes.bin"))
                .ok()
                .map(|bytes| Arc::new(metatile::read_layer_types(&bytes)))
        });
        self.layers
            .lock()
            .unwrap()
            .insert(name.to_string(), loaded.clone());
        loaded.unwrap_or_else(|| Arc::new(Vec::new()))
    }

    /// The `anim/` directory of a tileset, if it has one.
    pub fn anim_dir(&self, name: &str) -> Option<PathBuf> {
        let dir = self.tileset_dir(name)?.join("anim");
        dir.is_dir().then_some(dir)
    }
}
