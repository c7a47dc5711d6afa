//! The conversion pipeline: maps in, per-pair atlases out.
//!
//! Each map names a primary tileset and optionally a secondary one; maps
//! sharing the same pair share one atlas builder and one animation binder,
//! looked up through the registry. Map jobs run in parallel; composition
//! happens outside any lock and only the intern step serializes on the
//! builder. Once every job has contributed, a sequential finish pass
//! resolves animations, finalizes each builder, and rewrites the
//! provisional secondary ids everywhere they escaped.

use crate::anim::{AnimationBinder, AnimationBinding, AnimationCatalog};
use crate::atlas::{AtlasBuilder, LayerIds, MetatileKey};
use crate::compose;
use crate::metatile::{self, LayerType, METATILES_IN_PRIMARY};
use crate::registry::{pair_key, Registry};
use crate::tileset::{display_name, AssetWarning, TilesetCache};
use image::RgbaImage;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Mutex;

/// One map to convert: its tileset pair and the metatile ids it actually
/// places. `None` ids means every metatile the pair's tables define.
#[derive(Debug, Clone)]
pub struct MapJob {
    pub name: String,
    pub primary: String,
    pub secondary: Option<String>,
    pub metatile_ids: Option<Vec<u16>>,
}

impl MapJob {
    /// A job covering the full metatile tables of a pair.
    pub fn full_pair(
        name: impl Into<String>,
        primary: impl Into<String>,
        secondary: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            primary: primary.into(),
            secondary,
            metatile_ids: None,
        }
    }
}

/// Resolved ids for one metatile of a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetatileAssignment {
    pub metatile_id: u16,
    pub layer_type: LayerType,
    pub bottom: u32,
    pub top: u32,
}

/// Per-map output: which atlas it uses and what each metatile id became.
#[derive(Debug, Clone, Serialize)]
pub struct MapManifest {
    pub name: String,
    pub atlas: String,
    pub metatiles: Vec<MetatileAssignment>,
}

/// One finished atlas with everything that references it.
#[derive(Debug)]
pub struct PairAtlas {
    pub key: String,
    pub image: RgbaImage,
    pub entry_count: usize,
    pub primary_count: u32,
    pub animations: Vec<AnimationBinding>,
    pub maps: Vec<MapManifest>,
}

#[derive(Debug, Clone)]
struct MapRecord {
    name: String,
    entries: Vec<(u16, LayerType, LayerIds)>,
}

/// Shared state of one tileset pair while its maps convert.
#[derive(Debug)]
struct PairState {
    primary: String,
    secondary: Option<String>,
    builder: AtlasBuilder,
    binder: AnimationBinder,
    maps: Mutex<Vec<MapRecord>>,
}

impl PairState {
    fn new(primary: String, secondary: Option<String>) -> Self {
        Self {
            primary,
            secondary,
            builder: AtlasBuilder::new(),
            binder: AnimationBinder::new(),
            maps: Mutex::new(Vec::new()),
        }
    }
}

/// Conversion knobs beyond the input tree itself.
#[derive(Debug, Default)]
pub struct ConvertOptions {
    /// Give every map its own atlas instead of sharing per tileset pair.
    pub per_map: bool,
    pub animations: AnimationCatalog,
}

/// Drives map jobs against a shared asset cache and pair registry.
#[derive(Debug)]
pub struct Converter {
    cache: TilesetCache,
    registry: Registry<PairState>,
    options: ConvertOptions,
}

impl Converter {
    pub fn new(cache: TilesetCache, options: ConvertOptions) -> Self {
        Self {
            cache,
            registry: Registry::new(),
            options,
        }
    }

    /// Run every job, then finalize every pair. The worker phase is
    /// parallel; the finish phase is sequential per pair.
    pub fn convert(&self, jobs: &[MapJob]) -> Vec<PairAtlas> {
        jobs.par_iter().for_each(|job| self.process_map(job));
        self.finish()
    }

    /// Asset problems encountered so far. Draining, so a caller reports
    /// each once.
    pub fn take_warnings(&self) -> Vec<AssetWarning> {
        self.cache.take_warnings()
    }

    /// Convert one map into its pair's shared builder.
    pub fn process_map(&self, job: &MapJob) {
        let key = if self.options.per_map {
            job.name.clone()
        } else {
            pair_key(
                display_name(&job.primary),
                job.secondary.as_deref().map(display_name),
            )
        };
        let state = self.registry.get_or_insert_with(&key, || {
            PairState::new(job.primary.clone(), job.secondary.clone())
        });

        let primary_raster = self.cache.raster(&job.primary);
        let primary_palettes = self.cache.palette_set(&job.primary);
        let primary_refs = self.cache.tile_refs(&job.primary);
        let primary_layers = self.cache.layer_types(&job.primary);

        let secondary_raster = job.secondary.as_deref().and_then(|s| self.cache.raster(s));
        let secondary_palettes = job
            .secondary
            .as_deref()
            .and_then(|s| self.cache.palette_set(s));
        let secondary_refs = job.secondary.as_deref().and_then(|s| self.cache.tile_refs(s));
        let secondary_layers = job
            .secondary
            .as_deref()
            .map(|s| self.cache.layer_types(s));

        let primary_table = primary_refs.as_deref().map_or(&[][..], |r| r.as_slice());
        let secondary_table = secondary_refs.as_deref().map_or(&[][..], |r| r.as_slice());

        let ids: Vec<u16> = match &job.metatile_ids {
            Some(ids) => ids.clone(),
            None => full_id_range(primary_table.len(), secondary_table.len()),
        };

        let mut entries = Vec::with_capacity(ids.len());
        for metatile_id in ids {
            let secondary_owned = metatile_id >= METATILES_IN_PRIMARY;
            let (owner, table, layers, local_id) = if secondary_owned {
                let Some(owner) = job.secondary.as_deref() else {
                    entries.push((metatile_id, LayerType::Normal, LayerIds { bottom: 0, top: 0 }));
                    continue;
                };
                (
                    owner,
                    secondary_table,
                    secondary_layers.as_deref().map_or(&[][..], |l| l.as_slice()),
                    metatile_id - METATILES_IN_PRIMARY,
                )
            } else {
                (
                    job.primary.as_str(),
                    primary_table,
                    primary_layers.as_slice(),
                    metatile_id,
                )
            };

            let Some(metatile) = metatile::metatile_at(table, layers, local_id) else {
                // Outside the table: an empty cell, nothing to intern.
                entries.push((metatile_id, LayerType::Normal, LayerIds { bottom: 0, top: 0 }));
                continue;
            };

            let mkey = MetatileKey {
                metatile_id,
                tileset: display_name(owner).to_string(),
                layer_type: metatile.layer_type,
            };

            let ids = match state.builder.cached_ids(&mkey) {
                Some(ids) => ids,
                None => {
                    let bottom = compose::compose_half(
                        &metatile.bottom,
                        primary_raster.as_deref(),
                        secondary_raster.as_deref(),
                        primary_palettes.as_deref(),
                        secondary_palettes.as_deref(),
                    );
                    let top = compose::compose_half(
                        &metatile.top,
                        primary_raster.as_deref(),
                        secondary_raster.as_deref(),
                        primary_palettes.as_deref(),
                        secondary_palettes.as_deref(),
                    );
                    state
                        .builder
                        .process_metatile(mkey, &bottom, &top, secondary_owned)
                }
            };

            state.binder.track_usage(
                &self.options.animations,
                owner,
                secondary_owned,
                &metatile,
                ids,
            );
            entries.push((metatile_id, metatile.layer_type, ids));
        }

        state.maps.lock().unwrap().push(MapRecord {
            name: job.name.clone(),
            entries,
        });
    }

    /// Finalize every pair: resolve animations while the builder is still
    /// open (frames intern through it), then close it and rewrite the
    /// provisional ids in both the bindings and the per-map assignments.
    pub fn finish(&self) -> Vec<PairAtlas> {
        let mut pairs: Vec<(String, std::sync::Arc<PairState>)> = self.registry.entries();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = Vec::with_capacity(pairs.len());
        for (key, state) in pairs {
            let mut animations = state.binder.resolve(
                &self.options.animations,
                &self.cache,
                &state.builder,
                &state.primary,
                state.secondary.as_deref(),
            );

            let primary_count = state.builder.primary_count();
            state.builder.finalize(primary_count);

            for binding in &mut animations {
                binding.atlas_id = AtlasBuilder::resolve_id(binding.atlas_id, primary_count);
                for id in &mut binding.frame_ids {
                    *id = AtlasBuilder::resolve_id(*id, primary_count);
                }
            }

            let maps = state
                .maps
                .lock()
                .unwrap()
                .iter()
                .map(|record| MapManifest {
                    name: record.name.clone(),
                    atlas: key.clone(),
                    metatiles: record
                        .entries
                        .iter()
                        .map(|&(metatile_id, layer_type, ids)| MetatileAssignment {
                            metatile_id,
                            layer_type,
                            bottom: AtlasBuilder::resolve_id(ids.bottom, primary_count),
                            top: AtlasBuilder::resolve_id(ids.top, primary_count),
                        })
                        .collect(),
                })
                .collect();

            out.push(PairAtlas {
                image: state.builder.build_atlas_image(),
                entry_count: state.builder.entry_count(),
                primary_count,
                animations,
                maps,
                key,
            });
        }
        out
    }
}

/// Every metatile id the pair's tables define: the primary block capped at
/// its table, then the secondary block offset past the primary id space.
fn full_id_range(primary_refs: usize, secondary_refs: usize) -> Vec<u16> {
    let per = crate::metatile::TILES_PER_METATILE;
    let primary_count = (primary_refs / per).min(METATILES_IN_PRIMARY as usize) as u16;
    let secondary_count = (secondary_refs / per).min(METATILES_IN_PRIMARY as usize) as u16;
    (0..primary_count)
        .chain((0..secondary_count).map(|id| id + METATILES_IN_PRIMARY))
        .collect()
}
