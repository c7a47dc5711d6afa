//! gbatlas - Library for converting GBA tileset assets into tile atlases
//!
//! This library provides functionality to:
//! - Decode indexed tileset PNGs directly from their compressed bytes
//! - Compose 8x8 tile primitives into 16x16 metatile images
//! - Deduplicate composed images (including mirror variants) into shared,
//!   stably-addressed atlases
//! - Bind atlas entries to tileset animation frame sequences

pub mod anim;
pub mod atlas;
pub mod cli;
pub mod compose;
pub mod convert;
pub mod indexed;
pub mod metatile;
pub mod output;
pub mod palette;
pub mod registry;
pub mod tileset;
