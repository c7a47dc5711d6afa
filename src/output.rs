//! Atlas and manifest output

use crate::convert::PairAtlas;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// Error type for output operations
#[derive(Debug)]
pub enum OutputError {
    /// IO error during file operations
    Io(io::Error),
    /// Image encoding error
    Image(image::ImageError),
    /// Manifest serialization error
    Json(serde_json::Error),
}

impl std::fmt::Display for OutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputError::Io(e) => write!(f, "IO error: {}", e),
            OutputError::Image(e) => write!(f, "Image error: {}", e),
            OutputError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for OutputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OutputError::Io(e) => Some(e),
            OutputError::Image(e) => Some(e),
            OutputError::Json(e) => Some(e),
        }
    }
}

impl From<io::Error> for OutputError {
    fn from(e: io::Error) -> Self {
        OutputError::Io(e)
    }
}

impl From<image::ImageError> for OutputError {
    fn from(e: image::ImageError) -> Self {
        OutputError::Image(e)
    }
}

impl From<serde_json::Error> for OutputError {
    fn from(e: serde_json::Error) -> Self {
        OutputError::Json(e)
    }
}

/// Save an RGBA image to a PNG file, creating parent directories as needed.
pub fn save_png(image: &image::RgbaImage, path: &Path) -> Result<(), OutputError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    image.save(path)?;
    Ok(())
}

/// The JSON manifest written next to each atlas PNG.
#[derive(Debug, Serialize)]
struct AtlasManifest<'a> {
    atlas: String,
    entry_count: usize,
    primary_count: u32,
    animations: &'a [crate::anim::AnimationBinding],
    maps: &'a [crate::convert::MapManifest],
}

/// File-system-safe stem for a pair key (`General+Petalburg` ->
/// `general_petalburg`).
pub fn atlas_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Write one pair's atlas PNG and JSON manifest under `out_dir`. Returns
/// the two paths written.
pub fn write_pair(out_dir: &Path, pair: &PairAtlas) -> Result<(PathBuf, PathBuf), OutputError> {
    let stem = atlas_stem(&pair.key);
    let png_path = out_dir.join(format!("{stem}.png"));
    let json_path = out_dir.join(format!("{stem}.json"));

    save_png(&pair.image, &png_path)?;

    let manifest = AtlasManifest {
        atlas: png_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        entry_count: pair.entry_count,
        primary_count: pair.primary_count,
        animations: &pair.animations,
        maps: &pair.maps,
    };
    let text = serde_json::to_string_pretty(&manifest)?;
    std::fs::write(&json_path, text)?;

    Ok((png_path, json_path))
}
