//! Command-line interface implementation

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::anim::AnimationCatalog;
use crate::convert::{ConvertOptions, Converter, MapJob};
use crate::indexed;
use crate::output;
use crate::tileset::TilesetCache;

pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// gbatlas - Convert GBA tileset assets into deduplicated tile atlases
#[derive(Parser)]
#[command(name = "gbatlas")]
#[command(about = "Convert GBA tileset assets into deduplicated tile atlases")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert tileset pairs into atlas PNGs and JSON manifests
    Convert {
        /// Source tree root (the directory containing data/tilesets/)
        input: PathBuf,

        /// Output directory for atlas PNGs and manifests
        output: PathBuf,

        /// Tileset pair to convert, as PRIMARY or PRIMARY+SECONDARY
        /// (PRIMARY:SECONDARY also accepted). Repeatable. Without it,
        /// every primary tileset converts alone.
        #[arg(short, long = "pair")]
        pairs: Vec<String>,

        /// Build one atlas per pair job instead of sharing across pairs
        #[arg(long)]
        per_map: bool,

        /// Worker threads (default: one per CPU)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// JSON file overriding the built-in animation declarations
        #[arg(long)]
        animations: Option<PathBuf>,

        /// Skip animation binding entirely
        #[arg(long)]
        no_animations: bool,
    },

    /// Inspect an indexed tileset PNG
    Info {
        /// Path to a tiles.png
        file: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Convert {
            input,
            output,
            pairs,
            per_map,
            jobs,
            animations,
            no_animations,
        } => cmd_convert(
            &input,
            &output,
            &pairs,
            per_map,
            jobs,
            animations.as_deref(),
            no_animations,
        ),
        Commands::Info { file } => cmd_info(&file),
    };
    ExitCode::from(code)
}

fn cmd_convert(
    input: &std::path::Path,
    output: &std::path::Path,
    pairs: &[String],
    per_map: bool,
    jobs: Option<usize>,
    animations: Option<&std::path::Path>,
    no_animations: bool,
) -> u8 {
    let catalog = if no_animations {
        AnimationCatalog::empty()
    } else if let Some(path) = animations {
        match AnimationCatalog::from_json_file(path) {
            Ok(catalog) => catalog,
            Err(e) => {
                eprintln!("error: {e}");
                return EXIT_INVALID_ARGS;
            }
        }
    } else {
        AnimationCatalog::builtin()
    };

    let jobs_list = if pairs.is_empty() {
        discover_primary_pairs(input)
    } else {
        pairs.iter().map(|p| parse_pair(p)).collect()
    };
    if jobs_list.is_empty() {
        eprintln!("error: no tileset pairs to convert under {}", input.display());
        return EXIT_INVALID_ARGS;
    }

    let converter = Converter::new(
        TilesetCache::new(input),
        ConvertOptions {
            per_map,
            animations: catalog,
        },
    );

    let atlases = match jobs {
        Some(n) => {
            let pool = match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
                Ok(pool) => pool,
                Err(e) => {
                    eprintln!("error: cannot build thread pool: {e}");
                    return EXIT_ERROR;
                }
            };
            pool.install(|| converter.convert(&jobs_list))
        }
        None => converter.convert(&jobs_list),
    };

    for warning in converter.take_warnings() {
        eprintln!("warning: {warning}");
    }

    let mut failures = 0usize;
    for pair in &atlases {
        match output::write_pair(output, pair) {
            Ok((png, _)) => {
                println!(
                    "{}: {} entries ({} primary), {} animation bindings",
                    png.display(),
                    pair.entry_count,
                    pair.primary_count,
                    pair.animations.len()
                );
            }
            Err(e) => {
                eprintln!("error: cannot write atlas for {}: {e}", pair.key);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        EXIT_ERROR
    } else {
        EXIT_SUCCESS
    }
}

fn cmd_info(file: &std::path::Path) -> u8 {
    let bytes = match std::fs::read(file) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", file.display());
            return EXIT_ERROR;
        }
    };
    match indexed::decode(&bytes) {
        Ok(raster) => {
            println!("{}", file.display());
            println!("  dimensions: {}x{}", raster.width, raster.height);
            println!("  bit depth:  {}", raster.bit_depth);
            println!("  tiles:      {}", raster.tile_count());
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            EXIT_ERROR
        }
    }
}

/// Parse a `PRIMARY` or `PRIMARY+SECONDARY` pair argument into a job
/// covering the pair's full metatile tables.
fn parse_pair(spec: &str) -> MapJob {
    match spec.split_once(['+', ':']) {
        Some((primary, secondary)) => MapJob::full_pair(
            format!("{primary}+{secondary}"),
            primary,
            Some(secondary.to_string()),
        ),
        None => MapJob::full_pair(spec, spec, None),
    }
}

/// Without explicit pairs, convert every primary tileset on its own.
fn discover_primary_pairs(input: &std::path::Path) -> Vec<MapJob> {
    let pattern = input.join("data/tilesets/primary/*");
    let Some(pattern) = pattern.to_str().map(String::from) else {
        return Vec::new();
    };
    let mut jobs = Vec::new();
    if let Ok(paths) = glob::glob(&pattern) {
        for path in paths.filter_map(Result::ok) {
            if !path.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                jobs.push(MapJob::full_pair(name, name, None));
            }
        }
    }
    jobs.sort_by(|a, b| a.name.cmp(&b.name));
    jobs
}
