//! gbatlas - Command-line tool for converting GBA tileset assets into tile atlases

use std::process::ExitCode;

use gbatlas::cli;

fn main() -> ExitCode {
    cli::run()
}
