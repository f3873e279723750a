//! `ryvm-asm` — the assembler CLI front-end. Reads a `.ryasm` source file,
//! runs it through [`ryvm::assemble_with_source_map`], and writes the
//! resulting `.ryc` image (plus an optional source map) to disk.

#[macro_use]
extern crate clap;

use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Arg;
use log::info;

use ryvm::error::CliError;
use ryvm::source_map;

fn main() {
    env_logger::init();

    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Assembly source file to read (.ryasm)")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("OUTPUT")
                .help("Image file to write (.ryc); defaults to INPUT with its extension replaced")
                .index(2),
        )
        .arg(
            Arg::with_name("source_map")
                .short("m")
                .long("source-map")
                .takes_value(true)
                .value_name("SOURCE_MAP")
                .help("Also write a source map to this file"),
        )
        .get_matches();

    let input = matches.value_of("INPUT").unwrap();
    let output = matches.value_of("OUTPUT");
    let map = matches.value_of("source_map");

    if let Err(err) = run(input, output, map) {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn run(input: &str, output: Option<&str>, map: Option<&str>) -> Result<(), CliError> {
    let input_path = Path::new(input);
    info!("assembling \"{}\"", input_path.display());

    let source = read_to_string(input_path)?;

    let (bytes, _symbols, map_entries) = ryvm::assemble_with_source_map(&source).map_err(|err| {
        CliError::Assemble(match input_path.to_str() {
            Some(path) => err.with_path(path),
            None => err,
        })
    })?;

    let output_path: PathBuf = output
        .map(PathBuf::from)
        .unwrap_or_else(|| input_path.with_extension("ryc"));

    write_all(&output_path, &bytes)?;
    info!(
        "wrote {} bytes to \"{}\"",
        bytes.len(),
        output_path.display()
    );

    if let Some(map_path) = map {
        let map_path = PathBuf::from(map_path);
        let mut buf = Vec::new();
        source_map::write(&mut buf, &map_entries).map_err(|err| {
            CliError::Io(err, "writing", map_path.display().to_string())
        })?;
        write_all(&map_path, &buf)?;
        info!("wrote source map to \"{}\"", map_path.display());
    }

    Ok(())
}

fn read_to_string(path: &Path) -> Result<String, CliError> {
    let file = File::open(path)
        .map_err(|err| CliError::Io(err, "reading", path.display().to_string()))?;
    let mut reader = BufReader::new(file);
    let mut source = String::new();
    reader
        .read_to_string(&mut source)
        .map_err(|err| CliError::Io(err, "reading", path.display().to_string()))?;
    Ok(source)
}

fn write_all(path: &Path, bytes: &[u8]) -> Result<(), CliError> {
    let mut file = File::create(path)
        .map_err(|err| CliError::Io(err, "writing", path.display().to_string()))?;
    file.write_all(bytes)
        .map_err(|err| CliError::Io(err, "writing", path.display().to_string()))
}
