//! `ryvm` — the combined tool: assembles a `.ryasm` source file and
//! immediately loads and runs the freshly-written image in one process.

#[macro_use]
extern crate clap;

use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Arg;
use log::{error, info};

use ryvm::error::CliError;

fn main() {
    env_logger::init();

    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Assembly source file to assemble and run (.ryasm)")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("OUTPUT")
                .help("Image file to write (.ryc); defaults to INPUT with its extension replaced")
                .index(2),
        )
        .get_matches();

    let input = matches.value_of("INPUT").unwrap();
    let output = matches.value_of("OUTPUT");

    match assemble_and_run(input, output) {
        Ok(result) => {
            println!("Program result: {}", result);
        }
        Err(err) => {
            error!("{}", err);
            eprintln!("{}", err);
            println!("Program result: -1");
            std::process::exit(1);
        }
    }
}

fn assemble_and_run(input: &str, output: Option<&str>) -> Result<i64, CliError> {
    let input_path = Path::new(input);
    info!("assembling \"{}\"", input_path.display());

    let file = File::open(input_path)
        .map_err(|err| CliError::Io(err, "reading", input_path.display().to_string()))?;
    let mut reader = BufReader::new(file);
    let mut source = String::new();
    reader
        .read_to_string(&mut source)
        .map_err(|err| CliError::Io(err, "reading", input_path.display().to_string()))?;

    let bytes = ryvm::assemble(&source).map_err(|err| {
        CliError::Assemble(match input_path.to_str() {
            Some(path) => err.with_path(path),
            None => err,
        })
    })?;

    let output_path: PathBuf = output
        .map(PathBuf::from)
        .unwrap_or_else(|| input_path.with_extension("ryc"));
    let mut out_file = File::create(&output_path)
        .map_err(|err| CliError::Io(err, "writing", output_path.display().to_string()))?;
    out_file
        .write_all(&bytes)
        .map_err(|err| CliError::Io(err, "writing", output_path.display().to_string()))?;
    info!(
        "wrote {} bytes to \"{}\"",
        bytes.len(),
        output_path.display()
    );

    info!("running \"{}\"", output_path.display());
    ryvm::run(&bytes[..]).map_err(|err| match err {
        ryvm::RunError::Image(err) => CliError::Image(err),
        ryvm::RunError::Runtime(err) => CliError::Runtime(err),
    })
}
