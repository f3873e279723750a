//! `ryvm-run` — loads a `.ryc` image and runs it to completion.

#[macro_use]
extern crate clap;

use std::fs::File;
use std::path::Path;

use clap::Arg;
use log::{error, info};

use ryvm::error::CliError;

fn main() {
    env_logger::init();

    let matches = app_from_crate!()
        .arg(
            Arg::with_name("PROGRAM")
                .help("RyVM image file to run (.ryc)")
                .required(true)
                .index(1),
        )
        .get_matches();

    let program = matches.value_of("PROGRAM").unwrap();
    match run(program) {
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

fn run(path: &str) -> Result<i64, CliError> {
    let path = Path::new(path);
    info!("loading \"{}\"", path.display());
    let file = File::open(path)
        .map_err(|err| CliError::Io(err, "reading", path.display().to_string()))?;
    ryvm::run(file).map_err(|err| match err {
        ryvm::RunError::Image(err) => CliError::Image(err),
        ryvm::RunError::Runtime(err) => CliError::Runtime(err),
    })
}
