//! Assembler and interpreter for the RyVM register machine: a two-pass
//! assembler that turns a textual listing into a compact binary image,
//! and an interpreter that loads and runs that image.
//!
//! ```
//! use ryvm::{assemble, run};
//!
//! let source = ".max_stack_size 0\n.text\nLDI W0 5\nLDI W1 7\nADD W0 W0 W1\nSYS 0\n";
//! let image_bytes = assemble(source).expect("assemble");
//! let result = run(&image_bytes[..]).expect("run");
//! assert_eq!(result, 12);
//! ```

pub mod error;
pub mod image;
pub mod ir;
pub mod lexer;
pub mod opcode;
pub mod parser;
pub mod register;
pub mod resolver;
pub mod source_map;
pub mod symbol;
pub mod vm;

use std::io::Write;

use log::info;

use error::Error;
use source_map::SourceMap;
use symbol::SymbolTable;

/// Runs Pass 1 and Pass 2 and serializes the result, returning the bytes
/// of a complete `.ryc` image.
pub fn assemble(source: &str) -> Result<Vec<u8>, Error> {
    let (bytes, _) = assemble_with_symbols(source)?;
    Ok(bytes)
}

/// Like [`assemble`], but also returns the symbol table so a caller (such
/// as `ryvm-asm`'s `--source-map` flag) can recover label addresses.
pub fn assemble_with_symbols(source: &str) -> Result<(Vec<u8>, SymbolTable), Error> {
    let (program, symbols) = parser::Parser::new(source).parse()?;
    info!(
        "pass 1 complete: {} data entries, {} text entries",
        program.data.len(),
        program.text.len()
    );
    let resolved = resolver::resolve(&program, &symbols)?;
    info!(
        "pass 2 complete: {} data bytes, {} text bytes, {} relocations",
        resolved.data.len(),
        resolved.text.len(),
        resolved.relocations.len()
    );
    let mut bytes = Vec::new();
    image::write(&mut bytes, &resolved).map_err(|_| {
        Error::new(error::ErrorKind::Image(error::ImageError::Truncated), None)
    })?;
    Ok((bytes, symbols))
}

/// Like [`assemble_with_symbols`], but also returns the source map (one
/// entry per `.text` item) so a caller can write it alongside the image.
pub fn assemble_with_source_map(source: &str) -> Result<(Vec<u8>, SymbolTable, SourceMap), Error> {
    let (program, symbols) = parser::Parser::new(source).parse()?;
    let map = source_map::from_program(&program);
    let resolved = resolver::resolve(&program, &symbols)?;
    let mut bytes = Vec::new();
    image::write(&mut bytes, &resolved).map_err(|_| {
        Error::new(error::ErrorKind::Image(error::ImageError::Truncated), None)
    })?;
    Ok((bytes, symbols, map))
}

/// Loads an image from `input` and runs it to completion, returning
/// register 0's final value.
pub fn run<R: std::io::Read>(input: R) -> Result<i64, RunError> {
    let loaded = image::load(input).map_err(RunError::Image)?;
    info!(
        "loaded image: {} data bytes, {} text bytes",
        loaded.data_length, loaded.text_length
    );
    let mut machine = vm::Vm::new(loaded);
    machine.run().map_err(RunError::Runtime)
}

/// Like [`run`], but sends `SYS 1`/`SYS 2`/`SYS 3`/`SYS 4` print output to
/// `out` instead of stdout.
pub fn run_with_output<R: std::io::Read, W: Write>(
    input: R,
    out: W,
) -> Result<i64, RunError> {
    let loaded = image::load(input).map_err(RunError::Image)?;
    info!(
        "loaded image: {} data bytes, {} text bytes",
        loaded.data_length, loaded.text_length
    );
    let mut machine = vm::Vm::with_output(loaded, out);
    machine.run().map_err(RunError::Runtime)
}

#[derive(Debug)]
pub enum RunError {
    Image(error::ImageError),
    Runtime(error::RuntimeError),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RunError::Image(err) => write!(f, "{}", err),
            RunError::Runtime(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for RunError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn assemble_then_run_round_trips_s1() {
        let source = ".max_stack_size 0\n.text\nLDI W0 5\nLDI W1 7\nADD W0 W0 W1\nSYS 0\n";
        let bytes = assemble(source).expect("assemble ok");
        let result = run(&bytes[..]).expect("run ok");
        assert_eq!(result, 12);
    }

    #[test]
    fn undefined_label_fails_assembly() {
        let source = ".text\nB #missing\n";
        assert!(assemble(source).is_err());
    }

    #[test]
    fn assemble_with_source_map_has_one_entry_per_text_item() {
        let source = ".text\nLDI W0 5\nLDI W1 7\nADD W0 W0 W1\nSYS 0\n";
        let (bytes, _symbols, map) = assemble_with_source_map(source).expect("assemble ok");
        assert_eq!(map.len(), 4);
        assert_eq!(run(&bytes[..]).expect("run ok"), 12);
    }
}
