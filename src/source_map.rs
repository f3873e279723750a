//! An optional side-table mapping image text-section addresses back to
//! source line ranges, written alongside the image when the assembler is
//! invoked with `-m`/`--source-map` (see `ryvm-asm`).

use std::io::{self, Write};

use byteorder::WriteBytesExt;
use util::Endian;

use crate::ir::Program;

/// One instruction's span in the originating source: it started on
/// `start_line` and its encoding consumed `line_count` source lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceMapItem {
    pub start_line: u32,
    pub line_count: u32,
}

pub type SourceMap = Vec<SourceMapItem>;

/// Builds the source map for a parsed program: one item per `.text` entry,
/// in emission order, matching `program.text_lines`. Every statement in
/// this grammar occupies exactly one source line, so `line_count` is
/// always 1.
pub fn from_program(program: &Program) -> SourceMap {
    program
        .text_lines
        .iter()
        .map(|&start_line| SourceMapItem {
            start_line,
            line_count: 1,
        })
        .collect()
}

/// Serializes a source map as a flat sequence of `(start_line, line_count)`
/// `u32` pairs, little-endian, with no header — it's read back by line
/// index matching the order entries were recorded during assembly.
pub fn write<W: Write>(mut out: W, map: &SourceMap) -> io::Result<()> {
    for item in map {
        out.write_u32::<Endian>(item.start_line)?;
        out.write_u32::<Endian>(item.line_count)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::Parser;

    #[test]
    fn from_program_has_one_item_per_text_entry() {
        let source = ".text\nLDI W0 5\nADD W0 W0 W0\nSYS 0\n";
        let (program, _) = Parser::new(source).parse().expect("parse ok");
        let map = from_program(&program);
        assert_eq!(map.len(), 3);
        assert_eq!(map[0].start_line, 2);
        assert!(map.iter().all(|item| item.line_count == 1));
    }

    #[test]
    fn writes_one_pair_per_item() {
        let map = vec![
            SourceMapItem {
                start_line: 1,
                line_count: 1,
            },
            SourceMapItem {
                start_line: 2,
                line_count: 3,
            },
        ];
        let mut buf = Vec::new();
        write(&mut buf, &map).expect("write ok");
        assert_eq!(buf.len(), 16);
    }
}
