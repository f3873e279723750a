//! Binary image format: serialization and deserialization/loading, including
//! an arena + bounds-checked-index redesign of the relocation step. The
//! original writes raw host pointers into the image; this implementation
//! stores and resolves image-relative offsets instead.

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};
use log::debug;
use util::Endian;

use crate::error::ImageError;
use crate::resolver::Resolved;

const MAGIC: &[u8; 2] = b"RY";

/// Writes a resolved program as a binary image.
pub fn write<W: Write>(mut out: W, resolved: &Resolved) -> io::Result<()> {
    out.write_all(MAGIC)?;
    out.write_u64::<Endian>(resolved.max_stack_size)?;
    out.write_u64::<Endian>(resolved.data.len() as u64)?;
    out.write_all(&resolved.data)?;
    out.write_u64::<Endian>(resolved.text.len() as u64)?;
    out.write_all(&resolved.text)?;
    out.write_u64::<Endian>(resolved.relocations.len() as u64)?;
    for &(hole, value) in &resolved.relocations {
        out.write_u64::<Endian>(hole)?;
        out.write_u64::<Endian>(value)?;
    }
    Ok(())
}

/// An image loaded into memory: a single contiguous `image` arena (data
/// then text, matching the on-disk layout) plus the separately-allocated
/// stack, both addressed by bounds-checked offset rather than host pointer.
pub struct Image {
    pub max_stack_size: u64,
    pub data_length: u64,
    pub text_length: u64,
    pub bytes: Vec<u8>,
}

impl Image {
    pub fn text_start(&self) -> u64 {
        self.data_length
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Reads an image and applies relocations, writing each hole's resolved
/// image-relative offset in place of the original absolute relative
/// address. Unlike the loader this is ported from, no host pointer ever
/// enters the image: both `hole` and `value` are bounds-checked against
/// the combined data+text length before any bytes are touched.
pub fn load<R: Read>(mut input: R) -> Result<Image, ImageError> {
    let mut magic = [0u8; 2];
    input.read_exact(&mut magic).map_err(|_| ImageError::Truncated)?;
    if &magic != MAGIC {
        return Err(ImageError::BadMagic);
    }

    let max_stack_size = read_u64(&mut input)?;
    let data_length = read_u64(&mut input)?;
    let mut data = vec![0u8; data_length as usize];
    input.read_exact(&mut data).map_err(|_| ImageError::Truncated)?;

    let text_length = read_u64(&mut input)?;
    let mut text = vec![0u8; text_length as usize];
    input.read_exact(&mut text).map_err(|_| ImageError::Truncated)?;

    let reloc_count = read_u64(&mut input)?;

    let mut bytes = Vec::with_capacity(data.len() + text.len());
    bytes.extend_from_slice(&data);
    bytes.extend_from_slice(&text);
    let total = bytes.len() as u64;

    for _ in 0..reloc_count {
        let hole = read_u64(&mut input)?;
        let value = read_u64(&mut input)?;
        if hole + 8 > total || value > total {
            return Err(ImageError::Truncated);
        }
        debug!("applying relocation: hole={} value={}", hole, value);
        let hole = hole as usize;
        bytes[hole..hole + 8].copy_from_slice(&value.to_le_bytes());
    }

    Ok(Image {
        max_stack_size,
        data_length,
        text_length,
        bytes,
    })
}

fn read_u64<R: Read>(input: &mut R) -> Result<u64, ImageError> {
    input
        .read_u64::<Endian>()
        .map_err(|_| ImageError::Truncated)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::Parser;
    use crate::resolver::resolve;

    fn assemble(source: &str) -> Vec<u8> {
        let (program, symbols) = Parser::new(source).parse().expect("parse ok");
        let resolved = resolve(&program, &symbols).expect("resolve ok");
        let mut buf = Vec::new();
        write(&mut buf, &resolved).expect("write ok");
        buf
    }

    #[test]
    fn round_trips_s1() {
        let bytes = assemble(".max_stack_size 0\n.text\nLDI W0 5\nLDI W1 7\nADD W0 W0 W1\nSYS 0\n");
        let image = load(&bytes[..]).expect("load ok");
        assert_eq!(image.data_length, 0);
        assert_eq!(image.text_length, 16);
        assert_eq!(image.bytes.len(), 16);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = load(&b"XY\0\0\0\0\0\0\0\0"[..]).unwrap_err();
        assert_eq!(err, ImageError::BadMagic);
    }

    #[test]
    fn truncated_image_is_rejected() {
        let err = load(&b"RY"[..]).unwrap_err();
        assert_eq!(err, ImageError::Truncated);
    }

    #[test]
    fn relocation_writes_target_offset_into_hole() {
        let bytes = assemble(".data\n:v .word 7\n.eword @v\n.text\nSYS 0\n");
        let image = load(&bytes[..]).expect("load ok");
        let hole = &image.bytes[8..16];
        assert_eq!(u64::from_le_bytes(hole.try_into().unwrap()), 0);
    }
}
