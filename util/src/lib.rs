use std::{error::Error, fmt};

/// Byte order used for every multi-byte field in the assembly toolchain:
/// lexer-parsed integers, instruction operands, and the image format are
/// all little-endian.
pub type Endian = byteorder::LittleEndian;

/// Failure to parse a string as one of an enum's fieldless variants.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ParseEnumError {
    pub value: String,
    pub enum_name: &'static str,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Failed to parse \"{}\" as {}.",
            &self.value, &self.enum_name
        )
    }
}

impl Error for ParseEnumError {
    fn description(&self) -> &str {
        "Failed to parse enum."
    }
}
