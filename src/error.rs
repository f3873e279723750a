//! Error kinds for every stage of the toolchain: lexing, parsing, resolving,
//! image I/O, and VM execution. Each is a small hand-written enum with a
//! manual `Display`/`std::error::Error` impl and `From` conversions into the
//! stage above it, mirroring the assembler crate's own error style.

use std::fmt;
use std::io;

/// Where in the source a lex/parse/resolve failure was detected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LexError {
    UnknownSigil(char),
    UnterminatedString,
    InvalidNumber(String),
    RegisterIndexOutOfRange(u32),
    UnknownOpcode(String),
    UnknownSection(String),
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LexError::UnknownSigil(c) => write!(f, "unexpected character '{}'", c),
            LexError::UnterminatedString => write!(f, "unterminated string literal"),
            LexError::InvalidNumber(s) => write!(f, "invalid numeric literal \"{}\"", s),
            LexError::RegisterIndexOutOfRange(i) => {
                write!(f, "register index {} is out of range (max 63)", i)
            }
            LexError::UnknownOpcode(s) => write!(f, "unknown opcode \"{}\"", s),
            LexError::UnknownSection(s) => write!(f, "unknown section directive \".{}\"", s),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    Lex(LexError),
    UnexpectedToken(String),
    DuplicateMaxStackSize,
    DuplicateLabel(String),
    MissingOperand,
    PcRelativeWidthUnsupported(&'static str),
    DataSectionOutsideDataOrText,
    UndefinedLabel(String),
    MissingLineTerminator,
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> ParseError {
        ParseError::Lex(err)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::Lex(err) => write!(f, "{}", err),
            ParseError::UnexpectedToken(context) => {
                write!(f, "unexpected token while parsing {}", context)
            }
            ParseError::DuplicateMaxStackSize => {
                write!(f, ".max_stack_size may only appear once")
            }
            ParseError::DuplicateLabel(name) => {
                write!(f, "label \"{}\" is already defined", name)
            }
            ParseError::MissingOperand => write!(f, "instruction is missing an operand"),
            ParseError::PcRelativeWidthUnsupported(directive) => write!(
                f,
                "\"{}\" data entries cannot hold a #label PC-relative placeholder",
                directive
            ),
            ParseError::DataSectionOutsideDataOrText => {
                write!(f, "data directive used outside .data or .text")
            }
            ParseError::UndefinedLabel(name) => write!(f, "label \"{}\" is never defined", name),
            ParseError::MissingLineTerminator => {
                write!(f, "expected newline or end of file after instruction")
            }
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResolveError {
    UndefinedLabel(String),
    OffsetOutOfRange { label: String, bits: u32 },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResolveError::UndefinedLabel(name) => {
                write!(f, "undefined label \"{}\"", name)
            }
            ResolveError::OffsetOutOfRange { label, bits } => write!(
                f,
                "PC-relative offset to \"{}\" does not fit in {} signed bits",
                label, bits
            ),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImageError {
    BadMagic,
    Truncated,
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ImageError::BadMagic => write!(f, "not a RyVM image (bad magic bytes)"),
            ImageError::Truncated => write!(f, "image is truncated"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RuntimeError {
    InvalidOpcode(u8),
    DivisionByZero,
    OutOfBounds { address: u64, size: u32 },
    BadSyscall(u32),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RuntimeError::InvalidOpcode(byte) => write!(f, "invalid opcode byte {}", byte),
            RuntimeError::DivisionByZero => write!(f, "division or modulus by zero"),
            RuntimeError::OutOfBounds { address, size } => write!(
                f,
                "out-of-bounds access at address {} (size {})",
                address, size
            ),
            RuntimeError::BadSyscall(code) => write!(f, "invalid syscall number {}", code),
        }
    }
}

/// Top-level error for the assembler pipeline, with the source path
/// attached once it's known to the CLI.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub position: Option<Position>,
    pub path: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Parse(ParseError),
    Resolve(ResolveError),
    Image(ImageError),
}

impl Error {
    pub fn new(kind: ErrorKind, position: Option<Position>) -> Error {
        Error {
            kind,
            position,
            path: None,
        }
    }

    pub fn with_path(mut self, path: &str) -> Error {
        self.path = Some(path.to_owned());
        self
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::new(ErrorKind::Parse(err), None)
    }
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Error {
        Error::new(ErrorKind::Resolve(err), None)
    }
}

impl From<ImageError> for Error {
    fn from(err: ImageError) -> Error {
        Error::new(ErrorKind::Image(err), None)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "{}: ", path)?;
        }
        if let Some(position) = &self.position {
            write!(f, "{}: ", position)?;
        }
        match &self.kind {
            ErrorKind::Parse(err) => write!(f, "{}", err),
            ErrorKind::Resolve(err) => write!(f, "{}", err),
            ErrorKind::Image(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {}

/// Error surfaced by the `ryvm-tools` CLIs, wrapping either an I/O failure
/// or one of the in-crate stage errors.
#[derive(Debug)]
pub enum CliError {
    Io(io::Error, &'static str, String),
    Assemble(Error),
    Image(ImageError),
    Runtime(RuntimeError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CliError::Io(err, action, path) => {
                write!(f, "{} file \"{}\" failed: {}", action, path, err)
            }
            CliError::Assemble(err) => write!(f, "{}", err),
            CliError::Image(err) => write!(f, "{}", err),
            CliError::Runtime(err) => write!(f, "{}", err),
        }
    }
}

impl From<Error> for CliError {
    fn from(err: Error) -> CliError {
        CliError::Assemble(err)
    }
}

impl From<ImageError> for CliError {
    fn from(err: ImageError) -> CliError {
        CliError::Image(err)
    }
}

impl From<RuntimeError> for CliError {
    fn from(err: RuntimeError) -> CliError {
        CliError::Runtime(err)
    }
}
