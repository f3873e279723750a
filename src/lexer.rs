//! Hand-rolled character scanner for RyVM assembly source.
//!
//! Grounded directly on the original C lexer: a single-character reader
//! with line/column tracking, one-token pushback, and sigil dispatch on
//! `.`, `"`, `:`, `#`, `@`, and digits/`-`. Register shortcuts (`PC`, `SP`,
//! `FP`, `LR`, `SF`) and the `E`/`Q`/`H`/`W`+digits register forms are
//! recognized here rather than left to the parser, matching how the
//! original scanner folds them into its default branch.

use crate::error::{LexError, Position};
use crate::opcode::Opcode;
use crate::register::{RegisterOperand, Width, FP, LR, PC, SF, SP};

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Section(Section),
    Directive(String),
    Opcode(Opcode),
    Register(RegisterOperand),
    /// `:name` — a label definition.
    Label(String),
    /// `@name` — an address-of reference.
    LabelRef(String),
    /// `#name` — a PC-relative reference.
    PcRelativeRef(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// A newline, which terminates a statement.
    Lf,
    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    Data,
    Text,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
    pushback: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Lexer<'a> {
        Lexer {
            chars: source.chars().peekable(),
            line: 1,
            column: 0,
            pushback: None,
        }
    }

    /// Puts `token` back so the next call to [`Lexer::next_token`] returns it
    /// again. Only one token of pushback is supported, matching the original
    /// scanner's single `has_unparsed_token` slot.
    pub fn push_back(&mut self, token: Token) {
        debug_assert!(self.pushback.is_none(), "lexer pushback slot already full");
        self.pushback = Some(token);
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn read_char(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn consume_comment(&mut self) {
        while let Some(c) = self.peek_char() {
            if c == '\n' {
                break;
            }
            self.read_char();
        }
    }

    /// Skips ordinary whitespace and comments, but leaves `\n` alone —
    /// [`Lexer::next_token`] tokenizes it as [`TokenKind::Lf`] since it
    /// terminates a statement.
    fn skip_space_and_comments(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() && c != '\n' => {
                    self.read_char();
                }
                Some(';') => {
                    self.read_char();
                    self.consume_comment();
                }
                _ => break,
            }
        }
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                word.push(c);
                self.read_char();
            } else {
                break;
            }
        }
        word
    }

    fn read_string(&mut self) -> Result<String, LexError> {
        let mut s = String::new();
        let mut escape_next = false;
        loop {
            let c = self.read_char().ok_or(LexError::UnterminatedString)?;
            if escape_next {
                let unescaped = match c {
                    'n' => '\n',
                    't' => '\t',
                    '0' => '\0',
                    other => other,
                };
                s.push(unescaped);
                escape_next = false;
                continue;
            }
            match c {
                '\\' => escape_next = true,
                '"' => break,
                other => s.push(other),
            }
        }
        Ok(s)
    }

    fn parse_number(word: &str) -> Result<TokenKind, LexError> {
        if word.contains('.') {
            word.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| LexError::InvalidNumber(word.to_owned()))
        } else if let Some(hex) = word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16)
                .map(TokenKind::Int)
                .map_err(|_| LexError::InvalidNumber(word.to_owned()))
        } else {
            word.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| LexError::InvalidNumber(word.to_owned()))
        }
    }

    /// Parses a bare word into a register operand if it matches one of the
    /// shortcut names or the `E`/`Q`/`H`/`W` + index forms.
    fn try_register(word: &str) -> Option<Result<RegisterOperand, LexError>> {
        match word {
            "PC" => return Some(Ok(RegisterOperand::shortcut(PC))),
            "SP" => return Some(Ok(RegisterOperand::shortcut(SP))),
            "FP" => return Some(Ok(RegisterOperand::shortcut(FP))),
            "LR" => return Some(Ok(RegisterOperand::shortcut(LR))),
            "SF" => return Some(Ok(RegisterOperand::shortcut(SF))),
            _ => {}
        }
        let mut chars = word.chars();
        let width = match chars.next()? {
            'E' => Width::Byte,
            'Q' => Width::Half,
            'H' => Width::Word,
            'W' => Width::Quad,
            _ => return None,
        };
        let digits: String = chars.collect();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let index: u32 = digits.parse().ok()?;
        if index > 63 {
            return Some(Err(LexError::RegisterIndexOutOfRange(index)));
        }
        Some(Ok(RegisterOperand::new(index as u8, width)))
    }

    /// Reads the next token, consulting the pushback slot first.
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        if let Some(token) = self.pushback.take() {
            return Ok(token);
        }
        self.skip_space_and_comments();
        let position = self.position();

        let c = match self.peek_char() {
            None => {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    position,
                })
            }
            Some(c) => c,
        };

        let kind = match c {
            '\n' => {
                self.read_char();
                TokenKind::Lf
            }
            '.' => {
                self.read_char();
                let word = self.read_word();
                match word.as_str() {
                    "data" => TokenKind::Section(Section::Data),
                    "text" => TokenKind::Section(Section::Text),
                    _ => TokenKind::Directive(word),
                }
            }
            ':' => {
                self.read_char();
                let word = self.read_word();
                TokenKind::Label(word)
            }
            '"' => {
                self.read_char();
                TokenKind::Str(self.read_string()?)
            }
            '#' => {
                self.read_char();
                let word = self.read_word();
                TokenKind::PcRelativeRef(word)
            }
            '@' => {
                self.read_char();
                let word = self.read_word();
                TokenKind::LabelRef(word)
            }
            '-' | '0'..='9' => {
                self.read_char();
                let mut word = String::new();
                word.push(c);
                word.push_str(&self.read_word());
                Self::parse_number(&word)?
            }
            _ if c.is_alphabetic() || c == '_' => {
                let word = self.read_word();
                if let Some(result) = Self::try_register(&word) {
                    TokenKind::Register(result?)
                } else if let Some(op) = Opcode::from_mnemonic(&word) {
                    TokenKind::Opcode(op)
                } else {
                    return Err(LexError::UnknownOpcode(word));
                }
            }
            other => return Err(LexError::UnknownSigil(other)),
        };

        Ok(Token { kind, position })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token().expect("lex ok");
            if token.kind == TokenKind::Eof {
                break;
            }
            out.push(token.kind);
        }
        out
    }

    #[test]
    fn lexes_sections_and_directives() {
        assert_eq!(
            kinds(".max_stack_size 4096\n.text"),
            vec![
                TokenKind::Directive("max_stack_size".to_owned()),
                TokenKind::Int(4096),
                TokenKind::Lf,
                TokenKind::Section(Section::Text),
            ]
        );
    }

    #[test]
    fn lexes_newlines_as_lf_tokens() {
        assert_eq!(
            kinds("ADD\n\nSUB"),
            vec![
                TokenKind::Opcode(Opcode::Add),
                TokenKind::Lf,
                TokenKind::Lf,
                TokenKind::Opcode(Opcode::Sub),
            ]
        );
    }

    #[test]
    fn lexes_register_shortcuts_and_sized_forms() {
        assert_eq!(
            kinds("PC W3 Q12"),
            vec![
                TokenKind::Register(RegisterOperand::shortcut(PC)),
                TokenKind::Register(RegisterOperand::new(3, Width::Quad)),
                TokenKind::Register(RegisterOperand::new(12, Width::Half)),
            ]
        );
    }

    #[test]
    fn lexes_label_definition_and_references() {
        assert_eq!(
            kinds(":loop B #loop @data_start"),
            vec![
                TokenKind::Label("loop".to_owned()),
                TokenKind::Opcode(Opcode::B),
                TokenKind::PcRelativeRef("loop".to_owned()),
                TokenKind::LabelRef("data_start".to_owned()),
            ]
        );
    }

    #[test]
    fn lexes_negative_and_float_numbers() {
        assert_eq!(
            kinds("-12 3.5"),
            vec![TokenKind::Int(-12), TokenKind::Float(3.5)]
        );
    }

    #[test]
    fn skips_semicolon_comments() {
        assert_eq!(
            kinds("; a comment\nADD"),
            vec![TokenKind::Lf, TokenKind::Opcode(Opcode::Add)]
        );
    }

    #[test]
    fn register_index_above_63_is_an_error() {
        let mut lexer = Lexer::new("W64");
        assert_eq!(
            lexer.next_token(),
            Err(LexError::RegisterIndexOutOfRange(64))
        );
    }

    #[test]
    fn push_back_replays_token() {
        let mut lexer = Lexer::new("ADD SUB");
        let first = lexer.next_token().expect("lex ok");
        lexer.push_back(first.clone());
        let replayed = lexer.next_token().expect("lex ok");
        assert_eq!(first, replayed);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let mut lexer = Lexer::new("\"abc");
        assert_eq!(lexer.next_token(), Err(LexError::UnterminatedString));
    }
}
