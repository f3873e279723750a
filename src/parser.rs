//! Pass 1: walks tokens through the `CONFIG → DATA → TEXT` mode sequence,
//! builds the data/instruction entry lists, and interns every label
//! definition and placeholder reference into the [`SymbolTable`].
//!
//! Kept as a single straight-line walk (no recursive-descent grammar
//! needed — the grammar is regular enough for one token of lookahead via
//! the lexer's pushback).

use crate::error::ParseError;
use crate::ir::{DataEntry, DataValue, DataWidth, Instruction, Operand, Operands, Program, TextEntry};
use crate::lexer::{Lexer, Section, Token, TokenKind};
use crate::opcode::{Format, Opcode};
use crate::register::RegisterOperand;
use crate::symbol::SymbolTable;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Config,
    Data,
    Text,
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    symbols: SymbolTable,
    mode: Mode,
    address: u64,
    program: Program,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Parser<'a> {
        Parser {
            lexer: Lexer::new(source),
            symbols: SymbolTable::new(),
            mode: Mode::Config,
            address: 0,
            program: Program::default(),
        }
    }

    /// Runs Pass 1 to completion, returning the populated program and
    /// symbol table for [`crate::resolver`].
    pub fn parse(mut self) -> Result<(Program, SymbolTable), ParseError> {
        loop {
            let token = self.lexer.next_token()?;
            match token.kind {
                TokenKind::Eof => break,
                TokenKind::Lf => continue,
                _ => self.statement(token)?,
            }
        }

        let undefined = self.symbols.undefined();
        if let Some(id) = undefined.first() {
            return Err(ParseError::UndefinedLabel(
                self.symbols.name(*id).to_owned(),
            ));
        }

        Ok((self.program, self.symbols))
    }

    /// Dispatches one statement-starting token. A label is not itself a
    /// statement: it binds its address, skips any blank lines that follow,
    /// and then dispatches whatever directive or instruction comes next —
    /// matching the original scanner's "skip over all LF tokens" loop after
    /// a label definition.
    fn statement(&mut self, token: Token) -> Result<(), ParseError> {
        let line = token.position.line;
        match token.kind {
            TokenKind::Section(Section::Data) => self.mode = Mode::Data,
            TokenKind::Section(Section::Text) => self.mode = Mode::Text,
            TokenKind::Directive(name) => {
                self.directive(&name, line)?;
                if self.mode == Mode::Text {
                    self.expect_statement_end()?;
                }
            }
            TokenKind::Label(name) => {
                let id = self.symbols.intern(&name);
                if !self.symbols.define(id, self.address) {
                    return Err(ParseError::DuplicateLabel(name));
                }
                loop {
                    let next = self.lexer.next_token()?;
                    match next.kind {
                        TokenKind::Lf => continue,
                        TokenKind::Eof => {
                            return Err(ParseError::UnexpectedToken(
                                "a label must be followed by a directive or instruction"
                                    .to_owned(),
                            ));
                        }
                        _ => return self.statement(next),
                    }
                }
            }
            TokenKind::Opcode(op) => {
                self.instruction(op, line)?;
                self.expect_statement_end()?;
            }
            other => return Err(ParseError::UnexpectedToken(format!("{:?}", other))),
        }
        Ok(())
    }

    /// Requires the statement just parsed to be followed by `LF` or `EOF`,
    /// matching the original assembler's check after every `.text` item
    /// (instruction or data entry). `EOF` is pushed back so the outer loop
    /// still sees it and terminates.
    fn expect_statement_end(&mut self) -> Result<(), ParseError> {
        let token = self.lexer.next_token()?;
        if token.kind == TokenKind::Lf {
            return Ok(());
        }
        if token.kind == TokenKind::Eof {
            self.lexer.push_back(token);
            return Ok(());
        }
        Err(ParseError::MissingLineTerminator)
    }

    fn directive(&mut self, name: &str, line: u32) -> Result<(), ParseError> {
        if name == "max_stack_size" {
            if self.mode != Mode::Config {
                return Err(ParseError::UnexpectedToken(".max_stack_size".to_owned()));
            }
            if self.program.max_stack_size != 0 {
                return Err(ParseError::DuplicateMaxStackSize);
            }
            let value = self.expect_int()?;
            self.program.max_stack_size = value as u64;
            return Ok(());
        }

        if self.mode == Mode::Config {
            // The first data/text-only directive implicitly ends CONFIG.
            self.mode = Mode::Data;
        }

        let width = match name {
            "eword" => Some(DataWidth::Byte),
            "qword" => Some(DataWidth::Half),
            "hword" => Some(DataWidth::Word),
            "word" => Some(DataWidth::Quad),
            _ => None,
        };

        if let Some(width) = width {
            self.directive_intlist(width, line)
        } else if name == "asciz" {
            self.directive_asciz(line)
        } else {
            Err(ParseError::UnexpectedToken(format!(".{}", name)))
        }
    }

    /// Consumes one or more int/`#label`/`@label` items until the next
    /// token isn't one of them, per the `Directive` grammar production.
    fn directive_intlist(&mut self, width: DataWidth, line: u32) -> Result<(), ParseError> {
        loop {
            let token = self.lexer.next_token()?;
            let entry = match token.kind {
                TokenKind::Int(value) => DataEntry::Scalar {
                    width,
                    value: DataValue::Literal(value),
                },
                TokenKind::PcRelativeRef(name) => {
                    if width == DataWidth::Word || width == DataWidth::Quad {
                        return Err(ParseError::PcRelativeWidthUnsupported(
                            if width == DataWidth::Word {
                                ".hword"
                            } else {
                                ".word"
                            },
                        ));
                    }
                    let id = self.symbols.intern(&name);
                    DataEntry::Scalar {
                        width,
                        value: DataValue::PcRelative(id),
                    }
                }
                TokenKind::LabelRef(name) => {
                    let id = self.symbols.intern(&name);
                    DataEntry::Scalar {
                        width,
                        value: DataValue::AddressOf(id),
                    }
                }
                other => {
                    self.lexer.push_back(Token {
                        kind: other,
                        position: token.position,
                    });
                    break;
                }
            };
            self.push_entry(entry, line);
        }
        Ok(())
    }

    fn directive_asciz(&mut self, line: u32) -> Result<(), ParseError> {
        let token = self.lexer.next_token()?;
        match token.kind {
            TokenKind::Str(s) => {
                self.push_entry(DataEntry::Ascii(s), line);
                Ok(())
            }
            _ => Err(ParseError::UnexpectedToken(".asciz".to_owned())),
        }
    }

    fn push_entry(&mut self, entry: DataEntry, line: u32) {
        self.address += entry.len();
        match self.mode {
            Mode::Data => self.program.data.push(entry),
            _ => {
                self.program.text.push(TextEntry::Data(entry));
                self.program.text_lines.push(line);
            }
        }
    }

    fn expect_int(&mut self) -> Result<i64, ParseError> {
        match self.lexer.next_token()?.kind {
            TokenKind::Int(value) => Ok(value),
            _ => Err(ParseError::MissingOperand),
        }
    }

    fn expect_register(&mut self) -> Result<RegisterOperand, ParseError> {
        match self.lexer.next_token()?.kind {
            TokenKind::Register(reg) => Ok(reg),
            _ => Err(ParseError::MissingOperand),
        }
    }

    /// An R0/R1/R2 immediate slot: either an integer literal or a `#label`
    /// placeholder. `@label` is not valid here (instructions only ever
    /// carry PC-relative placeholders).
    fn expect_operand(&mut self) -> Result<Operand, ParseError> {
        match self.lexer.next_token()?.kind {
            TokenKind::Int(value) => Ok(Operand::Int(value)),
            TokenKind::PcRelativeRef(name) => {
                let id = self.symbols.intern(&name);
                Ok(Operand::PcRelative(id))
            }
            _ => Err(ParseError::MissingOperand),
        }
    }

    fn instruction(&mut self, opcode: Opcode, line: u32) -> Result<(), ParseError> {
        if self.mode != Mode::Text {
            return Err(ParseError::UnexpectedToken(format!(
                "opcode {} outside .text",
                opcode.mnemonic()
            )));
        }
        let operands = match opcode.format() {
            Format::R0 => Operands::R0(self.expect_operand()?),
            Format::R1 if opcode.is_condition_branch() => {
                Operands::R1Cond(self.expect_operand()?)
            }
            Format::R1 => {
                let reg = self.expect_register()?;
                let imm = self.expect_operand()?;
                Operands::R1(reg, imm)
            }
            Format::R2 => {
                let a = self.expect_register()?;
                let b = self.expect_register()?;
                let imm = self.expect_operand()?;
                Operands::R2(a, b, imm)
            }
            Format::R3 => {
                let a = self.expect_register()?;
                let b = self.expect_register()?;
                let c = self.expect_register()?;
                Operands::R3(a, b, c)
            }
        };
        self.address += 4;
        self.program
            .text
            .push(TextEntry::Instruction(Instruction { opcode, operands }));
        self.program.text_lines.push(line);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::register::Width;

    #[test]
    fn parses_s1_integer_add_and_halt() {
        let source = ".max_stack_size 0\n.text\nLDI W0 5\nLDI W1 7\nADD W0 W0 W1\nSYS 0\n";
        let (program, _) = Parser::new(source).parse().expect("parse ok");
        assert_eq!(program.max_stack_size, 0);
        assert_eq!(program.text.len(), 4);
    }

    #[test]
    fn parses_labeled_data_and_pcr_reference() {
        let source = ".max_stack_size 0\n.data\n:v .word 42\n.text\nPCR W1 #v\nLDA W0 W1 0\nSYS 0\n";
        let (program, symbols) = Parser::new(source).parse().expect("parse ok");
        assert_eq!(program.data.len(), 1);
        assert_eq!(program.text.len(), 3);
        assert!(symbols.undefined().is_empty());
    }

    #[test]
    fn duplicate_max_stack_size_is_an_error() {
        let source = ".max_stack_size 0\n.max_stack_size 1\n.text\nSYS 0\n";
        assert_eq!(
            Parser::new(source).parse().unwrap_err(),
            ParseError::DuplicateMaxStackSize
        );
    }

    #[test]
    fn duplicate_label_is_an_error() {
        let source = ".text\n:start SYS 0\n:start SYS 0\n";
        assert_eq!(
            Parser::new(source).parse().unwrap_err(),
            ParseError::DuplicateLabel("start".to_owned())
        );
    }

    #[test]
    fn undefined_label_fails_pass_one() {
        let source = ".text\nB #missing\n";
        assert_eq!(
            Parser::new(source).parse().unwrap_err(),
            ParseError::UndefinedLabel("missing".to_owned())
        );
    }

    #[test]
    fn pc_relative_rejected_on_wide_data_entries() {
        let source = ".data\n.word #v\n.text\n:v SYS 0\n";
        assert_eq!(
            Parser::new(source).parse().unwrap_err(),
            ParseError::PcRelativeWidthUnsupported(".word")
        );
    }

    #[test]
    fn text_lines_track_one_entry_per_text_item() {
        let source = ".text\nLDI W0 5\nLDI W1 7\nADD W0 W0 W1\nSYS 0\n";
        let (program, _) = Parser::new(source).parse().expect("parse ok");
        assert_eq!(program.text.len(), program.text_lines.len());
        assert_eq!(program.text_lines, vec![2, 3, 4, 5]);
    }

    #[test]
    fn blank_lines_between_statements_are_tolerated() {
        let source = ".text\n\n\nLDI W0 5\n\nSYS 0\n";
        let (program, _) = Parser::new(source).parse().expect("parse ok");
        assert_eq!(program.text.len(), 2);
    }

    #[test]
    fn label_on_its_own_line_before_content_is_accepted() {
        let source = ".text\n:start\nSYS 0\n";
        let (program, symbols) = Parser::new(source).parse().expect("parse ok");
        assert_eq!(program.text.len(), 1);
        assert!(symbols.undefined().is_empty());
    }

    #[test]
    fn two_instructions_on_one_line_is_a_missing_terminator_error() {
        let source = ".text\nSYS 0 SYS 0\n";
        assert_eq!(
            Parser::new(source).parse().unwrap_err(),
            ParseError::MissingLineTerminator
        );
    }

    #[test]
    fn label_with_nothing_after_it_is_an_error() {
        let source = ".text\n:start\n";
        assert!(Parser::new(source).parse().is_err());
    }

    #[test]
    fn r3_instruction_parses_three_registers() {
        let source = ".text\nADD W0 W1 W2\nSYS 0\n";
        let (program, _) = Parser::new(source).parse().expect("parse ok");
        match &program.text[0] {
            TextEntry::Instruction(inst) => {
                assert_eq!(inst.opcode, Opcode::Add);
                assert_eq!(
                    inst.operands,
                    Operands::R3(
                        RegisterOperand::new(0, Width::Quad),
                        RegisterOperand::new(1, Width::Quad),
                        RegisterOperand::new(2, Width::Quad),
                    )
                );
            }
            _ => panic!("expected instruction"),
        }
    }
}
