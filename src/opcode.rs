//! Opcodes and their instruction formats.
//!
//! Every instruction is a fixed 4 bytes: an opcode byte followed by three
//! operand bytes whose meaning depends on the opcode's [`Format`].

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// Which of the three operand bytes are registers versus immediate bits.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Format {
    /// 24-bit signed immediate in bytes 1..3. Used by unconditional jump and syscall.
    R0,
    /// One register in byte 1, a 16-bit signed immediate in bytes 2..3.
    R1,
    /// Two registers in bytes 1..2, an 8-bit signed immediate in byte 3.
    R2,
    /// Three registers, one per operand byte.
    R3,
}

/// Note: do not reorder these variants — their discriminants are the wire
/// encoding read directly from assembled instruction bytes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Opcode {
    /// Unconditional PC-relative jump.
    B,
    /// `SYS imm24` — invoke one of the fixed host syscalls (see [`crate::vm`]).
    Sys,

    /// `LDI dst, imm16` — sign-extend a 16-bit immediate into `dst`.
    Ldi,
    /// `PCR dst, off16` — `dst := PC + off16`, where `PC` already points past this instruction.
    Pcr,
    /// Branch if the zero flag is set.
    Beq,
    /// Branch if the zero flag is clear.
    Bne,
    /// Branch if `N != V` (signed less-than).
    Blt,
    /// Branch if `N == V` and `Z == 0` (signed greater-than).
    Bgt,
    /// Branch if `N != V` or `Z == 1` (signed less-or-equal).
    Ble,
    /// Branch if `N == V` or `Z == 1` (signed greater-or-equal).
    Bge,
    /// `BL dst, off16` — `dst := PC` (post-increment), then `PC += off16`.
    Bl,
    /// `BR reg, off16` — `PC := reg + off16`.
    Br,
    /// Compare a register against a sign-extended 16-bit immediate, signed.
    Cpsi,
    /// Compare a register against a zero-extended 16-bit immediate, unsigned.
    Cpui,

    /// `LDA dst, base, off8` — load `dst`'s width in bytes from `image[reg[base] + off8]`.
    Lda,
    /// `STR src, base, off8` — store `src`'s width in bytes to `image[reg[base] + off8]`.
    Str,
    Addi,
    Subi,
    Xori,
    /// Convert a fixed-point integer to floating point; immediate bit 7 selects signed/unsigned.
    Fxfp,
    /// Convert floating point to a fixed-point integer; immediate bit 7 selects signed/unsigned.
    Fpfx,
    /// `BLR dst, reg, off8` — `dst := PC`, then `PC := reg + off8`.
    Blr,

    Add,
    Sub,
    Mul,
    Mulu,
    Div,
    Divu,
    Rem,
    Remu,
    Addf,
    Subf,
    Mulf,
    Divf,
    Remf,
    And,
    Or,
    Xor,
    /// Right-hand operand is always treated as unsigned.
    Shl,
    /// Right-hand operand is always treated as unsigned.
    Shr,
    /// `BIC dst, a, m` — `dst := a AND (NOT m)`.
    Bic,
    /// Signed compare, `a - b`; sets `Z`/`N`/`V`.
    Cps,
    /// Unsigned compare, `a - b`; sets `Z`/`N`/`V` (`V` = borrow).
    Cpu,
    /// Floating-point compare, `a - b`; sets `Z`/`N`/`V`.
    Cpf,
}

impl Opcode {
    pub fn format(self) -> Format {
        use Opcode::*;
        match self {
            B | Sys => Format::R0,
            Ldi | Pcr | Beq | Bne | Blt | Bgt | Ble | Bge | Bl | Br | Cpsi | Cpui => Format::R1,
            Lda | Str | Addi | Subi | Xori | Fxfp | Fpfx | Blr => Format::R2,
            Add | Sub | Mul | Mulu | Div | Divu | Rem | Remu | Addf | Subf | Mulf | Divf
            | Remf | And | Or | Xor | Shl | Shr | Bic | Cps | Cpu | Cpf => Format::R3,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Opcode> {
        FromPrimitive::from_u8(byte)
    }

    /// True for the six branch-condition mnemonics, which share the R1 wire
    /// layout but take only a PC-relative offset — no register operand in
    /// assembly syntax, unlike the rest of the R1 group.
    pub fn is_condition_branch(self) -> bool {
        use Opcode::*;
        matches!(self, Beq | Bne | Blt | Bgt | Ble | Bge)
    }

    /// The mnemonic used in assembly source.
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            B => "B",
            Sys => "SYS",
            Ldi => "LDI",
            Pcr => "PCR",
            Beq => "BEQ",
            Bne => "BNE",
            Blt => "BLT",
            Bgt => "BGT",
            Ble => "BLE",
            Bge => "BGE",
            Bl => "BL",
            Br => "BR",
            Cpsi => "CPSI",
            Cpui => "CPUI",
            Lda => "LDA",
            Str => "STR",
            Addi => "ADDI",
            Subi => "SUBI",
            Xori => "XORI",
            Fxfp => "FXFP",
            Fpfx => "FPFX",
            Blr => "BLR",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Mulu => "MULU",
            Div => "DIV",
            Divu => "DIVU",
            Rem => "REM",
            Remu => "REMU",
            Addf => "ADDF",
            Subf => "SUBF",
            Mulf => "MULF",
            Divf => "DIVF",
            Remf => "REMF",
            And => "AND",
            Or => "OR",
            Xor => "XOR",
            Shl => "SHL",
            Shr => "SHR",
            Bic => "BIC",
            Cps => "CPS",
            Cpu => "CPU",
            Cpf => "CPF",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Opcode> {
        use Opcode::*;
        Some(match s {
            "B" => B,
            "SYS" => Sys,
            "LDI" => Ldi,
            "PCR" => Pcr,
            "BEQ" => Beq,
            "BNE" => Bne,
            "BLT" => Blt,
            "BGT" => Bgt,
            "BLE" => Ble,
            "BGE" => Bge,
            "BL" => Bl,
            "BR" => Br,
            "CPSI" => Cpsi,
            "CPUI" => Cpui,
            "LDA" => Lda,
            "STR" => Str,
            "ADDI" => Addi,
            "SUBI" => Subi,
            "XORI" => Xori,
            "FXFP" => Fxfp,
            "FPFX" => Fpfx,
            "BLR" => Blr,
            "ADD" => Add,
            "SUB" => Sub,
            "MUL" => Mul,
            "MULU" => Mulu,
            "DIV" => Div,
            "DIVU" => Divu,
            "REM" => Rem,
            "REMU" => Remu,
            "ADDF" => Addf,
            "SUBF" => Subf,
            "MULF" => Mulf,
            "DIVF" => Divf,
            "REMF" => Remf,
            "AND" => And,
            "OR" => Or,
            "XOR" => Xor,
            "SHL" => Shl,
            "SHR" => Shr,
            "BIC" => Bic,
            "CPS" => Cps,
            "CPU" => Cpu,
            "CPF" => Cpf,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mnemonic_round_trips_through_from_mnemonic() {
        for byte in 0u8..=43 {
            let op = Opcode::from_byte(byte).expect("every byte 0..=43 is a valid opcode");
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
        }
    }

    #[test]
    fn format_matches_opcode_table() {
        assert_eq!(Opcode::Sys.format(), Format::R0);
        assert_eq!(Opcode::Ldi.format(), Format::R1);
        assert_eq!(Opcode::Lda.format(), Format::R2);
        assert_eq!(Opcode::Add.format(), Format::R3);
    }

    #[test]
    fn unknown_byte_is_none() {
        assert_eq!(Opcode::from_byte(200), None);
    }
}
