//! Pass 2: walks the entry lists a second time, now computing addresses
//! for real, resolving every placeholder into its final bytes, and
//! building the relocation table `@label` placeholders need at load time.

use log::debug;

use crate::error::ResolveError;
use crate::ir::{DataEntry, DataValue, DataWidth, Operand, Operands, Program, TextEntry};
use crate::symbol::SymbolTable;

/// A fully resolved image, ready for [`crate::image`] to serialize.
pub struct Resolved {
    pub max_stack_size: u64,
    pub data: Vec<u8>,
    pub text: Vec<u8>,
    /// `(hole, value)` pairs, both relative to the start of `data`.
    pub relocations: Vec<(u64, u64)>,
}

pub fn resolve(program: &Program, symbols: &SymbolTable) -> Result<Resolved, ResolveError> {
    let mut resolver = Resolver {
        symbols,
        address: 0,
        data: Vec::new(),
        text: Vec::new(),
        relocations: Vec::new(),
    };

    for entry in &program.data {
        resolver.data_entry(entry, true)?;
    }
    for entry in &program.text {
        match entry {
            TextEntry::Data(entry) => resolver.data_entry(entry, false)?,
            TextEntry::Instruction(inst) => resolver.instruction(inst)?,
        }
    }

    Ok(Resolved {
        max_stack_size: program.max_stack_size,
        data: resolver.data,
        text: resolver.text,
        relocations: resolver.relocations,
    })
}

struct Resolver<'a> {
    symbols: &'a SymbolTable,
    address: u64,
    data: Vec<u8>,
    text: Vec<u8>,
    relocations: Vec<(u64, u64)>,
}

impl<'a> Resolver<'a> {
    fn target(&self, id: crate::symbol::LabelId) -> Result<u64, ResolveError> {
        self.symbols
            .address(id)
            .ok_or_else(|| ResolveError::UndefinedLabel(self.symbols.name(id).to_owned()))
    }

    fn pc_relative_offset(
        &self,
        id: crate::symbol::LabelId,
        slot_address: u64,
        bits: u32,
    ) -> Result<i64, ResolveError> {
        let target = self.target(id)?;
        let pc_after = slot_address + 4;
        let offset = target as i64 - pc_after as i64;
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if offset < min || offset > max {
            return Err(ResolveError::OffsetOutOfRange {
                label: self.symbols.name(id).to_owned(),
                bits,
            });
        }
        debug!(
            "pc-relative: \"{}\" resolves to offset {} ({} bits)",
            self.symbols.name(id),
            offset,
            bits
        );
        Ok(offset)
    }

    fn data_entry(&mut self, entry: &DataEntry, in_data_section: bool) -> Result<(), ResolveError> {
        let slot_address = self.address;
        let sink_is_data = in_data_section;
        match entry {
            DataEntry::Ascii(s) => {
                let mut bytes: Vec<u8> = s.bytes().collect();
                bytes.push(0);
                self.address += bytes.len() as u64;
                self.sink(sink_is_data).extend_from_slice(&bytes);
            }
            DataEntry::Scalar {
                width,
                value: DataValue::Literal(value),
            } => {
                self.address += width.bytes();
                write_truncated(self.sink(sink_is_data), *value, width.bytes());
            }
            DataEntry::Scalar {
                width,
                value: DataValue::PcRelative(id),
            } => {
                let bits = match width {
                    DataWidth::Byte => 8,
                    DataWidth::Half => 16,
                    DataWidth::Word | DataWidth::Quad => unreachable!(
                        "rejected during parsing: wide data entries cannot carry #label"
                    ),
                };
                let offset = self.pc_relative_offset(*id, slot_address, bits)?;
                self.address += width.bytes();
                write_truncated(self.sink(sink_is_data), offset, width.bytes());
            }
            DataEntry::Scalar {
                value: DataValue::AddressOf(id),
                ..
            } => {
                let target = self.target(*id)?;
                self.address += 8;
                debug!(
                    "relocation: hole={} -> \"{}\" (address {})",
                    slot_address,
                    self.symbols.name(*id),
                    target
                );
                self.relocations.push((slot_address, target));
                write_truncated(self.sink(sink_is_data), target as i64, 8);
            }
        }
        Ok(())
    }

    fn sink(&mut self, is_data: bool) -> &mut Vec<u8> {
        if is_data {
            &mut self.data
        } else {
            &mut self.text
        }
    }

    fn instruction(&mut self, inst: &crate::ir::Instruction) -> Result<(), ResolveError> {
        let slot_address = self.address;
        self.address += 4;
        let mut bytes = [0u8; 4];
        bytes[0] = num_traits::ToPrimitive::to_u8(&inst.opcode).unwrap_or_else(|| {
            // Opcode derives ToPrimitive for every variant; this path is unreachable.
            unreachable!()
        });

        match &inst.operands {
            Operands::R0(operand) => {
                let value = self.resolve_operand(operand, slot_address, 24)?;
                let v = value as u32 & 0x00FF_FFFF;
                bytes[1] = (v & 0xFF) as u8;
                bytes[2] = ((v >> 8) & 0xFF) as u8;
                bytes[3] = ((v >> 16) & 0xFF) as u8;
            }
            Operands::R1(reg, operand) => {
                bytes[1] = reg.encode();
                let value = self.resolve_operand(operand, slot_address, 16)?;
                let v = value as u16;
                bytes[2] = (v & 0xFF) as u8;
                bytes[3] = ((v >> 8) & 0xFF) as u8;
            }
            Operands::R1Cond(operand) => {
                let value = self.resolve_operand(operand, slot_address, 16)?;
                let v = value as u16;
                bytes[2] = (v & 0xFF) as u8;
                bytes[3] = ((v >> 8) & 0xFF) as u8;
            }
            Operands::R2(a, b, operand) => {
                bytes[1] = a.encode();
                bytes[2] = b.encode();
                let value = self.resolve_operand(operand, slot_address, 8)?;
                bytes[3] = value as u8;
            }
            Operands::R3(a, b, c) => {
                bytes[1] = a.encode();
                bytes[2] = b.encode();
                bytes[3] = c.encode();
            }
        }

        self.text.extend_from_slice(&bytes);
        Ok(())
    }

    fn resolve_operand(
        &self,
        operand: &Operand,
        slot_address: u64,
        bits: u32,
    ) -> Result<i64, ResolveError> {
        match operand {
            Operand::Int(value) => Ok(*value),
            Operand::PcRelative(id) => self.pc_relative_offset(*id, slot_address, bits),
        }
    }
}

/// Writes the low `width` bytes of `value`'s two's-complement representation,
/// little-endian.
fn write_truncated(buf: &mut Vec<u8>, value: i64, width: u64) {
    let raw = value as u64;
    for i in 0..width {
        buf.push(((raw >> (i * 8)) & 0xFF) as u8);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::Parser;

    fn resolved(source: &str) -> Resolved {
        let (program, symbols) = Parser::new(source).parse().expect("parse ok");
        resolve(&program, &symbols).expect("resolve ok")
    }

    #[test]
    fn s1_produces_four_four_byte_instructions() {
        let r = resolved(".max_stack_size 0\n.text\nLDI W0 5\nLDI W1 7\nADD W0 W0 W1\nSYS 0\n");
        assert_eq!(r.data.len(), 0);
        assert_eq!(r.text.len(), 16);
    }

    #[test]
    fn s2_data_load_emits_one_relocation_free_word_and_pcr_offset() {
        let r = resolved(
            ".max_stack_size 0\n.data\n:v .word 42\n.text\nPCR W1 #v\nLDA W0 W1 0\nSYS 0\n",
        );
        assert_eq!(r.data, vec![42, 0, 0, 0, 0, 0, 0, 0]);
        assert!(r.relocations.is_empty());
        // data section is 8 bytes, so PCR sits at address 8; pc_after = 12,
        // target = 0, offset = 0 - 12 = -12.
        let offset_bytes = &r.text[2..4];
        let offset = i16::from_le_bytes([offset_bytes[0], offset_bytes[1]]);
        assert_eq!(offset, -12);
    }

    #[test]
    fn address_of_label_emits_a_relocation_entry() {
        let r = resolved(".data\n:v .word 7\n.eword @v\n.text\nSYS 0\n");
        assert_eq!(r.relocations, vec![(8, 0)]);
    }

    #[test]
    fn pc_relative_out_of_range_is_an_error() {
        let mut source = String::from(".text\nBEQ #far\n");
        for _ in 0..20000 {
            source.push_str("ADD W0 W0 W0\n");
        }
        source.push_str(":far SYS 0\n");
        let (program, symbols) = Parser::new(&source).parse().expect("parse ok");
        let err = resolve(&program, &symbols).unwrap_err();
        match err {
            ResolveError::OffsetOutOfRange { bits, .. } => assert_eq!(bits, 16),
            other => panic!("expected OffsetOutOfRange, got {:?}", other),
        }
    }
}
