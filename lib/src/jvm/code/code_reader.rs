//! Decoding method bodies back out of class files
//!
//! A `Code` attribute is first decoded into a flat list of instructions with absolute jump
//! targets ([`DecodedCode`]). That list can then be replayed into a [`CodeBuilder`], which
//! rebuilds the blocks (and recomputes whatever the class is configured to compute).

use super::{
    BranchInstruction, CodeBuilder, CodePosition, CompareMode, EqComparison, Instruction,
    InvokeType, OrdComparison, ShiftType, SymbolicInstruction, SynLabel,
};
use crate::jvm::class_file::{
    AttributeLike, ByteReader, ClassConstantIndex, ConstantIndex, ConstantsPool,
    FieldRefConstantIndex, InvokeDynamicConstantIndex, LineNumberTable, LocalVariableTable,
    MethodRefConstantIndex, Utf8ConstantIndex,
};
use crate::jvm::{BaseType, BinaryName, Error, FieldType, Name, ParseDescriptor, UnqualifiedName};
use std::collections::{BTreeSet, HashMap};

/// Instruction decoded from the code array
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedInstruction {
    Straight(SymbolicInstruction),

    /// Jump targets are absolute offsets into the code array
    Branch(BranchInstruction<usize, usize, ()>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedHandler {
    pub start_pc: usize,
    pub end_pc: usize,
    pub handler_pc: usize,
    pub catch_type: Option<BinaryName>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedLocal {
    pub start_pc: usize,
    pub end_pc: usize,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
    pub index: u16,
}

/// Contents of a `Code` attribute, with constants resolved
///
/// Code attributes other than line numbers and local variables are dropped (in particular the
/// `StackMapTable`, which gets recomputed).
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedCode {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_length: usize,

    /// Instructions, in order, along with their offset
    pub instructions: Vec<(usize, DecodedInstruction)>,
    pub exception_table: Vec<DecodedHandler>,
    pub line_numbers: Vec<(usize, u16)>,
    pub local_variables: Vec<DecodedLocal>,
}

impl DecodedCode {
    /// Decode the body of a `Code` attribute
    pub fn parse(info: &[u8], constants: &ConstantsPool) -> Result<DecodedCode, Error> {
        let mut reader = ByteReader::new(info);
        let max_stack = reader.u16()?;
        let max_locals = reader.u16()?;
        let code_length = reader.u32()? as usize;
        let code_array = reader.bytes(code_length)?;
        let instructions = decode_instructions(code_array, constants)?;

        let mut exception_table = vec![];
        for _ in 0..reader.u16()? {
            let start_pc = reader.u16()? as usize;
            let end_pc = reader.u16()? as usize;
            let handler_pc = reader.u16()? as usize;
            let catch_type = match reader.u16()? {
                0 => None,
                idx => Some(constants.class_name(ClassConstantIndex(ConstantIndex(idx)))?),
            };
            exception_table.push(DecodedHandler {
                start_pc,
                end_pc,
                handler_pc,
                catch_type,
            });
        }

        let mut line_numbers = vec![];
        let mut local_variables = vec![];
        for _ in 0..reader.u16()? {
            let name_index = Utf8ConstantIndex(ConstantIndex(reader.u16()?));
            let length = reader.u32()? as usize;
            let mut attribute = ByteReader::new(reader.bytes(length)?);
            let name = constants.utf8(name_index)?;
            if name == LineNumberTable::NAME {
                for _ in 0..attribute.u16()? {
                    let start_pc = attribute.u16()? as usize;
                    line_numbers.push((start_pc, attribute.u16()?));
                }
            } else if name == LocalVariableTable::NAME {
                for _ in 0..attribute.u16()? {
                    let start_pc = attribute.u16()? as usize;
                    let end_pc = start_pc + attribute.u16()? as usize;
                    let name = constants.utf8(Utf8ConstantIndex(ConstantIndex(attribute.u16()?)))?;
                    let descriptor =
                        constants.utf8(Utf8ConstantIndex(ConstantIndex(attribute.u16()?)))?;
                    local_variables.push(DecodedLocal {
                        start_pc,
                        end_pc,
                        name: UnqualifiedName::from_str(name).map_err(Error::MalformedClass)?,
                        descriptor: FieldType::parse(descriptor)
                            .map_err(|err| Error::BadDescriptor(err.to_string()))?,
                        index: attribute.u16()?,
                    });
                }
            } else {
                log::debug!("dropping code attribute {}", name);
            }
        }

        Ok(DecodedCode {
            max_stack,
            max_locals,
            code_length,
            instructions,
            exception_table,
            line_numbers,
            local_variables,
        })
    }

    /// Offsets which need a label when replaying
    fn label_offsets(&self) -> BTreeSet<usize> {
        let mut offsets = BTreeSet::new();
        for (_, insn) in &self.instructions {
            if let DecodedInstruction::Branch(branch) = insn {
                offsets.extend(branch.jump_targets().targets().iter().copied());
            }
        }
        for handler in &self.exception_table {
            offsets.insert(handler.start_pc);
            offsets.insert(handler.end_pc);
            offsets.insert(handler.handler_pc);
        }
        offsets
    }

    /// Push the decoded body into a code builder
    ///
    /// Labels are placed at every jump target and exception range boundary. Line numbers are
    /// replayed in order of offset.
    pub fn replay(&self, code: &mut CodeBuilder<'_, '_>) -> Result<(), Error> {
        let labels: HashMap<usize, SynLabel> = self
            .label_offsets()
            .into_iter()
            .map(|offset| (offset, code.fresh_label()))
            .collect();

        let mut line_numbers = self.line_numbers.clone();
        line_numbers.sort_by_key(|(start_pc, _)| *start_pc);
        let mut line_numbers = line_numbers.into_iter().peekable();

        let mut positions: HashMap<usize, CodePosition> = HashMap::new();
        let mut visit = |code: &mut CodeBuilder<'_, '_>, offset: usize| -> Result<(), Error> {
            if let Some(label) = labels.get(&offset) {
                code.place_label(*label)?;
            }
            positions.insert(offset, code.position());
            while let Some((start_pc, line_number)) = line_numbers.peek().copied() {
                if start_pc > offset {
                    break;
                }
                if start_pc < offset {
                    log::warn!("line number entry at {} is not at an instruction", start_pc);
                } else {
                    code.add_line_number(line_number);
                }
                line_numbers.next();
            }
            Ok(())
        };

        for (offset, insn) in &self.instructions {
            visit(code, *offset)?;
            match insn {
                DecodedInstruction::Straight(insn) => code.push_instruction(insn.clone())?,
                DecodedInstruction::Branch(branch) => {
                    // Every jump target was given a label above
                    let label = |offset: &usize| labels.get(offset).copied().unwrap_or(SynLabel::START);
                    code.push_branch_instruction(branch.map_labels(label, label, |_| ()))?;
                }
            }
        }
        visit(code, self.code_length)?;

        for handler in &self.exception_table {
            let label = |offset: usize| labels.get(&offset).copied().unwrap_or(SynLabel::START);
            code.add_exception_handler(
                label(handler.start_pc),
                label(handler.end_pc),
                label(handler.handler_pc),
                handler.catch_type.clone(),
            )?;
        }

        for local in &self.local_variables {
            let position = |offset: usize| {
                positions.get(&offset).copied().ok_or_else(|| {
                    Error::MalformedClass(format!(
                        "local variable {} bound at {}, which is not an instruction",
                        local.name.as_str(),
                        offset
                    ))
                })
            };
            code.add_local_variable(
                position(local.start_pc)?,
                position(local.end_pc)?,
                &local.name,
                &local.descriptor,
                local.index,
            )?;
        }

        code.set_max_stack_and_locals(self.max_stack, self.max_locals);
        Ok(())
    }
}

/// Decode a full code array
pub fn decode_instructions(
    code_array: &[u8],
    constants: &ConstantsPool,
) -> Result<Vec<(usize, DecodedInstruction)>, Error> {
    let mut reader = ByteReader::new(code_array);
    let mut instructions = vec![];
    while !reader.is_empty() {
        let offset = reader.position();
        let insn = decode_instruction(&mut reader, constants)?;
        instructions.push((offset, insn));
    }

    for (offset, insn) in &instructions {
        if let DecodedInstruction::Branch(branch) = insn {
            for target in branch.jump_targets().targets() {
                if instructions.binary_search_by_key(target, |(at, _)| *at).is_err() {
                    return Err(Error::MalformedClass(format!(
                        "jump at {} to {} does not land on an instruction",
                        offset, target
                    )));
                }
            }
        }
    }
    Ok(instructions)
}

fn decode_instruction(
    reader: &mut ByteReader<'_>,
    constants: &ConstantsPool,
) -> Result<DecodedInstruction, Error> {
    use BranchInstruction as B;
    use DecodedInstruction::{Branch, Straight};
    use Instruction as I;

    let offset = reader.position();
    let opcode = reader.u8()?;

    let class = |idx: u16| constants.class(ClassConstantIndex(ConstantIndex(idx)));
    let field = |idx: u16| constants.field_ref(FieldRefConstantIndex(ConstantIndex(idx)));
    let method = |idx: u16| constants.method_ref(MethodRefConstantIndex(ConstantIndex(idx)));
    let jump = |relative: i32| -> Result<usize, Error> {
        usize::try_from(offset as i64 + relative as i64)
            .map_err(|_| Error::MalformedClass(format!("jump at {} before code start", offset)))
    };

    let insn = match opcode {
        0x00 => Straight(I::Nop),
        0x01 => Straight(I::AConstNull),
        0x02 => Straight(I::IConstM1),
        0x03 => Straight(I::IConst0),
        0x04 => Straight(I::IConst1),
        0x05 => Straight(I::IConst2),
        0x06 => Straight(I::IConst3),
        0x07 => Straight(I::IConst4),
        0x08 => Straight(I::IConst5),
        0x09 => Straight(I::LConst0),
        0x0a => Straight(I::LConst1),
        0x0b => Straight(I::FConst0),
        0x0c => Straight(I::FConst1),
        0x0d => Straight(I::FConst2),
        0x0e => Straight(I::DConst0),
        0x0f => Straight(I::DConst1),
        0x10 => Straight(I::BiPush(reader.i8()?)),
        0x11 => Straight(I::SiPush(reader.i16()?)),
        0x12 => Straight(I::Ldc(constants.constant_data(ConstantIndex(reader.u8()? as u16))?)),
        0x13 => Straight(I::Ldc(constants.constant_data(ConstantIndex(reader.u16()?))?)),
        0x14 => Straight(I::Ldc2(constants.constant_data(ConstantIndex(reader.u16()?))?)),
        0x15 => Straight(I::ILoad(reader.u8()? as u16)),
        0x16 => Straight(I::LLoad(reader.u8()? as u16)),
        0x17 => Straight(I::FLoad(reader.u8()? as u16)),
        0x18 => Straight(I::DLoad(reader.u8()? as u16)),
        0x19 => Straight(I::ALoad(reader.u8()? as u16)),
        0x1a..=0x1d => Straight(I::ILoad((opcode - 0x1a) as u16)),
        0x1e..=0x21 => Straight(I::LLoad((opcode - 0x1e) as u16)),
        0x22..=0x25 => Straight(I::FLoad((opcode - 0x22) as u16)),
        0x26..=0x29 => Straight(I::DLoad((opcode - 0x26) as u16)),
        0x2a..=0x2d => Straight(I::ALoad((opcode - 0x2a) as u16)),
        0x2e => Straight(I::IALoad),
        0x2f => Straight(I::LALoad),
        0x30 => Straight(I::FALoad),
        0x31 => Straight(I::DALoad),
        0x32 => Straight(I::AALoad),
        0x33 => Straight(I::BALoad),
        0x34 => Straight(I::CALoad),
        0x35 => Straight(I::SALoad),
        0x36 => Straight(I::IStore(reader.u8()? as u16)),
        0x37 => Straight(I::LStore(reader.u8()? as u16)),
        0x38 => Straight(I::FStore(reader.u8()? as u16)),
        0x39 => Straight(I::DStore(reader.u8()? as u16)),
        0x3a => Straight(I::AStore(reader.u8()? as u16)),
        0x3b..=0x3e => Straight(I::IStore((opcode - 0x3b) as u16)),
        0x3f..=0x42 => Straight(I::LStore((opcode - 0x3f) as u16)),
        0x43..=0x46 => Straight(I::FStore((opcode - 0x43) as u16)),
        0x47..=0x4a => Straight(I::DStore((opcode - 0x47) as u16)),
        0x4b..=0x4e => Straight(I::AStore((opcode - 0x4b) as u16)),
        0x4f => Straight(I::IAStore),
        0x50 => Straight(I::LAStore),
        0x51 => Straight(I::FAStore),
        0x52 => Straight(I::DAStore),
        0x53 => Straight(I::AAStore),
        0x54 => Straight(I::BAStore),
        0x55 => Straight(I::CAStore),
        0x56 => Straight(I::SAStore),
        0x57 => Straight(I::Pop),
        0x58 => Straight(I::Pop2),
        0x59 => Straight(I::Dup),
        0x5a => Straight(I::DupX1),
        0x5b => Straight(I::DupX2),
        0x5c => Straight(I::Dup2),
        0x5d => Straight(I::Dup2X1),
        0x5e => Straight(I::Dup2X2),
        0x5f => Straight(I::Swap),
        0x60 => Straight(I::IAdd),
        0x61 => Straight(I::LAdd),
        0x62 => Straight(I::FAdd),
        0x63 => Straight(I::DAdd),
        0x64 => Straight(I::ISub),
        0x65 => Straight(I::LSub),
        0x66 => Straight(I::FSub),
        0x67 => Straight(I::DSub),
        0x68 => Straight(I::IMul),
        0x69 => Straight(I::LMul),
        0x6a => Straight(I::FMul),
        0x6b => Straight(I::DMul),
        0x6c => Straight(I::IDiv),
        0x6d => Straight(I::LDiv),
        0x6e => Straight(I::FDiv),
        0x6f => Straight(I::DDiv),
        0x70 => Straight(I::IRem),
        0x71 => Straight(I::LRem),
        0x72 => Straight(I::FRem),
        0x73 => Straight(I::DRem),
        0x74 => Straight(I::INeg),
        0x75 => Straight(I::LNeg),
        0x76 => Straight(I::FNeg),
        0x77 => Straight(I::DNeg),
        0x78 => Straight(I::ISh(ShiftType::Left)),
        0x79 => Straight(I::LSh(ShiftType::Left)),
        0x7a => Straight(I::ISh(ShiftType::ArithmeticRight)),
        0x7b => Straight(I::LSh(ShiftType::ArithmeticRight)),
        0x7c => Straight(I::ISh(ShiftType::LogicalRight)),
        0x7d => Straight(I::LSh(ShiftType::LogicalRight)),
        0x7e => Straight(I::IAnd),
        0x7f => Straight(I::LAnd),
        0x80 => Straight(I::IOr),
        0x81 => Straight(I::LOr),
        0x82 => Straight(I::IXor),
        0x83 => Straight(I::LXor),
        0x84 => {
            let idx = reader.u8()? as u16;
            Straight(I::IInc(idx, reader.i8()? as i16))
        }
        0x85 => Straight(I::I2L),
        0x86 => Straight(I::I2F),
        0x87 => Straight(I::I2D),
        0x88 => Straight(I::L2I),
        0x89 => Straight(I::L2F),
        0x8a => Straight(I::L2D),
        0x8b => Straight(I::F2I),
        0x8c => Straight(I::F2L),
        0x8d => Straight(I::F2D),
        0x8e => Straight(I::D2I),
        0x8f => Straight(I::D2L),
        0x90 => Straight(I::D2F),
        0x91 => Straight(I::I2B),
        0x92 => Straight(I::I2C),
        0x93 => Straight(I::I2S),
        0x94 => Straight(I::LCmp),
        0x95 => Straight(I::FCmp(CompareMode::L)),
        0x96 => Straight(I::FCmp(CompareMode::G)),
        0x97 => Straight(I::DCmp(CompareMode::L)),
        0x98 => Straight(I::DCmp(CompareMode::G)),
        0x99..=0x9e => {
            let target = jump(reader.i16()? as i32)?;
            Branch(B::If(ord_comparison(opcode - 0x99), target, ()))
        }
        0x9f..=0xa4 => {
            let target = jump(reader.i16()? as i32)?;
            Branch(B::IfICmp(ord_comparison(opcode - 0x9f), target, ()))
        }
        0xa5 | 0xa6 => {
            let target = jump(reader.i16()? as i32)?;
            Branch(B::IfACmp(eq_comparison(opcode - 0xa5), target, ()))
        }
        0xa7 => Branch(B::Goto(jump(reader.i16()? as i32)?)),
        0xa8 => Branch(B::Jsr(jump(reader.i16()? as i32)?, ())),
        0xa9 => Branch(B::Ret(reader.u8()? as u16)),
        0xaa => {
            let padding = reader.align(4)?;
            let default = jump(reader.i32()?)?;
            let low = reader.i32()?;
            let high = reader.i32()?;
            if high < low {
                return Err(Error::MalformedClass(format!(
                    "tableswitch at {} has high {} below low {}",
                    offset, high, low
                )));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            let targets = (0..count)
                .map(|_| jump(reader.i32()?))
                .collect::<Result<Vec<_>, _>>()?;
            Branch(B::TableSwitch {
                padding,
                default,
                low,
                targets,
            })
        }
        0xab => {
            let padding = reader.align(4)?;
            let default = jump(reader.i32()?)?;
            let count = reader.i32()?;
            let count = usize::try_from(count).map_err(|_| {
                Error::MalformedClass(format!("lookupswitch at {} has {} pairs", offset, count))
            })?;
            let targets = (0..count)
                .map(|_| {
                    let key = reader.i32()?;
                    Ok((key, jump(reader.i32()?)?))
                })
                .collect::<Result<Vec<_>, Error>>()?;
            Branch(B::LookupSwitch {
                padding,
                default,
                targets,
            })
        }
        0xac => Branch(B::IReturn),
        0xad => Branch(B::LReturn),
        0xae => Branch(B::FReturn),
        0xaf => Branch(B::DReturn),
        0xb0 => Branch(B::AReturn),
        0xb1 => Branch(B::Return),
        0xb2 => Straight(I::GetStatic(field(reader.u16()?)?)),
        0xb3 => Straight(I::PutStatic(field(reader.u16()?)?)),
        0xb4 => Straight(I::GetField(field(reader.u16()?)?)),
        0xb5 => Straight(I::PutField(field(reader.u16()?)?)),
        0xb6 => Straight(I::Invoke(InvokeType::Virtual, method(reader.u16()?)?)),
        0xb7 => Straight(I::Invoke(InvokeType::Special, method(reader.u16()?)?)),
        0xb8 => Straight(I::Invoke(InvokeType::Static, method(reader.u16()?)?)),
        0xb9 => {
            let method = method(reader.u16()?)?;
            let count = reader.u8()?;
            reader.u8()?;
            Straight(I::Invoke(InvokeType::Interface(count), method))
        }
        0xba => {
            let idx = reader.u16()?;
            reader.u16()?;
            Straight(I::InvokeDynamic(
                constants.call_site(InvokeDynamicConstantIndex(ConstantIndex(idx)))?,
            ))
        }
        0xbb => Straight(I::New(class(reader.u16()?)?)),
        0xbc => {
            let code = reader.u8()?;
            let base_type = BaseType::from_array_type_code(code).ok_or_else(|| {
                Error::MalformedClass(format!("newarray at {} has type code {}", offset, code))
            })?;
            Straight(I::NewArray(base_type))
        }
        0xbd => Straight(I::ANewArray(class(reader.u16()?)?)),
        0xbe => Straight(I::ArrayLength),
        0xbf => Branch(B::AThrow),
        0xc0 => Straight(I::CheckCast(class(reader.u16()?)?)),
        0xc1 => Straight(I::InstanceOf(class(reader.u16()?)?)),
        0xc2 => Straight(I::MonitorEnter),
        0xc3 => Straight(I::MonitorExit),
        0xc4 => {
            let widened = reader.u8()?;
            let idx = reader.u16()?;
            match widened {
                0x15 => Straight(I::ILoad(idx)),
                0x16 => Straight(I::LLoad(idx)),
                0x17 => Straight(I::FLoad(idx)),
                0x18 => Straight(I::DLoad(idx)),
                0x19 => Straight(I::ALoad(idx)),
                0x36 => Straight(I::IStore(idx)),
                0x37 => Straight(I::LStore(idx)),
                0x38 => Straight(I::FStore(idx)),
                0x39 => Straight(I::DStore(idx)),
                0x3a => Straight(I::AStore(idx)),
                0x84 => Straight(I::IInc(idx, reader.i16()?)),
                0xa9 => Branch(B::Ret(idx)),
                _ => {
                    return Err(Error::UnsupportedInstruction {
                        opcode: widened,
                        offset: offset + 1,
                    })
                }
            }
        }
        0xc5 => {
            let class = class(reader.u16()?)?;
            Straight(I::MultiANewArray(class, reader.u8()?))
        }
        0xc6 | 0xc7 => {
            let target = jump(reader.i16()? as i32)?;
            Branch(B::IfNull(eq_comparison(opcode - 0xc6), target, ()))
        }
        0xc8 => Branch(B::GotoW(jump(reader.i32()?)?)),
        0xc9 => Branch(B::JsrW(jump(reader.i32()?)?, ())),
        _ => return Err(Error::UnsupportedInstruction { opcode, offset }),
    };
    Ok(insn)
}

/// Comparisons in opcode order (`eq`, `ne`, `lt`, `ge`, `gt`, `le`)
fn ord_comparison(delta: u8) -> OrdComparison {
    match delta {
        0 => OrdComparison::EQ,
        1 => OrdComparison::NE,
        2 => OrdComparison::LT,
        3 => OrdComparison::GE,
        4 => OrdComparison::GT,
        _ => OrdComparison::LE,
    }
}

fn eq_comparison(delta: u8) -> EqComparison {
    if delta == 0 {
        EqComparison::EQ
    } else {
        EqComparison::NE
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantsWriter;
    use crate::jvm::{FieldRef, RefType};

    fn decode(code_array: &[u8], constants: &ConstantsPool) -> Vec<(usize, DecodedInstruction)> {
        decode_instructions(code_array, constants).unwrap()
    }

    #[test]
    fn short_and_wide_forms() {
        let constants = ConstantsPool::new();
        let decoded = decode(
            &[
                0x1b, // iload_1
                0x15, 0x07, // iload 7
                0xc4, 0x15, 0x01, 0x00, // wide iload 256
                0x84, 0x02, 0xff, // iinc 2 -1
                0xc4, 0x84, 0x00, 0x02, 0x01, 0x00, // wide iinc 2 256
                0xb1, // return
            ],
            &constants,
        );
        let offsets: Vec<usize> = decoded.iter().map(|(offset, _)| *offset).collect();
        assert_eq!(offsets, vec![0, 1, 3, 7, 10, 16]);
        assert_eq!(decoded[0].1, DecodedInstruction::Straight(Instruction::ILoad(1)));
        assert_eq!(decoded[1].1, DecodedInstruction::Straight(Instruction::ILoad(7)));
        assert_eq!(decoded[2].1, DecodedInstruction::Straight(Instruction::ILoad(256)));
        assert_eq!(decoded[3].1, DecodedInstruction::Straight(Instruction::IInc(2, -1)));
        assert_eq!(decoded[4].1, DecodedInstruction::Straight(Instruction::IInc(2, 256)));
        assert_eq!(decoded[5].1, DecodedInstruction::Branch(BranchInstruction::Return));
    }

    #[test]
    fn jump_targets_are_absolute() {
        let constants = ConstantsPool::new();
        let decoded = decode(
            &[
                0x03, // iconst_0
                0x99, 0x00, 0x04, // ifeq +4
                0x04, // iconst_1
                0x57, // pop
                0xa7, 0xff, 0xfa, // goto -6
            ],
            &constants,
        );
        assert_eq!(
            decoded[1].1,
            DecodedInstruction::Branch(BranchInstruction::If(OrdComparison::EQ, 5, ()))
        );
        assert_eq!(
            decoded[4].1,
            DecodedInstruction::Branch(BranchInstruction::Goto(0))
        );
    }

    #[test]
    fn switch_padding() {
        let constants = ConstantsPool::new();
        let decoded = decode(
            &[
                0x03, // iconst_0
                0xaa, 0x00, 0x00, // tableswitch, padded to offset 4
                0x00, 0x00, 0x00, 0x13, // default: +19
                0x00, 0x00, 0x00, 0x01, // low: 1
                0x00, 0x00, 0x00, 0x01, // high: 1
                0x00, 0x00, 0x00, 0x13, // 1: +19
                0xb1, // return
            ],
            &constants,
        );
        assert_eq!(
            decoded[1].1,
            DecodedInstruction::Branch(BranchInstruction::TableSwitch {
                padding: 2,
                default: 20,
                low: 1,
                targets: vec![20],
            })
        );
        assert_eq!(decoded[2].0, 20);
    }

    #[test]
    fn constants_are_resolved() {
        let mut constants = ConstantsPool::new();
        let field = FieldRef::new(
            BinaryName::OBJECT,
            UnqualifiedName::from_str("x").unwrap(),
            FieldType::int(),
        );
        let field_index = field.constant_index(&mut constants).unwrap();
        let class_index = BinaryName::STRING.constant_index(&mut constants).unwrap();
        let [f1, f2] = (field_index.0).0.to_be_bytes();
        let [c1, c2] = (class_index.0).0.to_be_bytes();

        let decoded = decode(&[0xb2, f1, f2, 0xbb, c1, c2], &constants);
        assert_eq!(decoded[0].1, DecodedInstruction::Straight(Instruction::GetStatic(field)));
        assert_eq!(
            decoded[1].1,
            DecodedInstruction::Straight(Instruction::New(RefType::Object(BinaryName::STRING)))
        );
    }

    #[test]
    fn bad_code() {
        let constants = ConstantsPool::new();
        assert!(matches!(
            decode_instructions(&[0xca], &constants),
            Err(Error::UnsupportedInstruction { opcode: 0xca, offset: 0 })
        ));
        assert!(matches!(
            decode_instructions(&[0x00, 0xa7, 0x00, 0x02], &constants),
            Err(Error::MalformedClass(_))
        ));
        assert!(matches!(
            decode_instructions(&[0x11, 0x00], &constants),
            Err(Error::MalformedClass(_))
        ));
    }
}
