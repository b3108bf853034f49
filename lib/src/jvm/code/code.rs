use crate::jvm::class_file;
use crate::jvm::class_file::{
    BytecodeIndex, ClassConstantIndex, ConstantsPool, ExceptionHandler, LineNumber,
    LocalVariable, Serialize, Utf8ConstantIndex,
};
use crate::jvm::code::{jump_encoding, BasicBlock, BlockId, BranchInstruction, CodePosition};
use crate::jvm::verifier::{Frame, SlotFrame, TypeTable};
use crate::jvm::Error;
use crate::util::Offset;
use std::cell::Cell;
use std::collections::BTreeMap;

/// Semantic representation of a method body, after control flow analysis
pub struct Code {
    /// Maximum size of locals through the method
    pub max_locals: usize,

    /// Maximum size of stack through the method
    pub max_stack: usize,

    /// Basic blocks in layout order
    pub blocks: Vec<BasicBlock<BlockId, BlockId>>,

    /// Frames to store in a `StackMapTable` (omitted when frames aren't being computed)
    pub frames: Option<StoredFrames>,

    /// Exception handlers, in order of priority
    pub exception_handlers: Vec<ExceptionRange>,

    pub line_numbers: Vec<(CodePosition, u16)>,
    pub local_variables: Vec<LocalVariableRange>,
}

/// Inferred frames, one per block
pub struct StoredFrames {
    /// Frame implied by the method descriptor
    pub entry: SlotFrame,

    /// Input frame of each block (`None` only for blocks without any code)
    pub inputs: Vec<Option<SlotFrame>>,

    /// Blocks which must have an explicit frame in the `StackMapTable`
    pub must_store: Vec<bool>,
}

/// Exception handler covering the blocks `start..end`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionRange {
    pub start: BlockId,
    pub end: BlockId,
    pub handler: BlockId,
    pub catch_type: Option<ClassConstantIndex>,
}

impl ExceptionRange {
    /// Remove blocks from the range, splitting it into the pieces left over
    pub fn excise(&self, removed: &[BlockId]) -> Vec<ExceptionRange> {
        let mut pieces = vec![];
        let mut start = self.start;
        for block in removed {
            if *block < start || *block >= self.end {
                continue;
            }
            if start < *block {
                pieces.push(ExceptionRange {
                    start,
                    end: *block,
                    ..self.clone()
                });
            }
            start = BlockId(block.0 + 1);
        }
        if start < self.end {
            pieces.push(ExceptionRange {
                start,
                ..self.clone()
            });
        }
        pieces
    }
}

/// Range of code in which a local variable has a name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVariableRange {
    pub start: CodePosition,
    pub end: CodePosition,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub index: u16,
}

fn bytecode_index(offset: Offset) -> Result<BytecodeIndex, Error> {
    u16::try_from(offset.0)
        .map(BytecodeIndex)
        .map_err(|_| Error::MethodCodeOverflow(offset))
}

fn table_length(table: &'static str, count: usize) -> Result<(), Error> {
    if count > u16::MAX as usize {
        Err(Error::TooManyEntries { table, count })
    } else {
        Ok(())
    }
}

impl Code {
    pub fn serialize_code(
        mut self,
        constants_pool: &mut ConstantsPool,
        types: &TypeTable,
    ) -> Result<class_file::Code, Error> {
        let max_locals = u16::try_from(self.max_locals)
            .map_err(|_| Error::MethodCodeMaxLocalsOverflow(self.max_locals))?;
        let max_stack = u16::try_from(self.max_stack)
            .map_err(|_| Error::MethodCodeMaxStackOverflow(self.max_stack))?;

        // Check and rewrite oversized jumps
        let block_offsets = jump_encoding::resolve_offsets(&mut self.blocks)?;
        let position_offset =
            |pos: &CodePosition| Offset(block_offsets[pos.block.0].0 + pos.offset_in_block);

        // Accumulate the code array
        let mut code_array = class_file::BytecodeArray(vec![]);
        let overflowed = Cell::new(false);
        for (block, block_offset) in self.blocks.iter().zip(&block_offsets) {
            for (_, _, insn) in block.instructions.iter() {
                insn.serialize(&mut code_array.0)?;
            }
            let branch_offset = (block_offset.0 + block.instructions.offset_len().0) as isize;
            let relative = |target: &BlockId, from: isize| {
                block_offsets[target.0].0 as isize - from
            };
            let short_jump = |target: &BlockId| {
                i16::try_from(relative(target, branch_offset)).unwrap_or_else(|_| {
                    overflowed.set(true);
                    0
                })
            };
            let wide_jump = |target: &BlockId, from: isize| {
                i32::try_from(relative(target, from)).unwrap_or_else(|_| {
                    overflowed.set(true);
                    0
                })
            };

            match block.branch_end.inverted() {
                Some(inverted) if block.widened => {
                    // `if!cond` skipping over the `goto_w` which jumps to the real target
                    let target = block.branch_end.jump_targets().targets().to_vec();
                    inverted
                        .map_labels(|_| 8i16, |_| 0i32, |_| ())
                        .serialize(&mut code_array.0)?;
                    for target in target {
                        BranchInstruction::<i16, i32, ()>::GotoW(wide_jump(
                            &target,
                            branch_offset + 3,
                        ))
                        .serialize(&mut code_array.0)?;
                    }
                }
                _ => block
                    .branch_end
                    .map_labels(short_jump, |lbl| wide_jump(lbl, branch_offset), |_| ())
                    .serialize(&mut code_array.0)?,
            }
        }
        if overflowed.get() {
            return Err(Error::MethodCodeOverflow(block_offsets[self.blocks.len()]));
        }

        let mut attributes = vec![];

        // Line numbers and local variable names
        if !self.line_numbers.is_empty() {
            table_length("LineNumberTable", self.line_numbers.len())?;
            let line_numbers = self
                .line_numbers
                .iter()
                .map(|(pos, line_number)| {
                    Ok(LineNumber {
                        start_pc: bytecode_index(position_offset(pos))?,
                        line_number: *line_number,
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?;
            attributes.push(
                constants_pool.get_attribute(class_file::LineNumberTable(line_numbers))?,
            );
        }
        if !self.local_variables.is_empty() {
            table_length("LocalVariableTable", self.local_variables.len())?;
            let local_variables = self
                .local_variables
                .iter()
                .map(|local| {
                    let start = position_offset(&local.start);
                    let end = position_offset(&local.end);
                    Ok(LocalVariable {
                        start_pc: bytecode_index(start)?,
                        length: bytecode_index(Offset(end.0.saturating_sub(start.0)))?.0,
                        name_index: local.name_index,
                        descriptor_index: local.descriptor_index,
                        index: local.index,
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?;
            attributes.push(
                constants_pool.get_attribute(class_file::LocalVariableTable(local_variables))?,
            );
        }

        // Add `StackMapTable` attribute only if there are frames
        if let Some(frames) = &self.frames {
            let stack_map_frames =
                Self::stack_map_frames(&self.blocks, &block_offsets, frames, types, constants_pool)?;
            if !stack_map_frames.is_empty() {
                table_length("StackMapTable", stack_map_frames.len())?;
                let stack_map_table = class_file::StackMapTable(stack_map_frames);
                attributes.push(constants_pool.get_attribute(stack_map_table)?);
            }
        }

        // Exception handlers with empty ranges are dropped
        let mut exception_table = vec![];
        for range in &self.exception_handlers {
            let start = block_offsets[range.start.0];
            let end = block_offsets[range.end.0];
            if start >= end {
                continue;
            }
            exception_table.push(ExceptionHandler {
                start_pc: bytecode_index(start)?,
                end_pc: bytecode_index(end)?,
                handler_pc: bytecode_index(block_offsets[range.handler.0])?,
                catch_type: range.catch_type,
            });
        }
        table_length("exception table", exception_table.len())?;

        Ok(class_file::Code {
            max_stack,
            max_locals,
            code_array,
            exception_table,
            attributes,
        })
    }

    /// Pick out the frames that need to be stored and compress them
    fn stack_map_frames(
        blocks: &[BasicBlock<BlockId, BlockId>],
        block_offsets: &[Offset],
        frames: &StoredFrames,
        types: &TypeTable,
        constants_pool: &mut ConstantsPool,
    ) -> Result<Vec<class_file::StackMapFrame>, Error> {
        let code_length = block_offsets[blocks.len()];

        // The target of the inverted conditional in a widened branch needs a frame too
        let mut stored_offsets: Vec<Offset> = vec![];
        for (idx, block) in blocks.iter().enumerate() {
            let offset = block_offsets[idx];
            if frames.must_store[idx] && offset < code_length {
                stored_offsets.push(offset);
            }
            if block.widened && block_offsets[idx + 1] < code_length {
                stored_offsets.push(block_offsets[idx + 1]);
            }
        }

        // When several blocks start at the same offset, the last one is the one with code
        let mut frame_at: BTreeMap<Offset, &SlotFrame> = BTreeMap::new();
        for (idx, input) in frames.inputs.iter().enumerate() {
            if let Some(input) = input {
                frame_at.insert(block_offsets[idx], input);
            }
        }

        stored_offsets.sort();
        stored_offsets.dedup();

        let mut previous_frame =
            Frame::from_slots(&frames.entry).into_serializable(types, constants_pool, block_offsets)?;
        let mut previous_offset: Option<Offset> = None;
        let mut stack_map_frames = vec![];
        for offset in stored_offsets {
            let slot_frame = match frame_at.get(&offset) {
                Some(slot_frame) => slot_frame,
                None => continue,
            };
            let frame = Frame::from_slots(slot_frame).into_serializable(
                types,
                constants_pool,
                block_offsets,
            )?;
            let offset_delta = match previous_offset {
                None => offset.0,
                Some(previous_offset) => offset.0 - previous_offset.0 - 1,
            };
            stack_map_frames.push(frame.stack_map_frame(offset_delta as u16, &previous_frame));

            previous_frame = frame;
            previous_offset = Some(offset);
        }

        log::trace!("stored {} stack map frames", stack_map_frames.len());
        Ok(stack_map_frames)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn range(start: usize, end: usize) -> ExceptionRange {
        ExceptionRange {
            start: BlockId(start),
            end: BlockId(end),
            handler: BlockId(9),
            catch_type: None,
        }
    }

    #[test]
    fn excise_splits_ranges() {
        assert_eq!(range(0, 4).excise(&[]), vec![range(0, 4)]);
        assert_eq!(range(0, 4).excise(&[BlockId(2)]), vec![range(0, 2), range(3, 4)]);
        assert_eq!(range(0, 4).excise(&[BlockId(0), BlockId(3)]), vec![range(1, 3)]);
        assert_eq!(range(1, 2).excise(&[BlockId(1)]), vec![]);
        assert_eq!(range(1, 3).excise(&[BlockId(0), BlockId(5)]), vec![range(1, 3)]);
    }
}
