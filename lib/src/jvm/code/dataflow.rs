//! Fixpoint propagation of frames (or just stack heights) over the basic block graph
//!
//! Both analyses use a worklist seeded with the entry block. For full frames, the input frame of
//! a block is the merge of the frames flowing in over all of its incoming edges, and a block gets
//! re-queued whenever its input frame changes. Since merging only ever moves types up the lattice
//! (towards `Top`) and there are finitely many types in play, this terminates.
//!
//! Computing only the maximum stack height is much cheaper, and it also supports subroutines
//! (`jsr`/`ret`), which full frame inference does not.

use super::{BasicBlock, BlockId, BranchInstruction, EdgeKind};
use crate::jvm::class_graph::ClassHierarchy;
use crate::jvm::verifier::{ObjectType, SlotFrame, TypeTable, VType, VerificationType};
use crate::jvm::{BinaryName, Error, MethodAccessFlags, MethodDescriptor, UnqualifiedName};
use std::collections::{HashSet, VecDeque};

/// Result of full frame inference
#[derive(Debug)]
pub struct FrameAnalysis {
    /// Input frame of each block, `None` for unreachable blocks
    pub inputs: Vec<Option<SlotFrame>>,

    /// Blocks whose input frame must be stored in the `StackMapTable`
    pub must_store: Vec<bool>,

    pub max_stack: usize,
}

impl FrameAnalysis {
    pub fn is_reachable(&self, block: BlockId) -> bool {
        matches!(self.inputs.get(block.0), Some(Some(_)))
    }
}

/// Frame on entry to a method, as implied by its descriptor
///
/// Locals are padded with `Top` up to `max_locals`.
pub fn entry_frame(
    access_flags: MethodAccessFlags,
    this_class: &BinaryName,
    name: &UnqualifiedName,
    descriptor: &MethodDescriptor<BinaryName>,
    max_locals: usize,
    types: &mut TypeTable,
) -> SlotFrame {
    let mut locals: Vec<VType> = vec![];
    if !access_flags.contains(MethodAccessFlags::STATIC) {
        if *name == UnqualifiedName::INIT {
            locals.push(VerificationType::UninitializedThis);
        } else {
            let this_type = ObjectType::class(types.object(this_class.clone()));
            locals.push(VerificationType::Object(this_type));
        }
    }
    for parameter in &descriptor.parameters {
        let vtype = types.field_type(parameter);
        locals.push(vtype);
        if matches!(vtype, VerificationType::Long | VerificationType::Double) {
            locals.push(VerificationType::Top);
        }
    }
    if locals.len() < max_locals {
        locals.resize(max_locals, VerificationType::Top);
    }
    SlotFrame {
        locals,
        stack: vec![],
    }
}

fn uses_subroutines(blocks: &[BasicBlock<BlockId, BlockId>]) -> bool {
    blocks.iter().any(|block| {
        matches!(
            block.branch_end,
            BranchInstruction::Jsr(..) | BranchInstruction::JsrW(..) | BranchInstruction::Ret(_)
        )
    })
}

fn checked_max_stack(max_stack: usize) -> Result<usize, Error> {
    if max_stack > u16::MAX as usize {
        Err(Error::MethodCodeMaxStackOverflow(max_stack))
    } else {
        Ok(max_stack)
    }
}

/// Infer the input frame of every block
pub fn compute_frames(
    blocks: &[BasicBlock<BlockId, BlockId>],
    entry: SlotFrame,
    this_class: &BinaryName,
    types: &mut TypeTable,
    hierarchy: &dyn ClassHierarchy,
) -> Result<FrameAnalysis, Error> {
    if uses_subroutines(blocks) {
        return Err(Error::UnsupportedSubroutine);
    }

    let end = BlockId(blocks.len());
    let mut inputs: Vec<Option<SlotFrame>> = vec![None; blocks.len()];
    let mut must_store = vec![false; blocks.len()];
    let mut in_worklist = vec![false; blocks.len()];
    let mut worklist: VecDeque<BlockId> = VecDeque::new();
    let mut max_stack = 0;

    if !blocks.is_empty() {
        inputs[0] = Some(entry);
        in_worklist[0] = true;
        worklist.push_back(BlockId(0));
    }

    while let Some(block_id) = worklist.pop_front() {
        in_worklist[block_id.0] = false;
        let block = &blocks[block_id.0];
        let input = match &inputs[block_id.0] {
            Some(input) => input.clone(),
            None => continue,
        };
        log::trace!("visiting {:?} with input {:?}", block_id, input);

        if input.stack.len() < block.frame.popped() {
            return Err(Error::StackUnderflow(block_id));
        }
        let block_max = input.stack.len() as isize + block.frame.max_relative_height();
        max_stack = max_stack.max(block_max as usize);

        let output = block.frame.output_frame(&input, types, this_class);

        for edge in &block.edges {
            let successor = edge.successor;
            if successor == end {
                return Err(Error::FallsOffEnd(block_id));
            }

            let candidate = match edge.kind {
                EdgeKind::Exception(catch_type) => {
                    must_store[successor.0] = true;
                    let exception = VerificationType::Object(ObjectType::class(catch_type));
                    block
                        .frame
                        .exception_frame(&input, &output, exception, types, hierarchy)?
                }
                EdgeKind::Jump => {
                    must_store[successor.0] = true;
                    output.clone()
                }
                EdgeKind::FallThrough => output.clone(),
                EdgeKind::SubroutineCall | EdgeKind::SubroutineReturn => {
                    return Err(Error::UnsupportedSubroutine)
                }
            };

            let changed = match inputs[successor.0].as_mut() {
                Some(existing) => {
                    if existing.stack.len() != candidate.stack.len() {
                        return Err(Error::InconsistentStackHeight {
                            block: successor,
                            expected: existing.stack.len(),
                            found: candidate.stack.len(),
                        });
                    }
                    existing.merge_from(&candidate, types, hierarchy)?
                }
                None => {
                    inputs[successor.0] = Some(candidate);
                    true
                }
            };

            if changed && !in_worklist[successor.0] {
                in_worklist[successor.0] = true;
                worklist.push_back(successor);
            }
        }
    }

    Ok(FrameAnalysis {
        inputs,
        must_store,
        max_stack: checked_max_stack(max_stack)?,
    })
}

/// Group blocks into the main body and subroutines
///
/// Every block gets the identifier of the first subroutine from which it is reachable without
/// going through a `jsr` (the main body is `0`, subroutines are numbered by their entry block).
/// Unreachable blocks get nothing.
fn mark_subroutines(blocks: &[BasicBlock<BlockId, BlockId>]) -> Vec<Option<usize>> {
    let mut subroutine_of: Vec<Option<usize>> = vec![None; blocks.len()];

    let mark = |entry: BlockId, subroutine: usize, subroutine_of: &mut Vec<Option<usize>>| {
        let mut to_visit = vec![entry];
        while let Some(block_id) = to_visit.pop() {
            if block_id.0 >= blocks.len() || subroutine_of[block_id.0].is_some() {
                continue;
            }
            subroutine_of[block_id.0] = Some(subroutine);
            for edge in &blocks[block_id.0].edges {
                if edge.kind != EdgeKind::SubroutineCall {
                    to_visit.push(edge.successor);
                }
            }
        }
    };

    if !blocks.is_empty() {
        mark(BlockId(0), 0, &mut subroutine_of);
    }
    for block in blocks {
        for edge in &block.edges {
            if edge.kind == EdgeKind::SubroutineCall {
                mark(edge.successor, edge.successor.0, &mut subroutine_of);
            }
        }
    }

    subroutine_of
}

/// Compute the maximum stack height, without tracking types
///
/// Blocks in the main body must always be reached with the same stack height. Blocks inside
/// subroutines get visited once for every distinct height they are called with.
pub fn compute_max_stack(blocks: &[BasicBlock<BlockId, BlockId>]) -> Result<usize, Error> {
    let end = BlockId(blocks.len());
    let subroutine_of = mark_subroutines(blocks);

    let returning_subroutines: HashSet<usize> = blocks
        .iter()
        .zip(&subroutine_of)
        .filter(|(block, _)| matches!(block.branch_end, BranchInstruction::Ret(_)))
        .filter_map(|(_, subroutine)| *subroutine)
        .collect();

    let mut main_heights: Vec<Option<usize>> = vec![None; blocks.len()];
    let mut subroutine_visits: HashSet<(BlockId, usize)> = HashSet::new();
    let mut worklist: Vec<(BlockId, usize)> = vec![];
    let mut max_stack = 0;

    if !blocks.is_empty() {
        worklist.push((BlockId(0), 0));
    }

    while let Some((block_id, height)) = worklist.pop() {
        let block = &blocks[block_id.0];
        if subroutine_of[block_id.0] == Some(0) {
            if let Some(expected) = main_heights[block_id.0] {
                if expected != height {
                    return Err(Error::InconsistentStackHeight {
                        block: block_id,
                        expected,
                        found: height,
                    });
                }
                continue;
            }
            main_heights[block_id.0] = Some(height);
        } else if !subroutine_visits.insert((block_id, height)) {
            continue;
        }
        log::trace!("visiting {:?} with stack height {}", block_id, height);

        if height < block.frame.popped() {
            return Err(Error::StackUnderflow(block_id));
        }
        let block_max = height as isize + block.frame.max_relative_height();
        max_stack = checked_max_stack(max_stack.max(block_max as usize))?;

        // Does the subroutine called by this block ever return?
        let callee_returns = block
            .edges
            .iter()
            .filter(|edge| edge.kind == EdgeKind::SubroutineCall)
            .filter_map(|edge| subroutine_of.get(edge.successor.0).copied().flatten())
            .any(|subroutine| returning_subroutines.contains(&subroutine));

        for edge in &block.edges {
            if edge.successor == end {
                return Err(Error::FallsOffEnd(block_id));
            }
            let successor_height = match edge.kind {
                EdgeKind::FallThrough | EdgeKind::Jump => height as isize + edge.relative_height,
                EdgeKind::SubroutineCall => height as isize + edge.relative_height + 1,
                EdgeKind::SubroutineReturn if callee_returns => {
                    height as isize + edge.relative_height
                }
                EdgeKind::SubroutineReturn => continue,
                EdgeKind::Exception(_) => 1,
            };
            let successor_height = checked_max_stack(successor_height as usize)?;
            worklist.push((edge.successor, successor_height));
        }
    }

    Ok(max_stack)
}

/// Overwrite unreachable blocks with `nop`s followed by `athrow`, returning the replaced blocks
///
/// The block keeps its width, so offsets computed before this are still valid. Blocks without any
/// bytes are left alone.
pub fn replace_dead_blocks(
    blocks: &mut [BasicBlock<BlockId, BlockId>],
    analysis: &FrameAnalysis,
) -> Vec<BlockId> {
    let mut replaced = vec![];
    for (idx, block) in blocks.iter_mut().enumerate() {
        let block_id = BlockId(idx);
        let width = block.width();
        if analysis.is_reachable(block_id) || width == 0 {
            continue;
        }
        log::warn!(
            "replacing unreachable {:?} ({} bytes) with nop...athrow",
            block_id,
            width
        );
        block.instructions = (1..width).map(|_| super::Instruction::Nop).collect();
        block.branch_end = BranchInstruction::AThrow;
        block.edges.clear();
        block.widened = false;
        replaced.push(block_id);
    }
    replaced
}

/// Frame stored for a block replaced by [`replace_dead_blocks`]
pub fn dead_block_frame(types: &mut TypeTable) -> SlotFrame {
    let throwable = ObjectType::class(types.object(BinaryName::THROWABLE));
    SlotFrame {
        locals: vec![],
        stack: vec![VerificationType::Object(throwable)],
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::ObjectHierarchy;
    use crate::jvm::code::{Edge, Instruction, OrdComparison, SymbolicInstruction};
    use crate::jvm::verifier::BlockFrame;
    use crate::jvm::FieldType;

    /// Build a block from symbolic instructions (operands must not need interning)
    fn block(
        id: usize,
        instructions: Vec<SymbolicInstruction>,
        branch_end: BranchInstruction<BlockId, BlockId, ()>,
        types: &mut TypeTable,
    ) -> BasicBlock<BlockId, BlockId> {
        let mut frame = BlockFrame::default();
        let mut serializable = vec![];
        for (offset, insn) in instructions.iter().enumerate() {
            frame.execute(insn, types, BlockId(id), offset);
            let interned = insn
                .map(
                    |_| Err(()),
                    |_| Err(()),
                    |_| Err(()),
                    |_| Err(()),
                    |_| Err(()),
                )
                .unwrap();
            serializable.push(interned);
        }
        frame.execute_branch(&branch_end);
        let relative_height = frame.relative_height();

        let mut edges = vec![];
        if let Some(target) = branch_end.jump_targets().targets().first() {
            edges.push(Edge {
                successor: *target,
                kind: EdgeKind::Jump,
                relative_height,
            });
        }
        if branch_end.fallthrough_target().is_some() || branch_end.width() == 0 {
            edges.push(Edge {
                successor: BlockId(id + 1),
                kind: EdgeKind::FallThrough,
                relative_height,
            });
        }

        BasicBlock {
            instructions: serializable.into_iter().collect(),
            branch_end,
            frame,
            edges,
            widened: false,
        }
    }

    use crate::util::Width;

    #[test]
    fn join_of_two_paths() {
        let mut types = TypeTable::new();
        let blocks = vec![
            block(
                0,
                vec![Instruction::ILoad(0)],
                BranchInstruction::If(OrdComparison::EQ, BlockId(2), ()),
                &mut types,
            ),
            block(
                1,
                vec![Instruction::IConst1, Instruction::IStore(1)],
                BranchInstruction::Goto(BlockId(3)),
                &mut types,
            ),
            block(
                2,
                vec![Instruction::FConst1, Instruction::FStore(1)],
                BranchInstruction::FallThrough(()),
                &mut types,
            ),
            block(3, vec![Instruction::ILoad(0)], BranchInstruction::IReturn, &mut types),
        ];
        let descriptor = MethodDescriptor {
            parameters: vec![FieldType::int()],
            return_type: Some(FieldType::int()),
        };
        let entry = entry_frame(
            MethodAccessFlags::STATIC,
            &BinaryName::OBJECT,
            &UnqualifiedName::from_str("f").unwrap(),
            &descriptor,
            2,
            &mut types,
        );
        let analysis =
            compute_frames(&blocks, entry, &BinaryName::OBJECT, &mut types, &ObjectHierarchy)
                .unwrap();

        let join = analysis.inputs[3].as_ref().unwrap();
        assert_eq!(
            join.locals,
            vec![VerificationType::Integer, VerificationType::Top]
        );
        assert_eq!(analysis.must_store, vec![false, false, true, true]);
        assert_eq!(analysis.max_stack, 1);
        assert_eq!(compute_max_stack(&blocks).unwrap(), 1);
    }

    use crate::jvm::Name;

    #[test]
    fn inconsistent_heights() {
        let mut types = TypeTable::new();
        let blocks = vec![
            block(
                0,
                vec![Instruction::ILoad(0)],
                BranchInstruction::If(OrdComparison::EQ, BlockId(2), ()),
                &mut types,
            ),
            block(1, vec![Instruction::IConst1], BranchInstruction::FallThrough(()), &mut types),
            block(2, vec![], BranchInstruction::Return, &mut types),
        ];
        assert!(matches!(
            compute_max_stack(&blocks),
            Err(Error::InconsistentStackHeight {
                block: BlockId(2),
                ..
            })
        ));
    }

    #[test]
    fn falls_off_end() {
        let mut types = TypeTable::new();
        let blocks = vec![block(
            0,
            vec![Instruction::Nop],
            BranchInstruction::FallThrough(()),
            &mut types,
        )];
        assert!(matches!(
            compute_max_stack(&blocks),
            Err(Error::FallsOffEnd(BlockId(0)))
        ));
    }

    #[test]
    fn underflow() {
        let mut types = TypeTable::new();
        let blocks = vec![block(0, vec![Instruction::Pop], BranchInstruction::Return, &mut types)];
        let entry = SlotFrame::default();
        assert!(matches!(
            compute_frames(&blocks, entry, &BinaryName::OBJECT, &mut types, &ObjectHierarchy),
            Err(Error::StackUnderflow(BlockId(0)))
        ));
    }

    #[test]
    fn dead_blocks_become_athrow() {
        let mut types = TypeTable::new();
        let mut blocks = vec![
            block(0, vec![], BranchInstruction::Return, &mut types),
            block(
                1,
                vec![Instruction::IConst1, Instruction::ILoad(200)],
                BranchInstruction::IReturn,
                &mut types,
            ),
        ];
        let analysis = compute_frames(
            &blocks,
            SlotFrame::default(),
            &BinaryName::OBJECT,
            &mut types,
            &ObjectHierarchy,
        )
        .unwrap();
        assert!(!analysis.is_reachable(BlockId(1)));

        let width = blocks[1].width();
        let replaced = replace_dead_blocks(&mut blocks, &analysis);
        assert_eq!(replaced, vec![BlockId(1)]);
        assert_eq!(blocks[1].width(), width);
        assert_eq!(blocks[1].instructions.len(), 3);
        assert_eq!(blocks[1].branch_end, BranchInstruction::AThrow);
    }
}
